//! Sound classes and the files that play them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::model::{Actor, DEFAULT_SOUND};

/// Class that never makes a sound.
pub const SILENT_CLASS: &str = "none";
pub const CORE_CLASSES: [&str; 3] = ["neutral", "friend", "foe"];

const AUDIO_EXTENSIONS: [&str; 2] = ["wav", "mp3"];

/// Maps sound-class keys to audio files. `None` marks a silent class.
#[derive(Debug, Clone, Default)]
pub struct SoundCatalog {
    classes: HashMap<String, Option<PathBuf>>,
}

impl SoundCatalog {
    /// Scans `dir`. Core classes fall back to `dir/default/` when the
    /// directory has no file of their own. Unreadable directories yield a
    /// catalog with only the silent class.
    pub fn scan(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut found = audio_files(dir);
        let defaults = audio_files(&dir.join("default"));

        let mut classes: HashMap<String, Option<PathBuf>> = HashMap::new();
        for class in CORE_CLASSES {
            let file = found
                .remove(class)
                .or_else(|| defaults.get(class).cloned())
                .map(|(_, path)| path);
            match file {
                Some(path) => {
                    classes.insert(class.to_string(), Some(path));
                }
                None => log::warn!("No sound file for class '{}' in {:?}", class, dir),
            }
        }
        for (class, (_, path)) in found {
            classes.insert(class, Some(path));
        }
        classes.insert(SILENT_CLASS.to_string(), None);

        log::info!("Loaded {} sound classes from {:?}", classes.len(), dir);
        Self { classes }
    }

    /// The file for `class`. `None` for silent or unknown classes.
    pub fn resolve(&self, class: &str) -> Option<&Path> {
        self.classes.get(class).and_then(|file| file.as_deref())
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    /// All known class keys, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Picks the class to play for a batch: the first non-neutral audible
    /// class, otherwise the first audible one.
    pub fn select_for_batch<'a>(&self, batch: &'a [Actor]) -> Option<&'a str> {
        let mut audible = batch
            .iter()
            .map(|actor| actor.sound.as_str())
            .filter(|class| self.resolve(class).is_some());
        let first = audible.next()?;
        if first != DEFAULT_SOUND {
            return Some(first);
        }
        audible.find(|class| *class != DEFAULT_SOUND).or(Some(first))
    }
}

/// Perceptual gain for a 0..=100 volume setting.
pub fn gain(volume: u8) -> f32 {
    let v = f32::from(volume.min(100)) / 100.0;
    (1.0 + 9.0 * v).log10()
}

/// Audio files in `dir` keyed by lowercase stem; the newest file wins a clash.
fn audio_files(dir: &Path) -> HashMap<String, (SystemTime, PathBuf)> {
    let mut files: HashMap<String, (SystemTime, PathBuf)> = HashMap::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return files;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !is_audio || !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_lowercase) else {
            continue;
        };
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        match files.get(&stem) {
            Some((existing, _)) if *existing >= modified => {}
            _ => {
                files.insert(stem, (modified, path));
            }
        }
    }
    files
}
