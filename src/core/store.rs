//! Durable commander store.
//!
//! A single JSON object mapping commander id to its record. Read once at
//! startup and rewritten after every decision pass that changed something.
//! Advisory only: a failed write leaves memory authoritative until the next
//! successful one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{WatchError, WatchResult};
use super::model::{Actor, ActorId};

pub struct ActorStore {
    path: PathBuf,
    actors: BTreeMap<ActorId, Actor>,
    dirty: bool,
}

impl ActorStore {
    /// An empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            actors: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Loads the store from `path`. A missing file is an empty store; an
    /// unreadable or malformed one is reported so the caller can decide.
    ///
    /// Individual records that fail to parse are dropped. The file is then
    /// copied aside first so the next save does not lose them for good.
    pub fn load(path: impl Into<PathBuf>) -> WatchResult<Self> {
        let mut store = Self::new(path);
        if !store.path.exists() {
            return Ok(store);
        }

        let content = fs::read_to_string(&store.path).map_err(|source| WatchError::Read {
            path: store.path.clone(),
            source,
        })?;
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|source| WatchError::Parse {
                path: store.path.clone(),
                source,
            })?;

        let mut rejected = 0;
        for (key, value) in raw {
            let parsed = key
                .parse::<ActorId>()
                .ok()
                .zip(serde_json::from_value::<Actor>(value).ok());
            match parsed {
                Some((id, actor)) => {
                    store.actors.insert(id, actor);
                }
                None => {
                    log::warn!("Dropping unreadable commander record {:?} in {:?}", key, store.path);
                    rejected += 1;
                }
            }
        }
        if rejected > 0 {
            store.back_up()?;
        }

        log::info!("Loaded {} known commanders from {:?}", store.actors.len(), store.path);
        Ok(store)
    }

    /// Like `load`, but starts empty (and logs) instead of failing. An
    /// unreadable file is moved aside rather than overwritten.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => store,
            Err(e) => {
                log::error!("Starting with an empty commander store: {}", e);
                let store = Self::new(path);
                if store.path.exists() {
                    let backup = store.backup_path();
                    match fs::rename(&store.path, &backup) {
                        Ok(()) => log::warn!("Moved unreadable store to {:?}", backup),
                        Err(e) => log::error!("Failed to move unreadable store aside: {}", e),
                    }
                }
                store
            }
        }
    }

    /// `<store file>.bak` next to the store.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        self.path.with_file_name(name)
    }

    fn back_up(&self) -> WatchResult<()> {
        let backup = self.backup_path();
        fs::copy(&self.path, &backup).map_err(|source| WatchError::Write {
            path: backup.clone(),
            source,
        })?;
        log::warn!("Kept a copy of the original store at {:?}", backup);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    /// Inserts or replaces a record and marks the store for writing.
    pub fn upsert(&mut self, actor: Actor) {
        self.actors.insert(actor.commander_id, actor);
        self.dirty = true;
    }

    /// Renames a known commander. Returns false if the id is unknown.
    pub fn set_name(&mut self, id: ActorId, name: &str) -> bool {
        self.edit(id, |actor| actor.name = name.to_string())
    }

    /// Changes a known commander's sound class. Returns false if the id is unknown.
    pub fn set_sound(&mut self, id: ActorId, sound: &str) -> bool {
        self.edit(id, |actor| actor.sound = sound.to_string())
    }

    fn edit(&mut self, id: ActorId, f: impl FnOnce(&mut Actor)) -> bool {
        match self.actors.get_mut(&id) {
            Some(actor) => {
                f(actor);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> WatchResult<()> {
        let write_err = |source| WatchError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = serde_json::to_string_pretty(&self.actors).map_err(|source| {
            WatchError::Serialize {
                what: "commander store",
                source,
            }
        })?;
        fs::write(&self.path, content).map_err(write_err)?;
        self.dirty = false;
        Ok(())
    }

    /// Writes the store if anything changed since the last successful write.
    /// Failures are logged and retried on the next call.
    pub fn persist_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        if let Err(e) = self.save() {
            log::error!("{}", e);
        }
    }
}
