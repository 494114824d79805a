use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;

/// Follows a growing line-oriented file.
pub struct LogTailer {
    file: File,
    position: u64,
    path: PathBuf,
}

impl LogTailer {
    pub fn open_from_start(path: impl AsRef<Path>) -> io::Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)?;
        Ok(Self {
            file,
            position: 0,
            path: path_ref.to_path_buf(),
        })
    }

    /// Returns complete lines appended since the last call. A trailing line
    /// without its newline is left for the next call. Invalid UTF-8 is
    /// replaced rather than stalling the tailer.
    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let len = self.file.metadata()?.len();
        if len < self.position {
            // Truncated underneath us; start over.
            self.position = 0;
        }

        let mut lines = Vec::new();
        self.file.seek(SeekFrom::Start(self.position))?;
        let mut reader = BufReader::new(&self.file);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            let bytes_read = reader.read_until(b'\n', &mut buffer)?;
            if bytes_read == 0 || buffer.last() != Some(&b'\n') {
                break;
            }
            self.position += bytes_read as u64;
            let line = String::from_utf8_lossy(&buffer);
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        Ok(lines)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The most recently modified file in `dir` whose name matches `pattern`.
pub fn find_newest(dir: impl AsRef<Path>, pattern: &Regex) -> io::Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| pattern.is_match(name));
        if !matches {
            continue;
        }
        let modified = entry.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        match &newest {
            Some((best, _)) if *best >= modified => {}
            _ => newest = Some((modified, path)),
        }
    }

    Ok(newest.map(|(_, path)| path))
}
