//! Commander history feed.
//!
//! The game rewrites `Commander<N>.cmdrHistory` files in place. Each poll finds
//! the newest file changed since the last one consumed, diffs it against the
//! previous snapshot and hands back only the records that changed.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;

use super::error::{WatchError, WatchResult};
use super::model::{ActorId, HistoryFile, RawEntry, RawSnapshot};

const HISTORY_FILE_PATTERN: &str = r"^Commander\d*\.cmdrHistory$";

#[derive(Clone, Debug)]
struct Candidate {
    path: PathBuf,
    modified: SystemTime,
}

pub struct FeedAggregator {
    dir: PathBuf,
    pattern: Regex,
    /// Modification time of the last file consumed.
    last_modified: Option<SystemTime>,
    last_snapshot: Vec<RawEntry>,
}

impl FeedAggregator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pattern: Regex::new(HISTORY_FILE_PATTERN).expect("Invalid history file regex"),
            last_modified: None,
            last_snapshot: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Points the aggregator at another directory, forgetting everything
    /// consumed so far.
    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dir = dir.into();
        self.last_modified = None;
        self.last_snapshot.clear();
    }

    pub fn is_history_file(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// Returns the records that changed since the last non-empty poll, or
    /// `None` when nothing new is available.
    ///
    /// The first run merges every history file to bootstrap against older
    /// data; later runs only read the newest file modified since the last one
    /// consumed.
    pub fn poll(&mut self, is_first_run: bool) -> Option<RawSnapshot> {
        let candidates = match self.list_candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                log::error!("{}", e);
                return None;
            }
        };
        if candidates.is_empty() {
            return None;
        }

        let (snapshot, modified) = if is_first_run {
            read_merged(&candidates)?
        } else {
            self.read_newest(&candidates)?
        };

        self.last_modified = Some(modified);
        let changed = diff_snapshots(&self.last_snapshot, &snapshot);
        self.last_snapshot = snapshot;

        if changed.is_empty() {
            None
        } else {
            Some(changed)
        }
    }

    fn list_candidates(&self) -> WatchResult<Vec<Candidate>> {
        let list_err = |source| WatchError::ListDir {
            path: self.dir.clone(),
            source,
        };

        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.is_history_file(name));
            if !matches {
                continue;
            }
            // A file that vanished between listing and stat is just skipped.
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            candidates.push(Candidate { path, modified });
        }
        Ok(candidates)
    }

    fn read_newest(&self, candidates: &[Candidate]) -> Option<(Vec<RawEntry>, SystemTime)> {
        let mut fresh: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| self.last_modified.map_or(true, |seen| c.modified > seen))
            .collect();
        fresh.sort_by(|a, b| b.modified.cmp(&a.modified));

        fresh.into_iter().find_map(|candidate| match read_history(&candidate.path) {
            Ok(entries) => Some((entries, candidate.modified)),
            Err(e) => {
                log::warn!("Skipping history file: {}", e);
                None
            }
        })
    }
}

/// Reads every candidate and keeps the newest record per commander.
fn read_merged(candidates: &[Candidate]) -> Option<(Vec<RawEntry>, SystemTime)> {
    let mut newest: HashMap<ActorId, RawEntry> = HashMap::new();
    let mut watermark = None;

    for candidate in candidates {
        let entries = match read_history(&candidate.path) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Skipping history file: {}", e);
                continue;
            }
        };
        watermark = watermark.max(Some(candidate.modified));
        for entry in entries {
            match newest.get(&entry.commander_id) {
                Some(existing) if existing.epoch >= entry.epoch => {}
                _ => {
                    newest.insert(entry.commander_id, entry);
                }
            }
        }
    }

    let watermark = watermark?;
    let mut merged: Vec<RawEntry> = newest.into_values().collect();
    merged.sort_by_key(|e| (e.epoch, e.commander_id));
    log::info!(
        "Bootstrapped {} commanders from {} history files",
        merged.len(),
        candidates.len()
    );
    Some((merged, watermark))
}

fn read_history(path: &Path) -> WatchResult<Vec<RawEntry>> {
    let content = fs::read_to_string(path).map_err(|source| WatchError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: HistoryFile = serde_json::from_str(&content).map_err(|source| WatchError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.interactions)
}

/// Records in `current` that were not in `previous`, oldest first.
fn diff_snapshots(previous: &[RawEntry], current: &[RawEntry]) -> Vec<RawEntry> {
    let seen: HashSet<&RawEntry> = previous.iter().collect();
    let mut changed: Vec<RawEntry> = current
        .iter()
        .filter(|entry| !seen.contains(entry))
        .cloned()
        .collect();
    changed.sort_by_key(|e| e.epoch);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn write_history(dir: &Path, name: &str, entries: &[(u64, i64)], age_secs: u64) -> PathBuf {
        let interactions: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, epoch)| serde_json::json!({"CommanderID": id, "Epoch": epoch, "Interactions": ["Met"]}))
            .collect();
        let path = dir.join(name);
        fs::write(&path, serde_json::json!({ "Interactions": interactions }).to_string()).unwrap();
        set_age(&path, age_secs);
        path
    }

    fn set_age(path: &Path, age_secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn test_file_pattern() {
        let feed = FeedAggregator::new(".");
        assert!(feed.is_history_file("Commander.cmdrHistory"));
        assert!(feed.is_history_file("Commander1234.cmdrHistory"));
        assert!(!feed.is_history_file("Commander1234.cmdrHistory.bak"));
        assert!(!feed.is_history_file("Journal.2024.log"));
        assert!(!feed.is_history_file("CommanderX.cmdrHistory"));
    }

    #[test]
    fn test_first_run_merges_all_files() {
        let dir = tempdir().unwrap();
        write_history(dir.path(), "Commander1.cmdrHistory", &[(1, 100), (2, 100)], 100);
        write_history(dir.path(), "Commander2.cmdrHistory", &[(2, 200), (3, 50)], 50);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut feed = FeedAggregator::new(dir.path());
        let snapshot = feed.poll(true).unwrap();

        assert_eq!(snapshot.len(), 3);
        let two = snapshot.iter().find(|e| e.commander_id == 2).unwrap();
        assert_eq!(two.epoch, 200);
        // Oldest first.
        assert_eq!(snapshot[0].commander_id, 3);
    }

    #[test]
    fn test_unchanged_feed_yields_nothing() {
        let dir = tempdir().unwrap();
        let path = write_history(dir.path(), "Commander1.cmdrHistory", &[(1, 100)], 100);

        let mut feed = FeedAggregator::new(dir.path());
        assert!(feed.poll(true).is_some());
        assert!(feed.poll(false).is_none());

        // Rewritten with identical content and a newer mtime: still nothing new.
        set_age(&path, 10);
        assert!(feed.poll(false).is_none());
    }

    #[test]
    fn test_later_runs_read_newest_changed_file_only() {
        let dir = tempdir().unwrap();
        write_history(dir.path(), "Commander1.cmdrHistory", &[(1, 100)], 100);

        let mut feed = FeedAggregator::new(dir.path());
        feed.poll(true).unwrap();

        write_history(dir.path(), "Commander1.cmdrHistory", &[(1, 100), (2, 150)], 10);
        let changed = feed.poll(false).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].commander_id, 2);
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let dir = tempdir().unwrap();
        write_history(dir.path(), "Commander1.cmdrHistory", &[(1, 100)], 100);
        let bad = dir.path().join("Commander2.cmdrHistory");
        fs::write(&bad, "{ truncated").unwrap();
        set_age(&bad, 5);

        let mut feed = FeedAggregator::new(dir.path());
        let snapshot = feed.poll(false).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].commander_id, 1);
    }

    #[test]
    fn test_only_malformed_candidate_yields_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Commander1.cmdrHistory"), "not json").unwrap();

        let mut feed = FeedAggregator::new(dir.path());
        assert!(feed.poll(true).is_none());
        assert!(feed.poll(false).is_none());
    }

    #[test]
    fn test_missing_directory_yields_nothing() {
        let dir = tempdir().unwrap();
        let mut feed = FeedAggregator::new(dir.path().join("missing"));
        assert!(feed.poll(true).is_none());
        assert!(feed.poll(false).is_none());
    }

    #[test]
    fn test_set_dir_forgets_watermark() {
        let dir = tempdir().unwrap();
        write_history(dir.path(), "Commander1.cmdrHistory", &[(1, 100)], 100);

        let mut feed = FeedAggregator::new(dir.path());
        feed.poll(true).unwrap();
        assert!(feed.poll(false).is_none());

        feed.set_dir(dir.path());
        assert!(feed.poll(false).is_some());
    }
}
