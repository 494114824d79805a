//! Game journal events that move the observer.
//!
//! The journal is the host side of the watcher: each JSON line is mapped to a
//! location transition, a jump, a wing change or one of the transient markers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use super::context::Context;
use super::log_io::{self, LogTailer};
use super::model::LocationState;

const JOURNAL_FILE_PATTERN: &str = r"^Journal\..*\.log$";

#[derive(Debug, Deserialize)]
struct JournalLine {
    event: String,
    #[serde(rename = "StarSystem")]
    star_system: Option<String>,
    #[serde(rename = "Victim")]
    victim: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    /// Game start, load, death or respawn: state unknown.
    SessionStart { system: String },
    SupercruiseEntry { system: String },
    SupercruiseExit { system: String },
    /// `Location` or `CarrierJump`.
    Arrived { system: String },
    StartJump { system: String },
    FsdJump,
    Docked { system: String },
    Undocked { system: String },
    WingJoined,
    WingLeft,
    Interdicted,
    PvpKill { victim: String },
    /// Last known location recovered when attaching to a running session.
    Resume { state: LocationState, system: String },
}

impl JournalEvent {
    /// The observer location this event moves to, if any.
    pub fn location(&self) -> Option<(LocationState, &str)> {
        match self {
            Self::SessionStart { system } => Some((LocationState::Unknown, system)),
            Self::SupercruiseEntry { system } | Self::StartJump { system } => {
                Some((LocationState::Supercruise, system))
            }
            Self::SupercruiseExit { system } | Self::Arrived { system } | Self::Undocked { system } => {
                Some((LocationState::NormalSpace, system))
            }
            Self::Docked { system } => Some((LocationState::Docked, system)),
            Self::Resume { state, system } => Some((*state, system)),
            _ => None,
        }
    }
}

/// Parses journal lines, remembering the last system seen.
#[derive(Debug, Default)]
pub struct JournalReader {
    system: String,
}

impl JournalReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn parse_line(&mut self, line: &str) -> Option<JournalEvent> {
        let line: JournalLine = match serde_json::from_str(line.trim_start_matches('\u{feff}')) {
            Ok(line) => line,
            Err(e) => {
                log::debug!("Ignoring unparsable journal line: {}", e);
                return None;
            }
        };
        if let Some(system) = line.star_system {
            self.system = system;
        }
        let system = self.system.clone();

        let event = match line.event.as_str() {
            "StartUp" | "LoadGame" | "Resurrected" | "Died" => JournalEvent::SessionStart { system },
            "SupercruiseEntry" => JournalEvent::SupercruiseEntry { system },
            "SupercruiseExit" => JournalEvent::SupercruiseExit { system },
            "Location" | "CarrierJump" => JournalEvent::Arrived { system },
            "StartJump" => JournalEvent::StartJump { system },
            "FSDJump" | "FsdJump" => JournalEvent::FsdJump,
            "Docked" => JournalEvent::Docked { system },
            "Undocked" => JournalEvent::Undocked { system },
            "WingJoin" | "WingAdd" => JournalEvent::WingJoined,
            "WingLeave" => JournalEvent::WingLeft,
            "Interdicted" | "Interdiction" => JournalEvent::Interdicted,
            "PVPKill" => JournalEvent::PvpKill {
                victim: line.victim.unwrap_or_default(),
            },
            _ => return None,
        };
        Some(event)
    }
}

/// Feeds one journal event into the shared context.
pub fn apply(ctx: &Arc<Context>, event: &JournalEvent) {
    match event {
        JournalEvent::SessionStart { .. }
        | JournalEvent::Docked { .. }
        | JournalEvent::Undocked { .. }
        | JournalEvent::Resume { .. } => {
            if let Some((state, system)) = event.location() {
                ctx.transition(state, system);
            }
        }
        JournalEvent::SupercruiseEntry { system } => {
            ctx.transition(LocationState::Supercruise, system);
            ctx.trigger();
        }
        JournalEvent::SupercruiseExit { system } => {
            ctx.expire_stale_interdiction();
            ctx.transition(LocationState::NormalSpace, system);
            ctx.trigger();
        }
        JournalEvent::Arrived { system } => {
            ctx.transition(LocationState::NormalSpace, system);
            ctx.trigger();
        }
        JournalEvent::StartJump { system } => {
            ctx.transition(LocationState::Supercruise, system);
            ctx.begin_jump();
        }
        JournalEvent::FsdJump => ctx.trigger(),
        JournalEvent::WingJoined => ctx.set_wing(true),
        JournalEvent::WingLeft => ctx.set_wing(false),
        JournalEvent::Interdicted => ctx.note_interdiction(),
        JournalEvent::PvpKill { victim } => ctx.note_pvp_kill(victim),
    }
}

/// Follows the newest journal file in a directory, switching when the game
/// starts a new one.
pub struct JournalFollower {
    dir: PathBuf,
    pattern: Regex,
    tailer: Option<LogTailer>,
    reader: JournalReader,
}

impl JournalFollower {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pattern: Regex::new(JOURNAL_FILE_PATTERN).expect("Invalid journal file regex"),
            tailer: None,
            reader: JournalReader::new(),
        }
    }

    /// Events written since the last poll. On first attach to a session only
    /// the last known location is recovered, as a `Resume`; older markers are
    /// not replayed.
    pub fn poll(&mut self) -> Vec<JournalEvent> {
        let newest = match log_io::find_newest(&self.dir, &self.pattern) {
            Ok(Some(path)) => path,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Failed to scan journal directory {:?}: {}", self.dir, e);
                return Vec::new();
            }
        };

        let current = self.tailer.as_ref().map(LogTailer::path);
        if current == Some(newest.as_path()) {
            return self.read_events();
        }

        let first_attach = self.tailer.is_none();
        match LogTailer::open_from_start(&newest) {
            Ok(tailer) => {
                log::info!("Following journal {:?}", newest);
                self.tailer = Some(tailer);
            }
            Err(e) => {
                log::warn!("Failed to open journal {:?}: {}", newest, e);
                return Vec::new();
            }
        }

        let events = self.read_events();
        if !first_attach {
            return events;
        }
        events
            .iter()
            .rev()
            .find_map(|event| event.location())
            .map(|(state, system)| JournalEvent::Resume {
                state,
                system: system.to_string(),
            })
            .into_iter()
            .collect()
    }

    fn read_events(&mut self) -> Vec<JournalEvent> {
        let Some(tailer) = self.tailer.as_mut() else {
            return Vec::new();
        };
        let lines = match tailer.read_new_lines() {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!("Error reading journal {:?}: {}", tailer.path(), e);
                return Vec::new();
            }
        };
        lines
            .iter()
            .filter_map(|line| self.reader.parse_line(line))
            .collect()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
