use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub type ActorId = u64;

/// Interaction tag marking an actual encounter. Entries without it are ignored.
pub const TAG_MET: &str = "Met";
pub const TAG_WING_MEMBER: &str = "WingMember";
pub const TAG_KILLED: &str = "Killed";

pub const DEFAULT_NAME: &str = "unknown";
pub const DEFAULT_SOUND: &str = "neutral";

/// Seconds between 1601-01-01T00:00:00Z (the feed's epoch) and the Unix epoch.
const FEED_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// One record from a commander history file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawEntry {
    #[serde(rename = "CommanderID")]
    pub commander_id: ActorId,
    #[serde(rename = "Epoch")]
    pub epoch: i64,
    #[serde(rename = "Interactions", default)]
    pub interactions: Vec<String>,
}

impl RawEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.interactions.iter().any(|t| t == tag)
    }

    /// Converts the feed epoch (seconds since 1601) to a UTC timestamp.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        feed_epoch_to_utc(self.epoch)
    }
}

pub fn feed_epoch_to_utc(epoch: i64) -> Option<DateTime<Utc>> {
    let unix = epoch.checked_sub(FEED_EPOCH_OFFSET_SECS)?;
    Utc.timestamp_opt(unix, 0).single()
}

/// Top-level shape of a `Commander*.cmdrHistory` file. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryFile {
    #[serde(rename = "Interactions", default)]
    pub interactions: Vec<RawEntry>,
}

/// Changed records handed from the feed aggregator to the decider.
pub type RawSnapshot = Vec<RawEntry>;

/// Coarse observer state. The ordinal mirrors the host's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LocationState {
    #[default]
    Unknown,
    Docked,
    Supercruise,
    NormalSpace,
    Hyperspace,
}

/// Durable per-commander metadata.
///
/// `name` and `sound` belong to whoever edits them (a UI, usually); the engine
/// only ever touches `last_seen` and `interactions`, plus the one kill
/// attribution rename.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub commander_id: ActorId,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_sound")]
    pub sound: String,
    #[serde(with = "iso_timestamp")]
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<String>,
}

impl Actor {
    pub fn new(commander_id: ActorId, last_seen: DateTime<Utc>) -> Self {
        Self {
            commander_id,
            name: default_name(),
            sound: default_sound(),
            last_seen,
            interactions: Vec::new(),
        }
    }

    pub fn has_default_name(&self) -> bool {
        self.name == DEFAULT_NAME
    }
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_sound() -> String {
    DEFAULT_SOUND.to_string()
}

/// ISO-8601 timestamps. Writes RFC 3339; reads RFC 3339 or offset-less
/// legacy values, which are taken as UTC.
mod iso_timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|e| de::Error::custom(format!("bad timestamp {raw:?}: {e}")))
    }
}

/// Uppercases the first character and lowercases the rest.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
