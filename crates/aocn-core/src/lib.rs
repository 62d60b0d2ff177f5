//! Core leaderboard model, completion-event projection and notification text for AOCN.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub mod events;
pub mod message;

pub use events::{classify_diff, has_completed_all, CompletionEvent, DiffOutcome, EventSet};
pub use message::{
    completion_message, display_member, format_event_line, truncate, MessageSettings,
    NotificationBatch, TRUNCATION_MARKER,
};

pub const CRATE_NAME: &str = "aocn-core";

/// Remote member id -> platform user id.
pub type IdentityMapping = BTreeMap<String, String>;

/// Day number -> part number -> star.
pub type CompletionDayLevel = BTreeMap<String, BTreeMap<String, StarCompletion>>;

/// Full private leaderboard state as returned by the remote API.
///
/// Fields the notifier does not interpret are kept in `extra` so a cached
/// snapshot round-trips without losing anything the API sent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub members: BTreeMap<String, Member>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn member(&self, member_id: &str) -> Option<&Member> {
        self.members.get(member_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Event year reported by the API (`"event": "2023"`), if present.
    pub fn event_year(&self) -> Option<i32> {
        match self.extra.get("event")? {
            JsonValue::String(s) => s.trim().parse().ok(),
            JsonValue::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Member {
    #[serde(default, deserialize_with = "id_from_number_or_string")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub completion_day_level: CompletionDayLevel,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StarCompletion {
    #[serde(default)]
    pub get_star_ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_index: Option<u64>,
}

// The API sends numeric ids; cached snapshots written by us carry strings.
fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}
