#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aocn_core::Snapshot;
use aocn_discord::{DiscordError, NotificationSink};
use aocn_storage::{FetchError, LeaderboardSource};
use aocn_sync::{Notifier, NotifierConfig};
use async_trait::async_trait;
use serde_json::json;

/// Serves whatever snapshot (or HTTP failure) was last configured.
#[derive(Default)]
pub struct FakeLeaderboard {
    pub next: Mutex<Option<Result<Snapshot, u16>>>,
    pub requested_years: Mutex<Vec<i32>>,
    pub delay: Option<Duration>,
}

impl FakeLeaderboard {
    pub fn serving(snapshot: Snapshot) -> Self {
        let fake = Self::default();
        fake.serve(snapshot);
        fake
    }

    pub fn serve(&self, snapshot: Snapshot) {
        *self.next.lock().expect("lock") = Some(Ok(snapshot));
    }

    pub fn fail_with(&self, status: u16) {
        *self.next.lock().expect("lock") = Some(Err(status));
    }

    pub fn fetch_count(&self) -> usize {
        self.requested_years.lock().expect("lock").len()
    }
}

#[async_trait]
impl LeaderboardSource for FakeLeaderboard {
    async fn fetch(&self, year: i32) -> Result<Snapshot, FetchError> {
        self.requested_years.lock().expect("lock").push(year);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.next.lock().expect("lock").clone();
        match next {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(status)) => Err(FetchError::HttpStatus {
                status,
                url: format!("https://aoc.test/{year}/leaderboard/private/view/1.json"),
            }),
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: "unconfigured".to_string(),
            }),
        }
    }
}

/// Records outbound messages and role grants instead of calling Discord.
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
    pub roles: Mutex<Vec<(String, String, String)>>,
    pub deny_roles: bool,
    pub fail_messages: bool,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("lock").clone()
    }

    pub fn roles(&self) -> Vec<(String, String, String)> {
        self.roles.lock().expect("lock").clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send_message(&self, content: &str) -> Result<(), DiscordError> {
        if self.fail_messages {
            return Err(DiscordError::Status {
                action: "webhook execution",
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.messages.lock().expect("lock").push(content.to_string());
        Ok(())
    }

    async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), DiscordError> {
        if self.deny_roles {
            return Err(DiscordError::PermissionDenied {
                action: "role grant",
                status: 403,
            });
        }
        self.roles.lock().expect("lock").push((
            guild_id.to_string(),
            user_id.to_string(),
            role_id.to_string(),
        ));
        Ok(())
    }
}

pub fn config(dir: &Path, require_both: bool) -> NotifierConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("AOCN_CACHE_FILE", dir.join("cache.json").display().to_string()),
        ("AOCN_MAPPING_FILE", dir.join("mapping.json").display().to_string()),
        ("AOCN_YEAR", "2023".to_string()),
        ("AOCN_LEADERBOARD_ID", "1".to_string()),
        ("AOCN_SESSION_ID", "session".to_string()),
        ("AOCN_GUILD_ID", "900".to_string()),
        ("AOCN_WEBHOOK_ID", "800".to_string()),
        ("AOCN_WEBHOOK_TOKEN", "hook".to_string()),
        ("AOCN_DISCORD_TOKEN", "bot".to_string()),
        ("AOCN_REQUIRE_BOTH_STARS", require_both.to_string()),
        ("AOCN_COMPLETION_ROLE", "555".to_string()),
    ]);
    NotifierConfig::from_lookup(|key| vars.get(key).cloned()).expect("test config")
}

pub fn notifier(
    config: NotifierConfig,
    source: &Arc<FakeLeaderboard>,
    sink: &Arc<RecordingSink>,
) -> Notifier {
    Notifier::new(config, source.clone(), sink.clone())
}

/// One member entry: days in `full` have both parts, days in `half` only part 1.
pub fn member(id: &str, name: Option<&str>, full: std::ops::RangeInclusive<u32>, half: &[u32]) -> (String, serde_json::Value) {
    let mut level = serde_json::Map::new();
    for day in full {
        level.insert(
            day.to_string(),
            json!({ "1": { "get_star_ts": 1 }, "2": { "get_star_ts": 2 } }),
        );
    }
    for day in half {
        level.insert(day.to_string(), json!({ "1": { "get_star_ts": 1 } }));
    }
    let numeric_id: u64 = id.parse().expect("numeric member id");
    (
        id.to_string(),
        json!({ "id": numeric_id, "name": name, "completion_day_level": level }),
    )
}

pub fn board(members: Vec<(String, serde_json::Value)>) -> Snapshot {
    let members: serde_json::Map<String, serde_json::Value> = members.into_iter().collect();
    serde_json::from_value(json!({ "event": "2023", "owner_id": 1, "members": members }))
        .expect("board fixture")
}

pub fn write_cache(dir: &Path, snapshot: &Snapshot) {
    std::fs::write(
        dir.join("cache.json"),
        serde_json::to_vec_pretty(snapshot).expect("encode"),
    )
    .expect("write cache");
}

pub fn read_cache(dir: &Path) -> Snapshot {
    serde_json::from_slice(&std::fs::read(dir.join("cache.json")).expect("cache file"))
        .expect("cache json")
}
