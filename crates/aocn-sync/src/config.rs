use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aocn_core::MessageSettings;
use aocn_discord::{DiscordConfig, WebhookTarget, DEFAULT_API_BASE};
use aocn_storage::{LeaderboardClientConfig, DEFAULT_BASE_URL};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer};

/// Minute marks 0, 15, 30, 45 and 52 of every hour (seconds-first cron).
pub const DEFAULT_SCHEDULE: &str = "0 0,15,30,45,52 * * * *";
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;
pub const DEFAULT_TOTAL_DAYS: u32 = 25;

/// Everything the notifier needs, built once and handed to each component.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub cache_file: PathBuf,
    pub mapping_file: PathBuf,
    #[serde(default)]
    pub year: Option<i32>,
    pub leaderboard_id: u64,
    pub session_id: String,
    #[serde(deserialize_with = "snowflake")]
    pub guild_id: String,
    #[serde(deserialize_with = "snowflake")]
    pub webhook_id: String,
    pub webhook_token: String,
    pub discord_token: String,
    #[serde(default)]
    pub require_both_stars: bool,
    #[serde(default, deserialize_with = "optional_snowflake")]
    pub completion_role: Option<String>,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_webhook_username")]
    pub webhook_username: String,
    #[serde(default)]
    pub webhook_avatar_url: Option<String>,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_total_days")]
    pub total_days: u32,
    #[serde(default = "default_aoc_base_url")]
    pub aoc_base_url: String,
    #[serde(default = "default_discord_api_base")]
    pub discord_api_base: String,
}

fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_string()
}

fn default_http_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    concat!("aocn/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_webhook_username() -> String {
    "AoC Leaderboard".to_string()
}

fn default_max_message_len() -> usize {
    DEFAULT_MAX_MESSAGE_LEN
}

fn default_total_days() -> u32 {
    DEFAULT_TOTAL_DAYS
}

fn default_aoc_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_discord_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSnowflake {
    Number(u64),
    Text(String),
}

impl From<RawSnowflake> for String {
    fn from(raw: RawSnowflake) -> Self {
        match raw {
            RawSnowflake::Number(n) => n.to_string(),
            RawSnowflake::Text(s) => s,
        }
    }
}

// YAML users write ids unquoted; keep them as strings either way.
fn snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawSnowflake::deserialize(deserializer).map(String::from)
}

fn optional_snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawSnowflake>::deserialize(deserializer)?.map(String::from))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("{key} must be true or false, got {other:?}"),
    }
}

impl NotifierConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup using the `AOCN_*` variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("missing required environment variable {key}"))
        };
        let parsed = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| v.trim().parse::<u64>().with_context(|| format!("{key} must be an integer")))
                .transpose()
        };
        let parsed_u32 = |key: &str| -> Result<Option<u32>> {
            parsed(key)?
                .map(|v| u32::try_from(v).with_context(|| format!("{key} is out of range: {v}")))
                .transpose()
        };

        Ok(Self {
            cache_file: PathBuf::from(required("AOCN_CACHE_FILE")?),
            mapping_file: PathBuf::from(required("AOCN_MAPPING_FILE")?),
            year: lookup("AOCN_YEAR")
                .map(|v| v.trim().parse::<i32>().context("AOCN_YEAR must be a year"))
                .transpose()?,
            leaderboard_id: required("AOCN_LEADERBOARD_ID")?
                .trim()
                .parse()
                .context("AOCN_LEADERBOARD_ID must be the numeric leaderboard id")?,
            session_id: required("AOCN_SESSION_ID")?,
            guild_id: required("AOCN_GUILD_ID")?,
            webhook_id: required("AOCN_WEBHOOK_ID")?,
            webhook_token: required("AOCN_WEBHOOK_TOKEN")?,
            discord_token: required("AOCN_DISCORD_TOKEN")?,
            require_both_stars: lookup("AOCN_REQUIRE_BOTH_STARS")
                .map(|v| parse_flag("AOCN_REQUIRE_BOTH_STARS", &v))
                .transpose()?
                .unwrap_or(false),
            completion_role: lookup("AOCN_COMPLETION_ROLE").filter(|v| !v.trim().is_empty()),
            schedule: lookup("AOCN_SCHEDULE").unwrap_or_else(default_schedule),
            http_timeout_secs: parsed("AOCN_HTTP_TIMEOUT_SECS")?.unwrap_or_else(default_http_timeout_secs),
            user_agent: lookup("AOCN_USER_AGENT").unwrap_or_else(default_user_agent),
            webhook_username: lookup("AOCN_WEBHOOK_USERNAME").unwrap_or_else(default_webhook_username),
            webhook_avatar_url: lookup("AOCN_WEBHOOK_AVATAR_URL"),
            max_message_len: parsed_u32("AOCN_MAX_MESSAGE_LEN")?
                .map(|v| v as usize)
                .unwrap_or_else(default_max_message_len),
            total_days: parsed_u32("AOCN_TOTAL_DAYS")?.unwrap_or_else(default_total_days),
            aoc_base_url: lookup("AOCN_BASE_URL").unwrap_or_else(default_aoc_base_url),
            discord_api_base: lookup("AOCN_DISCORD_API_BASE").unwrap_or_else(default_discord_api_base),
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Configured year, else the current event: this year in December, last year otherwise.
    pub fn effective_year(&self, today: NaiveDate) -> i32 {
        self.year.unwrap_or_else(|| {
            if today.month() == 12 {
                today.year()
            } else {
                today.year() - 1
            }
        })
    }

    pub fn message_settings(&self, year: i32) -> MessageSettings {
        MessageSettings {
            year,
            total_days: self.total_days,
            reward_role: self.completion_role.clone(),
            max_len: self.max_message_len,
        }
    }

    pub fn leaderboard_client_config(&self) -> LeaderboardClientConfig {
        LeaderboardClientConfig {
            base_url: self.aoc_base_url.clone(),
            leaderboard_id: self.leaderboard_id,
            session_id: self.session_id.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn discord_config(&self) -> DiscordConfig {
        DiscordConfig {
            api_base: self.discord_api_base.clone(),
            bot_token: self.discord_token.clone(),
            webhook: WebhookTarget {
                id: self.webhook_id.clone(),
                token: self.webhook_token.clone(),
            },
            username: Some(self.webhook_username.clone()),
            avatar_url: self.webhook_avatar_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }
}
