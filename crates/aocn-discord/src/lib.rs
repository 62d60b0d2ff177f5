//! Discord REST sink: webhook execution and member role grants.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "aocn-discord";

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("discord request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("discord denied {action} (http {status})")]
    PermissionDenied { action: &'static str, status: u16 },
    #[error("discord returned http {status} for {action}: {body}")]
    Status {
        action: &'static str,
        status: u16,
        body: String,
    },
}

/// Outbound side of the notifier: one message per batch, plus role grants.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_message(&self, content: &str) -> Result<(), DiscordError>;

    async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), DiscordError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub api_base: String,
    pub bot_token: String,
    pub webhook: WebhookTarget,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct ExecuteWebhook<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
    // Mentions still render as names, but nobody gets pinged.
    allowed_mentions: AllowedMentions,
}

#[derive(Debug)]
pub struct DiscordClient {
    client: reqwest::Client,
    config: DiscordConfig,
}

impl DiscordClient {
    pub fn new(config: DiscordConfig) -> Result<Self, DiscordError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn api_base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    pub fn webhook_url(&self) -> String {
        format!(
            "{}/webhooks/{}/{}",
            self.api_base(),
            self.config.webhook.id,
            self.config.webhook.token
        )
    }

    pub fn member_role_url(&self, guild_id: &str, user_id: &str, role_id: &str) -> String {
        format!(
            "{}/guilds/{guild_id}/members/{user_id}/roles/{role_id}",
            self.api_base()
        )
    }

    fn webhook_payload<'a>(&'a self, content: &'a str) -> ExecuteWebhook<'a> {
        ExecuteWebhook {
            content,
            username: self.config.username.as_deref(),
            avatar_url: self.config.avatar_url.as_deref(),
            allowed_mentions: AllowedMentions { parse: Vec::new() },
        }
    }
}

async fn check_status(action: &'static str, resp: reqwest::Response) -> Result<(), DiscordError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        return Err(DiscordError::PermissionDenied {
            action,
            status: status.as_u16(),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(DiscordError::Status {
        action,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl NotificationSink for DiscordClient {
    async fn send_message(&self, content: &str) -> Result<(), DiscordError> {
        debug!(len = content.len(), "executing webhook");
        let resp = self
            .client
            .post(self.webhook_url())
            .json(&self.webhook_payload(content))
            .send()
            .await?;
        check_status("webhook execution", resp).await
    }

    async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), DiscordError> {
        debug!(guild_id, user_id, role_id, "granting role");
        let resp = self
            .client
            .put(self.member_role_url(guild_id, user_id, role_id))
            .header(AUTHORIZATION, format!("Bot {}", self.config.bot_token))
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        check_status("role grant", resp).await
    }
}
