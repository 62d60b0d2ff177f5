//! `link_aoc` / `unlink_aoc`: user-triggered edits of the identity mapping.

use std::sync::Arc;

use anyhow::{Context, Result};
use aocn_core::{completion_message, has_completed_all, truncate, EventSet};
use aocn_discord::NotificationSink;
use aocn_storage::{IdentityMappingStore, SnapshotStore};
use chrono::Local;
use tracing::{error, info, warn};

use crate::{grant_role, NotifierConfig};

/// Platform user who issued the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoker {
    pub user_id: String,
    pub username: String,
}

impl Invoker {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    NotLinked,
    Failed,
}

/// Every command produces exactly one reply for the invoking user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub status: CommandStatus,
    pub content: String,
}

impl CommandReply {
    fn new(status: CommandStatus, content: impl Into<String>) -> Self {
        Self {
            status,
            content: content.into(),
        }
    }
}

pub struct LinkCommandHandler {
    config: NotifierConfig,
    snapshots: SnapshotStore,
    mapping: Arc<IdentityMappingStore>,
    sink: Arc<dyn NotificationSink>,
}

impl LinkCommandHandler {
    pub fn new(
        config: NotifierConfig,
        snapshots: SnapshotStore,
        mapping: Arc<IdentityMappingStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            snapshots,
            mapping,
            sink,
        }
    }

    pub async fn link(&self, invoker: &Invoker, remote_id: u64) -> CommandReply {
        let remote_id = remote_id.to_string();

        if let Err(err) = self.mapping.set(&remote_id, &invoker.user_id).await {
            error!(error = %err, user_id = %invoker.user_id, remote_id = %remote_id, "link failed");
            return CommandReply::new(CommandStatus::Failed, "Failed to link! Logs printed to console.");
        }

        // The member has almost certainly been fetched already; anyone not yet
        // complete is picked up by the next scheduled cycle instead.
        match self.announce_if_complete(invoker, &remote_id).await {
            Ok(true) => info!(remote_id = %remote_id, "announced completion after link"),
            Ok(false) => {}
            Err(err) => warn!(error = %format!("{err:#}"), remote_id = %remote_id, "post-link completion check failed"),
        }

        CommandReply::new(
            CommandStatus::Success,
            format!("Linked {} with AoC User ID {remote_id}!", invoker.username),
        )
    }

    pub async fn unlink(&self, invoker: &Invoker) -> CommandReply {
        match self.mapping.remove(&invoker.user_id).await {
            Ok(Some(remote_id)) => CommandReply::new(
                CommandStatus::Success,
                format!("Unlinked {} from AoC User ID {remote_id}!", invoker.username),
            ),
            Ok(None) => CommandReply::new(
                CommandStatus::NotLinked,
                "Your account wasn't linked in the first place!",
            ),
            Err(err) => {
                error!(error = %err, user_id = %invoker.user_id, "unlink failed");
                CommandReply::new(CommandStatus::Failed, "Failed to unlink! Logs printed to console.")
            }
        }
    }

    async fn announce_if_complete(&self, invoker: &Invoker, remote_id: &str) -> Result<bool> {
        let cached = self
            .snapshots
            .load()
            .await
            .context("loading cached leaderboard")?;
        let events = EventSet::project(&cached, self.config.require_both_stars);
        if !has_completed_all(&events, remote_id, self.config.total_days) {
            return Ok(false);
        }

        let mapping = self.mapping.load().await.context("reading identity mapping")?;
        let year = cached
            .event_year()
            .unwrap_or_else(|| self.config.effective_year(Local::now().date_naive()));
        let settings = self.config.message_settings(year);
        let mention = invoker.mention();
        let content = format!(
            "{mention} linked their account.\n{}",
            completion_message(remote_id, &mention, &mapping, &settings)
        );

        self.sink
            .send_message(&truncate(&content, settings.max_len))
            .await
            .context("sending completion notification")?;
        grant_role(
            self.sink.as_ref(),
            remote_id,
            &mapping,
            self.config.completion_role.as_deref(),
            &self.config.guild_id,
        )
        .await;
        Ok(true)
    }
}
