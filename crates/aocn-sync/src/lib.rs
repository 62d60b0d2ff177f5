//! Poll-diff-notify cycle, scheduling and account-link commands for AOCN.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use aocn_core::{classify_diff, DiffOutcome, EventSet, IdentityMapping, NotificationBatch};
use aocn_discord::{DiscordClient, DiscordError, NotificationSink};
use aocn_storage::{IdentityMappingStore, LeaderboardClient, LeaderboardSource, SnapshotStore};
use chrono::{DateTime, Local, Utc};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod commands;
pub mod config;

pub use commands::{CommandReply, CommandStatus, Invoker, LinkCommandHandler};
pub use config::NotifierConfig;

pub const CRATE_NAME: &str = "aocn-sync";

/// How one scheduled cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was still running; this tick did nothing.
    Skipped,
    NoChange,
    /// Completions vanished; the old cache was moved aside and replaced.
    Regression { backup: Option<PathBuf> },
    Notified {
        events: usize,
        finishers: Vec<String>,
    },
}

pub struct Notifier {
    config: NotifierConfig,
    snapshots: SnapshotStore,
    mapping: Arc<IdentityMappingStore>,
    source: Arc<dyn LeaderboardSource>,
    sink: Arc<dyn NotificationSink>,
    cycle_guard: Mutex<()>,
}

impl Notifier {
    pub fn new(
        config: NotifierConfig,
        source: Arc<dyn LeaderboardSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            snapshots: SnapshotStore::new(config.cache_file.clone()),
            mapping: Arc::new(IdentityMappingStore::new(config.mapping_file.clone())),
            config,
            source,
            sink,
            cycle_guard: Mutex::new(()),
        }
    }

    /// Wire the real leaderboard and Discord clients from configuration.
    pub fn from_config(config: NotifierConfig) -> Result<Self> {
        let source = LeaderboardClient::new(config.leaderboard_client_config())
            .context("building leaderboard client")?;
        let sink = DiscordClient::new(config.discord_config()).context("building discord client")?;
        Ok(Self::new(config, Arc::new(source), Arc::new(sink)))
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Command handler sharing this notifier's mapping store (and its lock).
    pub fn link_handler(&self) -> LinkCommandHandler {
        LinkCommandHandler::new(
            self.config.clone(),
            self.snapshots.clone(),
            Arc::clone(&self.mapping),
            Arc::clone(&self.sink),
        )
    }

    /// Run one cycle unless one is already in flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            warn!("previous leaderboard cycle still running; skipping tick");
            return Ok(CycleOutcome::Skipped);
        };

        let span = info_span!("leaderboard_cycle", cycle_id = %Uuid::new_v4());
        self.poll(now).instrument(span).await
    }

    async fn poll(&self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let year = self
            .config
            .effective_year(now.with_timezone(&Local).date_naive());
        let require_both = self.config.require_both_stars;

        let cached = self
            .snapshots
            .load()
            .await
            .context("loading cached leaderboard")?;
        let fresh = self
            .source
            .fetch(year)
            .await
            .with_context(|| format!("fetching leaderboard for {year}"))?;

        let old_events = EventSet::project(&cached, require_both);
        let new_events = EventSet::project(&fresh, require_both);

        match classify_diff(&old_events, &new_events) {
            DiffOutcome::NoChange => {
                info!(events = new_events.len(), "no leaderboard changes");
                Ok(CycleOutcome::NoChange)
            }
            DiffOutcome::Regression => {
                warn!(
                    old_events = old_events.len(),
                    new_events = new_events.len(),
                    "completions disappeared from leaderboard; backing up cache"
                );
                let backup = self
                    .snapshots
                    .backup_and_replace(&fresh, now)
                    .await
                    .context("backing up leaderboard cache")?;
                Ok(CycleOutcome::Regression { backup })
            }
            DiffOutcome::NewEvents(diff) => {
                let mapping = self.display_mapping().await;
                let settings = self
                    .config
                    .message_settings(fresh.event_year().unwrap_or(year));
                let batch = NotificationBatch::build(
                    &diff,
                    &fresh,
                    &old_events,
                    &new_events,
                    &mapping,
                    &settings,
                );

                for member_id in &batch.finishers {
                    grant_role(
                        self.sink.as_ref(),
                        member_id,
                        &mapping,
                        self.config.completion_role.as_deref(),
                        &self.config.guild_id,
                    )
                    .await;
                }

                let content = batch.render_truncated(settings.max_len);
                self.sink
                    .send_message(&content)
                    .await
                    .context("sending leaderboard notification")?;
                info!(events = diff.len(), finishers = batch.finishers.len(), "sent leaderboard notification");

                self.snapshots
                    .save(&fresh)
                    .await
                    .context("saving leaderboard cache")?;

                Ok(CycleOutcome::Notified {
                    events: diff.len(),
                    finishers: batch.finishers,
                })
            }
        }
    }

    // Display only: a stale or unreadable mapping degrades names, never the batch.
    async fn display_mapping(&self) -> IdentityMapping {
        match self.mapping.load().await {
            Ok(mapping) => mapping,
            Err(err) => {
                warn!(error = %err, "identity mapping unreadable; using leaderboard names");
                IdentityMapping::new()
            }
        }
    }

    pub async fn build_scheduler(self: &Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = &self.config.schedule;
        let notifier = Arc::clone(self);
        let job = Job::new_async(cron, move |_uuid, _l| {
            let notifier = Arc::clone(&notifier);
            Box::pin(async move {
                match notifier.run_cycle().await {
                    Ok(outcome) => info!(?outcome, "leaderboard cycle finished"),
                    Err(err) => error!(error = %format!("{err:#}"), "leaderboard cycle failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }

    /// Start the schedule and block until Ctrl-C.
    pub async fn run_until_shutdown(self: Arc<Self>) -> Result<()> {
        let mut sched = self.build_scheduler().await?;
        sched.start().await.context("starting scheduler")?;
        info!(schedule = %self.config.schedule, "leaderboard notifier running");

        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        info!("shutting down");
        sched.shutdown().await.context("stopping scheduler")?;
        Ok(())
    }
}

/// Best-effort reward: a missing link, missing role or denied permission is
/// logged and reported as `false`, never as an error.
pub async fn grant_role(
    sink: &dyn NotificationSink,
    member_id: &str,
    mapping: &IdentityMapping,
    role_id: Option<&str>,
    guild_id: &str,
) -> bool {
    let Some(role_id) = role_id else {
        return false;
    };
    let Some(user_id) = mapping.get(member_id) else {
        info!(member_id, "member finished but has no linked account; no role granted");
        return false;
    };

    match sink.add_member_role(guild_id, user_id, role_id).await {
        Ok(()) => {
            info!(member_id, user_id = %user_id, role_id, "granted completion role");
            true
        }
        Err(err @ DiscordError::PermissionDenied { .. }) => {
            warn!(error = %err, member_id, "bot lacks permission to grant completion role");
            false
        }
        Err(err) => {
            warn!(error = %err, member_id, "granting completion role failed");
            false
        }
    }
}
