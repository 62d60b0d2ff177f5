use std::time::Duration;

use aocn_core::Snapshot;
use async_trait::async_trait;
use reqwest::header::COOKIE;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const DEFAULT_BASE_URL: &str = "https://adventofcode.com";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("leaderboard request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("decoding leaderboard from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// Expired or wrong session cookies show up as 400/401/403 (or a redirect to login).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 300..=399 | 400 | 401 | 403, .. })
    }
}

/// Anything that can produce the current leaderboard snapshot for a year.
#[async_trait]
pub trait LeaderboardSource: Send + Sync {
    async fn fetch(&self, year: i32) -> Result<Snapshot, FetchError>;
}

#[derive(Debug, Clone)]
pub struct LeaderboardClientConfig {
    pub base_url: String,
    pub leaderboard_id: u64,
    pub session_id: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl LeaderboardClientConfig {
    pub fn new(leaderboard_id: u64, session_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            leaderboard_id,
            session_id: session_id.into(),
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// Private leaderboard JSON endpoint, authenticated with the session cookie.
#[derive(Debug)]
pub struct LeaderboardClient {
    client: reqwest::Client,
    base_url: String,
    leaderboard_id: u64,
    session_id: String,
}

impl LeaderboardClient {
    pub fn new(config: LeaderboardClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            leaderboard_id: config.leaderboard_id,
            session_id: config.session_id,
        })
    }

    pub fn leaderboard_url(&self, year: i32) -> String {
        format!(
            "{}/{year}/leaderboard/private/view/{}.json",
            self.base_url, self.leaderboard_id
        )
    }
}

#[async_trait]
impl LeaderboardSource for LeaderboardClient {
    async fn fetch(&self, year: i32) -> Result<Snapshot, FetchError> {
        let url = self.leaderboard_url(year);
        let span = info_span!("leaderboard_fetch", year, leaderboard_id = self.leaderboard_id);

        async {
            let resp = self
                .client
                .get(&url)
                .header(COOKIE, format!("session={}", self.session_id))
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }

            let body = resp.bytes().await?;
            debug!(bytes = body.len(), "fetched leaderboard");
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode { url: url.clone(), source })
        }
        .instrument(span)
        .await
    }
}
