//! Ingestion orchestration: configuration, the per-name controller, stop signal and run summary.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use gamecat_adapters::{SteamDetailExtractor, SteamSearchResolver};
use gamecat_core::RecordStatus;
use gamecat_storage::{
    BackoffPolicy, Credentials, HttpClientConfig, RecordStore, SessionClient, DEFAULT_USER_AGENT,
};
use serde::Serialize;
use uuid::Uuid;

pub mod controller;
pub mod shutdown;

pub use controller::{status_for, IngestController, Stage};
pub use shutdown::{Shutdown, ShutdownTrigger};

pub const CRATE_NAME: &str = "gamecat-sync";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub credentials: Credentials,
    pub country: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_retries: usize,
    pub request_delay: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::anonymous(),
            country: gamecat_adapters::search::DEFAULT_COUNTRY.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 10,
            max_retries: 3,
            request_delay: Duration::from_millis(1000),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            credentials: Credentials {
                session_id: env_opt("STEAM_SESSIONID"),
                login_secure: env_opt("STEAM_LOGIN_SECURE"),
                parental: env_opt("STEAM_PARENTAL"),
                language: env_opt("STEAM_LANGUAGE"),
                timezone_offset: env_opt("STEAM_TIMEZONE_OFFSET"),
            },
            country: env_opt("GAMECAT_COUNTRY").unwrap_or(defaults.country),
            user_agent: env_opt("GAMECAT_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("GAMECAT_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            max_retries: env_parse("GAMECAT_MAX_RETRIES", defaults.max_retries),
            request_delay: Duration::from_millis(env_parse(
                "GAMECAT_REQUEST_DELAY_MS",
                defaults.request_delay.as_millis() as u64,
            )),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_names: usize,
    pub skipped: usize,
    pub persisted: usize,
    pub per_status: BTreeMap<RecordStatus, usize>,
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.interrupted {
            "interrupted"
        } else {
            "complete"
        };
        writeln!(
            f,
            "run {outcome}: {} input names, {} new records, {} already stored",
            self.total_names, self.persisted, self.skipped
        )?;
        for status in RecordStatus::ALL {
            let count = self.per_status.get(&status).copied().unwrap_or_default();
            writeln!(f, "  {:<18} {count}", status.as_str())?;
        }
        Ok(())
    }
}

pub type SteamController = IngestController<SteamSearchResolver, SteamDetailExtractor>;

/// Wire the live storefront client into a controller over `store`.
pub fn steam_controller(
    config: &IngestConfig,
    store: RecordStore,
    shutdown: Shutdown,
) -> Result<SteamController> {
    let client = Arc::new(SessionClient::from_config(
        &config.http_client_config(),
        &config.credentials,
    )?);
    let resolver = SteamSearchResolver::new(Arc::clone(&client), config.country.clone());
    let extractor = SteamDetailExtractor::new(client);
    let known = store.known_names();
    Ok(IngestController::new(store, known, resolver, extractor, shutdown)
        .with_delay(config.request_delay))
}
