//! Engine and trigger-authentication configuration.
//!
//! Explicit structs owned by the application state and passed by reference;
//! nothing here is global. Defaults are the production constants; `from_env`
//! overrides let deployments tune without a rebuild.

use std::net::IpAddr;
use std::time::Duration;

use crate::types::EmailAddress;

/// Tuning knobs for claiming, chunking, checkpointing and retry.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Recipients per chunk; each chunk is one heartbeat-plus-checkpoint unit.
    pub chunk_size: usize,
    /// Persist progress every this many addresses within a chunk.
    pub checkpoint_every: usize,
    /// Width of the bounded send pool inside a batch.
    pub pool_width: usize,
    /// Chunk budget for one job within one invocation.
    pub max_chunks_per_pass: usize,
    /// Jobs claimed per invocation.
    pub max_jobs_per_run: usize,
    /// Lease duration granted at claim time and on each heartbeat.
    pub lease: Duration,
    /// Attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// Fraction of a chunk that may fail before the pass aborts.
    pub failure_abort_ratio: f64,
    /// How long a fetched suppression set stays fresh.
    pub suppression_ttl: Duration,
    /// Recipients for `testOnly` campaigns.
    pub test_recipients: Vec<EmailAddress>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            chunk_size: 200,
            checkpoint_every: 50,
            pool_width: 8,
            max_chunks_per_pass: 10,
            max_jobs_per_run: 3,
            lease: Duration::from_secs(300),
            max_attempts: 5,
            failure_abort_ratio: 0.25,
            suppression_ttl: Duration::from_secs(60),
            test_recipients: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Loads the config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        EngineConfig {
            chunk_size: env_parse("DISPATCH_CHUNK_SIZE", defaults.chunk_size),
            checkpoint_every: env_parse("DISPATCH_CHECKPOINT_EVERY", defaults.checkpoint_every),
            pool_width: env_parse("DISPATCH_POOL_WIDTH", defaults.pool_width),
            max_chunks_per_pass: env_parse("DISPATCH_MAX_CHUNKS", defaults.max_chunks_per_pass),
            max_jobs_per_run: env_parse("DISPATCH_MAX_JOBS", defaults.max_jobs_per_run),
            lease: Duration::from_secs(env_parse("DISPATCH_LEASE_SECS", 300)),
            max_attempts: env_parse("DISPATCH_MAX_ATTEMPTS", defaults.max_attempts),
            failure_abort_ratio: defaults.failure_abort_ratio,
            suppression_ttl: Duration::from_secs(env_parse("DISPATCH_SUPPRESSION_TTL_SECS", 60)),
            test_recipients: std::env::var("DISPATCH_TEST_RECIPIENTS")
                .map(|raw| raw.split(',').map(EmailAddress::new).collect())
                .unwrap_or_default(),
        }
    }

    /// The lease duration as a chrono interval, for date arithmetic on job
    /// documents.
    pub fn lease_interval(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease).unwrap_or_else(|_| chrono::Duration::seconds(300))
    }
}

/// Gates applied to inbound trigger requests.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Static API key; `None` disables the key gate.
    pub api_key: Option<String>,
    /// Shared secret for the HMAC signature scheme.
    pub hmac_secret: Vec<u8>,
    /// Accepted clock skew between caller and server, in seconds.
    pub skew_secs: i64,
    /// Caller allow-list; empty disables the IP gate.
    pub allowed_ips: Vec<IpAddr>,
}

impl AuthConfig {
    /// Default skew tolerance.
    pub const DEFAULT_SKEW_SECS: i64 = 300;

    /// Builds a config with the given secret and default skew.
    pub fn new(hmac_secret: impl Into<Vec<u8>>) -> Self {
        AuthConfig {
            api_key: None,
            hmac_secret: hmac_secret.into(),
            skew_secs: Self::DEFAULT_SKEW_SECS,
            allowed_ips: Vec::new(),
        }
    }

    /// Loads the config from environment variables.
    pub fn from_env() -> Self {
        AuthConfig {
            api_key: std::env::var("CRON_API_KEY").ok().filter(|k| !k.is_empty()),
            hmac_secret: std::env::var("CRON_HMAC_SECRET")
                .unwrap_or_default()
                .into_bytes(),
            skew_secs: env_parse("CRON_SKEW_SECS", Self::DEFAULT_SKEW_SECS),
            allowed_ips: std::env::var("CRON_ALLOWED_IPS")
                .map(|raw| raw.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                .unwrap_or_default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_skew_secs(mut self, skew_secs: i64) -> Self {
        self.skew_secs = skew_secs;
        self
    }

    pub fn with_allowed_ips(mut self, ips: Vec<IpAddr>) -> Self {
        self.allowed_ips = ips;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
