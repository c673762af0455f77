use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use subconscious_db::queue::{QueueConfig, ReclaimPolicy};
use subconscious_events::BusConfig;
use subconscious_pipeline::ControllerConfig;
use subconscious_worker::SimulationConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<HeaderValue>,
    /// Timeout for non-streaming requests in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for workers and background tasks (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// SSE keep-alive comment interval in seconds (default: `15`).
    pub sse_keepalive_secs: u64,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
    /// Number of worker loops (default: `2`).
    pub worker_count: usize,
    pub controller: ControllerConfig,
    pub bus: BusConfig,
    /// Closed topics older than this are pruned (default: `300`).
    pub topic_retention_secs: u64,
    pub topic_sweep_interval_secs: u64,
    pub queue: QueueConfig,
    pub queue_reap_interval_secs: u64,
    pub simulation: SimulationConfig,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                          | Default                                         |
    /// |----------------------------------|-------------------------------------------------|
    /// | `HOST`                           | `0.0.0.0`                                       |
    /// | `PORT`                           | `8000`                                          |
    /// | `CORS_ORIGINS`                   | `http://localhost:5173,http://127.0.0.1:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                                            |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `10`                                            |
    /// | `SSE_KEEPALIVE_SECS`             | `15`                                            |
    /// | `LOG_FORMAT`                     | `pretty` (`json` for JSON lines)                |
    /// | `WORKER_COUNT`                   | `2`                                             |
    /// | `INITIAL_ESTIMATE_SECS`          | `30`                                            |
    /// | `BUS_HISTORY_CAPACITY`           | `256`                                           |
    /// | `BUS_SUBSCRIBER_BUFFER`          | `64`                                            |
    /// | `TOPIC_RETENTION_SECS`           | `300`                                           |
    /// | `TOPIC_SWEEP_INTERVAL_SECS`      | `60`                                            |
    /// | `QUEUE_RECLAIM_POLICY`           | `redeliver` (or `discard`)                      |
    /// | `QUEUE_VISIBILITY_TIMEOUT_SECS`  | `30`                                            |
    /// | `QUEUE_REAP_INTERVAL_SECS`       | `5`                                             |
    /// | `SIM_WARMUP_MIN_MS`              | `3000`                                          |
    /// | `SIM_WARMUP_MAX_MS`              | `5000`                                          |
    /// | `SIM_NODE_DELAY_MIN_MS`          | `300`                                           |
    /// | `SIM_NODE_DELAY_MAX_MS`          | `800`                                           |
    /// | `SIM_PROGRESS_INTERVAL_MS`       | `1000`                                          |
    /// | `SIM_WARMUP_TIMEOUT_MS`          | unset                                           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let host = env.string("HOST", "0.0.0.0");
        let port: u16 = env.parse("PORT", 8000)?;

        let origins = env.string("CORS_ORIGINS", "http://localhost:5173,http://127.0.0.1:5173");
        let cors_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|o| {
                HeaderValue::from_str(o).map_err(|e| ConfigError::Invalid {
                    var: "CORS_ORIGINS",
                    value: o.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let log_json = match env.string("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "json" => true,
            "pretty" | "text" => false,
            other => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected 'json' or 'pretty'".to_string(),
                })
            }
        };

        let reclaim_policy: ReclaimPolicy = env.parse("QUEUE_RECLAIM_POLICY", ReclaimPolicy::Redeliver)?;

        let simulation = SimulationConfig {
            warmup_min: env.millis("SIM_WARMUP_MIN_MS", 3000)?,
            warmup_max: env.millis("SIM_WARMUP_MAX_MS", 5000)?,
            node_delay_min: env.millis("SIM_NODE_DELAY_MIN_MS", 300)?,
            node_delay_max: env.millis("SIM_NODE_DELAY_MAX_MS", 800)?,
            progress_interval: env.positive_millis("SIM_PROGRESS_INTERVAL_MS", 1000)?,
            warmup_timeout: env
                .optional::<u64>("SIM_WARMUP_TIMEOUT_MS")?
                .map(Duration::from_millis),
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: env.parse("SHUTDOWN_TIMEOUT_SECS", 10)?,
            sse_keepalive_secs: env.positive("SSE_KEEPALIVE_SECS", 15)?,
            log_json,
            worker_count: env.positive("WORKER_COUNT", 2)?,
            controller: ControllerConfig {
                initial_estimate_secs: env.parse("INITIAL_ESTIMATE_SECS", 30)?,
            },
            bus: BusConfig {
                history_capacity: env.positive("BUS_HISTORY_CAPACITY", 256)?,
                subscriber_buffer: env.positive("BUS_SUBSCRIBER_BUFFER", 64)?,
            },
            topic_retention_secs: env.parse("TOPIC_RETENTION_SECS", 300)?,
            topic_sweep_interval_secs: env.positive("TOPIC_SWEEP_INTERVAL_SECS", 60)?,
            queue: QueueConfig {
                visibility_timeout: Duration::from_secs(
                    env.positive("QUEUE_VISIBILITY_TIMEOUT_SECS", 30)?,
                ),
                reclaim_policy,
            },
            queue_reap_interval_secs: env.positive("QUEUE_REAP_INTERVAL_SECS", 5)?,
            simulation,
        })
    }
}

/// Typed access to a key lookup.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &'static str, default: &str) -> String {
        (self.0)(var).unwrap_or_else(|| default.to_string())
    }

    fn optional<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(var) {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::Invalid {
                    var,
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    /// Like [`parse`](Self::parse) but rejects zero.
    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default + ToString,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(var, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(var, default).map(Duration::from_millis)
    }

    fn positive_millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.positive(var, default).map(Duration::from_millis)
    }
}
