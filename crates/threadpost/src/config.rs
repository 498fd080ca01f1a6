//! Router configuration
//!
//! Configuration can be built in code with the `with_*` methods or loaded
//! from the environment with [`RouterConfig::from_env`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ConfigError;

/// Options passed through to every spawned worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Thread name prefix; defaults to the router name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Stack size for worker threads in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Script urls imported into every worker before its bodies run
    #[serde(default)]
    pub scripts: Vec<String>,

    /// Router name, used for logging and worker names
    pub name: String,

    /// Options passed through to the worker spawner
    #[serde(default)]
    pub worker_options: WorkerOptions,

    /// Upper bound on pooled workers
    pub max_workers: usize,

    /// Keep idle workers alive; defaults to the warm-up setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,

    /// Create every worker eagerly; defaults to `max_workers == 1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_up_workers: Option<bool>,

    /// How long the pool waits after a call settles before tearing down idle workers
    #[serde(with = "duration_millis")]
    pub termination_delay: Duration,

    /// Values exposed to worker bodies through their scope
    #[serde(default)]
    pub primitive_parameters: Vec<Value>,

    /// Origin stamped on outgoing frames and required on incoming ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            scripts: vec![],
            name: format!("worker-{}", Uuid::now_v7()),
            worker_options: WorkerOptions::default(),
            max_workers: 1,
            keep_alive: None,
            warm_up_workers: None,
            termination_delay: Duration::from_millis(1000),
            primitive_parameters: vec![],
            origin: None,
        }
    }
}

impl RouterConfig {
    /// Create a configuration with the given router name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Unset or unparseable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            name: std::env::var("THREADPOST_NAME").unwrap_or(defaults.name),
            max_workers: std::env::var("THREADPOST_MAX_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_workers),
            keep_alive: std::env::var("THREADPOST_KEEP_ALIVE")
                .ok()
                .and_then(|s| s.parse().ok()),
            warm_up_workers: std::env::var("THREADPOST_WARM_UP")
                .ok()
                .and_then(|s| s.parse().ok()),
            termination_delay: std::env::var("THREADPOST_TERMINATION_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.termination_delay),
            origin: std::env::var("THREADPOST_ORIGIN").ok(),
            ..defaults
        }
    }

    /// Set the router name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a script imported into every worker
    pub fn with_script(mut self, url: impl Into<String>) -> Self {
        self.scripts.push(url.into());
        self
    }

    /// Set worker passthrough options
    pub fn with_worker_options(mut self, options: WorkerOptions) -> Self {
        self.worker_options = options;
        self
    }

    /// Set the maximum number of pooled workers
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Keep idle workers alive
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Create every worker eagerly
    pub fn with_warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up_workers = Some(warm_up);
        self
    }

    /// Set the idle teardown delay
    pub fn with_termination_delay(mut self, delay: Duration) -> Self {
        self.termination_delay = delay;
        self
    }

    /// Set the values exposed to worker bodies
    pub fn with_primitive_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.primitive_parameters = parameters;
        self
    }

    /// Restrict traffic to an origin
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Effective warm-up setting
    pub fn warms_up(&self) -> bool {
        self.warm_up_workers.unwrap_or(self.max_workers == 1)
    }

    /// Effective keep-alive setting; warm-up always keeps workers alive
    pub fn keeps_alive(&self) -> bool {
        self.warms_up() || self.keep_alive.unwrap_or(false)
    }

    /// Name given to the worker at `index`
    pub fn worker_name(&self, index: usize) -> String {
        let prefix = self.worker_options.name.as_deref().unwrap_or(&self.name);
        format!("{prefix}-{index}")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
