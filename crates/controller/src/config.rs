//! Runtime configuration from `ESK_*` environment variables.

use std::time::Duration;

use esk_desired::{BuilderOptions, DEFAULT_IMAGE, DEFAULT_JAVA_OPTS};
use tracing::warn;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8001";
pub const DEFAULT_RESOURCE_PATH: &str = "/apis/ibawt.ca/v1/namespaces/default/elasticsearchs";
pub const DEFAULT_WATCH_BACKOFF_SECS: u64 = 5;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL the watch connects to. The watch request carries no
    /// credentials of its own, so this must be an endpoint that authenticates
    /// on esk's behalf: `kubectl proxy` (the default) or a proxy sidecar in the
    /// pod. Object creation uses the kube client's credentials instead.
    pub api_base: String,
    /// Collection path of the watched resource type.
    pub resource_path: String,
    pub watch_backoff: Duration,
    /// Upper bound on waiting for the watch source to close at shutdown.
    pub shutdown_grace: Duration,
    pub builder: BuilderOptions,
    pub metrics_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            resource_path: DEFAULT_RESOURCE_PATH.to_string(),
            watch_backoff: Duration::from_secs(DEFAULT_WATCH_BACKOFF_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            builder: BuilderOptions::default(),
            metrics_addr: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| get(key).filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: u64| match get(key) {
            None => Duration::from_secs(default),
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(v) => Duration::from_secs(v),
                Err(_) => {
                    warn!(key, value = %raw, default, "invalid seconds value; using default");
                    Duration::from_secs(default)
                }
            },
        };
        Self {
            api_base: text("ESK_API_BASE", DEFAULT_API_BASE),
            resource_path: text("ESK_RESOURCE_PATH", DEFAULT_RESOURCE_PATH),
            watch_backoff: secs("ESK_WATCH_BACKOFF_SECS", DEFAULT_WATCH_BACKOFF_SECS),
            shutdown_grace: secs("ESK_SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS),
            builder: BuilderOptions {
                image: text("ESK_IMAGE", DEFAULT_IMAGE),
                java_opts: text("ESK_JAVA_OPTS", DEFAULT_JAVA_OPTS),
            },
            metrics_addr: get("ESK_METRICS_ADDR").filter(|v| !v.trim().is_empty()),
        }
    }
}
