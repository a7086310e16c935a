//! Engine configuration

use serde::{Deserialize, Serialize};

/// Default bound on parent-chain walks
pub const DEFAULT_MAX_ANCESTOR_DEPTH: usize = 1024;

/// Broadcast channel capacity for domain events
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Tunables for the questionnaire engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest parent chain walked for cycle checks and visibility resolution
    pub max_ancestor_depth: usize,

    /// Buffered domain events per subscriber before lagging
    pub event_channel_capacity: usize,

    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset
    pub log_filter: String,

    /// Reject creates that arrive without an idempotency key
    pub require_idempotency_key: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_ancestor_depth: DEFAULT_MAX_ANCESTOR_DEPTH,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            log_filter: "info".to_string(),
            require_idempotency_key: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `QCE_*` environment variables.
    ///
    /// Unparseable values fall back to the default for that field.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            max_ancestor_depth: lookup("QCE_MAX_ANCESTOR_DEPTH")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|depth| *depth > 0)
                .unwrap_or(defaults.max_ancestor_depth),
            event_channel_capacity: lookup("QCE_EVENT_CHANNEL_CAPACITY")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.event_channel_capacity),
            log_filter: lookup("QCE_LOG_FILTER")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.log_filter),
            require_idempotency_key: lookup("QCE_REQUIRE_IDEMPOTENCY_KEY")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.require_idempotency_key),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
