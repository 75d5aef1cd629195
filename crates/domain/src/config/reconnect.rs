use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconnect policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reconnection policy for transient transport drops.
///
/// The delay before attempt `n` is
/// `min(base_delay_ms * multiplier^(n-1), max_delay_ms)` plus a
/// deterministic per-tenant jitter in `[0, jitter_ms]` that spreads
/// retries across tenants during a transport-side outage. Set
/// `multiplier = 1.0` and `jitter_ms = 0` for a plain fixed delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "d_multiplier")]
    pub multiplier: f64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "d_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: d_base_delay_ms(),
            multiplier: d_multiplier(),
            max_delay_ms: d_max_delay_ms(),
            jitter_ms: d_jitter_ms(),
        }
    }
}

fn d_base_delay_ms() -> u64 {
    3000
}
fn d_multiplier() -> f64 {
    2.0
}
fn d_max_delay_ms() -> u64 {
    60_000
}
fn d_jitter_ms() -> u64 {
    500
}
