//! Reconnect timing policy.
//!
//! Capped exponential backoff with a small deterministic jitter so a
//! fleet of tenants dropped by the same outage does not retry in
//! lockstep. The jitter hashes `(tenant, attempt)`, which keeps delays
//! reproducible in tests and logs.

use std::time::Duration;

use courier_domain::config::ReconnectConfig;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter_ms: u64,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ReconnectConfig) -> Self {
        Self {
            base_delay_ms: cfg.base_delay_ms,
            multiplier: cfg.multiplier,
            max_delay_ms: cfg.max_delay_ms,
            jitter_ms: cfg.jitter_ms,
        }
    }

    /// Delay before the given attempt (attempts start at 1).
    pub fn delay(&self, tenant: &str, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let scaled = self.base_delay_ms as f64 * self.multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped + self.jitter(tenant, attempt))
    }

    fn jitter(&self, tenant: &str, attempt: u32) -> u64 {
        if self.jitter_ms == 0 {
            return 0;
        }
        let mut hasher = Sha256::new();
        hasher.update(tenant.as_bytes());
        hasher.update(attempt.to_be_bytes());
        let digest = hasher.finalize();
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(buf) % self.jitter_ms
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
