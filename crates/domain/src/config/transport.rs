use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Domain suffix appended to normalized numeric addresses before
    /// handing them to the transport (`{digits}@{suffix}`).
    #[serde(default = "d_address_suffix")]
    pub address_suffix: String,
    /// Loopback transport only: delay before an unpaired session
    /// auto-pairs and reports connected. Real connectors ignore this.
    #[serde(default = "d_auto_pair_ms")]
    pub auto_pair_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address_suffix: d_address_suffix(),
            auto_pair_ms: d_auto_pair_ms(),
        }
    }
}

fn d_address_suffix() -> String {
    "wire.courier".into()
}
fn d_auto_pair_ms() -> u64 {
    1500
}
