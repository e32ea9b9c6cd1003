use std::time::Duration;

use crate::heartbeat::HeartbeatRules;

/// Gateway timing knobs. `Default` is the production protocol.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Advertised to clients in HELLO.
    pub heartbeat_interval: Duration,
    /// How often each session checks its own liveness.
    pub supervise_every: Duration,
    pub heartbeat: HeartbeatRules,
    /// How long a fresh connection may take to send IDENTIFY.
    pub identify_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(20_000),
            supervise_every: Duration::from_secs(1),
            heartbeat: HeartbeatRules::default(),
            identify_timeout: Duration::from_secs(30),
        }
    }
}

/// Board deletion vote knobs.
#[derive(Debug, Clone, Copy)]
pub struct VoteConfig {
    pub tick: Duration,
    /// Ticks a vote may run before it expires.
    pub budget_ticks: u32,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            budget_ticks: 300,
        }
    }
}
