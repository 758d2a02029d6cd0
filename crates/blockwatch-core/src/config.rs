// ── Monitor tuning ──
//
// Timing knobs for the per-tenant loop. Built by the binary from the
// loaded configuration; core never reads config files.

use std::time::Duration;

use blockwatch_api::query::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Wait between cycles when nothing was renamed.
    pub poll_interval: Duration,
    /// Wait after a cycle that renamed a display, to respect platform
    /// rename limits.
    pub cooldown: Duration,
    /// Deadline for one query round trip.
    pub query_timeout: Duration,
    /// Port used when setup omits one.
    pub default_port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            cooldown: Duration::from_secs(301),
            query_timeout: Duration::from_millis(1000),
            default_port: DEFAULT_PORT,
        }
    }
}
