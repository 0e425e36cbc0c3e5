//! Supervisor tunables.

use std::time::Duration;

/// How often the keep-alive prober pings the transport.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long after a ping a pong may arrive before it counts as missed.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Missed pongs before the connection is declared dead.
pub const MAX_MISSED_PONGS: u32 = 3;

/// How often the health prober inspects the session.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Idle time after which the health prober issues a cheap round-trip.
pub const MAX_IDLE_TIME: Duration = Duration::from_secs(300);

/// Reconnect attempts before a session gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Base delay of the reconnect ladder.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(5000);

/// Ceiling of the reconnect ladder.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_millis(60000);

/// How long a pairing string stays valid.
pub const QR_EXPIRY: Duration = Duration::from_millis(60000);

/// Transport establishment timeouts.
#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub qr_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(60000),
            qr_timeout: Duration::from_millis(60000),
        }
    }
}

/// Everything the supervisor needs to know about pacing: liveness probing,
/// health checking, and the reconnect policy.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_missed_pongs: u32,
    pub health_check_interval: Duration,
    pub max_idle_time: Duration,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub qr_expiry: Duration,
    /// Render pairing strings to stdout as they arrive.
    pub show_qr: bool,
    pub transport: TransportConfig,
}

impl SupervisorConfig {
    /// Delay before reconnect attempt number `attempt` (1-based):
    /// `base × 1.5^(attempt-1)`, clipped to the ceiling.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.reconnect_base_delay.as_millis() as f64 * 1.5_f64.powi(exponent);
        let capped = (millis as u64).min(self.reconnect_max_delay.as_millis() as u64);

        Duration::from_millis(capped)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ping_interval: PING_INTERVAL,
            pong_timeout: PONG_TIMEOUT,
            max_missed_pongs: MAX_MISSED_PONGS,
            health_check_interval: HEALTH_CHECK_INTERVAL,
            max_idle_time: MAX_IDLE_TIME,
            auto_reconnect: true,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: RECONNECT_BASE_DELAY,
            reconnect_max_delay: RECONNECT_MAX_DELAY,
            qr_expiry: QR_EXPIRY,
            show_qr: false,
            transport: TransportConfig::default(),
        }
    }
}
