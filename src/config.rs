use serde::{Deserialize, Serialize};

use crate::net::SPEED_UNLIMITED;
use crate::utils::logger::LoggerConfig;

/// Frame-wide tunables. Every field has a working default, so an empty
/// config file is a valid config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Main loop tick; also the coarse clock refresh interval.
    pub tick_interval_ms: u64,
    /// Longest sleep an idle actor takes between wakeups.
    pub idle_sleep_ms: u64,
    /// Messages drained per queue per dispatch round.
    pub msg_batch: usize,
    pub actor_queue_size: usize,
    pub pool_queue_size: usize,
    pub dns_cache_ttl_secs: u64,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    /// Bytes per second; `SPEED_UNLIMITED` disables throttling.
    pub send_speed_limit: u32,
    pub recv_speed_limit: u32,
    pub listen_backlog: i32,
    /// Pending outbound buffers per connection before sends are refused.
    pub send_queue_limit: usize,
    pub logger: Option<LoggerConfig>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            idle_sleep_ms: 50,
            msg_batch: 16,
            actor_queue_size: 64,
            pool_queue_size: 1024,
            dns_cache_ttl_secs: 3600,
            connect_timeout_secs: 3600,
            idle_timeout_secs: 3600,
            send_speed_limit: SPEED_UNLIMITED,
            recv_speed_limit: SPEED_UNLIMITED,
            listen_backlog: 100,
            send_queue_limit: 64,
            logger: None,
        }
    }
}
