//! Configuration knobs (§6).

use std::time::Duration;

use crate::error::{Result, SwtpError};
use crate::seq::MAX_WINDOW_CAPACITY;

#[derive(Debug, Clone)]
pub struct Config {
    pub receive_window_size: u16,
    pub max_send_window_size: Option<u16>,
    pub timeout: Duration,
    pub ping_timeout: Duration,
    pub max_retry: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            receive_window_size: 16,
            max_send_window_size: None,
            timeout: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(5),
            max_retry: 3,
        }
    }
}

impl Config {
    pub fn new(
        receive_window_size: u16,
        max_send_window_size: Option<u16>,
        timeout: Duration,
        ping_timeout: Duration,
        max_retry: u32,
    ) -> Result<Self> {
        if receive_window_size == 0 || receive_window_size > MAX_WINDOW_CAPACITY {
            return Err(SwtpError::InvalidConfig {
                field: "receive_window_size",
                value: receive_window_size as i64,
                min: 1,
                max: MAX_WINDOW_CAPACITY as i64,
            });
        }
        if let Some(max) = max_send_window_size {
            if max == 0 || max > MAX_WINDOW_CAPACITY {
                return Err(SwtpError::InvalidConfig {
                    field: "max_send_window_size",
                    value: max as i64,
                    min: 1,
                    max: MAX_WINDOW_CAPACITY as i64,
                });
            }
        }
        Ok(Config {
            receive_window_size,
            max_send_window_size,
            timeout,
            ping_timeout,
            max_retry,
        })
    }

    /// Size the local send window given the peer's advertised capacity.
    pub fn send_window_capacity(&self, peer_capacity: u16) -> u16 {
        match self.max_send_window_size {
            Some(cap) => peer_capacity.min(cap),
            None => peer_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_receive_window() {
        assert!(Config::new(0, None, Duration::from_secs(1), Duration::from_secs(5), 3).is_err());
    }

    #[test]
    fn rejects_oversized_receive_window() {
        assert!(Config::new(
            MAX_WINDOW_CAPACITY + 1,
            None,
            Duration::from_secs(1),
            Duration::from_secs(5),
            3
        )
        .is_err());
    }

    #[test]
    fn send_window_capped_by_local_max() {
        let cfg = Config::new(16, Some(4), Duration::from_secs(1), Duration::from_secs(5), 3).unwrap();
        assert_eq!(cfg.send_window_capacity(8), 4);
        assert_eq!(cfg.send_window_capacity(2), 2);
    }

    #[test]
    fn send_window_uncapped_without_local_max() {
        let cfg = Config::default();
        assert_eq!(cfg.send_window_capacity(8), 8);
    }
}
