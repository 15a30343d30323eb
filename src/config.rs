//! Configuration types for the ARQ engine

use crate::error::{ArqError, Result};
use crate::segment::{constants, Header};

/// Delay/retransmission tuning for different performance modes
#[derive(Debug, Clone, Copy)]
pub struct DelayConfig {
    /// Enable no-delay mode (flush-ASAP RTO scheme, halved backoff)
    pub nodelay: bool,
    /// Update interval hint in milliseconds
    pub interval: u32,
    /// Fast-retransmit ack-skip threshold; 0 disables fast retransmit
    pub resend: u32,
    /// Honor the congestion window in addition to send/remote windows
    pub flow_control: bool,
}

impl DelayConfig {
    /// Normal mode - balanced latency and reliability
    pub fn normal() -> Self {
        Self {
            nodelay: false,
            interval: constants::INTERVAL_DEFAULT,
            resend: constants::RESEND_DEFAULT,
            flow_control: true,
        }
    }

    /// Fast mode - optimized for low latency
    pub fn fast() -> Self {
        Self {
            nodelay: true,
            interval: 10,
            resend: 2,
            flow_control: true,
        }
    }

    /// Turbo mode - minimum latency, congestion window bypassed
    pub fn turbo() -> Self {
        Self {
            nodelay: true,
            interval: 5,
            resend: 1,
            flow_control: false,
        }
    }

    /// Custom configuration
    pub fn custom(nodelay: bool, interval: u32, resend: u32, flow_control: bool) -> Self {
        Self {
            nodelay,
            interval,
            resend,
            flow_control,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.interval == 0 || self.interval > 5000 {
            return Err(ArqError::config(
                "update interval must be between 1 and 5000 ms",
            ));
        }
        Ok(())
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self::normal()
    }
}

/// ARQ connection configuration builder
#[derive(Debug, Clone)]
pub struct ArqConfig {
    /// Maximum transmission unit in bytes (header included)
    pub mtu: u32,
    /// Send window capacity in segments
    pub snd_wnd: u32,
    /// Receive window capacity in segments
    pub rcv_wnd: u32,
    /// Delay/retransmission tuning
    pub delay: DelayConfig,
    /// Retransmission budget per segment before the link is declared dead
    pub max_retries: u32,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            mtu: constants::MTU_DEFAULT,
            snd_wnd: constants::WND_SND,
            rcv_wnd: constants::WND_RCV,
            delay: DelayConfig::normal(),
            max_retries: constants::MAX_RETRIES_DEFAULT,
        }
    }
}

impl ArqConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU (Maximum Transmission Unit)
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set send window size
    pub fn send_window(mut self, wnd: u32) -> Self {
        self.snd_wnd = wnd;
        self
    }

    /// Set receive window size
    pub fn recv_window(mut self, wnd: u32) -> Self {
        self.rcv_wnd = wnd;
        self
    }

    /// Set both send and receive window sizes
    pub fn window_size(mut self, snd_wnd: u32, rcv_wnd: u32) -> Self {
        self.snd_wnd = snd_wnd;
        self.rcv_wnd = rcv_wnd;
        self
    }

    /// Use normal mode (default)
    pub fn normal_mode(mut self) -> Self {
        self.delay = DelayConfig::normal();
        self
    }

    /// Use fast mode for low latency
    pub fn fast_mode(mut self) -> Self {
        self.delay = DelayConfig::fast();
        self
    }

    /// Use turbo mode for minimum latency
    pub fn turbo_mode(mut self) -> Self {
        self.delay = DelayConfig::turbo();
        self
    }

    /// Set custom delay configuration
    pub fn delay_config(mut self, delay: DelayConfig) -> Self {
        self.delay = delay;
        self
    }

    /// Set the per-segment retransmission budget
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Maximum segment payload size under this configuration
    pub fn mss(&self) -> usize {
        self.mtu as usize - Header::SIZE
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mtu < 64 || self.mtu > 65535 {
            return Err(ArqError::config("MTU must be between 64 and 65535"));
        }

        if self.snd_wnd == 0 || self.rcv_wnd == 0 {
            return Err(ArqError::config("window sizes must be greater than 0"));
        }

        if self.rcv_wnd > u16::MAX as u32 {
            return Err(ArqError::config(
                "receive window must fit the 16-bit window advertisement",
            ));
        }

        if self.max_retries == 0 {
            return Err(ArqError::config("max retries must be greater than 0"));
        }

        self.delay.validate()
    }
}

/// Preset configurations for common use cases
impl ArqConfig {
    /// Configuration optimized for games
    pub fn gaming() -> Self {
        Self::default().turbo_mode().window_size(128, 128).mtu(1200)
    }

    /// Configuration optimized for bulk transfers
    pub fn bulk_transfer() -> Self {
        Self::default().normal_mode().window_size(256, 256).mtu(1400)
    }

    /// Configuration optimized for real-time communication
    pub fn realtime() -> Self {
        Self::default().fast_mode().window_size(64, 64).mtu(1200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ArqConfig::default().validate().is_ok());
        assert!(ArqConfig::gaming().validate().is_ok());
        assert!(ArqConfig::bulk_transfer().validate().is_ok());
        assert!(ArqConfig::realtime().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_mtu() {
        assert!(ArqConfig::new().mtu(63).validate().is_err());
        assert!(ArqConfig::new().mtu(70000).validate().is_err());
        assert!(ArqConfig::new().mtu(64).validate().is_ok());
    }

    #[test]
    fn rejects_zero_windows_and_retries() {
        assert!(ArqConfig::new().send_window(0).validate().is_err());
        assert!(ArqConfig::new().recv_window(0).validate().is_err());
        assert!(ArqConfig::new().max_retries(0).validate().is_err());
    }

    #[test]
    fn rejects_bad_interval() {
        let delay = DelayConfig::custom(false, 0, 0, true);
        assert!(ArqConfig::new().delay_config(delay).validate().is_err());
    }

    #[test]
    fn delay_config_copies_by_value() {
        let delay = DelayConfig::fast();
        let copy = delay;
        assert_eq!(copy.interval, delay.interval);
        assert_eq!(copy.nodelay, delay.nodelay);
    }

    #[test]
    fn mss_excludes_header() {
        assert_eq!(ArqConfig::new().mtu(1400).mss(), 1380);
    }
}
