//! Configuration, error and block types shared by the receiver API.

use snafu::{ensure, Snafu};

/// Payload length of a block announced with SOH.
pub const BLOCK_SIZE: usize = 128;
/// Payload length of a block announced with STX (XMODEM-1K).
pub const BLOCK_SIZE_1K: usize = 1024;

/// Error type for this crate
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The configuration can't drive a transfer.
    #[snafu(display("Invalid configuration: {}", reason))]
    InvalidConfig { reason: &'static str },
    /// The caller's output buffer can't hold the block that is ready.
    #[snafu(display("Output buffer too small: need {} bytes, got {}", needed, available))]
    BufferTooSmall { needed: usize, available: usize },
}

/// Protocol timing and policy knobs for [`XmodemServer`](crate::XmodemServer).
///
/// The defaults match what common XMODEM-CRC senders expect.
///
/// ## Example
/// ```
/// use xmodem_proto::Config;
/// let config = Config::default()
///     .with_packet_timeout_ms(2000)
///     .with_max_errors(5);
/// assert!(config.validate(128).is_ok());
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// NAK and restart the block if nothing completes within this window.
    pub packet_timeout_ms: u32,
    /// Interval for repeating the initial `'C'` while no sender has shown up.
    /// Must not exceed `packet_timeout_ms`, or the first timeout would end the
    /// start phase before `'C'` is repeated.
    pub nudge_interval_ms: u32,
    /// CRC failures and timeouts tolerated before the transfer is cancelled.
    pub max_errors: u32,
    /// Acknowledge a retransmitted block that was already delivered.
    pub ack_duplicates: bool,
    /// Treat STX as the header of a 1024 byte block.
    pub accept_1k_blocks: bool,
}

impl Config {
    pub const fn with_packet_timeout_ms(mut self, ms: u32) -> Self {
        self.packet_timeout_ms = ms;
        self
    }

    pub const fn with_nudge_interval_ms(mut self, ms: u32) -> Self {
        self.nudge_interval_ms = ms;
        self
    }

    pub const fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub const fn with_ack_duplicates(mut self, ack: bool) -> Self {
        self.ack_duplicates = ack;
        self
    }

    pub const fn with_1k_blocks(mut self, accept: bool) -> Self {
        self.accept_1k_blocks = accept;
        self
    }

    /// Largest payload this configuration can receive.
    pub const fn max_block_size(&self) -> usize {
        if self.accept_1k_blocks {
            BLOCK_SIZE_1K
        } else {
            BLOCK_SIZE
        }
    }

    /// Check that a receiver with a packet buffer of `capacity` bytes can run
    /// with this configuration.
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self, capacity: usize) -> Result<(), Error> {
        ensure!(
            self.max_errors > 0,
            InvalidConfigSnafu {
                reason: "max_errors must be at least 1"
            }
        );
        ensure!(
            self.packet_timeout_ms > 0,
            InvalidConfigSnafu {
                reason: "packet_timeout_ms must be non-zero"
            }
        );
        ensure!(
            self.nudge_interval_ms > 0,
            InvalidConfigSnafu {
                reason: "nudge_interval_ms must be non-zero"
            }
        );
        // The nudge resets the timer before the timeout is checked, so equal is fine.
        ensure!(
            self.nudge_interval_ms <= self.packet_timeout_ms,
            InvalidConfigSnafu {
                reason: "nudge_interval_ms must not exceed packet_timeout_ms"
            }
        );
        ensure!(
            capacity >= self.max_block_size(),
            InvalidConfigSnafu {
                reason: "packet buffer is smaller than the largest accepted block"
            }
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_timeout_ms: 1000,
            nudge_interval_ms: 500,
            max_errors: 10,
            ack_duplicates: true,
            accept_1k_blocks: false,
        }
    }
}

/// A validated block handed out by [`XmodemServer::process`](crate::XmodemServer::process).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Block {
    /// Zero based index of the block within the transfer. Unlike the on-wire
    /// block number this doesn't wrap at 256.
    pub number: u32,
    /// Number of payload bytes copied into the caller's buffer.
    pub len: usize,
}
