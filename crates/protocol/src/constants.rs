//! Protocol constants

use std::time::Duration;

/// Line rate of the target UART
pub const BAUD_RATE: u32 = 115_200;

/// Per-read timeout used unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pixels per request (one 28×28 image)
pub const IMAGE_LEN: usize = 28 * 28;

/// First byte of a successful handshake response
pub const HANDSHAKE_ACK: u8 = b'X';

/// Bytes read back after a handshake command
pub const HANDSHAKE_RESPONSE_LEN: usize = 2;

/// Bytes read back after a predict command
pub const PREDICTION_RESPONSE_LEN: usize = 1;

/// Number of classes a prediction can name
pub const NUM_CLASSES: u8 = 10;

/// Serial device used when none is configured
#[cfg(windows)]
pub const DEFAULT_DEVICE: &str = "COM3";

/// Serial device used when none is configured
#[cfg(not(windows))]
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB2";

/// Single-byte commands understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Liveness check, answered with [`HANDSHAKE_ACK`]
    Handshake = b's',
    /// Classify the image that follows
    Predict = b'c',
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b's' => Some(Command::Handshake),
            b'c' => Some(Command::Predict),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}
