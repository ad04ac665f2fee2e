//! Device link error types

use std::fmt;

use thiserror::Error;

use crate::link::SessionState;

/// Why a predict exchange produced no class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoPrediction {
    /// Nothing arrived within the read timeout
    Timeout,
    /// The response byte is not an ASCII digit
    Garbled(u8),
}

impl fmt::Display for NoPrediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoPrediction::Timeout => write!(f, "no response before timeout"),
            NoPrediction::Garbled(byte) => write!(f, "unparseable response byte 0x{:02X}", byte),
        }
    }
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Cannot open serial port {path}: {message}")]
    Open { path: String, message: String },

    #[error("Handshake failed: expected 'X', got {response:?}")]
    Handshake { response: Vec<u8> },

    #[error("No prediction from device: {0}")]
    NoPrediction(NoPrediction),

    #[error("Image has {got} pixels, expected {expected}")]
    InvalidImage { expected: usize, got: usize },

    #[error("Device link is {state}, not ready")]
    NotReady { state: SessionState },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Transport-level failure: the session cannot be used any more
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::Open { .. } | LinkError::Handshake { .. } | LinkError::NotReady { .. } | LinkError::Io(_)
        )
    }

    /// A failed exchange after which the session is still usable
    pub fn is_protocol(&self) -> bool {
        !self.is_fatal()
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
