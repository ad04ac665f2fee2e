//! nnport Protocol Crate
//!
//! Host side of the half-duplex serial protocol spoken by the inference firmware:
//!
//! - handshake: host sends `s`, target answers with `X` as its first byte
//! - predict: host sends `c` and 784 raw pixel bytes, target answers with one
//!   ASCII digit
//!
//! The protocol carries no request identifiers, so [`DeviceLink`] allows at most
//! one request in flight.

mod constants;
mod error;
mod link;
mod messages;
mod transport;

pub use constants::*;
pub use error::{LinkError, NoPrediction, Result};
pub use link::{DeviceLink, DevicePredictor, SessionState};
pub use messages::{
    HandshakeRequest, HandshakeResponse, Payload, PredictionRequest, PredictionResponse,
};
pub use transport::{LinkConfig, SerialTransport, Transport};
