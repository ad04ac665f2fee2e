//! Wire messages

use crate::constants::{Command, HANDSHAKE_ACK, IMAGE_LEN, NUM_CLASSES};
use crate::error::{LinkError, NoPrediction, Result};

/// Messages that can be encoded to and decoded from raw bytes
pub trait Payload: Sized {
    /// Encode the message to bytes
    fn encode(&self) -> Vec<u8>;

    /// Decode the message from bytes
    fn decode(data: &[u8]) -> Result<Self>;
}

/// Handshake command (Host → Target)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeRequest;

impl Payload for HandshakeRequest {
    fn encode(&self) -> Vec<u8> {
        vec![Command::Handshake.to_u8()]
    }

    fn decode(data: &[u8]) -> Result<Self> {
        match data.first().copied().and_then(Command::from_u8) {
            Some(Command::Handshake) => Ok(HandshakeRequest),
            _ => Err(LinkError::Handshake {
                response: data.to_vec(),
            }),
        }
    }
}

/// Handshake answer (Target → Host); only the first byte is significant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeResponse;

impl Payload for HandshakeResponse {
    fn encode(&self) -> Vec<u8> {
        vec![HANDSHAKE_ACK, b'\n']
    }

    fn decode(data: &[u8]) -> Result<Self> {
        match data.first() {
            Some(&HANDSHAKE_ACK) => Ok(HandshakeResponse),
            _ => Err(LinkError::Handshake {
                response: data.to_vec(),
            }),
        }
    }
}

/// Predict command with one image (Host → Target)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRequest {
    pixels: Vec<u8>,
}

impl PredictionRequest {
    /// 784 raw pixels, row-major
    pub fn new(pixels: &[u8]) -> Result<Self> {
        if pixels.len() != IMAGE_LEN {
            return Err(LinkError::InvalidImage {
                expected: IMAGE_LEN,
                got: pixels.len(),
            });
        }
        Ok(Self {
            pixels: pixels.to_vec(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl Payload for PredictionRequest {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + IMAGE_LEN);
        buf.push(Command::Predict.to_u8());
        buf.extend_from_slice(&self.pixels);
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        match data.split_first() {
            Some((&cmd, pixels)) if Command::from_u8(cmd) == Some(Command::Predict) => {
                Self::new(pixels)
            }
            _ => Err(LinkError::InvalidImage {
                expected: IMAGE_LEN,
                got: data.len().saturating_sub(1),
            }),
        }
    }
}

/// Predicted class (Target → Host), sent as one ASCII digit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionResponse {
    pub class: u8,
}

impl Payload for PredictionResponse {
    fn encode(&self) -> Vec<u8> {
        vec![b'0' + self.class]
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let byte = *data
            .first()
            .ok_or(LinkError::NoPrediction(NoPrediction::Timeout))?;
        match byte.checked_sub(b'0') {
            Some(class) if class < NUM_CLASSES => Ok(Self { class }),
            _ => Err(LinkError::NoPrediction(NoPrediction::Garbled(byte))),
        }
    }
}
