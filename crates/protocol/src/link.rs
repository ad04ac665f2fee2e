//! Device session state machine

use std::fmt;
use std::io::Write;

use tracing::{debug, info, warn};

use crate::constants::{HANDSHAKE_RESPONSE_LEN, PREDICTION_RESPONSE_LEN};
use crate::error::{LinkError, Result};
use crate::messages::{HandshakeRequest, HandshakeResponse, Payload, PredictionRequest, PredictionResponse};
use crate::transport::{read_up_to, LinkConfig, SerialTransport, Transport};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport attached
    Closed,
    /// Transport open, handshake not yet completed
    Handshaking,
    /// Ready for a predict request
    Ready,
    /// A predict request is in flight
    Busy,
    /// Unusable; the transport must be reopened
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Anything that classifies raw 28×28 images the way the target does
pub trait DevicePredictor {
    /// Class predicted for `pixels`
    fn predict(&mut self, pixels: &[u8]) -> Result<u8>;
}

/// A session with one inference target.
///
/// Taking `&mut self` for every exchange keeps at most one request outstanding.
pub struct DeviceLink<T: Transport> {
    transport: Option<T>,
    state: SessionState,
    predictions: u64,
}

impl DeviceLink<SerialTransport> {
    /// Open the serial port and perform the handshake
    pub fn open(config: &LinkConfig) -> Result<Self> {
        let transport = SerialTransport::open(config)?;
        Self::connect(transport)
    }
}

impl<T: Transport> DeviceLink<T> {
    /// Attach a transport without talking to the target yet
    pub fn from_transport(transport: T) -> Self {
        Self {
            transport: Some(transport),
            state: SessionState::Handshaking,
            predictions: 0,
        }
    }

    /// Attach a transport and perform the handshake
    pub fn connect(transport: T) -> Result<Self> {
        let mut link = Self::from_transport(transport);
        link.handshake()?;
        Ok(link)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Number of successful predictions in this session
    pub fn predictions(&self) -> u64 {
        self.predictions
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    /// Send `s` and expect `X` as the first of up to two response bytes
    pub fn handshake(&mut self) -> Result<()> {
        if self.state != SessionState::Handshaking {
            return Err(LinkError::NotReady { state: self.state });
        }
        let transport = self.transport_mut()?;

        let mut response = [0u8; HANDSHAKE_RESPONSE_LEN];
        let exchange = (|| {
            transport.write_all(&HandshakeRequest.encode())?;
            transport.flush()?;
            read_up_to(transport, &mut response)
        })();
        let n = match exchange {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e.into())),
        };

        if let Err(e) = HandshakeResponse::decode(&response[..n]) {
            return Err(self.fail(e));
        }
        // Anything after the acknowledgement is noise
        if let Err(e) = transport.discard_input() {
            return Err(self.fail(e.into()));
        }

        self.state = SessionState::Ready;
        info!("Device handshake complete");
        Ok(())
    }

    /// Classify one image.
    ///
    /// A timeout or unparseable answer is reported as [`LinkError::NoPrediction`]
    /// and leaves the session ready; an I/O failure marks it failed.
    pub fn predict(&mut self, pixels: &[u8]) -> Result<u8> {
        if self.state != SessionState::Ready {
            return Err(LinkError::NotReady { state: self.state });
        }
        let request = PredictionRequest::new(pixels)?;
        self.state = SessionState::Busy;
        let transport = self.transport_mut()?;

        let mut response = [0u8; PREDICTION_RESPONSE_LEN];
        let exchange = (|| {
            transport.write_all(&request.encode())?;
            transport.flush()?;
            read_up_to(transport, &mut response)
        })();
        let n = match exchange {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e.into())),
        };

        match PredictionResponse::decode(&response[..n]) {
            Ok(PredictionResponse { class }) => {
                self.state = SessionState::Ready;
                self.predictions += 1;
                debug!(class, "Device prediction");
                Ok(class)
            }
            Err(e) => {
                warn!(error = %e, "Device returned no prediction");
                // Late bytes would be taken as the next answer
                if let Err(io) = transport.discard_input() {
                    return Err(self.fail(io.into()));
                }
                self.state = SessionState::Ready;
                Err(e)
            }
        }
    }

    /// Drop the transport
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            debug!("Device link closed");
        }
        self.state = SessionState::Closed;
    }

    fn transport_mut(&mut self) -> Result<&mut T> {
        let state = self.state;
        self.transport
            .as_mut()
            .ok_or(LinkError::NotReady { state })
    }

    fn fail(&mut self, error: LinkError) -> LinkError {
        warn!(error = %error, "Device link failed");
        self.state = SessionState::Failed;
        error
    }
}

impl<T: Transport> DevicePredictor for DeviceLink<T> {
    fn predict(&mut self, pixels: &[u8]) -> Result<u8> {
        DeviceLink::predict(self, pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::IMAGE_LEN;
    use crate::error::NoPrediction;
    use std::collections::VecDeque;
    use std::io::{self, Read};

    /// Firmware stand-in: answers each complete command with a scripted reply
    #[derive(Default)]
    struct StubDevice {
        handshake_reply: Vec<u8>,
        predict_replies: VecDeque<Vec<u8>>,
        pending_image: Option<Vec<u8>>,
        images: Vec<Vec<u8>>,
        tx: VecDeque<u8>,
    }

    impl StubDevice {
        fn new(handshake_reply: &[u8]) -> Self {
            Self {
                handshake_reply: handshake_reply.to_vec(),
                ..Default::default()
            }
        }

        fn answering(mut self, replies: &[&[u8]]) -> Self {
            self.predict_replies = replies.iter().map(|r| r.to_vec()).collect();
            self
        }
    }

    impl Read for StubDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.tx.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "stub timeout"));
            }
            let n = buf.len().min(self.tx.len());
            for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for StubDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            for &byte in buf {
                match self.pending_image.as_mut() {
                    Some(image) => {
                        image.push(byte);
                        if image.len() == IMAGE_LEN {
                            self.images.extend(self.pending_image.take());
                            let reply = self.predict_replies.pop_front().unwrap_or_default();
                            self.tx.extend(reply);
                        }
                    }
                    None if byte == b's' => self.tx.extend(self.handshake_reply.iter().copied()),
                    None if byte == b'c' => self.pending_image = Some(Vec::with_capacity(IMAGE_LEN)),
                    None => {}
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for StubDevice {
        fn discard_input(&mut self) -> io::Result<()> {
            self.tx.clear();
            Ok(())
        }
    }

    /// Transport whose every write fails
    struct Unplugged;

    impl Read for Unplugged {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }
    }

    impl Write for Unplugged {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for Unplugged {
        fn discard_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn image() -> Vec<u8> {
        (0..IMAGE_LEN).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_handshake_ack() {
        let link = DeviceLink::connect(StubDevice::new(b"X\n")).unwrap();
        assert_eq!(link.state(), SessionState::Ready);
        // the trailing byte was discarded
        assert!(link.transport().unwrap().tx.is_empty());
    }

    #[test]
    fn test_handshake_wrong_byte() {
        let mut link = DeviceLink::from_transport(StubDevice::new(b"Y\n"));
        assert!(matches!(link.handshake(), Err(LinkError::Handshake { .. })));
        assert_eq!(link.state(), SessionState::Failed);
        assert!(matches!(
            link.predict(&image()),
            Err(LinkError::NotReady { state: SessionState::Failed })
        ));
    }

    #[test]
    fn test_handshake_timeout() {
        let mut link = DeviceLink::from_transport(StubDevice::new(b""));
        let err = link.handshake().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(link.state(), SessionState::Failed);
        assert!(link.predict(&image()).is_err());
        assert!(DeviceLink::connect(StubDevice::new(b"")).is_err());
    }

    #[test]
    fn test_predict_digit() {
        let device = StubDevice::new(b"X").answering(&[b"7"]);
        let mut link = DeviceLink::connect(device).unwrap();
        let pixels = image();

        assert_eq!(link.predict(&pixels).unwrap(), 7);
        assert_eq!(link.state(), SessionState::Ready);
        assert_eq!(link.predictions(), 1);
        assert_eq!(link.transport().unwrap().images, vec![pixels]);
    }

    #[test]
    fn test_predict_silence_is_no_prediction() {
        let device = StubDevice::new(b"X").answering(&[b"", b"3"]);
        let mut link = DeviceLink::connect(device).unwrap();

        let err = link.predict(&image()).unwrap_err();
        assert!(matches!(err, LinkError::NoPrediction(NoPrediction::Timeout)));
        assert!(err.is_protocol());
        // session stays usable
        assert_eq!(link.state(), SessionState::Ready);
        assert_eq!(link.predict(&image()).unwrap(), 3);
    }

    #[test]
    fn test_predict_garbled() {
        let device = StubDevice::new(b"X").answering(&[b"?"]);
        let mut link = DeviceLink::connect(device).unwrap();
        assert!(matches!(
            link.predict(&image()),
            Err(LinkError::NoPrediction(NoPrediction::Garbled(b'?')))
        ));
        assert!(link.is_ready());
    }

    #[test]
    fn test_predict_wrong_size_keeps_session() {
        let mut link = DeviceLink::connect(StubDevice::new(b"X")).unwrap();
        assert!(matches!(
            link.predict(&[0u8; 100]),
            Err(LinkError::InvalidImage { got: 100, .. })
        ));
        assert!(link.is_ready());
    }

    #[test]
    fn test_io_failure_is_fatal() {
        let mut link = DeviceLink::from_transport(Unplugged);
        let err = link.handshake().unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
        assert_eq!(link.state(), SessionState::Failed);
    }

    #[test]
    fn test_close() {
        let mut link = DeviceLink::connect(StubDevice::new(b"X")).unwrap();
        link.close();
        assert_eq!(link.state(), SessionState::Closed);
        assert!(link.transport().is_none());
        assert!(matches!(
            link.predict(&image()),
            Err(LinkError::NotReady { state: SessionState::Closed })
        ));
    }

    #[test]
    fn test_predictor_trait() {
        let device = StubDevice::new(b"X").answering(&[b"4"]);
        let mut link = DeviceLink::connect(device).unwrap();
        let predictor: &mut dyn DevicePredictor = &mut link;
        assert_eq!(predictor.predict(&image()).unwrap(), 4);
    }
}
