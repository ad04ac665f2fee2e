//! Software stand-in for the inference target

use nnport_calibrate::CalibratedModel;
use nnport_protocol::{DevicePredictor, LinkError};

/// Answers predict requests by running the fixed-point network on the host,
/// with the firmware's exact integer arithmetic
#[derive(Debug, Clone)]
pub struct DeviceEmulator {
    model: CalibratedModel,
    predictions: u64,
}

impl DeviceEmulator {
    pub fn new(model: CalibratedModel) -> Self {
        Self {
            model,
            predictions: 0,
        }
    }

    pub fn model(&self) -> &CalibratedModel {
        &self.model
    }

    pub fn predictions(&self) -> u64 {
        self.predictions
    }
}

impl DevicePredictor for DeviceEmulator {
    fn predict(&mut self, pixels: &[u8]) -> nnport_protocol::Result<u8> {
        if pixels.len() != self.model.input_width() {
            return Err(LinkError::InvalidImage {
                expected: self.model.input_width(),
                got: pixels.len(),
            });
        }
        self.predictions += 1;
        Ok(self.model.predict(pixels) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnport_calibrate::QuantizedLayer;
    use nnport_fixed_point::{BitWidth, Rounding};
    use nnport_model::{Activation, Layer};

    fn identity_model() -> CalibratedModel {
        let layer = Layer::from_rows(
            0,
            &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
            vec![0.0; 3],
            Activation::Softmax,
        )
        .unwrap();
        let q = QuantizedLayer::quantize(&layer, BitWidth::Q7, 7, 1).unwrap();
        CalibratedModel::new(BitWidth::Q7, Rounding::Nearest, (0, 4), vec![q]).unwrap()
    }

    #[test]
    fn test_emulator_predicts_brightest_pixel() {
        let mut emulator = DeviceEmulator::new(identity_model());
        assert_eq!(emulator.predict(&[10, 200, 30]).unwrap(), 1);
        assert_eq!(emulator.predict(&[10, 20, 255]).unwrap(), 2);
        assert_eq!(emulator.predictions(), 2);
    }

    #[test]
    fn test_emulator_rejects_wrong_width() {
        let mut emulator = DeviceEmulator::new(identity_model());
        assert!(matches!(
            emulator.predict(&[1, 2]),
            Err(LinkError::InvalidImage { expected: 3, got: 2 })
        ));
    }
}
