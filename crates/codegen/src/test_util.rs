use nnport_calibrate::{CalibratedModel, QuantizedLayer};
use nnport_fixed_point::{BitWidth, Rounding};
use nnport_model::{Activation, Layer};

/// Two-layer relu -> softmax network over two inputs
pub(crate) fn sample_model(bits: BitWidth, rounding: Rounding) -> CalibratedModel {
    let hidden = Layer::from_rows(
        0,
        &[vec![0.5, 0.5], vec![-0.5, 0.5]],
        vec![0.0, 0.25],
        Activation::Relu,
    )
    .unwrap();
    let output = Layer::from_rows(
        1,
        &[vec![1.0, -1.0], vec![-1.0, 1.0]],
        vec![0.0, 0.0],
        Activation::Softmax,
    )
    .unwrap();

    let q0 = QuantizedLayer::quantize(&hidden, bits, bits.input_frac_bits(), 1).unwrap();
    let q1 = QuantizedLayer::quantize(&output, bits, q0.output_frac_bits() as u8, 2).unwrap();
    CalibratedModel::new(bits, rounding, bits.default_shift_range(), vec![q0, q1]).unwrap()
}
