//! C source rendering
//!
//! Every function here is a pure function of the model: no timestamps, no
//! paths, no map iteration order.

use std::fmt::Write;

use nnport_calibrate::CalibratedModel;
use nnport_fixed_point::{BitWidth, QuantizedTensor, Rounding};
use nnport_model::Activation;

use crate::error::Result;

const VALUES_PER_LINE: usize = 16;

fn banner(out: &mut String, model: &CalibratedModel) -> Result<()> {
    writeln!(
        out,
        "/* Generated by nnport for {} ({} layers). Do not edit. */",
        model.bits(),
        model.num_layers()
    )?;
    Ok(())
}

fn guard_open(out: &mut String, guard: &str) -> Result<()> {
    writeln!(out, "#ifndef {}", guard)?;
    writeln!(out, "#define {}", guard)?;
    writeln!(out)?;
    Ok(())
}

fn guard_close(out: &mut String, guard: &str) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "#endif /* {} */", guard)?;
    Ok(())
}

pub(crate) fn bit_size_h(model: &CalibratedModel, fingerprint: u32) -> Result<String> {
    let bits = model.bits();
    let mut out = String::new();
    banner(&mut out, model)?;
    guard_open(&mut out, "NN_BIT_SIZE_H")?;

    writeln!(out, "#include \"arm_math_types.h\"")?;
    writeln!(out)?;
    writeln!(out, "#define NN_BIT_SIZE {}", bits.frac_selector())?;
    writeln!(out, "#define NN_WORD_BITS {}", bits.total_bits())?;
    writeln!(out, "typedef {} nn_word_t;", bits.c_type())?;
    writeln!(out, "#define NN_WORD_MIN ({})", bits.min_value())?;
    writeln!(out, "#define NN_WORD_MAX ({})", bits.max_value())?;
    writeln!(out)?;

    match model.rounding() {
        Rounding::Nearest => {
            writeln!(out, "#define NN_ROUND_TO_NEAREST 1")?;
            writeln!(out, "#ifdef ARM_NN_TRUNCATE")?;
            writeln!(
                out,
                "#error \"calibrated with round-to-nearest: build CMSIS-NN without ARM_NN_TRUNCATE\""
            )?;
        }
        Rounding::Truncate => {
            writeln!(out, "#define NN_ROUND_TO_NEAREST 0")?;
            writeln!(out, "#ifndef ARM_NN_TRUNCATE")?;
            writeln!(
                out,
                "#error \"calibrated with truncation: build CMSIS-NN with ARM_NN_TRUNCATE\""
            )?;
        }
    }
    writeln!(out, "#endif")?;
    writeln!(out)?;
    writeln!(out, "#define NN_MODEL_CRC32 0x{:08X}U", fingerprint)?;

    guard_close(&mut out, "NN_BIT_SIZE_H")?;
    Ok(out)
}

pub(crate) fn dimensions_h(model: &CalibratedModel) -> Result<String> {
    let mut out = String::new();
    banner(&mut out, model)?;
    guard_open(&mut out, "NN_DIMENSIONS_H")?;

    writeln!(out, "#define NN_NUM_LAYERS {}", model.num_layers())?;
    writeln!(out, "#define NN_INPUT_SIZE {}", model.input_width())?;
    writeln!(out, "#define NN_OUTPUT_SIZE {}", model.output_width())?;
    writeln!(out, "#define NN_MAX_WIDTH {}", model.max_width())?;

    for (i, layer) in model.layers().iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "#define NN_LAYER{}_IN {}", i, layer.in_features)?;
        writeln!(out, "#define NN_LAYER{}_OUT {}", i, layer.out_features)?;
    }

    guard_close(&mut out, "NN_DIMENSIONS_H")?;
    Ok(out)
}

pub(crate) fn params_h(model: &CalibratedModel) -> Result<String> {
    let mut out = String::new();
    banner(&mut out, model)?;
    guard_open(&mut out, "NN_PARAMS_H")?;

    writeln!(out, "#define NN_INPUT_FRAC_BITS {}", model.input_frac_bits())?;
    writeln!(out, "#define NN_OUTPUT_FRAC_BITS {}", model.output_frac_bits())?;
    let (start, stop) = model.shift_range();
    writeln!(out, "#define NN_SHIFT_SEARCH_START {}", start)?;
    writeln!(out, "#define NN_SHIFT_SEARCH_STOP {}", stop)?;

    for (i, layer) in model.layers().iter().enumerate() {
        writeln!(out)?;
        writeln!(out, "/* layer {}: {:?} */", i, layer.activation)?;
        writeln!(out, "#define NN_LAYER{}_INPUT_FRAC_BITS {}", i, layer.input_frac_bits)?;
        writeln!(out, "#define NN_LAYER{}_WEIGHT_FRAC_BITS {}", i, layer.weight_frac_bits())?;
        writeln!(out, "#define NN_LAYER{}_BIAS_FRAC_BITS {}", i, layer.bias_frac_bits())?;
        writeln!(out, "#define NN_LAYER{}_BIAS_SHIFT {}", i, layer.bias_shift)?;
        writeln!(out, "#define NN_LAYER{}_OUT_SHIFT {}", i, layer.out_shift)?;
        writeln!(out, "#define NN_LAYER{}_OUTPUT_FRAC_BITS {}", i, layer.output_frac_bits())?;
    }

    guard_close(&mut out, "NN_PARAMS_H")?;
    Ok(out)
}

fn array(out: &mut String, name: &str, size: &str, t: &QuantizedTensor) -> Result<()> {
    writeln!(out, "static const nn_word_t {}[{}] = {{", name, size)?;
    for chunk in t.data.chunks(VALUES_PER_LINE) {
        let line: Vec<String> = chunk.iter().map(i32::to_string).collect();
        writeln!(out, "    {},", line.join(", "))?;
    }
    writeln!(out, "}};")?;
    Ok(())
}

pub(crate) fn weights_h(model: &CalibratedModel) -> Result<String> {
    let mut out = String::new();
    banner(&mut out, model)?;
    guard_open(&mut out, "NN_WEIGHTS_H")?;

    writeln!(out, "#include \"nn_bit_size.h\"")?;
    writeln!(out, "#include \"nn_dimensions.h\"")?;

    for (i, layer) in model.layers().iter().enumerate() {
        writeln!(out)?;
        writeln!(
            out,
            "/* layer {}: weights Q.{}, bias Q.{} */",
            i,
            layer.weight_frac_bits(),
            layer.bias_frac_bits()
        )?;
        array(
            &mut out,
            &format!("nn_layer{}_weights", i),
            &format!("NN_LAYER{i}_OUT * NN_LAYER{i}_IN"),
            &layer.weights,
        )?;
        array(
            &mut out,
            &format!("nn_layer{}_bias", i),
            &format!("NN_LAYER{}_OUT", i),
            &layer.bias,
        )?;
    }

    guard_close(&mut out, "NN_WEIGHTS_H")?;
    Ok(out)
}

pub(crate) fn net_h(model: &CalibratedModel) -> Result<String> {
    let mut out = String::new();
    banner(&mut out, model)?;
    guard_open(&mut out, "NN_NET_H")?;

    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;
    writeln!(out, "#include \"nn_bit_size.h\"")?;
    writeln!(out, "#include \"nn_dimensions.h\"")?;
    writeln!(out)?;
    writeln!(
        out,
        "/* Run the network on NN_INPUT_SIZE raw pixels. Writes NN_OUTPUT_SIZE words to out"
    )?;
    writeln!(out, " * and returns the index of the largest pre-softmax output. */")?;
    writeln!(out, "int nn_run(const uint8_t *pixels, nn_word_t *out);")?;

    guard_close(&mut out, "NN_NET_H")?;
    Ok(out)
}

fn pixel_expr(bits: BitWidth) -> &'static str {
    match bits {
        BitWidth::Q7 => "(nn_word_t)(pixels[i] >> 1)",
        BitWidth::Q15 => "(nn_word_t)pixels[i]",
    }
}

pub(crate) fn net_c(model: &CalibratedModel, emit_softmax: bool) -> Result<String> {
    let bits = model.bits();
    let suffix = bits.cmsis_suffix();
    let mut out = String::new();
    banner(&mut out, model)?;

    writeln!(out, "#include \"arm_nnfunctions.h\"")?;
    writeln!(out)?;
    writeln!(out, "#include \"nn_net.h\"")?;
    writeln!(out, "#include \"nn_params.h\"")?;
    writeln!(out, "#include \"nn_weights.h\"")?;
    writeln!(out)?;
    writeln!(out, "static nn_word_t nn_buffer_a[NN_MAX_WIDTH];")?;
    writeln!(out, "static nn_word_t nn_buffer_b[NN_MAX_WIDTH];")?;
    writeln!(out, "static q15_t nn_vec_buffer[NN_MAX_WIDTH];")?;
    writeln!(out)?;
    writeln!(out, "int nn_run(const uint8_t *pixels, nn_word_t *out)")?;
    writeln!(out, "{{")?;
    writeln!(out, "    int i;")?;
    writeln!(out, "    int best = 0;")?;
    writeln!(out)?;
    writeln!(out, "    for (i = 0; i < NN_INPUT_SIZE; i++) {{")?;
    writeln!(out, "        nn_buffer_a[i] = {};", pixel_expr(bits))?;
    writeln!(out, "    }}")?;

    let buffers = ["nn_buffer_a", "nn_buffer_b"];
    let mut current = 0;
    let mut softmax = false;
    for (i, layer) in model.layers().iter().enumerate() {
        let (src, dst) = (buffers[current], buffers[1 - current]);
        writeln!(out)?;
        writeln!(
            out,
            "    arm_fully_connected_{}({}, nn_layer{i}_weights, NN_LAYER{i}_IN, NN_LAYER{i}_OUT,",
            suffix,
            src,
            i = i
        )?;
        writeln!(
            out,
            "        NN_LAYER{i}_BIAS_SHIFT, NN_LAYER{i}_OUT_SHIFT, nn_layer{i}_bias, {}, nn_vec_buffer);",
            dst,
            i = i
        )?;
        match layer.activation {
            Activation::Relu => {
                writeln!(out, "    arm_relu_{}({}, NN_LAYER{}_OUT);", suffix, dst, i)?;
            }
            Activation::Softmax => softmax = emit_softmax,
            Activation::Identity => {}
        }
        current = 1 - current;
    }

    let result = buffers[current];
    writeln!(out)?;
    writeln!(out, "    for (i = 1; i < NN_OUTPUT_SIZE; i++) {{")?;
    writeln!(out, "        if ({r}[i] > {r}[best]) {{", r = result)?;
    writeln!(out, "            best = i;")?;
    writeln!(out, "        }}")?;
    writeln!(out, "    }}")?;
    writeln!(out)?;
    if softmax {
        writeln!(out, "    arm_softmax_{}({}, NN_OUTPUT_SIZE, out);", suffix, result)?;
    } else {
        writeln!(out, "    for (i = 0; i < NN_OUTPUT_SIZE; i++) {{")?;
        writeln!(out, "        out[i] = {}[i];", result)?;
        writeln!(out, "    }}")?;
    }
    writeln!(out)?;
    writeln!(out, "    return best;")?;
    writeln!(out, "}}")?;
    Ok(out)
}
