//! nnport CLI
//!
//! Converts an exported float network into CMSIS-NN C artifacts and checks the
//! deployed network against the host model.
//!
//! # Usage
//!
//! ```bash
//! # Calibrate and emit q15 artifacts into ./generated
//! nnport generate --model model.json --eval eval.json
//!
//! # Compare the first 100 samples against a board on /dev/ttyACM0
//! nnport run --device /dev/ttyACM0 --samples 100
//!
//! # Same comparison against the host-side fixed-point emulator
//! nnport run --emulate --bits 7
//! ```
//!
//! Every path and the serial device default to the `NNPORT_*` environment
//! variables; flags take precedence.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nnport_calibrate::CalibrationConfig;
use nnport_fixed_point::{BitWidth, Rounding};
use nnport_harness::{
    calibrate, generate, load_eval_set, load_model, ComparisonHarness, ComparisonReport,
    DeviceEmulator, FailurePolicy, GenerateConfig, RunConfig,
};
use nnport_protocol::DeviceLink;

#[derive(Parser)]
#[command(name = "nnport")]
#[command(version)]
#[command(about = "Port a dense float network to CMSIS-NN fixed point")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate the model and write the C artifacts
    Generate {
        /// Exported model (JSON) [env: NNPORT_MODEL]
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Evaluation set (JSON) [env: NNPORT_EVAL_SET]
        #[arg(short, long)]
        eval: Option<PathBuf>,

        /// Output directory [env: NNPORT_OUTPUT_DIR]
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Word width: 7 for q7, 15 for q15 [env: NNPORT_BITS]
        #[arg(short, long, value_parser = parse_bits)]
        bits: Option<BitWidth>,

        /// First output integer-bit count to try
        #[arg(long)]
        start_bit: Option<u8>,

        /// Last output integer-bit count to try
        #[arg(long)]
        stop_bit: Option<u8>,

        /// Truncate instead of rounding before each output shift
        #[arg(long, default_value = "false")]
        truncate: bool,

        /// Stop the forward pass at the arg-max, without the runtime softmax
        #[arg(long, default_value = "false")]
        no_softmax: bool,
    },

    /// Compare device predictions with the host model
    Run {
        /// Exported model (JSON) [env: NNPORT_MODEL]
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Evaluation set (JSON) [env: NNPORT_EVAL_SET]
        #[arg(short, long)]
        eval: Option<PathBuf>,

        /// Serial device [env: NNPORT_SERIAL_DEVICE]
        #[arg(short, long)]
        device: Option<String>,

        /// Number of samples to compare [env: NNPORT_SAMPLES]
        #[arg(short = 'n', long)]
        samples: Option<usize>,

        /// Per-read timeout in seconds [env: NNPORT_TIMEOUT_SECS]
        #[arg(long)]
        timeout: Option<u64>,

        /// Record failed samples as misses instead of stopping
        #[arg(long, default_value = "false")]
        isolate: bool,

        /// Use the host-side fixed-point emulator instead of a serial device
        #[arg(long, default_value = "false")]
        emulate: bool,

        /// Word width of the emulated network [env: NNPORT_BITS]
        #[arg(short, long, value_parser = parse_bits)]
        bits: Option<BitWidth>,

        /// Write the per-sample report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

fn parse_bits(value: &str) -> std::result::Result<BitWidth, String> {
    let selector: u8 = value.parse().map_err(|_| format!("not a number: {}", value))?;
    BitWidth::from_frac_selector(selector).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nnport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            model,
            eval,
            out,
            bits,
            start_bit,
            stop_bit,
            truncate,
            no_softmax,
        } => {
            let mut config = GenerateConfig::from_env();
            if let Some(path) = model {
                config.model_path = path;
            }
            if let Some(path) = eval {
                config.eval_path = path;
            }
            if let Some(dir) = out {
                config.output_dir = dir;
            }
            if let Some(bits) = bits {
                config.bits = bits;
            }
            config.start_bit = start_bit.or(config.start_bit);
            config.stop_bit = stop_bit.or(config.stop_bit);
            if truncate {
                config.rounding = Rounding::Truncate;
            }
            config.emit_softmax = !no_softmax;
            tracing::debug!(?config, "Generate configuration");

            run_generate(&config)?;
        }
        Commands::Run {
            model,
            eval,
            device,
            samples,
            timeout,
            isolate,
            emulate,
            bits,
            report,
        } => {
            let mut config = RunConfig::from_env();
            if let Some(path) = model {
                config.model_path = path;
            }
            if let Some(path) = eval {
                config.eval_path = path;
            }
            if let Some(device) = device {
                config.link.path = device;
            }
            if let Some(n) = samples {
                config.samples = n;
            }
            if let Some(secs) = timeout {
                config.link.timeout = Duration::from_secs(secs);
            }
            if isolate {
                config.policy = FailurePolicy::Isolate;
            }
            tracing::debug!(?config, emulate, "Run configuration");
            // Emulation reuses the generate defaults for the calibration width
            let emulate_bits = emulate.then(|| bits.unwrap_or(GenerateConfig::from_env().bits));

            let result = run_compare(&config, emulate_bits)?;
            println!("{}", result);
            if let Some(path) = report {
                fs::write(&path, result.to_json()?)
                    .with_context(|| format!("writing report to {}", path.display()))?;
                println!("Report written to {}", path.display());
            }
        }
    }

    Ok(())
}

fn run_generate(config: &GenerateConfig) -> Result<()> {
    println!("Generating {} artifacts from {}", config.bits, config.model_path.display());

    let outcome = generate(config)?;

    println!();
    println!("Layer  Int bits  Bias shift  Out shift  Accuracy");
    for record in &outcome.calibration.layers {
        println!(
            "{:>5}  {:>8}  {:>10}  {:>9}  {:>7.2}%",
            record.layer.index,
            record.selected.output_int_bits,
            record.layer.bias_shift,
            record.layer.out_shift,
            record.accuracy() * 100.0
        );
    }
    println!();
    println!("  Float accuracy:  {:.2}%", outcome.calibration.float_accuracy * 100.0);
    println!("  Fixed accuracy:  {:.2}%", outcome.calibration.accuracy * 100.0);
    println!("  Model CRC32:     0x{:08X}", outcome.artifacts.fingerprint());
    println!();
    for path in &outcome.files {
        println!("{} {}", style("[OK]").green().bold(), path.display());
    }

    Ok(())
}

fn run_compare(config: &RunConfig, emulate_bits: Option<BitWidth>) -> Result<ComparisonReport> {
    let model = load_model(&config.model_path)?;
    let eval = load_eval_set(&config.eval_path)?;
    let harness = ComparisonHarness::new(config.samples, config.policy);

    let report = match emulate_bits {
        Some(bits) => {
            println!("Comparing against the {} emulator", bits);
            let calibration = calibrate(&model, &eval, CalibrationConfig::new(bits))?;
            let mut emulator = DeviceEmulator::new(calibration.model);
            harness.run(&model, &mut emulator, &eval)?
        }
        None => {
            println!("Connecting to {}", config.link.path);
            let mut link = match DeviceLink::open(&config.link) {
                Ok(link) => link,
                Err(e) => {
                    println!("{} {}", style("[ERROR]").red().bold(), e);
                    return Err(e.into());
                }
            };
            println!("{} Device ready", style("[OK]").green().bold());
            let report = harness.run(&model, &mut link, &eval);
            link.close();
            report?
        }
    };

    if report.mismatches().is_empty() {
        println!("{} Host and device agree", style("[OK]").green().bold());
    } else {
        println!(
            "{} {} of {} samples disagree",
            style("[WARN]").yellow().bold(),
            report.mismatches().len(),
            report.len()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bits() {
        assert_eq!(parse_bits("7"), Ok(BitWidth::Q7));
        assert_eq!(parse_bits("15"), Ok(BitWidth::Q15));
        assert!(parse_bits("8").is_err());
        assert!(parse_bits("q7").is_err());
    }

    #[test]
    fn test_generate_flags() {
        let cli = Cli::try_parse_from([
            "nnport", "generate", "--bits", "7", "--stop-bit", "3", "--truncate", "--no-softmax",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate {
                bits,
                stop_bit,
                truncate,
                no_softmax,
                ..
            } => {
                assert_eq!(bits, Some(BitWidth::Q7));
                assert_eq!(stop_bit, Some(3));
                assert!(truncate);
                assert!(no_softmax);
            }
            Commands::Run { .. } => panic!("expected generate"),
        }
    }
}
