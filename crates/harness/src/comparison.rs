//! Host versus device comparison

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use nnport_model::{EvalSet, FloatModel};
use nnport_protocol::DevicePredictor;

use crate::error::{HarnessError, Result};

/// The host-side reference classifier
pub trait HostPredictor {
    /// Class predicted for raw pixels
    fn predict_host(&self, pixels: &[u8]) -> usize;
}

impl HostPredictor for FloatModel {
    fn predict_host(&self, pixels: &[u8]) -> usize {
        let features: Vec<f32> = pixels.iter().map(|&p| p as f32 / 255.0).collect();
        self.predict(&features)
    }
}

/// What to do when the device fails on one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first device failure and return it
    #[default]
    FailFast,
    /// Record a per-sample failure as a miss and continue; fatal link failures still stop the run
    Isolate,
}

/// Device outcome for one sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleStatus {
    Predicted { class: u8 },
    Missed { reason: String },
}

/// One compared sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonRecord {
    pub index: usize,
    pub label: u8,
    pub host: usize,
    pub device: SampleStatus,
}

impl ComparisonRecord {
    pub fn host_correct(&self) -> bool {
        self.host == self.label as usize
    }

    pub fn device_prediction(&self) -> Option<u8> {
        match self.device {
            SampleStatus::Predicted { class } => Some(class),
            SampleStatus::Missed { .. } => None,
        }
    }

    /// A missed sample never counts as correct
    pub fn device_correct(&self) -> bool {
        self.device_prediction() == Some(self.label)
    }

    /// Whether host and device disagree (a miss counts as disagreement)
    pub fn is_mismatch(&self) -> bool {
        self.device_prediction().map(usize::from) != Some(self.host)
    }
}

/// Accumulated results of a comparison run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonReport {
    /// Policy the run was made under
    pub policy: FailurePolicy,
    pub records: Vec<ComparisonRecord>,
}

impl ComparisonReport {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn host_correct(&self) -> usize {
        self.records.iter().filter(|r| r.host_correct()).count()
    }

    pub fn device_correct(&self) -> usize {
        self.records.iter().filter(|r| r.device_correct()).count()
    }

    /// Host accuracy in [0, 1]
    pub fn host_accuracy(&self) -> f64 {
        ratio(self.host_correct(), self.len())
    }

    /// Device accuracy in [0, 1]; misses count as wrong
    pub fn device_accuracy(&self) -> f64 {
        ratio(self.device_correct(), self.len())
    }

    /// Indices where host and device disagree
    pub fn mismatches(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.is_mismatch())
            .map(|r| r.index)
            .collect()
    }

    /// Indices where the device produced no prediction
    pub fn misses(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.device_prediction().is_none())
            .map(|r| r.index)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compared {} samples ({:?})", self.len(), self.policy)?;
        writeln!(f, "  host accuracy:   {:.1}%", self.host_accuracy() * 100.0)?;
        writeln!(f, "  device accuracy: {:.1}%", self.device_accuracy() * 100.0)?;
        let misses = self.misses();
        if !misses.is_empty() {
            writeln!(f, "  device misses:   {:?}", misses)?;
        }
        write!(f, "  mismatches:      {:?}", self.mismatches())
    }
}

/// Drives evaluation samples through a host predictor and a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonHarness {
    policy: FailurePolicy,
    samples: usize,
}

impl ComparisonHarness {
    /// Compare the first `samples` samples of the evaluation set
    pub fn new(samples: usize, policy: FailurePolicy) -> Self {
        Self { policy, samples }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn run<H, D>(&self, host: &H, device: &mut D, eval: &EvalSet) -> Result<ComparisonReport>
    where
        H: HostPredictor + ?Sized,
        D: DevicePredictor + ?Sized,
    {
        let n = self.samples.min(eval.len());
        if n < self.samples {
            warn!(requested = self.samples, available = eval.len(), "Fewer samples than requested");
        }
        info!(samples = n, policy = ?self.policy, "Comparing host and device predictions");

        let mut report = ComparisonReport {
            policy: self.policy,
            records: Vec::with_capacity(n),
        };
        let mut host_correct = 0usize;
        let mut device_correct = 0usize;
        for (index, sample) in eval.iter().take(n).enumerate() {
            let host_class = host.predict_host(&sample.pixels);

            let device_status = match device.predict(&sample.pixels) {
                Ok(class) => SampleStatus::Predicted { class },
                Err(e) if self.policy == FailurePolicy::Isolate && !e.is_fatal() => {
                    warn!(index, error = %e, "Device missed sample");
                    SampleStatus::Missed {
                        reason: e.to_string(),
                    }
                }
                Err(source) => return Err(HarnessError::DeviceFailed { index, source }),
            };

            let record = ComparisonRecord {
                index,
                label: sample.label,
                host: host_class,
                device: device_status,
            };
            if record.is_mismatch() {
                debug!(index, label = record.label, host = record.host, device = ?record.device, "Host and device disagree");
            }
            host_correct += usize::from(record.host_correct());
            device_correct += usize::from(record.device_correct());
            report.records.push(record);

            debug!(
                index,
                host_accuracy = ratio(host_correct, index + 1),
                device_accuracy = ratio(device_correct, index + 1),
                "Running accuracy"
            );
        }

        info!(
            host_accuracy = report.host_accuracy(),
            device_accuracy = report.device_accuracy(),
            mismatches = report.mismatches().len(),
            "Comparison complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnport_model::Sample;
    use nnport_protocol::{LinkError, NoPrediction};

    struct Fixed(Vec<usize>);

    impl HostPredictor for Fixed {
        fn predict_host(&self, pixels: &[u8]) -> usize {
            self.0[pixels[0] as usize]
        }
    }

    enum Reply {
        Class(u8),
        Silent,
        Unplugged,
    }

    struct Scripted(Vec<Reply>);

    impl DevicePredictor for Scripted {
        fn predict(&mut self, pixels: &[u8]) -> nnport_protocol::Result<u8> {
            match self.0[pixels[0] as usize] {
                Reply::Class(class) => Ok(class),
                Reply::Silent => Err(LinkError::NoPrediction(NoPrediction::Timeout)),
                Reply::Unplugged => Err(LinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "unplugged",
                ))),
            }
        }
    }

    /// Samples whose first pixel is their index
    fn eval(labels: &[u8]) -> EvalSet {
        EvalSet::new(
            labels
                .iter()
                .enumerate()
                .map(|(i, &label)| Sample::new(vec![i as u8, 0], label))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_record_helpers() {
        let record = ComparisonRecord {
            index: 0,
            label: 4,
            host: 4,
            device: SampleStatus::Missed {
                reason: "timeout".into(),
            },
        };
        assert!(record.host_correct());
        assert!(!record.device_correct());
        assert!(record.is_mismatch());
    }

    #[test]
    fn test_isolate_records_miss() {
        let host = Fixed(vec![3, 1, 4]);
        let mut device = Scripted(vec![Reply::Class(3), Reply::Silent, Reply::Class(4)]);
        let report = ComparisonHarness::new(3, FailurePolicy::Isolate)
            .run(&host, &mut device, &eval(&[3, 1, 4]))
            .unwrap();
        assert_eq!(report.len(), 3);
        assert_eq!(report.policy, FailurePolicy::Isolate);
        assert_eq!(report.misses(), vec![1]);
        assert_eq!(report.mismatches(), vec![1]);
        assert!((report.device_accuracy() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fail_fast_halts() {
        let host = Fixed(vec![3, 1, 4]);
        let mut device = Scripted(vec![Reply::Class(3), Reply::Silent, Reply::Class(4)]);
        let result = ComparisonHarness::new(3, FailurePolicy::FailFast).run(&host, &mut device, &eval(&[3, 1, 4]));
        assert!(matches!(result, Err(HarnessError::DeviceFailed { index: 1, .. })));
    }

    #[test]
    fn test_isolate_still_halts_on_fatal() {
        let host = Fixed(vec![3, 1, 4]);
        let mut device = Scripted(vec![Reply::Class(3), Reply::Unplugged, Reply::Class(4)]);
        let result = ComparisonHarness::new(3, FailurePolicy::Isolate).run(&host, &mut device, &eval(&[3, 1, 4]));
        assert!(matches!(result, Err(HarnessError::DeviceFailed { index: 1, .. })));
    }

    #[test]
    fn test_sample_count_clamped() {
        let host = Fixed(vec![0, 1]);
        let mut device = Scripted(vec![Reply::Class(0), Reply::Class(1)]);
        let report = ComparisonHarness::new(10, FailurePolicy::FailFast)
            .run(&host, &mut device, &eval(&[0, 1]))
            .unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.host_accuracy(), 1.0);
    }

    #[test]
    fn test_report_json() {
        let report = ComparisonReport {
            policy: FailurePolicy::Isolate,
            records: vec![ComparisonRecord {
                index: 0,
                label: 2,
                host: 2,
                device: SampleStatus::Predicted { class: 2 },
            }],
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"status\": \"predicted\""));
        assert!(json.contains("\"class\": 2"));
        assert!(json.contains("\"policy\": \"isolate\""));
    }
}
