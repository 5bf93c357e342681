use serde::{Deserialize, Serialize};

/// Metrics captured at the end of one training epoch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_accuracy: f64,
}

/// Accuracy pair reported alongside a trial's objective.
///
/// Both values are fractions in [0, 1]. The validation figure drives the
/// objective; the test figure is recorded for later analysis only.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrialMetrics {
    pub acc_val: f64,
    pub acc_test: f64,
}
