use serde::{Deserialize, Serialize};

use crate::aerial::{sample_aerials, AerialAnchors};
use crate::segment::segment;
use crate::{DetrendParams, DriftError};

/// Subtract a drift curve from a signal, frame by frame.
pub fn detrend(signal: &[f64], drift: &[f64]) -> Result<Vec<f64>, DriftError> {
    if signal.len() != drift.len() {
        return Err(DriftError::ShapeMismatch(format!(
            "signal has {} frames but drift has {}",
            signal.len(),
            drift.len()
        )));
    }
    Ok(signal.iter().zip(drift).map(|(s, d)| s - d).collect())
}

/// Leftover aerial baseline after correction.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ResidualSummary {
    pub count: usize,
    pub mean: f64,
    pub max_abs: f64,
}

impl ResidualSummary {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            count: values.len(),
            mean: values.iter().sum::<f64>() / values.len() as f64,
            max_abs: values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())),
        }
    }
}

/// Segment the corrected signal again at a lower `threshold` and sample its
/// aerial phases. Values near zero mean the drift is gone.
pub fn validate_correction(
    corrected: &[f64],
    fs: f64,
    params: &DetrendParams,
    threshold: f64,
    trim: usize,
) -> Result<AerialAnchors, DriftError> {
    let segmentation = segment(corrected, threshold, fs, params.min_tc, params.max_tc)?;
    sample_aerials(corrected, &segmentation.stances, trim, params.strategy)
}
