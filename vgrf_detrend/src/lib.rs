//! Drift removal for running vertical ground reaction force (vGRF) signals.
//!
//! The pipeline thresholds a filtered force signal into stance phases, takes one
//! baseline sample from every aerial phase between two valid stances, rebuilds a
//! dense drift curve from those anchors and subtracts it from the signal.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

pub mod aerial;
pub mod detrend;
pub mod drift;
pub mod filter;
pub mod ingest;
pub mod segment;
pub mod trim;

pub use aerial::{
    aerial_intervals, list_aerial_strategies, sample_aerials, sample_intervals,
    shortest_interval, AerialAnchors, AerialInterval, AerialStrategy, AerialStrategyInfo,
};
pub use detrend::{detrend, validate_correction, ResidualSummary};
pub use drift::{reconstruct_drift, reconstruct_drift_stepwise, CubicSpline, DriftMethod};
pub use filter::{Butterworth, LowPassFilter, Passthrough};
pub use ingest::{parse_force_csv, ForceTrial};
pub use segment::{segment, SegmentDiagnostics, Segmentation, StanceInterval};
pub use trim::{TrimEstimator, TrimSelection};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriftError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("no stance phase rises above threshold {threshold}")]
    NoStanceDetected { threshold: f64 },
    #[error(
        "trim={trim} but shortest aerial interval={length} frames (#{index}, frames {begin}..{end}); \
         trim * 2 must stay below the interval length"
    )]
    TrimTooLarge {
        trim: usize,
        index: usize,
        begin: usize,
        end: usize,
        length: usize,
    },
    #[error("insufficient aerial anchors: found {found}, need at least {required}")]
    InsufficientAnchors { found: usize, required: usize },
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("non-finite value: {0}")]
    NonFinite(String),
    #[error("failed to parse force data: {0}")]
    Parse(String),
}

/// Low-pass settings applied once before segmentation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct FilterParams {
    pub cutoff_hz: f64,
    /// Adjust the cutoff so the forward-backward pass keeps the requested -3 dB point.
    #[serde(default)]
    pub correct_cutoff: bool,
}

impl FilterParams {
    pub fn build(&self) -> Butterworth {
        Butterworth::new(self.cutoff_hz).with_cutoff_correction(self.correct_cutoff)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetrendParams {
    /// Stance/aerial boundary in force units. Keep it high for detrending.
    pub threshold: f64,
    /// Shortest plausible contact time in seconds.
    pub min_tc: f64,
    /// Longest plausible contact time in seconds.
    pub max_tc: f64,
    pub trim: TrimSelection,
    pub strategy: AerialStrategy,
    pub drift: DriftMethod,
    pub filter: Option<FilterParams>,
    /// Threshold for the residual check on the corrected signal; `None` skips it.
    pub validation_threshold: Option<f64>,
}

impl Default for DetrendParams {
    fn default() -> Self {
        Self {
            threshold: 100.0,
            min_tc: 0.2,
            max_tc: 0.4,
            trim: TrimSelection::default(),
            strategy: AerialStrategy::default(),
            drift: DriftMethod::default(),
            filter: None,
            validation_threshold: Some(25.0),
        }
    }
}

impl DetrendParams {
    /// Reject parameter combinations before any signal is touched.
    pub fn validate(&self, fs: f64) -> Result<(), DriftError> {
        segment::check_contact_bounds(fs, self.min_tc, self.max_tc)?;
        if !self.threshold.is_finite() {
            return Err(DriftError::Configuration(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        if let Some(validation) = self.validation_threshold {
            if !validation.is_finite() {
                return Err(DriftError::Configuration(format!(
                    "validation threshold must be finite, got {}",
                    validation
                )));
            }
            if validation >= self.threshold {
                return Err(DriftError::Configuration(format!(
                    "validation threshold {} must be below the stance threshold {}",
                    validation, self.threshold
                )));
            }
        }
        self.trim.validate()?;
        if let Some(filter) = self.filter.as_ref() {
            filter.build().check(fs)?;
        }
        Ok(())
    }

    pub fn params_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn params_hash_sha256(&self) -> Result<String, DriftError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| DriftError::Configuration(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

/// Everything produced while correcting one signal.
#[derive(Clone, Debug)]
pub struct Correction {
    pub filtered: Vec<f64>,
    pub drift: Vec<f64>,
    pub corrected: Vec<f64>,
    pub segmentation: Segmentation,
    pub anchors: AerialAnchors,
    pub trim: usize,
    /// Aerial anchors measured again on the corrected signal, when the check ran.
    pub residuals: Option<AerialAnchors>,
}

impl Correction {
    pub fn residual_summary(&self) -> Option<ResidualSummary> {
        self.residuals
            .as_ref()
            .filter(|anchors| !anchors.is_empty())
            .map(|anchors| ResidualSummary::from_values(&anchors.values))
    }
}

/// Run filter, segmentation, aerial sampling, drift reconstruction and
/// subtraction on a single signal.
pub fn correct_signal<F: LowPassFilter + ?Sized>(
    signal: &[f64],
    fs: f64,
    params: &DetrendParams,
    filter: &F,
) -> Result<Correction, DriftError> {
    params.validate(fs)?;
    if signal.len() < 2 {
        return Err(DriftError::ShapeMismatch(format!(
            "signal needs at least 2 frames, got {}",
            signal.len()
        )));
    }

    let filtered = filter.filter(signal, fs)?;
    if filtered.len() != signal.len() {
        return Err(DriftError::ShapeMismatch(format!(
            "filter returned {} frames for a {}-frame signal",
            filtered.len(),
            signal.len()
        )));
    }

    let segmentation = segment(&filtered, params.threshold, fs, params.min_tc, params.max_tc)?;
    let valid = segmentation.valid_stances();
    let intervals = aerial_intervals(&segmentation.stances);
    debug!(
        stances = segmentation.stances.len(),
        valid = valid.len(),
        aerials = intervals.len(),
        "segmented signal"
    );
    if intervals.is_empty() {
        return Err(DriftError::InsufficientAnchors {
            found: 0,
            required: 1,
        });
    }

    let trim = params.trim.estimate(&filtered, &intervals)?;
    let anchors = sample_intervals(&filtered, &intervals, trim, params.strategy)?;
    let drift = params.drift.reconstruct(filtered.len(), &anchors, &valid)?;
    let corrected = detrend(&filtered, &drift)?;
    debug!(
        trim,
        anchors = anchors.len(),
        method = params.drift.id(),
        "drift removed"
    );

    let residuals = match params.validation_threshold {
        Some(threshold) => {
            match validate_correction(&corrected, fs, params, threshold, trim) {
                Ok(residuals) => Some(residuals),
                Err(err) => {
                    warn!("residual check skipped: {}", err);
                    None
                }
            }
        }
        None => None,
    };

    Ok(Correction {
        filtered,
        drift,
        corrected,
        segmentation,
        anchors,
        trim,
        residuals,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrialReport {
    pub frames: usize,
    pub columns: usize,
    pub fs: f64,
    pub stances: SegmentDiagnostics,
    pub aerial_count: usize,
    pub shortest_aerial_frames: Option<usize>,
    pub trim: usize,
    pub strategy: AerialStrategy,
    pub drift_method: DriftMethod,
    pub max_abs_drift: f64,
    pub residual: Option<ResidualSummary>,
    pub params: serde_json::Value,
    pub params_hash: String,
}

#[derive(Clone, Debug)]
pub struct TrialResult {
    /// Corrected force data, same shape as the input trial.
    pub corrected: Array2<f64>,
    /// Correction of the vertical column, which drives segmentation.
    pub vertical: Correction,
    pub report: TrialReport,
}

/// Correct every column of a trial. Stances and aerial phases come from the
/// vertical column; horizontal columns reuse them.
pub fn detrend_trial(trial: &ForceTrial, params: &DetrendParams) -> Result<TrialResult, DriftError> {
    match params.filter.as_ref() {
        Some(settings) => detrend_trial_with(trial, params, &settings.build()),
        None => detrend_trial_with(trial, params, &Passthrough),
    }
}

pub fn detrend_trial_with<F: LowPassFilter + ?Sized>(
    trial: &ForceTrial,
    params: &DetrendParams,
    filter: &F,
) -> Result<TrialResult, DriftError> {
    let fs = trial.fs();
    let vertical = correct_signal(&trial.vertical(), fs, params, filter)?;

    let mut corrected = Array2::<f64>::zeros((trial.frames(), trial.columns()));
    let vertical_idx = trial.vertical_index();
    let valid = vertical.segmentation.valid_stances();
    for col in 0..trial.columns() {
        let column = if col == vertical_idx {
            vertical.corrected.clone()
        } else {
            let filtered = filter.filter(&trial.column(col), fs)?;
            let anchors = sample_intervals(
                &filtered,
                &vertical.anchors.intervals,
                vertical.trim,
                params.strategy,
            )?;
            let drift = params.drift.reconstruct(filtered.len(), &anchors, &valid)?;
            detrend(&filtered, &drift)?
        };
        for (slot, value) in corrected.column_mut(col).iter_mut().zip(column) {
            *slot = value;
        }
    }

    let report = TrialReport {
        frames: trial.frames(),
        columns: trial.columns(),
        fs,
        stances: vertical.segmentation.diagnostics.clone(),
        aerial_count: vertical.anchors.len(),
        shortest_aerial_frames: shortest_interval(&vertical.anchors.intervals)
            .map(|(_, interval)| interval.frames()),
        trim: vertical.trim,
        strategy: params.strategy,
        drift_method: params.drift,
        max_abs_drift: vertical.drift.iter().fold(0.0_f64, |acc, d| acc.max(d.abs())),
        residual: vertical.residual_summary(),
        params: params.params_json(),
        params_hash: params.params_hash_sha256()?,
    };

    Ok(TrialResult {
        corrected,
        vertical,
        report,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
