//! Zero-phase low-pass filtering applied before segmentation.

use std::f64::consts::{PI, SQRT_2};

use sci_rs::signal::filter::design::{
    butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos, SosFormatFilter,
};
use sci_rs::signal::filter::sosfiltfilt_dyn;
use tracing::debug;

use crate::DriftError;

/// Equal-length smoothing of a force signal sampled at `fs` Hz.
pub trait LowPassFilter {
    fn filter(&self, signal: &[f64], fs: f64) -> Result<Vec<f64>, DriftError>;
}

/// For signals that were filtered upstream.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl LowPassFilter for Passthrough {
    fn filter(&self, signal: &[f64], _fs: f64) -> Result<Vec<f64>, DriftError> {
        Ok(signal.to_vec())
    }
}

/// Second-order Butterworth run forward then backward, giving a zero-lag
/// fourth-order response.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Butterworth {
    pub cutoff_hz: f64,
    pub correct_cutoff: bool,
}

/// Odd-extension length `sosfiltfilt` uses for a single section.
const PAD: usize = 9;

impl Butterworth {
    pub fn new(cutoff_hz: f64) -> Self {
        Self {
            cutoff_hz,
            correct_cutoff: false,
        }
    }

    /// Raise the design cutoff so the -3 dB point of the dual pass lands on
    /// `cutoff_hz`.
    pub fn with_cutoff_correction(mut self, correct: bool) -> Self {
        self.correct_cutoff = correct;
        self
    }

    pub fn check(&self, fs: f64) -> Result<(), DriftError> {
        if !(fs.is_finite() && fs > 0.0) {
            return Err(DriftError::Configuration(format!(
                "sampling frequency must be positive, got {}",
                fs
            )));
        }
        if !(self.cutoff_hz.is_finite() && self.cutoff_hz > 0.0 && self.cutoff_hz < fs / 2.0) {
            return Err(DriftError::Configuration(format!(
                "cutoff {} Hz must lie between 0 and the Nyquist frequency {} Hz",
                self.cutoff_hz,
                fs / 2.0
            )));
        }
        Ok(())
    }

    /// Cutoff actually used to design the filter.
    pub fn design_cutoff(&self, fs: f64) -> f64 {
        if !self.correct_cutoff {
            return self.cutoff_hz;
        }
        // two passes of a 2nd-order section
        let c = (SQRT_2 - 1.0).powf(0.25);
        let wn = (PI * self.cutoff_hz / fs).tan() / c;
        wn.atan() * fs / PI
    }

    fn sections(&self, fs: f64) -> Result<Vec<Sos<f64>>, DriftError> {
        let design = butter_dyn(
            2,
            vec![self.design_cutoff(fs)],
            Some(FilterBandType::Lowpass),
            Some(false),
            Some(FilterOutputType::Sos),
            Some(fs),
        );
        match design {
            DigitalFilter::Sos(SosFormatFilter { sos }) => Ok(sos),
            _ => Err(DriftError::Configuration(
                "butterworth design did not return second-order sections".to_string(),
            )),
        }
    }
}

impl LowPassFilter for Butterworth {
    fn filter(&self, signal: &[f64], fs: f64) -> Result<Vec<f64>, DriftError> {
        self.check(fs)?;
        let n = signal.len();
        if n <= PAD {
            return Err(DriftError::ShapeMismatch(format!(
                "filter needs more than {} frames, got {}",
                PAD, n
            )));
        }
        if let Some(i) = signal.iter().position(|v| !v.is_finite()) {
            return Err(DriftError::NonFinite(format!("force sample at frame {}", i)));
        }

        let sos = self.sections(fs)?;
        debug!(
            cutoff_hz = self.cutoff_hz,
            design_hz = self.design_cutoff(fs),
            sections = sos.len(),
            "butterworth low-pass"
        );
        Ok(sosfiltfilt_dyn(signal.iter(), &sos))
    }
}
