//! Frames excluded from both ends of each aerial phase before sampling it.

use serde::{Deserialize, Serialize};

use crate::aerial::{shortest_interval, AerialInterval};
use crate::DriftError;

/// Supplies the trim amount for a signal and its aerial intervals.
pub trait TrimEstimator {
    fn estimate(&self, signal: &[f64], intervals: &[AerialInterval]) -> Result<usize, DriftError>;
}

impl TrimEstimator for usize {
    fn estimate(&self, _signal: &[f64], _intervals: &[AerialInterval]) -> Result<usize, DriftError> {
        Ok(*self)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum TrimSelection {
    /// Fixed number of frames.
    Frames { frames: usize },
    /// Fraction of the shortest aerial interval, rounded down.
    ShortestFraction { fraction: f64 },
}

impl Default for TrimSelection {
    fn default() -> Self {
        TrimSelection::Frames { frames: 8 }
    }
}

impl TrimSelection {
    pub fn validate(&self) -> Result<(), DriftError> {
        match self {
            TrimSelection::Frames { .. } => Ok(()),
            TrimSelection::ShortestFraction { fraction } => {
                if fraction.is_finite() && (0.0..0.5).contains(fraction) {
                    Ok(())
                } else {
                    Err(DriftError::Configuration(format!(
                        "trim fraction must be in [0, 0.5), got {}",
                        fraction
                    )))
                }
            }
        }
    }
}

impl TrimEstimator for TrimSelection {
    fn estimate(&self, signal: &[f64], intervals: &[AerialInterval]) -> Result<usize, DriftError> {
        self.validate()?;
        match self {
            TrimSelection::Frames { frames } => frames.estimate(signal, intervals),
            TrimSelection::ShortestFraction { fraction } => {
                let (_, shortest) = shortest_interval(intervals).ok_or(
                    DriftError::InsufficientAnchors {
                        found: 0,
                        required: 1,
                    },
                )?;
                Ok((fraction * shortest.frames() as f64).floor() as usize)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intervals() -> Vec<AerialInterval> {
        vec![
            AerialInterval { begin: 100, end: 160 },
            AerialInterval { begin: 250, end: 290 },
            AerialInterval { begin: 380, end: 450 },
        ]
    }

    #[test]
    fn test_fixed_trim() {
        let trim = TrimSelection::Frames { frames: 12 };
        assert_eq!(trim.estimate(&[], &intervals()).unwrap(), 12);
        assert_eq!(7usize.estimate(&[], &[]).unwrap(), 7);
    }

    #[test]
    fn test_fraction_of_shortest() {
        // shortest is 40 frames
        let trim = TrimSelection::ShortestFraction { fraction: 0.25 };
        assert_eq!(trim.estimate(&[], &intervals()).unwrap(), 10);
        let trim = TrimSelection::ShortestFraction { fraction: 0.49 };
        assert_eq!(trim.estimate(&[], &intervals()).unwrap(), 19);
    }

    #[test]
    fn test_fraction_out_of_range() {
        for fraction in [0.5, -0.1, f64::NAN] {
            let trim = TrimSelection::ShortestFraction { fraction };
            assert!(matches!(
                trim.estimate(&[], &intervals()),
                Err(DriftError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_fraction_without_intervals() {
        let trim = TrimSelection::ShortestFraction { fraction: 0.2 };
        assert_eq!(
            trim.estimate(&[], &[]).unwrap_err(),
            DriftError::InsufficientAnchors {
                found: 0,
                required: 1
            }
        );
    }

    #[test]
    fn test_serde_tagging() {
        let trim: TrimSelection =
            serde_json::from_str(r#"{"mode": "shortest-fraction", "fraction": 0.1}"#).unwrap();
        assert_eq!(trim, TrimSelection::ShortestFraction { fraction: 0.1 });
        let json = serde_json::to_string(&TrimSelection::Frames { frames: 3 }).unwrap();
        assert_eq!(json, r#"{"mode":"frames","frames":3}"#);
    }
}
