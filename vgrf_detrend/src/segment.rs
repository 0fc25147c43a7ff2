//! Threshold segmentation of a filtered force signal into stance phases.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::DriftError;

/// One contiguous run above threshold.
///
/// `begin` is the last frame at or below threshold before contact and `end` is
/// the last frame above threshold, so `end - begin` counts contact frames.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StanceInterval {
    pub begin: usize,
    pub end: usize,
    pub valid: bool,
}

impl StanceInterval {
    pub fn frames(&self) -> usize {
        self.end - self.begin
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentDiagnostics {
    pub candidates: usize,
    pub valid: usize,
    pub too_short: usize,
    pub too_long: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segmentation {
    pub stances: Vec<StanceInterval>,
    pub diagnostics: SegmentDiagnostics,
    /// Contact bounds converted to frames.
    pub min_frames: f64,
    pub max_frames: f64,
}

impl Segmentation {
    pub fn begins(&self) -> Vec<usize> {
        self.stances.iter().map(|s| s.begin).collect()
    }

    pub fn ends(&self) -> Vec<usize> {
        self.stances.iter().map(|s| s.end).collect()
    }

    pub fn validity(&self) -> Vec<bool> {
        self.stances.iter().map(|s| s.valid).collect()
    }

    pub fn valid_stances(&self) -> Vec<StanceInterval> {
        self.stances.iter().copied().filter(|s| s.valid).collect()
    }
}

pub(crate) fn check_contact_bounds(fs: f64, min_tc: f64, max_tc: f64) -> Result<(), DriftError> {
    if !(fs.is_finite() && fs > 0.0) {
        return Err(DriftError::Configuration(format!(
            "sampling frequency must be positive, got {}",
            fs
        )));
    }
    if !(min_tc.is_finite() && max_tc.is_finite()) || min_tc < 0.0 {
        return Err(DriftError::Configuration(format!(
            "contact time bounds must be finite and non-negative (min_tc={}, max_tc={})",
            min_tc, max_tc
        )));
    }
    if min_tc >= max_tc {
        return Err(DriftError::Configuration(format!(
            "min_tc={} must be below max_tc={}",
            min_tc, max_tc
        )));
    }
    Ok(())
}

/// Split `signal` into stance phases at `threshold` and flag each one against
/// the contact-time window `[min_tc, max_tc]` seconds.
pub fn segment(
    signal: &[f64],
    threshold: f64,
    fs: f64,
    min_tc: f64,
    max_tc: f64,
) -> Result<Segmentation, DriftError> {
    check_contact_bounds(fs, min_tc, max_tc)?;
    if !threshold.is_finite() {
        return Err(DriftError::Configuration(format!(
            "threshold must be finite, got {}",
            threshold
        )));
    }

    let (begins, ends) = threshold_crossings(signal, threshold);
    let first_begin = match begins.first() {
        Some(&b) => b,
        None => return Err(DriftError::NoStanceDetected { threshold }),
    };
    // Trial starting mid-stance: drop ends that precede the first rise.
    let ends: Vec<usize> = ends.into_iter().filter(|&e| e > first_begin).collect();
    let paired = begins.len().min(ends.len());
    if paired == 0 {
        return Err(DriftError::NoStanceDetected { threshold });
    }

    let min_frames = min_tc * fs;
    let max_frames = max_tc * fs;
    let mut diagnostics = SegmentDiagnostics {
        candidates: paired,
        ..SegmentDiagnostics::default()
    };
    let stances: Vec<StanceInterval> = begins
        .iter()
        .zip(ends.iter())
        .map(|(&begin, &end)| {
            let frames = (end - begin) as f64;
            let valid = if frames < min_frames {
                diagnostics.too_short += 1;
                false
            } else if frames > max_frames {
                diagnostics.too_long += 1;
                false
            } else {
                diagnostics.valid += 1;
                true
            };
            StanceInterval { begin, end, valid }
        })
        .collect();

    if diagnostics.too_short > 0 {
        warn!(
            "out of {} stances, {} are shorter than {} s",
            paired, diagnostics.too_short, min_tc
        );
    }
    if diagnostics.too_long > 0 {
        warn!(
            "out of {} stances, {} are longer than {} s",
            paired, diagnostics.too_long, max_tc
        );
    }
    debug!(
        candidates = diagnostics.candidates,
        valid = diagnostics.valid,
        "stance segmentation"
    );

    Ok(Segmentation {
        stances,
        diagnostics,
        min_frames,
        max_frames,
    })
}

/// Indices of rising (`+1`) and falling (`-1`) transitions of `sample > threshold`.
fn threshold_crossings(signal: &[f64], threshold: f64) -> (Vec<usize>, Vec<usize>) {
    let mut begins = Vec::new();
    let mut ends = Vec::new();
    for (i, w) in signal.windows(2).enumerate() {
        match (w[0] > threshold, w[1] > threshold) {
            (false, true) => begins.push(i),
            (true, false) => ends.push(i),
            _ => {}
        }
    }
    (begins, ends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square_wave(lead: usize, plateaus: &[(usize, usize)], tail: usize) -> Vec<f64> {
        let mut signal = vec![0.0; lead];
        for &(high, low) in plateaus {
            signal.extend(std::iter::repeat(500.0).take(high));
            signal.extend(std::iter::repeat(0.0).take(low));
        }
        signal.extend(std::iter::repeat(0.0).take(tail));
        signal
    }

    #[test]
    fn test_crossing_indices() {
        let signal = [0.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0.0];
        let seg = segment(&signal, 5.0, 10.0, 0.1, 0.5).unwrap();
        assert_eq!(seg.begins(), vec![1]);
        assert_eq!(seg.ends(), vec![4]);
        assert_eq!(seg.stances[0].frames(), 3);
        assert_eq!(seg.validity(), vec![true]);
    }

    #[test]
    fn test_min_tc_must_be_below_max_tc() {
        let signal = square_wave(10, &[(90, 60)], 10);
        let err = segment(&signal, 250.0, 300.0, 0.4, 0.2).unwrap_err();
        assert!(matches!(err, DriftError::Configuration(_)));
        let err = segment(&signal, 250.0, 300.0, 0.3, 0.3).unwrap_err();
        assert!(matches!(err, DriftError::Configuration(_)));
    }

    #[test]
    fn test_no_crossing_is_an_error() {
        let signal = vec![1.0; 500];
        assert_eq!(
            segment(&signal, 250.0, 300.0, 0.2, 0.4).unwrap_err(),
            DriftError::NoStanceDetected { threshold: 250.0 }
        );
    }

    #[test]
    fn test_leading_partial_stance_ignored() {
        let mut signal = vec![500.0; 40];
        signal.extend(square_wave(30, &[(90, 60), (90, 60)], 0));
        let seg = segment(&signal, 250.0, 300.0, 0.2, 0.4).unwrap();
        assert_eq!(seg.stances.len(), 2);
        assert_eq!(seg.begins(), vec![69, 219]);
    }

    #[test]
    fn test_trailing_stance_without_end_excluded() {
        let mut signal = square_wave(30, &[(90, 60), (90, 60)], 0);
        signal.extend(vec![500.0; 50]);
        let seg = segment(&signal, 250.0, 300.0, 0.2, 0.4).unwrap();
        assert_eq!(seg.stances.len(), 2);
        assert!(seg.ends().iter().all(|&e| e < signal.len() - 1));
    }

    #[test]
    fn test_only_trailing_rise_is_no_stance() {
        let mut signal = vec![0.0; 100];
        signal.extend(vec![500.0; 100]);
        assert!(matches!(
            segment(&signal, 250.0, 300.0, 0.2, 0.4),
            Err(DriftError::NoStanceDetected { .. })
        ));
    }

    #[test]
    fn test_short_and_long_stances_flagged() {
        let signal = square_wave(20, &[(90, 60), (20, 60), (200, 60), (90, 60)], 10);
        let seg = segment(&signal, 250.0, 300.0, 0.2, 0.4).unwrap();
        assert_eq!(seg.validity(), vec![true, false, false, true]);
        assert_eq!(
            seg.diagnostics,
            SegmentDiagnostics {
                candidates: 4,
                valid: 2,
                too_short: 1,
                too_long: 1,
            }
        );
        assert_eq!(seg.valid_stances().len(), 2);
    }

    #[test]
    fn test_contact_bounds_are_inclusive() {
        let signal = square_wave(20, &[(60, 60), (120, 60)], 10);
        let seg = segment(&signal, 250.0, 300.0, 0.2, 0.4).unwrap();
        assert_eq!(seg.validity(), vec![true, true]);
    }

    proptest! {
        #[test]
        fn prop_square_wave_plateaus_all_found(
            lead in 1usize..50,
            plateaus in proptest::collection::vec((60usize..=120, 10usize..80), 1..8),
            tail in 1usize..40,
        ) {
            let signal = square_wave(lead, &plateaus, tail);
            let seg = segment(&signal, 250.0, 300.0, 0.2, 0.4).unwrap();
            prop_assert_eq!(seg.stances.len(), plateaus.len());
            for (stance, &(high, _)) in seg.stances.iter().zip(plateaus.iter()) {
                prop_assert_eq!(stance.frames(), high);
                prop_assert!(stance.valid);
            }
        }

        #[test]
        fn prop_stance_indices_monotonic(
            samples in proptest::collection::vec(0.0f64..1000.0, 2..400),
            threshold in 100.0f64..900.0,
        ) {
            if let Ok(seg) = segment(&samples, threshold, 100.0, 0.01, 10.0) {
                for pair in seg.stances.windows(2) {
                    prop_assert!(pair[0].begin < pair[1].begin);
                    prop_assert!(pair[0].end < pair[1].end);
                    prop_assert!(pair[0].end < pair[1].begin);
                }
                for stance in &seg.stances {
                    prop_assert!(stance.begin < stance.end);
                }
            }
        }
    }
}
