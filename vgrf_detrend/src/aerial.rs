use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::segment::StanceInterval;
use crate::DriftError;

/// Gap between two consecutive valid stances, from the end of the first
/// (`begin`) to the start of the next (`end`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AerialInterval {
    pub begin: usize,
    pub end: usize,
}

impl AerialInterval {
    pub fn frames(&self) -> usize {
        self.end - self.begin
    }

    /// Rounded midpoint frame, halves rounding up.
    pub fn midpoint(&self) -> usize {
        (self.begin + self.end + 1) / 2
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AerialStrategy {
    Midpoint,
    Mean,
    Median,
    MedianClosest,
}

impl Default for AerialStrategy {
    fn default() -> Self {
        AerialStrategy::Mean
    }
}

impl AerialStrategy {
    pub const ALL: [AerialStrategy; 4] = [
        AerialStrategy::Midpoint,
        AerialStrategy::Mean,
        AerialStrategy::Median,
        AerialStrategy::MedianClosest,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            AerialStrategy::Midpoint => "midpoint",
            AerialStrategy::Mean => "mean",
            AerialStrategy::Median => "median",
            AerialStrategy::MedianClosest => "median-closest",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AerialStrategy::Midpoint => "Mid-aerial sample",
            AerialStrategy::Mean => "Trimmed-window mean",
            AerialStrategy::Median => "Trimmed-window median",
            AerialStrategy::MedianClosest => "Sample closest to trimmed median",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AerialStrategy::Midpoint => {
                "Single sample at the rounded midpoint frame of the aerial phase."
            }
            AerialStrategy::Mean => {
                "Arithmetic mean of the trimmed window, anchored at the aerial midpoint."
            }
            AerialStrategy::Median => {
                "Median of the trimmed window, anchored at the aerial midpoint."
            }
            AerialStrategy::MedianClosest => {
                "Trimmed-window sample nearest the window median, anchored at its own frame (first frame wins ties)."
            }
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let normalized = id.trim().to_ascii_lowercase();
        AerialStrategy::ALL
            .iter()
            .copied()
            .find(|s| s.id() == normalized)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AerialStrategyInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

pub fn list_aerial_strategies() -> Vec<AerialStrategyInfo> {
    AerialStrategy::ALL
        .iter()
        .map(|s| AerialStrategyInfo {
            id: s.id().to_string(),
            name: s.name().to_string(),
            description: s.description().to_string(),
        })
        .collect()
}

/// Baseline estimates, one per aerial interval, in interval order.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AerialAnchors {
    pub values: Vec<f64>,
    pub locations: Vec<usize>,
    pub intervals: Vec<AerialInterval>,
}

impl AerialAnchors {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Aerial intervals between consecutive valid stances.
///
/// Invalid stances are bridged: the interval runs from the end of the last
/// valid stance to the begin of the next valid one, however many invalid
/// stances lie in between. Nothing is produced before the first or after the
/// last valid stance.
pub fn aerial_intervals(stances: &[StanceInterval]) -> Vec<AerialInterval> {
    let valid: Vec<&StanceInterval> = stances.iter().filter(|s| s.valid).collect();
    valid
        .windows(2)
        .map(|pair| AerialInterval {
            begin: pair[0].end,
            end: pair[1].begin,
        })
        .collect()
}

/// Index and value of the shortest interval; the first one wins ties.
pub fn shortest_interval(intervals: &[AerialInterval]) -> Option<(usize, AerialInterval)> {
    intervals
        .iter()
        .copied()
        .enumerate()
        .min_by_key(|(_, interval)| interval.frames())
}

pub(crate) fn check_trim(intervals: &[AerialInterval], trim: usize) -> Result<(), DriftError> {
    if let Some((index, interval)) = shortest_interval(intervals) {
        let length = interval.frames();
        if length <= trim.saturating_mul(2) {
            return Err(DriftError::TrimTooLarge {
                trim,
                index,
                begin: interval.begin,
                end: interval.end,
                length,
            });
        }
    }
    Ok(())
}

/// Estimate the baseline force of every aerial phase between valid stances.
pub fn sample_aerials(
    signal: &[f64],
    stances: &[StanceInterval],
    trim: usize,
    strategy: AerialStrategy,
) -> Result<AerialAnchors, DriftError> {
    let intervals = aerial_intervals(stances);
    sample_intervals(signal, &intervals, trim, strategy)
}

/// Same as [`sample_aerials`] for intervals already derived, e.g. from another
/// column of the same trial.
pub fn sample_intervals(
    signal: &[f64],
    intervals: &[AerialInterval],
    trim: usize,
    strategy: AerialStrategy,
) -> Result<AerialAnchors, DriftError> {
    check_trim(intervals, trim)?;

    let mut anchors = AerialAnchors {
        values: Vec::with_capacity(intervals.len()),
        locations: Vec::with_capacity(intervals.len()),
        intervals: intervals.to_vec(),
    };
    for interval in intervals {
        if interval.end >= signal.len() {
            return Err(DriftError::ShapeMismatch(format!(
                "aerial interval {}..{} exceeds signal of {} frames",
                interval.begin,
                interval.end,
                signal.len()
            )));
        }
        let lo = interval.begin + trim;
        let window = &signal[lo..interval.end - trim];
        let (value, location) = match strategy {
            AerialStrategy::Midpoint => {
                let mid = interval.midpoint();
                (signal[mid], mid)
            }
            AerialStrategy::Mean => (mean(window), interval.midpoint()),
            AerialStrategy::Median => (median(window), interval.midpoint()),
            AerialStrategy::MedianClosest => {
                let (offset, value) = closest_to_median(window);
                (value, lo + offset)
            }
        };
        anchors.values.push(value);
        anchors.locations.push(location);
    }
    Ok(anchors)
}

fn mean(window: &[f64]) -> f64 {
    window.iter().sum::<f64>() / window.len() as f64
}

fn median(window: &[f64]) -> f64 {
    let mut sorted = window.to_vec();
    sorted.sort_by_key(|v| OrderedFloat(*v));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn closest_to_median(window: &[f64]) -> (usize, f64) {
    let target = median(window);
    let mut best = (0, window[0]);
    let mut best_dist = (window[0] - target).abs();
    for (offset, &value) in window.iter().enumerate().skip(1) {
        let dist = (value - target).abs();
        if dist < best_dist {
            best = (offset, value);
            best_dist = dist;
        }
    }
    best
}
