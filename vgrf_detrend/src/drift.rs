//! Dense drift curves rebuilt from sparse aerial anchors.

use serde::{Deserialize, Serialize};

use crate::aerial::AerialAnchors;
use crate::segment::StanceInterval;
use crate::DriftError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DriftMethod {
    /// Natural cubic spline through the anchors, linear beyond them.
    Continuous,
    /// One constant level per stance, from the neighbouring aerial anchors.
    Stepwise,
}

impl Default for DriftMethod {
    fn default() -> Self {
        DriftMethod::Continuous
    }
}

impl DriftMethod {
    pub fn id(&self) -> &'static str {
        match self {
            DriftMethod::Continuous => "continuous",
            DriftMethod::Stepwise => "stepwise",
        }
    }

    /// `valid_stances` must be the stances the anchors were sampled between.
    pub fn reconstruct(
        &self,
        len: usize,
        anchors: &AerialAnchors,
        valid_stances: &[StanceInterval],
    ) -> Result<Vec<f64>, DriftError> {
        match self {
            DriftMethod::Continuous => reconstruct_drift(len, &anchors.values, &anchors.locations),
            DriftMethod::Stepwise => {
                let begins: Vec<usize> = valid_stances.iter().map(|s| s.begin).collect();
                let ends: Vec<usize> = valid_stances.iter().map(|s| s.end).collect();
                reconstruct_drift_stepwise(len, &anchors.values, &begins, &ends)
            }
        }
    }
}

/// Natural cubic spline with linear extension outside the knot range.
#[derive(Clone, Debug)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivative at each knot; zero at both ends.
    m: Vec<f64>,
}

impl CubicSpline {
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self, DriftError> {
        if xs.len() != ys.len() {
            return Err(DriftError::ShapeMismatch(format!(
                "{} knot locations but {} values",
                xs.len(),
                ys.len()
            )));
        }
        if xs.is_empty() {
            return Err(DriftError::InsufficientAnchors {
                found: 0,
                required: 1,
            });
        }
        if let Some(i) = xs.iter().position(|v| !v.is_finite()) {
            return Err(DriftError::NonFinite(format!(
                "spline knot {} has location {}",
                i, xs[i]
            )));
        }
        if let Some(i) = ys.iter().position(|v| !v.is_finite()) {
            return Err(DriftError::NonFinite(format!(
                "spline knot {} has value {}",
                i, ys[i]
            )));
        }
        if let Some(i) = xs.windows(2).position(|w| w[1] <= w[0]) {
            return Err(DriftError::ShapeMismatch(format!(
                "knot locations must be strictly increasing ({} then {})",
                xs[i],
                xs[i + 1]
            )));
        }

        let n = xs.len();
        let mut m = vec![0.0; n];
        if n >= 3 {
            // Tridiagonal system for the interior second derivatives (Thomas algorithm).
            let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
            let k = n - 2;
            let mut diag = Vec::with_capacity(k);
            let mut upper = Vec::with_capacity(k);
            let mut rhs = Vec::with_capacity(k);
            for i in 1..n - 1 {
                diag.push(2.0 * (h[i - 1] + h[i]));
                upper.push(h[i]);
                rhs.push(
                    6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]),
                );
            }
            for j in 1..k {
                // sub-diagonal entry of row j is h[j]
                let w = h[j] / diag[j - 1];
                diag[j] -= w * upper[j - 1];
                rhs[j] -= w * rhs[j - 1];
            }
            m[k] = rhs[k - 1] / diag[k - 1];
            for j in (0..k - 1).rev() {
                m[j + 1] = (rhs[j] - upper[j] * m[j + 2]) / diag[j];
            }
        }

        Ok(Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        })
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if n == 1 {
            return self.ys[0];
        }
        let first = self.xs[0];
        let last = self.xs[n - 1];
        if x <= first {
            return self.ys[0] + self.start_slope() * (x - first);
        }
        if x >= last {
            return self.ys[n - 1] + self.end_slope() * (x - last);
        }
        let i = (self.xs.partition_point(|&v| v <= x) - 1).min(n - 2);
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        a * self.ys[i]
            + b * self.ys[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }

    fn start_slope(&self) -> f64 {
        let h = self.xs[1] - self.xs[0];
        (self.ys[1] - self.ys[0]) / h - h * (2.0 * self.m[0] + self.m[1]) / 6.0
    }

    fn end_slope(&self) -> f64 {
        let n = self.xs.len();
        let h = self.xs[n - 1] - self.xs[n - 2];
        (self.ys[n - 1] - self.ys[n - 2]) / h + h * (self.m[n - 2] + 2.0 * self.m[n - 1]) / 6.0
    }
}

/// Drift value at every frame `0..len`, interpolated through
/// `(locations[i], values[i])` and extended linearly past the first and last
/// anchor.
pub fn reconstruct_drift(
    len: usize,
    values: &[f64],
    locations: &[usize],
) -> Result<Vec<f64>, DriftError> {
    if values.len() != locations.len() {
        return Err(DriftError::ShapeMismatch(format!(
            "{} anchor values but {} locations",
            values.len(),
            locations.len()
        )));
    }
    if values.is_empty() {
        return Err(DriftError::InsufficientAnchors {
            found: 0,
            required: 1,
        });
    }
    if let Some(&loc) = locations.iter().find(|&&loc| loc >= len) {
        return Err(DriftError::ShapeMismatch(format!(
            "anchor at frame {} lies outside a {}-frame signal",
            loc, len
        )));
    }

    let xs: Vec<f64> = locations.iter().map(|&loc| loc as f64).collect();
    let spline = CubicSpline::fit(&xs, values)?;
    let drift: Vec<f64> = (0..len).map(|i| spline.evaluate(i as f64)).collect();
    if let Some(i) = drift.iter().position(|d| !d.is_finite()) {
        return Err(DriftError::NonFinite(format!("drift curve at frame {}", i)));
    }
    Ok(drift)
}

/// Piecewise-constant drift. Stance `i` owns frames `[begin_i, begin_{i+1})`;
/// the first stance's segment starts at frame 0 and the last runs to `len`.
/// Inner stances take the mean of the aerial anchors either side of them, the
/// two boundary stances take their single neighbouring anchor.
pub fn reconstruct_drift_stepwise(
    len: usize,
    values: &[f64],
    begins: &[usize],
    ends: &[usize],
) -> Result<Vec<f64>, DriftError> {
    if begins.len() != ends.len() {
        return Err(DriftError::ShapeMismatch(format!(
            "{} stance begins but {} ends",
            begins.len(),
            ends.len()
        )));
    }
    if values.is_empty() {
        return Err(DriftError::InsufficientAnchors {
            found: 0,
            required: 1,
        });
    }
    if values.len() + 1 != begins.len() {
        return Err(DriftError::ShapeMismatch(format!(
            "{} aerial anchors need {} stances, got {}",
            values.len(),
            values.len() + 1,
            begins.len()
        )));
    }
    if let Some(i) = begins.windows(2).position(|w| w[1] <= w[0]) {
        return Err(DriftError::ShapeMismatch(format!(
            "stance begins must increase ({} then {})",
            begins[i],
            begins[i + 1]
        )));
    }
    if let Some((&b, &e)) = begins.iter().zip(ends.iter()).find(|(b, e)| e <= b || **e >= len) {
        return Err(DriftError::ShapeMismatch(format!(
            "stance {}..{} is empty or outside a {}-frame signal",
            b, e, len
        )));
    }

    let stances = begins.len();
    let mut drift = vec![0.0; len];
    for i in 0..stances {
        let start = if i == 0 { 0 } else { begins[i] };
        let stop = if i + 1 == stances { len } else { begins[i + 1] };
        let level = if i == 0 {
            values[0]
        } else if i + 1 == stances {
            values[stances - 2]
        } else {
            (values[i - 1] + values[i]) / 2.0
        };
        for slot in &mut drift[start..stop] {
            *slot = level;
        }
    }
    Ok(drift)
}
