//! Force plate trials: headerless CSV with one vertical column, or three
//! columns ordered horizontal, horizontal, vertical.

use ndarray::Array2;
use tracing::debug;

use crate::DriftError;

#[derive(Clone, Debug, PartialEq)]
pub struct ForceTrial {
    fs: f64,
    /// frames x columns
    data: Array2<f64>,
}

impl ForceTrial {
    pub fn new(data: Array2<f64>, fs: f64) -> Result<Self, DriftError> {
        if !(fs.is_finite() && fs > 0.0) {
            return Err(DriftError::Configuration(format!(
                "sampling frequency must be positive, got {}",
                fs
            )));
        }
        let (frames, columns) = data.dim();
        if columns != 1 && columns != 3 {
            return Err(DriftError::ShapeMismatch(format!(
                "expected 1 or 3 force columns, got {}",
                columns
            )));
        }
        if frames < 2 {
            return Err(DriftError::ShapeMismatch(format!(
                "trial needs at least 2 frames, got {}",
                frames
            )));
        }
        Ok(Self { fs, data })
    }

    pub fn from_vertical(vertical: Vec<f64>, fs: f64) -> Result<Self, DriftError> {
        let frames = vertical.len();
        let data = Array2::from_shape_vec((frames, 1), vertical)
            .map_err(|e| DriftError::ShapeMismatch(e.to_string()))?;
        Self::new(data, fs)
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn frames(&self) -> usize {
        self.data.nrows()
    }

    pub fn columns(&self) -> usize {
        self.data.ncols()
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.data.column(index).to_vec()
    }

    pub fn vertical_index(&self) -> usize {
        self.columns() - 1
    }

    pub fn vertical(&self) -> Vec<f64> {
        self.column(self.vertical_index())
    }
}

/// Parse a headerless, comma separated force file.
pub fn parse_force_csv(input: &[u8], fs: f64) -> Result<ForceTrial, DriftError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut values = Vec::new();
    let mut columns: Option<usize> = None;
    let mut frames = 0usize;
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| DriftError::Parse(e.to_string()))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        match columns {
            None => columns = Some(record.len()),
            Some(expected) if expected != record.len() => {
                return Err(DriftError::ShapeMismatch(format!(
                    "row {} has {} columns, expected {}",
                    row + 1,
                    record.len(),
                    expected
                )));
            }
            Some(_) => {}
        }
        for (col, field) in record.iter().enumerate() {
            let value: f64 = field.parse().map_err(|_| {
                DriftError::Parse(format!(
                    "row {}, column {}: '{}' is not a number",
                    row + 1,
                    col + 1,
                    field
                ))
            })?;
            values.push(value);
        }
        frames += 1;
    }

    let columns = columns.unwrap_or(0);
    debug!(frames, columns, "parsed force csv");
    let data = Array2::from_shape_vec((frames, columns), values)
        .map_err(|e| DriftError::ShapeMismatch(e.to_string()))?;
    ForceTrial::new(data, fs)
}
