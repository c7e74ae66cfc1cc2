//! Averaged, event-locked responses.

use crate::error::{MneError, Result};
use crate::info::Info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Baseline interval in seconds; `None` bounds extend to the data edges.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Baseline {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl Baseline {
    pub fn new(start: Option<f64>, end: Option<f64>) -> Self {
        Self { start, end }
    }

    /// Everything up to stimulus onset: `(None, 0)`
    pub fn pre_stimulus() -> Self {
        Self {
            start: None,
            end: Some(0.0),
        }
    }

    /// Sample range `[start, stop)` of the interval on the `times` axis.
    pub fn indices(&self, times: &[f64]) -> Result<(usize, usize)> {
        if times.is_empty() {
            return Err(MneError::InvalidParameter(
                "Cannot apply a baseline to empty data".to_string(),
            ));
        }
        let tol = 1e-9;
        let start = match self.start {
            Some(t) => times.iter().position(|&x| x >= t - tol).unwrap_or(times.len()),
            None => 0,
        };
        let stop = match self.end {
            Some(t) => times.iter().rposition(|&x| x <= t + tol).map_or(0, |i| i + 1),
            None => times.len(),
        };
        if start >= stop {
            return Err(MneError::InvalidParameter(format!(
                "Baseline interval ({:?}, {:?}) contains no samples",
                self.start, self.end
            )));
        }
        Ok((start, stop))
    }
}

/// Subtract the per-row mean over the baseline interval, in place.
pub fn rescale(data: &mut DMatrix<f64>, times: &[f64], baseline: &Baseline) -> Result<()> {
    let (start, stop) = baseline.indices(times)?;
    let n = (stop - start) as f64;
    for mut row in data.row_iter_mut() {
        let mean = row.columns(start, stop - start).iter().sum::<f64>() / n;
        row.add_scalar_mut(-mean);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Evoked {
    pub info: Info,
    pub times: Vec<f64>,
    /// `channels x times`
    pub data: DMatrix<f64>,
    /// Number of epochs averaged
    pub nave: usize,
    pub comment: String,
}

#[derive(Serialize, Deserialize)]
struct EvokedFile {
    info: Info,
    times: Vec<f64>,
    data: Vec<Vec<f64>>,
    nave: usize,
    comment: String,
}

impl Evoked {
    pub fn new(info: Info, times: Vec<f64>, data: DMatrix<f64>, nave: usize) -> Result<Self> {
        if data.nrows() != info.n_channels() || data.ncols() != times.len() {
            return Err(MneError::ShapeMismatch(format!(
                "Evoked data is {}x{} but expected {}x{}",
                data.nrows(),
                data.ncols(),
                info.n_channels(),
                times.len()
            )));
        }
        Ok(Self {
            info,
            times,
            data,
            nave,
            comment: String::new(),
        })
    }

    pub fn ch_names(&self) -> Vec<String> {
        self.info.ch_names()
    }

    pub fn apply_baseline(&mut self, baseline: &Baseline) -> Result<()> {
        rescale(&mut self.data, &self.times, baseline)
    }

    /// Channel and time index of the largest absolute value.
    pub fn peak(&self) -> Option<(String, f64, f64)> {
        let (mut best_r, mut best_c, mut best_v) = (0, 0, f64::NEG_INFINITY);
        for c in 0..self.data.ncols() {
            for r in 0..self.data.nrows() {
                let v = self.data[(r, c)].abs();
                if v > best_v {
                    (best_r, best_c, best_v) = (r, c, v);
                }
            }
        }
        if best_v == f64::NEG_INFINITY {
            return None;
        }
        Some((
            self.info.chs[best_r].name.clone(),
            self.times[best_c],
            self.data[(best_r, best_c)],
        ))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = EvokedFile {
            info: self.info.clone(),
            times: self.times.clone(),
            data: self
                .data
                .row_iter()
                .map(|r| r.iter().copied().collect())
                .collect(),
            nave: self.nave,
            comment: self.comment.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MneError::FileNotFound(path.display().to_string()));
        }
        let mut file: EvokedFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        file.info.normalize_filter_bounds();
        let n_times = file.times.len();
        if file.data.iter().any(|r| r.len() != n_times) {
            return Err(MneError::ParseError(format!(
                "evoked file {}: ragged data rows",
                path.display()
            )));
        }
        let data = DMatrix::from_fn(file.data.len(), n_times, |r, c| file.data[r][c]);
        let mut evoked = Self::new(file.info, file.times, data, file.nave)?;
        evoked.comment = file.comment;
        Ok(evoked)
    }
}
