//! Source-space time courses.

use crate::error::{MneError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceEstimate {
    pub vertices: Vec<usize>,
    /// `n_sources x n_times`
    pub data: DMatrix<f64>,
    pub tmin: f64,
    pub tstep: f64,
}

#[derive(Serialize, Deserialize)]
struct StcFile {
    vertices: Vec<usize>,
    data: Vec<Vec<f64>>,
    tmin: f64,
    tstep: f64,
}

impl SourceEstimate {
    pub fn new(vertices: Vec<usize>, data: DMatrix<f64>, tmin: f64, tstep: f64) -> Result<Self> {
        if data.nrows() != vertices.len() {
            return Err(MneError::ShapeMismatch(format!(
                "{} rows of data for {} vertices",
                data.nrows(),
                vertices.len()
            )));
        }
        if !(tstep > 0.0) {
            return Err(MneError::InvalidParameter(format!(
                "tstep must be positive, got {}",
                tstep
            )));
        }
        Ok(Self {
            vertices,
            data,
            tmin,
            tstep,
        })
    }

    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.n_times())
            .map(|i| self.tmin + i as f64 * self.tstep)
            .collect()
    }

    /// Vertex and time of the largest absolute value.
    pub fn peak(&self) -> Option<(usize, f64)> {
        let (idx, _) = self
            .data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))?;
        let (row, col) = (idx % self.data.nrows(), idx / self.data.nrows());
        Some((self.vertices[row], self.tmin + col as f64 * self.tstep))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = StcFile {
            vertices: self.vertices.clone(),
            data: self
                .data
                .row_iter()
                .map(|r| r.iter().copied().collect())
                .collect(),
            tmin: self.tmin,
            tstep: self.tstep,
        };
        std::fs::write(path, serde_json::to_string(&file)?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MneError::FileNotFound(path.display().to_string()));
        }
        let file: StcFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let n_times = file.data.first().map_or(0, Vec::len);
        if file.data.iter().any(|r| r.len() != n_times) {
            return Err(MneError::ParseError(format!(
                "source estimate {}: ragged data rows",
                path.display()
            )));
        }
        let data = DMatrix::from_fn(file.data.len(), n_times, |r, c| file.data[r][c]);
        Self::new(file.vertices, data, file.tmin, file.tstep)
    }
}
