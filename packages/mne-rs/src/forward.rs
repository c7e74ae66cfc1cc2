//! Forward solutions: sensor gain per source location.

use crate::error::{MneError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Forward {
    pub ch_names: Vec<String>,
    /// `n_channels x n_sources`
    pub gain: DMatrix<f64>,
    pub vertices: Vec<usize>,
    /// Source locations in head coordinates (m)
    pub source_positions: Vec<[f64; 3]>,
}

#[derive(Serialize, Deserialize)]
struct ForwardFile {
    ch_names: Vec<String>,
    gain: Vec<Vec<f64>>,
    vertices: Vec<usize>,
    #[serde(default)]
    source_positions: Vec<[f64; 3]>,
}

impl Forward {
    pub fn new(
        ch_names: Vec<String>,
        gain: DMatrix<f64>,
        vertices: Vec<usize>,
        source_positions: Vec<[f64; 3]>,
    ) -> Result<Self> {
        if gain.nrows() != ch_names.len() || gain.ncols() != vertices.len() {
            return Err(MneError::ShapeMismatch(format!(
                "Gain is {}x{} for {} channels and {} sources",
                gain.nrows(),
                gain.ncols(),
                ch_names.len(),
                vertices.len()
            )));
        }
        if !source_positions.is_empty() && source_positions.len() != vertices.len() {
            return Err(MneError::ShapeMismatch(format!(
                "{} source positions for {} sources",
                source_positions.len(),
                vertices.len()
            )));
        }
        Ok(Self {
            ch_names,
            gain,
            vertices,
            source_positions,
        })
    }

    pub fn n_sources(&self) -> usize {
        self.vertices.len()
    }

    pub fn n_channels(&self) -> usize {
        self.ch_names.len()
    }

    /// Forward restricted to `names`, keeping the forward's channel order.
    pub fn pick_channels(&self, names: &[String]) -> Result<Self> {
        let rows: Vec<usize> = self
            .ch_names
            .iter()
            .enumerate()
            .filter(|(_, n)| names.contains(n))
            .map(|(i, _)| i)
            .collect();
        if rows.is_empty() {
            return Err(MneError::ChannelNotFound(
                "no channels in common with the forward solution".to_string(),
            ));
        }
        Ok(Self {
            ch_names: rows.iter().map(|&i| self.ch_names[i].clone()).collect(),
            gain: self.gain.select_rows(rows.iter()),
            vertices: self.vertices.clone(),
            source_positions: self.source_positions.clone(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = ForwardFile {
            ch_names: self.ch_names.clone(),
            gain: self
                .gain
                .row_iter()
                .map(|r| r.iter().copied().collect())
                .collect(),
            vertices: self.vertices.clone(),
            source_positions: self.source_positions.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MneError::FileNotFound(path.display().to_string()));
        }
        let file: ForwardFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let n_src = file.vertices.len();
        if file.gain.len() != file.ch_names.len() || file.gain.iter().any(|r| r.len() != n_src) {
            return Err(MneError::ParseError(format!(
                "forward file {}: gain is not {}x{}",
                path.display(),
                file.ch_names.len(),
                n_src
            )));
        }
        let gain = DMatrix::from_fn(file.ch_names.len(), n_src, |r, c| file.gain[r][c]);
        Self::new(file.ch_names, gain, file.vertices, file.source_positions)
    }
}
