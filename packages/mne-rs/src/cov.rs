//! Noise and data covariance estimation.

use crate::epochs::Epochs;
use crate::error::{MneError, Result};
use crate::info::{pick_types, ChannelKind, Info, PickSpec};
use crate::io::Raw;
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Covariance estimator
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CovMethod {
    #[default]
    Empirical,
    /// Fixed shrinkage towards the scaled identity
    Shrunk(f64),
    LedoitWolf,
    Oas,
}

impl CovMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empirical => "empirical",
            Self::Shrunk(_) => "shrunk",
            Self::LedoitWolf => "ledoit_wolf",
            Self::Oas => "oas",
        }
    }

    /// Parse `empirical`, `ledoit_wolf`, `oas`, `shrunk` or `shrunk:0.2`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim().to_lowercase();
        match value.split_once(':') {
            Some(("shrunk", alpha)) => {
                let alpha: f64 = alpha.parse().map_err(|_| {
                    MneError::InvalidParameter(format!("Invalid shrinkage '{}'", alpha))
                })?;
                Ok(Self::Shrunk(alpha))
            }
            None => match value.as_str() {
                "empirical" => Ok(Self::Empirical),
                "shrunk" => Ok(Self::Shrunk(0.1)),
                "ledoit_wolf" | "ledoit-wolf" => Ok(Self::LedoitWolf),
                "oas" => Ok(Self::Oas),
                _ => Err(MneError::InvalidParameter(format!(
                    "Unknown covariance method '{}'",
                    value
                ))),
            },
            _ => Err(MneError::InvalidParameter(format!(
                "Unknown covariance method '{}'",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Covariance {
    pub names: Vec<String>,
    pub data: DMatrix<f64>,
    /// Degrees of freedom of the estimate
    pub nfree: usize,
    pub method: CovMethod,
}

#[derive(Serialize, Deserialize)]
struct CovFile {
    names: Vec<String>,
    data: Vec<Vec<f64>>,
    nfree: usize,
    method: String,
    #[serde(default)]
    shrinkage: Option<f64>,
}

/// Remove the per-row mean, in place.
fn center_rows(x: &mut DMatrix<f64>) {
    let n = x.ncols() as f64;
    for mut row in x.row_iter_mut() {
        let mean = row.sum() / n;
        row.add_scalar_mut(-mean);
    }
}

fn shrink(emp: &DMatrix<f64>, shrinkage: f64) -> DMatrix<f64> {
    let p = emp.nrows();
    let mu = emp.trace() / p as f64;
    let mut out = emp * (1.0 - shrinkage);
    for i in 0..p {
        out[(i, i)] += shrinkage * mu;
    }
    out
}

/// Ledoit-Wolf shrinkage for centered `x` (`features x samples`).
fn ledoit_wolf_shrinkage(x: &DMatrix<f64>) -> f64 {
    let (p, n) = (x.nrows() as f64, x.ncols() as f64);
    let x2 = x.component_mul(x);
    let emp_cov_trace: Vec<f64> = x2.row_iter().map(|r| r.sum() / n).collect();
    let mu = emp_cov_trace.iter().sum::<f64>() / p;

    let beta_ = (&x2 * x2.transpose()).sum();
    let delta_ = (x * x.transpose()).map(|v| v * v).sum() / (n * n);

    let beta = (beta_ / n - delta_) / (p * n);
    let delta = (delta_ - 2.0 * mu * emp_cov_trace.iter().sum::<f64>() + p * mu * mu) / p;
    let beta = beta.min(delta);
    if beta == 0.0 {
        0.0
    } else {
        beta / delta
    }
}

/// Oracle approximating shrinkage for an empirical covariance from `n` samples.
fn oas_shrinkage(emp: &DMatrix<f64>, n: usize) -> f64 {
    let p = emp.nrows() as f64;
    let alpha = emp.map(|v| v * v).mean();
    let mu = emp.trace() / p;
    let mu_squared = mu * mu;
    let num = alpha + mu_squared;
    let den = (n as f64 + 1.0) * (alpha - mu_squared / p);
    if den == 0.0 {
        1.0
    } else {
        (num / den).min(1.0)
    }
}

/// Estimate a covariance from `features x samples` data.
pub(crate) fn estimate(mut x: DMatrix<f64>, method: CovMethod) -> Result<DMatrix<f64>> {
    let n = x.ncols();
    if n < 2 {
        return Err(MneError::InvalidParameter(format!(
            "At least 2 samples are needed for a covariance, got {}",
            n
        )));
    }
    center_rows(&mut x);
    let emp = (&x * x.transpose()) / n as f64;

    let cov = match method {
        CovMethod::Empirical => emp,
        CovMethod::Shrunk(alpha) => {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(MneError::InvalidParameter(format!(
                    "Shrinkage must be in [0, 1], got {}",
                    alpha
                )));
            }
            shrink(&emp, alpha)
        }
        CovMethod::LedoitWolf => {
            let s = ledoit_wolf_shrinkage(&x);
            log::debug!("Ledoit-Wolf shrinkage: {:.4}", s);
            shrink(&emp, s)
        }
        CovMethod::Oas => {
            let s = oas_shrinkage(&emp, n);
            log::debug!("OAS shrinkage: {:.4}", s);
            shrink(&emp, s)
        }
    };
    Ok(cov)
}

impl Covariance {
    pub fn new(names: Vec<String>, data: DMatrix<f64>, nfree: usize) -> Result<Self> {
        if data.nrows() != names.len() || data.ncols() != names.len() {
            return Err(MneError::ShapeMismatch(format!(
                "Covariance is {}x{} for {} channels",
                data.nrows(),
                data.ncols(),
                names.len()
            )));
        }
        Ok(Self {
            names,
            data,
            nfree,
            method: CovMethod::Empirical,
        })
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }

    /// Sub-covariance for `names`, in that order.
    pub fn pick_channels(&self, names: &[String]) -> Result<Self> {
        let idx = names
            .iter()
            .map(|n| {
                self.names
                    .iter()
                    .position(|c| c == n)
                    .ok_or_else(|| MneError::ChannelNotFound(n.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let data = DMatrix::from_fn(idx.len(), idx.len(), |r, c| self.data[(idx[r], idx[c])]);
        Ok(Self {
            names: names.to_vec(),
            data,
            nfree: self.nfree,
            method: self.method,
        })
    }

    /// Add `reg * mean(diag)` to the diagonal of each channel type block.
    pub fn regularize(&mut self, info: &Info, mag: f64, grad: f64, eeg: f64) -> Result<()> {
        for (kind, reg) in [
            (ChannelKind::Mag, mag),
            (ChannelKind::Grad, grad),
            (ChannelKind::Eeg, eeg),
        ] {
            if reg <= 0.0 {
                continue;
            }
            let idx: Vec<usize> = self
                .names
                .iter()
                .enumerate()
                .filter(|(_, n)| {
                    info.channel_index(n)
                        .is_some_and(|i| info.chs[i].kind == kind)
                })
                .map(|(i, _)| i)
                .collect();
            if idx.is_empty() {
                continue;
            }
            let mean_diag = idx.iter().map(|&i| self.data[(i, i)]).sum::<f64>() / idx.len() as f64;
            log::info!(
                "Regularizing {} {} channels by {}",
                idx.len(),
                kind.as_str(),
                reg
            );
            for &i in &idx {
                self.data[(i, i)] += reg * mean_diag;
            }
        }
        Ok(())
    }

    /// Whitening operator `rank x n_channels` and the numerical rank.
    ///
    /// Eigenvalues at or below `rank_tol * max` are treated as zero.
    pub fn whitener(&self, rank_tol: f64) -> Result<(DMatrix<f64>, usize)> {
        let n = self.dim();
        if n == 0 {
            return Err(MneError::InvalidParameter(
                "Cannot whiten with an empty covariance".to_string(),
            ));
        }
        let eig = SymmetricEigen::new(self.data.clone());
        let max = eig.eigenvalues.max();
        if !(max > 0.0) {
            return Err(MneError::Numerical(
                "Covariance has no positive eigenvalues".to_string(),
            ));
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let kept: Vec<usize> = order
            .into_iter()
            .filter(|&i| eig.eigenvalues[i] > rank_tol * max)
            .collect();
        let rank = kept.len();
        if rank < n {
            log::info!("Covariance rank {} of {} channels", rank, n);
        }

        let w = DMatrix::from_fn(rank, n, |r, c| {
            let i = kept[r];
            eig.eigenvectors[(c, i)] / eig.eigenvalues[i].sqrt()
        });
        Ok((w, rank))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = CovFile {
            names: self.names.clone(),
            data: self
                .data
                .row_iter()
                .map(|r| r.iter().copied().collect())
                .collect(),
            nfree: self.nfree,
            method: self.method.as_str().to_string(),
            shrinkage: match self.method {
                CovMethod::Shrunk(a) => Some(a),
                _ => None,
            },
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MneError::FileNotFound(path.display().to_string()));
        }
        let file: CovFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let n = file.names.len();
        if file.data.len() != n || file.data.iter().any(|r| r.len() != n) {
            return Err(MneError::ParseError(format!(
                "covariance file {}: data is not {}x{}",
                path.display(),
                n,
                n
            )));
        }
        let data = DMatrix::from_fn(n, n, |r, c| file.data[r][c]);
        let mut cov = Self::new(file.names, data, file.nfree)?;
        cov.method = match (file.method.as_str(), file.shrinkage) {
            ("shrunk", Some(a)) => CovMethod::Shrunk(a),
            (other, _) => CovMethod::parse(other)?,
        };
        Ok(cov)
    }
}

/// Covariance of a continuous segment. Defaults to the good data channels.
pub fn compute_raw_covariance(
    raw: &Raw,
    picks: Option<&[usize]>,
    tmin: f64,
    tmax: Option<f64>,
    method: CovMethod,
) -> Result<Covariance> {
    let default_picks;
    let picks = match picks {
        Some(p) => p,
        None => {
            default_picks = pick_types(raw.info(), &PickSpec::data());
            &default_picks
        }
    };
    if picks.is_empty() {
        return Err(MneError::InvalidParameter(
            "No channels selected for the covariance".to_string(),
        ));
    }
    let start = raw.time_as_index(tmin)?;
    let stop = match tmax {
        Some(t) => raw.time_as_index(t)? + 1,
        None => raw.n_times(),
    }
    .min(raw.n_times());

    let data = raw.get_data(Some(picks), start, stop)?;
    let n = data.ncols();
    log::info!(
        "Computing {} covariance from {} samples of {} channels",
        method.as_str(),
        n,
        picks.len()
    );
    let names = picks
        .iter()
        .map(|&i| raw.info().chs[i].name.clone())
        .collect();
    let mut cov = Covariance::new(names, estimate(data, method)?, n.saturating_sub(1))?;
    cov.method = method;
    Ok(cov)
}

/// Covariance over the samples of all good epochs within `[tmin, tmax]`.
pub fn compute_epochs_covariance(
    epochs: &mut Epochs,
    tmin: Option<f64>,
    tmax: Option<f64>,
    method: CovMethod,
) -> Result<Covariance> {
    let data = epochs.get_data()?;
    if data.is_empty() {
        return Err(MneError::InvalidParameter(
            "No epochs left to compute a covariance".to_string(),
        ));
    }
    let tol = 1e-9;
    let cols: Vec<usize> = epochs
        .times()
        .iter()
        .enumerate()
        .filter(|&(_, &t)| tmin.map_or(true, |lo| t >= lo - tol) && tmax.map_or(true, |hi| t <= hi + tol))
        .map(|(i, _)| i)
        .collect();
    if cols.is_empty() {
        return Err(MneError::InvalidParameter(format!(
            "No samples between {:?} and {:?}",
            tmin, tmax
        )));
    }

    let n_ch = data[0].nrows();
    let n_per = cols.len();
    let mut stacked = DMatrix::zeros(n_ch, n_per * data.len());
    for (e, epoch) in data.iter().enumerate() {
        for (j, &c) in cols.iter().enumerate() {
            stacked.set_column(e * n_per + j, &epoch.column(c));
        }
    }
    log::info!(
        "Computing {} covariance from {} epochs ({} samples)",
        method.as_str(),
        data.len(),
        stacked.ncols()
    );
    let nfree = stacked.ncols().saturating_sub(1);
    let mut cov = Covariance::new(epochs.ch_names(), estimate(stacked, method)?, nfree)?;
    cov.method = method;
    Ok(cov)
}
