//! LCMV beamformer.
//!
//! Unit-gain spatial filters `w = C^+ g / (g^T C^+ g)` from a data
//! covariance, optionally in the space whitened by a noise covariance.

use crate::cov::{compute_epochs_covariance, CovMethod, Covariance};
use crate::epochs::Epochs;
use crate::error::{MneError, Result};
use crate::evoked::Evoked;
use crate::forward::Forward;
use crate::source_estimate::SourceEstimate;
use nalgebra::DMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightNorm {
    /// Plain unit-gain filters
    #[default]
    None,
    /// Each filter scaled to unit norm in whitened space
    UnitNoiseGain,
}

#[derive(Debug, Clone, Copy)]
pub struct LcmvParams {
    /// Tikhonov regularisation, as a fraction of the mean eigenvalue
    pub reg: f64,
    pub weight_norm: WeightNorm,
    /// Singular values below `rank_tol * s0` are discarded
    pub rank_tol: f64,
}

impl Default for LcmvParams {
    fn default() -> Self {
        Self {
            reg: 0.05,
            weight_norm: WeightNorm::None,
            rank_tol: 1e-8,
        }
    }
}

/// Sensor-space filters, one row per source.
#[derive(Debug, Clone)]
pub struct LcmvFilters {
    pub ch_names: Vec<String>,
    pub vertices: Vec<usize>,
    /// `n_sources x n_channels`
    pub weights: DMatrix<f64>,
    pub weight_norm: WeightNorm,
    /// Rank of the regularised data covariance
    pub rank: usize,
}

/// Rank-aware pseudo-inverse of a symmetric matrix.
fn pinv_rank(c: &DMatrix<f64>, rank_tol: f64) -> Result<(DMatrix<f64>, usize)> {
    let n = c.nrows();
    let svd = c.clone().svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| MneError::Numerical("SVD did not return U".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| MneError::Numerical("SVD did not return V^T".to_string()))?;
    let s0 = svd.singular_values.max();
    if !(s0 > 0.0) {
        return Err(MneError::Numerical(
            "Data covariance is zero".to_string(),
        ));
    }
    let mut inv = DMatrix::zeros(n, n);
    let mut rank = 0;
    for (k, &s) in svd.singular_values.iter().enumerate() {
        if s > rank_tol * s0 {
            rank += 1;
            inv += v_t.row(k).transpose() * u.column(k).transpose() / s;
        }
    }
    Ok((inv, rank))
}

/// Compute LCMV filters for the channels of `ch_names` present in the forward.
pub fn make_lcmv(
    ch_names: &[String],
    forward: &Forward,
    data_cov: &Covariance,
    noise_cov: Option<&Covariance>,
    params: &LcmvParams,
) -> Result<LcmvFilters> {
    if params.reg < 0.0 {
        return Err(MneError::InvalidParameter(format!(
            "reg must be non-negative, got {}",
            params.reg
        )));
    }
    let fwd = forward.pick_channels(ch_names)?;
    let names = fwd.ch_names.clone();
    let n_ch = names.len();
    let mut gain = fwd.gain;
    let mut cov = data_cov.pick_channels(&names)?.data;

    let whitener = match noise_cov {
        Some(noise) => {
            let (w, rank) = noise.pick_channels(&names)?.whitener(params.rank_tol)?;
            log::info!("Whitening with a noise covariance of rank {}", rank);
            gain = &w * gain;
            cov = &w * cov * w.transpose();
            Some(w)
        }
        None => None,
    };

    let dim = cov.nrows();
    let load = params.reg * cov.trace() / dim as f64;
    for i in 0..dim {
        cov[(i, i)] += load;
    }
    let (cov_inv, rank) = pinv_rank(&cov, params.rank_tol)?;
    log::info!(
        "Computing LCMV filters for {} sources from {} channels (covariance rank {})",
        fwd.vertices.len(),
        n_ch,
        rank
    );

    let mut weights = DMatrix::zeros(fwd.vertices.len(), dim);
    for (k, g) in gain.column_iter().enumerate() {
        let cg = &cov_inv * g;
        let denom = g.dot(&cg);
        if !(denom.abs() > 0.0) {
            return Err(MneError::Numerical(format!(
                "Source {} has no gain in the covariance range",
                fwd.vertices[k]
            )));
        }
        let mut w = cg / denom;
        if params.weight_norm == WeightNorm::UnitNoiseGain {
            let norm = w.norm();
            if norm > 0.0 {
                w /= norm;
            }
        }
        weights.set_row(k, &w.transpose());
    }

    if let Some(w) = whitener {
        weights = weights * w;
    }

    Ok(LcmvFilters {
        ch_names: names,
        vertices: fwd.vertices,
        weights,
        weight_norm: params.weight_norm,
        rank,
    })
}

/// Apply filters to an evoked response.
pub fn apply_lcmv(evoked: &Evoked, filters: &LcmvFilters) -> Result<SourceEstimate> {
    let rows = filters
        .ch_names
        .iter()
        .map(|n| {
            evoked
                .info
                .channel_index(n)
                .ok_or_else(|| MneError::ChannelNotFound(n.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    let data = evoked.data.select_rows(rows.iter());
    let tmin = evoked.times.first().copied().unwrap_or(0.0);
    SourceEstimate::new(
        filters.vertices.clone(),
        &filters.weights * data,
        tmin,
        1.0 / evoked.info.sfreq,
    )
}

/// Beamform the average of `epochs`, with the data covariance taken from
/// the epochs themselves.
pub fn lcmv(
    epochs: &mut Epochs,
    forward: &Forward,
    noise_cov: Option<&Covariance>,
    params: &LcmvParams,
) -> Result<SourceEstimate> {
    let data_cov = compute_epochs_covariance(epochs, None, None, CovMethod::Empirical)?;
    let evoked = epochs.average()?;
    let filters = make_lcmv(&evoked.ch_names(), forward, &data_cov, noise_cov, params)?;
    apply_lcmv(&evoked, &filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cov::estimate;
    use crate::info::{ChannelInfo, ChannelKind, Info};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("MEG {:04}", i + 1)).collect()
    }

    fn setup() -> (Forward, DMatrix<f64>) {
        let mut rng = StdRng::seed_from_u64(7);
        let gain = DMatrix::from_fn(6, 3, |_, _| rng.random::<f64>() - 0.5);
        let fwd = Forward::new(names(6), gain.clone(), vec![0, 1, 2], vec![]).unwrap();
        // source 1 active, plus sensor noise
        let n = 2000;
        let signal: Vec<f64> = (0..n).map(|t| (t as f64 * 0.05).sin()).collect();
        let data = DMatrix::from_fn(6, n, |r, c| {
            gain[(r, 1)] * signal[c] + 0.05 * (rng.random::<f64>() - 0.5)
        });
        (fwd, data)
    }

    fn cov_of(data: &DMatrix<f64>) -> Covariance {
        Covariance::new(names(6), estimate(data.clone(), CovMethod::Empirical).unwrap(), data.ncols() - 1)
            .unwrap()
    }

    #[test]
    fn test_unit_gain_constraint() {
        let (fwd, data) = setup();
        let filters = make_lcmv(&names(6), &fwd, &cov_of(&data), None, &LcmvParams::default()).unwrap();
        assert_eq!(filters.rank, 6);
        let response = &filters.weights * &fwd.gain;
        for k in 0..3 {
            assert!((response[(k, k)] - 1.0).abs() < 1e-8);
        }
    }

    #[test]
    fn test_unit_gain_with_noise_whitening() {
        let (fwd, data) = setup();
        let noise = Covariance::new(names(6), DMatrix::identity(6, 6) * 4.0, 100).unwrap();
        let filters =
            make_lcmv(&names(6), &fwd, &cov_of(&data), Some(&noise), &LcmvParams::default()).unwrap();
        let response = &filters.weights * &fwd.gain;
        for k in 0..3 {
            assert!((response[(k, k)] - 1.0).abs() < 1e-8);
        }
    }

    #[test]
    fn test_unit_noise_gain_norm() {
        let (fwd, data) = setup();
        let params = LcmvParams {
            weight_norm: WeightNorm::UnitNoiseGain,
            ..Default::default()
        };
        let filters = make_lcmv(&names(6), &fwd, &cov_of(&data), None, &params).unwrap();
        for row in filters.weights.row_iter() {
            assert!((row.norm() - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_rank_deficient_covariance() {
        let (fwd, data) = setup();
        let mut cov = cov_of(&data);
        // Projected-out direction
        cov.data = DMatrix::from_fn(6, 6, |r, c| if r == 5 || c == 5 { 0.0 } else { cov.data[(r, c)] });
        let params = LcmvParams {
            reg: 0.0,
            ..Default::default()
        };
        let filters = make_lcmv(&names(6), &fwd, &cov, None, &params).unwrap();
        assert_eq!(filters.rank, 5);
    }

    #[test]
    fn test_apply_recovers_active_source() {
        let (fwd, data) = setup();
        let info = Info::new(
            100.0,
            names(6).into_iter().map(|n| ChannelInfo::new(n, ChannelKind::Grad)).collect(),
        )
        .unwrap();
        let times: Vec<f64> = (0..data.ncols()).map(|i| i as f64 / 100.0).collect();
        let evoked = Evoked::new(info, times, data.clone(), 1).unwrap();
        let filters = make_lcmv(&names(6), &fwd, &cov_of(&data), None, &LcmvParams::default()).unwrap();
        let stc = apply_lcmv(&evoked, &filters).unwrap();
        assert_eq!(stc.data.shape(), (3, data.ncols()));
        assert!((stc.tstep - 0.01).abs() < 1e-12);

        let power = |k: usize| stc.data.row(k).iter().map(|v| v * v).sum::<f64>();
        assert!(power(1) > power(0));
        assert!(power(1) > power(2));
    }

    #[test]
    fn test_decimated_epochs_keep_time_axis() {
        let (fwd, data) = setup();
        let info = Info::new(
            100.0,
            names(6).into_iter().map(|n| ChannelInfo::new(n, ChannelKind::Grad)).collect(),
        )
        .unwrap();
        let raw = std::sync::Arc::new(crate::io::Raw::from_array(info, data, 0).unwrap());
        let events: Vec<crate::events::Event> =
            (1..10).map(|k| crate::events::Event::new(200 * k, 0, 1)).collect();
        let mut p = crate::epochs::EpochsParams::new(-0.1, 0.5);
        p.baseline = None;
        p.decim = 5;
        let mut epochs =
            Epochs::new(raw, &events, crate::epochs::EventId::single(1), p).unwrap();

        let evoked = epochs.average().unwrap();
        assert_eq!(evoked.info.sfreq, 20.0);
        assert!(evoked.info.lowpass <= 10.0);
        assert!((evoked.times[1] - evoked.times[0] - 0.05).abs() < 1e-12);

        let stc = lcmv(&mut epochs, &fwd, None, &LcmvParams::default()).unwrap();
        assert!((stc.tstep - 0.05).abs() < 1e-12);
        let stc_times = stc.times();
        assert_eq!(stc_times.len(), evoked.times.len());
        let last = evoked.times.len() - 1;
        assert!((stc_times[last] - evoked.times[last]).abs() < 1e-9);
    }

    #[test]
    fn test_channel_mismatch() {
        let (fwd, data) = setup();
        let cov = cov_of(&data);
        assert!(make_lcmv(&["X".to_string()], &fwd, &cov, None, &LcmvParams::default()).is_err());
        let bad = LcmvParams {
            reg: -1.0,
            ..Default::default()
        };
        assert!(make_lcmv(&names(6), &fwd, &cov, None, &bad).is_err());
    }
}
