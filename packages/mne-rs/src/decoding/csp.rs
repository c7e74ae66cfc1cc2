//! Common spatial patterns for two-class problems.

use crate::cov::{estimate, CovMethod};
use crate::error::{MneError, Result};
use nalgebra::{DMatrix, SymmetricEigen};

#[derive(Debug, Clone)]
pub struct Csp {
    pub n_components: usize,
    /// Estimator for the class covariances
    pub reg: CovMethod,
    /// Spatial filters, one per row, most discriminative first. There are as
    /// many rows as the rank of the summed class covariances.
    pub filters: Option<DMatrix<f64>>,
    /// Pseudo-inverse of `filters`; column `k` is the pattern of filter `k`
    pub patterns: Option<DMatrix<f64>>,
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Default for Csp {
    fn default() -> Self {
        Self::new(4, CovMethod::Empirical)
    }
}

/// Trace-normalised class covariance.
fn class_covariance(epochs: &[&DMatrix<f64>], reg: CovMethod) -> Result<DMatrix<f64>> {
    let n_ch = epochs[0].nrows();
    let cov = match reg {
        CovMethod::Empirical => {
            let mut sum = DMatrix::zeros(n_ch, n_ch);
            for x in epochs {
                let c = *x * x.transpose();
                let tr = c.trace();
                if tr > 0.0 {
                    sum += c / tr;
                }
            }
            sum / epochs.len() as f64
        }
        method => {
            let n_times = epochs[0].ncols();
            let mut stacked = DMatrix::zeros(n_ch, n_times * epochs.len());
            for (e, x) in epochs.iter().enumerate() {
                stacked.columns_mut(e * n_times, n_times).copy_from(*x);
            }
            let c = estimate(stacked, method)?;
            let tr = c.trace();
            c / tr
        }
    };
    Ok(cov)
}

impl Csp {
    pub fn new(n_components: usize, reg: CovMethod) -> Self {
        Self {
            n_components,
            reg,
            filters: None,
            patterns: None,
            mean: Vec::new(),
            std: Vec::new(),
        }
    }

    fn validate(epochs_data: &[DMatrix<f64>], labels: &[i32]) -> Result<(i32, i32)> {
        let first = epochs_data.first().ok_or_else(|| {
            MneError::InvalidParameter("CSP needs at least one epoch".to_string())
        })?;
        if epochs_data.iter().any(|e| e.shape() != first.shape()) {
            return Err(MneError::InvalidParameter(
                "All epochs must have the same shape".to_string(),
            ));
        }
        if labels.len() != epochs_data.len() {
            return Err(MneError::InvalidParameter(format!(
                "Got {} labels for {} epochs",
                labels.len(),
                epochs_data.len()
            )));
        }
        let mut classes: Vec<i32> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        match classes.as_slice() {
            [a, b] => Ok((*a, *b)),
            _ => Err(MneError::InvalidParameter(format!(
                "CSP needs exactly two classes, got {}",
                classes.len()
            ))),
        }
    }

    /// Estimate the spatial filters from labelled epochs (`channels x times`).
    pub fn fit(&mut self, epochs_data: &[DMatrix<f64>], labels: &[i32]) -> Result<&mut Self> {
        let (class_a, class_b) = Self::validate(epochs_data, labels)?;
        let n_ch = epochs_data[0].nrows();
        if self.n_components == 0 || self.n_components > n_ch {
            return Err(MneError::InvalidParameter(format!(
                "n_components must be between 1 and {}, got {}",
                n_ch, self.n_components
            )));
        }

        let pick = |class: i32| -> Vec<&DMatrix<f64>> {
            epochs_data
                .iter()
                .zip(labels)
                .filter(|&(_, &l)| l == class)
                .map(|(e, _)| e)
                .collect()
        };
        let cov_a = class_covariance(&pick(class_a), self.reg)?;
        let cov_b = class_covariance(&pick(class_b), self.reg)?;

        // Whiten the composite covariance within its column space
        let composite = SymmetricEigen::new(&cov_a + &cov_b);
        let max = composite.eigenvalues.max();
        let kept: Vec<usize> = (0..n_ch)
            .filter(|&i| composite.eigenvalues[i] > 1e-12 * max)
            .collect();
        let rank = kept.len();
        if self.n_components > rank {
            return Err(MneError::InvalidParameter(format!(
                "n_components ({}) exceeds the rank of the class covariances ({})",
                self.n_components, rank
            )));
        }
        let whitener = DMatrix::from_fn(rank, n_ch, |r, c| {
            let k = kept[r];
            composite.eigenvectors[(c, k)] / composite.eigenvalues[k].sqrt()
        });

        let white_a = &whitener * &cov_a * whitener.transpose();
        let eig = SymmetricEigen::new(white_a);
        let mut order: Vec<usize> = (0..rank).collect();
        order.sort_by(|&i, &j| {
            let di = (eig.eigenvalues[i] - 0.5).abs();
            let dj = (eig.eigenvalues[j] - 0.5).abs();
            dj.total_cmp(&di)
        });
        log::debug!(
            "CSP eigenvalues: {:?}",
            order.iter().map(|&i| eig.eigenvalues[i]).collect::<Vec<_>>()
        );

        let vecs = DMatrix::from_fn(rank, rank, |r, c| eig.eigenvectors[(r, order[c])]);
        let filters = vecs.transpose() * whitener;
        let patterns = filters
            .clone()
            .pseudo_inverse(1e-12)
            .map_err(|e| MneError::Numerical(format!("CSP pattern inversion failed: {}", e)))?;

        self.filters = Some(filters);
        self.patterns = Some(patterns);
        self.mean.clear();
        self.std.clear();

        let features = self.log_power(epochs_data)?;
        let n = features.nrows() as f64;
        for col in features.column_iter() {
            let mean = col.sum() / n;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            self.mean.push(mean);
            self.std.push(if var > 0.0 { var.sqrt() } else { 1.0 });
        }
        log::info!(
            "Fitted CSP on {} epochs ({} channels, {} components)",
            epochs_data.len(),
            n_ch,
            self.n_components
        );
        Ok(self)
    }

    fn log_power(&self, epochs_data: &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
        let filters = self.filters.as_ref().ok_or_else(|| {
            MneError::InvalidParameter("CSP is not fitted".to_string())
        })?;
        let picked = filters.rows(0, self.n_components);
        let mut out = DMatrix::zeros(epochs_data.len(), self.n_components);
        for (e, epoch) in epochs_data.iter().enumerate() {
            if epoch.nrows() != filters.ncols() {
                return Err(MneError::ShapeMismatch(format!(
                    "Epoch has {} channels, CSP was fitted on {}",
                    epoch.nrows(),
                    filters.ncols()
                )));
            }
            let sources = &picked * epoch;
            for (k, row) in sources.row_iter().enumerate() {
                let power = row.iter().map(|v| v * v).sum::<f64>() / row.len() as f64;
                out[(e, k)] = power.max(f64::MIN_POSITIVE).ln();
            }
        }
        Ok(out)
    }

    /// Standardised log-power features, `n_epochs x n_components`.
    pub fn transform(&self, epochs_data: &[DMatrix<f64>]) -> Result<DMatrix<f64>> {
        let mut features = self.log_power(epochs_data)?;
        for (k, mut col) in features.column_iter_mut().enumerate() {
            col.add_scalar_mut(-self.mean[k]);
            col /= self.std[k];
        }
        Ok(features)
    }

    pub fn fit_transform(
        &mut self,
        epochs_data: &[DMatrix<f64>],
        labels: &[i32],
    ) -> Result<DMatrix<f64>> {
        self.fit(epochs_data, labels)?;
        self.transform(epochs_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // Class 1 is strong on channel 0, class 2 on channel 1.
    fn two_class_data(n_per_class: usize) -> (Vec<DMatrix<f64>>, Vec<i32>) {
        let mut rng = StdRng::seed_from_u64(42);
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for class in [1, 2] {
            for _ in 0..n_per_class {
                let epoch = DMatrix::from_fn(3, 100, |r, _| {
                    let gain = match (class, r) {
                        (1, 0) | (2, 1) => 5.0,
                        _ => 1.0,
                    };
                    gain * (rng.random::<f64>() - 0.5)
                });
                data.push(epoch);
                labels.push(class);
            }
        }
        (data, labels)
    }

    #[test]
    fn test_fit_separates_classes() {
        let (data, labels) = two_class_data(20);
        let mut csp = Csp::new(2, CovMethod::Empirical);
        let features = csp.fit_transform(&data, &labels).unwrap();
        assert_eq!(features.shape(), (40, 2));

        let mean_a: f64 = (0..20).map(|e| features[(e, 0)]).sum::<f64>() / 20.0;
        let mean_b: f64 = (20..40).map(|e| features[(e, 0)]).sum::<f64>() / 20.0;
        assert!((mean_a - mean_b).abs() > 1.5, "{} vs {}", mean_a, mean_b);

        // Features are standardised over the training set
        let overall: f64 = (0..40).map(|e| features[(e, 0)]).sum::<f64>() / 40.0;
        assert!(overall.abs() < 1e-9);
    }

    #[test]
    fn test_patterns_invert_filters() {
        let (data, labels) = two_class_data(10);
        let mut csp = Csp::new(3, CovMethod::LedoitWolf);
        csp.fit(&data, &labels).unwrap();
        let filters = csp.filters.as_ref().unwrap();
        let patterns = csp.patterns.as_ref().unwrap();
        let product = filters * patterns;
        assert!((product - DMatrix::identity(3, 3)).abs().max() < 1e-6);
    }

    #[test]
    fn test_invalid_input() {
        let (data, labels) = two_class_data(5);
        let mut csp = Csp::new(2, CovMethod::Empirical);
        assert!(csp.fit(&data, &labels[..3]).is_err());
        assert!(csp.fit(&data, &vec![1; data.len()]).is_err());
        let three: Vec<i32> = (0..data.len() as i32).map(|i| i % 3).collect();
        assert!(csp.fit(&data, &three).is_err());

        let mut ragged = data.clone();
        ragged[0] = DMatrix::zeros(3, 50);
        assert!(csp.fit(&ragged, &labels).is_err());

        assert!(Csp::new(4, CovMethod::Empirical).fit(&data, &labels).is_err());
        assert!(Csp::default().transform(&data).is_err());
    }

    #[test]
    fn test_rank_deficient_channels() {
        // channel 2 is the sum of channels 0 and 1
        let mut rng = StdRng::seed_from_u64(3);
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for class in [1, 2] {
            for _ in 0..15 {
                let (g0, g1) = if class == 1 { (5.0, 1.0) } else { (1.0, 5.0) };
                let mut epoch = DMatrix::zeros(3, 100);
                for t in 0..100 {
                    epoch[(0, t)] = g0 * (rng.random::<f64>() - 0.5);
                    epoch[(1, t)] = g1 * (rng.random::<f64>() - 0.5);
                    epoch[(2, t)] = epoch[(0, t)] + epoch[(1, t)];
                }
                data.push(epoch);
                labels.push(class);
            }
        }

        let mut csp = Csp::new(1, CovMethod::Empirical);
        let features = csp.fit_transform(&data, &labels).unwrap();
        let filters = csp.filters.as_ref().unwrap();
        assert_eq!(filters.nrows(), 2);
        assert!(filters.row(0).norm() > 1e-6);

        let mean_a: f64 = (0..15).map(|e| features[(e, 0)]).sum::<f64>() / 15.0;
        let mean_b: f64 = (15..30).map(|e| features[(e, 0)]).sum::<f64>() / 15.0;
        assert!((mean_a - mean_b).abs() > 1.5, "{} vs {}", mean_a, mean_b);

        assert!(Csp::new(3, CovMethod::Empirical).fit(&data, &labels).is_err());
    }
}
