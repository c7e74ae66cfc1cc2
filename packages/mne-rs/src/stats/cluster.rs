//! Spatio-temporal cluster F-test with a permutation null distribution.

use crate::error::{MneError, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;

/// Point-wise one-way ANOVA F statistic.
///
/// Each group holds observations of equal shape (`channels x times`).
pub fn f_oneway(groups: &[Vec<DMatrix<f64>>]) -> Result<DMatrix<f64>> {
    if groups.len() < 2 {
        return Err(MneError::InvalidParameter(format!(
            "At least two groups are needed, got {}",
            groups.len()
        )));
    }
    let shape = groups
        .iter()
        .flat_map(|g| g.first())
        .map(|m| m.shape())
        .next()
        .ok_or_else(|| MneError::InvalidParameter("All groups are empty".to_string()))?;
    if groups.iter().any(|g| g.is_empty()) {
        return Err(MneError::InvalidParameter(
            "Every group needs at least one observation".to_string(),
        ));
    }
    if groups.iter().flatten().any(|m| m.shape() != shape) {
        return Err(MneError::ShapeMismatch(
            "All observations must have the same shape".to_string(),
        ));
    }

    let k = groups.len() as f64;
    let n_total: usize = groups.iter().map(Vec::len).sum();
    let n = n_total as f64;
    if n_total <= groups.len() {
        return Err(MneError::InvalidParameter(
            "Need more observations than groups".to_string(),
        ));
    }

    let mut sum_all = DMatrix::zeros(shape.0, shape.1);
    let mut sq_all = DMatrix::zeros(shape.0, shape.1);
    let mut ss_between_terms = DMatrix::zeros(shape.0, shape.1);
    for group in groups {
        let mut sum_g = DMatrix::zeros(shape.0, shape.1);
        for obs in group {
            sum_g += obs;
            sq_all += obs.component_mul(obs);
        }
        ss_between_terms += sum_g.component_mul(&sum_g) / group.len() as f64;
        sum_all += sum_g;
    }
    let correction = sum_all.component_mul(&sum_all) / n;
    let ss_total = sq_all - &correction;
    let ss_between = ss_between_terms - correction;

    Ok(DMatrix::from_fn(shape.0, shape.1, |r, c| {
        let msb = ss_between[(r, c)] / (k - 1.0);
        let msw = (ss_total[(r, c)] - ss_between[(r, c)]) / (n - k);
        if msw > 0.0 {
            msb / msw
        } else if msb > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }))
}

/// Spatial neighbours of each channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAdjacency {
    pub ch_names: Vec<String>,
    pub neighbors: Vec<Vec<usize>>,
}

#[derive(Serialize, Deserialize)]
struct AdjacencyFile {
    ch_names: Vec<String>,
    neighbors: Vec<Vec<String>>,
}

impl ChannelAdjacency {
    /// No spatial neighbours: clusters only extend in time.
    pub fn identity(n_channels: usize) -> Self {
        Self {
            ch_names: Vec::new(),
            neighbors: vec![Vec::new(); n_channels],
        }
    }

    pub fn from_pairs(n_channels: usize, pairs: &[(usize, usize)]) -> Result<Self> {
        let mut adjacency = Self::identity(n_channels);
        for &(a, b) in pairs {
            if a >= n_channels || b >= n_channels {
                return Err(MneError::InvalidParameter(format!(
                    "Adjacency pair ({}, {}) out of range for {} channels",
                    a, b, n_channels
                )));
            }
            if a != b {
                adjacency.link(a, b);
            }
        }
        Ok(adjacency)
    }

    /// Channels closer than `max_distance` are neighbours.
    pub fn from_positions(positions: &[[f64; 3]], max_distance: f64) -> Self {
        let mut adjacency = Self::identity(positions.len());
        for a in 0..positions.len() {
            for b in (a + 1)..positions.len() {
                let d2: f64 = (0..3).map(|i| (positions[a][i] - positions[b][i]).powi(2)).sum();
                if d2.sqrt() <= max_distance {
                    adjacency.link(a, b);
                }
            }
        }
        adjacency
    }

    /// Read `{"ch_names": [...], "neighbors": [[names], ...]}`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MneError::FileNotFound(path.display().to_string()));
        }
        let file: AdjacencyFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if file.neighbors.len() != file.ch_names.len() {
            return Err(MneError::ParseError(format!(
                "adjacency file {}: {} neighbour lists for {} channels",
                path.display(),
                file.neighbors.len(),
                file.ch_names.len()
            )));
        }
        let mut adjacency = Self::identity(file.ch_names.len());
        for (a, names) in file.neighbors.iter().enumerate() {
            for name in names {
                let b = file
                    .ch_names
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| MneError::ChannelNotFound(name.clone()))?;
                if a != b {
                    adjacency.link(a, b);
                }
            }
        }
        adjacency.ch_names = file.ch_names;
        Ok(adjacency)
    }

    fn link(&mut self, a: usize, b: usize) {
        if !self.neighbors[a].contains(&b) {
            self.neighbors[a].push(b);
        }
        if !self.neighbors[b].contains(&a) {
            self.neighbors[b].push(a);
        }
    }

    pub fn n_channels(&self) -> usize {
        self.neighbors.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tail {
    #[default]
    Upper,
    Lower,
    Both,
}

#[derive(Debug, Clone)]
pub struct ClusterParams {
    pub threshold: f64,
    /// Size of the null distribution, the observed labeling included
    pub n_permutations: usize,
    pub tail: Tail,
    pub seed: Option<u64>,
    /// Largest time gap (in samples) joining points of one channel
    pub max_step: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            threshold: 6.0,
            n_permutations: 1024,
            tail: Tail::Upper,
            seed: None,
            max_step: 1,
        }
    }
}

/// Connected supra-threshold points, as `(channel, time)` pairs
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub points: Vec<(usize, usize)>,
    pub stat: f64,
}

#[derive(Debug, Clone)]
pub struct ClusterTestResult {
    pub f_obs: DMatrix<f64>,
    pub clusters: Vec<Cluster>,
    pub cluster_p_values: Vec<f64>,
    pub h0: Vec<f64>,
}

impl ClusterTestResult {
    /// Clusters with `p < alpha`.
    pub fn significant(&self, alpha: f64) -> Vec<(&Cluster, f64)> {
        self.clusters
            .iter()
            .zip(&self.cluster_p_values)
            .filter(|&(_, &p)| p < alpha)
            .map(|(c, &p)| (c, p))
            .collect()
    }
}

/// Connected components of `stat` beyond `threshold`, over spatial
/// neighbours at the same time and same-channel points within `max_step`.
pub fn find_clusters(
    stat: &DMatrix<f64>,
    threshold: f64,
    tail: Tail,
    adjacency: &ChannelAdjacency,
    max_step: usize,
) -> Result<Vec<Cluster>> {
    let (n_ch, n_times) = stat.shape();
    if adjacency.n_channels() != n_ch {
        return Err(MneError::ShapeMismatch(format!(
            "Adjacency has {} channels, statistic has {}",
            adjacency.n_channels(),
            n_ch
        )));
    }
    let signs: &[f64] = match tail {
        Tail::Upper => &[1.0],
        Tail::Lower => &[-1.0],
        Tail::Both => &[1.0, -1.0],
    };

    let mut clusters = Vec::new();
    for &sign in signs {
        let active = |c: usize, t: usize| sign * stat[(c, t)] > threshold;
        let mut visited = DMatrix::from_element(n_ch, n_times, false);
        for t0 in 0..n_times {
            for c0 in 0..n_ch {
                if visited[(c0, t0)] || !active(c0, t0) {
                    continue;
                }
                visited[(c0, t0)] = true;
                let mut queue = VecDeque::from([(c0, t0)]);
                let mut points = Vec::new();
                while let Some((c, t)) = queue.pop_front() {
                    points.push((c, t));
                    let lo = t.saturating_sub(max_step);
                    let hi = (t + max_step).min(n_times - 1);
                    let temporal = (lo..=hi).filter(|&tt| tt != t).map(|tt| (c, tt));
                    let spatial = adjacency.neighbors[c].iter().map(|&cc| (cc, t));
                    for (cc, tt) in temporal.chain(spatial) {
                        if !visited[(cc, tt)] && active(cc, tt) {
                            visited[(cc, tt)] = true;
                            queue.push_back((cc, tt));
                        }
                    }
                }
                let stat_sum = points.iter().map(|&(c, t)| stat[(c, t)]).sum();
                points.sort_unstable();
                clusters.push(Cluster {
                    points,
                    stat: stat_sum,
                });
            }
        }
    }
    Ok(clusters)
}

fn max_cluster_stat(clusters: &[Cluster], tail: Tail) -> f64 {
    clusters
        .iter()
        .map(|c| match tail {
            Tail::Upper => c.stat,
            Tail::Lower => -c.stat,
            Tail::Both => c.stat.abs(),
        })
        .fold(0.0, f64::max)
}

/// Cluster-level permutation F-test across conditions.
pub fn spatio_temporal_cluster_test(
    conditions: &[Vec<DMatrix<f64>>],
    adjacency: &ChannelAdjacency,
    params: &ClusterParams,
) -> Result<ClusterTestResult> {
    if params.n_permutations == 0 {
        return Err(MneError::InvalidParameter(
            "n_permutations must be at least 1".to_string(),
        ));
    }
    let f_obs = f_oneway(conditions)?;
    let clusters = find_clusters(&f_obs, params.threshold, params.tail, adjacency, params.max_step)?;
    log::info!(
        "Found {} clusters above F = {}",
        clusters.len(),
        params.threshold
    );

    let pooled: Vec<&DMatrix<f64>> = conditions.iter().flatten().collect();
    let sizes: Vec<usize> = conditions.iter().map(Vec::len).collect();
    let base_seed = params.seed.unwrap_or_else(|| rand::rng().random());

    let observed_max = max_cluster_stat(&clusters, params.tail);
    let permuted: Vec<f64> = (1..params.n_permutations)
        .into_par_iter()
        .map(|i| -> Result<f64> {
            let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
            let mut order: Vec<usize> = (0..pooled.len()).collect();
            order.shuffle(&mut rng);
            let mut groups = Vec::with_capacity(sizes.len());
            let mut offset = 0;
            for &size in &sizes {
                groups.push(
                    order[offset..offset + size]
                        .iter()
                        .map(|&j| pooled[j].clone())
                        .collect::<Vec<_>>(),
                );
                offset += size;
            }
            let f = f_oneway(&groups)?;
            let perm_clusters =
                find_clusters(&f, params.threshold, params.tail, adjacency, params.max_step)?;
            Ok(max_cluster_stat(&perm_clusters, params.tail))
        })
        .collect::<Result<_>>()?;

    let mut h0 = Vec::with_capacity(params.n_permutations);
    h0.push(observed_max);
    h0.extend(permuted);

    let cluster_p_values = clusters
        .iter()
        .map(|c| {
            let stat = match params.tail {
                Tail::Upper => c.stat,
                Tail::Lower => -c.stat,
                Tail::Both => c.stat.abs(),
            };
            h0.iter().filter(|&&v| v >= stat).count() as f64 / h0.len() as f64
        })
        .collect();

    Ok(ClusterTestResult {
        f_obs,
        clusters,
        cluster_p_values,
        h0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(rng: &mut StdRng, effect: f64) -> DMatrix<f64> {
        DMatrix::from_fn(3, 20, |c, t| {
            let signal = if c < 2 && (5..10).contains(&t) { effect } else { 0.0 };
            signal + rng.random::<f64>() - 0.5
        })
    }

    fn conditions() -> Vec<Vec<DMatrix<f64>>> {
        let mut rng = StdRng::seed_from_u64(11);
        let a = (0..10).map(|_| noisy(&mut rng, 0.0)).collect();
        let b = (0..10).map(|_| noisy(&mut rng, 2.0)).collect();
        vec![a, b]
    }

    #[test]
    fn test_f_oneway_known_value() {
        let scalar = |v: f64| DMatrix::from_element(1, 1, v);
        let groups = vec![
            vec![scalar(1.0), scalar(2.0), scalar(3.0)],
            vec![scalar(4.0), scalar(5.0), scalar(6.0)],
        ];
        let f = f_oneway(&groups).unwrap();
        assert!((f[(0, 0)] - 13.5).abs() < 1e-10);

        assert!(f_oneway(&groups[..1]).is_err());
        assert!(f_oneway(&[groups[0].clone(), vec![]]).is_err());
    }

    #[test]
    fn test_find_clusters_uses_adjacency() {
        let mut stat = DMatrix::zeros(2, 6);
        stat[(0, 1)] = 5.0;
        stat[(1, 1)] = 5.0;
        stat[(0, 3)] = 5.0;

        let separate = find_clusters(&stat, 1.0, Tail::Upper, &ChannelAdjacency::identity(2), 1).unwrap();
        assert_eq!(separate.len(), 3);

        let linked = ChannelAdjacency::from_pairs(2, &[(0, 1)]).unwrap();
        let joined = find_clusters(&stat, 1.0, Tail::Upper, &linked, 2).unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].stat, 15.0);
        assert_eq!(joined[0].points, vec![(0, 1), (0, 3), (1, 1)]);

        stat[(1, 4)] = -5.0;
        let both = find_clusters(&stat, 1.0, Tail::Both, &linked, 1).unwrap();
        assert_eq!(both.len(), 3);
        assert!(both.iter().any(|c| c.stat == -5.0));
    }

    #[test]
    fn test_adjacency_builders() {
        assert!(ChannelAdjacency::from_pairs(2, &[(0, 2)]).is_err());
        let adj = ChannelAdjacency::from_positions(
            &[[0.0, 0.0, 0.0], [0.01, 0.0, 0.0], [0.1, 0.0, 0.0]],
            0.02,
        );
        assert_eq!(adj.neighbors[0], vec![1]);
        assert!(adj.neighbors[2].is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adjacency.json");
        std::fs::write(
            &path,
            r#"{"ch_names": ["Fz", "Cz", "Pz"], "neighbors": [["Cz"], ["Fz", "Pz"], ["Cz"]]}"#,
        )
        .unwrap();
        let adj = ChannelAdjacency::read(&path).unwrap();
        assert_eq!(adj.neighbors[1], vec![0, 2]);
        assert_eq!(adj.ch_names.len(), 3);
    }

    #[test]
    fn test_cluster_test_detects_effect() {
        let conditions = conditions();
        let adjacency = ChannelAdjacency::from_pairs(3, &[(0, 1)]).unwrap();
        let params = ClusterParams {
            threshold: 30.0,
            n_permutations: 100,
            seed: Some(0),
            ..Default::default()
        };
        let result = spatio_temporal_cluster_test(&conditions, &adjacency, &params).unwrap();
        assert_eq!(result.h0.len(), 100);
        assert_eq!(result.f_obs.shape(), (3, 20));

        let significant = result.significant(0.05);
        assert_eq!(significant.len(), 1);
        let (cluster, p) = significant[0];
        assert!(cluster.points.contains(&(0, 5)));
        assert!(cluster.points.contains(&(1, 9)));
        assert!((p - 0.01).abs() < 1e-12);
        assert_eq!(result.h0[0], cluster.stat);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let conditions = conditions();
        let adjacency = ChannelAdjacency::identity(3);
        let params = ClusterParams {
            threshold: 4.0,
            n_permutations: 20,
            seed: Some(3),
            ..Default::default()
        };
        let a = spatio_temporal_cluster_test(&conditions, &adjacency, &params).unwrap();
        let b = spatio_temporal_cluster_test(&conditions, &adjacency, &params).unwrap();
        assert_eq!(a.h0, b.h0);
        assert_eq!(a.cluster_p_values, b.cluster_p_values);
    }

    #[test]
    #[ignore = "ultra_slow_test"]
    fn test_cluster_test_many_permutations() {
        let conditions = conditions();
        let adjacency = ChannelAdjacency::from_pairs(3, &[(0, 1), (1, 2)]).unwrap();
        let params = ClusterParams {
            threshold: 30.0,
            n_permutations: 5000,
            seed: Some(42),
            ..Default::default()
        };
        let result = spatio_temporal_cluster_test(&conditions, &adjacency, &params).unwrap();
        assert_eq!(result.h0.len(), 5000);
        assert!(result.significant(0.001).len() == 1);
    }
}
