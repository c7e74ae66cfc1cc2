//! Statistics: cluster-level permutation tests.

pub mod cluster;

pub use cluster::{
    f_oneway, find_clusters, spatio_temporal_cluster_test, ChannelAdjacency, Cluster,
    ClusterParams, ClusterTestResult, Tail,
};
