pub mod beamformer;
pub mod command;
pub mod config;
pub mod cov;
pub mod decoding;
pub mod epochs;
pub mod error;
pub mod events;
pub mod evoked;
pub mod filter;
pub mod forward;
pub mod info;
pub mod io;
pub mod source_estimate;
pub mod stats;
pub mod time_frequency;
pub mod versions;

pub use beamformer::{apply_lcmv, lcmv, make_lcmv, LcmvFilters, LcmvParams, WeightNorm};
pub use command::{FilterRawParams, MneCRunner, ProcessRawParams};
pub use cov::{compute_epochs_covariance, compute_raw_covariance, CovMethod, Covariance};
pub use epochs::{Epochs, EpochsParams, EventId, Thresholds};
pub use error::{MneError, Result};
pub use events::{find_events, read_events, write_events, Event, FindEventsParams};
pub use evoked::{Baseline, Evoked};
pub use forward::Forward;
pub use info::{pick_channels, pick_types, ChannelInfo, ChannelKind, Info, PickSpec};
pub use io::Raw;
pub use source_estimate::SourceEstimate;
