pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod error;
pub mod lookup;
pub mod metrics_consts;
pub mod pipeline;
pub mod source;
pub mod test_utils;
