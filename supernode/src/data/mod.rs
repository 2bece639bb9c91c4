pub mod dataset;
pub mod loader;
pub mod partition;

pub use dataset::{Dataset, Sample};
pub use loader::DatasetSource;
pub use partition::{DataPartition, partition_range, select};
