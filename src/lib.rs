//! lidarset - Lazy, partitioned access to lidar point clouds in ROS1 .bag files
//!
//! A [`Dataset`] holds one deferred partition per recorded
//! `sensor_msgs/PointCloud2` message. Partitions are decoded only when a
//! frame is requested, so bags far larger than memory can be indexed,
//! sliced, aggregated and written out frame by frame.
//!
//! # Features
//!
//! - **Decoding**: `sensor_msgs/PointCloud2` into typed columns, with
//!   `(0, 0, 0)` points dropped and an `original_id` column kept
//! - **Dataset**: indexing, slicing, time-range queries, `extend`, lazy `map`
//! - **Aggregation**: min/max/sum/mean/std/var/count per point, per frame or
//!   over the whole dataset
//! - **Frames**: value and quantile filters, distance and frame diffs
//! - **Storage**: parquet partitions with a `meta.json` sidecar, CSV per frame
//!
//! # Example
//!
//! ```rust,no_run
//! use lidarset::{AggOp, BagReadOptions, Dataset, Depth};
//!
//! let ds = Dataset::from_file("drive.bag", &BagReadOptions::new("/os_cloud_node/points"))?;
//! let first = ds.get(0)?;
//! println!("{} points at {}", first.len(), first.timestamp_str());
//!
//! let per_point = ds.aggregate(AggOp::Min, Depth::Point)?;
//! ds.slice(0..10)?.to_dir("out", true)?;
//! # let _ = per_point;
//! # Ok::<(), lidarset::Error>(())
//! ```

pub mod aggregate;
pub mod cli;
pub mod convert;
pub mod dataset;
pub mod diff;
pub mod error;
pub mod filter;
pub mod frame;
pub mod io;
pub mod mappings;
pub mod partition;
pub mod rosbags_io;
pub mod table;

// Re-export main types for convenience
pub use aggregate::{AggOp, AggSpec, Aggregation, Depth};
pub use convert::{ConvertOptions, OutputFormat, convert_bag, convert_bags};
pub use dataset::{Dataset, Meta};
pub use diff::Diff;
pub use error::{Error, Result};
pub use filter::{Filter, Relation};
pub use frame::{BoundingBox, Frame, Selection};
pub use io::BagReadOptions;
pub use partition::Partition;
pub use table::{Column, DataType, PointTable};
