//! Deferred per-frame units of work.
//!
//! A [`Partition`] describes how to produce one frame's [`PointTable`]
//! without producing it. A bag message partition carries the bag path and
//! the message position, not the bytes; forcing reopens the bag. Forcing
//! runs a pure function over that input, so partitions can be cloned freely
//! and forced from any thread. Results are not cached: forcing twice
//! decodes twice.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::frame::Frame;
use crate::mappings::pointcloud::decode_pointcloud2;
use crate::rosbags_io::{self, MessageLocation};
use crate::table::PointTable;

pub(crate) type FrameFn = Arc<dyn Fn(Frame) -> Result<Frame> + Send + Sync>;

#[derive(Clone)]
pub struct Partition(Arc<Task>);

enum Task {
    /// `sensor_msgs/PointCloud2` message read from the bag when forced.
    Message {
        bag: Arc<Path>,
        location: MessageLocation,
        keep_zeros: bool,
    },
    /// Serialized `sensor_msgs/PointCloud2` held in memory.
    Payload { payload: Arc<[u8]>, keep_zeros: bool },
    /// Already materialized rows.
    Table(Arc<PointTable>),
    /// One parquet file of a serialized dataset.
    File { path: PathBuf, restore_empty: bool },
    /// Another partition passed through a frame transformation.
    Map {
        source: Partition,
        timestamp: DateTime<Utc>,
        orig_file: Arc<str>,
        f: FrameFn,
    },
}

impl Partition {
    pub fn from_message(bag: Arc<Path>, location: MessageLocation, keep_zeros: bool) -> Self {
        Self(Arc::new(Task::Message {
            bag,
            location,
            keep_zeros,
        }))
    }

    pub fn from_payload(payload: Arc<[u8]>, keep_zeros: bool) -> Self {
        Self(Arc::new(Task::Payload {
            payload,
            keep_zeros,
        }))
    }

    pub fn from_table(table: PointTable) -> Self {
        Self(Arc::new(Task::Table(Arc::new(table))))
    }

    /// A partition read from `path`; with `restore_empty` a single all-null
    /// row is turned back into an empty table.
    pub fn from_file(path: PathBuf, restore_empty: bool) -> Self {
        Self(Arc::new(Task::File {
            path,
            restore_empty,
        }))
    }

    pub(crate) fn map(
        source: Partition,
        timestamp: DateTime<Utc>,
        orig_file: Arc<str>,
        f: FrameFn,
    ) -> Self {
        Self(Arc::new(Task::Map {
            source,
            timestamp,
            orig_file,
            f,
        }))
    }

    /// Runs the deferred computation. Errors stay local to this partition.
    pub fn force(&self) -> Result<PointTable> {
        match self.0.as_ref() {
            Task::Message {
                bag,
                location,
                keep_zeros,
            } => rosbags_io::with_message(bag, *location, |payload| {
                decode_pointcloud2(payload, *keep_zeros)
            }),
            Task::Payload {
                payload,
                keep_zeros,
            } => decode_pointcloud2(payload, *keep_zeros),
            Task::Table(table) => Ok(table.as_ref().clone()),
            Task::File {
                path,
                restore_empty,
            } => crate::io::dir::read_partition(path, *restore_empty),
            Task::Map {
                source,
                timestamp,
                orig_file,
                f,
            } => {
                let frame = Frame::new(source.force()?, *timestamp, orig_file.as_ref())?;
                Ok(f(frame)?.into_data())
            }
        }
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_ref() {
            Task::Message { bag, location, .. } => write!(
                f,
                "Partition::Message({} @ {}:{})",
                bag.display(),
                location.record,
                location.index
            ),
            Task::Payload { payload, .. } => write!(f, "Partition::Payload({} bytes)", payload.len()),
            Task::Table(t) => write!(f, "Partition::Table({} rows)", t.num_rows()),
            Task::File { path, .. } => write!(f, "Partition::File({})", path.display()),
            Task::Map { source, .. } => write!(f, "Partition::Map({:?})", source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn table() -> PointTable {
        PointTable::new(vec![
            ("x".into(), Column::Float32(vec![1.0, 2.0])),
            ("y".into(), Column::Float32(vec![3.0, 4.0])),
            ("z".into(), Column::Float32(vec![5.0, 6.0])),
        ])
        .unwrap()
    }

    #[test]
    fn table_partition_forces_a_copy() {
        let p = Partition::from_table(table());
        assert_eq!(p.force().unwrap(), table());
        assert_eq!(p.clone().force().unwrap(), table());
    }

    #[test]
    fn bad_message_fails_only_when_forced() {
        let p = Partition::from_payload(Arc::from(&[1u8, 2, 3][..]), false);
        assert!(p.force().is_err());
    }

    #[test]
    fn map_runs_on_force() {
        let f: FrameFn = Arc::new(|frame: Frame| frame.limit("x", 1.5, 10.0));
        let p = Partition::map(Partition::from_table(table()), Utc::now(), Arc::from(""), f);
        assert_eq!(p.force().unwrap().num_rows(), 1);
    }
}
