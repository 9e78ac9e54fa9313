//! Builds a [`Dataset`] of deferred partitions from one bag topic.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dataset::{Dataset, Meta};
use crate::error::{Error, Result};
use crate::partition::Partition;
use crate::rosbags_io::{self, MessageWindow};

/// What to read from a bag.
#[derive(Debug, Clone, Default)]
pub struct BagReadOptions {
    /// `sensor_msgs/PointCloud2` topic; empty picks the only one in the bag.
    pub topic: String,
    /// First message to read, in time order.
    pub start_frame_number: usize,
    /// One past the last message; `None` reads to the end.
    pub end_frame_number: Option<usize>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Keep points at `(0, 0, 0)`. No `original_id` is added when set.
    pub keep_zeros: bool,
}

impl BagReadOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn frames(mut self, start: usize, end: Option<usize>) -> Self {
        self.start_frame_number = start;
        self.end_frame_number = end;
        self
    }

    pub fn keep_zeros(mut self, keep: bool) -> Self {
        self.keep_zeros = keep;
        self
    }

    fn window(&self) -> MessageWindow {
        MessageWindow {
            start_frame: self.start_frame_number,
            end_frame: self.end_frame_number,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Returns `topic`, or the single PointCloud2 topic of the bag when `topic` is empty.
pub fn resolve_topic(path: &Path, topic: &str) -> Result<String> {
    if !topic.is_empty() {
        return Ok(topic.to_string());
    }
    let available = rosbags_io::list_pointcloud_topics(path)?;
    match available.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(Error::TopicNotFound {
            topic: String::new(),
            available,
        }),
    }
}

/// Indexes the selected messages and wraps each one in a deferred decode.
/// Nothing is decoded or copied here.
pub fn dataset_from_bag(path: &Path, options: &BagReadOptions) -> Result<Dataset> {
    let topic = resolve_topic(path, &options.topic)?;
    let messages = rosbags_io::index_topic_messages(path, &topic, &options.window())?;
    let bag: Arc<Path> = Arc::from(path);
    let timestamps = messages.iter().map(|m| m.timestamp()).collect();
    let data = messages
        .iter()
        .map(|m| Partition::from_message(Arc::clone(&bag), m.location, options.keep_zeros))
        .collect();
    tracing::debug!(bag = %path.display(), %topic, "bag dataset created");
    Dataset::new(
        data,
        timestamps,
        Meta::new(path.to_string_lossy()).with_topic(topic),
    )
}
