//! Thin boundary over the `rosbag` reader: topic listing, message counts and
//! per-topic message extraction.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use prettytable::{Table, row};
use rosbag::{ChunkRecord, MessageRecord, RosBag};

use crate::error::{Error, Result};

pub const POINTCLOUD2_TYPE: &str = "sensor_msgs/PointCloud2";

fn bag_err(e: impl std::fmt::Display) -> Error {
    Error::Bag(e.to_string())
}

fn open(path: &Path) -> Result<RosBag> {
    RosBag::new(path).map_err(|e| Error::Bag(format!("failed to open {}: {}", path.display(), e)))
}

/// Per-topic summary gathered from one pass over the bag.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSummary {
    pub topic: String,
    pub msg_type: String,
    pub count: usize,
    pub first_ns: u64,
    pub last_ns: u64,
}

/// Where a message sits in the bag: the `index`-th record of the
/// `record`-th chunk-section record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageLocation {
    pub record: usize,
    pub index: usize,
}

/// A recorded message, referenced but not read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub time_ns: u64,
    pub location: MessageLocation,
}

impl MessageRef {
    pub fn timestamp(&self) -> DateTime<Utc> {
        ns_to_datetime(self.time_ns)
    }
}

pub fn ns_to_datetime(ns: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns as i64)
}

/// Which messages of a topic to extract.
///
/// Frame numbers index the topic's messages in time order; `end_frame` is
/// exclusive and defaults to the message count. Time bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct MessageWindow {
    pub start_frame: usize,
    pub end_frame: Option<usize>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

fn connections(bag: &RosBag) -> Result<BTreeMap<u32, (String, String)>> {
    let mut connections = BTreeMap::new();
    for record in bag.chunk_records() {
        if let ChunkRecord::Chunk(chunk) = record.map_err(bag_err)? {
            for msg in chunk.messages() {
                if let MessageRecord::Connection(conn) = msg.map_err(bag_err)? {
                    connections.insert(conn.id, (conn.topic.to_string(), conn.tp.to_string()));
                }
            }
        }
    }
    Ok(connections)
}

/// Topics with their type, message count and time span, sorted by name.
pub fn list_topics(path: impl AsRef<Path>) -> Result<Vec<TopicSummary>> {
    let bag = open(path.as_ref())?;
    let connections = connections(&bag)?;

    let mut stats: BTreeMap<String, TopicSummary> = BTreeMap::new();
    for (topic, tp) in connections.values() {
        stats.entry(topic.clone()).or_insert_with(|| TopicSummary {
            topic: topic.clone(),
            msg_type: tp.clone(),
            count: 0,
            first_ns: u64::MAX,
            last_ns: 0,
        });
    }

    for record in bag.chunk_records() {
        if let ChunkRecord::Chunk(chunk) = record.map_err(bag_err)? {
            for msg in chunk.messages() {
                if let MessageRecord::MessageData(msg_data) = msg.map_err(bag_err)?
                    && let Some((topic, _)) = connections.get(&msg_data.conn_id)
                    && let Some(entry) = stats.get_mut(topic)
                {
                    entry.count += 1;
                    entry.first_ns = entry.first_ns.min(msg_data.time);
                    entry.last_ns = entry.last_ns.max(msg_data.time);
                }
            }
        }
    }

    Ok(stats
        .into_values()
        .map(|mut s| {
            if s.count == 0 {
                s.first_ns = 0;
            }
            s
        })
        .collect())
}

/// Names of every `sensor_msgs/PointCloud2` topic in the bag.
pub fn list_pointcloud_topics(path: impl AsRef<Path>) -> Result<Vec<String>> {
    Ok(list_topics(path)?
        .into_iter()
        .filter(|t| t.msg_type == POINTCLOUD2_TYPE)
        .map(|t| t.topic)
        .collect())
}

pub fn topic_message_count(path: impl AsRef<Path>, topic: &str) -> Result<usize> {
    let topics = list_topics(path)?;
    match topics.iter().find(|t| t.topic == topic) {
        Some(t) => Ok(t.count),
        None => Err(topic_not_found(topic, &topics)),
    }
}

fn topic_not_found(topic: &str, topics: &[TopicSummary]) -> Error {
    Error::TopicNotFound {
        topic: topic.to_string(),
        available: topics
            .iter()
            .filter(|t| t.msg_type == POINTCLOUD2_TYPE)
            .map(|t| t.topic.clone())
            .collect(),
    }
}

/// Locates the selected messages of `topic`, in time order.
///
/// Only times and positions are collected; no payload is copied. The bag is
/// only held open for the duration of the call.
pub fn index_topic_messages(
    path: impl AsRef<Path>,
    topic: &str,
    window: &MessageWindow,
) -> Result<Vec<MessageRef>> {
    let path = path.as_ref();
    let bag = open(path)?;
    let connections = connections(&bag)?;
    let conn_ids: Vec<u32> = connections
        .iter()
        .filter(|(_, (t, _))| t == topic)
        .map(|(id, _)| *id)
        .collect();
    if conn_ids.is_empty() {
        return Err(topic_not_found(topic, &list_topics(path)?));
    }

    let mut messages = Vec::new();
    for (record, chunk_record) in bag.chunk_records().enumerate() {
        if let ChunkRecord::Chunk(chunk) = chunk_record.map_err(bag_err)? {
            for (index, msg) in chunk.messages().enumerate() {
                if let MessageRecord::MessageData(msg_data) = msg.map_err(bag_err)?
                    && conn_ids.contains(&msg_data.conn_id)
                {
                    messages.push(MessageRef {
                        time_ns: msg_data.time,
                        location: MessageLocation { record, index },
                    });
                }
            }
        }
    }
    // chunks are not guaranteed to be stored chronologically
    messages.sort_by_key(|m| (m.time_ns, m.location));

    let count = messages.len();
    let end = window.end_frame.unwrap_or(count);
    if end > count {
        return Err(Error::FrameRange { end, count });
    }
    if window.start_frame > end {
        return Err(Error::InvalidArgument(format!(
            "start frame {} is after end frame {}",
            window.start_frame, end
        )));
    }
    if let (Some(s), Some(e)) = (window.start_time, window.end_time)
        && s >= e
    {
        return Err(Error::TimeOrder);
    }

    let selected: Vec<MessageRef> = messages[window.start_frame..end]
        .iter()
        .filter(|m| {
            let ts = m.timestamp();
            window.start_time.is_none_or(|s| ts >= s) && window.end_time.is_none_or(|e| ts <= e)
        })
        .copied()
        .collect();
    tracing::debug!(
        bag = %path.display(),
        topic,
        total = count,
        selected = selected.len(),
        "indexed topic messages"
    );
    Ok(selected)
}

/// Reopens the bag and hands the payload at `location` to `f`.
///
/// Uncompressed chunks are borrowed from the memory map; nothing else of
/// the bag is kept once `f` returns.
pub fn with_message<T>(
    path: &Path,
    location: MessageLocation,
    f: impl FnOnce(&[u8]) -> Result<T>,
) -> Result<T> {
    let bag = open(path)?;
    let missing = || {
        Error::Bag(format!(
            "no message at chunk record {} index {} in {}",
            location.record,
            location.index,
            path.display()
        ))
    };
    let chunk = match bag.chunk_records().nth(location.record) {
        Some(record) => match record.map_err(bag_err)? {
            ChunkRecord::Chunk(chunk) => chunk,
            _ => return Err(missing()),
        },
        None => return Err(missing()),
    };
    match chunk.messages().nth(location.index) {
        Some(msg) => match msg.map_err(bag_err)? {
            MessageRecord::MessageData(msg_data) => f(msg_data.data),
            _ => Err(missing()),
        },
        None => Err(missing()),
    }
}

/// Prints topics, types, message counts and time span of a bag.
pub fn inspect_bag(path: &str) -> Result<()> {
    let topics = list_topics(path)?;

    let bag_start = topics
        .iter()
        .filter(|t| t.count > 0)
        .map(|t| t.first_ns)
        .min();
    let bag_end = topics.iter().map(|t| t.last_ns).max().unwrap_or(0);
    let total: usize = topics.iter().map(|t| t.count).sum();
    let rel = |ns: u64| match bag_start {
        Some(start) => (ns.saturating_sub(start)) as f64 / 1e9,
        None => 0.0,
    };

    println!("Bag: {}", path);
    match bag_start {
        Some(start) => println!(
            "Start: {}, End: {}, Duration (s): {:.6}, Total messages: {}\n",
            ns_to_datetime(start).format(crate::frame::TIMESTAMP_FORMAT),
            ns_to_datetime(bag_end).format(crate::frame::TIMESTAMP_FORMAT),
            rel(bag_end),
            total
        ),
        None => println!("Empty bag\n"),
    }

    let mut table = Table::new();
    table.set_titles(row!["Topic", "Type", "Count", "Start(s)", "End(s)"]);
    for t in &topics {
        table.add_row(row![
            t.topic,
            t.msg_type,
            t.count,
            format!("{:.6}", rel(t.first_ns)),
            format!("{:.6}", rel(t.last_ns))
        ]);
    }
    table.printstd();
    Ok(())
}
