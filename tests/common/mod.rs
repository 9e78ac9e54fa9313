//! Synthetic ROS bag v2.0 files for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use lidarset::DataType;
use lidarset::mappings::pointcloud::{Header, PointCloud2, PointField, encode_pointcloud2};

pub const TOPIC: &str = "/sensor/points";
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// `x, y, z, intensity` as little-endian f32, 16 bytes per point.
pub fn cloud_payload(points: &[[f32; 4]], seq: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(points.len() * 16);
    for p in points {
        for v in p {
            data.extend_from_slice(&v.to_le_bytes());
        }
    }
    encode_pointcloud2(&PointCloud2 {
        header: Header {
            seq,
            stamp_sec: seq,
            stamp_nsec: 0,
            frame_id: "os_sensor".to_string(),
        },
        height: 1,
        width: points.len() as u32,
        fields: vec![
            PointField::new("x", 0, DataType::Float32),
            PointField::new("y", 4, DataType::Float32),
            PointField::new("z", 8, DataType::Float32),
            PointField::new("intensity", 12, DataType::Float32),
        ],
        is_bigendian: false,
        point_step: 16,
        row_step: 16 * points.len() as u32,
        data: &data,
        is_dense: true,
    })
}

/// Four points, the second one at the origin.
pub fn sample_points(offset: f32) -> Vec<[f32; 4]> {
    vec![
        [1.0 + offset, 2.0 + offset, 3.0 + offset, 10.0 + offset],
        [0.0, 0.0, 0.0, 0.0],
        [4.0 + offset, 5.0 + offset, 6.0 + offset, 20.0 + offset],
        [7.0 + offset, 8.0 + offset, 9.0 + offset, 30.0 + offset],
    ]
}

pub struct BagMessage {
    pub topic: String,
    pub msg_type: String,
    pub time_ns: u64,
    pub data: Vec<u8>,
}

impl BagMessage {
    pub fn cloud(topic: &str, time_ns: u64, data: Vec<u8>) -> Self {
        Self {
            topic: topic.to_string(),
            msg_type: "sensor_msgs/PointCloud2".to_string(),
            time_ns,
            data,
        }
    }

    pub fn other(topic: &str, msg_type: &str, time_ns: u64, data: Vec<u8>) -> Self {
        Self {
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
            time_ns,
            data,
        }
    }
}

/// Writes `n` PointCloud2 messages on [`TOPIC`], one second apart, where
/// message `i` is `sample_points(i)`.
pub fn write_cloud_bag(dir: &Path, name: &str, n: usize) -> PathBuf {
    let messages = (0..n)
        .map(|i| {
            BagMessage::cloud(
                TOPIC,
                (100 + i as u64) * NS_PER_SEC,
                cloud_payload(&sample_points(i as f32), i as u32),
            )
        })
        .collect::<Vec<_>>();
    let path = dir.join(name);
    write_bag(&path, &messages);
    path
}

fn field(name: &str, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((name.len() + 1 + value.len()) as u32).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
    out
}

fn record(header: &[Vec<u8>], data: &[u8]) -> Vec<u8> {
    let header: Vec<u8> = header.concat();
    let mut out = Vec::new();
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn time_bytes(ns: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((ns / NS_PER_SEC) as u32).to_le_bytes());
    out.extend_from_slice(&((ns % NS_PER_SEC) as u32).to_le_bytes());
    out
}

fn connection_record(id: u32, topic: &str, msg_type: &str) -> Vec<u8> {
    let data = [
        field("topic", topic.as_bytes()),
        field("type", msg_type.as_bytes()),
        field("md5sum", b"1158d486dd51d683ce2f1be655c3c181"),
        field("message_definition", b"# synthetic"),
    ]
    .concat();
    record(
        &[
            field("op", &[0x07]),
            field("conn", &id.to_le_bytes()),
            field("topic", topic.as_bytes()),
        ],
        &data,
    )
}

/// Single uncompressed chunk holding every connection and message, followed
/// by the index section.
pub fn write_bag(path: &Path, messages: &[BagMessage]) {
    let mut topics: Vec<(String, String)> = Vec::new();
    for m in messages {
        if !topics.iter().any(|(t, _)| *t == m.topic) {
            topics.push((m.topic.clone(), m.msg_type.clone()));
        }
    }
    let conn_id = |topic: &str| topics.iter().position(|(t, _)| t == topic).unwrap() as u32;

    let mut chunk = Vec::new();
    for (id, (topic, tp)) in topics.iter().enumerate() {
        chunk.extend(connection_record(id as u32, topic, tp));
    }
    let mut offsets: Vec<(u32, u64, u32)> = Vec::new();
    for m in messages {
        offsets.push((conn_id(&m.topic), m.time_ns, chunk.len() as u32));
        chunk.extend(record(
            &[
                field("op", &[0x02]),
                field("conn", &conn_id(&m.topic).to_le_bytes()),
                field("time", &time_bytes(m.time_ns)),
            ],
            &m.data,
        ));
    }

    let magic = b"#ROSBAG V2.0\n";
    let header_len = 4096;
    let chunk_pos = (magic.len() + header_len) as u64;
    let mut body = record(
        &[
            field("op", &[0x05]),
            field("compression", b"none"),
            field("size", &(chunk.len() as u32).to_le_bytes()),
        ],
        &chunk,
    );
    for (id, _) in topics.iter().enumerate() {
        let entries: Vec<&(u32, u64, u32)> =
            offsets.iter().filter(|(c, _, _)| *c == id as u32).collect();
        let mut data = Vec::new();
        for (_, t, off) in &entries {
            data.extend(time_bytes(*t));
            data.extend_from_slice(&off.to_le_bytes());
        }
        body.extend(record(
            &[
                field("op", &[0x04]),
                field("ver", &1u32.to_le_bytes()),
                field("conn", &(id as u32).to_le_bytes()),
                field("count", &(entries.len() as u32).to_le_bytes()),
            ],
            &data,
        ));
    }

    let index_pos = chunk_pos + body.len() as u64;
    for (id, (topic, tp)) in topics.iter().enumerate() {
        body.extend(connection_record(id as u32, topic, tp));
    }
    let start = messages.iter().map(|m| m.time_ns).min().unwrap_or(0);
    let end = messages.iter().map(|m| m.time_ns).max().unwrap_or(0);
    let mut info = Vec::new();
    for (id, _) in topics.iter().enumerate() {
        let count = offsets.iter().filter(|(c, _, _)| *c == id as u32).count() as u32;
        info.extend_from_slice(&(id as u32).to_le_bytes());
        info.extend_from_slice(&count.to_le_bytes());
    }
    body.extend(record(
        &[
            field("op", &[0x06]),
            field("ver", &1u32.to_le_bytes()),
            field("chunk_pos", &chunk_pos.to_le_bytes()),
            field("start_time", &time_bytes(start)),
            field("end_time", &time_bytes(end)),
            field("count", &(topics.len() as u32).to_le_bytes()),
        ],
        &info,
    ));

    let header_fields = [
        field("op", &[0x03]),
        field("index_pos", &index_pos.to_le_bytes()),
        field("conn_count", &(topics.len() as u32).to_le_bytes()),
        field("chunk_count", &1u32.to_le_bytes()),
    ];
    let header_size: usize = header_fields.iter().map(Vec::len).sum();
    // header record is padded so the first chunk starts at a fixed offset
    let padding = vec![b' '; header_len - 8 - header_size];
    let mut file = magic.to_vec();
    file.extend(record(&header_fields, &padding));
    file.extend(body);
    std::fs::write(path, file).unwrap();
}
