//! Decoders from ROS message payloads into point tables.

pub mod pointcloud;
