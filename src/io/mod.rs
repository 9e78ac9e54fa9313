//! Dataset sources and sinks: ROS bags in, native directories and CSV out.

pub mod bag;
pub mod csv;
pub mod dir;

pub use bag::BagReadOptions;
