//! Error type shared by every library module.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported file format '{ext}'; supported formats are: {supported}")]
    UnsupportedFormat { ext: String, supported: String },

    #[error("index {index} is out of range for a dataset with {len} pointcloud(s)")]
    OutOfRange { index: usize, len: usize },

    #[error("slice {start}..{end} is out of range for a dataset with {len} pointcloud(s)")]
    SliceOutOfRange { start: usize, end: usize, len: usize },

    #[error("start_time must be smaller than end_time")]
    TimeOrder,

    #[error("time {time} is outside of the dataset range {start} - {end}")]
    TimeOutOfRange {
        time: String,
        start: String,
        end: String,
    },

    #[error("length of timestamps {timestamps} does not match the data {partitions}")]
    LengthMismatch { timestamps: usize, partitions: usize },

    #[error("data must have x, y and z coordinates (got columns {columns:?})")]
    MissingColumns { columns: Vec<String> },

    #[error("column '{column}' is missing")]
    UnknownColumn { column: String },

    #[error("column '{column}' has {len} rows, expected {expected}")]
    ColumnLength {
        column: String,
        len: usize,
        expected: usize,
    },

    #[error("column '{column}' already exists")]
    DuplicateColumn { column: String },

    #[error("PointCloud2 decode failed: {0}")]
    Decode(String),

    #[error("{0}")]
    MissingOriginalId(String),

    #[error("no point with id {id}")]
    PointNotFound { id: u64 },

    #[error("unsupported {kind} '{name}'; supported are: {supported}")]
    UnknownOperation {
        kind: &'static str,
        name: String,
        supported: &'static str,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("dataset contains no pointclouds")]
    EmptyDataset,

    #[error("partition {index} has columns {found:?}, expected {expected:?}")]
    SchemaMismatch {
        index: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("expecting a directory path, not a file name: {0}")]
    NotADirectory(PathBuf),

    #[error("'{0}' is not a numbered dataset chunk folder")]
    FolderNumber(PathBuf),

    #[error("target folder {0} already exists and is not empty")]
    TargetExists(PathBuf),

    #[error("serialized dataset in {path} is incomplete: {reason}")]
    Incomplete { path: PathBuf, reason: String },

    #[error("topic '{topic}' not found; pointcloud topics are: {available:?}")]
    TopicNotFound {
        topic: String,
        available: Vec<String>,
    },

    #[error("end frame number {end} too high; topic has {count} messages")]
    FrameRange { end: usize, count: usize },

    #[error("bag read failed: {0}")]
    Bag(String),

    #[error("bad timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
