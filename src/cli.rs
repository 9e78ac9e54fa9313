use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::convert::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "lidarset",
    about = "Read lidar point clouds from ROS1 bag files as lazy, partitioned datasets",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Folder of parquet partitions with a meta.json sidecar
    Dir,
    /// One CSV file per frame
    Csv,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Dir => OutputFormat::Dir,
            Format::Csv => OutputFormat::Csv,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List topics, types, message counts and time span of a bag
    Inspect {
        /// Path to the .bag file
        bag: String,
    },

    /// Convert PointCloud2 messages of a bag into a dataset folder or CSV files
    Convert {
        /// Path to the .bag file, or "." for every .bag in the current directory
        bag: String,
        /// PointCloud2 topic (defaults to the only one in the bag)
        #[arg(short = 't', long = "topic", default_value = "")]
        topic: String,
        /// Output folder
        #[arg(short = 'd', long = "output-dir", default_value = ".")]
        dir: String,
        /// Output format
        #[arg(short = 'o', long = "output-format", value_enum, default_value_t = Format::Dir)]
        format: Format,
        /// First frame number (inclusive)
        #[arg(short = 's', long = "start", default_value_t = 0)]
        start: usize,
        /// Last frame number (exclusive)
        #[arg(short = 'e', long = "end")]
        end: Option<usize>,
        /// Keep points at (0, 0, 0)
        #[arg(long = "keep-zeros", action = ArgAction::SetTrue)]
        keep_zeros: bool,
        /// Show progress bar
        #[arg(long = "progress", action = ArgAction::SetTrue)]
        progress: bool,
        /// Number of background writer threads
        #[arg(long = "workers", default_value_t = 2)]
        workers: usize,
    },
}
