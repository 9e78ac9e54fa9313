use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use lidarset::cli::{Cli, Commands};
use lidarset::convert::{self, ConvertOptions};
use lidarset::rosbags_io;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Inspect { bag } => Ok(rosbags_io::inspect_bag(&bag)?),
        Commands::Convert {
            bag,
            topic,
            dir,
            format,
            start,
            end,
            keep_zeros,
            progress,
            workers,
        } => {
            let options = ConvertOptions {
                bag_path: bag,
                topic,
                output_dir: dir.into(),
                format: format.into(),
                start_frame: start,
                end_frame: end,
                keep_zeros,
                flush_workers: workers,
                show_progress: progress,
                ..ConvertOptions::default()
            };
            convert::convert_bags(&options)
        }
    }
}
