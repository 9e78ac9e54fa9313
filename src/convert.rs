use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::dataset::Dataset;
use crate::io::bag::{BagReadOptions, dataset_from_bag, resolve_topic};

/// Frames per chunk when `LIDARSET_MAX_CHUNK` is not set.
pub const DEFAULT_MAX_CHUNK: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Numbered chunk folders of parquet partitions + meta.json
    #[default]
    Dir,
    /// One CSV file per frame
    Csv,
}

/// Options for converting bag files into datasets
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Path to a .bag file, or "." for every .bag in the current directory
    pub bag_path: String,
    /// PointCloud2 topic; empty picks the only one in the bag
    pub topic: String,
    /// Folder receiving one `<stem>_lidarset` folder per bag
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    /// First frame number (inclusive)
    pub start_frame: usize,
    /// Last frame number (exclusive); None means up to the last message
    pub end_frame: Option<usize>,
    /// Keep points at (0, 0, 0)
    pub keep_zeros: bool,
    /// Frames read and written per chunk
    pub max_chunk: usize,
    /// Number of background writer threads
    pub flush_workers: usize,
    /// Show progress bar
    pub show_progress: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            bag_path: String::new(),
            topic: String::new(),
            output_dir: PathBuf::from("."),
            format: OutputFormat::Dir,
            start_frame: 0,
            end_frame: None,
            keep_zeros: false,
            max_chunk: max_chunk_from_env(),
            flush_workers: 2,
            show_progress: false,
        }
    }
}

pub fn max_chunk_from_env() -> usize {
    std::env::var("LIDARSET_MAX_CHUNK")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_CHUNK)
}

/// Splits `start..end` into consecutive ranges of at most `max` frames.
pub fn frame_chunks(start: usize, end: usize, max: usize) -> Vec<Range<usize>> {
    (start..end)
        .step_by(max.max(1))
        .map(|s| s..(s + max.max(1)).min(end))
        .collect()
}

/// Bag files selected by `bag_path`.
pub fn bag_files(bag_path: &str) -> Result<Vec<PathBuf>> {
    if bag_path != "." {
        return Ok(vec![PathBuf::from(bag_path)]);
    }
    let mut bags = Vec::new();
    for entry in std::fs::read_dir(".").context("failed to list current directory")? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "bag") {
            bags.push(path);
        }
    }
    bags.sort();
    Ok(bags)
}

#[derive(Debug)]
struct WriteJob {
    chunk: usize,
    first_frame: usize,
    dataset: Dataset,
    target: PathBuf,
}

/// Convert every selected bag
pub fn convert_bags(options: &ConvertOptions) -> Result<()> {
    let bags = bag_files(&options.bag_path)?;
    if bags.is_empty() {
        tracing::warn!("no .bag files found");
    }
    for bag in bags {
        convert_bag(&bag, options)?;
    }
    Ok(())
}

/// Convert one bag into `<output_dir>/<stem>_lidarset`
///
/// The bag is indexed once; frames are decoded by the writer threads in
/// chunks of `max_chunk`, so only the message index and the chunks being
/// written are held in memory.
pub fn convert_bag(bag: &Path, options: &ConvertOptions) -> Result<()> {
    if options.flush_workers == 0 {
        anyhow::bail!("flush-workers must be >= 1");
    }
    let started = Instant::now();
    let topic = resolve_topic(bag, &options.topic)
        .with_context(|| format!("failed to pick a topic in {}", bag.display()))?;
    let read = BagReadOptions::new(&topic)
        .keep_zeros(options.keep_zeros)
        .frames(options.start_frame, options.end_frame);
    let selected = dataset_from_bag(bag, &read)
        .with_context(|| format!("failed to index {}", bag.display()))?;
    let stem = bag
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("bag")
        .to_string();
    let target = options.output_dir.join(format!("{stem}_lidarset"));
    let chunks = frame_chunks(0, selected.len(), options.max_chunk);
    if chunks.is_empty() {
        tracing::info!(bag = %bag.display(), %topic, "no frames selected; skipping");
        return Ok(());
    }
    std::fs::create_dir_all(&target)
        .with_context(|| format!("failed to create {}", target.display()))?;
    tracing::info!(
        bag = %bag.display(),
        %topic,
        frames = selected.len(),
        chunks = chunks.len(),
        output = %target.display(),
        "converting"
    );

    // at most one pending chunk per worker
    let (job_tx, job_rx): (Sender<WriteJob>, Receiver<WriteJob>) =
        flume::bounded(options.flush_workers);
    let (result_tx, result_rx): (
        Sender<anyhow::Result<WriteJob>>,
        Receiver<anyhow::Result<WriteJob>>,
    ) = flume::unbounded();
    let workers: Vec<_> = (0..options.flush_workers)
        .map(|_| {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            let format = options.format;
            let stem = stem.clone();
            std::thread::spawn(move || write_worker(rx, tx, format, stem))
        })
        .collect();
    drop(result_tx);

    let pb = if options.show_progress {
        let pb = ProgressBar::new(selected.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} frames {elapsed}") {
            pb.set_style(style);
        }
        Some(pb)
    } else {
        None
    };
    let log_every = std::env::var("LIDARSET_LOG_EVERY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0);

    let mut submitted = 0;
    let mut send_error = None;
    for (chunk, range) in chunks.iter().enumerate() {
        let dataset = selected.slice(range.clone())?;
        let job = WriteJob {
            chunk,
            first_frame: options.start_frame + range.start,
            dataset,
            target: target.join(chunk.to_string()),
        };
        if let Err(e) = job_tx.send(job) {
            send_error = Some(anyhow::anyhow!("writer threads stopped: {e}"));
            break;
        }
        submitted += 1;
    }
    drop(job_tx);

    let mut failures = Vec::new();
    let mut frames_done = 0;
    let mut last_logged = 0;
    for result in result_rx.iter() {
        match result {
            Ok(job) => {
                frames_done += job.dataset.len();
                tracing::debug!(chunk = job.chunk, frames = job.dataset.len(), "chunk written");
                if let Some(pb) = &pb {
                    pb.inc(job.dataset.len() as u64);
                }
                if let Some(every) = log_every
                    && frames_done / every > last_logged / every
                {
                    tracing::info!(frames = frames_done, elapsed = ?started.elapsed(), "progress");
                    last_logged = frames_done;
                }
            }
            Err(e) => {
                tracing::error!("chunk write failed: {e:#}");
                failures.push(e);
            }
        }
    }
    join_workers(workers, &mut failures);
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    if let Some(e) = send_error {
        return Err(e);
    }
    if let Some(first) = failures.into_iter().next() {
        return Err(first.context(format!("converting {}", bag.display())));
    }
    tracing::info!(
        chunks = submitted,
        frames = frames_done,
        elapsed = ?started.elapsed(),
        output = %target.display(),
        "conversion finished"
    );
    Ok(())
}

/// Waits for every writer; a panicked writer lost its chunk and counts as a failure.
fn join_workers(workers: Vec<JoinHandle<()>>, failures: &mut Vec<anyhow::Error>) {
    for (i, worker) in workers.into_iter().enumerate() {
        if worker.join().is_err() {
            tracing::error!(worker = i, "writer thread panicked");
            failures.push(anyhow::anyhow!("writer thread {i} panicked"));
        }
    }
}

fn write_worker(
    rx: Receiver<WriteJob>,
    tx: Sender<anyhow::Result<WriteJob>>,
    format: OutputFormat,
    stem: String,
) {
    while let Ok(job) = rx.recv() {
        let res = (|| -> anyhow::Result<WriteJob> {
            match format {
                OutputFormat::Dir => {
                    job.dataset
                        .to_dir(&job.target, false)
                        .with_context(|| format!("writing chunk {}", job.chunk))?;
                }
                OutputFormat::Csv => {
                    let folder = job
                        .target
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_default();
                    for (k, frame) in job.dataset.iter().enumerate() {
                        let number = job.first_frame + k;
                        let path = folder.join(format!("{stem}_{number}.csv"));
                        frame?
                            .to_csv(&path)
                            .with_context(|| format!("writing {}", path.display()))?;
                    }
                }
            }
            Ok(job)
        })();
        let _ = tx.send(res);
    }
}
