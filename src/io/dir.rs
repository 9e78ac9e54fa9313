//! Native on-disk layout of a dataset.
//!
//! ```text
//! <folder>/meta.json          provenance, timestamps, empty-frame template
//! <folder>/part.0.parquet     one file per frame
//! <folder>/part.1.parquet
//! ...
//! ```
//!
//! Large conversions write numbered chunk folders (`<folder>/0`, `<folder>/1`,
//! ...) which are read back in numeric order and concatenated.
//!
//! A parquet file cannot carry a zero-row table, so an empty frame is stored
//! as a single all-null row with the schema of the first non-empty frame, and
//! `meta.json` records that template. On read, a file holding exactly that
//! row is turned back into an empty table.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{ArrayRef, RecordBatch, new_null_array};
use arrow_schema::{ArrowError, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, Meta};
use crate::error::{Error, Result};
use crate::frame::{format_timestamp, parse_timestamp};
use crate::partition::Partition;
use crate::table::{DataType, PointTable};

pub const META_FILE: &str = "meta.json";

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sidecar {
    orig_file: String,
    #[serde(default)]
    topic: String,
    timestamps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extended: Vec<Meta>,
    /// Column → value of the row standing in for empty frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    empty_data: Option<serde_json::Map<String, serde_json::Value>>,
}

fn part_path(folder: &Path, index: usize) -> PathBuf {
    folder.join(format!("part.{index}.parquet"))
}

fn part_index(name: &str) -> Option<usize> {
    name.strip_prefix("part.")?
        .strip_suffix(".parquet")?
        .parse()
        .ok()
}

fn check_dir(path: &Path) -> Result<()> {
    if path.is_file() || path.extension().is_some() {
        return Err(Error::NotADirectory(path.to_path_buf()));
    }
    Ok(())
}

/// Folder name derived from the source file, or a random one.
fn folder_name(orig_file: &str) -> String {
    match Path::new(orig_file).file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Single all-null row with `schema`.
fn placeholder_batch(schema: &[(String, DataType)]) -> Result<RecordBatch> {
    let fields: Vec<Field> = schema
        .iter()
        .map(|(name, dtype)| Field::new(name, dtype.to_arrow(), true))
        .collect();
    let arrays: Vec<ArrayRef> = schema
        .iter()
        .map(|(_, dtype)| new_null_array(&dtype.to_arrow(), 1))
        .collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

enum Written {
    Rows(Vec<(String, DataType)>),
    Empty(Vec<(String, DataType)>),
}

/// Serializes `dataset` and returns the folder holding `meta.json`.
///
/// Everything is written into a sibling staging folder that is renamed into
/// place once verified. On error the staging folder is removed and the
/// target is left as it was.
pub fn write_dataset(dataset: &Dataset, path: &Path, use_orig_filename: bool) -> Result<PathBuf> {
    check_dir(path)?;
    if dataset.is_empty() {
        return Err(Error::EmptyDataset);
    }
    let folder = if use_orig_filename {
        path.join(folder_name(&dataset.meta().orig_file))
    } else {
        path.to_path_buf()
    };
    // no trailing separator, so the staging folder is a sibling
    let folder: PathBuf = folder.components().collect();
    if folder.is_dir() && fs::read_dir(&folder)?.next().is_some() {
        return Err(Error::TargetExists(folder));
    }

    let staging = staging_path(&folder);
    fs::create_dir_all(&staging)?;
    let staged = write_parts(dataset, &staging).and_then(|()| {
        if folder.is_dir() {
            fs::remove_dir(&folder)?;
        }
        fs::rename(&staging, &folder)?;
        Ok(())
    });
    if let Err(e) = staged {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            tracing::warn!(staging = %staging.display(), "failed to remove staging folder: {cleanup}");
        }
        return Err(e);
    }

    tracing::info!(
        folder = %folder.display(),
        frames = dataset.len(),
        "dataset written"
    );
    Ok(folder)
}

/// `<folder>.tmp-<uuid>`, next to `folder`.
fn staging_path(folder: &Path) -> PathBuf {
    let mut name = folder.as_os_str().to_owned();
    name.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
    PathBuf::from(name)
}

/// Writes part files and `meta.json` into `folder`, then verifies them.
fn write_parts(dataset: &Dataset, folder: &Path) -> Result<()> {
    let outcomes = dataset
        .partitions()
        .par_iter()
        .enumerate()
        .map(|(i, partition)| {
            let table = partition.force()?;
            if table.is_empty() {
                return Ok(Written::Empty(table.schema()));
            }
            write_batch(&part_path(folder, i), &table.to_record_batch()?)?;
            Ok(Written::Rows(table.schema()))
        })
        .collect::<Result<Vec<_>>>()?;

    let template = outcomes.iter().find_map(|o| match o {
        Written::Rows(schema) => Some(schema.clone()),
        Written::Empty(_) => None,
    });
    let mut empty_data = None;
    for (i, outcome) in outcomes.iter().enumerate() {
        if let Written::Empty(own) = outcome {
            let schema = template.as_ref().unwrap_or(own);
            write_batch(&part_path(folder, i), &placeholder_batch(schema)?)?;
            empty_data.get_or_insert_with(|| {
                schema
                    .iter()
                    .map(|(name, _)| (name.clone(), serde_json::Value::Null))
                    .collect()
            });
        }
    }

    let meta = dataset.meta();
    let sidecar = Sidecar {
        orig_file: meta.orig_file.clone(),
        topic: meta.topic.clone().unwrap_or_default(),
        timestamps: dataset.timestamps().iter().map(format_timestamp).collect(),
        extended: meta.extended.clone(),
        empty_data,
    };
    let tmp = folder.join(format!("{META_FILE}.tmp"));
    serde_json::to_writer_pretty(BufWriter::new(File::create(&tmp)?), &sidecar)?;
    fs::rename(&tmp, folder.join(META_FILE))?;

    verify(folder, dataset.len())
}

/// Sorted part files of `folder`; must be exactly `part.0 .. part.{n-1}`.
fn part_files(folder: &Path, expected: usize) -> Result<Vec<PathBuf>> {
    let mut indices = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if let Some(i) = entry.file_name().to_str().and_then(part_index) {
            indices.push(i);
        }
    }
    indices.sort_unstable();
    if indices.len() != expected || indices.iter().enumerate().any(|(k, i)| k != *i) {
        return Err(Error::Incomplete {
            path: folder.to_path_buf(),
            reason: format!(
                "{} timestamp(s) but {} partition file(s)",
                expected,
                indices.len()
            ),
        });
    }
    Ok(indices.into_iter().map(|i| part_path(folder, i)).collect())
}

fn verify(folder: &Path, frames: usize) -> Result<()> {
    if !folder.join(META_FILE).is_file() {
        return Err(Error::Incomplete {
            path: folder.to_path_buf(),
            reason: format!("{META_FILE} is missing"),
        });
    }
    if part_files(folder, frames)?.is_empty() {
        return Err(Error::Incomplete {
            path: folder.to_path_buf(),
            reason: "no partition files".to_string(),
        });
    }
    Ok(())
}

fn read_single(folder: &Path) -> Result<(Vec<Partition>, Vec<chrono::DateTime<chrono::Utc>>, Meta)> {
    let meta_path = folder.join(META_FILE);
    if !meta_path.is_file() {
        return Err(Error::Incomplete {
            path: folder.to_path_buf(),
            reason: format!("{META_FILE} is missing"),
        });
    }
    let sidecar: Sidecar = serde_json::from_reader(BufReader::new(File::open(&meta_path)?))?;
    let timestamps = sidecar
        .timestamps
        .iter()
        .map(|t| parse_timestamp(t))
        .collect::<Result<Vec<_>>>()?;
    let restore_empty = sidecar.empty_data.is_some();
    let data = part_files(folder, timestamps.len())?
        .into_iter()
        .map(|p| Partition::from_file(p, restore_empty))
        .collect();
    let meta = Meta {
        orig_file: sidecar.orig_file,
        topic: (!sidecar.topic.is_empty()).then_some(sidecar.topic),
        extended: sidecar.extended,
    };
    Ok((data, timestamps, meta))
}

fn folder_number(path: &Path) -> Result<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| Error::FolderNumber(path.to_path_buf()))
}

/// Reads a dataset folder, or a folder of numbered chunk folders.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    check_dir(path)?;
    if !path.is_dir() {
        return Err(Error::NotADirectory(path.to_path_buf()));
    }

    let folders = if path.join(META_FILE).is_file() {
        vec![path.to_path_buf()]
    } else {
        let mut numbered = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let p = entry.path();
                numbered.push((folder_number(&p)?, p));
            }
        }
        numbered.sort_by_key(|(n, _)| *n);
        if numbered.is_empty() {
            return Err(Error::Incomplete {
                path: path.to_path_buf(),
                reason: format!("neither {META_FILE} nor numbered chunk folders found"),
            });
        }
        numbered.into_iter().map(|(_, p)| p).collect()
    };

    let mut data = Vec::new();
    let mut timestamps = Vec::new();
    let mut meta = None;
    for folder in &folders {
        let (d, t, m) = read_single(folder)?;
        data.extend(d);
        timestamps.extend(t);
        meta.get_or_insert(m);
    }
    tracing::debug!(path = %path.display(), chunks = folders.len(), frames = data.len(), "dataset read");
    Dataset::new(data, timestamps, meta.unwrap_or_default())
}

fn table_schema(schema: &Schema) -> Result<Vec<(String, DataType)>> {
    schema
        .fields()
        .iter()
        .map(|f| {
            DataType::from_arrow(f.data_type())
                .map(|t| (f.name().clone(), t))
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "column '{}' has unsupported type {}",
                        f.name(),
                        f.data_type()
                    ))
                })
        })
        .collect()
}

fn is_placeholder(batches: &[RecordBatch]) -> bool {
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    rows == 1
        && batches
            .iter()
            .filter(|b| b.num_rows() == 1)
            .all(|b| b.num_columns() > 0 && b.columns().iter().all(|c| c.null_count() == 1))
}

/// Loads one partition file.
pub fn read_partition(path: &Path, restore_empty: bool) -> Result<PointTable> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<RecordBatch>, ArrowError>>()?;

    if batches.is_empty() || (restore_empty && is_placeholder(&batches)) {
        return Ok(PointTable::empty(&table_schema(&schema)?));
    }
    let tables = batches
        .iter()
        .map(PointTable::from_record_batch)
        .collect::<Result<Vec<_>>>()?;
    PointTable::concat(&tables)
}
