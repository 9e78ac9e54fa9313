//! Ordered, lazily evaluated sequence of frames.
//!
//! A [`Dataset`] holds one deferred [`Partition`] per frame, the aligned
//! timestamps and shared [`Meta`]. Indexing forces exactly one partition;
//! slicing, time queries, `extend` and `map` never force anything.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{BoundingBox, Frame, format_timestamp};
use crate::io::bag::BagReadOptions;
use crate::partition::{FrameFn, Partition};

/// Provenance of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Source path or description; empty when unknown.
    pub orig_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Metadata of every dataset appended with [`Dataset::extend`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended: Vec<Meta>,
}

impl Meta {
    pub fn new(orig_file: impl Into<String>) -> Self {
        Self {
            orig_file: orig_file.into(),
            ..Self::default()
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    data: Vec<Partition>,
    timestamps: Vec<DateTime<Utc>>,
    meta: Arc<Meta>,
}

impl Dataset {
    pub fn new(data: Vec<Partition>, timestamps: Vec<DateTime<Utc>>, meta: Meta) -> Result<Self> {
        let dataset = Self {
            data,
            timestamps,
            meta: Arc::new(meta),
        };
        dataset.check()?;
        Ok(dataset)
    }

    fn check(&self) -> Result<()> {
        if self.data.len() != self.timestamps.len() {
            return Err(Error::LengthMismatch {
                timestamps: self.timestamps.len(),
                partitions: self.data.len(),
            });
        }
        if !self.is_monotonic() {
            tracing::warn!(
                orig_file = %self.meta.orig_file,
                "timestamps are not monotonic increasing"
            );
        }
        Ok(())
    }

    /// Wraps already materialized frames; timestamps are taken from them.
    pub fn from_frames(frames: Vec<Frame>) -> Result<Self> {
        let timestamps = frames.iter().map(Frame::timestamp).collect();
        let data = frames
            .into_iter()
            .map(|f| Partition::from_table(f.into_data()))
            .collect();
        Self::new(data, timestamps, Meta::new("from frames list"))
    }

    /// Opens a `.bag` file or a serialized dataset directory.
    ///
    /// `options` only apply to bag files.
    pub fn from_file(path: impl AsRef<Path>, options: &BagReadOptions) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("bag") => crate::io::bag::dataset_from_bag(path, options),
            None => crate::io::dir::read_dataset(path),
            Some(ext) => Err(Error::UnsupportedFormat {
                ext: ext.to_string(),
                supported: ".bag, directory".to_string(),
            }),
        }
    }

    /// Serializes into `path`, or into `path/<orig_file stem>` when
    /// `use_orig_filename` is set. Returns the folder written.
    pub fn to_dir(&self, path: impl AsRef<Path>, use_orig_filename: bool) -> Result<PathBuf> {
        crate::io::dir::write_dataset(self, path.as_ref(), use_orig_filename)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_pointclouds(&self) -> bool {
        !self.is_empty()
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.data
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    pub fn duration(&self) -> Option<TimeDelta> {
        Some(self.end_time()? - self.start_time()?)
    }

    pub fn is_monotonic(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] <= w[1])
    }

    /// Materializes frame `index`, forcing only that partition.
    pub fn get(&self, index: usize) -> Result<Frame> {
        let partition = self.data.get(index).ok_or(Error::OutOfRange {
            index,
            len: self.len(),
        })?;
        Frame::new(
            partition.force()?,
            self.timestamps[index],
            self.meta.orig_file.clone(),
        )
    }

    /// Sub-dataset over `range`; nothing is forced and `meta` is shared.
    pub fn slice(&self, range: Range<usize>) -> Result<Dataset> {
        if range.start > range.end || range.end > self.len() {
            return Err(Error::SliceOutOfRange {
                start: range.start,
                end: range.end,
                len: self.len(),
            });
        }
        Ok(Dataset {
            data: self.data[range.clone()].to_vec(),
            timestamps: self.timestamps[range].to_vec(),
            meta: Arc::clone(&self.meta),
        })
    }

    /// Restartable iteration over materialized frames.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            dataset: self,
            next: 0,
        }
    }

    /// Index of the timestamp closest to `time`; ties go to the earlier index.
    pub fn nearest_index(&self, time: DateTime<Utc>) -> Result<usize> {
        let (start, end) = match (self.start_time(), self.end_time()) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(Error::EmptyDataset),
        };
        if time < start || time > end {
            return Err(Error::TimeOutOfRange {
                time: format_timestamp(&time),
                start: format_timestamp(&start),
                end: format_timestamp(&end),
            });
        }
        let mut best = 0;
        let mut best_delta = (self.timestamps[0] - time).abs();
        for (i, ts) in self.timestamps.iter().enumerate().skip(1) {
            let delta = (*ts - time).abs();
            if delta < best_delta {
                best = i;
                best_delta = delta;
            }
        }
        Ok(best)
    }

    /// Frames from the one nearest `start_time` to the one nearest
    /// `end_time`, both included.
    pub fn frames_between(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Dataset> {
        if start_time >= end_time {
            return Err(Error::TimeOrder);
        }
        let start = self.nearest_index(start_time)?;
        let end = self.nearest_index(end_time)? + 1;
        self.slice(start..end)
    }

    /// Appends `other` in place. Its metadata is recorded under
    /// [`Meta::extended`].
    pub fn extend(&mut self, other: &Dataset) -> Result<&mut Self> {
        Arc::make_mut(&mut self.meta)
            .extended
            .push(other.meta.as_ref().clone());
        self.data.extend(other.data.iter().cloned());
        self.timestamps.extend_from_slice(&other.timestamps);
        self.check()?;
        Ok(self)
    }

    /// Lazily applies `f` to every frame. Nothing runs until a frame is forced.
    pub fn map<F>(&self, f: F) -> Dataset
    where
        F: Fn(Frame) -> Result<Frame> + Send + Sync + 'static,
    {
        let f: FrameFn = Arc::new(f);
        let orig_file: Arc<str> = Arc::from(self.meta.orig_file.as_str());
        let data = self
            .data
            .iter()
            .zip(&self.timestamps)
            .map(|(p, ts)| Partition::map(p.clone(), *ts, Arc::clone(&orig_file), Arc::clone(&f)))
            .collect();
        Dataset {
            data,
            timestamps: self.timestamps.clone(),
            meta: Arc::clone(&self.meta),
        }
    }

    /// Forces every frame in parallel and applies `f`; results keep frame order.
    pub fn apply<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(Frame) -> T + Send + Sync,
    {
        (0..self.len())
            .into_par_iter()
            .map(|i| self.get(i).map(&f))
            .collect()
    }

    /// Union of the per-frame bounding boxes; `None` if every frame is empty.
    pub fn bounding_box(&self) -> Result<Option<BoundingBox>> {
        let boxes = self.apply(|frame| frame.bounding_box())?;
        Ok(boxes
            .into_iter()
            .flatten()
            .reduce(|a, b| a.union(&b)))
    }
}

pub struct Iter<'a> {
    dataset: &'a Dataset,
    next: usize,
}

impl Iterator for Iter<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.dataset.len() {
            return None;
        }
        let frame = self.dataset.get(self.next);
        self.next += 1;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.dataset.len() - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Dataset {
    type Item = Result<Frame>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
