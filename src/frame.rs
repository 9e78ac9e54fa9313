//! A single decoded point cloud with its timestamp and provenance.
//!
//! Operations come in two flavours:
//!
//! - **copying** ([`Frame::filter`], [`Frame::limit`], [`Frame::apply_filter`])
//!   always return a new `Frame` with freshly gathered column data;
//! - **in place** ([`Frame::diff`], [`Frame::add_column`]) only ever add
//!   columns, never drop or reorder rows, and return `&mut Self`.

use std::path::Path;

use arrow_array::RecordBatch;
use chrono::{DateTime, NaiveDateTime, Utc};
use nalgebra::Point3;

use crate::diff::Diff;
use crate::error::{Error, Result};
use crate::filter::{Filter, Relation};
use crate::mappings::pointcloud::ORIGINAL_ID;
use crate::table::{Column, DataType, PointTable};

/// Text form of timestamps in `meta.json` and log output.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses [`TIMESTAMP_FORMAT`] (any number of fractional digits) as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|source| Error::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Axis aligned bounds of the `x, y, z` coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let mut out = *self;
        for k in 0..3 {
            out.min[k] = out.min[k].min(other.min[k]);
            out.max[k] = out.max[k].max(other.max[k]);
        }
        out
    }
}

/// Rows selected by [`Frame::apply_filter`].
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Mask(&'a [bool]),
    Indices(&'a [usize]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: PointTable,
    timestamp: DateTime<Utc>,
    orig_file: String,
}

impl Frame {
    /// Wraps a table; `x`, `y` and `z` must all be present.
    pub fn new(
        data: PointTable,
        timestamp: DateTime<Utc>,
        orig_file: impl Into<String>,
    ) -> Result<Self> {
        if !["x", "y", "z"].iter().all(|c| data.has_column(c)) {
            return Err(Error::MissingColumns {
                columns: data.column_names().to_vec(),
            });
        }
        Ok(Self {
            data,
            timestamp,
            orig_file: orig_file.into(),
        })
    }

    /// A frame stamped with the current time and no provenance.
    pub fn from_data(data: PointTable) -> Result<Self> {
        Self::new(data, Utc::now(), "")
    }

    /// Zero points with the given column layout.
    pub fn empty(schema: &[(String, DataType)]) -> Result<Self> {
        Self::from_data(PointTable::empty(schema))
    }

    pub fn data(&self) -> &PointTable {
        &self.data
    }

    pub fn into_data(self) -> PointTable {
        self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn timestamp_str(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    pub fn orig_file(&self) -> &str {
        &self.orig_file
    }

    pub fn len(&self) -> usize {
        self.data.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        self.data.column_names()
    }

    pub fn has_original_id(&self) -> bool {
        self.data.has_column(ORIGINAL_ID)
    }

    pub fn contains_original_id(&self, id: u64) -> bool {
        self.data
            .column(ORIGINAL_ID)
            .is_some_and(|c| (0..c.len()).any(|i| c.get_f64(i) as u64 == id))
    }

    fn row_of_original_id(&self, id: u64) -> Result<usize> {
        let ids = self.data.column(ORIGINAL_ID).ok_or_else(|| {
            Error::MissingOriginalId("frame has no original_id column".to_string())
        })?;
        let mut rows = (0..ids.len()).filter(|&i| ids.get_f64(i) as u64 == id);
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            (None, _) => Err(Error::PointNotFound { id }),
            (Some(_), Some(_)) => Err(Error::Decode(format!(
                "original_id {} occurs more than once",
                id
            ))),
        }
    }

    /// Copies a single point, addressed by row or by `original_id`.
    pub fn extract_point(&self, id: u64, use_original_id: bool) -> Result<PointTable> {
        let row = if use_original_id {
            self.row_of_original_id(id)?
        } else {
            let row = id as usize;
            if row >= self.len() {
                return Err(Error::OutOfRange {
                    index: row,
                    len: self.len(),
                });
            }
            row
        };
        Ok(self.data.take(&[row]))
    }

    fn xyz(&self) -> [Vec<f64>; 3] {
        ["x", "y", "z"].map(|c| {
            self.data
                .column(c)
                .map(Column::to_f64_vec)
                .unwrap_or_default()
        })
    }

    /// `None` for a frame without points.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        if self.is_empty() {
            return None;
        }
        let xyz = self.xyz();
        let mut bb = BoundingBox {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        };
        for (k, values) in xyz.iter().enumerate() {
            for v in values {
                bb.min[k] = bb.min[k].min(*v);
                bb.max[k] = bb.max[k].max(*v);
            }
        }
        Some(bb)
    }

    pub fn centroid(&self) -> Option<[f64; 3]> {
        if self.is_empty() {
            return None;
        }
        let n = self.len() as f64;
        Some(self.xyz().map(|values| values.iter().sum::<f64>() / n))
    }

    fn with_data(&self, data: PointTable) -> Frame {
        Frame {
            data,
            timestamp: self.timestamp,
            orig_file: self.orig_file.clone(),
        }
    }

    /// Copy of the frame keeping only the rows matching `filter`.
    pub fn filter(&self, filter: &Filter) -> Result<Frame> {
        let mask = filter.mask(&self.data)?;
        self.apply_filter(Selection::Mask(&mask))
    }

    /// Keeps rows with `min <= dim <= max`.
    pub fn limit(&self, dim: &str, min: f64, max: f64) -> Result<Frame> {
        if max < min {
            return Err(Error::InvalidArgument(
                "maxvalue must be greater than minvalue".to_string(),
            ));
        }
        self.filter(&Filter::value(dim, Relation::Ge, min))?
            .filter(&Filter::value(dim, Relation::Le, max))
    }

    /// Copy of the frame with the selected rows, re-indexed from zero.
    pub fn apply_filter(&self, selection: Selection<'_>) -> Result<Frame> {
        let data = match selection {
            Selection::Mask(mask) => self.data.filter_mask(mask)?,
            Selection::Indices(indices) => {
                if let Some(&bad) = indices.iter().find(|&&i| i >= self.len()) {
                    return Err(Error::OutOfRange {
                        index: bad,
                        len: self.len(),
                    });
                }
                self.data.take(indices)
            }
        };
        Ok(self.with_data(data))
    }

    /// Adds the distance or difference columns described by `diff`.
    pub fn diff(&mut self, diff: &Diff<'_>) -> Result<&mut Self> {
        diff.apply(self)?;
        Ok(self)
    }

    pub fn add_column(&mut self, name: impl Into<String>, values: Column) -> Result<&mut Self> {
        self.data.insert_column(name, values)?;
        Ok(self)
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        self.data.to_record_batch()
    }

    pub fn from_record_batch(
        batch: &RecordBatch,
        timestamp: DateTime<Utc>,
        orig_file: impl Into<String>,
    ) -> Result<Frame> {
        Frame::new(PointTable::from_record_batch(batch)?, timestamp, orig_file)
    }

    /// Coordinates as geometry points; other columns are not carried.
    pub fn to_points(&self) -> Vec<Point3<f64>> {
        let [x, y, z] = self.xyz();
        x.into_iter()
            .zip(y)
            .zip(z)
            .map(|((x, y), z)| Point3::new(x, y, z))
            .collect()
    }

    pub fn from_points(
        points: &[Point3<f64>],
        timestamp: DateTime<Utc>,
        orig_file: impl Into<String>,
    ) -> Result<Frame> {
        let data = PointTable::new(vec![
            ("x".into(), Column::Float64(points.iter().map(|p| p.x).collect())),
            ("y".into(), Column::Float64(points.iter().map(|p| p.y).collect())),
            ("z".into(), Column::Float64(points.iter().map(|p| p.z).collect())),
        ])?;
        Frame::new(data, timestamp, orig_file)
    }

    pub fn to_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::io::csv::write_frame(self, path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        let data = PointTable::new(vec![
            ("x".into(), Column::Float32(vec![1.0, 2.0, 3.0, 4.0])),
            ("y".into(), Column::Float32(vec![0.0, 1.0, 0.0, 1.0])),
            ("z".into(), Column::Float32(vec![-1.0, 0.0, 1.0, 2.0])),
            ("intensity".into(), Column::UInt16(vec![10, 20, 30, 40])),
            (ORIGINAL_ID.into(), Column::UInt32(vec![3, 5, 7, 9])),
        ])
        .unwrap();
        Frame::new(data, parse_timestamp("2020-01-01 12:00:00.250000").unwrap(), "a.bag").unwrap()
    }

    #[test]
    fn requires_xyz() {
        let data = PointTable::new(vec![("x".into(), Column::Float32(vec![1.0]))]).unwrap();
        assert!(matches!(
            Frame::from_data(data),
            Err(Error::MissingColumns { .. })
        ));
    }

    #[test]
    fn timestamp_text_round_trip() {
        let frame = sample();
        assert_eq!(frame.timestamp_str(), "2020-01-01 12:00:00.250000");
        assert_eq!(parse_timestamp(&frame.timestamp_str()).unwrap(), frame.timestamp());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn limit_copies_and_reindexes() {
        let frame = sample();
        let limited = frame.limit("x", 2.0, 3.0).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited.data().row_f64(0)[0], 2.0);
        assert_eq!(frame.len(), 4);
        assert_eq!(limited.timestamp(), frame.timestamp());
        assert!(frame.limit("x", 3.0, 2.0).is_err());
    }

    #[test]
    fn apply_filter_by_indices() {
        let frame = sample();
        let picked = frame.apply_filter(Selection::Indices(&[3, 1])).unwrap();
        assert_eq!(
            picked.data().column(ORIGINAL_ID).unwrap(),
            &Column::UInt32(vec![9, 5])
        );
        assert!(frame.apply_filter(Selection::Indices(&[4])).is_err());
    }

    #[test]
    fn extract_point_by_row_and_id() {
        let frame = sample();
        let by_row = frame.extract_point(1, false).unwrap();
        let by_id = frame.extract_point(5, true).unwrap();
        assert_eq!(by_row, by_id);
        assert!(matches!(
            frame.extract_point(4, true),
            Err(Error::PointNotFound { id: 4 })
        ));
        assert!(frame.extract_point(10, false).is_err());
        assert!(frame.contains_original_id(9));
        assert!(!frame.contains_original_id(2));
    }

    #[test]
    fn bounding_box_and_centroid() {
        let frame = sample();
        let bb = frame.bounding_box().unwrap();
        assert_eq!(bb.min, [1.0, 0.0, -1.0]);
        assert_eq!(bb.max, [4.0, 1.0, 2.0]);
        assert_eq!(frame.centroid().unwrap(), [2.5, 0.5, 0.5]);

        let empty = Frame::empty(&frame.data().schema()).unwrap();
        assert!(empty.bounding_box().is_none());
        assert!(empty.centroid().is_none());
    }

    #[test]
    fn add_column_is_in_place() {
        let mut frame = sample();
        frame
            .add_column("label", Column::UInt8(vec![0, 1, 0, 1]))
            .unwrap();
        assert!(frame.data().has_column("label"));
        assert!(frame.add_column("bad", Column::UInt8(vec![1])).is_err());
    }

    #[test]
    fn record_batch_adapter_is_lossless() {
        let frame = sample();
        let batch = frame.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 4);
        let back = Frame::from_record_batch(&batch, frame.timestamp(), "a.bag").unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn points_adapter_keeps_coordinates() {
        let frame = sample();
        let points = frame.to_points();
        assert_eq!(points[2], Point3::new(3.0, 0.0, 1.0));
        let back = Frame::from_points(&points, frame.timestamp(), "").unwrap();
        assert_eq!(back.column_names(), ["x", "y", "z"]);
        assert_eq!(back.bounding_box(), frame.bounding_box());
    }
}
