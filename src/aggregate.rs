//! Summary statistics over a dataset at three depths.
//!
//! `Point` groups rows of all frames by `original_id`, `Frame` summarizes
//! every frame on its own and `Dataset` collapses the point-level result
//! (or, without `original_id`, all rows of all frames) to a single row.
//!
//! Statistics are accumulated in streaming fashion, one forced partition at
//! a time per worker, and merged in frame order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::mappings::pointcloud::ORIGINAL_ID;
use crate::table::{Column, PointTable};

/// Group size column of point-depth results.
pub const COUNT_COLUMN: &str = "N";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggOp {
    Min,
    Max,
    Sum,
    Mean,
    /// Sample standard deviation (n - 1).
    Std,
    /// Sample variance (n - 1).
    Var,
    Count,
}

impl AggOp {
    pub const SUPPORTED: &'static str = "min max sum mean std var count";

    pub fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Std => "std",
            Self::Var => "var",
            Self::Count => "count",
        }
    }
}

impl FromStr for AggOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "std" => Ok(Self::Std),
            "var" => Ok(Self::Var),
            "count" => Ok(Self::Count),
            other => Err(Error::UnknownOperation {
                kind: "aggregation",
                name: other.to_string(),
                supported: Self::SUPPORTED,
            }),
        }
    }
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Dataset,
    Frame,
    Point,
}

impl FromStr for Depth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dataset" => Ok(Self::Dataset),
            "frame" | "pointcloud" => Ok(Self::Frame),
            "point" => Ok(Self::Point),
            other => Err(Error::UnknownOperation {
                kind: "depth",
                name: other.to_string(),
                supported: "dataset frame point",
            }),
        }
    }
}

/// Which operations to run on which columns.
#[derive(Debug, Clone, PartialEq)]
pub enum AggSpec {
    /// One operation on every column.
    One(AggOp),
    /// Several operations on every column.
    Many(Vec<AggOp>),
    /// Operations per named column.
    PerColumn(Vec<(String, Vec<AggOp>)>),
}

impl From<AggOp> for AggSpec {
    fn from(op: AggOp) -> Self {
        Self::One(op)
    }
}

impl From<Vec<AggOp>> for AggSpec {
    fn from(ops: Vec<AggOp>) -> Self {
        Self::Many(ops)
    }
}

impl AggSpec {
    /// `(column index, column name, op)` triples in output order.
    /// `original_id` only takes part when named explicitly.
    fn resolve(&self, columns: &[String]) -> Result<Vec<(usize, String, AggOp)>> {
        let all = |ops: &[AggOp]| {
            columns
                .iter()
                .enumerate()
                .filter(|(_, name)| name.as_str() != ORIGINAL_ID)
                .flat_map(|(i, name)| ops.iter().map(move |op| (i, name.clone(), *op)))
                .collect::<Vec<_>>()
        };
        match self {
            Self::One(op) => Ok(all(std::slice::from_ref(op))),
            Self::Many(ops) => Ok(all(ops)),
            Self::PerColumn(spec) => {
                let mut out = Vec::new();
                for (name, ops) in spec {
                    let i = columns.iter().position(|c| c == name).ok_or_else(|| {
                        Error::UnknownColumn {
                            column: name.clone(),
                        }
                    })?;
                    out.extend(ops.iter().map(|op| (i, name.clone(), *op)));
                }
                Ok(out)
            }
        }
    }
}

/// Running statistics of one column, NaN values skipped.
#[derive(Debug, Clone, Copy)]
struct Acc {
    n: u64,
    sum: f64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl Default for Acc {
    fn default() -> Self {
        Self {
            n: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            m2: 0.0,
        }
    }
}

impl Acc {
    fn push(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        self.n += 1;
        self.sum += x;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn merge(&mut self, other: &Acc) {
        if other.n == 0 {
            return;
        }
        if self.n == 0 {
            *self = *other;
            return;
        }
        let n = self.n + other.n;
        let delta = other.mean - self.mean;
        self.mean += delta * other.n as f64 / n as f64;
        self.m2 += other.m2 + delta * delta * (self.n as f64 * other.n as f64) / n as f64;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.n = n;
    }

    fn finish(&self, op: AggOp) -> f64 {
        let var = || {
            if self.n < 2 {
                f64::NAN
            } else {
                self.m2 / (self.n - 1) as f64
            }
        };
        match op {
            AggOp::Count => self.n as f64,
            AggOp::Sum => self.sum,
            _ if self.n == 0 => f64::NAN,
            AggOp::Min => self.min,
            AggOp::Max => self.max,
            AggOp::Mean => self.mean,
            AggOp::Var => var(),
            AggOp::Std => var().sqrt(),
        }
    }
}

fn push_row(cols: &[&Column], targets: &[usize], row: usize, accs: &mut [Acc]) {
    for (acc, &c) in accs.iter_mut().zip(targets) {
        acc.push(cols[c].get_f64(row));
    }
}

/// Statistics of the `targets` columns over every row of `table`.
fn accumulate_table(table: &PointTable, targets: &[usize]) -> Vec<Acc> {
    let cols: Vec<&Column> = table.columns().map(|(_, c)| c).collect();
    let mut accs = vec![Acc::default(); targets.len()];
    for row in 0..table.num_rows() {
        push_row(&cols, targets, row, &mut accs);
    }
    accs
}

/// Result of [`Dataset::aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// One row per `original_id`, sorted by id, with `N` and `original_id` columns.
    Point(PointTable),
    /// One row per frame plus the aligned frame timestamps.
    Frame {
        table: PointTable,
        timestamps: Vec<DateTime<Utc>>,
    },
    /// `("<column> <op>", value)` pairs.
    Dataset(Vec<(String, f64)>),
}

impl Aggregation {
    pub fn table(&self) -> Option<&PointTable> {
        match self {
            Self::Point(t) | Self::Frame { table: t, .. } => Some(t),
            Self::Dataset(_) => None,
        }
    }

    /// Looks up a dataset-depth value by label.
    pub fn value(&self, label: &str) -> Option<f64> {
        match self {
            Self::Dataset(values) => values.iter().find(|(l, _)| l == label).map(|(_, v)| *v),
            _ => None,
        }
    }
}

impl Dataset {
    fn check_schema(index: usize, expected: &[String], table: &PointTable) -> Result<()> {
        if table.column_names() != expected {
            return Err(Error::SchemaMismatch {
                index,
                expected: expected.to_vec(),
                found: table.column_names().to_vec(),
            });
        }
        Ok(())
    }

    /// Folds the already forced first frame, then forces and folds the
    /// others in parallel. Every frame must have the first frame's columns.
    fn fold_partitions<T, F>(&self, first: &PointTable, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&PointTable) -> Result<T> + Send + Sync,
    {
        let schema = first.column_names();
        let head = f(first)?;
        let rest = self.partitions()[1..]
            .par_iter()
            .enumerate()
            .map(|(i, p)| {
                let table = p.force()?;
                Self::check_schema(i + 1, schema, &table)?;
                f(&table)
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(std::iter::once(head).chain(rest).collect())
    }

    fn has_original_id_column(schema: &[String]) -> bool {
        schema.iter().any(|c| c == ORIGINAL_ID)
    }

    pub fn aggregate(&self, spec: impl Into<AggSpec>, depth: Depth) -> Result<Aggregation> {
        let spec = spec.into();
        let first = self
            .partitions()
            .first()
            .ok_or(Error::EmptyDataset)?
            .force()?;
        match depth {
            Depth::Point => Ok(Aggregation::Point(self.aggregate_points(&spec, &first)?)),
            Depth::Frame => self.aggregate_frames(&spec, &first),
            Depth::Dataset => self.aggregate_dataset(&spec, &first),
        }
    }

    fn aggregate_points(&self, spec: &AggSpec, first: &PointTable) -> Result<PointTable> {
        let schema = first.column_names();
        if !Self::has_original_id_column(schema) {
            return Err(Error::MissingOriginalId(
                "point depth aggregation needs an original_id column; decode with keep_zeros = false"
                    .to_string(),
            ));
        }
        let targets = spec.resolve(schema)?;
        let columns: Vec<usize> = targets.iter().map(|(i, _, _)| *i).collect();
        let id_index = schema
            .iter()
            .position(|c| c == ORIGINAL_ID)
            .ok_or_else(|| Error::MissingOriginalId(ORIGINAL_ID.to_string()))?;

        let per_partition = self.fold_partitions(first, |table| {
            let cols: Vec<&Column> = table.columns().map(|(_, c)| c).collect();
            let ids = cols[id_index];
            let mut groups: BTreeMap<u64, (u64, Vec<Acc>)> = BTreeMap::new();
            for row in 0..table.num_rows() {
                let entry = groups
                    .entry(ids.get_f64(row) as u64)
                    .or_insert_with(|| (0, vec![Acc::default(); columns.len()]));
                entry.0 += 1;
                push_row(&cols, &columns, row, &mut entry.1);
            }
            Ok(groups)
        })?;

        let mut groups: BTreeMap<u64, (u64, Vec<Acc>)> = BTreeMap::new();
        for partition in per_partition {
            for (id, (n, accs)) in partition {
                match groups.get_mut(&id) {
                    Some((total, merged)) => {
                        *total += n;
                        for (m, a) in merged.iter_mut().zip(&accs) {
                            m.merge(a);
                        }
                    }
                    None => {
                        groups.insert(id, (n, accs));
                    }
                }
            }
        }

        let mut out: Vec<(String, Column)> = targets
            .iter()
            .enumerate()
            .map(|(k, (_, name, op))| {
                let values = groups.values().map(|(_, accs)| accs[k].finish(*op)).collect();
                (format!("{name} {op}"), Column::Float64(values))
            })
            .collect();
        out.push((
            COUNT_COLUMN.to_string(),
            Column::UInt32(groups.values().map(|(n, _)| *n as u32).collect()),
        ));
        out.push((
            ORIGINAL_ID.to_string(),
            Column::UInt32(groups.keys().map(|id| *id as u32).collect()),
        ));
        PointTable::new(out)
    }

    fn aggregate_frames(&self, spec: &AggSpec, first: &PointTable) -> Result<Aggregation> {
        let targets = spec.resolve(first.column_names())?;
        let columns: Vec<usize> = targets.iter().map(|(i, _, _)| *i).collect();
        let rows = self.fold_partitions(first, |table| Ok(accumulate_table(table, &columns)))?;
        let table = PointTable::new(
            targets
                .iter()
                .enumerate()
                .map(|(k, (_, name, op))| {
                    let values = rows.iter().map(|accs| accs[k].finish(*op)).collect();
                    (format!("{name} {op}"), Column::Float64(values))
                })
                .collect(),
        )?;
        Ok(Aggregation::Frame {
            table,
            timestamps: self.timestamps().to_vec(),
        })
    }

    fn aggregate_dataset(&self, spec: &AggSpec, first: &PointTable) -> Result<Aggregation> {
        let schema = first.column_names();
        if Self::has_original_id_column(schema) {
            // collapse the point-level result with the same operation
            let points = self.aggregate_points(spec, first)?;
            let targets = spec.resolve(schema)?;
            let values = targets
                .iter()
                .map(|(_, name, op)| {
                    let label = format!("{name} {op}");
                    let mut acc = Acc::default();
                    for v in points.require(&label)?.to_f64_vec() {
                        acc.push(v);
                    }
                    Ok((label, acc.finish(*op)))
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Aggregation::Dataset(values));
        }

        let targets = spec.resolve(schema)?;
        let columns: Vec<usize> = targets.iter().map(|(i, _, _)| *i).collect();
        let partials = self.fold_partitions(first, |table| Ok(accumulate_table(table, &columns)))?;
        let mut total = vec![Acc::default(); columns.len()];
        for accs in &partials {
            for (t, a) in total.iter_mut().zip(accs) {
                t.merge(a);
            }
        }
        Ok(Aggregation::Dataset(
            targets
                .iter()
                .zip(&total)
                .map(|((_, name, op), acc)| (format!("{name} {op}"), acc.finish(*op)))
                .collect(),
        ))
    }

    pub fn min(&self, depth: Depth) -> Result<Aggregation> {
        self.aggregate(AggOp::Min, depth)
    }

    pub fn max(&self, depth: Depth) -> Result<Aggregation> {
        self.aggregate(AggOp::Max, depth)
    }

    pub fn mean(&self, depth: Depth) -> Result<Aggregation> {
        self.aggregate(AggOp::Mean, depth)
    }

    pub fn std(&self, depth: Depth) -> Result<Aggregation> {
        self.aggregate(AggOp::Std, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_parse_fail_fast() {
        assert_eq!("std".parse::<AggOp>().unwrap(), AggOp::Std);
        assert!(matches!(
            "median".parse::<AggOp>(),
            Err(Error::UnknownOperation { .. })
        ));
        assert_eq!("pointcloud".parse::<Depth>().unwrap(), Depth::Frame);
        assert!("row".parse::<Depth>().is_err());
    }

    #[test]
    fn accumulator_matches_direct_computation() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut whole = Acc::default();
        values.iter().for_each(|v| whole.push(*v));
        let mut a = Acc::default();
        let mut b = Acc::default();
        values[..3].iter().for_each(|v| a.push(*v));
        values[3..].iter().for_each(|v| b.push(*v));
        a.merge(&b);

        for acc in [whole, a] {
            assert_eq!(acc.finish(AggOp::Mean), 5.0);
            assert_eq!(acc.finish(AggOp::Sum), 40.0);
            assert_eq!(acc.finish(AggOp::Count), 8.0);
            assert!((acc.finish(AggOp::Var) - 32.0 / 7.0).abs() < 1e-12);
        }
    }

    #[test]
    fn nan_is_skipped_and_small_groups_have_no_std() {
        let mut acc = Acc::default();
        acc.push(f64::NAN);
        acc.push(3.0);
        assert_eq!(acc.finish(AggOp::Count), 1.0);
        assert_eq!(acc.finish(AggOp::Min), 3.0);
        assert!(acc.finish(AggOp::Std).is_nan());
        assert!(Acc::default().finish(AggOp::Max).is_nan());
    }

    #[test]
    fn per_column_spec_checks_names() {
        let columns = vec!["x".to_string(), "original_id".to_string()];
        let spec = AggSpec::PerColumn(vec![("x".into(), vec![AggOp::Min, AggOp::Max])]);
        assert_eq!(spec.resolve(&columns).unwrap().len(), 2);
        let bad = AggSpec::PerColumn(vec![("range".into(), vec![AggOp::Min])]);
        assert!(bad.resolve(&columns).is_err());
        assert_eq!(AggSpec::One(AggOp::Sum).resolve(&columns).unwrap().len(), 1);
    }

    #[test]
    fn every_frame_is_forced_once() {
        use crate::frame::Frame;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let frames = (0..3)
            .map(|i| {
                let table = PointTable::new(vec![
                    ("x".into(), Column::Float32(vec![i as f32, 1.0])),
                    ("y".into(), Column::Float32(vec![0.0, 0.0])),
                    ("z".into(), Column::Float32(vec![0.0, 0.0])),
                    (ORIGINAL_ID.into(), Column::UInt32(vec![0, 1])),
                ])
                .unwrap();
                Frame::from_data(table).unwrap()
            })
            .collect();
        let forced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&forced);
        let ds = Dataset::from_frames(frames).unwrap().map(move |f| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(f)
        });

        for depth in [Depth::Point, Depth::Frame] {
            forced.store(0, Ordering::SeqCst);
            ds.aggregate(AggOp::Max, depth).unwrap();
            assert_eq!(forced.load(Ordering::SeqCst), 3, "{depth:?}");
        }
        forced.store(0, Ordering::SeqCst);
        let whole = ds.aggregate(AggOp::Max, Depth::Dataset).unwrap();
        assert_eq!(whole.value("x max"), Some(2.0));
        assert_eq!(forced.load(Ordering::SeqCst), 3);
    }
}
