//! Column-oriented row table with a dynamic, ordered set of typed columns.
//!
//! Decoded frames have no compile-time schema: a lidar driver may publish
//! `x, y, z, intensity, t, reflectivity, ring, noise, range` or just
//! `x, y, z`. A [`PointTable`] stores each column as one homogeneous
//! [`Column`] vector and keeps column order as published.

use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, Float32Array, Float64Array, Int8Array, Int16Array, Int32Array,
    RecordBatch, UInt8Array, UInt16Array, UInt32Array,
};
use arrow_schema::{DataType as ArrowType, Field, Schema};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element types a PointCloud2 field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    /// Maps a `sensor_msgs/PointField` datatype code (1..=8).
    pub fn from_ros(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Int8),
            2 => Some(Self::UInt8),
            3 => Some(Self::Int16),
            4 => Some(Self::UInt16),
            5 => Some(Self::Int32),
            6 => Some(Self::UInt32),
            7 => Some(Self::Float32),
            8 => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn ros_code(self) -> u8 {
        match self {
            Self::Int8 => 1,
            Self::UInt8 => 2,
            Self::Int16 => 3,
            Self::UInt16 => 4,
            Self::Int32 => 5,
            Self::UInt32 => 6,
            Self::Float32 => 7,
            Self::Float64 => 8,
        }
    }

    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn to_arrow(self) -> ArrowType {
        match self {
            Self::Int8 => ArrowType::Int8,
            Self::UInt8 => ArrowType::UInt8,
            Self::Int16 => ArrowType::Int16,
            Self::UInt16 => ArrowType::UInt16,
            Self::Int32 => ArrowType::Int32,
            Self::UInt32 => ArrowType::UInt32,
            Self::Float32 => ArrowType::Float32,
            Self::Float64 => ArrowType::Float64,
        }
    }

    pub fn from_arrow(dtype: &ArrowType) -> Option<Self> {
        match dtype {
            ArrowType::Int8 => Some(Self::Int8),
            ArrowType::UInt8 => Some(Self::UInt8),
            ArrowType::Int16 => Some(Self::Int16),
            ArrowType::UInt16 => Some(Self::UInt16),
            ArrowType::Int32 => Some(Self::Int32),
            ArrowType::UInt32 => Some(Self::UInt32),
            ArrowType::Float32 => Some(Self::Float32),
            ArrowType::Float64 => Some(Self::Float64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

/// Runs `$body` with `$v` bound to the inner vector, whatever the variant.
macro_rules! each_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Int8($v) => $body,
            Column::UInt8($v) => $body,
            Column::Int16($v) => $body,
            Column::UInt16($v) => $body,
            Column::Int32($v) => $body,
            Column::UInt32($v) => $body,
            Column::Float32($v) => $body,
            Column::Float64($v) => $body,
        }
    };
}

/// Like `each_column!`, but wraps the result back into the same variant.
macro_rules! map_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Int8($v) => Column::Int8($body),
            Column::UInt8($v) => Column::UInt8($body),
            Column::Int16($v) => Column::Int16($body),
            Column::UInt16($v) => Column::UInt16($body),
            Column::Int32($v) => Column::Int32($body),
            Column::UInt32($v) => Column::UInt32($body),
            Column::Float32($v) => Column::Float32($body),
            Column::Float64($v) => Column::Float64($body),
        }
    };
}

impl Column {
    pub fn with_capacity(dtype: DataType, capacity: usize) -> Self {
        match dtype {
            DataType::Int8 => Self::Int8(Vec::with_capacity(capacity)),
            DataType::UInt8 => Self::UInt8(Vec::with_capacity(capacity)),
            DataType::Int16 => Self::Int16(Vec::with_capacity(capacity)),
            DataType::UInt16 => Self::UInt16(Vec::with_capacity(capacity)),
            DataType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            DataType::UInt32 => Self::UInt32(Vec::with_capacity(capacity)),
            DataType::Float32 => Self::Float32(Vec::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            Self::Int8(_) => DataType::Int8,
            Self::UInt8(_) => DataType::UInt8,
            Self::Int16(_) => DataType::Int16,
            Self::UInt16(_) => DataType::UInt16,
            Self::Int32(_) => DataType::Int32,
            Self::UInt32(_) => DataType::UInt32,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        each_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `row` widened to `f64`.
    pub fn get_f64(&self, row: usize) -> f64 {
        each_column!(self, v => v[row] as f64)
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        each_column!(self, v => v.iter().map(|x| *x as f64).collect())
    }

    /// Value at `row` in its natural text form (integers without a fraction).
    pub fn value_string(&self, row: usize) -> String {
        each_column!(self, v => v[row].to_string())
    }

    pub fn to_arrow(&self) -> ArrayRef {
        match self {
            Self::Int8(v) => Arc::new(Int8Array::from(v.clone())),
            Self::UInt8(v) => Arc::new(UInt8Array::from(v.clone())),
            Self::Int16(v) => Arc::new(Int16Array::from(v.clone())),
            Self::UInt16(v) => Arc::new(UInt16Array::from(v.clone())),
            Self::Int32(v) => Arc::new(Int32Array::from(v.clone())),
            Self::UInt32(v) => Arc::new(UInt32Array::from(v.clone())),
            Self::Float32(v) => Arc::new(Float32Array::from(v.clone())),
            Self::Float64(v) => Arc::new(Float64Array::from(v.clone())),
        }
    }

    /// Copies a null-free arrow array into a column.
    pub fn from_arrow(name: &str, array: &dyn Array) -> Result<Self> {
        if array.null_count() > 0 {
            return Err(Error::InvalidArgument(format!(
                "column '{}' contains {} null value(s)",
                name,
                array.null_count()
            )));
        }
        macro_rules! copy {
            ($arr:ty, $variant:ident) => {
                array
                    .as_any()
                    .downcast_ref::<$arr>()
                    .map(|a| Column::$variant(a.values().to_vec()))
            };
        }
        let column = match array.data_type() {
            ArrowType::Int8 => copy!(Int8Array, Int8),
            ArrowType::UInt8 => copy!(UInt8Array, UInt8),
            ArrowType::Int16 => copy!(Int16Array, Int16),
            ArrowType::UInt16 => copy!(UInt16Array, UInt16),
            ArrowType::Int32 => copy!(Int32Array, Int32),
            ArrowType::UInt32 => copy!(UInt32Array, UInt32),
            ArrowType::Float32 => copy!(Float32Array, Float32),
            ArrowType::Float64 => copy!(Float64Array, Float64),
            _ => None,
        };
        column.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "column '{}' has unsupported type {}",
                name,
                array.data_type()
            ))
        })
    }

    /// Gathers `indices` into a new column of the same type.
    pub fn take(&self, indices: &[usize]) -> Column {
        map_column!(self, v => indices.iter().map(|&i| v[i]).collect())
    }

    /// Appends `other`; both columns must have the same type.
    pub fn extend_from(&mut self, other: &Column) -> Result<()> {
        match (self, other) {
            (Self::Int8(a), Self::Int8(b)) => a.extend_from_slice(b),
            (Self::UInt8(a), Self::UInt8(b)) => a.extend_from_slice(b),
            (Self::Int16(a), Self::Int16(b)) => a.extend_from_slice(b),
            (Self::UInt16(a), Self::UInt16(b)) => a.extend_from_slice(b),
            (Self::Int32(a), Self::Int32(b)) => a.extend_from_slice(b),
            (Self::UInt32(a), Self::UInt32(b)) => a.extend_from_slice(b),
            (Self::Float32(a), Self::Float32(b)) => a.extend_from_slice(b),
            (Self::Float64(a), Self::Float64(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(Error::InvalidArgument(format!(
                    "cannot append a {:?} column to a {:?} column",
                    b.dtype(),
                    a.dtype()
                )));
            }
        }
        Ok(())
    }

    /// Decodes one element from `bytes` (exactly `dtype().size()` long) and appends it.
    pub(crate) fn push_bytes(&mut self, bytes: &[u8], big_endian: bool) {
        macro_rules! push {
            ($v:ident, $t:ty, $n:expr) => {{
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                $v.push(if big_endian {
                    <$t>::from_be_bytes(raw)
                } else {
                    <$t>::from_le_bytes(raw)
                });
            }};
        }
        match self {
            Self::Int8(v) => push!(v, i8, 1),
            Self::UInt8(v) => push!(v, u8, 1),
            Self::Int16(v) => push!(v, i16, 2),
            Self::UInt16(v) => push!(v, u16, 2),
            Self::Int32(v) => push!(v, i32, 4),
            Self::UInt32(v) => push!(v, u32, 4),
            Self::Float32(v) => push!(v, f32, 4),
            Self::Float64(v) => push!(v, f64, 8),
        }
    }
}

/// An ordered set of equally long, named columns.
///
/// Rows are addressed by position only, so the row index is always the
/// contiguous range `0..num_rows()`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointTable {
    names: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
}

impl PointTable {
    /// Builds a table, rejecting ragged or duplicate columns.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self> {
        let mut table = Self::default();
        for (name, column) in columns {
            table.insert_column(name, column)?;
        }
        Ok(table)
    }

    /// A zero-row table with the given schema.
    pub fn empty(schema: &[(String, DataType)]) -> Self {
        Self {
            names: schema.iter().map(|(n, _)| n.clone()).collect(),
            columns: schema
                .iter()
                .map(|(_, t)| Column::with_capacity(*t, 0))
                .collect(),
            rows: 0,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn schema(&self) -> Vec<(String, DataType)> {
        self.names
            .iter()
            .cloned()
            .zip(self.columns.iter().map(Column::dtype))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    /// Like [`column`](Self::column) but with a descriptive error.
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| Error::UnknownColumn {
            column: name.to_string(),
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// Appends a column. The first column of an empty, column-less table
    /// defines the row count.
    pub fn insert_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(Error::DuplicateColumn { column: name });
        }
        if self.columns.is_empty() {
            self.rows = column.len();
        } else if column.len() != self.rows {
            return Err(Error::ColumnLength {
                column: name,
                len: column.len(),
                expected: self.rows,
            });
        }
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Removes and returns a column.
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let i = self.names.iter().position(|n| n == name)?;
        self.names.remove(i);
        Some(self.columns.remove(i))
    }

    /// Copies the rows at `indices` (in that order) into a new table.
    pub fn take(&self, indices: &[usize]) -> PointTable {
        PointTable {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            rows: indices.len(),
        }
    }

    /// Copies the rows where `mask` is true into a new table.
    pub fn filter_mask(&self, mask: &[bool]) -> Result<PointTable> {
        if mask.len() != self.rows {
            return Err(Error::InvalidArgument(format!(
                "filter mask has {} entries, table has {} rows",
                mask.len(),
                self.rows
            )));
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Ok(self.take(&indices))
    }

    /// One row, every value widened to `f64`.
    pub fn row_f64(&self, row: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c.get_f64(row)).collect()
    }

    pub fn arrow_schema(&self) -> Schema {
        Schema::new(
            self.columns()
                .map(|(name, c)| Field::new(name, c.dtype().to_arrow(), false))
                .collect::<Vec<_>>(),
        )
    }

    /// Tabular adapter: one arrow array per column, same names and order.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let arrays: Vec<ArrayRef> = self.columns.iter().map(Column::to_arrow).collect();
        Ok(RecordBatch::try_new(Arc::new(self.arrow_schema()), arrays)?)
    }

    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        if batch.num_columns() == 0 {
            return Ok(Self::default());
        }
        let columns = schema
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| {
                Column::from_arrow(field.name(), array.as_ref()).map(|c| (field.name().clone(), c))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    /// Stacks tables with identical schemas on top of each other.
    pub fn concat<'a>(tables: impl IntoIterator<Item = &'a PointTable>) -> Result<PointTable> {
        let mut iter = tables.into_iter();
        let Some(first) = iter.next() else {
            return Ok(PointTable::default());
        };
        let mut out = first.clone();
        for table in iter {
            if table.names != out.names {
                return Err(Error::InvalidArgument(format!(
                    "cannot concatenate tables with columns {:?} and {:?}",
                    out.names, table.names
                )));
            }
            for (dst, src) in out.columns.iter_mut().zip(&table.columns) {
                dst.extend_from(src)?;
            }
            out.rows += table.rows;
        }
        Ok(out)
    }
}
