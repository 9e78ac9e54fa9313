//! Row filters for [`Frame::filter`](crate::frame::Frame::filter).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::table::PointTable;

/// Comparison between a column value and a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
}

impl Relation {
    pub const SUPPORTED: &'static str = "> < >= <= ==";

    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
        }
    }
}

impl FromStr for Relation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "==" => Ok(Self::Eq),
            other => Err(Error::UnknownOperation {
                kind: "relation",
                name: other.to_string(),
                supported: Self::SUPPORTED,
            }),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `dim <relation> value`
    Value {
        dim: String,
        relation: Relation,
        value: f64,
    },
    /// `dim <relation> quantile(dim, q)`, `q` in `[0, 1]`.
    Quantile {
        dim: String,
        relation: Relation,
        quantile: f64,
    },
}

impl Filter {
    pub const SUPPORTED: &'static str = "value quantile";

    pub fn value(dim: impl Into<String>, relation: Relation, value: f64) -> Self {
        Self::Value {
            dim: dim.into(),
            relation,
            value,
        }
    }

    pub fn quantile(dim: impl Into<String>, relation: Relation, quantile: f64) -> Self {
        Self::Quantile {
            dim: dim.into(),
            relation,
            quantile,
        }
    }

    /// Builds a filter from its textual name, e.g. `("value", "x", ">=", 1.0)`.
    pub fn parse(kind: &str, dim: &str, relation: &str, arg: f64) -> Result<Self> {
        let relation = relation.parse()?;
        match kind {
            "value" => Ok(Self::value(dim, relation, arg)),
            "quantile" => Ok(Self::quantile(dim, relation, arg)),
            other => Err(Error::UnknownOperation {
                kind: "filter",
                name: other.to_string(),
                supported: Self::SUPPORTED,
            }),
        }
    }

    /// One entry per row: `true` keeps the row.
    pub fn mask(&self, table: &PointTable) -> Result<Vec<bool>> {
        let (dim, relation, threshold) = match self {
            Self::Value {
                dim,
                relation,
                value,
            } => (dim, *relation, *value),
            Self::Quantile {
                dim,
                relation,
                quantile,
            } => {
                let values = table.require(dim)?.to_f64_vec();
                (dim, *relation, quantile_of(&values, *quantile)?)
            }
        };
        let column = table.require(dim)?;
        Ok((0..column.len())
            .map(|i| relation.holds(column.get_f64(i), threshold))
            .collect())
    }
}

/// Linear interpolation between the closest ranks, ignoring NaN.
pub(crate) fn quantile_of(values: &[f64], q: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&q) {
        return Err(Error::InvalidArgument(format!(
            "quantile must be between 0 and 1, got {}",
            q
        )));
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return Ok(f64::NAN);
    }
    sorted.sort_by(f64::total_cmp);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}
