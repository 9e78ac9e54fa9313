//! Distances and per-point differences added to a frame in place.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::mappings::pointcloud::ORIGINAL_ID;
use crate::table::Column;

pub const ORIGIN_COLUMN: &str = "distance to origin";

const DIFFERENCE_SUFFIX: &str = " difference";

#[derive(Debug, Clone, Copy)]
pub enum Diff<'a> {
    /// Euclidean distance of every point to `(0, 0, 0)`.
    Origin,
    /// Euclidean distance of every point to `[x, y, z]`.
    Point([f64; 3]),
    /// Distance to the plane `a x + b y + c z + d = 0`.
    ///
    /// `normal` measures along the plane normal, otherwise along the line
    /// of sight from the origin through the point.
    Plane {
        model: [f64; 4],
        absolute: bool,
        normal: bool,
    },
    /// `self - target` for every column, matched on `original_id`.
    Frame(&'a Frame),
}

impl Diff<'_> {
    pub const SUPPORTED: &'static str = "origin point plane frame";

    pub fn plane(model: [f64; 4]) -> Self {
        Diff::Plane {
            model,
            absolute: true,
            normal: true,
        }
    }

    pub(crate) fn apply(&self, frame: &mut Frame) -> Result<()> {
        match *self {
            Diff::Origin => {
                let d = distances(frame, norm);
                frame.add_column(ORIGIN_COLUMN, Column::Float64(d))?;
            }
            Diff::Point(target) => {
                let d = distances(frame, |p| norm(sub(p, target)));
                frame.add_column(
                    format!("distance to point: {}", format_vector(&target)),
                    Column::Float64(d),
                )?;
            }
            Diff::Plane {
                model,
                absolute,
                normal,
            } => {
                let d = distances(frame, |p| {
                    let d = if normal {
                        normal_distance(p, model)
                    } else {
                        line_of_sight_distance(p, model)
                    };
                    if absolute { d.abs() } else { d }
                });
                frame.add_column(
                    format!("distance to plane: {}", format_vector(&model)),
                    Column::Float64(d),
                )?;
            }
            Diff::Frame(target) => frame_difference(frame, target)?,
        }
        Ok(())
    }
}

fn distances(frame: &Frame, f: impl Fn([f64; 3]) -> f64) -> Vec<f64> {
    frame.to_points().iter().map(|p| f([p.x, p.y, p.z])).collect()
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn normal_distance(p: [f64; 3], m: [f64; 4]) -> f64 {
    (m[0] * p[0] + m[1] * p[1] + m[2] * p[2] + m[3]) / norm([m[0], m[1], m[2]])
}

/// Distance from `p` to where the ray origin→`p` meets the plane.
fn line_of_sight_distance(p: [f64; 3], m: [f64; 4]) -> f64 {
    let t = -m[3] / (p[0] * m[0] + p[1] * m[1] + p[2] * m[2]);
    let hit = [p[0] * t, p[1] * t, p[2] * t];
    norm(sub(hit, p))
}

/// `[1.0000 2.0000 3.0000]`
fn format_vector(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{:.4}", x)).collect();
    format!("[{}]", parts.join(" "))
}

fn frame_difference(frame: &mut Frame, target: &Frame) -> Result<()> {
    if frame
        .column_names()
        .iter()
        .any(|c| c.ends_with(DIFFERENCE_SUFFIX))
    {
        return Err(Error::InvalidArgument(
            "differences of differences are not supported".to_string(),
        ));
    }
    let ids = frame
        .data()
        .column(ORIGINAL_ID)
        .ok_or_else(|| Error::MissingOriginalId("frame does not contain original_id".into()))?
        .to_f64_vec();
    let target_ids = target
        .data()
        .column(ORIGINAL_ID)
        .ok_or_else(|| Error::MissingOriginalId("target does not contain original_id".into()))?;

    let target_rows: HashMap<u64, usize> = (0..target_ids.len())
        .map(|row| (target_ids.get_f64(row) as u64, row))
        .collect();
    let matches: Vec<Option<usize>> = ids
        .iter()
        .map(|id| target_rows.get(&(*id as u64)).copied())
        .collect();
    if matches.iter().all(Option::is_none) {
        return Err(Error::MissingOriginalId(
            "no common original_ids in frame and target".to_string(),
        ));
    }

    let mut new_columns = Vec::new();
    for (name, column) in frame.data().columns() {
        if name == ORIGINAL_ID {
            continue;
        }
        let other = target.data().require(name)?;
        let values = matches
            .iter()
            .enumerate()
            .map(|(row, m)| match m {
                Some(t) => column.get_f64(row) - other.get_f64(*t),
                None => f64::NAN,
            })
            .collect();
        new_columns.push((format!("{name}{DIFFERENCE_SUFFIX}"), Column::Float64(values)));
    }
    for (name, values) in new_columns {
        frame.add_column(name, values)?;
    }
    Ok(())
}
