//! sensor_msgs/PointCloud2 → PointTable
//!
//! Parses the ROS1 serialization of a `PointCloud2` message and unpacks its
//! self-describing point layout into one typed column per field.

use crate::error::{Error, Result};
use crate::table::{Column, DataType, PointTable};

/// Name of the synthesized per-point identity column.
pub const ORIGINAL_ID: &str = "original_id";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub seq: u32,
    pub stamp_sec: u32,
    pub stamp_nsec: u32,
    pub frame_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

impl PointField {
    pub fn new(name: impl Into<String>, offset: u32, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            offset,
            datatype: datatype.ros_code(),
            count: 1,
        }
    }
}

/// A parsed message; `data` borrows the point buffer from the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud2<'a> {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: &'a [u8],
    pub is_dense: bool,
}

/// Parses a payload and decodes it into a row table.
///
/// With `keep_zeros == false` points whose `x`, `y` and `z` are all exactly
/// zero (no return) are dropped and an `original_id` column holding the
/// pre-drop row position is appended.
pub fn decode_pointcloud2(payload: &[u8], keep_zeros: bool) -> Result<PointTable> {
    let cloud = parse_pointcloud2(payload)?;
    table_from_pointcloud2(&cloud, keep_zeros)
}

pub fn table_from_pointcloud2(cloud: &PointCloud2<'_>, keep_zeros: bool) -> Result<PointTable> {
    let table = read_points(cloud)?;
    if keep_zeros {
        return Ok(table);
    }
    drop_zero_points(table)
}

fn drop_zero_points(table: PointTable) -> Result<PointTable> {
    let (x, y, z) = match (table.column("x"), table.column("y"), table.column("z")) {
        (Some(x), Some(y), Some(z)) => (x, y, z),
        _ => {
            return Err(Error::MissingColumns {
                columns: table.column_names().to_vec(),
            });
        }
    };
    let kept: Vec<usize> = (0..table.num_rows())
        .filter(|&i| !(x.get_f64(i) == 0.0 && y.get_f64(i) == 0.0 && z.get_f64(i) == 0.0))
        .collect();
    let mut out = table.take(&kept);
    out.insert_column(
        ORIGINAL_ID,
        Column::UInt32(kept.iter().map(|&i| i as u32).collect()),
    )?;
    Ok(out)
}

pub fn parse_pointcloud2(payload: &[u8]) -> Result<PointCloud2<'_>> {
    let mut cursor = 0;

    let header = read_header(payload, &mut cursor)?;
    let height = read_u32_le(payload, &mut cursor)?;
    let width = read_u32_le(payload, &mut cursor)?;
    let fields = parse_fields(payload, &mut cursor)?;
    let is_bigendian = read_bool(payload, &mut cursor)?;
    let point_step = read_u32_le(payload, &mut cursor)?;
    let row_step = read_u32_le(payload, &mut cursor)?;

    let data_len = read_u32_le(payload, &mut cursor)? as usize;
    if payload.len() < cursor + data_len {
        return Err(Error::Decode(format!(
            "payload too short for data: need {} bytes, have {}",
            data_len,
            payload.len() - cursor
        )));
    }
    let data = &payload[cursor..cursor + data_len];
    cursor += data_len;

    // Some writers omit the trailing flag.
    let is_dense = if cursor < payload.len() {
        read_bool(payload, &mut cursor)?
    } else {
        false
    };

    Ok(PointCloud2 {
        header,
        height,
        width,
        fields,
        is_bigendian,
        point_step,
        row_step,
        data,
        is_dense,
    })
}

/// Serializes a message the way a ROS1 publisher would.
pub fn encode_pointcloud2(cloud: &PointCloud2<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + cloud.data.len());
    out.extend_from_slice(&cloud.header.seq.to_le_bytes());
    out.extend_from_slice(&cloud.header.stamp_sec.to_le_bytes());
    out.extend_from_slice(&cloud.header.stamp_nsec.to_le_bytes());
    write_string(&mut out, &cloud.header.frame_id);
    out.extend_from_slice(&cloud.height.to_le_bytes());
    out.extend_from_slice(&cloud.width.to_le_bytes());
    out.extend_from_slice(&(cloud.fields.len() as u32).to_le_bytes());
    for field in &cloud.fields {
        write_string(&mut out, &field.name);
        out.extend_from_slice(&field.offset.to_le_bytes());
        out.push(field.datatype);
        out.extend_from_slice(&field.count.to_le_bytes());
    }
    out.push(cloud.is_bigendian as u8);
    out.extend_from_slice(&cloud.point_step.to_le_bytes());
    out.extend_from_slice(&cloud.row_step.to_le_bytes());
    out.extend_from_slice(&(cloud.data.len() as u32).to_le_bytes());
    out.extend_from_slice(cloud.data);
    out.push(cloud.is_dense as u8);
    out
}

/// One unpacked element: the column it feeds and its byte position inside a point.
#[derive(Debug, Clone, PartialEq)]
struct Slot {
    name: String,
    offset: usize,
    dtype: DataType,
}

/// Orders fields by offset, inserting padding for gaps. Returns the slots
/// and the number of bytes one point occupies in the unpack layout.
///
/// Unknown datatype codes are skipped with a warning; the rest of the
/// message still decodes.
fn point_layout(fields: &[PointField]) -> (Vec<Slot>, usize) {
    let mut sorted: Vec<&PointField> = fields.iter().collect();
    sorted.sort_by_key(|f| f.offset);

    let mut slots = Vec::new();
    let mut offset = 0usize;
    for field in sorted {
        let field_offset = field.offset as usize;
        if offset < field_offset {
            offset = field_offset;
        }
        let Some(dtype) = DataType::from_ros(field.datatype) else {
            tracing::warn!(
                field = %field.name,
                datatype = field.datatype,
                "skipping unknown PointField datatype"
            );
            continue;
        };
        for k in 0..field.count as usize {
            let name = if k == 0 {
                field.name.clone()
            } else {
                format!("{}_{}", field.name, k)
            };
            slots.push(Slot {
                name,
                offset,
                dtype,
            });
            offset += dtype.size();
        }
    }
    (slots, offset)
}

/// Rejects strides and sizes the buffer cannot back before anything is allocated.
fn check_layout(cloud: &PointCloud2<'_>, n_points: usize, unpack_size: usize) -> Result<()> {
    let height = cloud.height as usize;
    let width = cloud.width as usize;
    let point_step = cloud.point_step as usize;
    let row_step = cloud.row_step as usize;
    let too_short = || {
        Error::Decode(format!(
            "buffer of {} bytes too short for {}x{} points (point_step {}, row_step {})",
            cloud.data.len(),
            width,
            height,
            point_step,
            row_step
        ))
    };

    if point_step == 0 || point_step < unpack_size {
        return Err(Error::Decode(format!(
            "point_step {point_step} is smaller than the {unpack_size} bytes of the fields"
        )));
    }
    let row_bytes = width.checked_mul(point_step).ok_or_else(too_short)?;
    if height > 1 && row_step < row_bytes {
        return Err(Error::Decode(format!(
            "row_step {row_step} is smaller than width x point_step ({row_bytes})"
        )));
    }
    match n_points.checked_mul(point_step) {
        Some(total) if total <= cloud.data.len() => {}
        _ => return Err(too_short()),
    }
    let last = row_step
        .checked_mul(height - 1)
        .and_then(|r| point_step.checked_mul(width - 1).and_then(|p| r.checked_add(p)))
        .and_then(|start| start.checked_add(unpack_size));
    match last {
        Some(end) if end <= cloud.data.len() => Ok(()),
        _ => Err(too_short()),
    }
}

/// Unpacks every point of the cloud, row by row.
pub fn read_points(cloud: &PointCloud2<'_>) -> Result<PointTable> {
    let (slots, unpack_size) = point_layout(&cloud.fields);
    let height = cloud.height as usize;
    let width = cloud.width as usize;
    let point_step = cloud.point_step as usize;
    let row_step = cloud.row_step as usize;
    let n_points = height.checked_mul(width).ok_or_else(|| {
        Error::Decode(format!("{width}x{height} points overflow"))
    })?;

    if n_points > 0 {
        check_layout(cloud, n_points, unpack_size)?;
    }

    let mut columns: Vec<Column> = slots
        .iter()
        .map(|s| Column::with_capacity(s.dtype, n_points))
        .collect();

    for v in 0..height {
        let mut base = row_step * v;
        for _u in 0..width {
            for (slot, column) in slots.iter().zip(columns.iter_mut()) {
                let start = base + slot.offset;
                column.push_bytes(
                    &cloud.data[start..start + slot.dtype.size()],
                    cloud.is_bigendian,
                );
            }
            base += point_step;
        }
    }

    PointTable::new(slots.into_iter().map(|s| s.name).zip(columns).collect())
}

fn read_header(payload: &[u8], cursor: &mut usize) -> Result<Header> {
    Ok(Header {
        seq: read_u32_le(payload, cursor)?,
        stamp_sec: read_u32_le(payload, cursor)?,
        stamp_nsec: read_u32_le(payload, cursor)?,
        frame_id: read_string(payload, cursor)?,
    })
}

fn parse_fields(payload: &[u8], cursor: &mut usize) -> Result<Vec<PointField>> {
    let len = read_u32_le(payload, cursor)? as usize;
    let mut fields = Vec::with_capacity(len.min(64));
    for _ in 0..len {
        let name = read_string(payload, cursor)?;
        let offset = read_u32_le(payload, cursor)?;
        let datatype = read_u8(payload, cursor)?;
        let count = read_u32_le(payload, cursor)?;
        fields.push(PointField {
            name,
            offset,
            datatype,
            count,
        });
    }
    Ok(fields)
}

fn read_u32_le(payload: &[u8], cursor: &mut usize) -> Result<u32> {
    if *cursor + 4 > payload.len() {
        return Err(Error::Decode("payload too short".into()));
    }
    let val = u32::from_le_bytes([
        payload[*cursor],
        payload[*cursor + 1],
        payload[*cursor + 2],
        payload[*cursor + 3],
    ]);
    *cursor += 4;
    Ok(val)
}

fn read_u8(payload: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor + 1 > payload.len() {
        return Err(Error::Decode("payload too short".into()));
    }
    let val = payload[*cursor];
    *cursor += 1;
    Ok(val)
}

fn read_bool(payload: &[u8], cursor: &mut usize) -> Result<bool> {
    Ok(read_u8(payload, cursor)? != 0)
}

fn read_string(payload: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_u32_le(payload, cursor)? as usize;
    if *cursor + len > payload.len() {
        return Err(Error::Decode("payload too short for string".into()));
    }
    let s = String::from_utf8_lossy(&payload[*cursor..*cursor + len]).to_string();
    *cursor += len;
    Ok(s)
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}
