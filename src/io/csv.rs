//! One frame per CSV file, header row with the column names.

use std::path::Path;

use crate::error::Result;
use crate::frame::Frame;
use crate::table::Column;

pub fn write_frame(frame: &Frame, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(frame.column_names())?;
    let columns: Vec<&Column> = frame.data().columns().map(|(_, c)| c).collect();
    for row in 0..frame.len() {
        writer.write_record(columns.iter().map(|c| c.value_string(row)))?;
    }
    writer.flush()?;
    Ok(())
}
