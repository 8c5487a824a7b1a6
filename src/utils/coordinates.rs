// Text formats for the coordinate files handed between stages
//
// Detection writes `x1,y1,x2,y2,x3,y3,x4,y4` lines; extraction appends a
// free-text field that may itself contain commas.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::core::errors::CoordinateError;
use crate::core::types::{CoordinateRecord, QuadBox};

pub fn format_box_line(quad: &QuadBox) -> String {
    quad.to_flat()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn format_record_line(quad: &QuadBox, text: &str) -> String {
    format!("{},{}", format_box_line(quad), text)
}

fn parse_field(line_no: usize, field: usize, raw: &str) -> Result<i32, CoordinateError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        // Numbers may be written as floats; they are truncated like int(float(x))
        .map(|v| v.trunc() as i32)
        .ok_or_else(|| CoordinateError::InvalidNumber {
            line: line_no,
            field,
            value: trimmed.to_string(),
        })
}

/// Parse the first 8 numeric fields of a line; anything after them is ignored.
pub fn parse_box_line(line_no: usize, line: &str) -> Result<QuadBox, CoordinateError> {
    let fields: Vec<&str> = line.splitn(9, ',').collect();
    if fields.len() < 8 {
        return Err(CoordinateError::TooFewFields {
            line: line_no,
            found: fields.len(),
        });
    }
    let mut coords = [0i32; 8];
    for (i, raw) in fields.iter().take(8).enumerate() {
        coords[i] = parse_field(line_no, i, raw)?;
    }
    Ok(QuadBox::from_flat(coords))
}

/// Parse an annotated line: 8 numeric fields, then everything after the 8th
/// comma is the text (commas included).
pub fn parse_record_line(line_no: usize, line: &str) -> Result<CoordinateRecord, CoordinateError> {
    let fields: Vec<&str> = line.splitn(9, ',').collect();
    if fields.len() < 8 {
        return Err(CoordinateError::TooFewFields {
            line: line_no,
            found: fields.len(),
        });
    }
    if fields.len() < 9 {
        return Err(CoordinateError::MissingText { line: line_no });
    }
    let quad = parse_box_line(line_no, line)?;
    Ok(CoordinateRecord {
        quad,
        text: Some(fields[8].to_string()),
    })
}

/// Read a detection file. Lines without a comma (blank or otherwise) are
/// skipped; malformed lines with commas are errors.
pub fn read_boxes(path: &Path) -> Result<Vec<QuadBox>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read coordinates file {}", path.display()))?;
    let mut boxes = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if !line.contains(',') {
            continue;
        }
        let quad = parse_box_line(i + 1, line)
            .with_context(|| format!("Malformed coordinates in {}", path.display()))?;
        boxes.push(quad);
    }
    Ok(boxes)
}

pub fn write_boxes(path: &Path, boxes: &[QuadBox]) -> Result<()> {
    let mut content = String::new();
    for quad in boxes {
        content.push_str(&format_box_line(quad));
        content.push('\n');
    }
    fs::write(path, content)
        .with_context(|| format!("Failed to write coordinates file {}", path.display()))
}

/// Read an annotated coordinates file, in file order.
pub fn read_records(path: &Path) -> Result<Vec<CoordinateRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read annotated file {}", path.display()))?;
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record_line(i + 1, line)
            .with_context(|| format!("Malformed annotated line in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_records(path: &Path, records: &[(QuadBox, String)]) -> Result<()> {
    let mut content = String::new();
    for (quad, text) in records {
        content.push_str(&format_record_line(quad, text));
        content.push('\n');
    }
    fs::write(path, content)
        .with_context(|| format!("Failed to write annotated file {}", path.display()))
}
