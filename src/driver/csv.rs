//! CSV driver.
//!
//! Rules:
//!
//! - CSV must have headers.
//! - The layer is named after the file stem.
//! - Each value is typed by parsing (integer, float, `true`/`false`, else text); column types are
//!   the narrowest type that fits every non-empty value.

use std::path::Path;

use super::{RawField, TableDataset, TableLayer, TypeInference, VectorDataset, VectorDriver};
use crate::types::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvDriver;

impl VectorDriver for CsvDriver {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn open(&self, path: &Path) -> Option<Box<dyn VectorDataset>> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut rdr = match ::csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "csv open failed");
                return None;
            }
        };
        match layer_from_reader(&name, &mut rdr) {
            Ok(layer) => Some(Box::new(TableDataset {
                layers: vec![layer],
            })),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "csv parse failed");
                None
            }
        }
    }
}

/// Read a whole CSV document into one layer.
pub fn layer_from_reader<R: std::io::Read>(
    name: &str,
    rdr: &mut ::csv::Reader<R>,
) -> Result<TableLayer, ::csv::Error> {
    let headers = rdr.headers()?.clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(::csv::Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "csv has no header row",
        )));
    }

    let mut inference = vec![TypeInference::default(); headers.len()];
    let mut rows: Vec<Vec<Value>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let mut row: Vec<Value> = Vec::with_capacity(headers.len());
        for (idx, infer) in inference.iter_mut().enumerate() {
            let value = parse_value(record.get(idx).unwrap_or(""));
            infer.observe_value(&value);
            row.push(value);
        }
        rows.push(row);
    }

    let fields = headers
        .iter()
        .zip(inference)
        .enumerate()
        .map(|(idx, (h, t))| {
            let h = h.trim();
            let name = if h.is_empty() {
                format!("field_{}", idx + 1)
            } else {
                h.to_string()
            };
            RawField::new(name, t.finish())
        })
        .collect();

    Ok(TableLayer::new(name, fields, rows))
}

fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int64(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::Float64(f);
        }
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Utf8(trimmed.to_owned()),
    }
}
