//! Workbook driver backed by `calamine`.
//!
//! Behavior:
//! - Every sheet with at least one non-empty row is a layer named after the sheet
//! - The first non-empty row is the header row; blank headers become `field_<n>`
//! - Remaining non-empty rows are features
//! - Field types are inferred from the cells of each column

use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};

use super::{RawField, TableDataset, TableLayer, TypeInference, VectorDataset, VectorDriver};
use crate::types::{DataType, Value};

/// Opens `.xlsx`, `.xlsm`, `.xlsb`, `.ods` and `.xls` workbooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpreadsheetDriver;

impl VectorDriver for SpreadsheetDriver {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    fn open(&self, path: &Path) -> Option<Box<dyn VectorDataset>> {
        let mut workbook = match open_workbook_auto(path) {
            Ok(wb) => wb,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "workbook open failed");
                return None;
            }
        };

        let mut layers = Vec::new();
        for sheet in workbook.sheet_names().to_vec() {
            let range = match workbook.worksheet_range(&sheet) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(path = %path.display(), %sheet, error = %e, "skipping unreadable sheet");
                    continue;
                }
            };
            if let Some(layer) = layer_from_range(&sheet, &range) {
                layers.push(layer);
            }
        }

        Some(Box::new(TableDataset { layers }))
    }

    /// Number of sheets, empty ones included. No sheet is read.
    fn layer_count(&self, path: &Path) -> Option<usize> {
        open_workbook_auto(path).ok().map(|wb| wb.sheet_names().len())
    }
}

/// Build a layer from a sheet range, or `None` when the sheet has no non-empty row.
pub(crate) fn layer_from_range(sheet: &str, range: &Range<Data>) -> Option<TableLayer> {
    let mut rows = range
        .rows()
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)));

    let header_row = rows.next()?;
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            let h = cell_to_header_string(c);
            let h = h.trim();
            if h.is_empty() {
                format!("field_{}", idx + 1)
            } else {
                h.to_string()
            }
        })
        .collect();

    let mut inference = vec![TypeInference::default(); headers.len()];
    let mut values: Vec<Vec<Value>> = Vec::new();
    for row in rows {
        let mut out_row = Vec::with_capacity(headers.len());
        for (col, infer) in inference.iter_mut().enumerate() {
            let cell = row.get(col).unwrap_or(&Data::Empty);
            if let Some(t) = cell_data_type(cell) {
                infer.observe(t);
            }
            out_row.push(convert_cell(cell));
        }
        values.push(out_row);
    }

    let fields = headers
        .into_iter()
        .zip(inference)
        .map(|(name, t)| RawField::new(name, t.finish()))
        .collect();

    Some(TableLayer::new(sheet, fields, values))
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(f) => f.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
        Data::Empty => String::new(),
    }
}

fn cell_data_type(c: &Data) -> Option<DataType> {
    match c {
        Data::Empty | Data::Error(_) => None,
        Data::Int(_) => Some(DataType::Int64),
        Data::Float(f) => Some(if is_integral(*f) {
            DataType::Int64
        } else {
            DataType::Float64
        }),
        Data::Bool(_) => Some(DataType::Bool),
        Data::DateTime(_) | Data::DateTimeIso(_) => Some(DataType::DateTime),
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(_) | Data::DurationIso(_) => Some(DataType::Utf8),
    }
}

fn convert_cell(c: &Data) -> Value {
    match c {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::Int64(*i),
        Data::Float(f) if is_integral(*f) => Value::Int64(*f as i64),
        Data::Float(f) => Value::Float64(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::Utf8(s.clone()),
        _ => Value::Utf8(c.to_string()),
    }
}

fn is_integral(f: f64) -> bool {
    f.fract() == 0.0 && f.abs() < 9.0e15
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::VectorLayer;

    fn sheet(cells: &[(u32, u32, Data)], end: (u32, u32)) -> Range<Data> {
        let mut range = Range::new((0, 0), end);
        for (r, c, v) in cells {
            range.set_value((*r, *c), v.clone());
        }
        range
    }

    #[test]
    fn header_is_first_non_empty_row() {
        let range = sheet(
            &[
                (1, 0, Data::String("id".to_string())),
                (1, 1, Data::String("name".to_string())),
                (2, 0, Data::Float(1.0)),
                (2, 1, Data::String("Ada".to_string())),
                (3, 0, Data::Float(2.5)),
            ],
            (3, 1),
        );
        let layer = layer_from_range("People", &range).unwrap();
        assert_eq!(layer.name(), "People");
        assert_eq!(
            layer.fields(),
            &[
                RawField::new("id", DataType::Float64),
                RawField::new("name", DataType::Utf8)
            ]
        );
        assert_eq!(layer.feature_count(), 2);
        assert_eq!(layer.rows()[0][0], Value::Int64(1));
        assert_eq!(layer.rows()[1][1], Value::Null);
    }

    #[test]
    fn blank_headers_get_positional_names() {
        let range = sheet(
            &[
                (0, 0, Data::String("a".to_string())),
                (1, 0, Data::Bool(true)),
                (1, 1, Data::Int(3)),
            ],
            (1, 1),
        );
        let layer = layer_from_range("s", &range).unwrap();
        assert_eq!(layer.fields()[1].name, "field_2");
        assert_eq!(layer.fields()[0].data_type, DataType::Bool);
        assert_eq!(layer.fields()[1].data_type, DataType::Int64);
    }

    #[test]
    fn empty_sheet_is_not_a_layer() {
        let range: Range<Data> = Range::new((0, 0), (2, 2));
        assert!(layer_from_range("empty", &range).is_none());
    }
}
