//! Legacy spreadsheet normalization.
//!
//! Converts the first sheet of a legacy binary workbook (`.xls`) into a canonical `.xlsx` file.
//! The converted file is a [`NormalizedFile`] owned by the operation that requested it and is
//! deleted when that value is dropped, whether the operation succeeded or not.
//!
//! Only the first sheet is converted. Any further sheets are reported in
//! [`NormalizedFile::dropped_sheets`] and logged, never converted.

use std::path::Path;

use calamine::{open_workbook, Data, Range, Reader, Xls};
use rust_xlsxwriter::{Workbook, XlsxError};
use tempfile::NamedTempFile;

use crate::error::{ImportError, ImportResult};

/// A converted workbook living in a temporary file.
#[derive(Debug)]
pub struct NormalizedFile {
    file: NamedTempFile,
    sheet: String,
    dropped_sheets: Vec<String>,
    rows: usize,
}

impl NormalizedFile {
    /// Path of the canonical `.xlsx` file. Valid until `self` is dropped.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Name of the converted sheet.
    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// Sheets present in the source but not converted.
    pub fn dropped_sheets(&self) -> &[String] {
        &self.dropped_sheets
    }

    /// Number of rows written.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Convert the legacy workbook at `path`.
pub fn normalize(path: impl AsRef<Path>) -> ImportResult<NormalizedFile> {
    let path = path.as_ref();
    let mut workbook: Xls<_> = open_workbook(path).map_err(|e| unreadable(path, e))?;

    let sheets = workbook.sheet_names().to_vec();
    let Some((first, rest)) = sheets.split_first() else {
        return Err(ImportError::UnreadableLegacyFile {
            message: format!("{}: workbook has no sheets", path.display()),
        });
    };
    let range = workbook
        .worksheet_range(first)
        .map_err(|e| unreadable(path, e))?;

    if !rest.is_empty() {
        tracing::warn!(
            path = %path.display(),
            converted = %first,
            dropped = ?rest,
            "legacy workbook has several sheets; only the first is converted"
        );
    }

    write_canonical(first, &range, rest.to_vec())
}

/// Write `range` as the only sheet of a new temporary `.xlsx` file.
pub(crate) fn write_canonical(
    sheet: &str,
    range: &Range<Data>,
    dropped_sheets: Vec<String>,
) -> ImportResult<NormalizedFile> {
    let file = tempfile::Builder::new()
        .prefix("layer-import-")
        .suffix(".xlsx")
        .tempfile()?;

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    if let Err(e) = worksheet.set_name(sheet) {
        tracing::debug!(%sheet, error = %e, "sheet name not accepted; keeping default");
    }

    let (row0, col0) = range.start().unwrap_or((0, 0));
    let mut rows = 0usize;
    for (r, row) in range.rows().enumerate() {
        let row_idx = row0 + r as u32;
        for (c, cell) in row.iter().enumerate() {
            let col_idx = u16::try_from(col0 as usize + c).map_err(|_| ImportError::UnreadableLegacyFile {
                message: format!("sheet '{sheet}' has more columns than the canonical format allows"),
            })?;
            write_cell(worksheet, row_idx, col_idx, cell).map_err(xlsx_error)?;
        }
        rows += 1;
    }

    workbook.save(file.path()).map_err(xlsx_error)?;
    tracing::debug!(%sheet, rows, path = %file.path().display(), "legacy sheet converted");

    Ok(NormalizedFile {
        file,
        sheet: sheet.to_string(),
        dropped_sheets,
        rows,
    })
}

fn write_cell(
    worksheet: &mut rust_xlsxwriter::Worksheet,
    row: u32,
    col: u16,
    cell: &Data,
) -> Result<(), XlsxError> {
    match cell {
        Data::Empty | Data::Error(_) => {}
        Data::String(s) => {
            worksheet.write_string(row, col, s)?;
        }
        Data::Int(i) => {
            worksheet.write_number(row, col, *i as f64)?;
        }
        Data::Float(f) => {
            worksheet.write_number(row, col, *f)?;
        }
        Data::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Data::DateTime(dt) => {
            worksheet.write_number(row, col, dt.as_f64())?;
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => {
            worksheet.write_string(row, col, s)?;
        }
    }
    Ok(())
}

fn unreadable(path: &Path, e: impl std::fmt::Display) -> ImportError {
    ImportError::UnreadableLegacyFile {
        message: format!("{}: {e}", path.display()),
    }
}

fn xlsx_error(e: XlsxError) -> ImportError {
    ImportError::UnreadableLegacyFile {
        message: format!("conversion failed: {e}"),
    }
}
