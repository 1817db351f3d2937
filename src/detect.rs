//! Format detection.
//!
//! [`detect`] classifies an upload by its declared filename extension (case-insensitive) and,
//! only when the extension is missing or unknown, by its declared content type. An explicit
//! extension always wins over the content type.

use std::path::Path;

use serde::Serialize;

use crate::error::{ImportError, ImportResult};
use crate::types::UploadRequest;

/// Which handler processes an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Legacy binary spreadsheet (`.xls`), normalized before parsing.
    LegacySpreadsheet,
    /// Modern spreadsheet/workbook (`.xlsx`, `.xlsm`, `.ods`).
    Spreadsheet,
    /// Generic vector/tabular file (`.csv`, `.geojson`).
    Vector,
}

impl HandlerKind {
    /// Parse a handler kind from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xls" => Some(Self::LegacySpreadsheet),
            "xlsx" | "xlsm" | "ods" => Some(Self::Spreadsheet),
            "csv" | "geojson" | "json" => Some(Self::Vector),
            _ => None,
        }
    }

    /// Parse a handler kind from a MIME type, ignoring parameters such as `charset`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/vnd.ms-excel" => Some(Self::LegacySpreadsheet),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel.sheet.macroenabled.12"
            | "application/vnd.oasis.opendocument.spreadsheet" => Some(Self::Spreadsheet),
            "text/csv" | "application/geo+json" | "application/vnd.geo+json" => Some(Self::Vector),
            _ => None,
        }
    }

    /// The format descriptor advertised by this kind's handler.
    pub fn supported_format(&self) -> SupportedFormat {
        match self {
            Self::LegacySpreadsheet => SupportedFormat {
                id: "xls",
                label: "XLS",
                format: "vector",
                mime_types: vec!["application/vnd.ms-excel"],
                extensions: vec!["xls"],
                optional: vec!["sld", "xml"],
            },
            Self::Spreadsheet => SupportedFormat {
                id: "xlsx",
                label: "Excel",
                format: "vector",
                mime_types: vec![
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                    "application/vnd.ms-excel.sheet.macroenabled.12",
                    "application/vnd.oasis.opendocument.spreadsheet",
                ],
                extensions: vec!["xlsx", "xlsm", "ods"],
                optional: vec!["sld", "xml"],
            },
            Self::Vector => SupportedFormat {
                id: "vector",
                label: "CSV / GeoJSON",
                format: "vector",
                mime_types: vec!["text/csv", "application/geo+json"],
                extensions: vec!["csv", "geojson", "json"],
                optional: vec!["sld", "xml"],
            },
        }
    }
}

/// Accepted uploads of one handler, as listed to upload clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportedFormat {
    pub id: &'static str,
    pub label: &'static str,
    pub format: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_types: Vec<&'static str>,
    #[serde(rename = "ext")]
    pub extensions: Vec<&'static str>,
    /// Extensions accepted as auxiliary files (styles, metadata).
    pub optional: Vec<&'static str>,
}

impl SupportedFormat {
    pub fn accepts_aux_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.optional.iter().any(|o| *o == ext)
    }
}

/// Metadata a handler may inspect to decide whether it applies. No I/O.
#[derive(Debug, Clone, Copy)]
pub struct UploadMetadata<'a> {
    pub filename: &'a str,
    pub content_type: Option<&'a str>,
}

impl<'a> From<&'a UploadRequest> for UploadMetadata<'a> {
    fn from(req: &'a UploadRequest) -> Self {
        Self {
            filename: &req.filename,
            content_type: req.content_type.as_deref(),
        }
    }
}

/// Classify upload metadata; `None` means no handler applies.
pub fn classify(meta: UploadMetadata<'_>) -> Option<HandlerKind> {
    let by_ext = Path::new(meta.filename)
        .extension()
        .and_then(|s| s.to_str())
        .and_then(HandlerKind::from_extension);
    by_ext.or_else(|| meta.content_type.and_then(HandlerKind::from_content_type))
}

/// Select the handler kind for an upload.
pub fn detect(req: &UploadRequest) -> ImportResult<HandlerKind> {
    let kind = classify(UploadMetadata::from(req)).ok_or_else(|| ImportError::UnsupportedFormat {
        message: format!(
            "no handler for '{}' (content type {})",
            req.filename,
            req.content_type.as_deref().unwrap_or("unknown")
        ),
    })?;
    tracing::debug!(filename = %req.filename, ?kind, "format detected");
    Ok(kind)
}
