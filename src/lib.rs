//! `layer-import` turns uploaded tabular and geospatial files into typed layers and creates their
//! storage schemas in bounded, parallel chunks.
//!
//! The primary entrypoint is [`pipeline::Importer::import`]:
//!
//! 1. [`detect`] picks a handler from the filename extension (content type as fallback)
//! 2. [`handler`] validates the upload under the per-user [`guard`] budget, converting legacy
//!    `.xls` workbooks with [`legacy`] first
//! 3. [`schema`] resolves each layer's fields and geometry
//! 4. [`dispatch`] submits the fields in chunks of at most 30 to a task queue and joins them
//! 5. [`naming`] produces one sanitized [`types::ResourceDescriptor`] per layer
//!
//! ## What you can import
//!
//! - **Legacy spreadsheets**: `.xls` (first sheet only)
//! - **Spreadsheets**: `.xlsx`, `.xlsm`, `.ods` (one layer per non-empty sheet)
//! - **Vector files**: `.csv`, `.geojson`, `.json`
//!
//! Geometry comes from, in order of preference: a WKT text column (`geom`, `geometry`,
//! `wkt_geom`, `the_geom`), latitude/longitude columns, or the driver's native geometry.
//! Geometry classes are promoted to their multi variant, except for lat/long points.
//!
//! ## Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use layer_import::config::ImportOptions;
//! use layer_import::dispatch::Execution;
//! use layer_import::handler::ImportServices;
//! use layer_import::pipeline::{ImportOutcome, Importer};
//! use layer_import::types::UploadRequest;
//!
//! # fn main() -> Result<(), layer_import::ImportError> {
//! let services = Arc::new(ImportServices::new(ImportOptions::default())?);
//! let importer = Importer::new(services);
//!
//! let upload = UploadRequest::from_path("Data Export.xlsx", "alice");
//! let execution = Execution::new("exec-42");
//! if let ImportOutcome::Completed(report) = importer.import(&upload, &execution, false)? {
//!     for r in &report.resources {
//!         println!("{} ({})", r.name, r.crs);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: uploads, layer/field descriptors, geometry kinds
//! - [`config`]: [`config::ImportOptions`]
//! - [`driver`]: vector driver traits and the bundled spreadsheet/CSV/GeoJSON drivers
//! - [`observability`]: import observers and alert severities
//! - [`error`]: error types used across the crate

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod guard;
pub mod handler;
pub mod legacy;
pub mod naming;
pub mod observability;
pub mod pipeline;
pub mod schema;
pub mod types;

pub use error::{ImportError, ImportErrorKind, ImportResult};
