//! Import configuration.
//!
//! Every component receives an [`ImportOptions`] (usually behind an `Arc`) instead of reading
//! shared mutable constants. Use [`Default`] for the common case or load a JSON document with
//! [`ImportOptions::from_json_str`]; missing keys keep their defaults.

use serde::{Deserialize, Serialize};

use crate::dispatch::SCHEMA_CHUNK_SIZE;
use crate::error::{ImportError, ImportResult};
use crate::observability::ImportSeverity;

/// Options controlling validation, schema inference and dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Maximum parallel uploads per user; also bounds the layer fan-out of one file.
    pub max_parallel_uploads: usize,
    /// Maximum number of fields per schema-creation task.
    pub schema_chunk_size: usize,
    /// Column names treated as WKT geometry text.
    pub geometry_column_names: Vec<String>,
    pub latitude_column_names: Vec<String>,
    pub longitude_column_names: Vec<String>,
    /// Name of the synthesized geometry field when the driver reports none.
    pub default_geometry_column: String,
    /// Authority code used when CRS resolution fails.
    pub default_crs: String,
    /// Feature index read when sniffing WKT geometry text.
    pub sample_feature_index: usize,
    /// Upper bound on the total upload size in bytes.
    pub max_upload_size: Option<u64>,
    /// Worker threads for the schema dispatch pool. `None` uses available parallelism.
    pub worker_threads: Option<usize>,
    /// Upper bound on concurrently executing schema chunks.
    pub max_in_flight_chunks: usize,
    /// Severity threshold at which import observers are alerted.
    pub alert_at_or_above: ImportSeverity,
}

impl Default for ImportOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_parallel_uploads: 5,
            schema_chunk_size: SCHEMA_CHUNK_SIZE,
            geometry_column_names: strings(&["geom", "geometry", "wkt_geom", "the_geom"]),
            latitude_column_names: strings(&["latitude", "lat", "y"]),
            longitude_column_names: strings(&["longitude", "long", "lon", "x"]),
            default_geometry_column: "geometry".to_string(),
            default_crs: "EPSG:4326".to_string(),
            sample_feature_index: 0,
            max_upload_size: None,
            worker_threads: Some(n),
            max_in_flight_chunks: n.max(1),
            alert_at_or_above: ImportSeverity::Critical,
        }
    }
}

impl ImportOptions {
    /// Parse options from a JSON document and validate them.
    pub fn from_json_str(json: &str) -> ImportResult<Self> {
        let opts: ImportOptions = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Reject settings that would make a component unusable.
    pub fn validate(&self) -> ImportResult<()> {
        if self.max_parallel_uploads == 0 {
            return Err(config_error("max_parallel_uploads must be > 0"));
        }
        if self.schema_chunk_size == 0 {
            return Err(config_error("schema_chunk_size must be > 0"));
        }
        if self.max_in_flight_chunks == 0 {
            return Err(config_error("max_in_flight_chunks must be > 0"));
        }
        if self.worker_threads == Some(0) {
            return Err(config_error("worker_threads must be > 0 when set"));
        }
        if self.default_geometry_column.trim().is_empty() {
            return Err(config_error("default_geometry_column must not be empty"));
        }
        Ok(())
    }

    pub fn is_geometry_column(&self, normalized: &str) -> bool {
        self.geometry_column_names.iter().any(|n| n == normalized)
    }

    pub fn is_latitude_column(&self, normalized: &str) -> bool {
        self.latitude_column_names.iter().any(|n| n == normalized)
    }

    pub fn is_longitude_column(&self, normalized: &str) -> bool {
        self.longitude_column_names.iter().any(|n| n == normalized)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn config_error(message: &str) -> ImportError {
    ImportError::Config {
        message: message.to_string(),
    }
}
