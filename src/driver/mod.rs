//! Vector driver adapter.
//!
//! The pipeline only talks to files through [`VectorDriver`] → [`VectorDataset`] →
//! [`VectorLayer`]. Bundled drivers load every layer eagerly into a [`TableLayer`]:
//!
//! - [`spreadsheet`]: workbooks (`.xlsx`, `.xlsm`, `.ods`, `.xls`), one layer per non-empty sheet
//! - [`csv`]: one layer, field types inferred from values
//! - [`geojson`]: one layer with a native geometry type and CRS
//!
//! [`MemoryDriver`] serves preconfigured layers and is meant for tests and embedding.

pub mod csv;
pub mod geojson;
pub mod spreadsheet;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::detect::HandlerKind;
use crate::types::{DataType, GeometryType, Value};

pub use self::csv::CsvDriver;
pub use self::geojson::GeoJsonDriver;
pub use self::spreadsheet::SpreadsheetDriver;

/// Error raised by a layer when reading features or spatial metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("feature {index} out of range (layer has {count} features)")]
    FeatureOutOfRange { index: usize, count: usize },
    #[error("unreadable feature: {0}")]
    Unreadable(String),
    #[error("spatial reference error: {0}")]
    SpatialRef(String),
}

/// A field as reported by the driver, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub data_type: DataType,
}

impl RawField {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// One feature; `values` are aligned with [`VectorLayer::fields`].
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub fid: usize,
    pub values: Vec<Value>,
}

impl Feature {
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Opens files. `open` returns `None` when the file cannot be read as this format.
pub trait VectorDriver: Send + Sync {
    fn name(&self) -> &'static str;
    fn open(&self, path: &Path) -> Option<Box<dyn VectorDataset>>;

    /// Upper bound on the layer count, read from file metadata without loading any layer.
    ///
    /// `None` when the format cannot tell without parsing; the count is then taken after `open`.
    fn layer_count(&self, _path: &Path) -> Option<usize> {
        None
    }
}

pub trait VectorDataset {
    fn layer_count(&self) -> usize;
    fn layer(&self, index: usize) -> Option<&dyn VectorLayer>;

    fn layers(&self) -> Vec<&dyn VectorLayer> {
        (0..self.layer_count())
            .filter_map(|i| self.layer(i))
            .collect()
    }
}

pub trait VectorLayer {
    fn name(&self) -> &str;
    fn fields(&self) -> &[RawField];
    fn geometry_type(&self) -> GeometryType;
    /// Name of the native geometry column, if the format has one.
    fn geometry_column(&self) -> Option<&str> {
        None
    }
    fn feature_count(&self) -> usize;
    fn sample_feature(&self, index: usize) -> Result<Feature, DriverError>;
    /// Raw spatial reference identifier (e.g. `EPSG:3857`, an OGC URN), if any.
    fn spatial_ref(&self) -> Result<Option<String>, DriverError>;
}

/// Select the bundled driver for a handler kind.
pub fn for_kind(kind: HandlerKind) -> Arc<dyn VectorDriver> {
    match kind {
        HandlerKind::LegacySpreadsheet | HandlerKind::Spreadsheet => Arc::new(SpreadsheetDriver),
        HandlerKind::Vector => Arc::new(VectorFileDriver),
    }
}

/// Routes generic vector files to the CSV or GeoJSON driver by extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorFileDriver;

impl VectorDriver for VectorFileDriver {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn open(&self, path: &Path) -> Option<Box<dyn VectorDataset>> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => CsvDriver.open(path),
            "geojson" | "json" => GeoJsonDriver.open(path),
            _ => None,
        }
    }

    fn layer_count(&self, path: &Path) -> Option<usize> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        matches!(ext.as_str(), "csv" | "geojson" | "json").then_some(1)
    }
}

/// Fully loaded layer used by the bundled drivers.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayer {
    name: String,
    fields: Vec<RawField>,
    geometry_type: GeometryType,
    geometry_column: Option<String>,
    rows: Vec<Vec<Value>>,
    spatial_ref: Result<Option<String>, DriverError>,
    unreadable_features: Option<String>,
}

impl TableLayer {
    pub fn new(name: impl Into<String>, fields: Vec<RawField>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            name: name.into(),
            fields,
            geometry_type: GeometryType::NONE,
            geometry_column: None,
            rows,
            spatial_ref: Ok(None),
            unreadable_features: None,
        }
    }

    pub fn with_geometry(mut self, geometry_type: GeometryType, column: Option<&str>) -> Self {
        self.geometry_type = geometry_type;
        self.geometry_column = column.map(str::to_string);
        self
    }

    pub fn with_spatial_ref(mut self, srs: impl Into<String>) -> Self {
        self.spatial_ref = Ok(Some(srs.into()));
        self
    }

    /// Make spatial reference lookups fail with `message`.
    pub fn with_broken_spatial_ref(mut self, message: impl Into<String>) -> Self {
        self.spatial_ref = Err(DriverError::SpatialRef(message.into()));
        self
    }

    /// Make every feature read fail with `message`.
    pub fn with_unreadable_features(mut self, message: impl Into<String>) -> Self {
        self.unreadable_features = Some(message.into());
        self
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
}

impl VectorLayer for TableLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[RawField] {
        &self.fields
    }

    fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    fn geometry_column(&self) -> Option<&str> {
        self.geometry_column.as_deref()
    }

    fn feature_count(&self) -> usize {
        self.rows.len()
    }

    fn sample_feature(&self, index: usize) -> Result<Feature, DriverError> {
        if let Some(message) = &self.unreadable_features {
            return Err(DriverError::Unreadable(message.clone()));
        }
        let row = self.rows.get(index).ok_or(DriverError::FeatureOutOfRange {
            index,
            count: self.rows.len(),
        })?;
        Ok(Feature {
            fid: index,
            values: row.clone(),
        })
    }

    fn spatial_ref(&self) -> Result<Option<String>, DriverError> {
        self.spatial_ref.clone()
    }
}

/// Dataset made of loaded [`TableLayer`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDataset {
    pub layers: Vec<TableLayer>,
}

impl VectorDataset for TableDataset {
    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer(&self, index: usize) -> Option<&dyn VectorLayer> {
        self.layers.get(index).map(|l| l as &dyn VectorLayer)
    }
}

/// Driver that serves the same preconfigured layers for every path.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    layers: Option<Vec<TableLayer>>,
}

impl MemoryDriver {
    pub fn new(layers: Vec<TableLayer>) -> Self {
        Self {
            layers: Some(layers),
        }
    }

    /// A driver that cannot open anything.
    pub fn unreadable() -> Self {
        Self { layers: None }
    }
}

impl VectorDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, _path: &Path) -> Option<Box<dyn VectorDataset>> {
        let layers = self.layers.clone()?;
        Some(Box::new(TableDataset { layers }))
    }
}

/// Accumulates the narrowest [`DataType`] that fits every observed value of a column.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TypeInference {
    current: Option<DataType>,
}

impl TypeInference {
    pub(crate) fn observe(&mut self, data_type: DataType) {
        self.current = Some(match (self.current, data_type) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
                DataType::Float64
            }
            (Some(DataType::Date), DataType::DateTime) | (Some(DataType::DateTime), DataType::Date) => {
                DataType::DateTime
            }
            _ => DataType::Utf8,
        });
    }

    pub(crate) fn observe_value(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Int64(_) => self.observe(DataType::Int64),
            Value::Float64(_) => self.observe(DataType::Float64),
            Value::Bool(_) => self.observe(DataType::Bool),
            Value::Utf8(_) => self.observe(DataType::Utf8),
        }
    }

    /// Columns with no non-null value default to text.
    pub(crate) fn finish(self) -> DataType {
        self.current.unwrap_or(DataType::Utf8)
    }
}
