//! Core data model for the import pipeline.
//!
//! Drivers report raw fields typed with [`DataType`] and feature values as [`Value`]s. The
//! resolver turns those into [`LayerDescriptor`]s whose [`FieldDescriptor`]s carry a
//! [`StorageClass`], which schema dispatch slices into [`SchemaChunk`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Logical data type of a raw field as reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Calendar date.
    Date,
    /// Date and time of day.
    DateTime,
}

/// A single typed value read from a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Borrow the string payload, if this is a [`Value::Utf8`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Geometry kinds known to drivers and to the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    /// The layer has no native geometry (plain table).
    None,
    /// Geometry is present but untyped ("unknown (any)").
    Unknown,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryKind {
    /// Promote a singular kind to its collection variant.
    ///
    /// Collection kinds are returned unchanged. `None` has no promotion; `Unknown` maps to
    /// [`GeometryKind::GeometryCollection`] so that a layer of mixed features still has a class.
    pub fn promote_to_multi(self) -> Option<GeometryKind> {
        match self {
            Self::None => None,
            Self::Point | Self::MultiPoint => Some(Self::MultiPoint),
            Self::LineString | Self::MultiLineString => Some(Self::MultiLineString),
            Self::Polygon | Self::MultiPolygon => Some(Self::MultiPolygon),
            Self::Unknown | Self::GeometryCollection => Some(Self::GeometryCollection),
        }
    }

    /// Parse a WKT/GeoJSON type keyword (`POINT`, `LineString`, `multi_polygon`...).
    pub fn from_keyword(keyword: &str) -> Option<GeometryKind> {
        let key: String = keyword
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match key.as_str() {
            "POINT" => Some(Self::Point),
            "LINESTRING" => Some(Self::LineString),
            "POLYGON" => Some(Self::Polygon),
            "MULTIPOINT" => Some(Self::MultiPoint),
            "MULTILINESTRING" => Some(Self::MultiLineString),
            "MULTIPOLYGON" => Some(Self::MultiPolygon),
            "GEOMETRYCOLLECTION" => Some(Self::GeometryCollection),
            _ => None,
        }
    }

    /// Storage class name, e.g. `MultiPoint`.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Unknown => "Geometry",
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
            Self::GeometryCollection => "GeometryCollection",
        }
    }
}

/// Geometry type reported natively by a driver for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryType {
    pub kind: GeometryKind,
    /// Whether coordinates carry a Z component.
    pub has_z: bool,
}

impl GeometryType {
    /// No native geometry at all.
    pub const NONE: GeometryType = GeometryType {
        kind: GeometryKind::None,
        has_z: false,
    };

    /// Geometry present but of unknown kind.
    pub const UNKNOWN: GeometryType = GeometryType {
        kind: GeometryKind::Unknown,
        has_z: false,
    };

    pub fn new(kind: GeometryKind, has_z: bool) -> Self {
        Self { kind, has_z }
    }

    /// Whether the geometry is not natively typed (embedded as text, or absent).
    pub fn is_untyped(&self) -> bool {
        matches!(self.kind, GeometryKind::None | GeometryKind::Unknown)
    }

    /// Human-readable name, e.g. `Point`, `3D Multi Polygon`, `Unknown (any)`.
    pub fn name(&self) -> String {
        let base = match self.kind {
            GeometryKind::None => return "None".to_string(),
            GeometryKind::Unknown => "Unknown (any)",
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "Line String",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "Multi Point",
            GeometryKind::MultiLineString => "Multi Line String",
            GeometryKind::MultiPolygon => "Multi Polygon",
            GeometryKind::GeometryCollection => "Geometry Collection",
        };
        if self.has_z {
            format!("3D {base}")
        } else {
            base.to_string()
        }
    }
}

/// Inferred storage class of a resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "class", content = "geometry")]
pub enum StorageClass {
    Integer,
    Float,
    Boolean,
    String,
    Date,
    DateTime,
    Geometry(GeometryKind),
}

impl From<DataType> for StorageClass {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Int64 => Self::Integer,
            DataType::Float64 => Self::Float,
            DataType::Bool => Self::Boolean,
            DataType::Utf8 => Self::String,
            DataType::Date => Self::Date,
            DataType::DateTime => Self::DateTime,
        }
    }
}

/// Coordinate dimensionality of a geometry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Xy,
    Xyz,
}

impl Dimension {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Xy => 2,
            Self::Xyz => 3,
        }
    }
}

/// A normalized, typed field of a layer schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub class: StorageClass,
    /// Always `true`: inference is best-effort.
    pub nullable: bool,
    /// Set on the geometry field only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, class: StorageClass) -> Self {
        Self {
            name: name.into(),
            class,
            nullable: true,
            dimension: None,
        }
    }

    pub fn geometry(name: impl Into<String>, kind: GeometryKind, dimension: Dimension) -> Self {
        Self {
            name: name.into(),
            class: StorageClass::Geometry(kind),
            nullable: true,
            dimension: Some(dimension),
        }
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self.class, StorageClass::Geometry(_))
    }
}

/// How a layer's geometry was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometrySource {
    /// Parsed from a WKT text column, which was removed from the field list.
    TextColumn,
    /// Synthesized from latitude/longitude columns, which are kept.
    LatLong,
    /// Reported natively by the driver.
    Native,
}

/// One sheet/table of an upload after schema resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Name as reported by the driver.
    pub name: String,
    /// Ordered fields; the geometry field, if any, is last.
    pub fields: Vec<FieldDescriptor>,
    pub geometry_column: Option<String>,
    pub geometry_type: GeometryType,
    pub dimension: Dimension,
    pub geometry_source: Option<GeometrySource>,
}

impl LayerDescriptor {
    pub fn geometry_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.is_geometry())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Bounded slice of one layer's fields; the unit of schema-creation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChunk {
    pub layer_name: String,
    pub index: usize,
    pub fields: Vec<FieldDescriptor>,
}

/// Dynamic schema that receives a layer's fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaTarget {
    pub id: u64,
    pub name: String,
}

/// Final per-layer output consumed by the storage/publish layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    /// Authority code, e.g. `EPSG:4326`.
    pub crs: String,
}

/// Requested operation on an uploaded dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Import,
    Copy,
    Rollback,
}

impl ImportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Copy => "copy",
            Self::Rollback => "rollback",
        }
    }
}

/// Where the uploaded bytes live.
#[derive(Clone, PartialEq, Eq)]
pub enum UploadSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

/// Auxiliary roles excluded from upload size accounting.
const SIZE_EXCLUDED_ROLES: [&str; 2] = ["zip_file", "shp_file"];

/// A submitted upload: the base file, its declared name, owner and auxiliary files.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: UploadSource,
    /// Declared filename, e.g. `Data Export.xlsx`.
    pub filename: String,
    /// Declared content type, if the client sent one.
    pub content_type: Option<String>,
    /// Owning user identity.
    pub user: String,
    /// Auxiliary files keyed by role (`sld_file`, `xml_file`...).
    pub aux_files: BTreeMap<String, PathBuf>,
}

impl UploadRequest {
    /// Upload backed by a file on disk; the declared filename is the path's file name.
    pub fn from_path(path: impl AsRef<Path>, user: impl Into<String>) -> Self {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source: UploadSource::Path(path.to_path_buf()),
            filename,
            content_type: None,
            user: user.into(),
            aux_files: BTreeMap::new(),
        }
    }

    /// Upload backed by an in-memory byte stream.
    pub fn from_bytes(bytes: Vec<u8>, filename: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            source: UploadSource::Bytes(bytes),
            filename: filename.into(),
            content_type: None,
            user: user.into(),
            aux_files: BTreeMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_aux_file(mut self, role: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.aux_files.insert(role.into(), path.as_ref().to_path_buf());
        self
    }

    /// Declared filename without its extension.
    pub fn base_name(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }

    /// Lowercased extension of the declared filename.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
    }

    /// Total size in bytes of the base file plus counted auxiliary files.
    pub fn total_size(&self) -> std::io::Result<u64> {
        let mut total = match &self.source {
            UploadSource::Bytes(b) => b.len() as u64,
            UploadSource::Path(p) => file_size(p)?,
        };
        for (role, path) in &self.aux_files {
            if SIZE_EXCLUDED_ROLES.contains(&role.as_str()) {
                continue;
            }
            total += file_size(path)?;
        }
        Ok(total)
    }
}

fn file_size(path: &Path) -> std::io::Result<u64> {
    let meta = std::fs::metadata(path)?;
    if meta.is_file() && meta.len() > 0 {
        return Ok(meta.len());
    }
    // Some special files report zero; measure by seeking.
    let mut f = File::open(path)?;
    f.seek(SeekFrom::End(0))
}
