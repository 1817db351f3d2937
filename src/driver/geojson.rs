//! GeoJSON driver.
//!
//! Supported inputs: a `FeatureCollection` or a single `Feature`. The layer has one field per
//! property key (first-seen order across features), a native geometry type and a spatial
//! reference taken from the legacy `crs` member, defaulting to CRS84 (RFC 7946).

use std::fs;
use std::path::Path;

use serde_json::{Map, Value as Json};

use super::{
    RawField, TableDataset, TableLayer, TypeInference, VectorDataset, VectorDriver,
};
use crate::error::{ImportError, ImportResult};
use crate::types::{GeometryKind, GeometryType, Value};

const RFC7946_CRS: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";

#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonDriver;

impl VectorDriver for GeoJsonDriver {
    fn name(&self) -> &'static str {
        "geojson"
    }

    fn open(&self, path: &Path) -> Option<Box<dyn VectorDataset>> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = fs::read_to_string(path)
            .map_err(ImportError::from)
            .and_then(|text| layer_from_str(&stem, &text));
        match parsed {
            Ok(layer) => Some(Box::new(TableDataset {
                layers: vec![layer],
            })),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "geojson open failed");
                None
            }
        }
    }
}

/// Parse a GeoJSON document into one layer; `default_name` is used when it has no `name`.
pub fn layer_from_str(default_name: &str, input: &str) -> ImportResult<TableLayer> {
    let root: Json = serde_json::from_str(input)?;
    let obj = root
        .as_object()
        .ok_or_else(|| ImportError::invalid_file("geojson root must be an object"))?;

    let features: Vec<&Map<String, Json>> = match obj.get("type").and_then(Json::as_str) {
        Some("FeatureCollection") => obj
            .get("features")
            .and_then(Json::as_array)
            .ok_or_else(|| ImportError::invalid_file("FeatureCollection without 'features' array"))?
            .iter()
            .filter_map(Json::as_object)
            .collect(),
        Some("Feature") => vec![obj],
        other => {
            return Err(ImportError::invalid_file(format!(
                "unsupported geojson type {other:?}"
            )));
        }
    };

    let mut keys: Vec<String> = Vec::new();
    for f in &features {
        if let Some(props) = f.get("properties").and_then(Json::as_object) {
            for k in props.keys() {
                if !keys.contains(k) {
                    keys.push(k.clone());
                }
            }
        }
    }

    let mut inference = vec![TypeInference::default(); keys.len()];
    let mut rows = Vec::with_capacity(features.len());
    for f in &features {
        let props = f.get("properties").and_then(Json::as_object);
        let mut row = Vec::with_capacity(keys.len());
        for (key, infer) in keys.iter().zip(inference.iter_mut()) {
            let value = props
                .and_then(|p| p.get(key))
                .map(convert_json_value)
                .unwrap_or(Value::Null);
            infer.observe_value(&value);
            row.push(value);
        }
        rows.push(row);
    }

    let fields = keys
        .into_iter()
        .zip(inference)
        .map(|(k, t)| RawField::new(k, t.finish()))
        .collect();

    let name = obj
        .get("name")
        .and_then(Json::as_str)
        .unwrap_or(default_name);
    let geometry_type = collection_geometry_type(&features);
    let mut layer = TableLayer::new(name, fields, rows).with_geometry(geometry_type, None);
    layer = match crs_name(obj) {
        Ok(Some(srs)) => layer.with_spatial_ref(srs),
        Ok(None) => layer.with_spatial_ref(RFC7946_CRS),
        Err(message) => layer.with_broken_spatial_ref(message),
    };
    Ok(layer)
}

fn convert_json_value(v: &Json) -> Value {
    match v {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => n.as_f64().map(Value::Float64).unwrap_or(Value::Null),
        },
        Json::String(s) => Value::Utf8(s.clone()),
        other => Value::Utf8(other.to_string()),
    }
}

/// Common geometry type of all features.
///
/// Singular and multi variants of the same kind (`Point`/`MultiPoint`) report the multi variant;
/// otherwise mixed kinds are `Unknown`.
fn collection_geometry_type(features: &[&Map<String, Json>]) -> GeometryType {
    let mut kind: Option<GeometryKind> = None;
    let mut has_z = false;
    for f in features {
        let Some(geom) = f.get("geometry").and_then(Json::as_object) else {
            continue;
        };
        let this = geom
            .get("type")
            .and_then(Json::as_str)
            .and_then(GeometryKind::from_keyword)
            .unwrap_or(GeometryKind::Unknown);
        kind = match kind {
            None => Some(this),
            Some(k) if k == this => Some(k),
            Some(k) => match (k.promote_to_multi(), this.promote_to_multi()) {
                (Some(a), Some(b)) if a == b && a != GeometryKind::GeometryCollection => Some(a),
                _ => Some(GeometryKind::Unknown),
            },
        };
        has_z |= geom.get("coordinates").is_some_and(first_position_has_z);
    }
    match kind {
        None => GeometryType::NONE,
        Some(k) => GeometryType::new(k, has_z),
    }
}

fn first_position_has_z(coords: &Json) -> bool {
    let mut cur = coords;
    loop {
        match cur.as_array() {
            Some(items) if items.first().is_some_and(Json::is_array) => cur = &items[0],
            Some(items) => return items.len() >= 3,
            None => return false,
        }
    }
}

/// `Ok(None)` when there is no `crs` member; `Err` when it is present but malformed.
fn crs_name(obj: &Map<String, Json>) -> Result<Option<String>, String> {
    let Some(crs) = obj.get("crs") else {
        return Ok(None);
    };
    if crs.is_null() {
        return Ok(None);
    }
    crs.get("properties")
        .and_then(|p| p.get("name"))
        .and_then(Json::as_str)
        .map(|s| Some(s.to_string()))
        .ok_or_else(|| format!("malformed crs member: {crs}"))
}
