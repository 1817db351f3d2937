//! Geometry and field schema resolution.
//!
//! [`resolve`] turns a driver layer into a [`LayerDescriptor`]. Field names are normalized and
//! de-duplicated, then the geometry field is chosen by the first matching rule:
//!
//! 1. The geometry is not natively typed and a geometry-like column (`geom`, `wkt_geom`, ...)
//!    exists: the kind is read from the WKT text of one sample feature and promoted to its
//!    multi variant. The text column is replaced by the geometry field.
//! 2. Any latitude-like or longitude-like column (`lat`, `lon`, `x`, ...) exists: a `Point`
//!    geometry field is added and the coordinate columns are kept. This applies to natively
//!    typed layers too.
//! 3. Otherwise the driver's native type, promoted to multi, is used; layers without native
//!    geometry get no geometry field.
//!
//! A failed sample read in rule 1 is logged and resolution continues with rule 3.

use std::collections::HashSet;

use crate::config::ImportOptions;
use crate::driver::VectorLayer;
use crate::naming::ascii_fold;
use crate::types::{
    Dimension, FieldDescriptor, GeometryKind, GeometrySource, LayerDescriptor, StorageClass,
};

/// Normalize a raw field name: fold to ASCII, lowercase, turn every run of
/// non-alphanumeric characters into one underscore, trim underscores.
///
/// Names with nothing left become `field`.
pub fn normalize_field_name(name: &str) -> String {
    let folded = ascii_fold(name.trim()).to_ascii_lowercase();
    let mut out = String::with_capacity(folded.len());
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "field".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Suffix repeated names (`name`, `name_2`, `name_3`...) so every name is unique.
fn dedupe(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .map(|name| unique_name(&mut seen, name))
        .collect()
}

fn unique_name(seen: &mut HashSet<String>, name: String) -> String {
    if seen.insert(name.clone()) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{name}_{n}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Parse the geometry kind out of WKT/EWKT text and promote it to the multi variant.
///
/// Accepts `POINT (1 2)`, `MultiPolygon Z (...)`, `SRID=4326;LINESTRING(...)`, `POINT EMPTY`.
pub fn wkt_geometry_kind(text: &str) -> Option<GeometryKind> {
    let body = match text.split_once(';') {
        Some((prefix, rest)) if prefix.trim().to_ascii_uppercase().starts_with("SRID=") => rest,
        _ => text,
    };
    let head = body.split('(').next().unwrap_or_default();
    let mut keyword: String = head
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    if let Some(stripped) = keyword.strip_suffix("EMPTY") {
        keyword = stripped.to_string();
    }
    let kind = GeometryKind::from_keyword(&keyword).or_else(|| {
        ["ZM", "Z", "M"]
            .iter()
            .find_map(|suffix| keyword.strip_suffix(suffix))
            .and_then(GeometryKind::from_keyword)
    })?;
    kind.promote_to_multi()
}

/// Resolve the schema of one driver layer.
pub fn resolve(layer: &dyn VectorLayer, opts: &ImportOptions) -> LayerDescriptor {
    let raw = layer.fields();
    let names = dedupe(raw.iter().map(|f| normalize_field_name(&f.name)).collect());
    let mut fields: Vec<FieldDescriptor> = names
        .iter()
        .zip(raw)
        .map(|(name, f)| FieldDescriptor::new(name.clone(), StorageClass::from(f.data_type)))
        .collect();

    let native = layer.geometry_type();
    let dimension = if native.name().to_ascii_lowercase().starts_with("3d") {
        Dimension::Xyz
    } else {
        Dimension::Xy
    };

    let mut resolved: Option<(GeometryKind, GeometrySource)> = None;
    let mut text_sniff_failed = false;

    if native.is_untyped() {
        let text_column = opts
            .geometry_column_names
            .iter()
            .find_map(|g| names.iter().position(|n| n == g));
        if let Some(idx) = text_column {
            match sniff_text_geometry(layer, idx, opts.sample_feature_index) {
                Ok(kind) => {
                    fields.remove(idx);
                    resolved = Some((kind, GeometrySource::TextColumn));
                }
                Err(reason) => {
                    tracing::warn!(
                        layer = layer.name(),
                        column = %names[idx],
                        %reason,
                        "geometry text sniffing failed; using native geometry type"
                    );
                    text_sniff_failed = true;
                }
            }
        }
    }

    if resolved.is_none()
        && !text_sniff_failed
        && names
            .iter()
            .any(|n| opts.is_latitude_column(n) || opts.is_longitude_column(n))
    {
        resolved = Some((GeometryKind::Point, GeometrySource::LatLong));
    }

    if resolved.is_none() {
        resolved = native
            .kind
            .promote_to_multi()
            .map(|kind| (kind, GeometrySource::Native));
    }

    let mut geometry_column = None;
    if let Some((kind, _)) = resolved {
        let geom_name = layer
            .geometry_column()
            .filter(|c| !c.trim().is_empty())
            .map(normalize_field_name)
            .unwrap_or_else(|| opts.default_geometry_column.clone());

        // Keep every ordinary column, renaming one that would shadow the geometry field.
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(geom_name.clone());
        for f in fields.iter_mut() {
            let name = std::mem::take(&mut f.name);
            f.name = unique_name(&mut seen, name);
        }
        fields.push(FieldDescriptor::geometry(geom_name.clone(), kind, dimension));
        geometry_column = Some(geom_name);
    }

    let descriptor = LayerDescriptor {
        name: layer.name().to_string(),
        fields,
        geometry_column,
        geometry_type: native,
        dimension,
        geometry_source: resolved.map(|(_, source)| source),
    };
    tracing::debug!(
        layer = %descriptor.name,
        fields = descriptor.fields.len(),
        geometry = ?descriptor.geometry_field().map(|f| f.class),
        source = ?descriptor.geometry_source,
        "layer schema resolved"
    );
    descriptor
}

fn sniff_text_geometry(
    layer: &dyn VectorLayer,
    column: usize,
    sample_index: usize,
) -> Result<GeometryKind, String> {
    let feature = layer
        .sample_feature(sample_index)
        .map_err(|e| e.to_string())?;
    let text = feature
        .value(column)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("sample feature {} has no geometry text", feature.fid))?;
    wkt_geometry_kind(text).ok_or_else(|| format!("unrecognized geometry text '{text}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{RawField, TableLayer};
    use crate::types::{DataType, GeometryType, Value};

    fn opts() -> ImportOptions {
        ImportOptions::default()
    }

    fn text(s: &str) -> Value {
        Value::Utf8(s.to_string())
    }

    #[test]
    fn normalization_collapses_and_trims() {
        assert_eq!(normalize_field_name("  Wkt Geom "), "wkt_geom");
        assert_eq!(normalize_field_name("Población (2024)"), "poblacion_2024");
        assert_eq!(normalize_field_name("a--b__c"), "a_b_c");
        assert_eq!(normalize_field_name("???"), "field");
    }

    #[test]
    fn duplicate_names_are_suffixed() {
        let names = dedupe(vec!["a".into(), "a".into(), "a_2".into(), "b".into()]);
        assert_eq!(names, vec!["a", "a_2", "a_2_2", "b"]);
    }

    #[test]
    fn wkt_keywords_are_promoted() {
        assert_eq!(wkt_geometry_kind("POINT (1 2)"), Some(GeometryKind::MultiPoint));
        assert_eq!(wkt_geometry_kind("MULTIPOINT ((1 2), (3 4))"), Some(GeometryKind::MultiPoint));
        assert_eq!(wkt_geometry_kind("LineString Z (0 0 0, 1 1 1)"), Some(GeometryKind::MultiLineString));
        assert_eq!(wkt_geometry_kind("SRID=4326;POLYGON((0 0,1 0,1 1,0 0))"), Some(GeometryKind::MultiPolygon));
        assert_eq!(wkt_geometry_kind("POINT EMPTY"), Some(GeometryKind::MultiPoint));
        assert_eq!(wkt_geometry_kind("hello"), None);
    }

    #[test]
    fn wkt_column_becomes_multi_geometry_field() {
        let layer = TableLayer::new(
            "Sheet1",
            vec![
                RawField::new("Name", DataType::Utf8),
                RawField::new("WKT_GEOM", DataType::Utf8),
            ],
            vec![
                vec![text("a"), text("POINT (1 2)")],
                vec![text("b"), text("MULTIPOINT ((1 2), (3 4))")],
            ],
        );
        let d = resolve(&layer, &opts());
        let names: Vec<&str> = d.field_names().collect();
        assert_eq!(names, vec!["name", "geometry"]);
        assert_eq!(
            d.geometry_field().unwrap().class,
            StorageClass::Geometry(GeometryKind::MultiPoint)
        );
        assert_eq!(d.geometry_source, Some(GeometrySource::TextColumn));
        assert_eq!(d.dimension, Dimension::Xy);
    }

    #[test]
    fn lat_long_columns_make_a_point_and_are_kept() {
        let layer = TableLayer::new(
            "cities",
            vec![
                RawField::new("lat", DataType::Float64),
                RawField::new("lon", DataType::Float64),
                RawField::new("city", DataType::Utf8),
            ],
            vec![],
        );
        let d = resolve(&layer, &opts());
        let names: Vec<&str> = d.field_names().collect();
        assert_eq!(names, vec!["lat", "lon", "city", "geometry"]);
        assert_eq!(
            d.geometry_field().unwrap().class,
            StorageClass::Geometry(GeometryKind::Point)
        );
        assert_eq!(d.field("lat").unwrap().class, StorageClass::Float);
    }

    #[test]
    fn a_single_coordinate_column_is_enough_for_a_point() {
        let layer = TableLayer::new(
            "t",
            vec![RawField::new("Lat", DataType::Float64), RawField::new("city", DataType::Utf8)],
            vec![],
        );
        let d = resolve(&layer, &opts());
        assert_eq!(d.geometry_source, Some(GeometrySource::LatLong));
        assert_eq!(
            d.geometry_field().unwrap().class,
            StorageClass::Geometry(GeometryKind::Point)
        );
        assert!(d.field("lat").is_some());
    }

    #[test]
    fn coordinate_columns_win_over_native_geometry() {
        let layer = TableLayer::new(
            "parcels",
            vec![
                RawField::new("lat", DataType::Float64),
                RawField::new("lon", DataType::Float64),
            ],
            vec![],
        )
        .with_geometry(GeometryType::new(GeometryKind::Polygon, false), None);
        let d = resolve(&layer, &opts());
        assert_eq!(d.geometry_source, Some(GeometrySource::LatLong));
        assert_eq!(
            d.geometry_field().unwrap().class,
            StorageClass::Geometry(GeometryKind::Point)
        );
    }

    #[test]
    fn table_without_geometry_hints_has_no_geometry() {
        let layer = TableLayer::new(
            "t",
            vec![RawField::new("name", DataType::Utf8), RawField::new("v", DataType::Int64)],
            vec![],
        );
        let d = resolve(&layer, &opts());
        assert!(d.geometry_field().is_none());
        assert_eq!(d.geometry_source, None);
    }

    #[test]
    fn mixed_point_and_multipoint_features_resolve_to_multipoint() {
        let doc = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"id": 1}, "geometry": {"type": "Point", "coordinates": [1, 2]}},
            {"type": "Feature", "properties": {"id": 2}, "geometry": {"type": "MultiPoint", "coordinates": [[3, 4], [5, 6]]}}
        ]}"#;
        let layer = crate::driver::geojson::layer_from_str("sites", doc).unwrap();
        let d = resolve(&layer, &opts());
        assert_eq!(d.geometry_source, Some(GeometrySource::Native));
        assert_eq!(
            d.geometry_field().unwrap().class,
            StorageClass::Geometry(GeometryKind::MultiPoint)
        );
    }

    #[test]
    fn unreadable_sample_falls_back_to_native_type() {
        let layer = TableLayer::new(
            "t",
            vec![
                RawField::new("geom", DataType::Utf8),
                RawField::new("lat", DataType::Float64),
                RawField::new("lon", DataType::Float64),
            ],
            vec![],
        )
        .with_unreadable_features("io failure");
        let d = resolve(&layer, &opts());
        // native type is None: no geometry, raw text column retained
        assert!(d.geometry_field().is_none());
        assert!(d.field("geom").is_some());
    }

    #[test]
    fn unparseable_text_with_unknown_native_type_uses_collection() {
        let layer = TableLayer::new(
            "t",
            vec![RawField::new("the_geom", DataType::Utf8)],
            vec![vec![text("not wkt")]],
        )
        .with_geometry(GeometryType::UNKNOWN, None);
        let d = resolve(&layer, &opts());
        assert_eq!(d.geometry_source, Some(GeometrySource::Native));
        assert_eq!(
            d.geometry_field().unwrap().class,
            StorageClass::Geometry(GeometryKind::GeometryCollection)
        );
        assert!(d.field("the_geom").is_some());
    }

    #[test]
    fn native_geometry_is_promoted_with_dimension() {
        let layer = TableLayer::new("roads", vec![RawField::new("name", DataType::Utf8)], vec![])
            .with_geometry(GeometryType::new(GeometryKind::LineString, true), Some("Shape"));
        let d = resolve(&layer, &opts());
        let g = d.geometry_field().unwrap();
        assert_eq!(g.name, "shape");
        assert_eq!(g.class, StorageClass::Geometry(GeometryKind::MultiLineString));
        assert_eq!(g.dimension, Some(Dimension::Xyz));
        assert_eq!(d.dimension, Dimension::Xyz);
    }

    #[test]
    fn ordinary_field_named_like_geometry_is_renamed() {
        let layer = TableLayer::new(
            "t",
            vec![
                RawField::new("geometry", DataType::Utf8),
                RawField::new("kind", DataType::Utf8),
            ],
            vec![],
        )
        .with_geometry(GeometryType::new(GeometryKind::Polygon, false), None);
        let d = resolve(&layer, &opts());
        let names: Vec<&str> = d.field_names().collect();
        assert_eq!(names, vec!["geometry_2", "kind", "geometry"]);
        assert_eq!(d.fields.iter().filter(|f| f.is_geometry()).count(), 1);
    }
}
