//! Resource naming and publish extraction.
//!
//! Resource names are sanitized to `[a-z0-9_]`, at most [`MAX_NAME_LEN`] characters, and
//! sanitizing twice changes nothing. A single-layer file is named after the file; layers of a
//! multi-layer file are named `<file>_<sheet>`; names that still collide within one file get
//! `_2`, `_3`... suffixes.
//!
//! CRS resolution never fails: anything that cannot be turned into an authority code falls back
//! to the configured default.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{LazyLock, Mutex, PoisonError};

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::driver::{VectorDriver, VectorLayer};
use crate::error::{ImportError, ImportResult};
use crate::types::{ImportAction, ResourceDescriptor};

/// Upper bound on sanitized resource names.
pub const MAX_NAME_LEN: usize = 64;

/// Name used when sanitization leaves nothing.
const FALLBACK_NAME: &str = "layer";

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid regex"));
static AUTHORITY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+):(\d+)$").expect("valid regex"));
static OGC_URN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^urn:ogc:def:crs:([A-Za-z]+):[^:]*:(\d+)$").expect("valid regex")
});
static OGC_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://www\.opengis\.net/def/crs/([A-Za-z]+)/[^/]+/(\d+)$")
        .expect("valid regex")
});
static WKT_AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:AUTHORITY|ID)\[\s*"([A-Za-z]+)"\s*,\s*"?(\d+)"?\s*\]"#)
        .expect("valid regex")
});

/// Decompose to NFKD and drop every non-ASCII character (accents included).
pub fn ascii_fold(s: &str) -> String {
    s.nfkd().filter(char::is_ascii).collect()
}

/// Sanitize a resource name: every run of characters outside `[A-Za-z0-9]` becomes one `_`.
pub fn sanitize_name(raw: &str) -> String {
    let folded = ascii_fold(raw);
    let replaced = NON_WORD.replace_all(&folded, "_");
    let lowered = replaced.trim_matches('_').to_ascii_lowercase();
    let truncated: String = lowered.chars().take(MAX_NAME_LEN).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Resource name for `sheet` of a file called `base_name` that has `layer_count` layers.
pub fn resource_name(base_name: &str, sheet: &str, layer_count: usize) -> String {
    let name = if layer_count > 1 {
        sanitize_name(&format!("{base_name}_{}", sanitize_name(sheet)))
    } else {
        sanitize_name(base_name)
    };
    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name
    }
}

/// Resource names for every layer of one file, unique within the file.
///
/// Collisions (`Sheet 1` / `Sheet-1`, or names cut at [`MAX_NAME_LEN`]) are suffixed `_2`, `_3`...
/// in layer order, shortening the name so the suffix still fits.
pub fn resource_names(base_name: &str, sheets: &[&str]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(sheets.len());
    sheets
        .iter()
        .map(|sheet| {
            let name = resource_name(base_name, sheet, sheets.len());
            if seen.insert(name.clone()) {
                return name;
            }
            let mut n = 2;
            let unique = loop {
                let suffix = format!("_{n}");
                let stem: String = name.chars().take(MAX_NAME_LEN - suffix.len()).collect();
                let candidate = format!("{}{suffix}", stem.trim_end_matches('_'));
                if !seen.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            tracing::debug!(%base_name, %sheet, name = %unique, "resource name collision renamed");
            seen.insert(unique.clone());
            unique
        })
        .collect()
}

/// Parse a spatial reference string into an authority code such as `EPSG:4326`.
///
/// Understands `EPSG:3857`, OGC URNs and URLs, CRS84 and WKT carrying an `AUTHORITY`/`ID`.
pub fn authority_code(srs: &str) -> Option<String> {
    let srs = srs.trim();
    if srs.to_ascii_uppercase().ends_with("CRS84") {
        return Some("EPSG:4326".to_string());
    }
    let caps = AUTHORITY_CODE
        .captures(srs)
        .or_else(|| OGC_URN.captures(srs))
        .or_else(|| OGC_URL.captures(srs))
        .or_else(|| WKT_AUTHORITY.captures_iter(srs).last())?;
    Some(format!("{}:{}", caps[1].to_ascii_uppercase(), &caps[2]))
}

/// CRS of `layer`, or `default_crs` when it is missing or cannot be parsed.
pub fn resolve_crs(layer: &dyn VectorLayer, default_crs: &str) -> String {
    match layer.spatial_ref() {
        Ok(Some(srs)) => authority_code(&srs).unwrap_or_else(|| {
            tracing::warn!(layer = layer.name(), %srs, default = default_crs, "unparseable spatial reference; using default CRS");
            default_crs.to_string()
        }),
        Ok(None) => default_crs.to_string(),
        Err(e) => {
            tracing::warn!(layer = layer.name(), error = %e, default = default_crs, "spatial reference lookup failed; using default CRS");
            default_crs.to_string()
        }
    }
}

/// A previously published resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub alternate: String,
    pub crs: Option<String>,
}

/// Lookup of already published resources, used by the copy action.
pub trait ResourceCatalog: Send + Sync {
    /// First resource whose alternate starts with `prefix`, ignoring case.
    fn find_by_alternate_prefix(&self, prefix: &str) -> Option<CatalogEntry>;
}

#[derive(Debug, Default)]
pub struct InMemoryResourceCatalog {
    entries: Mutex<Vec<CatalogEntry>>,
}

impl InMemoryResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, alternate: impl Into<String>, crs: Option<&str>) {
        let mut g = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        g.push(CatalogEntry {
            alternate: alternate.into(),
            crs: crs.map(str::to_string),
        });
    }
}

impl ResourceCatalog for InMemoryResourceCatalog {
    fn find_by_alternate_prefix(&self, prefix: &str) -> Option<CatalogEntry> {
        let prefix = prefix.to_lowercase();
        let g = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        g.iter()
            .find(|e| e.alternate.to_lowercase().starts_with(&prefix))
            .cloned()
    }
}

/// What the caller wants published.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub action: ImportAction,
    pub layer_name: &'a str,
    pub alternate: Option<&'a str>,
}

/// The file a publish request refers to: where it is and what it was called.
#[derive(Debug, Clone, Copy)]
pub struct PublishSource<'a> {
    pub path: &'a Path,
    pub base_name: &'a str,
}

/// Produces the [`ResourceDescriptor`]s to publish for an action.
#[derive(Clone, Copy)]
pub struct PublishExtractor<'a> {
    pub driver: &'a dyn VectorDriver,
    pub catalog: &'a dyn ResourceCatalog,
    pub default_crs: &'a str,
}

impl PublishExtractor<'_> {
    /// - `Copy` reuses the CRS of the catalog entry matching `layer_name`; the file is not opened.
    /// - `Import` opens `source` and describes every layer matching `layer_name`.
    /// - `Rollback` publishes nothing.
    pub fn extract(
        &self,
        source: PublishSource<'_>,
        request: PublishRequest<'_>,
    ) -> ImportResult<Vec<ResourceDescriptor>> {
        match request.action {
            ImportAction::Copy => Ok(vec![self.extract_copy(request)]),
            ImportAction::Import => self.extract_import(source, request),
            ImportAction::Rollback => Ok(Vec::new()),
        }
    }

    fn extract_copy(&self, request: PublishRequest<'_>) -> ResourceDescriptor {
        let crs = self
            .catalog
            .find_by_alternate_prefix(request.layer_name)
            .and_then(|e| e.crs)
            .unwrap_or_else(|| {
                tracing::debug!(layer = request.layer_name, "no catalog CRS for copy; using default");
                self.default_crs.to_string()
            });
        ResourceDescriptor {
            name: request.alternate.unwrap_or(request.layer_name).to_string(),
            crs,
        }
    }

    fn extract_import(
        &self,
        source: PublishSource<'_>,
        request: PublishRequest<'_>,
    ) -> ImportResult<Vec<ResourceDescriptor>> {
        let dataset = self.driver.open(source.path).ok_or_else(|| {
            ImportError::invalid_file(format!("{}: cannot be opened", source.path.display()))
        })?;
        let layers = dataset.layers();
        let sheets: Vec<&str> = layers.iter().map(|l| l.name()).collect();
        let names = resource_names(source.base_name, &sheets);
        let wanted = sanitize_name(request.layer_name);
        let descriptors: Vec<ResourceDescriptor> = layers
            .iter()
            .zip(names)
            .filter_map(|(layer, name)| {
                let matches = sanitize_name(layer.name()) == wanted || name == wanted;
                matches.then(|| ResourceDescriptor {
                    name: request.alternate.map(str::to_string).unwrap_or(name),
                    crs: resolve_crs(*layer, self.default_crs),
                })
            })
            .collect();
        tracing::debug!(
            path = %source.path.display(),
            layer = request.layer_name,
            matched = descriptors.len(),
            "publish resources extracted"
        );
        Ok(descriptors)
    }
}

/// Descriptors for every layer of a file called `base_name`, in layer order.
pub fn describe_layers(
    layers: &[&dyn VectorLayer],
    base_name: &str,
    default_crs: &str,
) -> Vec<ResourceDescriptor> {
    let sheets: Vec<&str> = layers.iter().map(|l| l.name()).collect();
    resource_names(base_name, &sheets)
        .into_iter()
        .zip(layers)
        .map(|(name, layer)| ResourceDescriptor {
            name,
            crs: resolve_crs(*layer, default_crs),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, TableLayer};

    #[test]
    fn sanitize_is_idempotent_and_bounded() {
        let long = "x".repeat(200);
        let inputs = [
            "Data Export",
            "  __Já Vú!!__ ",
            "Ünïcödé Name (2024)",
            "a - b -- c",
            "日本語",
            "",
            "___",
            long.as_str(),
            "ends with 63 chars then underscore aaaaaaaaaaaaaaaaaaaaaaaaaaa_b",
        ];
        for s in inputs {
            let once = sanitize_name(s);
            assert_eq!(sanitize_name(&once), once, "input {s:?}");
            assert!(once.len() <= MAX_NAME_LEN);
            assert!(!once.starts_with('_') && !once.ends_with('_'));
        }
        assert_eq!(sanitize_name("Ünïcödé Name (2024)"), "unicode_name_2024");
        assert_eq!(sanitize_name("snake__case"), "snake_case");
        assert_eq!(sanitize_name("Sheet _ 1"), "sheet_1");
    }

    #[test]
    fn multi_sheet_files_prefix_the_file_name() {
        assert_eq!(resource_name("Data Export", "Sheet 1", 2), "data_export_sheet_1");
        assert_eq!(resource_name("Data Export", "2024 Q1", 2), "data_export_2024_q1");
        assert_eq!(resource_name("Data Export", "Sheet 1", 1), "data_export");
        assert_eq!(resource_name("!!!", "", 1), "layer");
        assert!(resource_name(&"n".repeat(60), "sheet name", 3).len() <= MAX_NAME_LEN);
    }

    #[test]
    fn colliding_layer_names_are_suffixed_within_bound() {
        let names = resource_names("Data", &["Sheet 1", "Sheet-1", "sheet_1", "Other"]);
        assert_eq!(names, vec!["data_sheet_1", "data_sheet_1_2", "data_sheet_1_3", "data_other"]);

        let base = "b".repeat(70);
        let names = resource_names(&base, &["first", "second"]);
        assert_eq!(names[0], "b".repeat(MAX_NAME_LEN));
        assert_eq!(names[1], format!("{}_2", "b".repeat(MAX_NAME_LEN - 2)));
        for n in &names {
            assert!(n.len() <= MAX_NAME_LEN);
            assert_eq!(&sanitize_name(n), n);
        }
    }

    #[test]
    fn authority_codes_are_parsed_from_common_forms() {
        assert_eq!(authority_code("EPSG:3857").as_deref(), Some("EPSG:3857"));
        assert_eq!(authority_code("epsg:32633").as_deref(), Some("EPSG:32633"));
        assert_eq!(authority_code("urn:ogc:def:crs:EPSG::2056").as_deref(), Some("EPSG:2056"));
        assert_eq!(authority_code("urn:ogc:def:crs:OGC:1.3:CRS84").as_deref(), Some("EPSG:4326"));
        assert_eq!(
            authority_code("http://www.opengis.net/def/crs/EPSG/0/25832").as_deref(),
            Some("EPSG:25832")
        );
        let wkt = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],AUTHORITY["EPSG","4326"]]"#;
        assert_eq!(authority_code(wkt).as_deref(), Some("EPSG:4326"));
        assert_eq!(authority_code("+proj=longlat"), None);
    }

    #[test]
    fn crs_falls_back_to_default() {
        let broken = TableLayer::new("t", vec![], vec![]).with_broken_spatial_ref("no srs");
        assert_eq!(resolve_crs(&broken, "EPSG:4326"), "EPSG:4326");
        let garbage = TableLayer::new("t", vec![], vec![]).with_spatial_ref("???");
        assert_eq!(resolve_crs(&garbage, "EPSG:4326"), "EPSG:4326");
        let missing = TableLayer::new("t", vec![], vec![]);
        assert_eq!(resolve_crs(&missing, "EPSG:3035"), "EPSG:3035");
        let good = TableLayer::new("t", vec![], vec![]).with_spatial_ref("EPSG:3857");
        assert_eq!(resolve_crs(&good, "EPSG:4326"), "EPSG:3857");
    }

    fn extractor<'a>(
        driver: &'a MemoryDriver,
        catalog: &'a InMemoryResourceCatalog,
    ) -> PublishExtractor<'a> {
        PublishExtractor {
            driver,
            catalog,
            default_crs: "EPSG:4326",
        }
    }

    fn source() -> PublishSource<'static> {
        PublishSource {
            path: Path::new("Data Export.xlsx"),
            base_name: "Data Export",
        }
    }

    #[test]
    fn import_extracts_matching_layers() {
        let driver = MemoryDriver::new(vec![
            TableLayer::new("Sheet 1", vec![], vec![]).with_broken_spatial_ref("boom"),
            TableLayer::new("2024 Q1", vec![], vec![]).with_spatial_ref("EPSG:3857"),
        ]);
        let catalog = InMemoryResourceCatalog::new();
        let ex = extractor(&driver, &catalog);

        let out = ex
            .extract(
                source(),
                PublishRequest {
                    action: ImportAction::Import,
                    layer_name: "Sheet 1",
                    alternate: None,
                },
            )
            .unwrap();
        assert_eq!(
            out,
            vec![ResourceDescriptor {
                name: "data_export_sheet_1".to_string(),
                crs: "EPSG:4326".to_string(),
            }]
        );

        let out = ex
            .extract(
                source(),
                PublishRequest {
                    action: ImportAction::Import,
                    layer_name: "data_export_2024_q1",
                    alternate: Some("quarterly"),
                },
            )
            .unwrap();
        assert_eq!(out[0].name, "quarterly");
        assert_eq!(out[0].crs, "EPSG:3857");
    }

    #[test]
    fn import_of_unopenable_file_is_invalid() {
        let driver = MemoryDriver::unreadable();
        let catalog = InMemoryResourceCatalog::new();
        let err = extractor(&driver, &catalog)
            .extract(
                source(),
                PublishRequest {
                    action: ImportAction::Import,
                    layer_name: "x",
                    alternate: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ImportErrorKind::InvalidFile);
    }

    #[test]
    fn copy_reuses_catalog_crs_without_opening_the_file() {
        let driver = MemoryDriver::unreadable();
        let catalog = InMemoryResourceCatalog::new();
        catalog.insert("Roads_2024", Some("EPSG:32632"));
        catalog.insert("rivers", None);
        let ex = extractor(&driver, &catalog);

        let copy = |layer_name: &'static str| {
            ex.extract(
                source(),
                PublishRequest {
                    action: ImportAction::Copy,
                    layer_name,
                    alternate: Some("copy_of_it"),
                },
            )
            .unwrap()
        };
        assert_eq!(copy("roads")[0].crs, "EPSG:32632");
        assert_eq!(copy("roads")[0].name, "copy_of_it");
        assert_eq!(copy("rivers")[0].crs, "EPSG:4326");
        assert_eq!(copy("lakes")[0].crs, "EPSG:4326");
    }
}
