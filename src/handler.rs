//! Format handlers.
//!
//! Every supported format is served by a [`FileHandler`]. The bundled implementation,
//! [`VectorFileHandler`], is parameterized by [`HandlerKind`] and shares one [`ImportServices`]
//! bundle (options, upload guard, drivers, task queue, schema writer, resource catalog).
//!
//! Validation order:
//!
//! 1. the handler must accept the upload's metadata
//! 2. total upload size against `max_upload_size`
//! 3. auxiliary file extensions against the format's optional extensions
//! 4. the user's capacity, before the file is opened
//! 5. byte uploads are spooled to a temporary file; legacy workbooks are normalized
//! 6. admission of the layer count the driver reads from file metadata, before any layer is
//!    loaded (drivers that cannot tell are admitted after step 7)
//! 7. the driver must open the file and report at least one layer; slots reserved for layers
//!    the driver skipped (empty sheets) are returned
//!
//! Every resource acquired on the way (temporary files, the admission) is owned by the returned
//! [`ValidatedUpload`] or dropped on the error path.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::config::ImportOptions;
use crate::detect::{self, HandlerKind, SupportedFormat, UploadMetadata};
use crate::dispatch::{
    self, DispatchHandle, Execution, InMemorySchemaStore, RayonTaskQueue, SchemaWriter, TaskQueue,
};
use crate::driver::{self, VectorDataset, VectorDriver};
use crate::error::{ImportError, ImportResult};
use crate::guard::{Admission, InMemoryUploadCounter, UploadLimitGuard};
use crate::legacy::{self, NormalizedFile};
use crate::naming::{
    InMemoryResourceCatalog, PublishExtractor, PublishRequest, PublishSource, ResourceCatalog,
};
use crate::types::{ImportAction, LayerDescriptor, ResourceDescriptor, SchemaTarget, UploadRequest, UploadSource};

const IMPORT_STEPS: &[&str] = &[
    "start_import",
    "import_resource",
    "create_dynamic_model_fields",
    "publish_resource",
    "create_resource",
];
const COPY_STEPS: &[&str] = &[
    "start_copy",
    "copy_dynamic_model",
    "copy_data_table",
    "publish_resource",
    "copy_resource",
];
const ROLLBACK_STEPS: &[&str] = &["start_rollback", "rollback"];

/// Collaborators shared by every handler.
pub struct ImportServices {
    pub options: Arc<ImportOptions>,
    pub guard: UploadLimitGuard,
    /// Overrides the bundled per-format drivers when set.
    pub driver: Option<Arc<dyn VectorDriver>>,
    pub queue: Arc<dyn TaskQueue>,
    pub schema_writer: Arc<dyn SchemaWriter>,
    pub catalog: Arc<dyn ResourceCatalog>,
}

impl fmt::Debug for ImportServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportServices")
            .field("options", &self.options)
            .field("guard", &self.guard)
            .field("driver", &self.driver.as_ref().map(|d| d.name()))
            .finish_non_exhaustive()
    }
}

impl ImportServices {
    /// In-process services: in-memory counters, schema store and catalog, a rayon worker pool.
    pub fn new(options: ImportOptions) -> ImportResult<Self> {
        options.validate()?;
        let writer: Arc<dyn SchemaWriter> = Arc::new(InMemorySchemaStore::new());
        let queue = Arc::new(RayonTaskQueue::new(Arc::clone(&writer), &options)?);
        Ok(Self {
            guard: UploadLimitGuard::new(
                Arc::new(InMemoryUploadCounter::new()),
                options.max_parallel_uploads,
            ),
            options: Arc::new(options),
            driver: None,
            queue,
            schema_writer: writer,
            catalog: Arc::new(InMemoryResourceCatalog::new()),
        })
    }

    pub fn with_guard(mut self, guard: UploadLimitGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_driver(mut self, driver: Arc<dyn VectorDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ResourceCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Write schemas through `writer` on a fresh rayon worker pool.
    pub fn with_schema_writer(mut self, writer: Arc<dyn SchemaWriter>) -> ImportResult<Self> {
        self.queue = Arc::new(RayonTaskQueue::new(Arc::clone(&writer), &self.options)?);
        self.schema_writer = writer;
        Ok(self)
    }

    /// Submit chunks to an external queue; `writer` still creates schema targets.
    pub fn with_task_queue(mut self, queue: Arc<dyn TaskQueue>, writer: Arc<dyn SchemaWriter>) -> Self {
        self.queue = queue;
        self.schema_writer = writer;
        self
    }

    pub fn driver_for(&self, kind: HandlerKind) -> Arc<dyn VectorDriver> {
        match &self.driver {
            Some(d) => Arc::clone(d),
            None => driver::for_kind(kind),
        }
    }
}

/// The file a driver reads, with whatever temporary files back it.
struct Materialized {
    normalized: Option<NormalizedFile>,
    _spooled: Option<NamedTempFile>,
    path: PathBuf,
}

impl Materialized {
    fn path(&self) -> &Path {
        match &self.normalized {
            Some(n) => n.path(),
            None => &self.path,
        }
    }
}

/// An upload that passed validation.
///
/// Holds the admission and every temporary file until dropped.
pub struct ValidatedUpload {
    dataset: Box<dyn VectorDataset>,
    file: Materialized,
    kind: HandlerKind,
    base_name: String,
    admission: Admission,
}

impl fmt::Debug for ValidatedUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedUpload")
            .field("kind", &self.kind)
            .field("path", &self.path())
            .field("layers", &self.dataset.layer_count())
            .field("admission", &self.admission)
            .finish()
    }
}

impl ValidatedUpload {
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Path the driver read (the converted file for legacy workbooks).
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Declared filename without extension.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn dataset(&self) -> &dyn VectorDataset {
        self.dataset.as_ref()
    }

    pub fn layer_count(&self) -> usize {
        self.dataset.layer_count()
    }

    /// Sheets of a legacy workbook that were not converted.
    pub fn dropped_sheets(&self) -> &[String] {
        self.file
            .normalized
            .as_ref()
            .map(|n| n.dropped_sheets())
            .unwrap_or_default()
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Release the admission and delete temporary files now.
    pub fn release(self) {
        drop(self);
    }
}

/// Contract implemented by each format handler.
pub trait FileHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    fn supported_format(&self) -> SupportedFormat {
        self.kind().supported_format()
    }

    /// Ordered step names for `action`; `None` when the action is not supported.
    fn actions(&self, action: ImportAction) -> Option<&'static [&'static str]>;

    /// Pure metadata check.
    fn can_handle(&self, meta: UploadMetadata<'_>) -> bool {
        detect::classify(meta) == Some(self.kind())
    }

    /// Run every validation step and keep what was acquired.
    fn validate(&self, upload: &UploadRequest) -> ImportResult<ValidatedUpload>;

    /// Dry-run validation: every acquired resource is released before returning.
    fn is_valid(&self, upload: &UploadRequest) -> ImportResult<bool> {
        self.validate(upload).map(ValidatedUpload::release)?;
        Ok(true)
    }

    fn extract_resource_to_publish(
        &self,
        upload: &UploadRequest,
        request: PublishRequest<'_>,
    ) -> ImportResult<Vec<ResourceDescriptor>>;

    /// Dispatch `layer`'s fields into `schema`, creating a schema called `layer_name` when
    /// none is given.
    fn create_dynamic_model_fields(
        &self,
        layer: &LayerDescriptor,
        schema: Option<SchemaTarget>,
        overwrite: bool,
        execution: &Execution,
        layer_name: &str,
    ) -> ImportResult<(SchemaTarget, DispatchHandle)>;
}

/// Handler for spreadsheet, legacy spreadsheet and generic vector uploads.
#[derive(Debug, Clone)]
pub struct VectorFileHandler {
    kind: HandlerKind,
    services: Arc<ImportServices>,
}

impl VectorFileHandler {
    pub fn new(kind: HandlerKind, services: Arc<ImportServices>) -> Self {
        Self { kind, services }
    }

    fn check_size(&self, upload: &UploadRequest) -> ImportResult<()> {
        let Some(max) = self.services.options.max_upload_size else {
            return Ok(());
        };
        let size = upload.total_size()?;
        if size > max {
            tracing::info!(filename = %upload.filename, size, max, "upload rejected: too large");
            return Err(ImportError::UploadTooLarge { size, max });
        }
        Ok(())
    }

    fn check_aux_files(&self, upload: &UploadRequest) -> ImportResult<()> {
        let format = self.supported_format();
        for (role, path) in &upload.aux_files {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            if !format.accepts_aux_extension(ext) {
                return Err(ImportError::invalid_file(format!(
                    "auxiliary file '{role}' ({}) is not accepted by the {} handler",
                    path.display(),
                    format.label
                )));
            }
        }
        Ok(())
    }

    /// Put the upload on disk and, for legacy workbooks, convert it.
    fn materialize(&self, upload: &UploadRequest) -> ImportResult<Materialized> {
        let (spooled, path) = match &upload.source {
            UploadSource::Path(p) => (None, p.clone()),
            UploadSource::Bytes(bytes) => {
                let suffix = upload
                    .extension()
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();
                let mut tmp = tempfile::Builder::new()
                    .prefix("layer-import-")
                    .suffix(&suffix)
                    .tempfile()?;
                tmp.write_all(bytes)?;
                tmp.flush()?;
                let path = tmp.path().to_path_buf();
                tracing::debug!(filename = %upload.filename, path = %path.display(), bytes = bytes.len(), "upload spooled");
                (Some(tmp), path)
            }
        };
        let normalized = if self.kind == HandlerKind::LegacySpreadsheet {
            Some(legacy::normalize(&path)?)
        } else {
            None
        };
        Ok(Materialized {
            normalized,
            _spooled: spooled,
            path,
        })
    }
}

impl FileHandler for VectorFileHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn actions(&self, action: ImportAction) -> Option<&'static [&'static str]> {
        match (self.kind, action) {
            (_, ImportAction::Import) => Some(IMPORT_STEPS),
            (HandlerKind::LegacySpreadsheet, ImportAction::Copy) => None,
            (_, ImportAction::Copy) => Some(COPY_STEPS),
            (_, ImportAction::Rollback) => Some(ROLLBACK_STEPS),
        }
    }

    fn validate(&self, upload: &UploadRequest) -> ImportResult<ValidatedUpload> {
        if !self.can_handle(UploadMetadata::from(upload)) {
            return Err(ImportError::UnsupportedFormat {
                message: format!("'{}' is not handled by the {:?} handler", upload.filename, self.kind),
            });
        }
        self.check_size(upload)?;
        self.check_aux_files(upload)?;
        self.services.guard.check_capacity(&upload.user)?;

        let file = self.materialize(upload)?;
        let driver = self.services.driver_for(self.kind);
        let early = match driver.layer_count(file.path()) {
            Some(0) => {
                return Err(ImportError::invalid_file(format!(
                    "'{}' contains no layers",
                    upload.filename
                )));
            }
            Some(n) => Some(self.services.guard.admit(&upload.user, n)?),
            None => None,
        };
        let dataset = driver.open(file.path()).ok_or_else(|| {
            ImportError::invalid_file(format!(
                "'{}' could not be opened by the {} driver",
                upload.filename,
                driver.name()
            ))
        })?;
        let layer_count = dataset.layer_count();
        if layer_count == 0 {
            return Err(ImportError::invalid_file(format!(
                "'{}' contains no layers",
                upload.filename
            )));
        }

        let admission = match early {
            Some(mut admission) if admission.slots() >= layer_count => {
                admission.shrink_to(layer_count);
                admission
            }
            other => {
                drop(other);
                self.services.guard.admit(&upload.user, layer_count)?
            }
        };
        tracing::info!(
            filename = %upload.filename,
            user = %upload.user,
            kind = ?self.kind,
            layers = layer_count,
            "upload validated"
        );
        Ok(ValidatedUpload {
            dataset,
            file,
            kind: self.kind,
            base_name: upload.base_name().to_string(),
            admission,
        })
    }

    fn extract_resource_to_publish(
        &self,
        upload: &UploadRequest,
        request: PublishRequest<'_>,
    ) -> ImportResult<Vec<ResourceDescriptor>> {
        let driver = self.services.driver_for(self.kind);
        let extractor = PublishExtractor {
            driver: driver.as_ref(),
            catalog: self.services.catalog.as_ref(),
            default_crs: &self.services.options.default_crs,
        };
        if request.action != ImportAction::Import {
            let source = PublishSource {
                path: Path::new(&upload.filename),
                base_name: upload.base_name(),
            };
            return extractor.extract(source, request);
        }
        let file = self.materialize(upload)?;
        let source = PublishSource {
            path: file.path(),
            base_name: upload.base_name(),
        };
        extractor.extract(source, request)
    }

    fn create_dynamic_model_fields(
        &self,
        layer: &LayerDescriptor,
        schema: Option<SchemaTarget>,
        overwrite: bool,
        execution: &Execution,
        layer_name: &str,
    ) -> ImportResult<(SchemaTarget, DispatchHandle)> {
        let target = match schema {
            Some(s) => s,
            None => self.services.schema_writer.ensure_schema(layer_name)?,
        };
        let handle = dispatch::dispatch(
            execution,
            layer,
            &target,
            overwrite,
            self.services.queue.as_ref(),
            self.services.options.schema_chunk_size,
        )?;
        Ok((target, handle))
    }
}

/// One handler per [`HandlerKind`], selected by [`detect::detect`].
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<VectorFileHandler>,
}

impl HandlerRegistry {
    pub fn new(services: Arc<ImportServices>) -> Self {
        let handlers = [
            HandlerKind::LegacySpreadsheet,
            HandlerKind::Spreadsheet,
            HandlerKind::Vector,
        ]
        .into_iter()
        .map(|kind| VectorFileHandler::new(kind, Arc::clone(&services)))
        .collect();
        Self { handlers }
    }

    pub fn get(&self, kind: HandlerKind) -> Option<&dyn FileHandler> {
        self.handlers
            .iter()
            .find(|h| h.kind == kind)
            .map(|h| h as &dyn FileHandler)
    }

    /// Handler for an upload, or `UnsupportedFormat`.
    pub fn handler_for(&self, upload: &UploadRequest) -> ImportResult<&dyn FileHandler> {
        let kind = detect::detect(upload)?;
        self.get(kind).ok_or_else(|| ImportError::UnsupportedFormat {
            message: format!("no handler registered for {kind:?}"),
        })
    }

    /// Formats accepted by the registered handlers.
    pub fn supported_formats(&self) -> Vec<SupportedFormat> {
        self.handlers.iter().map(|h| h.supported_format()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, RawField, TableLayer};
    use crate::error::{ImportErrorKind, LimitReason};
    use crate::guard::UploadCounterStore;
    use crate::types::DataType;

    fn layers(n: usize) -> Vec<TableLayer> {
        (0..n)
            .map(|i| {
                TableLayer::new(
                    format!("Sheet {}", i + 1),
                    vec![RawField::new("name", DataType::Utf8)],
                    vec![],
                )
            })
            .collect()
    }

    fn services(driver: MemoryDriver, counter: Arc<InMemoryUploadCounter>) -> Arc<ImportServices> {
        let opts = ImportOptions {
            worker_threads: Some(2),
            ..ImportOptions::default()
        };
        let guard = UploadLimitGuard::new(counter, opts.max_parallel_uploads);
        Arc::new(
            ImportServices::new(opts)
                .unwrap()
                .with_guard(guard)
                .with_driver(Arc::new(driver)),
        )
    }

    fn upload(name: &str) -> UploadRequest {
        UploadRequest::from_bytes(b"stub".to_vec(), name, "alice")
    }

    #[test]
    fn is_valid_releases_its_admission() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let handler = VectorFileHandler::new(
            HandlerKind::Spreadsheet,
            services(MemoryDriver::new(layers(2)), counter.clone()),
        );
        assert!(handler.is_valid(&upload("a.xlsx")).unwrap());
        assert_eq!(counter.active("alice"), 0);

        let held = handler.validate(&upload("a.xlsx")).unwrap();
        assert_eq!(counter.active("alice"), 2);
        assert_eq!(held.layer_count(), 2);
        let spooled = held.path().to_path_buf();
        assert!(spooled.exists());
        held.release();
        assert_eq!(counter.active("alice"), 0);
        assert!(!spooled.exists());
    }

    #[test]
    fn too_many_layers_is_rejected_and_nothing_leaks() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let handler = VectorFileHandler::new(
            HandlerKind::Spreadsheet,
            services(MemoryDriver::new(layers(5)), counter.clone()),
        );
        match handler.is_valid(&upload("big.xlsx")).unwrap_err() {
            ImportError::ParallelismLimitExceeded { reason, layer_count, max, .. } => {
                assert_eq!(reason, LimitReason::LayerCountExceedsMax);
                assert_eq!((layer_count, max), (5, 5));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(counter.total_active(), 0);
    }

    /// Reports `sheets` from metadata and counts how often layers are loaded.
    struct CountingDriver {
        sheets: usize,
        non_empty: usize,
        opened: std::sync::atomic::AtomicUsize,
    }

    impl VectorDriver for CountingDriver {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn open(&self, path: &Path) -> Option<Box<dyn VectorDataset>> {
            self.opened.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            MemoryDriver::new(layers(self.non_empty)).open(path)
        }

        fn layer_count(&self, _path: &Path) -> Option<usize> {
            Some(self.sheets)
        }
    }

    fn counting_handler(
        sheets: usize,
        non_empty: usize,
        counter: Arc<InMemoryUploadCounter>,
    ) -> (Arc<CountingDriver>, VectorFileHandler) {
        let driver = Arc::new(CountingDriver {
            sheets,
            non_empty,
            opened: std::sync::atomic::AtomicUsize::new(0),
        });
        let opts = ImportOptions {
            worker_threads: Some(1),
            ..ImportOptions::default()
        };
        let guard = UploadLimitGuard::new(counter, opts.max_parallel_uploads);
        let svc = ImportServices::new(opts)
            .unwrap()
            .with_guard(guard)
            .with_driver(driver.clone());
        (driver, VectorFileHandler::new(HandlerKind::Spreadsheet, Arc::new(svc)))
    }

    #[test]
    fn admission_is_refused_before_any_layer_is_loaded() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let (driver, handler) = counting_handler(50, 50, counter.clone());
        match handler.is_valid(&upload("huge.xlsx")).unwrap_err() {
            ImportError::ParallelismLimitExceeded { reason, layer_count, .. } => {
                assert_eq!(reason, LimitReason::LayerCountExceedsMax);
                assert_eq!(layer_count, 50);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(driver.opened.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(counter.total_active(), 0);
    }

    #[test]
    fn slots_of_skipped_sheets_are_returned_after_loading() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let (driver, handler) = counting_handler(4, 2, counter.clone());
        let held = handler.validate(&upload("sparse.xlsx")).unwrap();
        assert_eq!(driver.opened.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(held.admission().slots(), 2);
        assert_eq!(counter.active("alice"), 2);
        held.release();
        assert_eq!(counter.total_active(), 0);
    }

    #[test]
    fn saturated_user_is_rejected_before_opening() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        counter.try_reserve("alice", 5, usize::MAX).unwrap();
        let handler = VectorFileHandler::new(
            HandlerKind::Spreadsheet,
            services(MemoryDriver::unreadable(), counter.clone()),
        );
        let err = handler.is_valid(&upload("a.xlsx")).unwrap_err();
        assert_eq!(err.kind(), ImportErrorKind::ParallelismLimitExceeded);
    }

    #[test]
    fn unopenable_or_empty_files_are_invalid() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let unreadable = VectorFileHandler::new(
            HandlerKind::Vector,
            services(MemoryDriver::unreadable(), counter.clone()),
        );
        assert_eq!(
            unreadable.is_valid(&upload("a.csv")).unwrap_err().kind(),
            ImportErrorKind::InvalidFile
        );
        let empty = VectorFileHandler::new(
            HandlerKind::Vector,
            services(MemoryDriver::new(vec![]), counter.clone()),
        );
        assert_eq!(
            empty.is_valid(&upload("a.csv")).unwrap_err().kind(),
            ImportErrorKind::InvalidFile
        );
        assert_eq!(counter.total_active(), 0);
    }

    #[test]
    fn oversized_uploads_are_rejected() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let opts = ImportOptions {
            max_upload_size: Some(3),
            worker_threads: Some(1),
            ..ImportOptions::default()
        };
        let svc = ImportServices::new(opts)
            .unwrap()
            .with_guard(UploadLimitGuard::new(counter, 5))
            .with_driver(Arc::new(MemoryDriver::new(layers(1))));
        let handler = VectorFileHandler::new(HandlerKind::Vector, Arc::new(svc));
        let err = handler.is_valid(&upload("a.csv")).unwrap_err();
        assert!(matches!(err, ImportError::UploadTooLarge { size: 4, max: 3 }));
    }

    #[test]
    fn unexpected_aux_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sld = dir.path().join("style.sld");
        let exe = dir.path().join("tool.exe");
        std::fs::write(&sld, b"<sld/>").unwrap();
        std::fs::write(&exe, b"MZ").unwrap();

        let counter = Arc::new(InMemoryUploadCounter::new());
        let handler = VectorFileHandler::new(
            HandlerKind::Spreadsheet,
            services(MemoryDriver::new(layers(1)), counter),
        );
        assert!(handler.is_valid(&upload("a.xlsx").with_aux_file("sld_file", &sld)).unwrap());
        let err = handler
            .is_valid(&upload("a.xlsx").with_aux_file("tool", &exe))
            .unwrap_err();
        assert_eq!(err.kind(), ImportErrorKind::InvalidFile);
    }

    #[test]
    fn legacy_handler_has_no_copy_action() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let svc = services(MemoryDriver::new(layers(1)), counter);
        let registry = HandlerRegistry::new(svc);
        let legacy = registry.get(HandlerKind::LegacySpreadsheet).unwrap();
        assert!(legacy.actions(ImportAction::Copy).is_none());
        assert_eq!(legacy.actions(ImportAction::Rollback), Some(ROLLBACK_STEPS));
        let modern = registry.get(HandlerKind::Spreadsheet).unwrap();
        assert_eq!(modern.actions(ImportAction::Copy).map(|s| s[0]), Some("start_copy"));
        assert_eq!(registry.supported_formats().len(), 3);
    }

    #[test]
    fn registry_routes_by_extension() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let registry = HandlerRegistry::new(services(MemoryDriver::new(layers(1)), counter));
        let h = registry.handler_for(&upload("legacy.XLS")).unwrap();
        assert_eq!(h.kind(), HandlerKind::LegacySpreadsheet);
        assert!(!h.can_handle(UploadMetadata::from(&upload("a.csv"))));
        assert_eq!(
            registry.handler_for(&upload("notes.txt")).err().unwrap().kind(),
            ImportErrorKind::UnsupportedFormat
        );
    }

    #[test]
    fn dynamic_model_fields_create_the_schema_when_missing() {
        let counter = Arc::new(InMemoryUploadCounter::new());
        let svc = services(MemoryDriver::new(layers(1)), counter);
        let handler = VectorFileHandler::new(HandlerKind::Spreadsheet, svc);
        let layer = crate::schema::resolve(&layers(1)[0], &ImportOptions::default());
        let execution = Execution::new("exec");

        let (target, handle) = handler
            .create_dynamic_model_fields(&layer, None, false, &execution, "sheet_1")
            .unwrap();
        assert_eq!(target.name, "sheet_1");
        assert_eq!(handle.len(), 1);
        assert!(matches!(
            handle.wait(&execution).unwrap(),
            dispatch::DispatchOutcome::Completed(_)
        ));
    }
}
