//! End-to-end import.
//!
//! [`Importer::import`] runs detection, validation, schema resolution, schema dispatch and
//! resource naming for one upload. Every layer is resolved before the first chunk is submitted,
//! and every dispatch is joined before the upload's admission and temporary files are released.

use std::fmt;
use std::sync::Arc;

use crate::detect::{self, HandlerKind, UploadMetadata};
use crate::dispatch::{DispatchOutcome, DispatchReport, Execution};
use crate::error::{ImportError, ImportResult};
use crate::handler::{HandlerRegistry, ImportServices};
use crate::naming;
use crate::observability::{ImportContext, ImportObserver, ImportSeverity, ImportStats};
use crate::schema;
use crate::types::{LayerDescriptor, ResourceDescriptor, UploadRequest};

/// Result of a completed import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub execution_id: String,
    pub handler: HandlerKind,
    /// Resolved layers in driver order.
    pub layers: Vec<LayerDescriptor>,
    /// One resource per layer, same order as `layers`.
    pub resources: Vec<ResourceDescriptor>,
    pub dispatches: Vec<DispatchReport>,
    /// Legacy workbook sheets that were not converted.
    pub dropped_sheets: Vec<String>,
}

impl ImportReport {
    pub fn chunks(&self) -> usize {
        self.dispatches.iter().map(|d| d.chunks).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Completed(ImportReport),
    /// The execution was cancelled while schema chunks were running.
    Cancelled,
}

/// Runs imports against a shared set of services.
pub struct Importer {
    services: Arc<ImportServices>,
    registry: HandlerRegistry,
    observer: Option<Arc<dyn ImportObserver>>,
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("services", &self.services)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Importer {
    pub fn new(services: Arc<ImportServices>) -> Self {
        Self {
            registry: HandlerRegistry::new(Arc::clone(&services)),
            services,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn services(&self) -> &ImportServices {
        &self.services
    }

    /// Import `upload` under `execution`.
    ///
    /// `overwrite` replaces existing field definitions in target schemas.
    pub fn import(
        &self,
        upload: &UploadRequest,
        execution: &Execution,
        overwrite: bool,
    ) -> ImportResult<ImportOutcome> {
        let ctx = ImportContext {
            filename: upload.filename.clone(),
            user: upload.user.clone(),
            handler: detect::classify(UploadMetadata::from(upload)),
            execution_id: execution.id().to_string(),
        };
        let result = self.run(upload, execution, overwrite);
        self.notify(&ctx, &result);
        result
    }

    fn run(
        &self,
        upload: &UploadRequest,
        execution: &Execution,
        overwrite: bool,
    ) -> ImportResult<ImportOutcome> {
        let handler = self.registry.handler_for(upload)?;
        let validated = handler.validate(upload)?;
        let opts = &self.services.options;

        let raw_layers = validated.dataset().layers();
        let layers: Vec<LayerDescriptor> = raw_layers
            .iter()
            .map(|layer| schema::resolve(*layer, opts))
            .collect();
        // One schema per layer: resource names are unique within the upload.
        let resources: Vec<ResourceDescriptor> =
            naming::describe_layers(&raw_layers, validated.base_name(), &opts.default_crs);

        let mut handles = Vec::with_capacity(layers.len());
        for (layer, resource) in layers.iter().zip(&resources) {
            let (_, handle) =
                handler.create_dynamic_model_fields(layer, None, overwrite, execution, &resource.name)?;
            handles.push(handle);
        }

        let mut dispatches = Vec::with_capacity(handles.len());
        let mut cancelled = false;
        let mut first_error: Option<ImportError> = None;
        for handle in handles {
            match handle.wait(execution) {
                Ok(DispatchOutcome::Completed(report)) => dispatches.push(report),
                Ok(DispatchOutcome::Cancelled) => cancelled = true,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if cancelled {
            return Ok(ImportOutcome::Cancelled);
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let report = ImportReport {
            execution_id: execution.id().to_string(),
            handler: handler.kind(),
            layers,
            resources,
            dispatches,
            dropped_sheets: validated.dropped_sheets().to_vec(),
        };
        validated.release();
        Ok(ImportOutcome::Completed(report))
    }

    fn notify(&self, ctx: &ImportContext, result: &ImportResult<ImportOutcome>) {
        let Some(observer) = &self.observer else {
            return;
        };
        match result {
            Ok(ImportOutcome::Completed(report)) => observer.on_success(
                ctx,
                ImportStats {
                    layers: report.layers.len(),
                    chunks: report.chunks(),
                },
            ),
            Ok(ImportOutcome::Cancelled) => {
                tracing::info!(execution = %ctx.execution_id, filename = %ctx.filename, "import cancelled");
            }
            Err(e) => {
                let severity = ImportSeverity::for_error(e);
                observer.on_failure(ctx, severity, e);
                if severity >= self.services.options.alert_at_or_above {
                    observer.on_alert(ctx, severity, e);
                }
            }
        }
    }
}
