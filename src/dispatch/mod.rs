//! Schema dispatch.
//!
//! A resolved layer's fields are cut into [`SchemaChunk`]s of at most
//! [`ImportOptions::schema_chunk_size`] fields and submitted to a [`TaskQueue`] as independent
//! [`SchemaTask`]s. The returned [`DispatchHandle`] completes only when every chunk has completed.
//!
//! Chunks carry no ordering: they may run in parallel and finish in any order. A failed chunk
//! fails the whole dispatch, but chunks that already succeeded are left applied.
//!
//! [`RayonTaskQueue`] is the bundled worker pool: a rayon thread pool writing chunks through a
//! [`SchemaWriter`], throttled to a bounded number of in-flight chunks, with live
//! [`DispatchMetrics`] and an optional [`DispatchObserver`].

mod observer;
mod semaphore;
mod store;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::join_all;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::config::ImportOptions;
use crate::error::{ChunkFailure, ImportError, ImportResult};
use crate::types::{LayerDescriptor, SchemaChunk, SchemaTarget};

pub use observer::{
    DispatchEvent, DispatchMetrics, DispatchMetricsSnapshot, DispatchObserver,
    TracingDispatchObserver,
};
pub use store::{InMemorySchemaStore, SchemaWriter};

use semaphore::Semaphore;

/// Default number of fields per schema chunk.
pub const SCHEMA_CHUNK_SIZE: usize = 30;

/// Split a layer's fields into consecutive chunks of at most `chunk_size` fields.
///
/// Order is preserved: concatenating the chunks yields `layer.fields`.
pub fn chunk_fields(layer: &LayerDescriptor, chunk_size: usize) -> Vec<SchemaChunk> {
    layer
        .fields
        .chunks(chunk_size.max(1))
        .enumerate()
        .map(|(index, fields)| SchemaChunk {
            layer_name: layer.name.clone(),
            index,
            fields: fields.to_vec(),
        })
        .collect()
}

/// Payload of one schema-creation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTask {
    pub execution_id: String,
    pub schema: SchemaTarget,
    pub overwrite: bool,
    pub layer_name: String,
    pub chunk: SchemaChunk,
}

/// Outcome reported by a worker for one task.
pub type TaskResult = Result<(), String>;

/// Completion handle of one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    chunk_index: usize,
    receiver: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn new(
        task_id: impl Into<String>,
        chunk_index: usize,
        receiver: oneshot::Receiver<TaskResult>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            chunk_index,
            receiver,
        }
    }

    /// A handle and the sender that completes it.
    ///
    /// Dropping the sender without sending marks the task as failed.
    pub fn pending(
        task_id: impl Into<String>,
        chunk_index: usize,
    ) -> (oneshot::Sender<TaskResult>, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        (tx, TaskHandle::new(task_id, chunk_index, rx))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }
}

/// Submission side of the task queue.
pub trait TaskQueue: Send + Sync {
    /// Submit `task` under `task_id`. Delivery may be at-least-once.
    fn submit(&self, task_id: &str, task: SchemaTask) -> ImportResult<TaskHandle>;
}

/// An import execution: identity plus a cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct Execution {
    id: String,
    cancelled: Arc<AtomicBool>,
}

impl Execution {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mark the execution cancelled. Running chunks finish; their results are ignored.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Summary of a completed dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub layer_name: String,
    pub schema: SchemaTarget,
    pub chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(DispatchReport),
    /// The execution was cancelled; chunk results were discarded.
    Cancelled,
}

/// Conjunction of every task submitted for one layer.
#[derive(Debug)]
pub struct DispatchHandle {
    layer_name: String,
    schema: SchemaTarget,
    tasks: Vec<TaskHandle>,
}

impl DispatchHandle {
    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn schema(&self) -> &SchemaTarget {
        &self.schema
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.task_id())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Block until every chunk has completed.
    ///
    /// Outstanding tasks are never interrupted. If `execution` is cancelled by the time they have
    /// all completed, their results are ignored and [`DispatchOutcome::Cancelled`] is returned.
    pub fn wait(self, execution: &Execution) -> ImportResult<DispatchOutcome> {
        let DispatchHandle {
            layer_name,
            schema,
            tasks,
        } = self;
        let chunks = tasks.len();

        let results = block_on(join_all(tasks.into_iter().map(|t| async move {
            let TaskHandle {
                task_id,
                chunk_index,
                receiver,
            } = t;
            let result = receiver
                .await
                .unwrap_or_else(|_| Err("task dropped before completion".to_string()));
            (chunk_index, task_id, result)
        })));

        if execution.is_cancelled() {
            tracing::info!(execution = execution.id(), layer = %layer_name, "dispatch cancelled; results ignored");
            return Ok(DispatchOutcome::Cancelled);
        }

        let mut failed: Vec<ChunkFailure> = results
            .into_iter()
            .filter_map(|(chunk_index, task_id, result)| {
                result.err().map(|message| ChunkFailure {
                    chunk_index,
                    task_id,
                    message,
                })
            })
            .collect();
        if !failed.is_empty() {
            failed.sort_by_key(|f| f.chunk_index);
            tracing::warn!(layer = %layer_name, failed = failed.len(), chunks, "schema dispatch partially failed");
            return Err(ImportError::SchemaDispatchPartialFailure {
                layer: layer_name,
                failed,
            });
        }

        tracing::debug!(layer = %layer_name, chunks, "schema dispatch joined");
        Ok(DispatchOutcome::Completed(DispatchReport {
            layer_name,
            schema,
            chunks,
        }))
    }
}

/// Submit one schema task per chunk of `layer`.
///
/// Nothing is submitted for an execution that is already cancelled.
pub fn dispatch(
    execution: &Execution,
    layer: &LayerDescriptor,
    schema: &SchemaTarget,
    overwrite: bool,
    queue: &dyn TaskQueue,
    chunk_size: usize,
) -> ImportResult<DispatchHandle> {
    let mut tasks = Vec::new();
    if !execution.is_cancelled() {
        for chunk in chunk_fields(layer, chunk_size) {
            let task_id = format!("{}:{}:{}:{}", execution.id(), schema.id, layer.name, chunk.index);
            let task = SchemaTask {
                execution_id: execution.id().to_string(),
                schema: schema.clone(),
                overwrite,
                layer_name: layer.name.clone(),
                chunk,
            };
            tasks.push(queue.submit(&task_id, task)?);
        }
    }
    tracing::debug!(
        execution = execution.id(),
        layer = %layer.name,
        schema = schema.id,
        chunks = tasks.len(),
        "schema chunks submitted"
    );
    Ok(DispatchHandle {
        layer_name: layer.name.clone(),
        schema: schema.clone(),
        tasks,
    })
}

/// Worker pool applying schema chunks on a rayon thread pool.
pub struct RayonTaskQueue {
    pool: ThreadPool,
    writer: Arc<dyn SchemaWriter>,
    throttle: Arc<Semaphore>,
    observer: Option<Arc<dyn DispatchObserver>>,
    metrics: Arc<DispatchMetrics>,
}

impl fmt::Debug for RayonTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonTaskQueue")
            .field("threads", &self.pool.current_num_threads())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl RayonTaskQueue {
    /// Build a pool sized by `opts.worker_threads` and throttled to `opts.max_in_flight_chunks`.
    pub fn new(writer: Arc<dyn SchemaWriter>, opts: &ImportOptions) -> ImportResult<Self> {
        let threads = opts
            .worker_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("schema-dispatch-{i}"))
            .build()
            .map_err(|e| ImportError::TaskQueue {
                message: format!("failed to build worker pool: {e}"),
            })?;
        Ok(Self {
            pool,
            writer,
            throttle: Arc::new(Semaphore::new(opts.max_in_flight_chunks)),
            observer: None,
            metrics: Arc::new(DispatchMetrics::new()),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle to the pool's live metrics.
    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl TaskQueue for RayonTaskQueue {
    fn submit(&self, task_id: &str, task: SchemaTask) -> ImportResult<TaskHandle> {
        let (tx, handle) = TaskHandle::pending(task_id, task.chunk.index);
        self.metrics.on_submitted();
        emit(
            &self.observer,
            DispatchEvent::ChunkSubmitted {
                task_id: task_id.to_string(),
                chunk_index: task.chunk.index,
                fields: task.chunk.fields.len(),
            },
        );

        let writer = Arc::clone(&self.writer);
        let throttle = Arc::clone(&self.throttle);
        let metrics = Arc::clone(&self.metrics);
        let observer = self.observer.clone();
        let task_id = task_id.to_string();
        self.pool.spawn(move || {
            let (_permit, waited) = throttle.acquire();
            if waited > Duration::ZERO {
                metrics.on_throttle_wait(waited);
                emit(
                    &observer,
                    DispatchEvent::ThrottleWaited {
                        task_id: task_id.clone(),
                        duration: waited,
                    },
                );
            }

            metrics.on_chunk_start();
            emit(&observer, DispatchEvent::ChunkStarted { task_id: task_id.clone() });

            let result = writer.apply_chunk(&task).map_err(|e| e.to_string());

            metrics.on_chunk_end(result.is_ok());
            match &result {
                Ok(()) => emit(&observer, DispatchEvent::ChunkFinished { task_id }),
                Err(message) => emit(
                    &observer,
                    DispatchEvent::ChunkFailed {
                        task_id,
                        message: message.clone(),
                    },
                ),
            }
            // The receiver may be gone if the caller stopped waiting.
            let _ = tx.send(result);
        });
        Ok(handle)
    }
}

fn emit(observer: &Option<Arc<dyn DispatchObserver>>, event: DispatchEvent) {
    if let Some(obs) = observer {
        obs.on_event(&event);
    }
}
