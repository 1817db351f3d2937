use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use super::SchemaTask;
use crate::error::{ImportError, ImportResult};
use crate::types::{FieldDescriptor, SchemaTarget};

/// Storage side of schema creation: the worker pool hands every chunk to a writer.
///
/// `apply_chunk` may see the same chunk more than once and must converge to the same schema.
pub trait SchemaWriter: Send + Sync {
    /// Return the schema called `name`, creating it if needed.
    fn ensure_schema(&self, name: &str) -> ImportResult<SchemaTarget>;

    /// Apply one chunk of field definitions to the chunk's target schema.
    fn apply_chunk(&self, task: &SchemaTask) -> ImportResult<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    by_name: HashMap<String, u64>,
    schemas: BTreeMap<u64, StoredSchema>,
    applied_chunks: usize,
}

#[derive(Debug)]
struct StoredSchema {
    target: SchemaTarget,
    fields: Vec<FieldDescriptor>,
}

/// Schema store kept in memory.
#[derive(Debug, Default)]
pub struct InMemorySchemaStore {
    state: Mutex<StoreState>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self, name: &str) -> Option<SchemaTarget> {
        let g = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let id = g.by_name.get(name)?;
        g.schemas.get(id).map(|s| s.target.clone())
    }

    /// Fields of a schema in application order.
    pub fn fields(&self, schema_id: u64) -> Option<Vec<FieldDescriptor>> {
        let g = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        g.schemas.get(&schema_id).map(|s| s.fields.clone())
    }

    /// Total chunk applications, re-deliveries included.
    pub fn applied_chunks(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .applied_chunks
    }
}

impl SchemaWriter for InMemorySchemaStore {
    fn ensure_schema(&self, name: &str) -> ImportResult<SchemaTarget> {
        let mut g = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = g.by_name.get(name).copied() {
            if let Some(s) = g.schemas.get(&id) {
                return Ok(s.target.clone());
            }
        }
        g.next_id += 1;
        let target = SchemaTarget {
            id: g.next_id,
            name: name.to_string(),
        };
        g.by_name.insert(name.to_string(), target.id);
        g.schemas.insert(
            target.id,
            StoredSchema {
                target: target.clone(),
                fields: Vec::new(),
            },
        );
        tracing::debug!(schema = %target.name, id = target.id, "schema created");
        Ok(target)
    }

    fn apply_chunk(&self, task: &SchemaTask) -> ImportResult<()> {
        let mut g = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let schema = g
            .schemas
            .get_mut(&task.schema.id)
            .ok_or_else(|| ImportError::TaskQueue {
                message: format!("unknown schema id {}", task.schema.id),
            })?;
        for field in &task.chunk.fields {
            match schema.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) if task.overwrite => *existing = field.clone(),
                Some(_) => {}
                None => schema.fields.push(field.clone()),
            }
        }
        g.applied_chunks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SchemaChunk, StorageClass};

    fn task(schema: &SchemaTarget, overwrite: bool, fields: Vec<FieldDescriptor>) -> SchemaTask {
        SchemaTask {
            execution_id: "exec-1".to_string(),
            schema: schema.clone(),
            overwrite,
            layer_name: "layer".to_string(),
            chunk: SchemaChunk {
                layer_name: "layer".to_string(),
                index: 0,
                fields,
            },
        }
    }

    #[test]
    fn ensure_schema_is_stable_by_name() {
        let store = InMemorySchemaStore::new();
        let a = store.ensure_schema("roads").unwrap();
        let b = store.ensure_schema("roads").unwrap();
        let c = store.ensure_schema("rivers").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
        assert_eq!(store.schema("roads"), Some(a));
    }

    #[test]
    fn redelivered_chunk_converges() {
        let store = InMemorySchemaStore::new();
        let s = store.ensure_schema("t").unwrap();
        let t = task(&s, false, vec![FieldDescriptor::new("a", StorageClass::Integer)]);
        store.apply_chunk(&t).unwrap();
        store.apply_chunk(&t).unwrap();
        assert_eq!(store.fields(s.id).unwrap().len(), 1);
        assert_eq!(store.applied_chunks(), 2);
    }

    #[test]
    fn overwrite_replaces_existing_definition() {
        let store = InMemorySchemaStore::new();
        let s = store.ensure_schema("t").unwrap();
        store
            .apply_chunk(&task(&s, false, vec![FieldDescriptor::new("a", StorageClass::Integer)]))
            .unwrap();
        store
            .apply_chunk(&task(&s, false, vec![FieldDescriptor::new("a", StorageClass::String)]))
            .unwrap();
        assert_eq!(store.fields(s.id).unwrap()[0].class, StorageClass::Integer);
        store
            .apply_chunk(&task(&s, true, vec![FieldDescriptor::new("a", StorageClass::String)]))
            .unwrap();
        assert_eq!(store.fields(s.id).unwrap()[0].class, StorageClass::String);
    }

    #[test]
    fn unknown_schema_is_an_error() {
        let store = InMemorySchemaStore::new();
        let ghost = SchemaTarget {
            id: 42,
            name: "ghost".to_string(),
        };
        assert!(store.apply_chunk(&task(&ghost, false, vec![])).is_err());
    }
}
