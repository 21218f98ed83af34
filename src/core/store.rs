//! Persistence collaborator for schemas
//!
//! The engine treats storage as an opaque key-value store keyed by a generated
//! id. Two backends are provided:
//! - [`MemoryStore`]: concurrent in-process map, used by tests and embedders
//! - [`FileStore`]: one pretty-printed JSON document per schema in a directory

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::schema::Schema;

/// Key under which a schema is stored
#[derive(Clone, Debug, Display, From, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(String);

impl SchemaId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Schema not found: {0}")]
    NotFound(SchemaId),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No store is bound to this schema graph")]
    NotBound,

    #[error("Invalid schema id: '{0}'")]
    InvalidId(SchemaId),
}

/// Listing entry for a stored schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub id: SchemaId,
    pub table_count: usize,
    pub relationship_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Stored document: the schema plus bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSchema {
    id: SchemaId,
    updated_at: DateTime<Utc>,
    schema: Schema,
}

impl StoredSchema {
    fn new(id: SchemaId, schema: &Schema) -> Self {
        Self {
            id,
            updated_at: Utc::now(),
            schema: schema.clone(),
        }
    }

    fn summary(&self) -> SchemaSummary {
        SchemaSummary {
            id: self.id.clone(),
            table_count: self.schema.tables.len(),
            relationship_count: self.schema.relationships.len(),
            updated_at: self.updated_at,
        }
    }
}

/// Opaque schema storage
pub trait SchemaStore: Send + Sync {
    /// Stores a new schema and returns its id
    fn save(&self, schema: &Schema) -> Result<SchemaId, StoreError>;

    /// Replaces the schema stored under `id`
    fn update(&self, id: &SchemaId, schema: &Schema) -> Result<(), StoreError>;

    fn load(&self, id: &SchemaId) -> Result<Schema, StoreError>;

    /// Summaries, most recently updated first
    fn list(&self) -> Result<Vec<SchemaSummary>, StoreError>;

    fn delete(&self, id: &SchemaId) -> Result<(), StoreError>;
}

fn sort_summaries(mut summaries: Vec<SchemaSummary>) -> Vec<SchemaSummary> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    schemas: DashMap<SchemaId, StoredSchema>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaStore for MemoryStore {
    fn save(&self, schema: &Schema) -> Result<SchemaId, StoreError> {
        let id = SchemaId::generate();
        self.schemas
            .insert(id.clone(), StoredSchema::new(id.clone(), schema));
        Ok(id)
    }

    fn update(&self, id: &SchemaId, schema: &Schema) -> Result<(), StoreError> {
        let mut entry = self
            .schemas
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        *entry = StoredSchema::new(id.clone(), schema);
        Ok(())
    }

    fn load(&self, id: &SchemaId) -> Result<Schema, StoreError> {
        self.schemas
            .get(id)
            .map(|entry| entry.schema.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn list(&self) -> Result<Vec<SchemaSummary>, StoreError> {
        Ok(sort_summaries(
            self.schemas.iter().map(|entry| entry.summary()).collect(),
        ))
    }

    fn delete(&self, id: &SchemaId) -> Result<(), StoreError> {
        self.schemas
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

/// Directory-backed store, one `<id>.json` per schema
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) the store directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids become file names, so only letters, digits, `-` and `_` are accepted
    fn path_for(&self, id: &SchemaId) -> Result<PathBuf, StoreError> {
        let name = id.as_str();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.clone()));
        }
        Ok(self.root.join(format!("{}.json", name)))
    }

    fn write(&self, document: &StoredSchema) -> Result<(), StoreError> {
        let path = self.path_for(&document.id)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(&self, id: &SchemaId) -> Result<StoredSchema, StoreError> {
        let path = self.path_for(id)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl SchemaStore for FileStore {
    fn save(&self, schema: &Schema) -> Result<SchemaId, StoreError> {
        let id = SchemaId::generate();
        self.write(&StoredSchema::new(id.clone(), schema))?;
        tracing::debug!("Saved schema {} to {}", id, self.root.display());
        Ok(id)
    }

    fn update(&self, id: &SchemaId, schema: &Schema) -> Result<(), StoreError> {
        if !self.path_for(id)?.exists() {
            return Err(StoreError::NotFound(id.clone()));
        }
        self.write(&StoredSchema::new(id.clone(), schema))
    }

    fn load(&self, id: &SchemaId) -> Result<Schema, StoreError> {
        Ok(self.read(id)?.schema)
    }

    fn list(&self) -> Result<Vec<SchemaSummary>, StoreError> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(StoreError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<StoredSchema>(&bytes)?))
            {
                Ok(document) => summaries.push(document.summary()),
                Err(e) => tracing::warn!("Skipping unreadable schema file {}: {}", path.display(), e),
            }
        }
        Ok(sort_summaries(summaries))
    }

    fn delete(&self, id: &SchemaId) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Field, Relationship, Table};

    fn sample_schema() -> Schema {
        let users = Table::new("users")
            .with_id("users")
            .add_field(Field::new("id", "uuid").with_id("users_id").primary_key());
        let posts = Table::new("posts")
            .with_id("posts")
            .add_field(Field::new("author_id", "uuid").with_id("posts_author"));
        let rel = Relationship::new(
            "posts".into(),
            "posts_author".into(),
            "users".into(),
            "users_id".into(),
        );
        Schema::new(vec![users, posts], vec![rel])
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("schemaforge-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_memory_store_crud() {
        let store = MemoryStore::new();
        let schema = sample_schema();

        let id = store.save(&schema).unwrap();
        assert_eq!(store.load(&id).unwrap(), schema);

        let mut changed = schema.clone();
        changed.relationships.clear();
        store.update(&id, &changed).unwrap();
        assert_eq!(store.load(&id).unwrap(), changed);

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].table_count, 2);
        assert_eq!(summaries[0].relationship_count, 0);

        store.delete(&id).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.load(&id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_memory_store_update_unknown_id() {
        let store = MemoryStore::new();
        let result = store.update(&SchemaId::from("missing".to_string()), &Schema::default());
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = temp_dir();
        let store = FileStore::open(&dir).unwrap();
        let schema = sample_schema();

        let id = store.save(&schema).unwrap();
        assert!(dir.join(format!("{}.json", id)).exists());
        assert_eq!(store.load(&id).unwrap(), schema);

        store.update(&id, &Schema::default()).unwrap();
        assert!(store.load(&id).unwrap().is_empty());

        let other = store.save(&schema).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);

        store.delete(&id).unwrap();
        store.delete(&other).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.delete(&id), Err(StoreError::NotFound(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_rejects_ids_outside_its_directory() {
        let parent = temp_dir();
        let root = parent.join("store");
        let store = FileStore::open(&root).unwrap();
        std::fs::write(parent.join("outside.json"), b"{}").unwrap();

        for raw in ["../outside", "..", "a/b", "a\\b", "", "x.json"] {
            let id = SchemaId::from(raw.to_string());
            assert!(matches!(store.load(&id), Err(StoreError::InvalidId(_))), "{:?}", raw);
            assert!(matches!(
                store.update(&id, &Schema::default()),
                Err(StoreError::InvalidId(_))
            ));
            assert!(matches!(store.delete(&id), Err(StoreError::InvalidId(_))));
        }
        assert!(parent.join("outside.json").exists());

        let _ = std::fs::remove_dir_all(&parent);
    }
}
