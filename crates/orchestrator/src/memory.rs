//! Persistent memory for project snapshots and phase outputs.

use std::collections::HashMap;

use async_trait::async_trait;
use db::AtomRepository;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use vdw_core::Bond;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Database(#[from] db::DbError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Key-value store of JSON atoms with directed links between them.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or replace an atom.
    async fn store_atom(&self, atom_id: &str, content: Value) -> Result<(), MemoryError>;

    async fn get_atom(&self, atom_id: &str) -> Result<Option<Value>, MemoryError>;

    async fn link(&self, from_id: &str, to_id: &str, relation: &str) -> Result<(), MemoryError>;

    /// Outgoing links of an atom, oldest first.
    async fn neighbors(&self, atom_id: &str) -> Result<Vec<Bond>, MemoryError>;
}

/// Process-local store. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    atoms: RwLock<HashMap<String, Value>>,
    bonds: RwLock<HashMap<String, Vec<Bond>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.atoms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.read().is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store_atom(&self, atom_id: &str, content: Value) -> Result<(), MemoryError> {
        self.atoms.write().insert(atom_id.to_string(), content);
        Ok(())
    }

    async fn get_atom(&self, atom_id: &str) -> Result<Option<Value>, MemoryError> {
        Ok(self.atoms.read().get(atom_id).cloned())
    }

    async fn link(&self, from_id: &str, to_id: &str, relation: &str) -> Result<(), MemoryError> {
        let bond = Bond::new(to_id, relation);
        let mut bonds = self.bonds.write();
        let outgoing = bonds.entry(from_id.to_string()).or_default();
        if !outgoing.contains(&bond) {
            outgoing.push(bond);
        }
        Ok(())
    }

    async fn neighbors(&self, atom_id: &str) -> Result<Vec<Bond>, MemoryError> {
        Ok(self.bonds.read().get(atom_id).cloned().unwrap_or_default())
    }
}

/// Store backed by the `atoms` and `bonds` tables.
#[derive(Clone)]
pub struct SqliteMemoryStore {
    atoms: AtomRepository,
}

impl SqliteMemoryStore {
    /// The pool must already be migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            atoms: AtomRepository::new(pool),
        }
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn store_atom(&self, atom_id: &str, content: Value) -> Result<(), MemoryError> {
        Ok(self.atoms.put(atom_id, &content).await?)
    }

    async fn get_atom(&self, atom_id: &str) -> Result<Option<Value>, MemoryError> {
        Ok(self.atoms.get(atom_id).await?)
    }

    async fn link(&self, from_id: &str, to_id: &str, relation: &str) -> Result<(), MemoryError> {
        Ok(self.atoms.link(from_id, to_id, relation).await?)
    }

    async fn neighbors(&self, atom_id: &str) -> Result<Vec<Bond>, MemoryError> {
        Ok(self.atoms.neighbors(atom_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::{create_memory_pool, run_migrations};
    use serde_json::json;

    async fn exercise(store: &dyn MemoryStore) {
        store.store_atom("project:1", json!({"v": 1})).await.unwrap();
        store.store_atom("project:1", json!({"v": 2})).await.unwrap();
        assert_eq!(store.get_atom("project:1").await.unwrap(), Some(json!({"v": 2})));
        assert_eq!(store.get_atom("project:2").await.unwrap(), None);

        store.link("project:1", "project:1:p1", "phase_output").await.unwrap();
        store.link("project:1", "project:1:p2", "phase_output").await.unwrap();
        store.link("project:1", "project:1:p1", "phase_output").await.unwrap();

        let bonds = store.neighbors("project:1").await.unwrap();
        assert_eq!(
            bonds,
            vec![
                Bond::new("project:1:p1", "phase_output"),
                Bond::new("project:1:p2", "phase_output"),
            ]
        );
        assert!(store.neighbors("project:1:p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryStore::new();
        exercise(&store).await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        exercise(&SqliteMemoryStore::new(pool)).await;
    }
}
