use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use vdw_core::Bond;

use crate::error::DbError;
use crate::models::BondRow;

/// JSON documents keyed by id, with directed labelled links between them.
#[derive(Clone)]
pub struct AtomRepository {
    pool: SqlitePool,
}

impl AtomRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the content of an atom.
    pub async fn put(&self, atom_id: &str, content: &Value) -> Result<(), DbError> {
        let now = Utc::now().timestamp_millis();
        let content = serde_json::to_string(content)?;

        sqlx::query(
            r#"
            INSERT INTO atoms (atom_id, content, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(atom_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(atom_id)
        .bind(&content)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, atom_id: &str) -> Result<Option<Value>, DbError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT content FROM atoms WHERE atom_id = ?")
            .bind(atom_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((content,)) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// Add a link. Linking the same pair twice with the same relation is a no-op.
    pub async fn link(&self, from_id: &str, to_id: &str, relation: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO bonds (from_id, to_id, relation, created_at)
            SELECT ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM bonds WHERE from_id = ? AND to_id = ? AND relation = ?
            )
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .bind(relation)
        .bind(Utc::now().timestamp_millis())
        .bind(from_id)
        .bind(to_id)
        .bind(relation)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Outgoing links of an atom in creation order.
    pub async fn neighbors(&self, atom_id: &str) -> Result<Vec<Bond>, DbError> {
        let rows: Vec<BondRow> = sqlx::query_as(
            "SELECT to_id, relation FROM bonds WHERE from_id = ? ORDER BY id ASC",
        )
        .bind(atom_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }
}
