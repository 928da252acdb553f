use std::collections::HashMap;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use vdw_core::{Capability, ToolMetadata};

use crate::error::DbError;
use crate::models::{
    created_at_millis, CapabilityRatingRow, CapabilityRow, DependencyRow, RegistryCounts,
    StoredTool, ToolRow,
};

const TOOL_COLUMNS: &str = r#"
    rowid AS seq, tool_id, name, description, version, created_by, created_at, last_used,
    usage_count, success_count, total_duration_ms, deprecated, deprecation_reason,
    replacement_tool_id
"#;

#[derive(Clone)]
pub struct ToolRepository {
    pool: SqlitePool,
}

impl ToolRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a tool with its capability ratings and dependency edges in one
    /// transaction. Capabilities are created on first use and reused by name.
    pub async fn create(&self, tool: &ToolMetadata) -> Result<StoredTool, DbError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO tools (
                tool_id, name, description, version, created_by, created_at,
                deprecated, deprecation_reason, replacement_tool_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tool.tool_id)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(&tool.version)
        .bind(&tool.created_by)
        .bind(created_at_millis(tool))
        .bind(tool.deprecated)
        .bind(&tool.deprecation_reason)
        .bind(&tool.replacement_tool_id)
        .execute(&mut *tx)
        .await?;
        let seq = result.last_insert_rowid();

        for rating in &tool.capabilities {
            let capability_id = ensure_capability(&mut tx, &rating.name, now).await?;
            sqlx::query(
                r#"
                INSERT INTO tool_capabilities (tool_id, capability_id, strength, confidence, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&tool.tool_id)
            .bind(&capability_id)
            .bind(rating.strength)
            .bind(rating.confidence)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for dependency in &tool.dependencies {
            sqlx::query(
                r#"
                INSERT INTO dependencies (dependent_tool_id, dependency_tool_id, dependency_type, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&tool.tool_id)
            .bind(&dependency.tool_id)
            .bind(dependency.kind.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut metadata = tool.clone();
        metadata.stats = Default::default();
        Ok(StoredTool { metadata, seq })
    }

    pub async fn find_by_id(&self, tool_id: &str) -> Result<Option<StoredTool>, DbError> {
        let row: Option<ToolRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tools WHERE tool_id = ?",
            TOOL_COLUMNS
        ))
        .bind(tool_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let capabilities: Vec<CapabilityRatingRow> = sqlx::query_as(
            r#"
            SELECT tc.tool_id, c.name, tc.strength, tc.confidence
            FROM tool_capabilities tc
            JOIN capabilities c ON c.capability_id = tc.capability_id
            WHERE tc.tool_id = ?
            ORDER BY c.name ASC
            "#,
        )
        .bind(tool_id)
        .fetch_all(&self.pool)
        .await?;

        let dependencies: Vec<DependencyRow> = sqlx::query_as(
            r#"
            SELECT dependent_tool_id, dependency_tool_id, dependency_type
            FROM dependencies
            WHERE dependent_tool_id = ?
            ORDER BY dependency_tool_id ASC
            "#,
        )
        .bind(tool_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row.into_stored(
            capabilities.into_iter().map(|r| r.into_domain()).collect(),
            dependencies.into_iter().map(|r| r.into_domain()).collect(),
        )))
    }

    /// All tools, deprecated included, in insertion order.
    pub async fn find_all(&self) -> Result<Vec<StoredTool>, DbError> {
        let rows: Vec<ToolRow> = sqlx::query_as(&format!(
            "SELECT {} FROM tools ORDER BY rowid ASC",
            TOOL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let capability_rows: Vec<CapabilityRatingRow> = sqlx::query_as(
            r#"
            SELECT tc.tool_id, c.name, tc.strength, tc.confidence
            FROM tool_capabilities tc
            JOIN capabilities c ON c.capability_id = tc.capability_id
            ORDER BY tc.tool_id ASC, c.name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let dependency_rows: Vec<DependencyRow> = sqlx::query_as(
            r#"
            SELECT dependent_tool_id, dependency_tool_id, dependency_type
            FROM dependencies
            ORDER BY dependent_tool_id ASC, dependency_tool_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut capabilities: HashMap<String, Vec<_>> = HashMap::new();
        for row in capability_rows {
            capabilities
                .entry(row.tool_id.clone())
                .or_default()
                .push(row.into_domain());
        }

        let mut dependencies: HashMap<String, Vec<_>> = HashMap::new();
        for row in dependency_rows {
            dependencies
                .entry(row.dependent_tool_id.clone())
                .or_default()
                .push(row.into_domain());
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let caps = capabilities.remove(&row.tool_id).unwrap_or_default();
                let deps = dependencies.remove(&row.tool_id).unwrap_or_default();
                row.into_stored(caps, deps)
            })
            .collect())
    }

    /// Returns false if the tool does not exist.
    pub async fn deprecate(
        &self,
        tool_id: &str,
        reason: &str,
        replacement_tool_id: Option<&str>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE tools
            SET deprecated = 1, deprecation_reason = ?, replacement_tool_id = ?
            WHERE tool_id = ?
            "#,
        )
        .bind(reason)
        .bind(replacement_tool_id)
        .bind(tool_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Create or update a capability definition.
    pub async fn define_capability(&self, capability: &Capability) -> Result<Capability, DbError> {
        sqlx::query(
            r#"
            INSERT INTO capabilities (capability_id, name, description, category, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                category = excluded.category
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&capability.name)
        .bind(&capability.description)
        .bind(&capability.category)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(capability.clone())
    }

    pub async fn find_capability(&self, name: &str) -> Result<Option<Capability>, DbError> {
        let row: Option<CapabilityRow> = sqlx::query_as(
            "SELECT capability_id, name, description, category FROM capabilities WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    pub async fn list_capabilities(&self) -> Result<Vec<Capability>, DbError> {
        let rows: Vec<CapabilityRow> = sqlx::query_as(
            "SELECT capability_id, name, description, category FROM capabilities ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    pub async fn counts(&self) -> Result<RegistryCounts, DbError> {
        let (tools, capabilities, tool_capabilities, dependencies, performance_logs): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM tools),
                (SELECT COUNT(*) FROM capabilities),
                (SELECT COUNT(*) FROM tool_capabilities),
                (SELECT COUNT(*) FROM dependencies),
                (SELECT COUNT(*) FROM performance_logs)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RegistryCounts {
            tools,
            capabilities,
            tool_capabilities,
            dependencies,
            performance_logs,
        })
    }
}

/// Id of the named capability, inserting a bare definition if it is new.
async fn ensure_capability(
    conn: &mut SqliteConnection,
    name: &str,
    now: i64,
) -> Result<String, DbError> {
    sqlx::query(
        r#"
        INSERT INTO capabilities (capability_id, name, description, created_at)
        VALUES (?, ?, '', ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let (capability_id,): (String,) =
        sqlx::query_as("SELECT capability_id FROM capabilities WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;

    Ok(capability_id)
}
