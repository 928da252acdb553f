use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use vdw_core::{
    ErrorPattern, PerformanceAnalytics, PerformanceLogEntry, ToolDurationSummary,
    ToolUsageSummary,
};

use crate::error::DbError;
use crate::models::{datetime_to_millis, PerformanceLogRow, ToolStatsRow};

/// Restricts which log rows an analytics query looks at.
#[derive(Debug, Clone)]
pub struct AnalyticsFilter {
    pub since: DateTime<Utc>,
    pub tool_id: Option<String>,
    pub project_id: Option<String>,
}

impl AnalyticsFilter {
    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since,
            tool_id: None,
            project_id: None,
        }
    }

    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

// Shared WHERE clause; binds: since, tool_id, tool_id, project_id, project_id
const WINDOW_FILTER: &str = r#"
    l.execution_start >= ?
    AND (? IS NULL OR l.tool_id = ?)
    AND (? IS NULL OR l.project_id = ?)
"#;

#[derive(Clone)]
pub struct PerformanceLogRepository {
    pool: SqlitePool,
}

impl PerformanceLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one execution record and fold it into the tool's running sums.
    ///
    /// Both writes commit together. Returns the tool's sums after the update.
    pub async fn append(&self, entry: &PerformanceLogEntry) -> Result<ToolStatsRow, DbError> {
        let row = PerformanceLogRow::from(entry);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE tools SET
                usage_count = usage_count + 1,
                success_count = success_count + ?,
                total_duration_ms = total_duration_ms + ?,
                success_rate = CAST(success_count + ? AS REAL) / (usage_count + 1),
                average_duration = (total_duration_ms + ?) / (usage_count + 1),
                last_used = ?
            WHERE tool_id = ?
            "#,
        )
        .bind(row.success as i64)
        .bind(row.duration_ms)
        .bind(row.success as i64)
        .bind(row.duration_ms)
        .bind(row.execution_end)
        .bind(&row.tool_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DbError::ToolNotFound(row.tool_id));
        }

        sqlx::query(
            r#"
            INSERT INTO performance_logs (
                log_id, tool_id, project_id, execution_start, execution_end,
                duration_ms, success, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.log_id)
        .bind(&row.tool_id)
        .bind(&row.project_id)
        .bind(row.execution_start)
        .bind(row.execution_end)
        .bind(row.duration_ms)
        .bind(row.success)
        .bind(&row.error_message)
        .execute(&mut *tx)
        .await?;

        let stats: ToolStatsRow = sqlx::query_as(
            r#"
            SELECT usage_count, success_count, total_duration_ms, last_used
            FROM tools WHERE tool_id = ?
            "#,
        )
        .bind(&row.tool_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(tool_id = %row.tool_id, usage_count = stats.usage_count, "Performance log appended");
        Ok(stats)
    }

    pub async fn find_by_tool(&self, tool_id: &str) -> Result<Vec<PerformanceLogEntry>, DbError> {
        let rows: Vec<PerformanceLogRow> = sqlx::query_as(
            r#"
            SELECT log_id, tool_id, project_id, execution_start, execution_end,
                   duration_ms, success, error_message
            FROM performance_logs
            WHERE tool_id = ?
            ORDER BY execution_start ASC, rowid ASC
            "#,
        )
        .bind(tool_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    /// Running sums rebuilt from the log itself.
    pub async fn aggregate_for_tool(&self, tool_id: &str) -> Result<ToolStatsRow, DbError> {
        let stats: ToolStatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS usage_count,
                COALESCE(SUM(success), 0) AS success_count,
                COALESCE(SUM(duration_ms), 0.0) AS total_duration_ms,
                MAX(execution_end) AS last_used
            FROM performance_logs
            WHERE tool_id = ?
            "#,
        )
        .bind(tool_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    /// Overwrite a tool's running sums. Returns false if the tool does not exist.
    pub async fn replace_stats(&self, tool_id: &str, stats: &ToolStatsRow) -> Result<bool, DbError> {
        let derived = stats.clone().into_domain();
        let result = sqlx::query(
            r#"
            UPDATE tools SET
                usage_count = ?,
                success_count = ?,
                total_duration_ms = ?,
                success_rate = ?,
                average_duration = ?,
                last_used = ?
            WHERE tool_id = ?
            "#,
        )
        .bind(stats.usage_count)
        .bind(stats.success_count)
        .bind(stats.total_duration_ms)
        .bind(derived.success_rate)
        .bind(derived.average_duration_ms)
        .bind(stats.last_used)
        .bind(tool_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Aggregate the log inside the filter window. `window_days` is left for
    /// the caller to fill in.
    pub async fn analytics(
        &self,
        filter: &AnalyticsFilter,
        top_n: u32,
    ) -> Result<PerformanceAnalytics, DbError> {
        let since = datetime_to_millis(filter.since);
        let limit = top_n as i64;

        let (total, successes, avg_duration): (i64, i64, Option<f64>) = sqlx::query_as(&format!(
            r#"
            SELECT COUNT(*), COALESCE(SUM(l.success), 0), AVG(l.duration_ms)
            FROM performance_logs l
            WHERE {}
            "#,
            WINDOW_FILTER
        ))
        .bind(since)
        .bind(&filter.tool_id)
        .bind(&filter.tool_id)
        .bind(&filter.project_id)
        .bind(&filter.project_id)
        .fetch_one(&self.pool)
        .await?;

        let slowest: Vec<(String, String, f64)> = sqlx::query_as(&format!(
            r#"
            SELECT l.tool_id, t.name, AVG(l.duration_ms) AS avg_duration
            FROM performance_logs l
            JOIN tools t ON t.tool_id = l.tool_id
            WHERE {}
            GROUP BY l.tool_id
            ORDER BY avg_duration DESC, l.tool_id ASC
            LIMIT ?
            "#,
            WINDOW_FILTER
        ))
        .bind(since)
        .bind(&filter.tool_id)
        .bind(&filter.tool_id)
        .bind(&filter.project_id)
        .bind(&filter.project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let most_used: Vec<(String, String, i64)> = sqlx::query_as(&format!(
            r#"
            SELECT l.tool_id, t.name, COUNT(*) AS uses
            FROM performance_logs l
            JOIN tools t ON t.tool_id = l.tool_id
            WHERE {}
            GROUP BY l.tool_id
            ORDER BY uses DESC, l.tool_id ASC
            LIMIT ?
            "#,
            WINDOW_FILTER
        ))
        .bind(since)
        .bind(&filter.tool_id)
        .bind(&filter.tool_id)
        .bind(&filter.project_id)
        .bind(&filter.project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let errors: Vec<(String, i64)> = sqlx::query_as(&format!(
            r#"
            SELECT l.error_message, COUNT(*) AS occurrences
            FROM performance_logs l
            WHERE {}
              AND l.success = 0
              AND l.error_message IS NOT NULL
            GROUP BY l.error_message
            ORDER BY occurrences DESC, l.error_message ASC
            LIMIT ?
            "#,
            WINDOW_FILTER
        ))
        .bind(since)
        .bind(&filter.tool_id)
        .bind(&filter.tool_id)
        .bind(&filter.project_id)
        .bind(&filter.project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // No executions in the window means no successes to report
        let success_rate = if total > 0 {
            successes as f64 / total as f64
        } else {
            0.0
        };

        Ok(PerformanceAnalytics {
            window_days: 0,
            total_executions: total.max(0) as u64,
            success_rate,
            average_duration_ms: avg_duration.unwrap_or(0.0),
            slowest_tools: slowest
                .into_iter()
                .map(|(tool_id, name, avg_duration_ms)| ToolDurationSummary {
                    tool_id,
                    name,
                    avg_duration_ms,
                })
                .collect(),
            most_used_tools: most_used
                .into_iter()
                .map(|(tool_id, name, uses)| ToolUsageSummary {
                    tool_id,
                    name,
                    usage_count: uses.max(0) as u64,
                })
                .collect(),
            error_patterns: errors
                .into_iter()
                .map(|(error_message, occurrences)| ErrorPattern {
                    error_message,
                    occurrences: occurrences.max(0) as u64,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_memory_pool, run_migrations, ToolRepository};
    use chrono::Duration;
    use uuid::Uuid;
    use vdw_core::ToolMetadata;

    async fn setup_test_db() -> SqlitePool {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let tools = ToolRepository::new(pool.clone());
        tools
            .create(&ToolMetadata::new("fast", "p1").with_id("fast"))
            .await
            .unwrap();
        tools
            .create(&ToolMetadata::new("slow", "p1").with_id("slow"))
            .await
            .unwrap();
        pool
    }

    fn entry(tool_id: &str, project_id: &str, duration_ms: f64, error: Option<&str>) -> PerformanceLogEntry {
        let end = Utc::now();
        PerformanceLogEntry {
            log_id: Uuid::new_v4().to_string(),
            tool_id: tool_id.to_string(),
            project_id: project_id.to_string(),
            execution_start: end - Duration::milliseconds(duration_ms as i64),
            execution_end: end,
            duration_ms,
            success: error.is_none(),
            error_message: error.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_append_updates_running_sums() {
        let repo = PerformanceLogRepository::new(setup_test_db().await);

        repo.append(&entry("fast", "p1", 100.0, None)).await.unwrap();
        repo.append(&entry("fast", "p1", 300.0, None)).await.unwrap();
        let stats = repo
            .append(&entry("fast", "p1", 200.0, Some("timeout")))
            .await
            .unwrap();

        assert_eq!(stats.usage_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.total_duration_ms, 600.0);
        assert!(stats.last_used.is_some());

        let derived = stats.into_domain();
        assert_eq!(derived.average_duration_ms, 200.0);
        assert!((derived.success_rate - 2.0 / 3.0).abs() < 1e-9);

        assert_eq!(repo.find_by_tool("fast").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_append_for_unknown_tool_writes_nothing() {
        let repo = PerformanceLogRepository::new(setup_test_db().await);

        let err = repo.append(&entry("ghost", "p1", 10.0, None)).await.unwrap_err();
        assert!(matches!(err, DbError::ToolNotFound(id) if id == "ghost"));
        assert!(repo.find_by_tool("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_matches_running_sums() {
        let repo = PerformanceLogRepository::new(setup_test_db().await);
        let mut last = None;
        for (ms, err) in [(10.0, None), (30.0, Some("boom")), (50.0, None)] {
            last = Some(repo.append(&entry("slow", "p1", ms, err)).await.unwrap());
        }

        let rebuilt = repo.aggregate_for_tool("slow").await.unwrap();
        assert_eq!(Some(rebuilt), last);

        let empty = repo.aggregate_for_tool("fast").await.unwrap();
        assert_eq!(empty.usage_count, 0);
        assert_eq!(empty.last_used, None);
    }

    #[tokio::test]
    async fn test_replace_stats() {
        let repo = PerformanceLogRepository::new(setup_test_db().await);
        repo.append(&entry("fast", "p1", 10.0, None)).await.unwrap();

        let zeroed = ToolStatsRow {
            usage_count: 0,
            success_count: 0,
            total_duration_ms: 0.0,
            last_used: None,
        };
        assert!(repo.replace_stats("fast", &zeroed).await.unwrap());
        assert!(!repo.replace_stats("ghost", &zeroed).await.unwrap());

        let rebuilt = repo.aggregate_for_tool("fast").await.unwrap();
        repo.replace_stats("fast", &rebuilt).await.unwrap();
        assert_eq!(rebuilt.usage_count, 1);
    }

    #[tokio::test]
    async fn test_analytics_window_and_rankings() {
        let repo = PerformanceLogRepository::new(setup_test_db().await);
        repo.append(&entry("fast", "p1", 10.0, None)).await.unwrap();
        repo.append(&entry("fast", "p1", 20.0, Some("disk full"))).await.unwrap();
        repo.append(&entry("fast", "p2", 30.0, Some("disk full"))).await.unwrap();
        repo.append(&entry("slow", "p2", 900.0, Some("timeout"))).await.unwrap();

        let mut old = entry("slow", "p1", 5000.0, None);
        old.execution_start = Utc::now() - Duration::days(30);
        old.execution_end = old.execution_start + Duration::seconds(5);
        repo.append(&old).await.unwrap();

        let filter = AnalyticsFilter::since(Utc::now() - Duration::days(7));
        let analytics = repo.analytics(&filter, 10).await.unwrap();

        assert_eq!(analytics.total_executions, 4);
        assert_eq!(analytics.success_rate, 0.25);
        assert_eq!(analytics.slowest_tools[0].tool_id, "slow");
        assert_eq!(analytics.slowest_tools[0].avg_duration_ms, 900.0);
        assert_eq!(analytics.most_used_tools[0].tool_id, "fast");
        assert_eq!(analytics.most_used_tools[0].usage_count, 3);
        assert_eq!(analytics.error_patterns[0].error_message, "disk full");
        assert_eq!(analytics.error_patterns[0].occurrences, 2);

        let scoped = repo
            .analytics(&filter.clone().with_project("p2"), 1)
            .await
            .unwrap();
        assert_eq!(scoped.total_executions, 2);
        assert_eq!(scoped.slowest_tools.len(), 1);

        let one_tool = repo.analytics(&filter.with_tool("slow"), 10).await.unwrap();
        assert_eq!(one_tool.total_executions, 1);
        assert_eq!(one_tool.most_used_tools[0].name, "slow");
    }

    #[tokio::test]
    async fn test_analytics_empty_window() {
        let repo = PerformanceLogRepository::new(setup_test_db().await);
        let analytics = repo
            .analytics(&AnalyticsFilter::since(Utc::now()), 10)
            .await
            .unwrap();

        assert_eq!(analytics.total_executions, 0);
        assert_eq!(analytics.success_rate, 0.0);
        assert_eq!(analytics.average_duration_ms, 0.0);
        assert!(analytics.slowest_tools.is_empty());
    }
}
