use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, SubsecRound, Utc};
use dashmap::DashMap;
use db::{AnalyticsFilter, PerformanceLogRepository, ToolRepository};
use parking_lot::RwLock;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vdw_core::{
    Capability, GapAnalysis, PerformanceAnalytics, PerformanceLogEntry, ToolMetadata, ToolStats,
};

use crate::cache::ToolCache;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryValidationError, Result};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Persistent tool catalog with a write-through in-memory cache.
///
/// Reads are served from the cache. Writes to the same tool id are
/// serialized; the cache changes only after the write has committed.
pub struct CapabilityRegistry {
    tools: ToolRepository,
    logs: PerformanceLogRepository,
    cache: RwLock<ToolCache>,
    tool_locks: DashMap<String, Arc<Mutex<()>>>,
    config: RegistryConfig,
}

impl CapabilityRegistry {
    /// Build a registry over a migrated pool and load the cache from it.
    pub async fn open(pool: SqlitePool, config: RegistryConfig) -> Result<Self> {
        let registry = Self {
            tools: ToolRepository::new(pool.clone()),
            logs: PerformanceLogRepository::new(pool),
            cache: RwLock::new(ToolCache::new()),
            tool_locks: DashMap::new(),
            config,
        };
        let loaded = registry.reload_cache().await?;
        info!(tools = loaded, "Capability registry opened");
        Ok(registry)
    }

    /// Rebuild the cache from the database. Returns the number of tools loaded.
    pub async fn reload_cache(&self) -> Result<usize> {
        let stored = self.tools.find_all().await?;
        let cache = ToolCache::from_stored(stored);
        let count = cache.len();
        *self.cache.write() = cache;
        Ok(count)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    async fn lock_tool(&self, tool_id: &str) -> ToolGuard<'_> {
        let lock = self
            .tool_locks
            .entry(tool_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ToolGuard {
            registry: self,
            tool_id: tool_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }


    /// Validate and persist a new tool.
    ///
    /// Stats and `created_at` are assigned by the registry. Either the tool,
    /// its ratings and its dependency edges are all stored, or nothing is.
    pub async fn register_tool(&self, mut tool: ToolMetadata) -> Result<ToolMetadata> {
        validate_shape(&tool)?;

        let _guard = self.lock_tool(&tool.tool_id).await;

        {
            let cache = self.cache.read();
            if cache.contains(&tool.tool_id) {
                return Err(RegistryValidationError::DuplicateTool(tool.tool_id).into());
            }
            if let Some(dep) = tool.dependencies.iter().find(|d| !cache.contains(&d.tool_id)) {
                return Err(RegistryValidationError::UnknownDependency(dep.tool_id.clone()).into());
            }
            if let Some(replacement) = &tool.replacement_tool_id {
                if !cache.contains(replacement) {
                    return Err(
                        RegistryValidationError::UnknownReplacement(replacement.clone()).into(),
                    );
                }
            }
        }

        tool.normalize();
        tool.stats = ToolStats::default();
        tool.created_at = Utc::now().trunc_subsecs(3);

        let stored = self.tools.create(&tool).await?;
        let metadata = stored.metadata.clone();
        self.cache.write().insert(stored);

        info!(
            tool_id = %metadata.tool_id,
            name = %metadata.name,
            capabilities = metadata.capabilities.len(),
            "Tool registered"
        );
        Ok(metadata)
    }

    /// Cached record, deprecated tools included.
    pub fn get_tool(&self, tool_id: &str) -> Option<ToolMetadata> {
        self.cache.read().get(tool_id).cloned()
    }

    pub fn list_tools(&self, include_deprecated: bool, created_by: Option<&str>) -> Vec<ToolMetadata> {
        self.cache.read().list(include_deprecated, created_by)
    }

    /// Active tools rating `capability` at `min_strength` or more, best first.
    pub fn find_by_capability(&self, capability: &str, min_strength: f64) -> Vec<ToolMetadata> {
        self.cache.read().find_by_capability(capability, min_strength)
    }

    /// Classify each required capability by the best active tool for it.
    pub fn analyze_capability_gap<S: AsRef<str>>(&self, required: &[S]) -> GapAnalysis {
        let mut analysis = GapAnalysis::default();
        {
            let cache = self.cache.read();
            for name in required.iter().map(AsRef::as_ref) {
                match cache.best_strength(name) {
                    Some(s) if s >= self.config.strong_threshold => {
                        analysis.satisfied.push(name.to_string())
                    }
                    Some(s) if s >= self.config.weak_threshold => {
                        analysis.weak.push(name.to_string())
                    }
                    _ => analysis.missing.push(name.to_string()),
                }
            }
        }

        analysis.coverage = if required.is_empty() {
            1.0
        } else {
            analysis.satisfied.len() as f64 / required.len() as f64
        };

        if !analysis.missing.is_empty() {
            analysis.recommendations.push(format!(
                "Create tools for missing capabilities: {}",
                analysis.missing.join(", ")
            ));
        }
        if !analysis.weak.is_empty() {
            analysis.recommendations.push(format!(
                "Strengthen tools for weak capabilities: {}",
                analysis.weak.join(", ")
            ));
        }

        debug!(
            required = required.len(),
            missing = analysis.missing.len(),
            weak = analysis.weak.len(),
            coverage = analysis.coverage,
            "Capability gap analyzed"
        );
        analysis
    }

    /// Log one execution of a tool and fold it into the tool's stats.
    pub async fn record_usage(
        &self,
        tool_id: &str,
        project_id: &str,
        duration_ms: f64,
        success: bool,
        error_message: Option<String>,
    ) -> Result<PerformanceLogEntry> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(RegistryValidationError::InvalidDuration(duration_ms).into());
        }
        if !self.cache.read().contains(tool_id) {
            return Err(RegistryError::ToolNotFound(tool_id.to_string()));
        }

        let end = Utc::now().trunc_subsecs(3);
        let entry = PerformanceLogEntry {
            log_id: Uuid::new_v4().to_string(),
            tool_id: tool_id.to_string(),
            project_id: project_id.to_string(),
            execution_start: end - Duration::milliseconds(duration_ms.round() as i64),
            execution_end: end,
            duration_ms,
            success,
            error_message,
        };

        let _guard = self.lock_tool(tool_id).await;

        let sums = self.logs.append(&entry).await?;
        let stats = sums.into_domain();
        self.cache.write().update_stats(tool_id, stats.clone());

        if !success {
            warn!(
                tool_id = %tool_id,
                project_id = %project_id,
                error = entry.error_message.as_deref().unwrap_or("unknown"),
                "Tool execution failed"
            );
        }
        debug!(
            tool_id = %tool_id,
            usage_count = stats.usage_count,
            success_rate = stats.success_rate,
            "Tool usage recorded"
        );
        Ok(entry)
    }

    /// Mark a tool deprecated. Calling it again overwrites reason and replacement.
    pub async fn deprecate_tool(
        &self,
        tool_id: &str,
        reason: &str,
        replacement_tool_id: Option<&str>,
    ) -> Result<ToolMetadata> {
        if let Some(replacement) = replacement_tool_id {
            if replacement == tool_id {
                return Err(RegistryValidationError::SelfReplacement(tool_id.to_string()).into());
            }
            if !self.cache.read().contains(replacement) {
                return Err(
                    RegistryValidationError::UnknownReplacement(replacement.to_string()).into(),
                );
            }
        }

        let _guard = self.lock_tool(tool_id).await;

        if !self.tools.deprecate(tool_id, reason, replacement_tool_id).await? {
            return Err(RegistryError::ToolNotFound(tool_id.to_string()));
        }

        let updated = self
            .cache
            .write()
            .mark_deprecated(tool_id, reason, replacement_tool_id);

        info!(
            tool_id = %tool_id,
            replacement = replacement_tool_id.unwrap_or("none"),
            "Tool deprecated"
        );

        match updated {
            Some(metadata) => Ok(metadata),
            // Row written by another process since the cache was loaded
            None => self.reload_tool(tool_id).await,
        }
    }

    async fn reload_tool(&self, tool_id: &str) -> Result<ToolMetadata> {
        let stored = self
            .tools
            .find_by_id(tool_id)
            .await?
            .ok_or_else(|| RegistryError::ToolNotFound(tool_id.to_string()))?;
        let metadata = stored.metadata.clone();
        self.cache.write().insert(stored);
        Ok(metadata)
    }

    /// Aggregates over logs inside the last `window_days` days, optionally
    /// restricted to one tool and/or one project.
    pub async fn get_performance_analytics(
        &self,
        tool_id: Option<&str>,
        project_id: Option<&str>,
        window_days: u32,
    ) -> Result<PerformanceAnalytics> {
        let since = Utc::now() - Duration::milliseconds(window_days as i64 * MILLIS_PER_DAY);
        let mut filter = AnalyticsFilter::since(since);
        if let Some(tool_id) = tool_id {
            filter = filter.with_tool(tool_id);
        }
        if let Some(project_id) = project_id {
            filter = filter.with_project(project_id);
        }

        let mut analytics = self
            .logs
            .analytics(&filter, self.config.analytics_top_n)
            .await?;
        analytics.window_days = window_days;
        Ok(analytics)
    }

    /// Full execution history of a tool, oldest first.
    pub async fn usage_history(&self, tool_id: &str) -> Result<Vec<PerformanceLogEntry>> {
        Ok(self.logs.find_by_tool(tool_id).await?)
    }

    /// Rebuild a tool's stats from its complete log history and store them.
    pub async fn recompute_stats(&self, tool_id: &str) -> Result<ToolStats> {
        let _guard = self.lock_tool(tool_id).await;

        let sums = self.logs.aggregate_for_tool(tool_id).await?;
        if !self.logs.replace_stats(tool_id, &sums).await? {
            return Err(RegistryError::ToolNotFound(tool_id.to_string()));
        }

        let stats = sums.into_domain();
        let previous = self.get_tool(tool_id).map(|t| t.stats);
        if previous.as_ref().is_some_and(|p| p.usage_count != stats.usage_count) {
            warn!(
                tool_id = %tool_id,
                cached = previous.map(|p| p.usage_count).unwrap_or_default(),
                recomputed = stats.usage_count,
                "Cached stats drifted from the log"
            );
        }
        self.cache.write().update_stats(tool_id, stats.clone());
        Ok(stats)
    }

    pub async fn define_capability(&self, capability: Capability) -> Result<Capability> {
        if capability.name.trim().is_empty() {
            return Err(RegistryValidationError::EmptyCapabilityName.into());
        }
        let defined = self.tools.define_capability(&capability).await?;
        debug!(capability = %defined.name, "Capability defined");
        Ok(defined)
    }

    pub async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        Ok(self.tools.list_capabilities().await?)
    }
}

/// Exclusive write access to one tool id. On drop the lock entry is
/// forgotten unless the tool is cached or another caller is waiting on it.
struct ToolGuard<'a> {
    registry: &'a CapabilityRegistry,
    tool_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ToolGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if self.registry.cache.read().contains(&self.tool_id) {
            return;
        }
        self.registry
            .tool_locks
            .remove_if(&self.tool_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Checks that need nothing but the record itself.
fn validate_shape(tool: &ToolMetadata) -> std::result::Result<(), RegistryValidationError> {
    if tool.tool_id.trim().is_empty() {
        return Err(RegistryValidationError::EmptyToolId);
    }
    if tool.name.trim().is_empty() {
        return Err(RegistryValidationError::EmptyName);
    }

    let mut seen = HashSet::new();
    for rating in &tool.capabilities {
        if rating.name.trim().is_empty() {
            return Err(RegistryValidationError::EmptyCapabilityName);
        }
        for (field, value) in [("strength", rating.strength), ("confidence", rating.confidence)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RegistryValidationError::OutOfRange {
                    capability: rating.name.clone(),
                    field,
                    value,
                });
            }
        }
        if !seen.insert(rating.name.as_str()) {
            return Err(RegistryValidationError::DuplicateCapability(rating.name.clone()));
        }
    }

    let mut seen = HashSet::new();
    for dep in &tool.dependencies {
        if dep.tool_id == tool.tool_id {
            return Err(RegistryValidationError::SelfDependency(dep.tool_id.clone()));
        }
        if !seen.insert(dep.tool_id.as_str()) {
            return Err(RegistryValidationError::DuplicateDependency(dep.tool_id.clone()));
        }
    }

    if tool.replacement_tool_id.as_deref() == Some(tool.tool_id.as_str()) {
        return Err(RegistryValidationError::SelfReplacement(tool.tool_id.clone()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::{create_memory_pool, run_migrations};
    use vdw_core::DependencyType;

    async fn setup_registry() -> CapabilityRegistry {
        let pool = create_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        CapabilityRegistry::open(pool, RegistryConfig::default())
            .await
            .unwrap()
    }

    fn tool(id: &str) -> ToolMetadata {
        ToolMetadata::new(id, "project-1").with_id(id)
    }

    #[test]
    fn test_validate_shape() {
        assert_eq!(
            validate_shape(&tool("")),
            Err(RegistryValidationError::EmptyToolId)
        );
        assert!(matches!(
            validate_shape(&tool("a").with_capability("x", 1.5, 1.0)),
            Err(RegistryValidationError::OutOfRange { field: "strength", .. })
        ));
        assert!(matches!(
            validate_shape(&tool("a").with_capability("x", 0.5, -0.1)),
            Err(RegistryValidationError::OutOfRange { field: "confidence", .. })
        ));
        assert!(matches!(
            validate_shape(&tool("a").with_capability("x", f64::NAN, 1.0)),
            Err(RegistryValidationError::OutOfRange { .. })
        ));
        assert_eq!(
            validate_shape(&tool("a").with_capability("x", 0.5, 1.0).with_capability("x", 0.6, 1.0)),
            Err(RegistryValidationError::DuplicateCapability("x".into()))
        );
        assert_eq!(
            validate_shape(&tool("a").with_dependency("a", DependencyType::Requires)),
            Err(RegistryValidationError::SelfDependency("a".into()))
        );
        assert!(validate_shape(&tool("a").with_capability("x", 0.0, 1.0)).is_ok());
    }

    #[tokio::test]
    async fn test_register_assigns_stats_and_normalizes() {
        let registry = setup_registry().await;
        let mut input = tool("t1")
            .with_capability("search", 0.9, 0.9)
            .with_capability("filter", 0.4, 1.0);
        input.stats = ToolStats::from_sums(99, 1, 5.0, None);

        let registered = registry.register_tool(input).await.unwrap();
        assert_eq!(registered.stats, ToolStats::default());
        assert_eq!(registered.capabilities[0].name, "filter");
        assert_eq!(registry.get_tool("t1"), Some(registered));
    }

    #[tokio::test]
    async fn test_register_duplicate_and_unknown_dependency() {
        let registry = setup_registry().await;
        registry.register_tool(tool("t1")).await.unwrap();

        let err = registry.register_tool(tool("t1")).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(RegistryValidationError::DuplicateTool(_))
        ));

        let err = registry
            .register_tool(tool("t2").with_dependency("ghost", DependencyType::Optional))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(RegistryValidationError::UnknownDependency(_))
        ));
        assert!(registry.get_tool("t2").is_none());
    }

    #[tokio::test]
    async fn test_gap_analysis_thresholds() {
        let registry = setup_registry().await;
        registry
            .register_tool(
                tool("t1")
                    .with_capability("search", 0.9, 1.0)
                    .with_capability("lint", 0.3, 1.0)
                    .with_capability("format", 0.05, 1.0),
            )
            .await
            .unwrap();

        let gap = registry.analyze_capability_gap(&["search", "lint", "format", "deploy"]);
        assert_eq!(gap.satisfied, vec!["search"]);
        assert_eq!(gap.weak, vec!["lint"]);
        assert_eq!(gap.missing, vec!["format", "deploy"]);
        assert_eq!(gap.coverage, 0.25);
        assert_eq!(gap.recommendations.len(), 2);
        assert!(gap.recommendations[0].contains("format, deploy"));
    }

    #[tokio::test]
    async fn test_gap_analysis_empty_input() {
        let registry = setup_registry().await;
        let gap = registry.analyze_capability_gap::<&str>(&[]);
        assert_eq!(gap.coverage, 1.0);
        assert!(gap.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_deprecated_tool_drops_out_of_search_and_gaps() {
        let registry = setup_registry().await;
        registry
            .register_tool(tool("old").with_capability("search", 0.95, 1.0))
            .await
            .unwrap();
        registry
            .register_tool(tool("new").with_capability("search", 0.5, 1.0))
            .await
            .unwrap();

        let deprecated = registry
            .deprecate_tool("old", "superseded", Some("new"))
            .await
            .unwrap();
        assert!(deprecated.deprecated);

        let found = registry.find_by_capability("search", 0.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tool_id, "new");
        assert_eq!(registry.analyze_capability_gap(&["search"]).weak, vec!["search"]);
        assert!(registry.get_tool("old").unwrap().deprecated);

        // Idempotent; last call wins
        let again = registry.deprecate_tool("old", "retired", None).await.unwrap();
        assert_eq!(again.deprecation_reason.as_deref(), Some("retired"));
        assert_eq!(again.replacement_tool_id, None);
    }

    #[tokio::test]
    async fn test_deprecate_validation() {
        let registry = setup_registry().await;
        registry.register_tool(tool("a")).await.unwrap();

        assert!(matches!(
            registry.deprecate_tool("a", "x", Some("a")).await,
            Err(RegistryError::Validation(RegistryValidationError::SelfReplacement(_)))
        ));
        assert!(matches!(
            registry.deprecate_tool("a", "x", Some("ghost")).await,
            Err(RegistryError::Validation(RegistryValidationError::UnknownReplacement(_)))
        ));
        assert!(matches!(
            registry.deprecate_tool("ghost", "x", None).await,
            Err(RegistryError::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_entries_only_kept_for_known_tools() {
        let registry = setup_registry().await;
        registry.register_tool(tool("a")).await.unwrap();
        assert_eq!(registry.tool_locks.len(), 1);

        for i in 0..10 {
            let ghost = format!("ghost-{i}");
            assert!(registry.deprecate_tool(&ghost, "x", None).await.is_err());
            assert!(registry.recompute_stats(&ghost).await.is_err());
        }
        assert!(registry
            .register_tool(tool("b").with_dependency("missing", DependencyType::Requires))
            .await
            .is_err());
        assert!(registry.register_tool(tool("a")).await.is_err());

        assert_eq!(registry.tool_locks.len(), 1);
        assert!(registry.tool_locks.contains_key("a"));
    }

    #[tokio::test]
    async fn test_record_usage_updates_cache() {
        let registry = setup_registry().await;
        registry.register_tool(tool("t1")).await.unwrap();

        registry.record_usage("t1", "p1", 100.0, true, None).await.unwrap();
        let entry = registry
            .record_usage("t1", "p1", 300.0, false, Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(entry.execution_end - entry.execution_start, Duration::milliseconds(300));

        let stats = registry.get_tool("t1").unwrap().stats;
        assert_eq!(stats.usage_count, 2);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.average_duration_ms, 200.0);
        assert!(stats.last_used.is_some());

        assert_eq!(registry.usage_history("t1").await.unwrap().len(), 2);
        assert_eq!(registry.recompute_stats("t1").await.unwrap(), stats);
    }

    #[tokio::test]
    async fn test_record_usage_rejects_bad_input() {
        let registry = setup_registry().await;
        registry.register_tool(tool("t1")).await.unwrap();

        assert!(matches!(
            registry.record_usage("ghost", "p1", 1.0, true, None).await,
            Err(RegistryError::ToolNotFound(_))
        ));
        assert!(matches!(
            registry.record_usage("t1", "p1", -1.0, true, None).await,
            Err(RegistryError::Validation(RegistryValidationError::InvalidDuration(_)))
        ));
        assert_eq!(registry.get_tool("t1").unwrap().stats.usage_count, 0);
    }

    #[tokio::test]
    async fn test_analytics_window_days_is_reported() {
        let registry = setup_registry().await;
        registry.register_tool(tool("t1")).await.unwrap();
        registry.record_usage("t1", "p1", 10.0, true, None).await.unwrap();

        let analytics = registry
            .get_performance_analytics(Some("t1"), None, 7)
            .await
            .unwrap();
        assert_eq!(analytics.window_days, 7);
        assert_eq!(analytics.total_executions, 1);
        assert_eq!(analytics.most_used_tools[0].tool_id, "t1");
    }

    #[tokio::test]
    async fn test_capability_definitions() {
        let registry = setup_registry().await;
        registry
            .define_capability(Capability::new("search", "find things").with_category("io"))
            .await
            .unwrap();
        registry
            .register_tool(tool("t1").with_capability("lint", 0.5, 1.0))
            .await
            .unwrap();

        let names: Vec<_> = registry
            .list_capabilities()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["lint", "search"]);

        assert!(registry
            .define_capability(Capability::new(" ", "blank"))
            .await
            .is_err());
    }
}
