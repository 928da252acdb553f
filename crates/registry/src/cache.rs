//! In-memory view of the tool tables.
//!
//! Holds no locks of its own; the registry wraps it in a short-lived
//! `RwLock` and only writes to it after the matching database commit.

use std::collections::HashMap;

use db::StoredTool;
use vdw_core::{ToolMetadata, ToolStats};

#[derive(Debug, Clone)]
struct CachedTool {
    metadata: ToolMetadata,
    seq: i64,
}

#[derive(Debug, Default)]
pub struct ToolCache {
    tools: HashMap<String, CachedTool>,
    /// capability name -> ids of tools rating it, deprecated ones included
    by_capability: HashMap<String, Vec<String>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stored(stored: impl IntoIterator<Item = StoredTool>) -> Self {
        let mut cache = Self::new();
        for tool in stored {
            cache.insert(tool);
        }
        cache
    }

    pub fn insert(&mut self, stored: StoredTool) {
        let id = stored.metadata.tool_id.clone();
        if self.tools.contains_key(&id) {
            self.remove_from_index(&id);
        }
        for rating in &stored.metadata.capabilities {
            self.by_capability
                .entry(rating.name.clone())
                .or_default()
                .push(id.clone());
        }
        self.tools.insert(
            id,
            CachedTool {
                metadata: stored.metadata,
                seq: stored.seq,
            },
        );
    }

    fn remove_from_index(&mut self, tool_id: &str) {
        self.by_capability.retain(|_, ids| {
            ids.retain(|id| id != tool_id);
            !ids.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    pub fn get(&self, tool_id: &str) -> Option<&ToolMetadata> {
        self.tools.get(tool_id).map(|t| &t.metadata)
    }

    /// Replace the stats of a cached tool, returning the updated record.
    pub fn update_stats(&mut self, tool_id: &str, stats: ToolStats) -> Option<ToolMetadata> {
        let cached = self.tools.get_mut(tool_id)?;
        cached.metadata.stats = stats;
        Some(cached.metadata.clone())
    }

    pub fn mark_deprecated(
        &mut self,
        tool_id: &str,
        reason: &str,
        replacement_tool_id: Option<&str>,
    ) -> Option<ToolMetadata> {
        let cached = self.tools.get_mut(tool_id)?;
        cached.metadata.deprecated = true;
        cached.metadata.deprecation_reason = Some(reason.to_string());
        cached.metadata.replacement_tool_id = replacement_tool_id.map(String::from);
        Some(cached.metadata.clone())
    }

    /// Active tools rating `capability` at or above `min_strength`, best first.
    ///
    /// Ties on strength go to the more used tool, then to the older one.
    pub fn find_by_capability(&self, capability: &str, min_strength: f64) -> Vec<ToolMetadata> {
        let Some(ids) = self.by_capability.get(capability) else {
            return Vec::new();
        };

        let mut matches: Vec<(f64, &CachedTool)> = ids
            .iter()
            .filter_map(|id| self.tools.get(id))
            .filter(|t| !t.metadata.deprecated)
            .filter_map(|t| {
                t.metadata
                    .strength_for(capability)
                    .filter(|s| *s >= min_strength)
                    .map(|s| (s, t))
            })
            .collect();

        matches.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.metadata.stats.usage_count.cmp(&a.metadata.stats.usage_count))
                .then_with(|| a.seq.cmp(&b.seq))
        });

        matches.into_iter().map(|(_, t)| t.metadata.clone()).collect()
    }

    /// Highest strength any active tool has for `capability`.
    pub fn best_strength(&self, capability: &str) -> Option<f64> {
        self.by_capability
            .get(capability)?
            .iter()
            .filter_map(|id| self.tools.get(id))
            .filter(|t| !t.metadata.deprecated)
            .filter_map(|t| t.metadata.strength_for(capability))
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Tools in registration order.
    pub fn list(&self, include_deprecated: bool, created_by: Option<&str>) -> Vec<ToolMetadata> {
        let mut tools: Vec<&CachedTool> = self
            .tools
            .values()
            .filter(|t| include_deprecated || !t.metadata.deprecated)
            .filter(|t| created_by.map_or(true, |p| t.metadata.created_by == p))
            .collect();
        tools.sort_by_key(|t| t.seq);
        tools.into_iter().map(|t| t.metadata.clone()).collect()
    }
}
