use vdw_core::{
    Capability, CapabilityRating, DependencyType, ToolDependency, ToolMetadata, ToolStats,
};

use super::{datetime_to_millis, millis_to_datetime};

/// A tool as loaded from the store, with its insertion sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTool {
    pub metadata: ToolMetadata,
    /// SQLite rowid; increases with insertion order
    pub seq: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ToolRow {
    pub seq: i64,
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub created_by: String,
    pub created_at: i64,
    pub last_used: Option<i64>,
    pub usage_count: i64,
    pub success_count: i64,
    pub total_duration_ms: f64,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
    pub replacement_tool_id: Option<String>,
}

impl ToolRow {
    pub fn into_stored(
        self,
        capabilities: Vec<CapabilityRating>,
        dependencies: Vec<ToolDependency>,
    ) -> StoredTool {
        let stats = ToolStatsRow {
            usage_count: self.usage_count,
            success_count: self.success_count,
            total_duration_ms: self.total_duration_ms,
            last_used: self.last_used,
        }
        .into_domain();

        StoredTool {
            seq: self.seq,
            metadata: ToolMetadata {
                tool_id: self.tool_id,
                name: self.name,
                description: self.description,
                version: self.version,
                created_by: self.created_by,
                capabilities,
                dependencies,
                stats,
                deprecated: self.deprecated,
                deprecation_reason: self.deprecation_reason,
                replacement_tool_id: self.replacement_tool_id,
                created_at: millis_to_datetime(self.created_at),
            },
        }
    }
}

/// Running sums behind the derived tool stats.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ToolStatsRow {
    pub usage_count: i64,
    pub success_count: i64,
    pub total_duration_ms: f64,
    pub last_used: Option<i64>,
}

impl ToolStatsRow {
    pub fn into_domain(self) -> ToolStats {
        ToolStats::from_sums(
            self.usage_count.max(0) as u64,
            self.success_count.max(0) as u64,
            self.total_duration_ms,
            self.last_used.map(millis_to_datetime),
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CapabilityRatingRow {
    pub tool_id: String,
    pub name: String,
    pub strength: f64,
    pub confidence: f64,
}

impl CapabilityRatingRow {
    pub fn into_domain(self) -> CapabilityRating {
        CapabilityRating {
            name: self.name,
            strength: self.strength,
            confidence: self.confidence,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DependencyRow {
    pub dependent_tool_id: String,
    pub dependency_tool_id: String,
    pub dependency_type: String,
}

impl DependencyRow {
    pub fn into_domain(self) -> ToolDependency {
        ToolDependency {
            tool_id: self.dependency_tool_id,
            kind: DependencyType::parse(&self.dependency_type).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CapabilityRow {
    pub capability_id: String,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
}

impl CapabilityRow {
    pub fn into_domain(self) -> Capability {
        Capability {
            name: self.name,
            description: self.description,
            category: self.category,
        }
    }
}

/// Row counts of the registry tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryCounts {
    pub tools: i64,
    pub capabilities: i64,
    pub tool_capabilities: i64,
    pub dependencies: i64,
    pub performance_logs: i64,
}

pub(crate) fn created_at_millis(tool: &ToolMetadata) -> i64 {
    datetime_to_millis(tool.created_at)
}
