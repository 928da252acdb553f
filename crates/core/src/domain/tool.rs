use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named skill with registry-wide description and category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// How well one tool provides one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRating {
    pub name: String,
    pub strength: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl CapabilityRating {
    pub fn new(name: impl Into<String>, strength: f64, confidence: f64) -> Self {
        Self {
            name: name.into(),
            strength,
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    Requires,
    Optional,
    Conflicts,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requires => "requires",
            Self::Optional => "optional",
            Self::Conflicts => "conflicts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requires" => Some(Self::Requires),
            "optional" => Some(Self::Optional),
            "conflicts" => Some(Self::Conflicts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDependency {
    pub tool_id: String,
    #[serde(default)]
    pub kind: DependencyType,
}

impl ToolDependency {
    pub fn new(tool_id: impl Into<String>, kind: DependencyType) -> Self {
        Self {
            tool_id: tool_id.into(),
            kind,
        }
    }
}

/// Usage statistics derived from the performance log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub usage_count: u64,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub last_used: Option<DateTime<Utc>>,
}

impl Default for ToolStats {
    fn default() -> Self {
        Self {
            usage_count: 0,
            success_rate: 1.0,
            average_duration_ms: 0.0,
            last_used: None,
        }
    }
}

impl ToolStats {
    /// Derive stats from running sums.
    pub fn from_sums(
        usage_count: u64,
        success_count: u64,
        total_duration_ms: f64,
        last_used: Option<DateTime<Utc>>,
    ) -> Self {
        if usage_count == 0 {
            return Self {
                last_used,
                ..Self::default()
            };
        }
        Self {
            usage_count,
            success_rate: success_count as f64 / usage_count as f64,
            average_duration_ms: total_duration_ms / usage_count as f64,
            last_used,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub tool_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Project that created the tool
    pub created_by: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityRating>,
    #[serde(default)]
    pub dependencies: Vec<ToolDependency>,
    #[serde(default)]
    pub stats: ToolStats,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
    #[serde(default)]
    pub replacement_tool_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            tool_id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            created_by: created_by.into(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
            stats: ToolStats::default(),
            deprecated: false,
            deprecation_reason: None,
            replacement_tool_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.tool_id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>, strength: f64, confidence: f64) -> Self {
        self.capabilities
            .push(CapabilityRating::new(name, strength, confidence));
        self
    }

    pub fn with_dependency(mut self, tool_id: impl Into<String>, kind: DependencyType) -> Self {
        self.dependencies.push(ToolDependency::new(tool_id, kind));
        self
    }

    pub fn capability(&self, name: &str) -> Option<&CapabilityRating> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn strength_for(&self, name: &str) -> Option<f64> {
        self.capability(name).map(|c| c.strength)
    }

    /// Sort capabilities by name and dependencies by target id.
    pub fn normalize(&mut self) {
        self.capabilities.sort_by(|a, b| a.name.cmp(&b.name));
        self.dependencies.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
    }
}

/// Append-only record of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceLogEntry {
    pub log_id: String,
    pub tool_id: String,
    pub project_id: String,
    pub execution_start: DateTime<Utc>,
    pub execution_end: DateTime<Utc>,
    pub duration_ms: f64,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub missing: Vec<String>,
    pub weak: Vec<String>,
    pub satisfied: Vec<String>,
    pub coverage: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDurationSummary {
    pub tool_id: String,
    pub name: String,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsageSummary {
    pub tool_id: String,
    pub name: String,
    pub usage_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub error_message: String,
    pub occurrences: u64,
}

/// Aggregates over the performance log inside one time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalytics {
    pub window_days: u32,
    pub total_executions: u64,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub slowest_tools: Vec<ToolDurationSummary>,
    pub most_used_tools: Vec<ToolUsageSummary>,
    pub error_patterns: Vec<ErrorPattern>,
}
