use serde::{Deserialize, Serialize};

/// Thresholds and limits used by gap analysis and analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Below this strength a capability counts as missing
    pub weak_threshold: f64,
    /// At or above this strength a capability counts as satisfied
    pub strong_threshold: f64,
    /// Length of the ranked lists in performance analytics
    pub analytics_top_n: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            weak_threshold: 0.1,
            strong_threshold: 0.7,
            analytics_top_n: 10,
        }
    }
}

impl RegistryConfig {
    pub fn with_thresholds(mut self, weak: f64, strong: f64) -> Self {
        self.weak_threshold = weak;
        self.strong_threshold = strong;
        self
    }

    pub fn with_top_n(mut self, top_n: u32) -> Self {
        self.analytics_top_n = top_n;
        self
    }
}
