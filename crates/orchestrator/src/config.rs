use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vdw_core::VdwPhase;

/// What a transition check does when the oracle cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OracleFailurePolicy {
    /// Allow the transition and flag it as degraded
    #[default]
    FailOpen,
    /// Refuse the transition
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub oracle_timeout_ms: u64,
    pub default_oracle_policy: OracleFailurePolicy,
    /// Overrides keyed by the target phase of the transition
    pub phase_policies: BTreeMap<VdwPhase, OracleFailurePolicy>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            oracle_timeout_ms: 5000,
            default_oracle_policy: OracleFailurePolicy::FailOpen,
            phase_policies: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_default_policy(mut self, policy: OracleFailurePolicy) -> Self {
        self.default_oracle_policy = policy;
        self
    }

    pub fn with_phase_policy(mut self, phase: VdwPhase, policy: OracleFailurePolicy) -> Self {
        self.phase_policies.insert(phase, policy);
        self
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    pub fn policy_for(&self, target: VdwPhase) -> OracleFailurePolicy {
        self.phase_policies
            .get(&target)
            .copied()
            .unwrap_or(self.default_oracle_policy)
    }
}
