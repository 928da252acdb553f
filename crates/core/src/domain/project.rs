use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::VdwPhase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_id: Uuid,
    pub current_phase: VdwPhase,
    pub initial_request: String,
    /// Output of each completed execution phase
    #[serde(default)]
    pub outputs: BTreeMap<VdwPhase, serde_json::Value>,
    /// Reviewer feedback keyed by execution phase
    #[serde(default)]
    pub feedback: BTreeMap<VdwPhase, String>,
    /// Number of handler runs per execution phase
    #[serde(default)]
    pub execution_counts: BTreeMap<VdwPhase, u32>,
    /// Handler error that moved the project to FAILED
    #[serde(default)]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectContext {
    pub fn new(initial_request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: Uuid::new_v4(),
            current_phase: VdwPhase::Idle,
            initial_request: initial_request.into(),
            outputs: BTreeMap::new(),
            feedback: BTreeMap::new(),
            execution_counts: BTreeMap::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.project_id = id;
        self
    }

    pub fn output(&self, phase: VdwPhase) -> Option<&serde_json::Value> {
        self.outputs.get(&phase)
    }

    pub fn set_output(&mut self, phase: VdwPhase, output: serde_json::Value) {
        self.outputs.insert(phase, output);
        *self.execution_counts.entry(phase).or_insert(0) += 1;
        self.touch();
    }

    pub fn feedback_for(&self, phase: VdwPhase) -> Option<&str> {
        self.feedback.get(&phase).map(String::as_str)
    }

    pub fn record_feedback(&mut self, phase: VdwPhase, feedback: impl Into<String>) {
        self.feedback.insert(phase, feedback.into());
        self.touch();
    }

    pub fn executions_of(&self, phase: VdwPhase) -> u32 {
        self.execution_counts.get(&phase).copied().unwrap_or(0)
    }

    pub fn is_failed(&self) -> bool {
        self.current_phase == VdwPhase::Failed
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Memory-store key for the context snapshot.
    pub fn atom_id(project_id: Uuid) -> String {
        format!("project:{}", project_id)
    }

    /// Memory-store key for one phase output.
    pub fn output_atom_id(project_id: Uuid, phase: VdwPhase) -> String {
        match phase.number() {
            Some(n) => format!("project:{}:p{}", project_id, n),
            None => format!("project:{}:{}", project_id, phase.as_str()),
        }
    }
}
