//! Event types for the phase pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vdw_core::VdwPhase;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.event.topic()
    }
}

/// All events emitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "project.created")]
    ProjectCreated {
        project_id: Uuid,
        initial_request: String,
    },

    /// A phase handler is about to run
    #[serde(rename = "phase.started")]
    PhaseStarted {
        project_id: Uuid,
        phase: VdwPhase,
        attempt: u32,
    },

    /// Handler output stored and project moved to the validation gate
    #[serde(rename = "phase.completed")]
    PhaseCompleted {
        project_id: Uuid,
        phase: VdwPhase,
        validation_phase: VdwPhase,
    },

    #[serde(rename = "phase.approved")]
    PhaseApproved {
        project_id: Uuid,
        validation_phase: VdwPhase,
        feedback: Option<String>,
    },

    #[serde(rename = "phase.rejected")]
    PhaseRejected {
        project_id: Uuid,
        validation_phase: VdwPhase,
        feedback: Option<String>,
    },

    #[serde(rename = "project.completed")]
    ProjectCompleted { project_id: Uuid },

    #[serde(rename = "project.failed")]
    ProjectFailed {
        project_id: Uuid,
        phase: VdwPhase,
        error: String,
    },

    /// Oracle could not be reached; the transition was decided by policy
    #[serde(rename = "oracle.degraded")]
    OracleDegraded {
        project_id: Uuid,
        from_phase: VdwPhase,
        to_phase: VdwPhase,
        allowed: bool,
        error: String,
    },
}

impl Event {
    pub const TOPICS: [&'static str; 8] = [
        "project.created",
        "phase.started",
        "phase.completed",
        "phase.approved",
        "phase.rejected",
        "project.completed",
        "project.failed",
        "oracle.degraded",
    ];

    /// Topic name; identical to the serialized `type` tag
    pub fn topic(&self) -> &'static str {
        match self {
            Event::ProjectCreated { .. } => "project.created",
            Event::PhaseStarted { .. } => "phase.started",
            Event::PhaseCompleted { .. } => "phase.completed",
            Event::PhaseApproved { .. } => "phase.approved",
            Event::PhaseRejected { .. } => "phase.rejected",
            Event::ProjectCompleted { .. } => "project.completed",
            Event::ProjectFailed { .. } => "project.failed",
            Event::OracleDegraded { .. } => "oracle.degraded",
        }
    }

    pub fn project_id(&self) -> Uuid {
        match self {
            Event::ProjectCreated { project_id, .. }
            | Event::PhaseStarted { project_id, .. }
            | Event::PhaseCompleted { project_id, .. }
            | Event::PhaseApproved { project_id, .. }
            | Event::PhaseRejected { project_id, .. }
            | Event::ProjectCompleted { project_id }
            | Event::ProjectFailed { project_id, .. }
            | Event::OracleDegraded { project_id, .. } => *project_id,
        }
    }
}
