use thiserror::Error;
use uuid::Uuid;
use vdw_core::VdwPhase;

use crate::memory::MemoryError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: VdwPhase, to: VdwPhase },

    #[error("Transition from {from} to {to} rejected for project {project_id}: {reason}")]
    TransitionRejected {
        project_id: Uuid,
        from: VdwPhase,
        to: VdwPhase,
        reason: String,
    },

    /// The phase handler failed; the project is now FAILED.
    #[error("Phase {phase} failed: {message}")]
    HandlerExecution { phase: VdwPhase, message: String },

    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("Project {0} has failed")]
    ProjectFailed(Uuid),

    #[error("Project {0} is already completed")]
    ProjectCompleted(Uuid),

    /// `expected` is the phase the project is in
    #[error("Phase mismatch: project is in {expected}, request was for {actual}")]
    PhaseMismatch { expected: VdwPhase, actual: VdwPhase },

    #[error("Project {project_id} is in {phase}, not at a validation gate")]
    NotAwaitingApproval { project_id: Uuid, phase: VdwPhase },

    #[error("Project {project_id} is waiting for approval of {phase}")]
    AwaitingApproval { project_id: Uuid, phase: VdwPhase },

    #[error("No handler registered for {0}")]
    MissingHandler(VdwPhase),

    #[error("{0} does not run a handler")]
    UnexpectedHandler(VdwPhase),

    #[error("Memory store error: {0}")]
    Memory(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),
}

impl From<MemoryError> for OrchestratorError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Database(e) => OrchestratorError::Database(e),
            MemoryError::Serialization(e) => OrchestratorError::Serialization(e),
            MemoryError::Backend(message) => OrchestratorError::Memory(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
