//! Phase orchestration: the phase graph, the oracle gate in front of it and
//! the per-project driver that runs phase handlers.

pub mod config;
pub mod error;
pub mod handler;
pub mod memory;
pub mod oracle;
pub mod project;
pub mod state_machine;

pub use config::{OracleFailurePolicy, OrchestratorConfig};
pub use error::{OrchestratorError, Result};
pub use handler::{PhaseHandler, PhaseHandlerError, PhaseHandlers, PhaseHandlersBuilder};
pub use memory::{InMemoryStore, MemoryError, MemoryStore, SqliteMemoryStore};
pub use oracle::{ArtifactOracle, OracleError, OracleVerdict, ValidationOracle};
pub use project::ProjectOrchestrator;
pub use state_machine::{PhaseStateMachine, TransitionOutcome};
