use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use vdw_core::{ProjectContext, VdwPhase};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PhaseHandlerError(pub String);

impl PhaseHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Produces the output of one execution phase.
///
/// Reviewer feedback from earlier rejections is available through
/// `ProjectContext::feedback_for`.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn execute(&self, context: &ProjectContext) -> std::result::Result<Value, PhaseHandlerError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Dispatch table from execution phase to handler. Always complete.
#[derive(Clone)]
pub struct PhaseHandlers {
    handlers: BTreeMap<VdwPhase, Arc<dyn PhaseHandler>>,
}

impl PhaseHandlers {
    pub fn builder() -> PhaseHandlersBuilder {
        PhaseHandlersBuilder::default()
    }

    /// Use one handler for every execution phase.
    pub fn uniform(handler: Arc<dyn PhaseHandler>) -> Self {
        Self {
            handlers: VdwPhase::EXECUTION_PHASES
                .iter()
                .map(|phase| (*phase, Arc::clone(&handler)))
                .collect(),
        }
    }

    pub fn get(&self, phase: VdwPhase) -> Result<Arc<dyn PhaseHandler>> {
        self.handlers
            .get(&phase)
            .cloned()
            .ok_or(OrchestratorError::MissingHandler(phase))
    }

    pub fn phases(&self) -> impl Iterator<Item = VdwPhase> + '_ {
        self.handlers.keys().copied()
    }
}

#[derive(Default)]
pub struct PhaseHandlersBuilder {
    handlers: BTreeMap<VdwPhase, Arc<dyn PhaseHandler>>,
}

impl PhaseHandlersBuilder {
    pub fn with(mut self, phase: VdwPhase, handler: Arc<dyn PhaseHandler>) -> Self {
        self.handlers.insert(phase, handler);
        self
    }

    /// Fails if a handler is keyed by a non-execution phase or if any
    /// execution phase is left without one.
    pub fn build(self) -> Result<PhaseHandlers> {
        if let Some(phase) = self.handlers.keys().find(|p| !p.is_execution()) {
            return Err(OrchestratorError::UnexpectedHandler(*phase));
        }
        if let Some(phase) = VdwPhase::EXECUTION_PHASES
            .iter()
            .find(|p| !self.handlers.contains_key(*p))
        {
            return Err(OrchestratorError::MissingHandler(*phase));
        }
        Ok(PhaseHandlers {
            handlers: self.handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl PhaseHandler for Echo {
        async fn execute(
            &self,
            context: &ProjectContext,
        ) -> std::result::Result<Value, PhaseHandlerError> {
            Ok(json!({ "phase": context.current_phase }))
        }
    }

    #[test]
    fn test_uniform_covers_every_execution_phase() {
        let handlers = PhaseHandlers::uniform(Arc::new(Echo));
        for phase in VdwPhase::EXECUTION_PHASES {
            assert!(handlers.get(phase).is_ok());
            assert!(phase.validation_phase().is_some());
        }
        assert_eq!(handlers.phases().count(), 5);
        assert!(matches!(
            handlers.get(VdwPhase::Phase1Validation),
            Err(OrchestratorError::MissingHandler(VdwPhase::Phase1Validation))
        ));
    }

    #[test]
    fn test_builder_rejects_incomplete_table() {
        let result = PhaseHandlers::builder()
            .with(VdwPhase::Phase1Mood, Arc::new(Echo))
            .with(VdwPhase::Phase2Architecture, Arc::new(Echo))
            .build();
        assert!(matches!(
            result,
            Err(OrchestratorError::MissingHandler(VdwPhase::Phase3Specification))
        ));
    }

    #[test]
    fn test_builder_rejects_validation_handler() {
        let mut builder = PhaseHandlers::builder();
        for phase in VdwPhase::EXECUTION_PHASES {
            builder = builder.with(phase, Arc::new(Echo));
        }
        let result = builder.with(VdwPhase::Phase2Validation, Arc::new(Echo)).build();
        assert!(matches!(
            result,
            Err(OrchestratorError::UnexpectedHandler(VdwPhase::Phase2Validation))
        ));
    }

    #[tokio::test]
    async fn test_handler_sees_context() {
        let handlers = PhaseHandlers::uniform(Arc::new(Echo));
        let mut ctx = ProjectContext::new("x");
        ctx.current_phase = VdwPhase::Phase4Implementation;

        let output = handlers
            .get(VdwPhase::Phase4Implementation)
            .unwrap()
            .execute(&ctx)
            .await
            .unwrap();
        assert_eq!(output["phase"], "phase_4_implementation");
    }
}
