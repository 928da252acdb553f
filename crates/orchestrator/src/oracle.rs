//! External correctness checks consulted before a phase transition.

use async_trait::async_trait;
use thiserror::Error;
use vdw_core::{ProjectContext, VdwPhase};

#[derive(Debug, Clone, PartialEq)]
pub struct OracleVerdict {
    pub allowed: bool,
    pub confidence: f64,
    pub reason: String,
}

impl OracleVerdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            confidence: 1.0,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            confidence: 1.0,
            reason: reason.into(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// The oracle could not give a verdict.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle timed out after {0}ms")]
    Timeout(u64),
}

#[async_trait]
pub trait ValidationOracle: Send + Sync {
    /// Judge a transition the phase graph already permits.
    async fn validate(
        &self,
        from: VdwPhase,
        to: VdwPhase,
        context: &ProjectContext,
    ) -> Result<OracleVerdict, OracleError>;
}

/// Denies entering a phase whose prerequisite execution phase has no stored
/// output. Everything else is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactOracle;

#[async_trait]
impl ValidationOracle for ArtifactOracle {
    async fn validate(
        &self,
        _from: VdwPhase,
        to: VdwPhase,
        context: &ProjectContext,
    ) -> Result<OracleVerdict, OracleError> {
        match to.prerequisite() {
            Some(required) if context.output(required).is_none() => Ok(OracleVerdict::deny(
                format!("missing output of {}", required),
            )),
            _ => Ok(OracleVerdict::allow("required artifacts present")),
        }
    }
}
