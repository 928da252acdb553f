use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use vdw_core::{ProjectContext, VdwPhase};

use crate::config::{OracleFailurePolicy, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::oracle::{OracleError, ValidationOracle};

/// Result of one transition attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub allowed: bool,
    pub reason: String,
    /// The oracle did not answer and the failure policy decided
    pub degraded: bool,
}

impl TransitionOutcome {
    fn structural_denial() -> Self {
        Self {
            allowed: false,
            reason: "invalid transition".to_string(),
            degraded: false,
        }
    }
}

/// Phase graph plus the oracle gate in front of every edge.
pub struct PhaseStateMachine {
    oracle: Arc<dyn ValidationOracle>,
    config: OrchestratorConfig,
    degraded_checks: AtomicU64,
}

impl PhaseStateMachine {
    pub fn new(oracle: Arc<dyn ValidationOracle>, config: OrchestratorConfig) -> Self {
        Self {
            oracle,
            config,
            degraded_checks: AtomicU64::new(0),
        }
    }

    pub fn validate_transition(from: VdwPhase, to: VdwPhase) -> Result<()> {
        if Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition { from, to })
        }
    }

    pub fn allowed_transitions(from: VdwPhase) -> Vec<VdwPhase> {
        if from == VdwPhase::Idle {
            return vec![VdwPhase::Phase1Mood];
        }
        if let Some(gate) = from.validation_phase() {
            return vec![gate, VdwPhase::Failed];
        }
        if let Some(rework) = from.execution_phase() {
            let forward = from.next_execution().unwrap_or(VdwPhase::Completed);
            return vec![forward, rework];
        }
        vec![]
    }

    pub fn can_transition(from: VdwPhase, to: VdwPhase) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// Move `context` to `target` if the graph and the oracle both permit it.
    ///
    /// The oracle is only consulted for edges that exist. When it errors or
    /// times out, the failure policy for `target` decides.
    pub async fn attempt_transition(
        &self,
        context: &mut ProjectContext,
        target: VdwPhase,
    ) -> TransitionOutcome {
        let from = context.current_phase;
        if !Self::can_transition(from, target) {
            debug!(
                project_id = %context.project_id,
                from = %from,
                to = %target,
                "Transition not in phase graph"
            );
            return TransitionOutcome::structural_denial();
        }

        let verdict = match tokio::time::timeout(
            self.config.oracle_timeout(),
            self.oracle.validate(from, target, context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(self.config.oracle_timeout_ms)),
        };

        let outcome = match verdict {
            Ok(verdict) => TransitionOutcome {
                allowed: verdict.allowed,
                reason: verdict.reason,
                degraded: false,
            },
            Err(e) => {
                self.degraded_checks.fetch_add(1, Ordering::Relaxed);
                let policy = self.config.policy_for(target);
                warn!(
                    project_id = %context.project_id,
                    from = %from,
                    to = %target,
                    ?policy,
                    error = %e,
                    "Oracle check degraded"
                );
                TransitionOutcome {
                    allowed: policy == OracleFailurePolicy::FailOpen,
                    reason: e.to_string(),
                    degraded: true,
                }
            }
        };

        if outcome.allowed {
            context.current_phase = target;
            context.touch();
            info!(
                project_id = %context.project_id,
                from = %from,
                to = %target,
                degraded = outcome.degraded,
                "Phase transition"
            );
        } else {
            debug!(
                project_id = %context.project_id,
                from = %from,
                to = %target,
                reason = %outcome.reason,
                "Phase transition refused"
            );
        }
        outcome
    }

    /// Move an execution phase to FAILED without asking the oracle.
    pub fn force_fail(context: &mut ProjectContext) -> Result<()> {
        Self::validate_transition(context.current_phase, VdwPhase::Failed)?;
        info!(
            project_id = %context.project_id,
            from = %context.current_phase,
            "Project failed"
        );
        context.current_phase = VdwPhase::Failed;
        context.touch();
        Ok(())
    }

    /// Number of oracle checks decided by the failure policy.
    pub fn degraded_checks(&self) -> u64 {
        self.degraded_checks.load(Ordering::Relaxed)
    }

    pub fn oracle(&self) -> Arc<dyn ValidationOracle> {
        Arc::clone(&self.oracle)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleVerdict;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Returns a fixed answer and counts calls.
    struct ScriptedOracle {
        answer: std::result::Result<bool, OracleError>,
        calls: AtomicUsize,
    }

    impl ScriptedOracle {
        fn new(answer: std::result::Result<bool, OracleError>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ValidationOracle for ScriptedOracle {
        async fn validate(
            &self,
            _from: VdwPhase,
            _to: VdwPhase,
            _context: &ProjectContext,
        ) -> std::result::Result<OracleVerdict, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Ok(true) => Ok(OracleVerdict::allow("ok")),
                Ok(false) => Ok(OracleVerdict::deny("artifacts incomplete")),
                Err(e) => Err(e.clone()),
            }
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl ValidationOracle for SlowOracle {
        async fn validate(
            &self,
            _from: VdwPhase,
            _to: VdwPhase,
            _context: &ProjectContext,
        ) -> std::result::Result<OracleVerdict, OracleError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(OracleVerdict::deny("too late"))
        }
    }

    fn machine(oracle: Arc<dyn ValidationOracle>) -> PhaseStateMachine {
        PhaseStateMachine::new(oracle, OrchestratorConfig::default())
    }

    fn context_in(phase: VdwPhase) -> ProjectContext {
        let mut ctx = ProjectContext::new("build a notes app");
        ctx.current_phase = phase;
        ctx
    }

    #[test]
    fn test_valid_transitions() {
        assert!(PhaseStateMachine::can_transition(
            VdwPhase::Idle,
            VdwPhase::Phase1Mood
        ));
        assert!(PhaseStateMachine::can_transition(
            VdwPhase::Phase2Architecture,
            VdwPhase::Phase2Validation
        ));
        assert!(PhaseStateMachine::can_transition(
            VdwPhase::Phase2Validation,
            VdwPhase::Phase3Specification
        ));
        assert!(PhaseStateMachine::can_transition(
            VdwPhase::Phase5Validation,
            VdwPhase::Completed
        ));
        assert!(PhaseStateMachine::can_transition(
            VdwPhase::Phase3Specification,
            VdwPhase::Failed
        ));
    }

    #[test]
    fn test_backward_transitions() {
        for gate in VdwPhase::VALIDATION_PHASES {
            let exec = gate.execution_phase().unwrap();
            assert!(PhaseStateMachine::can_transition(gate, exec));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!PhaseStateMachine::can_transition(
            VdwPhase::Idle,
            VdwPhase::Completed
        ));
        assert!(!PhaseStateMachine::can_transition(
            VdwPhase::Phase1Mood,
            VdwPhase::Phase2Architecture
        ));
        assert!(!PhaseStateMachine::can_transition(
            VdwPhase::Phase1Validation,
            VdwPhase::Failed
        ));
        assert!(matches!(
            PhaseStateMachine::validate_transition(VdwPhase::Idle, VdwPhase::Failed),
            Err(OrchestratorError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_terminal_phases_have_no_exits() {
        for to in VdwPhase::ALL {
            assert!(!PhaseStateMachine::can_transition(VdwPhase::Completed, to));
            assert!(!PhaseStateMachine::can_transition(VdwPhase::Failed, to));
        }
    }

    #[test]
    fn test_every_execution_phase_has_a_gate() {
        for exec in VdwPhase::EXECUTION_PHASES {
            let gate = exec.validation_phase().unwrap();
            assert!(PhaseStateMachine::allowed_transitions(exec).contains(&gate));
        }
    }

    #[tokio::test]
    async fn test_structural_rejection_skips_oracle() {
        let oracle = ScriptedOracle::new(Ok(true));
        let sm = machine(oracle.clone());
        let mut ctx = context_in(VdwPhase::Idle);

        let outcome = sm.attempt_transition(&mut ctx, VdwPhase::Completed).await;

        assert!(!outcome.allowed);
        assert_eq!(outcome.reason, "invalid transition");
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.current_phase, VdwPhase::Idle);
    }

    #[tokio::test]
    async fn test_oracle_denial() {
        let sm = machine(ScriptedOracle::new(Ok(false)));
        let mut ctx = context_in(VdwPhase::Phase1Mood);

        let outcome = sm
            .attempt_transition(&mut ctx, VdwPhase::Phase1Validation)
            .await;

        assert!(!outcome.allowed);
        assert!(!outcome.degraded);
        assert_eq!(outcome.reason, "artifacts incomplete");
        assert_eq!(ctx.current_phase, VdwPhase::Phase1Mood);
    }

    #[tokio::test]
    async fn test_oracle_error_fails_open() {
        let sm = machine(ScriptedOracle::new(Err(OracleError::Unavailable(
            "connection refused".into(),
        ))));
        let mut ctx = context_in(VdwPhase::Phase1Mood);
        let before = ctx.updated_at;

        let outcome = sm
            .attempt_transition(&mut ctx, VdwPhase::Phase1Validation)
            .await;

        assert!(outcome.allowed);
        assert!(outcome.degraded);
        assert_eq!(ctx.current_phase, VdwPhase::Phase1Validation);
        assert!(ctx.updated_at >= before);
        assert_eq!(sm.degraded_checks(), 1);
    }

    #[tokio::test]
    async fn test_fail_closed_policy() {
        let config = OrchestratorConfig::default()
            .with_phase_policy(VdwPhase::Phase1Validation, OracleFailurePolicy::FailClosed);
        let sm = PhaseStateMachine::new(
            ScriptedOracle::new(Err(OracleError::Unavailable("down".into()))),
            config,
        );
        let mut ctx = context_in(VdwPhase::Phase1Mood);

        let outcome = sm
            .attempt_transition(&mut ctx, VdwPhase::Phase1Validation)
            .await;

        assert!(!outcome.allowed);
        assert!(outcome.degraded);
        assert_eq!(ctx.current_phase, VdwPhase::Phase1Mood);
        assert_eq!(sm.degraded_checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oracle_timeout_is_degraded() {
        let sm = PhaseStateMachine::new(
            Arc::new(SlowOracle),
            OrchestratorConfig::default().with_oracle_timeout(Duration::from_millis(50)),
        );
        let mut ctx = context_in(VdwPhase::Idle);

        let outcome = sm.attempt_transition(&mut ctx, VdwPhase::Phase1Mood).await;

        assert!(outcome.allowed);
        assert!(outcome.degraded);
        assert_eq!(outcome.reason, "Oracle timed out after 50ms");
    }

    #[test]
    fn test_force_fail() {
        let mut ctx = context_in(VdwPhase::Phase3Specification);
        PhaseStateMachine::force_fail(&mut ctx).unwrap();
        assert_eq!(ctx.current_phase, VdwPhase::Failed);

        let mut ctx = context_in(VdwPhase::Phase3Validation);
        assert!(PhaseStateMachine::force_fail(&mut ctx).is_err());
        assert_eq!(ctx.current_phase, VdwPhase::Phase3Validation);
    }
}
