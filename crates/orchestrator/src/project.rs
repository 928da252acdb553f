use std::sync::Arc;

use dashmap::DashMap;
use events::{Event, EventBus, EventEnvelope};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vdw_core::{ProjectContext, VdwPhase};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::handler::PhaseHandlers;
use crate::memory::{InMemoryStore, MemoryStore};
use crate::oracle::{ArtifactOracle, ValidationOracle};
use crate::state_machine::PhaseStateMachine;

const PHASE_OUTPUT_RELATION: &str = "phase_output";

/// Drives projects through the phase pipeline.
///
/// Every operation on a project holds that project's lock for its whole
/// duration, so calls for one id are applied one at a time while different
/// projects proceed independently. Events are dispatched in transition order
/// and their handlers run in their own tasks, outside the lock.
pub struct ProjectOrchestrator {
    state_machine: PhaseStateMachine,
    handlers: PhaseHandlers,
    memory: Arc<dyn MemoryStore>,
    event_bus: EventBus,
    projects: DashMap<Uuid, Arc<Mutex<ProjectContext>>>,
}

impl ProjectOrchestrator {
    /// Orchestrator with the artifact oracle, an in-memory store and a
    /// private event bus.
    pub fn new(handlers: PhaseHandlers) -> Self {
        Self {
            state_machine: PhaseStateMachine::new(
                Arc::new(ArtifactOracle),
                OrchestratorConfig::default(),
            ),
            handlers,
            memory: Arc::new(InMemoryStore::new()),
            event_bus: EventBus::new(),
            projects: DashMap::new(),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ValidationOracle>) -> Self {
        let config = self.state_machine.config().clone();
        self.state_machine = PhaseStateMachine::new(oracle, config);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.state_machine = PhaseStateMachine::new(self.state_machine.oracle(), config);
        self
    }

    pub fn with_memory_store(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn state_machine(&self) -> &PhaseStateMachine {
        &self.state_machine
    }

    /// Create a project and run its first execution phase.
    ///
    /// Returns once the project waits at the first validation gate, or with
    /// the error that stopped it. A project stopped by the oracle stays
    /// registered and can be continued with [`resume_project`].
    ///
    /// [`resume_project`]: Self::resume_project
    pub async fn submit_project(&self, initial_request: impl Into<String>) -> Result<Uuid> {
        let context = ProjectContext::new(initial_request);
        let project_id = context.project_id;
        let initial_request = context.initial_request.clone();

        let slot = Arc::new(Mutex::new(context));
        let mut context = slot.lock().await;
        self.projects.insert(project_id, Arc::clone(&slot));

        info!(project_id = %project_id, "Project submitted");
        let result = self.start(&mut context, initial_request).await;
        self.release(context);
        result.map(|()| project_id)
    }

    async fn start(&self, context: &mut ProjectContext, initial_request: String) -> Result<()> {
        self.persist(context).await?;
        self.emit(Event::ProjectCreated {
            project_id: context.project_id,
            initial_request,
        });
        self.enter_execution(context, VdwPhase::Phase1Mood).await
    }

    /// Record a reviewer decision for the gate the project is waiting at.
    ///
    /// Approval moves on to the next execution phase, or completes the
    /// project after the last gate. Rejection re-runs the reviewed phase with
    /// the feedback available to its handler. Feedback is kept either way.
    pub async fn approve_phase(
        &self,
        project_id: Uuid,
        validation_phase: VdwPhase,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<ProjectContext> {
        let slot = self.slot(project_id).await?;
        let mut context = slot.lock().await;
        let result = self
            .review(&mut context, validation_phase, approved, feedback)
            .await;
        self.release(context);
        result
    }

    async fn review(
        &self,
        context: &mut ProjectContext,
        validation_phase: VdwPhase,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<ProjectContext> {
        let project_id = context.project_id;
        Self::ensure_active(context)?;
        if !context.current_phase.is_validation() {
            return Err(OrchestratorError::NotAwaitingApproval {
                project_id,
                phase: context.current_phase,
            });
        }
        if context.current_phase != validation_phase {
            return Err(OrchestratorError::PhaseMismatch {
                expected: context.current_phase,
                actual: validation_phase,
            });
        }
        let Some(reviewed) = validation_phase.execution_phase() else {
            return Err(OrchestratorError::NotAwaitingApproval {
                project_id,
                phase: validation_phase,
            });
        };

        if let Some(text) = feedback.as_deref().filter(|f| !f.trim().is_empty()) {
            context.record_feedback(reviewed, text);
        }

        if approved {
            info!(project_id = %project_id, phase = %validation_phase, "Phase approved");
            self.emit(Event::PhaseApproved {
                project_id,
                validation_phase,
                feedback,
            });

            match validation_phase.next_execution() {
                Some(next) => self.enter_execution(context, next).await?,
                None => {
                    self.transition(context, VdwPhase::Completed).await?;
                    info!(project_id = %project_id, "Project completed");
                    self.emit(Event::ProjectCompleted { project_id });
                }
            }
        } else {
            info!(project_id = %project_id, phase = %validation_phase, "Phase rejected");
            self.emit(Event::PhaseRejected {
                project_id,
                validation_phase,
                feedback,
            });
            self.enter_execution(context, reviewed).await?;
        }

        Ok(context.clone())
    }

    /// Continue a project that an oracle refusal left outside a validation
    /// gate: IDLE re-attempts the first phase, an execution phase is re-run.
    pub async fn resume_project(&self, project_id: Uuid) -> Result<ProjectContext> {
        let slot = self.slot(project_id).await?;
        let mut context = slot.lock().await;
        let result = self.resume(&mut context).await;
        self.release(context);
        result
    }

    async fn resume(&self, context: &mut ProjectContext) -> Result<ProjectContext> {
        Self::ensure_active(context)?;
        let project_id = context.project_id;
        let phase = context.current_phase;
        if phase == VdwPhase::Idle {
            self.enter_execution(context, VdwPhase::Phase1Mood).await?;
        } else if phase.is_execution() {
            debug!(project_id = %project_id, phase = %phase, "Resuming execution phase");
            self.run_phase(context).await?;
        } else {
            return Err(OrchestratorError::AwaitingApproval { project_id, phase });
        }

        Ok(context.clone())
    }

    pub async fn get_context(&self, project_id: Uuid) -> Result<ProjectContext> {
        let slot = self.slot(project_id).await?;
        let context = slot.lock().await;
        Ok(context.clone())
    }

    /// Snapshots of the unfinished projects held by this orchestrator, oldest
    /// first. Completed and failed projects are only reachable by id.
    pub async fn list_projects(&self) -> Vec<ProjectContext> {
        let slots: Vec<Arc<Mutex<ProjectContext>>> = self
            .projects
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut contexts = Vec::with_capacity(slots.len());
        for slot in slots {
            let context = slot.lock().await;
            if !context.current_phase.is_terminal() {
                contexts.push(context.clone());
            }
        }
        contexts.sort_by_key(|c| c.created_at);
        contexts
    }

    /// Lock slot for a project, loading its snapshot from memory if needed.
    async fn slot(&self, project_id: Uuid) -> Result<Arc<Mutex<ProjectContext>>> {
        if let Some(slot) = self.projects.get(&project_id).map(|e| Arc::clone(e.value())) {
            return Ok(slot);
        }

        let snapshot = self
            .memory
            .get_atom(&ProjectContext::atom_id(project_id))
            .await?
            .ok_or(OrchestratorError::ProjectNotFound(project_id))?;
        let context: ProjectContext = serde_json::from_value(snapshot)?;

        debug!(project_id = %project_id, phase = %context.current_phase, "Project rehydrated");
        if context.current_phase.is_terminal() {
            return Ok(Arc::new(Mutex::new(context)));
        }
        Ok(Arc::clone(
            self.projects
                .entry(project_id)
                .or_insert_with(|| Arc::new(Mutex::new(context)))
                .value(),
        ))
    }

    /// Unlock a project and drop it from the table once it is finished. Its
    /// snapshot stays in the memory store. Callers already waiting on the slot
    /// still see the final state.
    fn release(&self, context: MutexGuard<'_, ProjectContext>) {
        let project_id = context.project_id;
        let finished = context.current_phase.is_terminal();
        drop(context);
        if finished && self.projects.remove(&project_id).is_some() {
            debug!(project_id = %project_id, "Finished project released");
        }
    }

    fn ensure_active(context: &ProjectContext) -> Result<()> {
        match context.current_phase {
            VdwPhase::Failed => Err(OrchestratorError::ProjectFailed(context.project_id)),
            VdwPhase::Completed => Err(OrchestratorError::ProjectCompleted(context.project_id)),
            _ => Ok(()),
        }
    }

    async fn enter_execution(&self, context: &mut ProjectContext, phase: VdwPhase) -> Result<()> {
        self.transition(context, phase).await?;
        self.run_phase(context).await
    }

    /// Run the handler of the current execution phase, store its output and
    /// move to the paired validation gate.
    async fn run_phase(&self, context: &mut ProjectContext) -> Result<()> {
        let phase = context.current_phase;
        let Some(gate) = phase.validation_phase() else {
            return Err(OrchestratorError::InvalidTransition {
                from: phase,
                to: phase,
            });
        };
        let handler = self.handlers.get(phase)?;
        let project_id = context.project_id;
        let attempt = context.executions_of(phase) + 1;

        info!(
            project_id = %project_id,
            phase = %phase,
            attempt,
            handler = handler.name(),
            "Running phase handler"
        );
        self.emit(Event::PhaseStarted {
            project_id,
            phase,
            attempt,
        });

        let output = match handler.execute(context).await {
            Ok(output) => output,
            Err(e) => return Err(self.fail(context, phase, e.to_string()).await),
        };

        context.set_output(phase, output.clone());
        self.store_output(project_id, phase, output).await?;

        self.transition(context, gate).await?;
        self.emit(Event::PhaseCompleted {
            project_id,
            phase,
            validation_phase: gate,
        });
        Ok(())
    }

    /// Move to FAILED after a handler error and build the error to return.
    async fn fail(
        &self,
        context: &mut ProjectContext,
        phase: VdwPhase,
        message: String,
    ) -> OrchestratorError {
        let project_id = context.project_id;
        error!(project_id = %project_id, phase = %phase, error = %message, "Phase handler failed");

        context.failure = Some(message.clone());
        if let Err(e) = PhaseStateMachine::force_fail(context) {
            return e;
        }
        if let Err(e) = self.persist(context).await {
            warn!(project_id = %project_id, error = %e, "Failed to persist failed project");
        }
        self.emit(Event::ProjectFailed {
            project_id,
            phase,
            error: message.clone(),
        });

        OrchestratorError::HandlerExecution { phase, message }
    }

    /// Attempt a transition and persist the resulting snapshot.
    async fn transition(&self, context: &mut ProjectContext, target: VdwPhase) -> Result<()> {
        let from = context.current_phase;
        let outcome = self.state_machine.attempt_transition(context, target).await;

        if outcome.degraded {
            self.emit(Event::OracleDegraded {
                project_id: context.project_id,
                from_phase: from,
                to_phase: target,
                allowed: outcome.allowed,
                error: outcome.reason.clone(),
            });
        }

        self.persist(context).await?;

        if outcome.allowed {
            Ok(())
        } else if PhaseStateMachine::can_transition(from, target) {
            Err(OrchestratorError::TransitionRejected {
                project_id: context.project_id,
                from,
                to: target,
                reason: outcome.reason,
            })
        } else {
            Err(OrchestratorError::InvalidTransition { from, to: target })
        }
    }

    async fn persist(&self, context: &ProjectContext) -> Result<()> {
        let snapshot = serde_json::to_value(context)?;
        self.memory
            .store_atom(&ProjectContext::atom_id(context.project_id), snapshot)
            .await?;
        Ok(())
    }

    async fn store_output(&self, project_id: Uuid, phase: VdwPhase, output: Value) -> Result<()> {
        let output_id = ProjectContext::output_atom_id(project_id, phase);
        self.memory.store_atom(&output_id, output).await?;
        self.memory
            .link(
                &ProjectContext::atom_id(project_id),
                &output_id,
                PHASE_OUTPUT_RELATION,
            )
            .await?;
        Ok(())
    }

    /// Hand an event to the bus without waiting for its handlers.
    fn emit(&self, event: Event) {
        let publication = self.event_bus.publish(EventEnvelope::new(event));
        debug!(
            topic = publication.topic,
            handlers = publication.dispatched,
            "Event dispatched"
        );
    }
}
