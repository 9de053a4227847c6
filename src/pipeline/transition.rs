use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    ApplicationId, PhaseId, Stage, StageId, StageKind, UserId, Workflow, WorkflowId,
    WorkflowStatus,
};
use super::permission::{PermissionError, StageAccessPolicy};
use super::repository::{
    ApplicationDirectory, ApplicationProfile, LedgerError, LedgerTransition, PipelineStore,
    StageChangedEvent, StageEventPublisher, StageHistoryStore, StoreError,
};

/// Legality policy for manual moves. The source system exposed an
/// unrestricted "move to any stage" command; sequential enforcement is the
/// stricter opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovePolicy {
    /// Any stage of a company-owned workflow is a legal target.
    #[default]
    Unrestricted,
    /// Forward moves must land on the next `order` unless the target stage
    /// has `allow_skip`. Backward moves stay legal.
    SequentialWithSkips,
}

/// Whether the SUCCESS-stage cascade into the next phase ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeResult {
    NotApplicable,
    Performed,
    SkippedNoActiveWorkflow,
    /// A concurrent move landed between the SUCCESS hop and the cascade hop.
    /// The committed hops stand; the application did not enter the next phase.
    AbortedByConcurrentMove,
}

/// One committed hop of a move: the ledger row that was closed (if any) and
/// the row that was opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionStep {
    pub workflow_id: WorkflowId,
    pub previous_stage_id: Option<StageId>,
    pub new_stage_id: StageId,
    pub entered_at: DateTime<Utc>,
}

/// Result of a successful move: one step, or two when a cascade fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub application_id: ApplicationId,
    pub steps: Vec<TransitionStep>,
    pub cascade: CascadeResult,
}

impl TransitionOutcome {
    /// The stage the application is parked at after the move.
    pub fn final_stage(&self) -> &StageId {
        &self
            .steps
            .last()
            .expect("transition outcome always has at least one step")
            .new_stage_id
    }
}

/// Orchestrates a candidate move: target resolution, permission gating,
/// ledger close-and-open, cross-phase cascade, and event emission.
pub struct TransitionService<P, L, G, D, E> {
    pipeline: Arc<P>,
    ledger: Arc<L>,
    access: Arc<G>,
    applications: Arc<D>,
    events: Arc<E>,
    policy: MovePolicy,
}

struct PlannedHop {
    workflow: Workflow,
    stage: Stage,
    expected_current: Option<(WorkflowId, StageId)>,
}

impl<P, L, G, D, E> TransitionService<P, L, G, D, E>
where
    P: PipelineStore,
    L: StageHistoryStore,
    G: StageAccessPolicy,
    D: ApplicationDirectory,
    E: StageEventPublisher,
{
    pub fn new(
        pipeline: Arc<P>,
        ledger: Arc<L>,
        access: Arc<G>,
        applications: Arc<D>,
        events: Arc<E>,
        policy: MovePolicy,
    ) -> Self {
        Self {
            pipeline,
            ledger,
            access,
            applications,
            events,
            policy,
        }
    }

    /// Move an application to a target stage, cascading into the next
    /// phase's default workflow when the target is a SUCCESS stage with a
    /// configured next phase.
    ///
    /// Validation and permission failures surface before any ledger write,
    /// so a denied or rejected move leaves the ledger byte-identical.
    /// Event-delivery failures are logged and swallowed: the committed
    /// transition is the business fact, notification is best effort. Every
    /// committed hop emits its event immediately, so a cascade hop that
    /// loses a concurrent-move race still reports the hops that did commit
    /// (see [`CascadeResult::AbortedByConcurrentMove`]).
    pub fn move_to_stage(
        &self,
        application_id: &ApplicationId,
        target_stage_id: &StageId,
        actor: &UserId,
    ) -> Result<TransitionOutcome, TransitionError> {
        let application = self
            .applications
            .application(application_id)?
            .ok_or_else(|| TransitionError::ApplicationNotFound(application_id.clone()))?;

        let target = self
            .pipeline
            .stage(target_stage_id)?
            .ok_or_else(|| TransitionError::StageNotFound(target_stage_id.clone()))?;
        let workflow = self
            .pipeline
            .workflow(&target.workflow_id)?
            .ok_or_else(|| TransitionError::WorkflowNotFound(target.workflow_id.clone()))?;
        if workflow.company_id != application.company_id {
            return Err(TransitionError::ForeignStage {
                stage: target_stage_id.clone(),
            });
        }

        let current = self.ledger.open_entry(application_id)?;
        self.check_move_policy(current.as_ref().map(|entry| &entry.stage_id), &target)?;

        let mut hops = vec![PlannedHop {
            expected_current: current
                .as_ref()
                .map(|entry| (entry.workflow_id.clone(), entry.stage_id.clone())),
            workflow,
            stage: target.clone(),
        }];

        let cascade = match self.plan_cascade(&target)? {
            CascadePlan::NotApplicable => CascadeResult::NotApplicable,
            CascadePlan::Skipped => CascadeResult::SkippedNoActiveWorkflow,
            CascadePlan::Into { workflow, stage } => {
                hops.push(PlannedHop {
                    expected_current: Some((target.workflow_id.clone(), target.id.clone())),
                    workflow,
                    stage,
                });
                CascadeResult::Performed
            }
        };

        // Gate every planned hop before mutating anything, so a denial on
        // the cascade leg cannot strand the application mid-operation.
        for hop in &hops {
            let allowed = self
                .access
                .can_act(actor, &hop.stage.id, &application.company_id)?;
            if !allowed {
                return Err(TransitionError::Forbidden {
                    user: actor.clone(),
                    stage: hop.stage.id.clone(),
                });
            }
        }

        let mut cascade = cascade;
        let mut steps = Vec::with_capacity(hops.len());
        for (index, hop) in hops.iter().enumerate() {
            let occurred_at = Utc::now();
            let entry = match self.ledger.record_transition(LedgerTransition {
                application_id: application_id.clone(),
                expected_current: hop.expected_current.clone(),
                target_workflow: hop.workflow.id.clone(),
                target_stage: hop.stage.id.clone(),
                occurred_at,
            }) {
                Ok(entry) => entry,
                // A concurrent move can land between the SUCCESS hop and the
                // cascade hop. The earlier hops are committed facts, so
                // report them instead of erroring.
                Err(LedgerError::Conflict(_)) if index > 0 => {
                    warn!(
                        application = %application_id.0,
                        stage = %hop.stage.id.0,
                        "cascade hop lost to a concurrent move; earlier hops remain committed"
                    );
                    cascade = CascadeResult::AbortedByConcurrentMove;
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            let step = TransitionStep {
                workflow_id: entry.workflow_id,
                previous_stage_id: hop.expected_current.as_ref().map(|(_, stage)| stage.clone()),
                new_stage_id: entry.stage_id,
                entered_at: entry.entered_at,
            };
            // Emit per committed hop, so an aborted cascade never leaves a
            // committed entry without its event.
            self.emit(&application, &step);
            steps.push(step);
        }

        if cascade == CascadeResult::SkippedNoActiveWorkflow {
            info!(
                application = %application_id.0,
                stage = %target_stage_id.0,
                "cascade skipped: next phase has no active default workflow"
            );
        }

        Ok(TransitionOutcome {
            application_id: application_id.clone(),
            steps,
            cascade,
        })
    }

    fn check_move_policy(
        &self,
        current_stage: Option<&StageId>,
        target: &Stage,
    ) -> Result<(), TransitionError> {
        if self.policy == MovePolicy::Unrestricted {
            return Ok(());
        }
        let Some(current_stage) = current_stage else {
            // First placement may land anywhere; treated as an explicit
            // override rather than an error.
            return Ok(());
        };
        let Some(current) = self.pipeline.stage(current_stage)? else {
            return Ok(());
        };
        if current.workflow_id != target.workflow_id {
            return Ok(());
        }
        if target.order > current.order + 1 && !target.allow_skip {
            return Err(TransitionError::SkipNotAllowed {
                stage: target.id.clone(),
            });
        }
        Ok(())
    }

    fn plan_cascade(&self, target: &Stage) -> Result<CascadePlan, TransitionError> {
        if target.kind != StageKind::Success {
            return Ok(CascadePlan::NotApplicable);
        }
        let Some(next_phase) = target.next_phase_id.clone() else {
            return Ok(CascadePlan::NotApplicable);
        };
        let Some(workflow) = self.active_default_workflow(&next_phase)? else {
            return Ok(CascadePlan::Skipped);
        };
        let stages = self.pipeline.stages_for_workflow(&workflow.id)?;
        let Some(initial) = stages.into_iter().find(|s| s.kind == StageKind::Initial) else {
            // A default workflow with no entry point cannot receive the
            // candidate; park at the SUCCESS stage instead of failing.
            return Ok(CascadePlan::Skipped);
        };
        Ok(CascadePlan::Into {
            workflow,
            stage: initial,
        })
    }

    fn active_default_workflow(
        &self,
        phase: &PhaseId,
    ) -> Result<Option<Workflow>, TransitionError> {
        let workflow = self.pipeline.default_workflow_for_phase(phase)?;
        Ok(workflow.filter(|w| w.status == WorkflowStatus::Active))
    }

    fn emit(&self, application: &ApplicationProfile, step: &TransitionStep) {
        let event = StageChangedEvent {
            application_id: application.id.clone(),
            company_id: application.company_id.clone(),
            workflow_id: step.workflow_id.clone(),
            previous_stage_id: step.previous_stage_id.clone(),
            new_stage_id: step.new_stage_id.clone(),
            candidate_name: application.candidate_name.clone(),
            candidate_email: application.candidate_email.clone(),
            occurred_at: step.entered_at,
        };
        if let Err(err) = self.events.publish(event) {
            warn!(
                application = %application.id.0,
                stage = %step.new_stage_id.0,
                error = %err,
                "stage-changed event delivery failed; transition already committed"
            );
        }
    }
}

enum CascadePlan {
    NotApplicable,
    Skipped,
    Into { workflow: Workflow, stage: Stage },
}

/// Error raised by a move attempt. Every variant except the ledger conflict
/// is detected before any mutation; the conflict aborts with the ledger
/// untouched and is safely retryable after reloading the current stage.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("application {} not found", .0 .0)]
    ApplicationNotFound(ApplicationId),
    #[error("stage {} not found", .0 .0)]
    StageNotFound(StageId),
    #[error("workflow {} not found", .0 .0)]
    WorkflowNotFound(WorkflowId),
    #[error("stage {} does not belong to the application's company", stage.0)]
    ForeignStage { stage: StageId },
    #[error("user {} may not act on stage {}", user.0, stage.0)]
    Forbidden { user: UserId, stage: StageId },
    #[error("stage {} cannot be skipped to under the sequential move policy", stage.0)]
    SkipNotAllowed { stage: StageId },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
