use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    ApplicationId, CompanyId, DateRange, Phase, PhaseId, RoleId, Stage, StageHistoryEntry, StageId,
    UserId, Workflow, WorkflowId,
};

/// Storage abstraction over the pipeline topology (phases, workflows,
/// stages). Read-mostly after initialization; list queries return entities
/// in funnel order.
pub trait PipelineStore: Send + Sync {
    fn insert_phase(&self, phase: Phase) -> Result<(), StoreError>;
    fn phase(&self, id: &PhaseId) -> Result<Option<Phase>, StoreError>;
    /// Sorted by `sort_order`.
    fn phases_for_company(&self, company: &CompanyId) -> Result<Vec<Phase>, StoreError>;

    fn insert_workflow(&self, workflow: Workflow) -> Result<(), StoreError>;
    fn update_workflow(&self, workflow: Workflow) -> Result<(), StoreError>;
    fn workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError>;
    fn workflows_for_phase(&self, phase: &PhaseId) -> Result<Vec<Workflow>, StoreError>;
    /// The phase's default workflow, regardless of status.
    fn default_workflow_for_phase(&self, phase: &PhaseId) -> Result<Option<Workflow>, StoreError>;
    /// Swap which workflow is the phase default. Clears the flag on every
    /// other workflow of the phase in the same store transaction.
    fn set_default_workflow(
        &self,
        phase: &PhaseId,
        workflow: &WorkflowId,
    ) -> Result<(), StoreError>;

    fn insert_stage(&self, stage: Stage) -> Result<(), StoreError>;
    fn update_stage(&self, stage: Stage) -> Result<(), StoreError>;
    fn stage(&self, id: &StageId) -> Result<Option<Stage>, StoreError>;
    /// Sorted by `order`.
    fn stages_for_workflow(&self, workflow: &WorkflowId) -> Result<Vec<Stage>, StoreError>;
}

/// Error enumeration for topology store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic close-then-open instruction against the stage-history ledger.
///
/// `expected_current` is the optimistic-concurrency precondition: the open
/// row that must still be open when the write lands. `None` means "first
/// placement, no open row may exist".
#[derive(Debug, Clone)]
pub struct LedgerTransition {
    pub application_id: ApplicationId,
    pub expected_current: Option<(WorkflowId, StageId)>,
    pub target_workflow: WorkflowId,
    pub target_stage: StageId,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only ledger of stage occupancy. Rows are immutable once closed.
pub trait StageHistoryStore: Send + Sync {
    /// The application's currently open row, across all workflows. The
    /// ledger invariant guarantees at most one.
    fn open_entry(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<StageHistoryEntry>, LedgerError>;

    /// Close the expected open row (stamping `left_at`) and append the new
    /// open row in one transaction. Fails with [`LedgerError::Conflict`]
    /// when the precondition no longer holds, leaving the ledger untouched.
    fn record_transition(
        &self,
        transition: LedgerTransition,
    ) -> Result<StageHistoryEntry, LedgerError>;

    /// Full trail for one application, ordered by `entered_at`.
    fn entries_for_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Vec<StageHistoryEntry>, LedgerError>;

    /// Every row opened in the workflow, optionally restricted to a window
    /// on `entered_at`. Safe to serve from a read replica.
    fn entries_for_workflow(
        &self,
        workflow: &WorkflowId,
        range: Option<&DateRange>,
    ) -> Result<Vec<StageHistoryEntry>, LedgerError>;
}

/// Error enumeration for ledger failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("concurrent move detected for application {}", .0 .0)]
    Conflict(ApplicationId),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Explicit user/role assignment attached to a stage. An empty assignment
/// defers to the permission service's fallback policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAssignment {
    pub user_ids: Vec<UserId>,
    pub role_ids: Vec<RoleId>,
}

impl StageAssignment {
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty() && self.role_ids.is_empty()
    }
}

/// Lookup of per-stage assignments, consulted on every transition attempt.
pub trait StageAssignments: Send + Sync {
    fn assignment_for_stage(&self, stage: &StageId) -> Result<StageAssignment, StoreError>;
}

/// Company membership and role grants, owned by the external auth component.
pub trait CompanyDirectory: Send + Sync {
    fn is_member(&self, user: &UserId, company: &CompanyId) -> Result<bool, StoreError>;
    fn roles_for_user(&self, user: &UserId, company: &CompanyId)
        -> Result<Vec<RoleId>, StoreError>;
}

/// The slice of a candidate application the engine needs: owning company and
/// the identity fields carried on outbound events. Application CRUD itself
/// lives outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationProfile {
    pub id: ApplicationId,
    pub company_id: CompanyId,
    pub candidate_name: String,
    pub candidate_email: String,
}

pub trait ApplicationDirectory: Send + Sync {
    fn application(&self, id: &ApplicationId)
        -> Result<Option<ApplicationProfile>, StoreError>;
}

/// Fact emitted after each committed stage entry, consumed by the external
/// notification component. Delivered at-least-once; the engine never waits
/// on delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageChangedEvent {
    pub application_id: ApplicationId,
    pub company_id: CompanyId,
    pub workflow_id: WorkflowId,
    pub previous_stage_id: Option<StageId>,
    pub new_stage_id: StageId,
    pub candidate_name: String,
    pub candidate_email: String,
    pub occurred_at: DateTime<Utc>,
}

/// Trait describing the outbound event sink (e.g. a notification queue).
pub trait StageEventPublisher: Send + Sync {
    fn publish(&self, event: StageChangedEvent) -> Result<(), EventError>;
}

/// Event dispatch error. Never propagated past the transition boundary.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}
