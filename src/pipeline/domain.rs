use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for the company that owns a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

/// Identifier wrapper for a funnel phase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhaseId(pub String);

/// Identifier wrapper for a workflow (stage graph) inside a phase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

/// Identifier wrapper for a single stage node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageId(pub String);

/// Identifier wrapper for a candidate application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Identifier wrapper for an acting user (recruiter, hiring manager, admin).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Identifier wrapper for a role grant referenced by stage assignments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseView {
    Kanban,
    List,
}

impl PhaseView {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Kanban => "kanban",
            Self::List => "list",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Inactive,
    Archived,
}

/// Structural role of a stage node within its workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Initial,
    Standard,
    Success,
    Fail,
}

impl StageKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Standard => "standard",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

/// Top-level funnel bucket grouping a company's workflows (e.g. Sourcing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: PhaseId,
    pub company_id: CompanyId,
    pub name: String,
    pub sort_order: u32,
    pub default_view: PhaseView,
    pub objective: Option<String>,
    pub status: PhaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Phase {
    pub fn new(
        id: PhaseId,
        company_id: CompanyId,
        name: impl Into<String>,
        sort_order: u32,
        default_view: PhaseView,
        objective: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let name = non_empty_name("phase", name.into())?;
        Ok(Self {
            id,
            company_id,
            name,
            sort_order,
            default_view,
            objective,
            status: PhaseStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_details(
        &mut self,
        name: impl Into<String>,
        objective: Option<String>,
        default_view: PhaseView,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        self.name = non_empty_name("phase", name.into())?;
        self.objective = objective;
        self.default_view = default_view;
        self.updated_at = now;
        Ok(())
    }

    /// No-op when the phase is already active.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.status != PhaseStatus::Active {
            self.status = PhaseStatus::Active;
            self.updated_at = now;
        }
    }

    /// Phases referenced by workflows are archived, never deleted.
    pub fn archive(&mut self, now: DateTime<Utc>) {
        if self.status != PhaseStatus::Archived {
            self.status = PhaseStatus::Archived;
            self.updated_at = now;
        }
    }
}

/// A named, reusable stage graph belonging to one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub company_id: CompanyId,
    pub phase_id: PhaseId,
    pub name: String,
    pub description: String,
    pub is_default: bool,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkflowId,
        company_id: CompanyId,
        phase_id: PhaseId,
        name: impl Into<String>,
        description: impl Into<String>,
        is_default: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let name = non_empty_name("workflow", name.into())?;
        Ok(Self {
            id,
            company_id,
            phase_id,
            name,
            description: description.into(),
            is_default,
            status: WorkflowStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_details(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        self.name = non_empty_name("workflow", name.into())?;
        self.description = description.into();
        self.updated_at = now;
        Ok(())
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.status != WorkflowStatus::Active {
            self.status = WorkflowStatus::Active;
            self.updated_at = now;
        }
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        if self.status != WorkflowStatus::Inactive {
            self.status = WorkflowStatus::Inactive;
            self.updated_at = now;
        }
    }

    pub fn archive(&mut self, now: DateTime<Utc>) {
        if self.status != WorkflowStatus::Archived {
            self.status = WorkflowStatus::Archived;
            self.updated_at = now;
        }
    }
}

/// A node in a workflow's stage graph.
///
/// `next_phase_id` is only meaningful on [`StageKind::Success`] stages: it
/// names the phase a candidate cascades into after clearing this workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub description: String,
    pub order: u32,
    pub kind: StageKind,
    pub allow_skip: bool,
    pub estimated_duration_days: Option<u32>,
    pub default_role_ids: Vec<RoleId>,
    pub default_assigned_users: Vec<UserId>,
    pub email_template_id: Option<String>,
    pub custom_email_text: Option<String>,
    pub deadline_days: Option<u32>,
    pub estimated_cost: Option<u32>,
    pub next_phase_id: Option<PhaseId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Construction input for [`Stage::new`], keeping the long tail of optional
/// columns out of the constructor signature.
#[derive(Debug, Clone, Default)]
pub struct StageSpec {
    pub description: String,
    pub allow_skip: bool,
    pub estimated_duration_days: Option<u32>,
    pub default_role_ids: Vec<RoleId>,
    pub default_assigned_users: Vec<UserId>,
    pub email_template_id: Option<String>,
    pub custom_email_text: Option<String>,
    pub deadline_days: Option<u32>,
    pub estimated_cost: Option<u32>,
    pub next_phase_id: Option<PhaseId>,
}

impl Stage {
    pub fn new(
        id: StageId,
        workflow_id: WorkflowId,
        name: impl Into<String>,
        order: u32,
        kind: StageKind,
        spec: StageSpec,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let name = non_empty_name("stage", name.into())?;
        if spec.next_phase_id.is_some() && kind != StageKind::Success {
            return Err(ValidationError::NextPhaseOutsideSuccess { stage: id });
        }
        Ok(Self {
            id,
            workflow_id,
            name,
            description: spec.description,
            order,
            kind,
            allow_skip: spec.allow_skip,
            estimated_duration_days: spec.estimated_duration_days,
            default_role_ids: spec.default_role_ids,
            default_assigned_users: spec.default_assigned_users,
            email_template_id: spec.email_template_id,
            custom_email_text: spec.custom_email_text,
            deadline_days: spec.deadline_days,
            estimated_cost: spec.estimated_cost,
            next_phase_id: spec.next_phase_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_details(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        self.name = non_empty_name("stage", name.into())?;
        self.description = description.into();
        self.updated_at = now;
        Ok(())
    }

    pub fn set_next_phase(
        &mut self,
        next_phase_id: Option<PhaseId>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if next_phase_id.is_some() && self.kind != StageKind::Success {
            return Err(ValidationError::NextPhaseOutsideSuccess {
                stage: self.id.clone(),
            });
        }
        self.next_phase_id = next_phase_id;
        self.updated_at = now;
        Ok(())
    }

    /// Dwell threshold used for stuck detection: an explicit deadline wins
    /// over the softer duration estimate.
    pub fn stuck_threshold_days(&self) -> Option<u32> {
        self.deadline_days.or(self.estimated_duration_days)
    }
}

/// Validates a workflow's complete stage set against the graph invariants:
/// exactly one INITIAL stage at order 0, at least one SUCCESS and one FAIL
/// terminal, and unique contiguous `order` values.
pub fn validate_stage_set(workflow_id: &WorkflowId, stages: &[Stage]) -> Result<(), ValidationError> {
    let mut orders: Vec<u32> = stages.iter().map(|stage| stage.order).collect();
    orders.sort_unstable();
    for (expected, found) in orders.iter().enumerate() {
        let expected = expected as u32;
        if *found < expected {
            return Err(ValidationError::DuplicateStageOrder {
                workflow: workflow_id.clone(),
                order: *found,
            });
        }
        if *found > expected {
            return Err(ValidationError::NonContiguousStageOrder {
                workflow: workflow_id.clone(),
                expected,
                found: *found,
            });
        }
    }

    let initials: Vec<&Stage> = stages
        .iter()
        .filter(|stage| stage.kind == StageKind::Initial)
        .collect();
    match initials.as_slice() {
        [] => {
            return Err(ValidationError::MissingInitialStage {
                workflow: workflow_id.clone(),
            })
        }
        [only] if only.order == 0 => {}
        _ => {
            return Err(ValidationError::MisplacedInitialStage {
                workflow: workflow_id.clone(),
            })
        }
    }

    for kind in [StageKind::Success, StageKind::Fail] {
        if !stages.iter().any(|stage| stage.kind == kind) {
            return Err(ValidationError::MissingTerminalStage {
                workflow: workflow_id.clone(),
                kind,
            });
        }
    }

    Ok(())
}

/// One row of the append-only stage-history ledger. The single source of
/// truth for "where is this application right now".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub application_id: ApplicationId,
    pub workflow_id: WorkflowId,
    pub stage_id: StageId,
    pub entered_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl StageHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }

    /// Time spent in the stage; `None` while the row is still open.
    pub fn dwell(&self) -> Option<Duration> {
        self.left_at.map(|left| left - self.entered_at)
    }
}

/// Optional reporting window applied to ledger queries (inclusive bounds on
/// `entered_at`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if at > to {
                return false;
            }
        }
        true
    }
}

/// Malformed-topology and malformed-entity failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{entity} name must not be empty")]
    EmptyName { entity: &'static str },
    #[error("stage {stage:?} carries next_phase_id but is not a success stage")]
    NextPhaseOutsideSuccess { stage: StageId },
    #[error("workflow {workflow:?} has no initial stage")]
    MissingInitialStage { workflow: WorkflowId },
    #[error("workflow {workflow:?} must have exactly one initial stage at order 0")]
    MisplacedInitialStage { workflow: WorkflowId },
    #[error("workflow {workflow:?} is missing a {} terminal stage", kind.label())]
    MissingTerminalStage { workflow: WorkflowId, kind: StageKind },
    #[error("workflow {workflow:?} has duplicate stage order {order}")]
    DuplicateStageOrder { workflow: WorkflowId, order: u32 },
    #[error("workflow {workflow:?} stage orders are not contiguous (expected {expected}, found {found})")]
    NonContiguousStageOrder {
        workflow: WorkflowId,
        expected: u32,
        found: u32,
    },
}

fn non_empty_name(entity: &'static str, name: String) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName { entity });
    }
    Ok(trimmed.to_string())
}
