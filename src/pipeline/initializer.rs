use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::domain::{
    CompanyId, Phase, PhaseId, PhaseView, Stage, StageId, StageKind, StageSpec, ValidationError,
    Workflow, WorkflowId,
};
use super::repository::{PipelineStore, StoreError};

static PHASE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static WORKFLOW_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static STAGE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_phase_id() -> PhaseId {
    let id = PHASE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PhaseId(format!("phase-{id:06}"))
}

fn next_workflow_id() -> WorkflowId {
    let id = WORKFLOW_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    WorkflowId(format!("wf-{id:06}"))
}

fn next_stage_id() -> StageId {
    let id = STAGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    StageId(format!("stage-{id:06}"))
}

/// Outcome of an initialization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitializationOutcome {
    /// Topology was created; carries the seeded phase ids in funnel order.
    Seeded(Vec<PhaseId>),
    /// The company already had phases; nothing was touched.
    AlreadyInitialized,
}

/// Seeds a company's default phase/workflow/stage topology and wires the
/// cross-phase cascade links. Safe to call repeatedly.
pub struct PipelineInitializer<P> {
    pipeline: Arc<P>,
}

impl<P: PipelineStore> PipelineInitializer<P> {
    pub fn new(pipeline: Arc<P>) -> Self {
        Self { pipeline }
    }

    /// Build the four default phases (Sourcing, Evaluation, Offer &
    /// Pre-Onboarding, Talent Pool), each with one default active workflow
    /// and its stage template, then wire each SUCCESS stage's
    /// `next_phase_id` to the following phase.
    pub fn initialize_default_phases(
        &self,
        company: &CompanyId,
        now: DateTime<Utc>,
    ) -> Result<InitializationOutcome, InitializerError> {
        if !self.pipeline.phases_for_company(company)?.is_empty() {
            info!(company = %company.0, "pipeline already initialized; skipping");
            return Ok(InitializationOutcome::AlreadyInitialized);
        }

        let templates = default_phase_templates();
        let mut phase_ids = Vec::with_capacity(templates.len());
        let mut success_stages: Vec<Stage> = Vec::with_capacity(templates.len());

        for (sort_order, template) in templates.iter().enumerate() {
            let phase = Phase::new(
                next_phase_id(),
                company.clone(),
                template.name,
                sort_order as u32,
                template.default_view,
                Some(template.objective.to_string()),
                now,
            )?;
            let phase_id = phase.id.clone();
            self.pipeline.insert_phase(phase)?;

            let workflow = Workflow::new(
                next_workflow_id(),
                company.clone(),
                phase_id.clone(),
                template.workflow_name,
                template.workflow_description,
                true,
                now,
            )?;
            let workflow_id = workflow.id.clone();
            self.pipeline.insert_workflow(workflow)?;

            let mut stages = Vec::with_capacity(template.stages.len());
            for (order, stage_template) in template.stages.iter().enumerate() {
                let stage = Stage::new(
                    next_stage_id(),
                    workflow_id.clone(),
                    stage_template.name,
                    order as u32,
                    stage_template.kind,
                    StageSpec {
                        description: stage_template.description.to_string(),
                        allow_skip: stage_template.allow_skip,
                        estimated_duration_days: stage_template.estimated_duration_days,
                        deadline_days: stage_template.deadline_days,
                        ..StageSpec::default()
                    },
                    now,
                )?;
                stages.push(stage);
            }
            super::domain::validate_stage_set(&workflow_id, &stages)?;
            for stage in stages {
                if stage.kind == StageKind::Success {
                    success_stages.push(stage.clone());
                }
                self.pipeline.insert_stage(stage)?;
            }

            phase_ids.push(phase_id);
        }

        // Second pass: Sourcing -> Evaluation -> Offer -> Talent Pool.
        for (index, mut stage) in success_stages.into_iter().enumerate() {
            if let Some(next_phase) = phase_ids.get(index + 1) {
                stage.set_next_phase(Some(next_phase.clone()), now)?;
                self.pipeline.update_stage(stage)?;
            }
        }

        info!(company = %company.0, phases = phase_ids.len(), "seeded default hiring pipeline");
        Ok(InitializationOutcome::Seeded(phase_ids))
    }
}

/// Error raised while seeding a company's topology.
#[derive(Debug, thiserror::Error)]
pub enum InitializerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

struct PhaseTemplate {
    name: &'static str,
    objective: &'static str,
    default_view: PhaseView,
    workflow_name: &'static str,
    workflow_description: &'static str,
    stages: Vec<StageTemplate>,
}

struct StageTemplate {
    name: &'static str,
    description: &'static str,
    kind: StageKind,
    allow_skip: bool,
    estimated_duration_days: Option<u32>,
    deadline_days: Option<u32>,
}

impl StageTemplate {
    const fn new(
        name: &'static str,
        description: &'static str,
        kind: StageKind,
        estimated_duration_days: Option<u32>,
    ) -> Self {
        Self {
            name,
            description,
            kind,
            allow_skip: false,
            estimated_duration_days,
            deadline_days: None,
        }
    }

    const fn skippable(mut self) -> Self {
        self.allow_skip = true;
        self
    }

    const fn deadline(mut self, days: u32) -> Self {
        self.deadline_days = Some(days);
        self
    }
}

fn default_phase_templates() -> Vec<PhaseTemplate> {
    vec![
        PhaseTemplate {
            name: "Sourcing",
            objective: "Attract applicants and qualify them for evaluation.",
            default_view: PhaseView::Kanban,
            workflow_name: "New Applicants",
            workflow_description: "Default intake funnel for inbound applications.",
            stages: vec![
                StageTemplate::new(
                    "Application Received",
                    "Application landed in the funnel and awaits triage.",
                    StageKind::Initial,
                    Some(2),
                ),
                StageTemplate::new(
                    "Resume Screen",
                    "Recruiter reviews the resume against the position profile.",
                    StageKind::Standard,
                    Some(3),
                ),
                StageTemplate::new(
                    "Recruiter Call",
                    "Phone screen covering motivation, availability, and salary range.",
                    StageKind::Standard,
                    Some(5),
                )
                .deadline(7),
                StageTemplate::new(
                    "Shortlisted",
                    "Candidate cleared sourcing and advances to evaluation.",
                    StageKind::Success,
                    None,
                ),
                StageTemplate::new(
                    "Not a Fit",
                    "Candidate leaves the funnel at the sourcing step.",
                    StageKind::Fail,
                    None,
                ),
            ],
        },
        PhaseTemplate {
            name: "Evaluation",
            objective: "Assess shortlisted candidates in depth.",
            default_view: PhaseView::Kanban,
            workflow_name: "Standard Evaluation",
            workflow_description: "Interview loop with technical and team rounds.",
            stages: vec![
                StageTemplate::new(
                    "Evaluation Intake",
                    "Candidate enters the interview loop.",
                    StageKind::Initial,
                    Some(1),
                ),
                StageTemplate::new(
                    "Technical Interview",
                    "Role-specific skills assessment.",
                    StageKind::Standard,
                    Some(5),
                )
                .deadline(10),
                StageTemplate::new(
                    "Team Interview",
                    "Culture and collaboration round with the hiring team.",
                    StageKind::Standard,
                    Some(5),
                ),
                StageTemplate::new(
                    "Reference Check",
                    "Optional reference validation before the offer decision.",
                    StageKind::Standard,
                    Some(3),
                )
                .skippable(),
                StageTemplate::new(
                    "Approved for Offer",
                    "Hiring team signed off; candidate moves to the offer phase.",
                    StageKind::Success,
                    None,
                ),
                StageTemplate::new(
                    "Rejected",
                    "Candidate did not clear the interview loop.",
                    StageKind::Fail,
                    None,
                ),
            ],
        },
        PhaseTemplate {
            name: "Offer & Pre-Onboarding",
            objective: "Close the candidate and prepare the start date.",
            default_view: PhaseView::List,
            workflow_name: "Offer Process",
            workflow_description: "Offer drafting, negotiation, and acceptance tracking.",
            stages: vec![
                StageTemplate::new(
                    "Offer Drafting",
                    "Compensation package assembled for approval.",
                    StageKind::Initial,
                    Some(2),
                ),
                StageTemplate::new(
                    "Offer Sent",
                    "Offer delivered; awaiting the candidate's response.",
                    StageKind::Standard,
                    Some(5),
                )
                .deadline(7),
                StageTemplate::new(
                    "Negotiation",
                    "Terms under discussion.",
                    StageKind::Standard,
                    Some(4),
                )
                .skippable(),
                StageTemplate::new(
                    "Offer Accepted",
                    "Candidate signed; pre-onboarding begins.",
                    StageKind::Success,
                    None,
                ),
                StageTemplate::new(
                    "Offer Declined",
                    "Candidate turned the offer down.",
                    StageKind::Fail,
                    None,
                ),
            ],
        },
        PhaseTemplate {
            name: "Talent Pool",
            objective: "Keep strong past candidates warm for future positions.",
            default_view: PhaseView::List,
            workflow_name: "Talent Pool",
            workflow_description: "Long-term nurture track for re-engagement.",
            stages: vec![
                StageTemplate::new(
                    "Pool Entry",
                    "Candidate parked for future opportunities.",
                    StageKind::Initial,
                    None,
                ),
                StageTemplate::new(
                    "Re-Engaged",
                    "Candidate matched to a new position.",
                    StageKind::Success,
                    None,
                ),
                StageTemplate::new(
                    "Withdrawn",
                    "Candidate asked to be removed from the pool.",
                    StageKind::Fail,
                    None,
                ),
            ],
        },
    ]
}
