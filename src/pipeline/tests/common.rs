use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::pipeline::memory::{
    MemoryApplicationDirectory, MemoryCompanyDirectory, MemoryPipelineStore,
    MemoryStageAssignments, MemoryStageHistory, RecordingEventPublisher,
};
use crate::pipeline::{
    AnalyticsEngine, ApplicationId, ApplicationProfile, CompanyId, DateRange, LedgerError,
    LedgerTransition, MovePolicy, PermissionService, Phase, PipelineEngine, PipelineInitializer,
    PipelineStore, RoleId, Stage, StageHistoryEntry, StageHistoryStore, StageId, StageKind,
    TransitionService, UnassignedStagePolicy, UserId, Workflow, WorkflowId,
};

pub(super) type MemoryAccess = PermissionService<MemoryStageAssignments, MemoryCompanyDirectory>;
pub(super) type MemoryTransitions = TransitionService<
    MemoryPipelineStore,
    MemoryStageHistory,
    MemoryAccess,
    MemoryApplicationDirectory,
    RecordingEventPublisher,
>;
pub(super) type MemoryEngine = PipelineEngine<
    MemoryPipelineStore,
    MemoryStageHistory,
    MemoryAccess,
    MemoryApplicationDirectory,
    RecordingEventPublisher,
>;

/// Every in-process store plus the three services wired over them.
pub(super) struct Harness {
    pub(super) pipeline: Arc<MemoryPipelineStore>,
    pub(super) ledger: Arc<MemoryStageHistory>,
    pub(super) assignments: Arc<MemoryStageAssignments>,
    pub(super) directory: Arc<MemoryCompanyDirectory>,
    pub(super) applications: Arc<MemoryApplicationDirectory>,
    pub(super) events: Arc<RecordingEventPublisher>,
    pub(super) initializer: PipelineInitializer<MemoryPipelineStore>,
    pub(super) transitions: MemoryTransitions,
    pub(super) analytics: AnalyticsEngine<MemoryPipelineStore, MemoryStageHistory>,
}

pub(super) fn harness() -> Harness {
    harness_with(MovePolicy::Unrestricted, UnassignedStagePolicy::OpenToCompany)
}

pub(super) fn harness_with(policy: MovePolicy, fallback: UnassignedStagePolicy) -> Harness {
    let pipeline = Arc::new(MemoryPipelineStore::default());
    let ledger = Arc::new(MemoryStageHistory::default());
    let assignments = Arc::new(MemoryStageAssignments::default());
    let directory = Arc::new(MemoryCompanyDirectory::default());
    let applications = Arc::new(MemoryApplicationDirectory::default());
    let events = Arc::new(RecordingEventPublisher::default());

    let access = Arc::new(PermissionService::new(
        assignments.clone(),
        directory.clone(),
        fallback,
    ));

    Harness {
        initializer: PipelineInitializer::new(pipeline.clone()),
        transitions: TransitionService::new(
            pipeline.clone(),
            ledger.clone(),
            access,
            applications.clone(),
            events.clone(),
            policy,
        ),
        analytics: AnalyticsEngine::new(pipeline.clone(), ledger.clone()),
        pipeline,
        ledger,
        assignments,
        directory,
        applications,
        events,
    }
}

impl Harness {
    /// Seed the default topology for `company` and enroll the test recruiter.
    pub(super) fn seed(&self, company: &CompanyId) -> Vec<Phase> {
        self.directory.add_member(
            company.clone(),
            recruiter(),
            vec![RoleId("recruiter".to_string())],
        );
        self.initializer
            .initialize_default_phases(company, t0())
            .expect("default topology seeds");
        self.pipeline
            .phases_for_company(company)
            .expect("phases load")
    }

    pub(super) fn default_workflow(&self, phase: &Phase) -> Workflow {
        self.pipeline
            .default_workflow_for_phase(&phase.id)
            .expect("workflow lookup")
            .expect("phase has a default workflow")
    }

    pub(super) fn stages(&self, workflow: &WorkflowId) -> Vec<Stage> {
        self.pipeline
            .stages_for_workflow(workflow)
            .expect("stages load")
    }

    pub(super) fn stage_of_kind(&self, workflow: &WorkflowId, kind: StageKind) -> Stage {
        self.stages(workflow)
            .into_iter()
            .find(|stage| stage.kind == kind)
            .expect("workflow carries the requested stage kind")
    }

    pub(super) fn stage_at(&self, workflow: &WorkflowId, order: u32) -> Stage {
        self.stages(workflow)
            .into_iter()
            .find(|stage| stage.order == order)
            .expect("workflow carries the requested order")
    }

    pub(super) fn register_application(&self, id: &str, company: &CompanyId) -> ApplicationId {
        let application = ApplicationId(id.to_string());
        self.applications.register(ApplicationProfile {
            id: application.clone(),
            company_id: company.clone(),
            candidate_name: format!("Candidate {id}"),
            candidate_email: format!("{id}@example.com"),
        });
        application
    }

    /// Write a ledger hop directly, bypassing the transition service. Used by
    /// analytics tests to shape journeys with exact timestamps.
    pub(super) fn ledger_hop(
        &self,
        application: &ApplicationId,
        expected: Option<(&WorkflowId, &StageId)>,
        workflow: &WorkflowId,
        stage: &StageId,
        at: DateTime<Utc>,
    ) {
        self.ledger
            .record_transition(LedgerTransition {
                application_id: application.clone(),
                expected_current: expected.map(|(w, s)| (w.clone(), s.clone())),
                target_workflow: workflow.clone(),
                target_stage: stage.clone(),
                occurred_at: at,
            })
            .expect("ledger accepts hop");
    }
}

/// Ledger that loses the race on one configured write, delegating every
/// other call. Write counting starts at 1.
pub(super) struct ContestedLedger {
    inner: MemoryStageHistory,
    conflict_on: usize,
    writes: AtomicUsize,
}

impl ContestedLedger {
    pub(super) fn conflict_on_write(write: usize) -> Self {
        Self {
            inner: MemoryStageHistory::default(),
            conflict_on: write,
            writes: AtomicUsize::new(0),
        }
    }

    pub(super) fn snapshot(&self) -> Vec<StageHistoryEntry> {
        self.inner.snapshot()
    }
}

impl StageHistoryStore for ContestedLedger {
    fn open_entry(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<StageHistoryEntry>, LedgerError> {
        self.inner.open_entry(application)
    }

    fn record_transition(
        &self,
        transition: LedgerTransition,
    ) -> Result<StageHistoryEntry, LedgerError> {
        let write = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if write == self.conflict_on {
            return Err(LedgerError::Conflict(transition.application_id));
        }
        self.inner.record_transition(transition)
    }

    fn entries_for_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Vec<StageHistoryEntry>, LedgerError> {
        self.inner.entries_for_application(application)
    }

    fn entries_for_workflow(
        &self,
        workflow: &WorkflowId,
        range: Option<&DateRange>,
    ) -> Result<Vec<StageHistoryEntry>, LedgerError> {
        self.inner.entries_for_workflow(workflow, range)
    }
}

pub(super) fn engine(harness: &Harness, fallback: UnassignedStagePolicy) -> Arc<MemoryEngine> {
    engine_with_min_score(harness, fallback, crate::pipeline::DEFAULT_MIN_BOTTLENECK_SCORE)
}

pub(super) fn engine_with_min_score(
    harness: &Harness,
    fallback: UnassignedStagePolicy,
    min_score: f64,
) -> Arc<MemoryEngine> {
    let access = Arc::new(PermissionService::new(
        harness.assignments.clone(),
        harness.directory.clone(),
        fallback,
    ));
    Arc::new(PipelineEngine {
        initializer: PipelineInitializer::new(harness.pipeline.clone()),
        transitions: TransitionService::new(
            harness.pipeline.clone(),
            harness.ledger.clone(),
            access,
            harness.applications.clone(),
            harness.events.clone(),
            MovePolicy::Unrestricted,
        ),
        analytics: AnalyticsEngine::new(harness.pipeline.clone(), harness.ledger.clone())
            .with_min_score(min_score),
    })
}

pub(super) fn company() -> CompanyId {
    CompanyId("co-acme".to_string())
}

pub(super) fn recruiter() -> UserId {
    UserId("user-recruiter".to_string())
}

pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) async fn read_json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
