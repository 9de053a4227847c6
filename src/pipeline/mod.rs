//! Candidate workflow and stage-transition engine.
//!
//! A company's hiring pipeline is a graph of phases, each owning one or more
//! workflows, each workflow a validated set of ordered stages. Candidate
//! applications move through that graph via the transition service, every
//! hop is recorded in the append-only stage-history ledger, and the
//! analytics engine reads the ledger back to surface funnel bottlenecks.

pub mod analytics;
pub mod domain;
pub mod initializer;
pub mod memory;
pub mod permission;
pub mod repository;
pub mod router;
pub mod transition;

#[cfg(test)]
mod tests;

pub use analytics::{
    AnalyticsEngine, AnalyticsError, BottleneckDriver, BottleneckWeights, StageBottleneck,
    StageMetrics, WorkflowAnalytics, DEFAULT_MIN_BOTTLENECK_SCORE,
};
pub use domain::{
    ApplicationId, CompanyId, DateRange, Phase, PhaseId, PhaseStatus, PhaseView, RoleId, Stage,
    StageHistoryEntry, StageId, StageKind, StageSpec, UserId, ValidationError, Workflow,
    WorkflowId, WorkflowStatus,
};
pub use initializer::{InitializationOutcome, InitializerError, PipelineInitializer};
pub use permission::{PermissionError, PermissionService, StageAccessPolicy, UnassignedStagePolicy};
pub use repository::{
    ApplicationDirectory, ApplicationProfile, CompanyDirectory, EventError, LedgerError,
    LedgerTransition, PipelineStore, StageAssignment, StageAssignments, StageChangedEvent,
    StageEventPublisher, StageHistoryStore, StoreError,
};
pub use router::{pipeline_router, PipelineEngine};
pub use transition::{
    CascadeResult, MovePolicy, TransitionError, TransitionOutcome, TransitionService,
    TransitionStep,
};
