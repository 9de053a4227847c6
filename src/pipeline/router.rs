use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::analytics::{AnalyticsEngine, AnalyticsError};
use super::domain::{ApplicationId, CompanyId, DateRange, StageId, UserId, WorkflowId};
use super::initializer::{InitializationOutcome, InitializerError, PipelineInitializer};
use super::permission::StageAccessPolicy;
use super::repository::{
    ApplicationDirectory, LedgerError, PipelineStore, StageEventPublisher, StageHistoryStore,
};
use super::transition::{TransitionError, TransitionService};

/// Bundles the three engine services behind one router state.
pub struct PipelineEngine<P, L, G, D, E> {
    pub initializer: PipelineInitializer<P>,
    pub transitions: TransitionService<P, L, G, D, E>,
    pub analytics: AnalyticsEngine<P, L>,
}

/// Router builder exposing the engine's command surface.
pub fn pipeline_router<P, L, G, D, E>(engine: Arc<PipelineEngine<P, L, G, D, E>>) -> Router
where
    P: PipelineStore + 'static,
    L: StageHistoryStore + 'static,
    G: StageAccessPolicy + 'static,
    D: ApplicationDirectory + 'static,
    E: StageEventPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/pipeline/companies/:company_id/phases",
            post(initialize_handler::<P, L, G, D, E>),
        )
        .route(
            "/api/v1/pipeline/applications/:application_id/transitions",
            post(move_handler::<P, L, G, D, E>),
        )
        .route(
            "/api/v1/pipeline/workflows/:workflow_id/analytics",
            get(analytics_handler::<P, L, G, D, E>),
        )
        .route(
            "/api/v1/pipeline/workflows/:workflow_id/bottlenecks",
            get(bottlenecks_handler::<P, L, G, D, E>),
        )
        .with_state(engine)
}

async fn initialize_handler<P, L, G, D, E>(
    State(engine): State<Arc<PipelineEngine<P, L, G, D, E>>>,
    Path(company_id): Path<String>,
) -> Response
where
    P: PipelineStore + 'static,
    L: StageHistoryStore + 'static,
    G: StageAccessPolicy + 'static,
    D: ApplicationDirectory + 'static,
    E: StageEventPublisher + 'static,
{
    let company = CompanyId(company_id);
    match engine
        .initializer
        .initialize_default_phases(&company, Utc::now())
    {
        Ok(InitializationOutcome::Seeded(phases)) => {
            let payload = json!({
                "company_id": company.0,
                "already_initialized": false,
                "phase_ids": phases.iter().map(|phase| phase.0.clone()).collect::<Vec<_>>(),
            });
            (StatusCode::CREATED, axum::Json(payload)).into_response()
        }
        Ok(InitializationOutcome::AlreadyInitialized) => {
            let payload = json!({
                "company_id": company.0,
                "already_initialized": true,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err @ InitializerError::Validation(_)) => {
            let payload = json!({ "error": err.to_string() });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub target_stage_id: String,
    pub actor_user_id: String,
}

async fn move_handler<P, L, G, D, E>(
    State(engine): State<Arc<PipelineEngine<P, L, G, D, E>>>,
    Path(application_id): Path<String>,
    axum::Json(request): axum::Json<MoveRequest>,
) -> Response
where
    P: PipelineStore + 'static,
    L: StageHistoryStore + 'static,
    G: StageAccessPolicy + 'static,
    D: ApplicationDirectory + 'static,
    E: StageEventPublisher + 'static,
{
    let application = ApplicationId(application_id);
    let target = StageId(request.target_stage_id);
    let actor = UserId(request.actor_user_id);

    match engine.transitions.move_to_stage(&application, &target, &actor) {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => transition_error_response(err),
    }
}

fn transition_error_response(err: TransitionError) -> Response {
    let status = match &err {
        TransitionError::ApplicationNotFound(_)
        | TransitionError::StageNotFound(_)
        | TransitionError::WorkflowNotFound(_)
        | TransitionError::ForeignStage { .. } => StatusCode::NOT_FOUND,
        TransitionError::Forbidden { .. } => StatusCode::FORBIDDEN,
        TransitionError::SkipNotAllowed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TransitionError::Ledger(LedgerError::Conflict(_)) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut payload = json!({ "error": err.to_string() });
    if status == StatusCode::CONFLICT {
        payload["hint"] = json!("reload the application's current stage and retry");
    }
    (status, axum::Json(payload)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_score: Option<f64>,
}

impl AnalyticsQuery {
    fn range(&self) -> Option<DateRange> {
        if self.from.is_none() && self.to.is_none() {
            None
        } else {
            Some(DateRange {
                from: self.from,
                to: self.to,
            })
        }
    }
}

async fn analytics_handler<P, L, G, D, E>(
    State(engine): State<Arc<PipelineEngine<P, L, G, D, E>>>,
    Path(workflow_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Response
where
    P: PipelineStore + 'static,
    L: StageHistoryStore + 'static,
    G: StageAccessPolicy + 'static,
    D: ApplicationDirectory + 'static,
    E: StageEventPublisher + 'static,
{
    let workflow = WorkflowId(workflow_id);
    let range = query.range();
    match engine
        .analytics
        .workflow_analytics(&workflow, range.as_ref(), Utc::now())
    {
        Ok(analytics) => (StatusCode::OK, axum::Json(analytics)).into_response(),
        Err(err) => analytics_error_response(err),
    }
}

async fn bottlenecks_handler<P, L, G, D, E>(
    State(engine): State<Arc<PipelineEngine<P, L, G, D, E>>>,
    Path(workflow_id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Response
where
    P: PipelineStore + 'static,
    L: StageHistoryStore + 'static,
    G: StageAccessPolicy + 'static,
    D: ApplicationDirectory + 'static,
    E: StageEventPublisher + 'static,
{
    let workflow = WorkflowId(workflow_id);
    let range = query.range();
    let min_score = query
        .min_score
        .unwrap_or_else(|| engine.analytics.default_min_score());
    match engine
        .analytics
        .bottlenecks(&workflow, range.as_ref(), min_score, Utc::now())
    {
        Ok(bottlenecks) => (StatusCode::OK, axum::Json(bottlenecks)).into_response(),
        Err(err) => analytics_error_response(err),
    }
}

fn analytics_error_response(err: AnalyticsError) -> Response {
    let status = match &err {
        AnalyticsError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({ "error": err.to_string() });
    (status, axum::Json(payload)).into_response()
}
