use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use super::common::*;
use crate::pipeline::{pipeline_router, ApplicationId, StageKind, UnassignedStagePolicy};

fn json_request(method: &str, uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&payload).expect("serialize")))
        .expect("request builds")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

#[tokio::test]
async fn initialize_route_seeds_then_reports_existing() {
    let harness = harness();
    let router = pipeline_router(engine(&harness, UnassignedStagePolicy::OpenToCompany));

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/pipeline/companies/co-route/phases",
            json!({}),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json_body(response).await;
    assert_eq!(body["already_initialized"], json!(false));
    assert_eq!(body["phase_ids"].as_array().expect("phase ids").len(), 4);

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/pipeline/companies/co-route/phases",
            json!({}),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["already_initialized"], json!(true));
}

#[tokio::test]
async fn move_route_returns_the_transition_outcome() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    harness.register_application("app-http", &company);

    let sourcing = harness.default_workflow(&phases[0]);
    let initial = harness.stage_of_kind(&sourcing.id, StageKind::Initial);

    let router = pipeline_router(engine(&harness, UnassignedStagePolicy::OpenToCompany));
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/pipeline/applications/app-http/transitions",
            json!({
                "target_stage_id": initial.id.0,
                "actor_user_id": recruiter().0,
            }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["cascade"], json!("not_applicable"));
    let steps = body["steps"].as_array().expect("steps present");
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["new_stage_id"], json!(initial.id.0));
    assert_eq!(steps[0]["previous_stage_id"], json!(null));
}

#[tokio::test]
async fn move_route_maps_denials_to_forbidden() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    harness.register_application("app-http", &company);

    let sourcing = harness.default_workflow(&phases[0]);
    let initial = harness.stage_of_kind(&sourcing.id, StageKind::Initial);

    let router = pipeline_router(engine(&harness, UnassignedStagePolicy::Deny));
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/pipeline/applications/app-http/transitions",
            json!({
                "target_stage_id": initial.id.0,
                "actor_user_id": recruiter().0,
            }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(harness.ledger.snapshot().is_empty());
}

#[tokio::test]
async fn move_route_maps_missing_records_to_not_found() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    let sourcing = harness.default_workflow(&phases[0]);
    let initial = harness.stage_of_kind(&sourcing.id, StageKind::Initial);

    let router = pipeline_router(engine(&harness, UnassignedStagePolicy::OpenToCompany));
    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/pipeline/applications/app-ghost/transitions",
            json!({
                "target_stage_id": initial.id.0,
                "actor_user_id": recruiter().0,
            }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analytics_route_serves_the_full_report() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    let sourcing = harness.default_workflow(&phases[0]);

    let router = pipeline_router(engine(&harness, UnassignedStagePolicy::OpenToCompany));
    let uri = format!("/api/v1/pipeline/workflows/{}/analytics", sourcing.id.0);
    let response = router
        .oneshot(get_request(&uri))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["workflow_id"], json!(sourcing.id.0));
    assert_eq!(body["stages"].as_array().expect("stages").len(), 5);
    assert_eq!(body["total_applications"], json!(0));
}

#[tokio::test]
async fn bottlenecks_route_honors_the_min_score_query() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    let sourcing = harness.default_workflow(&phases[0]);

    let router = pipeline_router(engine(&harness, UnassignedStagePolicy::OpenToCompany));
    let uri = format!(
        "/api/v1/pipeline/workflows/{}/bottlenecks?min_score=0",
        sourcing.id.0
    );
    let response = router
        .oneshot(get_request(&uri))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert!(body.is_array(), "payload is the ranked bottleneck list");
}

#[tokio::test]
async fn bottlenecks_route_defaults_to_the_engine_configured_cut_off() {
    let harness = harness();
    let company = company();
    let phases = harness.seed(&company);
    harness.register_application("app-http", &company);

    let sourcing = harness.default_workflow(&phases[0]);
    let initial = harness.stage_of_kind(&sourcing.id, StageKind::Initial);
    harness
        .transitions
        .move_to_stage(&ApplicationId("app-http".to_string()), &initial.id, &recruiter())
        .expect("placement succeeds");

    let uri = format!("/api/v1/pipeline/workflows/{}/bottlenecks", sourcing.id.0);

    // Stock cut-off: a single fresh placement scores well below it.
    let stock = pipeline_router(engine(&harness, UnassignedStagePolicy::OpenToCompany));
    let response = stock
        .oneshot(get_request(&uri))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert!(body.as_array().expect("bottleneck list").is_empty());

    // Zero cut-off configured on the engine: the same query flags the stage.
    let lenient = pipeline_router(engine_with_min_score(
        &harness,
        UnassignedStagePolicy::OpenToCompany,
        0.0,
    ));
    let response = lenient
        .oneshot(get_request(&uri))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert!(!body.as_array().expect("bottleneck list").is_empty());
}

#[tokio::test]
async fn analytics_route_maps_unknown_workflows_to_not_found() {
    let harness = harness();
    let router = pipeline_router(engine(&harness, UnassignedStagePolicy::OpenToCompany));

    let response = router
        .oneshot(get_request("/api/v1/pipeline/workflows/wf-ghost/analytics"))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
