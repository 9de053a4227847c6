use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use talentflow::config::AppConfig;
use talentflow::error::AppError;
use talentflow::pipeline::memory::{
    MemoryApplicationDirectory, MemoryCompanyDirectory, MemoryPipelineStore,
    MemoryStageAssignments, MemoryStageHistory, RecordingEventPublisher,
};
use talentflow::pipeline::{
    pipeline_router, AnalyticsEngine, ApplicationId, ApplicationProfile, CompanyId, MovePolicy,
    PermissionService, PipelineEngine, PipelineInitializer, PipelineStore, RoleId, StageKind,
    TransitionService, UnassignedStagePolicy, UserId, WorkflowAnalytics,
    DEFAULT_MIN_BOTTLENECK_SCORE,
};
use talentflow::telemetry;
use tracing::info;

type MemoryPermissions = PermissionService<MemoryStageAssignments, MemoryCompanyDirectory>;
type MemoryEngine = PipelineEngine<
    MemoryPipelineStore,
    MemoryStageHistory,
    MemoryPermissions,
    MemoryApplicationDirectory,
    RecordingEventPublisher,
>;

/// Handles to every in-process store backing the engine.
struct Backing {
    pipeline: Arc<MemoryPipelineStore>,
    ledger: Arc<MemoryStageHistory>,
    assignments: Arc<MemoryStageAssignments>,
    directory: Arc<MemoryCompanyDirectory>,
    applications: Arc<MemoryApplicationDirectory>,
    events: Arc<RecordingEventPublisher>,
}

impl Backing {
    fn new() -> Self {
        Self {
            pipeline: Arc::new(MemoryPipelineStore::default()),
            ledger: Arc::new(MemoryStageHistory::default()),
            assignments: Arc::new(MemoryStageAssignments::default()),
            directory: Arc::new(MemoryCompanyDirectory::default()),
            applications: Arc::new(MemoryApplicationDirectory::default()),
            events: Arc::new(RecordingEventPublisher::default()),
        }
    }

    fn engine(&self, fallback: UnassignedStagePolicy, min_score: f64) -> Arc<MemoryEngine> {
        let access = Arc::new(PermissionService::new(
            self.assignments.clone(),
            self.directory.clone(),
            fallback,
        ));
        Arc::new(PipelineEngine {
            initializer: PipelineInitializer::new(self.pipeline.clone()),
            transitions: TransitionService::new(
                self.pipeline.clone(),
                self.ledger.clone(),
                access,
                self.applications.clone(),
                self.events.clone(),
                MovePolicy::default(),
            ),
            analytics: AnalyticsEngine::new(self.pipeline.clone(), self.ledger.clone())
                .with_min_score(min_score),
        })
    }
}

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "Talentflow Pipeline Service",
    about = "Run the hiring pipeline service or demo it from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Pipeline utilities for demos and operations
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommand,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum PipelineCommand {
    /// Seed a demo company, walk candidates through the funnel, and print analytics
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Company identifier for the seeded topology
    #[arg(long, default_value = "demo-co")]
    company: String,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Pipeline {
            command: PipelineCommand::Demo(args),
        } => run_demo(args),
    }
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let backing = Backing::new();
    let engine = backing.engine(
        config.pipeline.unassigned_stage_policy,
        config.pipeline.min_bottleneck_score,
    );

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let app = Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .merge(pipeline_router(engine))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "hiring pipeline service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let backing = Backing::new();
    let engine = backing.engine(
        UnassignedStagePolicy::OpenToCompany,
        DEFAULT_MIN_BOTTLENECK_SCORE,
    );

    let company = CompanyId(args.company);
    let recruiter = UserId("demo-recruiter".to_string());
    backing.directory.add_member(
        company.clone(),
        recruiter.clone(),
        vec![RoleId("recruiter".to_string())],
    );

    engine
        .initializer
        .initialize_default_phases(&company, Utc::now())
        .map_err(demo_error)?;

    let phases = backing
        .pipeline
        .phases_for_company(&company)
        .map_err(demo_error)?;
    let sourcing = phases.first().expect("seeded topology has phases");
    let workflow = backing
        .pipeline
        .default_workflow_for_phase(&sourcing.id)
        .map_err(demo_error)?
        .expect("seeded phase has a default workflow");
    let stages = backing
        .pipeline
        .stages_for_workflow(&workflow.id)
        .map_err(demo_error)?;
    let stage_by_kind = |kind: StageKind| {
        stages
            .iter()
            .find(|stage| stage.kind == kind)
            .expect("seeded workflow has every stage kind")
    };

    let candidates = [
        ("app-ada", "Ada Moreira", "ada@example.com"),
        ("app-ben", "Ben Okafor", "ben@example.com"),
        ("app-cleo", "Cleo Fontaine", "cleo@example.com"),
    ];
    for (id, name, email) in candidates {
        backing.applications.register(ApplicationProfile {
            id: ApplicationId(id.to_string()),
            company_id: company.clone(),
            candidate_name: name.to_string(),
            candidate_email: email.to_string(),
        });
    }

    // Ada clears sourcing and cascades into evaluation; Ben drops out; Cleo
    // is still parked at intake.
    for (candidate, path) in [
        (
            "app-ada",
            vec![StageKind::Initial, StageKind::Standard, StageKind::Success],
        ),
        ("app-ben", vec![StageKind::Initial, StageKind::Fail]),
        ("app-cleo", vec![StageKind::Initial]),
    ] {
        for kind in path {
            let stage = stage_by_kind(kind);
            engine
                .transitions
                .move_to_stage(
                    &ApplicationId(candidate.to_string()),
                    &stage.id,
                    &recruiter,
                )
                .map_err(demo_error)?;
        }
    }

    let analytics = engine
        .analytics
        .workflow_analytics(&workflow.id, None, Utc::now())
        .map_err(demo_error)?;

    render_pipeline_report(&workflow.name, &analytics, backing.events.events().len());
    Ok(())
}

fn demo_error(err: impl std::error::Error) -> AppError {
    AppError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

fn render_pipeline_report(workflow_name: &str, analytics: &WorkflowAnalytics, events: usize) {
    println!("Hiring pipeline demo");
    println!(
        "Workflow '{}': {} total, {} active, {} completed, {} rejected ({} events emitted)",
        workflow_name,
        analytics.total_applications,
        analytics.active_applications,
        analytics.completed_applications,
        analytics.rejected_applications,
        events
    );

    println!("\nStage funnel");
    for stage in &analytics.stages {
        println!(
            "- [{}] {} | {} application(s) | conversion {:.0}% | dropout {:.0}% | stuck {}",
            stage.kind.label(),
            stage.stage_name,
            stage.applications,
            stage.conversion_rate * 100.0,
            stage.dropout_rate * 100.0,
            stage.stuck
        );
    }

    if analytics.bottlenecks.is_empty() {
        println!("\nBottlenecks: none flagged");
    } else {
        println!("\nBottlenecks");
        for bottleneck in &analytics.bottlenecks {
            println!(
                "- {} (score {:.0}, {} application(s))",
                bottleneck.stage_name, bottleneck.score, bottleneck.applications
            );
        }
    }

    if !analytics.recommendations.is_empty() {
        println!("\nRecommendations");
        for recommendation in &analytics.recommendations {
            println!("- {recommendation}");
        }
    }
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
