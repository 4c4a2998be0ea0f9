use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Serialize;
use solar_advisor_api::{
    AskRequest, AskResponse, ChatCompletionClient, CompletionConfig, SolarAdvisorApi,
    TextGenerator, API_CONTRACT_VERSION, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL,
    DEFAULT_LLM_TIMEOUT_SECS,
};
use solar_advisor_core::Advice;
use solar_advisor_store_csv::DatasetInfo;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: SolarAdvisorApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    records: usize,
}

#[derive(Debug, Parser)]
#[command(name = "solar-advisor-service")]
#[command(about = "HTTP service answering solar installation questions")]
struct Args {
    #[arg(long, env = "SOLAR_DATASET", default_value = "./solar_data.csv")]
    dataset: PathBuf,
    #[arg(long, env = "SOLAR_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Debug, clap::Args)]
struct LlmArgs {
    #[arg(long = "llm-base-url", env = "OPENAI_BASE_URL", default_value = DEFAULT_LLM_BASE_URL)]
    base_url: String,
    #[arg(long = "llm-model", env = "SOLAR_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    model: String,
    #[arg(long = "llm-api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(
        long = "llm-timeout-secs",
        env = "SOLAR_LLM_TIMEOUT_SECS",
        default_value_t = DEFAULT_LLM_TIMEOUT_SECS
    )]
    timeout_secs: u64,
}

impl LlmArgs {
    fn into_config(self) -> CompletionConfig {
        CompletionConfig {
            base_url: self.base_url,
            model: self.model,
            api_key: self.api_key,
            timeout_secs: self.timeout_secs,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/ask", post(ask))
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/dataset", get(dataset))
        .route("/v1/query/summary", post(query_summary))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Error worth reporting from loading `.env`. A missing file is the normal case.
fn env_file_error(loaded: &Result<PathBuf, dotenv::Error>) -> Option<&dotenv::Error> {
    loaded.as_ref().err().filter(|err| !err.not_found())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_file = dotenv::dotenv();
    init_tracing();
    if let Some(err) = env_file_error(&env_file) {
        tracing::warn!(error = %err, "ignoring unreadable .env file");
    }

    let args = Args::parse();
    let generator: Arc<dyn TextGenerator> =
        Arc::new(ChatCompletionClient::new(args.llm.into_config()));
    let api = SolarAdvisorApi::open(&args.dataset, generator)
        .with_context(|| format!("refusing to start without dataset {}", args.dataset.display()))?;

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, records = api.store().len(), "solar advisor service listening");
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

async fn ask(
    State(state): State<ServiceState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ServiceError> {
    let span = tracing::info_span!("ask", request_id = %ulid::Ulid::new());
    answer(state.api, request).instrument(span).await
}

async fn answer(api: SolarAdvisorApi, request: AskRequest) -> Result<Json<AskResponse>, ServiceError> {
    // The completion client blocks, so keep it off the async workers.
    let current = tracing::Span::current();
    let result = tokio::task::spawn_blocking(move || current.in_scope(|| api.ask(&request)))
        .await
        .map_err(|err| {
            ServiceState::error(StatusCode::INTERNAL_SERVER_ERROR, format!("ask task failed: {err}"))
        })?;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            let message = format!("{err:#}");
            tracing::warn!(error = %message, "text generation failed");
            Err(ServiceState::error(StatusCode::BAD_GATEWAY, message))
        }
    }
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok", records: state.api.store().len() }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn dataset(State(state): State<ServiceState>) -> Json<ServiceEnvelope<DatasetInfo>> {
    Json(envelope(state.api.dataset_info().clone()))
}

async fn query_summary(
    State(state): State<ServiceState>,
    Json(request): Json<AskRequest>,
) -> Json<ServiceEnvelope<Advice>> {
    let span = tracing::info_span!("query_summary", request_id = %ulid::Ulid::new());
    let advice = span.in_scope(|| state.api.summarize(&request));
    Json(envelope(advice))
}
