use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use identity::SessionConfig;
use server_api::{
    authenticate, create_workflow, ensure_tenant, list_workflows, set_workflow_status, sign_in,
    sign_up, ApiContext,
};
use shared::{
    domain::{TenantId, User, Workflow, WorkflowId},
    error::{ApiError, ErrorBody, ErrorCode},
    protocol::{
        current_user_route, ensure_tenant_route, sign_in_route, sign_up_route,
        CreateWorkflowRequest, Credentials, EnsureTenantResponse, SessionResponse,
        UpdateWorkflowStatusRequest,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, prepare_database_url, DEV_SESSION_SECRET};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

type HttpError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings()?;
    if settings.session_secret == DEV_SESSION_SECRET {
        warn!("APP__SESSION_SECRET is unset; using the development session secret");
    }

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext {
        storage,
        sessions: SessionConfig {
            secret: settings.session_secret,
            ttl_seconds: settings.session_ttl_seconds,
        },
    };

    let max_body_bytes = usize::try_from(settings.max_body_bytes).unwrap_or(usize::MAX);
    let app = build_router(Arc::new(AppState { api })).layer(RequestBodyLimitLayer::new(max_body_bytes));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(sign_up_route(), post(http_sign_up))
        .route(sign_in_route(), post(http_sign_in))
        .route(current_user_route(), get(http_current_user))
        .route(ensure_tenant_route(), post(http_ensure_tenant))
        .route(
            "/tenants/:tenant_id/workflows",
            get(http_list_workflows).post(http_create_workflow),
        )
        .route("/workflows/:workflow_id", patch(http_set_workflow_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_sign_up(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), HttpError> {
    let req = json_body(payload)?;
    let user = sign_up(&state.api, &req).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn http_sign_in(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<SessionResponse>, HttpError> {
    let req = json_body(payload)?;
    let session = sign_in(&state.api, &req).await.map_err(reject)?;
    Ok(Json(session))
}

async fn http_current_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<User>, HttpError> {
    let user = caller(&state, &headers)?;
    Ok(Json(user))
}

async fn http_ensure_tenant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<EnsureTenantResponse>, HttpError> {
    let user = caller(&state, &headers)?;
    let response = ensure_tenant(&state.api.storage, &user)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_list_workflows(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<TenantId>,
    headers: HeaderMap,
) -> Result<Json<Vec<Workflow>>, HttpError> {
    let user = caller(&state, &headers)?;
    let workflows = list_workflows(&state.api, &user, tenant_id)
        .await
        .map_err(reject)?;
    Ok(Json(workflows))
}

async fn http_create_workflow(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<TenantId>,
    headers: HeaderMap,
    payload: Result<Json<CreateWorkflowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Workflow>), HttpError> {
    let user = caller(&state, &headers)?;
    let req = json_body(payload)?;
    let workflow = create_workflow(&state.api, &user, tenant_id, &req)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn http_set_workflow_status(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<WorkflowId>,
    headers: HeaderMap,
    payload: Result<Json<UpdateWorkflowStatusRequest>, JsonRejection>,
) -> Result<Json<Workflow>, HttpError> {
    let user = caller(&state, &headers)?;
    let req = json_body(payload)?;
    let workflow = set_workflow_status(&state.api, &user, workflow_id, &req)
        .await
        .map_err(reject)?;
    Ok(Json(workflow))
}

fn caller(state: &AppState, headers: &HeaderMap) -> Result<User, HttpError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    authenticate(&state.api, authorization).map_err(reject)
}

/// Malformed or unknown-valued bodies are validation failures.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: rejection.body_text(),
            }),
        )
    })
}

fn reject(err: ApiError) -> HttpError {
    let status = match err.code {
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(message = %err.message, "request failed");
    }
    (status, Json(err.into()))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
