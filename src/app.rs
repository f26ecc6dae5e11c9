use crate::auth::MemorySettings;
use crate::characters::annotate_dialogue;
use crate::config::Config;
use crate::error::{Error, TransportKind};
use crate::service::RoleCall;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::TypedHeader;
use constant_time_eq::constant_time_eq;
use headers::{authorization::Bearer, Authorization};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{env, net::SocketAddr, sync::Arc};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 256 * 1024;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3147";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RoleCall>,
    pub api_key: Arc<str>,
}

pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    let api_key = env::var("API_KEY")
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("API_KEY must be set"))?;
    let addr: SocketAddr = env::var("BIND_ADDR")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
        .parse()
        .context("BIND_ADDR must be a socket address such as 0.0.0.0:3147")?;

    let service = Arc::new(RoleCall::from_config(
        config,
        Arc::new(MemorySettings::default()),
    )?);
    let state = AppState {
        service: service.clone(),
        api_key: api_key.into(),
    };
    let app = build_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            service.shutdown();
        })
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sessions", get(sessions))
        .route("/server", get(server_info).put(set_server))
        .route("/movies/:id", get(movie))
        .route("/movies/:id/characters", post(movie_characters))
        .route("/people/resolve", get(resolve_person))
        .route("/people/:id", get(person))
        .route("/people/:id/credits", get(person_credits))
        .route("/titles/search", get(search_titles))
        .route("/titles/:id", get(title))
        .route("/titles/:id/credits", get(title_credits))
        .route("/login", post(begin_login).get(login_state).delete(cancel_login))
        .route("/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn require_api_key(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    req: Request,
    next: Next,
) -> Response {
    let authorized = bearer
        .map(|TypedHeader(auth)| {
            let given = auth.token().as_bytes();
            let expected = state.api_key.as_bytes();
            given.len() == expected.len() && constant_time_eq(given, expected)
        })
        .unwrap_or(false);
    if !authorized {
        warn!("Rejecting request with invalid or missing API key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid or missing API key"})),
        )
            .into_response();
    }
    next.run(req).await
}

/// A failed request, optionally carrying the last good value of the
/// resource so clients can keep showing it.
struct ApiError {
    error: Error,
    stale: Option<Value>,
}

impl ApiError {
    fn with_stale<T: Serialize>(error: Error, stale: Option<T>) -> Self {
        let stale = stale.and_then(|s| serde_json::to_value(s).ok());
        Self { error, stale }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self { error, stale: None }
    }
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        Error::Transport {
            kind: TransportKind::TimedOut,
            ..
        } => StatusCode::GATEWAY_TIMEOUT,
        Error::Transport { .. } | Error::Server { .. } => StatusCode::BAD_GATEWAY,
        Error::Decode { .. } | Error::Parse(_) => StatusCode::BAD_GATEWAY,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
        Error::Cancelled | Error::Superseded => StatusCode::CONFLICT,
        Error::PinTimedOut { .. } => StatusCode::REQUEST_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        if status.is_server_error() {
            error!(error = %self.error, "Request failed");
        } else {
            debug!(error = %self.error, "Request rejected");
        }
        let mut body = json!({ "error": self.error.user_message() });
        if let Some(stale) = self.stale {
            body["stale"] = stale;
        }
        (status, Json(body)).into_response()
    }
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{} not found", what) })),
    )
        .into_response()
}

async fn sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.service.fetch_sessions().await {
        Ok(sessions) => Ok(Json(json!({ "sessions": sessions }))),
        Err(e) => Err(ApiError::with_stale(e, state.service.last_sessions())),
    }
}

async fn server_info(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.service.fetch_server_info().await {
        Ok(info) => Ok(Json(json!({ "server": info }))),
        Err(e) => Err(ApiError::with_stale(e, state.service.last_server_info())),
    }
}

#[derive(Deserialize)]
struct SetServer {
    address: String,
}

async fn set_server(
    State(state): State<AppState>,
    Json(body): Json<SetServer>,
) -> Result<Json<Value>, ApiError> {
    state.service.set_server(&body.address).await?;
    Ok(Json(json!({ "server_ip": body.address.trim() })))
}

async fn movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.service.fetch_movie_metadata(&id).await {
        Ok(Some(item)) => Ok(Json(json!({ "movie": item })).into_response()),
        Ok(None) => Ok(not_found("Movie")),
        Err(e) => Err(ApiError::with_stale(e, state.service.last_metadata(&id))),
    }
}

#[derive(Deserialize)]
struct Dialogue {
    lines: Vec<String>,
}

async fn movie_characters(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Dialogue>,
) -> Result<Response, ApiError> {
    let Some(item) = state.service.fetch_movie_metadata(&id).await? else {
        return Ok(not_found("Movie"));
    };
    let mentions = annotate_dialogue(body.lines.as_slice(), &item.roles);
    Ok(Json(json!({ "characters": mentions })).into_response())
}

async fn person(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let person = state.service.fetch_filmography_person(&id).await?;
    Ok(Json(json!({ "person": person })))
}

async fn person_credits(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let credits = state.service.fetch_person_credits(&id).await?;
    Ok(Json(json!({ "credits": credits })))
}

#[derive(Deserialize)]
struct ResolveQuery {
    name: String,
    title: Option<String>,
}

async fn resolve_person(
    State(state): State<AppState>,
    Query(q): Query<ResolveQuery>,
) -> Result<Response, ApiError> {
    match state
        .service
        .resolve_person(&q.name, q.title.as_deref())
        .await?
    {
        Some(person) => Ok(Json(json!({ "person": person })).into_response()),
        None => Ok(not_found("Person")),
    }
}

async fn title(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let title = state.service.fetch_title(&id).await?;
    Ok(Json(json!({ "title": title })))
}

async fn title_credits(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let credits = state.service.fetch_title_credits(&id).await?;
    Ok(Json(json!({ "credits": credits })))
}

#[derive(Deserialize)]
struct SearchQuery {
    query: String,
}

async fn search_titles(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let results = state.service.search_titles(&q.query).await?;
    Ok(Json(json!({ "results": results })))
}

async fn begin_login(State(state): State<AppState>) -> Json<Value> {
    let login = state.service.begin_login().await;
    Json(json!({ "login": login }))
}

async fn login_state(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "login": state.service.login_state(),
        "authenticated": state.service.is_authenticated().await,
    }))
}

async fn cancel_login(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "cancelled": state.service.cancel_login() }))
}

async fn logout(State(state): State<AppState>) -> StatusCode {
    state.service.logout().await;
    StatusCode::NO_CONTENT
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
