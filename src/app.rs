use crate::auth::CredentialRotator;
use crate::config::{
    BROWSER_USER_AGENT, BackendConfig, CookieFormat, LogConfig, parse_bool_flag, parse_log_level,
};
use crate::error::{AppError, AppResult};
use crate::upload::{HttpImageUploader, ImageUploader};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::{Arc, Once, OnceLock};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub credentials: CredentialRotator,
    pub http: reqwest::Client,
    pub uploader: Arc<dyn ImageUploader>,
    pub metrics: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
    pub backend: BackendConfig,
    /// Token pool used when the client does not send a usable backend token.
    pub fallback_tokens: Option<String>,
    pub max_body_bytes: usize,
    pub log: LogConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:6060".to_string(),
            metrics_path: "/metrics".to_string(),
            backend: BackendConfig::default(),
            fallback_tokens: None,
            max_body_bytes: 32 * 1024 * 1024,
            log: LogConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the runtime from `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let env_non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = RuntimeConfig::default();
        let cookie_format = match env_non_empty("QWEN2API_COOKIE_FORMAT") {
            Some(raw) => raw.parse::<CookieFormat>().map_err(|err| {
                AppError::new(
                    StatusCode::BAD_REQUEST,
                    "config_invalid",
                    format!("QWEN2API_COOKIE_FORMAT: {err}"),
                )
            })?,
            None => CookieFormat::default(),
        };
        let backend = BackendConfig {
            chat_url: env_non_empty("QWEN2API_CHAT_URL").unwrap_or(defaults.backend.chat_url),
            models_url: env_non_empty("QWEN2API_MODELS_URL")
                .unwrap_or(defaults.backend.models_url),
            files_url: env_non_empty("QWEN2API_FILES_URL").unwrap_or(defaults.backend.files_url),
            cookie: env_non_empty("QWEN2API_COOKIE")
                .map(|raw| cookie_format.apply(raw.trim()))
                .unwrap_or_default(),
            force_non_stream: env_non_empty("QWEN2API_FORCE_NON_STREAM")
                .map(|v| parse_bool_flag(&v))
                .unwrap_or(false),
            skip_duplicate_lines: env_non_empty("QWEN2API_SKIP_DUPLICATE_LINES")
                .map(|v| parse_bool_flag(&v))
                .unwrap_or(false),
            request_timeout_ms: env_non_empty("QWEN2API_REQUEST_TIMEOUT_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0),
        };
        let log = LogConfig {
            level: env_non_empty("QWEN2API_LOG_LEVEL")
                .map(|v| parse_log_level(&v))
                .unwrap_or(defaults.log.level),
            dir: env_non_empty("QWEN2API_LOG_DIR").map(PathBuf::from),
            retention_days: env_non_empty("QWEN2API_LOG_RETENTION_DAYS")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(defaults.log.retention_days),
        };
        Ok(Self {
            listen: env_non_empty("QWEN2API_LISTEN").unwrap_or(defaults.listen),
            metrics_path: env_non_empty("QWEN2API_METRICS_PATH").unwrap_or(defaults.metrics_path),
            backend,
            fallback_tokens: env_non_empty("CHAT_AUTHORIZATION"),
            max_body_bytes: env_non_empty("QWEN2API_MAX_BODY_BYTES")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(defaults.max_body_bytes),
            log,
        })
    }
}

pub fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let http = reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;
    let uploader = HttpImageUploader::new(http.clone(), runtime.backend.files_url.clone());
    load_state_with_uploader(runtime, http, Arc::new(uploader))
}

/// Build state around a caller-provided uploader.
pub fn load_state_with_uploader(
    runtime: RuntimeConfig,
    http: reqwest::Client,
    uploader: Arc<dyn ImageUploader>,
) -> AppResult<AppState> {
    let metrics = init_metrics()?;
    let credentials = CredentialRotator::new(runtime.fallback_tokens.clone());
    tracing::info!(
        chat_url = %runtime.backend.chat_url,
        force_non_stream = runtime.backend.force_non_stream,
        skip_duplicate_lines = runtime.backend.skip_duplicate_lines,
        fallback_pool = runtime.fallback_tokens.is_some(),
        "runtime configured"
    );
    Ok(AppState {
        runtime: Arc::new(runtime),
        credentials,
        http,
        uploader,
        metrics,
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    let max_body_bytes = state.runtime.max_body_bytes;
    let api_router = build_api_router();
    Router::<AppState>::new()
        .merge(api_router.clone())
        .nest("/api", api_router)
        .route("/", get(crate::handlers::index))
        .route(&metrics_path, get(crate::handlers::metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
}

fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/v1/models", get(crate::handlers::list_models))
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
}
