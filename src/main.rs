use qwen2api::app::RuntimeConfig;
use qwen2api::error::AppError;

#[tokio::main]
async fn main() {
    let runtime = match RuntimeConfig::from_env() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: {}", err.message);
            std::process::exit(1);
        }
    };
    let _log_guard = match qwen2api::logging::init_tracing(&runtime.log) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: {}", err.message);
            std::process::exit(1);
        }
    };

    if let Err(err) = run(runtime).await {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}

async fn run(runtime: RuntimeConfig) -> Result<(), AppError> {
    let state = qwen2api::app::load_state_with_runtime(runtime)?;
    let app = qwen2api::app::build_app(state.clone());
    let addr: std::net::SocketAddr =
        state
            .runtime
            .listen
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                AppError::new(
                    axum::http::StatusCode::BAD_REQUEST,
                    "listen_invalid",
                    err.to_string(),
                )
            })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        AppError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "listen_failed",
            err.to_string(),
        )
    })?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await.map_err(|err| {
        AppError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "serve_failed",
            err.to_string(),
        )
    })?;
    Ok(())
}
