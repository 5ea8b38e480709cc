use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

fn test_runtime() -> qwen2api::app::RuntimeConfig {
    qwen2api::app::RuntimeConfig {
        listen: "127.0.0.1:0".to_string(),
        ..Default::default()
    }
}

#[test]
fn runtime_defaults_target_public_backend() {
    let runtime = qwen2api::app::RuntimeConfig::default();
    assert_eq!(runtime.listen, "0.0.0.0:6060");
    assert_eq!(runtime.metrics_path, "/metrics");
    assert_eq!(
        runtime.backend.chat_url,
        "https://chat.qwen.ai/api/chat/completions"
    );
    assert_eq!(runtime.backend.models_url, "https://chat.qwen.ai/api/models");
    assert_eq!(runtime.backend.files_url, "https://chat.qwen.ai/api/v1/files/");
    assert!(!runtime.backend.force_non_stream);
    assert!(!runtime.backend.skip_duplicate_lines);
    assert!(runtime.fallback_tokens.is_none());
    assert_eq!(runtime.log.level.as_deref(), Some("info"));
    assert_eq!(runtime.log.retention_days, 30);
}

#[tokio::test]
async fn metrics_served_on_configured_path() {
    let mut runtime = test_runtime();
    runtime.metrics_path = "/internal/metrics".to_string();
    let state = qwen2api::app::load_state_with_runtime(runtime).expect("load state");
    let app = qwen2api::app::build_app(state);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/internal/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let mut runtime = test_runtime();
    runtime.max_body_bytes = 16;
    let state = qwen2api::app::load_state_with_runtime(runtime).expect("load state");
    let app = qwen2api::app::build_app(state);

    let body = serde_json::json!({ "messages": [{ "role": "user", "content": "far too long" }] })
        .to_string();
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("content-length", body.len())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn responses_carry_request_id() {
    let state = qwen2api::app::load_state_with_runtime(test_runtime()).expect("load state");
    let app = qwen2api::app::build_app(state);

    let resp = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
}

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: std::collections::HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn env_values_override_defaults() {
    let runtime = qwen2api::app::RuntimeConfig::from_lookup(lookup(&[
        ("QWEN2API_LISTEN", "127.0.0.1:7070"),
        ("QWEN2API_COOKIE", "a=1:b=2"),
        ("QWEN2API_COOKIE_FORMAT", "colon"),
        ("QWEN2API_FORCE_NON_STREAM", "yes"),
        ("QWEN2API_LOG_LEVEL", "NONE"),
        ("QWEN2API_CHAT_URL", "  "),
        ("CHAT_AUTHORIZATION", "tok-a,tok-b"),
    ]))
    .expect("valid config");
    assert_eq!(runtime.listen, "127.0.0.1:7070");
    assert_eq!(runtime.backend.cookie, "a=1; b=2");
    assert!(runtime.backend.force_non_stream);
    assert!(runtime.log.level.is_none());
    assert_eq!(
        runtime.backend.chat_url,
        "https://chat.qwen.ai/api/chat/completions"
    );
    assert_eq!(runtime.fallback_tokens.as_deref(), Some("tok-a,tok-b"));
}

#[test]
fn unknown_cookie_format_is_a_config_error() {
    let err = qwen2api::app::RuntimeConfig::from_lookup(lookup(&[(
        "QWEN2API_COOKIE_FORMAT",
        "semicolon",
    )]))
    .err()
    .expect("rejected");
    assert_eq!(err.code, "config_invalid");
    assert!(err.message.contains("QWEN2API_COOKIE_FORMAT"));
}
