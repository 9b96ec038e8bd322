use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use voicelink_core::{ApiError, ExecutionState, OrchestratorApi, OrchestratorClient, SessionHandle};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn context_json(id: &str) -> Value {
    json!({
        "session_id": id,
        "state": "waiting_for_input",
        "transcript": ["restart the api."],
        "commands": ["systemctl restart api"],
        "results": [{"output": "", "error": "unit not found"}],
        "current_question": "Which host?",
        "question_context": null,
        "answers": [],
        "topics": ["ops"],
        "error_message": null,
        "created_at": "2025-03-01T09:30:00.000000+00:00",
        "updated_at": "2025-03-01T09:30:02.500000+00:00"
    })
}

fn orchestrator() -> Router {
    Router::new()
        .route(
            "/api/execute/background",
            post(|Json(body): Json<Value>| async move {
                let transcript = body["transcript"].as_str().unwrap_or_default().to_string();
                if transcript.is_empty() {
                    return (StatusCode::BAD_REQUEST, Json(json!({"detail": "Transcript is empty"})));
                }
                (
                    StatusCode::OK,
                    Json(json!({"session_id": format!("s-{}", transcript.len()), "state": "pending"})),
                )
            }),
        )
        .route(
            "/api/context/{id}",
            get(|Path(id): Path<String>| async move {
                match id.as_str() {
                    "gone" => (StatusCode::OK, Json(json!({"error": "Session not found"}))),
                    "broken" => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
                    _ => (StatusCode::OK, Json(context_json(&id))),
                }
            }),
        )
        .route(
            "/api/resume/{id}",
            post(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                if id == "idle" {
                    return (
                        StatusCode::CONFLICT,
                        Json(json!({"detail": "Session is not waiting for input"})),
                    );
                }
                if body["answer"].as_str().is_none() {
                    return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({})));
                }
                (StatusCode::OK, Json(json!({"session_id": id, "state": "resuming"})))
            }),
        )
}

#[tokio::test]
async fn test_execute_background_returns_handle() {
    let base = serve(orchestrator()).await;
    let client = OrchestratorClient::new(&base).unwrap();

    let started = client.execute_background("list the pods.").await.unwrap();
    assert_eq!(started.session_id, SessionHandle::new("s-14"));
    assert_eq!(started.state, ExecutionState::Pending);
}

#[tokio::test]
async fn test_execute_background_surfaces_detail() {
    let base = serve(orchestrator()).await;
    let client = OrchestratorClient::new(&base).unwrap();

    match client.execute_background("").await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Transcript is empty");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_context_parses_full_body() {
    let base = serve(orchestrator()).await;
    let client = OrchestratorClient::new(&base).unwrap();

    let ctx = client.fetch_context(&SessionHandle::new("s-1")).await.unwrap();
    assert_eq!(ctx.session_id, SessionHandle::new("s-1"));
    assert_eq!(ctx.pending_question(), Some("Which host?"));
    assert_eq!(ctx.results[0].error.as_deref(), Some("unit not found"));
    assert!(ctx.updated_at > ctx.created_at);
}

#[tokio::test]
async fn test_fetch_context_error_uses_fallback_message() {
    let base = serve(orchestrator()).await;
    let client = OrchestratorClient::new(&base).unwrap();

    let err = client.fetch_context(&SessionHandle::new("broken")).await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.to_string(), "HTTP 500: Failed to fetch execution context");
}

#[tokio::test]
async fn test_missing_session_body_is_invalid() {
    let base = serve(orchestrator()).await;
    let client = OrchestratorClient::new(&base).unwrap();

    let err = client.fetch_context(&SessionHandle::new("gone")).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse(_)), "{err:?}");
}

#[tokio::test]
async fn test_non_json_error_body() {
    let app = Router::new().route(
        "/api/context/{id}",
        get(|| async { (StatusCode::BAD_GATEWAY, "upstream exploded") }),
    );
    let base = serve(app).await;
    let client = OrchestratorClient::new(&base).unwrap();

    match client.fetch_context(&SessionHandle::new("s-1")).await {
        Err(ApiError::Status { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "Unknown error");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn test_resume_round_trip_and_conflict() {
    let base = serve(orchestrator()).await;
    let client = OrchestratorClient::new(&base).unwrap();

    let resumed = client.resume(&SessionHandle::new("s-3"), "eu-west").await.unwrap();
    assert_eq!(resumed.state, "resuming");
    assert_eq!(resumed.session_id, Some(SessionHandle::new("s-3")));

    let err = client.resume(&SessionHandle::new("idle"), "eu-west").await.unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert_eq!(err.to_string(), "HTTP 409: Session is not waiting for input");
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let app = Router::new().route(
        "/api/context/{id}",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({}))
        }),
    );
    let base = serve(app).await;
    let client = OrchestratorClient::with_timeout(&base, Duration::from_millis(100)).unwrap();

    let err = client.fetch_context(&SessionHandle::new("s-1")).await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout), "{err:?}");
    assert_eq!(err.status(), Some(504));
}
