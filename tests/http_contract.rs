//! `HttpGameApi` against a fake backend speaking the game's JSON contract.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use questline::api::{ActionRequest, GameApi, HttpGameApi};
use questline::config::{ApiConfig, PollConfig};
use questline::session::{Role, RunStatus, SessionStore};
use questline::{ApiError, TurnController};

#[derive(Default)]
struct Backend {
    statuses: Mutex<VecDeque<&'static str>>,
    actions: Mutex<Vec<Value>>,
    status_requests: Mutex<Vec<(String, String)>>,
}

async fn init() -> Json<Value> {
    Json(json!({
        "run_id": "run_init",
        "run_status": "queued",
        "thread_id": "thread_1"
    }))
}

async fn action(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.actions.lock().unwrap().push(body.clone());
    if body["message"] == "explode" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "assistant unavailable").into_response();
    }
    Json(json!({ "run_id": "run_2", "run_status": "queued" })).into_response()
}

async fn run_status(
    State(backend): State<Arc<Backend>>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> Json<Value> {
    backend
        .status_requests
        .lock()
        .unwrap()
        .push((thread_id.clone(), run_id.clone()));
    let status = backend
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or("completed");

    Json(json!({
        "id": run_id,
        "object": "thread.run",
        "thread_id": thread_id,
        "assistant_id": "asst_1",
        "status": status,
        "created_at": 1700000000
    }))
}

fn text_message(role: &str, value: &str) -> Value {
    json!({
        "role": role,
        "content": [{ "type": "text", "text": { "value": value, "annotations": [] } }]
    })
}

async fn messages(Path(thread_id): Path<String>) -> Json<Value> {
    Json(json!({
        "thread": thread_id,
        "messages": [
            text_message("assistant", "The door creaks open.\nA draft blows in."),
            text_message("user", "open the door"),
            text_message("assistant", "You stand before a door.")
        ],
        "actions": ["step inside", "close the door"]
    }))
}

async fn garbage() -> &'static str {
    "<html>not json</html>"
}

async fn spawn_backend(backend: Arc<Backend>) -> SocketAddr {
    let app = Router::new()
        .route("/api/v1/init/", post(init))
        .route("/api/v1/action/", post(action))
        .route("/api/v1/threads/{thread_id}/runs/{run_id}", get(run_status))
        .route("/api/v1/messages/{thread_id}", get(messages))
        .with_state(backend);
    serve(app).await
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> HttpGameApi {
    let config = ApiConfig::default()
        .with_base_url(format!("http://{}/", addr))
        .with_timeout(Duration::from_secs(5));
    HttpGameApi::new(config).unwrap()
}

#[tokio::test]
async fn test_init_returns_thread_and_run() {
    let addr = spawn_backend(Arc::new(Backend::default())).await;
    let api = client_for(addr);

    let init = api.init().await.unwrap();

    assert_eq!(init.thread_id, "thread_1");
    assert_eq!(init.run_id, "run_init");
    assert_eq!(init.run_status, RunStatus::Queued);
}

#[tokio::test]
async fn test_action_posts_message_and_thread() {
    let backend = Arc::new(Backend::default());
    let addr = spawn_backend(backend.clone()).await;
    let api = client_for(addr);

    let ack = api
        .submit_action(&ActionRequest {
            message: "look around".to_string(),
            thread_id: "thread_1".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(ack.run_id, "run_2");
    assert_eq!(ack.run_status, RunStatus::Queued);
    assert_eq!(
        backend.actions.lock().unwrap().clone(),
        vec![json!({ "message": "look around", "thread_id": "thread_1" })]
    );
}

#[tokio::test]
async fn test_run_status_reads_status_from_run_object() {
    let backend = Arc::new(Backend::default());
    backend.statuses.lock().unwrap().push_back("in_progress");
    let addr = spawn_backend(backend.clone()).await;
    let api = client_for(addr);

    let status = api.run_status("thread_1", "run_2").await.unwrap();

    assert_eq!(status, RunStatus::Running);
    assert_eq!(
        backend.status_requests.lock().unwrap().clone(),
        vec![("thread_1".to_string(), "run_2".to_string())]
    );
}

#[tokio::test]
async fn test_messages_are_oldest_first_with_suggestions() {
    let addr = spawn_backend(Arc::new(Backend::default())).await;
    let api = client_for(addr);

    let log = api.messages("thread_1").await.unwrap();

    let roles: Vec<Role> = log.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(log.messages[0].text, "You stand before a door.");
    assert_eq!(
        log.messages[2].paragraphs().collect::<Vec<_>>(),
        vec!["The door creaks open.", "A draft blows in."]
    );
    assert_eq!(log.suggestions, vec!["step inside", "close the door"]);
}

#[tokio::test]
async fn test_non_success_status_is_server_error() {
    let addr = spawn_backend(Arc::new(Backend::default())).await;
    let api = client_for(addr);

    let err = api
        .submit_action(&ActionRequest {
            message: "explode".to_string(),
            thread_id: "thread_1".to_string(),
        })
        .await
        .unwrap_err();

    match err {
        ApiError::Server { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "assistant unavailable");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let addr = serve(Router::new().route("/api/v1/messages/{thread_id}", get(garbage))).await;
    let api = client_for(addr);

    let err = api.messages("thread_1").await.unwrap_err();

    assert!(matches!(err, ApiError::InvalidResponse { .. }), "{err:?}");
}

#[tokio::test]
async fn test_path_segments_are_percent_encoded() {
    let backend = Arc::new(Backend::default());
    let addr = spawn_backend(backend.clone()).await;
    let api = client_for(addr);

    let status = api.run_status("thread/1", "run 2?x").await.unwrap();

    assert_eq!(status, RunStatus::Completed);
    assert_eq!(
        backend.status_requests.lock().unwrap().clone(),
        vec![("thread/1".to_string(), "run 2?x".to_string())]
    );
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = client_for(addr);

    let err = api.init().await.unwrap_err();

    assert!(matches!(err, ApiError::Network { .. }), "{err:?}");
}

#[tokio::test]
async fn test_full_turn_through_controller() {
    let backend = Arc::new(Backend::default());
    backend
        .statuses
        .lock()
        .unwrap()
        .extend(["queued", "in_progress", "completed"]);
    let addr = spawn_backend(backend.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("session.json");
    let store = SessionStore::open(&state_path).unwrap();
    let poll = PollConfig::default()
        .with_interval(Duration::from_millis(5))
        .with_max_retries(10);

    let handle = TurnController::new(Arc::new(client_for(addr)), store)
        .with_poll_config(poll)
        .with_init_delay(Duration::from_millis(10))
        .spawn();

    handle.start_new_game().await.unwrap();
    let session = tokio::time::timeout(Duration::from_secs(5), handle.wait_until_idle())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.fields.thread_id, "thread_1");
    assert_eq!(session.messages.len(), 3);

    let run_id = handle.submit_turn("open the door").await.unwrap();
    assert_eq!(run_id, "run_2");

    let session = tokio::time::timeout(Duration::from_secs(5), handle.wait_until_idle())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.fields.run_id, "");
    assert_eq!(session.fields.run_status, RunStatus::Completed);
    assert_eq!(session.suggestions, vec!["step inside", "close the door"]);
    assert_eq!(backend.status_requests.lock().unwrap().len(), 3);

    handle.shutdown().await;

    let persisted = SessionStore::open(&state_path).unwrap().fields();
    assert_eq!(persisted.thread_id, "thread_1");
    assert_eq!(persisted.run_id, "");
    assert_eq!(persisted.run_status, RunStatus::Completed);
}
