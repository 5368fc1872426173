use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::db::call_blocking;
use crate::error::VidharaError;
use crate::queue::MESSAGE_QUEUE;
use crate::runtime::AppState;

mod chat;
mod chats;
mod middleware;
mod transcribe;
use middleware::*;

pub use middleware::{issue_api_key, IssuedKey};

#[derive(Clone)]
struct WebState {
    app_state: Arc<AppState>,
}

/// Error reply rendered as `{"error": "..."}`.
#[derive(Debug)]
pub(crate) struct ApiError(StatusCode, String);

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self(status, message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn status(&self) -> StatusCode {
        self.0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl From<VidharaError> for ApiError {
    fn from(e: VidharaError) -> Self {
        match e {
            VidharaError::NotFound(msg) => Self(StatusCode::NOT_FOUND, msg),
            VidharaError::Forbidden(msg) => Self(StatusCode::FORBIDDEN, msg),
            VidharaError::InvalidRequest(msg) => Self(StatusCode::BAD_REQUEST, msg),
            other => Self::internal(other.to_string()),
        }
    }
}

async fn api_health(State(state): State<WebState>) -> Result<Json<serde_json::Value>, ApiError> {
    let queue_depth = call_blocking(state.app_state.db.clone(), |db| db.queue_depth(MESSAGE_QUEUE))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "status_backend": state.app_state.status_store.backend(),
        "queue_depth": queue_depth,
    })))
}

fn build_router(web_state: WebState) -> Router {
    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/chat", post(chat::api_chat))
        .route("/api/chat/poll/", get(chat::api_poll_missing_id))
        .route("/api/chat/poll/:task_id", get(chat::api_poll_task))
        .route(
            "/api/transcribe",
            post(transcribe::api_transcribe).get(transcribe::api_transcription_status),
        )
        .route("/api/chats", get(chats::api_list_chats))
        .route(
            "/api/chats/:id",
            get(chats::api_get_chat).delete(chats::api_delete_chat),
        )
        .route("/api/memories", get(chats::api_memories))
        .with_state(web_state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

pub async fn start_web_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.web_host, state.config.web_port);
    let router = build_router(WebState { app_state: state });
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind web server at {addr}: {e}"))?;

    info!("Web API available at http://{addr}/api");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Web server error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StatusBackend};
    use crate::db::Database;
    use crate::llm::testing::ScriptedLlm;
    use crate::llm::LlmProvider;
    use crate::ocr::DocumentExtractor;
    use crate::status_store::StatusStore;
    use crate::transcription::testing::FixedTranscriber;
    use crate::transcription::Transcriber;
    use crate::types::{FileDescriptor, TaskRecord};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    pub(super) struct TestEnv {
        pub state: Arc<AppState>,
        pub app: Router,
        pub key: String,
    }

    pub(super) struct EnvBuilder {
        config: Config,
        llm: Arc<dyn LlmProvider>,
        extractor: Option<Arc<dyn DocumentExtractor>>,
        transcriber: Option<Arc<dyn Transcriber>>,
    }

    impl EnvBuilder {
        pub fn new() -> Self {
            Self {
                config: crate::config::test_config(),
                llm: Arc::new(ScriptedLlm::new(&["Under Section 420 ", "IPC, cheating is punishable."])),
                extractor: None,
                transcriber: None,
            }
        }

        pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
            f(&mut self.config);
            self
        }

        pub fn llm(mut self, llm: impl LlmProvider + 'static) -> Self {
            self.llm = Arc::new(llm);
            self
        }

        pub fn extractor(mut self, extractor: impl DocumentExtractor + 'static) -> Self {
            self.extractor = Some(Arc::new(extractor));
            self
        }

        pub fn transcriber(mut self, transcriber: impl Transcriber + 'static) -> Self {
            self.transcriber = Some(Arc::new(transcriber));
            self
        }

        pub async fn build(self) -> TestEnv {
            let db = Arc::new(Database::new(&self.config.runtime_data_dir()).unwrap());
            let store: Arc<dyn StatusStore> = match self.config.status_backend {
                StatusBackend::Sqlite => {
                    Arc::new(crate::status_store::SqliteStatusStore::new(db.clone()))
                }
                StatusBackend::Memory => Arc::new(crate::status_store::MemoryStatusStore::new()),
            };
            let state = Arc::new(AppState::with_parts(
                self.config,
                db.clone(),
                store,
                self.llm,
                None,
                self.extractor,
                self.transcriber,
            ));
            db.create_user("user-1", "Asha").unwrap();
            let key = issue_api_key(db.clone(), "user-1", "test").await.unwrap().key;
            let app = build_router(WebState {
                app_state: state.clone(),
            });
            TestEnv { state, app, key }
        }
    }

    impl TestEnv {
        pub async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
            let resp = self.app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap()
                .to_vec();
            (status, headers, body)
        }

        pub async fn get_json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            let req = Request::builder()
                .uri(uri)
                .header("authorization", format!("Bearer {}", self.key))
                .body(Body::empty())
                .unwrap();
            let (status, _, body) = self.send(req).await;
            (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
        }

        pub async fn post_json(
            &self,
            uri: &str,
            body: serde_json::Value,
        ) -> (StatusCode, HeaderMap, Vec<u8>) {
            let req = Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", self.key))
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(req).await
        }

        /// Waits for the background consumer to settle the task.
        pub async fn wait_terminal(&self, task_id: &str) -> TaskRecord {
            for _ in 0..200 {
                if let Some(record) = self.state.chat_tasks.get(task_id).await.unwrap() {
                    if record.is_terminal() {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("task {task_id} never settled");
        }

        pub async fn drain_queue(&self) {
            crate::queue::drain(self.state.db.clone()).await.unwrap();
        }
    }

    pub(super) fn task_id_of(headers: &HeaderMap) -> String {
        headers
            .get("x-task-id")
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string()
    }

    struct FixedExtractor(&'static str);

    #[async_trait::async_trait]
    impl DocumentExtractor for FixedExtractor {
        async fn extract(&self, _file: &FileDescriptor) -> Result<Option<String>, VidharaError> {
            Ok(Some(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let env = EnvBuilder::new().build().await;
        let req = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = env.send(req).await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["queue_depth"], 0);
        assert_eq!(v["status_backend"], "sqlite");
    }

    #[tokio::test]
    async fn test_auth_required() {
        let env = EnvBuilder::new().build().await;
        let req = Request::builder()
            .uri("/api/chats")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = env.send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["error"].is_string());

        let req = Request::builder()
            .uri("/api/chats")
            .header("authorization", "Bearer vk_not_a_real_key")
            .body(Body::empty())
            .unwrap();
        assert_eq!(env.send(req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_key_of_deleted_user_is_404() {
        let env = EnvBuilder::new().build().await;
        env.state.db.delete_user("user-1").unwrap();
        let (status, body) = env.get_json("/api/chats").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "User not found");
    }

    #[tokio::test]
    async fn test_chat_streams_and_completes_new_chat() {
        let env = EnvBuilder::new().build().await;
        let (status, headers, body) = env
            .post_json(
                "/api/chat",
                json!({
                    "messages": [{"role": "user", "content": "Is cheating a crime in India?"}],
                    "isTemporary": false
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let streamed = String::from_utf8(body).unwrap();
        assert_eq!(streamed, "Under Section 420 IPC, cheating is punishable.");

        let task_id = task_id_of(&headers);
        let record = env.wait_terminal(&task_id).await;
        assert_eq!(record, TaskRecord::Completed(streamed.clone()));

        let (status, poll) = env.get_json(&format!("/api/chat/poll/{task_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(poll, json!({"status": "completed", "result": streamed}));
        // Stable across reads.
        let (_, again) = env.get_json(&format!("/api/chat/poll/{task_id}")).await;
        assert_eq!(again, poll);

        env.drain_queue().await;
        let (_, chats) = env.get_json("/api/chats").await;
        let chats = chats.as_array().unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0]["title"], "Is cheating a crime in India?");

        let chat_id = chats[0]["id"].as_str().unwrap();
        let (_, chat) = env.get_json(&format!("/api/chats/{chat_id}")).await;
        let messages = chat["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], streamed);
    }

    #[tokio::test]
    async fn test_poll_while_processing() {
        let mut slow = ScriptedLlm::new(&["a", "b", "c"]);
        slow.chunk_delay = Duration::from_millis(100);
        let env = EnvBuilder::new().llm(slow).build().await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", env.key))
            .body(Body::from(
                json!({"messages": [{"role": "user", "content": "hi"}], "isTemporary": true})
                    .to_string(),
            ))
            .unwrap();
        let resp = env.app.clone().oneshot(req).await.unwrap();
        let task_id = task_id_of(resp.headers());

        let (status, poll) = env.get_json(&format!("/api/chat/poll/{task_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(poll, json!({"status": "processing", "result": null}));

        // The consumer finishes even though the body is never read.
        drop(resp);
        let record = env.wait_terminal(&task_id).await;
        assert_eq!(record.result(), Some("abc"));
    }

    #[tokio::test]
    async fn test_poll_unknown_and_expired() {
        let env = EnvBuilder::new()
            .config(|c| c.task_ttl_secs = 1)
            .build()
            .await;
        let (status, body) = env.get_json("/api/chat/poll/does-not-exist").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"status": "not_found"}));

        let (_, headers, _) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}], "isTemporary": true}),
            )
            .await;
        let task_id = task_id_of(&headers);
        env.wait_terminal(&task_id).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let (status, body) = env.get_json(&format!("/api/chat/poll/{task_id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "not_found");
    }

    #[tokio::test]
    async fn test_poll_empty_id_is_400() {
        let env = EnvBuilder::new().build().await;
        let (status, _) = env.get_json("/api/chat/poll/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_temporary_chat_creates_nothing() {
        let env = EnvBuilder::new().build().await;
        let (status, headers, _) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}], "isTemporary": true}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        env.wait_terminal(&task_id_of(&headers)).await;
        env.drain_queue().await;
        let (_, chats) = env.get_json("/api/chats").await;
        assert_eq!(chats, json!([]));
        assert_eq!(env.state.db.queue_depth(MESSAGE_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_chat_validation() {
        let env = EnvBuilder::new().build().await;
        let (status, _, _) = env
            .post_json("/api/chat", json!({"messages": [], "isTemporary": false}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "  "}]}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_llm_key_is_500() {
        let env = EnvBuilder::new()
            .config(|c| c.api_key = String::new())
            .build()
            .await;
        let (status, _, body) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}]}),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["error"].as_str().unwrap().contains("API key"));
    }

    #[tokio::test]
    async fn test_existing_chat_rules() {
        let env = EnvBuilder::new().build().await;
        env.state.db.create_user("user-2", "Ravi").unwrap();
        env.state
            .db
            .create_chat("foreign", "user-2", "Ravi's chat")
            .unwrap();

        let (status, _, _) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}], "chatId": "missing"}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}], "chatId": "foreign"}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(env.state.db.count_messages("foreign").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_llm_open_failure_marks_failed() {
        let mut llm = ScriptedLlm::new(&[]);
        llm.fail_on_open = true;
        let env = EnvBuilder::new().llm(llm).build().await;
        let (status, headers, body) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}], "isTemporary": true}),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["error"].as_str().unwrap().contains("provider unavailable"));
        let task_id = task_id_of(&headers);
        let (_, poll) = env.get_json(&format!("/api/chat/poll/{task_id}")).await;
        assert_eq!(poll, json!({"status": "failed", "result": null}));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_marks_failed_and_skips_persistence() {
        let mut llm = ScriptedLlm::new(&["partial "]);
        llm.fail_after_chunks = true;
        let env = EnvBuilder::new().llm(llm).build().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", env.key))
            .body(Body::from(
                json!({"messages": [{"role": "user", "content": "hi"}]}).to_string(),
            ))
            .unwrap();
        let resp = env.app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let task_id = task_id_of(resp.headers());
        // The body is cut short with an error after the partial chunk.
        assert!(axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .is_err());

        let record = env.wait_terminal(&task_id).await;
        assert_eq!(record, TaskRecord::Failed);
        assert_eq!(env.state.db.queue_depth(MESSAGE_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_files_are_extracted_and_indexed() {
        let env = EnvBuilder::new()
            .extractor(FixedExtractor("Monthly rent is 10000 rupees per the lease"))
            .build()
            .await;
        let (status, headers, _) = env
            .post_json(
                "/api/chat",
                json!({
                    "messages": [{"role": "user", "content": "Can my landlord raise the rent?"}],
                    "files": [
                        {"url": "https://files/lease.pdf", "type": "application/pdf", "name": "lease.pdf", "fileId": "f-1"},
                        {"url": "https://files/a.mp3", "type": "audio/mpeg", "name": "a.mp3"}
                    ]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        env.wait_terminal(&task_id_of(&headers)).await;

        let docs = env.state.db.list_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_id, "f-1");
        assert_eq!(docs[0].file_name, "lease.pdf");

        let (_, chats) = env.get_json("/api/chats").await;
        let chat_id = chats[0]["id"].as_str().unwrap().to_string();
        let stored = env.state.db.get_chat_messages(&chat_id).unwrap();
        let files: serde_json::Value =
            serde_json::from_str(stored[0].files.as_deref().unwrap()).unwrap();
        assert_eq!(files[0]["fileId"], "f-1");
        assert_eq!(stored[0].content, "Can my landlord raise the rent?");
    }

    #[tokio::test]
    async fn test_prompt_carries_file_text_history_and_indexed_context() {
        let llm = ScriptedLlm::new(&["Noted."]);
        let prompts = llm.prompts.clone();
        let env = EnvBuilder::new()
            .llm(llm)
            .extractor(FixedExtractor("Monthly rent is 10000 rupees per the lease"))
            .build()
            .await;

        let (_, headers, _) = env
            .post_json(
                "/api/chat",
                json!({
                    "messages": [{"role": "user", "content": "Please read my lease."}],
                    "files": [{"url": "https://files/lease.pdf", "type": "application/pdf", "name": "lease.pdf", "fileId": "f-1"}],
                    "isTemporary": true
                }),
            )
            .await;
        env.wait_terminal(&task_id_of(&headers)).await;
        let first = prompts.lock().unwrap().last().cloned().unwrap();
        assert!(first.contains(
            "User: Please read my lease.\n\n\n\nContent from file \"lease.pdf\":\nMonthly rent is 10000 rupees per the lease"
        ));

        let (_, headers, _) = env
            .post_json(
                "/api/chat",
                json!({
                    "messages": [
                        {"role": "user", "content": "Please read my lease."},
                        {"role": "assistant", "content": "Noted."},
                        {"role": "user", "content": "What is the monthly rent in the lease?"}
                    ],
                    "isTemporary": true
                }),
            )
            .await;
        env.wait_terminal(&task_id_of(&headers)).await;
        let second = prompts.lock().unwrap().last().cloned().unwrap();
        assert!(second.contains("Current conversation:\nuser: Please read my lease.\nassistant: Noted.\n"));
        assert!(second.contains(
            "User: What is the monthly rent in the lease?\n\nRelevant Document Context:\nMonthly rent is 10000 rupees per the lease"
        ));
        assert!(!second.contains("Content from file"));
        assert!(second.ends_with("\nAI:"));
        assert_eq!(prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_backend_serves_polls() {
        let env = EnvBuilder::new()
            .config(|c| c.status_backend = StatusBackend::Memory)
            .build()
            .await;
        let (_, headers, _) = env
            .post_json(
                "/api/chat",
                json!({"messages": [{"role": "user", "content": "hi"}], "isTemporary": true}),
            )
            .await;
        let task_id = task_id_of(&headers);
        env.wait_terminal(&task_id).await;
        let (status, poll) = env.get_json(&format!("/api/chat/poll/{task_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(poll["status"], "completed");
    }

    #[tokio::test]
    async fn test_transcription_routes() {
        let env = EnvBuilder::new()
            .transcriber(FixedTranscriber(Err("Transcription failed".into())))
            .build()
            .await;
        let (status, _, body) = env
            .post_json("/api/transcribe", json!({"audioUrl": "https://files/a.mp3"}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let task_id = v["taskId"].as_str().unwrap().to_string();
        assert!(v["error"].is_string());

        let (status, body) = env
            .get_json(&format!("/api/transcribe?taskId={task_id}"))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "failed", "result": null}));

        let (status, body) = env.get_json("/api/transcribe?taskId=nope").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "not_found", "result": null}));
    }

    #[tokio::test]
    async fn test_transcription_success_and_validation() {
        let env = EnvBuilder::new()
            .transcriber(FixedTranscriber(Ok("namaste".into())))
            .build()
            .await;
        let (status, _, body) = env
            .post_json("/api/transcribe", json!({"audioUrl": "https://files/a.mp3"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["text"], "namaste");
        let task_id = v["taskId"].as_str().unwrap();
        let (_, body) = env
            .get_json(&format!("/api/transcribe?taskId={task_id}"))
            .await;
        assert_eq!(body, json!({"status": "completed", "result": "namaste"}));

        let (status, _, _) = env.post_json("/api/transcribe", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = env.get_json("/api/transcribe").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_transcribe_body_errors_are_json_400() {
        let env = EnvBuilder::new()
            .transcriber(FixedTranscriber(Ok("namaste".into())))
            .build()
            .await;
        let (status, _, body) = env
            .post_json("/api/transcribe", json!({"audioUrl": 5}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["error"].as_str().unwrap().starts_with("Invalid request body"));

        let req = Request::builder()
            .method("POST")
            .uri("/api/transcribe")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", env.key))
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = env.send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(v["error"].is_string());

        let req = Request::builder()
            .method("POST")
            .uri("/api/transcribe")
            .header("authorization", format!("Bearer {}", env.key))
            .body(Body::from(json!({"audioUrl": "https://files/a.mp3"}).to_string()))
            .unwrap();
        let (status, _, body) = env.send(req).await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["text"], "namaste");
    }

    #[tokio::test]
    async fn test_transcription_without_token_is_500() {
        let env = EnvBuilder::new().build().await;
        let (status, _, _) = env
            .post_json("/api/transcribe", json!({"audioUrl": "https://files/a.mp3"}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_mapping() {
        let e: ApiError = VidharaError::NotFound("Chat not found".into()).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
        let e: ApiError = VidharaError::Forbidden("nope".into()).into();
        assert_eq!(e.status(), StatusCode::FORBIDDEN);
        let e: ApiError = VidharaError::InvalidRequest("bad".into()).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        let e: ApiError = VidharaError::LlmApi("down".into()).into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
