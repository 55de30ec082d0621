//! HTTP route handlers for the conversation API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::errors::EngineError;
use crate::core::ids::{ConversationId, MessageId, ProjectId, UserId};
use crate::core::model::{Conversation, Message, Project};
use crate::engine::fork::{ForkPreview, ForkRequest, SelectedText};
use crate::engine::merge::{MergeOutcome, MergePreview};
use crate::engine::project::{MessageView, ProjectCreated};
use crate::engine::streaming::StreamEvent;
use crate::engine::tree::BranchTree;

use super::state::AppState;

/// Header carrying the requesting user's id.
pub const USER_HEADER: &str = "x-user-id";

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{id}/root", get(get_root_conversation))
        .route("/api/projects/{id}/tree", get(get_tree))
        .route("/api/chats/{id}", get(get_conversation))
        .route("/api/chats/{id}/messages", get(get_messages))
        .route("/api/chats/{id}/message", post(send_message))
        .route("/api/chats/{id}/stream", get(stream_first))
        .route("/api/chats/{id}/messages/stream", get(stream_next))
        .route("/api/chats/{id}/fork/preview", post(fork_preview))
        .route("/api/chats/{id}/fork", post(fork))
        .route("/api/chats/{id}/merge/preview", post(merge_preview))
        .route("/api/chats/{id}/merge", post(merge))
        .route("/api/chats/{id}/close", post(close_conversation))
        .route("/api/chats/{id}/open", post(open_conversation))
        .with_state(state)
}

/// Error returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Engine failure, mapped by its category.
    Engine(EngineError),
    /// Missing or malformed user header.
    Unauthorized(String),
    /// A generation is already running for the conversation.
    Busy(ConversationId),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Engine(err) => {
                let status = match &err {
                    EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                    EngineError::InvalidState(_) => StatusCode::CONFLICT,
                    EngineError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if !err.is_client_error() {
                    warn!(error = %err, "request failed");
                }
                (status, err.to_string())
            }
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Busy(id) => (
                StatusCode::CONFLICT,
                format!("a response is already being generated for conversation {id}"),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Requesting user, read from the `X-User-Id` header.
#[derive(Clone, Copy, Debug)]
pub struct RequestUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for RequestUser {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let header = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        async move {
            let raw = header
                .ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".to_string()))?;
            raw.parse::<UserId>()
                .map(Self)
                .map_err(|_| ApiError::Unauthorized("invalid X-User-Id header".to_string()))
        }
    }
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "forkline",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Project creation request.
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    /// First user message; also becomes the project title.
    pub message: String,
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    RequestUser(user_id): RequestUser,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<ProjectCreated>)> {
    let created = state
        .engine
        .projects()
        .create_project(user_id, &request.message)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    RequestUser(user_id): RequestUser,
) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.engine.projects().list_projects(user_id).await?))
}

async fn get_root_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.projects().get_root_conversation(id).await?))
}

async fn get_tree(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProjectId>,
) -> ApiResult<Json<BranchTree>> {
    Ok(Json(state.engine.tree().build_tree(id).await?))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.projects().get_conversation(id).await?))
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Vec<MessageView>>> {
    Ok(Json(state.engine.projects().get_messages(id).await?))
}

/// User message request.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Message text.
    pub content: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    if state.is_generating(id) {
        return Err(ApiError::Busy(id));
    }
    let message = state
        .engine
        .projects()
        .send_message(id, &request.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Clone, Copy, Debug)]
enum Turn {
    First,
    Next,
}

type SseFrames = BoxStream<'static, Result<Event, Infallible>>;

async fn stream_first(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Sse<SseFrames>> {
    start_stream(state, id, Turn::First).await
}

async fn stream_next(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Sse<SseFrames>> {
    start_stream(state, id, Turn::Next).await
}

async fn start_stream(
    state: Arc<AppState>,
    id: ConversationId,
    turn: Turn,
) -> ApiResult<Sse<SseFrames>> {
    state.engine.projects().get_conversation(id).await?;
    let guard = state.begin_generation(id).ok_or(ApiError::Busy(id))?;
    let (sink, rx) = state.engine.chunk_channel();

    let producer = Arc::clone(&state);
    tokio::spawn(async move {
        let _guard = guard;
        let responses = producer.engine.responses();
        let result = match turn {
            Turn::First => responses.generate_first(id, sink).await,
            Turn::Next => responses.generate_next(id, sink).await,
        };
        if let Err(err) = result {
            debug!(conversation_id = %id, error = %err, "streamed generation failed");
        }
    });

    Ok(Sse::new(sse_frames(rx)))
}

/// Map engine events to SSE frames, closing with a `done` frame unless an
/// error frame was sent.
fn sse_frames(rx: mpsc::Receiver<StreamEvent>) -> SseFrames {
    stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        let (frame, next) = match rx.recv().await {
            Some(StreamEvent::Chunk(chunk)) => {
                (json!({ "status": "processing", "chunk": chunk }), Some(rx))
            }
            Some(StreamEvent::Error(message)) => {
                (json!({ "status": "error", "message": message }), None)
            }
            None => (json!({ "status": "done" }), None),
        };
        Some((Ok(Event::default().data(frame.to_string())), next))
    })
    .boxed()
}

/// Fork preview request.
#[derive(Debug, Deserialize)]
pub struct ForkPreviewRequest {
    /// Message the selection was made in.
    pub target_message_id: MessageId,
    /// The selection.
    pub selected_text: SelectedText,
}

async fn fork_preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<ForkPreviewRequest>,
) -> ApiResult<Json<ForkPreview>> {
    let preview = state
        .engine
        .forks()
        .generate_fork_preview(id, request.target_message_id, &request.selected_text)
        .await?;
    Ok(Json(preview))
}

/// Fork creation response.
#[derive(Debug, Serialize)]
pub struct ForkResponse {
    /// The new child conversation.
    pub conversation_id: ConversationId,
}

async fn fork(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<ForkRequest>,
) -> ApiResult<(StatusCode, Json<ForkResponse>)> {
    let conversation_id = state.engine.forks().fork(id, request).await?;
    Ok((StatusCode::CREATED, Json(ForkResponse { conversation_id })))
}

async fn merge_preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<MergePreview>> {
    Ok(Json(state.engine.merges().get_merge_preview(id).await?))
}

/// Merge request.
#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    /// Conversation the child was forked from.
    pub parent_id: ConversationId,
    /// Report text written into the parent.
    pub summary_content: String,
}

async fn merge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Json<MergeOutcome>> {
    let outcome = state
        .engine
        .merges()
        .merge(id, request.parent_id, request.summary_content)
        .await?;
    Ok(Json(outcome))
}

async fn close_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<StatusCode> {
    state.engine.projects().close_conversation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn open_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<StatusCode> {
    state.engine.projects().open_conversation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{EngineConfig, QueueConfig};
    use crate::engine::core::{ChatEngine, EngineBackends};
    use crate::generation::client::scripted::{ScriptedGenerator, StreamScript};
    use crate::queue::sqlite_queue::SqliteTaskQueue;
    use crate::storage::sqlite_store::SqliteConversationStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app(generator: ScriptedGenerator) -> Router {
        let backends = EngineBackends {
            store: Arc::new(SqliteConversationStore::open_in_memory().await.unwrap()),
            generator: Arc::new(generator),
            queue: Arc::new(
                SqliteTaskQueue::open_in_memory(&QueueConfig::default())
                    .await
                    .unwrap(),
            ),
        };
        let engine = ChatEngine::new(EngineConfig::default(), backends).unwrap();
        create_router(AppState::new(engine))
    }

    fn post_json(uri: &str, user: Option<UserId>, body: &serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user.to_string());
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(app: &Router, user: UserId) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(post_json("/api/projects", Some(user), &json!({ "message": "hello" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app(ScriptedGenerator::new())
            .await
            .oneshot(get("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn projects_require_user_header() {
        let app = app(ScriptedGenerator::new()).await;
        let response = app
            .clone()
            .oneshot(post_json("/api/projects", None, &json!({ "message": "hello" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let user = UserId::new();
        let created = create(&app, user).await;
        let project_id = created["project"]["id"].as_str().unwrap().to_string();

        let list = Request::builder()
            .uri("/api/projects")
            .header(USER_HEADER, user.to_string())
            .body(Body::empty())
            .unwrap();
        let projects = body_json(app.clone().oneshot(list).await.unwrap()).await;
        assert_eq!(projects.as_array().unwrap().len(), 1);

        let root = app
            .oneshot(get(&format!("/api/projects/{project_id}/root")))
            .await
            .unwrap();
        assert_eq!(root.status(), StatusCode::OK);
        assert_eq!(body_json(root).await["id"], created["conversation"]["id"]);
    }

    #[tokio::test]
    async fn engine_errors_map_to_status_codes() {
        let app = app(ScriptedGenerator::new()).await;
        let missing = app
            .clone()
            .oneshot(get(&format!("/api/chats/{}", ConversationId::new())))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let created = create(&app, UserId::new()).await;
        let chat = created["conversation"]["id"].as_str().unwrap().to_string();
        let merge = app
            .clone()
            .oneshot(post_json(
                &format!("/api/chats/{chat}/merge"),
                None,
                &json!({ "parent_id": chat, "summary_content": "x" }),
            ))
            .await
            .unwrap();
        assert_eq!(merge.status(), StatusCode::CONFLICT);

        let blank = app
            .oneshot(post_json(
                &format!("/api/chats/{chat}/message"),
                None,
                &json!({ "content": "  " }),
            ))
            .await
            .unwrap();
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn first_response_streams_as_sse() {
        let generator = ScriptedGenerator::new().stream(StreamScript::Chunks(vec![
            "Hel".to_string(),
            "lo".to_string(),
        ]));
        let app = app(generator).await;
        let created = create(&app, UserId::new()).await;
        let chat = created["conversation"]["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get(&format!("/api/chats/{chat}/stream")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains(r#""chunk":"Hel""#));
        assert!(body.contains(r#""status":"processing""#));
        assert!(body.contains(r#"{"status":"done"}"#));

        let messages = body_json(
            app.oneshot(get(&format!("/api/chats/{chat}/messages")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(messages.as_array().unwrap().len(), 2);
        assert_eq!(messages[1]["content"], "Hello");
    }

    #[tokio::test]
    async fn failed_stream_sends_error_frame() {
        let app = app(ScriptedGenerator::new().stream(StreamScript::Refuse)).await;
        let created = create(&app, UserId::new()).await;
        let chat = created["conversation"]["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(get(&format!("/api/chats/{chat}/stream")))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains(r#""status":"error""#));
        assert!(!body.contains(r#""status":"done""#));
    }
}
