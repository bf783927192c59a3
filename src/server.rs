//! Web front end.
//!
//! Serves the question-answering page and its JSON endpoints. All
//! long-lived components are built once by [`build_state`] and shared with
//! handlers through [`AppState`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | HTML page with the session's file preview |
//! | `POST` | `/` | Ask a question (form field `query`); JSON when `X-Requested-With: XMLHttpRequest` |
//! | `POST` | `/upload` | Multipart upload (field `file`): store, index, preview |
//! | `GET`  | `/list-files` | Keys in the object store |
//! | `GET`  | `/file-content?key=` | Extracted pages of a stored file |
//! | `GET`  | `/uploads/{*path}` | Static files in the local upload directory |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! JSON endpoints report failures as:
//!
//! ```json
//! { "success": false, "message": "File not allowed" }
//! ```
//!
//! with `400` for client mistakes, `404` for unknown keys, and `500` for
//! storage, indexing, or reader failures.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::extract::{self, ExtractError};
use crate::index::{DocumentStore, Indexer};
use crate::models::{DocumentKind, Prediction};
use crate::pipeline::{ExtractiveQaPipeline, QueryError, QueryParams};
use crate::reader::create_reader;
use crate::retriever::Bm25Retriever;
use crate::session::{Preview, SessionId, SessionStore};
use crate::storage::{create_store, ObjectStore, StorageError};
use crate::upload::{UploadError, UploadService};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub documents: Arc<DocumentStore>,
    pub store: Arc<dyn ObjectStore>,
    pub pipeline: Arc<ExtractiveQaPipeline>,
    pub uploads: Arc<UploadService>,
    pub sessions: Arc<SessionStore>,
}

/// Builds the application state, using the object store named in the config.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let store = create_store(&config.storage)?;
    build_state_with_store(config, store).await
}

/// Builds the application state around an existing object store.
///
/// Every directory in `index.seed_dirs` is indexed before this returns.
pub async fn build_state_with_store(
    config: &Config,
    store: Arc<dyn ObjectStore>,
) -> anyhow::Result<AppState> {
    let config = Arc::new(config.clone());
    let documents = Arc::new(DocumentStore::new());
    let indexer = Arc::new(Indexer::new(documents.clone(), config.index.passage_tokens));

    for dir in &config.index.seed_dirs {
        let indexer = indexer.clone();
        let path = dir.clone();
        let stats = tokio::task::spawn_blocking(move || indexer.ingest_dir(&path)).await??;
        tracing::info!(
            dir = %dir.display(),
            documents = stats.documents,
            passages = stats.passages,
            "indexed seed directory"
        );
    }

    let reader = create_reader(&config.reader, documents.clone())?;
    let retriever = Bm25Retriever::from_config(documents.clone(), &config.retrieval);
    let pipeline = Arc::new(ExtractiveQaPipeline::new(retriever, reader));
    let uploads = Arc::new(UploadService::new(
        store.clone(),
        indexer,
        config.server.upload_dir.clone(),
    ));

    Ok(AppState {
        config: config.clone(),
        documents,
        store,
        pipeline,
        uploads,
        sessions: Arc::new(SessionStore::with_capacity(config.server.max_sessions)),
    })
}

/// Assembles the router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = state.config.server.max_upload_bytes;
    let upload_dir = state.config.server.upload_dir.clone();

    Router::new()
        .route("/", get(handle_index).post(handle_query))
        .route(
            "/upload",
            axum::routing::post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/list-files", get(handle_list_files))
        .route("/file-content", get(handle_file_content))
        .route("/health", get(handle_health))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    tracing::info!(
        store = state.store.container(),
        passages = state.documents.len(),
        "application state ready"
    );

    let bind_addr = config.server.bind.clone();
    let app = router(state);

    tracing::info!("docqa listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

/// Failure returned by a JSON handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "request failed");
        } else {
            tracing::debug!(status = %self.status, message = %self.message, "request rejected");
        }
        let body = ErrorBody {
            success: false,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::not_found(err.to_string()),
            StorageError::InvalidKey(_) => Self::bad_request(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

/// Attaches the `Set-Cookie` header for freshly minted sessions.
fn with_session(session: &SessionId, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Some((name, value)) = session.set_cookie() {
        response.headers_mut().append(name, value);
    }
    response
}

fn is_ajax(headers: &HeaderMap) -> bool {
    headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
}

fn session_preview(state: &AppState, session: &SessionId) -> Preview {
    state.sessions.preview(&session.id).unwrap_or_default()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET / and POST / ============

#[derive(Debug, Deserialize)]
struct QueryForm {
    #[serde(default)]
    query: String,
}

#[derive(Serialize)]
struct QueryResponse {
    prediction: Prediction,
    file_content: String,
}

async fn handle_index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = SessionId::from_headers(&headers);
    let page = render_page(&session_preview(&state, &session), None, None);
    with_session(&session, Html(page))
}

/// Runs the pipeline for the submitted question.
///
/// AJAX callers get `{prediction, file_content}`; browsers get the page
/// with the answer panel filled in.
async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<QueryForm>,
) -> Response {
    let session = SessionId::from_headers(&headers);
    let preview = session_preview(&state, &session);
    let ajax = is_ajax(&headers);

    if form.query.trim().is_empty() {
        if ajax {
            return with_session(&session, ApiError::from(QueryError::EmptyQuery));
        }
        return with_session(&session, Html(render_page(&preview, None, None)));
    }

    let params = QueryParams::from(&state.config.retrieval);
    let result = state.pipeline.run(&form.query, params).await;

    match (result, ajax) {
        (Ok(prediction), true) => with_session(
            &session,
            Json(QueryResponse {
                prediction,
                file_content: preview.content,
            }),
        ),
        (Ok(prediction), false) => with_session(
            &session,
            Html(render_page(&preview, Some(&prediction), None)),
        ),
        (Err(e), true) => with_session(&session, ApiError::from(e)),
        (Err(e), false) => {
            tracing::error!(error = %e, "query failed");
            let status = if e.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let page = render_page(&preview, None, Some(&e.to_string()));
            with_session(&session, (status, Html(page)))
        }
    }
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    file_content: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let session = SessionId::from_headers(&headers);
    let result = upload_from_multipart(&state, &session, &mut multipart).await;
    match result {
        Ok(body) => with_session(&session, Json(body)),
        Err(e) => with_session(&session, e),
    }
}

async fn upload_from_multipart(
    state: &AppState,
    session: &SessionId,
    multipart: &mut Multipart,
) -> Result<UploadResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?;
        tracing::info!(filename = %filename, bytes = data.len(), "received upload");

        let outcome = state.uploads.upload(&filename, &data).await?;
        state.sessions.set_preview(
            &session.id,
            Preview {
                key: outcome.key,
                content: outcome.preview.clone(),
            },
        );
        return Ok(UploadResponse {
            success: true,
            file_content: outcome.preview,
        });
    }
    Err(UploadError::MissingFile.into())
}

// ============ GET /list-files ============

#[derive(Serialize)]
struct FileEntry {
    key: String,
}

async fn handle_list_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let keys = state.store.list().await?;
    Ok(Json(keys.into_iter().map(|key| FileEntry { key }).collect()))
}

// ============ GET /file-content ============

#[derive(Debug, Deserialize)]
struct FileContentQuery {
    key: Option<String>,
}

#[derive(Serialize)]
struct FileContentResponse {
    success: bool,
    content: Vec<String>,
}

async fn handle_file_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FileContentQuery>,
) -> Response {
    let session = SessionId::from_headers(&headers);
    match file_pages(&state, query.key.as_deref().unwrap_or("")).await {
        Ok((key, pages)) => {
            state.sessions.set_preview(
                &session.id,
                Preview {
                    key,
                    content: pages.join("\n\n"),
                },
            );
            with_session(
                &session,
                Json(FileContentResponse {
                    success: true,
                    content: pages,
                }),
            )
        }
        Err(e) => with_session(&session, e),
    }
}

async fn file_pages(state: &AppState, key: &str) -> Result<(String, Vec<String>), ApiError> {
    if key.is_empty() {
        return Err(ApiError::bad_request("File key is required"));
    }
    tracing::info!(key, "fetching file content");
    let bytes = state.store.get(key).await?;

    let owned_key = key.to_string();
    let pages = tokio::task::spawn_blocking(move || {
        extract::extract_pages(&owned_key, DocumentKind::for_key(&owned_key), &bytes)
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))??;

    Ok((key.to_string(), pages))
}

// ============ HTML ============

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_answers(prediction: &Prediction) -> String {
    if prediction.answers.is_empty() {
        return "<p class=\"empty\">No answer found.</p>".to_string();
    }
    prediction
        .answers
        .iter()
        .map(|a| {
            format!(
                "<div class=\"answer\"><p><strong>{}</strong> <span class=\"score\">({:.3})</span></p>\
                 <p class=\"context\">{}</p><p class=\"source\">{}</p></div>",
                escape_html(&a.answer),
                a.score,
                escape_html(&a.context),
                escape_html(&a.document)
            )
        })
        .collect()
}

/// Substitutes `{{name}}` placeholders in a single left-to-right pass.
///
/// Substituted values are never scanned again, so a value that itself
/// contains `{{...}}` is emitted as is. Unknown names are left in place.
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match vars.iter().find(|(k, _)| *k == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn render_page(preview: &Preview, prediction: Option<&Prediction>, error: Option<&str>) -> String {
    let query = prediction.map(|p| p.query.as_str()).unwrap_or("");
    let mut answers = String::new();
    if let Some(error) = error {
        answers.push_str(&format!("<p class=\"error\">{}</p>", escape_html(error)));
    }
    if let Some(prediction) = prediction {
        answers.push_str(&render_answers(prediction));
    }
    let query = escape_html(query);
    let key = escape_html(&preview.key);
    let content = escape_html(&preview.content);
    render_template(
        PAGE_TEMPLATE,
        &[
            ("query", query.as_str()),
            ("answers", answers.as_str()),
            ("preview_key", key.as_str()),
            ("file_content", content.as_str()),
        ],
    )
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>docqa</title>
<style>
body { font-family: sans-serif; margin: 2rem; display: grid; grid-template-columns: 1fr 1fr; gap: 2rem; }
pre { white-space: pre-wrap; background: #f6f6f6; padding: 1rem; max-height: 70vh; overflow: auto; }
.score, .source { color: #666; font-size: 0.9em; }
.error { color: #b00; }
</style>
</head>
<body>
<section>
<h1>Ask your documents</h1>
<form id="query-form" method="post" action="/">
<input type="text" name="query" value="{{query}}" placeholder="Ask a question" size="50">
<button type="submit">Ask</button>
</form>
<div id="answers">{{answers}}</div>
<h2>Upload</h2>
<form id="upload-form" method="post" action="/upload" enctype="multipart/form-data">
<input type="file" name="file" accept=".txt,.pdf,.zip">
<button type="submit">Upload</button>
</form>
<p id="upload-status"></p>
<h2>Stored files</h2>
<ul id="files"></ul>
</section>
<section>
<h2>Preview</h2>
<p id="preview-key" class="source">{{preview_key}}</p>
<pre id="file-content">{{file_content}}</pre>
</section>
<script>
const preview = document.getElementById('file-content');
const previewKey = document.getElementById('preview-key');
const escape = (s) => s.replace(/[&<>"']/g, (c) => ({'&':'&amp;','<':'&lt;','>':'&gt;','"':'&quot;',"'":'&#x27;'}[c]));

async function loadFiles() {
  const res = await fetch('/list-files');
  const files = await res.json();
  const list = document.getElementById('files');
  list.innerHTML = '';
  if (!Array.isArray(files)) return;
  for (const f of files) {
    const li = document.createElement('li');
    const a = document.createElement('a');
    a.href = '#';
    a.textContent = f.key;
    a.onclick = async (e) => {
      e.preventDefault();
      const r = await (await fetch('/file-content?key=' + encodeURIComponent(f.key))).json();
      preview.textContent = r.success ? r.content.join('\n\n') : r.message;
      if (r.success) previewKey.textContent = f.key;
    };
    li.appendChild(a);
    list.appendChild(li);
  }
}

document.getElementById('upload-form').onsubmit = async (e) => {
  e.preventDefault();
  const status = document.getElementById('upload-status');
  status.textContent = 'Uploading...';
  const r = await (await fetch('/upload', { method: 'POST', body: new FormData(e.target) })).json();
  if (r.success) {
    status.textContent = 'Uploaded and indexed.';
    preview.textContent = r.file_content;
    previewKey.textContent = '';
    loadFiles();
  } else {
    status.textContent = r.message;
  }
};

document.getElementById('query-form').onsubmit = async (e) => {
  e.preventDefault();
  const body = new URLSearchParams(new FormData(e.target));
  const res = await fetch('/', { method: 'POST', body, headers: { 'X-Requested-With': 'XMLHttpRequest' } });
  const r = await res.json();
  const out = document.getElementById('answers');
  if (r.prediction === undefined) {
    out.innerHTML = '<p class="error">' + escape(r.message || 'Request failed') + '</p>';
    return;
  }
  if (r.prediction.answers.length === 0) {
    out.innerHTML = '<p class="empty">No answer found.</p>';
    return;
  }
  out.innerHTML = r.prediction.answers.map((a) =>
    '<div class="answer"><p><strong>' + escape(a.answer) + '</strong> <span class="score">(' +
    a.score.toFixed(3) + ')</span></p><p class="context">' + escape(a.context) +
    '</p><p class="source">' + escape(a.document) + '</p></div>').join('');
};

loadFiles();
</script>
</body>
</html>
"#;
