//! HTTP surface tests: drive the router in-process against the memory
//! object store and the lexical reader.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{pdf_with_pages, zip_with};
use docqa::config::Config;
use docqa::server::{build_state_with_store, router, AppState};
use docqa::storage::{MemoryStore, ObjectStore};

const BOUNDARY: &str = "docqa-test-boundary";

struct TestApp {
    _tmp: TempDir,
    state: AppState,
    objects: Arc<MemoryStore>,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.server.upload_dir = tmp.path().join("uploads");
        tweak(&mut config);
        let objects = Arc::new(MemoryStore::new());
        let state = build_state_with_store(&config, objects.clone())
            .await
            .unwrap();
        Self {
            _tmp: tmp,
            state,
            objects,
        }
    }

    fn app(&self) -> Router {
        router(self.state.clone())
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let resp = self.app().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn json(&self, req: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = self.send(req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn upload(&self, filename: &str, bytes: &[u8], cookie: Option<&str>) -> (StatusCode, Value) {
        self.json(upload_request(filename, bytes, cookie)).await
    }
}

fn upload_request(filename: &str, bytes: &[u8], cookie: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn query_request(query: &str, ajax: bool, cookie: Option<&str>) -> Request<Body> {
    let encoded: String = query
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' => (b as char).to_string(),
            b' ' => "+".to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if ajax {
        builder = builder.header("X-Requested-With", "XMLHttpRequest");
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(format!("query={}", encoded)))
        .unwrap()
}

fn session_cookie(headers: &axum::http::HeaderMap) -> String {
    headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn health_reports_version() {
    let app = TestApp::new().await;
    let (status, body) = app.json(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn index_page_issues_session_cookie() {
    let app = TestApp::new().await;
    let (status, headers, body) = app.send(get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(session_cookie(&headers).starts_with("docqa_session="));
    assert!(String::from_utf8(body).unwrap().contains("<form"));
}

#[tokio::test]
async fn disallowed_upload_has_no_side_effects() {
    let app = TestApp::new().await;
    let (status, body) = app.upload("setup.exe", b"MZ", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "File not allowed");

    assert!(app.objects.list().await.unwrap().is_empty());
    assert!(app.state.documents.is_empty());
    let (_, files) = app.json(get("/list-files")).await;
    assert_eq!(files, serde_json::json!([]));
}

#[tokio::test]
async fn text_upload_round_trips_through_file_content() {
    let app = TestApp::new().await;
    let (status, body) = app.upload("hello.txt", b"hello world", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"success": true, "file_content": "hello world"}));

    let (status, files) = app.json(get("/list-files")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(files, serde_json::json!([{"key": "hello.txt"}]));

    let (status, body) = app.json(get("/file-content?key=hello.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"success": true, "content": ["hello world"]}));
}

#[tokio::test]
async fn upload_removes_local_copy() {
    let app = TestApp::new().await;
    let (status, _) = app.upload("notes.txt", b"some notes", None).await;
    assert_eq!(status, StatusCode::OK);
    let upload_dir = &app.state.config.server.upload_dir;
    let leftovers = std::fs::read_dir(upload_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn zip_entries_become_pages_in_archive_order() {
    let app = TestApp::new().await;
    let bytes = zip_with(&[
        ("second.txt", b"I am listed first".as_slice()),
        ("first.txt", b"I am listed second".as_slice()),
    ]);
    let (status, _) = app.upload("bundle.zip", &bytes, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.json(get("/file-content?key=bundle.zip")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["content"],
        serde_json::json!(["I am listed first", "I am listed second"])
    );
}

#[tokio::test]
async fn empty_zip_is_rejected() {
    let app = TestApp::new().await;
    let empty = zip_with(&[]);

    let (status, body) = app.upload("empty.zip", &empty, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, serde_json::json!({"success": false, "message": "ZIP file is empty"}));

    app.objects.insert("stored-empty.zip", empty);
    let (status, body) = app.json(get("/file-content?key=stored-empty.zip")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "ZIP file is empty");
}

#[tokio::test]
async fn multi_page_pdf_is_one_concatenated_page() {
    let app = TestApp::new().await;
    let pdf = pdf_with_pages(&["alpha page", "beta page"]);
    let (status, body) = app.upload("report.pdf", &pdf, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app.json(get("/file-content?key=report.pdf")).await;
    assert_eq!(status, StatusCode::OK);
    let pages = body["content"].as_array().unwrap();
    assert_eq!(pages.len(), 1);
    let text = pages[0].as_str().unwrap();
    let alpha = text.find("alpha page").unwrap();
    let beta = text.find("beta page").unwrap();
    assert!(alpha < beta);
}

#[tokio::test]
async fn file_content_validates_key() {
    let app = TestApp::new().await;
    let (status, body) = app.json(get("/file-content")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, serde_json::json!({"success": false, "message": "File key is required"}));

    let (status, body) = app.json(get("/file-content?key=")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "File key is required");

    let (status, body) = app.json(get("/file-content?key=missing.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn ajax_query_returns_prediction_and_preview() {
    let app = TestApp::new().await;
    let (_, headers, _) = app.send(get("/")).await;
    let cookie = session_cookie(&headers);

    let text = "Arya Stark is the daughter of Eddard Stark.\n\n\
                Winterfell is the seat of House Stark in the North.";
    let (status, _) = app
        .upload("stark.txt", text.as_bytes(), Some(&cookie))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(query_request("Who is the father of Arya?", true, Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file_content"], text);
    let prediction = &body["prediction"];
    assert_eq!(prediction["query"], "Who is the father of Arya?");
    let answers = prediction["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 1);
    assert!(answers[0]["answer"].as_str().unwrap().contains("Eddard"));
    assert_eq!(answers[0]["document"], "stark.txt");
    assert!(prediction["passages_considered"].as_u64().unwrap() <= 5);
}

#[tokio::test]
async fn reader_top_k_bounds_answers() {
    let app = TestApp::with_config(|c| c.retrieval.reader_top_k = 2).await;
    for i in 0..4 {
        let body = format!("Dragons number {i} live in Dragonstone.");
        app.upload(&format!("d{i}.txt"), body.as_bytes(), None).await;
    }
    let (status, body) = app.json(query_request("dragons", true, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"]["answers"].as_array().unwrap().len(), 2);
    assert_eq!(body["prediction"]["passages_considered"], 4);
}

#[tokio::test]
async fn empty_ajax_query_is_bad_request() {
    let app = TestApp::new().await;
    let (status, body) = app.json(query_request("   ", true, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn html_query_renders_answer() {
    let app = TestApp::new().await;
    app.upload(
        "castle.txt",
        b"Casterly Rock is the seat of House Lannister.",
        None,
    )
    .await;
    let (status, headers, body) = app
        .send(query_request("Casterly Rock", false, None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains("seat of House Lannister"));
    assert!(page.contains("castle.txt"));
}

#[tokio::test]
async fn seed_directories_are_indexed_at_startup() {
    let seed = TempDir::new().unwrap();
    std::fs::write(
        seed.path().join("got.txt"),
        "Jon Snow is the King in the North.",
    )
    .unwrap();
    std::fs::write(seed.path().join("ignored.exe"), "binary").unwrap();
    let seed_dir = seed.path().to_path_buf();
    let app = TestApp::with_config(move |c| c.index.seed_dirs = vec![seed_dir]).await;

    assert_eq!(app.state.documents.documents(), vec!["got.txt"]);
    let (status, body) = app.json(query_request("King in the North", true, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"]["answers"][0]["document"], "got.txt");
}

#[tokio::test]
async fn uploads_directory_is_served() {
    let app = TestApp::new().await;
    let dir = &app.state.config.server.upload_dir;
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("kept.txt"), "kept on disk").unwrap();

    let (status, _, body) = app.send(get("/uploads/kept.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"kept on disk");

    let (status, _, _) = app.send(get("/uploads/absent.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn question_text_is_not_expanded_as_a_placeholder() {
    let app = TestApp::new().await;
    let (_, headers, _) = app.send(get("/")).await;
    let cookie = session_cookie(&headers);
    app.upload("dragonglass.txt", b"Dragonglass kills white walkers.", Some(&cookie))
        .await;

    for query in ["{{file_content}}", "{{answers}}"] {
        let (status, _, body) = app.send(query_request(query, false, Some(&cookie))).await;
        assert_eq!(status, StatusCode::OK);
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains(&format!("value=\"{query}\"")), "{query}");
        assert!(!page.contains("value=\"Dragonglass"));
        assert!(page.contains("<pre id=\"file-content\">Dragonglass kills white walkers.</pre>"));
    }
}

#[tokio::test]
async fn cookieless_requests_do_not_grow_sessions_without_bound() {
    let app = TestApp::with_config(|c| c.server.max_sessions = 10).await;
    let (status, _) = app.upload("a.txt", b"alpha", None).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..200 {
        let (status, _, _) = app.send(get("/file-content?key=a.txt")).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(app.state.sessions.len(), 10);
}
