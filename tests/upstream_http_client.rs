use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use serde_json::{json, Value};

use coloring_bridge::config::UpstreamConfig;
use coloring_bridge::generation::upstream::UpstreamError;
use coloring_bridge::generation::{
    AspectRatio, HttpUpstreamClient, QualityHint, UpstreamClient, UpstreamDialect,
};

#[tokio::test]
async fn jobs_dialect_submits_with_bearer_auth_and_model_input() {
    let upstream = FakeUpstream::spawn(
        200,
        json!({"code": 200, "msg": "success", "data": {"taskId": "job-1"}}).to_string(),
    )
    .await;
    let client = client_for(&upstream.base, Some("secret-key"), UpstreamDialect::Jobs);

    let task_id = client
        .submit("draw a fox", AspectRatio::Landscape, QualityHint::High)
        .await
        .expect("submit should succeed");
    assert_eq!(task_id, "job-1");

    let seen = upstream.take_seen();
    assert_eq!(seen.len(), 1);
    let request = &seen[0];
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, "/api/v1/jobs/createTask");
    assert_eq!(request.authorization.as_deref(), Some("Bearer secret-key"));
    let body: Value = serde_json::from_str(request.body.as_str()).expect("body should be JSON");
    assert_eq!(body["model"], json!("test-model"));
    assert_eq!(body["input"]["prompt"], json!("draw a fox"));
    assert_eq!(body["input"]["aspect_ratio"], json!("3:2"));
    assert_eq!(body["input"]["quality"], json!("high"));
}

#[tokio::test]
async fn jobs_dialect_queries_record_info_by_task_id() {
    let upstream = FakeUpstream::spawn(
        200,
        json!({
            "code": 200,
            "msg": "success",
            "data": {"taskId": "job-1", "state": "waiting"}
        })
        .to_string(),
    )
    .await;
    let client = client_for(&upstream.base, Some("secret-key"), UpstreamDialect::Jobs);

    let envelope = client
        .query_status("job-1")
        .await
        .expect("query should succeed");
    assert_eq!(envelope.code, 200);
    assert_eq!(envelope.payload["state"], json!("waiting"));

    let seen = upstream.take_seen();
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(seen[0].path, "/api/v1/jobs/recordInfo");
    assert_eq!(seen[0].query.as_deref(), Some("taskId=job-1"));
    assert_eq!(seen[0].cache_control.as_deref(), Some("no-store"));
}

#[tokio::test]
async fn gpt4o_dialect_uses_its_own_paths_and_body() {
    let upstream = FakeUpstream::spawn(
        200,
        json!({"code": 200, "data": {"taskId": "img-7"}}).to_string(),
    )
    .await;
    let client = client_for(&upstream.base, Some("secret-key"), UpstreamDialect::Gpt4oImage);

    let task_id = client
        .submit("draw a fox", AspectRatio::Square, QualityHint::Medium)
        .await
        .expect("submit should succeed");
    assert_eq!(task_id, "img-7");
    client
        .query_status("img-7")
        .await
        .expect("query should succeed");

    let seen = upstream.take_seen();
    assert_eq!(seen[0].path, "/api/v1/gpt4o-image/generate");
    let body: Value = serde_json::from_str(seen[0].body.as_str()).expect("body should be JSON");
    assert_eq!(body, json!({"prompt": "draw a fox", "size": "1:1", "nVariants": 1}));
    assert_eq!(seen[1].path, "/api/v1/gpt4o-image/record-info");
    assert_eq!(seen[1].query.as_deref(), Some("taskId=img-7"));
}

#[tokio::test]
async fn non_2xx_status_is_an_http_error() {
    let upstream = FakeUpstream::spawn(500, String::from("internal failure")).await;
    let client = client_for(&upstream.base, Some("secret-key"), UpstreamDialect::Jobs);

    let err = client
        .submit("dog", AspectRatio::Portrait, QualityHint::Medium)
        .await
        .expect_err("http 500 should fail");
    match err {
        UpstreamError::HttpStatus { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "internal failure");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn envelope_code_other_than_200_is_rejected() {
    let upstream = FakeUpstream::spawn(
        200,
        json!({"code": 401, "msg": "invalid key"}).to_string(),
    )
    .await;
    let client = client_for(&upstream.base, Some("wrong"), UpstreamDialect::Jobs);

    let err = client
        .query_status("job-1")
        .await
        .expect_err("code 401 should fail");
    assert!(matches!(
        err,
        UpstreamError::Rejected { code: 401, ref message, .. } if message == "invalid key"
    ));
    assert_eq!(err.detail()["msg"], json!("invalid key"));
}

#[tokio::test]
async fn malformed_body_and_missing_task_id_are_distinct_errors() {
    let upstream = FakeUpstream::spawn(200, String::from("<html>gateway</html>")).await;
    let client = client_for(&upstream.base, Some("secret-key"), UpstreamDialect::Jobs);
    let err = client
        .submit("dog", AspectRatio::Portrait, QualityHint::Medium)
        .await
        .expect_err("html should fail");
    assert!(matches!(err, UpstreamError::MalformedBody { status: 200, .. }));

    let upstream = FakeUpstream::spawn(
        200,
        json!({"code": 200, "data": {}}).to_string(),
    )
    .await;
    let client = client_for(&upstream.base, Some("secret-key"), UpstreamDialect::Jobs);
    let err = client
        .submit("dog", AspectRatio::Portrait, QualityHint::Medium)
        .await
        .expect_err("missing task id should fail");
    assert!(matches!(err, UpstreamError::MissingTaskId { .. }));
}

#[tokio::test]
async fn missing_credential_fails_before_any_request() {
    let upstream = FakeUpstream::spawn(
        200,
        json!({"code": 200, "data": {"taskId": "x"}}).to_string(),
    )
    .await;
    let client = client_for(&upstream.base, None, UpstreamDialect::Jobs);

    let err = client
        .submit("dog", AspectRatio::Portrait, QualityHint::Medium)
        .await
        .expect_err("missing key should fail");
    assert!(err.is_configuration());
    let err = client
        .query_status("x")
        .await
        .expect_err("missing key should fail");
    assert!(err.is_configuration());
    assert!(upstream.take_seen().is_empty());
}

#[derive(Debug, Clone)]
struct SeenRequest {
    method: Method,
    path: String,
    query: Option<String>,
    authorization: Option<String>,
    cache_control: Option<String>,
    body: String,
}

#[derive(Clone)]
struct FakeState {
    status: StatusCode,
    reply: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

struct FakeUpstream {
    base: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl FakeUpstream {
    async fn spawn(status: u16, reply: String) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = FakeState {
            status: StatusCode::from_u16(status).expect("status should be valid"),
            reply,
            seen: seen.clone(),
        };
        let app = Router::new().fallback(record_and_reply).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("fake upstream should bind");
        let addr = listener
            .local_addr()
            .expect("fake upstream should have an address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base: format!("http://{addr}"),
            seen,
        }
    }

    fn take_seen(&self) -> Vec<SeenRequest> {
        std::mem::take(&mut *self.seen.lock().expect("fake mutex poisoned"))
    }
}

async fn record_and_reply(
    State(state): State<FakeState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    state
        .seen
        .lock()
        .expect("fake mutex poisoned")
        .push(SeenRequest {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            authorization: header("authorization"),
            cache_control: header("cache-control"),
            body,
        });
    (state.status, state.reply.clone())
}

fn client_for(base: &str, api_key: Option<&str>, dialect: UpstreamDialect) -> HttpUpstreamClient {
    HttpUpstreamClient::new(&UpstreamConfig {
        api_base: base.to_string(),
        api_key: api_key.map(str::to_string),
        dialect,
        model: String::from("test-model"),
        request_timeout: Duration::from_secs(5),
    })
    .expect("client should build")
}
