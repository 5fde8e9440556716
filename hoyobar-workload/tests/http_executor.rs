//! HTTP executor tests against an in-process stub server.
//!
//! Each test binds a stub on an ephemeral port, so they run in parallel
//! without a forum server.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use hoyobar_core::{PostId, PostRecord, UserId, UserRecord};
use hoyobar_workload::{
    verify_ordering, ApiExecutor, Endpoint, ExecutorError, FailureKind, Fields, HttpExecutor, ListOrder,
    PostListFetcher, RequestDescriptor, Violation, AUTH_HEADER,
};

/// Serves `router` on an ephemeral port and returns the API base URL.
async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/api")
}

fn executor(base_url: &str, timeout: Duration) -> HttpExecutor {
    HttpExecutor::builder()
        .base_url(base_url)
        .request_timeout(timeout)
        .connect_timeout(Duration::from_secs(1))
        .build()
        .unwrap()
}

fn payload(value: Value) -> Fields {
    match value {
        Value::Object(fields) => fields,
        other => panic!("not an object: {other}"),
    }
}

fn register_descriptor() -> RequestDescriptor {
    RequestDescriptor::new(
        0,
        Endpoint::Register,
        payload(json!({
            "username": "1870000000",
            "password": "p@ssw0rd",
            "vcode": "0000",
            "nickname": "zzxn_0",
        })),
    )
}

async fn register_ok(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "ecode": "0",
        "user_id": "17",
        "username": body["username"],
        "nickname": body["nickname"],
        "auth_token": "tok-17",
    }))
}

#[tokio::test]
async fn test_register_success_decodes_string_ids() {
    let base = spawn_stub(Router::new().route("/api/user/register", post(register_ok))).await;
    let executor = executor(&base, Duration::from_secs(2));

    let descriptor = register_descriptor();
    let body = executor.execute(&descriptor).await.unwrap();
    let user: UserRecord = descriptor.merge_response(&body).unwrap();

    assert_eq!(user.user_id, UserId::new(17));
    assert_eq!(user.username, "1870000000");
    assert_eq!(user.nickname, "zzxn_0");
    assert_eq!(user.auth_token, "tok-17");
}

#[tokio::test]
async fn test_error_status_is_application_failure() {
    async fn exists() -> (StatusCode, Json<Value>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ecode": "3001", "emsg": "username already exists"})),
        )
    }
    let base = spawn_stub(Router::new().route("/api/user/register", post(exists))).await;
    let executor = executor(&base, Duration::from_secs(2));

    let err = executor.execute(&register_descriptor()).await.unwrap_err();
    assert_eq!(err, ExecutorError::application(500, "3001", "username already exists"));
    assert_eq!(err.kind(), FailureKind::Application);
}

#[tokio::test]
async fn test_no_more_entries_code() {
    async fn exhausted() -> Json<Value> {
        Json(json!({"ecode": "3004", "emsg": "no more entries"}))
    }
    let base = spawn_stub(Router::new().route("/api/post/list", get(exhausted))).await;
    let executor = executor(&base, Duration::from_secs(2));

    let descriptor = RequestDescriptor::new(0, Endpoint::PostList, payload(json!({"cursor": ""})));
    let err = executor.execute(&descriptor).await.unwrap_err();
    assert!(err.is_no_more_entries());
}

#[tokio::test]
async fn test_auth_header_and_json_body_sent() {
    async fn create(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let auth = headers.get("auth").and_then(|v| v.to_str().ok()).unwrap_or_default();
        if auth != "tok-5" || body["title"] != "hello" {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ecode": "2001", "emsg": "unauthorized"})),
            );
        }
        (StatusCode::OK, Json(json!({"post_id": "900"})))
    }
    let base = spawn_stub(Router::new().route("/api/post/create", post(create))).await;
    let executor = executor(&base, Duration::from_secs(2));

    let descriptor = RequestDescriptor::new(
        3,
        Endpoint::CreatePost,
        payload(json!({"author_id": "5", "title": "hello", "content": "world"})),
    )
    .with_auth("tok-5");
    assert_eq!(descriptor.auth_token(), Some("tok-5"));
    assert_eq!(AUTH_HEADER, "Auth");

    let body = executor.execute(&descriptor).await.unwrap();
    let post: PostRecord = descriptor.merge_response(&body).unwrap();
    assert_eq!(post.post_id, PostId::new(900));
    assert_eq!(post.author_id, UserId::new(5));
    assert_eq!(post.title, "hello");
}

#[tokio::test]
async fn test_get_sends_payload_as_query() {
    async fn echo(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        Json(json!({"cursor": "", "list": [], "echo": params}))
    }
    let base = spawn_stub(Router::new().route("/api/post/reply/list", get(echo))).await;
    let executor = executor(&base, Duration::from_secs(2));

    let descriptor = RequestDescriptor::new(
        0,
        Endpoint::ReplyList,
        payload(json!({"post_id": "42", "cursor": "abc", "page_size": "5"})),
    );
    let body = executor.execute(&descriptor).await.unwrap();
    assert_eq!(body["echo"]["post_id"], "42");
    assert_eq!(body["echo"]["cursor"], "abc");
    assert_eq!(body["echo"]["page_size"], "5");
}

#[tokio::test]
async fn test_slow_server_times_out() {
    async fn slow() -> Json<Value> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Json(json!({}))
    }
    let base = spawn_stub(Router::new().route("/api/user/register", post(slow))).await;
    let executor = executor(&base, Duration::from_millis(50));

    let err = executor.execute(&register_descriptor()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
}

#[tokio::test]
async fn test_refused_connection_is_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = executor(&format!("http://{addr}/api"), Duration::from_secs(2));
    let err = executor.execute(&register_descriptor()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Transport);
}

#[tokio::test]
async fn test_wait_ready_accepts_any_status() {
    let base = spawn_stub(Router::new()).await;
    let executor = executor(&base, Duration::from_secs(1));
    executor.wait_ready(Duration::from_secs(2)).await.unwrap();
}

fn listed_post(id: u64) -> PostRecord {
    PostRecord {
        post_id: PostId::new(id),
        author_id: UserId::new(1),
        title: format!("title {id}"),
        content: format!("content {id}"),
    }
}

#[tokio::test]
async fn test_ordering_check_pages_over_http() {
    async fn list(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        let wire = |id: u64| {
            json!({
                "post_id": id.to_string(),
                "author_id": "1",
                "title": format!("title {id}"),
                "content": format!("content {id}"),
                "reply_num": 0,
            })
        };
        match params.get("cursor").map(String::as_str).unwrap_or_default() {
            "" => Json(json!({"cursor": "after-2", "list": [wire(3), wire(2)]})),
            "after-2" => Json(json!({"cursor": "after-1", "list": [wire(1)]})),
            _ => Json(json!({"ecode": "3004", "emsg": "no more entries"})),
        }
    }
    let base = spawn_stub(Router::new().route("/api/post/list", get(list))).await;
    let executor = executor(&base, Duration::from_secs(2));

    let expected = vec![listed_post(3), listed_post(2), listed_post(1)];
    let mut fetcher = PostListFetcher::new(&executor, ListOrder::CreateTime, Some(2), Duration::from_secs(2));
    let report = verify_ordering(&expected, &mut fetcher).await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.records, 3);

    // One record more than the server lists hits the exhausted cursor.
    let expected = vec![listed_post(3), listed_post(2), listed_post(1), listed_post(0)];
    let mut fetcher = PostListFetcher::new(&executor, ListOrder::CreateTime, Some(2), Duration::from_secs(2));
    let violation = verify_ordering(&expected, &mut fetcher).await.unwrap_err();
    assert!(matches!(
        violation,
        Violation::CountMismatch { expected: 4, actual: 3, .. }
    ));
}
