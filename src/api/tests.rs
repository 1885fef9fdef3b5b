use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::create_router;
use crate::mail::MemoryMailer;
use crate::object_store::{ByteStream, ObjectStore, ObjectStoreError};
use crate::testutil::{test_state, test_state_with_store, TEST_PUBLIC_URL};

const BOUNDARY: &str = "drive-test-boundary";

struct Response {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    body: Bytes,
}

impl Response {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    Response {
        status,
        headers,
        body,
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// A `multipart/form-data` request with text fields and an optional file part.
fn multipart_request(
    token: Option<&str>,
    fields: &[(&str, &str)],
    file: Option<(&str, &str, &[u8])>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/files")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Sign up over HTTP and return the session token.
async fn sign_in(app: &Router, mailer: &MemoryMailer, email: &str, organisation: &str) -> String {
    let res = send(
        app,
        json_request(
            "POST",
            "/sign_up",
            None,
            json!({
                "email": email,
                "first_name": "Ada",
                "last_name": "Lovelace",
                "organisation": organisation,
            }),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);

    let token = mailer.last_token_for(email).unwrap();
    let res = send(
        app,
        json_request("POST", "/sign_in", None, json!({ "token": token })),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);

    res.json()["data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_public_routes_need_no_session() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _mailer) = test_state(&dir);
    let app = create_router(state);

    let res = send(&app, get("/", None)).await;
    assert_eq!(res.status, StatusCode::OK);

    let res = send(&app, get("/healthz", None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["status"], "ok");
}

#[tokio::test]
async fn test_protected_routes_reject_missing_or_unknown_session() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _mailer) = test_state(&dir);
    let app = create_router(state);

    let res = send(&app, get("/files", None)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.json()["status"], "fail");

    let res = send(&app, get("/shared_drives", Some("made-up"))).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = send(&app, multipart_request(None, &[("is_folder", "true"), ("name", "Docs")], None)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_up_and_upload_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;

    let res = send(
        &app,
        multipart_request(Some(&token), &[("is_folder", "true"), ("name", "Docs")], None),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    let folder = res.json()["data"].clone();
    assert_eq!(folder["is_folder"], true);
    let folder_id = folder["id"].as_str().unwrap().to_string();

    let res = send(
        &app,
        multipart_request(
            Some(&token),
            &[("parent_id", folder_id.as_str())],
            Some(("notes.txt", "text/plain", b"hello drive".as_slice())),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    let file = res.json()["data"].clone();
    assert_eq!(file["name"], "notes.txt");
    assert_eq!(file["file_size"], 11);
    assert_eq!(file["parent_id"], folder_id.as_str());
    let file_id = file["id"].as_str().unwrap().to_string();

    let res = send(&app, get("/files", Some(&token))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"].as_array().unwrap().len(), 2);

    let res = send(&app, get(&format!("/folders/{folder_id}"), Some(&token))).await;
    let children = res.json()["data"].as_array().unwrap().clone();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0]["id"], file_id.as_str());

    let res = send(&app, get(&format!("/files?parent_id={folder_id}"), Some(&token))).await;
    assert_eq!(res.json()["data"].as_array().unwrap().len(), 1);

    let res = send(
        &app,
        get(&format!("/files/{file_id}/download"), Some(&token)),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body.as_ref(), b"hello drive");
    assert_eq!(res.headers[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        res.headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.txt\""
    );
}

#[tokio::test]
async fn test_empty_listing_is_an_empty_array() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;

    for uri in ["/files", "/shared_drives", "/files?shared_drive=true", "/folders/nope"] {
        let res = send(&app, get(uri, Some(&token))).await;
        assert_eq!(res.status, StatusCode::OK, "{uri}");
        assert_eq!(res.json()["data"], json!([]), "{uri}");
    }
}

#[tokio::test]
async fn test_shared_drives_are_listed_separately() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;

    let res = send(
        &app,
        multipart_request(
            Some(&token),
            &[("is_folder", "true"), ("shared_drive", "true"), ("name", "Team")],
            None,
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["is_shared_drive"], true);

    send(
        &app,
        multipart_request(Some(&token), &[("is_folder", "true"), ("name", "Private")], None),
    )
    .await;

    let res = send(&app, get("/shared_drives", Some(&token))).await;
    let drives = res.json()["data"].as_array().unwrap().clone();
    assert_eq!(drives.len(), 1);
    assert_eq!(drives[0]["name"], "Team");
}

#[tokio::test]
async fn test_rename_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;
    let res = send(
        &app,
        multipart_request(Some(&token), &[], Some(("a.txt", "text/plain", b"a".as_slice()))),
    )
    .await;
    let file_id = res.json()["data"]["id"].as_str().unwrap().to_string();

    let res = send(
        &app,
        json_request(
            "PATCH",
            &format!("/files/{file_id}"),
            Some(&token),
            json!({ "name": "b.txt" }),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["name"], "b.txt");

    let res = send(
        &app,
        json_request("PATCH", &format!("/files/{file_id}"), Some(&token), json!({ "name": "" })),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/files/{file_id}"))
        .header(header::AUTHORIZATION, token.as_str())
        .body(Body::empty())
        .unwrap();
    let res = send(&app, delete).await;
    assert_eq!(res.status, StatusCode::OK);

    let res = send(&app, get("/files", Some(&token))).await;
    assert_eq!(res.json()["data"], json!([]));

    let res = send(&app, get(&format!("/files/{file_id}/download"), Some(&token))).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_other_tenant_gets_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let alice = sign_in(&app, &mailer, "alice@acme.com", "Acme").await;
    let bob = sign_in(&app, &mailer, "bob@globex.com", "Globex").await;

    let res = send(
        &app,
        multipart_request(Some(&alice), &[], Some(("secret.txt", "text/plain", b"s".as_slice()))),
    )
    .await;
    let file_id = res.json()["data"]["id"].as_str().unwrap().to_string();

    for uri in [
        format!("/files/{file_id}/download"),
        format!("/files/{file_id}/preview"),
    ] {
        let res = send(&app, get(&uri, Some(&bob))).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND, "{uri}");
    }

    let res = send(&app, get("/files", Some(&bob))).await;
    assert_eq!(res.json()["data"], json!([]));
}

#[tokio::test]
async fn test_preview_url_serves_blob_until_tampered() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;
    let res = send(
        &app,
        multipart_request(Some(&token), &[], Some(("pic.png", "image/png", b"PNG".as_slice()))),
    )
    .await;
    let file_id = res.json()["data"]["id"].as_str().unwrap().to_string();

    let res = send(&app, get(&format!("/files/{file_id}/preview"), Some(&token))).await;
    assert_eq!(res.status, StatusCode::OK);
    let url = res.json()["data"]["url"].as_str().unwrap().to_string();
    let path = url.strip_prefix(TEST_PUBLIC_URL).unwrap().to_string();

    // No session needed; the signature is the credential.
    let res = send(&app, get(&path, None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body.as_ref(), b"PNG");

    let tampered = path.replace(&file_id, "other-object");
    let res = send(&app, get(&tampered, None)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_one_time_login_and_bad_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let first = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;

    let res = send(
        &app,
        json_request("POST", "/one_time_login", None, json!({ "email": "ADA@example.com" })),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["message"], "Token sent");

    let token = mailer.last_token_for("ada@example.com").unwrap();
    let res = send(
        &app,
        json_request("POST", "/sign_in", None, json!({ "token": token })),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    let second = res.json()["data"]["token"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    let res = send(
        &app,
        json_request("POST", "/sign_in", None, json!({ "token": token })),
    )
    .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = send(
        &app,
        json_request("POST", "/one_time_login", None, json!({ "email": "nobody@example.com" })),
    )
    .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

fn form_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_auth_routes_accept_query_and_form_input() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let res = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/sign_up?email=a%40x.com&firstName=A&lastName=B&organisation=Acme")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    let sent = mailer.sent().into_iter().last().unwrap();
    assert_eq!(sent.to_email, "a@x.com");
    assert_eq!(sent.to_name, "A");

    let res = send(&app, form_request("/one_time_login", "email=a%40x.com")).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(mailer.sent().len(), 2);

    let token = mailer.last_token_for("a@x.com").unwrap();
    let res = send(&app, form_request("/sign_in", &format!("token={token}"))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["user"]["first_name"], "A");
    assert_eq!(res.json()["data"]["user"]["last_name"], "B");

    // An empty form body falls back to the query string.
    let res = send(&app, form_request("/one_time_login?email=a%40x.com", "")).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(mailer.sent().len(), 3);
}

#[tokio::test]
async fn test_cors_preflight_allows_frontend_origin() {
    let dir = tempfile::tempdir().unwrap();
    let (state, _mailer) = test_state(&dir);
    let frontend = state.config.mail.frontend_url.clone();
    let app = create_router(state);

    let res = send(
        &app,
        Request::builder()
            .method("OPTIONS")
            .uri("/files")
            .header(header::ORIGIN, frontend.as_str())
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        frontend.as_str()
    );
    let allowed_methods = res.headers[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .to_string();
    assert!(allowed_methods.contains("POST"), "{allowed_methods}");
    let allowed_headers = res.headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed_headers.contains("authorization"), "{allowed_headers}");

    let res = send(
        &app,
        Request::builder()
            .method("GET")
            .uri("/healthz")
            .header(header::ORIGIN, "http://evil.test")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res
        .headers
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test]
async fn test_duplicate_sign_up_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    sign_in(&app, &mailer, "ada@example.com", "Analytical").await;

    let res = send(
        &app,
        json_request(
            "POST",
            "/sign_up",
            None,
            json!({
                "email": "other@example.com",
                "first_name": "O",
                "last_name": "T",
                "organisation": "Analytical",
            }),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["status"], "fail");
}

#[tokio::test]
async fn test_logout_ends_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;

    let res = send(&app, json_request("POST", "/logout", Some(&token), json!({}))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["message"], "Logged out");

    let res = send(&app, get("/files", Some(&token))).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = send(&app, json_request("POST", "/logout", Some(&token), json!({}))).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

/// Accepts nothing.
struct BrokenStore;

#[async_trait]
impl ObjectStore for BrokenStore {
    async fn put(&self, _: &str, _: Bytes) -> Result<(), ObjectStoreError> {
        Err(ObjectStoreError::Backend("connection refused by 10.0.0.7".to_string()))
    }
    async fn get(&self, key: &str) -> Result<ByteStream, ObjectStoreError> {
        Err(ObjectStoreError::NotFound(key.to_string()))
    }
    async fn delete(&self, _: &str) -> Result<(), ObjectStoreError> {
        Ok(())
    }
    async fn exists(&self, _: &str) -> Result<bool, ObjectStoreError> {
        Ok(false)
    }
    async fn presign_get(&self, _: &str, _: Duration) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError::Backend("unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_internal_errors_are_opaque() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state_with_store(&dir, Arc::new(BrokenStore));
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;
    let res = send(
        &app,
        multipart_request(Some(&token), &[], Some(("a.txt", "text/plain", b"a".as_slice()))),
    )
    .await;

    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        res.json(),
        json!({ "message": "Internal server error", "status": "error" })
    );

    let res = send(&app, get("/files", Some(&token))).await;
    assert_eq!(res.json()["data"], json!([]));
}

#[tokio::test]
async fn test_oversized_upload_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let limit = state.config.uploads.max_upload_size as usize;
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;
    let data = vec![b'x'; limit + 1];
    let res = send(
        &app,
        multipart_request(Some(&token), &[], Some(("big.bin", "application/octet-stream", data.as_slice()))),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_purge_clears_everything_in_test_mode() {
    let dir = tempfile::tempdir().unwrap();
    let (state, mailer) = test_state(&dir);
    let app = create_router(state);

    let token = sign_in(&app, &mailer, "ada@example.com", "Analytical").await;

    let purge = Request::builder()
        .method("DELETE")
        .uri("/admin/purge")
        .body(Body::empty())
        .unwrap();
    let res = send(&app, purge).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"]["users_deleted"], 1);
    assert_eq!(res.json()["data"]["organisations_deleted"], 1);

    let res = send(&app, get("/files", Some(&token))).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}
