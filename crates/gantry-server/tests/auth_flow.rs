//! Setup, login and logout through `axum-test`.

mod common;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use common::{Harness, ADMIN, PASSWORD};
use gantry_auth::AuditResult;
use gantry_server::ServerConfig;

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

#[tokio::test]
async fn first_visitor_completes_setup() {
    let harness = Harness::unconfigured(ServerConfig::default());
    let server = TestServer::new(harness.app.router()).unwrap();

    let status = server.get("/api/auth/status").await;
    status.assert_status_ok();
    let json = status.json::<Value>();
    assert_eq!(json["data"]["setup_required"], true);
    assert_eq!(json["data"]["authenticated"], false);

    let weak = server
        .post("/api/auth/setup")
        .json(&json!({ "username": "root", "password": "short" }))
        .await;
    weak.assert_status(StatusCode::BAD_REQUEST);

    let created = server
        .post("/api/auth/setup")
        .json(&json!({ "username": "root", "password": "long enough" }))
        .await;
    created.assert_status_ok();
    let cookie = created.header(header::SET_COOKIE);
    let cookie = cookie.to_str().unwrap();
    assert!(cookie.starts_with("gantry_session="));
    assert!(cookie.contains("HttpOnly"));
    let body = created.json::<Value>();
    assert_eq!(body["message"], "administrator created");
    let data = body["data"].clone();
    assert_eq!(data["username"], "root");
    let token = data["token"].as_str().unwrap().to_string();

    let again = server
        .post("/api/auth/setup")
        .json(&json!({ "username": "intruder", "password": "long enough" }))
        .await;
    again.assert_status(StatusCode::CONFLICT);
    assert_eq!(again.json::<Value>()["error_code"], "SETUP_COMPLETED");

    let status = server
        .get("/api/auth/status")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    let json = status.json::<Value>();
    assert_eq!(json["data"]["setup_required"], false);
    assert_eq!(json["data"]["authenticated"], true);
    assert_eq!(json["data"]["username"], "root");

    let events = harness.audit.events();
    assert!(events
        .iter()
        .any(|e| e.action == "setup" && e.result == AuditResult::Success));
    assert!(events
        .iter()
        .any(|e| e.action == "setup" && e.result == AuditResult::Denied));
}

#[tokio::test]
async fn login_me_logout() {
    let harness = Harness::new(ServerConfig::default());
    let server = TestServer::new(harness.app.router()).unwrap();

    let login = server
        .post("/api/auth/login")
        .json(&json!({ "username": ADMIN, "password": PASSWORD }))
        .await;
    login.assert_status_ok();
    let body = login.json::<Value>();
    assert_eq!(body["message"], "logged in");
    let data = body["data"].clone();
    assert_eq!(data["username"], ADMIN);
    assert_eq!(data["user_id"].as_str().unwrap().len(), 64);
    let token = data["token"].as_str().unwrap().to_string();

    let me = server
        .get("/api/auth/me")
        .add_header(
            header::COOKIE,
            HeaderValue::from_str(&format!("gantry_session={token}")).unwrap(),
        )
        .await;
    me.assert_status_ok();
    assert_eq!(me.json::<Value>()["data"]["username"], ADMIN);

    let logout = server
        .post("/api/auth/logout")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    logout.assert_status_ok();
    assert_eq!(logout.json::<Value>()["message"], "logged out");
    let cleared = logout.header(header::SET_COOKIE);
    assert!(cleared.to_str().unwrap().contains("Max-Age=0"));

    let events = harness.audit.events();
    assert!(events
        .iter()
        .any(|e| e.action == "login" && e.result == AuditResult::Success));
    assert!(events
        .iter()
        .any(|e| e.action == "logout" && e.username.as_deref() == Some(ADMIN)));
}

#[tokio::test]
async fn wrong_password_is_denied_and_audited() {
    let harness = Harness::new(ServerConfig::default());
    let server = TestServer::new(harness.app.router()).unwrap();

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "username": ADMIN, "password": "guess" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let json = response.json::<Value>();
    assert_eq!(json["error_code"], "AUTH_UNAUTHORIZED");
    assert_eq!(json["success"], false);

    let events = harness.audit.events();
    let event = events.last().unwrap();
    assert_eq!(event.action, "login");
    assert_eq!(event.result, AuditResult::Denied);
    assert_eq!(event.username.as_deref(), Some(ADMIN));
}

#[tokio::test]
async fn malformed_login_body_is_a_bad_request() {
    let harness = Harness::new(ServerConfig::default());
    let server = TestServer::new(harness.app.router()).unwrap();

    let response = server
        .post("/api/auth/login")
        .json(&json!({ "username": ADMIN }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error_code"], "BAD_REQUEST");
    assert_eq!(harness.accounts.verify_calls(), 0);
}
