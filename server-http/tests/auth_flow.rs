use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use server_http::{build_router, AppState};
use shared::config::Config;
use std::collections::HashMap;
use tempfile::TempDir;
use tower::ServiceExt;

const PASSWORD: &str = "Sup3rSecret";

async fn test_app(temp_dir: &TempDir, overrides: &[(&str, &str)]) -> Router {
    let mut vars: HashMap<String, String> = HashMap::from([
        (
            "WARDEN_DATA_DIR".to_string(),
            temp_dir.path().to_string_lossy().to_string(),
        ),
        ("WARDEN_ARGON2_MEMORY_KIB".to_string(), "1024".to_string()),
        ("WARDEN_ARGON2_ITERATIONS".to_string(), "1".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }

    let config = Config::from_lookup(|key| vars.get(key).cloned());
    build_router(AppState::init(config).await.unwrap())
}

struct Call {
    method: Method,
    uri: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
}

impl Call {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            body: None,
            headers: Vec::new(),
        }
    }

    fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn bearer(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {token}"))
    }

    /// Attach the session cookies and the matching CSRF header.
    fn session(self, session: &Session) -> Self {
        self.header(
            "cookie",
            format!(
                "access_token={}; refresh_token={}; csrf_token={}",
                session.access_token, session.refresh_token, session.csrf_token
            ),
        )
        .header("x-csrf-token", session.csrf_token.clone())
    }

    async fn send(self, app: &Router) -> Response {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let body = match self.body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }
}

struct Session {
    user_id: String,
    access_token: String,
    refresh_token: String,
    csrf_token: String,
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn cookie_value(response: &Response, name: &str) -> Option<String> {
    set_cookies(response).into_iter().find_map(|cookie| {
        let value = cookie.strip_prefix(&format!("{name}="))?;
        let value = value.split(';').next().unwrap_or_default();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn clears_cookie(response: &Response, name: &str) -> bool {
    set_cookies(response)
        .iter()
        .any(|cookie| cookie.starts_with(&format!("{name}=;")) && cookie.contains("Max-Age=0"))
}

async fn register(app: &Router, email: &str, username: &str) -> Response {
    Call::new(Method::POST, "/api/auth/register")
        .json(json!({ "email": email, "username": username, "password": PASSWORD }))
        .send(app)
        .await
}

async fn login(app: &Router, email: &str, password: &str) -> Session {
    let response = Call::new(Method::POST, "/api/auth/login")
        .json(json!({ "email": email, "password": password }))
        .send(app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let refresh_token = cookie_value(&response, "refresh_token").unwrap();
    let csrf_token = cookie_value(&response, "csrf_token").unwrap();
    let body = body_json(response).await;

    Session {
        user_id: body["data"]["user"]["id"].as_str().unwrap().to_string(),
        access_token: body["data"]["access_token"].as_str().unwrap().to_string(),
        refresh_token,
        csrf_token,
    }
}

#[tokio::test]
async fn test_health_carries_security_headers() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;

    let response = Call::new(Method::GET, "/health").send(&app).await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
    assert!(headers["content-security-policy"]
        .to_str()
        .unwrap()
        .ends_with("frame-ancestors 'self'"));
    assert!(!headers.contains_key("strict-transport-security"));
    assert!(!headers.contains_key("x-ratelimit-limit"));

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_register_login_and_profile() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;

    let response = register(&app, "alice@example.com", "alice").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["username"], "alice");
    assert_eq!(body["data"]["role"], "reader");
    assert!(body["data"].get("password_hash").is_none());

    let response = register(&app, "ALICE@example.com", "alice2").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = Call::new(Method::POST, "/api/auth/login")
        .json(json!({ "email": "alice@example.com", "password": PASSWORD }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("access_token=") && c.contains("HttpOnly")));
    let csrf_cookie = cookie_value(&response, "csrf_token").unwrap();
    assert_eq!(response.headers()["x-csrf-token"], csrf_cookie.as_str());
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");

    let body = body_json(response).await;
    assert_eq!(body["data"]["expires_in"], 1800);
    let access_token = body["data"]["access_token"].as_str().unwrap().to_string();

    let response = Call::new(Method::GET, "/api/auth/profile")
        .bearer(&access_token)
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["email"], "alice@example.com");

    let response = Call::new(Method::GET, "/api/auth/profile").send(&app).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotation_and_reuse_detection() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;
    register(&app, "bob@example.com", "bob").await;
    let session = login(&app, "bob@example.com", PASSWORD).await;

    let response = Call::new(Method::POST, "/api/auth/refresh")
        .header("cookie", format!("refresh_token={}", session.refresh_token))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = cookie_value(&response, "refresh_token").unwrap();
    assert_ne!(rotated, session.refresh_token);
    assert!(cookie_value(&response, "access_token").is_some());

    // Replaying the rotated-out token burns the whole family
    let response = Call::new(Method::POST, "/api/auth/refresh")
        .header("cookie", format!("refresh_token={}", session.refresh_token))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(clears_cookie(&response, "access_token"));
    assert!(clears_cookie(&response, "refresh_token"));

    let response = Call::new(Method::POST, "/api/auth/refresh")
        .header("cookie", format!("refresh_token={rotated}"))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_accepts_body_token() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;
    register(&app, "carol@example.com", "carol").await;
    let session = login(&app, "carol@example.com", PASSWORD).await;

    let response = Call::new(Method::POST, "/api/auth/refresh")
        .json(json!({ "refresh_token": session.refresh_token }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = Call::new(Method::POST, "/api/auth/refresh").send(&app).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_rate_limit() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;

    for _ in 0..10 {
        let response = Call::new(Method::POST, "/api/auth/login")
            .json(json!({ "email": "nobody@example.com", "password": "Wr0ngPassword" }))
            .send(&app)
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = Call::new(Method::POST, "/api/auth/login")
        .json(json!({ "email": "nobody@example.com", "password": "Wr0ngPassword" }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_csrf_guards_mutating_requests() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;
    register(&app, "dave@example.com", "dave").await;
    register(&app, "erin@example.com", "erin").await;
    let dave = login(&app, "dave@example.com", PASSWORD).await;
    let erin = login(&app, "erin@example.com", PASSWORD).await;

    // No token at all
    let response = Call::new(Method::POST, "/api/auth/logout-all")
        .bearer(&dave.access_token)
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Cookie and header disagree
    let response = Call::new(Method::POST, "/api/auth/logout-all")
        .bearer(&dave.access_token)
        .header("cookie", format!("csrf_token={}", dave.csrf_token))
        .header("x-csrf-token", erin.csrf_token.clone())
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Someone else's token
    let response = Call::new(Method::POST, "/api/auth/logout-all")
        .bearer(&dave.access_token)
        .header("cookie", format!("csrf_token={}", erin.csrf_token))
        .header("x-csrf-token", erin.csrf_token.clone())
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = Call::new(Method::POST, "/api/auth/logout-all")
        .session(&dave)
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_cookie(&response, "refresh_token"));
    let body = body_json(response).await;
    assert_eq!(body["data"]["revoked_sessions"], 1);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;
    register(&app, "frank@example.com", "frank").await;
    let session = login(&app, "frank@example.com", PASSWORD).await;

    for _ in 0..2 {
        let response = Call::new(Method::POST, "/api/auth/logout")
            .session(&session)
            .send(&app)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(clears_cookie(&response, "access_token"));
        assert!(clears_cookie(&response, "refresh_token"));
        assert!(clears_cookie(&response, "csrf_token"));
    }

    // The revoked token now trips reuse detection
    let response = Call::new(Method::POST, "/api/auth/refresh")
        .header("cookie", format!("refresh_token={}", session.refresh_token))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password_ends_sessions() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;
    register(&app, "grace@example.com", "grace").await;
    let session = login(&app, "grace@example.com", PASSWORD).await;

    let response = Call::new(Method::POST, "/api/auth/change-password")
        .session(&session)
        .json(json!({ "old_password": "Wr0ngPassword", "new_password": "N3wPassword" }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = Call::new(Method::POST, "/api/auth/change-password")
        .session(&session)
        .json(json!({ "old_password": PASSWORD, "new_password": "N3wPassword" }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_cookie(&response, "access_token"));

    let response = Call::new(Method::POST, "/api/auth/refresh")
        .header("cookie", format!("refresh_token={}", session.refresh_token))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    login(&app, "grace@example.com", "N3wPassword").await;
}

#[tokio::test]
async fn test_sessions_and_csrf_reissue() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(&temp_dir, &[]).await;
    register(&app, "heidi@example.com", "heidi").await;
    let session = login(&app, "heidi@example.com", PASSWORD).await;

    let response = Call::new(Method::GET, "/api/auth/sessions")
        .bearer(&session.access_token)
        .header("user-agent", "integration-test")
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let response = Call::new(Method::GET, "/api/auth/csrf-token")
        .bearer(&session.access_token)
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let reissued = cookie_value(&response, "csrf_token").unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["csrf_token"], reissued.as_str());

    let response = Call::new(Method::PUT, "/api/auth/profile")
        .bearer(&session.access_token)
        .header("cookie", format!("csrf_token={reissued}"))
        .header("x-csrf-token", reissued.clone())
        .json(json!({ "avatar_url": "https://cdn.example.com/heidi.png" }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["avatar_url"], "https://cdn.example.com/heidi.png");
}

#[tokio::test]
async fn test_admin_routes() {
    let temp_dir = TempDir::new().unwrap();
    let app = test_app(
        &temp_dir,
        &[
            ("WARDEN_ADMIN_EMAIL", "root@example.com"),
            ("WARDEN_ADMIN_USERNAME", "root"),
            ("WARDEN_ADMIN_PASSWORD", "R00tPassword"),
        ],
    )
    .await;
    register(&app, "ivan@example.com", "ivan").await;
    let reader = login(&app, "ivan@example.com", PASSWORD).await;
    let admin = login(&app, "root@example.com", "R00tPassword").await;

    let status_uri = format!("/api/admin/users/{}/status", reader.user_id);

    let response = Call::new(Method::PUT, &status_uri)
        .json(json!({ "is_active": false }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN, "anonymous request without CSRF");

    let response = Call::new(Method::PUT, &status_uri)
        .session(&reader)
        .json(json!({ "is_active": false }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = Call::new(Method::PUT, "/api/admin/users/missing/status")
        .session(&admin)
        .json(json!({ "is_active": false }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = Call::new(Method::PUT, &status_uri)
        .session(&admin)
        .json(json!({ "is_active": false }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["is_active"], false);

    // Disabling revoked the reader's refresh token
    let response = Call::new(Method::POST, "/api/auth/refresh")
        .header("cookie", format!("refresh_token={}", reader.refresh_token))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = Call::new(Method::POST, "/api/auth/login")
        .json(json!({ "email": "ivan@example.com", "password": PASSWORD }))
        .send(&app)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = Call::new(
        Method::POST,
        &format!("/api/admin/users/{}/logout-all", admin.user_id),
    )
    .session(&admin)
    .send(&app)
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}
