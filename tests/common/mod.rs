#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use issue_workflow::create_app;
use issue_workflow::utils::{hash_password, utc_now};

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn setup() -> Result<TestApp> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok(TestApp { app, pool, _dir: dir })
}

/// Inserts an enabled account with `PASSWORD`.
pub async fn seed_user(pool: &SqlitePool, email: &str, is_admin: bool) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO users (id, email, fullname, password_hash, is_admin, is_disabled, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(id.to_string())
    .bind(email)
    .bind(email.split('@').next().unwrap_or(email))
    .bind(hash_password(PASSWORD)?)
    .bind(is_admin)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    pub async fn login(&self, email: &str) -> Result<String> {
        let (status, body) = self
            .send("POST", "/auth/login", None, Some(serde_json::json!({ "email": email, "password": PASSWORD })))
            .await?;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        Ok(body.get("token").and_then(Value::as_str).context("missing token")?.to_string())
    }

    /// POST expecting 201, returns the created id.
    pub async fn create(&self, uri: &str, token: &str, body: Value) -> Result<String> {
        let (status, created) = self.send("POST", uri, Some(token), Some(body)).await?;
        assert_eq!(status, StatusCode::CREATED, "POST {} failed: {}", uri, created);
        Ok(created.get("id").and_then(Value::as_str).context("missing id")?.to_string())
    }
}

pub fn error_kind(body: &Value) -> &str {
    body.get("error").and_then(Value::as_str).unwrap_or_default()
}
