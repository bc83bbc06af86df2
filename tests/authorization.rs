mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::error_kind;

#[tokio::test]
async fn configuration_is_reserved_to_admins() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "root@example.com", true).await?;
    common::seed_user(&t.pool, "user@example.com", false).await?;
    let admin = t.login("root@example.com").await?;
    let user = t.login("user@example.com").await?;

    let (status, body) = t.send("POST", "/api/projects", Some(&user), Some(json!({ "name": "Mine" }))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_kind(&body), "access_denied");

    let project = t.create("/api/projects", &admin, json!({ "name": "Shared" })).await?;
    let template = t
        .create("/api/templates", &admin, json!({ "project_id": project, "name": "Task", "prefix": "TSK" }))
        .await?;

    let checks = [
        ("PUT", format!("/api/projects/{project}"), Some(json!({ "name": "Renamed" }))),
        ("POST", format!("/api/projects/{project}/suspend"), None),
        ("PUT", format!("/api/templates/{template}"), Some(json!({ "name": "Renamed" }))),
        ("DELETE", format!("/api/templates/{template}"), None),
        ("GET", format!("/api/templates/{template}/permissions"), None),
        (
            "POST",
            "/api/states".to_string(),
            Some(json!({ "template_id": template, "name": "Open", "type": "initial" })),
        ),
        ("POST", "/api/groups".to_string(), Some(json!({ "project_id": project, "name": "Mine" }))),
        (
            "POST",
            "/api/users".to_string(),
            Some(json!({ "email": "new@example.com", "fullname": "New", "password": "password123" })),
        ),
    ];
    for (method, uri, body) in checks {
        let (status, _) = t.send(method, &uri, Some(&user), body).await?;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
    }

    let (status, _) = t.send("GET", "/api/users", Some(&user), None).await?;
    assert_eq!(status, StatusCode::OK, "listing only needs authentication");

    Ok(())
}

#[tokio::test]
async fn missing_entities_are_not_found() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "root@example.com", true).await?;
    let admin = t.login("root@example.com").await?;

    let unknown = uuid::Uuid::new_v4();
    for uri in [
        format!("/api/projects/{unknown}"),
        format!("/api/templates/{unknown}"),
        format!("/api/states/{unknown}"),
        format!("/api/fields/{unknown}"),
        format!("/api/groups/{unknown}"),
        format!("/api/users/{unknown}"),
    ] {
        let (status, body) = t.send("GET", &uri, Some(&admin), None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(error_kind(&body), "not_found");
    }

    let (status, _) = t
        .send(
            "POST",
            "/api/templates",
            Some(&admin),
            Some(json!({ "project_id": unknown, "name": "Orphan", "prefix": "ORP" })),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
