mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::error_kind;

#[tokio::test]
async fn field_parameters_and_list_items() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "root@example.com", true).await?;
    let admin = t.login("root@example.com").await?;

    let project = t.create("/api/projects", &admin, json!({ "name": "QA" })).await?;
    let template = t
        .create("/api/templates", &admin, json!({ "project_id": project, "name": "Bug", "prefix": "BUG" }))
        .await?;
    let new = t
        .create("/api/states", &admin, json!({ "template_id": template, "name": "New", "type": "initial" }))
        .await?;

    let (status, body) = t
        .send(
            "POST",
            "/api/fields",
            Some(&admin),
            Some(json!({
                "state_id": new, "name": "Severity", "type": "number",
                "parameters": { "minimum": 10, "maximum": 1 }
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(error_kind(&body), "bad_request");

    let (status, body) = t
        .send(
            "POST",
            "/api/fields",
            Some(&admin),
            Some(json!({ "state_id": new, "name": "Pattern", "type": "string", "parameters": { "pcre": { "check": "([a-z" } } })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "invalid regex: {}", body);

    let (status, body) = t
        .send(
            "POST",
            "/api/fields",
            Some(&admin),
            Some(json!({ "state_id": new, "name": "Cost", "type": "decimal", "parameters": { "minimum": "1.50", "default": "0.99" } })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "default below minimum: {}", body);

    let (status, severity) = t
        .send(
            "POST",
            "/api/fields",
            Some(&admin),
            Some(json!({
                "state_id": new, "name": "Severity", "type": "number",
                "parameters": { "minimum": 1, "maximum": 5, "default": 3 }
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", severity);
    assert_eq!(severity["parameters"]["default"], 3);

    let (status, _) = t
        .send(
            "POST",
            "/api/fields",
            Some(&admin),
            Some(json!({ "state_id": new, "name": "Severity", "type": "checkbox" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "field names are unique per state");

    let severity_id = severity["id"].as_str().unwrap_or_default().to_string();
    let (status, _) = t
        .send(
            "POST",
            &format!("/api/fields/{severity_id}/items"),
            Some(&admin),
            Some(json!({ "value": 1, "text": "Low" })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "only list fields have items");

    let (status, body) = t
        .send(
            "POST",
            "/api/fields",
            Some(&admin),
            Some(json!({ "state_id": new, "name": "Priority", "type": "list", "parameters": { "default": uuid::Uuid::new_v4() } })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "default must be an existing item: {}", body);

    let priority = t
        .create("/api/fields", &admin, json!({ "state_id": new, "name": "Priority", "type": "list" }))
        .await?;
    let items = format!("/api/fields/{priority}/items");
    let low = t.create(&items, &admin, json!({ "value": 1, "text": "Low" })).await?;
    t.create(&items, &admin, json!({ "value": 2, "text": "High" })).await?;

    let (status, _) = t.send("POST", &items, Some(&admin), Some(json!({ "value": 1, "text": "Lowest" }))).await?;
    assert_eq!(status, StatusCode::CONFLICT, "duplicate item value");
    let (status, _) = t.send("POST", &items, Some(&admin), Some(json!({ "value": 3, "text": "High" }))).await?;
    assert_eq!(status, StatusCode::CONFLICT, "duplicate item text");
    let (status, _) = t.send("POST", &items, Some(&admin), Some(json!({ "value": 0, "text": "None" }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, field) = t
        .send(
            "PUT",
            &format!("/api/fields/{priority}"),
            Some(&admin),
            Some(json!({ "parameters": { "default": low } })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", field);
    assert_eq!(field["parameters"]["default"], json!(low));

    let (status, _) = t.send("DELETE", &format!("{items}/{low}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, field) = t.send("GET", &format!("/api/fields/{priority}"), Some(&admin), None).await?;
    assert!(field["parameters"]["default"].is_null(), "deleted item is no longer the default");

    let (status, remaining) = t.send("GET", &items, Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(remaining.as_array().map(Vec::len), Some(1));
    assert_eq!(remaining[0]["text"], "High");

    let (status, grants) = t
        .send(
            "PUT",
            &format!("/api/fields/{priority}/permissions"),
            Some(&admin),
            Some(json!({ "permission": "RW", "roles": ["author", "responsible"] })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", grants);
    assert_eq!(grants["roles"], json!(["author", "responsible"]));
    t.send(
        "PUT",
        &format!("/api/fields/{priority}/permissions"),
        Some(&admin),
        Some(json!({ "permission": "R", "roles": ["anyone"] })),
    )
    .await?;

    let access = format!("/api/fields/{priority}/access");
    let (status, body) = t.send("GET", &access, Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access"], "R");
    let (_, body) = t.send("GET", &format!("{access}?roles=author"), Some(&admin), None).await?;
    assert_eq!(body["access"], "RW", "read-write wins over read-only");
    let (status, _) = t.send("GET", &format!("{access}?roles=owner"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn dry_run_checks_target_state_fields() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "root@example.com", true).await?;
    common::seed_user(&t.pool, "dev@example.com", false).await?;
    let admin = t.login("root@example.com").await?;
    let dev = t.login("dev@example.com").await?;

    let project = t.create("/api/projects", &admin, json!({ "name": "QA" })).await?;
    let template = t
        .create("/api/templates", &admin, json!({ "project_id": project, "name": "Bug", "prefix": "BUG" }))
        .await?;
    let new = t
        .create("/api/states", &admin, json!({ "template_id": template, "name": "New", "type": "initial" }))
        .await?;
    let triage = t
        .create("/api/states", &admin, json!({ "template_id": template, "name": "Triage", "type": "intermediate" }))
        .await?;
    let effort = t
        .create(
            "/api/fields",
            &admin,
            json!({
                "state_id": triage, "name": "Effort", "type": "number", "is_required": true,
                "parameters": { "minimum": 1, "maximum": 5 }
            }),
        )
        .await?;
    let notes = t
        .create(
            "/api/fields",
            &admin,
            json!({ "state_id": triage, "name": "Notes", "type": "string", "parameters": { "length": 10 } }),
        )
        .await?;
    t.send(
        "PUT",
        &format!("/api/states/{new}/transitions"),
        Some(&admin),
        Some(json!({ "to_state_id": triage, "roles": ["anyone"] })),
    )
    .await?;
    let (status, _) = t.send("POST", &format!("/api/templates/{template}/unlock"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);

    let transition = |fields: serde_json::Value| {
        json!({ "from_state_id": new, "to_state_id": triage, "current_responsible": null, "fields": fields })
    };

    let (status, body) = t
        .send("POST", "/api/workflow/transition", Some(&dev), Some(transition(json!({}))))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "required field missing: {}", body);

    let (status, body) = t
        .send(
            "POST",
            "/api/workflow/transition",
            Some(&dev),
            Some(transition(json!({ effort.as_str(): 9 }))),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "out of range: {}", body);

    let (status, body) = t
        .send(
            "POST",
            "/api/workflow/transition",
            Some(&dev),
            Some(transition(json!({ effort.as_str(): 2, notes.as_str(): "far too long for ten" }))),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "too long: {}", body);

    let (status, body) = t
        .send(
            "POST",
            "/api/workflow/transition",
            Some(&dev),
            Some(transition(json!({ effort.as_str(): 2, notes.as_str(): "ok" }))),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["to_state_id"], json!(triage));
    assert!(body["responsible"].is_null());

    Ok(())
}
