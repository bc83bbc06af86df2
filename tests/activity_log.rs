mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;

use issue_workflow::events::chain_hash;

/// Activity rows in `seq` order, once at least `expected` of them exist.
async fn wait_for_events(pool: &SqlitePool, expected: usize) -> Result<Vec<(i64, String, String, Option<String>, String)>> {
    // The listener writes asynchronously
    let mut rows = Vec::new();
    for _ in 0..15 {
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
        rows = sqlx::query_as(
            "SELECT seq, event_name, properties, prev_hash, hash FROM activity_log ORDER BY seq",
        )
        .fetch_all(pool)
        .await?;
        if rows.len() >= expected {
            break;
        }
    }
    Ok(rows)
}

#[tokio::test]
async fn mutations_are_recorded_in_a_hash_chain() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "audit@example.com", true).await?;
    let token = t.login("audit@example.com").await?;

    let project = t.create("/api/projects", &token, json!({ "name": "Audited" })).await?;
    let template = t
        .create("/api/templates", &token, json!({ "project_id": project, "name": "Request", "prefix": "REQ" }))
        .await?;
    t.create("/api/states", &token, json!({ "template_id": template, "name": "Open", "type": "initial" }))
        .await?;
    t.send(
        "PUT",
        &format!("/api/templates/{template}/permissions"),
        Some(&token),
        Some(json!({ "permission": "issue.create", "roles": ["anyone"] })),
    )
    .await?;
    t.send("POST", &format!("/api/templates/{template}/unlock"), Some(&token), None).await?;

    let rows = wait_for_events(&t.pool, 6).await?;
    let names: Vec<&str> = rows.iter().map(|(_, name, ..)| name.as_str()).collect();
    assert_eq!(
        names,
        vec!["user.login", "project.created", "template.created", "state.created", "grant.changed", "template.unlocked"],
    );

    let description: String = sqlx::query_scalar("SELECT description FROM activity_log WHERE event_name = 'template.unlocked'")
        .fetch_one(&t.pool)
        .await?;
    assert_eq!(description, "Template unlocked");

    let mut previous: Option<String> = None;
    for (seq, name, properties, prev_hash, hash) in &rows {
        assert_eq!(prev_hash, &previous, "row {seq} ({name}) does not link to its predecessor");
        assert_eq!(hash, &chain_hash(prev_hash.as_deref(), properties), "row {seq} hash mismatch");
        previous = Some(hash.clone());
    }

    Ok(())
}

#[tokio::test]
async fn unchanged_grants_are_not_logged() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "audit@example.com", true).await?;
    let token = t.login("audit@example.com").await?;

    let project = t.create("/api/projects", &token, json!({ "name": "Quiet" })).await?;
    let template = t
        .create("/api/templates", &token, json!({ "project_id": project, "name": "Request", "prefix": "REQ" }))
        .await?;
    let permissions = format!("/api/templates/{template}/permissions");
    let body = json!({ "permission": "issue.view", "roles": ["author"] });
    t.send("PUT", &permissions, Some(&token), Some(body.clone())).await?;
    t.send("PUT", &permissions, Some(&token), Some(body)).await?;

    let rows = wait_for_events(&t.pool, 4).await?;
    let grant_events = rows.iter().filter(|(_, name, ..)| name == "grant.changed").count();
    assert_eq!(grant_events, 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn back_to_back_mutations_share_the_database_with_the_listener() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "audit@example.com", true).await?;
    let token = t.login("audit@example.com").await?;

    let project = t.create("/api/projects", &token, json!({ "name": "Busy" })).await?;
    let uri = format!("/api/projects/{project}");
    for round in 0..20 {
        let (status, body) = t
            .send("PUT", &uri, Some(&token), Some(json!({ "name": format!("Busy {round}") })))
            .await?;
        assert_eq!(status, StatusCode::OK, "round {round}: {body}");
        let group = json!({ "project_id": project, "name": format!("Team {round}") });
        let (status, body) = t.send("POST", "/api/groups", Some(&token), Some(group)).await?;
        assert_eq!(status, StatusCode::CREATED, "round {round}: {body}");
    }

    // login + project + 20 renames + 20 groups
    let rows = wait_for_events(&t.pool, 42).await?;
    assert_eq!(rows.len(), 42);
    let seqs: Vec<i64> = rows.iter().map(|(seq, ..)| *seq).collect();
    assert_eq!(seqs, (1..=42).collect::<Vec<_>>());

    Ok(())
}
