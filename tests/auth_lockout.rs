mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::PASSWORD;

#[tokio::test]
async fn repeated_failures_lock_the_account_until_an_admin_unlocks_it() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "root@example.com", true).await?;
    let user_id = common::seed_user(&t.pool, "ann@example.com", false).await?;
    let admin = t.login("root@example.com").await?;

    let wrong = json!({ "email": "ann@example.com", "password": "wrongpassword" });
    for _ in 0..3 {
        let (status, _) = t.send("POST", "/auth/login", None, Some(wrong.clone())).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Right password, but the account is now locked
    let right = json!({ "email": "ann@example.com", "password": PASSWORD });
    let (status, body) = t.send("POST", "/auth/login", None, Some(right.clone())).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap_or_default().contains("locked"), "{}", body);

    let (status, user) = t.send("GET", &format!("/api/users/{user_id}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(!user["locked_until"].is_null());

    let (status, unlocked) = t
        .send("POST", &format!("/api/users/{user_id}/unlock"), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", unlocked);
    assert!(unlocked["locked_until"].is_null());
    assert_eq!(unlocked["auth_failures"], 0);

    // Nothing left to unlock
    let (status, _) = t
        .send("POST", &format!("/api/users/{user_id}/unlock"), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.send("POST", "/auth/login", None, Some(right)).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["user"]["auth_failures"], 0);

    Ok(())
}

#[tokio::test]
async fn disabled_accounts_cannot_log_in_or_use_old_tokens() -> Result<()> {
    let t = common::setup().await?;
    common::seed_user(&t.pool, "root@example.com", true).await?;
    let user_id = common::seed_user(&t.pool, "bob@example.com", false).await?;
    let admin = t.login("root@example.com").await?;
    let token = t.login("bob@example.com").await?;

    let (status, me) = t.send("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "bob@example.com");

    let (status, _) = t
        .send("POST", &format!("/api/users/{user_id}/disable"), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t.send("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = t
        .send("POST", "/auth/login", None, Some(json!({ "email": "bob@example.com", "password": PASSWORD })))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap_or_default().contains("disabled"));

    let (status, _) = t
        .send("POST", &format!("/api/users/{user_id}/enable"), Some(&admin), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    t.login("bob@example.com").await?;

    Ok(())
}

#[tokio::test]
async fn users_edit_their_profile_but_not_their_privileges() -> Result<()> {
    let t = common::setup().await?;
    let root_id = common::seed_user(&t.pool, "root@example.com", true).await?;
    let user_id = common::seed_user(&t.pool, "cat@example.com", false).await?;
    let admin = t.login("root@example.com").await?;
    let token = t.login("cat@example.com").await?;

    let uri = format!("/api/users/{user_id}");
    let (status, user) = t
        .send("PUT", &uri, Some(&token), Some(json!({ "fullname": "Cat Stevens", "theme": "nord" })))
        .await?;
    assert_eq!(status, StatusCode::OK, "{}", user);
    assert_eq!(user["fullname"], "Cat Stevens");

    let (status, _) = t.send("PUT", &uri, Some(&token), Some(json!({ "is_admin": true }))).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .send("PUT", &format!("/api/users/{root_id}"), Some(&token), Some(json!({ "fullname": "Hacked" })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .send("PUT", &format!("/api/users/{root_id}"), Some(&admin), Some(json!({ "is_admin": false })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "admins cannot revoke their own flag");

    let (status, _) = t.send("DELETE", &format!("/api/users/{root_id}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "admins cannot delete themselves");

    let (status, _) = t
        .send("POST", &format!("{uri}/password"), Some(&token), Some(json!({ "password": "short" })))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send("POST", &format!("{uri}/password"), Some(&token), Some(json!({ "password": "new-password-1" })))
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = t
        .send("POST", "/auth/login", None, Some(json!({ "email": "cat@example.com", "password": "new-password-1" })))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = t
        .send(
            "POST",
            "/api/users",
            Some(&admin),
            Some(json!({ "email": "CAT@example.com", "fullname": "Dup", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_failures_all_count_towards_the_lock() -> Result<()> {
    let t = common::setup().await?;
    let user_id = common::seed_user(&t.pool, "dan@example.com", false).await?;

    let wrong = || Some(json!({ "email": "dan@example.com", "password": "wrongpassword" }));
    let (a, b, c) = tokio::join!(
        t.send("POST", "/auth/login", None, wrong()),
        t.send("POST", "/auth/login", None, wrong()),
        t.send("POST", "/auth/login", None, wrong()),
    );
    for (status, body) in [a?, b?, c?] {
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);
    }

    let locked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ? AND locked_until IS NOT NULL")
        .bind(user_id.to_string())
        .fetch_one(&t.pool)
        .await?;
    assert_eq!(locked, 1, "three failures lock the account however they interleave");

    let (status, body) = t
        .send("POST", "/auth/login", None, Some(json!({ "email": "dan@example.com", "password": PASSWORD })))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap_or_default().contains("locked"), "{}", body);

    Ok(())
}
