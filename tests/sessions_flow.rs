mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, uuid_at, TestApp};
use serde_json::json;

#[tokio::test]
async fn create_join_and_archive_session() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let missing_title = app
        .post_json("/api/sessions", &json!({ "title": "   " }), None)
        .await?;
    let error = app
        .expect_json(missing_title, StatusCode::BAD_REQUEST)
        .await?;
    assert_eq!(error["error"], "Le titre est requis");

    let created = app
        .post_json(
            "/api/sessions",
            &json!({ "title": "Refonte API", "description": "Choix d'architecture" }),
            None,
        )
        .await?;
    let session = app.expect_json(created, StatusCode::CREATED).await?;
    assert_eq!(session["status"], "preparation");
    let session_id = uuid_at(&session, "/id")?;
    let code = session["invite_code"].as_str().unwrap_or_default().to_string();
    assert_eq!(code.len(), 32);

    let join_path = format!("/api/sessions/join/{code}");
    let alice = app
        .post_json(&join_path, &json!({ "pseudo": "Alice" }), None)
        .await?;
    let alice = app.expect_json(alice, StatusCode::OK).await?;
    let alice_id = uuid_at(&alice, "/participant/id")?;
    assert_eq!(alice["participant"]["is_agent"], false);

    // Joining twice with the same pseudo returns the same participant.
    let again = app
        .post_json(&join_path, &json!({ "pseudo": "Alice" }), None)
        .await?;
    let again = app.expect_json(again, StatusCode::OK).await?;
    assert_eq!(uuid_at(&again, "/participant/id")?, alice_id);

    let bad_code = app
        .post_json(
            "/api/sessions/join/inconnu",
            &json!({ "pseudo": "Bob" }),
            None,
        )
        .await?;
    let error = app.expect_json(bad_code, StatusCode::NOT_FOUND).await?;
    assert_eq!(error["error"], "Code d'invitation invalide");

    let online = app
        .get(&format!("/api/sessions/{session_id}/participants"), None)
        .await?;
    let online = app.expect_json(online, StatusCode::OK).await?;
    assert_eq!(online["participants"].as_array().map(Vec::len), Some(1));

    let heartbeat = app
        .post_json(
            &format!("/api/sessions/{session_id}/heartbeat"),
            &json!({ "participant_id": alice_id }),
            None,
        )
        .await?;
    let heartbeat = app.expect_json(heartbeat, StatusCode::OK).await?;
    assert_eq!(heartbeat["status"], "ok");

    let detail = app.get(&format!("/api/sessions/{session_id}"), None).await?;
    let detail = app.expect_json(detail, StatusCode::OK).await?;
    assert_eq!(detail["participant_count"], 1);
    assert_eq!(detail["document_count"], 0);

    let bad_status = app
        .patch_json(
            &format!("/api/sessions/{session_id}/status"),
            &json!({ "status": "closed" }),
            None,
        )
        .await?;
    app.expect_json(bad_status, StatusCode::BAD_REQUEST).await?;

    let archived = app
        .patch_json(
            &format!("/api/sessions/{session_id}/status"),
            &json!({ "status": "archive" }),
            None,
        )
        .await?;
    let archived = app.expect_json(archived, StatusCode::OK).await?;
    assert_eq!(archived["status"], "archive");

    let late = app
        .post_json(&join_path, &json!({ "pseudo": "Bob" }), None)
        .await?;
    let error = app.expect_json(late, StatusCode::GONE).await?;
    assert_eq!(error["error"], "Cette session est archivée");

    let events = app.publisher().events();
    assert!(events.contains(&"presence.update"));
    assert!(events.contains(&"session.status_changed"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn agent_session_and_invite_regeneration() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let created = app
        .post_json(
            "/api/sessions/agent/create",
            &json!({ "title": "Atelier" }),
            None,
        )
        .await?;
    let created = app.expect_json(created, StatusCode::CREATED).await?;
    let session_id = uuid_at(&created, "/session/id")?;
    assert_eq!(created["agent"]["pseudo"], "Claude Assistant");
    let code = created["session"]["invite_code"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert_eq!(
        created["invite_url"],
        format!("https://docs.test/session/join?code={code}")
    );
    assert_eq!(
        created["endpoints"]["documents"],
        format!("/api/mcp/sessions/{session_id}/documents")
    );

    let listed = app.get("/api/sessions", None).await?;
    let listed = app.expect_json(listed, StatusCode::OK).await?;
    assert_eq!(listed["sessions"][0]["id"], session_id.to_string());
    assert_eq!(listed["sessions"][0]["participant_count"], 1);

    let regenerated = app
        .post_json(
            &format!("/api/sessions/{session_id}/invite-code"),
            &json!({}),
            None,
        )
        .await?;
    let regenerated = app.expect_json(regenerated, StatusCode::OK).await?;
    assert_ne!(regenerated["invite_code"], code.as_str());

    let stale = app
        .post_json(
            &format!("/api/sessions/join/{code}"),
            &json!({ "pseudo": "Bob" }),
            None,
        )
        .await?;
    app.expect_json(stale, StatusCode::NOT_FOUND).await?;

    let malformed = app.get("/api/sessions/not-a-uuid", None).await?;
    let error = app.expect_json(malformed, StatusCode::BAD_REQUEST).await?;
    assert_eq!(error["error"], "ID de session invalide");

    let health = app.get("/api/health", None).await?;
    let health = app.expect_json(health, StatusCode::OK).await?;
    assert_eq!(health["database"], "ok");

    app.cleanup().await?;
    Ok(())
}
