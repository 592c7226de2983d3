mod common;

use anyhow::Result;
use axum::http::StatusCode;
use collabdoc::notify::NullPublisher;
use collabdoc::services::decisions;
use collabdoc::services::sessions::find_participant;
use collabdoc::services::ServiceError;
use common::{acquire_db_lock, uuid_at, TestApp};
use serde_json::{json, Value};

#[tokio::test]
async fn sprint_review_vote_and_validation() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (session, alice_id) = app.session_with_participant("Sprint Review", "Alice").await?;
    let session_id = uuid_at(&session, "/id")?;
    let code = session["invite_code"].as_str().unwrap_or_default().to_string();
    let bob = app
        .post_json(
            &format!("/api/sessions/join/{code}"),
            &json!({ "pseudo": "Bob" }),
            None,
        )
        .await?;
    let bob = app.expect_json(bob, StatusCode::OK).await?;
    let bob_id = uuid_at(&bob, "/participant/id")?;

    let document = app
        .post_json(
            &format!("/api/sessions/{session_id}/documents"),
            &json!({ "title": "Front-end" }),
            None,
        )
        .await?;
    let document = app.expect_json(document, StatusCode::CREATED).await?;
    let document_id = uuid_at(&document, "/id")?;

    let too_few = app
        .post_json(
            "/api/decisions",
            &json!({ "session_id": session_id, "title": "Framework", "options": ["React"] }),
            None,
        )
        .await?;
    let error = app.expect_json(too_few, StatusCode::BAD_REQUEST).await?;
    assert_eq!(error["error"], "Au moins 2 options sont requises");

    // Items without a label do not count towards the minimum.
    let unlabeled = app
        .post_json(
            "/api/decisions",
            &json!({ "session_id": session_id, "title": "Framework", "options": ["React", 42] }),
            None,
        )
        .await?;
    let error = app.expect_json(unlabeled, StatusCode::BAD_REQUEST).await?;
    assert_eq!(error["error"], "Au moins 2 options sont requises");

    let created = app
        .post_json(
            "/api/decisions",
            &json!({
                "session_id": session_id,
                "title": "Framework",
                "description": "Choix pour le nouveau front",
                "options": [
                    { "label": "React", "description": "Écosystème large" },
                    { "text": "Vue" },
                    "Svelte",
                ],
                "document_id": document_id,
            }),
            None,
        )
        .await?;
    let decision = app.expect_json(created, StatusCode::CREATED).await?;
    let decision_id = uuid_at(&decision, "/id")?;
    assert_eq!(decision["status"], "ouvert");
    assert_eq!(decision["is_locked"], false);
    assert_eq!(decision["linked_document_id"], document_id.to_string());
    let options: Vec<Value> = decision["options"].as_array().cloned().unwrap_or_default();
    let labels: Vec<&str> = options.iter().filter_map(|o| o["label"].as_str()).collect();
    assert_eq!(labels, vec!["React", "Vue", "Svelte"]);
    let react = uuid_at(&options[0], "/id")?;
    let vue = uuid_at(&options[1], "/id")?;

    let vote_path = format!("/api/decisions/{decision_id}/vote");
    let bad_option = app
        .post_json(
            &vote_path,
            &json!({ "participant_id": alice_id, "option_id": uuid::Uuid::new_v4() }),
            None,
        )
        .await?;
    let error = app.expect_json(bad_option, StatusCode::BAD_REQUEST).await?;
    assert_eq!(error["error"], "Option invalide");

    let (_, mallory_id) = app.session_with_participant("Autre atelier", "Mallory").await?;
    let foreign_vote = app
        .post_json(
            &vote_path,
            &json!({ "participant_id": mallory_id, "option_id": vue }),
            None,
        )
        .await?;
    let error = app.expect_json(foreign_vote, StatusCode::BAD_REQUEST).await?;
    assert_eq!(error["error"], "Le participant n'appartient pas à cette session");

    let voted = app
        .post_json(
            &vote_path,
            &json!({ "participant_id": alice_id, "option_id": vue, "comment": "Plus simple" }),
            None,
        )
        .await?;
    let voted = app.expect_json(voted, StatusCode::OK).await?;
    assert_eq!(voted["vote"]["comment"], "Plus simple");
    assert_eq!(voted["stats"][vue.to_string()], 1);

    // A second vote from the same participant replaces the first one.
    let changed = app
        .post_json(
            &vote_path,
            &json!({ "participant_id": alice_id, "option_id": react }),
            None,
        )
        .await?;
    let changed = app.expect_json(changed, StatusCode::OK).await?;
    assert_eq!(changed["stats"][vue.to_string()], 0);
    assert_eq!(changed["stats"][react.to_string()], 1);

    let bob_vote = app
        .post_json(
            &vote_path,
            &json!({ "participant_id": bob_id, "option_id": react }),
            None,
        )
        .await?;
    app.expect_json(bob_vote, StatusCode::OK).await?;

    let withdrawn = app
        .delete(&format!("/api/decisions/{decision_id}/votes/{bob_id}"), None)
        .await?;
    let withdrawn = app.expect_json(withdrawn, StatusCode::OK).await?;
    assert_eq!(withdrawn["vote_count"], 1);

    let discussing = app
        .patch_json(
            &format!("/api/decisions/{decision_id}/status"),
            &json!({ "status": "en_discussion" }),
            None,
        )
        .await?;
    let discussing = app.expect_json(discussing, StatusCode::OK).await?;
    assert_eq!(discussing["status"], "en_discussion");

    let filtered = app
        .get(
            &format!("/api/decisions/session/{session_id}?status=en_discussion"),
            None,
        )
        .await?;
    let filtered = app.expect_json(filtered, StatusCode::OK).await?;
    assert_eq!(filtered.as_array().map(Vec::len), Some(1));

    let bad_filter = app
        .get(&format!("/api/decisions/session/{session_id}?status=peut-etre"), None)
        .await?;
    app.expect_json(bad_filter, StatusCode::BAD_REQUEST).await?;

    let before_validation = {
        let mut conn = app.state.pool.get()?;
        decisions::find_decision(&mut conn, decision_id)?
    };

    let validated = app
        .post_json(
            &format!("/api/decisions/{decision_id}/validate"),
            &json!({ "selected_option_id": react }),
            None,
        )
        .await?;
    let validated = app.expect_json(validated, StatusCode::OK).await?;
    assert_eq!(validated["status"], "valide");
    assert_eq!(validated["is_locked"], true);
    assert_eq!(validated["selected_option_id"], react.to_string());

    let locked_vote = app
        .post_json(
            &vote_path,
            &json!({ "participant_id": bob_id, "option_id": vue }),
            None,
        )
        .await?;
    app.expect_json(locked_vote, StatusCode::CONFLICT).await?;

    // A copy of the decision read before validation still sees the lock.
    {
        let mut conn = app.state.pool.get()?;
        assert!(!before_validation.is_locked);
        let bob = find_participant(&mut conn, bob_id)?;
        let late = decisions::vote(&mut conn, &NullPublisher, &before_validation, &bob, vue, None);
        assert!(matches!(late, Err(ServiceError::Locked(_))));
        let late_withdrawal =
            decisions::remove_vote(&mut conn, &NullPublisher, &before_validation, alice_id);
        assert!(matches!(late_withdrawal, Err(ServiceError::Locked(_))));
    }

    let locked_status = app
        .patch_json(
            &format!("/api/decisions/{decision_id}/status"),
            &json!({ "status": "ouvert" }),
            None,
        )
        .await?;
    app.expect_json(locked_status, StatusCode::CONFLICT).await?;

    let revalidate = app
        .post_json(
            &format!("/api/decisions/{decision_id}/validate"),
            &json!({ "selected_option_id": vue }),
            None,
        )
        .await?;
    app.expect_json(revalidate, StatusCode::CONFLICT).await?;

    let arbitrations = app
        .get(
            &format!("/api/decisions/session/{session_id}/arbitrations"),
            None,
        )
        .await?;
    let arbitrations = app.expect_json(arbitrations, StatusCode::OK).await?;
    assert_eq!(arbitrations[0]["title"], "Framework");
    assert_eq!(arbitrations[0]["selected_option"]["label"], "React");
    assert_eq!(arbitrations[0]["document"]["title"], "Front-end");
    assert_eq!(arbitrations[0]["vote_count"], 1);

    // Postponing is always allowed and unlocks the decision.
    let postponed = app
        .post_json(
            &format!("/api/decisions/{decision_id}/postpone"),
            &json!({}),
            None,
        )
        .await?;
    let postponed = app.expect_json(postponed, StatusCode::OK).await?;
    assert_eq!(postponed["status"], "reporte");
    assert_eq!(postponed["is_locked"], false);

    let deleted = app
        .delete(&format!("/api/decisions/{decision_id}"), None)
        .await?;
    let deleted = app.expect_json(deleted, StatusCode::OK).await?;
    assert_eq!(deleted["success"], true);

    let missing = app
        .get(&format!("/api/decisions/{decision_id}"), None)
        .await?;
    let error = app.expect_json(missing, StatusCode::NOT_FOUND).await?;
    assert_eq!(error["error"], "Décision non trouvée");

    let events = app.publisher().events();
    for expected in [
        "decision.created",
        "vote.received",
        "decision.status_changed",
        "decision.deleted",
    ] {
        assert!(events.contains(&expected), "missing {expected}");
    }

    app.cleanup().await?;
    Ok(())
}
