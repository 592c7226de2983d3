mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, uuid_at, TestApp};
use serde_json::{json, Value};

#[tokio::test]
async fn document_tree_versions_and_deletion() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (session, alice_id) = app.session_with_participant("Spécifications", "Alice").await?;
    let session_id = uuid_at(&session, "/id")?;
    let documents_path = format!("/api/sessions/{session_id}/documents");

    let root = app
        .post_json(
            &documents_path,
            &json!({
                "title": "Architecture Générale",
                "content": "# Vue d'ensemble",
                "type": "synthesis",
                "participant_id": alice_id,
            }),
            None,
        )
        .await?;
    let root = app.expect_json(root, StatusCode::CREATED).await?;
    let root_id = uuid_at(&root, "/id")?;
    assert_eq!(root["slug"], "architecture-generale");
    assert_eq!(root["type"], "synthesis");
    assert_eq!(root["current_version"], 1);
    assert_eq!(root["sort_order"], 0);

    // Same title, same session: the slug gets a counter.
    let twin = app
        .post_json(&documents_path, &json!({ "title": "Architecture générale" }), None)
        .await?;
    let twin = app.expect_json(twin, StatusCode::CREATED).await?;
    assert_eq!(twin["slug"], "architecture-generale-1");
    assert_eq!(twin["sort_order"], 1);

    let child = app
        .post_json(
            &documents_path,
            &json!({ "title": "Base de données", "parent_id": root_id }),
            None,
        )
        .await?;
    let child = app.expect_json(child, StatusCode::CREATED).await?;
    let child_id = uuid_at(&child, "/id")?;
    assert_eq!(child["parent_id"], root_id.to_string());
    assert_eq!(child["type"], "general");

    let bad_type = app
        .post_json(&documents_path, &json!({ "title": "X", "type": "memo" }), None)
        .await?;
    let error = app.expect_json(bad_type, StatusCode::BAD_REQUEST).await?;
    assert_eq!(error["error"], "Type de document invalide");

    let roots = app.get(&documents_path, None).await?;
    let roots = app.expect_json(roots, StatusCode::OK).await?;
    let titles: Vec<&str> = roots["documents"]
        .as_array()
        .map(|docs| docs.iter().filter_map(|doc| doc["title"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(titles, vec!["Architecture Générale", "Architecture générale"]);
    assert!(roots["documents"][0].get("content").is_none());

    let children = app
        .get(&format!("{documents_path}?parent_id={root_id}"), None)
        .await?;
    let children = app.expect_json(children, StatusCode::OK).await?;
    assert_eq!(children["documents"].as_array().map(Vec::len), Some(1));

    let by_slug = app
        .get(&format!("{documents_path}/by-slug/architecture-generale"), None)
        .await?;
    let by_slug = app.expect_json(by_slug, StatusCode::OK).await?;
    assert_eq!(by_slug["id"], root_id.to_string());
    assert_eq!(by_slug["content"], "# Vue d'ensemble");

    // Title-only changes keep the version.
    let renamed = app
        .patch_json(
            &format!("/api/documents/{root_id}"),
            &json!({ "title": "Architecture" }),
            None,
        )
        .await?;
    let renamed = app.expect_json(renamed, StatusCode::OK).await?;
    assert_eq!(renamed["current_version"], 1);

    let edited = app
        .patch_json(
            &format!("/api/documents/{root_id}"),
            &json!({
                "content": "# Vue d'ensemble\n\nDétails",
                "participant_id": alice_id,
                "change_description": "Ajout des détails",
            }),
            None,
        )
        .await?;
    let edited = app.expect_json(edited, StatusCode::OK).await?;
    assert_eq!(edited["current_version"], 2);

    let versions = app
        .get(&format!("/api/documents/{root_id}/versions"), None)
        .await?;
    let versions = app.expect_json(versions, StatusCode::OK).await?;
    let versions = versions["versions"].as_array().cloned().unwrap_or_default();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0]["change_description"], "Version initiale");
    assert_eq!(versions[1]["author"], "Alice");
    assert_eq!(versions[1]["change_description"], "Ajout des détails");
    assert!(versions[1].get("content").is_none());

    let with_content = app
        .get(
            &format!("/api/documents/{root_id}/versions?include_content=true"),
            None,
        )
        .await?;
    let with_content = app.expect_json(with_content, StatusCode::OK).await?;
    assert_eq!(with_content["versions"][0]["content"], "# Vue d'ensemble");

    let deleted = app.delete(&format!("/api/documents/{root_id}"), None).await?;
    let deleted = app.expect_json(deleted, StatusCode::OK).await?;
    assert_eq!(deleted["success"], true);
    let removed: Vec<Value> = deleted["deleted"].as_array().cloned().unwrap_or_default();
    assert_eq!(
        removed,
        vec![json!(child_id.to_string()), json!(root_id.to_string())]
    );

    let gone = app.get(&format!("/api/documents/{child_id}"), None).await?;
    let error = app.expect_json(gone, StatusCode::NOT_FOUND).await?;
    assert_eq!(error["error"], "Document non trouvé");

    let events = app.publisher().events();
    assert_eq!(
        events.iter().filter(|event| **event == "document.deleted").count(),
        2
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reorder_and_presence() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (session, alice_id) = app.session_with_participant("Plan", "Alice").await?;
    let session_id = uuid_at(&session, "/id")?;
    let documents_path = format!("/api/sessions/{session_id}/documents");

    let mut ids = Vec::new();
    for title in ["Un", "Deux", "Trois"] {
        let created = app
            .post_json(&documents_path, &json!({ "title": title }), None)
            .await?;
        let created = app.expect_json(created, StatusCode::CREATED).await?;
        ids.push(uuid_at(&created, "/id")?);
    }

    let moved = app
        .post_json(
            &format!("/api/documents/{}/reorder", ids[2]),
            &json!({ "position": 0 }),
            None,
        )
        .await?;
    let moved = app.expect_json(moved, StatusCode::OK).await?;
    assert_eq!(moved["sort_order"], 0);

    let listed = app.get(&documents_path, None).await?;
    let listed = app.expect_json(listed, StatusCode::OK).await?;
    let titles: Vec<&str> = listed["documents"]
        .as_array()
        .map(|docs| docs.iter().filter_map(|doc| doc["title"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(titles, vec!["Trois", "Un", "Deux"]);

    let missing_position = app
        .post_json(&format!("/api/documents/{}/reorder", ids[0]), &json!({}), None)
        .await?;
    let error = app
        .expect_json(missing_position, StatusCode::BAD_REQUEST)
        .await?;
    assert_eq!(error["error"], "position est requise");

    // Reading a document with a participant records where they are.
    let viewed = app
        .get(
            &format!("/api/documents/{}?participant_id={alice_id}", ids[1]),
            None,
        )
        .await?;
    app.expect_json(viewed, StatusCode::OK).await?;
    let online = app
        .get(&format!("/api/sessions/{session_id}/participants"), None)
        .await?;
    let online = app.expect_json(online, StatusCode::OK).await?;
    assert_eq!(
        online["participants"][0]["current_document_id"],
        ids[1].to_string()
    );

    let (_, stranger_id) = app.session_with_participant("Autre", "Mallory").await?;
    let foreign = app
        .patch_json(
            &format!("/api/documents/{}", ids[0]),
            &json!({ "content": "x", "participant_id": stranger_id }),
            None,
        )
        .await?;
    let error = app.expect_json(foreign, StatusCode::BAD_REQUEST).await?;
    assert_eq!(
        error["error"],
        "Le participant n'appartient pas à cette session"
    );

    app.cleanup().await?;
    Ok(())
}
