use scout_core::traits::LoginStore;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn upsert_reports_insert_then_duplicate() {
    let (db, _container) = setup_test_db().await;
    let repo = db.login_repo();

    let first = repo.upsert_login("octocat").await.unwrap();
    let again = repo.upsert_login("OctoCat").await.unwrap();
    let other = repo.upsert_login("hubot").await.unwrap();

    assert!(first.inserted);
    assert!(!again.inserted);
    assert_eq!(first.id, again.id);
    assert!(other.inserted);
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn save_profile_upserts_document() {
    let (db, _container) = setup_test_db().await;
    let repo = db.login_repo();

    let existing = repo.upsert_login("octocat").await.unwrap();
    let id = repo
        .save_profile("octocat", &serde_json::json!({"name": "The Octocat"}))
        .await
        .unwrap();
    assert_eq!(id, existing.id);

    repo.save_profile("octocat", &serde_json::json!({"name": "Mona"}))
        .await
        .unwrap();
    let profile = repo.profile("octocat").await.unwrap().unwrap();
    assert_eq!(profile["name"], "Mona");

    let fresh = repo
        .save_profile("hubot", &serde_json::json!({"name": "Hubot"}))
        .await
        .unwrap();
    assert!(repo.upsert_login("hubot").await.unwrap().id == fresh);
}

#[tokio::test]
async fn profile_of_bare_login_is_none() {
    let (db, _container) = setup_test_db().await;
    let repo = db.login_repo();

    repo.upsert_login("ghost").await.unwrap();
    assert!(repo.profile("ghost").await.unwrap().is_none());
    assert!(repo.profile("nobody").await.unwrap().is_none());
}
