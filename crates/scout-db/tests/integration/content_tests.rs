use scout_core::models::{NewRawText, compute_hash};
use scout_core::traits::ContentStore;

use crate::integration::common::setup_test_db;

fn raw(url: &str, candidate_id: Option<i64>) -> NewRawText {
    let text = "Ada works on distributed consensus.".to_string();
    NewRawText {
        candidate_id,
        url: url.into(),
        content_hash: compute_hash(&text),
        text,
        source_tag: "homepage".into(),
    }
}

#[tokio::test]
async fn save_then_exists_per_candidate() {
    let (db, _container) = setup_test_db().await;
    let repo = db.content_repo();
    let url = "https://ada.example.edu/";

    assert!(!repo.exists(url, Some(1)).await.unwrap());

    let id = repo.save(&raw(url, Some(1))).await.unwrap();
    assert!(id > 0);

    assert!(repo.exists(url, Some(1)).await.unwrap());
    assert!(!repo.exists(url, Some(2)).await.unwrap());
    assert!(!repo.exists(url, None).await.unwrap());
}

#[tokio::test]
async fn exists_without_candidate() {
    let (db, _container) = setup_test_db().await;
    let repo = db.content_repo();
    let url = "https://blog.example.com/";

    repo.save(&raw(url, None)).await.unwrap();

    assert!(repo.exists(url, None).await.unwrap());
    assert!(!repo.exists("https://other.example.com/", None).await.unwrap());
}
