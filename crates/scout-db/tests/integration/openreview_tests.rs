use scout_core::models::OpenReviewProfile;
use scout_core::traits::OpenReviewStore;

use crate::integration::common::setup_test_db;

fn ada() -> OpenReviewProfile {
    OpenReviewProfile {
        profile_id: "~Ada_Lovelace1".into(),
        profile_url: "https://openreview.net/profile?id=~Ada_Lovelace1".into(),
        name: Some("Ada Lovelace".into()),
        affiliation: Some("Analytical Engine Society".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn save_profile_stamps_crawl_time() {
    let (db, _container) = setup_test_db().await;
    let repo = db.openreview_repo();

    assert!(repo.last_crawled("~Ada_Lovelace1").await.unwrap().is_none());

    repo.save_profile(&ada(), Some(7)).await.unwrap();

    assert!(repo.last_crawled("~Ada_Lovelace1").await.unwrap().is_some());
    let stored = repo.profile("~Ada_Lovelace1").await.unwrap().unwrap();
    assert_eq!(stored["name"], "Ada Lovelace");
    assert_eq!(stored["affiliation"], "Analytical Engine Society");
}

#[tokio::test]
async fn recrawl_updates_row_and_keeps_candidate() {
    let (db, _container) = setup_test_db().await;
    let repo = db.openreview_repo();

    let first = repo.save_profile(&ada(), Some(7)).await.unwrap();
    let before = repo.last_crawled("~Ada_Lovelace1").await.unwrap().unwrap();

    let updated = OpenReviewProfile {
        affiliation: Some("Royal Society".into()),
        ..ada()
    };
    let second = repo.save_profile(&updated, None).await.unwrap();
    let after = repo.last_crawled("~Ada_Lovelace1").await.unwrap().unwrap();

    assert_eq!(first, second);
    assert!(after >= before);
    assert_eq!(repo.candidate_id("~Ada_Lovelace1").await.unwrap(), Some(7));
    let stored = repo.profile("~Ada_Lovelace1").await.unwrap().unwrap();
    assert_eq!(stored["affiliation"], "Royal Society");
}
