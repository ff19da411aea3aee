use scout_core::task::{LogStatus, NewCrawlLog, NewTask, PendingQuery, TaskStatus, TaskTarget};
use scout_core::traits::TaskStore;

use crate::integration::common::setup_test_db;

fn github_task(login: &str) -> NewTask {
    NewTask::new("github", "profile", TaskTarget::Login(login.into()))
}

fn pending(source: &str) -> PendingQuery {
    PendingQuery {
        source: source.into(),
        limit: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn create_task_and_read_back() {
    let (db, _container) = setup_test_db().await;
    let repo = db.task_repo();

    let id = repo
        .create_task(
            &github_task("octocat")
                .with_priority(3)
                .with_depth(1)
                .with_batch_id("b-1")
                .with_candidate_id(42),
        )
        .await
        .unwrap();

    let task = repo.get(id).await.unwrap().unwrap();
    assert_eq!(task.source, "github");
    assert_eq!(task.task_type, "profile");
    assert_eq!(task.target, TaskTarget::Login("octocat".into()));
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 3);
    assert_eq!(task.depth, 1);
    assert_eq!(task.retries, 0);
    assert_eq!(task.batch_id.as_deref(), Some("b-1"));
    assert_eq!(task.candidate_id, Some(42));
}

#[tokio::test]
async fn get_missing_task_is_none() {
    let (db, _container) = setup_test_db().await;
    assert!(db.task_repo().get(999).await.unwrap().is_none());
}

#[tokio::test]
async fn pending_ordered_by_priority_then_age() {
    let (db, _container) = setup_test_db().await;
    let repo = db.task_repo();

    let low = repo.create_task(&github_task("low")).await.unwrap();
    let high = repo
        .create_task(&github_task("high").with_priority(5))
        .await
        .unwrap();
    let low_later = repo.create_task(&github_task("low2")).await.unwrap();
    repo.create_task(&NewTask::new("homepage", "fetch", TaskTarget::Url("https://a.test".into())))
        .await
        .unwrap();

    let ids: Vec<i64> = repo
        .fetch_pending(&pending("github"))
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();

    assert_eq!(ids, vec![high, low, low_later]);
}

#[tokio::test]
async fn pending_filters_types_exclusions_and_limit() {
    let (db, _container) = setup_test_db().await;
    let repo = db.task_repo();

    let a = repo.create_task(&github_task("a")).await.unwrap();
    let b = repo.create_task(&github_task("b")).await.unwrap();
    let scan = repo
        .create_task(&NewTask::new("github", "follow_scan", TaskTarget::Login("c".into())))
        .await
        .unwrap();

    let query = PendingQuery {
        task_types: Some(vec!["profile".into()]),
        exclude_ids: vec![a],
        ..pending("github")
    };
    let ids: Vec<i64> = repo
        .fetch_pending(&query)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![b]);

    let limited = PendingQuery {
        limit: 1,
        ..pending("github")
    };
    let first = repo.fetch_pending(&limited).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, a);

    repo.update_status(a, TaskStatus::Done).await.unwrap();
    repo.update_status(b, TaskStatus::Running).await.unwrap();
    let remaining = repo.fetch_pending(&pending("github")).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, scan);
}

#[tokio::test]
async fn status_retries_and_counts() {
    let (db, _container) = setup_test_db().await;
    let repo = db.task_repo();

    let id = repo.create_task(&github_task("octocat")).await.unwrap();
    repo.create_task(&github_task("other")).await.unwrap();

    repo.increment_retries(id).await.unwrap();
    repo.increment_retries(id).await.unwrap();
    repo.update_status(id, TaskStatus::Failed).await.unwrap();

    let task = repo.get(id).await.unwrap().unwrap();
    assert_eq!(task.retries, 2);
    assert_eq!(task.status, TaskStatus::Failed);

    assert_eq!(repo.count_by_status("github", TaskStatus::Failed).await.unwrap(), 1);
    assert_eq!(repo.count_by_status("github", TaskStatus::Pending).await.unwrap(), 1);
    assert_eq!(repo.count_by_status("homepage", TaskStatus::Pending).await.unwrap(), 0);
}

#[tokio::test]
async fn logs_and_entity_links() {
    let (db, _container) = setup_test_db().await;
    let repo = db.task_repo();

    let task_id = repo.create_task(&github_task("octocat")).await.unwrap();
    let log = NewCrawlLog {
        task_id,
        source: "github".into(),
        task_type: "profile".into(),
        target: "octocat".into(),
        status: LogStatus::Success,
        message: "repos=2".into(),
        trace_id: "trace-1".into(),
    };

    let log_id = repo.append_log(&log).await.unwrap();
    repo.link_log_entity(log_id, 7).await.unwrap();
    // Linking twice is a no-op.
    repo.link_log_entity(log_id, 7).await.unwrap();

    let (status, message, trace_id): (String, String, String) =
        sqlx::query_as("SELECT status, message, trace_id FROM crawl_logs WHERE id = $1")
            .bind(log_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(status, "success");
    assert_eq!(message, "repos=2");
    assert_eq!(trace_id, "trace-1");

    let (links,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM crawl_log_entities WHERE log_id = $1")
            .bind(log_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(links, 1);
}
