use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::client::{ImageState, ProviderError, SourceImage};
use crate::config::ReplicationConfig;
use crate::manifest::read_manifest;
use crate::progress::NullProgress;
use crate::retry::RetryConfig;
use crate::test_support::{FakeImageClient, InFlightGauge, RecordingProgress, source_image};

use super::{
    CopyError, CopyTask, ReplicationEngine, ReplicationError, ResolvedTarget, TargetAccount,
};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 4,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
    }
}

fn task_for(client: Arc<FakeImageClient>, account: &str) -> CopyTask {
    CopyTask::new(client, source_image("ami-1"), account).with_tag_retry(fast_retry())
}

fn task_with(client: &Arc<FakeImageClient>, source: SourceImage) -> CopyTask {
    let handle = Arc::clone(client);
    CopyTask::new(handle, source, "222222222222").with_tag_retry(fast_retry())
}

fn engine() -> ReplicationEngine {
    ReplicationEngine::new(Arc::new(NullProgress))
}

fn plan_of(tasks: Vec<CopyTask>) -> super::ReplicationPlan {
    super::ReplicationPlan {
        tasks,
        failures: Vec::new(),
    }
}

#[tokio::test]
async fn all_tasks_succeeding_yield_a_full_manifest() {
    let first = Arc::new(FakeImageClient::new("222222222222"));
    let second = Arc::new(FakeImageClient::new("333333333333"));
    let tasks = vec![
        task_for(Arc::clone(&first), "222222222222"),
        task_for(Arc::clone(&second), "333333333333"),
    ];

    let entries = engine()
        .replicate(plan_of(tasks))
        .await
        .unwrap_or_else(|err| panic!("all copies should succeed: {err}"));

    assert_eq!(entries.len(), 2);
    let mut accounts: Vec<_> = entries.iter().map(|entry| entry.account_id.clone()).collect();
    accounts.sort();
    assert_eq!(accounts, vec!["222222222222", "333333333333"]);
    assert!(entries.iter().all(|entry| entry.region == "us-east-1"));
    assert_eq!(first.copy_calls(), 1);
    assert_eq!(second.copy_calls(), 1);
}

#[tokio::test]
async fn partial_failure_keeps_the_successes_and_counts_the_failures() {
    let good = Arc::new(FakeImageClient::new("222222222222"));
    let bad = Arc::new(FakeImageClient::new("333333333333"));
    bad.push_copy_result(Err(ProviderError::message("copy rejected")));
    let tasks = vec![
        task_for(good, "222222222222"),
        task_for(bad, "333333333333"),
    ];

    let err = engine()
        .replicate(plan_of(tasks))
        .await
        .expect_err("one failed copy must surface");

    let ReplicationError::Partial {
        completed,
        failures,
        total,
    } = err;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].account_id, "222222222222");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].account_id, "333333333333");
    assert_eq!(total, 2);
    assert_eq!(
        ReplicationError::Partial {
            completed,
            failures,
            total
        }
        .to_string(),
        "1/2 image copies failed, manual reconciliation may be required"
    );
}

#[tokio::test]
async fn worker_pool_respects_the_concurrency_cap() {
    let gauge = Arc::new(InFlightGauge::default());
    let tasks: Vec<CopyTask> = (0..6)
        .map(|index| {
            let client = Arc::new(
                FakeImageClient::new(&format!("22222222222{index}"))
                    .with_gauge(Arc::clone(&gauge))
                    .with_copy_delay(Duration::from_millis(10)),
            );
            task_for(client, &format!("22222222222{index}"))
        })
        .collect();

    let entries = engine()
        .with_concurrency(2)
        .replicate(plan_of(tasks))
        .await
        .unwrap_or_else(|err| panic!("all copies should succeed: {err}"));

    assert_eq!(entries.len(), 6);
    assert!(gauge.peak() <= 2, "observed {} in-flight copies", gauge.peak());
}

#[tokio::test]
async fn tags_only_skips_the_copy_and_reuses_the_source_id() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    let mut source = source_image("ami-1");
    source.tags.insert("team".to_owned(), "infra".to_owned());
    let task = task_with(&client, source).with_tags_only(true);

    let entry = task
        .execute(&NullProgress)
        .await
        .unwrap_or_else(|err| panic!("tags-only task should succeed: {err}"));

    assert_eq!(entry.image_id, "ami-1");
    assert_eq!(client.copy_calls(), 0);
    assert_eq!(client.tag_calls(), 1);
}

#[tokio::test]
async fn tags_only_with_no_tags_issues_no_network_calls() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    let task = task_for(Arc::clone(&client), "222222222222").with_tags_only(true);

    let entry = task
        .execute(&NullProgress)
        .await
        .unwrap_or_else(|err| panic!("tags-only task should succeed: {err}"));

    assert_eq!(entry.image_id, "ami-1");
    assert_eq!(client.copy_calls(), 0);
    assert_eq!(client.tag_calls(), 0);
}

#[tokio::test]
async fn a_task_with_no_tags_never_calls_create_tags() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    let task = task_for(Arc::clone(&client), "222222222222");

    task.execute(&NullProgress)
        .await
        .unwrap_or_else(|err| panic!("copy should succeed: {err}"));

    assert_eq!(client.tag_calls(), 0);
}

#[tokio::test]
async fn tagging_retries_through_permission_propagation_races() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    for _ in 0..3 {
        client.push_tag_result(Err(ProviderError::with_code(
            "UnauthorizedOperation",
            "permissions still propagating",
        )));
    }
    let mut source = source_image("ami-1");
    source.tags.insert("team".to_owned(), "infra".to_owned());
    let task = task_with(&client, source);

    task.execute(&NullProgress)
        .await
        .unwrap_or_else(|err| panic!("tagging should succeed after retries: {err}"));

    assert_eq!(client.tag_calls(), 4);
}

#[tokio::test]
async fn tagging_a_vanished_image_counts_as_success() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    client.push_tag_result(Err(ProviderError::with_code(
        "InvalidAMIID.NotFound",
        "image is gone",
    )));
    let mut source = source_image("ami-1");
    source.tags.insert("team".to_owned(), "infra".to_owned());
    let task = task_with(&client, source);

    task.execute(&NullProgress)
        .await
        .unwrap_or_else(|err| panic!("a vanished image leaves nothing to tag: {err}"));

    assert_eq!(client.tag_calls(), 1);
}

#[tokio::test]
async fn extra_tags_win_over_source_tags_on_collision() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    let mut source = source_image("ami-1");
    source.tags.insert("team".to_owned(), "infra".to_owned());
    source.tags.insert("stage".to_owned(), "build".to_owned());
    let mut extra = BTreeMap::new();
    extra.insert("stage".to_owned(), "release".to_owned());
    let task = task_with(&client, source).with_extra_tags(extra);

    task.execute(&NullProgress)
        .await
        .unwrap_or_else(|err| panic!("copy should succeed: {err}"));

    let tagged = client.tagged();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].1.get("stage").map(String::as_str), Some("release"));
    assert_eq!(tagged[0].1.get("team").map(String::as_str), Some("infra"));
}

#[tokio::test]
async fn ensure_available_waits_until_the_copy_settles() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    client.push_image_state(Ok(ImageState::Pending));
    client.push_image_state(Ok(ImageState::Pending));
    client.push_image_state(Ok(ImageState::Available));
    let task = task_for(Arc::clone(&client), "222222222222")
        .with_ensure_available(true)
        .with_availability(5, Duration::from_millis(1));

    task.execute(&NullProgress)
        .await
        .unwrap_or_else(|err| panic!("copy should become available: {err}"));
}

#[tokio::test]
async fn ensure_available_fails_hard_on_a_failed_copy() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    client.push_image_state(Ok(ImageState::Failed));
    let task = task_for(Arc::clone(&client), "222222222222")
        .with_ensure_available(true)
        .with_availability(5, Duration::from_millis(1));

    let err = task
        .execute(&NullProgress)
        .await
        .expect_err("a failed copy is a hard error");
    assert!(matches!(err, CopyError::CopyFailed { .. }));
}

#[tokio::test]
async fn ensure_available_times_out_after_the_configured_attempts() {
    let client = Arc::new(FakeImageClient::new("222222222222"));
    for _ in 0..3 {
        client.push_image_state(Ok(ImageState::Pending));
    }
    let task = task_for(Arc::clone(&client), "222222222222")
        .with_ensure_available(true)
        .with_availability(3, Duration::from_millis(1));

    let err = task
        .execute(&NullProgress)
        .await
        .expect_err("a copy stuck pending must time out");
    assert!(matches!(err, CopyError::AvailabilityTimeout { .. }));
}

#[tokio::test]
async fn planning_resolves_identities_and_shares_the_source() {
    let source_client = FakeImageClient::new("111111111111");
    let target = Arc::new(FakeImageClient::new("222222222222"));
    let progress = Arc::new(RecordingProgress::default());
    let engine = ReplicationEngine::new(Arc::clone(&progress) as Arc<dyn crate::progress::Progress>);
    let source = source_image("ami-1");

    let plan = engine
        .plan(
            &source_client,
            &source,
            vec![ResolvedTarget {
                account: TargetAccount::Resolve,
                client: target,
                region: None,
            }],
            &ReplicationConfig::default(),
        )
        .await;

    assert_eq!(plan.tasks.len(), 1);
    assert!(plan.failures.is_empty());
    assert_eq!(
        source_client.image_shares(),
        vec![("ami-1".to_owned(), "222222222222".to_owned())]
    );
    assert!(
        progress
            .lines()
            .iter()
            .any(|line| line.contains("Resolved target account 222222222222"))
    );
}

#[tokio::test]
async fn planning_counts_an_identity_failure_instead_of_aborting() {
    let source_client = FakeImageClient::new("111111111111");
    let broken = Arc::new(FakeImageClient::new("222222222222"));
    broken.set_identity(Err(ProviderError::message("no credentials")));
    let healthy = Arc::new(FakeImageClient::new("333333333333"));
    let source = source_image("ami-1");

    let plan = engine()
        .plan(
            &source_client,
            &source,
            vec![
                ResolvedTarget {
                    account: TargetAccount::Resolve,
                    client: broken,
                    region: None,
                },
                ResolvedTarget {
                    account: TargetAccount::Known("333333333333".to_owned()),
                    client: healthy,
                    region: Some("eu-west-1".to_owned()),
                },
            ],
            &ReplicationConfig::default(),
        )
        .await;

    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.failures.len(), 1);
    assert!(matches!(plan.failures[0].error, CopyError::Identity(_)));

    let err = engine()
        .replicate(plan)
        .await
        .expect_err("the planning failure must count against the run");
    let ReplicationError::Partial {
        completed, total, ..
    } = err;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].region, "eu-west-1");
    assert_eq!(total, 2);
}

#[tokio::test]
async fn known_accounts_skip_identity_and_sharing() {
    let source_client = FakeImageClient::new("111111111111");
    let target = Arc::new(FakeImageClient::new("222222222222"));
    let source = source_image("ami-1");

    let plan = engine()
        .plan(
            &source_client,
            &source,
            vec![ResolvedTarget {
                account: TargetAccount::Known("222222222222".to_owned()),
                client: target,
                region: None,
            }],
            &ReplicationConfig::default(),
        )
        .await;

    assert_eq!(plan.tasks.len(), 1);
    assert!(source_client.image_shares().is_empty());
}

#[tokio::test]
async fn the_manifest_lands_on_disk_after_the_run() {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(dir.path().join("manifest.json"))
        .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
    let client = Arc::new(FakeImageClient::new("222222222222"));
    let tasks = vec![task_for(client, "222222222222")];

    let entries = engine()
        .with_manifest_output(Some(path.clone()))
        .replicate(plan_of(tasks))
        .await
        .unwrap_or_else(|err| panic!("copy should succeed: {err}"));

    let written = read_manifest(&path)
        .await
        .unwrap_or_else(|err| panic!("manifest should be readable: {err}"));
    assert_eq!(written, entries);
}

#[tokio::test]
async fn a_failed_manifest_write_does_not_fail_the_run() {
    let path = Utf8PathBuf::from("/nonexistent-imageferry-dir/manifest.json");
    let client = Arc::new(FakeImageClient::new("222222222222"));
    let progress = Arc::new(RecordingProgress::default());
    let engine = ReplicationEngine::new(Arc::clone(&progress) as Arc<dyn crate::progress::Progress>)
        .with_manifest_output(Some(path));
    let tasks = vec![task_for(client, "222222222222")];

    let entries = engine
        .replicate(plan_of(tasks))
        .await
        .unwrap_or_else(|err| panic!("copy should still succeed: {err}"));

    assert_eq!(entries.len(), 1);
    assert!(
        progress
            .errors()
            .iter()
            .any(|line| line.contains("unable to write manifest"))
    );
}
