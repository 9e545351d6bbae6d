use std::sync::Arc;
use std::time::Duration;

use sink::channel::ControlChannel;
use sink::channel::memory::MemoryChannel;
use sink::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use sink::error::ErrorKind;
use sink::events::{CommitResponse, Event, EventType, Payload};
use sink::table::memory::MemoryTable;
use sink::test_utils::factory::{
    events_of_type, test_connector_config, test_data_file, topic_partition, wait_for_events,
};
use sink::test_utils::table::TestCommitterWrapper;
use sink::types::{CommitId, OffsetEntry, TableName, TopicPartition};
use sink::workers::base::{Worker, WorkerHandle};
use sink::workers::coordinator::{CoordinatorWorker, CoordinatorWorkerHandle};
use telemetry::tracing::init_test_tracing;
use tokio::time::Instant;

struct RunningCoordinator {
    channel: MemoryChannel,
    committer: TestCommitterWrapper<MemoryTable>,
    shutdown_tx: ShutdownTx,
    handle: CoordinatorWorkerHandle,
}

/// Starts a coordinator alone on a fresh channel, with no agents attached, so tests
/// can inject responses by hand.
async fn start_coordinator(expected: Vec<TopicPartition>) -> RunningCoordinator {
    let channel = MemoryChannel::new(1);
    let committer = TestCommitterWrapper::wrap(MemoryTable::new());
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let coordinator = CoordinatorWorker::new(
        Arc::new(test_connector_config("gen-1")),
        TableName::parse("db.events").unwrap(),
        expected,
        channel.clone(),
        committer.clone(),
        shutdown_rx,
    );
    let handle = coordinator.start().await.unwrap();

    RunningCoordinator {
        channel,
        committer,
        shutdown_tx,
        handle,
    }
}

/// Waits for the next commit request and returns its commit id.
async fn observe_commit_request(channel: &MemoryChannel, nth: usize) -> CommitId {
    let events = wait_for_events(channel, |events| {
        events_of_type(events, EventType::CommitRequest).len() > nth
    })
    .await;

    events_of_type(&events, EventType::CommitRequest)[nth]
        .payload()
        .commit_id()
        .clone()
}

fn response(
    commit_id: CommitId,
    files: Vec<&str>,
    assignments: Vec<TopicPartition>,
    offsets: Vec<OffsetEntry>,
) -> Event {
    Event::new(Payload::CommitResponse(CommitResponse {
        commit_id,
        table_name: TableName::parse("db.events").unwrap(),
        data_files: files
            .into_iter()
            .map(|path| test_data_file(path, 10))
            .collect(),
        assignments,
        offsets: Some(offsets),
    }))
}

#[tokio::test(start_paused = true)]
async fn no_responses_reaches_the_deadline_without_a_storage_commit() {
    init_test_tracing();

    let running = start_coordinator(vec![topic_partition("orders", 0)]).await;

    // Nobody answers the first request; once the second request is out, the first
    // cycle has long passed its deadline.
    observe_commit_request(&running.channel, 1).await;

    assert_eq!(running.committer.commit_attempts().await, 0);
    assert!(running.committer.commits().await.is_empty());
    let events = running.channel.events().await;
    assert!(events_of_type(&events, EventType::CommitComplete).is_empty());

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stale_commit_id_responses_never_contribute() {
    init_test_tracing();

    let running = start_coordinator(vec![topic_partition("orders", 0)]).await;

    let open_id = observe_commit_request(&running.channel, 0).await;

    // Same generation, different cycle: pretends to answer a request that was never
    // issued.
    let stale_id = CommitId::generate("gen-1");
    assert_ne!(stale_id, open_id);
    running
        .channel
        .publish(
            "test",
            &response(
                stale_id,
                vec!["s3://bucket/stale.parquet"],
                vec![topic_partition("orders", 0)],
                vec![OffsetEntry::new("orders", 0, 5)],
            ),
        )
        .await
        .unwrap();

    // The stale response covers every expected assignment, so the only way the cycle
    // can resolve is through its deadline, with nothing merged.
    observe_commit_request(&running.channel, 1).await;
    assert_eq!(running.committer.commit_attempts().await, 0);

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn superseded_generation_responses_never_contribute() {
    init_test_tracing();

    let running = start_coordinator(vec![topic_partition("orders", 0)]).await;

    let open_id = observe_commit_request(&running.channel, 0).await;

    // Same cycle uuid, different transactional suffix: a worker from a previous
    // connector generation answering a request it should not.
    let foreign_id = CommitId {
        id: open_id.id,
        txn_suffix: "gen-0".to_string(),
    };
    running
        .channel
        .publish(
            "test",
            &response(
                foreign_id,
                vec!["s3://bucket/old-gen.parquet"],
                vec![topic_partition("orders", 0)],
                vec![OffsetEntry::new("orders", 0, 5)],
            ),
        )
        .await
        .unwrap();

    observe_commit_request(&running.channel, 1).await;
    assert_eq!(running.committer.commit_attempts().await, 0);

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disjoint_responses_merge_every_file_exactly_once() {
    init_test_tracing();

    let running = start_coordinator(vec![
        topic_partition("orders", 0),
        topic_partition("orders", 1),
    ])
    .await;

    let open_id = observe_commit_request(&running.channel, 0).await;

    let commit_notify = running
        .committer
        .notify_on_commits(|commits| commits.len() == 1)
        .await;

    running
        .channel
        .publish(
            "test",
            &response(
                open_id.clone(),
                vec!["s3://bucket/a.parquet", "s3://bucket/b.parquet"],
                vec![topic_partition("orders", 0)],
                vec![OffsetEntry::new("orders", 0, 41)],
            ),
        )
        .await
        .unwrap();
    running
        .channel
        .publish(
            "test",
            &response(
                open_id,
                vec!["s3://bucket/c.parquet"],
                vec![topic_partition("orders", 1)],
                vec![OffsetEntry::new("orders", 1, 7)],
            ),
        )
        .await
        .unwrap();

    // Full coverage commits early, well before the deadline.
    commit_notify.notified().await;

    let commits = running.committer.commits().await;
    assert_eq!(commits.len(), 1);
    let mut paths: Vec<_> = commits[0]
        .data_files
        .iter()
        .map(|file| file.path.clone())
        .collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "s3://bucket/a.parquet".to_string(),
            "s3://bucket/b.parquet".to_string(),
            "s3://bucket/c.parquet".to_string(),
        ]
    );
    assert_eq!(
        commits[0].offsets.get(&topic_partition("orders", 0)),
        Some(&41)
    );
    assert_eq!(
        commits[0].offsets.get(&topic_partition("orders", 1)),
        Some(&7)
    );

    // Exactly one completion broadcast carrying the committed offsets.
    let events = running.channel.events().await;
    let completions = events_of_type(&events, EventType::CommitComplete);
    assert_eq!(completions.len(), 1);
    let Payload::CommitComplete(complete) = completions[0].payload() else {
        panic!("expected a commit completion");
    };
    assert_eq!(complete.snapshot_id, Some(commits[0].snapshot_id));
    assert_eq!(complete.offsets.len(), 2);

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn overlapping_assignments_resolve_to_the_later_response() {
    init_test_tracing();

    // Three expected partitions keep the cycle open until its deadline, so both
    // conflicting responses are in before the merge is resolved.
    let running = start_coordinator(vec![
        topic_partition("orders", 0),
        topic_partition("orders", 1),
        topic_partition("orders", 2),
    ])
    .await;

    let open_id = observe_commit_request(&running.channel, 0).await;

    let commit_notify = running
        .committer
        .notify_on_commits(|commits| commits.len() == 1)
        .await;

    // An earlier response claims orders-0 and orders-1 together.
    running
        .channel
        .publish(
            "test",
            &response(
                open_id.clone(),
                vec!["s3://bucket/early.parquet"],
                vec![topic_partition("orders", 0), topic_partition("orders", 1)],
                vec![
                    OffsetEntry::new("orders", 0, 3),
                    OffsetEntry::new("orders", 1, 4),
                ],
            ),
        )
        .await
        .unwrap();
    // A later response claims orders-1 again, as happens when the partition moved
    // between workers mid-cycle. The later log offset wins and the earlier claim is
    // evicted wholesale.
    running
        .channel
        .publish(
            "test",
            &response(
                open_id,
                vec!["s3://bucket/late.parquet"],
                vec![topic_partition("orders", 1)],
                vec![OffsetEntry::new("orders", 1, 9)],
            ),
        )
        .await
        .unwrap();

    commit_notify.notified().await;

    let commits = running.committer.commits().await;
    assert_eq!(commits.len(), 1);
    let paths: Vec<_> = commits[0]
        .data_files
        .iter()
        .map(|file| file.path.clone())
        .collect();
    assert_eq!(paths, vec!["s3://bucket/late.parquet".to_string()]);
    assert_eq!(
        commits[0].offsets.get(&topic_partition("orders", 1)),
        Some(&9)
    );
    assert!(
        !commits[0]
            .offsets
            .contains_key(&topic_partition("orders", 0))
    );

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn partial_coverage_commits_at_the_deadline() {
    init_test_tracing();

    let started_at = Instant::now();
    let running = start_coordinator(vec![
        topic_partition("orders", 0),
        topic_partition("orders", 1),
    ])
    .await;

    let open_id = observe_commit_request(&running.channel, 0).await;

    let commit_notify = running
        .committer
        .notify_on_commits(|commits| commits.len() == 1)
        .await;

    // Only one of the two expected workers answers.
    running
        .channel
        .publish(
            "test",
            &response(
                open_id,
                vec!["s3://bucket/only.parquet"],
                vec![topic_partition("orders", 0)],
                vec![OffsetEntry::new("orders", 0, 12)],
            ),
        )
        .await
        .unwrap();

    commit_notify.notified().await;

    // The commit happened at the deadline (interval + timeout) and not a full
    // interval later.
    let elapsed = started_at.elapsed();
    assert!(elapsed >= Duration::from_secs(90), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(120), "elapsed {elapsed:?}");

    let commits = running.committer.commits().await;
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].data_files.len(), 1);
    assert!(
        !commits[0]
            .offsets
            .contains_key(&topic_partition("orders", 1))
    );

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_commits_retry_their_files_on_the_next_cycle() {
    init_test_tracing();

    let running = start_coordinator(vec![topic_partition("orders", 0)]).await;
    running
        .committer
        .fail_next_commit(ErrorKind::CommitConflict)
        .await;

    let first_id = observe_commit_request(&running.channel, 0).await;
    running
        .channel
        .publish(
            "test",
            &response(
                first_id,
                vec!["s3://bucket/retried.parquet"],
                vec![topic_partition("orders", 0)],
                vec![OffsetEntry::new("orders", 0, 21)],
            ),
        )
        .await
        .unwrap();

    // First cycle: the commit attempt fails, nothing is recorded, no completion goes
    // out.
    let second_id = observe_commit_request(&running.channel, 1).await;
    assert_eq!(running.committer.commit_attempts().await, 1);
    assert!(running.committer.commits().await.is_empty());
    let events = running.channel.events().await;
    assert!(events_of_type(&events, EventType::CommitComplete).is_empty());

    let commit_notify = running
        .committer
        .notify_on_commits(|commits| commits.len() == 1)
        .await;

    // Second cycle: the worker has nothing new, yet the carried-over files commit.
    running
        .channel
        .publish(
            "test",
            &response(
                second_id,
                vec![],
                vec![topic_partition("orders", 0)],
                vec![OffsetEntry::new("orders", 0, 21)],
            ),
        )
        .await
        .unwrap();
    commit_notify.notified().await;

    assert_eq!(running.committer.commit_attempts().await, 2);
    let commits = running.committer.commits().await;
    assert_eq!(commits.len(), 1);
    assert_eq!(
        commits[0].data_files[0].path,
        "s3://bucket/retried.parquet"
    );
    assert_eq!(
        commits[0].offsets.get(&topic_partition("orders", 0)),
        Some(&21)
    );

    let events = running.channel.events().await;
    assert_eq!(events_of_type(&events, EventType::CommitComplete).len(), 1);

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}
