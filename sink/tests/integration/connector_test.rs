use bytes::Bytes;
use sink::channel::memory::MemoryChannel;
use sink::connector::Connector;
use sink::error::ErrorKind;
use sink::events::EventType;
use sink::table::memory::MemoryTable;
use sink::test_utils::factory::{
    events_of_type, test_connector_config, test_data_file, topic_partition, wait_for_events,
};
use sink::test_utils::table::TestCommitterWrapper;
use sink::types::TopicPartition;
use telemetry::tracing::init_test_tracing;

type TestConnector = Connector<MemoryChannel, TestCommitterWrapper<MemoryTable>>;

fn connector(
    channel: &MemoryChannel,
    committer: &TestCommitterWrapper<MemoryTable>,
    own: Vec<TopicPartition>,
    group: Vec<TopicPartition>,
) -> TestConnector {
    Connector::new(
        test_connector_config("gen-1"),
        own,
        group,
        channel.clone(),
        committer.clone(),
    )
}

#[tokio::test(start_paused = true)]
async fn two_workers_produce_one_commit_and_one_completion() {
    init_test_tracing();

    let channel = MemoryChannel::new(1);
    let committer = TestCommitterWrapper::wrap(MemoryTable::new());
    let group = vec![topic_partition("orders", 0), topic_partition("orders", 1)];

    // The instance owning orders-0 leads the group and runs the coordinator.
    let mut leader = connector(
        &channel,
        &committer,
        vec![topic_partition("orders", 0)],
        group.clone(),
    );
    let mut follower = connector(
        &channel,
        &committer,
        vec![topic_partition("orders", 1)],
        group,
    );

    leader.start().await.unwrap();
    follower.start().await.unwrap();

    let leader_writer = leader.writer().unwrap();
    let follower_writer = follower.writer().unwrap();

    leader_writer
        .files_written(
            topic_partition("orders", 0),
            vec![
                test_data_file("s3://bucket/a.parquet", 10),
                test_data_file("s3://bucket/b.parquet", 20),
                test_data_file("s3://bucket/c.parquet", 30),
            ],
            41,
        )
        .await
        .unwrap();
    follower_writer
        .files_written(
            topic_partition("orders", 1),
            vec![
                test_data_file("s3://bucket/d.parquet", 40),
                test_data_file("s3://bucket/e.parquet", 50),
            ],
            7,
        )
        .await
        .unwrap();

    let commit_notify = committer.notify_on_commits(|commits| commits.len() == 1).await;
    commit_notify.notified().await;

    // Exactly one storage commit containing all five files.
    let commits = committer.commits().await;
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].data_files.len(), 5);
    assert_eq!(
        commits[0].offsets.get(&topic_partition("orders", 0)),
        Some(&41)
    );
    assert_eq!(
        commits[0].offsets.get(&topic_partition("orders", 1)),
        Some(&7)
    );

    // Exactly one completion broadcast.
    let events = wait_for_events(&channel, |events| {
        !events_of_type(events, EventType::CommitComplete).is_empty()
    })
    .await;
    assert_eq!(events_of_type(&events, EventType::CommitComplete).len(), 1);

    leader.shutdown_and_wait().await.unwrap();
    follower.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn followers_never_open_commit_cycles() {
    init_test_tracing();

    let channel = MemoryChannel::new(1);
    let committer = TestCommitterWrapper::wrap(MemoryTable::new());
    let group = vec![topic_partition("orders", 0), topic_partition("orders", 1)];

    let mut follower = connector(
        &channel,
        &committer,
        vec![topic_partition("orders", 1)],
        group,
    );
    follower.start().await.unwrap();

    // Give the would-be coordinator several intervals of virtual time.
    tokio::time::sleep(std::time::Duration::from_secs(180)).await;

    let events = channel.events().await;
    assert!(events_of_type(&events, EventType::CommitRequest).is_empty());
    assert_eq!(committer.commit_attempts().await, 0);

    follower.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_disturb_the_protocol() {
    init_test_tracing();

    let channel = MemoryChannel::new(1);
    let committer = TestCommitterWrapper::wrap(MemoryTable::new());
    let group = vec![topic_partition("orders", 0)];

    // Garbage delivered before the connector even starts; both workers must skip it.
    channel
        .publish_raw(0, Bytes::from_static(b"\x00\x00\x00\x03abc"))
        .await;

    let mut leader = connector(&channel, &committer, group.clone(), group);
    leader.start().await.unwrap();

    leader
        .writer()
        .unwrap()
        .files_written(
            topic_partition("orders", 0),
            vec![test_data_file("s3://bucket/a.parquet", 10)],
            12,
        )
        .await
        .unwrap();

    let commit_notify = committer.notify_on_commits(|commits| commits.len() == 1).await;
    commit_notify.notified().await;

    let commits = committer.commits().await;
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].data_files.len(), 1);

    leader.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_rejects_assignments_for_unconfigured_topics() {
    init_test_tracing();

    let channel = MemoryChannel::new(1);
    let committer = TestCommitterWrapper::wrap(MemoryTable::new());
    let group = vec![topic_partition("payments", 0)];

    let mut connector = connector(&channel, &committer, group.clone(), group);
    let err = connector.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_worker() {
    init_test_tracing();

    let channel = MemoryChannel::new(1);
    let committer = TestCommitterWrapper::wrap(MemoryTable::new());
    let group = vec![topic_partition("orders", 0)];

    let mut leader = connector(&channel, &committer, group.clone(), group);
    leader.start().await.unwrap();

    // Let at least one cycle run before shutting down.
    let events = wait_for_events(&channel, |events| {
        !events_of_type(events, EventType::CommitRequest).is_empty()
    })
    .await;
    let requests_before = events_of_type(&events, EventType::CommitRequest).len();

    leader.shutdown_and_wait().await.unwrap();

    // No new cycles open after the workers are gone.
    tokio::time::sleep(std::time::Duration::from_secs(180)).await;
    let events = channel.events().await;
    assert_eq!(
        events_of_type(&events, EventType::CommitRequest).len(),
        requests_before
    );
}
