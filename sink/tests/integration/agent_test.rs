use std::sync::Arc;

use sink::channel::ControlChannel;
use sink::channel::memory::MemoryChannel;
use sink::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use sink::events::{CommitRequest, CommitResponse, Event, EventType, Payload};
use sink::test_utils::factory::{
    events_of_type, test_connector_config, test_data_file, topic_partition, wait_for_events,
};
use sink::types::{CommitId, OffsetEntry, TableName, TopicPartition};
use sink::workers::agent::{AgentHandle, AgentWorker, AgentWorkerHandle};
use sink::workers::base::{Worker, WorkerHandle};
use telemetry::tracing::init_test_tracing;

struct RunningAgent {
    channel: MemoryChannel,
    writer: AgentHandle,
    shutdown_tx: ShutdownTx,
    handle: AgentWorkerHandle,
}

async fn start_agent(assignments: Vec<TopicPartition>) -> RunningAgent {
    let channel = MemoryChannel::new(1);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let agent = AgentWorker::new(
        Arc::new(test_connector_config("gen-1")),
        TableName::parse("db.events").unwrap(),
        assignments,
        channel.clone(),
        shutdown_rx,
    );
    let writer = agent.handle();
    let handle = agent.start().await.unwrap();

    RunningAgent {
        channel,
        writer,
        shutdown_tx,
        handle,
    }
}

fn request(commit_id: CommitId) -> Event {
    Event::new(Payload::CommitRequest(CommitRequest { commit_id }))
}

fn as_response(event: &Event) -> &CommitResponse {
    match event.payload() {
        Payload::CommitResponse(response) => response,
        other => panic!("expected a commit response, got {other:?}"),
    }
}

/// Returns the commit responses retained on the channel once there are `count`.
async fn wait_for_responses(channel: &MemoryChannel, count: usize) -> Vec<Event> {
    let events = wait_for_events(channel, |events| {
        events_of_type(events, EventType::CommitResponse).len() >= count
    })
    .await;
    events_of_type(&events, EventType::CommitResponse)
}

#[tokio::test(start_paused = true)]
async fn answers_a_commit_request_at_most_once() {
    init_test_tracing();

    let running = start_agent(vec![topic_partition("orders", 0)]).await;
    running
        .writer
        .files_written(
            topic_partition("orders", 0),
            vec![test_data_file("s3://bucket/a.parquet", 10)],
            41,
        )
        .await
        .unwrap();

    let first = CommitId::generate("gen-1");
    running
        .channel
        .publish("test", &request(first.clone()))
        .await
        .unwrap();
    // The same request is delivered again, as happens after a transport retry.
    running
        .channel
        .publish("test", &request(first.clone()))
        .await
        .unwrap();
    let second = CommitId::generate("gen-1");
    running
        .channel
        .publish("test", &request(second.clone()))
        .await
        .unwrap();

    let responses = wait_for_responses(&running.channel, 2).await;
    assert_eq!(responses.len(), 2);

    // One response per distinct commit id, in order.
    assert_eq!(*responses[0].payload().commit_id(), first);
    assert_eq!(*responses[1].payload().commit_id(), second);

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn clears_buffers_speculatively_and_keeps_watermarks() {
    init_test_tracing();

    let running = start_agent(vec![topic_partition("orders", 0)]).await;
    running
        .writer
        .files_written(
            topic_partition("orders", 0),
            vec![
                test_data_file("s3://bucket/a.parquet", 10),
                test_data_file("s3://bucket/b.parquet", 20),
            ],
            41,
        )
        .await
        .unwrap();

    running
        .channel
        .publish("test", &request(CommitId::generate("gen-1")))
        .await
        .unwrap();
    running
        .channel
        .publish("test", &request(CommitId::generate("gen-1")))
        .await
        .unwrap();

    let responses = wait_for_responses(&running.channel, 2).await;

    let first = as_response(&responses[0]);
    assert_eq!(first.data_files.len(), 2);
    assert_eq!(first.assignments, vec![topic_partition("orders", 0)]);
    assert_eq!(
        first.offsets.as_deref().unwrap(),
        &[OffsetEntry::new("orders", 0, 41)]
    );

    // Everything was handed off in the first response; the next cycle sees empty
    // buffers but the watermark survives.
    let second = as_response(&responses[1]);
    assert!(second.data_files.is_empty());
    assert_eq!(
        second.offsets.as_deref().unwrap(),
        &[OffsetEntry::new("orders", 0, 41)]
    );

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn ignores_requests_from_another_generation() {
    init_test_tracing();

    let running = start_agent(vec![topic_partition("orders", 0)]).await;

    running
        .channel
        .publish("test", &request(CommitId::generate("gen-0")))
        .await
        .unwrap();
    let current = CommitId::generate("gen-1");
    running
        .channel
        .publish("test", &request(current.clone()))
        .await
        .unwrap();

    let responses = wait_for_responses(&running.channel, 1).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(*responses[0].payload().commit_id(), current);

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn drops_buffers_for_revoked_partitions_on_rebalance() {
    init_test_tracing();

    let running = start_agent(vec![topic_partition("orders", 0)]).await;
    running
        .writer
        .files_written(
            topic_partition("orders", 0),
            vec![test_data_file("s3://bucket/a.parquet", 10)],
            41,
        )
        .await
        .unwrap();

    // The rebalance takes orders-0 away and hands orders-1 over.
    running
        .writer
        .assignments_changed(vec![topic_partition("orders", 1)])
        .await
        .unwrap();

    running
        .channel
        .publish("test", &request(CommitId::generate("gen-1")))
        .await
        .unwrap();

    let responses = wait_for_responses(&running.channel, 1).await;
    let response = as_response(&responses[0]);
    assert!(response.data_files.is_empty());
    assert_eq!(response.assignments, vec![topic_partition("orders", 1)]);
    assert!(response.offsets.as_deref().unwrap().is_empty());

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn drops_files_written_for_unowned_partitions() {
    init_test_tracing();

    let running = start_agent(vec![topic_partition("orders", 0)]).await;
    running
        .writer
        .files_written(
            topic_partition("orders", 7),
            vec![test_data_file("s3://bucket/lost.parquet", 10)],
            3,
        )
        .await
        .unwrap();

    running
        .channel
        .publish("test", &request(CommitId::generate("gen-1")))
        .await
        .unwrap();

    let responses = wait_for_responses(&running.channel, 1).await;
    let response = as_response(&responses[0]);
    assert!(response.data_files.is_empty());
    assert_eq!(response.assignments, vec![topic_partition("orders", 0)]);

    running.shutdown_tx.shutdown().unwrap();
    running.handle.wait().await.unwrap();
}
