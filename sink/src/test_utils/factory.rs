use std::time::Duration;

use config::shared::{ConnectorConfig, ControlChannelConfig};
use tokio::time::sleep;

use crate::channel::memory::MemoryChannel;
use crate::events::{Event, EventType};
use crate::types::{DataFile, TopicPartition};

/// Creates a connector configuration wired for in-memory tests.
///
/// Uses the production defaults for commit timing (60s interval, 30s timeout); tests
/// drive them with a paused clock.
pub fn test_connector_config(txn_suffix: &str) -> ConnectorConfig {
    ConnectorConfig {
        table: "db.events".to_string(),
        topics: vec!["orders".to_string()],
        control: ControlChannelConfig {
            name: "control".to_string(),
            partitions: 1,
            replication: 1,
            group_id: "sink-control".to_string(),
            auto_create: false,
        },
        commit_interval_ms: 60_000,
        commit_timeout_ms: 30_000,
        transactional_suffix: txn_suffix.to_string(),
    }
}

/// Creates a data-file descriptor with plausible defaults.
pub fn test_data_file(path: &str, record_count: i64) -> DataFile {
    DataFile {
        path: path.to_string(),
        format: "parquet".to_string(),
        record_count,
        file_size_bytes: record_count * 64,
        partition: vec![],
    }
}

/// Shorthand for building assignments.
pub fn topic_partition(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

/// Polls the channel until its retained events match `condition`.
///
/// Intended for paused-clock tests: the sleeps let the runtime auto-advance virtual
/// time, so waiting is cheap and deterministic.
///
/// # Panics
///
/// Panics if the condition is not met within a bounded number of polls.
pub async fn wait_for_events<F>(channel: &MemoryChannel, condition: F) -> Vec<Event>
where
    F: Fn(&[Event]) -> bool,
{
    for _ in 0..1_000 {
        let events = channel.events().await;
        if condition(&events) {
            return events;
        }
        sleep(Duration::from_millis(500)).await;
    }

    panic!("channel events never matched the expected condition");
}

/// Returns the events of one type, in publish order.
pub fn events_of_type(events: &[Event], event_type: EventType) -> Vec<Event> {
    events
        .iter()
        .filter(|event| event.event_type() == event_type)
        .cloned()
        .collect()
}
