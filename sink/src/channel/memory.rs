use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::channel::{ChannelMessage, ChannelSubscription, ControlChannel};
use crate::error::SinkResult;
use crate::events::{Event, SchemaRegistry};

#[derive(Debug)]
struct Inner {
    partitions: Vec<Vec<Bytes>>,
    subscribers: Vec<mpsc::UnboundedSender<(i32, i64, Bytes)>>,
}

/// In-memory control channel for tests and development.
///
/// [`MemoryChannel`] stores encoded frames, so publishing and subscribing exercise the
/// wire codec end-to-end exactly like a real transport would. Subscriptions replay the
/// retained log from the start and then receive live messages; per-partition order is
/// preserved, interleaving across partitions is arbitrary.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryChannel {
    /// Creates a channel with the given number of partitions.
    pub fn new(partitions: u16) -> Self {
        let inner = Inner {
            partitions: vec![Vec::new(); partitions.max(1) as usize],
            subscribers: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Appends raw, possibly undecodable bytes to a partition.
    ///
    /// Exists so tests can exercise the subscriber's skip-and-log policy with frames a
    /// real transport could deliver after corruption or a bad producer.
    pub async fn publish_raw(&self, partition: i32, frame: Bytes) {
        self.append(partition as usize, frame).await;
    }

    /// Returns every decodable event currently retained, in partition order.
    ///
    /// Useful for assertions on what was broadcast; undecodable frames are skipped.
    pub async fn events(&self) -> Vec<Event> {
        let registry = SchemaRegistry::new();
        let inner = self.inner.lock().await;

        inner
            .partitions
            .iter()
            .flat_map(|frames| frames.iter())
            .filter_map(|frame| Event::decode(frame, &registry).ok())
            .collect()
    }

    /// Returns the number of frames appended per partition.
    pub async fn frame_counts(&self) -> Vec<usize> {
        let inner = self.inner.lock().await;
        inner.partitions.iter().map(Vec::len).collect()
    }

    async fn append(&self, partition: usize, frame: Bytes) {
        let mut inner = self.inner.lock().await;
        let partition = partition % inner.partitions.len();

        let offset = inner.partitions[partition].len() as i64;
        inner.partitions[partition].push(frame.clone());

        // Dead subscribers are dropped on the way.
        inner
            .subscribers
            .retain(|tx| tx.send((partition as i32, offset, frame.clone())).is_ok());
    }
}

impl ControlChannel for MemoryChannel {
    type Subscription = MemorySubscription;

    async fn publish(&self, key: &str, event: &Event) -> SinkResult<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.append(hasher.finish() as usize, event.encode()).await;

        Ok(())
    }

    async fn subscribe(&self) -> SinkResult<MemorySubscription> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Replay and registration happen under one lock, so the subscription sees
        // every frame exactly once even while publishers are running.
        let mut inner = self.inner.lock().await;
        for (partition, frames) in inner.partitions.iter().enumerate() {
            for (offset, frame) in frames.iter().enumerate() {
                let _ = tx.send((partition as i32, offset as i64, frame.clone()));
            }
        }
        inner.subscribers.push(tx);

        Ok(MemorySubscription {
            rx,
            registry: SchemaRegistry::new(),
        })
    }
}

/// Subscription handed out by [`MemoryChannel`].
#[derive(Debug)]
pub struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<(i32, i64, Bytes)>,
    registry: SchemaRegistry,
}

impl ChannelSubscription for MemorySubscription {
    async fn next_message(&mut self) -> Option<ChannelMessage> {
        loop {
            let (partition, offset, frame) = self.rx.recv().await?;
            match Event::decode(&frame, &self.registry) {
                Ok(event) => {
                    return Some(ChannelMessage {
                        partition,
                        offset,
                        event,
                    });
                }
                Err(err) => {
                    warn!(partition, offset, error = %err, "skipping malformed control message");
                }
            }
        }
    }
}
