use std::future::Future;

use crate::error::SinkResult;
use crate::events::Event;

/// A message delivered from the control channel.
///
/// The partition and offset identify where the frame sits in the log. Offsets are only
/// comparable within one partition; that per-partition order is the sole ordering
/// guarantee the protocol relies on.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub partition: i32,
    pub offset: i64,
    pub event: Event,
}

/// Trait for transports exposing the shared append-only broadcast log.
///
/// Implementations are expected to retry transient publish failures internally with
/// backoff; the coordination layer only needs to tolerate arbitrary delay, not
/// transport errors.
pub trait ControlChannel {
    type Subscription: ChannelSubscription + Send + 'static;

    /// Publishes `event` to the channel.
    ///
    /// `key` determines partition placement: messages sharing a key land in the same
    /// partition and are totally ordered with respect to each other.
    fn publish(&self, key: &str, event: &Event) -> impl Future<Output = SinkResult<()>> + Send;

    /// Opens a subscription yielding every channel message in per-partition order,
    /// starting from the beginning of the retained log.
    fn subscribe(&self) -> impl Future<Output = SinkResult<Self::Subscription>> + Send;
}

/// A live subscription to the control channel.
///
/// Implementations decode frames and own the skip-and-log policy for malformed
/// envelopes: a frame that fails to decode is logged and skipped, it never tears down
/// the subscription.
pub trait ChannelSubscription {
    /// Returns the next decodable message, or `None` once the channel is closed.
    fn next_message(&mut self) -> impl Future<Output = Option<ChannelMessage>> + Send;
}
