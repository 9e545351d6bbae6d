//! Broadcast shutdown signaling for connector workers.
//!
//! A single shutdown signal terminates every worker of a connector. Workers observe
//! the signal as one arm of their `tokio::select!` loop and finish their current step
//! before returning, so shutdown never interrupts a commit in flight.

use tokio::sync::watch;

/// Transmitter half of the shutdown channel.
///
/// Cloning is cheap; every clone signals the same set of receivers.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals every subscribed worker to shut down.
    ///
    /// Fails when no receiver is listening anymore, which means all workers have
    /// already stopped.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver observing this shutdown signal.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver half of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates the shutdown channel shared by all workers of a connector.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
