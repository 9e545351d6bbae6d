use std::future::Future;

use crate::error::SinkResult;

/// Trait for the background workers of a connector.
///
/// Starting a worker spawns its task and returns immediately with a handle for
/// monitoring it. The generic parameter `H` is the handle type returned on start.
pub trait Worker<H>
where
    H: WorkerHandle,
{
    /// Starts the worker and returns a handle for joining it.
    fn start(self) -> impl Future<Output = SinkResult<H>> + Send;
}

/// Handle for a running worker.
///
/// The handle remains valid after the worker completes; waiting consumes it and
/// returns the worker's final result.
pub trait WorkerHandle {
    /// Waits for the worker to complete and returns the final result.
    fn wait(self) -> impl Future<Output = SinkResult<()>> + Send;
}
