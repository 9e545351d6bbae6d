use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// Default timeout duration for notifications.
///
/// Long enough to span several commit cycles of virtual time under a paused clock.
/// Failures still surface quickly in real time because the paused runtime
/// auto-advances straight to this deadline once nothing else is runnable.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(600);

/// A wrapper around [`Arc<Notify>`] that provides automatic timeout functionality for
/// tests.
///
/// Prevents tests from hanging indefinitely when waiting for state changes that may
/// never occur: the timeout makes them fail quickly with a clear error instead.
#[derive(Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
    timeout_duration: Duration,
}

impl TimedNotify {
    /// Creates a new [`TimedNotify`] with the default timeout.
    pub fn new(notify: Arc<Notify>) -> Self {
        Self::with_timeout(notify, DEFAULT_NOTIFY_TIMEOUT)
    }

    /// Creates a new [`TimedNotify`] with a custom timeout duration.
    pub fn with_timeout(notify: Arc<Notify>, timeout_duration: Duration) -> Self {
        Self {
            notify,
            timeout_duration,
        }
    }

    /// Waits for a notification.
    ///
    /// # Panics
    ///
    /// Panics if the timeout elapses before the notification is received. Intentional
    /// behavior for tests, failing fast beats hanging.
    pub async fn notified(&self) {
        if timeout(self.timeout_duration, self.notify.notified())
            .await
            .is_err()
        {
            panic!(
                "test notification timed out after {:?}; the expected state was never reached",
                self.timeout_duration
            );
        }
    }
}

impl fmt::Debug for TimedNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedNotify")
            .field("timeout_duration", &self.timeout_duration)
            .finish()
    }
}
