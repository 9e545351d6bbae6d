//! Arm-on-demand deadline future for `tokio::select!` loops.

use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Sleep, sleep};

/// A deadline that stays pending until armed.
///
/// [`Deadline`] can sit in a `select!` arm without ever firing while disarmed, which
/// fits flows where the timeout only exists while some state is open: arm it when a
/// commit cycle starts, clear it when the cycle resolves early. The deadline disarms
/// itself after firing, so the arm does not complete again on the next loop
/// iteration.
///
/// The type is `Unpin` (the inner [`Sleep`] is boxed), so it can be polled through a
/// plain `&mut` reference inside `select!`.
#[derive(Debug)]
pub struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
    duration: Duration,
}

impl Deadline {
    /// Creates a new, disarmed deadline firing `duration` after being armed.
    pub fn new(duration: Duration) -> Self {
        Self {
            sleep: None,
            duration,
        }
    }

    /// Arms the deadline to fire `duration` from now, replacing any previous one.
    pub fn arm(&mut self) {
        self.sleep = Some(Box::pin(sleep(self.duration)));
    }

    /// Disarms the deadline; polling returns to pending.
    pub fn clear(&mut self) {
        self.sleep = None;
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let Some(sleep) = this.sleep.as_mut() else {
            return Poll::Pending;
        };
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        Poll::Ready(())
    }
}
