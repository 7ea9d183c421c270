//! Cancellation signal for storage operations
//!
//! An [`Aborter`] is a cloneable broadcast signal. Every clone observes the
//! same state, children observe their parent, and a deadline turns the
//! aborter into a timeout.

use futures::future::{self, BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Broadcast abort signal shared between the caller and in-flight operations
#[derive(Clone)]
pub struct Aborter {
    inner: Arc<AborterInner>,
}

struct AborterInner {
    signal: watch::Sender<bool>,
    deadline: Option<Instant>,
    parent: Option<Aborter>,
}

impl Aborter {
    /// An aborter that only fires when [`Aborter::abort`] is called
    pub fn none() -> Self {
        Self::build(None, None)
    }

    /// An aborter that fires once `timeout` has elapsed
    pub fn timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), None)
    }

    /// A child aborter that fires with this one or after `timeout`, whichever is first
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), Some(self.clone()))
    }

    /// A child aborter that fires with this one
    ///
    /// Aborting the child leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self::build(None, Some(self.clone()))
    }

    fn build(deadline: Option<Instant>, parent: Option<Aborter>) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(AborterInner {
                signal,
                deadline,
                parent,
            }),
        }
    }

    /// Fire the signal
    pub fn abort(&self) {
        if !self.inner.signal.send_replace(true) {
            log::debug!("aborter fired");
        }
    }

    /// Whether the signal has fired, through this aborter, a deadline, or a parent
    pub fn is_aborted(&self) -> bool {
        if *self.inner.signal.borrow() {
            return true;
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.inner
            .parent
            .as_ref()
            .map(Aborter::is_aborted)
            .unwrap_or(false)
    }

    /// Future that resolves once the signal fires
    ///
    /// The future owns a handle on the aborter, so it can outlive the borrow
    /// it was created from.
    pub fn aborted(&self) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            let mut receiver = this.inner.signal.subscribe();
            let own = async move {
                // The sender lives as long as `this`, so this never errors
                let _ = receiver.wait_for(|aborted| *aborted).await;
            };
            let deadline = async {
                match this.inner.deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => future::pending::<()>().await,
                }
            };
            let parent = async {
                match &this.inner.parent {
                    Some(parent) => parent.aborted().await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = own => {}
                _ = deadline => {}
                _ = parent => {}
            }
        }
        .boxed()
    }
}

impl Default for Aborter {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Aborter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aborter")
            .field("aborted", &self.is_aborted())
            .field("deadline", &self.inner.deadline)
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_is_shared_between_clones() {
        let aborter = Aborter::none();
        let clone = aborter.clone();
        assert!(!clone.is_aborted());

        aborter.abort();
        assert!(clone.is_aborted());
        clone.aborted().await;
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = Aborter::none();
        let child = parent.child();
        let waiter = tokio::spawn(child.aborted());

        parent.abort();
        waiter.await.unwrap();
        assert!(child.is_aborted());
    }

    #[tokio::test]
    async fn test_child_does_not_abort_parent() {
        let parent = Aborter::none();
        let child = parent.child();
        child.abort();
        assert!(child.is_aborted());
        assert!(!parent.is_aborted());
    }

    #[tokio::test]
    async fn test_timeout_fires() {
        let aborter = Aborter::timeout(Duration::from_millis(20));
        assert!(!aborter.is_aborted());
        aborter.aborted().await;
        assert!(aborter.is_aborted());
    }

    #[tokio::test]
    async fn test_with_timeout_child() {
        let parent = Aborter::none();
        let child = parent.with_timeout(Duration::from_millis(20));
        child.aborted().await;
        assert!(child.is_aborted());
        assert!(!parent.is_aborted());
    }

    #[tokio::test]
    async fn test_none_stays_pending() {
        let aborter = Aborter::none();
        let fired = tokio::time::timeout(Duration::from_millis(20), aborter.aborted()).await;
        assert!(fired.is_err());
    }
}
