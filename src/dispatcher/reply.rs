//! Deferred replies.
//!
//! A [`Reply`] is created after its pending entry is registered and its
//! command posted, so the request is in flight whether or not the caller
//! ever polls it. Dropping a reply does not cancel the request: the entry is
//! still settled (and a port still attached) when the helper answers.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Sleep, sleep};
use tracing::warn;

use crate::error::{Error, Result};
use crate::identifiers::PendingId;

use super::PendingKey;
use super::core::DispatchState;

// ============================================================================
// Expiry
// ============================================================================

/// Timeout bookkeeping for one reply.
pub(crate) struct Expiry {
    id: PendingId,
    key: PendingKey,
    timeout: Duration,
    state: Arc<Mutex<DispatchState>>,
    /// Created on first poll so a reply can be built outside a runtime.
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Expiry {
    pub(crate) fn new(
        id: PendingId,
        key: PendingKey,
        timeout: Duration,
        state: Arc<Mutex<DispatchState>>,
    ) -> Self {
        Self {
            id,
            key,
            timeout,
            state,
            sleep: None,
        }
    }

    fn poll_elapsed(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let timeout = self.timeout;
        self.sleep
            .get_or_insert_with(|| Box::pin(sleep(timeout)))
            .as_mut()
            .poll(cx)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

// ============================================================================
// Reply
// ============================================================================

enum ReplyState<T> {
    Waiting {
        rx: oneshot::Receiver<Result<T>>,
        expiry: Option<Expiry>,
    },
    Failed(Option<Error>),
}

/// The deferred result of a request.
///
/// Resolves once the dispatcher settles the request.
#[must_use = "replies carry the request outcome"]
pub struct Reply<T> {
    state: ReplyState<T>,
}

impl<T> Unpin for Reply<T> {}

impl<T> Reply<T> {
    pub(crate) fn waiting(rx: oneshot::Receiver<Result<T>>, expiry: Option<Expiry>) -> Self {
        Self {
            state: ReplyState::Waiting { rx, expiry },
        }
    }

    pub(crate) fn failed(error: Error) -> Self {
        Self {
            state: ReplyState::Failed(Some(error)),
        }
    }
}

impl<T> Future for Reply<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let (rx, expiry) = match &mut this.state {
            ReplyState::Failed(error) => {
                return Poll::Ready(Err(error.take().unwrap_or(Error::ConnectionClosed)));
            }
            ReplyState::Waiting { rx, expiry } => (rx, expiry),
        };

        if let Poll::Ready(result) = Pin::new(&mut *rx).poll(cx) {
            return Poll::Ready(result.unwrap_or(Err(Error::ConnectionClosed)));
        }

        let Some(expiry) = expiry else {
            return Poll::Pending;
        };

        if expiry.poll_elapsed(cx).is_pending() {
            return Poll::Pending;
        }

        let removed = expiry.state.lock().pending.remove(expiry.id);
        match removed {
            Some(entry) => {
                entry.abandon();
                warn!(
                    kind = %expiry.key,
                    timeout_ms = expiry.timeout_ms(),
                    "Request timed out"
                );
                Poll::Ready(Err(Error::request_timeout(
                    expiry.key.as_str(),
                    expiry.timeout_ms(),
                )))
            }
            // Settled between the deadline firing and taking the lock.
            None => Poll::Ready(rx.try_recv().unwrap_or(Err(Error::ConnectionClosed))),
        }
    }
}
