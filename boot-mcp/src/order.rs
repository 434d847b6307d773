//! Arrival-order gate for messages handled on separate tasks.
//!
//! The rmcp service runtime hands every inbound request and notification
//! to its own task, so two notifications that arrive in order may be
//! handled out of order. The transport stamps each inbound message as it
//! is received: a notification gets a [`Turn`], which opens only after
//! every earlier notification has finished; a request gets a [`Barrier`],
//! which opens once every earlier notification has finished but holds
//! nobody back itself.
//!
//! Releases are transitive. A turn that is dropped without being waited on
//! still does not open the next one before its own predecessors are done.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use rmcp::model::{GetExtensions, JsonRpcMessage};
use rmcp::service::{RxJsonRpcMessage, ServiceRole};

type Release = Shared<BoxFuture<'static, ()>>;

/// Hands out turns in arrival order.
///
/// Clones share one queue.
#[derive(Clone, Default)]
pub struct Sequencer {
    tail: Arc<Mutex<Option<Release>>>,
}

/// A notification's place in line.
///
/// Dropping the last clone marks the notification handled.
#[derive(Clone)]
pub struct Turn {
    prior: Option<Release>,
    _done: Arc<oneshot::Sender<()>>,
}

/// Waits for every notification that arrived before it.
#[derive(Clone)]
pub struct Barrier {
    prior: Option<Release>,
}

impl Sequencer {
    /// Take the next place in line.
    pub fn turn(&self) -> Turn {
        let (done, handled) = oneshot::channel::<()>();
        let mut tail = self.tail();
        let prior = tail.clone();
        let earlier = prior.clone();
        let release = async move {
            released(earlier).await;
            // Dropped or sent, either way the notification is finished.
            let _ = handled.await;
        }
        .boxed()
        .shared();
        *tail = Some(release);
        Turn {
            prior,
            _done: Arc::new(done),
        }
    }

    /// A barrier behind everything handed out so far.
    pub fn barrier(&self) -> Barrier {
        Barrier {
            prior: self.tail().clone(),
        }
    }

    /// Resolves once every turn handed out so far has been released.
    pub async fn settled(&self) {
        self.barrier().wait().await;
    }

    /// Attach a [`Turn`] to a notification or a [`Barrier`] to a request.
    ///
    /// Responses and errors pass through untouched.
    pub fn stamp<R: ServiceRole>(&self, message: &mut RxJsonRpcMessage<R>) {
        match message {
            JsonRpcMessage::Notification(notification) => {
                notification.notification.extensions_mut().insert(self.turn());
            }
            JsonRpcMessage::Request(request) => {
                request.request.extensions_mut().insert(self.barrier());
            }
            JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_) => {}
        }
    }

    fn tail(&self) -> MutexGuard<'_, Option<Release>> {
        self.tail.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Turn {
    /// Wait until every earlier notification has been handled.
    pub async fn wait(&self) {
        released(self.prior.clone()).await;
    }
}

impl Barrier {
    /// Wait until every earlier notification has been handled.
    pub async fn wait(&self) {
        released(self.prior.clone()).await;
    }
}

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn")
            .field("first", &self.prior.is_none())
            .finish()
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("open", &self.prior.is_none())
            .finish()
    }
}

async fn released(prior: Option<Release>) {
    if let Some(prior) = prior {
        prior.await;
    }
}
