//! Shared types for remote store adapters.
//!
//! # Responsibility
//! - Define the error envelope every adapter returns.
//! - Define the push-feed plumbing (`FeedSink`, `FeedMessage`,
//!   `Subscription`) connecting adapters to the sync core.
//!
//! # Invariants
//! - Every feed delivery carries a full snapshot, never a diff.
//! - `Subscription::unsubscribe` runs its cancel hook at most once.

use crate::model::record::Record;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Opaque token scoping all remote documents to one logical user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful identity establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSession {
    pub owner_id: OwnerId,
    /// Credential that lets the same owner sign in again later.
    pub refresh_token: Option<String>,
}

/// Remote operation stage used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStage {
    Connect,
    Auth,
    Fetch,
    Subscribe,
    Write,
    Update,
    Remove,
    Tags,
}

impl RemoteStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Auth => "auth",
            Self::Fetch => "fetch",
            Self::Subscribe => "subscribe",
            Self::Write => "write",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Tags => "tags",
        }
    }
}

/// Error envelope returned by remote adapters instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub provider: String,
    pub stage: RemoteStage,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl RemoteError {
    pub fn new(
        provider: impl Into<String>,
        stage: RemoteStage,
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            provider: provider.into(),
            stage,
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} failed ({}): {}",
            self.provider,
            self.stage.as_str(),
            self.code,
            self.message
        )
    }
}

impl Error for RemoteError {}

/// One full-state delivery from a remote feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Records(Vec<Record>),
    Tags(Vec<String>),
}

/// Feed event stamped with the subscription generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub generation: u64,
    pub event: FeedEvent,
}

/// Sending half handed to an adapter when it subscribes.
#[derive(Debug, Clone)]
pub struct FeedSink {
    generation: u64,
    sender: Sender<FeedMessage>,
}

impl FeedSink {
    pub fn new(generation: u64, sender: Sender<FeedMessage>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Delivers a records snapshot. Returns false once the receiver is gone.
    pub fn send_records(&self, records: Vec<Record>) -> bool {
        self.send(FeedEvent::Records(records))
    }

    /// Delivers a tag registry snapshot. Returns false once the receiver is gone.
    pub fn send_tags(&self, tags: Vec<String>) -> bool {
        self.send(FeedEvent::Tags(tags))
    }

    fn send(&self, event: FeedEvent) -> bool {
        self.sender
            .send(FeedMessage {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

type CancelHook = Box<dyn FnOnce() + Send>;

/// Handle for a live push listener.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    cancel: Mutex<Option<CancelHook>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Handle that owns no listener.
    pub fn inert() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    /// Releases the listener. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        let hook = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedEvent, FeedSink, Subscription};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn unsubscribe_runs_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.is_active());
        subscription.unsubscribe();
        subscription.unsubscribe();
        drop(subscription);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sink_stamps_generation_and_detects_closed_receiver() {
        let (sender, receiver) = mpsc::channel();
        let sink = FeedSink::new(7, sender);
        assert_eq!(sink.generation(), 7);
        assert!(sink.send_tags(vec!["a".to_string()]));

        let message = receiver.recv().unwrap();
        assert_eq!(message.generation, 7);
        assert_eq!(message.event, FeedEvent::Tags(vec!["a".to_string()]));

        drop(receiver);
        assert!(!sink.send_records(Vec::new()));
    }
}
