use async_trait::async_trait;
use intake::dispatch::{ChannelQueue, DispatchMessage, DispatchQueue, QueueError};
use intake::ids::{HandinId, HandinIdGenerator};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fails the first `failures` publishes, then delivers to an in-process queue.
pub struct FlakyQueue {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    pub inner: ChannelQueue,
}

impl FlakyQueue {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            inner: ChannelQueue::new(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DispatchQueue for FlakyQueue {
    async fn publish(&self, channel: &str, message: &DispatchMessage) -> Result<(), QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Unavailable("broker is down".into()));
        }
        self.inner.publish(channel, message).await
    }
}

/// A broker that is never reachable.
#[derive(Default)]
pub struct AlwaysFailQueue {
    attempts: AtomicUsize,
}

impl AlwaysFailQueue {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DispatchQueue for AlwaysFailQueue {
    async fn publish(&self, _channel: &str, _message: &DispatchMessage) -> Result<(), QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::Rejected {
            status: 503,
            body: "maintenance".into(),
        })
    }
}

/// A broker that accepts the connection and never answers.
#[derive(Default)]
pub struct HangingQueue {
    attempts: AtomicUsize,
}

impl HangingQueue {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DispatchQueue for HangingQueue {
    async fn publish(&self, _channel: &str, _message: &DispatchMessage) -> Result<(), QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Hands out the same id every time.
pub struct FixedIds(pub &'static str);

impl HandinIdGenerator for FixedIds {
    fn next_id(&self) -> HandinId {
        HandinId::new(self.0)
    }
}
