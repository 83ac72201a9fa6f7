//! Backpressure queue
//!
//! Bounded buffer with hysteresis watermarks: a pause signal is emitted
//! only when size crosses the high water mark upward, and a resume signal
//! only when it falls back to the low water mark. Pushes beyond the hard
//! ceiling are dropped and counted, never thrown. Subscribers receive
//! signals in registration order.

use crate::config::QueueConfig;
use crate::error::Result;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::{mpsc, Mutex, Notify};

/// Backpressure signal delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// Size crossed the high water mark upward.
    Pause,

    /// Size fell back to the low water mark (or the queue was drained).
    Resume,

    /// An item was rejected at the hard ceiling.
    Drop,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    paused: bool,
    closed: bool,
    subscribers: Vec<mpsc::UnboundedSender<QueueEvent>>,
    total_pushed: u64,
    total_pulled: u64,
    total_dropped: u64,
    pause_count: u64,
    resume_count: u64,
}

impl<T> QueueInner<T> {
    fn emit(&mut self, event: QueueEvent) {
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    fn resume_if_paused(&mut self) {
        if self.paused {
            self.paused = false;
            self.resume_count += 1;
            self.emit(QueueEvent::Resume);
        }
    }
}

/// Bounded FIFO with pause/resume watermarks and an async consumption mode.
pub struct BackpressureQueue<T> {
    config: QueueConfig,
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
}

impl<T> BackpressureQueue<T> {
    /// Create a queue; fails when watermarks are mis-ordered.
    pub fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                paused: false,
                closed: false,
                subscribers: Vec::new(),
                total_pushed: 0,
                total_pulled: 0,
                total_dropped: 0,
                pause_count: 0,
                resume_count: 0,
            }),
            notify: Notify::new(),
        })
    }

    /// Subscribe to pause/resume/drop signals.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.subscribers.push(tx);
        rx
    }

    /// Append an item.
    ///
    /// Returns false when the producer should stop: either the item was
    /// dropped at the hard ceiling, or this push crossed the high water
    /// mark and the queue is now paused.
    pub async fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.items.len() >= self.config.max_size {
            inner.total_dropped += 1;
            inner.emit(QueueEvent::Drop);
            tracing::warn!(max_size = self.config.max_size, "queue full, item dropped");
            return false;
        }

        inner.items.push_back(item);
        inner.total_pushed += 1;

        if !inner.paused && inner.items.len() >= self.config.high_water_mark {
            inner.paused = true;
            inner.pause_count += 1;
            inner.emit(QueueEvent::Pause);
            tracing::debug!(size = inner.items.len(), "high water mark reached, pausing");
        }

        let accepting = !inner.paused;
        drop(inner);
        self.notify.notify_one();
        accepting
    }

    /// Remove the head, signaling resume on the downward low-water crossing.
    pub async fn pull(&self) -> Option<T> {
        let mut inner = self.inner.lock().await;
        let item = inner.items.pop_front()?;
        inner.total_pulled += 1;

        if inner.paused && inner.items.len() <= self.config.low_water_mark {
            inner.resume_if_paused();
            tracing::debug!(size = inner.items.len(), "low water mark reached, resuming");
        }

        Some(item)
    }

    /// Async consumption: wait until an item arrives or the queue closes.
    ///
    /// Returns `None` only after `close()` with the queue empty.
    pub async fn pull_wait(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.pull().await {
                return Some(item);
            }
            if self.inner.lock().await.closed {
                return None;
            }
            notified.await;
        }
    }

    /// Signal that no more items will be pushed.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Remove and return everything; unconditionally resumes.
    pub async fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock().await;
        let drained: Vec<T> = inner.items.drain(..).collect();
        inner.total_pulled += drained.len() as u64;
        inner.resume_if_paused();
        drained
    }

    /// Discard everything; unconditionally resumes.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.items.clear();
        inner.resume_if_paused();
    }

    /// Current size.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// True when empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.items.is_empty()
    }

    /// True while the pause signal is in effect.
    pub async fn is_paused(&self) -> bool {
        self.inner.lock().await.paused
    }

    /// Stats export envelope.
    pub async fn stats(&self) -> QueueStatsExport {
        let inner = self.inner.lock().await;
        QueueStatsExport {
            size: inner.items.len(),
            paused: inner.paused,
            total_pushed: inner.total_pushed,
            total_pulled: inner.total_pulled,
            total_dropped: inner.total_dropped,
            pause_count: inner.pause_count,
            resume_count: inner.resume_count,
        }
    }
}

/// Wire form of queue stats.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsExport {
    pub size: usize,
    pub paused: bool,
    pub total_pushed: u64,
    pub total_pulled: u64,
    pub total_dropped: u64,
    pub pause_count: u64,
    pub resume_count: u64,
}
