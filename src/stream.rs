//! Streaming execution
//!
//! Two pieces: a segment buffer that turns an unbounded chunk stream into
//! processable documents (flushing at sentence boundaries or a size
//! threshold while retaining an overlap for cross-chunk span continuity),
//! and a stream processor that feeds documents through the backpressure
//! queue into supervised pipeline workers, each document pass guarded by
//! the circuit breaker.

use crate::config::{PhiGuardConfig, SegmentMode, StreamConfig};
use crate::error::{Error, Result};
use crate::pipeline::RedactionPipeline;
use crate::runtime::{
    BackpressureQueue, BreakerStatsExport, ChildSpec, CircuitBreaker, QueueStatsExport,
    RestartType, Supervisor,
};
use crate::span::{Document, RedactionResult, Span};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// =============================================================================
// Segment buffer
// =============================================================================

/// Accumulates streamed text and yields segments safe to process now.
///
/// In sentence mode, segments flush at the last complete sentence boundary;
/// in immediate mode, at the size threshold (preferring the last whitespace
/// before it). A configurable overlap stays buffered so spans crossing a
/// chunk boundary are seen whole by the next segment.
#[derive(Debug)]
pub struct SegmentBuffer {
    buffer: String,
    mode: SegmentMode,
    buffer_size: usize,
    overlap: usize,
    last_sentence_end: usize,
    last_whitespace: usize,
    prev_char: Option<char>,
}

impl SegmentBuffer {
    /// Create a buffer from stream configuration.
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            buffer: String::new(),
            mode: config.mode,
            buffer_size: config.buffer_size.max(1),
            overlap: config.overlap,
            last_sentence_end: 0,
            last_whitespace: 0,
            prev_char: None,
        }
    }

    /// Clear all buffered state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_sentence_end = 0;
        self.last_whitespace = 0;
        self.prev_char = None;
    }

    /// Buffered byte count.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append a chunk, tracking sentence and whitespace boundaries.
    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let mut pos = self.buffer.len();
        for ch in chunk.chars() {
            let next = pos + ch.len_utf8();

            if ch.is_whitespace() {
                self.last_whitespace = next;
                if matches!(self.prev_char, Some('.') | Some('!') | Some('?')) {
                    self.last_sentence_end = pos;
                }
            }

            self.prev_char = Some(ch);
            pos = next;
        }

        self.buffer.push_str(chunk);
    }

    /// Pop a segment that can be processed now, keeping `overlap` bytes
    /// buffered. `force` flushes the entire remaining buffer.
    pub fn pop_segment(&mut self, force: bool) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }

        let mut flush_point = 0usize;
        if force {
            flush_point = self.buffer.len();
        } else {
            match self.mode {
                SegmentMode::Sentence => {
                    if self.last_sentence_end > 0 {
                        flush_point = self.last_sentence_end;
                    }
                }
                SegmentMode::Immediate => {
                    if self.buffer.len() >= self.buffer_size {
                        if self.last_whitespace > 0 && self.last_whitespace <= self.buffer_size {
                            flush_point = self.last_whitespace;
                        } else {
                            flush_point = self.buffer_size;
                        }
                    }
                }
            }

            // Safety valve against unbounded buffering when no boundary
            // ever appears.
            if flush_point == 0 && self.buffer.len() >= self.buffer_size * 2 {
                flush_point = self.buffer_size;
            }
        }

        if flush_point == 0 {
            return None;
        }

        let stable_end = if force {
            flush_point
        } else {
            floor_boundary(&self.buffer, flush_point.saturating_sub(self.overlap))
        };
        if stable_end == 0 {
            return None;
        }

        let segment = self.buffer[..stable_end].to_string();
        self.buffer = self.buffer[stable_end..].to_string();

        if force {
            self.last_sentence_end = 0;
            self.last_whitespace = 0;
        } else {
            self.last_sentence_end = self.last_sentence_end.saturating_sub(stable_end);
            self.last_whitespace = self.last_whitespace.saturating_sub(stable_end);
        }
        self.prev_char = self.buffer.chars().last();

        Some(segment)
    }
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// =============================================================================
// Stream processor
// =============================================================================

/// One queued unit of streaming work.
#[derive(Debug)]
pub struct StreamItem {
    pub doc: Document,
    pub spans: Vec<Span>,
}

/// Runs the pipeline continuously over queued documents.
///
/// Documents flow through the backpressure queue into supervised workers;
/// each document pass is wrapped in a circuit breaker call, so a persistent
/// downstream fault sheds load instead of piling up work.
pub struct StreamProcessor {
    queue: Arc<BackpressureQueue<StreamItem>>,
    breaker: Arc<CircuitBreaker>,
    supervisor: Arc<Supervisor>,
}

impl StreamProcessor {
    /// Start workers and return the processor plus the result stream.
    pub async fn start(
        config: &PhiGuardConfig,
        pipeline: Arc<RedactionPipeline>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RedactionResult>)> {
        let queue = Arc::new(BackpressureQueue::<StreamItem>::new(config.queue.clone())?);
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let workers = config.stream.workers.max(1);
        let mut specs = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = queue.clone();
            let breaker = breaker.clone();
            let pipeline = pipeline.clone();
            let results_tx = results_tx.clone();

            specs.push(
                ChildSpec::new(format!("pipeline-worker-{}", worker), move |mut shutdown| {
                    let queue = queue.clone();
                    let breaker = breaker.clone();
                    let pipeline = pipeline.clone();
                    let results_tx = results_tx.clone();
                    Box::pin(async move {
                        loop {
                            tokio::select! {
                                _ = shutdown.changed() => return Ok(()),
                                item = queue.pull_wait() => {
                                    let Some(item) = item else {
                                        // Queue closed and drained.
                                        return Ok(());
                                    };
                                    let document_id = item.doc.id;
                                    match breaker
                                        .execute(pipeline.process(item.doc, item.spans))
                                        .await
                                    {
                                        Ok(result) => {
                                            let _ = results_tx.send(result);
                                        }
                                        Err(Error::CircuitOpen { retry_after_ms }) => {
                                            tracing::warn!(
                                                %document_id,
                                                retry_after_ms,
                                                "document rejected while circuit open"
                                            );
                                            tokio::time::sleep(Duration::from_millis(
                                                retry_after_ms.min(1000),
                                            ))
                                            .await;
                                        }
                                        Err(e) => {
                                            tracing::warn!(
                                                %document_id,
                                                error = %e,
                                                "document pass failed"
                                            );
                                        }
                                    }
                                }
                            }
                        }
                    })
                })
                .restart(RestartType::Transient)
                .shutdown(Duration::from_millis(config.supervisor.shutdown_grace_ms)),
            );
        }

        let supervisor = Supervisor::new(config.supervisor.clone(), specs);
        supervisor.start().await;

        Ok((
            Arc::new(Self {
                queue,
                breaker,
                supervisor,
            }),
            results_rx,
        ))
    }

    /// Enqueue one document with its detected spans.
    ///
    /// Returns false when the queue asked the producer to back off.
    pub async fn submit(&self, doc: Document, spans: Vec<Span>) -> bool {
        self.queue.push(StreamItem { doc, spans }).await
    }

    /// Close intake, let workers drain, then stop them.
    pub async fn shutdown(&self) {
        self.queue.close().await;
        // Give workers a chance to drain before stopping.
        while !self.queue.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.supervisor.stop().await;
    }

    /// Queue stats export.
    pub async fn queue_stats(&self) -> QueueStatsExport {
        self.queue.stats().await
    }

    /// Breaker stats export.
    pub async fn breaker_stats(&self) -> BreakerStatsExport {
        self.breaker.stats().await
    }

    /// Supervisor handle, for event subscriptions.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }
}
