//! PhiGuard configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main PhiGuard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhiGuardConfig {
    /// Confidence modifier engine configuration
    #[serde(default)]
    pub confidence: ConfidenceConfig,

    /// Disambiguation engine configuration
    #[serde(default)]
    pub disambiguation: DisambiguationConfig,

    /// Plugin pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Backpressure queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Supervisor configuration
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Streaming configuration
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Confidence modifier engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Above this value only penalties are evaluated
    pub ceiling: f64,

    /// Below this value only boosts are evaluated
    pub floor: f64,

    /// Target false-positive rate for the keyword prefilter
    pub bloom_fp_rate: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            ceiling: 0.98,
            floor: 0.02,
            bloom_fp_rate: 0.01,
        }
    }
}

/// Disambiguation strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisambiguationStrategy {
    /// Hash-vector cosine similarity against cached observations
    #[default]
    Vector,

    /// Static per-type context vocabularies with fuzzy overlap
    Keyword,

    /// Learned sentence embeddings with hash-vector fallback
    Embedding,
}

/// Disambiguation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisambiguationConfig {
    /// Active strategy
    pub strategy: DisambiguationStrategy,

    /// Hash vector dimensionality
    pub vector_dims: usize,

    /// Maximum cached observations per normalized window
    pub cache_per_key: usize,

    /// Remove stop words before vectorizing context
    pub remove_stop_words: bool,

    /// Keyword strategy: scores below this fall back to
    /// confidence-then-priority ordering
    pub keyword_threshold: f64,
}

impl Default for DisambiguationConfig {
    fn default() -> Self {
        Self {
            strategy: DisambiguationStrategy::Vector,
            vector_dims: 512,
            cache_per_key: 100,
            remove_stop_words: true,
            keyword_threshold: 0.15,
        }
    }
}

/// Plugin pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directories scanned for plugin manifests
    pub plugin_dirs: Vec<PathBuf>,

    /// Abort the pipeline on the first hook failure instead of
    /// continuing with the pre-hook value
    pub fail_fast: bool,

    /// Consecutive sandbox failures before a plugin is auto-disabled
    pub max_consecutive_failures: u32,

    /// Default hook timeout when the manifest does not override it
    pub default_timeout_ms: u64,

    /// Default plugin priority when the manifest does not override it
    pub default_priority: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: Vec::new(),
            fail_fast: false,
            max_consecutive_failures: 3,
            default_timeout_ms: 5000,
            default_priority: 50,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,

    /// Cooldown before an open circuit probes recovery, in milliseconds
    pub reset_timeout_ms: u64,

    /// Optional per-call operation timeout in milliseconds
    pub operation_timeout_ms: Option<u64>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            operation_timeout_ms: None,
        }
    }
}

/// Backpressure queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Size at which a pause signal is emitted
    pub high_water_mark: usize,

    /// Size at which a resume signal is emitted; must be strictly
    /// below the high water mark
    pub low_water_mark: usize,

    /// Hard ceiling; pushes beyond this are dropped and counted
    pub max_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 1000,
            low_water_mark: 200,
            max_size: 5000,
        }
    }
}

impl QueueConfig {
    /// Validate the watermark ordering invariant.
    pub fn validate(&self) -> crate::Result<()> {
        if self.low_water_mark >= self.high_water_mark {
            return Err(crate::Error::Config(format!(
                "low_water_mark ({}) must be strictly below high_water_mark ({})",
                self.low_water_mark, self.high_water_mark
            )));
        }
        if self.max_size < self.high_water_mark {
            return Err(crate::Error::Config(format!(
                "max_size ({}) must be at least high_water_mark ({})",
                self.max_size, self.high_water_mark
            )));
        }
        Ok(())
    }
}

/// Supervisor restart strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    /// Restart only the failed child
    #[default]
    OneForOne,

    /// Stop all children in reverse start order, restart all
    OneForAll,

    /// Stop the failed child and everything started after it,
    /// restart that suffix
    RestForOne,
}

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Restart strategy applied on child failure
    pub strategy: RestartStrategy,

    /// Maximum restarts allowed within the sliding window
    pub max_restarts: u32,

    /// Sliding window length in seconds
    pub max_seconds: u64,

    /// Default graceful-shutdown grace period in milliseconds
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            strategy: RestartStrategy::OneForOne,
            max_restarts: 5,
            max_seconds: 60,
            shutdown_grace_ms: 5000,
        }
    }
}

/// Segment flush mode for streaming input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMode {
    /// Flush at the last complete sentence boundary
    #[default]
    Sentence,

    /// Flush whenever the buffer reaches the size threshold
    Immediate,
}

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Segment flush mode
    pub mode: SegmentMode,

    /// Buffer size threshold in bytes
    pub buffer_size: usize,

    /// Bytes retained across segments for cross-chunk span continuity
    pub overlap: usize,

    /// Number of supervised pipeline workers
    pub workers: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: SegmentMode::Sentence,
            buffer_size: 4096,
            overlap: 128,
            workers: 2,
        }
    }
}
