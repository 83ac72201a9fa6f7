//! PhiGuard - Context-aware PHI/PII redaction decision pipeline
//!
//! PhiGuard takes free text plus already-detected candidate sensitive spans
//! and decides what actually gets redacted: it refines each span's
//! confidence from surrounding-text evidence, resolves spans competing for
//! the same character range, and runs the whole sequence through an
//! extensible, fault-isolated plugin pipeline that stays alive under
//! continuous streaming load.
//!
//! ## Data flow
//!
//! ```text
//!                    raw spans (external detectors)
//!                              │
//!  ┌───────────────────────────▼───────────────────────────────┐
//!  │                    Plugin Pipeline                         │
//!  │   pre_process ─ can_short_circuit ─ post_detection         │
//!  └───────────────────────────┬───────────────────────────────┘
//!                              │
//!  ┌───────────────────────────▼───────────────────────────────┐
//!  │              Confidence Modifier Engine                    │
//!  │   log-odds deltas, overrides, two-tier keyword scan        │
//!  └───────────────────────────┬───────────────────────────────┘
//!                              │
//!  ┌───────────────────────────▼───────────────────────────────┐
//!  │                Disambiguation Engine                       │
//!  │   one survivor per range: vector / keyword / embedding     │
//!  └───────────────────────────┬───────────────────────────────┘
//!                              │
//!        pre_redaction ─ writer ─ post_redaction
//! ```
//!
//! In streaming mode each document's pass is wrapped in a circuit breaker
//! call and fed through a backpressure queue; a supervisor restarts failed
//! stream workers.
//!
//! ## Modules
//!
//! - [`span`]: span/document data model and window tokenization
//! - [`confidence`]: rule-driven confidence adjustment
//! - [`disambiguation`]: same-range resolution and overlap cleanup
//! - [`plugin`]: manifest discovery, lifecycle, sandboxed hooks
//! - [`runtime`]: circuit breaker, backpressure queue, supervisor
//! - [`pipeline`]: one-document orchestration
//! - [`stream`]: segmentation and supervised streaming execution
//! - [`config`]: configuration management

pub mod config;
pub mod confidence;
pub mod disambiguation;
pub mod error;
pub mod pipeline;
pub mod plugin;
pub mod runtime;
pub mod span;
pub mod stream;

pub use config::PhiGuardConfig;
pub use error::{Error, Result};
pub use pipeline::{MaskWriter, RedactionPipeline, RedactionWriter};
pub use span::{Document, FilterType, RedactionResult, Span};
