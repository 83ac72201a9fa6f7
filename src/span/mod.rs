//! Span data model
//!
//! Core types shared by every pipeline stage: the sensitive-data category
//! taxonomy, candidate spans produced by upstream detectors, the document
//! wrapper, and the finished redaction result. Also provides the window
//! tokenizer used to satisfy the span input contract.

mod types;
mod window;

pub use types::{Document, FilterType, RedactionResult, Span};
pub use window::{normalize_window, tokenize, tokenize_window};
