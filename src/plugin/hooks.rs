//! Plugin hook interfaces
//!
//! Two interfaces are supported: the modern multi-stage one and a legacy
//! two-stage one kept for backward compatibility. Which interface a plugin
//! implements is resolved once at registration into a tagged `HookSet`,
//! never re-checked per call.

use crate::error::Result;
use crate::span::{Document, RedactionResult, Span};
use async_trait::async_trait;
use std::sync::Arc;

/// Modern multi-stage hook interface.
///
/// Every method defaults to a passthrough, so plugins implement only the
/// stages they care about. Declared `priority`/`timeout_ms` override the
/// manifest values.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    /// Transform the document before detection.
    async fn pre_process(&self, doc: Document) -> Result<Document> {
        Ok(doc)
    }

    /// Return a finished result to stop the pipeline early.
    async fn can_short_circuit(&self, _doc: &Document) -> Result<Option<RedactionResult>> {
        Ok(None)
    }

    /// Transform raw spans after detection.
    async fn post_detection(&self, spans: Vec<Span>, _doc: &Document) -> Result<Vec<Span>> {
        Ok(spans)
    }

    /// Transform disambiguated spans before redaction.
    async fn pre_redaction(&self, spans: Vec<Span>, _doc: &Document) -> Result<Vec<Span>> {
        Ok(spans)
    }

    /// Transform the finished result.
    async fn post_redaction(&self, result: RedactionResult) -> Result<RedactionResult> {
        Ok(result)
    }

    /// Priority override; lower runs earlier.
    fn priority_override(&self) -> Option<u8> {
        None
    }

    /// Timeout override in milliseconds.
    fn timeout_override(&self) -> Option<u64> {
        None
    }
}

/// Legacy two-stage hook interface.
#[async_trait]
pub trait LegacyHooks: Send + Sync {
    /// Transform raw text before the pipeline runs.
    async fn before_redaction(&self, text: String) -> Result<String> {
        Ok(text)
    }

    /// Transform the finished result.
    async fn after_redaction(&self, result: RedactionResult) -> Result<RedactionResult> {
        Ok(result)
    }

    /// Priority override; lower runs earlier.
    fn priority_override(&self) -> Option<u8> {
        None
    }

    /// Timeout override in milliseconds.
    fn timeout_override(&self) -> Option<u64> {
        None
    }
}

/// Interface version, resolved once at registration.
#[derive(Clone)]
pub enum HookSet {
    Modern(Arc<dyn PluginHooks>),
    Legacy(Arc<dyn LegacyHooks>),
}

impl HookSet {
    /// Priority override declared by the plugin, if any.
    pub fn priority_override(&self) -> Option<u8> {
        match self {
            Self::Modern(hooks) => hooks.priority_override(),
            Self::Legacy(hooks) => hooks.priority_override(),
        }
    }

    /// Timeout override declared by the plugin, if any.
    pub fn timeout_override(&self) -> Option<u64> {
        match self {
            Self::Modern(hooks) => hooks.timeout_override(),
            Self::Legacy(hooks) => hooks.timeout_override(),
        }
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Modern(_) => write!(f, "HookSet::Modern"),
            Self::Legacy(_) => write!(f, "HookSet::Legacy"),
        }
    }
}

/// One plugin's entry in the priority-sorted execution list.
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub plugin_name: String,
    pub priority: u8,
    pub timeout_ms: u64,
    pub hooks: HookSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    #[async_trait]
    impl PluginHooks for Passthrough {}

    struct Overriding;

    #[async_trait]
    impl PluginHooks for Overriding {
        fn priority_override(&self) -> Option<u8> {
            Some(5)
        }

        fn timeout_override(&self) -> Option<u64> {
            Some(100)
        }
    }

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        let hooks = Passthrough;
        let doc = Document::new("hello");
        let out = hooks.pre_process(doc.clone()).await.unwrap();
        assert_eq!(out.text, "hello");

        assert!(hooks.can_short_circuit(&doc).await.unwrap().is_none());

        let spans = vec![Span::new(
            crate::span::FilterType::Ssn,
            0,
            5,
            "hello",
            0.5,
        )];
        let out = hooks.post_detection(spans.clone(), &doc).await.unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_hook_set_overrides() {
        let plain = HookSet::Modern(Arc::new(Passthrough));
        assert!(plain.priority_override().is_none());
        assert!(plain.timeout_override().is_none());

        let custom = HookSet::Modern(Arc::new(Overriding));
        assert_eq!(custom.priority_override(), Some(5));
        assert_eq!(custom.timeout_override(), Some(100));
    }
}
