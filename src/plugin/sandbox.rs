//! Sandboxed hook execution
//!
//! Every hook call runs behind a deadline and updates per-plugin metrics.
//! A plugin that fails too many times in a row is auto-disabled: further
//! calls short-circuit immediately with a "disabled" result until an
//! operator re-enables it. Timeouts cancel the hook future at its next
//! await point.

use crate::error::Result;
use crate::plugin::metrics::{MetricsRegistry, PipelineMetricsExport};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;

/// Outcome of one sandboxed hook call.
#[derive(Debug)]
pub struct HookExecution<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub plugin_disabled: bool,
}

impl<T> HookExecution<T> {
    fn disabled() -> Self {
        Self {
            success: false,
            value: None,
            error: None,
            execution_time_ms: 0,
            timed_out: false,
            plugin_disabled: true,
        }
    }
}

/// Timeout-isolated executor with failure accounting.
pub struct Sandbox {
    metrics: RwLock<MetricsRegistry>,
    disabled: RwLock<HashSet<String>>,
    consecutive_failures: RwLock<HashMap<String, u32>>,
    max_consecutive_failures: u32,
}

impl Sandbox {
    /// Create a sandbox that disables plugins after
    /// `max_consecutive_failures` consecutive failures.
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            metrics: RwLock::new(MetricsRegistry::new()),
            disabled: RwLock::new(HashSet::new()),
            consecutive_failures: RwLock::new(HashMap::new()),
            max_consecutive_failures: max_consecutive_failures.max(1),
        }
    }

    /// Run a hook future against its deadline.
    pub async fn execute<T, F>(
        &self,
        plugin: &str,
        hook: &str,
        timeout_ms: u64,
        fut: F,
    ) -> HookExecution<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_disabled(plugin).await {
            return HookExecution::disabled();
        }

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(value)) => {
                self.metrics.write().await.entry(plugin).record_success(elapsed_ms);
                self.consecutive_failures.write().await.insert(plugin.to_string(), 0);
                HookExecution {
                    success: true,
                    value: Some(value),
                    error: None,
                    execution_time_ms: elapsed_ms,
                    timed_out: false,
                    plugin_disabled: false,
                }
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                tracing::warn!(plugin, hook, error = %message, "plugin hook failed");
                self.metrics
                    .write()
                    .await
                    .entry(plugin)
                    .record_error(&message, elapsed_ms);
                self.note_failure(plugin).await;
                HookExecution {
                    success: false,
                    value: None,
                    error: Some(message),
                    execution_time_ms: elapsed_ms,
                    timed_out: false,
                    plugin_disabled: false,
                }
            }
            Err(_) => {
                tracing::warn!(plugin, hook, timeout_ms, "plugin hook timed out");
                self.metrics.write().await.entry(plugin).record_timeout(elapsed_ms);
                self.note_failure(plugin).await;
                HookExecution {
                    success: false,
                    value: None,
                    error: None,
                    execution_time_ms: elapsed_ms,
                    timed_out: true,
                    plugin_disabled: false,
                }
            }
        }
    }

    async fn note_failure(&self, plugin: &str) {
        let mut failures = self.consecutive_failures.write().await;
        let count = failures.entry(plugin.to_string()).or_insert(0);
        *count += 1;

        if *count >= self.max_consecutive_failures {
            tracing::warn!(
                plugin,
                failures = *count,
                "plugin auto-disabled after consecutive failures"
            );
            self.disabled.write().await.insert(plugin.to_string());
        }
    }

    /// True when the plugin has been auto- or operator-disabled.
    pub async fn is_disabled(&self, plugin: &str) -> bool {
        self.disabled.read().await.contains(plugin)
    }

    /// Re-enable a plugin and reset its failure counter.
    pub async fn enable(&self, plugin: &str) {
        self.disabled.write().await.remove(plugin);
        self.consecutive_failures.write().await.insert(plugin.to_string(), 0);
    }

    /// Disable a plugin explicitly.
    pub async fn disable(&self, plugin: &str) {
        self.disabled.write().await.insert(plugin.to_string());
    }

    /// Count a short-circuit hit. Observability only.
    pub async fn record_short_circuit(&self, plugin: &str) {
        self.metrics.write().await.entry(plugin).record_short_circuit();
    }

    /// Reset one plugin's metrics.
    pub async fn reset_metrics(&self, plugin: &str) {
        self.metrics.write().await.reset(plugin);
    }

    /// Build the metrics export envelope.
    pub async fn metrics_export(
        &self,
        total_plugins: usize,
        enabled_plugins: usize,
    ) -> PipelineMetricsExport {
        self.metrics.read().await.export(total_plugins, enabled_plugins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    async fn slow_ok(ms: u64) -> Result<u32> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(42)
    }

    #[tokio::test]
    async fn test_success_path() {
        let sandbox = Sandbox::new(3);
        let exec = sandbox.execute("p", "hook", 1000, async { Ok(7u32) }).await;
        assert!(exec.success);
        assert_eq!(exec.value, Some(7));
        assert!(!exec.timed_out);
        assert!(!exec.plugin_disabled);

        let export = sandbox.metrics_export(1, 1).await;
        assert_eq!(export.plugins["p"].invocations, 1);
    }

    #[tokio::test]
    async fn test_timeout_result_shape() {
        let sandbox = Sandbox::new(10);
        let exec = sandbox.execute("p", "hook", 50, slow_ok(200)).await;
        assert!(!exec.success);
        assert!(exec.timed_out);
        assert!(exec.value.is_none());

        let export = sandbox.metrics_export(1, 1).await;
        assert_eq!(export.plugins["p"].timeouts, 1);
    }

    #[tokio::test]
    async fn test_three_timeouts_disable_plugin() {
        let sandbox = Sandbox::new(3);
        for _ in 0..3 {
            let exec = sandbox.execute("p", "hook", 10, slow_ok(100)).await;
            assert!(exec.timed_out);
        }
        assert!(sandbox.is_disabled("p").await);

        // Subsequent calls short-circuit without invoking the hook.
        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = invoked.clone();
        let exec = sandbox
            .execute("p", "hook", 10, async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(1u32)
            })
            .await;
        assert!(exec.plugin_disabled);
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let sandbox = Sandbox::new(3);
        for _ in 0..2 {
            sandbox
                .execute::<u32, _>("p", "hook", 1000, async {
                    Err(Error::Internal("boom".to_string()))
                })
                .await;
        }
        sandbox.execute("p", "hook", 1000, async { Ok(1u32) }).await;
        for _ in 0..2 {
            sandbox
                .execute::<u32, _>("p", "hook", 1000, async {
                    Err(Error::Internal("boom".to_string()))
                })
                .await;
        }
        // Streak never reached 3 consecutively.
        assert!(!sandbox.is_disabled("p").await);
    }

    #[tokio::test]
    async fn test_enable_resets_counter() {
        let sandbox = Sandbox::new(2);
        for _ in 0..2 {
            sandbox
                .execute::<u32, _>("p", "hook", 1000, async {
                    Err(Error::Internal("boom".to_string()))
                })
                .await;
        }
        assert!(sandbox.is_disabled("p").await);

        sandbox.enable("p").await;
        assert!(!sandbox.is_disabled("p").await);

        // One more failure is below the threshold again.
        sandbox
            .execute::<u32, _>("p", "hook", 1000, async {
                Err(Error::Internal("boom".to_string()))
            })
            .await;
        assert!(!sandbox.is_disabled("p").await);
    }

    #[tokio::test]
    async fn test_error_captures_message() {
        let sandbox = Sandbox::new(3);
        let exec = sandbox
            .execute::<u32, _>("p", "hook", 1000, async {
                Err(Error::Internal("kaput".to_string()))
            })
            .await;
        assert!(!exec.success);
        assert!(exec.error.as_deref().unwrap_or("").contains("kaput"));

        let export = sandbox.metrics_export(1, 1).await;
        assert!(export.plugins["p"].last_error.as_deref().unwrap().contains("kaput"));
    }

    #[tokio::test]
    async fn test_short_circuit_counter() {
        let sandbox = Sandbox::new(3);
        sandbox.record_short_circuit("p").await;
        sandbox.record_short_circuit("p").await;
        let export = sandbox.metrics_export(1, 1).await;
        assert_eq!(export.plugins["p"].short_circuits, 2);
    }
}
