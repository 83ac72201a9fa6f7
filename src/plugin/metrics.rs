//! Per-plugin execution metrics

use serde::Serialize;
use std::collections::HashMap;

/// Running counters for one plugin.
///
/// Created lazily on first execution, reset only by explicit operator
/// action.
#[derive(Debug, Clone, Default)]
pub struct PluginMetrics {
    pub invocations: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub short_circuits: u64,
    pub min_execution_time_ms: Option<u64>,
    pub max_execution_time_ms: u64,
    total_execution_time_ms: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<u64>,
}

impl PluginMetrics {
    fn record_time(&mut self, elapsed_ms: u64) {
        self.invocations += 1;
        self.total_execution_time_ms += elapsed_ms;
        self.max_execution_time_ms = self.max_execution_time_ms.max(elapsed_ms);
        self.min_execution_time_ms = Some(match self.min_execution_time_ms {
            Some(min) => min.min(elapsed_ms),
            None => elapsed_ms,
        });
    }

    /// Record a successful execution.
    pub fn record_success(&mut self, elapsed_ms: u64) {
        self.record_time(elapsed_ms);
    }

    /// Record a failed execution.
    pub fn record_error(&mut self, message: &str, elapsed_ms: u64) {
        self.record_time(elapsed_ms);
        self.errors += 1;
        self.last_error = Some(message.to_string());
        self.last_error_at = Some(chrono::Utc::now().timestamp_millis() as u64);
    }

    /// Record a timed-out execution.
    pub fn record_timeout(&mut self, elapsed_ms: u64) {
        self.record_time(elapsed_ms);
        self.timeouts += 1;
    }

    /// Record a short-circuit hit. Observability only.
    pub fn record_short_circuit(&mut self) {
        self.short_circuits += 1;
    }

    /// Average execution time across all invocations.
    pub fn avg_execution_time_ms(&self) -> f64 {
        if self.invocations == 0 {
            return 0.0;
        }
        self.total_execution_time_ms as f64 / self.invocations as f64
    }
}

/// Lazily-populated metrics per plugin name.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    plugins: HashMap<String, PluginMetrics>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable metrics for a plugin, created on first access.
    pub fn entry(&mut self, plugin: &str) -> &mut PluginMetrics {
        self.plugins.entry(plugin.to_string()).or_default()
    }

    /// Metrics for a plugin, if it has executed.
    pub fn get(&self, plugin: &str) -> Option<&PluginMetrics> {
        self.plugins.get(plugin)
    }

    /// Reset one plugin's counters.
    pub fn reset(&mut self, plugin: &str) {
        self.plugins.remove(plugin);
    }

    /// Reset everything.
    pub fn reset_all(&mut self) {
        self.plugins.clear();
    }

    /// Build the export envelope.
    pub fn export(&self, total_plugins: usize, enabled_plugins: usize) -> PipelineMetricsExport {
        let plugins: HashMap<String, PluginMetricsExport> = self
            .plugins
            .iter()
            .map(|(name, m)| {
                (
                    name.clone(),
                    PluginMetricsExport {
                        invocations: m.invocations,
                        errors: m.errors,
                        timeouts: m.timeouts,
                        short_circuits: m.short_circuits,
                        min_execution_time_ms: m.min_execution_time_ms.unwrap_or(0),
                        avg_execution_time_ms: m.avg_execution_time_ms(),
                        max_execution_time_ms: m.max_execution_time_ms,
                        last_error: m.last_error.clone(),
                        last_error_at: m.last_error_at,
                    },
                )
            })
            .collect();

        PipelineMetricsExport {
            total_plugins,
            enabled_plugins,
            total_invocations: self.plugins.values().map(|m| m.invocations).sum(),
            total_errors: self.plugins.values().map(|m| m.errors).sum(),
            total_timeouts: self.plugins.values().map(|m| m.timeouts).sum(),
            plugins,
        }
    }
}

/// Wire form of one plugin's metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetricsExport {
    pub invocations: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub short_circuits: u64,
    pub min_execution_time_ms: u64,
    pub avg_execution_time_ms: f64,
    pub max_execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<u64>,
}

/// Wire form of the whole pipeline's metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetricsExport {
    pub total_plugins: usize,
    pub enabled_plugins: usize,
    pub total_invocations: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub plugins: HashMap<String, PluginMetricsExport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_avg_max() {
        let mut m = PluginMetrics::default();
        m.record_success(10);
        m.record_success(30);
        m.record_success(20);

        assert_eq!(m.invocations, 3);
        assert_eq!(m.min_execution_time_ms, Some(10));
        assert_eq!(m.max_execution_time_ms, 30);
        assert!((m.avg_execution_time_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_records_last_error() {
        let mut m = PluginMetrics::default();
        m.record_error("boom", 5);
        assert_eq!(m.errors, 1);
        assert_eq!(m.last_error.as_deref(), Some("boom"));
        assert!(m.last_error_at.is_some());
    }

    #[test]
    fn test_registry_lazy_creation_and_reset() {
        let mut registry = MetricsRegistry::new();
        assert!(registry.get("p").is_none());

        registry.entry("p").record_success(7);
        assert_eq!(registry.get("p").unwrap().invocations, 1);

        registry.reset("p");
        assert!(registry.get("p").is_none());
    }

    #[test]
    fn test_export_envelope() {
        let mut registry = MetricsRegistry::new();
        registry.entry("a").record_success(10);
        registry.entry("a").record_timeout(50);
        registry.entry("b").record_error("x", 5);

        let export = registry.export(3, 2);
        assert_eq!(export.total_plugins, 3);
        assert_eq!(export.enabled_plugins, 2);
        assert_eq!(export.total_invocations, 3);
        assert_eq!(export.total_errors, 1);
        assert_eq!(export.total_timeouts, 1);

        let json = serde_json::to_string(&export).unwrap();
        assert!(json.contains("\"totalPlugins\":3"));
        assert!(json.contains("\"shortCircuits\""));
        assert!(json.contains("\"avgExecutionTimeMs\""));
    }
}
