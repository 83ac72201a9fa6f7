//! Plugin lifecycle and hook dispatch
//!
//! Plugins move through `Discovered -> Loaded -> Enabled <-> Disabled`,
//! with `Error` reachable from any transition and `unload` returning to
//! `Discovered`. Discovery reads one manifest per plugin directory; loading
//! instantiates the entry point through the factory registry, dependencies
//! first. Enabled plugins land in a single priority-sorted execution list
//! that the stage runners walk in ascending order (descending for the final
//! result stage).

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::plugin::hooks::{HookEntry, HookSet};
use crate::plugin::manifest::{PluginManifest, PluginType, MANIFEST_FILE};
use crate::plugin::metrics::PipelineMetricsExport;
use crate::plugin::sandbox::{HookExecution, Sandbox};
use crate::span::{Document, RedactionResult, Span};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Plugin lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Discovered,
    Loaded,
    Enabled,
    Disabled,
    Error,
}

/// An instantiated plugin entry point.
pub struct PluginInstance {
    pub hooks: HookSet,
}

/// Factory producing a plugin instance from its manifest.
pub type PluginFactory = Arc<dyn Fn(&PluginManifest) -> Result<PluginInstance> + Send + Sync>;

/// Entry-point registry: manifest `main` name -> factory.
///
/// The Rust rendering of dynamic entry-point loading: hosts register the
/// factories they ship, manifests select them by name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under an entry-point name.
    pub fn register<F>(&mut self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn(&PluginManifest) -> Result<PluginInstance> + Send + Sync + 'static,
    {
        self.factories.insert(entry_point.into(), Arc::new(factory));
    }

    fn get(&self, entry_point: &str) -> Option<PluginFactory> {
        self.factories.get(entry_point).cloned()
    }
}

struct PluginRecord {
    manifest: PluginManifest,
    state: PluginState,
    instance: Option<PluginInstance>,
}

/// Owns plugin records, the sorted hook list, and the sandbox.
pub struct PluginManager {
    config: PipelineConfig,
    registry: PluginRegistry,
    plugins: RwLock<BTreeMap<String, PluginRecord>>,
    entries: RwLock<Vec<HookEntry>>,
    /// Capabilities registered by enabled plugins, in enable order.
    capabilities: RwLock<Vec<(String, PluginType)>>,
    sandbox: Sandbox,
}

impl PluginManager {
    /// Create a manager over a factory registry.
    pub fn new(config: PipelineConfig, registry: PluginRegistry) -> Self {
        let sandbox = Sandbox::new(config.max_consecutive_failures);
        Self {
            config,
            registry,
            plugins: RwLock::new(BTreeMap::new()),
            entries: RwLock::new(Vec::new()),
            capabilities: RwLock::new(Vec::new()),
            sandbox,
        }
    }

    /// Sandbox handle for operator actions and metrics.
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    // =========================================================================
    // Discovery and lifecycle
    // =========================================================================

    /// Scan every configured plugin directory for manifests.
    pub async fn discover(&self) -> Result<Vec<String>> {
        let dirs = self.config.plugin_dirs.clone();
        let mut found = Vec::new();
        for dir in dirs {
            found.extend(self.discover_dir(&dir).await?);
        }
        Ok(found)
    }

    /// Scan one directory: each subdirectory holding a manifest is a plugin.
    pub async fn discover_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "plugin directory unreadable");
                return Ok(found);
            }
        };

        while let Some(entry) = read_dir.next_entry().await? {
            let manifest_path = entry.path().join(MANIFEST_FILE);
            let raw = match tokio::fs::read_to_string(&manifest_path).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };

            let manifest: PluginManifest = match serde_json::from_str(&raw) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %manifest_path.display(), error = %e, "invalid plugin manifest");
                    continue;
                }
            };
            if let Err(e) = manifest.validate() {
                tracing::warn!(path = %manifest_path.display(), error = %e, "plugin manifest rejected");
                continue;
            }

            let name = manifest.name.clone();
            tracing::info!(plugin = %name, path = %manifest_path.display(), "plugin discovered");
            self.plugins.write().await.insert(
                name.clone(),
                PluginRecord {
                    manifest,
                    state: PluginState::Discovered,
                    instance: None,
                },
            );
            found.push(name);
        }

        Ok(found)
    }

    /// Load every discovered plugin, dependencies first.
    ///
    /// Returns plugin names in load order. A dependency cycle is logged and
    /// the cyclic edge skipped rather than deadlocking.
    pub async fn load_all(&self) -> Result<Vec<String>> {
        let order = self.topo_order().await;
        let mut loaded = Vec::new();
        for name in order {
            match self.load(&name).await {
                Ok(()) => loaded.push(name),
                Err(e) => tracing::warn!(plugin = %name, error = %e, "plugin failed to load"),
            }
        }
        Ok(loaded)
    }

    async fn topo_order(&self) -> Vec<String> {
        let plugins = self.plugins.read().await;
        let known: HashSet<&String> = plugins.keys().collect();

        // Edges: dependency -> dependent
        let mut in_degree: BTreeMap<String, usize> =
            plugins.keys().map(|n| (n.clone(), 0)).collect();
        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (name, record) in plugins.iter() {
            for dep in &record.manifest.dependencies {
                if !known.contains(dep) {
                    tracing::warn!(plugin = %name, dependency = %dep, "unknown plugin dependency ignored");
                    continue;
                }
                *in_degree.entry(name.clone()).or_insert(0) += 1;
                dependents.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        let mut queue: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| n.clone())
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(name) = queue.pop_front() {
            order.push(name.clone());
            for dependent in dependents.get(&name).cloned().unwrap_or_default() {
                if let Some(d) = in_degree.get_mut(&dependent) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            // Remaining nodes sit on a cycle: load them anyway, in name order.
            let placed: HashSet<&String> = order.iter().collect();
            let remaining: Vec<String> = in_degree
                .keys()
                .filter(|n| !placed.contains(n))
                .cloned()
                .collect();
            tracing::warn!(
                plugins = ?remaining,
                "dependency cycle detected; cyclic edges skipped"
            );
            order.extend(remaining);
        }

        order
    }

    /// Instantiate a discovered plugin's entry point.
    pub async fn load(&self, name: &str) -> Result<()> {
        let mut plugins = self.plugins.write().await;
        let record = plugins
            .get_mut(name)
            .ok_or_else(|| Error::Plugin(format!("unknown plugin '{}'", name)))?;

        if record.state != PluginState::Discovered {
            return Err(Error::Plugin(format!(
                "plugin '{}' cannot load from state {:?}",
                name, record.state
            )));
        }

        let factory = match self.registry.get(&record.manifest.main) {
            Some(f) => f,
            None => {
                record.state = PluginState::Error;
                return Err(Error::Plugin(format!(
                    "no factory registered for entry point '{}'",
                    record.manifest.main
                )));
            }
        };

        match factory(&record.manifest) {
            Ok(instance) => {
                record.instance = Some(instance);
                record.state = PluginState::Loaded;
                tracing::info!(plugin = %name, "plugin loaded");
                Ok(())
            }
            Err(e) => {
                record.state = PluginState::Error;
                Err(Error::Plugin(format!("plugin '{}' failed to load: {}", name, e)))
            }
        }
    }

    /// Register the plugin's hook set into the execution list.
    ///
    /// Also clears any sandbox auto-disable and resets its failure counter,
    /// which is the operator re-enable path.
    pub async fn enable(&self, name: &str) -> Result<()> {
        let mut plugins = self.plugins.write().await;
        let record = plugins
            .get_mut(name)
            .ok_or_else(|| Error::Plugin(format!("unknown plugin '{}'", name)))?;

        match record.state {
            PluginState::Loaded | PluginState::Disabled => {}
            other => {
                return Err(Error::Plugin(format!(
                    "plugin '{}' cannot enable from state {:?}",
                    name, other
                )));
            }
        }

        let instance = record
            .instance
            .as_ref()
            .ok_or_else(|| Error::Plugin(format!("plugin '{}' has no instance", name)))?;

        let hooks = instance.hooks.clone();
        let priority = hooks.priority_override().unwrap_or(record.manifest.priority);
        let timeout_ms = hooks.timeout_override().unwrap_or(record.manifest.timeout_ms);
        let capability = record.manifest.plugin_type;

        record.state = PluginState::Enabled;
        drop(plugins);

        self.insert_entry(HookEntry {
            plugin_name: name.to_string(),
            priority,
            timeout_ms,
            hooks,
        })
        .await;
        self.capabilities
            .write()
            .await
            .push((name.to_string(), capability));
        self.sandbox.enable(name).await;

        tracing::info!(plugin = %name, priority, timeout_ms, "plugin enabled");
        Ok(())
    }

    /// Reverse the enable registration exactly.
    pub async fn disable(&self, name: &str) -> Result<()> {
        let mut plugins = self.plugins.write().await;
        let record = plugins
            .get_mut(name)
            .ok_or_else(|| Error::Plugin(format!("unknown plugin '{}'", name)))?;

        if record.state != PluginState::Enabled {
            return Err(Error::Plugin(format!(
                "plugin '{}' cannot disable from state {:?}",
                name, record.state
            )));
        }
        record.state = PluginState::Disabled;
        drop(plugins);

        self.remove_entry(name).await;
        self.capabilities
            .write()
            .await
            .retain(|(plugin, _)| plugin != name);
        tracing::info!(plugin = %name, "plugin disabled");
        Ok(())
    }

    /// Tear a plugin down from any state back to `Discovered`.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let mut plugins = self.plugins.write().await;
        let record = plugins
            .get_mut(name)
            .ok_or_else(|| Error::Plugin(format!("unknown plugin '{}'", name)))?;

        record.instance = None;
        record.state = PluginState::Discovered;
        drop(plugins);

        self.remove_entry(name).await;
        self.capabilities
            .write()
            .await
            .retain(|(plugin, _)| plugin != name);
        tracing::info!(plugin = %name, "plugin unloaded");
        Ok(())
    }

    /// Register a built-in plugin directly, bypassing discovery.
    pub async fn register_builtin(
        &self,
        name: &str,
        priority: u8,
        timeout_ms: u64,
        hooks: HookSet,
    ) {
        let manifest = PluginManifest {
            name: name.to_string(),
            version: "builtin".to_string(),
            description: String::new(),
            plugin_type: PluginType::Hook,
            main: name.to_string(),
            priority,
            timeout_ms,
            dependencies: Vec::new(),
            config: serde_json::Value::Null,
        };
        self.plugins.write().await.insert(
            name.to_string(),
            PluginRecord {
                manifest,
                state: PluginState::Enabled,
                instance: Some(PluginInstance {
                    hooks: hooks.clone(),
                }),
            },
        );
        self.insert_entry(HookEntry {
            plugin_name: name.to_string(),
            priority,
            timeout_ms,
            hooks,
        })
        .await;
        self.capabilities
            .write()
            .await
            .push((name.to_string(), PluginType::Hook));
    }

    async fn insert_entry(&self, entry: HookEntry) {
        let mut entries = self.entries.write().await;
        entries.retain(|e| e.plugin_name != entry.plugin_name);
        entries.push(entry);
        // Stable sort keeps registration order within a priority.
        entries.sort_by_key(|e| e.priority);
    }

    async fn remove_entry(&self, name: &str) {
        self.entries.write().await.retain(|e| e.plugin_name != name);
    }

    /// Lifecycle state of a plugin.
    pub async fn state(&self, name: &str) -> Option<PluginState> {
        self.plugins.read().await.get(name).map(|r| r.state)
    }

    /// Capabilities registered by enabled plugins, in enable order.
    pub async fn capabilities(&self) -> Vec<(String, PluginType)> {
        self.capabilities.read().await.clone()
    }

    /// Names of all known plugins.
    pub async fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().await.keys().cloned().collect()
    }

    /// Metrics export envelope.
    pub async fn metrics(&self) -> PipelineMetricsExport {
        let plugins = self.plugins.read().await;
        let total = plugins.len();
        let enabled = plugins
            .values()
            .filter(|r| r.state == PluginState::Enabled)
            .count();
        drop(plugins);
        self.sandbox.metrics_export(total, enabled).await
    }

    // =========================================================================
    // Stage runners
    // =========================================================================

    async fn snapshot(&self) -> Vec<HookEntry> {
        self.entries.read().await.clone()
    }

    fn stage_failure<T>(
        &self,
        plugin: &str,
        hook: &str,
        timeout_ms: u64,
        exec: &HookExecution<T>,
    ) -> Option<Error> {
        if exec.plugin_disabled || exec.success {
            return None;
        }
        if !self.config.fail_fast {
            return None;
        }
        Some(if exec.timed_out {
            Error::PluginTimeout {
                plugin: plugin.to_string(),
                hook: hook.to_string(),
                timeout_ms,
            }
        } else {
            Error::PluginExecution {
                plugin: plugin.to_string(),
                hook: hook.to_string(),
                message: exec.error.clone().unwrap_or_default(),
            }
        })
    }

    /// Run `pre_process` (modern) and `before_redaction` (legacy) in
    /// ascending priority order.
    pub async fn run_pre_process(&self, mut doc: Document) -> Result<Document> {
        for entry in self.snapshot().await {
            match &entry.hooks {
                HookSet::Modern(hooks) => {
                    let hooks = hooks.clone();
                    let input = doc.clone();
                    let mut exec = self
                        .sandbox
                        .execute(&entry.plugin_name, "pre_process", entry.timeout_ms, async move {
                            hooks.pre_process(input).await
                        })
                        .await;
                    if let Some(value) = exec.value.take() {
                        doc = value;
                    } else if let Some(err) =
                        self.stage_failure(&entry.plugin_name, "pre_process", entry.timeout_ms, &exec)
                    {
                        return Err(err);
                    }
                }
                HookSet::Legacy(hooks) => {
                    let hooks = hooks.clone();
                    let input = doc.text.clone();
                    let mut exec = self
                        .sandbox
                        .execute(
                            &entry.plugin_name,
                            "before_redaction",
                            entry.timeout_ms,
                            async move { hooks.before_redaction(input).await },
                        )
                        .await;
                    if let Some(text) = exec.value.take() {
                        doc.text = text;
                    } else if let Some(err) = self.stage_failure(
                        &entry.plugin_name,
                        "before_redaction",
                        entry.timeout_ms,
                        &exec,
                    ) {
                        return Err(err);
                    }
                }
            }
        }
        Ok(doc)
    }

    /// Probe `can_short_circuit` in ascending priority order; the first
    /// non-empty result stops the pipeline.
    pub async fn run_short_circuit(
        &self,
        doc: &Document,
    ) -> Result<Option<(String, RedactionResult)>> {
        for entry in self.snapshot().await {
            let HookSet::Modern(hooks) = &entry.hooks else {
                continue;
            };
            let hooks = hooks.clone();
            let input = doc.clone();
            let mut exec = self
                .sandbox
                .execute(
                    &entry.plugin_name,
                    "can_short_circuit",
                    entry.timeout_ms,
                    async move { hooks.can_short_circuit(&input).await },
                )
                .await;
            match exec.value.take() {
                Some(Some(result)) => {
                    self.sandbox.record_short_circuit(&entry.plugin_name).await;
                    tracing::info!(plugin = %entry.plugin_name, "pipeline short-circuited");
                    return Ok(Some((entry.plugin_name.clone(), result)));
                }
                Some(None) => {}
                None => {
                    if let Some(err) = self.stage_failure(
                        &entry.plugin_name,
                        "can_short_circuit",
                        entry.timeout_ms,
                        &exec,
                    ) {
                        return Err(err);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Run `post_detection` in ascending priority order.
    pub async fn run_post_detection(
        &self,
        mut spans: Vec<Span>,
        doc: &Document,
    ) -> Result<Vec<Span>> {
        for entry in self.snapshot().await {
            let HookSet::Modern(hooks) = &entry.hooks else {
                continue;
            };
            let hooks = hooks.clone();
            let input = spans.clone();
            let input_doc = doc.clone();
            let mut exec = self
                .sandbox
                .execute(
                    &entry.plugin_name,
                    "post_detection",
                    entry.timeout_ms,
                    async move { hooks.post_detection(input, &input_doc).await },
                )
                .await;
            if let Some(value) = exec.value.take() {
                spans = value;
            } else if let Some(err) =
                self.stage_failure(&entry.plugin_name, "post_detection", entry.timeout_ms, &exec)
            {
                return Err(err);
            }
        }
        Ok(spans)
    }

    /// Run `pre_redaction` in ascending priority order.
    pub async fn run_pre_redaction(
        &self,
        mut spans: Vec<Span>,
        doc: &Document,
    ) -> Result<Vec<Span>> {
        for entry in self.snapshot().await {
            let HookSet::Modern(hooks) = &entry.hooks else {
                continue;
            };
            let hooks = hooks.clone();
            let input = spans.clone();
            let input_doc = doc.clone();
            let mut exec = self
                .sandbox
                .execute(
                    &entry.plugin_name,
                    "pre_redaction",
                    entry.timeout_ms,
                    async move { hooks.pre_redaction(input, &input_doc).await },
                )
                .await;
            if let Some(value) = exec.value.take() {
                spans = value;
            } else if let Some(err) =
                self.stage_failure(&entry.plugin_name, "pre_redaction", entry.timeout_ms, &exec)
            {
                return Err(err);
            }
        }
        Ok(spans)
    }

    /// Run `post_redaction` (modern) and `after_redaction` (legacy) in
    /// descending priority order, so the highest-priority plugin sees the
    /// result last.
    pub async fn run_post_redaction(
        &self,
        mut result: RedactionResult,
    ) -> Result<RedactionResult> {
        let mut entries = self.snapshot().await;
        entries.reverse();

        for entry in entries {
            match &entry.hooks {
                HookSet::Modern(hooks) => {
                    let hooks = hooks.clone();
                    let input = result.clone();
                    let mut exec = self
                        .sandbox
                        .execute(
                            &entry.plugin_name,
                            "post_redaction",
                            entry.timeout_ms,
                            async move { hooks.post_redaction(input).await },
                        )
                        .await;
                    if let Some(value) = exec.value.take() {
                        result = value;
                    } else if let Some(err) = self.stage_failure(
                        &entry.plugin_name,
                        "post_redaction",
                        entry.timeout_ms,
                        &exec,
                    ) {
                        return Err(err);
                    }
                }
                HookSet::Legacy(hooks) => {
                    let hooks = hooks.clone();
                    let input = result.clone();
                    let mut exec = self
                        .sandbox
                        .execute(
                            &entry.plugin_name,
                            "after_redaction",
                            entry.timeout_ms,
                            async move { hooks.after_redaction(input).await },
                        )
                        .await;
                    if let Some(value) = exec.value.take() {
                        result = value;
                    } else if let Some(err) = self.stage_failure(
                        &entry.plugin_name,
                        "after_redaction",
                        entry.timeout_ms,
                        &exec,
                    ) {
                        return Err(err);
                    }
                }
            }
        }
        Ok(result)
    }
}
