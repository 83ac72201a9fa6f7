//! OTP-style supervisor
//!
//! Starts children in declared order, observes their exits, and applies a
//! restart strategy on failure. Restart eligibility follows the child's
//! declared type; a sliding-window restart budget escalates instead of
//! restarting when exceeded. Stopping a child races its graceful-shutdown
//! signal against the declared grace period, then aborts.

use crate::config::{RestartStrategy, SupervisorConfig};
use crate::error::Result;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::AbortHandle;

/// Restart eligibility declared per child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartType {
    /// Always restarted.
    Permanent,

    /// Never restarted.
    Temporary,

    /// Restarted only on abnormal exit.
    Transient,
}

/// Factory producing one run of a child task.
///
/// The child receives a shutdown watch; flipping to `true` asks it to wind
/// down gracefully. Returning `Ok(())` is a normal exit, `Err` is abnormal.
pub type ChildStart =
    Arc<dyn Fn(watch::Receiver<bool>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Declaration of one supervised child.
#[derive(Clone)]
pub struct ChildSpec {
    pub id: String,
    pub restart: RestartType,
    pub shutdown: Duration,
    start: ChildStart,
}

impl ChildSpec {
    /// Declare a child with permanent restart and a 5s shutdown grace.
    pub fn new<F>(id: impl Into<String>, start: F) -> Self
    where
        F: Fn(watch::Receiver<bool>) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            restart: RestartType::Permanent,
            shutdown: Duration::from_secs(5),
            start: Arc::new(start),
        }
    }

    /// Set the restart type.
    pub fn restart(mut self, restart: RestartType) -> Self {
        self.restart = restart;
        self
    }

    /// Set the graceful-shutdown grace period.
    pub fn shutdown(mut self, grace: Duration) -> Self {
        self.shutdown = grace;
        self
    }
}

impl std::fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("restart", &self.restart)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

/// Lifecycle notification emitted to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    ChildStarted { id: String },
    ChildExited { id: String, abnormal: bool },
    ChildRestarted { id: String },
    RestartBudgetExceeded { id: String },
}

struct RunningChild {
    index: usize,
    shutdown_tx: watch::Sender<bool>,
    abort: AbortHandle,
    done: Arc<Notify>,
}

/// Supervises a fixed set of declared children.
pub struct Supervisor {
    config: SupervisorConfig,
    specs: Vec<ChildSpec>,
    children: Mutex<HashMap<String, RunningChild>>,
    /// Children being stopped deliberately; their exits skip restart logic.
    stopping: Mutex<HashSet<String>>,
    /// Sliding restart-history ring of (time, child id).
    restart_history: Mutex<VecDeque<(Instant, String)>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SupervisorEvent>>>,
}

impl Supervisor {
    /// Create a supervisor over declared children. Nothing runs until
    /// `start` is called.
    pub fn new(config: SupervisorConfig, specs: Vec<ChildSpec>) -> Arc<Self> {
        Arc::new(Self {
            config,
            specs,
            children: Mutex::new(HashMap::new()),
            stopping: Mutex::new(HashSet::new()),
            restart_history: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to lifecycle events.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SupervisorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    async fn emit(&self, event: SupervisorEvent) {
        self.subscribers
            .lock()
            .await
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Start all children in declared order.
    pub async fn start(self: &Arc<Self>) {
        for index in 0..self.specs.len() {
            self.start_child(index).await;
        }
    }

    /// Stop all children in reverse start order.
    pub async fn stop(self: &Arc<Self>) {
        let mut running: Vec<(usize, String)> = {
            let children = self.children.lock().await;
            children.iter().map(|(id, c)| (c.index, id.clone())).collect()
        };
        running.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, id) in running {
            self.stop_child(&id).await;
        }
    }

    /// True while the child has a running task.
    pub async fn is_running(&self, id: &str) -> bool {
        self.children.lock().await.contains_key(id)
    }

    // Returns a boxed future rather than an `async fn` so the recursive call
    // path (watcher -> handle_exit -> restart_children -> start_child) is
    // type-erased, breaking the Send auto-trait inference cycle introduced by
    // the watcher's `tokio::spawn`.
    fn start_child<'a>(self: &'a Arc<Self>, index: usize) -> BoxFuture<'a, ()> {
        Box::pin(async move {
        let spec = match self.specs.get(index) {
            Some(s) => s.clone(),
            None => return,
        };
        let id = spec.id.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let done = Arc::new(Notify::new());
        let fut = (spec.start)(shutdown_rx);
        let handle = tokio::spawn(fut);
        let abort = handle.abort_handle();

        self.children.lock().await.insert(
            id.clone(),
            RunningChild {
                index,
                shutdown_tx,
                abort,
                done: done.clone(),
            },
        );

        tracing::info!(child = %id, "child started");
        self.emit(SupervisorEvent::ChildStarted { id: id.clone() }).await;

        // Watcher: observes the exit and applies the restart strategy.
        let sup = self.clone();
        tokio::spawn(async move {
            let outcome = handle.await;
            done.notify_one();

            let deliberate = sup.stopping.lock().await.remove(&id);
            if deliberate {
                return;
            }
            sup.children.lock().await.remove(&id);

            let abnormal = match outcome {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    tracing::warn!(child = %id, error = %e, "child failed");
                    true
                }
                Err(join_err) => {
                    tracing::warn!(child = %id, error = %join_err, "child panicked or was aborted");
                    true
                }
            };

            sup.handle_exit(index, abnormal).await;
        });
        })
    }

    /// Stop a child: signal graceful shutdown, race the grace period, then
    /// force-abort.
    async fn stop_child(self: &Arc<Self>, id: &str) {
        // Mark first so a concurrent exit is treated as deliberate.
        self.stopping.lock().await.insert(id.to_string());
        let child = match self.children.lock().await.remove(id) {
            Some(c) => c,
            None => {
                self.stopping.lock().await.remove(id);
                return;
            }
        };

        let grace = self
            .specs
            .get(child.index)
            .map(|s| s.shutdown)
            .unwrap_or(Duration::from_millis(self.config.shutdown_grace_ms));

        let _ = child.shutdown_tx.send(true);
        if tokio::time::timeout(grace, child.done.notified()).await.is_err() {
            tracing::warn!(child = %id, "shutdown grace exceeded, forcing stop");
            child.abort.abort();
            child.done.notified().await;
        }
        tracing::info!(child = %id, "child stopped");
    }

    async fn handle_exit(self: &Arc<Self>, index: usize, abnormal: bool) {
        let spec = match self.specs.get(index) {
            Some(s) => s.clone(),
            None => return,
        };
        let id = spec.id.clone();

        self.emit(SupervisorEvent::ChildExited {
            id: id.clone(),
            abnormal,
        })
        .await;

        let should_restart = match spec.restart {
            RestartType::Permanent => true,
            RestartType::Temporary => false,
            RestartType::Transient => abnormal,
        };
        if !should_restart {
            return;
        }

        if !self.consume_restart_budget(&id).await {
            tracing::error!(child = %id, "restart budget exceeded, child abandoned");
            self.emit(SupervisorEvent::RestartBudgetExceeded { id }).await;
            return;
        }

        match self.config.strategy {
            RestartStrategy::OneForOne => {
                self.restart_children(&[index]).await;
            }
            RestartStrategy::OneForAll => {
                self.stop_siblings(|_| true).await;
                let all: Vec<usize> = (0..self.specs.len()).collect();
                self.restart_children(&all).await;
            }
            RestartStrategy::RestForOne => {
                self.stop_siblings(|i| i > index).await;
                let suffix: Vec<usize> = (index..self.specs.len()).collect();
                self.restart_children(&suffix).await;
            }
        }
    }

    /// Stop currently running children selected by start index, in reverse
    /// start order.
    async fn stop_siblings(self: &Arc<Self>, select: impl Fn(usize) -> bool) {
        let mut targets: Vec<(usize, String)> = {
            let children = self.children.lock().await;
            children
                .iter()
                .filter(|(_, c)| select(c.index))
                .map(|(id, c)| (c.index, id.clone()))
                .collect()
        };
        targets.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, id) in targets {
            self.stop_child(&id).await;
        }
    }

    /// Restart the given spec indexes in declared order, skipping temporary
    /// children and any child already running.
    async fn restart_children(self: &Arc<Self>, indexes: &[usize]) {
        for &index in indexes {
            let Some(spec) = self.specs.get(index) else {
                continue;
            };
            if spec.restart == RestartType::Temporary {
                continue;
            }
            if self.is_running(&spec.id).await {
                continue;
            }
            let id = spec.id.clone();
            self.start_child(index).await;
            self.emit(SupervisorEvent::ChildRestarted { id }).await;
        }
    }

    /// Record a restart attempt; false when the sliding-window budget is
    /// exhausted.
    async fn consume_restart_budget(&self, id: &str) -> bool {
        let mut history = self.restart_history.lock().await;
        let window = Duration::from_secs(self.config.max_seconds);
        let now = Instant::now();

        while let Some((t, _)) = history.front() {
            if now.duration_since(*t) > window {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() >= self.config.max_restarts as usize {
            return false;
        }

        history.push_back((now, id.to_string()));
        true
    }
}
