//! Work queue delivering reconciliation requests.
//!
//! Guarantees at most one attempt in flight per key. A key added while its
//! attempt runs is reconciled once more afterwards. Requeues are routed by
//! outcome: waiting for the DBaaSProvider API uses its own [`RetryPolicy`],
//! faults use the default one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_futures::Instrument;

use crate::backoff::RetryPolicy;
use crate::config::Config;
use crate::context::AttemptContext;
use crate::error::Result;
use crate::event::ObjectKey;
use crate::reconciler::{Outcome, Reconciler};

/// Something able to run one reconciliation attempt.
#[async_trait::async_trait]
pub trait Reconcile: Send + Sync + 'static {
    /// Reconcile the object identified by `key`.
    async fn reconcile(&self, key: &ObjectKey, ctx: &AttemptContext) -> Result<Outcome>;
}

#[async_trait::async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, key: &ObjectKey, ctx: &AttemptContext) -> Result<Outcome> {
        Reconciler::reconcile(self, key, ctx).await
    }
}

/// Handle for adding keys to a running [`Dispatcher`].
#[derive(Clone, Debug)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl QueueHandle {
    /// A handle and the receiving end it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ObjectKey>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (QueueHandle { tx }, rx)
    }

    /// Request a reconciliation of `key`. Returns false once the dispatcher is gone.
    pub fn add(&self, key: ObjectKey) -> bool {
        self.tx.send(key).is_ok()
    }
}

/// Tunables of a [`Dispatcher`].
#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    /// Maximum number of keys reconciled at the same time
    pub max_concurrent: usize,
    /// Deadline of a single attempt
    pub reconcile_timeout: Duration,
    /// First delay while the DBaaSProvider API is not served
    pub type_retry_min: Duration,
    /// Largest delay while the DBaaSProvider API is not served
    pub type_retry_max: Duration,
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        DispatcherSettings {
            max_concurrent: config.max_concurrent,
            reconcile_timeout: config.reconcile_timeout,
            type_retry_min: config.type_retry_min,
            type_retry_max: config.type_retry_max,
        }
    }
}

// `None` when the attempt's task panicked.
type Finished = BoxFuture<'static, (ObjectKey, Option<Result<Outcome>>)>;

/// Runs reconciliations for queued keys and schedules their retries.
pub struct Dispatcher<R: Reconcile> {
    reconciler: Arc<R>,
    settings: DispatcherSettings,
    queue: QueueHandle,
    rx: mpsc::UnboundedReceiver<ObjectKey>,
    type_policy: RetryPolicy,
    fault_policy: RetryPolicy,
    waiting: VecDeque<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    // At most one pending requeue per key.
    timers: HashMap<ObjectKey, JoinHandle<()>>,
}

impl<R: Reconcile> Dispatcher<R> {
    /// Create a dispatcher and the handle used to feed it.
    pub fn new(reconciler: R, settings: DispatcherSettings) -> (Self, QueueHandle) {
        let (queue, rx) = QueueHandle::channel();
        let type_policy = RetryPolicy::new(settings.type_retry_min, settings.type_retry_max);
        let dispatcher = Dispatcher {
            reconciler: Arc::new(reconciler),
            settings,
            queue: queue.clone(),
            rx,
            type_policy,
            fault_policy: RetryPolicy::faults(),
            waiting: VecDeque::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            timers: HashMap::new(),
        };
        (dispatcher, queue)
    }

    /// Process keys until `shutdown` is cancelled. Cancelling also aborts
    /// attempts in flight.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut running: FuturesUnordered<Finished> = FuturesUnordered::new();
        loop {
            while running.len() < self.settings.max_concurrent.max(1) {
                match self.waiting.pop_front() {
                    Some(key) => running.push(self.start(key, &shutdown)),
                    None => break,
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(key) = self.rx.recv() => self.enqueue(key),
                Some((key, result)) = running.next(), if !running.is_empty() => {
                    self.in_flight.remove(&key);
                    self.route(&key, result, &shutdown);
                    if self.dirty.remove(&key) {
                        self.enqueue(key);
                    }
                }
            }
        }
        info!("Dispatcher stopped");
    }

    fn enqueue(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            debug!(object = %key, "Reconciliation in flight, marking dirty");
            self.dirty.insert(key);
        } else if !self.waiting.contains(&key) {
            self.waiting.push_back(key);
        }
    }

    fn start(&mut self, key: ObjectKey, shutdown: &CancellationToken) -> Finished {
        // This attempt supersedes any requeue still waiting for the key.
        if let Some(timer) = self.timers.remove(&key) {
            timer.abort();
        }
        self.in_flight.insert(key.clone());
        let ctx =
            AttemptContext::with_timeout(shutdown.child_token(), self.settings.reconcile_timeout);
        let reconciler = Arc::clone(&self.reconciler);
        let task_key = key.clone();
        let span = tracing::debug_span!("reconcile_attempt", object = %key);
        let handle = tokio::spawn(
            async move { reconciler.reconcile(&task_key, &ctx).await }.instrument(span),
        );
        async move {
            match handle.await {
                Ok(result) => (key, Some(result)),
                Err(e) => {
                    error!(object = %key, error = %e, "Reconciliation task failed");
                    (key, None)
                }
            }
        }
        .boxed()
    }

    fn route(
        &mut self,
        key: &ObjectKey,
        result: Option<Result<Outcome>>,
        shutdown: &CancellationToken,
    ) {
        let delay = match result {
            Some(Ok(Outcome::Synced(_))) | Some(Ok(Outcome::WorkloadGone)) => {
                self.type_policy.forget(key);
                self.fault_policy.forget(key);
                return;
            }
            Some(Ok(Outcome::TypeUnavailable)) => {
                self.fault_policy.forget(key);
                self.type_policy.when(key)
            }
            Some(Err(_)) | None => self.fault_policy.when(key),
        };
        debug!(object = %key, ?delay, "Requeueing");
        self.schedule(key.clone(), delay, shutdown.clone());
    }

    fn schedule(&mut self, key: ObjectKey, delay: Duration, shutdown: CancellationToken) {
        let queue = self.queue.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    queue.add(timer_key);
                }
            }
        });
        if let Some(previous) = self.timers.insert(key, timer) {
            previous.abort();
        }
    }
}
