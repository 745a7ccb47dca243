//! Watches the operator's Deployment and feeds admitted events to the queue.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::{pin_mut, Stream, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams};
use kube::Client;
use kube_runtime::watcher::{watcher, Event};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::{EventAdmissionFilter, LifecycleEvent};
use crate::backoff::ExponentialBackoffStrategy;
use crate::config::Config;
use crate::event::{LifecycleTracker, ObjectKey, PrettyEvent};
use crate::owner::owner_label_selector;
use crate::queue::{Dispatcher, DispatcherSettings, QueueHandle};
use crate::reconciler::Reconciler;

const WATCH_BACKOFF_BASE: Duration = Duration::from_secs(1);
const WATCH_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Runs the registration control loop.
pub struct Controller {
    client: Client,
    config: Arc<Config>,
}

impl Controller {
    /// Create a controller talking to the cluster through `client`.
    pub fn new(client: Client, config: Config) -> Self {
        Controller {
            client,
            config: Arc::new(config),
        }
    }

    /// Watch and reconcile until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            namespace = %self.config.install_namespace,
            operator = %self.config.operator_name,
            "Starting registration controller"
        );
        let reconciler = Reconciler::new(self.client.clone(), Arc::clone(&self.config));
        let (dispatcher, queue) =
            Dispatcher::new(reconciler, DispatcherSettings::from(self.config.as_ref()));

        let api: Api<Deployment> =
            Api::namespaced(self.client.clone(), &self.config.install_namespace);
        let params =
            ListParams::default().labels(&owner_label_selector(&self.config.operator_name));
        let events = watcher(api, params);
        let filter = EventAdmissionFilter::from_config(&self.config);

        tokio::join!(
            dispatcher.run(shutdown.clone()),
            watch_loop(events, filter, queue, shutdown.clone()),
        );
        info!("Registration controller stopped");
    }
}

/// Classifies `events`, enqueuing every admitted one, until the stream ends
/// or `shutdown` is cancelled.
pub async fn watch_loop<S, E>(
    events: S,
    filter: EventAdmissionFilter,
    queue: QueueHandle,
    shutdown: CancellationToken,
) where
    S: Stream<Item = Result<Event<Deployment>, E>>,
    E: Debug,
{
    pin_mut!(events);
    let mut tracker = LifecycleTracker::new();
    let mut backoff = ExponentialBackoffStrategy::new(WATCH_BACKOFF_BASE, WATCH_BACKOFF_CAP);
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = events.try_next() => next,
        };
        match next {
            Ok(Some(event)) => {
                backoff.reset();
                debug!(event = ?PrettyEvent::from(&event), "Handling event.");
                for lifecycle in tracker.observe(event) {
                    if !admit(&filter, &queue, &lifecycle) {
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(error) => {
                warn!(?error, "Error streaming object events.");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff.next_duration()) => {}
                }
            }
        }
    }
    debug!("Watch loop exited");
}

/// Enqueues `event` if the filter admits it. Returns false when the queue is gone.
fn admit(
    filter: &EventAdmissionFilter,
    queue: &QueueHandle,
    event: &LifecycleEvent<Deployment>,
) -> bool {
    if !filter.admits(event) {
        return true;
    }
    let key = match ObjectKey::of(event.object()) {
        Some(key) => key,
        None => return true,
    };
    info!(object = %key, event = event.kind(), "Operator workload observed");
    if !queue.add(key) {
        warn!("Work queue closed, stopping watch");
        return false;
    }
    true
}
