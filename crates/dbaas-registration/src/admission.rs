//! Decides which workload lifecycle events are worth a reconciliation.

use kube::Resource;

use crate::config::Config;
use crate::owner::{OLM_OWNER_KIND, OLM_OWNER_KIND_LABEL, OLM_OWNER_LABEL};

/// A lifecycle event for an object of the watched type.
#[derive(Clone, Debug)]
pub enum LifecycleEvent<K> {
    /// The object was observed for the first time.
    Create(K),
    /// An already known object changed.
    Update(K),
    /// The object was removed.
    Delete(K),
    /// An already known object was re-delivered by a resync.
    Generic(K),
}

impl<K> LifecycleEvent<K> {
    /// The object carried by the event.
    pub fn object(&self) -> &K {
        match self {
            LifecycleEvent::Create(o)
            | LifecycleEvent::Update(o)
            | LifecycleEvent::Delete(o)
            | LifecycleEvent::Generic(o) => o,
        }
    }

    /// Short name of the event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Create(_) => "create",
            LifecycleEvent::Update(_) => "update",
            LifecycleEvent::Delete(_) => "delete",
            LifecycleEvent::Generic(_) => "generic",
        }
    }
}

/// Admits only the creation of the operator's own Deployment.
///
/// The operator's Deployment lives in the install namespace and is labeled by
/// OLM as owned by the running package version, so exactly one event passes
/// per operator start.
#[derive(Clone, Debug)]
pub struct EventAdmissionFilter {
    install_namespace: String,
    operator_name: String,
}

impl EventAdmissionFilter {
    /// Create a filter for the given identity.
    pub fn new(install_namespace: &str, operator_name: &str) -> Self {
        EventAdmissionFilter {
            install_namespace: install_namespace.to_string(),
            operator_name: operator_name.to_string(),
        }
    }

    /// Create a filter for the identity in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.install_namespace, &config.operator_name)
    }

    /// Whether `event` should be reconciled.
    pub fn admits<K: Resource>(&self, event: &LifecycleEvent<K>) -> bool {
        match event {
            LifecycleEvent::Create(object) => self.is_own_workload(object),
            LifecycleEvent::Update(_) | LifecycleEvent::Delete(_) | LifecycleEvent::Generic(_) => {
                false
            }
        }
    }

    /// Whether `object` is the running operator's own workload.
    pub fn is_own_workload<K: Resource>(&self, object: &K) -> bool {
        let meta = object.meta();
        if meta.namespace.as_deref() != Some(self.install_namespace.as_str()) {
            return false;
        }
        let labels = match &meta.labels {
            Some(labels) => labels,
            None => return false,
        };
        labels.get(OLM_OWNER_KIND_LABEL).map(String::as_str) == Some(OLM_OWNER_KIND)
            && labels.get(OLM_OWNER_LABEL).map(String::as_str) == Some(self.operator_name.as_str())
    }
}
