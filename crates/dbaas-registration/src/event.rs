//! Turns `kube_runtime::watcher::Event`s into [`LifecycleEvent`]s.

use std::collections::HashMap;
use std::fmt;

use kube::Resource;
use kube_runtime::watcher::Event;

use crate::admission::LifecycleEvent;

/// Identity of a namespaced object.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ObjectKey {
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    /// Build a key from parts.
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        ObjectKey {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Build the key of `object`, or `None` if it has no name.
    pub fn of<K: Resource>(object: &K) -> Option<Self> {
        let meta = object.meta();
        Some(ObjectKey {
            namespace: meta.namespace.clone(),
            name: meta.name.clone()?,
        })
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object namespace, if namespaced.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Summary of a watcher event for log output.
#[derive(Debug)]
pub enum PrettyEvent {
    /// A single object was applied.
    Applied {
        /// Name of the object.
        name: Option<String>,
        /// Namespace of the object if applicable.
        namespace: Option<String>,
    },
    /// A single object was deleted.
    Deleted {
        /// Name of the object.
        name: Option<String>,
        /// Namespace of the object if applicable.
        namespace: Option<String>,
    },
    /// Full refresh of all objects.
    Restarted {
        /// Number of objects in refresh.
        count: usize,
    },
}

impl<K: Resource> From<&Event<K>> for PrettyEvent {
    fn from(event: &Event<K>) -> Self {
        match event {
            Event::Applied(object) => PrettyEvent::Applied {
                name: object.meta().name.clone(),
                namespace: object.meta().namespace.clone(),
            },
            Event::Deleted(object) => PrettyEvent::Deleted {
                name: object.meta().name.clone(),
                namespace: object.meta().namespace.clone(),
            },
            Event::Restarted(objects) => PrettyEvent::Restarted {
                count: objects.len(),
            },
        }
    }
}

/// Remembers the last state of every object seen so that watch events can be
/// classified as creations, updates, deletions or resyncs.
///
/// The initial listing of a watch produces a creation for every object, the
/// same as a freshly started informer.
#[derive(Debug)]
pub struct LifecycleTracker<K> {
    known: HashMap<ObjectKey, K>,
}

impl<K> Default for LifecycleTracker<K> {
    fn default() -> Self {
        LifecycleTracker {
            known: HashMap::new(),
        }
    }
}

impl<K: Resource + Clone> LifecycleTracker<K> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one watcher event. Objects without a name are dropped.
    pub fn observe(&mut self, event: Event<K>) -> Vec<LifecycleEvent<K>> {
        match event {
            Event::Applied(object) => match ObjectKey::of(&object) {
                Some(key) => match self.known.insert(key, object.clone()) {
                    None => vec![LifecycleEvent::Create(object)],
                    Some(_) => vec![LifecycleEvent::Update(object)],
                },
                None => vec![],
            },
            Event::Deleted(object) => match ObjectKey::of(&object) {
                Some(key) => {
                    self.known.remove(&key);
                    vec![LifecycleEvent::Delete(object)]
                }
                None => vec![],
            },
            Event::Restarted(objects) => {
                let mut events = Vec::with_capacity(objects.len());
                let mut present = HashMap::with_capacity(objects.len());
                for object in objects {
                    let key = match ObjectKey::of(&object) {
                        Some(key) => key,
                        None => continue,
                    };
                    if self.known.contains_key(&key) {
                        events.push(LifecycleEvent::Generic(object.clone()));
                    } else {
                        events.push(LifecycleEvent::Create(object.clone()));
                    }
                    present.insert(key, object);
                }
                // Objects that disappeared while the watch was down are
                // reported with their last known state.
                let previous = std::mem::replace(&mut self.known, present);
                let mut vanished: Vec<_> = previous
                    .into_iter()
                    .filter(|(key, _)| !self.known.contains_key(key))
                    .collect();
                vanished.sort_by_key(|(key, _)| key.to_string());
                events.extend(vanished.into_iter().map(|(_, o)| LifecycleEvent::Delete(o)));
                events
            }
        }
    }

    /// Number of objects currently known.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether no objects are known.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::deployment;
    use k8s_openapi::api::apps::v1::Deployment;

    fn kinds(events: &[LifecycleEvent<Deployment>]) -> Vec<(&'static str, String)> {
        events
            .iter()
            .map(|e| {
                (
                    e.kind(),
                    e.object().metadata.name.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn first_apply_is_a_creation_then_updates() {
        let mut tracker = LifecycleTracker::new();
        let d = deployment("ns", "a", &[]);

        let events = tracker.observe(Event::Applied(d.clone()));
        assert_eq!(kinds(&events), vec![("create", "a".to_string())]);

        let events = tracker.observe(Event::Applied(d));
        assert_eq!(kinds(&events), vec![("update", "a".to_string())]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn deletion_forgets_the_object() {
        let mut tracker = LifecycleTracker::new();
        let d = deployment("ns", "a", &[]);
        tracker.observe(Event::Applied(d.clone()));

        let events = tracker.observe(Event::Deleted(d.clone()));
        assert_eq!(kinds(&events), vec![("delete", "a".to_string())]);
        assert!(tracker.is_empty());

        let events = tracker.observe(Event::Applied(d));
        assert_eq!(kinds(&events), vec![("create", "a".to_string())]);
    }

    #[test]
    fn restart_classifies_against_known_objects() {
        let mut tracker = LifecycleTracker::new();
        tracker.observe(Event::Applied(deployment("ns", "kept", &[])));
        tracker.observe(Event::Applied(deployment("ns", "gone", &[])));

        let events = tracker.observe(Event::Restarted(vec![
            deployment("ns", "kept", &[]),
            deployment("ns", "new", &[]),
        ]));
        assert_eq!(
            kinds(&events),
            vec![
                ("generic", "kept".to_string()),
                ("create", "new".to_string()),
                ("delete", "gone".to_string()),
            ]
        );
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn initial_listing_creates_everything() {
        let mut tracker = LifecycleTracker::new();
        let events = tracker.observe(Event::Restarted(vec![
            deployment("ns", "a", &[]),
            deployment("ns", "b", &[]),
        ]));
        assert_eq!(
            kinds(&events),
            vec![("create", "a".to_string()), ("create", "b".to_string())]
        );
    }

    #[test]
    fn nameless_objects_are_dropped() {
        let mut tracker = LifecycleTracker::new();
        let mut d = deployment("ns", "a", &[]);
        d.metadata.name = None;
        assert!(tracker.observe(Event::Applied(d)).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn key_display() {
        assert_eq!(ObjectKey::new(Some("ns"), "a").to_string(), "ns/a");
        assert_eq!(ObjectKey::new(None, "a").to_string(), "a");
    }
}
