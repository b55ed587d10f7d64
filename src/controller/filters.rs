//! Watch-event filtering ahead of the controllers
//!
//! The watch stream only carries the latest object, so each filter remembers
//! what it saw last per object to tell creates from updates and to drop events
//! that cannot change the verdict.

use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::ResourceExt;
use kube::runtime::watcher;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::controller::labels::{WorkloadValidationLabel, current_label};
use crate::controller::store::ClusterStore;
use crate::validation::{Enrollment, pod_images};

/// True unless both pods carry the same images with the same multiplicities
pub fn are_images_changed(old: &Pod, new: &Pod) -> bool {
    let mut old_images = pod_images(old);
    let mut new_images = pod_images(new);
    old_images.sort_unstable();
    new_images.sort_unstable();
    old_images != new_images
}

fn resource_changed(old: &Pod, new: &Pod) -> bool {
    match (
        old.metadata.resource_version.as_deref(),
        new.metadata.resource_version.as_deref(),
    ) {
        (Some(old_version), Some(new_version)) => old_version != new_version,
        _ => old != new,
    }
}

/// An update needs validation when the pod changed and either its images differ
/// or it is not already labelled `success`.
pub fn is_pod_update_relevant(old: &Pod, new: &Pod) -> bool {
    resource_changed(old, new)
        && (are_images_changed(old, new)
            || current_label(new) != Some(WorkloadValidationLabel::Success))
}

/// True when a namespace goes from not enrolled to enrolled
pub fn is_enablement_transition(old: &Namespace, new: &Namespace) -> bool {
    !Enrollment::of(old).is_enrolled() && Enrollment::of(new).is_enrolled()
}

fn object_key<K: ResourceExt>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

/// A pod event that may need validation
#[derive(Debug, Clone, PartialEq)]
pub enum PodChange {
    Created(Pod),
    Updated(Pod),
}

/// Last-seen state per object plus relist bookkeeping
struct Seen<V> {
    objects: HashMap<String, V>,
    relisted: Option<HashSet<String>>,
}

impl<V> Default for Seen<V> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            relisted: None,
        }
    }
}

impl<V> Seen<V> {
    fn begin_relist(&mut self) {
        self.relisted = Some(HashSet::new());
    }

    fn relisted(&mut self, key: &str) {
        if let Some(keys) = self.relisted.as_mut() {
            keys.insert(key.to_string());
        }
    }

    /// Forget objects that vanished while the watch was down
    fn finish_relist(&mut self) {
        if let Some(keys) = self.relisted.take() {
            self.objects.retain(|key, _| keys.contains(key));
        }
    }
}

/// Classifies pod watch events into creates and relevant updates
#[derive(Default)]
pub struct PodEventFilter {
    seen: Mutex<Seen<Pod>>,
}

impl PodEventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, event: watcher::Event<Pod>) -> Option<PodChange> {
        let mut seen = self.seen.lock();
        match event {
            watcher::Event::Init => {
                seen.begin_relist();
                None
            }
            watcher::Event::InitDone => {
                seen.finish_relist();
                None
            }
            watcher::Event::Delete(pod) => {
                seen.objects.remove(&object_key(&pod));
                None
            }
            watcher::Event::InitApply(pod) | watcher::Event::Apply(pod) => {
                let key = object_key(&pod);
                seen.relisted(&key);
                match seen.objects.insert(key, pod.clone()) {
                    None => Some(PodChange::Created(pod)),
                    Some(old) if is_pod_update_relevant(&old, &pod) => {
                        Some(PodChange::Updated(pod))
                    }
                    Some(_) => None,
                }
            }
        }
    }
}

/// Admits namespace events only on a not-enrolled to enrolled label transition
#[derive(Default)]
pub struct NamespaceEventFilter {
    seen: Mutex<Seen<Namespace>>,
}

impl NamespaceEventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, event: watcher::Event<Namespace>) -> Option<Namespace> {
        let mut seen = self.seen.lock();
        match event {
            watcher::Event::Init => {
                seen.begin_relist();
                None
            }
            watcher::Event::InitDone => {
                seen.finish_relist();
                None
            }
            watcher::Event::Delete(ns) => {
                seen.objects.remove(&object_key(&ns));
                None
            }
            watcher::Event::InitApply(ns) | watcher::Event::Apply(ns) => {
                let key = object_key(&ns);
                seen.relisted(&key);
                match seen.objects.insert(key, ns.clone()) {
                    Some(old) if is_enablement_transition(&old, &ns) => Some(ns),
                    _ => None,
                }
            }
        }
    }
}

/// Let a pod change through to the controller.
///
/// Creates are admitted only if the pod's namespace is enrolled right now,
/// read live rather than from a cache. A failed lookup admits the pod and
/// leaves the decision to the reconciler.
pub async fn admit_pod_change(store: &dyn ClusterStore, change: PodChange) -> Option<Pod> {
    match change {
        PodChange::Updated(pod) => Some(pod),
        PodChange::Created(pod) => {
            let namespace = pod.namespace()?;
            match store.get_namespace(&namespace).await {
                Ok(ns) if Enrollment::of(&ns).is_enrolled() => Some(pod),
                Ok(_) => {
                    debug!(pod = %pod.name_any(), "Namespace not enrolled, ignoring pod");
                    None
                }
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Namespace lookup failed, admitting pod");
                    Some(pod)
                }
            }
        }
    }
}
