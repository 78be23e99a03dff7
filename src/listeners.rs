//! Label listeners.
//!
//! `ListenerRegistry` maps a label to a callback. The registry is a cloneable
//! handle around one mutex-guarded map: the controller keeps one handle, the
//! detection loop another, and every read or write goes through the lock.
//! Callbacks are invoked after the lock is released, so a callback may itself
//! add or remove listeners.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::detect::DetectionSet;
use crate::error::{DetectError, Result};

/// Zero-argument action bound to a label.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<HashMap<String, Callback>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Callback>> {
        // A panicking callback never holds this lock, so a poisoned map is
        // still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `callback` to `label`, replacing any existing binding.
    pub fn add_listener<F>(&self, label: impl Into<String>, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let label = label.into();
        let replaced = self.lock().insert(label.clone(), Arc::new(callback)).is_some();
        if replaced {
            log::debug!("ListenerRegistry: replaced listener for '{}'", label);
        } else {
            log::debug!("ListenerRegistry: added listener for '{}'", label);
        }
    }

    /// Remove the listener for `label`.
    ///
    /// Fails with `NotFound` when no listener is bound; other bindings are
    /// left untouched either way.
    pub fn remove_listener(&self, label: &str) -> Result<()> {
        match self.lock().remove(label) {
            Some(_) => {
                log::debug!("ListenerRegistry: removed listener for '{}'", label);
                Ok(())
            }
            None => Err(DetectError::NotFound(label.to_string())),
        }
    }

    pub fn remove_all_listeners(&self) {
        let mut map = self.lock();
        let removed = map.len();
        map.clear();
        log::debug!("ListenerRegistry: removed all {} listeners", removed);
    }

    pub fn contains(&self, label: &str) -> bool {
        self.lock().contains_key(label)
    }

    /// Registered labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.lock().keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Callbacks for the labels in `detections`, in first-appearance order,
    /// one per distinct label. Taken from a single consistent view of the map.
    pub fn matching(&self, detections: &DetectionSet) -> Vec<(String, Callback)> {
        let map = self.lock();
        detections
            .distinct_labels()
            .into_iter()
            .filter_map(|label| {
                map.get(label)
                    .map(|callback| (label.to_string(), callback.clone()))
            })
            .collect()
    }

    /// Invoke each matching callback exactly once. Returns the number invoked.
    ///
    /// A panicking callback is logged and does not stop the remaining ones.
    pub fn dispatch(&self, detections: &DetectionSet) -> usize {
        let matched = self.matching(detections);
        for (label, callback) in &matched {
            log::debug!("ListenerRegistry: notifying '{}'", label);
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                log::error!("ListenerRegistry: listener for '{}' panicked", label);
            }
        }
        matched.len()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("labels", &self.labels())
            .finish()
    }
}
