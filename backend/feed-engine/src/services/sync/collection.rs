use crate::domain::Record;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

/// Result of overlaying a partial row onto a held record
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome<T> {
    Merged(T),
    /// No record with that id is held
    Missing,
    /// The merged row no longer decodes
    Malformed(String),
}

/// Locally held, id-addressable list of records shared by the engine
/// components and observed by the UI
pub struct Collection<T: Record> {
    inner: Arc<CollectionInner<T>>,
}

struct CollectionInner<T> {
    items: Mutex<Vec<T>>,
    snapshot: watch::Sender<Vec<T>>,
}

impl<T: Record> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Record> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay `patch`'s fields onto `item`; fields absent from the patch are kept
pub fn overlay<T: Record>(item: &T, patch: &Value) -> Result<T, serde_json::Error> {
    let mut base = serde_json::to_value(item)?;
    if let (Value::Object(base), Value::Object(patch)) = (&mut base, patch) {
        for (key, value) in patch {
            base.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(base)
}

/// Keep the first occurrence of every id
pub(crate) fn dedupe<T: Record>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.id())).collect()
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    pub fn from_items(items: Vec<T>) -> Self {
        let items = dedupe(items);
        let (snapshot, _) = watch::channel(items.clone());
        Self {
            inner: Arc::new(CollectionInner {
                items: Mutex::new(items),
                snapshot,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.inner.snapshot.subscribe()
    }

    pub fn items(&self) -> Vec<T> {
        self.inner.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        self.inner
            .items
            .lock()
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.inner.items.lock().iter().position(|item| item.id() == id)
    }

    pub fn id_at(&self, index: usize) -> Option<Uuid> {
        self.inner.items.lock().get(index).map(Record::id)
    }

    /// Apply `f` under the lock; publish when it reports a change
    pub fn mutate(&self, f: impl FnOnce(&mut Vec<T>) -> bool) -> bool {
        let mut items = self.inner.items.lock();
        let changed = f(&mut *items);
        if changed {
            self.inner.snapshot.send_replace(items.clone());
        }
        changed
    }

    /// Like [`mutate`](Self::mutate), but only while `open` is set.
    ///
    /// The flag is read under the collection lock, so once [`fence`](Self::fence)
    /// has cleared it no further change can land.
    pub fn mutate_if(&self, open: &AtomicBool, f: impl FnOnce(&mut Vec<T>) -> bool) -> bool {
        let mut items = self.inner.items.lock();
        if !open.load(Ordering::SeqCst) {
            return false;
        }
        let changed = f(&mut *items);
        if changed {
            self.inner.snapshot.send_replace(items.clone());
        }
        changed
    }

    /// Clear `open` under the collection lock
    pub fn fence(&self, open: &AtomicBool) {
        let _items = self.inner.items.lock();
        open.store(false, Ordering::SeqCst);
    }

    /// Replace the contents, dropping duplicate ids
    pub fn replace(&self, items: Vec<T>) {
        let items = dedupe(items);
        self.mutate(move |current| {
            *current = items;
            true
        });
    }

    /// Append unless a record with the same id is already held
    pub fn push(&self, item: T) -> bool {
        self.mutate(|items| {
            if items.iter().any(|existing| existing.id() == item.id()) {
                false
            } else {
                items.push(item);
                true
            }
        })
    }

    pub fn remove(&self, id: Uuid) -> Option<T> {
        let mut removed = None;
        self.mutate(|items| match items.iter().position(|item| item.id() == id) {
            Some(index) => {
                removed = Some(items.remove(index));
                true
            }
            None => false,
        });
        removed
    }

    pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        self.mutate(|items| {
            items.sort_by(compare);
            true
        });
    }

    /// Overlay a partial row onto the record with the same id
    pub fn merge_fields(&self, id: Uuid, patch: &Value) -> MergeOutcome<T> {
        let mut outcome = MergeOutcome::Missing;
        self.mutate(|items| merge_into(items, id, patch, &mut outcome));
        outcome
    }
}

/// Merge step shared by guarded and unguarded callers
pub(crate) fn merge_into<T: Record>(
    items: &mut [T],
    id: Uuid,
    patch: &Value,
    outcome: &mut MergeOutcome<T>,
) -> bool {
    let Some(item) = items.iter_mut().find(|item| item.id() == id) else {
        *outcome = MergeOutcome::Missing;
        return false;
    };
    match overlay(item, patch) {
        Ok(merged) => {
            *item = merged.clone();
            *outcome = MergeOutcome::Merged(merged);
            true
        }
        Err(e) => {
            warn!(id = %id, error = %e, "Merged row failed to decode, keeping local record");
            *outcome = MergeOutcome::Malformed(e.to_string());
            false
        }
    }
}
