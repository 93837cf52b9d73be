// 2.0: insertion-ordered trade-id sequence. Appends are O(1), removal by
// value is O(n), indexed reads are O(1). Readers may run concurrently;
// writers take the sequence exclusively.

use std::sync::RwLock;

/// All ids, used as the count argument of [`IdSequence::ascending`] /
/// [`IdSequence::descending`].
pub const ALL: i64 = -1;

/// Index of the most recently appended id, for [`IdSequence::get`].
pub const LAST: i64 = -1;

#[derive(Debug, Default)]
pub struct IdSequence {
    ids: RwLock<Vec<String>>,
}

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, id: impl Into<String>) {
        self.ids.write().expect("id sequence poisoned").push(id.into());
    }

    /// Removes the first occurrence of `id`. Returns false when the id was
    /// not present.
    pub fn remove(&self, id: &str) -> bool {
        let mut ids = self.ids.write().expect("id sequence poisoned");
        match ids.iter().position(|existing| existing == id) {
            Some(index) => {
                ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// Indexed read in insertion order. `-1` addresses the last id; anything
    /// else out of range yields `None`.
    pub fn get(&self, index: i64) -> Option<String> {
        let ids = self.ids.read().expect("id sequence poisoned");
        let index = if index == LAST {
            ids.len().checked_sub(1)?
        } else if index < 0 || index as usize >= ids.len() {
            return None;
        } else {
            index as usize
        };

        Some(ids[index].clone())
    }

    pub fn len(&self) -> usize {
        self.ids.read().expect("id sequence poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the first `count` ids in insertion order (`-1` = all).
    /// The snapshot is taken under the read lock; iteration happens on the
    /// caller's copy so concurrent removals never block it.
    pub fn ascending(&self, count: i64) -> Vec<String> {
        let ids = self.ids.read().expect("id sequence poisoned");
        let take = bounded(count, ids.len());
        ids.iter().take(take).cloned().collect()
    }

    /// Snapshot of the last `count` ids, most recent first (`-1` = all).
    pub fn descending(&self, count: i64) -> Vec<String> {
        let ids = self.ids.read().expect("id sequence poisoned");
        let take = bounded(count, ids.len());
        ids.iter().rev().take(take).cloned().collect()
    }
}

fn bounded(count: i64, len: usize) -> usize {
    if count == ALL {
        len
    } else {
        (count.max(0) as usize).min(len)
    }
}
