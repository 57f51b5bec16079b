//! The sorted chore queue.
//!
//! Kept as a vector in ascending chore order. Insertion binary-searches for
//! the end of the run of equal-ordered chores, so equal chores stay FIFO, and
//! scans that run for a coalescible entry with the same identity key before
//! inserting a duplicate.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::chore::Chore;
use crate::order::{compare_chores, OrderingCx};

#[derive(Default)]
pub(crate) struct ChoreQueue {
    chores: RefCell<Vec<Rc<Chore>>>,
}

impl ChoreQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chore in sorted position, or merge it into an existing entry
    /// with the same ordering key and coalesce identity. Returns the entry
    /// that ended up representing the work.
    pub fn insert(&self, chore: Rc<Chore>, cx: &OrderingCx<'_>) -> Rc<Chore> {
        let mut chores = self.chores.borrow_mut();

        let hi = chores.partition_point(|queued| {
            compare_chores(queued, &chore, cx) != Ordering::Greater
        });

        if let Some(key) = chore.coalesce_key() {
            let lo = chores[..hi].partition_point(|queued| {
                compare_chores(queued, &chore, cx) == Ordering::Less
            });
            for queued in &chores[lo..hi] {
                if queued.coalesce_key().as_ref() == Some(&key) {
                    queued.merge_from(&chore);
                    tracing::trace!(kind = queued.kind().name(), "coalesced chore");
                    return queued.clone();
                }
            }
        }

        tracing::trace!(kind = chore.kind().name(), owner = ?chore.owner(), "queued chore");
        chores.insert(hi, chore.clone());
        chore
    }

    pub fn pop(&self) -> Option<Rc<Chore>> {
        let mut chores = self.chores.borrow_mut();
        if chores.is_empty() {
            None
        } else {
            Some(chores.remove(0))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chores.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.chores.borrow().len()
    }
}
