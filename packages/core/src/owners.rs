//! Owner scopes and their position in the rendered tree.
//!
//! Every piece of deferred work belongs to the component instance or tree node
//! that created it. Chores are executed parent-before-child, so the registry
//! keeps the tree path assigned to each owner at creation and compares owners
//! by document order. Comparing two paths is O(depth), matching the host
//! tree's document-order primitive that this registry stands in for.

use std::cell::RefCell;
use std::cmp::Ordering;

use slab::Slab;

use crate::executors::TaskDescriptor;

/// The unique identifier of an owner scope.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct OwnerId(pub(crate) usize);

pub(crate) struct OwnerScope {
    /// Child indices from the root down to this scope. A parent's path is a
    /// strict prefix of every descendant's path.
    path: Box<[u32]>,
    alive: bool,
    next_child: u32,
    cleanups: Vec<TaskDescriptor>,
    cells: Vec<crate::reactive::CellId>,
    nodes: Vec<crate::reactive::NodeId>,
}

/// Everything that must be released when a scope is torn down.
pub(crate) struct OwnerTeardown {
    pub cleanups: Vec<TaskDescriptor>,
    pub cells: Vec<crate::reactive::CellId>,
    pub nodes: Vec<crate::reactive::NodeId>,
}

#[derive(Default)]
pub(crate) struct OwnerRegistry {
    scopes: RefCell<Slab<OwnerScope>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new owner scope under `parent`, or a new root when `parent`
    /// is `None`.
    pub fn create(&self, parent: Option<OwnerId>) -> OwnerId {
        let mut scopes = self.scopes.borrow_mut();
        let path = match parent {
            Some(parent) => {
                let parent = &mut scopes[parent.0];
                let slot = parent.next_child;
                parent.next_child += 1;
                let mut path = parent.path.to_vec();
                path.push(slot);
                path.into_boxed_slice()
            }
            None => Box::default(),
        };
        let id = scopes.insert(OwnerScope {
            path,
            alive: true,
            next_child: 0,
            cleanups: Vec::new(),
            cells: Vec::new(),
            nodes: Vec::new(),
        });
        OwnerId(id)
    }

    pub fn is_alive(&self, id: OwnerId) -> bool {
        self.scopes
            .borrow()
            .get(id.0)
            .map(|scope| scope.alive)
            .unwrap_or(false)
    }

    /// Compare two owners by document order. Ancestors order before their
    /// descendants because a parent's path is a prefix of its children's.
    pub fn document_order(&self, a: OwnerId, b: OwnerId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let scopes = self.scopes.borrow();
        match (scopes.get(a.0), scopes.get(b.0)) {
            (Some(left), Some(right)) => left.path.cmp(&right.path).then(a.0.cmp(&b.0)),
            // Unknown owners sort by raw id so the order stays total.
            _ => a.0.cmp(&b.0),
        }
    }

    pub fn record_cleanup(&self, id: OwnerId, descriptor: TaskDescriptor) {
        if let Some(scope) = self.scopes.borrow_mut().get_mut(id.0) {
            scope.cleanups.push(descriptor);
        }
    }

    pub fn record_cell(&self, id: OwnerId, cell: crate::reactive::CellId) {
        if let Some(scope) = self.scopes.borrow_mut().get_mut(id.0) {
            scope.cells.push(cell);
        }
    }

    pub fn record_node(&self, id: OwnerId, node: crate::reactive::NodeId) {
        if let Some(scope) = self.scopes.borrow_mut().get_mut(id.0) {
            scope.nodes.push(node);
        }
    }

    /// Mark a scope dead and take everything it owned. The slot is kept so
    /// late chores can still distinguish "torn down" from "never existed".
    pub fn mark_dead(&self, id: OwnerId) -> Option<OwnerTeardown> {
        let mut scopes = self.scopes.borrow_mut();
        let scope = scopes.get_mut(id.0)?;
        if !scope.alive {
            return None;
        }
        scope.alive = false;
        Some(OwnerTeardown {
            cleanups: std::mem::take(&mut scope.cleanups),
            cells: std::mem::take(&mut scope.cells),
            nodes: std::mem::take(&mut scope.nodes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_order_before_children() {
        let registry = OwnerRegistry::new();
        let root = registry.create(None);
        let child = registry.create(Some(root));
        let grandchild = registry.create(Some(child));
        let sibling = registry.create(Some(root));

        assert_eq!(registry.document_order(root, child), Ordering::Less);
        assert_eq!(registry.document_order(child, grandchild), Ordering::Less);
        assert_eq!(registry.document_order(root, grandchild), Ordering::Less);
        assert_eq!(registry.document_order(grandchild, sibling), Ordering::Less);
        assert_eq!(registry.document_order(child, child), Ordering::Equal);
        assert_eq!(registry.document_order(sibling, child), Ordering::Greater);
    }

    #[test]
    fn teardown_marks_dead_once() {
        let registry = OwnerRegistry::new();
        let root = registry.create(None);
        assert!(registry.is_alive(root));
        assert!(registry.mark_dead(root).is_some());
        assert!(!registry.is_alive(root));
        assert!(registry.mark_dead(root).is_none());
    }
}
