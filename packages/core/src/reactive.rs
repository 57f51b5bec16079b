//! The reactive dependency graph: cells, compute nodes, and the recompute
//! protocol.
//!
//! A [`Cell`](CellId) is a mutable storage slot that tracks which compute
//! nodes read it. Compute nodes are either computed values (lazy, skipped
//! when nothing subscribes to them) or effects (always run). Each run records
//! the set of cells actually read, so dependencies that a branch no longer
//! touches are unsubscribed automatically.
//!
//! The graph itself never executes anything. Writes mark dependents dirty and
//! hand the scheduler the subscribers to notify; the scheduler linearizes the
//! resulting wave of chores through the ordering key instead of recursing.

use std::any::Any;
use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashSet;
use slab::Slab;

use crate::owners::OwnerId;

/// The unique identifier of a reactive cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CellId(pub(crate) usize);

/// The unique identifier of a computed/effect node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) usize);

/// A value stored in a cell or cached by a compute node.
///
/// Comparison goes through the value's own `PartialEq`, so "did the recompute
/// change anything" is decided with equality appropriate to the value's type.
pub trait CellValue: 'static {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
    fn value_eq(&self, other: &dyn CellValue) -> bool;
}

impl<T: PartialEq + 'static> CellValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn value_eq(&self, other: &dyn CellValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// Something that observes a cell or a compute node's value.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Subscriber {
    /// Another compute node; notified with a recompute chore.
    Node(NodeId),
    /// An owner's rendered output; notified with a tree-diff chore.
    Tree(OwnerId),
    /// A single property binding; notified with a property-write chore.
    Property(OwnerId, Rc<str>),
}

/// State machine of a compute node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeState {
    Clean,
    Dirty,
    Recomputing,
}

/// Computed values are lazy; effects run for their side effects and are never
/// skipped for lack of subscribers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeRole {
    Computed,
    Effect,
}

type ComputeFn = Rc<dyn Fn(&DepGraph) -> Rc<dyn CellValue>>;

struct CellSlot {
    value: RefCell<Rc<dyn CellValue>>,
    subscribers: RefCell<FxHashSet<Subscriber>>,
}

struct NodeSlot {
    owner: OwnerId,
    role: NodeRole,
    state: StdCell<NodeState>,
    compute: ComputeFn,
    deps: RefCell<FxHashSet<CellId>>,
    cached: RefCell<Option<Rc<dyn CellValue>>>,
    /// Notify subscribers even when the recomputed value compares equal.
    force: StdCell<bool>,
    subscribers: RefCell<FxHashSet<Subscriber>>,
}

/// What a finished recompute asks the scheduler to do.
pub(crate) struct RecomputeOutcome {
    /// Subscribers to notify, with the fresh value. Empty when the value was
    /// unchanged and the node is not forced.
    pub notify: Vec<Subscriber>,
    pub value: Rc<dyn CellValue>,
}

#[derive(Default)]
pub struct DepGraph {
    cells: RefCell<Slab<CellSlot>>,
    nodes: RefCell<Slab<NodeSlot>>,
    /// Dependency sets being recorded by the recomputes currently on the
    /// stack. The innermost frame captures cell reads.
    tracking: RefCell<Vec<FxHashSet<CellId>>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create_cell(&self, initial: Rc<dyn CellValue>) -> CellId {
        let id = self.cells.borrow_mut().insert(CellSlot {
            value: RefCell::new(initial),
            subscribers: RefCell::new(FxHashSet::default()),
        });
        CellId(id)
    }

    pub(crate) fn create_node(&self, owner: OwnerId, role: NodeRole, compute: ComputeFn) -> NodeId {
        let id = self.nodes.borrow_mut().insert(NodeSlot {
            owner,
            role,
            state: StdCell::new(NodeState::Dirty),
            compute,
            deps: RefCell::new(FxHashSet::default()),
            cached: RefCell::new(None),
            force: StdCell::new(false),
            subscribers: RefCell::new(FxHashSet::default()),
        });
        NodeId(id)
    }

    /// Read a cell's value. When called from inside a recompute, the read is
    /// recorded as a dependency of the running node.
    pub fn read(&self, cell: CellId) -> Rc<dyn CellValue> {
        if let Some(frame) = self.tracking.borrow_mut().last_mut() {
            frame.insert(cell);
        }
        self.cells.borrow()[cell.0].value.borrow().clone()
    }

    /// Read a cell without subscribing.
    pub fn peek(&self, cell: CellId) -> Rc<dyn CellValue> {
        self.cells.borrow()[cell.0].value.borrow().clone()
    }

    /// Write a cell, marking node subscribers dirty. Returns the subscribers
    /// the scheduler must notify, or nothing when the value is unchanged.
    pub(crate) fn write(&self, cell: CellId, value: Rc<dyn CellValue>) -> Vec<Subscriber> {
        let cells = self.cells.borrow();
        // A late write from a long-running task may land after the owning
        // scope was torn down.
        let Some(slot) = cells.get(cell.0) else {
            tracing::trace!(cell = cell.0, "write to dropped cell ignored");
            return Vec::new();
        };
        if slot.value.borrow().value_eq(&*value) {
            tracing::trace!(cell = cell.0, "cell write ignored, value unchanged");
            return Vec::new();
        }
        *slot.value.borrow_mut() = value;

        let subscribers: Vec<_> = slot.subscribers.borrow().iter().cloned().collect();
        drop(cells);

        let nodes = self.nodes.borrow();
        for subscriber in &subscribers {
            if let Subscriber::Node(node) = subscriber {
                if let Some(slot) = nodes.get(node.0) {
                    // A write landing while the node is mid-recompute leaves
                    // it dirty again once that run finishes.
                    match slot.state.get() {
                        NodeState::Clean | NodeState::Recomputing => {
                            slot.state.set(NodeState::Dirty)
                        }
                        NodeState::Dirty => {}
                    }
                }
            }
        }
        subscribers
    }

    /// Subscribe something to a cell directly, e.g. a property binding.
    pub fn subscribe_cell(&self, cell: CellId, subscriber: Subscriber) {
        if let Some(slot) = self.cells.borrow().get(cell.0) {
            slot.subscribers.borrow_mut().insert(subscriber);
        }
    }

    /// Subscribe something downstream of a compute node's value.
    pub fn subscribe_node(&self, node: NodeId, subscriber: Subscriber) {
        if let Some(slot) = self.nodes.borrow().get(node.0) {
            slot.subscribers.borrow_mut().insert(subscriber);
        }
    }

    pub fn node_state(&self, node: NodeId) -> Option<NodeState> {
        self.nodes.borrow().get(node.0).map(|slot| slot.state.get())
    }

    pub(crate) fn node_owner(&self, node: NodeId) -> Option<OwnerId> {
        self.nodes.borrow().get(node.0).map(|slot| slot.owner)
    }

    pub fn cached_value(&self, node: NodeId) -> Option<Rc<dyn CellValue>> {
        self.nodes.borrow().get(node.0)?.cached.borrow().clone()
    }

    /// Run the recompute protocol for one node.
    ///
    /// Returns `None` when the node is gone or was skipped (a computed value
    /// nothing subscribes to). Otherwise the outcome carries the fresh value
    /// and the subscribers to notify, which stays empty unless the value
    /// changed or the force flag was set.
    pub(crate) fn recompute(&self, node: NodeId, force: bool) -> Option<RecomputeOutcome> {
        let (compute, role) = {
            let nodes = self.nodes.borrow();
            let slot = nodes.get(node.0)?;

            // Lazy: nothing observes this value.
            if slot.role == NodeRole::Computed && slot.subscribers.borrow().is_empty() {
                slot.state.set(NodeState::Clean);
                tracing::trace!(node = node.0, "recompute skipped, no subscribers");
                return None;
            }

            slot.state.set(NodeState::Recomputing);
            (slot.compute.clone(), slot.role)
        };

        self.tracking.borrow_mut().push(FxHashSet::default());
        let value = (compute)(self);
        let fresh_deps = self.tracking.borrow_mut().pop().unwrap_or_default();

        let nodes = self.nodes.borrow();
        let slot = nodes.get(node.0)?;

        let changed = match slot.cached.borrow().as_deref() {
            Some(previous) => !previous.value_eq(&*value),
            None => true,
        };
        *slot.cached.borrow_mut() = Some(value.clone());

        // Record the fresh dependency set and drop stale subscriptions.
        let stale = std::mem::replace(&mut *slot.deps.borrow_mut(), fresh_deps.clone());
        let cells = self.cells.borrow();
        for dep in stale.difference(&fresh_deps) {
            if let Some(cell) = cells.get(dep.0) {
                cell.subscribers.borrow_mut().remove(&Subscriber::Node(node));
            }
        }
        for dep in fresh_deps.difference(&stale) {
            if let Some(cell) = cells.get(dep.0) {
                cell.subscribers.borrow_mut().insert(Subscriber::Node(node));
            }
        }

        // A write from inside the compute leaves the node dirty again.
        if slot.state.get() == NodeState::Recomputing {
            slot.state.set(NodeState::Clean);
        }

        let notify = if role == NodeRole::Computed && (changed || force || slot.force.get()) {
            slot.subscribers.borrow().iter().cloned().collect()
        } else {
            Vec::new()
        };

        Some(RecomputeOutcome { notify, value })
    }

    /// Force every notification from this node, even for unchanged values.
    pub fn set_force(&self, node: NodeId, force: bool) {
        if let Some(slot) = self.nodes.borrow().get(node.0) {
            slot.force.set(force);
        }
    }

    /// Drop the cells and nodes owned by a torn-down scope, releasing their
    /// subscription edges.
    pub(crate) fn remove_owned(&self, cells: &[CellId], nodes: &[NodeId]) {
        {
            let mut node_slab = self.nodes.borrow_mut();
            let cell_slab = self.cells.borrow();
            for node in nodes {
                if let Some(slot) = node_slab.try_remove(node.0) {
                    for dep in slot.deps.borrow().iter() {
                        if let Some(cell) = cell_slab.get(dep.0) {
                            cell.subscribers
                                .borrow_mut()
                                .remove(&Subscriber::Node(*node));
                        }
                    }
                }
            }
        }
        let mut cell_slab = self.cells.borrow_mut();
        for cell in cells {
            cell_slab.try_remove(cell.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owners::OwnerRegistry;

    fn graph_with_owner() -> (DepGraph, OwnerId) {
        let registry = OwnerRegistry::new();
        (DepGraph::new(), registry.create(None))
    }

    #[test]
    fn computed_without_subscribers_is_skipped() {
        let (graph, owner) = graph_with_owner();
        let cell = graph.create_cell(Rc::new(1i32));
        let node = graph.create_node(
            owner,
            NodeRole::Computed,
            Rc::new(move |g: &DepGraph| g.read(cell)),
        );
        assert!(graph.recompute(node, false).is_none());
        assert_eq!(graph.node_state(node), Some(NodeState::Clean));
    }

    #[test]
    fn effects_run_without_subscribers() {
        let (graph, owner) = graph_with_owner();
        let cell = graph.create_cell(Rc::new(5i32));
        let node = graph.create_node(
            owner,
            NodeRole::Effect,
            Rc::new(move |g: &DepGraph| g.read(cell)),
        );
        let outcome = graph.recompute(node, false).unwrap();
        assert_eq!(outcome.value.as_any().downcast_ref::<i32>(), Some(&5));
    }

    #[test]
    fn unchanged_recompute_does_not_notify() {
        let (graph, owner) = graph_with_owner();
        let cell = graph.create_cell(Rc::new(1i32));
        let node = graph.create_node(
            owner,
            NodeRole::Computed,
            Rc::new(move |g: &DepGraph| Rc::new(*g.read(cell).as_any().downcast_ref::<i32>().unwrap() > 0)),
        );
        graph.subscribe_node(node, Subscriber::Tree(owner));

        let first = graph.recompute(node, false).unwrap();
        assert_eq!(first.notify.len(), 1);

        // 1 -> 2 flips nothing: the computed boolean is unchanged.
        graph.write(cell, Rc::new(2i32));
        let second = graph.recompute(node, false).unwrap();
        assert!(second.notify.is_empty());

        // Forced notifications go out regardless.
        let forced = graph.recompute(node, true).unwrap();
        assert_eq!(forced.notify.len(), 1);
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let (graph, owner) = graph_with_owner();
        let flag = graph.create_cell(Rc::new(true));
        let a = graph.create_cell(Rc::new(10i32));
        let b = graph.create_cell(Rc::new(20i32));
        let node = graph.create_node(
            owner,
            NodeRole::Effect,
            Rc::new(move |g: &DepGraph| {
                if *g.read(flag).as_any().downcast_ref::<bool>().unwrap() {
                    g.read(a)
                } else {
                    g.read(b)
                }
            }),
        );

        graph.recompute(node, false).unwrap();
        // Reads went through the `true` branch: a is a dependency, b is not.
        assert!(!graph.write(a, Rc::new(11i32)).is_empty());
        assert!(graph.write(b, Rc::new(21i32)).is_empty());

        graph.write(flag, Rc::new(false));
        graph.recompute(node, false).unwrap();
        assert!(graph.write(a, Rc::new(12i32)).is_empty());
        assert!(!graph.write(b, Rc::new(22i32)).is_empty());
    }

    #[test]
    fn write_during_recompute_leaves_the_node_dirty() {
        let (graph, owner) = graph_with_owner();
        let cell = graph.create_cell(Rc::new(0i32));
        // Reads its own trigger cell and bumps it, so the second run writes
        // a cell it is subscribed to while still recomputing.
        let node = graph.create_node(
            owner,
            NodeRole::Effect,
            Rc::new(move |g: &DepGraph| {
                let value = *g.read(cell).as_any().downcast_ref::<i32>().unwrap();
                g.write(cell, Rc::new(value + 1));
                Rc::new(value) as Rc<dyn CellValue>
            }),
        );

        // First run: the dependency on the cell is recorded only afterwards,
        // so the self-write marks nothing and the node settles clean.
        graph.recompute(node, false).unwrap();
        assert_eq!(graph.node_state(node), Some(NodeState::Clean));

        graph.recompute(node, false).unwrap();
        assert_eq!(graph.node_state(node), Some(NodeState::Dirty));
    }

    #[test]
    fn write_of_equal_value_is_ignored() {
        let (graph, _owner) = graph_with_owner();
        let cell = graph.create_cell(Rc::new(7i32));
        graph.subscribe_cell(cell, Subscriber::Property(OwnerId(0), "title".into()));
        assert!(graph.write(cell, Rc::new(7i32)).is_empty());
        assert_eq!(graph.write(cell, Rc::new(8i32)).len(), 1);
    }
}
