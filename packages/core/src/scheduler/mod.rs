//! The scheduler: a sorted queue of chores and the machinery to drain it.
//!
//! All mutation happens from one cooperative context, so the whole structure
//! is `Rc` + interior mutability; the reentrancy guard substitutes for a lock.
//! Scheduling returns a completion handle; terminal kinds (`WaitForAll`,
//! `RenderComponentStatic`) drain the queue synchronously up to themselves.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;

use crate::chore::{Chore, ChoreHandle, ChoreResult};
use crate::error::SchedulerError;
use crate::executors::{Executors, TaskDescriptor};
use crate::order::{MacroPhase, OrderingCx};
use crate::owners::{OwnerId, OwnerRegistry};
use crate::queue::ChoreQueue;
use crate::reactive::{CellId, CellValue, DepGraph, NodeId, NodeRole};

mod drain;
mod waker;

pub use drain::DrainUpTo;
use drain::SuspendedChore;
use waker::DrainWaker;

/// Messages the scheduler sends its host environment.
#[derive(Debug)]
pub(crate) enum SchedulerMsg {
    /// Work was queued and a drain should run at the next opportunity.
    DrainRequested,
}

/// Whether owners across the whole tree may schedule work, or only the scope
/// currently being streamed out.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RenderMode {
    /// Interactive client: chores are ordered by document position.
    Client,
    /// Server streaming: output already sent cannot be amended, so chores
    /// owned by any scope other than `current` are ordering violations.
    Stream { current: OwnerId },
}

/// The outcome of [`Scheduler::schedule`].
pub enum Scheduled {
    /// The chore (and everything ordered before it) already executed.
    Ready(ChoreResult),
    /// The chore will execute during a later drain; await the handle.
    Pending(ChoreHandle),
}

impl Scheduled {
    pub fn handle(&self) -> Option<&ChoreHandle> {
        match self {
            Scheduled::Ready(_) => None,
            Scheduled::Pending(handle) => Some(handle),
        }
    }

    pub fn try_ready(self) -> Option<ChoreResult> {
        match self {
            Scheduled::Ready(result) => Some(result),
            Scheduled::Pending(_) => None,
        }
    }

    /// Wait for the chore's result, however it is delivered.
    pub async fn resolve(self) -> ChoreResult {
        match self {
            Scheduled::Ready(result) => result,
            Scheduled::Pending(handle) => handle.await,
        }
    }
}

pub struct Scheduler {
    pub(crate) queue: ChoreQueue,
    pub(crate) registry: OwnerRegistry,
    pub(crate) graph: DepGraph,
    pub(crate) executors: Executors,
    mode: RefCell<RenderMode>,

    /// True while an executor is running a chore.
    pub(crate) executing: Cell<bool>,
    /// True while a drain future owns the loop.
    pub(crate) draining: Cell<bool>,
    /// The chore currently parked on an unresolved future, if any.
    pub(crate) suspended: RefCell<Option<SuspendedChore>>,
    /// Drains waiting for the loop to free up; woken when it is released.
    drain_waiters: RefCell<Vec<Waker>>,

    /// One `FlushJournal` chore is pre-registered per drain cycle.
    pub(crate) flush_registered: Cell<bool>,
    drain_requested: Cell<bool>,
    violations: Cell<usize>,

    tx: UnboundedSender<SchedulerMsg>,
    rx: RefCell<UnboundedReceiver<SchedulerMsg>>,
}

impl Scheduler {
    pub fn new(executors: Executors) -> Rc<Self> {
        Self::new_with_mode(executors, RenderMode::Client)
    }

    pub fn new_with_mode(executors: Executors, mode: RenderMode) -> Rc<Self> {
        let (tx, rx) = futures_channel::mpsc::unbounded();
        Rc::new(Self {
            queue: ChoreQueue::new(),
            registry: OwnerRegistry::new(),
            graph: DepGraph::new(),
            executors,
            mode: RefCell::new(mode),
            executing: Cell::new(false),
            draining: Cell::new(false),
            suspended: RefCell::new(None),
            drain_waiters: RefCell::new(Vec::new()),
            flush_registered: Cell::new(false),
            drain_requested: Cell::new(false),
            violations: Cell::new(0),
            tx,
            rx: RefCell::new(rx),
        })
    }

    /// Insert a chore in sorted position and arrange for it to run.
    ///
    /// Terminal kinds drain the queue immediately; if a chore is already
    /// executing, the handle is returned instead and the active drain picks
    /// the work up without recursing.
    pub fn schedule(self: &Rc<Self>, chore: Chore) -> Scheduled {
        self.check_stream_order(&chore);

        // The first before-flush chore of a cycle brings the journal flush
        // with it, so visible mutations are batched behind a single flush.
        if chore.macro_phase() == MacroPhase::BeforeFlush && !self.flush_registered.replace(true) {
            let cx = OrderingCx {
                registry: &self.registry,
            };
            self.queue.insert(Rc::new(Chore::flush_journal()), &cx);
        }

        let terminal = chore.is_terminal();
        let chore = {
            let cx = OrderingCx {
                registry: &self.registry,
            };
            self.queue.insert(Rc::new(chore), &cx)
        };
        let handle = ChoreHandle::new(chore);

        if !terminal {
            self.request_drain();
            return Scheduled::Pending(handle);
        }

        if self.executing.get() || self.draining.get() {
            return Scheduled::Pending(handle);
        }

        // Immediate synchronous drain up to and including the new chore. If
        // something suspends, the waker asks the host for a later drain.
        let waker = futures_util::task::waker(Arc::new(DrainWaker {
            tx: self.tx.clone(),
        }));
        let mut cx = Context::from_waker(&waker);
        let mut drain = self.drain_up_to(handle.clone());
        match Pin::new(&mut drain).poll(&mut cx) {
            Poll::Ready(result) => {
                if !self.queue.is_empty() {
                    self.request_drain();
                }
                Scheduled::Ready(result)
            }
            Poll::Pending => Scheduled::Pending(handle),
        }
    }

    /// Drain the queue until `target` has executed. See [`DrainUpTo`].
    pub fn drain_up_to(self: &Rc<Self>, target: ChoreHandle) -> DrainUpTo {
        DrainUpTo::new(self.clone(), target)
    }

    /// Schedule the terminal sentinel and drain everything currently queued.
    pub async fn drain_all(self: &Rc<Self>) {
        match self.schedule(Chore::wait_for_all()) {
            Scheduled::Ready(_) => {}
            Scheduled::Pending(handle) => {
                let _ = self.drain_up_to(handle).await;
            }
        }
    }

    /// Wait until the scheduler asks for a drain.
    ///
    /// Single consumer: the host's event loop awaits this, then drains.
    pub async fn wait_for_work(&self) {
        let mut rx = self.rx.borrow_mut();
        if rx.next().await.is_some() {
            self.drain_requested.set(false);
        }
    }

    pub fn has_work(&self) -> bool {
        !self.queue.is_empty() || self.suspended.borrow().is_some()
    }

    fn request_drain(&self) {
        if self.drain_requested.replace(true) {
            return;
        }
        _ = self.tx.unbounded_send(SchedulerMsg::DrainRequested);
    }

    pub(crate) fn park_drain_waiter(&self, waker: &Waker) {
        let mut waiters = self.drain_waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    /// Release the drain loop and wake every drain waiting to take it over.
    /// A drain may finish at its target with chores still queued; a waiter
    /// whose target is among them must get a chance to drain the rest.
    pub(crate) fn release_drain(&self) {
        self.draining.set(false);
        for waker in self.drain_waiters.borrow_mut().drain(..) {
            waker.wake();
        }
    }

    fn check_stream_order(&self, chore: &Chore) {
        let RenderMode::Stream { current } = *self.mode.borrow() else {
            return;
        };
        let Some(owner) = chore.owner() else { return };
        if owner != current {
            // Streamed output cannot be amended; degrade by ordering last.
            let violation = SchedulerError::OrderingViolation(owner);
            tracing::warn!(
                %violation,
                streaming = ?current,
                kind = chore.kind().name(),
                "ordering chore last"
            );
            self.violations.set(self.violations.get() + 1);
            chore.set_ordered_last();
        }
    }

    /// How many streaming-order violations this scheduler has recorded.
    pub fn ordering_violations(&self) -> usize {
        self.violations.get()
    }

    /// Restrict scheduling to `owner` for the rest of the streaming pass.
    pub fn set_stream_scope(&self, owner: OwnerId) {
        *self.mode.borrow_mut() = RenderMode::Stream { current: owner };
    }

    // ---- owner scopes ----

    /// Register a new owner scope under `parent`, or a root when `None`.
    pub fn create_owner(&self, parent: Option<OwnerId>) -> OwnerId {
        self.registry.create(parent)
    }

    pub fn owner_alive(&self, owner: OwnerId) -> bool {
        self.registry.is_alive(owner)
    }

    /// Register cleanup work to run when `owner` is torn down.
    pub fn on_cleanup(&self, owner: OwnerId, descriptor: TaskDescriptor) {
        self.registry.record_cleanup(owner, descriptor);
    }

    /// Tear down an owner scope: its cells and nodes are dropped, pending
    /// chores for it will be skipped, and its cleanup chores are queued.
    pub fn teardown_owner(self: &Rc<Self>, owner: OwnerId) {
        let Some(teardown) = self.registry.mark_dead(owner) else {
            return;
        };
        tracing::trace!(?owner, "owner torn down");
        self.graph.remove_owned(&teardown.cells, &teardown.nodes);
        for descriptor in teardown.cleanups {
            self.schedule(Chore::cleanup(owner, descriptor));
        }
    }

    // ---- reactive graph ----

    /// The dependency graph, for tracked reads inside compute closures.
    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    /// Create a reactive cell owned by `owner`.
    pub fn create_cell(&self, owner: OwnerId, initial: Rc<dyn CellValue>) -> CellId {
        let cell = self.graph.create_cell(initial);
        self.registry.record_cell(owner, cell);
        cell
    }

    /// Read a cell without subscribing.
    pub fn cell_value(&self, cell: CellId) -> Rc<dyn CellValue> {
        self.graph.peek(cell)
    }

    /// Write a cell. Dependents are marked dirty and exactly one dependent
    /// chore per subscriber is queued, however many writes precede the drain.
    pub fn write_cell(self: &Rc<Self>, cell: CellId, value: Rc<dyn CellValue>) {
        let subscribers = self.graph.write(cell, value.clone());
        self.notify_subscribers(&subscribers, &value);
    }

    /// Create a lazy computed node. It recomputes when its dependencies
    /// change and notifies subscribers only when its value actually changed.
    pub fn create_computed(
        &self,
        owner: OwnerId,
        compute: impl Fn(&DepGraph) -> Rc<dyn CellValue> + 'static,
    ) -> NodeId {
        let node = self
            .graph
            .create_node(owner, NodeRole::Computed, Rc::new(compute));
        self.registry.record_node(owner, node);
        node
    }

    /// Create an effect node and queue its first run. Effects re-run whenever
    /// a cell they read changes.
    pub fn create_effect(
        self: &Rc<Self>,
        owner: OwnerId,
        effect: impl Fn(&DepGraph) + 'static,
    ) -> NodeId {
        let node = self.graph.create_node(
            owner,
            NodeRole::Effect,
            Rc::new(move |graph: &DepGraph| {
                effect(graph);
                Rc::new(()) as Rc<dyn CellValue>
            }),
        );
        self.registry.record_node(owner, node);
        self.schedule(Chore::recompute(Some(owner), node));
        node
    }
}
