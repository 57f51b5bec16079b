//! Chores: the unit of deferred, orderable work.
//!
//! A chore records one operation, the owner scope it acts for, its ordering
//! index, and a single-resolution completion that any number of callers can
//! await. Chores of the coalescible kinds merge into an existing queue entry
//! instead of inserting a duplicate, so a burst of writes produces exactly
//! one recompute and the last payload wins.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::CapturedError;
use crate::executors::{LazyRef, TaskDescriptor, TaskVisibility};
use crate::order::{ChoreIndex, MacroPhase};
use crate::owners::OwnerId;
use crate::reactive::NodeId;

/// An opaque value produced by a chore: render output, a resolved callable,
/// a task's result, or unit for pure bookkeeping chores.
pub type ChoreValue = Rc<dyn Any>;

/// What a chore's completion resolves with. Failed executors resolve with the
/// caught error so dependents are never left hanging.
pub type ChoreResult = Result<ChoreValue, CapturedError>;

pub(crate) fn unit_value() -> ChoreValue {
    Rc::new(())
}

/// The closed set of operations the scheduler knows how to order and dispatch.
pub enum ChoreKind {
    ResolveReference { reference: LazyRef },
    RunResource { descriptor: TaskDescriptor },
    RunTask { descriptor: TaskDescriptor },
    ReconcileTree { output: RefCell<ChoreValue> },
    SetProperty { key: Rc<str>, value: RefCell<ChoreValue> },
    RenderComponentStatic { props: RefCell<ChoreValue> },
    RenderComponent { props: RefCell<ChoreValue> },
    RecomputeAndNotify { node: NodeId, force: Cell<bool> },
    FlushJournal,
    RunCleanup { descriptor: TaskDescriptor },
    WaitForAll,
}

impl ChoreKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            ChoreKind::ResolveReference { .. } => "ResolveReference",
            ChoreKind::RunResource { .. } => "RunResource",
            ChoreKind::RunTask { .. } => "RunTask",
            ChoreKind::ReconcileTree { .. } => "ReconcileTree",
            ChoreKind::SetProperty { .. } => "SetProperty",
            ChoreKind::RenderComponentStatic { .. } => "RenderComponentStatic",
            ChoreKind::RenderComponent { .. } => "RenderComponent",
            ChoreKind::RecomputeAndNotify { .. } => "RecomputeAndNotify",
            ChoreKind::FlushJournal => "FlushJournal",
            ChoreKind::RunCleanup { .. } => "RunCleanup",
            ChoreKind::WaitForAll => "WaitForAll",
        }
    }
}

impl fmt::Debug for ChoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The identity a coalescible chore merges on.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum CoalesceKey {
    Node(NodeId),
    Property(Option<OwnerId>, Rc<str>),
    Reference(Rc<str>),
}

/// One unit of deferred work tracked by the scheduler.
pub struct Chore {
    kind: ChoreKind,
    owner: Option<OwnerId>,
    index: ChoreIndex,
    executed: Cell<bool>,
    /// Set when the streaming-order check flags this chore; it then sorts to
    /// the end of its macro phase.
    ordered_last: Cell<bool>,
    completion: Completion,
}

impl Chore {
    fn new(kind: ChoreKind, owner: Option<OwnerId>, index: ChoreIndex) -> Self {
        Self {
            kind,
            owner,
            index,
            executed: Cell::new(false),
            ordered_last: Cell::new(false),
            completion: Completion::default(),
        }
    }

    /// A task chore. Visibility comes from the descriptor: eager tasks run
    /// before the flush, visible tasks after it.
    pub fn task(owner: OwnerId, descriptor: TaskDescriptor) -> Self {
        let index = ChoreIndex::Seq(descriptor.index());
        Self::new(ChoreKind::RunTask { descriptor }, Some(owner), index)
    }

    /// A resource-start chore.
    pub fn resource(owner: OwnerId, descriptor: TaskDescriptor) -> Self {
        let index = ChoreIndex::Seq(descriptor.index());
        Self::new(ChoreKind::RunResource { descriptor }, Some(owner), index)
    }

    /// A cleanup chore. Runs even after its owner has been torn down.
    pub fn cleanup(owner: OwnerId, descriptor: TaskDescriptor) -> Self {
        let index = ChoreIndex::Seq(descriptor.index());
        Self::new(ChoreKind::RunCleanup { descriptor }, Some(owner), index)
    }

    /// A lazy-reference resolution chore, coalesced by reference identity.
    pub fn resolve(reference: LazyRef) -> Self {
        let index = ChoreIndex::Key(reference.id().clone());
        Self::new(ChoreKind::ResolveReference { reference }, None, index)
    }

    /// A tree-diff chore carrying the owner's newest render output.
    pub fn reconcile(owner: OwnerId, output: ChoreValue) -> Self {
        Self::new(
            ChoreKind::ReconcileTree {
                output: RefCell::new(output),
            },
            Some(owner),
            ChoreIndex::None,
        )
    }

    /// A property write, coalesced per (owner, property name).
    pub fn set_property(owner: OwnerId, key: impl Into<Rc<str>>, value: ChoreValue) -> Self {
        let key = key.into();
        Self::new(
            ChoreKind::SetProperty {
                key: key.clone(),
                value: RefCell::new(value),
            },
            Some(owner),
            ChoreIndex::Key(key),
        )
    }

    /// A component re-evaluation chore.
    pub fn render(owner: OwnerId, props: ChoreValue) -> Self {
        Self::new(
            ChoreKind::RenderComponent {
                props: RefCell::new(props),
            },
            Some(owner),
            ChoreIndex::None,
        )
    }

    /// A static render chore. Terminal: scheduling it drains synchronously.
    pub fn render_static(owner: OwnerId, props: ChoreValue) -> Self {
        Self::new(
            ChoreKind::RenderComponentStatic {
                props: RefCell::new(props),
            },
            Some(owner),
            ChoreIndex::None,
        )
    }

    /// A recompute chore for a dependency-graph node, coalesced per node.
    pub fn recompute(owner: Option<OwnerId>, node: NodeId) -> Self {
        Self::new(
            ChoreKind::RecomputeAndNotify {
                node,
                force: Cell::new(false),
            },
            owner,
            ChoreIndex::None,
        )
    }

    /// A recompute that notifies subscribers even if the value is unchanged.
    pub fn recompute_forced(owner: Option<OwnerId>, node: NodeId) -> Self {
        Self::new(
            ChoreKind::RecomputeAndNotify {
                node,
                force: Cell::new(true),
            },
            owner,
            ChoreIndex::None,
        )
    }

    pub(crate) fn flush_journal() -> Self {
        Self::new(ChoreKind::FlushJournal, None, ChoreIndex::None)
    }

    /// The terminal sentinel: drains every queued chore.
    pub fn wait_for_all() -> Self {
        Self::new(ChoreKind::WaitForAll, None, ChoreIndex::None)
    }

    pub fn kind(&self) -> &ChoreKind {
        &self.kind
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    pub(crate) fn index(&self) -> &ChoreIndex {
        &self.index
    }

    pub fn macro_phase(&self) -> MacroPhase {
        match &self.kind {
            ChoreKind::RunTask { descriptor } => match descriptor.visibility() {
                TaskVisibility::Eager => MacroPhase::BeforeFlush,
                TaskVisibility::Visible => MacroPhase::AfterFlush,
            },
            ChoreKind::FlushJournal => MacroPhase::Flush,
            ChoreKind::WaitForAll => MacroPhase::Terminal,
            _ => MacroPhase::BeforeFlush,
        }
    }

    pub(crate) fn micro_rank(&self) -> u8 {
        match &self.kind {
            ChoreKind::ResolveReference { .. } => 0,
            ChoreKind::RunResource { .. } => 1,
            ChoreKind::RunTask { .. } => 2,
            ChoreKind::RunCleanup { .. } => 3,
            ChoreKind::ReconcileTree { .. } => 4,
            ChoreKind::SetProperty { .. } => 5,
            ChoreKind::RenderComponentStatic { .. } => 6,
            ChoreKind::RenderComponent { .. } => 7,
            ChoreKind::RecomputeAndNotify { .. } => 8,
            // Alone in their phases.
            ChoreKind::FlushJournal | ChoreKind::WaitForAll => 0,
        }
    }

    /// Terminal kinds trigger an immediate synchronous drain when scheduled.
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ChoreKind::WaitForAll | ChoreKind::RenderComponentStatic { .. }
        )
    }

    pub(crate) fn is_cleanup(&self) -> bool {
        matches!(self.kind, ChoreKind::RunCleanup { .. })
    }

    pub(crate) fn coalesce_key(&self) -> Option<CoalesceKey> {
        match &self.kind {
            ChoreKind::RecomputeAndNotify { node, .. } => Some(CoalesceKey::Node(*node)),
            ChoreKind::SetProperty { key, .. } => {
                Some(CoalesceKey::Property(self.owner, key.clone()))
            }
            ChoreKind::ResolveReference { reference } => {
                Some(CoalesceKey::Reference(reference.id().clone()))
            }
            _ => None,
        }
    }

    /// Merge a newly scheduled duplicate into this queued entry. The latest
    /// payload wins; the force flag is sticky.
    pub(crate) fn merge_from(&self, newer: &Chore) {
        match (&self.kind, &newer.kind) {
            (
                ChoreKind::SetProperty { value, .. },
                ChoreKind::SetProperty { value: newer_value, .. },
            ) => {
                *value.borrow_mut() = newer_value.borrow().clone();
            }
            (
                ChoreKind::RecomputeAndNotify { force, .. },
                ChoreKind::RecomputeAndNotify { force: newer_force, .. },
            ) => {
                if newer_force.get() {
                    force.set(true);
                }
            }
            // Same reference identity, nothing to carry over.
            (ChoreKind::ResolveReference { .. }, ChoreKind::ResolveReference { .. }) => {}
            _ => unreachable!("merge of non-coalescible chore kinds"),
        }
    }

    pub fn has_executed(&self) -> bool {
        self.executed.get()
    }

    pub(crate) fn ordered_last(&self) -> bool {
        self.ordered_last.get()
    }

    pub(crate) fn set_ordered_last(&self) {
        self.ordered_last.set(true);
    }

    /// Resolve the completion. Single-resolution: once executed, the cached
    /// result is what late awaiters see and further settles are ignored.
    pub(crate) fn settle(&self, result: ChoreResult) {
        if self.executed.replace(true) {
            return;
        }
        self.completion.resolve(result);
    }

    pub(crate) fn try_result(&self) -> Option<ChoreResult> {
        self.completion.result.borrow().clone()
    }
}

impl fmt::Debug for Chore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chore")
            .field("kind", &self.kind.name())
            .field("owner", &self.owner)
            .field("index", &self.index)
            .field("executed", &self.executed.get())
            .finish()
    }
}

/// The single-resolution completion shared by everyone awaiting a chore.
#[derive(Default)]
struct Completion {
    result: RefCell<Option<ChoreResult>>,
    wakers: RefCell<Vec<Waker>>,
}

impl Completion {
    fn resolve(&self, result: ChoreResult) {
        *self.result.borrow_mut() = Some(result);
        for waker in self.wakers.borrow_mut().drain(..) {
            waker.wake();
        }
    }
}

/// A cloneable handle to a chore's completion. Awaiting it yields the chore's
/// result; awaiting after execution returns the cached result immediately.
#[derive(Clone)]
pub struct ChoreHandle {
    chore: Rc<Chore>,
}

impl ChoreHandle {
    pub(crate) fn new(chore: Rc<Chore>) -> Self {
        Self { chore }
    }

    pub(crate) fn chore(&self) -> &Rc<Chore> {
        &self.chore
    }

    pub fn has_executed(&self) -> bool {
        self.chore.has_executed()
    }

    /// The result, if the chore has already executed.
    pub fn try_result(&self) -> Option<ChoreResult> {
        self.chore.try_result()
    }

    pub(crate) fn poll_result(&self, cx: &mut Context<'_>) -> Poll<ChoreResult> {
        if let Some(result) = self.chore.try_result() {
            return Poll::Ready(result);
        }
        let mut wakers = self.chore.completion.wakers.borrow_mut();
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl Future for ChoreHandle {
    type Output = ChoreResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_result(cx)
    }
}

impl fmt::Debug for ChoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChoreHandle")
            .field("chore", &self.chore)
            .finish()
    }
}
