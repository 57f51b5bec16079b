//! The external collaborators the drain engine dispatches into.
//!
//! The scheduler decides *when* work runs, never *what* it does: resolving a
//! lazy code reference, running a task, rendering a component, and diffing a
//! tree are all opaque calls behind these traits. Each executor may finish
//! synchronously or suspend by returning a not-yet-resolved future; the drain
//! loop treats both uniformly.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use crate::chore::{ChoreResult, ChoreValue};
use crate::error::CapturedError;
use crate::owners::OwnerId;

/// How an executor finished a chore.
pub enum ExecOutcome {
    /// The work completed synchronously with this value.
    Ready(ChoreValue),
    /// The work must await an externally resolved value. The drain loop
    /// stores the future and resumes once it settles.
    Suspended(LocalBoxFuture<'static, ChoreResult>),
}

/// The result of invoking an executor. An `Err` is delivered to the owning
/// scope's error boundary; the chore's completion still resolves.
pub type ExecResult = Result<ExecOutcome, CapturedError>;

impl ExecOutcome {
    /// Finish with a value.
    pub fn ready(value: impl Any) -> ExecOutcome {
        ExecOutcome::Ready(Rc::new(value))
    }
}

impl fmt::Debug for ExecOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecOutcome::Ready(_) => f.write_str("ExecOutcome::Ready(..)"),
            ExecOutcome::Suspended(_) => f.write_str("ExecOutcome::Suspended(..)"),
        }
    }
}

/// A lazy code reference, identified by a stable string id. Resolution is
/// idempotent: the resolver owns its cache (injected state, never a global).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct LazyRef {
    id: Rc<str>,
}

impl LazyRef {
    pub fn new(id: impl Into<Rc<str>>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &Rc<str> {
        &self.id
    }
}

/// Whether a task runs ahead of the journal flush or only once the updated
/// tree is observable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskVisibility {
    Eager,
    Visible,
}

/// A unit of task or resource work, opaque to the scheduler apart from its
/// intra-host declaration index and visibility.
#[derive(Clone)]
pub struct TaskDescriptor {
    index: u32,
    visibility: TaskVisibility,
    payload: Rc<dyn Any>,
}

impl TaskDescriptor {
    pub fn new(index: u32, visibility: TaskVisibility, payload: Rc<dyn Any>) -> Self {
        Self {
            index,
            visibility,
            payload,
        }
    }

    /// A task that runs in the before-flush phase.
    pub fn eager(index: u32, payload: Rc<dyn Any>) -> Self {
        Self::new(index, TaskVisibility::Eager, payload)
    }

    /// A task that runs after the journal flush.
    pub fn visible(index: u32, payload: Rc<dyn Any>) -> Self {
        Self::new(index, TaskVisibility::Visible, payload)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn visibility(&self) -> TaskVisibility {
        self.visibility
    }

    pub fn payload(&self) -> &Rc<dyn Any> {
        &self.payload
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("index", &self.index)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// One property write reported by the reconciler. The scheduler turns each
/// into a `SetProperty` chore so writes coalesce per property name.
pub struct PropWrite {
    pub key: Rc<str>,
    pub value: ChoreValue,
}

impl PropWrite {
    pub fn new(key: impl Into<Rc<str>>, value: ChoreValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Resolves lazy code references to callables. Must be idempotent; the first
/// resolution may suspend, later ones should hit the resolver's cache.
pub trait ReferenceResolver {
    fn resolve(&self, reference: &LazyRef) -> ExecResult;
}

/// Runs task and resource descriptors. Tasks may read and write cells.
pub trait TaskRunner {
    fn run(&self, descriptor: &TaskDescriptor, owner: OwnerId) -> ExecResult;
}

/// Evaluates a component, producing its render output.
pub trait ComponentRunner {
    fn render(&self, owner: OwnerId, props: ChoreValue) -> ExecResult;
}

/// Diffs render output against the owner's subtree and applies mutations
/// through the journal. The scheduler never inspects mutation contents.
pub trait TreeReconciler {
    /// Diff new output for `owner`, appending tree mutations to the journal
    /// and reporting the property writes the diff produced.
    fn diff(&self, owner: OwnerId, output: ChoreValue) -> Result<Vec<PropWrite>, CapturedError>;

    /// Stage one property write for `owner` in the journal.
    fn write_property(
        &self,
        owner: OwnerId,
        key: &str,
        value: ChoreValue,
    ) -> Result<(), CapturedError>;
}

/// The ordered buffer of pending tree mutations. Append-only until flushed;
/// the scheduler guarantees exactly one flush per drain cycle.
pub trait Journal {
    fn flush(&self);
}

/// Receives executor failures for the owning scope.
pub trait ErrorBoundary {
    fn handle_error(&self, error: &CapturedError, owner: Option<OwnerId>);
}

/// The full set of collaborators a scheduler dispatches into.
#[derive(Clone)]
pub struct Executors {
    pub resolver: Rc<dyn ReferenceResolver>,
    pub tasks: Rc<dyn TaskRunner>,
    pub components: Rc<dyn ComponentRunner>,
    pub reconciler: Rc<dyn TreeReconciler>,
    pub journal: Rc<dyn Journal>,
    pub errors: Rc<dyn ErrorBoundary>,
}
