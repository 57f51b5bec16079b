//! resin-core: the deferred-work scheduler and reactive dependency engine of
//! the resin UI runtime.
//!
//! The crate decides *when* and *in what order* units of rendering work run:
//! state recomputation, tasks, component re-evaluation, tree reconciliation,
//! and property writes, all modeled as [`Chore`]s in one sorted queue. It
//! never decides *what* to render; components, diffing, and DOM mutation
//! live behind the [`Executors`] traits.
//!
//! # Ordering
//!
//! Any two chores are totally ordered by macro phase (before-flush work, the
//! journal flush, after-flush visible work, the terminal sentinel), then the
//! owners' document order (parents before children), then the kind's micro
//! rank, then the declaration index. A drain executes chores in exactly this
//! order, even when running chores schedule new ones or suspend on external
//! futures.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = Scheduler::new(executors);
//! let root = scheduler.create_owner(None);
//! scheduler.schedule(Chore::task(root, TaskDescriptor::eager(0, payload)));
//! scheduler.drain_all().await;
//! ```

mod chore;
mod error;
mod executors;
mod order;
mod owners;
mod queue;
mod reactive;
mod scheduler;

pub use chore::{Chore, ChoreHandle, ChoreKind, ChoreResult, ChoreValue};
pub use error::{CapturedError, SchedulerError};
pub use executors::{
    ComponentRunner, ErrorBoundary, ExecOutcome, ExecResult, Executors, Journal, LazyRef,
    PropWrite, ReferenceResolver, TaskDescriptor, TaskRunner, TaskVisibility, TreeReconciler,
};
pub use order::{ChoreIndex, MacroPhase};
pub use owners::OwnerId;
pub use reactive::{CellId, CellValue, DepGraph, NodeId, NodeRole, NodeState, Subscriber};
pub use scheduler::{DrainUpTo, RenderMode, Scheduled, Scheduler};
