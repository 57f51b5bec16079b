//! The drain engine.
//!
//! Draining pops the lowest-ordered chore, dispatches it to its executor, and
//! repeats until the target chore has executed. A chore that suspends parks
//! its continuation on the scheduler and the drain yields; when the future
//! settles, the loop re-checks the head of the queue before touching anything
//! else, so chores scheduled mid-suspension run in their proper position.
//! The loop is trampolined iteration, never recursion: work scheduled by a
//! running chore lands in the queue and is picked up by the same loop.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;

use crate::chore::{unit_value, Chore, ChoreHandle, ChoreKind, ChoreResult};
use crate::error::SchedulerError;
use crate::executors::ExecOutcome;
use crate::reactive::{CellValue, Subscriber};

use super::Scheduler;

/// A chore that returned a not-yet-resolved future. At most one exists at a
/// time: the drain does not run past a suspended chore's settlement.
pub(crate) struct SuspendedChore {
    chore: Rc<Chore>,
    future: LocalBoxFuture<'static, ChoreResult>,
}

/// Future returned by [`Scheduler::drain_up_to`]. Resolves with the target
/// chore's result once every chore ordered at or before it has executed.
pub struct DrainUpTo {
    scheduler: Rc<Scheduler>,
    target: ChoreHandle,
    owns_drain: bool,
}

impl DrainUpTo {
    pub(crate) fn new(scheduler: Rc<Scheduler>, target: ChoreHandle) -> Self {
        Self {
            scheduler,
            target,
            owns_drain: false,
        }
    }
}

impl Future for DrainUpTo {
    type Output = ChoreResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let scheduler = this.scheduler.clone();

        // Draining from inside an executor would interleave two chores on the
        // same context. That is a scheduler bug, not a user error.
        assert!(
            !scheduler.executing.get(),
            "drain entered while a chore is executing"
        );

        // Another drain future owns the loop. Wait for the target, and also
        // park a waker on the loop itself: the owner may finish at an earlier
        // target with this one still queued, and must hand the loop over.
        if scheduler.draining.get() && !this.owns_drain {
            let result = this.target.poll_result(cx);
            if result.is_pending() {
                scheduler.park_drain_waiter(cx.waker());
            }
            return result;
        }

        scheduler.draining.set(true);
        this.owns_drain = true;

        let result = scheduler.drain_loop(cx, &this.target);
        if result.is_ready() {
            this.owns_drain = false;
            scheduler.release_drain();
        }
        result
    }
}

impl Drop for DrainUpTo {
    fn drop(&mut self) {
        if self.owns_drain {
            self.scheduler.release_drain();
        }
    }
}

impl Scheduler {
    pub(crate) fn drain_loop(
        self: &Rc<Self>,
        cx: &mut Context<'_>,
        target: &ChoreHandle,
    ) -> Poll<ChoreResult> {
        loop {
            // An in-flight suspension settles before any further chore runs.
            let settled = {
                let mut suspended = self.suspended.borrow_mut();
                match suspended.as_mut() {
                    Some(active) => match active.future.as_mut().poll(cx) {
                        Poll::Ready(result) => {
                            let active = suspended.take().expect("suspension just polled");
                            Some((active.chore, result))
                        }
                        Poll::Pending => return Poll::Pending,
                    },
                    None => None,
                }
            };
            if let Some((chore, result)) = settled {
                self.complete(&chore, result);
                // Re-check the head: chores scheduled during the suspension
                // may order before anything that was queued when it began.
                continue;
            }

            if let Some(result) = target.try_result() {
                return Poll::Ready(result);
            }

            let Some(chore) = self.queue.pop() else {
                // The queue ran dry without reaching the target. Settle it so
                // awaiters are not left hanging.
                target.chore().settle(Ok(unit_value()));
                return Poll::Ready(target.try_result().expect("target just settled"));
            };

            // Work for a torn-down owner is discarded, except cleanup, which
            // must still run to release resources.
            if let Some(owner) = chore.owner() {
                if !self.registry.is_alive(owner) && !chore.is_cleanup() {
                    tracing::trace!(?owner, kind = chore.kind().name(), "skipping stale chore");
                    chore.settle(Ok(unit_value()));
                    continue;
                }
            }

            self.executing.set(true);
            let outcome = self.execute(&chore);
            self.executing.set(false);

            match outcome {
                Ok(ExecOutcome::Ready(value)) => self.complete(&chore, Ok(value)),
                Ok(ExecOutcome::Suspended(future)) => {
                    tracing::trace!(kind = chore.kind().name(), "chore suspended");
                    *self.suspended.borrow_mut() = Some(SuspendedChore { chore, future });
                }
                Err(error) => {
                    let failure = SchedulerError::ExecutorFailure(error.clone());
                    tracing::error!(kind = chore.kind().name(), %failure, "chore failed");
                    self.executors.errors.handle_error(&error, chore.owner());
                    self.complete(&chore, Err(error));
                }
            }
        }
    }

    /// Dispatch one chore to its executor.
    fn execute(self: &Rc<Self>, chore: &Rc<Chore>) -> crate::executors::ExecResult {
        tracing::trace!(kind = chore.kind().name(), owner = ?chore.owner(), "executing chore");
        match chore.kind() {
            ChoreKind::ResolveReference { reference } => {
                self.executors.resolver.resolve(reference)
            }

            ChoreKind::RunResource { descriptor }
            | ChoreKind::RunTask { descriptor }
            | ChoreKind::RunCleanup { descriptor } => {
                let owner = chore.owner().expect("task chores always have an owner");
                self.executors.tasks.run(descriptor, owner)
            }

            ChoreKind::ReconcileTree { output } => {
                let owner = chore.owner().expect("reconcile chores always have an owner");
                let output = output.borrow().clone();
                let writes = self.executors.reconciler.diff(owner, output)?;
                for write in writes {
                    self.schedule(Chore::set_property(owner, write.key, write.value));
                }
                Ok(ExecOutcome::Ready(unit_value()))
            }

            ChoreKind::SetProperty { key, value } => {
                let owner = chore.owner().expect("property chores always have an owner");
                let value = value.borrow().clone();
                self.executors.reconciler.write_property(owner, key, value)?;
                Ok(ExecOutcome::Ready(unit_value()))
            }

            ChoreKind::RenderComponent { props } | ChoreKind::RenderComponentStatic { props } => {
                let owner = chore.owner().expect("render chores always have an owner");
                self.executors.components.render(owner, props.borrow().clone())
            }

            ChoreKind::RecomputeAndNotify { node, force } => {
                match self.graph.recompute(*node, force.get()) {
                    Some(outcome) => {
                        self.notify_subscribers(&outcome.notify, &outcome.value);
                        Ok(ExecOutcome::Ready(outcome.value.into_any()))
                    }
                    None => Ok(ExecOutcome::Ready(unit_value())),
                }
            }

            ChoreKind::FlushJournal => {
                self.executors.journal.flush();
                self.flush_registered.set(false);
                Ok(ExecOutcome::Ready(unit_value()))
            }

            ChoreKind::WaitForAll => Ok(ExecOutcome::Ready(unit_value())),
        }
    }

    /// Resolve a chore and enqueue the follow-up work its completion implies.
    fn complete(self: &Rc<Self>, chore: &Rc<Chore>, result: ChoreResult) {
        if let Ok(value) = &result {
            // Fresh render output flows into a tree-diff for the same owner.
            if let (
                ChoreKind::RenderComponent { .. } | ChoreKind::RenderComponentStatic { .. },
                Some(owner),
            ) = (chore.kind(), chore.owner())
            {
                self.schedule(Chore::reconcile(owner, value.clone()));
            }
        }
        chore.settle(result);
    }

    /// Turn a value change into the dependent chores its subscribers need.
    pub(crate) fn notify_subscribers(
        self: &Rc<Self>,
        subscribers: &[Subscriber],
        value: &Rc<dyn CellValue>,
    ) {
        for subscriber in subscribers {
            match subscriber {
                Subscriber::Node(node) => {
                    let owner = self.graph.node_owner(*node);
                    self.schedule(Chore::recompute(owner, *node));
                }
                Subscriber::Tree(owner) => {
                    self.schedule(Chore::reconcile(*owner, value.clone().into_any()));
                }
                Subscriber::Property(owner, key) => {
                    self.schedule(Chore::set_property(
                        *owner,
                        key.clone(),
                        value.clone().into_any(),
                    ));
                }
            }
        }
    }
}
