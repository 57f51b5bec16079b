//! Mock executors for exercising the scheduler: closure-driven tasks and
//! components, a recording reconciler/journal pair, and a caching resolver.
//! Every mock appends to a shared log so tests assert on execution order.

#![allow(dead_code)]

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use resin_core::{
    CapturedError, ChoreValue, ComponentRunner, ErrorBoundary, ExecOutcome, ExecResult,
    Executors, Journal, LazyRef, OwnerId, PropWrite, ReferenceResolver, Scheduler,
    TaskDescriptor, TaskRunner, TreeReconciler,
};

pub type Log = Rc<RefCell<Vec<String>>>;

pub fn log(log: &Log, entry: impl Into<String>) {
    log.borrow_mut().push(entry.into());
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

/// A task payload holding the closure the mock runner invokes.
pub type TaskFn = Rc<dyn Fn() -> ExecResult>;

pub fn task_fn(f: impl Fn() -> ExecResult + 'static) -> Rc<dyn Any> {
    Rc::new(Rc::new(f) as TaskFn)
}

/// An eager task that just logs its label.
pub fn logging_task(index: u32, log: &Log, label: &str) -> TaskDescriptor {
    let log = log.clone();
    let label = label.to_string();
    TaskDescriptor::eager(
        index,
        task_fn(move || {
            log.borrow_mut().push(label.clone());
            Ok(ExecOutcome::ready(()))
        }),
    )
}

/// A visible task that just logs its label.
pub fn logging_visible_task(index: u32, log: &Log, label: &str) -> TaskDescriptor {
    let log = log.clone();
    let label = label.to_string();
    TaskDescriptor::visible(
        index,
        task_fn(move || {
            log.borrow_mut().push(label.clone());
            Ok(ExecOutcome::ready(()))
        }),
    )
}

pub struct ClosureTasks;

impl TaskRunner for ClosureTasks {
    fn run(&self, descriptor: &TaskDescriptor, _owner: OwnerId) -> ExecResult {
        match descriptor.payload().downcast_ref::<TaskFn>() {
            Some(task) => task(),
            None => Ok(ExecOutcome::ready(())),
        }
    }
}

/// Component runner driven by per-owner closures.
#[derive(Default)]
pub struct MockComponents {
    behaviors: RefCell<HashMap<OwnerId, Rc<dyn Fn() -> ExecResult>>>,
}

impl MockComponents {
    pub fn on_render(&self, owner: OwnerId, behavior: impl Fn() -> ExecResult + 'static) {
        self.behaviors.borrow_mut().insert(owner, Rc::new(behavior));
    }
}

impl ComponentRunner for MockComponents {
    fn render(&self, owner: OwnerId, _props: ChoreValue) -> ExecResult {
        let behavior = self.behaviors.borrow().get(&owner).cloned();
        match behavior {
            Some(behavior) => behavior(),
            None => Ok(ExecOutcome::ready(())),
        }
    }
}

/// Reconciler and journal in one: diffs pull planned property writes, writes
/// are staged in the journal, and only `flush` makes them observable.
#[derive(Default)]
pub struct MockTree {
    pub log: Log,
    planned: RefCell<HashMap<OwnerId, VecDeque<Vec<(String, String)>>>>,
    staged: RefCell<Vec<(OwnerId, String, String)>>,
    applied: RefCell<Vec<(OwnerId, String, String)>>,
    flushes: Cell<usize>,
    labels: RefCell<HashMap<OwnerId, String>>,
}

impl MockTree {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn label(&self, owner: OwnerId, label: &str) {
        self.labels.borrow_mut().insert(owner, label.to_string());
    }

    fn name(&self, owner: OwnerId) -> String {
        self.labels
            .borrow()
            .get(&owner)
            .cloned()
            .unwrap_or_else(|| format!("{owner:?}"))
    }

    /// Plan the property writes the next diff for `owner` reports.
    pub fn plan_writes(&self, owner: OwnerId, writes: &[(&str, &str)]) {
        self.planned.borrow_mut().entry(owner).or_default().push_back(
            writes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    /// Mutations made observable by the journal flush.
    pub fn applied(&self) -> Vec<(OwnerId, String, String)> {
        self.applied.borrow().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.get()
    }
}

impl TreeReconciler for MockTree {
    fn diff(&self, owner: OwnerId, _output: ChoreValue) -> Result<Vec<PropWrite>, CapturedError> {
        self.log.borrow_mut().push(format!("diff-{}", self.name(owner)));
        let planned = self
            .planned
            .borrow_mut()
            .get_mut(&owner)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();
        Ok(planned
            .into_iter()
            .map(|(key, value)| PropWrite::new(key, Rc::new(value) as ChoreValue))
            .collect())
    }

    fn write_property(
        &self,
        owner: OwnerId,
        key: &str,
        value: ChoreValue,
    ) -> Result<(), CapturedError> {
        let value = value
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_else(|| "<opaque>".to_string());
        self.log
            .borrow_mut()
            .push(format!("stage-{}-{key}={value}", self.name(owner)));
        self.staged.borrow_mut().push((owner, key.to_string(), value));
        Ok(())
    }
}

impl Journal for MockTree {
    fn flush(&self) {
        self.log.borrow_mut().push("flush".to_string());
        self.flushes.set(self.flushes.get() + 1);
        let staged = std::mem::take(&mut *self.staged.borrow_mut());
        self.applied.borrow_mut().extend(staged);
    }
}

/// Resolver with an injected cache; counts actual resolutions.
#[derive(Default)]
pub struct MockResolver {
    pub log: Log,
    cache: RefCell<HashMap<String, ChoreValue>>,
    resolutions: Cell<usize>,
}

impl MockResolver {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.get()
    }
}

impl ReferenceResolver for MockResolver {
    fn resolve(&self, reference: &LazyRef) -> ExecResult {
        let id = reference.id().to_string();
        if let Some(cached) = self.cache.borrow().get(&id) {
            self.log.borrow_mut().push(format!("resolve-cached-{id}"));
            return Ok(ExecOutcome::Ready(cached.clone()));
        }
        self.resolutions.set(self.resolutions.get() + 1);
        self.log.borrow_mut().push(format!("resolve-{id}"));
        let value: ChoreValue = Rc::new(format!("callable:{id}"));
        self.cache.borrow_mut().insert(id, value.clone());
        Ok(ExecOutcome::Ready(value))
    }
}

/// Error boundary that records every delivered failure.
#[derive(Default)]
pub struct MockBoundary {
    pub log: Log,
}

impl MockBoundary {
    pub fn new(log: Log) -> Self {
        Self { log }
    }
}

impl ErrorBoundary for MockBoundary {
    fn handle_error(&self, error: &CapturedError, owner: Option<OwnerId>) {
        self.log
            .borrow_mut()
            .push(format!("boundary-{:?}-{}", owner, error.message()));
    }
}

pub struct Harness {
    pub scheduler: Rc<Scheduler>,
    pub log: Log,
    pub tree: Rc<MockTree>,
    pub components: Rc<MockComponents>,
    pub resolver: Rc<MockResolver>,
    pub boundary: Rc<MockBoundary>,
}

pub fn harness() -> Harness {
    let log: Log = Rc::default();
    let tree = Rc::new(MockTree::new(log.clone()));
    let components = Rc::new(MockComponents::default());
    let resolver = Rc::new(MockResolver::new(log.clone()));
    let boundary = Rc::new(MockBoundary::new(log.clone()));

    let scheduler = Scheduler::new(Executors {
        resolver: resolver.clone(),
        tasks: Rc::new(ClosureTasks),
        components: components.clone(),
        reconciler: tree.clone(),
        journal: tree.clone(),
        errors: boundary.clone(),
    });

    Harness {
        scheduler,
        log,
        tree,
        components,
        resolver,
        boundary,
    }
}
