
use crate::{
    PATH_SEPARATOR,
    error::RuntimeError,
    object::{ObjRef, Object, Oid},
    obs::{EventReport, Metrics},
    registry::{PropSpec, TypeRegistry},
    seq::{self, SeqRef},
    value::Value,
};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, BTreeSet, VecDeque},
    mem,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::{Rc, Weak},
};

///
/// Task
///
/// A unit of deferred work on the cooperative queue. Flush tasks carry the
/// epoch they were scheduled under; a manual synchronous flush bumps the
/// epoch, which cancels any task still sitting in the queue.
///

enum Task {
    Flush { epoch: u64 },
    Run(Box<dyn FnOnce()>),
}

///
/// DirtyEntry
///
/// Directly-dirtied names for one entity, held weakly so the dirty set
/// never keeps an entity alive.
///

struct DirtyEntry {
    obj: Weak<Object>,
    names: BTreeSet<String>,
}

///
/// RuntimeInner
///
/// The shared mutable state of one runtime context: the type registry,
/// the dirty set, and the cooperative task queue. All of it is touched
/// only from the single cooperative thread.
///

pub(crate) struct RuntimeInner {
    pub(crate) registry: TypeRegistry,
    dirty: RefCell<BTreeMap<Oid, DirtyEntry>>,
    queue: RefCell<VecDeque<Task>>,
    next_oid: Cell<u64>,
    flush_epoch: Cell<u64>,
    flush_pending: Cell<bool>,
    pub(crate) metrics: Metrics,
}

///
/// Runtime
///
/// Injectable runtime context. Registries are owned here rather than in
/// module-level singletons, so independent runtimes (and tests) are fully
/// isolated from each other.
///

#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        let runtime = Self {
            inner: Rc::new(RuntimeInner {
                registry: TypeRegistry::default(),
                dirty: RefCell::new(BTreeMap::new()),
                queue: RefCell::new(VecDeque::new()),
                next_oid: Cell::new(0),
                flush_epoch: Cell::new(0),
                flush_pending: Cell::new(false),
                metrics: Metrics::default(),
            }),
        };
        seq::install_surface_type(&runtime);

        runtime
    }

    pub(crate) const fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    pub(crate) fn alloc_oid(&self) -> Oid {
        let next = self.inner.next_oid.get();
        self.inner.next_oid.set(next + 1);

        Oid(next)
    }

    // ------------------------------------------------------------------
    // Declaration surface
    // ------------------------------------------------------------------

    /// Define a new type in the descriptor registry.
    pub fn define_type(&self, name: &str) -> Result<(), RuntimeError> {
        self.inner.registry.define_type(name)
    }

    #[must_use]
    pub fn has_type(&self, name: &str) -> bool {
        self.inner.registry.has_type(name)
    }

    /// Declare a property on a type.
    pub fn declare(&self, type_name: &str, spec: PropSpec) -> Result<(), RuntimeError> {
        self.inner.registry.declare(type_name, spec)
    }

    /// Declared property names of a type.
    #[must_use]
    pub fn property_names(&self, type_name: &str) -> Vec<String> {
        self.inner.registry.property_names(type_name)
    }

    /// Construct an entity of a declared type.
    pub fn spawn(&self, type_name: &str) -> Result<ObjRef, RuntimeError> {
        if !self.inner.registry.has_type(type_name) {
            return Err(RuntimeError::config(
                crate::error::ErrorOrigin::Object,
                format!("type not defined: '{type_name}'"),
            ));
        }

        Ok(ObjRef::new(self.alloc_oid(), type_name, &self.inner))
    }

    /// Construct an entity of a builtin type, bypassing the registry check.
    pub(crate) fn spawn_internal(&self, type_name: &str) -> ObjRef {
        ObjRef::new(self.alloc_oid(), type_name, &self.inner)
    }

    /// Construct an observable ordered collection.
    #[must_use]
    pub fn seq(&self, items: Vec<Value>) -> SeqRef {
        SeqRef::new(self, items)
    }

    // ------------------------------------------------------------------
    // Change batching
    // ------------------------------------------------------------------

    /// Record a directly-dirtied (entity, property) pair and schedule a
    /// deferred flush if none is pending.
    pub fn mark_dirty(&self, obj: &ObjRef, name: &str) {
        {
            let mut dirty = self.inner.dirty.borrow_mut();
            dirty
                .entry(obj.oid())
                .or_insert_with(|| DirtyEntry {
                    obj: obj.weak(),
                    names: BTreeSet::new(),
                })
                .names
                .insert(name.to_string());
        }
        self.schedule_flush();
    }

    fn schedule_flush(&self) {
        if self.inner.flush_pending.get() {
            return;
        }
        self.inner.flush_pending.set(true);
        self.inner.queue.borrow_mut().push_back(Task::Flush {
            epoch: self.inner.flush_epoch.get(),
        });
    }

    /// Enqueue arbitrary deferred work behind whatever is already queued.
    pub fn enqueue<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.queue.borrow_mut().push_back(Task::Run(Box::new(f)));
    }

    /// Drain the cooperative queue: runs after the current synchronous
    /// stretch, before the next externally-triggered event.
    pub fn run_until_idle(&self) {
        loop {
            let task = self.inner.queue.borrow_mut().pop_front();
            match task {
                None => break,
                Some(Task::Flush { epoch }) => {
                    // stale tasks were cancelled by a manual flush
                    if epoch == self.inner.flush_epoch.get() && self.inner.flush_pending.get() {
                        self.inner.flush_pending.set(false);
                        self.flush_batch();
                    }
                }
                Some(Task::Run(f)) => f(),
            }
        }
    }

    /// Flush synchronously, cancelling any pending deferred flush task
    /// first so a burst never notifies twice.
    pub fn flush_now(&self) {
        self.inner
            .flush_epoch
            .set(self.inner.flush_epoch.get() + 1);
        self.inner.flush_pending.set(false);
        self.flush_batch();
    }

    // One batched pass: clear the dirty set atomically, then propagate
    // per entity with a dedup guard, folding proxy-forwarded names into
    // each target's own pass.
    fn flush_batch(&self) {
        let taken = mem::take(&mut *self.inner.dirty.borrow_mut());
        if taken.is_empty() {
            return;
        }
        self.inner.metrics.bump_flushes();

        let mut passes: BTreeMap<Oid, Pass> = BTreeMap::new();
        for (oid, entry) in taken {
            let Some(obj) = entry.obj.upgrade() else {
                continue;
            };
            passes.insert(oid, Pass::seeded(ObjRef(obj), entry.names));
        }

        loop {
            let Some(oid) = passes
                .iter()
                .find(|(_, pass)| !pass.queue.is_empty())
                .map(|(oid, _)| *oid)
            else {
                break;
            };
            self.run_entity_pass(oid, &mut passes);
        }
    }

    fn run_entity_pass(&self, oid: Oid, passes: &mut BTreeMap<Oid, Pass>) {
        loop {
            let popped = {
                let Some(pass) = passes.get_mut(&oid) else {
                    return;
                };
                let Some(name) = pass.queue.pop_front() else {
                    break;
                };
                if !pass.seen.insert(name.clone()) {
                    continue;
                }
                let local = !name.contains(PATH_SEPARATOR);
                if local {
                    pass.local_changed = true;
                }
                (pass.obj.clone(), name, local)
            };
            let (obj, name, local) = popped;

            // ripple dependents through this entity's own worklist
            let dependents = obj.dependents_of(&name);
            if !dependents.is_empty() {
                if let Some(pass) = passes.get_mut(&oid) {
                    for dependent in dependents {
                        if !pass.seen.contains(&dependent) {
                            pass.queue.push_back(dependent);
                        }
                    }
                }
            }

            obj.invalidate_cache(&name);
            self.notify(&obj, &name);

            // a dirtied local name surfaces as "prefix.name" on each
            // proxied target, under that target's own dedup guard
            if local {
                for (target, prefix) in obj.proxy_targets() {
                    let forwarded = format!("{prefix}{PATH_SEPARATOR}{name}");
                    let target_pass = passes
                        .entry(target.oid())
                        .or_insert_with(|| Pass::empty(target.clone()));
                    if !target_pass.seen.contains(&forwarded)
                        && !target_pass.queue.contains(&forwarded)
                    {
                        target_pass.queue.push_back(forwarded);
                    }
                }
            }
        }

        // wildcard fires once per flush, only when a local name changed
        let wildcard = {
            let Some(pass) = passes.get_mut(&oid) else {
                return;
            };
            if pass.local_changed && !pass.wildcard_fired {
                pass.wildcard_fired = true;
                Some(pass.obj.clone())
            } else {
                None
            }
        };
        if let Some(obj) = wildcard {
            self.notify_wildcard(&obj);
        }
    }

    // Observer callbacks that panic must not abort the flush for other
    // observers: isolate, log, continue.
    fn notify(&self, obj: &ObjRef, name: &str) {
        for callback in obj.observers_for(name) {
            self.inner.metrics.bump_notifications();
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(obj, name)));
            if outcome.is_err() {
                self.inner.metrics.bump_observer_panics();
                log::warn!("observer for '{name}' on {obj} panicked; continuing flush");
            }
        }
    }

    fn notify_wildcard(&self, obj: &ObjRef) {
        for callback in obj.any_observer_fns() {
            self.inner.metrics.bump_wildcard_notifications();
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(obj)));
            if outcome.is_err() {
                self.inner.metrics.bump_observer_panics();
                log::warn!("wildcard observer on {obj} panicked; continuing flush");
            }
        }
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    #[must_use]
    pub fn metrics_report(&self) -> EventReport {
        self.inner.metrics.report()
    }

    pub fn metrics_reset(&self) {
        self.inner.metrics.reset();
    }
}

///
/// Pass
///
/// Per-entity propagation state for one flush cycle.
///

struct Pass {
    obj: ObjRef,
    queue: VecDeque<String>,
    seen: BTreeSet<String>,
    local_changed: bool,
    wildcard_fired: bool,
}

impl Pass {
    fn seeded(obj: ObjRef, names: BTreeSet<String>) -> Self {
        Self {
            obj,
            queue: names.into_iter().collect(),
            seen: BTreeSet::new(),
            local_changed: false,
            wildcard_fired: false,
        }
    }

    fn empty(obj: ObjRef) -> Self {
        Self {
            obj,
            queue: VecDeque::new(),
            seen: BTreeSet::new(),
            local_changed: false,
            wildcard_fired: false,
        }
    }
}
