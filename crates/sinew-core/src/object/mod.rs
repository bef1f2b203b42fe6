#[cfg(test)]
mod tests;

use crate::{
    PATH_SEPARATOR,
    error::{ErrorOrigin, RuntimeError},
    registry::{Getter, PropSpec, Setter},
    runtime::{Runtime, RuntimeInner},
    value::Value,
};
use derive_more::{Deref, Display};
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    rc::{Rc, Weak},
};

///
/// Oid
///
/// Process-unique numeric entity identity, assigned at construction.
/// Distinct from any domain-level identity an entity may carry.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("o{_0}")]
pub struct Oid(pub(crate) u64);

///
/// Observer contracts.
///
/// Notifications carry no value; observers re-read current state.
///

pub type ObserverFn = Rc<dyn Fn(&ObjRef, &str)>;
pub type AnyObserverFn = Rc<dyn Fn(&ObjRef)>;

/// Handle for deregistering an observer. Unique per entity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObserverId(u64);

struct ObserverEntry {
    id: ObserverId,
    callback: ObserverFn,
}

struct AnyObserverEntry {
    id: ObserverId,
    callback: AnyObserverFn,
}

///
/// ProxyRelation
///
/// Forwarding link: a local property P dirtied on this entity also
/// surfaces as "prefix.P" on the target. Non-owning back-reference.
///

struct ProxyRelation {
    target: Weak<Object>,
    prefix: String,
}

///
/// InstanceSpecs
///
/// Instance-level descriptor overrides, checked before the type-level
/// table.
///

#[derive(Default)]
struct InstanceSpecs {
    props: BTreeMap<String, Rc<PropSpec>>,
    dependents: BTreeMap<String, Vec<String>>,
}

///
/// Object
///
/// An entity participating in the reactive property system: a mutable
/// value bag, a property cache, observers keyed by property name (plus a
/// wildcard observer), instance descriptor overrides, and proxy relations.
///

pub struct Object {
    oid: Oid,
    type_name: String,
    runtime: Weak<RuntimeInner>,
    values: RefCell<BTreeMap<String, Value>>,
    cache: RefCell<BTreeMap<String, Value>>,
    instance: RefCell<InstanceSpecs>,
    observers: RefCell<BTreeMap<String, Vec<ObserverEntry>>>,
    any_observers: RefCell<Vec<AnyObserverEntry>>,
    proxies: RefCell<Vec<ProxyRelation>>,
    next_observer: Cell<u64>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.oid)
    }
}

///
/// ObjRef
///
/// Shared handle to an entity. Compares by entity identity.
///

#[derive(Clone, Deref)]
pub struct ObjRef(pub(crate) Rc<Object>);

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.oid == other.0.oid
    }
}

impl Eq for ObjRef {}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.type_name, self.0.oid)
    }
}

///
/// WeakObj
///
/// Non-owning entity handle, for back-references that must not keep an
/// entity alive.
///

#[derive(Clone)]
pub struct WeakObj(Weak<Object>);

impl WeakObj {
    #[must_use]
    pub fn upgrade(&self) -> Option<ObjRef> {
        self.0.upgrade().map(ObjRef)
    }
}

impl ObjRef {
    pub(crate) fn new(oid: Oid, type_name: &str, runtime: &Rc<RuntimeInner>) -> Self {
        Self(Rc::new(Object {
            oid,
            type_name: type_name.to_string(),
            runtime: Rc::downgrade(runtime),
            values: RefCell::new(BTreeMap::new()),
            cache: RefCell::new(BTreeMap::new()),
            instance: RefCell::new(InstanceSpecs::default()),
            observers: RefCell::new(BTreeMap::new()),
            any_observers: RefCell::new(Vec::new()),
            proxies: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
        }))
    }

    #[must_use]
    pub fn oid(&self) -> Oid {
        self.0.oid
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    pub(crate) fn weak(&self) -> Weak<Object> {
        Rc::downgrade(&self.0)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObj {
        WeakObj(Rc::downgrade(&self.0))
    }

    pub fn runtime(&self) -> Result<Runtime, RuntimeError> {
        self.0
            .runtime
            .upgrade()
            .map(Runtime::from_inner)
            .ok_or_else(|| RuntimeError::runtime_released(ErrorOrigin::Object))
    }

    // ------------------------------------------------------------------
    // Declaration
    // ------------------------------------------------------------------

    /// Declare (or override) a property on this instance only.
    pub fn declare(&self, spec: PropSpec) -> Result<(), RuntimeError> {
        spec.validate()?;

        let mut instance = self.0.instance.borrow_mut();
        // re-declaration replaces: drop the old inverted entries first
        for dependents in instance.dependents.values_mut() {
            dependents.retain(|d| d != &spec.name);
        }
        for dep in &spec.on {
            let entry = instance.dependents.entry(dep.clone()).or_default();
            if !entry.contains(&spec.name) {
                entry.push(spec.name.clone());
            }
        }
        instance.props.insert(spec.name.clone(), Rc::new(spec));

        Ok(())
    }

    pub(crate) fn spec_for(&self, name: &str) -> Result<Rc<PropSpec>, RuntimeError> {
        if let Some(spec) = self.0.instance.borrow().props.get(name) {
            return Ok(spec.clone());
        }
        let rt = self.runtime()?;
        rt.inner()
            .registry
            .spec_of(&self.0.type_name, name)
            .ok_or_else(|| RuntimeError::unknown_property(&self.0.type_name, name))
    }

    #[must_use]
    pub fn has_prop(&self, name: &str) -> bool {
        self.spec_for(name).is_ok()
    }

    /// Dependents of `name`, instance-level declarations first.
    pub(crate) fn dependents_of(&self, name: &str) -> Vec<String> {
        let mut out = self
            .0
            .instance
            .borrow()
            .dependents
            .get(name)
            .cloned()
            .unwrap_or_default();
        if let Some(rt) = self.0.runtime.upgrade() {
            for dep in rt.registry.dependents_of(&self.0.type_name, name) {
                if !out.contains(&dep) {
                    out.push(dep);
                }
            }
        }

        out
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Resolve a property through its descriptor.
    ///
    /// Reads never schedule work; first-time cache population is not
    /// externally observable.
    pub fn get(&self, name: &str) -> Result<Value, RuntimeError> {
        let spec = self.spec_for(name)?;

        if spec.cache {
            if let Some(value) = self.0.cache.borrow().get(name) {
                return Ok(value.clone());
            }
        }

        let value = match &spec.getter {
            Getter::Slot => self
                .0
                .values
                .borrow()
                .get(name)
                .cloned()
                .unwrap_or_else(|| spec.default.clone()),
            Getter::Pure(f) => {
                let mut args = Vec::with_capacity(spec.on.len());
                for dep in &spec.on {
                    args.push(self.get_path(dep)?);
                }
                f(&args)
            }
            Getter::Impure(f) => f(self),
        };

        if spec.cache {
            self.0
                .cache
                .borrow_mut()
                .insert(name.to_string(), value.clone());
        }

        Ok(value)
    }

    /// Resolve a one-separator dependency path through a relation.
    pub fn get_path(&self, path: &str) -> Result<Value, RuntimeError> {
        match path.split_once(PATH_SEPARATOR) {
            None => self.get(path),
            Some((head, rest)) => {
                if rest.contains(PATH_SEPARATOR) {
                    return Err(RuntimeError::dependency_path_too_deep(head, path));
                }
                match self.get(head)? {
                    Value::Null => Ok(Value::Null),
                    Value::Obj(obj) => obj.get(rest),
                    Value::Seq(seq) => seq.surface().get(rest),
                    other => Err(RuntimeError::config(
                        ErrorOrigin::Object,
                        format!(
                            "path '{path}' traverses a non-relation value ({})",
                            other.tag()
                        ),
                    )),
                }
            }
        }
    }

    /// Read the backing slot directly, bypassing descriptor dispatch.
    #[must_use]
    pub fn read_slot(&self, name: &str) -> Option<Value> {
        self.0.values.borrow().get(name).cloned()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write through the descriptor.
    ///
    /// Fails if no setter exists; otherwise invokes the custom setter or
    /// writes the backing slot, then unconditionally marks the property
    /// dirty and schedules a flush.
    pub fn set(&self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let spec = self.spec_for(name)?;
        let Some(setter) = spec.setter.clone() else {
            return Err(RuntimeError::read_only_property(&self.0.type_name, name));
        };

        match setter {
            Setter::Slot => {
                self.0.values.borrow_mut().insert(name.to_string(), value);
            }
            Setter::Custom(f) => f(self, value)?,
        }

        self.touch(name)
    }

    /// Write the backing slot directly: no descriptor dispatch, no
    /// dirty-marking, no notification.
    pub fn write_slot(&self, name: &str, value: Value) {
        self.0.values.borrow_mut().insert(name.to_string(), value);
    }

    /// Remove the backing slot, reverting reads to the declared default.
    pub fn clear_slot(&self, name: &str) {
        self.0.values.borrow_mut().remove(name);
    }

    /// Mark `name` dirty and schedule a flush without writing anything.
    pub fn touch(&self, name: &str) -> Result<(), RuntimeError> {
        let rt = self.runtime()?;
        rt.mark_dirty(self, name);

        Ok(())
    }

    pub(crate) fn invalidate_cache(&self, name: &str) {
        self.0.cache.borrow_mut().remove(name);
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    fn next_observer_id(&self) -> ObserverId {
        let id = self.0.next_observer.get();
        self.0.next_observer.set(id + 1);

        ObserverId(id)
    }

    /// Observe one property by name.
    pub fn observe<F>(&self, name: &str, callback: F) -> ObserverId
    where
        F: Fn(&ObjRef, &str) + 'static,
    {
        let id = self.next_observer_id();
        self.0
            .observers
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(ObserverEntry {
                id,
                callback: Rc::new(callback),
            });

        id
    }

    /// Observe any local property change (fires once per flush).
    pub fn observe_any<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&ObjRef) + 'static,
    {
        let id = self.next_observer_id();
        self.0.any_observers.borrow_mut().push(AnyObserverEntry {
            id,
            callback: Rc::new(callback),
        });

        id
    }

    /// Deregister an observer. Returns whether anything was removed.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut removed = false;
        {
            let mut observers = self.0.observers.borrow_mut();
            for entries in observers.values_mut() {
                let before = entries.len();
                entries.retain(|entry| entry.id != id);
                removed |= entries.len() != before;
            }
        }
        {
            let mut any = self.0.any_observers.borrow_mut();
            let before = any.len();
            any.retain(|entry| entry.id != id);
            removed |= any.len() != before;
        }

        removed
    }

    pub(crate) fn observers_for(&self, name: &str) -> Vec<ObserverFn> {
        self.0
            .observers
            .borrow()
            .get(name)
            .map(|entries| entries.iter().map(|e| e.callback.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn any_observer_fns(&self) -> Vec<AnyObserverFn> {
        self.0
            .any_observers
            .borrow()
            .iter()
            .map(|e| e.callback.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Proxy relations
    // ------------------------------------------------------------------

    /// Register a forwarding link to `target` under `prefix`.
    pub fn add_proxy(&self, target: &ObjRef, prefix: &str) {
        let mut proxies = self.0.proxies.borrow_mut();
        let exists = proxies.iter().any(|p| {
            p.prefix == prefix
                && p.target
                    .upgrade()
                    .is_some_and(|t| t.oid == target.0.oid)
        });
        if !exists {
            proxies.push(ProxyRelation {
                target: target.weak(),
                prefix: prefix.to_string(),
            });
        }
    }

    /// Deregister the forwarding link to `target` under `prefix`.
    pub fn remove_proxy(&self, target: &ObjRef, prefix: &str) {
        self.0.proxies.borrow_mut().retain(|p| {
            let Some(live) = p.target.upgrade() else {
                // drop dead links while we are here
                return false;
            };
            !(live.oid == target.0.oid && p.prefix == prefix)
        });
    }

    /// Live proxy targets with their prefixes.
    pub(crate) fn proxy_targets(&self) -> Vec<(ObjRef, String)> {
        self.0
            .proxies
            .borrow()
            .iter()
            .filter_map(|p| {
                p.target
                    .upgrade()
                    .map(|t| (Self(t), p.prefix.clone()))
            })
            .collect()
    }
}
