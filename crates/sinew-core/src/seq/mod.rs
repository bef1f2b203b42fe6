
use crate::{
    error::{ErrorOrigin, RuntimeError},
    object::{ObjRef, Object, ObserverId, Oid},
    registry::PropSpec,
    runtime::Runtime,
    value::Value,
};
use derive_more::Deref;
use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

/// Surface type backing every collection's derived properties.
pub(crate) const SEQ_TYPE: &str = "sinew.seq";

/// Derived read-only property names.
pub const PROP_SIZE: &str = "size";
pub const PROP_FIRST: &str = "first";
/// Structural self-changed marker: dirtied on every mutation, carries no
/// value of its own.
pub const PROP_CHANGED: &str = "changed";

// Registers the builtin surface type on a fresh runtime.
pub(crate) fn install_surface_type(runtime: &Runtime) {
    runtime.inner().registry.install(
        SEQ_TYPE,
        vec![
            PropSpec::slot(PROP_SIZE)
                .with_default(Value::Uint(0))
                .read_only(),
            PropSpec::slot(PROP_FIRST).read_only(),
            PropSpec::slot(PROP_CHANGED).read_only(),
        ],
    );
}

///
/// SpliceGuard
///
/// Hook seam for owners of relation-backed collections: validate inserted
/// elements before any mutation happens, observe the applied mutation
/// afterwards.
///

pub trait SpliceGuard {
    fn before_splice(&self, seq: &SeqRef, inserted: &[Value]) -> Result<(), RuntimeError>;
    fn after_splice(&self, seq: &SeqRef, inserted: &[Value], removed: &[Value], index: usize);
}

///
/// SeqProxy
///
/// The collection's single proxy relation. Non-owning back-reference.
///

struct SeqProxy {
    target: Weak<Object>,
    prefix: String,
}

///
/// Seq
///
/// Observable ordered collection. All structural mutation funnels through
/// `splice`; derived properties (`size`, `first`, `changed`) live on an
/// internal surface entity that carries the observers and proxy relation.
///

pub struct Seq {
    surface: ObjRef,
    items: RefCell<Vec<Value>>,
    guard: RefCell<Option<Rc<dyn SpliceGuard>>>,
    proxy: RefCell<Option<SeqProxy>>,
}

///
/// SeqRef
///
/// Shared handle to a collection. Compares by identity.
///

#[derive(Clone, Deref)]
pub struct SeqRef(pub(crate) Rc<Seq>);

impl PartialEq for SeqRef {
    fn eq(&self, other: &Self) -> bool {
        self.oid() == other.oid()
    }
}

impl Eq for SeqRef {}

impl fmt::Debug for SeqRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}(len={})", self.oid(), self.len())
    }
}

impl fmt::Display for SeqRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq#{}", self.oid())
    }
}

impl SeqRef {
    pub(crate) fn new(runtime: &Runtime, items: Vec<Value>) -> Self {
        let surface = runtime.spawn_internal(SEQ_TYPE);
        surface.write_slot(PROP_SIZE, Value::Uint(items.len() as u64));
        surface.write_slot(PROP_FIRST, items.first().cloned().unwrap_or_default());

        Self(Rc::new(Seq {
            surface,
            items: RefCell::new(items),
            guard: RefCell::new(None),
            proxy: RefCell::new(None),
        }))
    }

    /// The surface entity carrying derived properties and observers.
    #[must_use]
    pub fn surface(&self) -> &ObjRef {
        &self.0.surface
    }

    #[must_use]
    pub fn oid(&self) -> Oid {
        self.0.surface.oid()
    }

    pub fn runtime(&self) -> Result<Runtime, RuntimeError> {
        self.0.surface.runtime()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.items.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn first(&self) -> Option<Value> {
        self.0.items.borrow().first().cloned()
    }

    #[must_use]
    pub fn last(&self) -> Option<Value> {
        self.0.items.borrow().last().cloned()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.0.items.borrow().contains(value)
    }

    #[must_use]
    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.0.items.borrow().iter().position(|v| v == value)
    }

    /// Observe a derived property (`size`, `first`, `changed`).
    pub fn observe<F>(&self, name: &str, callback: F) -> ObserverId
    where
        F: Fn(&ObjRef, &str) + 'static,
    {
        self.0.surface.observe(name, callback)
    }

    // ------------------------------------------------------------------
    // Guard and proxy
    // ------------------------------------------------------------------

    pub fn set_guard(&self, guard: Option<Rc<dyn SpliceGuard>>) {
        *self.0.guard.borrow_mut() = guard;
    }

    /// Install the collection's single proxy relation, replacing any
    /// previous one. Current members are (de)registered accordingly.
    pub fn set_proxy(&self, target: &ObjRef, prefix: &str) {
        self.clear_proxy();

        self.0.surface.add_proxy(target, prefix);
        for value in self.0.items.borrow().iter() {
            register_membership(value, target, prefix);
        }
        *self.0.proxy.borrow_mut() = Some(SeqProxy {
            target: target.weak(),
            prefix: prefix.to_string(),
        });
    }

    pub fn clear_proxy(&self) {
        let Some((target, prefix)) = self.proxy_pair() else {
            *self.0.proxy.borrow_mut() = None;
            return;
        };
        self.0.surface.remove_proxy(&target, &prefix);
        for value in self.0.items.borrow().iter() {
            deregister_membership(value, &target, &prefix);
        }
        *self.0.proxy.borrow_mut() = None;
    }

    fn proxy_pair(&self) -> Option<(ObjRef, String)> {
        self.0
            .proxy
            .borrow()
            .as_ref()
            .and_then(|p| p.target.upgrade().map(|t| (ObjRef(t), p.prefix.clone())))
    }

    // ------------------------------------------------------------------
    // The mutation primitive
    // ------------------------------------------------------------------

    /// Replace `remove_count` elements at `index` with `insert`, in place.
    ///
    /// A negative index is relative to the end; a still-negative resolved
    /// position is a usage error. Returns the removed elements as a new
    /// collection. Marks `size` dirty iff the element count changed,
    /// `first` iff the mutation touched index 0, and always marks the
    /// structural `changed` marker.
    pub fn splice(
        &self,
        index: isize,
        remove_count: usize,
        insert: Vec<Value>,
    ) -> Result<SeqRef, RuntimeError> {
        let rt = self.runtime()?;
        let len = self.len();
        let len_i = isize::try_from(len).unwrap_or(isize::MAX);

        let resolved = if index < 0 { len_i + index } else { index };
        if resolved < 0 {
            return Err(RuntimeError::config(
                ErrorOrigin::Collection,
                format!("splice index {index} resolves before the start (len {len})"),
            ));
        }
        let at = resolved.unsigned_abs().min(len);
        let removable = remove_count.min(len - at);

        // owner hook: element validation happens before any mutation
        let guard = self.0.guard.borrow().clone();
        if let Some(g) = &guard {
            g.before_splice(self, &insert)?;
        }

        let removed: Vec<Value> = {
            let mut items = self.0.items.borrow_mut();
            items
                .splice(at..at + removable, insert.iter().cloned())
                .collect()
        };

        // keep proxy registrations aligned with membership
        if let Some((target, prefix)) = self.proxy_pair() {
            for value in &removed {
                deregister_membership(value, &target, &prefix);
            }
            for value in &insert {
                register_membership(value, &target, &prefix);
            }
        }

        let surface = &self.0.surface;
        surface.write_slot(PROP_SIZE, Value::Uint(self.len() as u64));
        surface.write_slot(PROP_FIRST, self.first().unwrap_or_default());

        rt.mark_dirty(surface, PROP_CHANGED);
        if removable != insert.len() {
            rt.mark_dirty(surface, PROP_SIZE);
        }
        if at == 0 {
            rt.mark_dirty(surface, PROP_FIRST);
        }

        if let Some(g) = &guard {
            g.after_splice(self, &insert, &removed, at);
        }

        Ok(rt.seq(removed))
    }

    // ------------------------------------------------------------------
    // Mutators, all defined via the primitive
    // ------------------------------------------------------------------

    pub fn push(&self, value: Value) -> Result<(), RuntimeError> {
        let len = isize::try_from(self.len()).unwrap_or(isize::MAX);
        self.splice(len, 0, vec![value]).map(|_| ())
    }

    pub fn unshift(&self, value: Value) -> Result<(), RuntimeError> {
        self.splice(0, 0, vec![value]).map(|_| ())
    }

    pub fn pop(&self) -> Result<Option<Value>, RuntimeError> {
        if self.is_empty() {
            return Ok(None);
        }
        let removed = self.splice(-1, 1, Vec::new())?;

        Ok(removed.get(0))
    }

    pub fn shift(&self) -> Result<Option<Value>, RuntimeError> {
        if self.is_empty() {
            return Ok(None);
        }
        let removed = self.splice(0, 1, Vec::new())?;

        Ok(removed.get(0))
    }

    pub fn replace(&self, items: Vec<Value>) -> Result<(), RuntimeError> {
        let len = self.len();
        self.splice(0, len, items).map(|_| ())
    }

    pub fn clear(&self) -> Result<(), RuntimeError> {
        self.replace(Vec::new())
    }

    /// Remove the first occurrence of `value`. Returns whether anything
    /// was removed.
    pub fn remove(&self, value: &Value) -> Result<bool, RuntimeError> {
        let Some(index) = self.index_of(value) else {
            return Ok(false);
        };
        let index = isize::try_from(index).unwrap_or(isize::MAX);
        self.splice(index, 1, Vec::new())?;

        Ok(true)
    }

    /// Insert `value` at `index` (clamped to the end).
    pub fn insert(&self, index: usize, value: Value) -> Result<(), RuntimeError> {
        let index = isize::try_from(index).unwrap_or(isize::MAX);
        self.splice(index, 0, vec![value]).map(|_| ())
    }

    // ------------------------------------------------------------------
    // Derived operations: new instances, never mutate the receiver
    // ------------------------------------------------------------------

    pub fn map<F>(&self, f: F) -> Result<SeqRef, RuntimeError>
    where
        F: Fn(&Value) -> Value,
    {
        let rt = self.runtime()?;
        let out = self.0.items.borrow().iter().map(f).collect();

        Ok(rt.seq(out))
    }

    pub fn filter<F>(&self, pred: F) -> Result<SeqRef, RuntimeError>
    where
        F: Fn(&Value) -> bool,
    {
        let rt = self.runtime()?;
        let out = self
            .0
            .items
            .borrow()
            .iter()
            .filter(|v| pred(v))
            .cloned()
            .collect();

        Ok(rt.seq(out))
    }

    pub fn concat(&self, other: &SeqRef) -> Result<SeqRef, RuntimeError> {
        let rt = self.runtime()?;
        let mut out = self.to_vec();
        out.extend(other.to_vec());

        Ok(rt.seq(out))
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<SeqRef, RuntimeError> {
        let rt = self.runtime()?;
        let items = self.0.items.borrow();
        let end = end.min(items.len());
        let start = start.min(end);

        Ok(rt.seq(items[start..end].to_vec()))
    }

    /// One level of flattening: nested collections are inlined.
    pub fn flatten(&self) -> Result<SeqRef, RuntimeError> {
        let rt = self.runtime()?;
        let mut out = Vec::new();
        for value in self.0.items.borrow().iter() {
            match value {
                Value::Seq(nested) => out.extend(nested.to_vec()),
                other => out.push(other.clone()),
            }
        }

        Ok(rt.seq(out))
    }

    pub fn compact(&self) -> Result<SeqRef, RuntimeError> {
        self.filter(|v| !v.is_null())
    }

    pub fn unique(&self) -> Result<SeqRef, RuntimeError> {
        let rt = self.runtime()?;
        let mut out: Vec<Value> = Vec::new();
        for value in self.0.items.borrow().iter() {
            if !out.contains(value) {
                out.push(value.clone());
            }
        }

        Ok(rt.seq(out))
    }
}

// Membership proxy maintenance: entities and nested collections forward
// to the collection's proxy target under its prefix.
fn register_membership(value: &Value, target: &ObjRef, prefix: &str) {
    match value {
        Value::Obj(obj) => obj.add_proxy(target, prefix),
        Value::Seq(seq) => seq.surface().add_proxy(target, prefix),
        _ => {}
    }
}

fn deregister_membership(value: &Value, target: &ObjRef, prefix: &str) {
    match value {
        Value::Obj(obj) => obj.remove_proxy(target, prefix),
        Value::Seq(seq) => seq.surface().remove_proxy(target, prefix),
        _ => {}
    }
}
