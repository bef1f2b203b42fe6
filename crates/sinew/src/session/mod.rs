//! The session context: model registry, identity map, per-entity model
//! state, and the declaration wiring that turns a `ModelSpec` into live
//! property descriptors.

pub mod assoc;
pub mod changes;
pub mod identity;
pub mod load;
pub mod mapper;
pub mod validate;


use crate::model::{
    AssocKind, AssocSpec, AttrSpec, ModelSpec, PROP_BUSY, PROP_CHANGES, PROP_DESTROY, PROP_ERRORS,
    PROP_HAS_CHANGES, PROP_HAS_ERRORS, PROP_HAS_OWN_CHANGES, PROP_HAS_OWN_ERRORS, PROP_ID,
    PROP_OWN_ERRORS, RESERVED_PROPS,
    coerce::{AttrParser, ParserTable},
};
use changes::DeltaEntry;
use identity::IdKey;
use sinew_core::{
    PATH_SEPARATOR,
    error::{ErrorOrigin, RuntimeError},
    object::{ObjRef, Oid},
    registry::PropSpec,
    runtime::Runtime,
    value::Value,
};
use derive_more::Display;
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::{Rc, Weak},
};

///
/// SourceState
///
/// Persistence lifecycle of one entity, transitioned by the mapper
/// collaborator's outcomes, never by the core itself.
///

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
pub enum SourceState {
    #[default]
    #[display("new")]
    New,
    #[display("empty")]
    Empty,
    #[display("loaded")]
    Loaded,
    #[display("deleted")]
    Deleted,
}

///
/// ModelState
///
/// Session-side bookkeeping for one entity: lifecycle, busy gate, change
/// delta, and accumulated validation errors.
///

#[derive(Default)]
pub(crate) struct ModelState {
    pub source: SourceState,
    pub busy: bool,
    pub delta: BTreeMap<String, DeltaEntry>,
    pub own_errors: BTreeMap<String, Vec<String>>,
}

///
/// ResolvedModel
///
/// A model spec with its parent chain materialized: inherited attributes
/// and associations are copied in at definition time, and the root
/// ancestor names the identity namespace shared by the whole hierarchy.
///

pub(crate) struct ResolvedModel {
    pub name: String,
    pub parent: Option<String>,
    pub root: String,
    pub attrs: Vec<AttrSpec>,
    pub assocs: Vec<AssocSpec>,
}

///
/// SessionInner
///

pub(crate) struct SessionInner {
    pub runtime: Runtime,
    pub models: RefCell<BTreeMap<String, Rc<ResolvedModel>>>,
    pub parsers: RefCell<ParserTable>,
    pub identity: RefCell<BTreeMap<(String, IdKey), ObjRef>>,
    pub states: RefCell<BTreeMap<Oid, ModelState>>,
    /// Non-zero while an inverse synchronization is applying, so the
    /// mutations it performs do not sync back (re-entrancy guard).
    pub sync_depth: Cell<u32>,
    /// Non-zero while a payload load is applying. Loaded state is clean
    /// by definition, so delta recording is suspended.
    pub load_depth: Cell<u32>,
}

///
/// Session
///
/// Injectable model-layer context. Owns the model registry, the identity
/// map, and all per-entity model state; every model operation goes
/// through here.
///

#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Rc<SessionInner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// Upgrade a weak session handle captured in a descriptor closure.
pub(crate) fn upgrade(weak: &Weak<SessionInner>) -> Result<Session, RuntimeError> {
    weak.upgrade().map(Session::from_inner).ok_or_else(|| {
        RuntimeError::config(ErrorOrigin::Model, "session context has been released")
    })
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(Runtime::new())
    }

    #[must_use]
    pub fn with_runtime(runtime: Runtime) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                runtime,
                models: RefCell::new(BTreeMap::new()),
                parsers: RefCell::new(ParserTable::new()),
                identity: RefCell::new(BTreeMap::new()),
                states: RefCell::new(BTreeMap::new()),
                sync_depth: Cell::new(0),
                load_depth: Cell::new(0),
            }),
        }
    }

    pub(crate) const fn from_inner(inner: Rc<SessionInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Register an external string-to-typed-value parser collaborator.
    pub fn register_parser<P>(&self, name: &str, parser: P)
    where
        P: AttrParser + 'static,
    {
        self.inner
            .parsers
            .borrow_mut()
            .insert(name.to_string(), Rc::new(parser));
    }

    // ------------------------------------------------------------------
    // Model registry
    // ------------------------------------------------------------------

    pub(crate) fn resolved_of(&self, name: &str) -> Result<Rc<ResolvedModel>, RuntimeError> {
        self.inner.models.borrow().get(name).cloned().ok_or_else(|| {
            RuntimeError::config(ErrorOrigin::Model, format!("model not defined: '{name}'"))
        })
    }

    #[must_use]
    pub fn has_model(&self, name: &str) -> bool {
        self.inner.models.borrow().contains_key(name)
    }

    /// Whether `name` names `ancestor` or one of its subclasses.
    #[must_use]
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        let mut current = name.to_string();
        loop {
            if current == ancestor {
                return true;
            }
            let parent = self
                .inner
                .models
                .borrow()
                .get(&current)
                .and_then(|m| m.parent.clone());
            match parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub(crate) fn root_of(&self, name: &str) -> Result<String, RuntimeError> {
        Ok(self.resolved_of(name)?.root.clone())
    }

    /// Define a model type, materializing inherited attributes and
    /// associations and wiring all property descriptors.
    pub fn define(&self, spec: ModelSpec) -> Result<(), RuntimeError> {
        let resolved = self.resolve(&spec)?;
        self.inner.runtime.define_type(&spec.name)?;
        self.declare_props(&resolved)?;
        self.inner
            .models
            .borrow_mut()
            .insert(spec.name.clone(), Rc::new(resolved));

        Ok(())
    }

    // Merge the parent chain and validate declaration invariants.
    fn resolve(&self, spec: &ModelSpec) -> Result<ResolvedModel, RuntimeError> {
        let (root, mut attrs, mut assocs) = match &spec.parent {
            None => (spec.name.clone(), Vec::new(), Vec::new()),
            Some(parent) => {
                let parent_model = self.resolved_of(parent).map_err(|_| {
                    RuntimeError::config(
                        ErrorOrigin::Model,
                        format!("unknown parent model '{parent}' for '{}'", spec.name),
                    )
                })?;
                (
                    parent_model.root.clone(),
                    parent_model.attrs.clone(),
                    parent_model.assocs.clone(),
                )
            }
        };

        for attr in &spec.attrs {
            Self::check_member_name(&spec.name, &attr.name)?;
            if spec.attrs.iter().filter(|a| a.name == attr.name).count() > 1
                || assocs.iter().any(|a| a.name == attr.name)
                || spec.assocs.iter().any(|a| a.name == attr.name)
            {
                return Err(RuntimeError::config(
                    ErrorOrigin::Model,
                    format!("duplicate member '{}' on model '{}'", attr.name, spec.name),
                ));
            }
            // an own attribute overrides an inherited one
            attrs.retain(|a| a.name != attr.name);
            attrs.push(attr.clone());
        }

        for assoc in &spec.assocs {
            Self::check_member_name(&spec.name, &assoc.name)?;
            if spec.assocs.iter().filter(|a| a.name == assoc.name).count() > 1
                || attrs.iter().any(|a| a.name == assoc.name)
            {
                return Err(RuntimeError::config(
                    ErrorOrigin::Model,
                    format!("duplicate member '{}' on model '{}'", assoc.name, spec.name),
                ));
            }
            assocs.retain(|a| a.name != assoc.name);
            assocs.push(assoc.clone());
        }

        Ok(ResolvedModel {
            name: spec.name.clone(),
            parent: spec.parent.clone(),
            root,
            attrs,
            assocs,
        })
    }

    fn check_member_name(model: &str, name: &str) -> Result<(), RuntimeError> {
        if RESERVED_PROPS.contains(&name) {
            return Err(RuntimeError::config(
                ErrorOrigin::Model,
                format!("member name '{name}' on model '{model}' is reserved"),
            ));
        }
        if name.contains(PATH_SEPARATOR) {
            return Err(RuntimeError::config(
                ErrorOrigin::Model,
                format!("member name '{name}' on model '{model}' contains a path separator"),
            ));
        }

        Ok(())
    }

    // Wire every property descriptor for a resolved model.
    fn declare_props(&self, model: &ResolvedModel) -> Result<(), RuntimeError> {
        let rt = &self.inner.runtime;
        let type_name = &model.name;

        // identity: write-once, registered in the identity map
        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::slot(PROP_ID)
                .with_setter(move |obj, value| upgrade(&weak)?.apply_id(obj, value)),
        )?;

        // session-maintained lifecycle surface
        rt.declare(
            type_name,
            PropSpec::slot(PROP_BUSY)
                .with_default(Value::Bool(false))
                .read_only(),
        )?;
        rt.declare(
            type_name,
            PropSpec::slot(PROP_DESTROY).with_default(Value::Bool(false)),
        )?;

        // attributes: slot-backed with delta bookkeeping on write
        for attr in &model.attrs {
            let weak = Rc::downgrade(&self.inner);
            let attr_name = attr.name.clone();
            rt.declare(
                type_name,
                PropSpec::slot(attr.name.clone())
                    .with_default(attr.default.clone())
                    .with_setter(move |obj, value| {
                        upgrade(&weak)?.write_attr(obj, &attr_name, value)
                    }),
            )?;
        }

        // associations
        for assoc in &model.assocs {
            match assoc.kind {
                AssocKind::HasOne => {
                    let weak = Rc::downgrade(&self.inner);
                    let assoc = Rc::new(assoc.clone());
                    rt.declare(
                        type_name,
                        PropSpec::slot(assoc.name.clone()).with_setter(move |obj, value| {
                            upgrade(&weak)?.apply_has_one(obj, &assoc, value, false)
                        }),
                    )?;
                }
                AssocKind::HasMany => {
                    let weak = Rc::downgrade(&self.inner);
                    let assoc = Rc::new(assoc.clone());
                    let name = assoc.name.clone();
                    rt.declare(
                        type_name,
                        PropSpec::derived(name, move |obj| {
                            let Ok(session) = upgrade(&weak) else {
                                return Value::Null;
                            };
                            match session.relation_seq(obj, &assoc) {
                                Ok(seq) => Value::Seq(seq),
                                Err(err) => {
                                    log::warn!("relation '{}' unavailable: {err}", assoc.name);
                                    Value::Null
                                }
                            }
                        }),
                    )?;
                }
            }
        }

        // change aggregation views; owned-association dirtying cascades
        // to the owner through proxy-forwarded names in these "on" lists
        let mut changes_on: Vec<String> = Vec::new();
        for attr in &model.attrs {
            changes_on.push(attr.name.clone());
        }
        for assoc in &model.assocs {
            match assoc.kind {
                AssocKind::HasOne => changes_on.push(assoc.name.clone()),
                AssocKind::HasMany => changes_on.push(format!("{}.changed", assoc.name)),
            }
            if assoc.owner {
                changes_on.push(format!("{}.{PROP_CHANGES}", assoc.name));
            }
        }

        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::derived(PROP_CHANGES, move |obj| {
                upgrade(&weak).map_or(Value::Null, |s| s.changes_value(obj))
            })
            .with_on(changes_on),
        )?;

        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::derived(PROP_HAS_CHANGES, move |obj| {
                upgrade(&weak).map_or(Value::Null, |s| s.has_changes_value(obj))
            })
            .with_on([PROP_CHANGES]),
        )?;

        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::derived(PROP_HAS_OWN_CHANGES, move |obj| {
                upgrade(&weak).map_or(Value::Null, |s| s.has_own_changes_value(obj))
            })
            .with_on([PROP_CHANGES]),
        )?;

        // validation aggregation views, mirroring the delta structure
        let mut errors_on: Vec<String> = vec![PROP_OWN_ERRORS.to_string()];
        for assoc in model.assocs.iter().filter(|a| a.owner) {
            match assoc.kind {
                AssocKind::HasOne => errors_on.push(assoc.name.clone()),
                AssocKind::HasMany => errors_on.push(format!("{}.changed", assoc.name)),
            }
            errors_on.push(format!("{}.{PROP_ERRORS}", assoc.name));
        }

        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::derived(PROP_OWN_ERRORS, move |obj| {
                upgrade(&weak).map_or(Value::Null, |s| s.own_errors_value(obj))
            }),
        )?;

        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::derived(PROP_ERRORS, move |obj| {
                upgrade(&weak).map_or(Value::Null, |s| s.errors_value(obj))
            })
            .with_on(errors_on),
        )?;

        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::derived(PROP_HAS_ERRORS, move |obj| {
                upgrade(&weak).map_or(Value::Null, |s| s.has_errors_value(obj))
            })
            .with_on([PROP_ERRORS]),
        )?;

        let weak = Rc::downgrade(&self.inner);
        rt.declare(
            type_name,
            PropSpec::derived(PROP_HAS_OWN_ERRORS, move |obj| {
                upgrade(&weak).map_or(Value::Null, |s| s.has_own_errors_value(obj))
            })
            .with_on([PROP_OWN_ERRORS]),
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Entity construction and state
    // ------------------------------------------------------------------

    /// Construct a new (unsaved) entity of a defined model type.
    pub fn create(&self, type_name: &str) -> Result<ObjRef, RuntimeError> {
        self.resolved_of(type_name)?;
        let obj = self.inner.runtime.spawn(type_name)?;
        self.inner
            .states
            .borrow_mut()
            .insert(obj.oid(), ModelState::default());

        Ok(obj)
    }

    pub(crate) fn with_state<R>(&self, oid: Oid, f: impl FnOnce(&mut ModelState) -> R) -> R {
        let mut states = self.inner.states.borrow_mut();
        f(states.entry(oid).or_default())
    }

    #[must_use]
    pub fn source_state(&self, obj: &ObjRef) -> SourceState {
        self.inner
            .states
            .borrow()
            .get(&obj.oid())
            .map_or(SourceState::New, |s| s.source)
    }

    pub(crate) fn set_source_state(&self, obj: &ObjRef, source: SourceState) {
        self.with_state(obj.oid(), |state| state.source = source);
    }

    #[must_use]
    pub fn is_busy(&self, obj: &ObjRef) -> bool {
        self.inner
            .states
            .borrow()
            .get(&obj.oid())
            .is_some_and(|s| s.busy)
    }

    pub(crate) fn set_busy(&self, obj: &ObjRef, busy: bool) {
        self.with_state(obj.oid(), |state| state.busy = busy);
        obj.write_slot(PROP_BUSY, Value::Bool(busy));
        if let Err(err) = obj.touch(PROP_BUSY) {
            log::warn!("busy flag notification failed on {obj}: {err}");
        }
    }

    /// Convenience truthy reads over the aggregation views.
    #[must_use]
    pub fn flag(&self, obj: &ObjRef, prop: &str) -> bool {
        obj.get(prop)
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}
