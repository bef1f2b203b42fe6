//! Association runtime: hasOne assignment, lazily constructed hasMany
//! relation collections, bidirectional inverse synchronization, and the
//! splice guard that ties relation collections back to their owner.

use crate::{
    model::{AssocKind, AssocSpec},
    session::{Session, SessionInner, upgrade},
};
use sinew_core::{
    error::{ErrorOrigin, RuntimeError},
    object::{ObjRef, WeakObj},
    seq::{SeqRef, SpliceGuard},
    value::Value,
};
use std::rc::{Rc, Weak};

impl Session {
    // Structural hasOne assignment: runtime type validation, proxy swap,
    // delta bookkeeping, and inverse synchronization. Dirty-marking is
    // the caller's concern (the descriptor write path does it; internal
    // callers touch explicitly).
    pub(crate) fn apply_has_one(
        &self,
        obj: &ObjRef,
        assoc: &AssocSpec,
        value: Value,
        from_inverse: bool,
    ) -> Result<(), RuntimeError> {
        let new_obj = match &value {
            Value::Null => None,
            Value::Obj(target) if self.is_a(target.type_name(), &assoc.target) => {
                Some(target.clone())
            }
            other => {
                return Err(RuntimeError::type_mismatch(
                    ErrorOrigin::Model,
                    format!(
                        "association '{}' expects '{}', got {}",
                        assoc.name, assoc.target, other.tag()
                    ),
                ));
            }
        };

        let old_value = obj.read_slot(&assoc.name).unwrap_or_default();
        let old_obj = old_value.as_obj().cloned();

        // the previous value's proxy relation is deregistered on swap
        if let Some(old) = &old_obj {
            old.remove_proxy(obj, &assoc.name);
        }
        if let Some(new) = &new_obj {
            new.add_proxy(obj, &assoc.name);
        }

        self.record_scalar_delta(obj, &assoc.name, &old_value, &value);
        obj.write_slot(&assoc.name, value);

        let syncing = from_inverse || self.inner.sync_depth.get() > 0;
        if !syncing {
            if let Some(inverse) = assoc.inverse.clone() {
                self.sync_scope(|s| {
                    if let Some(old) = &old_obj {
                        s.remove_from_inverse(old, &inverse, obj)?;
                    }
                    if let Some(new) = &new_obj {
                        s.add_to_inverse(new, &inverse, obj)?;
                    }
                    Ok::<(), RuntimeError>(())
                })?;
            }
        }

        Ok(())
    }

    /// The lazily constructed relation collection backing a hasMany
    /// association.
    pub(crate) fn relation_seq(
        &self,
        obj: &ObjRef,
        assoc: &AssocSpec,
    ) -> Result<SeqRef, RuntimeError> {
        if let Some(Value::Seq(seq)) = obj.read_slot(&assoc.name) {
            return Ok(seq);
        }

        let seq = self.runtime().seq(Vec::new());
        seq.set_proxy(obj, &assoc.name);
        seq.set_guard(Some(Rc::new(RelationGuard {
            session: Rc::downgrade(&self.inner),
            owner: obj.downgrade(),
            assoc: Rc::new(assoc.clone()),
        })));
        obj.write_slot(&assoc.name, Value::Seq(seq.clone()));

        Ok(seq)
    }

    /// Public accessor for a hasMany relation collection.
    pub fn relation(&self, obj: &ObjRef, name: &str) -> Result<SeqRef, RuntimeError> {
        let model = self.resolved_of(obj.type_name())?;
        let assoc = model
            .assocs
            .iter()
            .find(|a| a.name == name && a.kind == AssocKind::HasMany)
            .ok_or_else(|| {
                RuntimeError::config(
                    ErrorOrigin::Model,
                    format!("no hasMany association '{name}' on '{}'", obj.type_name()),
                )
            })?;

        self.relation_seq(obj, assoc)
    }

    // Run `f` with the re-entrancy guard held: mutations applied inside
    // never trigger their own inverse synchronization.
    pub(crate) fn sync_scope<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.inner.sync_depth.set(self.inner.sync_depth.get() + 1);
        let out = f(self);
        self.inner.sync_depth.set(self.inner.sync_depth.get() - 1);

        out
    }

    fn inverse_assoc(
        &self,
        target: &ObjRef,
        inverse: &str,
    ) -> Result<AssocSpec, RuntimeError> {
        let model = self.resolved_of(target.type_name())?;
        model
            .assocs
            .iter()
            .find(|a| a.name == inverse)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::config(
                    ErrorOrigin::Model,
                    format!(
                        "unknown inverse association '{inverse}' on '{}'",
                        target.type_name()
                    ),
                )
            })
    }

    // Remove `obj` from `target.inverse`.
    pub(crate) fn remove_from_inverse(
        &self,
        target: &ObjRef,
        inverse: &str,
        obj: &ObjRef,
    ) -> Result<(), RuntimeError> {
        let inv = self.inverse_assoc(target, inverse)?;
        match inv.kind {
            AssocKind::HasOne => {
                let current = target.read_slot(&inv.name);
                if current == Some(Value::Obj(obj.clone())) {
                    self.apply_has_one(target, &inv, Value::Null, true)?;
                    target.touch(&inv.name)?;
                }
            }
            AssocKind::HasMany => {
                let seq = self.relation_seq(target, &inv)?;
                seq.remove(&Value::Obj(obj.clone()))?;
            }
        }

        Ok(())
    }

    // Add `obj` to `target.inverse`.
    pub(crate) fn add_to_inverse(
        &self,
        target: &ObjRef,
        inverse: &str,
        obj: &ObjRef,
    ) -> Result<(), RuntimeError> {
        let inv = self.inverse_assoc(target, inverse)?;
        match inv.kind {
            AssocKind::HasOne => {
                let current = target.read_slot(&inv.name);
                if current != Some(Value::Obj(obj.clone())) {
                    self.apply_has_one(target, &inv, Value::Obj(obj.clone()), true)?;
                    target.touch(&inv.name)?;
                }
            }
            AssocKind::HasMany => {
                let seq = self.relation_seq(target, &inv)?;
                if !seq.contains(&Value::Obj(obj.clone())) {
                    seq.push(Value::Obj(obj.clone()))?;
                }
            }
        }

        Ok(())
    }
}

///
/// RelationGuard
///
/// Installed on every relation collection: validates inserted element
/// types before mutation, then synchronizes inverses and folds the
/// owner's delta after.
///

struct RelationGuard {
    session: Weak<SessionInner>,
    owner: WeakObj,
    assoc: Rc<AssocSpec>,
}

impl SpliceGuard for RelationGuard {
    fn before_splice(&self, _seq: &SeqRef, inserted: &[Value]) -> Result<(), RuntimeError> {
        let session = upgrade(&self.session)?;
        for value in inserted {
            match value {
                Value::Obj(target) if session.is_a(target.type_name(), &self.assoc.target) => {}
                other => {
                    return Err(RuntimeError::type_mismatch(
                        ErrorOrigin::Model,
                        format!(
                            "association '{}' expects '{}' elements, got {}",
                            self.assoc.name,
                            self.assoc.target,
                            other.tag()
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    fn after_splice(&self, _seq: &SeqRef, inserted: &[Value], removed: &[Value], _index: usize) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        let session = Session::from_inner(inner);
        let Some(owner) = self.owner.upgrade() else {
            return;
        };

        if session.inner.sync_depth.get() == 0 {
            if let Some(inverse) = self.assoc.inverse.clone() {
                let outcome = session.sync_scope(|s| {
                    for value in removed {
                        if let Value::Obj(element) = value {
                            s.remove_from_inverse(element, &inverse, &owner)?;
                        }
                    }
                    for value in inserted {
                        if let Value::Obj(element) = value {
                            s.add_to_inverse(element, &inverse, &owner)?;
                        }
                    }
                    Ok::<(), RuntimeError>(())
                });
                if let Err(err) = outcome {
                    log::warn!(
                        "inverse synchronization failed for '{}': {err}",
                        self.assoc.name
                    );
                }
            }
        }

        if self.assoc.owner {
            session.fold_many_delta(&owner, &self.assoc.name, inserted, removed);
        }
    }
}
