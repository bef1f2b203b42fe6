//! Change deltas and their recursive aggregation through owned
//! associations.
//!
//! Delta entries self-delete once the live value equals the recorded
//! original, so a write-and-revert burst leaves no trace.


use crate::{
    model::{AssocKind, PROP_CHANGES},
    session::Session,
};
use sinew_core::{
    error::RuntimeError,
    object::{ObjRef, Oid},
    value::Value,
};
use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};

///
/// DeltaEntry
///
/// Per-name record of what changed since the last commit: the previous
/// value for scalars and hasOne relations, added/removed sets for owned
/// hasMany relations.
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum DeltaEntry {
    Prev(Value),
    Sets { added: Vec<Value>, removed: Vec<Value> },
}

impl Session {
    // Attribute write path: record the delta, then write the slot.
    pub(crate) fn write_attr(
        &self,
        obj: &ObjRef,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let old = obj.get(name)?;
        self.record_scalar_delta(obj, name, &old, &value);
        obj.write_slot(name, value);

        Ok(())
    }

    /// Run `f` with delta recording suspended: loaded state is clean by
    /// definition.
    pub(crate) fn load_scope<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.inner.load_depth.set(self.inner.load_depth.get() + 1);
        let out = f(self);
        self.inner.load_depth.set(self.inner.load_depth.get() - 1);

        out
    }

    // Scalar delta bookkeeping: first divergence records the original,
    // returning to the original clears the entry.
    pub(crate) fn record_scalar_delta(&self, obj: &ObjRef, name: &str, old: &Value, new: &Value) {
        if self.inner.load_depth.get() > 0 {
            return;
        }
        self.with_state(obj.oid(), |state| match state.delta.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                if new != old {
                    entry.insert(DeltaEntry::Prev(old.clone()));
                }
            }
            Entry::Occupied(entry) => {
                if let DeltaEntry::Prev(original) = entry.get() {
                    if original == new {
                        entry.remove();
                    }
                }
            }
        });
    }

    // Owned hasMany delta fold with set-cancellation: removing a
    // recorded addition un-adds it, re-adding a recorded removal
    // un-removes it, and an empty pair deletes the entry.
    pub(crate) fn fold_many_delta(
        &self,
        owner: &ObjRef,
        assoc_name: &str,
        inserted: &[Value],
        removed: &[Value],
    ) {
        if self.inner.load_depth.get() > 0 {
            return;
        }
        self.with_state(owner.oid(), |state| {
            let drained = {
                let entry = state
                    .delta
                    .entry(assoc_name.to_string())
                    .or_insert_with(|| DeltaEntry::Sets {
                        added: Vec::new(),
                        removed: Vec::new(),
                    });
                let DeltaEntry::Sets {
                    added,
                    removed: recorded_removed,
                } = entry
                else {
                    return;
                };

                for value in removed {
                    if let Some(at) = added.iter().position(|v| v == value) {
                        added.remove(at);
                    } else {
                        recorded_removed.push(value.clone());
                    }
                }
                for value in inserted {
                    if let Some(at) = recorded_removed.iter().position(|v| v == value) {
                        recorded_removed.remove(at);
                    } else {
                        added.push(value.clone());
                    }
                }

                added.is_empty() && recorded_removed.is_empty()
            };
            if drained {
                state.delta.remove(assoc_name);
            }
        });
    }

    /// Clear the recorded delta (commit point) and notify the views.
    pub(crate) fn clear_delta(&self, obj: &ObjRef) {
        self.with_state(obj.oid(), |state| state.delta.clear());
        if let Err(err) = obj.touch(PROP_CHANGES) {
            log::warn!("change view notification failed on {obj}: {err}");
        }
    }

    // ------------------------------------------------------------------
    // Aggregation views
    // ------------------------------------------------------------------

    /// The entity's own delta merged recursively with the deltas of every
    /// owned related entity, keyed with path prefixes.
    #[must_use]
    pub(crate) fn changes_value(&self, obj: &ObjRef) -> Value {
        let mut visited = BTreeSet::new();

        Value::Map(self.collect_changes(obj, &mut visited))
    }

    #[must_use]
    pub(crate) fn has_changes_value(&self, obj: &ObjRef) -> Value {
        let mut visited = BTreeSet::new();

        Value::Bool(!self.collect_changes(obj, &mut visited).is_empty())
    }

    #[must_use]
    pub(crate) fn has_own_changes_value(&self, obj: &ObjRef) -> Value {
        Value::Bool(self.with_state(obj.oid(), |state| !state.delta.is_empty()))
    }

    // Recursive aggregation, guarded against ownership cycles by a
    // per-traversal visited set.
    fn collect_changes(&self, obj: &ObjRef, visited: &mut BTreeSet<Oid>) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        if !visited.insert(obj.oid()) {
            return out;
        }

        let delta = self.with_state(obj.oid(), |state| state.delta.clone());
        let rt = self.runtime().clone();
        for (name, entry) in delta {
            match entry {
                DeltaEntry::Prev(previous) => {
                    out.insert(name, previous);
                }
                DeltaEntry::Sets { added, removed } => {
                    let mut sets = BTreeMap::new();
                    sets.insert("added".to_string(), Value::Seq(rt.seq(added)));
                    sets.insert("removed".to_string(), Value::Seq(rt.seq(removed)));
                    out.insert(name, Value::Map(sets));
                }
            }
        }

        let Ok(model) = self.resolved_of(obj.type_name()) else {
            return out;
        };
        for assoc in model.assocs.iter().filter(|a| a.owner) {
            match assoc.kind {
                AssocKind::HasOne => {
                    if let Some(Value::Obj(child)) = obj.read_slot(&assoc.name) {
                        for (name, value) in self.collect_changes(&child, visited) {
                            out.insert(format!("{}.{name}", assoc.name), value);
                        }
                    }
                }
                AssocKind::HasMany => {
                    if let Some(Value::Seq(seq)) = obj.read_slot(&assoc.name) {
                        for (index, item) in seq.to_vec().iter().enumerate() {
                            if let Value::Obj(child) = item {
                                for (name, value) in self.collect_changes(child, visited) {
                                    out.insert(format!("{}.{index}.{name}", assoc.name), value);
                                }
                            }
                        }
                    }
                }
            }
        }

        out
    }
}
