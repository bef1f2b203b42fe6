//! Validation errors: local accumulation and recursive aggregation
//! through owned associations, mirroring the change-delta structure.
//!
//! Domain validation never raises; callers inspect the aggregation views.

use crate::{
    model::{AssocKind, PROP_DESTROY, PROP_OWN_ERRORS},
    session::Session,
};
use sinew_core::{
    defer::ErrorPayload,
    error::RuntimeError,
    object::{ObjRef, Oid},
    value::Value,
};
use std::collections::{BTreeMap, BTreeSet};

impl Session {
    /// Record a validation error against one name.
    pub fn add_error(&self, obj: &ObjRef, name: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_state(obj.oid(), |state| {
            state
                .own_errors
                .entry(name.to_string())
                .or_default()
                .push(message);
        });
        self.touch_errors(obj);
    }

    /// Clear all locally accumulated errors.
    pub fn clear_errors(&self, obj: &ObjRef) {
        self.with_state(obj.oid(), |state| state.own_errors.clear());
        self.touch_errors(obj);
    }

    /// Re-run the declared attribute validators, replacing the local
    /// error set. Returns whether the entity is locally valid.
    pub fn validate(&self, obj: &ObjRef) -> Result<bool, RuntimeError> {
        let model = self.resolved_of(obj.type_name())?;

        self.with_state(obj.oid(), |state| state.own_errors.clear());
        for attr in &model.attrs {
            let Some(validator) = &attr.validator else {
                continue;
            };
            let value = obj.get(&attr.name)?;
            if let Err(message) = validator(&value) {
                self.with_state(obj.oid(), |state| {
                    state
                        .own_errors
                        .entry(attr.name.clone())
                        .or_default()
                        .push(message);
                });
            }
        }
        self.touch_errors(obj);

        Ok(self.with_state(obj.oid(), |state| state.own_errors.is_empty()))
    }

    /// Fold a mapper failure payload into the local error set: a bare
    /// message lands under "base", field maps land per field.
    pub(crate) fn fold_error_payload(&self, obj: &ObjRef, payload: &ErrorPayload) {
        self.with_state(obj.oid(), |state| match payload {
            ErrorPayload::Message(message) => {
                state
                    .own_errors
                    .entry("base".to_string())
                    .or_default()
                    .push(message.clone());
            }
            ErrorPayload::Fields(fields) => {
                for (name, messages) in fields {
                    state
                        .own_errors
                        .entry(name.clone())
                        .or_default()
                        .extend(messages.iter().cloned());
                }
            }
        });
        self.touch_errors(obj);
    }

    fn touch_errors(&self, obj: &ObjRef) {
        if let Err(err) = obj.touch(PROP_OWN_ERRORS) {
            log::warn!("error view notification failed on {obj}: {err}");
        }
    }

    // ------------------------------------------------------------------
    // Aggregation views
    // ------------------------------------------------------------------

    #[must_use]
    pub(crate) fn own_errors_value(&self, obj: &ObjRef) -> Value {
        let errors = self.with_state(obj.oid(), |state| state.own_errors.clone());

        self.errors_to_value(errors)
    }

    #[must_use]
    pub(crate) fn errors_value(&self, obj: &ObjRef) -> Value {
        let mut visited = BTreeSet::new();

        self.errors_to_value(self.collect_errors(obj, &mut visited))
    }

    #[must_use]
    pub(crate) fn has_errors_value(&self, obj: &ObjRef) -> Value {
        let mut visited = BTreeSet::new();

        Value::Bool(!self.collect_errors(obj, &mut visited).is_empty())
    }

    #[must_use]
    pub(crate) fn has_own_errors_value(&self, obj: &ObjRef) -> Value {
        Value::Bool(self.with_state(obj.oid(), |state| !state.own_errors.is_empty()))
    }

    fn errors_to_value(&self, errors: BTreeMap<String, Vec<String>>) -> Value {
        let rt = self.runtime().clone();
        let mut out = BTreeMap::new();
        for (name, messages) in errors {
            let messages = messages.into_iter().map(Value::Text).collect();
            out.insert(name, Value::Seq(rt.seq(messages)));
        }

        Value::Map(out)
    }

    // Recursive aggregation over owned relations. Entities flagged for
    // destruction contribute nothing, without suppressing validation
    // elsewhere.
    fn collect_errors(
        &self,
        obj: &ObjRef,
        visited: &mut BTreeSet<Oid>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        if !visited.insert(obj.oid()) {
            return out;
        }
        if obj.read_slot(PROP_DESTROY) == Some(Value::Bool(true)) {
            return out;
        }

        out.extend(self.with_state(obj.oid(), |state| state.own_errors.clone()));

        let Ok(model) = self.resolved_of(obj.type_name()) else {
            return out;
        };
        for assoc in model.assocs.iter().filter(|a| a.owner) {
            match assoc.kind {
                AssocKind::HasOne => {
                    if let Some(Value::Obj(child)) = obj.read_slot(&assoc.name) {
                        for (name, messages) in self.collect_errors(&child, visited) {
                            out.insert(format!("{}.{name}", assoc.name), messages);
                        }
                    }
                }
                AssocKind::HasMany => {
                    if let Some(Value::Seq(seq)) = obj.read_slot(&assoc.name) {
                        for (index, item) in seq.to_vec().iter().enumerate() {
                            if let Value::Obj(child) = item {
                                for (name, messages) in self.collect_errors(child, visited) {
                                    out.insert(
                                        format!("{}.{index}.{name}", assoc.name),
                                        messages,
                                    );
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
