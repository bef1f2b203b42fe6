//! Identity invariants and the identity map.
//!
//! Invariants:
//! - An identity, once assigned, never changes.
//! - At most one live entity per (root type, identity).
//! - Subclasses share their root ancestor's identity namespace.

use crate::{
    model::PROP_ID,
    session::{Session, SourceState},
};
use sinew_core::{
    error::{ErrorOrigin, RuntimeError},
    object::ObjRef,
    value::Value,
};

///
/// IdKey
///
/// Canonical identity key. Identities are scalar: integers or text.
///

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum IdKey {
    Int(i64),
    Uint(u64),
    Text(String),
}

impl IdKey {
    pub fn try_from_value(value: &Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Int(v) => Ok(Self::Int(*v)),
            Value::Uint(v) => Ok(Self::Uint(*v)),
            Value::Text(v) => Ok(Self::Text(v.clone())),
            other => Err(RuntimeError::type_mismatch(
                ErrorOrigin::Identity,
                format!("identity must be an integer or text, got {}", other.tag()),
            )),
        }
    }
}

impl Session {
    // Write-once identity assignment; first assignment registers the
    // entity in the identity map.
    pub(crate) fn apply_id(&self, obj: &ObjRef, value: Value) -> Result<(), RuntimeError> {
        let key = IdKey::try_from_value(&value)?;

        if let Some(existing) = obj.read_slot(PROP_ID) {
            if !existing.is_null() {
                if existing == value {
                    return Ok(());
                }
                return Err(RuntimeError::config(
                    ErrorOrigin::Identity,
                    format!("identity already assigned on {obj}"),
                ));
            }
        }

        let root = self.root_of(obj.type_name())?;
        {
            let mut identity = self.inner.identity.borrow_mut();
            if identity.contains_key(&(root.clone(), key.clone())) {
                return Err(RuntimeError::conflict(
                    ErrorOrigin::Identity,
                    format!("duplicate identity: {root}/{value}"),
                ));
            }
            identity.insert((root, key), obj.clone());
        }
        obj.write_slot(PROP_ID, value);

        Ok(())
    }

    /// Look up the live entity for (type, id), if any. Lookup goes
    /// through the root ancestor's identity namespace.
    #[must_use]
    pub fn find(&self, type_name: &str, id: &Value) -> Option<ObjRef> {
        let root = self.root_of(type_name).ok()?;
        let key = IdKey::try_from_value(id).ok()?;

        self.inner.identity.borrow().get(&(root, key)).cloned()
    }

    /// Resolve a bare identity reference: the existing instance if
    /// present, else a placeholder pending fetch.
    pub fn resolve_ref(&self, type_name: &str, id: Value) -> Result<ObjRef, RuntimeError> {
        if let Some(existing) = self.find(type_name, &id) {
            return Ok(existing);
        }

        let placeholder = self.create(type_name)?;
        self.set_source_state(&placeholder, SourceState::Empty);
        placeholder.set(PROP_ID, id)?;

        Ok(placeholder)
    }

    pub(crate) fn forget_identity(&self, obj: &ObjRef) {
        let Some(id) = obj.read_slot(PROP_ID) else {
            return;
        };
        let Ok(root) = self.root_of(obj.type_name()) else {
            return;
        };
        let Ok(key) = IdKey::try_from_value(&id) else {
            return;
        };
        self.inner.identity.borrow_mut().remove(&(root, key));
    }
}
