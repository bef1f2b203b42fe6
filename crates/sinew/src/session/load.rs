//! Payload loading: identity-map upserts, nested association payloads,
//! bare-identifier references, suffixed alias keys, and attribute
//! serialization back out.

use crate::{
    model::{
        AssocKind, AssocSpec, PROP_ID,
        coerce::{coerce, json_to_value, value_to_json},
    },
    session::{Session, SourceState},
};
use serde_json::Value as Json;
use sinew_core::{
    error::{ErrorOrigin, RuntimeError},
    object::ObjRef,
    value::Value,
};

impl Session {
    /// Upsert an entity from a flat attribute payload.
    ///
    /// `id` is required. If the identity is live, the existing instance
    /// is mutated and returned; otherwise a new one is created. A
    /// successful load is a commit point: the delta and local errors of
    /// the previous epoch are cleared (coercion failures recorded during
    /// this load survive).
    pub fn load(&self, type_name: &str, payload: &Json) -> Result<ObjRef, RuntimeError> {
        self.resolved_of(type_name)?;
        let map = payload.as_object().ok_or_else(|| {
            RuntimeError::config(
                ErrorOrigin::Model,
                format!("load payload for '{type_name}' must be an object"),
            )
        })?;
        let id_raw = map.get(PROP_ID).ok_or_else(|| {
            RuntimeError::config(
                ErrorOrigin::Model,
                format!("load payload for '{type_name}' is missing 'id'"),
            )
        })?;
        let id_value = json_to_value(id_raw)
            .map_err(|err| RuntimeError::config(ErrorOrigin::Model, err))?;

        let obj = match self.find(type_name, &id_value) {
            Some(existing) => existing,
            None => {
                let created = self.create(type_name)?;
                created.set(PROP_ID, id_value)?;
                created
            }
        };

        self.clear_errors(&obj);
        self.load_scope(|s| s.apply_payload(&obj, map))?;
        self.set_source_state(&obj, SourceState::Loaded);
        self.clear_delta(&obj);

        Ok(obj)
    }

    // Apply every recognized payload key; undeclared keys are ignored
    // with a diagnostic (mapper payloads routinely over-fetch).
    pub(crate) fn apply_payload(
        &self,
        obj: &ObjRef,
        map: &serde_json::Map<String, Json>,
    ) -> Result<(), RuntimeError> {
        let model = self.resolved_of(obj.type_name())?;
        let parsers = self.inner.parsers.borrow().clone();

        'keys: for (key, raw) in map {
            if key == PROP_ID {
                continue;
            }

            if let Some(attr) = model.attrs.iter().find(|a| a.name == *key) {
                match coerce(&attr.kind, raw, &parsers) {
                    Ok(value) => {
                        obj.write_slot(&attr.name, value);
                        obj.touch(&attr.name)?;
                    }
                    Err(message) => self.add_error(obj, &attr.name, message),
                }
                continue;
            }

            if let Some(assoc) = model.assocs.iter().find(|a| a.name == *key) {
                self.apply_assoc_payload(obj, assoc, raw)?;
                continue;
            }

            // suffixed alias keys carry bare identifiers
            for assoc in &model.assocs {
                let matches = match assoc.kind {
                    AssocKind::HasOne => {
                        *key == format!("{}Id", assoc.name) || *key == format!("{}_id", assoc.name)
                    }
                    AssocKind::HasMany => {
                        let singular =
                            assoc.name.strip_suffix('s').unwrap_or(assoc.name.as_str());
                        *key == format!("{singular}Ids") || *key == format!("{singular}_ids")
                    }
                };
                if matches {
                    self.apply_assoc_payload(obj, assoc, raw)?;
                    continue 'keys;
                }
            }

            log::debug!(
                "ignoring undeclared load key '{key}' on '{}'",
                obj.type_name()
            );
        }

        Ok(())
    }

    fn apply_assoc_payload(
        &self,
        obj: &ObjRef,
        assoc: &AssocSpec,
        raw: &Json,
    ) -> Result<(), RuntimeError> {
        match assoc.kind {
            AssocKind::HasOne => {
                let value = self.resolve_assoc_value(&assoc.target, raw)?;
                self.apply_has_one(obj, assoc, value, false)?;
                obj.touch(&assoc.name)?;
            }
            AssocKind::HasMany => {
                let seq = self.relation_seq(obj, assoc)?;
                match raw {
                    Json::Null => {
                        seq.clear()?;
                    }
                    Json::Array(items) => {
                        let mut values = Vec::with_capacity(items.len());
                        for item in items {
                            match self.resolve_assoc_value(&assoc.target, item)? {
                                Value::Null => {}
                                value => values.push(value),
                            }
                        }
                        seq.replace(values)?;
                    }
                    other => {
                        return Err(RuntimeError::type_mismatch(
                            ErrorOrigin::Model,
                            format!(
                                "association '{}' expects an array payload, got {other}",
                                assoc.name
                            ),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    // A nested payload loads recursively; a bare identifier resolves to an
    // existing instance or a placeholder pending fetch.
    fn resolve_assoc_value(&self, target: &str, raw: &Json) -> Result<Value, RuntimeError> {
        match raw {
            Json::Null => Ok(Value::Null),
            Json::Object(_) => self.load(target, raw).map(Value::Obj),
            _ => {
                let id = json_to_value(raw)
                    .map_err(|err| RuntimeError::config(ErrorOrigin::Model, err))?;
                self.resolve_ref(target, id).map(Value::Obj)
            }
        }
    }

    /// Serialized attribute payload: declared attributes plus `id` when
    /// assigned. Associations are not included.
    pub fn attrs(&self, obj: &ObjRef) -> Result<Json, RuntimeError> {
        let model = self.resolved_of(obj.type_name())?;

        let mut out = serde_json::Map::new();
        if let Some(id) = obj.read_slot(PROP_ID) {
            if !id.is_null() {
                out.insert(PROP_ID.to_string(), value_to_json(&id));
            }
        }
        for attr in &model.attrs {
            out.insert(attr.name.clone(), value_to_json(&obj.get(&attr.name)?));
        }

        Ok(Json::Object(out))
    }

    // Fold a save-success payload back in. Server-assigned identities
    // are adopted; everything else merges like a load.
    pub(crate) fn apply_save_payload(
        &self,
        obj: &ObjRef,
        payload: &Json,
    ) -> Result<(), RuntimeError> {
        self.clear_errors(obj);
        if let Some(map) = payload.as_object() {
            if let Some(id_raw) = map.get(PROP_ID) {
                let current = obj.read_slot(PROP_ID).unwrap_or_default();
                if current.is_null() {
                    let id_value = json_to_value(id_raw)
                        .map_err(|err| RuntimeError::config(ErrorOrigin::Model, err))?;
                    obj.set(PROP_ID, id_value)?;
                }
            }
            self.load_scope(|s| s.apply_payload(obj, map))?;
        }
        self.set_source_state(obj, SourceState::Loaded);
        self.clear_delta(obj);

        Ok(())
    }
}
