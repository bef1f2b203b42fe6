//! The persistence collaborator contract and the lifecycle operations
//! built on it.
//!
//! Every mapper method is optional; an unimplemented method surfaces as a
//! synchronous configuration error at the call site. Settlement re-enters
//! the synchronous mutation path (busy flag, lifecycle state, error
//! folding) and schedules its own flush through the writes it performs.

use crate::session::{Session, SourceState, upgrade};
use serde_json::Value as Json;
use sinew_core::{
    defer::{Deferred, ErrorPayload},
    error::{ErrorOrigin, RuntimeError},
    object::ObjRef,
    value::Value,
};
use std::rc::Rc;

///
/// Mapper
///
/// External persistence collaborator. Success payloads are attribute
/// maps; failure payloads are a per-field message map or a single message.
///

pub trait Mapper {
    fn query(&self, session: &Session, type_name: &str, opts: &Json) -> Option<Deferred<Json>> {
        let _ = (session, type_name, opts);
        None
    }

    fn get(
        &self,
        session: &Session,
        type_name: &str,
        id: &Value,
        opts: &Json,
    ) -> Option<Deferred<Json>> {
        let _ = (session, type_name, id, opts);
        None
    }

    fn create(&self, session: &Session, entity: &ObjRef, opts: &Json) -> Option<Deferred<Json>> {
        let _ = (session, entity, opts);
        None
    }

    fn update(&self, session: &Session, entity: &ObjRef, opts: &Json) -> Option<Deferred<Json>> {
        let _ = (session, entity, opts);
        None
    }

    fn delete(&self, session: &Session, entity: &ObjRef, opts: &Json) -> Option<Deferred<Json>> {
        let _ = (session, entity, opts);
        None
    }
}

impl Session {
    fn malformed_mapper(op: &str, type_name: &str) -> RuntimeError {
        RuntimeError::config(
            ErrorOrigin::Mapper,
            format!("mapper does not implement '{op}' for '{type_name}'"),
        )
    }

    // Mutating persistence state while a call is in flight fails
    // synchronously.
    fn busy_guard(&self, obj: &ObjRef) -> Result<(), RuntimeError> {
        if self.is_busy(obj) {
            return Err(RuntimeError::conflict(
                ErrorOrigin::Mapper,
                format!("{obj} already has a persistence call in flight"),
            ));
        }

        Ok(())
    }

    /// Fetch one entity by identity: the existing instance is refreshed,
    /// a placeholder transitions from Empty to Loaded on success.
    pub fn fetch(
        &self,
        mapper: &dyn Mapper,
        type_name: &str,
        id: Value,
        opts: &Json,
    ) -> Result<Deferred<ObjRef>, RuntimeError> {
        let entity = self.resolve_ref(type_name, id.clone())?;
        if self.source_state(&entity) == SourceState::Deleted {
            return Err(RuntimeError::conflict(
                ErrorOrigin::Mapper,
                format!("cannot fetch deleted entity {entity}"),
            ));
        }
        self.busy_guard(&entity)?;

        self.set_busy(&entity, true);
        let Some(deferred) = mapper.get(self, type_name, &id, opts) else {
            self.set_busy(&entity, false);
            return Err(Self::malformed_mapper("get", type_name));
        };

        let out = Deferred::new();
        let weak = Rc::downgrade(&self.inner);
        let result = out.clone();
        let type_owned = type_name.to_string();
        deferred.subscribe(move |outcome| {
            let Ok(session) = upgrade(&weak) else {
                result.reject(ErrorPayload::message("session context has been released"));
                return;
            };
            session.set_busy(&entity, false);
            match outcome {
                Ok(payload) => match session.load(&type_owned, payload) {
                    Ok(loaded) => result.resolve(loaded),
                    Err(err) => result.reject(ErrorPayload::message(err.to_string())),
                },
                Err(payload) => {
                    session.fold_error_payload(&entity, payload);
                    result.reject(payload.clone());
                }
            }
        });

        Ok(out)
    }

    /// Persist an entity: `create` while New, `update` afterwards. A
    /// success payload is merged back in and transitions the entity to
    /// Loaded with a clean delta.
    pub fn save(
        &self,
        mapper: &dyn Mapper,
        obj: &ObjRef,
        opts: &Json,
    ) -> Result<Deferred<ObjRef>, RuntimeError> {
        if self.source_state(obj) == SourceState::Deleted {
            return Err(RuntimeError::conflict(
                ErrorOrigin::Mapper,
                format!("cannot save deleted entity {obj}"),
            ));
        }
        self.busy_guard(obj)?;

        self.set_busy(obj, true);
        let creating = self.source_state(obj) == SourceState::New;
        let maybe = if creating {
            mapper.create(self, obj, opts)
        } else {
            mapper.update(self, obj, opts)
        };
        let Some(deferred) = maybe else {
            self.set_busy(obj, false);
            let op = if creating { "create" } else { "update" };
            return Err(Self::malformed_mapper(op, obj.type_name()));
        };

        let out = Deferred::new();
        let weak = Rc::downgrade(&self.inner);
        let result = out.clone();
        let entity = obj.clone();
        deferred.subscribe(move |outcome| {
            let Ok(session) = upgrade(&weak) else {
                result.reject(ErrorPayload::message("session context has been released"));
                return;
            };
            session.set_busy(&entity, false);
            match outcome {
                Ok(payload) => match session.apply_save_payload(&entity, payload) {
                    Ok(()) => result.resolve(entity.clone()),
                    Err(err) => result.reject(ErrorPayload::message(err.to_string())),
                },
                Err(payload) => {
                    session.fold_error_payload(&entity, payload);
                    result.reject(payload.clone());
                }
            }
        });

        Ok(out)
    }

    /// Delete a New or Loaded entity. Success transitions it to Deleted
    /// and releases its identity.
    pub fn destroy(
        &self,
        mapper: &dyn Mapper,
        obj: &ObjRef,
        opts: &Json,
    ) -> Result<Deferred<ObjRef>, RuntimeError> {
        match self.source_state(obj) {
            SourceState::New | SourceState::Loaded => {}
            other => {
                return Err(RuntimeError::conflict(
                    ErrorOrigin::Mapper,
                    format!("cannot delete {obj} in state '{other}'"),
                ));
            }
        }
        self.busy_guard(obj)?;

        self.set_busy(obj, true);
        let Some(deferred) = mapper.delete(self, obj, opts) else {
            self.set_busy(obj, false);
            return Err(Self::malformed_mapper("delete", obj.type_name()));
        };

        let out = Deferred::new();
        let weak = Rc::downgrade(&self.inner);
        let result = out.clone();
        let entity = obj.clone();
        deferred.subscribe(move |outcome| {
            let Ok(session) = upgrade(&weak) else {
                result.reject(ErrorPayload::message("session context has been released"));
                return;
            };
            session.set_busy(&entity, false);
            match outcome {
                Ok(_) => {
                    session.set_source_state(&entity, SourceState::Deleted);
                    session.forget_identity(&entity);
                    result.resolve(entity.clone());
                }
                Err(payload) => {
                    session.fold_error_payload(&entity, payload);
                    result.reject(payload.clone());
                }
            }
        });

        Ok(out)
    }

    /// Query for a collection of entities; the success payload is an
    /// array of load payloads.
    pub fn query(
        &self,
        mapper: &dyn Mapper,
        type_name: &str,
        opts: &Json,
    ) -> Result<Deferred<Vec<ObjRef>>, RuntimeError> {
        self.resolved_of(type_name)?;
        let Some(deferred) = mapper.query(self, type_name, opts) else {
            return Err(Self::malformed_mapper("query", type_name));
        };

        let out = Deferred::new();
        let weak = Rc::downgrade(&self.inner);
        let result = out.clone();
        let type_owned = type_name.to_string();
        deferred.subscribe(move |outcome| {
            let Ok(session) = upgrade(&weak) else {
                result.reject(ErrorPayload::message("session context has been released"));
                return;
            };
            match outcome {
                Ok(payload) => {
                    let Some(items) = payload.as_array() else {
                        result.reject(ErrorPayload::message(format!(
                            "query payload for '{type_owned}' must be an array"
                        )));
                        return;
                    };
                    let mut loaded = Vec::with_capacity(items.len());
                    for item in items {
                        match session.load(&type_owned, item) {
                            Ok(obj) => loaded.push(obj),
                            Err(err) => {
                                result.reject(ErrorPayload::message(err.to_string()));
                                return;
                            }
                        }
                    }
                    result.resolve(loaded);
                }
                Err(payload) => result.reject(payload.clone()),
            }
        });

        Ok(out)
    }
}
