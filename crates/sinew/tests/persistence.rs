mod common;

use common::billing_session;
use serde_json::{Value as Json, json};
use sinew::prelude::*;
use std::{cell::RefCell, rc::Rc};

/// Records every call and hands the settlement back to the test.
#[derive(Default)]
struct TestMapper {
    pending: RefCell<Vec<(String, Deferred<Json>)>>,
}

impl TestMapper {
    fn issue(&self, op: &str) -> Option<Deferred<Json>> {
        let deferred = Deferred::new();
        self.pending
            .borrow_mut()
            .push((op.to_string(), deferred.clone()));

        Some(deferred)
    }

    fn take(&self, op: &str) -> Deferred<Json> {
        let mut pending = self.pending.borrow_mut();
        let at = pending
            .iter()
            .position(|(name, _)| name == op)
            .unwrap_or_else(|| panic!("no pending '{op}' call"));

        pending.remove(at).1
    }
}

impl Mapper for TestMapper {
    fn query(&self, _: &Session, _: &str, _: &Json) -> Option<Deferred<Json>> {
        self.issue("query")
    }

    fn get(&self, _: &Session, _: &str, _: &Value, _: &Json) -> Option<Deferred<Json>> {
        self.issue("get")
    }

    fn create(&self, _: &Session, _: &ObjRef, _: &Json) -> Option<Deferred<Json>> {
        self.issue("create")
    }

    fn update(&self, _: &Session, _: &ObjRef, _: &Json) -> Option<Deferred<Json>> {
        self.issue("update")
    }

    fn delete(&self, _: &Session, _: &ObjRef, _: &Json) -> Option<Deferred<Json>> {
        self.issue("delete")
    }
}

/// Implements nothing: every operation is a configuration error.
struct BareMapper;

impl Mapper for BareMapper {}

#[test]
fn saving_a_new_entity_creates_and_adopts_the_identity() {
    let session = billing_session();
    let mapper = TestMapper::default();
    let invoice = session.create("invoice").unwrap();
    invoice.set("number", Value::from("INV-1")).unwrap();

    let saved = session.save(&mapper, &invoice, &json!({})).unwrap();
    assert!(session.is_busy(&invoice));
    assert!(!saved.is_settled());

    mapper.take("create").resolve(json!({"id": 5}));

    assert!(!session.is_busy(&invoice));
    assert_eq!(session.source_state(&invoice), SourceState::Loaded);
    assert_eq!(invoice.get(PROP_ID).unwrap(), Value::Int(5));
    assert_eq!(session.find("invoice", &Value::Int(5)), Some(invoice.clone()));
    assert!(!session.flag(&invoice, PROP_HAS_CHANGES), "save commits");
    assert_eq!(saved.peek().as_deref(), Some(&Ok(invoice)));
}

#[test]
fn saving_a_loaded_entity_updates() {
    let session = billing_session();
    let mapper = TestMapper::default();
    let invoice = common::loaded_invoice(&session);
    invoice.set("number", Value::from("INV-2")).unwrap();

    session.save(&mapper, &invoice, &json!({})).unwrap();
    mapper.take("update").resolve(json!({}));

    assert_eq!(session.source_state(&invoice), SourceState::Loaded);
    assert!(!session.flag(&invoice, PROP_HAS_CHANGES));
}

#[test]
fn persistence_calls_are_gated_while_busy() {
    let session = billing_session();
    let mapper = TestMapper::default();
    let invoice = session.create("invoice").unwrap();

    session.save(&mapper, &invoice, &json!({})).unwrap();

    let err = session.save(&mapper, &invoice, &json!({})).unwrap_err();
    assert_eq!(err.class, ErrorClass::Conflict);

    // settlement releases the gate
    mapper.take("create").resolve(json!({"id": 5}));
    session.save(&mapper, &invoice, &json!({})).unwrap();
}

#[test]
fn rejections_fold_into_validation_errors() {
    let session = billing_session();
    let mapper = TestMapper::default();
    let invoice = session.create("invoice").unwrap();

    let saved = session.save(&mapper, &invoice, &json!({})).unwrap();
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&outcomes);
    saved.subscribe(move |outcome| seen.borrow_mut().push(outcome.is_err()));

    mapper
        .take("create")
        .reject(ErrorPayload::field("number", "is taken"));

    assert!(!session.is_busy(&invoice));
    assert_eq!(session.source_state(&invoice), SourceState::New);
    assert!(session.flag(&invoice, PROP_HAS_OWN_ERRORS));
    assert_eq!(*outcomes.borrow(), vec![true], "the rejection re-propagates");
}

#[test]
fn a_bare_message_lands_under_base() {
    let session = billing_session();
    let mapper = TestMapper::default();
    let invoice = session.create("invoice").unwrap();

    session.save(&mapper, &invoice, &json!({})).unwrap();
    mapper.take("create").reject(ErrorPayload::message("boom"));

    let errors = invoice.get(PROP_OWN_ERRORS).unwrap();
    let base = errors.as_map().unwrap().get("base").cloned().unwrap();
    assert_eq!(base.as_seq().unwrap().to_vec(), vec![Value::from("boom")]);
}

#[test]
fn unimplemented_mapper_methods_fail_synchronously() {
    let session = billing_session();
    let invoice = session.create("invoice").unwrap();

    let err = session.save(&BareMapper, &invoice, &json!({})).unwrap_err();
    assert!(err.is_config());
    assert!(!session.is_busy(&invoice), "the gate is released on failure");

    let err = session
        .fetch(&BareMapper, "invoice", Value::Int(1), &json!({}))
        .unwrap_err();
    assert!(err.is_config());

    let err = session
        .query(&BareMapper, "invoice", &json!({}))
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn destroy_transitions_to_deleted_and_releases_the_identity() {
    let session = billing_session();
    let mapper = TestMapper::default();
    let invoice = common::loaded_invoice(&session);

    session.destroy(&mapper, &invoice, &json!({})).unwrap();
    mapper.take("delete").resolve(json!({}));

    assert_eq!(session.source_state(&invoice), SourceState::Deleted);
    assert_eq!(session.find("invoice", &Value::Int(1)), None);

    let err = session.save(&mapper, &invoice, &json!({})).unwrap_err();
    assert_eq!(err.class, ErrorClass::Conflict);
}

#[test]
fn fetch_materializes_a_placeholder_in_place() {
    let session = billing_session();
    let mapper = TestMapper::default();

    let fetched = session
        .fetch(&mapper, "customer", Value::Int(9), &json!({}))
        .unwrap();
    let placeholder = session.find("customer", &Value::Int(9)).unwrap();
    assert_eq!(session.source_state(&placeholder), SourceState::Empty);
    assert!(session.is_busy(&placeholder));

    mapper
        .take("get")
        .resolve(json!({"id": 9, "name": "ACME"}));

    assert_eq!(session.source_state(&placeholder), SourceState::Loaded);
    assert!(!session.is_busy(&placeholder));
    assert_eq!(placeholder.get("name").unwrap(), Value::from("ACME"));
    assert_eq!(fetched.peek().as_deref(), Some(&Ok(placeholder)));
}

#[test]
fn fetch_failures_fold_errors_and_release_the_gate() {
    let session = billing_session();
    let mapper = TestMapper::default();

    let fetched = session
        .fetch(&mapper, "customer", Value::Int(9), &json!({}))
        .unwrap();
    mapper.take("get").reject(ErrorPayload::message("not found"));

    let placeholder = session.find("customer", &Value::Int(9)).unwrap();
    assert!(!session.is_busy(&placeholder));
    assert!(session.flag(&placeholder, PROP_HAS_OWN_ERRORS));
    assert!(matches!(fetched.peek().as_deref(), Some(&Err(_))));
}

#[test]
fn query_loads_a_collection_of_payloads() {
    let session = billing_session();
    let mapper = TestMapper::default();

    let queried = session.query(&mapper, "customer", &json!({})).unwrap();
    mapper.take("query").resolve(json!([
        {"id": 1, "name": "ACME"},
        {"id": 2, "name": "Initech"},
    ]));

    let outcome = queried.peek().unwrap();
    let loaded = outcome.as_ref().as_ref().unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].get("name").unwrap(), Value::from("ACME"));
    assert_eq!(session.find("customer", &Value::Int(2)), Some(loaded[1].clone()));
}
