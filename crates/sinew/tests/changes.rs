mod common;

use common::{billing_session, loaded_invoice};
use sinew::prelude::*;
use std::{cell::Cell, rc::Rc};

fn changes_map(obj: &ObjRef) -> Value {
    obj.get(PROP_CHANGES).unwrap()
}

#[test]
fn loads_are_commit_points_with_no_delta() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);

    assert_eq!(changes_map(&invoice), Value::Map(Default::default()));
    assert!(!session.flag(&invoice, PROP_HAS_CHANGES));
    assert!(!session.flag(&invoice, PROP_HAS_OWN_CHANGES));
}

#[test]
fn scalar_deltas_record_the_previous_value() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);

    invoice.set("number", Value::from("INV-2")).unwrap();

    let changes = changes_map(&invoice);
    let map = changes.as_map().unwrap();
    assert_eq!(map.get("number"), Some(&Value::from("INV-1")));
    assert!(session.flag(&invoice, PROP_HAS_OWN_CHANGES));
}

#[test]
fn reverting_a_scalar_clears_its_delta_entry() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);

    invoice.set("number", Value::from("INV-2")).unwrap();
    invoice.set("number", Value::from("INV-1")).unwrap();

    assert_eq!(changes_map(&invoice), Value::Map(Default::default()));
    assert!(!session.flag(&invoice, PROP_HAS_CHANGES));
}

#[test]
fn intermediate_values_keep_the_original_previous_value() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);

    invoice.set("number", Value::from("INV-2")).unwrap();
    invoice.set("number", Value::from("INV-3")).unwrap();

    let changes = changes_map(&invoice);
    assert_eq!(
        changes.as_map().unwrap().get("number"),
        Some(&Value::from("INV-1"))
    );
}

#[test]
fn owned_has_many_records_added_and_removed_sets() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);
    let items = session.relation(&invoice, "line_items").unwrap();

    let popped = items.pop().unwrap().unwrap();

    let changes = changes_map(&invoice);
    let entry = changes.as_map().unwrap().get("line_items").cloned().unwrap();
    let entry = entry.as_map().unwrap();
    assert!(entry.get("added").unwrap().as_seq().unwrap().is_empty());
    assert_eq!(
        entry.get("removed").unwrap().as_seq().unwrap().to_vec(),
        vec![popped.clone()]
    );

    // re-adding the popped element cancels the recorded removal entirely
    items.push(popped).unwrap();
    assert_eq!(changes_map(&invoice), Value::Map(Default::default()));
    assert!(!session.flag(&invoice, PROP_HAS_CHANGES));
}

#[test]
fn removing_a_just_added_element_un_adds_it() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);
    let items = session.relation(&invoice, "line_items").unwrap();

    let extra = session.create("line_item").unwrap();
    items.push(Value::Obj(extra.clone())).unwrap();
    items.remove(&Value::Obj(extra)).unwrap();

    assert_eq!(changes_map(&invoice), Value::Map(Default::default()));
}

#[test]
fn owned_member_deltas_merge_in_with_path_prefixes() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);
    let items = session.relation(&invoice, "line_items").unwrap();
    let first = items.get(0).unwrap();
    let first = first.as_obj().unwrap();

    first.set("sku", Value::from("a2")).unwrap();

    let changes = changes_map(&invoice);
    let map = changes.as_map().unwrap();
    assert_eq!(map.get("line_items.0.sku"), Some(&Value::from("a")));
    assert!(session.flag(&invoice, PROP_HAS_CHANGES));
    assert!(
        !session.flag(&invoice, PROP_HAS_OWN_CHANGES),
        "the owner's own delta is untouched"
    );
}

#[test]
fn owned_member_changes_notify_the_owner_after_a_flush() {
    let session = billing_session();
    let rt = session.runtime().clone();
    let invoice = loaded_invoice(&session);
    let items = session.relation(&invoice, "line_items").unwrap();
    let first = items.get(0).unwrap();
    let first = first.as_obj().unwrap();
    rt.run_until_idle();

    let hits = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&hits);
    invoice.observe(PROP_HAS_CHANGES, move |_, _| seen.set(seen.get() + 1));

    first.set("sku", Value::from("a2")).unwrap();
    rt.run_until_idle();

    assert_eq!(hits.get(), 1);
}

#[test]
fn unowned_relations_contribute_no_changes() {
    let session = billing_session();
    let invoice = loaded_invoice(&session);
    let customer = session
        .load("customer", &serde_json::json!({"id": 3, "name": "ACME"}))
        .unwrap();
    invoice.set("customer", Value::Obj(customer.clone())).unwrap();
    invoice.set("customer", Value::Obj(customer.clone())).unwrap();

    customer.set("name", Value::from("Initech")).unwrap();

    let changes = changes_map(&invoice);
    let map = changes.as_map().unwrap();
    assert!(map.keys().all(|k| !k.starts_with("customer.")));
    assert!(session.flag(&customer, PROP_HAS_OWN_CHANGES));
}
