mod common;

use common::billing_session;
use sinew::prelude::*;
use std::{cell::Cell, rc::Rc};

#[test]
fn has_one_assignment_syncs_the_inverse_immediately() {
    let session = billing_session();
    let invoice = session.create("invoice").unwrap();
    let item = session.create("line_item").unwrap();

    // structural sync needs no flush, only notification does
    item.set("invoice", Value::Obj(invoice.clone())).unwrap();

    let items = session.relation(&invoice, "line_items").unwrap();
    assert!(items.contains(&Value::Obj(item.clone())));
    assert_eq!(item.get("invoice").unwrap(), Value::Obj(invoice));
}

#[test]
fn relation_insert_syncs_the_inverse_immediately() {
    let session = billing_session();
    let invoice = session.create("invoice").unwrap();
    let item = session.create("line_item").unwrap();

    let items = session.relation(&invoice, "line_items").unwrap();
    items.push(Value::Obj(item.clone())).unwrap();

    assert_eq!(item.get("invoice").unwrap(), Value::Obj(invoice));
}

#[test]
fn clearing_has_one_removes_from_the_inverse_collection() {
    let session = billing_session();
    let invoice = session.create("invoice").unwrap();
    let item = session.create("line_item").unwrap();

    item.set("invoice", Value::Obj(invoice.clone())).unwrap();
    item.set("invoice", Value::Null).unwrap();

    let items = session.relation(&invoice, "line_items").unwrap();
    assert!(items.is_empty());
    assert_eq!(item.get("invoice").unwrap(), Value::Null);
}

#[test]
fn repointing_has_one_moves_between_inverse_collections() {
    let session = billing_session();
    let first = session.create("invoice").unwrap();
    let second = session.create("invoice").unwrap();
    let item = session.create("line_item").unwrap();

    item.set("invoice", Value::Obj(first.clone())).unwrap();
    item.set("invoice", Value::Obj(second.clone())).unwrap();

    assert!(session.relation(&first, "line_items").unwrap().is_empty());
    assert!(
        session
            .relation(&second, "line_items")
            .unwrap()
            .contains(&Value::Obj(item))
    );
}

#[test]
fn relation_removal_clears_the_inverse_pointer() {
    let session = billing_session();
    let invoice = session.create("invoice").unwrap();
    let item = session.create("line_item").unwrap();

    let items = session.relation(&invoice, "line_items").unwrap();
    items.push(Value::Obj(item.clone())).unwrap();
    items.remove(&Value::Obj(item.clone())).unwrap();

    assert_eq!(item.get("invoice").unwrap(), Value::Null);
}

#[test]
fn wrongly_typed_assignments_fail_synchronously() {
    let session = billing_session();
    let invoice = session.create("invoice").unwrap();
    let customer = session.create("customer").unwrap();
    let item = session.create("line_item").unwrap();

    let err = item
        .set("invoice", Value::Obj(customer.clone()))
        .unwrap_err();
    assert!(err.is_type_mismatch());

    let items = session.relation(&invoice, "line_items").unwrap();
    let err = items.push(Value::Obj(customer)).unwrap_err();
    assert!(err.is_type_mismatch());
    assert!(items.is_empty(), "failed inserts leave the relation alone");

    let err = item.set("invoice", Value::Int(3)).unwrap_err();
    assert!(err.is_type_mismatch());
}

#[test]
fn member_changes_surface_on_the_owner_under_the_relation_prefix() {
    let session = billing_session();
    let rt = session.runtime().clone();
    let invoice = session.create("invoice").unwrap();
    let item = session.create("line_item").unwrap();

    session
        .relation(&invoice, "line_items")
        .unwrap()
        .push(Value::Obj(item.clone()))
        .unwrap();
    rt.run_until_idle();

    let hits = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&hits);
    invoice.observe("line_items.sku", move |_, _| seen.set(seen.get() + 1));

    item.set("sku", Value::from("widget")).unwrap();
    rt.run_until_idle();

    assert_eq!(hits.get(), 1);
}

#[test]
fn has_one_members_forward_under_their_prefix() {
    let session = billing_session();
    let rt = session.runtime().clone();
    let invoice = session.create("invoice").unwrap();
    let customer = session.create("customer").unwrap();

    invoice.set("customer", Value::Obj(customer.clone())).unwrap();
    rt.run_until_idle();

    let hits = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&hits);
    invoice.observe("customer.name", move |_, _| seen.set(seen.get() + 1));

    customer.set("name", Value::from("ACME")).unwrap();
    rt.run_until_idle();
    assert_eq!(hits.get(), 1);

    // swapping the relation deregisters the old proxy
    invoice.set("customer", Value::Null).unwrap();
    rt.run_until_idle();
    customer.set("name", Value::from("other")).unwrap();
    rt.run_until_idle();
    assert_eq!(hits.get(), 1);
}
