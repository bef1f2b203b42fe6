use crate::{
    registry::PropSpec,
    runtime::Runtime,
    value::Value,
};
use std::{cell::Cell, rc::Rc};

fn person_runtime() -> Runtime {
    let rt = Runtime::new();
    rt.define_type("person").unwrap();
    rt.declare("person", PropSpec::slot("first")).unwrap();
    rt.declare("person", PropSpec::slot("last")).unwrap();
    rt.declare(
        "person",
        PropSpec::computed("full", ["first", "last"], |args| {
            let first = args[0].as_text().unwrap_or_default();
            let last = args[1].as_text().unwrap_or_default();
            Value::Text(format!("{first} {last}"))
        }),
    )
    .unwrap();

    rt
}

#[test]
fn slot_reads_fall_back_to_the_default() {
    let rt = Runtime::new();
    rt.define_type("counter").unwrap();
    rt.declare(
        "counter",
        PropSpec::slot("count").with_default(Value::Uint(0)),
    )
    .unwrap();

    let counter = rt.spawn("counter").unwrap();
    assert_eq!(counter.get("count").unwrap(), Value::Uint(0));

    counter.set("count", Value::Uint(3)).unwrap();
    assert_eq!(counter.get("count").unwrap(), Value::Uint(3));
}

#[test]
fn reading_an_undeclared_property_fails() {
    let rt = person_runtime();
    let person = rt.spawn("person").unwrap();

    let err = person.get("age").unwrap_err();
    assert!(err.is_config());
}

#[test]
fn writing_a_read_only_property_fails() {
    let rt = person_runtime();
    let person = rt.spawn("person").unwrap();

    let err = person.set("full", Value::from("nope")).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn pure_getters_receive_dependency_values_positionally() {
    let rt = person_runtime();
    let person = rt.spawn("person").unwrap();
    person.set("first", Value::from("Joe")).unwrap();
    person.set("last", Value::from("Blow")).unwrap();

    assert_eq!(person.get("full").unwrap(), Value::from("Joe Blow"));
}

#[test]
fn cached_getters_memoize_until_invalidated() {
    let rt = Runtime::new();
    rt.define_type("box").unwrap();
    rt.declare("box", PropSpec::slot("raw")).unwrap();

    let computed = Rc::new(Cell::new(0u32));
    let count = Rc::clone(&computed);
    rt.declare(
        "box",
        PropSpec::computed("view", ["raw"], move |args| {
            count.set(count.get() + 1);
            args[0].clone()
        })
        .cached(),
    )
    .unwrap();

    let b = rt.spawn("box").unwrap();
    b.set("raw", Value::Int(1)).unwrap();
    rt.flush_now();

    assert_eq!(b.get("view").unwrap(), Value::Int(1));
    assert_eq!(b.get("view").unwrap(), Value::Int(1));
    assert_eq!(computed.get(), 1, "second read must hit the cache");

    b.set("raw", Value::Int(2)).unwrap();
    rt.flush_now();
    assert_eq!(b.get("view").unwrap(), Value::Int(2));
    assert_eq!(computed.get(), 2, "flush must invalidate the cache entry");
}

#[test]
fn instance_declarations_override_the_type() {
    let rt = person_runtime();
    let person = rt.spawn("person").unwrap();
    person.set("first", Value::from("Joe")).unwrap();
    person.set("last", Value::from("Blow")).unwrap();

    person
        .declare(PropSpec::computed("full", ["last"], |args| {
            args[0].clone()
        }))
        .unwrap();

    assert_eq!(person.get("full").unwrap(), Value::from("Blow"));
    assert_eq!(person.dependents_of("last"), vec!["full".to_string()]);
}

#[test]
fn paths_resolve_through_relations() {
    let rt = person_runtime();
    rt.define_type("company").unwrap();
    rt.declare("company", PropSpec::slot("owner")).unwrap();

    let person = rt.spawn("person").unwrap();
    person.set("first", Value::from("Joe")).unwrap();

    let company = rt.spawn("company").unwrap();
    company.set("owner", Value::Obj(person)).unwrap();

    assert_eq!(company.get_path("owner.first").unwrap(), Value::from("Joe"));
}

#[test]
fn paths_through_null_resolve_to_null() {
    let rt = person_runtime();
    rt.define_type("company").unwrap();
    rt.declare("company", PropSpec::slot("owner")).unwrap();

    let company = rt.spawn("company").unwrap();
    assert_eq!(company.get_path("owner.first").unwrap(), Value::Null);
}

#[test]
fn observers_deregister_by_handle() {
    let rt = person_runtime();
    let person = rt.spawn("person").unwrap();

    let hits = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&hits);
    let id = person.observe("first", move |_, _| seen.set(seen.get() + 1));

    person.set("first", Value::from("a")).unwrap();
    rt.flush_now();
    assert_eq!(hits.get(), 1);

    assert!(person.unobserve(id));
    person.set("first", Value::from("b")).unwrap();
    rt.flush_now();
    assert_eq!(hits.get(), 1);
}

#[test]
fn custom_setters_run_before_dirty_marking() {
    let rt = Runtime::new();
    rt.define_type("gauge").unwrap();
    rt.declare(
        "gauge",
        PropSpec::slot("level").with_setter(|obj, value| {
            // clamp writes into the slot
            let level = value.as_int().unwrap_or(0).clamp(0, 10);
            obj.write_slot("level", Value::Int(level));
            Ok(())
        }),
    )
    .unwrap();

    let gauge = rt.spawn("gauge").unwrap();
    gauge.set("level", Value::Int(99)).unwrap();
    assert_eq!(gauge.get("level").unwrap(), Value::Int(10));
}
