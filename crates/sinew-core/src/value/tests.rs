use crate::{registry::PropSpec, runtime::Runtime, value::Value};
use std::collections::BTreeMap;

fn runtime_with_thing() -> Runtime {
    let rt = Runtime::new();
    rt.define_type("thing").unwrap();
    rt.declare("thing", PropSpec::slot("name")).unwrap();

    rt
}

#[test]
fn scalars_compare_structurally() {
    assert_eq!(Value::Int(3), Value::Int(3));
    assert_ne!(Value::Int(3), Value::Uint(3));
    assert_eq!(Value::Text("a".into()), Value::from("a"));
    assert_eq!(Value::Null, Value::default());
}

#[test]
fn handles_compare_by_identity() {
    let rt = runtime_with_thing();
    let a = rt.spawn("thing").unwrap();
    let b = rt.spawn("thing").unwrap();

    assert_eq!(Value::Obj(a.clone()), Value::Obj(a.clone()));
    assert_ne!(Value::Obj(a.clone()), Value::Obj(b));

    let s1 = rt.seq(vec![Value::Int(1)]);
    let s2 = rt.seq(vec![Value::Int(1)]);
    assert_eq!(Value::Seq(s1.clone()), Value::Seq(s1));
    assert_ne!(
        Value::Seq(rt.seq(Vec::new())),
        Value::Seq(s2)
    );
}

#[test]
fn accessors_narrow_by_variant() {
    assert_eq!(Value::Bool(true).as_bool(), Some(true));
    assert_eq!(Value::Int(-4).as_int(), Some(-4));
    assert_eq!(Value::Uint(4).as_int(), Some(4));
    assert_eq!(Value::Int(-1).as_uint(), None);
    assert_eq!(Value::Text("x".into()).as_text(), Some("x"));
    assert_eq!(Value::Null.as_text(), None);
}

#[test]
fn display_renders_maps_in_order() {
    let mut entries = BTreeMap::new();
    entries.insert("b".to_string(), Value::Int(2));
    entries.insert("a".to_string(), Value::Int(1));

    assert_eq!(Value::Map(entries).to_string(), "{a: 1, b: 2}");
}

#[test]
fn tags_name_every_variant() {
    assert_eq!(Value::Null.tag(), "null");
    assert_eq!(Value::Float(0.5).tag(), "float");
    assert_eq!(Value::Map(BTreeMap::new()).tag(), "map");
}
