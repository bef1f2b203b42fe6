use super::*;
use crate::runtime::Runtime;

#[test]
fn declared_dependencies_invert_into_dependents() {
    let rt = Runtime::new();
    rt.define_type("person").unwrap();
    rt.declare("person", PropSpec::slot("first")).unwrap();
    rt.declare("person", PropSpec::slot("last")).unwrap();
    rt.declare(
        "person",
        PropSpec::computed("full", ["first", "last"], |_| Value::Null),
    )
    .unwrap();

    let person = rt.spawn("person").unwrap();
    assert_eq!(person.dependents_of("first"), vec!["full".to_string()]);
    assert_eq!(person.dependents_of("last"), vec!["full".to_string()]);
    assert!(person.dependents_of("full").is_empty());
}

#[test]
fn dependency_path_may_have_one_separator() {
    let spec = PropSpec::computed("view", ["addr.city"], |_| Value::Null);
    assert!(spec.validate().is_ok());

    let spec = PropSpec::computed("view", ["addr.city.zip"], |_| Value::Null);
    let err = spec.validate().unwrap_err();
    assert!(err.is_config());
}

#[test]
fn property_names_may_not_contain_separators() {
    let err = PropSpec::slot("addr.city").validate().unwrap_err();
    assert!(err.is_config());
}

#[test]
fn duplicate_declaration_fails() {
    let rt = Runtime::new();
    rt.define_type("person").unwrap();
    rt.declare("person", PropSpec::slot("name")).unwrap();

    let err = rt.declare("person", PropSpec::slot("name")).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn declaring_on_an_unknown_type_fails() {
    let rt = Runtime::new();
    let err = rt.declare("ghost", PropSpec::slot("name")).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn duplicate_type_definition_fails() {
    let rt = Runtime::new();
    rt.define_type("person").unwrap();
    assert!(rt.define_type("person").is_err());
}
