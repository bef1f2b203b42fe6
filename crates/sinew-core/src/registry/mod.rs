#[cfg(test)]
mod tests;

use crate::{
    PATH_SEPARATOR,
    error::{ErrorOrigin, RuntimeError},
    object::ObjRef,
    value::Value,
};
use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

///
/// Getter function contracts.
///
/// Pure getters receive resolved dependency values positionally and run
/// with no receiver, which both enables memoization and forbids incidental
/// side effects. Impure getters run against the entity handle.
///

pub type PureGetterFn = Rc<dyn Fn(&[Value]) -> Value>;
pub type ImpureGetterFn = Rc<dyn Fn(&ObjRef) -> Value>;
pub type CustomSetterFn = Rc<dyn Fn(&ObjRef, Value) -> Result<(), RuntimeError>>;

///
/// Getter
///
/// Capability-tagged read strategy, selected at declaration time and
/// dispatched by tag.
///

#[derive(Clone)]
pub enum Getter {
    /// Read the backing slot, falling back to the declared default.
    Slot,
    /// Pure computation over resolved dependency values.
    Pure(PureGetterFn),
    /// Computation with access to the receiver.
    Impure(ImpureGetterFn),
}

///
/// Setter
///
/// Absence of a setter on the descriptor means the property is read-only.
///

#[derive(Clone)]
pub enum Setter {
    /// Write the backing slot.
    Slot,
    /// Custom write path. The closure is responsible for the backing write;
    /// dirty-marking still happens unconditionally afterwards.
    Custom(CustomSetterFn),
}

///
/// PropSpec
///
/// Declarative descriptor for one observable property. Declared per type
/// or per instance; instance declarations override type declarations.
///

#[derive(Clone)]
pub struct PropSpec {
    pub name: String,
    pub getter: Getter,
    pub setter: Option<Setter>,
    pub default: Value,
    /// Dependency names. Each may contain at most one path separator,
    /// denoting a property on a relation reachable through the first
    /// segment.
    pub on: Vec<String>,
    pub cache: bool,
}

impl PropSpec {
    /// A plain readable/writable slot property.
    pub fn slot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            getter: Getter::Slot,
            setter: Some(Setter::Slot),
            default: Value::Null,
            on: Vec::new(),
            cache: false,
        }
    }

    /// A read-only pure computed property over the given dependencies.
    pub fn computed<I, S, F>(name: impl Into<String>, on: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&[Value]) -> Value + 'static,
    {
        Self {
            name: name.into(),
            getter: Getter::Pure(Rc::new(f)),
            setter: None,
            default: Value::Null,
            on: on.into_iter().map(Into::into).collect(),
            cache: false,
        }
    }

    /// A read-only impure computed property (receiver-based).
    pub fn derived<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ObjRef) -> Value + 'static,
    {
        Self {
            name: name.into(),
            getter: Getter::Impure(Rc::new(f)),
            setter: None,
            default: Value::Null,
            on: Vec::new(),
            cache: false,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    #[must_use]
    pub fn with_on<I, S>(mut self, on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on = on.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_setter<F>(mut self, f: F) -> Self
    where
        F: Fn(&ObjRef, Value) -> Result<(), RuntimeError> + 'static,
    {
        self.setter = Some(Setter::Custom(Rc::new(f)));
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.setter = None;
        self
    }

    #[must_use]
    pub const fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }

    /// Validate declaration invariants (fail fast, configuration errors).
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.name.is_empty() {
            return Err(RuntimeError::config(
                ErrorOrigin::Property,
                "property name is empty",
            ));
        }
        if self.name.contains(PATH_SEPARATOR) {
            return Err(RuntimeError::config(
                ErrorOrigin::Property,
                format!("property name '{}' contains a path separator", self.name),
            ));
        }
        for dep in &self.on {
            if dep.matches(PATH_SEPARATOR).count() > 1 {
                return Err(RuntimeError::dependency_path_too_deep(&self.name, dep));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for PropSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropSpec")
            .field("name", &self.name)
            .field("on", &self.on)
            .field("cache", &self.cache)
            .field("read_only", &self.is_read_only())
            .finish_non_exhaustive()
    }
}

///
/// TypeSpec
///
/// Per-type descriptor table plus the inverted dependency graph
/// (name to dependent property names).
///

#[derive(Default)]
pub(crate) struct TypeSpec {
    pub props: BTreeMap<String, Rc<PropSpec>>,
    pub dependents: BTreeMap<String, Vec<String>>,
}

impl TypeSpec {
    // Invert one descriptor's "on" list into the dependents table.
    fn index_dependencies(&mut self, spec: &PropSpec) {
        for dep in &spec.on {
            let entry = self.dependents.entry(dep.clone()).or_default();
            if !entry.contains(&spec.name) {
                entry.push(spec.name.clone());
            }
        }
    }
}

///
/// TypeRegistry
///
/// Per-type table of declared properties. Explicitly owned by a runtime
/// context rather than a module-level singleton, so independent runtimes
/// (and tests) never share declarations.
///

#[derive(Default)]
pub(crate) struct TypeRegistry {
    types: RefCell<BTreeMap<String, TypeSpec>>,
}

impl TypeRegistry {
    pub fn define_type(&self, name: &str) -> Result<(), RuntimeError> {
        let mut types = self.types.borrow_mut();
        if types.contains_key(name) {
            return Err(RuntimeError::config(
                ErrorOrigin::Property,
                format!("type already defined: '{name}'"),
            ));
        }
        types.insert(name.to_string(), TypeSpec::default());

        Ok(())
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.borrow().contains_key(name)
    }

    pub fn declare(&self, type_name: &str, spec: PropSpec) -> Result<(), RuntimeError> {
        spec.validate()?;

        let mut types = self.types.borrow_mut();
        let ty = types.get_mut(type_name).ok_or_else(|| {
            RuntimeError::config(
                ErrorOrigin::Property,
                format!("type not defined: '{type_name}'"),
            )
        })?;
        if ty.props.contains_key(&spec.name) {
            return Err(RuntimeError::config(
                ErrorOrigin::Property,
                format!("property already declared: '{type_name}.{}'", spec.name),
            ));
        }

        ty.index_dependencies(&spec);
        ty.props.insert(spec.name.clone(), Rc::new(spec));

        Ok(())
    }

    pub fn spec_of(&self, type_name: &str, property: &str) -> Option<Rc<PropSpec>> {
        self.types
            .borrow()
            .get(type_name)
            .and_then(|ty| ty.props.get(property))
            .cloned()
    }

    pub fn dependents_of(&self, type_name: &str, name: &str) -> Vec<String> {
        self.types
            .borrow()
            .get(type_name)
            .and_then(|ty| ty.dependents.get(name))
            .cloned()
            .unwrap_or_default()
    }

    // Install builtin descriptors, creating the type if needed. Only used
    // for runtime-owned types whose declarations cannot collide.
    pub fn install(&self, type_name: &str, specs: Vec<PropSpec>) {
        let mut types = self.types.borrow_mut();
        let ty = types.entry(type_name.to_string()).or_default();
        for spec in specs {
            ty.index_dependencies(&spec);
            ty.props.insert(spec.name.clone(), Rc::new(spec));
        }
    }

    pub fn property_names(&self, type_name: &str) -> Vec<String> {
        self.types
            .borrow()
            .get(type_name)
            .map(|ty| ty.props.keys().cloned().collect())
            .unwrap_or_default()
    }
}
