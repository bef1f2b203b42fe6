//! Declarative model descriptions: attributes with coercion kinds,
//! associations, validators, and subclassing via an explicit parent chain.

pub mod coerce;

use sinew_core::value::Value;
use std::{fmt, rc::Rc};

///
/// Built-in property names declared on every model type.
///

pub const PROP_ID: &str = "id";
pub const PROP_BUSY: &str = "busy";
pub const PROP_DESTROY: &str = "_destroy";
pub const PROP_CHANGES: &str = "changes";
pub const PROP_HAS_CHANGES: &str = "has_changes";
pub const PROP_HAS_OWN_CHANGES: &str = "has_own_changes";
pub const PROP_ERRORS: &str = "errors";
pub const PROP_OWN_ERRORS: &str = "own_errors";
pub const PROP_HAS_ERRORS: &str = "has_errors";
pub const PROP_HAS_OWN_ERRORS: &str = "has_own_errors";

pub(crate) const RESERVED_PROPS: &[&str] = &[
    PROP_ID,
    PROP_BUSY,
    PROP_DESTROY,
    PROP_CHANGES,
    PROP_HAS_CHANGES,
    PROP_HAS_OWN_CHANGES,
    PROP_ERRORS,
    PROP_OWN_ERRORS,
    PROP_HAS_ERRORS,
    PROP_HAS_OWN_ERRORS,
];

/// Per-attribute validator. Failures accumulate as validation errors;
/// they are never raised.
pub type ValidatorFn = Rc<dyn Fn(&Value) -> Result<(), String>>;

///
/// AttrKind
///
/// Coercion applied to raw payload values for one attribute. `Parsed`
/// kinds dispatch to an externally registered string parser collaborator
/// (number/date/datetime/email/phone/duration parsers are supplied by the
/// embedding application).
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttrKind {
    Any,
    Bool,
    Int,
    Uint,
    Float,
    Text,
    Parsed(String),
}

///
/// AttrSpec
///

#[derive(Clone)]
pub struct AttrSpec {
    pub name: String,
    pub kind: AttrKind,
    pub default: Value,
    pub validator: Option<ValidatorFn>,
}

impl AttrSpec {
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: Value::Null,
            validator: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    #[must_use]
    pub fn with_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + 'static,
    {
        self.validator = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for AttrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttrSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

///
/// AssocKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AssocKind {
    HasOne,
    HasMany,
}

///
/// AssocSpec
///
/// Declaration of a hasOne/hasMany relation. The target type is addressed
/// by name and resolved lazily on first use, so associations may reference
/// types that are not declared yet.
///

#[derive(Clone, Debug)]
pub struct AssocSpec {
    pub name: String,
    pub kind: AssocKind,
    pub target: String,
    pub inverse: Option<String>,
    pub owner: bool,
}

impl AssocSpec {
    pub fn has_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AssocKind::HasOne,
            target: target.into(),
            inverse: None,
            owner: false,
        }
    }

    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AssocKind::HasMany,
            target: target.into(),
            inverse: None,
            owner: false,
        }
    }

    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Fold the target's changes and validation errors into this side.
    #[must_use]
    pub const fn owned(mut self) -> Self {
        self.owner = true;
        self
    }
}

///
/// ModelSpec
///
/// Declarative description of one model type. Attributes and associations
/// of the parent chain are inherited by materializing them into the
/// subclass's descriptor table at definition time.
///

#[derive(Clone, Debug, Default)]
pub struct ModelSpec {
    pub name: String,
    pub parent: Option<String>,
    pub attrs: Vec<AttrSpec>,
    pub assocs: Vec<AssocSpec>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn extends(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn attr(mut self, attr: AttrSpec) -> Self {
        self.attrs.push(attr);
        self
    }

    #[must_use]
    pub fn assoc(mut self, assoc: AssocSpec) -> Self {
        self.assocs.push(assoc);
        self
    }
}
