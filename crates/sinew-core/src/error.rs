use std::fmt;
use thiserror::Error as ThisError;

///
/// RuntimeError
///
/// Structured runtime error with a stable internal classification.
/// Configuration and type-mismatch failures surface through this type
/// synchronously at the call site; domain validation never does (it is
/// accumulated on the entity instead, see the model layer).
///

#[derive(Clone, Debug, ThisError)]
#[error("{message}")]
pub struct RuntimeError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl RuntimeError {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    /// Construct a configuration error (programming mistake, fail fast).
    pub fn config(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Config, origin, message)
    }

    /// Construct a type-mismatch error for a specific origin.
    pub fn type_mismatch(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TypeMismatch, origin, message)
    }

    /// Construct a conflict error for a specific origin.
    pub fn conflict(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, origin, message)
    }

    /// Construct an unsupported-operation error for a specific origin.
    pub fn unsupported(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, origin, message)
    }

    /// Construct a standardized unknown-property error.
    pub fn unknown_property(type_name: &str, property: &str) -> Self {
        Self::config(
            ErrorOrigin::Property,
            format!("unknown property: '{type_name}.{property}'"),
        )
    }

    /// Construct a standardized read-only write error.
    pub fn read_only_property(type_name: &str, property: &str) -> Self {
        Self::config(
            ErrorOrigin::Property,
            format!("property is read-only: '{type_name}.{property}'"),
        )
    }

    /// Construct a standardized malformed-dependency-path error.
    pub fn dependency_path_too_deep(property: &str, dependency: &str) -> Self {
        Self::config(
            ErrorOrigin::Property,
            format!(
                "dependency '{dependency}' of property '{property}' has more than one path separator"
            ),
        )
    }

    /// Construct the error for operations against a released runtime.
    pub fn runtime_released(origin: ErrorOrigin) -> Self {
        Self::config(origin, "runtime context has been released")
    }

    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self.class, ErrorClass::Config)
    }

    #[must_use]
    pub const fn is_type_mismatch(&self) -> bool {
        matches!(self.class, ErrorClass::TypeMismatch)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Config,
    TypeMismatch,
    Conflict,
    Unsupported,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Config => "config",
            Self::TypeMismatch => "type_mismatch",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Property,
    Object,
    Schedule,
    Collection,
    Model,
    Identity,
    Mapper,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Property => "property",
            Self::Object => "object",
            Self::Schedule => "schedule",
            Self::Collection => "collection",
            Self::Model => "model",
            Self::Identity => "identity",
            Self::Mapper => "mapper",
        };
        write!(f, "{label}")
    }
}
