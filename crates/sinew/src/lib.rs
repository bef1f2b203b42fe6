//! Sinew: a reactive data-model layer over the `sinew-core` property
//! runtime. Model declarations, bidirectional associations, change and
//! validation aggregation, an identity map, and a pluggable persistence
//! mapper contract.
//!
//! ## Crate layout
//! - `core`: the reactive kernel (values, descriptors, scheduler,
//!   collections, deferred values), re-exported from `sinew-core`.
//! - `model`: declarative model descriptions and payload coercion.
//! - `session`: the injectable model context every operation goes
//!   through.

pub use sinew_core as core;

pub mod model;
pub mod session;

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
///

pub mod prelude {
    pub use crate::{
        core::prelude::*,
        model::{
            AssocKind, AssocSpec, AttrKind, AttrSpec, ModelSpec, PROP_BUSY, PROP_CHANGES,
            PROP_DESTROY, PROP_ERRORS, PROP_HAS_CHANGES, PROP_HAS_ERRORS, PROP_HAS_OWN_CHANGES,
            PROP_HAS_OWN_ERRORS, PROP_ID, PROP_OWN_ERRORS, coerce::AttrParser,
        },
        session::{Session, SourceState, mapper::Mapper},
    };
}
