// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema fragments, validation and composition for Quilt.
//!
//! A service describes its slice of the API as [`Node`]s (object types that
//! own `Query`/`Mutation`/`Subscription`/`Fields` handler buckets) and
//! [`Appliance`]s (scalars, enums, directives, unions, interfaces, plain object
//! types and raw global SDL). [`compose`] validates every fragment, enforces
//! name uniqueness for the composition, wraps every handler through
//! [`quilt_resolve::wrap`] and produces one [`ComposedSchema`].

mod compose;
mod directive;
mod error;
mod fragment;
mod registry;
pub mod sdl;
mod source;
mod validate;

pub use compose::{compose, ComposedSchema};
pub use directive::{apply_directives, DirectiveHandler, RemoveAnnotatedFields, SchemaDirective};
pub use error::{DeclKind, SchemaError, ValidationError};
pub use fragment::{
    AbstractFragment, Appliance, DirectiveFragment, EnumFragment, GlobalText, Node, NodeBuilder,
    ObjectFragment, ScalarFragment, RESERVED_NAMES,
};
pub use registry::{register, register_into, RegisteredNames, Registration};
pub use source::TypeSource;
pub use validate::{validate, validate_node, Checks};

/// Parsed SDL document type.
pub use async_graphql_parser::types::ServiceDocument;
