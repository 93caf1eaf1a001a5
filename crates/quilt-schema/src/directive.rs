// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema directives: visitors that transform the composed document.

use async_graphql_parser::types::{ServiceDocument, TypeKind, TypeSystemDefinition};
use quilt_resolve::BoxError;
use std::fmt;
use std::sync::Arc;

use crate::{sdl, SchemaError};

/// Transforms the composed document for one registered directive.
///
/// Visitors run after composition and before the executor is built. They
/// never see resolvers.
pub trait SchemaDirective: Send + Sync {
    /// Rewrite `document`; `name` is the directive name as registered.
    fn visit(&self, name: &str, document: &mut ServiceDocument) -> Result<(), BoxError>;
}

/// A registered directive and its visitor.
#[derive(Clone)]
pub struct DirectiveHandler {
    /// Directive name, without `@`.
    pub name: String,
    /// Visitor applied to the composed document.
    pub visitor: Arc<dyn SchemaDirective>,
}

impl fmt::Debug for DirectiveHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirectiveHandler").field(&self.name).finish()
    }
}

/// Run every visitor over `schema_text` in registration order.
pub fn apply_directives(
    schema_text: &str,
    directives: &[DirectiveHandler],
) -> Result<String, SchemaError> {
    if directives.is_empty() {
        return Ok(schema_text.to_owned());
    }
    let mut doc = sdl::parse(schema_text)?;
    for handler in directives {
        handler
            .visitor
            .visit(&handler.name, &mut doc)
            .map_err(|e| SchemaError::Directive {
                name: handler.name.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(sdl::print(&doc))
}

/// Drops every object/interface field annotated with the directive.
///
/// Useful for fields a service keeps for itself (`@internal`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveAnnotatedFields;

impl SchemaDirective for RemoveAnnotatedFields {
    fn visit(&self, name: &str, document: &mut ServiceDocument) -> Result<(), BoxError> {
        for def in &mut document.definitions {
            let TypeSystemDefinition::Type(ty) = def else {
                continue;
            };
            let fields = match &mut ty.node.kind {
                TypeKind::Object(o) => &mut o.fields,
                TypeKind::Interface(i) => &mut i.fields,
                _ => continue,
            };
            fields.retain(|f| !f.node.directives.iter().any(|d| d.node.name.node.as_str() == name));
        }
        Ok(())
    }
}
