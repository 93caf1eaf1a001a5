// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fragment validation: declarations against handlers.

use async_graphql_parser::parse_schema;
use async_graphql_parser::types::{ServiceDocument, TypeDefinition, TypeKind, TypeSystemDefinition};
use quilt_proto::{Bucket, HandlerKeys};
use std::collections::BTreeSet;

use crate::fragment::{Appliance, Node};
use crate::{sdl, DeclKind, SchemaError, ValidationError};

/// Handler checks applied on top of the declaration lookup.
#[derive(Debug, Clone, Default)]
pub enum Checks {
    /// Only require the declaration.
    #[default]
    Declaration,
    /// Node buckets: root keys match the declared root fields both ways,
    /// `Fields` keys are a subset of the node type's fields.
    Node(HandlerKeys),
    /// Field resolver keys are a subset of the type's fields.
    Fields(BTreeSet<String>),
    /// Enum mapping keys equal the declared values.
    EnumValues(BTreeSet<String>),
}

/// Validate `text` as the SDL of fragment `fragment`, returning its
/// normalized (merged and printed) form.
///
/// Validating the normalized text again yields the same text.
pub fn validate(
    fragment: &str,
    text: &str,
    kind: DeclKind,
    checks: &Checks,
) -> Result<String, SchemaError> {
    let doc = parse_schema(text).map_err(|e| ValidationError::Parse {
        fragment: fragment.to_owned(),
        message: e.to_string(),
    })?;
    if !declares(&doc, fragment, kind) {
        return Err(ValidationError::MissingDeclaration {
            fragment: fragment.to_owned(),
            kind,
        }
        .into());
    }
    match checks {
        Checks::Declaration => {}
        Checks::Node(keys) => {
            for bucket in Bucket::ROOTS {
                let declared = fields_of(&doc, bucket.as_str());
                let handled = keys.bucket(bucket);
                subset(fragment, bucket.as_str(), handled, &declared)?;
                if let Some(field) = declared.difference(handled).next() {
                    return Err(ValidationError::UnknownHandler {
                        fragment: fragment.to_owned(),
                        owner: bucket.as_str().to_owned(),
                        field: field.clone(),
                    }
                    .into());
                }
            }
            subset(fragment, Bucket::Fields.as_str(), &keys.fields, &fields_of(&doc, fragment))?;
        }
        Checks::Fields(keys) => subset(fragment, fragment, keys, &fields_of(&doc, fragment))?,
        Checks::EnumValues(keys) => {
            let declared = enum_values(&doc, fragment);
            subset(fragment, fragment, keys, &declared)?;
            if let Some(value) = declared.difference(keys).next() {
                return Err(ValidationError::UnknownHandler {
                    fragment: fragment.to_owned(),
                    owner: fragment.to_owned(),
                    field: value.clone(),
                }
                .into());
            }
        }
    }
    Ok(sdl::print(&sdl::merge([doc])?))
}

/// Validate a node's own SDL against its handlers.
pub fn validate_node(node: &Node) -> Result<String, SchemaError> {
    let text = node.source().text()?;
    validate(node.name(), &text, DeclKind::Object, &Checks::Node(node.handler_keys()))
}

/// Validate a named appliance, returning its name and normalized SDL.
pub(crate) fn validate_appliance(appliance: &Appliance) -> Result<(String, String), SchemaError> {
    let (name, source, kind, checks) = match appliance {
        Appliance::Scalar(f) => (&f.name, &f.source, DeclKind::Scalar, Checks::Declaration),
        Appliance::Enum(f) => (
            &f.name,
            &f.source,
            DeclKind::Enum,
            f.mapping.as_ref().map_or(Checks::Declaration, |m| {
                Checks::EnumValues(m.names().map(str::to_owned).collect())
            }),
        ),
        Appliance::Directive(f) => (&f.name, &f.source, DeclKind::Directive, Checks::Declaration),
        Appliance::Abstract(f) => (&f.name, &f.source, f.kind, Checks::Declaration),
        Appliance::Object(f) => (
            &f.name,
            &f.source,
            DeclKind::Object,
            Checks::Fields(f.fields.keys().cloned().collect()),
        ),
        Appliance::Global(_) => {
            return Err(SchemaError::config("global text has no declaration to validate"));
        }
    };
    let text = source.text()?;
    let normalized = validate(name, &text, kind, &checks)?;
    Ok((name.clone(), normalized))
}

fn types_named<'a>(doc: &'a ServiceDocument, name: &'a str) -> impl Iterator<Item = &'a TypeDefinition> {
    doc.definitions.iter().filter_map(move |def| match def {
        TypeSystemDefinition::Type(t) if t.node.name.node.as_str() == name => Some(&t.node),
        _ => None,
    })
}

fn declares(doc: &ServiceDocument, name: &str, kind: DeclKind) -> bool {
    if kind == DeclKind::Directive {
        return doc.definitions.iter().any(|def| {
            matches!(def, TypeSystemDefinition::Directive(d) if d.node.name.node.as_str() == name)
        });
    }
    types_named(doc, name).any(|t| {
        matches!(
            (&t.kind, kind),
            (TypeKind::Object(_), DeclKind::Object)
                | (TypeKind::Scalar, DeclKind::Scalar)
                | (TypeKind::Enum(_), DeclKind::Enum)
                | (TypeKind::Union(_), DeclKind::Union)
                | (TypeKind::Interface(_), DeclKind::Interface)
        )
    })
}

/// Field names of every object declaration (or extension) named `type_name`.
fn fields_of(doc: &ServiceDocument, type_name: &str) -> BTreeSet<String> {
    types_named(doc, type_name)
        .filter_map(|t| match &t.kind {
            TypeKind::Object(o) => Some(o.fields.iter().map(|f| f.node.name.node.to_string())),
            _ => None,
        })
        .flatten()
        .collect()
}

fn enum_values(doc: &ServiceDocument, name: &str) -> BTreeSet<String> {
    types_named(doc, name)
        .filter_map(|t| match &t.kind {
            TypeKind::Enum(e) => Some(e.values.iter().map(|v| v.node.value.node.to_string())),
            _ => None,
        })
        .flatten()
        .collect()
}

fn subset(
    fragment: &str,
    owner: &str,
    keys: &BTreeSet<String>,
    declared: &BTreeSet<String>,
) -> Result<(), SchemaError> {
    match keys.difference(declared).next() {
        Some(field) => Err(ValidationError::UnknownField {
            fragment: fragment.to_owned(),
            owner: owner.to_owned(),
            field: field.clone(),
        }
        .into()),
        None => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use quilt_resolve::Handler;
    use serde_json::json;

    const USER: &str = "type User { id: ID! age: Int }\nextend type Query { user(id: ID!): User }";

    fn keys(query: &[&str], fields: &[&str]) -> Checks {
        let mut keys = HandlerKeys::default();
        keys.query = query.iter().map(|s| (*s).to_owned()).collect();
        keys.fields = fields.iter().map(|s| (*s).to_owned()).collect();
        Checks::Node(keys)
    }

    #[test]
    fn malformed_text_is_a_parse_error() {
        let err = validate("User", "type User {", DeclKind::Object, &Checks::Declaration).unwrap_err();
        assert!(matches!(err, SchemaError::Validation(ValidationError::Parse { .. })));
    }

    #[test]
    fn declaration_must_have_expected_kind() {
        let err = validate("Role", "type Role { x: Int }", DeclKind::Enum, &Checks::Declaration).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Validation(ValidationError::MissingDeclaration {
                kind: DeclKind::Enum,
                ..
            })
        ));
        assert!(validate("Role", "enum Role { A }", DeclKind::Enum, &Checks::Declaration).is_ok());
        assert!(validate("key", "directive @key on OBJECT", DeclKind::Directive, &Checks::Declaration).is_ok());
    }

    #[test]
    fn unknown_field_handler_is_named() {
        let err = validate("User", USER, DeclKind::Object, &keys(&["user"], &["heightCm"])).unwrap_err();
        match err {
            SchemaError::Validation(ValidationError::UnknownField { owner, field, .. }) => {
                assert_eq!(owner, "Fields");
                assert_eq!(field, "heightCm");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn root_fields_need_handlers_but_type_fields_do_not() {
        let err = validate("User", USER, DeclKind::Object, &keys(&[], &[])).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::Validation(ValidationError::UnknownHandler { ref owner, ref field, .. })
                if owner == "Query" && field == "user"
        ));
        assert!(validate("User", USER, DeclKind::Object, &keys(&["user"], &[])).is_ok());

        let err = validate("User", USER, DeclKind::Object, &keys(&["user", "users"], &[])).unwrap_err();
        assert!(err.to_string().contains("Query.users"));
    }

    #[test]
    fn enum_mapping_is_checked_both_ways() {
        let text = "enum Role { ADMIN GUEST }";
        let both = |v: &[&str]| Checks::EnumValues(v.iter().map(|s| (*s).to_owned()).collect());
        assert!(validate("Role", text, DeclKind::Enum, &both(&["ADMIN", "GUEST"])).is_ok());
        assert!(validate("Role", text, DeclKind::Enum, &both(&["ADMIN"])).is_err());
        assert!(validate("Role", text, DeclKind::Enum, &both(&["ADMIN", "GUEST", "ROOT"])).is_err());
    }

    #[test]
    fn validating_normalized_text_is_idempotent() {
        let checks = keys(&["user"], &["age"]);
        let once = validate("User", USER, DeclKind::Object, &checks).unwrap();
        let twice = validate("User", &once, DeclKind::Object, &checks).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn declared_fields_and_field_keys_survive_normalization() {
        let node = Node::builder("User")
            .type_text(USER)
            .query("user", Handler::value(json!(null)))
            .field("age", Handler::value(json!(3)))
            .build()
            .unwrap();
        let normalized = validate_node(&node).unwrap();
        let doc = sdl::parse(&normalized).unwrap();
        assert_eq!(
            fields_of(&doc, "User"),
            BTreeSet::from(["id".to_owned(), "age".to_owned()])
        );
        assert_eq!(node.handler_keys().fields, BTreeSet::from(["age".to_owned()]));
    }
}
