// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! SDL parse, merge and print.
//!
//! Parsing is delegated to `async-graphql-parser`. Merging unions every
//! declaration by name: object, interface and input fields are unioned
//! (identical repeats collapse, differing repeats are a conflict), enum values
//! and union members are unioned, and `extend` definitions fold into their
//! base. Printing is deterministic, so `print(parse(print(doc)))` is stable.

use async_graphql_parser::types::{
    ConstDirective, DirectiveDefinition, DirectiveLocation, EnumValueDefinition, FieldDefinition,
    InputValueDefinition, SchemaDefinition, ServiceDocument, TypeDefinition, TypeKind,
    TypeSystemDefinition,
};
use async_graphql_parser::{parse_schema, Pos, Positioned};
use async_graphql_value::Name;
use std::collections::HashMap;

use crate::SchemaError;

/// Parse SDL text.
pub fn parse(text: &str) -> Result<ServiceDocument, SchemaError> {
    parse_schema(text).map_err(|e| SchemaError::Parse(e.to_string()))
}

/// Merge documents into one, folding repeated declarations together.
pub fn merge<I>(docs: I) -> Result<ServiceDocument, SchemaError>
where
    I: IntoIterator<Item = ServiceDocument>,
{
    let mut merger = Merger::default();
    for doc in docs {
        for def in doc.definitions {
            merger.add(def)?;
        }
    }
    Ok(merger.finish())
}

/// Parse, merge and print a set of SDL texts.
pub fn merge_and_print<I, S>(texts: I) -> Result<String, SchemaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let docs = texts
        .into_iter()
        .map(|t| parse(t.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(print(&merge(docs)?))
}

#[derive(Default)]
struct Merger {
    schema: Option<SchemaDefinition>,
    types: Vec<TypeDefinition>,
    type_index: HashMap<String, usize>,
    directives: Vec<DirectiveDefinition>,
    directive_index: HashMap<String, usize>,
}

impl Merger {
    fn add(&mut self, def: TypeSystemDefinition) -> Result<(), SchemaError> {
        match def {
            TypeSystemDefinition::Schema(schema) => self.add_schema(schema.node),
            TypeSystemDefinition::Type(ty) => self.add_type(ty.node),
            TypeSystemDefinition::Directive(directive) => self.add_directive(directive.node),
        }
    }

    fn add_schema(&mut self, incoming: SchemaDefinition) -> Result<(), SchemaError> {
        let Some(existing) = self.schema.as_mut() else {
            self.schema = Some(SchemaDefinition {
                extend: false,
                ..incoming
            });
            return Ok(());
        };
        for (slot, new, op) in [
            (&mut existing.query, incoming.query, "query"),
            (&mut existing.mutation, incoming.mutation, "mutation"),
            (&mut existing.subscription, incoming.subscription, "subscription"),
        ] {
            let Some(b) = new else { continue };
            match slot {
                Some(a) if a.node != b.node => {
                    return Err(SchemaError::Merge(format!(
                        "schema {op} root is both `{}` and `{}`",
                        a.node, b.node
                    )));
                }
                Some(_) => {}
                None => *slot = Some(b),
            }
        }
        merge_directives(&mut existing.directives, incoming.directives);
        Ok(())
    }

    fn add_directive(&mut self, incoming: DirectiveDefinition) -> Result<(), SchemaError> {
        let name = incoming.name.node.to_string();
        if let Some(&i) = self.directive_index.get(&name) {
            let (a, b) = (
                print_directive_definition(&self.directives[i]),
                print_directive_definition(&incoming),
            );
            if a != b {
                return Err(SchemaError::Merge(format!(
                    "conflicting definitions of `@{name}`: `{a}` vs `{b}`"
                )));
            }
            return Ok(());
        }
        self.directive_index.insert(name, self.directives.len());
        self.directives.push(incoming);
        Ok(())
    }

    fn add_type(&mut self, incoming: TypeDefinition) -> Result<(), SchemaError> {
        let name = incoming.name.node.to_string();
        let Some(&i) = self.type_index.get(&name) else {
            self.type_index.insert(name, self.types.len());
            self.types.push(TypeDefinition {
                extend: false,
                ..incoming
            });
            return Ok(());
        };
        let existing = &mut self.types[i];
        let TypeDefinition {
            description,
            directives,
            kind,
            ..
        } = incoming;
        if existing.description.is_none() {
            existing.description = description;
        }
        merge_directives(&mut existing.directives, directives);
        match (&mut existing.kind, kind) {
            (TypeKind::Scalar, TypeKind::Scalar) => {}
            (TypeKind::Object(a), TypeKind::Object(b)) => {
                merge_names(&mut a.implements, b.implements);
                merge_fields(&name, &mut a.fields, b.fields)?;
            }
            (TypeKind::Interface(a), TypeKind::Interface(b)) => {
                merge_names(&mut a.implements, b.implements);
                merge_fields(&name, &mut a.fields, b.fields)?;
            }
            (TypeKind::Union(a), TypeKind::Union(b)) => merge_names(&mut a.members, b.members),
            (TypeKind::Enum(a), TypeKind::Enum(b)) => merge_enum_values(&mut a.values, b.values),
            (TypeKind::InputObject(a), TypeKind::InputObject(b)) => {
                merge_inputs(&name, &mut a.fields, b.fields)?;
            }
            (a, b) => {
                return Err(SchemaError::Merge(format!(
                    "`{name}` is declared both as {} and as {}",
                    kind_name(a),
                    kind_name(&b)
                )));
            }
        }
        Ok(())
    }

    fn finish(self) -> ServiceDocument {
        let mut definitions = Vec::with_capacity(self.types.len() + self.directives.len() + 1);
        definitions.extend(
            self.directives
                .into_iter()
                .map(|d| TypeSystemDefinition::Directive(positioned(d))),
        );
        if let Some(schema) = self.schema {
            definitions.push(TypeSystemDefinition::Schema(positioned(schema)));
        }
        definitions.extend(
            self.types
                .into_iter()
                .map(|t| TypeSystemDefinition::Type(positioned(t))),
        );
        ServiceDocument { definitions }
    }
}

fn positioned<T>(node: T) -> Positioned<T> {
    Positioned::new(node, Pos::default())
}

fn kind_name(kind: &TypeKind) -> &'static str {
    match kind {
        TypeKind::Scalar => "a scalar",
        TypeKind::Object(_) => "an object type",
        TypeKind::Interface(_) => "an interface",
        TypeKind::Union(_) => "a union",
        TypeKind::Enum(_) => "an enum",
        TypeKind::InputObject(_) => "an input object",
    }
}

fn merge_names(existing: &mut Vec<Positioned<Name>>, incoming: Vec<Positioned<Name>>) {
    for name in incoming {
        if !existing.iter().any(|n| n.node == name.node) {
            existing.push(name);
        }
    }
}

fn merge_directives(
    existing: &mut Vec<Positioned<ConstDirective>>,
    incoming: Vec<Positioned<ConstDirective>>,
) {
    for directive in incoming {
        let printed = print_const_directive(&directive.node);
        if !existing
            .iter()
            .any(|d| print_const_directive(&d.node) == printed)
        {
            existing.push(directive);
        }
    }
}

fn merge_enum_values(
    existing: &mut Vec<Positioned<EnumValueDefinition>>,
    incoming: Vec<Positioned<EnumValueDefinition>>,
) {
    for value in incoming {
        if !existing.iter().any(|v| v.node.value.node == value.node.value.node) {
            existing.push(value);
        }
    }
}

fn merge_fields(
    owner: &str,
    existing: &mut Vec<Positioned<FieldDefinition>>,
    incoming: Vec<Positioned<FieldDefinition>>,
) -> Result<(), SchemaError> {
    for field in incoming {
        match existing.iter().find(|f| f.node.name.node == field.node.name.node) {
            Some(found) => {
                let (a, b) = (print_field(&found.node), print_field(&field.node));
                if a != b {
                    return Err(SchemaError::Merge(format!(
                        "conflicting definitions of `{owner}.{}`: `{a}` vs `{b}`",
                        field.node.name.node
                    )));
                }
            }
            None => existing.push(field),
        }
    }
    Ok(())
}

fn merge_inputs(
    owner: &str,
    existing: &mut Vec<Positioned<InputValueDefinition>>,
    incoming: Vec<Positioned<InputValueDefinition>>,
) -> Result<(), SchemaError> {
    for field in incoming {
        match existing.iter().find(|f| f.node.name.node == field.node.name.node) {
            Some(found) => {
                let (a, b) = (print_input_value(&found.node), print_input_value(&field.node));
                if a != b {
                    return Err(SchemaError::Merge(format!(
                        "conflicting definitions of `{owner}.{}`: `{a}` vs `{b}`",
                        field.node.name.node
                    )));
                }
            }
            None => existing.push(field),
        }
    }
    Ok(())
}

// ── printing ────────────────────────────────────────────────────────

/// Print a document as SDL.
pub fn print(doc: &ServiceDocument) -> String {
    let blocks: Vec<String> = doc
        .definitions
        .iter()
        .map(|def| match def {
            TypeSystemDefinition::Schema(s) => print_schema(&s.node),
            TypeSystemDefinition::Type(t) => print_type(&t.node),
            TypeSystemDefinition::Directive(d) => print_directive_definition(&d.node),
        })
        .collect();
    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

fn description(desc: Option<&Positioned<String>>, indent: &str) -> String {
    desc.map_or_else(String::new, |d| {
        format!("{indent}\"\"\"{}\"\"\"\n", d.node.replace("\"\"\"", "\\\"\"\""))
    })
}

fn inline_description(desc: Option<&Positioned<String>>) -> String {
    desc.map_or_else(String::new, |d| {
        format!("\"\"\"{}\"\"\" ", d.node.replace("\"\"\"", "\\\"\"\""))
    })
}

fn print_const_directive(d: &ConstDirective) -> String {
    if d.arguments.is_empty() {
        return format!("@{}", d.name.node);
    }
    let args: Vec<String> = d
        .arguments
        .iter()
        .map(|(name, value)| format!("{}: {}", name.node, value.node))
        .collect();
    format!("@{}({})", d.name.node, args.join(", "))
}

fn directives(list: &[Positioned<ConstDirective>]) -> String {
    list.iter()
        .map(|d| format!(" {}", print_const_directive(&d.node)))
        .collect()
}

fn print_input_value(v: &InputValueDefinition) -> String {
    let default = v
        .default_value
        .as_ref()
        .map_or_else(String::new, |d| format!(" = {}", d.node));
    format!(
        "{}{}: {}{default}{}",
        inline_description(v.description.as_ref()),
        v.name.node,
        v.ty.node,
        directives(&v.directives)
    )
}

fn arguments(args: &[Positioned<InputValueDefinition>]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let args: Vec<String> = args.iter().map(|a| print_input_value(&a.node)).collect();
    format!("({})", args.join(", "))
}

fn print_field(f: &FieldDefinition) -> String {
    format!(
        "{}{}: {}{}",
        f.name.node,
        arguments(&f.arguments),
        f.ty.node,
        directives(&f.directives)
    )
}

fn block(lines: Vec<String>) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = String::from(" {\n");
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out.push('}');
    out
}

fn implements(names: &[Positioned<Name>]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = names.iter().map(|n| n.node.as_str()).collect();
    format!(" implements {}", names.join(" & "))
}

fn field_lines(fields: &[Positioned<FieldDefinition>]) -> Vec<String> {
    fields
        .iter()
        .map(|f| {
            format!(
                "{}  {}",
                description(f.node.description.as_ref(), "  "),
                print_field(&f.node)
            )
        })
        .collect()
}

fn print_type(t: &TypeDefinition) -> String {
    let name = &t.name.node;
    let extend = if t.extend { "extend " } else { "" };
    let dirs = directives(&t.directives);
    let body = match &t.kind {
        TypeKind::Scalar => format!("{extend}scalar {name}{dirs}"),
        TypeKind::Object(o) => format!(
            "{extend}type {name}{}{dirs}{}",
            implements(&o.implements),
            block(field_lines(&o.fields))
        ),
        TypeKind::Interface(i) => format!(
            "{extend}interface {name}{}{dirs}{}",
            implements(&i.implements),
            block(field_lines(&i.fields))
        ),
        TypeKind::Union(u) => {
            let members: Vec<&str> = u.members.iter().map(|m| m.node.as_str()).collect();
            if members.is_empty() {
                format!("{extend}union {name}{dirs}")
            } else {
                format!("{extend}union {name}{dirs} = {}", members.join(" | "))
            }
        }
        TypeKind::Enum(e) => {
            let lines = e
                .values
                .iter()
                .map(|v| {
                    format!(
                        "{}  {}{}",
                        description(v.node.description.as_ref(), "  "),
                        v.node.value.node,
                        directives(&v.node.directives)
                    )
                })
                .collect();
            format!("{extend}enum {name}{dirs}{}", block(lines))
        }
        TypeKind::InputObject(i) => {
            let lines = i
                .fields
                .iter()
                .map(|f| format!("  {}", print_input_value(&f.node)))
                .collect();
            format!("{extend}input {name}{dirs}{}", block(lines))
        }
    };
    format!("{}{body}", description(t.description.as_ref(), ""))
}

fn print_schema(s: &SchemaDefinition) -> String {
    let extend = if s.extend { "extend " } else { "" };
    let mut lines = Vec::new();
    for (op, root) in [
        ("query", &s.query),
        ("mutation", &s.mutation),
        ("subscription", &s.subscription),
    ] {
        if let Some(root) = root {
            lines.push(format!("  {op}: {}", root.node));
        }
    }
    format!("{extend}schema{}{}", directives(&s.directives), block(lines))
}

fn location(loc: &DirectiveLocation) -> &'static str {
    match loc {
        DirectiveLocation::Query => "QUERY",
        DirectiveLocation::Mutation => "MUTATION",
        DirectiveLocation::Subscription => "SUBSCRIPTION",
        DirectiveLocation::Field => "FIELD",
        DirectiveLocation::FragmentDefinition => "FRAGMENT_DEFINITION",
        DirectiveLocation::FragmentSpread => "FRAGMENT_SPREAD",
        DirectiveLocation::InlineFragment => "INLINE_FRAGMENT",
        DirectiveLocation::VariableDefinition => "VARIABLE_DEFINITION",
        DirectiveLocation::Schema => "SCHEMA",
        DirectiveLocation::Scalar => "SCALAR",
        DirectiveLocation::Object => "OBJECT",
        DirectiveLocation::FieldDefinition => "FIELD_DEFINITION",
        DirectiveLocation::ArgumentDefinition => "ARGUMENT_DEFINITION",
        DirectiveLocation::Interface => "INTERFACE",
        DirectiveLocation::Union => "UNION",
        DirectiveLocation::Enum => "ENUM",
        DirectiveLocation::EnumValue => "ENUM_VALUE",
        DirectiveLocation::InputObject => "INPUT_OBJECT",
        DirectiveLocation::InputFieldDefinition => "INPUT_FIELD_DEFINITION",
    }
}

fn print_directive_definition(d: &DirectiveDefinition) -> String {
    let locations: Vec<&str> = d.locations.iter().map(|l| location(&l.node)).collect();
    format!(
        "{}directive @{}{}{} on {}",
        description(d.description.as_ref(), ""),
        d.name.node,
        arguments(&d.arguments),
        if d.is_repeatable { " repeatable" } else { "" },
        locations.join(" | ")
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extensions_fold_into_one_root() {
        let out = merge_and_print([
            "type User { id: ID! }\nextend type Query { user(id: ID!): User }",
            "type Post { title: String }\ntype Query { post: Post }",
        ])
        .unwrap();
        assert!(out.contains("type Query {\n  user(id: ID!): User\n  post: Post\n}"));
        assert!(!out.contains("extend"));
        assert!(out.contains("type User {\n  id: ID!\n}"));
    }

    #[test]
    fn identical_repeats_collapse_and_conflicts_fail() {
        let same = merge_and_print(["type A { x: Int }", "type A { x: Int }"]).unwrap();
        assert_eq!(same, "type A {\n  x: Int\n}\n");

        let err = merge_and_print(["type A { x: Int }", "type A { x: String }"]).unwrap_err();
        assert!(matches!(err, SchemaError::Merge(ref m) if m.contains("A.x")));
    }

    #[test]
    fn kind_mismatch_is_a_conflict() {
        let err = merge_and_print(["enum Role { A }", "type Role { a: Int }"]).unwrap_err();
        assert!(err.to_string().contains("`Role`"));
    }

    #[test]
    fn enums_unions_and_directives_union() {
        let out = merge_and_print([
            "enum Role { ADMIN }\nunion Hit = User\ndirective @hidden on FIELD_DEFINITION",
            "enum Role { GUEST ADMIN }\nunion Hit = Post\ndirective @hidden on FIELD_DEFINITION\ntype User { id: ID }\ntype Post { id: ID }",
        ])
        .unwrap();
        assert!(out.starts_with("directive @hidden on FIELD_DEFINITION\n"));
        assert!(out.contains("enum Role {\n  ADMIN\n  GUEST\n}"));
        assert!(out.contains("union Hit = User | Post"));
    }

    #[test]
    fn printing_is_stable() {
        let text = r#"
            """A person"""
            type User implements Node @key(fields: "id") {
              id: ID!
              posts(first: Int = 10, after: String): [Post!]!
            }
            interface Node { id: ID! }
            type Post { id: ID! }
            input Filter { q: String = "x", tags: [String!] }
            scalar Date
            schema { query: Query }
            type Query { me: User }
        "#;
        let once = print(&parse(text).unwrap());
        let twice = print(&parse(&once).unwrap());
        assert_eq!(once, twice);
        assert!(once.contains("\"\"\"A person\"\"\"\ntype User implements Node @key(fields: \"id\")"));
        assert!(once.contains("posts(first: Int = 10, after: String): [Post!]!"));
    }
}
