// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema composer: flattens a node tree plus appliances into one schema.

use quilt_proto::Bucket;
use quilt_resolve::{wrap, ResolverTree, Wrapped};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

use crate::fragment::{Appliance, Node};
use crate::registry::{field_resolver, register_into, RegisteredNames, Registration};
use crate::validate::validate_node;
use crate::{apply_directives, sdl, DirectiveHandler, SchemaError};

/// Output of [`compose`].
#[derive(Debug, Clone)]
pub struct ComposedSchema {
    /// Merged SDL of every fragment.
    pub schema_text: String,
    /// Wrapped handlers plus enum, scalar and abstract-type callables.
    pub resolvers: ResolverTree,
    /// Directive visitors, never part of the resolver tree.
    pub directives: Vec<DirectiveHandler>,
}

impl ComposedSchema {
    /// `schema_text` with every directive visitor applied.
    pub fn transformed_text(&self) -> Result<String, SchemaError> {
        apply_directives(&self.schema_text, &self.directives)
    }
}

fn insert_unique<V>(
    bucket: &mut BTreeMap<String, V>,
    key: &str,
    value: V,
    bucket_name: Bucket,
    node: &str,
) -> Result<(), SchemaError> {
    match bucket.entry(key.to_owned()) {
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
        Entry::Occupied(_) => Err(SchemaError::DuplicateHandler {
            bucket: bucket_name.as_str().to_owned(),
            field: key.to_owned(),
            node: node.to_owned(),
        }),
    }
}

#[derive(Default)]
struct Composer {
    names: RegisteredNames,
    node_texts: Vec<String>,
    tree: ResolverTree,
    registration: Registration,
}

impl Composer {
    fn add_node(&mut self, node: &Node) -> Result<(), SchemaError> {
        self.names.insert(node.name())?;
        self.node_texts.push(validate_node(node)?);

        for bucket in Bucket::ROOTS {
            for (field, handler) in node.handlers(bucket) {
                match (bucket, wrap(handler, node.wrap_options(bucket, field))) {
                    (Bucket::Query, Wrapped::Resolver(r)) => {
                        insert_unique(&mut self.tree.query, field, r, bucket, node.name())?;
                    }
                    (Bucket::Mutation, Wrapped::Resolver(r)) => {
                        insert_unique(&mut self.tree.mutation, field, r, bucket, node.name())?;
                    }
                    (Bucket::Subscription, Wrapped::Subscriber(s)) => {
                        insert_unique(&mut self.tree.subscription, field, s, bucket, node.name())?;
                    }
                    _ => {
                        return Err(SchemaError::config(format!(
                            "`{}.{bucket}.{field}` has the wrong handler shape",
                            node.name()
                        )));
                    }
                }
            }
        }

        let mut fields = BTreeMap::new();
        for (field, handler) in node.handlers(Bucket::Fields) {
            let resolver = field_resolver(handler, node.wrap_options(Bucket::Fields, field))?;
            fields.insert(field.to_owned(), resolver);
        }
        self.tree.fields.entry(node.name().to_owned()).or_default().extend(fields);

        register_into(node.appliances(), &mut self.names, &mut self.registration)?;
        for child in node.nodes() {
            self.add_node(child)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<ComposedSchema, SchemaError> {
        let Composer {
            names,
            node_texts,
            mut tree,
            registration,
        } = self;
        let schema_text = sdl::merge_and_print(node_texts.iter().chain(&registration.type_texts))?;

        let Registration {
            resolvers, directives, ..
        } = registration;
        tree.enums.extend(resolvers.enums);
        tree.scalars.extend(resolvers.scalars);
        tree.abstracts.extend(resolvers.abstracts);
        for (type_name, fields) in resolvers.fields {
            tree.fields.entry(type_name).or_default().extend(fields);
        }
        tree.prune();

        debug!(
            fragments = names.iter().count(),
            query = tree.query.len(),
            mutation = tree.mutation.len(),
            subscription = tree.subscription.len(),
            "composed schema"
        );
        Ok(ComposedSchema {
            schema_text,
            resolvers: tree,
            directives,
        })
    }
}

/// Compose a node tree and top-level appliances.
///
/// Nodes are flattened depth first; each node's scoped appliances are
/// registered alongside it and top-level appliances after every node. Any
/// validation or duplicate error aborts the whole composition.
pub fn compose(nodes: &[Node], appliances: &[Appliance]) -> Result<ComposedSchema, SchemaError> {
    let mut composer = Composer::default();
    for node in nodes {
        composer.add_node(node)?;
    }
    register_into(appliances, &mut composer.names, &mut composer.registration)?;
    composer.finish()
}
