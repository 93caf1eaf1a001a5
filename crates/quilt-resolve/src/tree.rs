// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The composed resolver tree handed to the execution engine.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{BoxError, WrappedResolver, WrappedSubscriber};

/// Validates (and may coerce) a custom scalar value, both on input and output.
pub type ScalarValidator = Arc<dyn Fn(&Value) -> Result<Value, BoxError> + Send + Sync>;

/// Picks the concrete object type name for a union/interface value.
pub type TypeResolver = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Erase a closure into a [`ScalarValidator`].
pub fn scalar_validator<F>(f: F) -> ScalarValidator
where
    F: Fn(&Value) -> Result<Value, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Erase a closure into a [`TypeResolver`].
pub fn type_resolver<F>(f: F) -> TypeResolver
where
    F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Resolves abstract types through the `__typename` key of the value.
pub fn typename_resolver() -> TypeResolver {
    type_resolver(|value| {
        value
            .get("__typename")
            .and_then(Value::as_str)
            .map(str::to_owned)
    })
}

/// Maps GraphQL enum value names to the internal values handlers use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumMapping {
    values: BTreeMap<String, Value>,
}

impl EnumMapping {
    /// Mapping from `(enum name, internal value)` pairs.
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    /// Enum value names with a mapping.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Underlying map.
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Internal value for an enum name; unmapped names pass through as strings.
    pub fn to_internal(&self, name: &str) -> Value {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::String(name.to_owned()))
    }

    /// Enum name for an internal value, if any maps to it. A string equal to a
    /// declared name with no mapping of its own is accepted as-is.
    pub fn to_name(&self, internal: &Value) -> Option<String> {
        if let Some((name, _)) = self.values.iter().find(|(_, v)| *v == internal) {
            return Some(name.clone());
        }
        internal.as_str().map(str::to_owned)
    }
}

/// Every callable of a composition, grouped by bucket.
///
/// `fields` is keyed by owning type, then field name. Empty buckets are
/// removed by [`ResolverTree::prune`].
#[derive(Clone, Default)]
pub struct ResolverTree {
    /// `Query` root fields.
    pub query: BTreeMap<String, WrappedResolver>,
    /// `Mutation` root fields.
    pub mutation: BTreeMap<String, WrappedResolver>,
    /// `Subscription` root fields.
    pub subscription: BTreeMap<String, WrappedSubscriber>,
    /// Per-type field resolvers.
    pub fields: BTreeMap<String, BTreeMap<String, WrappedResolver>>,
    /// Enum value mappings by enum name.
    pub enums: BTreeMap<String, EnumMapping>,
    /// Custom scalar validators by scalar name.
    pub scalars: BTreeMap<String, ScalarValidator>,
    /// Abstract type resolvers by union/interface name.
    pub abstracts: BTreeMap<String, TypeResolver>,
}

impl ResolverTree {
    /// Drop per-type field maps left empty.
    pub fn prune(&mut self) {
        self.fields.retain(|_, fields| !fields.is_empty());
    }

    /// True when no bucket holds anything.
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
            && self.mutation.is_empty()
            && self.subscription.is_empty()
            && self.fields.values().all(BTreeMap::is_empty)
            && self.enums.is_empty()
            && self.scalars.is_empty()
            && self.abstracts.is_empty()
    }

    /// Field resolver for `type_name.field`.
    pub fn field(&self, type_name: &str, field: &str) -> Option<&WrappedResolver> {
        self.fields.get(type_name).and_then(|f| f.get(field))
    }
}

impl fmt::Debug for ResolverTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverTree")
            .field("query", &self.query.keys().collect::<Vec<_>>())
            .field("mutation", &self.mutation.keys().collect::<Vec<_>>())
            .field("subscription", &self.subscription.keys().collect::<Vec<_>>())
            .field(
                "fields",
                &self
                    .fields
                    .iter()
                    .map(|(t, f)| (t, f.keys().collect::<Vec<_>>()))
                    .collect::<Vec<_>>(),
            )
            .field("enums", &self.enums)
            .field("scalars", &self.scalars.keys().collect::<Vec<_>>())
            .field("abstracts", &self.abstracts.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{wrap, Handler, WrapOptions, Wrapped};
    use serde_json::json;

    #[test]
    fn enum_mapping_translates_both_ways() {
        let mapping = EnumMapping::new(BTreeMap::from([
            ("ADMIN".to_owned(), json!(1)),
            ("GUEST".to_owned(), json!(0)),
        ]));
        assert_eq!(mapping.to_internal("ADMIN"), json!(1));
        assert_eq!(mapping.to_name(&json!(0)).as_deref(), Some("GUEST"));
        assert_eq!(mapping.to_internal("OTHER"), json!("OTHER"));
    }

    #[test]
    fn typename_resolver_reads_typename_key() {
        let resolve = typename_resolver();
        assert_eq!(resolve(&json!({"__typename": "User"})).as_deref(), Some("User"));
        assert_eq!(resolve(&json!({"id": 1})), None);
    }

    #[test]
    fn prune_drops_empty_field_maps() {
        let mut tree = ResolverTree::default();
        tree.fields.insert("User".into(), BTreeMap::new());
        assert!(tree.is_empty());
        tree.prune();
        assert!(tree.fields.is_empty());

        let Wrapped::Resolver(age) = wrap(&Handler::value(json!(3)), WrapOptions::named("User.Fields.age")) else {
            unreachable!()
        };
        tree.fields.entry("User".into()).or_default().insert("age".into(), age);
        tree.prune();
        assert!(tree.field("User", "age").is_some());
        assert!(!tree.is_empty());
    }
}
