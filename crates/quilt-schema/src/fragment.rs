// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema fragments: nodes and appliances.
//!
//! A [`Node`] owns one object type and four handler buckets; every other
//! fragment kind is an [`Appliance`]. Shapes are checked when a fragment is
//! built so malformed handlers never reach composition.

use quilt_proto::{ApplianceKind, ApplianceRecord, Bucket, ContentHash, HandlerKeys, IntrospectionRecord};
use quilt_resolve::{EnumMapping, Handler, Injections, PostHook, PreHook, ScalarValidator, TypeResolver, WrapOptions};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::validate;
use crate::{DeclKind, SchemaDirective, SchemaError, TypeSource};

/// Names no fragment may take.
pub const RESERVED_NAMES: [&str; 9] = [
    "Query",
    "Mutation",
    "Subscription",
    "Fields",
    "String",
    "Int",
    "Float",
    "Boolean",
    "ID",
];

pub(crate) fn check_name(name: &str) -> Result<(), SchemaError> {
    if name.trim().is_empty() {
        return Err(SchemaError::config("fragment name must not be empty"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(SchemaError::config(format!(
            "`{name}` is reserved and cannot name a fragment"
        )));
    }
    Ok(())
}

/// A custom scalar and its optional validator.
#[derive(Clone)]
pub struct ScalarFragment {
    pub(crate) name: String,
    pub(crate) source: TypeSource,
    pub(crate) validator: Option<ScalarValidator>,
}

impl ScalarFragment {
    /// Scalar `name` declared by `source`.
    pub fn new(name: impl Into<String>, source: impl Into<TypeSource>) -> Result<Self, SchemaError> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            source: source.into(),
            validator: None,
        })
    }

    /// Validate (and coerce) values of this scalar.
    pub fn validator(mut self, validator: ScalarValidator) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// An enum, optionally mapping value names to internal values.
#[derive(Clone)]
pub struct EnumFragment {
    pub(crate) name: String,
    pub(crate) source: TypeSource,
    pub(crate) mapping: Option<EnumMapping>,
}

impl EnumFragment {
    /// Enum `name` declared by `source`.
    pub fn new(name: impl Into<String>, source: impl Into<TypeSource>) -> Result<Self, SchemaError> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            source: source.into(),
            mapping: None,
        })
    }

    /// Map every declared value to an internal value. The keys must match the
    /// declared values exactly.
    pub fn values(mut self, values: BTreeMap<String, Value>) -> Self {
        self.mapping = Some(EnumMapping::new(values));
        self
    }
}

/// A directive definition and the visitor that implements it.
#[derive(Clone)]
pub struct DirectiveFragment {
    pub(crate) name: String,
    pub(crate) source: TypeSource,
    pub(crate) visitor: Arc<dyn SchemaDirective>,
}

impl DirectiveFragment {
    /// Directive `@name` declared by `source`.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<TypeSource>,
        visitor: Arc<dyn SchemaDirective>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            source: source.into(),
            visitor,
        })
    }
}

/// A union or interface with its type resolver.
#[derive(Clone)]
pub struct AbstractFragment {
    pub(crate) kind: DeclKind,
    pub(crate) name: String,
    pub(crate) source: TypeSource,
    pub(crate) resolve_type: Option<TypeResolver>,
}

impl AbstractFragment {
    fn new(kind: DeclKind, name: String, source: TypeSource) -> Result<Self, SchemaError> {
        check_name(&name)?;
        Ok(Self {
            kind,
            name,
            source,
            resolve_type: None,
        })
    }

    /// Union `name` declared by `source`.
    pub fn union(name: impl Into<String>, source: impl Into<TypeSource>) -> Result<Self, SchemaError> {
        Self::new(DeclKind::Union, name.into(), source.into())
    }

    /// Interface `name` declared by `source`.
    pub fn interface(
        name: impl Into<String>,
        source: impl Into<TypeSource>,
    ) -> Result<Self, SchemaError> {
        Self::new(DeclKind::Interface, name.into(), source.into())
    }

    /// Custom type resolution; defaults to the value's `__typename`.
    pub fn resolve_type(mut self, resolver: TypeResolver) -> Self {
        self.resolve_type = Some(resolver);
        self
    }
}

/// A plain object type with optional field resolvers.
#[derive(Clone)]
pub struct ObjectFragment {
    pub(crate) name: String,
    pub(crate) source: TypeSource,
    pub(crate) fields: BTreeMap<String, Handler>,
}

impl ObjectFragment {
    /// Object type `name` declared by `source`.
    pub fn new(name: impl Into<String>, source: impl Into<TypeSource>) -> Result<Self, SchemaError> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            source: source.into(),
            fields: BTreeMap::new(),
        })
    }

    /// Add a field resolver; subscriptions are rejected.
    pub fn field(
        mut self,
        field: impl Into<String>,
        handler: impl Into<Handler>,
    ) -> Result<Self, SchemaError> {
        let field = field.into();
        let handler = handler.into();
        if handler.is_subscription() {
            return Err(SchemaError::config(format!(
                "`{}.{field}`: field resolvers cannot be subscriptions",
                self.name
            )));
        }
        self.fields.insert(field, handler);
        Ok(self)
    }
}

/// Raw SDL merged as-is, without naming or handler checks.
#[derive(Debug, Clone)]
pub struct GlobalText {
    pub(crate) sources: Vec<TypeSource>,
}

impl GlobalText {
    /// A single global fragment.
    pub fn new(source: impl Into<TypeSource>) -> Self {
        Self {
            sources: vec![source.into()],
        }
    }

    /// An ordered list of global fragments.
    pub fn many<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TypeSource>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }
}

/// Any non-node fragment.
#[derive(Clone)]
pub enum Appliance {
    /// Custom scalar.
    Scalar(ScalarFragment),
    /// Enum.
    Enum(EnumFragment),
    /// Directive visitor.
    Directive(DirectiveFragment),
    /// Union or interface.
    Abstract(AbstractFragment),
    /// Object type.
    Object(ObjectFragment),
    /// Raw SDL.
    Global(GlobalText),
}

impl Appliance {
    /// Fragment name; global text has none.
    pub fn name(&self) -> Option<&str> {
        match self {
            Appliance::Scalar(f) => Some(&f.name),
            Appliance::Enum(f) => Some(&f.name),
            Appliance::Directive(f) => Some(&f.name),
            Appliance::Abstract(f) => Some(&f.name),
            Appliance::Object(f) => Some(&f.name),
            Appliance::Global(_) => None,
        }
    }

    /// Registration order: scalars, enums, directives, abstracts, objects, globals.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Appliance::Scalar(_) => 0,
            Appliance::Enum(_) => 1,
            Appliance::Directive(_) => 2,
            Appliance::Abstract(_) => 3,
            Appliance::Object(_) => 4,
            Appliance::Global(_) => 5,
        }
    }

    /// Kind when the appliance may be scoped to a node.
    pub fn scoped_kind(&self) -> Option<ApplianceKind> {
        match self {
            Appliance::Enum(_) => Some(ApplianceKind::Enum),
            Appliance::Abstract(f) if f.kind == DeclKind::Union => Some(ApplianceKind::Union),
            Appliance::Abstract(_) => Some(ApplianceKind::Interface),
            Appliance::Object(_) => Some(ApplianceKind::ObjectType),
            Appliance::Scalar(_) | Appliance::Directive(_) | Appliance::Global(_) => None,
        }
    }

    /// Validate and summarize a node-scoped appliance.
    pub(crate) fn record(&self) -> Result<ApplianceRecord, SchemaError> {
        let Some(kind) = self.scoped_kind() else {
            return Err(SchemaError::config(
                "only enums, unions, interfaces and object types can be scoped to a node",
            ));
        };
        let (name, type_text) = validate::validate_appliance(self)?;
        let mut record = ApplianceRecord {
            kind,
            name,
            type_text,
            fields: Default::default(),
            values: BTreeMap::new(),
        };
        match self {
            Appliance::Object(f) => record.fields = f.fields.keys().cloned().collect(),
            Appliance::Enum(f) => {
                if let Some(mapping) = &f.mapping {
                    record.values = mapping.as_map().clone();
                }
            }
            _ => {}
        }
        Ok(record)
    }
}

impl From<ScalarFragment> for Appliance {
    fn from(f: ScalarFragment) -> Self {
        Appliance::Scalar(f)
    }
}

impl From<EnumFragment> for Appliance {
    fn from(f: EnumFragment) -> Self {
        Appliance::Enum(f)
    }
}

impl From<DirectiveFragment> for Appliance {
    fn from(f: DirectiveFragment) -> Self {
        Appliance::Directive(f)
    }
}

impl From<AbstractFragment> for Appliance {
    fn from(f: AbstractFragment) -> Self {
        Appliance::Abstract(f)
    }
}

impl From<ObjectFragment> for Appliance {
    fn from(f: ObjectFragment) -> Self {
        Appliance::Object(f)
    }
}

impl From<GlobalText> for Appliance {
    fn from(f: GlobalText) -> Self {
        Appliance::Global(f)
    }
}

/// A domain object type with its handler buckets.
#[derive(Clone)]
pub struct Node {
    name: String,
    source: TypeSource,
    handlers: BTreeMap<Bucket, BTreeMap<String, Handler>>,
    nodes: Vec<Node>,
    appliances: Vec<Appliance>,
    injections: Option<Injections>,
    pre: Vec<PreHook>,
    post: Vec<PostHook>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("handlers", &self.handler_keys())
            .field("nodes", &self.nodes)
            .field("appliances", &self.appliances.iter().map(Appliance::name).collect::<Vec<_>>())
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Start building node `name`.
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            name: name.into(),
            source: None,
            handlers: BTreeMap::new(),
            nodes: Vec::new(),
            appliances: Vec::new(),
            injections: None,
            pre: Vec::new(),
            post: Vec::new(),
            problems: Vec::new(),
        }
    }

    /// Node name (also its object type name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type source.
    pub fn source(&self) -> &TypeSource {
        &self.source
    }

    /// Handlers of one bucket, ordered by key.
    pub fn handlers(&self, bucket: Bucket) -> impl Iterator<Item = (&str, &Handler)> {
        self.handlers
            .get(&bucket)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, h)| (k.as_str(), h)))
    }

    /// Handler keys by bucket.
    pub fn handler_keys(&self) -> HandlerKeys {
        let mut keys = HandlerKeys::default();
        for (bucket, handlers) in &self.handlers {
            keys.bucket_mut(*bucket).extend(handlers.keys().cloned());
        }
        keys
    }

    /// Nested nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Locally-scoped appliances.
    pub fn appliances(&self) -> &[Appliance] {
        &self.appliances
    }

    /// Names of this node and everything nested in it, depth first.
    pub fn fragment_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        names.extend(self.appliances.iter().filter_map(Appliance::name).map(str::to_owned));
        for node in &self.nodes {
            names.extend(node.fragment_names());
        }
        names
    }

    /// Wrap options for the handler `bucket.field` of this node.
    pub(crate) fn wrap_options(&self, bucket: Bucket, field: &str) -> WrapOptions {
        WrapOptions {
            qualified_name: format!("{}.{bucket}.{field}", self.name),
            pre: self.pre.clone(),
            post: self.post.clone(),
            injections: self.injections.clone(),
        }
    }

    /// Validate the node tree and summarize it for the network.
    pub fn introspect(&self) -> Result<IntrospectionRecord, SchemaError> {
        let type_text = validate::validate_node(self)?;
        Ok(IntrospectionRecord {
            name: self.name.clone(),
            hash: ContentHash::of(&type_text),
            type_text,
            handlers: self.handler_keys(),
            nodes: self
                .nodes
                .iter()
                .map(Node::introspect)
                .collect::<Result<_, _>>()?,
            appliances: self
                .appliances
                .iter()
                .map(Appliance::record)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Builder for [`Node`]; shape errors surface from [`NodeBuilder::build`].
pub struct NodeBuilder {
    name: String,
    source: Option<TypeSource>,
    handlers: BTreeMap<Bucket, BTreeMap<String, Handler>>,
    nodes: Vec<Node>,
    appliances: Vec<Appliance>,
    injections: Option<Injections>,
    pre: Vec<PreHook>,
    post: Vec<PostHook>,
    problems: Vec<String>,
}

impl NodeBuilder {
    /// SDL declaring the node's type and its root fields.
    pub fn type_text(mut self, source: impl Into<TypeSource>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a handler to `bucket`.
    pub fn handler(mut self, bucket: Bucket, field: impl Into<String>, handler: impl Into<Handler>) -> Self {
        let field = field.into();
        let handler = handler.into();
        let wants_stream = bucket == Bucket::Subscription;
        if handler.is_subscription() != wants_stream {
            self.problems.push(if wants_stream {
                format!("`{bucket}.{field}` must be a subscription handler")
            } else {
                format!("`{bucket}.{field}` cannot be a subscription handler")
            });
        }
        if self
            .handlers
            .entry(bucket)
            .or_default()
            .insert(field.clone(), handler)
            .is_some()
        {
            self.problems.push(format!("`{bucket}.{field}` is given twice"));
        }
        self
    }

    /// Add a `Query` handler.
    pub fn query(self, field: impl Into<String>, handler: impl Into<Handler>) -> Self {
        self.handler(Bucket::Query, field, handler)
    }

    /// Add a `Mutation` handler.
    pub fn mutation(self, field: impl Into<String>, handler: impl Into<Handler>) -> Self {
        self.handler(Bucket::Mutation, field, handler)
    }

    /// Add a `Subscription` handler.
    pub fn subscription(self, field: impl Into<String>, handler: impl Into<Handler>) -> Self {
        self.handler(Bucket::Subscription, field, handler)
    }

    /// Add a field resolver on the node's own type.
    pub fn field(self, field: impl Into<String>, handler: impl Into<Handler>) -> Self {
        self.handler(Bucket::Fields, field, handler)
    }

    /// Nest a node.
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Scope an enum, union, interface or object type to this node.
    pub fn appliance(mut self, appliance: impl Into<Appliance>) -> Self {
        let appliance = appliance.into();
        if appliance.scoped_kind().is_none() {
            self.problems.push(format!(
                "`{}` cannot be scoped to a node",
                appliance.name().unwrap_or("global text")
            ));
        }
        self.appliances.push(appliance);
        self
    }

    /// Injections merged into the context of every handler.
    pub fn injections(mut self, injections: Injections) -> Self {
        self.injections = Some(injections);
        self
    }

    /// Node-level pre hook, run before every handler's own hooks.
    pub fn pre(mut self, hook: PreHook) -> Self {
        self.pre.push(hook);
        self
    }

    /// Node-level post hook, run after every handler's own hooks.
    pub fn post(mut self, hook: PostHook) -> Self {
        self.post.push(hook);
        self
    }

    /// Finish the node.
    pub fn build(self) -> Result<Node, SchemaError> {
        check_name(&self.name)?;
        if let Some(problem) = self.problems.into_iter().next() {
            return Err(SchemaError::config(format!("node `{}`: {problem}", self.name)));
        }
        let Some(source) = self.source else {
            return Err(SchemaError::config(format!("node `{}` has no type text", self.name)));
        };
        let mut handlers = self.handlers;
        handlers.retain(|_, bucket| !bucket.is_empty());
        Ok(Node {
            name: self.name,
            source,
            handlers,
            nodes: self.nodes,
            appliances: self.appliances,
            injections: self.injections,
            pre: self.pre,
            post: self.post,
        })
    }
}
