// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Executable schema: the composed SDL turned into an `async-graphql`
//! dynamic schema whose fields call the composed resolver tree.
//!
//! Values flow through resolvers as JSON. Enum names are mapped to internal
//! values on input and back on output, custom scalars run their validator in
//! both directions, and union or interface values pick their concrete type
//! through the tree's abstract resolvers (falling back to `__typename`).
//! Fields without a handler read the same-named key of their parent.

use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputObject, InputValue, Interface,
    InterfaceField, Object, ResolverContext, Scalar, Schema, Subscription, SubscriptionField,
    SubscriptionFieldFuture, Type as DynType, TypeRef,
};
use async_graphql::{Error as GqlError, Name, PathSegment, Request, Response, Variables};
use async_graphql_parser::types::{
    BaseType, FieldDefinition, InputValueDefinition, ServiceDocument, Type, TypeDefinition, TypeKind,
    TypeSystemDefinition,
};
use async_graphql_value::ConstValue;
use futures::stream::BoxStream;
use futures::StreamExt;
use quilt_proto::{QueryPayload, QueryResponse, ResponseError};
use quilt_resolve::{
    typename_resolver, Call, Context as CallContext, EnumMapping, FieldInfo, ResolverTree,
    ScalarValidator, TypeResolver, WrappedResolver, WrappedSubscriber,
};
use quilt_schema::{sdl, ComposedSchema};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::GatewayError;

type Outcome<T> = Result<T, GqlError>;

const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Scalar,
    Enum,
    Object,
    Interface,
    Union,
    Input,
}

/// Type information shared by every field closure.
struct Catalog {
    kinds: HashMap<String, Kind>,
    inputs: HashMap<String, Vec<(String, TypeRef)>>,
    enums: BTreeMap<String, EnumMapping>,
    scalars: BTreeMap<String, ScalarValidator>,
    abstracts: BTreeMap<String, TypeResolver>,
}

fn type_ref(ty: &Type) -> TypeRef {
    let base = match &ty.base {
        BaseType::Named(name) => TypeRef::named(name.to_string()),
        BaseType::List(inner) => TypeRef::List(Box::new(type_ref(inner))),
    };
    if ty.nullable {
        base
    } else {
        TypeRef::NonNull(Box::new(base))
    }
}

fn validator_error(name: &str, err: &dyn std::fmt::Display) -> GqlError {
    GqlError::new(format!("invalid {name}: {err}"))
}

impl Catalog {
    fn kind(&self, name: &str) -> Option<Kind> {
        self.kinds.get(name).copied()
    }

    /// Turn a client argument into the value handlers see.
    fn input(&self, ty: &TypeRef, value: Value) -> Outcome<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match ty {
            TypeRef::NonNull(inner) => self.input(inner, value),
            TypeRef::List(inner) => match value {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| self.input(inner, item))
                    .collect::<Outcome<Vec<_>>>()
                    .map(Value::Array),
                single => self.input(inner, single),
            },
            TypeRef::Named(name) => self.named_input(name, value),
        }
    }

    fn named_input(&self, name: &str, value: Value) -> Outcome<Value> {
        match self.kind(name) {
            Some(Kind::Enum) => match (&value, self.enums.get(name)) {
                (Value::String(item), Some(mapping)) => Ok(mapping.to_internal(item)),
                _ => Ok(value),
            },
            Some(Kind::Scalar) => match self.scalars.get(name) {
                Some(validate) => validate(&value).map_err(|err| validator_error(name, &err)),
                None => Ok(value),
            },
            Some(Kind::Input) => {
                let Value::Object(mut object) = value else {
                    return Ok(value);
                };
                for (field, ty) in self.inputs.get(name).into_iter().flatten() {
                    if let Some(inner) = object.remove(field) {
                        object.insert(field.clone(), self.input(ty, inner)?);
                    }
                }
                Ok(Value::Object(object))
            }
            _ => Ok(value),
        }
    }

    /// Turn a handler result into what the engine resolves next.
    fn output<'a>(&self, ty: &TypeRef, value: Value) -> Outcome<Option<FieldValue<'a>>> {
        if value.is_null() {
            return Ok(None);
        }
        match ty {
            TypeRef::NonNull(inner) => self.output(inner, value),
            TypeRef::List(inner) => {
                let Value::Array(items) = value else {
                    return Err(GqlError::new(format!("expected a list for `{ty}`")));
                };
                let items = items
                    .into_iter()
                    .map(|item| -> Outcome<FieldValue<'a>> { Ok(self.output(inner, item)?.unwrap_or(FieldValue::NULL)) })
                    .collect::<Outcome<Vec<_>>>()?;
                Ok(Some(FieldValue::list(items)))
            }
            TypeRef::Named(name) => self.named_output(name, value).map(Some),
        }
    }

    fn named_output<'a>(&self, name: &str, value: Value) -> Outcome<FieldValue<'a>> {
        match self.kind(name) {
            Some(Kind::Scalar) => {
                let value = match self.scalars.get(name) {
                    Some(validate) => validate(&value).map_err(|err| validator_error(name, &err))?,
                    None => value,
                };
                Ok(FieldValue::value(ConstValue::from_json(value)?))
            }
            Some(Kind::Enum) => {
                let item = self
                    .enums
                    .get(name)
                    .and_then(|mapping| mapping.to_name(&value))
                    .or_else(|| value.as_str().map(str::to_owned))
                    .ok_or_else(|| GqlError::new(format!("{value} is not a value of enum `{name}`")))?;
                Ok(FieldValue::value(ConstValue::Enum(Name::new(item))))
            }
            Some(Kind::Object) => Ok(FieldValue::owned_any(value)),
            Some(Kind::Interface | Kind::Union) => {
                let resolve = self.abstracts.get(name).cloned().unwrap_or_else(typename_resolver);
                let concrete = resolve(&value).ok_or_else(|| {
                    GqlError::new(format!("cannot resolve the concrete type of `{name}`"))
                })?;
                Ok(FieldValue::owned_any(value).with_type(concrete))
            }
            Some(Kind::Input) | None => Err(GqlError::new(format!("`{name}` is not an output type"))),
        }
    }
}

/// What a field closure needs to build a [`Call`].
struct FieldPlan {
    parent: String,
    field: String,
    ty: TypeRef,
    args: Vec<(String, TypeRef)>,
}

impl FieldPlan {
    fn new(parent: &str, def: &FieldDefinition) -> Self {
        Self {
            parent: parent.to_owned(),
            field: def.name.node.to_string(),
            ty: type_ref(&def.ty.node),
            args: def
                .arguments
                .iter()
                .map(|arg| (arg.node.name.node.to_string(), type_ref(&arg.node.ty.node)))
                .collect(),
        }
    }

    fn nullable(&self) -> bool {
        !matches!(self.ty, TypeRef::NonNull(_))
    }

    fn call(&self, ctx: &ResolverContext<'_>, catalog: &Catalog, parent: Value) -> Outcome<Call> {
        let mut args = Map::new();
        for (name, accessor) in ctx.args.iter() {
            let value = accessor.as_value().clone().into_json()?;
            let value = match self.args.iter().find(|(arg, _)| arg == name.as_str()) {
                Some((_, ty)) => catalog.input(ty, value)?,
                None => value,
            };
            args.insert(name.to_string(), value);
        }
        let context = ctx.ctx.data_opt::<CallContext>().cloned().unwrap_or_default();
        Ok(Call {
            parent,
            args,
            context,
            info: FieldInfo::new(self.parent.as_str(), self.field.as_str()),
        })
    }
}

fn input_value(def: &InputValueDefinition) -> InputValue {
    let mut value = InputValue::new(def.name.node.to_string(), type_ref(&def.ty.node));
    if let Some(default) = &def.default_value {
        value = value.default_value(default.node.clone());
    }
    if let Some(description) = &def.description {
        value = value.description(description.node.clone());
    }
    value
}

fn object_field(def: &FieldDefinition, plan: FieldPlan, handler: Option<WrappedResolver>, catalog: &Arc<Catalog>) -> Field {
    let plan = Arc::new(plan);
    let catalog = Arc::clone(catalog);
    let mut field = Field::new(plan.field.clone(), plan.ty.clone(), move |ctx| {
        let plan = Arc::clone(&plan);
        let catalog = Arc::clone(&catalog);
        let handler = handler.clone();
        FieldFuture::new(async move {
            let parent = ctx.parent_value.downcast_ref::<Value>().cloned().unwrap_or(Value::Null);
            let value = match &handler {
                Some(handler) => match plan.call(&ctx, &catalog, parent) {
                    Ok(call) => handler.call(call).await.map_err(|err| GqlError::new(err.to_string())),
                    Err(err) => Err(err),
                },
                None => Ok(parent.get(plan.field.as_str()).cloned().unwrap_or(Value::Null)),
            };
            match value.and_then(|value| catalog.output(&plan.ty, value)) {
                Ok(out) => Ok(out),
                // Nullable fields resolve to null and report the error at their own path.
                Err(err) if plan.nullable() => {
                    let located = err.into_server_error(ctx.ctx.item.pos);
                    ctx.ctx.add_error(ctx.ctx.set_error_path(located));
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        })
    });
    for arg in &def.arguments {
        field = field.argument(input_value(&arg.node));
    }
    if let Some(description) = &def.description {
        field = field.description(description.node.clone());
    }
    field
}

fn subscription_field(
    def: &FieldDefinition,
    plan: FieldPlan,
    subscriber: Option<WrappedSubscriber>,
    catalog: &Arc<Catalog>,
) -> SubscriptionField {
    let plan = Arc::new(plan);
    let catalog = Arc::clone(catalog);
    let mut field = SubscriptionField::new(plan.field.clone(), plan.ty.clone(), move |ctx| {
        let plan = Arc::clone(&plan);
        let catalog = Arc::clone(&catalog);
        let subscriber = subscriber.clone();
        SubscriptionFieldFuture::new(async move {
            let Some(subscriber) = subscriber else {
                return Err(GqlError::new(format!("no subscription handler for `{}`", plan.field)));
            };
            let stream = subscriber.subscribe(plan.call(&ctx, &catalog, Value::Null)?).await?;
            Ok(stream.map(move |item| match item {
                Ok(value) => catalog
                    .output(&plan.ty, value)
                    .map(|out| out.unwrap_or(FieldValue::NULL)),
                Err(err) => Err(GqlError::new(err.to_string())),
            }))
        })
    });
    for arg in &def.arguments {
        field = field.argument(input_value(&arg.node));
    }
    if let Some(description) = &def.description {
        field = field.description(description.node.clone());
    }
    field
}

fn interface_field(def: &FieldDefinition) -> InterfaceField {
    let mut field = InterfaceField::new(def.name.node.to_string(), type_ref(&def.ty.node));
    for arg in &def.arguments {
        field = field.argument(input_value(&arg.node));
    }
    field
}

struct Roots {
    query: String,
    mutation: Option<String>,
    subscription: Option<String>,
}

fn roots(doc: &ServiceDocument, kinds: &HashMap<String, Kind>) -> Result<Roots, GatewayError> {
    let (mut query, mut mutation, mut subscription) =
        ("Query".to_owned(), "Mutation".to_owned(), "Subscription".to_owned());
    for def in &doc.definitions {
        if let TypeSystemDefinition::Schema(schema) = def {
            if let Some(name) = &schema.node.query {
                query = name.node.to_string();
            }
            if let Some(name) = &schema.node.mutation {
                mutation = name.node.to_string();
            }
            if let Some(name) = &schema.node.subscription {
                subscription = name.node.to_string();
            }
        }
    }
    if kinds.get(&query) != Some(&Kind::Object) {
        return Err(GatewayError::Executor(format!("schema declares no `{query}` type")));
    }
    let present = |name: String| (kinds.get(&name) == Some(&Kind::Object)).then_some(name);
    Ok(Roots {
        query,
        mutation: present(mutation),
        subscription: present(subscription),
    })
}

fn types(doc: &ServiceDocument) -> impl Iterator<Item = &TypeDefinition> {
    doc.definitions.iter().filter_map(|def| match def {
        TypeSystemDefinition::Type(ty) => Some(&ty.node),
        _ => None,
    })
}

fn catalog(doc: &ServiceDocument, tree: &ResolverTree) -> Catalog {
    let mut kinds: HashMap<String, Kind> =
        BUILTIN_SCALARS.iter().map(|name| ((*name).to_owned(), Kind::Scalar)).collect();
    let mut inputs = HashMap::new();
    for def in types(doc) {
        let name = def.name.node.to_string();
        let kind = match &def.kind {
            TypeKind::Scalar => Kind::Scalar,
            TypeKind::Enum(_) => Kind::Enum,
            TypeKind::Object(_) => Kind::Object,
            TypeKind::Interface(_) => Kind::Interface,
            TypeKind::Union(_) => Kind::Union,
            TypeKind::InputObject(input) => {
                let fields = input
                    .fields
                    .iter()
                    .map(|f| (f.node.name.node.to_string(), type_ref(&f.node.ty.node)))
                    .collect::<Vec<_>>();
                inputs.insert(name.clone(), fields);
                Kind::Input
            }
        };
        kinds.insert(name, kind);
    }
    Catalog {
        kinds,
        inputs,
        enums: tree.enums.clone(),
        scalars: tree.scalars.clone(),
        abstracts: tree.abstracts.clone(),
    }
}

/// A ready-to-run schema.
pub struct Executor {
    schema: Schema,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

impl Executor {
    /// Build the executable schema of `composed`.
    pub fn build(composed: &ComposedSchema) -> Result<Self, GatewayError> {
        let text = composed.transformed_text()?;
        let doc = sdl::parse(&text)?;
        let tree = &composed.resolvers;
        let catalog = Arc::new(catalog(&doc, tree));
        let roots = roots(&doc, &catalog.kinds)?;

        let mut registered: Vec<DynType> = Vec::new();
        for def in types(&doc) {
            let name = def.name.node.as_str();
            let description = def.description.as_ref().map(|d| d.node.clone());
            let ty: DynType = match &def.kind {
                TypeKind::Scalar => {
                    let mut scalar = Scalar::new(name);
                    if let Some(validate) = catalog.scalars.get(name).cloned() {
                        scalar = scalar.validator(move |value| {
                            value.clone().into_json().is_ok_and(|json| validate(&json).is_ok())
                        });
                    }
                    if let Some(description) = description {
                        scalar = scalar.description(description);
                    }
                    scalar.into()
                }
                TypeKind::Enum(values) => {
                    let mut item = Enum::new(name).items(
                        values.values.iter().map(|v| EnumItem::new(v.node.value.node.to_string())),
                    );
                    if let Some(description) = description {
                        item = item.description(description);
                    }
                    item.into()
                }
                TypeKind::Union(union) => {
                    let mut ty = async_graphql::dynamic::Union::new(name);
                    for member in &union.members {
                        ty = ty.possible_type(member.node.to_string());
                    }
                    if let Some(description) = description {
                        ty = ty.description(description);
                    }
                    ty.into()
                }
                TypeKind::InputObject(input) => {
                    let mut ty = InputObject::new(name);
                    for field in &input.fields {
                        ty = ty.field(input_value(&field.node));
                    }
                    if let Some(description) = description {
                        ty = ty.description(description);
                    }
                    ty.into()
                }
                TypeKind::Interface(interface) => {
                    let mut ty = Interface::new(name);
                    for field in &interface.fields {
                        ty = ty.field(interface_field(&field.node));
                    }
                    for parent in &interface.implements {
                        ty = ty.implement(parent.node.to_string());
                    }
                    if let Some(description) = description {
                        ty = ty.description(description);
                    }
                    ty.into()
                }
                TypeKind::Object(object) if roots.subscription.as_deref() == Some(name) => {
                    let mut ty = Subscription::new(name);
                    for field in &object.fields {
                        let def = &field.node;
                        let subscriber = tree.subscription.get(def.name.node.as_str()).cloned();
                        ty = ty.field(subscription_field(def, FieldPlan::new(name, def), subscriber, &catalog));
                    }
                    ty.into()
                }
                TypeKind::Object(object) => {
                    let mut ty = Object::new(name);
                    for field in &object.fields {
                        let def = &field.node;
                        let field_name = def.name.node.as_str();
                        let handler = if name == roots.query {
                            tree.query.get(field_name)
                        } else if roots.mutation.as_deref() == Some(name) {
                            tree.mutation.get(field_name)
                        } else {
                            tree.field(name, field_name)
                        };
                        ty = ty.field(object_field(def, FieldPlan::new(name, def), handler.cloned(), &catalog));
                    }
                    for interface in &object.implements {
                        ty = ty.implement(interface.node.to_string());
                    }
                    if let Some(description) = description {
                        ty = ty.description(description);
                    }
                    ty.into()
                }
            };
            registered.push(ty);
        }

        let type_count = registered.len();
        let schema = registered
            .into_iter()
            .fold(
                Schema::build(&roots.query, roots.mutation.as_deref(), roots.subscription.as_deref()),
                async_graphql::dynamic::SchemaBuilder::register,
            )
            .finish()
            .map_err(|err| GatewayError::Executor(err.to_string()))?;
        debug!(types = type_count, "executable schema built");
        Ok(Self { schema })
    }

    /// Run a query or mutation.
    pub async fn execute(&self, payload: QueryPayload) -> QueryResponse {
        convert(self.schema.execute(request(payload)).await)
    }

    /// Run a subscription; one response per event.
    pub fn subscribe(&self, payload: QueryPayload) -> BoxStream<'static, QueryResponse> {
        self.schema.execute_stream(request(payload)).map(convert).boxed()
    }

    /// SDL of the executable schema.
    pub fn sdl(&self) -> String {
        self.schema.sdl()
    }
}

fn request(payload: QueryPayload) -> Request {
    let QueryPayload {
        query,
        variables,
        operation_name,
        context,
    } = payload;
    let mut request = Request::new(query)
        .variables(Variables::from_json(Value::Object(variables)))
        .data(CallContext::with_values(context));
    if let Some(name) = operation_name {
        request = request.operation_name(name);
    }
    request
}

fn convert(response: Response) -> QueryResponse {
    let errors = response
        .errors
        .into_iter()
        .map(|err| ResponseError {
            message: err.message,
            path: err
                .path
                .into_iter()
                .map(|segment| match segment {
                    PathSegment::Field(name) => Value::String(name),
                    PathSegment::Index(index) => Value::from(index),
                })
                .collect(),
        })
        .collect();
    QueryResponse {
        data: response.data.into_json().unwrap_or(Value::Null),
        errors,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::stream;
    use quilt_resolve::{Handler, ResolveSpec};
    use quilt_schema::{compose, AbstractFragment, EnumFragment, Node};
    use serde_json::json;

    fn user() -> Node {
        Node::builder("User")
            .type_text(
                "type User { id: ID! name: String role: Role }\n\
                 extend type Query { user(id: ID!): User users(role: Role): [User] }\n\
                 extend type Subscription { joined: User }",
            )
            .query(
                "user",
                ResolveSpec::new(|call: Call| async move {
                    Ok(json!({
                        "id": call.arg("id").cloned(),
                        "name": call.context.get("tenant"),
                        "role": 2,
                    }))
                })
                .pre(|call: Call| async move {
                    call.context.set("tenant", json!("acme"));
                    Ok(())
                }),
            )
            .query(
                "users",
                Handler::plain(|call: Call| async move {
                    Ok(json!([{ "id": "1", "role": call.arg("role").cloned() }]))
                }),
            )
            .subscription(
                "joined",
                Handler::subscribe(|_| async {
                    let items = vec![Ok(json!({ "id": "a" })), Ok(json!({ "id": "b" }))];
                    Ok(stream::iter(items).boxed())
                }),
            )
            .appliance(
                EnumFragment::new("Role", "enum Role { ADMIN MEMBER }")
                    .unwrap()
                    .values(BTreeMap::from([("ADMIN".to_owned(), json!(1)), ("MEMBER".to_owned(), json!(2))])),
            )
            .build()
            .unwrap()
    }

    fn search() -> Node {
        Node::builder("Search")
            .type_text(
                "type Search { hits: Int }\ntype Book { title: String }\ntype Film { length: Int }\n\
                 extend type Query { search: [Hit] }",
            )
            .query(
                "search",
                Handler::value(json!([
                    { "__typename": "Book", "title": "Dune" },
                    { "__typename": "Film", "length": 155 },
                ])),
            )
            .appliance(AbstractFragment::union("Hit", "union Hit = Book | Film").unwrap())
            .build()
            .unwrap()
    }

    fn executor(nodes: &[Node]) -> Executor {
        Executor::build(&compose(nodes, &[]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn queries_run_hooks_and_map_enums() {
        let executor = executor(&[user()]);
        let out = executor
            .execute(QueryPayload::new("{ user(id: \"7\") { id name role } }"))
            .await;
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.data, json!({ "user": { "id": "7", "name": "acme", "role": "MEMBER" } }));

        let out = executor
            .execute(QueryPayload::new("{ users(role: ADMIN) { id role } }"))
            .await;
        assert_eq!(out.data, json!({ "users": [{ "id": "1", "role": "ADMIN" }] }));
    }

    #[tokio::test]
    async fn request_context_reaches_handlers() {
        let node = Node::builder("Me")
            .type_text("type Me { id: ID }\nextend type Query { me: String }")
            .query(
                "me",
                Handler::plain(|call: Call| async move { Ok(call.context.get("user").unwrap_or(Value::Null)) }),
            )
            .build()
            .unwrap();
        let mut payload = QueryPayload::new("{ me }");
        payload.context.insert("user".into(), json!("ada"));
        let out = executor(&[node]).execute(payload).await;
        assert_eq!(out.data, json!({ "me": "ada" }));
    }

    #[tokio::test]
    async fn unions_resolve_through_typename() {
        let out = executor(&[search()])
            .execute(QueryPayload::new(
                "{ search { ... on Book { title } ... on Film { length } } }",
            ))
            .await;
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.data, json!({ "search": [{ "title": "Dune" }, { "length": 155 }] }));
    }

    fn boom() -> Node {
        Node::builder("Boom")
            .type_text(
                "type Boom { id: ID broken: String }\n\
                 extend type Query { boom: String ok: String crate: Boom }",
            )
            .query("boom", Handler::plain(|_| async { Err("kaput".into()) }))
            .query("ok", Handler::value(json!("fine")))
            .query("crate", Handler::value(json!({ "id": "1" })))
            .field("broken", Handler::plain(|_| async { Err("snapped".into()) }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn handler_failures_become_response_errors() {
        let out = executor(&[boom()]).execute(QueryPayload::new("{ boom }")).await;
        assert_eq!(out.data, json!({ "boom": null }));
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].message.contains("Boom.Query.boom"), "{}", out.errors[0].message);
        assert_eq!(out.errors[0].path, vec![json!("boom")]);
    }

    #[tokio::test]
    async fn failing_fields_leave_siblings_intact() {
        let out = executor(&[boom()])
            .execute(QueryPayload::new("{ boom ok crate { id broken } }"))
            .await;
        assert_eq!(
            out.data,
            json!({ "boom": null, "ok": "fine", "crate": { "id": "1", "broken": null } })
        );
        let mut paths: Vec<Vec<Value>> = out.errors.into_iter().map(|e| e.path).collect();
        paths.sort_by_key(Vec::len);
        assert_eq!(paths, vec![vec![json!("boom")], vec![json!("crate"), json!("broken")]]);
    }

    #[tokio::test]
    async fn subscriptions_stream_one_response_per_event() {
        let responses: Vec<QueryResponse> = executor(&[user()])
            .subscribe(QueryPayload::new("subscription { joined { id } }"))
            .collect()
            .await;
        let ids: Vec<Value> = responses.into_iter().map(|r| r.data["joined"]["id"].clone()).collect();
        assert_eq!(ids, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn schema_without_query_is_rejected() {
        let node = Node::builder("Lonely")
            .type_text("type Lonely { id: ID }")
            .build()
            .unwrap();
        let err = Executor::build(&compose(&[node], &[]).unwrap()).unwrap_err();
        assert!(matches!(err, GatewayError::Executor(_)));
    }
}
