// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Publishing nodes as broker services.
//!
//! A published node answers `introspection` with its record and exposes one
//! action per handler: `Query.f`, `Mutation.f`, `Subscription.f` and
//! `Fields.Type.f`. Hooks and injections run on the publishing side.

use futures::StreamExt;
use quilt_broker::{Action, ActionTable, BoxError, Broker};
use quilt_proto::{
    action_name, Bucket, InstanceId, IntrospectionReply, IntrospectionRecord, RemoteCall,
    ServiceName, INTROSPECTION_ACTION,
};
use quilt_resolve::{Call, Context, FieldInfo, WrappedResolver, WrappedSubscriber};
use quilt_schema::{compose, Node};
use serde_json::Value;
use tracing::info;

use crate::GatewayError;

/// A node registered on the broker.
#[derive(Debug, Clone)]
pub struct PublishedNode {
    /// Instance answering for the node.
    pub instance: InstanceId,
    /// What the node reports on introspection.
    pub record: IntrospectionRecord,
}

impl PublishedNode {
    /// Withdraw the node from the broker.
    pub async fn withdraw(&self, broker: &dyn Broker) -> Result<(), GatewayError> {
        broker.remove_service(&self.instance).await?;
        Ok(())
    }
}

fn decode_call(payload: Value, info: &FieldInfo) -> Result<Call, BoxError> {
    let remote: RemoteCall = serde_json::from_value(payload)?;
    Ok(Call {
        parent: remote.parent,
        args: remote.args,
        context: Context::with_values(remote.context),
        info: info.clone(),
    })
}

fn unary(resolver: WrappedResolver, info: FieldInfo) -> Action {
    Action::unary(move |payload| {
        let resolver = resolver.clone();
        let info = info.clone();
        async move {
            let call = decode_call(payload, &info)?;
            Ok(resolver.call(call).await?)
        }
    })
}

fn streaming(subscriber: WrappedSubscriber, info: FieldInfo) -> Action {
    Action::stream(move |payload| {
        let subscriber = subscriber.clone();
        let info = info.clone();
        async move {
            let call = decode_call(payload, &info)?;
            let stream = subscriber.subscribe(call).await?;
            Ok(stream.map(|item| item.map_err(BoxError::from)).boxed())
        }
    })
}

/// Register `node` on `broker` as logical service `node.scope`.
///
/// The node is validated and composed on its own first, so a malformed node
/// never reaches the broker.
pub async fn publish_node(
    broker: &dyn Broker,
    scope: &str,
    node: &Node,
) -> Result<PublishedNode, GatewayError> {
    let record = node.introspect()?;
    let composed = compose(std::slice::from_ref(node), &[])?;
    let tree = composed.resolvers;
    let service = ServiceName::new(node.name(), scope);
    let instance = InstanceId::new(node.name(), scope, broker.node_id());

    let mut actions = ActionTable::new();
    let reply = serde_json::to_value(IntrospectionReply {
        instance: instance.clone(),
        record: record.clone(),
    })?;
    actions.insert(
        INTROSPECTION_ACTION.to_owned(),
        Action::unary(move |_| {
            let reply = reply.clone();
            async move { Ok(reply) }
        }),
    );
    for (bucket, resolvers) in [(Bucket::Query, &tree.query), (Bucket::Mutation, &tree.mutation)] {
        for (field, resolver) in resolvers {
            let info = FieldInfo::new(bucket.as_str(), field.as_str());
            actions.insert(action_name(bucket, field), unary(resolver.clone(), info));
        }
    }
    for (field, subscriber) in &tree.subscription {
        let info = FieldInfo::new(Bucket::Subscription.as_str(), field.as_str());
        actions.insert(
            action_name(Bucket::Subscription, field),
            streaming(subscriber.clone(), info),
        );
    }
    for (type_name, fields) in &tree.fields {
        for (field, resolver) in fields {
            let info = FieldInfo::new(type_name.as_str(), field.as_str());
            actions.insert(
                action_name(Bucket::Fields, &format!("{type_name}.{field}")),
                unary(resolver.clone(), info),
            );
        }
    }

    let action_count = actions.len();
    let registered = broker.create_service(service, actions).await?;
    info!(%registered, actions = action_count, hash = %record.hash, "node published");
    Ok(PublishedNode {
        instance: registered,
        record,
    })
}
