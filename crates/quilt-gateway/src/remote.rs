// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Remote stand-ins: nodes rebuilt from introspection records whose handlers
//! forward every call to a live instance of the owning service.

use futures::StreamExt;
use quilt_broker::{BoxError, Broker};
use quilt_directory::ServiceDirectory;
use quilt_proto::{
    action_name, ApplianceKind, ApplianceRecord, Bucket, Endpoint, InstanceId, IntrospectionRecord,
    RemoteCall,
};
use quilt_resolve::{Call, Handler, ValueStream};
use quilt_schema::{AbstractFragment, Appliance, EnumFragment, Node, ObjectFragment};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::GatewayError;

/// Where a stand-in sends its calls.
#[derive(Clone)]
pub struct RemoteTarget {
    directory: Arc<ServiceDirectory>,
    broker: Arc<dyn Broker>,
}

impl RemoteTarget {
    /// Calls go to instances picked from `directory`.
    pub fn new(directory: Arc<ServiceDirectory>, broker: Arc<dyn Broker>) -> Self {
        Self { directory, broker }
    }

    async fn instance(&self) -> Result<InstanceId, GatewayError> {
        self.directory
            .get_next_service()
            .await
            .ok_or_else(|| GatewayError::ServiceUnavailable(self.directory.service().to_string()))
    }

    fn payload(call: &Call) -> Result<Value, GatewayError> {
        Ok(serde_json::to_value(RemoteCall {
            parent: call.parent.clone(),
            args: call.args.clone(),
            context: call.context.values(),
        })?)
    }

    /// Unary call of `action` on the next live instance.
    pub async fn call(&self, action: &str, qualified: &str, call: &Call) -> Result<Value, GatewayError> {
        let instance = self.instance().await?;
        debug!(%instance, action, "forwarding call");
        self.broker
            .call(&Endpoint::Instance(instance), action, Self::payload(call)?)
            .await
            .map_err(|source| GatewayError::remote(qualified, source))
    }

    /// Streaming call of `action` on the next live instance.
    pub async fn open(&self, action: &str, qualified: &str, call: &Call) -> Result<ValueStream, GatewayError> {
        let instance = self.instance().await?;
        debug!(%instance, action, "opening remote stream");
        let stream = self
            .broker
            .call_stream(&Endpoint::Instance(instance), action, Self::payload(call)?)
            .await
            .map_err(|source| GatewayError::remote(qualified, source))?;
        let qualified = qualified.to_owned();
        Ok(stream
            .map(move |item| {
                item.map_err(|source| BoxError::from(GatewayError::remote(qualified.clone(), source)))
            })
            .boxed())
    }
}

fn forward(target: &RemoteTarget, action: String, qualified: String) -> Handler {
    let target = target.clone();
    Handler::plain(move |call: Call| {
        let target = target.clone();
        let action = action.clone();
        let qualified = qualified.clone();
        async move {
            target
                .call(&action, &qualified, &call)
                .await
                .map_err(BoxError::from)
        }
    })
}

fn forward_stream(target: &RemoteTarget, action: String, qualified: String) -> Handler {
    let target = target.clone();
    Handler::subscribe(move |call: Call| {
        let target = target.clone();
        let action = action.clone();
        let qualified = qualified.clone();
        async move {
            target
                .open(&action, &qualified, &call)
                .await
                .map_err(BoxError::from)
        }
    })
}

fn field_action(type_name: &str, field: &str) -> String {
    action_name(Bucket::Fields, &format!("{type_name}.{field}"))
}

fn appliance(record: &ApplianceRecord, target: &RemoteTarget) -> Result<Appliance, GatewayError> {
    let name = record.name.as_str();
    let text = record.type_text.as_str();
    Ok(match record.kind {
        ApplianceKind::Enum => {
            let fragment = EnumFragment::new(name, text)?;
            if record.values.is_empty() {
                fragment.into()
            } else {
                fragment.values(record.values.clone()).into()
            }
        }
        ApplianceKind::Union => AbstractFragment::union(name, text)?.into(),
        ApplianceKind::Interface => AbstractFragment::interface(name, text)?.into(),
        ApplianceKind::ObjectType => {
            let mut fragment = ObjectFragment::new(name, text)?;
            for field in &record.fields {
                fragment = fragment.field(
                    field.as_str(),
                    forward(target, field_action(name, field), format!("{name}.Fields.{field}")),
                )?;
            }
            fragment.into()
        }
    })
}

/// Rebuild `record` as a node whose handlers call the remote service.
///
/// Nested nodes and node-scoped appliances are rebuilt too. Enum mappings
/// travel with the record; custom type resolvers do not, so remote unions and
/// interfaces resolve through `__typename`.
pub fn stand_in(record: &IntrospectionRecord, target: &RemoteTarget) -> Result<Node, GatewayError> {
    let name = record.name.as_str();
    let mut builder = Node::builder(name).type_text(record.type_text.as_str());
    for bucket in [Bucket::Query, Bucket::Mutation, Bucket::Subscription, Bucket::Fields] {
        for key in record.handlers.bucket(bucket) {
            let qualified = format!("{name}.{bucket}.{key}");
            let handler = match bucket {
                Bucket::Subscription => {
                    forward_stream(target, action_name(bucket, key), qualified)
                }
                Bucket::Fields => forward(target, field_action(name, key), qualified),
                Bucket::Query | Bucket::Mutation => {
                    forward(target, action_name(bucket, key), qualified)
                }
            };
            builder = builder.handler(bucket, key.as_str(), handler);
        }
    }
    for child in &record.nodes {
        builder = builder.node(stand_in(child, target)?);
    }
    for scoped in &record.appliances {
        builder = builder.appliance(appliance(scoped, target)?);
    }
    Ok(builder.build()?)
}
