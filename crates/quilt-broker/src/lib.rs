// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Service broker port for Quilt.
//!
//! [`Broker`] is the substrate gateways and services talk through: service
//! registration, unary and streaming calls to logical (`name.scope`) or
//! physical (`name:scope:node`) endpoints, broadcast events and a live-node
//! listing. [`Mesh`] is an in-process implementation in which every payload
//! crosses the `quilt-proto` wire framing.

use async_trait::async_trait;
use futures::stream::BoxStream;
use quilt_proto::{Endpoint, InstanceId, ServiceName};
use serde_json::Value;
use std::time::Duration;

mod action;
mod error;
mod mesh;

pub use action::{Action, ActionStream, ActionTable, BoxError, StreamFn, UnaryFn};
pub use error::{BrokerError, ACTION_FAILED, ACTION_FAILED_CODE};
pub use mesh::{EventSubscription, MemoryBroker, Mesh};

/// Items of a streaming call as seen by the caller.
pub type ItemStream = BoxStream<'static, Result<Value, BrokerError>>;

/// The broker substrate, as seen from one node.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Identifier of the local node.
    fn node_id(&self) -> &str;

    /// Heartbeat interval of the substrate; liveness refreshes derive from it.
    fn heartbeat_interval(&self) -> Duration;

    /// Register `service` on the local node with `actions`.
    async fn create_service(
        &self,
        service: ServiceName,
        actions: ActionTable,
    ) -> Result<InstanceId, BrokerError>;

    /// Withdraw a service instance registered by this node.
    async fn remove_service(&self, instance: &InstanceId) -> Result<(), BrokerError>;

    /// Unary call.
    async fn call(&self, target: &Endpoint, action: &str, payload: Value)
        -> Result<Value, BrokerError>;

    /// Streaming call.
    async fn call_stream(
        &self,
        target: &Endpoint,
        action: &str,
        payload: Value,
    ) -> Result<ItemStream, BrokerError>;

    /// Broadcast an event to every subscriber of `event`.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), BrokerError>;

    /// Subscribe to `event`.
    fn subscribe(&self, event: &str) -> EventSubscription;

    /// Live instances serving `filter`.
    async fn list_live_nodes(&self, filter: &ServiceName) -> Result<Vec<InstanceId>, BrokerError>;

    /// Withdraw every service of this node and disconnect it.
    async fn stop(&self) -> Result<(), BrokerError>;
}
