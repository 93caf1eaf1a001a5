// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process broker mesh.
//!
//! One [`Mesh`] is shared by any number of [`MemoryBroker`] nodes. Every
//! request, reply, stream item and event is framed with
//! [`quilt_proto::wire`] and decoded on the other side, so nothing but data
//! crosses between nodes.

use async_trait::async_trait;
use futures::StreamExt;
use quilt_proto::wire::{decode_message, encode_message, Message};
use quilt_proto::{Endpoint, ErrorPayload, InstanceId, ServiceName};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    Action, ActionTable, Broker, BrokerError, ItemStream, ACTION_FAILED, ACTION_FAILED_CODE,
};

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);
const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
struct EventFrame {
    name: Arc<str>,
    packet: Arc<Vec<u8>>,
}

#[derive(Default)]
struct MeshState {
    next_ts: u64,
    instances: BTreeMap<InstanceId, Arc<ActionTable>>,
    disconnected: HashSet<String>,
    cursors: HashMap<ServiceName, usize>,
}

impl MeshState {
    fn alloc_ts(&mut self) -> u64 {
        let t = self.next_ts;
        self.next_ts += 1;
        t
    }

    fn live(&self, service: &ServiceName) -> Vec<InstanceId> {
        self.instances
            .keys()
            .filter(|id| id.serves(service) && !self.disconnected.contains(id.node()))
            .cloned()
            .collect()
    }

    fn resolve(&mut self, target: &Endpoint) -> Result<(InstanceId, Arc<ActionTable>), BrokerError> {
        let instance = match target {
            Endpoint::Instance(id) => id.clone(),
            Endpoint::Service(service) => {
                let live = self.live(service);
                if live.is_empty() {
                    return Err(BrokerError::NoInstance(target.to_string()));
                }
                let cursor = self.cursors.entry(service.clone()).or_default();
                let pick = live[*cursor % live.len()].clone();
                *cursor = cursor.wrapping_add(1);
                pick
            }
        };
        if self.disconnected.contains(instance.node()) {
            return Err(BrokerError::NoInstance(target.to_string()));
        }
        let actions = self
            .instances
            .get(&instance)
            .cloned()
            .ok_or_else(|| BrokerError::NoInstance(target.to_string()))?;
        Ok((instance, actions))
    }
}

/// Shared in-process substrate.
#[derive(Clone)]
pub struct Mesh {
    state: Arc<Mutex<MeshState>>,
    events: broadcast::Sender<EventFrame>,
    heartbeat: Duration,
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

impl Mesh {
    /// Empty mesh with the default heartbeat.
    pub fn new() -> Self {
        Self::with_heartbeat(DEFAULT_HEARTBEAT)
    }

    /// Empty mesh reporting `heartbeat` as its heartbeat interval.
    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MeshState::default())),
            events,
            heartbeat,
        }
    }

    /// Broker handle for node `node_id`.
    pub fn node(&self, node_id: impl Into<String>) -> MemoryBroker {
        MemoryBroker {
            mesh: self.clone(),
            node_id: node_id.into(),
        }
    }

    /// Take a node offline: its instances stop being listed or routed to.
    pub async fn disconnect(&self, node_id: &str) {
        self.state.lock().await.disconnected.insert(node_id.to_owned());
        info!(node = node_id, "node disconnected");
    }

    /// Bring a disconnected node back.
    pub async fn reconnect(&self, node_id: &str) {
        self.state.lock().await.disconnected.remove(node_id);
        info!(node = node_id, "node reconnected");
    }

    async fn check_connected(&self, node_id: &str) -> Result<(), BrokerError> {
        if self.state.lock().await.disconnected.contains(node_id) {
            return Err(BrokerError::Disconnected(node_id.to_owned()));
        }
        Ok(())
    }

    async fn route(
        &self,
        from: &str,
        target: &Endpoint,
        action: &str,
        payload: Value,
    ) -> Result<(InstanceId, Action, Value, u64), BrokerError> {
        let (instance, actions, ts) = {
            let mut state = self.state.lock().await;
            if state.disconnected.contains(from) {
                return Err(BrokerError::Disconnected(from.to_owned()));
            }
            let (instance, actions) = state.resolve(target)?;
            (instance, actions, state.alloc_ts())
        };
        let handler = actions
            .get(action)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownAction {
                instance: instance.to_string(),
                action: action.to_owned(),
            })?;
        let request = transit(
            Message::Call {
                action: action.to_owned(),
                payload,
            },
            ts,
        )?;
        let payload = match request {
            Message::Call { payload, .. } => payload,
            other => return Err(unexpected(&other)),
        };
        debug!(from, target = %instance, action, ts, "routing call");
        Ok((instance, handler, payload, ts))
    }
}

fn transit(msg: Message, ts: u64) -> Result<Message, BrokerError> {
    let packet = encode_message(&msg, ts)?;
    let (decoded, _, _) = decode_message(&packet)?;
    Ok(decoded)
}

fn unexpected(msg: &Message) -> BrokerError {
    BrokerError::Remote(ErrorPayload {
        code: 400,
        name: "E_UNEXPECTED_MESSAGE".into(),
        message: format!("unexpected `{}` message", msg.op_name()),
    })
}

fn fault(err: &dyn std::fmt::Display) -> Message {
    Message::Fault(ErrorPayload {
        code: ACTION_FAILED_CODE,
        name: ACTION_FAILED.into(),
        message: err.to_string(),
    })
}

fn settle(msg: Message) -> Result<Value, BrokerError> {
    match msg {
        Message::Reply(value) | Message::Item(value) => Ok(value),
        Message::Fault(payload) => Err(BrokerError::Remote(payload)),
        other => Err(unexpected(&other)),
    }
}

/// Subscription to one broadcast event.
pub struct EventSubscription {
    name: String,
    rx: broadcast::Receiver<EventFrame>,
}

impl EventSubscription {
    /// Next payload of the subscribed event; `None` once the mesh is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if *frame.name == *self.name => match decode_message(&frame.packet) {
                    Ok((Message::Event { payload, .. }, _, _)) => return Some(payload),
                    Ok((other, _, _)) => warn!(op = other.op_name(), "ignoring non-event frame"),
                    Err(err) => warn!(?err, "dropping undecodable event"),
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(event = %self.name, missed, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// One node's handle on a [`Mesh`].
#[derive(Clone)]
pub struct MemoryBroker {
    mesh: Mesh,
    node_id: String,
}

impl MemoryBroker {
    /// The mesh this node belongs to.
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn heartbeat_interval(&self) -> Duration {
        self.mesh.heartbeat
    }

    async fn create_service(
        &self,
        service: ServiceName,
        actions: ActionTable,
    ) -> Result<InstanceId, BrokerError> {
        let instance = InstanceId::new(service.name, service.scope, self.node_id.clone());
        let mut state = self.mesh.state.lock().await;
        if state.disconnected.contains(&self.node_id) {
            return Err(BrokerError::Disconnected(self.node_id.clone()));
        }
        if state.instances.contains_key(&instance) {
            return Err(BrokerError::AlreadyRegistered(instance.to_string()));
        }
        state.instances.insert(instance.clone(), Arc::new(actions));
        info!(%instance, "service registered");
        Ok(instance)
    }

    async fn remove_service(&self, instance: &InstanceId) -> Result<(), BrokerError> {
        if self.mesh.state.lock().await.instances.remove(instance).is_some() {
            info!(%instance, "service withdrawn");
        }
        Ok(())
    }

    async fn call(
        &self,
        target: &Endpoint,
        action: &str,
        payload: Value,
    ) -> Result<Value, BrokerError> {
        let (instance, handler, payload, ts) =
            self.mesh.route(&self.node_id, target, action, payload).await?;
        let Action::Unary(f) = handler else {
            return Err(BrokerError::WrongKind {
                instance: instance.to_string(),
                action: action.to_owned(),
                kind: "stream",
            });
        };
        let reply = match f(payload).await {
            Ok(value) => Message::Reply(value),
            Err(err) => fault(&err),
        };
        settle(transit(reply, ts)?)
    }

    async fn call_stream(
        &self,
        target: &Endpoint,
        action: &str,
        payload: Value,
    ) -> Result<ItemStream, BrokerError> {
        let (instance, handler, payload, ts) =
            self.mesh.route(&self.node_id, target, action, payload).await?;
        let Action::Stream(f) = handler else {
            return Err(BrokerError::WrongKind {
                instance: instance.to_string(),
                action: action.to_owned(),
                kind: "unary",
            });
        };
        let items = match f(payload).await {
            Ok(items) => items,
            Err(err) => {
                return Err(match transit(fault(&err), ts)? {
                    Message::Fault(payload) => BrokerError::Remote(payload),
                    other => unexpected(&other),
                });
            }
        };
        Ok(items
            .map(move |item| {
                let msg = match item {
                    Ok(value) => Message::Item(value),
                    Err(err) => fault(&err),
                };
                transit(msg, ts).and_then(settle)
            })
            .boxed())
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), BrokerError> {
        let ts = {
            let mut state = self.mesh.state.lock().await;
            if state.disconnected.contains(&self.node_id) {
                return Err(BrokerError::Disconnected(self.node_id.clone()));
            }
            state.alloc_ts()
        };
        let packet = encode_message(
            &Message::Event {
                name: event.to_owned(),
                payload,
            },
            ts,
        )?;
        // No subscribers is not an error.
        let _ = self.mesh.events.send(EventFrame {
            name: Arc::from(event),
            packet: Arc::new(packet),
        });
        debug!(node = %self.node_id, event, ts, "event emitted");
        Ok(())
    }

    fn subscribe(&self, event: &str) -> EventSubscription {
        EventSubscription {
            name: event.to_owned(),
            rx: self.mesh.events.subscribe(),
        }
    }

    async fn list_live_nodes(&self, filter: &ServiceName) -> Result<Vec<InstanceId>, BrokerError> {
        self.mesh.check_connected(&self.node_id).await?;
        Ok(self.mesh.state.lock().await.live(filter))
    }

    async fn stop(&self) -> Result<(), BrokerError> {
        let mut state = self.mesh.state.lock().await;
        let node = self.node_id.as_str();
        state.instances.retain(|id, _| id.node() != node);
        state.disconnected.insert(self.node_id.clone());
        info!(node, "broker node stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use tokio::time::timeout;

    fn echo_table(tag: &'static str) -> ActionTable {
        let mut actions = ActionTable::new();
        actions.insert(
            "echo".into(),
            Action::unary(move |payload| async move { Ok(json!({ "from": tag, "got": payload })) }),
        );
        actions.insert(
            "fail".into(),
            Action::unary(|_| async { Err::<Value, _>("kaput".into()) }),
        );
        actions.insert(
            "count".into(),
            Action::stream(|payload| async move {
                let n = payload.as_u64().unwrap_or(0);
                Ok(stream::iter((0..n).map(|i| Ok(json!(i)))).boxed())
            }),
        );
        actions
    }

    #[tokio::test]
    async fn unary_calls_cross_the_wire() {
        let mesh = Mesh::new();
        let server = mesh.node("n1");
        let client = mesh.node("n2");
        let id = server
            .create_service(ServiceName::new("user", "main"), echo_table("n1"))
            .await
            .unwrap();
        assert_eq!(id.to_string(), "user:main:n1");

        let out = client
            .call(&Endpoint::Instance(id), "echo", json!({ "x": 1 }))
            .await
            .unwrap();
        assert_eq!(out, json!({ "from": "n1", "got": { "x": 1 } }));
    }

    #[tokio::test]
    async fn logical_endpoint_rotates_and_skips_disconnected_nodes() {
        let mesh = Mesh::new();
        let service = ServiceName::new("user", "main");
        mesh.node("a").create_service(service.clone(), echo_table("a")).await.unwrap();
        mesh.node("b").create_service(service.clone(), echo_table("b")).await.unwrap();
        let client = mesh.node("c");
        let target = Endpoint::Service(service.clone());

        let first = client.call(&target, "echo", json!(null)).await.unwrap();
        let second = client.call(&target, "echo", json!(null)).await.unwrap();
        assert_ne!(first["from"], second["from"]);

        mesh.disconnect("a").await;
        assert_eq!(client.list_live_nodes(&service).await.unwrap().len(), 1);
        for _ in 0..3 {
            let out = client.call(&target, "echo", json!(null)).await.unwrap();
            assert_eq!(out["from"], "b");
        }

        mesh.disconnect("b").await;
        let err = client.call(&target, "echo", json!(null)).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn faults_and_unknown_actions_surface_as_errors() {
        let mesh = Mesh::new();
        let id = mesh
            .node("n1")
            .create_service(ServiceName::new("user", "main"), echo_table("n1"))
            .await
            .unwrap();
        let client = mesh.node("n2");
        let target = Endpoint::Instance(id);

        match client.call(&target, "fail", json!(null)).await.unwrap_err() {
            BrokerError::Remote(payload) => {
                assert_eq!(payload.name, ACTION_FAILED);
                assert_eq!(payload.message, "kaput");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            client.call(&target, "nope", json!(null)).await.unwrap_err(),
            BrokerError::UnknownAction { .. }
        ));
        assert!(matches!(
            client.call(&target, "count", json!(1)).await.unwrap_err(),
            BrokerError::WrongKind { .. }
        ));
    }

    #[tokio::test]
    async fn streams_yield_every_item() {
        let mesh = Mesh::new();
        let id = mesh
            .node("n1")
            .create_service(ServiceName::new("post", "main"), echo_table("n1"))
            .await
            .unwrap();
        let items: Vec<Value> = mesh
            .node("n2")
            .call_stream(&Endpoint::Instance(id), "count", json!(3))
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(items, vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn events_reach_subscribers_of_that_name_only() {
        let mesh = Mesh::new();
        let a = mesh.node("a");
        let b = mesh.node("b");
        let mut sub = b.subscribe("compare");
        a.emit("other", json!(0)).await.unwrap();
        a.emit("compare", json!({ "n": 1 })).await.unwrap();
        let got = timeout(Duration::from_secs(1), sub.recv()).await.unwrap();
        assert_eq!(got, Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn stop_withdraws_services() {
        let mesh = Mesh::new();
        let service = ServiceName::new("user", "main");
        let node = mesh.node("n1");
        node.create_service(service.clone(), echo_table("n1")).await.unwrap();
        node.stop().await.unwrap();
        let client = mesh.node("n2");
        assert!(client.list_live_nodes(&service).await.unwrap().is_empty());
        assert!(matches!(
            node.call(&Endpoint::Service(service), "echo", json!(null)).await,
            Err(BrokerError::Disconnected(_))
        ));
    }
}
