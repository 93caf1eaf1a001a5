// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Gateway lifecycle: configure, register, discover, compose, serve.
//!
//! A gateway registers itself as service `name.scope` before discovery so
//! peers can abort it at any point. Its `query` and `subscribe` actions fail
//! until the schema is composed.

use futures::StreamExt;
use quilt_app_core::settings::GatewaySettings;
use quilt_broker::{Action, ActionTable, BoxError, Broker};
use quilt_directory::RetryPolicy;
use quilt_proto::{
    AbortPayload, CompareMessage, InstanceId, QueryPayload, QueryResponse, ServiceName,
    ABORT_ACTION, QUERY_ACTION, SUBSCRIBE_ACTION,
};
use quilt_schema::{compose, Appliance, Node};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::consistency::{announce, spawn_listener};
use crate::discovery::Discovery;
use crate::federation::{route, GatewayClient, ResponseStream};
use crate::remote::{stand_in, RemoteTarget};
use crate::{Executor, GatewayError, RuntimeState};

/// How a gateway run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Still serving.
    Running,
    /// Stopped by its owner.
    Stopped,
    /// Aborted by a disagreeing replica.
    Aborted {
        /// Replica that sent the abort.
        from: InstanceId,
        /// Reason given by the replica.
        reason: String,
    },
}

/// Entry point for configuring a gateway.
#[derive(Debug)]
pub struct Gateway;

impl Gateway {
    /// Start configuring gateway `name`.
    pub fn builder(name: impl Into<String>) -> GatewayBuilder {
        GatewayBuilder {
            name: name.into(),
            settings: GatewaySettings::default(),
            nodes: Vec::new(),
            appliances: Vec::new(),
            remotes: BTreeSet::new(),
            shutdown: None,
        }
    }
}

/// Collects what a gateway composes locally and what it must discover.
pub struct GatewayBuilder {
    name: String,
    settings: GatewaySettings,
    nodes: Vec<Node>,
    appliances: Vec<Appliance>,
    remotes: BTreeSet<String>,
    shutdown: Option<watch::Receiver<bool>>,
}

fn check_segment(what: &str, value: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() || value.contains(['.', ':']) {
        return Err(GatewayError::Configuration(format!(
            "{what} `{value}` must be non-empty without `.` or `:`"
        )));
    }
    Ok(())
}

impl GatewayBuilder {
    /// Replace the settings (scope, intervals, retry policy, compare channel).
    pub fn settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Compose `node` locally.
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Compose a top-level appliance locally.
    pub fn appliance(mut self, appliance: impl Into<Appliance>) -> Self {
        self.appliances.push(appliance.into());
        self
    }

    /// Require remote service `name` in the gateway's scope.
    pub fn remote(mut self, name: impl Into<String>) -> Self {
        self.remotes.insert(name.into());
        self
    }

    /// Require several remote services.
    pub fn remotes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remotes.extend(names.into_iter().map(Into::into));
        self
    }

    /// Stop the gateway once `signal` turns `true`, including while it is
    /// still discovering.
    pub fn shutdown_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(signal);
        self
    }

    fn declared_local(&self) -> Result<BTreeSet<String>, GatewayError> {
        let mut local = BTreeSet::new();
        let names = self
            .nodes
            .iter()
            .flat_map(Node::fragment_names)
            .chain(self.appliances.iter().filter_map(Appliance::name).map(str::to_owned));
        for name in names {
            if self.remotes.contains(&name) {
                return Err(GatewayError::Configuration(format!(
                    "`{name}` is declared both locally and as a remote service"
                )));
            }
            local.insert(name);
        }
        Ok(local)
    }

    /// Register, discover every remote service, compose and announce.
    ///
    /// Returns once the gateway is ready. Discovery has no timeout; it ends
    /// early only through the shutdown signal or a peer abort.
    pub async fn start(self, broker: Arc<dyn Broker>) -> Result<GatewayHandle, GatewayError> {
        check_segment("gateway name", &self.name)?;
        check_segment("scope", &self.settings.scope)?;
        for remote in &self.remotes {
            check_segment("remote service", remote)?;
        }
        if self.nodes.is_empty() && self.remotes.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "gateway `{}` has no local nodes and no remote services",
                self.name
            )));
        }
        let local = self.declared_local()?;
        let Self {
            name,
            settings,
            nodes,
            appliances,
            remotes,
            shutdown: external,
        } = self;
        let scope = settings.scope.clone();
        let policy = RetryPolicy {
            retries: settings.directory_retries,
            delay: settings.directory_retry_delay(),
        };

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            name: name.clone(),
            instance: InstanceId::new(name.as_str(), scope.as_str(), broker.node_id()),
            state: Arc::new(Mutex::new(RuntimeState::new(local.clone(), remotes.clone()))),
            executor: OnceLock::new(),
            client: GatewayClient::new(Arc::clone(&broker), scope.as_str(), name.as_str())
                .with_policy(policy),
            abort: Mutex::new(None),
            shutdown,
            outcome: watch::channel(RunOutcome::Running).0,
        });
        if let Some(external) = external {
            spawn_bridge(Arc::downgrade(&shared), external);
        }

        let compare_events = broker.subscribe(&settings.compare_channel);
        let registered = broker
            .create_service(ServiceName::new(name.as_str(), scope.as_str()), actions(&shared))
            .await?;
        debug!(instance = %registered, "gateway service registered");
        spawn_supervisor(Arc::clone(&shared), Arc::clone(&broker), shutdown_rx.clone());

        let own = CompareMessage {
            gateway: name.clone(),
            scope: scope.clone(),
            instance: shared.instance.clone(),
            local,
            remote: remotes,
        };
        spawn_listener(Arc::clone(&broker), own.clone(), compare_events, shutdown_rx.clone());

        let discovery = Discovery {
            broker: broker.as_ref(),
            scope: scope.as_str(),
            poll_interval: settings.poll_interval(),
            policy,
            state: &shared.state,
        };
        if let Err(err) = discovery.run(&mut shutdown_rx).await {
            shared.shutdown.send_replace(true);
            return Err(shared.finish_error(err).await);
        }

        let ready = shared.compose(&nodes, &appliances, &broker);
        if let Err(err) = ready {
            shared.shutdown.send_replace(true);
            return Err(err);
        }
        let heartbeat = broker.heartbeat_interval();
        for directory in shared.snapshot().directories.into_values() {
            directory.spawn_refresh(Arc::clone(&broker), heartbeat, shutdown_rx.clone());
        }
        if let Err(err) = announce(broker.as_ref(), &settings.compare_channel, &own).await {
            shared.shutdown.send_replace(true);
            return Err(err);
        }
        info!(instance = %shared.instance, "gateway ready");
        Ok(GatewayHandle { shared })
    }
}

struct Shared {
    name: String,
    instance: InstanceId,
    state: Arc<Mutex<RuntimeState>>,
    executor: OnceLock<Executor>,
    client: GatewayClient,
    abort: Mutex<Option<AbortPayload>>,
    shutdown: watch::Sender<bool>,
    outcome: watch::Sender<RunOutcome>,
}

impl Shared {
    fn snapshot(&self) -> RuntimeState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn compose(&self, nodes: &[Node], appliances: &[Appliance], broker: &Arc<dyn Broker>) -> Result<(), GatewayError> {
        let state = self.snapshot();
        let mut all = nodes.to_vec();
        for (name, record) in &state.registered {
            let Some(directory) = state.directories.get(name) else {
                return Err(GatewayError::ServiceUnavailable(name.clone()));
            };
            all.push(stand_in(record, &RemoteTarget::new(Arc::clone(directory), Arc::clone(broker)))?);
        }
        let composed = compose(&all, appliances)?;
        let executor = Executor::build(&composed)?;
        self.executor
            .set(executor)
            .map_err(|_| GatewayError::Configuration(format!("gateway `{}` is already composed", self.name)))?;
        self.state.lock().unwrap_or_else(PoisonError::into_inner).composed_schema = Some(composed.schema_text);
        Ok(())
    }

    fn executor(&self) -> Result<&Executor, GatewayError> {
        self.executor
            .get()
            .ok_or_else(|| GatewayError::Executor(format!("gateway `{}` is not ready", self.name)))
    }

    /// `None` when the document runs here, otherwise the target gateway.
    fn target(&self, payload: &mut QueryPayload) -> Result<Option<String>, GatewayError> {
        let routed = route(&payload.query)?;
        payload.query = routed.query;
        Ok(routed.gateway.filter(|gateway| *gateway != self.name))
    }

    async fn execute(&self, mut payload: QueryPayload) -> Result<QueryResponse, GatewayError> {
        match self.target(&mut payload)? {
            None => Ok(self.executor()?.execute(payload).await),
            Some(gateway) => self.client.forward(&gateway, payload).await,
        }
    }

    async fn subscribe(&self, mut payload: QueryPayload) -> Result<ResponseStream, GatewayError> {
        match self.target(&mut payload)? {
            None => Ok(self.executor()?.subscribe(payload).map(Ok).boxed()),
            Some(gateway) => self.client.forward_stream(&gateway, payload).await,
        }
    }

    fn abort(&self, payload: AbortPayload) {
        warn!(from = %payload.from, reason = %payload.reason, "aborted by replica");
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(payload);
        self.shutdown.send_replace(true);
    }

    /// Wait until the supervisor has settled the run, then turn a failed
    /// start into the error that explains it.
    async fn finish_error(&self, err: GatewayError) -> GatewayError {
        let mut outcome = self.outcome.subscribe();
        let settled = outcome.wait_for(|o| *o != RunOutcome::Running).await.map(|o| o.clone());
        match settled {
            Ok(RunOutcome::Aborted { from, reason }) => GatewayError::Aborted { from, reason },
            _ => err,
        }
    }
}

fn gone() -> BoxError {
    GatewayError::Stopped.into()
}

fn actions(shared: &Arc<Shared>) -> ActionTable {
    let mut actions = ActionTable::new();
    let weak = Arc::downgrade(shared);
    actions.insert(
        QUERY_ACTION.to_owned(),
        Action::unary(move |payload| {
            let weak = weak.clone();
            async move {
                let shared = weak.upgrade().ok_or_else(gone)?;
                let payload: QueryPayload = serde_json::from_value(payload)?;
                let response = shared.execute(payload).await?;
                Ok(serde_json::to_value(response)?)
            }
        }),
    );
    let weak = Arc::downgrade(shared);
    actions.insert(
        SUBSCRIBE_ACTION.to_owned(),
        Action::stream(move |payload| {
            let weak = weak.clone();
            async move {
                let shared = weak.upgrade().ok_or_else(gone)?;
                let payload: QueryPayload = serde_json::from_value(payload)?;
                let stream = shared.subscribe(payload).await?;
                Ok(stream
                    .map(|item| -> Result<Value, BoxError> { Ok(serde_json::to_value(item?)?) })
                    .boxed())
            }
        }),
    );
    let weak = Arc::downgrade(shared);
    actions.insert(
        ABORT_ACTION.to_owned(),
        Action::unary(move |payload| {
            let weak = weak.clone();
            async move {
                let shared = weak.upgrade().ok_or_else(gone)?;
                shared.abort(serde_json::from_value(payload)?);
                Ok(Value::Null)
            }
        }),
    );
    actions
}

/// Withdraws the gateway service once shutdown fires and records the outcome.
fn spawn_supervisor(shared: Arc<Shared>, broker: Arc<dyn Broker>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        if shutdown.wait_for(|stop| *stop).await.is_err() {
            debug!(instance = %shared.instance, "shutdown sender dropped");
        }
        if let Err(err) = broker.remove_service(&shared.instance).await {
            warn!(instance = %shared.instance, error = %err, "gateway withdrawal failed");
        }
        let abort = shared.abort.lock().unwrap_or_else(PoisonError::into_inner).take();
        let outcome = match abort {
            Some(AbortPayload { from, reason }) => RunOutcome::Aborted { from, reason },
            None => RunOutcome::Stopped,
        };
        info!(instance = %shared.instance, ?outcome, "gateway stopped");
        shared.outcome.send_replace(outcome);
    });
}

/// Forwards an owner-supplied shutdown signal into the gateway.
fn spawn_bridge(shared: Weak<Shared>, mut external: watch::Receiver<bool>) {
    tokio::spawn(async move {
        if external.wait_for(|stop| *stop).await.is_ok() {
            if let Some(shared) = shared.upgrade() {
                shared.shutdown.send_replace(true);
            }
        }
    });
}

/// A started gateway.
#[derive(Clone)]
pub struct GatewayHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for GatewayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandle")
            .field("instance", &self.shared.instance)
            .finish_non_exhaustive()
    }
}

impl GatewayHandle {
    /// Physical address of this gateway.
    pub fn instance(&self) -> &InstanceId {
        &self.shared.instance
    }

    /// Run a query or mutation here, or on the gateway named by `@gateway`.
    pub async fn execute(&self, payload: QueryPayload) -> Result<QueryResponse, GatewayError> {
        self.shared.execute(payload).await
    }

    /// Open a subscription here, or on the gateway named by `@gateway`.
    pub async fn subscribe(&self, payload: QueryPayload) -> Result<ResponseStream, GatewayError> {
        self.shared.subscribe(payload).await
    }

    /// Snapshot of the runtime state.
    pub fn state(&self) -> RuntimeState {
        self.shared.snapshot()
    }

    /// SDL of the executable schema.
    pub fn sdl(&self) -> Result<String, GatewayError> {
        Ok(self.shared.executor()?.sdl())
    }

    /// Current outcome; [`RunOutcome::Running`] while serving.
    pub fn outcome(&self) -> RunOutcome {
        self.shared.outcome.borrow().clone()
    }

    /// Wait for the run to end: `Ok` when stopped, [`GatewayError::Aborted`]
    /// when a replica aborted it.
    pub async fn wait(&self) -> Result<(), GatewayError> {
        let mut outcome = self.shared.outcome.subscribe();
        let settled = outcome
            .wait_for(|o| *o != RunOutcome::Running)
            .await
            .map(|o| o.clone())
            .map_err(|_| GatewayError::Stopped)?;
        match settled {
            RunOutcome::Aborted { from, reason } => Err(GatewayError::Aborted { from, reason }),
            RunOutcome::Running | RunOutcome::Stopped => Ok(()),
        }
    }

    /// Stop background tasks, withdraw the gateway service and wait for both.
    pub async fn stop(&self) {
        self.shared.shutdown.send_replace(true);
        if let Err(err) = self.wait().await {
            warn!(instance = %self.shared.instance, error = %err, "gateway ended with an error");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use quilt_broker::Mesh;
    use quilt_resolve::Handler;
    use serde_json::json;

    fn shared(broker: &Arc<dyn Broker>) -> Shared {
        Shared {
            name: "front".into(),
            instance: InstanceId::new("front", "main", broker.node_id()),
            state: Arc::new(Mutex::new(RuntimeState::new(BTreeSet::from(["Ping".to_owned()]), BTreeSet::new()))),
            executor: OnceLock::new(),
            client: GatewayClient::new(Arc::clone(broker), "main", "front"),
            abort: Mutex::new(None),
            shutdown: watch::channel(false).0,
            outcome: watch::channel(RunOutcome::Running).0,
        }
    }

    #[tokio::test]
    async fn second_composition_is_refused() {
        let broker: Arc<dyn Broker> = Arc::new(Mesh::new().node("gw"));
        let ping = Node::builder("Ping")
            .type_text("type Ping { id: ID }\nextend type Query { ping: String }")
            .query("ping", Handler::value(json!("pong")))
            .build()
            .unwrap();
        let shared = shared(&broker);
        shared.compose(std::slice::from_ref(&ping), &[], &broker).unwrap();
        let err = shared.compose(&[ping], &[], &broker).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(ref msg) if msg.contains("already composed")), "{err}");
        assert!(shared.executor().is_ok());
    }
}
