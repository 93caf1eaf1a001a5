// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Discovery: probe waiting services until every one has answered
//! introspection.

use futures::future::join_all;
use quilt_broker::Broker;
use quilt_directory::RetryPolicy;
use quilt_proto::{Endpoint, IntrospectionReply, ServiceName, INTROSPECTION_ACTION};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{GatewayError, RuntimeState};

/// Ask `service` for its introspection record.
pub async fn probe(broker: &dyn Broker, service: &ServiceName) -> Result<IntrospectionReply, GatewayError> {
    let reply = broker
        .call(&Endpoint::Service(service.clone()), INTROSPECTION_ACTION, Value::Null)
        .await
        .map_err(|source| GatewayError::remote(service.to_string(), source))?;
    Ok(serde_json::from_value(reply)?)
}

pub(crate) struct Discovery<'a> {
    pub(crate) broker: &'a dyn Broker,
    pub(crate) scope: &'a str,
    pub(crate) poll_interval: Duration,
    pub(crate) policy: RetryPolicy,
    pub(crate) state: &'a Arc<Mutex<RuntimeState>>,
}

impl Discovery<'_> {
    fn waiting(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.waiting.iter().cloned().collect()
    }

    /// Probe every waiting name once, concurrently. Returns how many remain.
    pub(crate) async fn probe_waiting(&self) -> usize {
        let waiting = self.waiting();
        let probes = waiting.iter().map(|name| async move {
            let service = ServiceName::new(name.as_str(), self.scope);
            (name, probe(self.broker, &service).await)
        });
        for (name, outcome) in join_all(probes).await {
            match outcome {
                Ok(reply) => {
                    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                    state.register(name, self.scope, reply, self.policy);
                }
                Err(err) => debug!(service = %name, error = %err, "probe failed"),
            }
        }
        self.state.lock().unwrap_or_else(PoisonError::into_inner).waiting.len()
    }

    /// Probe until nothing is waiting or `shutdown` fires.
    pub(crate) async fn run(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), GatewayError> {
        loop {
            if *shutdown.borrow() {
                return Err(GatewayError::Stopped);
            }
            if self.probe_waiting().await == 0 {
                return Ok(());
            }
            info!(pending = ?self.waiting(), "waiting for services");
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(GatewayError::Stopped);
                    }
                }
            }
        }
    }
}
