// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replica consistency: once ready, a gateway broadcasts the names it was
//! declared with; replicas of the same `name.scope` compare them with their
//! own and abort a sender that disagrees.
//!
//! Only declared names are compared. Fragment hashes are carried in
//! introspection but never take part here.

use quilt_broker::{Broker, EventSubscription};
use quilt_proto::{AbortPayload, CompareMessage, Endpoint, ABORT_ACTION};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::GatewayError;

fn describe(category: &str, ours: &BTreeSet<String>, theirs: &BTreeSet<String>) -> Option<String> {
    let missing: Vec<&str> = ours.difference(theirs).map(String::as_str).collect();
    let extra: Vec<&str> = theirs.difference(ours).map(String::as_str).collect();
    if missing.is_empty() && extra.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing [{}]", missing.join(", ")));
    }
    if !extra.is_empty() {
        parts.push(format!("extra [{}]", extra.join(", ")));
    }
    Some(format!("{category} {}", parts.join(", ")))
}

/// Compare a peer's broadcast with our own.
///
/// Messages from other gateways, other scopes or ourselves always pass.
/// Otherwise both categories must agree in both directions; the error names
/// what the peer is missing and what it has extra.
pub fn compare(own: &CompareMessage, peer: &CompareMessage) -> Result<(), GatewayError> {
    if peer.gateway != own.gateway || peer.scope != own.scope || peer.instance == own.instance {
        return Ok(());
    }
    let problems: Vec<String> = [
        describe("local fragments", &own.local, &peer.local),
        describe("remote services", &own.remote, &peer.remote),
    ]
    .into_iter()
    .flatten()
    .collect();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::ProtocolMismatch {
            peer: peer.instance.clone(),
            reason: problems.join("; "),
        })
    }
}

/// Broadcast `own` on `channel`.
pub(crate) async fn announce(
    broker: &dyn Broker,
    channel: &str,
    own: &CompareMessage,
) -> Result<(), GatewayError> {
    broker.emit(channel, serde_json::to_value(own)?).await?;
    debug!(instance = %own.instance, channel, "compare message sent");
    Ok(())
}

/// Listen on `events` until `shutdown`, aborting every replica that
/// disagrees with `own`.
pub(crate) fn spawn_listener(
    broker: Arc<dyn Broker>,
    own: CompareMessage,
    mut events: EventSubscription,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                payload = events.recv() => payload,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let Some(payload) = payload else { break };
            let peer: CompareMessage = match serde_json::from_value(payload) {
                Ok(peer) => peer,
                Err(err) => {
                    warn!(error = %err, "ignoring malformed compare message");
                    continue;
                }
            };
            if let Err(GatewayError::ProtocolMismatch { peer: target, reason }) = compare(&own, &peer) {
                warn!(peer = %target, %reason, "replica mismatch, aborting peer");
                let abort = AbortPayload {
                    from: own.instance.clone(),
                    reason,
                };
                let sent = match serde_json::to_value(&abort) {
                    Ok(body) => broker.call(&Endpoint::Instance(target.clone()), ABORT_ACTION, body).await,
                    Err(err) => {
                        warn!(error = %err, "abort payload did not encode");
                        continue;
                    }
                };
                match sent {
                    Ok(_) => info!(peer = %target, "peer aborted"),
                    Err(err) => warn!(peer = %target, error = %err, "abort call failed"),
                }
            }
        }
        debug!(instance = %own.instance, "compare listener stopped");
    })
}
