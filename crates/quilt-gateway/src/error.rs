// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Gateway errors.

use quilt_broker::BrokerError;
use quilt_proto::InstanceId;
use quilt_schema::SchemaError;

/// Failures of gateway construction, discovery and request handling.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Bad builder input.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Composition failed; the gateway never becomes ready.
    #[error(transparent)]
    Compose(#[from] SchemaError),
    /// No live instance answers a service.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// A remote handler or gateway failed.
    #[error("{name} failed remotely: {source}")]
    Remote {
        /// Qualified handler or gateway name.
        name: String,
        /// Broker failure.
        #[source]
        source: BrokerError,
    },
    /// A replica of the same gateway declares different fragments.
    #[error("replica {peer} disagrees: {reason}")]
    ProtocolMismatch {
        /// The disagreeing replica.
        peer: InstanceId,
        /// Missing and extra names.
        reason: String,
    },
    /// A peer replica aborted this gateway.
    #[error("aborted by {from}: {reason}")]
    Aborted {
        /// Replica that sent the abort.
        from: InstanceId,
        /// Reason given by the peer.
        reason: String,
    },
    /// The `@gateway` directive was misused.
    #[error("federation: {0}")]
    Federation(String),
    /// Broker failure outside a handler call.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// A payload did not decode.
    #[error("payload: {0}")]
    Payload(#[from] serde_json::Error),
    /// The executable schema could not be built.
    #[error("executor: {0}")]
    Executor(String),
    /// The gateway was stopped.
    #[error("gateway stopped")]
    Stopped,
}

impl GatewayError {
    /// Wrap a broker failure of `name`, folding unreachable targets into
    /// [`GatewayError::ServiceUnavailable`].
    pub(crate) fn remote(name: impl Into<String>, source: BrokerError) -> Self {
        let name = name.into();
        if source.is_unavailable() {
            GatewayError::ServiceUnavailable(format!("{name}: {source}"))
        } else {
            GatewayError::Remote { name, source }
        }
    }
}
