// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Broker errors.

use quilt_proto::wire::WireError;
use quilt_proto::ErrorPayload;

/// Code carried by faults raised inside an action body.
pub const ACTION_FAILED_CODE: u32 = 500;
/// Name carried by faults raised inside an action body.
pub const ACTION_FAILED: &str = "E_ACTION_FAILED";

/// Failures of broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No connected instance answers the endpoint.
    #[error("no live instance for {0}")]
    NoInstance(String),
    /// The instance does not expose the action.
    #[error("{instance} has no action `{action}`")]
    UnknownAction {
        /// Target instance.
        instance: String,
        /// Requested action.
        action: String,
    },
    /// The action exists but is unary where a stream was requested, or the reverse.
    #[error("action `{action}` on {instance} is {kind}")]
    WrongKind {
        /// Target instance.
        instance: String,
        /// Requested action.
        action: String,
        /// Actual kind.
        kind: &'static str,
    },
    /// The instance is already registered.
    #[error("{0} is already registered")]
    AlreadyRegistered(String),
    /// The remote action failed.
    #[error("remote failure [{}]: {}", .0.name, .0.message)]
    Remote(ErrorPayload),
    /// Framing failed.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The local broker node was stopped or disconnected.
    #[error("broker node `{0}` is not connected")]
    Disconnected(String),
}

impl BrokerError {
    /// True when the call never reached a live instance.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BrokerError::NoInstance(_) | BrokerError::Disconnected(_))
    }
}
