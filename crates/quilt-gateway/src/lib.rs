// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Quilt gateway.
//!
//! Services publish their nodes with [`publish_node`]. A [`Gateway`] composes
//! its local nodes with stand-ins for the remote services it requires:
//!
//! 1. it registers itself as `name.scope` (actions `query`, `subscribe`,
//!    `abort`),
//! 2. probes every required service until each has answered introspection,
//! 3. rebuilds each remote record as a forwarding node ([`stand_in`]),
//! 4. composes everything and builds the [`Executor`],
//! 5. announces its declared names so replicas can [`compare`].
//!
//! Documents carrying `@gateway(name: "...")` are forwarded to that gateway
//! (see [`route`] and [`GatewayClient`]).

mod consistency;
mod discovery;
mod error;
mod executor;
mod federation;
mod gateway;
mod remote;
mod service;
mod state;

pub use consistency::compare;
pub use discovery::probe;
pub use error::GatewayError;
pub use executor::Executor;
pub use federation::{route, GatewayClient, ResponseStream, Routed, GATEWAY_DIRECTIVE};
pub use gateway::{Gateway, GatewayBuilder, GatewayHandle, RunOutcome};
pub use remote::{stand_in, RemoteTarget};
pub use service::{publish_node, PublishedNode};
pub use state::RuntimeState;
