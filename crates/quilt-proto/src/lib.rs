// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema shared by Quilt brokers, services and gateways.
//!
//! Everything in this crate is plain data: addresses, introspection records,
//! the replica compare/abort payloads and call envelopes. None of it carries
//! executable code, so any record can cross a process boundary through
//! [`wire`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub mod wire;

/// Action every published node answers with its [`IntrospectionReply`].
pub const INTROSPECTION_ACTION: &str = "introspection";
/// Gateway action executing a GraphQL document.
pub const QUERY_ACTION: &str = "query";
/// Gateway action opening a GraphQL subscription stream.
pub const SUBSCRIBE_ACTION: &str = "subscribe";
/// Gateway action that stops the receiving replica.
pub const ABORT_ACTION: &str = "abort";

/// Errors raised while parsing addresses or hashes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Instance ids are `name:scope:node`.
    #[error("malformed instance id `{0}` (expected name:scope:node)")]
    MalformedInstance(String),
    /// Hash text was not 64 hex digits.
    #[error("malformed content hash `{0}`")]
    MalformedHash(String),
}

/// Logical service address (`name.scope`), served by any live instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceName {
    /// Logical fragment or gateway name.
    pub name: String,
    /// Gateway scope the service belongs to.
    pub scope: String,
}

impl ServiceName {
    /// Build a logical address.
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.scope)
    }
}

/// Physical instance address: the triple `logicalName:gatewayScope:node`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct InstanceId {
    name: String,
    scope: String,
    node: String,
}

impl InstanceId {
    /// Build an instance id from its parts.
    pub fn new(name: impl Into<String>, scope: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            node: node.into(),
        }
    }

    /// Logical service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gateway scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Node (process) identifier hosting the instance.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Logical address this instance serves.
    pub fn service(&self) -> ServiceName {
        ServiceName::new(self.name.clone(), self.scope.clone())
    }

    /// True when this instance serves `service`.
    pub fn serves(&self, service: &ServiceName) -> bool {
        self.name == service.name && self.scope == service.scope
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.scope, self.node)
    }
}

impl FromStr for InstanceId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(scope), Some(node))
                if !name.is_empty() && !scope.is_empty() && !node.is_empty() =>
            {
                Ok(Self::new(name, scope, node))
            }
            _ => Err(AddressError::MalformedInstance(s.to_owned())),
        }
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for InstanceId {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where a broker call is routed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Any live instance of a logical service.
    Service(ServiceName),
    /// One specific instance.
    Instance(InstanceId),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Service(s) => s.fmt(f),
            Endpoint::Instance(i) => i.fmt(f),
        }
    }
}

/// A 32-byte BLAKE3 digest of a fragment's type text.
///
/// Serialized as lowercase hex so introspection payloads stay readable in logs.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash the given type text.
    pub fn of(text: &str) -> Self {
        Self(*blake3::hash(text.as_bytes()).as_bytes())
    }

    /// View the hash as bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ContentHash {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || AddressError::MalformedHash(s.to_owned());
        if s.len() != 64 || !s.is_ascii() {
            return Err(malformed());
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| malformed())?;
        }
        Ok(Self(out))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Handler buckets owned by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bucket {
    /// Root query fields.
    Query,
    /// Root mutation fields.
    Mutation,
    /// Root subscription fields.
    Subscription,
    /// Field resolvers of the node's own object type.
    Fields,
}

impl Bucket {
    /// The three root operation buckets.
    pub const ROOTS: [Bucket; 3] = [Bucket::Query, Bucket::Mutation, Bucket::Subscription];

    /// Name as it appears in SDL and action names.
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Query => "Query",
            Bucket::Mutation => "Mutation",
            Bucket::Subscription => "Subscription",
            Bucket::Fields => "Fields",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action name for a handler: `Bucket.handler` (field resolvers use `Fields.Type.field`).
pub fn action_name(bucket: Bucket, handler: &str) -> String {
    format!("{bucket}.{handler}")
}

/// Handler keys of one node, per bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerKeys {
    /// Root query handlers.
    pub query: BTreeSet<String>,
    /// Root mutation handlers.
    pub mutation: BTreeSet<String>,
    /// Root subscription handlers.
    pub subscription: BTreeSet<String>,
    /// Field resolvers on the node's own type.
    pub fields: BTreeSet<String>,
}

impl HandlerKeys {
    /// Keys of one bucket.
    pub fn bucket(&self, bucket: Bucket) -> &BTreeSet<String> {
        match bucket {
            Bucket::Query => &self.query,
            Bucket::Mutation => &self.mutation,
            Bucket::Subscription => &self.subscription,
            Bucket::Fields => &self.fields,
        }
    }

    /// Mutable keys of one bucket.
    pub fn bucket_mut(&mut self, bucket: Bucket) -> &mut BTreeSet<String> {
        match bucket {
            Bucket::Query => &mut self.query,
            Bucket::Mutation => &mut self.mutation,
            Bucket::Subscription => &mut self.subscription,
            Bucket::Fields => &mut self.fields,
        }
    }
}

/// Kinds of locally-scoped appliance a node may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApplianceKind {
    /// Enum type.
    Enum,
    /// Union type.
    Union,
    /// Interface type.
    Interface,
    /// Object type with optional field resolvers.
    ObjectType,
}

/// Transmissible summary of a node-scoped appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplianceRecord {
    /// Appliance kind.
    pub kind: ApplianceKind,
    /// Declared type name.
    pub name: String,
    /// Normalized SDL.
    pub type_text: String,
    /// Field resolver keys (object types only).
    #[serde(default)]
    pub fields: BTreeSet<String>,
    /// Enum value mapping (enums only).
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

/// Network summary of a node, enough to rebuild a remote stand-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionRecord {
    /// Node name.
    pub name: String,
    /// Normalized SDL of the node itself.
    pub type_text: String,
    /// Handler keys by bucket.
    pub handlers: HandlerKeys,
    /// BLAKE3 digest of `type_text`.
    pub hash: ContentHash,
    /// Nested nodes, depth first.
    #[serde(default)]
    pub nodes: Vec<IntrospectionRecord>,
    /// Locally-scoped appliances.
    #[serde(default)]
    pub appliances: Vec<ApplianceRecord>,
}

/// Reply to an [`INTROSPECTION_ACTION`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionReply {
    /// Instance that answered.
    pub instance: InstanceId,
    /// The node's record.
    pub record: IntrospectionRecord,
}

/// Payload of a forwarded handler call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Parent object (field resolvers) or `null`.
    #[serde(default)]
    pub parent: Value,
    /// Field arguments.
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Caller context values.
    #[serde(default)]
    pub context: Map<String, Value>,
}

/// Payload of a gateway [`QUERY_ACTION`] / [`SUBSCRIBE_ACTION`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPayload {
    /// GraphQL document.
    pub query: String,
    /// Variables object.
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Operation to run when the document holds several.
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Initial context values.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl QueryPayload {
    /// Payload for a document with no variables.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// One GraphQL error as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Human readable message.
    pub message: String,
    /// Response path of the failing field.
    #[serde(default)]
    pub path: Vec<Value>,
}

/// GraphQL response (`{ data, errors }`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Result data, `null` when execution failed early.
    #[serde(default)]
    pub data: Value,
    /// Execution errors.
    #[serde(default)]
    pub errors: Vec<ResponseError>,
}

/// Broadcast by a gateway once its schema is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareMessage {
    /// Gateway logical name.
    pub gateway: String,
    /// Gateway scope.
    pub scope: String,
    /// Sending replica.
    pub instance: InstanceId,
    /// Names of locally declared fragments.
    pub local: BTreeSet<String>,
    /// Names of required remote services.
    pub remote: BTreeSet<String>,
}

/// Payload of an [`ABORT_ACTION`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortPayload {
    /// Replica that detected the mismatch.
    pub from: InstanceId,
    /// Description of the mismatch.
    pub reason: String,
}

/// Error payload carried by failed calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric error code.
    pub code: u32,
    /// Stable identifier (e.g. "E_ACTION_FAILED").
    pub name: String,
    /// Human readable message.
    pub message: String,
}
