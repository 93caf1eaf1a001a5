// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cross-gateway federation.
//!
//! An operation may carry `@gateway(name: "...")` to run on another gateway
//! of the same scope. The directive is cut out of the document text and the
//! rest is forwarded unchanged.

use async_graphql_parser::types::{Directive, ExecutableDocument};
use async_graphql_parser::{parse_query, Pos, Positioned};
use async_graphql_value::Value as GqlValue;
use futures::stream::BoxStream;
use futures::StreamExt;
use quilt_broker::Broker;
use quilt_directory::{RetryPolicy, ServiceDirectory};
use quilt_proto::{
    Endpoint, InstanceId, QueryPayload, QueryResponse, ServiceName, QUERY_ACTION, SUBSCRIBE_ACTION,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::GatewayError;

/// Name of the federation directive.
pub const GATEWAY_DIRECTIVE: &str = "gateway";

/// A document after federation routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    /// Target gateway named by the directive, if any.
    pub gateway: Option<String>,
    /// Document with the directive removed.
    pub query: String,
}

fn directive_target(directive: &Directive) -> Result<String, GatewayError> {
    let Some((_, value)) = directive
        .arguments
        .iter()
        .find(|(name, _)| name.node.as_str() == "name")
    else {
        return Err(GatewayError::Federation("@gateway requires a `name` argument".into()));
    };
    match &value.node {
        GqlValue::String(name) => Ok(name.clone()),
        GqlValue::Variable(var) => Err(GatewayError::Federation(format!(
            "@gateway name must be a string literal, not `${var}`"
        ))),
        other => Err(GatewayError::Federation(format!(
            "@gateway name must be a string, got {other}"
        ))),
    }
}

/// Byte offset of a parser position, counting columns in chars the way the
/// parser does.
fn offset_of(text: &str, pos: Pos) -> Option<usize> {
    let (mut line, mut column) = (1, 1);
    for (offset, ch) in text.char_indices() {
        if line == pos.line && column == pos.column {
            return Some(offset);
        }
        match ch {
            '\r' => column = 1,
            '\n' => {
                line += 1;
                column = 1;
            }
            _ => column += 1,
        }
    }
    None
}

/// End of the directive starting at `start`: its name and, if present, its
/// parenthesized arguments (string contents may hold parentheses).
fn directive_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    let name_end = i;
    while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
        i += 1;
    }
    if bytes.get(i) != Some(&b'(') {
        return Some(name_end);
    }
    let mut depth = 0usize;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"\"\"\"") {
            let close = bytes[i + 3..].windows(3).position(|w| w == b"\"\"\"")?;
            i += 3 + close + 3;
            continue;
        }
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn strip(text: &str, directive: &Positioned<Directive>) -> Result<String, GatewayError> {
    let start = offset_of(text, directive.pos)
        .filter(|&at| text[at..].starts_with('@'))
        .ok_or_else(|| GatewayError::Federation("cannot locate @gateway in the document".into()))?;
    let end = directive_end(text.as_bytes(), start)
        .ok_or_else(|| GatewayError::Federation("unterminated @gateway arguments".into()))?;
    let mut out = String::with_capacity(text.len());
    out.push_str(text[..start].trim_end_matches([' ', '\t']));
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(text[end..].trim_start_matches([' ', '\t']));
    Ok(out)
}

/// Find the `@gateway` directive of `query`, if any, and strip it.
///
/// At most one operation directive may name a gateway.
pub fn route(query: &str) -> Result<Routed, GatewayError> {
    let document: ExecutableDocument =
        parse_query(query).map_err(|err| GatewayError::Federation(err.to_string()))?;
    let mut found = document
        .operations
        .iter()
        .flat_map(|(_, op)| op.node.directives.iter())
        .filter(|d| d.node.name.node.as_str() == GATEWAY_DIRECTIVE);
    let Some(directive) = found.next() else {
        return Ok(Routed {
            gateway: None,
            query: query.to_owned(),
        });
    };
    if found.next().is_some() {
        return Err(GatewayError::Federation(
            "at most one @gateway directive is allowed per document".into(),
        ));
    }
    Ok(Routed {
        gateway: Some(directive_target(&directive.node)?),
        query: strip(query, directive)?,
    })
}

/// Stream of responses from a remote subscription.
pub type ResponseStream = BoxStream<'static, Result<QueryResponse, GatewayError>>;

/// Sends documents to gateways over the broker.
///
/// Documents without `@gateway` go to the default gateway.
pub struct GatewayClient {
    broker: Arc<dyn Broker>,
    scope: String,
    default_gateway: String,
    policy: RetryPolicy,
    directories: Mutex<BTreeMap<String, Arc<ServiceDirectory>>>,
}

impl GatewayClient {
    /// Client for gateways of `scope`, defaulting to `default_gateway`.
    pub fn new(broker: Arc<dyn Broker>, scope: impl Into<String>, default_gateway: impl Into<String>) -> Self {
        Self {
            broker,
            scope: scope.into(),
            default_gateway: default_gateway.into(),
            policy: RetryPolicy::default(),
            directories: Mutex::new(BTreeMap::new()),
        }
    }

    /// Replace the directory retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn directory(&self, gateway: &str) -> Arc<ServiceDirectory> {
        let mut directories = self.directories.lock().unwrap_or_else(PoisonError::into_inner);
        directories
            .entry(gateway.to_owned())
            .or_insert_with(|| {
                Arc::new(
                    ServiceDirectory::new(ServiceName::new(gateway, self.scope.as_str()), None)
                        .with_policy(self.policy),
                )
            })
            .clone()
    }

    async fn instance(&self, gateway: &str) -> Result<InstanceId, GatewayError> {
        let directory = self.directory(gateway);
        directory.refresh(self.broker.as_ref()).await?;
        directory
            .get_next_service()
            .await
            .ok_or_else(|| GatewayError::ServiceUnavailable(directory.service().to_string()))
    }

    fn split(&self, payload: QueryPayload) -> Result<(String, QueryPayload), GatewayError> {
        let routed = route(&payload.query)?;
        let gateway = routed.gateway.unwrap_or_else(|| self.default_gateway.clone());
        Ok((gateway, QueryPayload { query: routed.query, ..payload }))
    }

    /// Run a query or mutation.
    pub async fn query(&self, payload: QueryPayload) -> Result<QueryResponse, GatewayError> {
        let (gateway, payload) = self.split(payload)?;
        self.forward(&gateway, payload).await
    }

    /// Open a subscription.
    pub async fn subscribe(&self, payload: QueryPayload) -> Result<ResponseStream, GatewayError> {
        let (gateway, payload) = self.split(payload)?;
        self.forward_stream(&gateway, payload).await
    }

    /// Send an already routed document to `gateway`.
    pub async fn forward(&self, gateway: &str, payload: QueryPayload) -> Result<QueryResponse, GatewayError> {
        let instance = self.instance(gateway).await?;
        debug!(%instance, "forwarding query");
        let reply = self
            .broker
            .call(&Endpoint::Instance(instance), QUERY_ACTION, serde_json::to_value(payload)?)
            .await
            .map_err(|source| GatewayError::remote(gateway, source))?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Send an already routed subscription to `gateway`.
    pub async fn forward_stream(
        &self,
        gateway: &str,
        payload: QueryPayload,
    ) -> Result<ResponseStream, GatewayError> {
        let instance = self.instance(gateway).await?;
        debug!(%instance, "forwarding subscription");
        let stream = self
            .broker
            .call_stream(&Endpoint::Instance(instance), SUBSCRIBE_ACTION, serde_json::to_value(payload)?)
            .await
            .map_err(|source| GatewayError::remote(gateway, source))?;
        let gateway = gateway.to_owned();
        Ok(stream
            .map(move |item| match item {
                Ok(value) => Ok(serde_json::from_value(value)?),
                Err(source) => Err(GatewayError::remote(gateway.clone(), source)),
            })
            .boxed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn documents_without_the_directive_pass_through() {
        let routed = route("{ user { id } }").unwrap();
        assert_eq!(routed.gateway, None);
        assert_eq!(routed.query, "{ user { id } }");
    }

    #[test]
    fn directive_is_stripped_and_names_the_target() {
        let routed = route("query Q @gateway(name: \"billing\") {\n  invoice { total }\n}").unwrap();
        assert_eq!(routed.gateway.as_deref(), Some("billing"));
        assert_eq!(routed.query, "query Q {\n  invoice { total }\n}");
        assert_eq!(route(&routed.query).unwrap().gateway, None);
    }

    #[test]
    fn strings_with_parentheses_do_not_confuse_stripping() {
        let routed = route("mutation @gateway(name: \"a(b)\") { ping }").unwrap();
        assert_eq!(routed.gateway.as_deref(), Some("a(b)"));
        assert_eq!(routed.query, "mutation { ping }");
    }

    #[test]
    fn variables_cannot_name_the_gateway() {
        let err = route("query ($gw: String) @gateway(name: $gw) { ping }").unwrap_err();
        assert!(matches!(err, GatewayError::Federation(_)));
        assert!(err.to_string().contains("$gw"), "{err}");
    }

    #[test]
    fn multiple_directives_are_rejected() {
        let doc = "query A @gateway(name: \"x\") { a } query B @gateway(name: \"y\") { b }";
        assert!(matches!(route(doc), Err(GatewayError::Federation(_))));
    }

    #[test]
    fn name_argument_is_required() {
        assert!(matches!(
            route("query @gateway { a }"),
            Err(GatewayError::Federation(_))
        ));
        assert!(matches!(
            route("query @gateway(name: 3) { a }"),
            Err(GatewayError::Federation(_))
        ));
    }
}
