// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Service actions: what a broker invokes when a call arrives.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Error type returned by action bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Items produced by a streaming action.
pub type ActionStream = BoxStream<'static, Result<Value, BoxError>>;

/// Type-erased unary action.
pub type UnaryFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Type-erased streaming action.
pub type StreamFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<ActionStream, BoxError>> + Send + Sync>;

/// One named action of a service.
#[derive(Clone)]
pub enum Action {
    /// Request/reply.
    Unary(UnaryFn),
    /// Request/stream.
    Stream(StreamFn),
}

impl Action {
    /// Unary action from an async closure.
    pub fn unary<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Action::Unary(Arc::new(
            move |payload: Value| -> BoxFuture<'static, Result<Value, BoxError>> {
                Box::pin(f(payload))
            },
        ))
    }

    /// Streaming action from an async closure.
    pub fn stream<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionStream, BoxError>> + Send + 'static,
    {
        Action::Stream(Arc::new(
            move |payload: Value| -> BoxFuture<'static, Result<ActionStream, BoxError>> {
                Box::pin(f(payload))
            },
        ))
    }

    /// `"unary"` or `"stream"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Unary(_) => "unary",
            Action::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action::{}", self.kind())
    }
}

/// Actions of one service, by name.
pub type ActionTable = BTreeMap<String, Action>;
