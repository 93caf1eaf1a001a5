// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handler shapes, discriminated when the handler is built.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::{BoxError, Call};

/// Future returned by resolve functions.
pub type ResolveFuture = BoxFuture<'static, Result<Value, BoxError>>;
/// Lazy, possibly infinite, non-restartable value sequence.
pub type ValueStream = BoxStream<'static, Result<Value, BoxError>>;
/// Future returned by subscribe functions.
pub type SubscribeFuture = BoxFuture<'static, Result<ValueStream, BoxError>>;

/// Type-erased resolve function.
pub type ResolveFn = Arc<dyn Fn(Call) -> ResolveFuture + Send + Sync>;
/// Type-erased subscribe function.
pub type SubscribeFn = Arc<dyn Fn(Call) -> SubscribeFuture + Send + Sync>;
/// Hook run before the handler with the original call.
pub type PreHook = Arc<dyn Fn(Call) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
/// Hook run after the handler with the resolved value and the original call.
pub type PostHook =
    Arc<dyn Fn(Value, Call) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Erase an async closure into a [`PreHook`].
pub fn pre_hook<F, Fut>(f: F) -> PreHook
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |call: Call| -> BoxFuture<'static, Result<(), BoxError>> { Box::pin(f(call)) })
}

/// Erase an async closure into a [`PostHook`].
pub fn post_hook<F, Fut>(f: F) -> PostHook
where
    F: Fn(Value, Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(
        move |value: Value, call: Call| -> BoxFuture<'static, Result<(), BoxError>> {
            Box::pin(f(value, call))
        },
    )
}

fn resolve_fn<F, Fut>(f: F) -> ResolveFn
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |call: Call| -> ResolveFuture { Box::pin(f(call)) })
}

/// `{resolve, pre, post}` handler.
#[derive(Clone)]
pub struct ResolveSpec {
    /// Resolve function.
    pub resolve: ResolveFn,
    /// Handler-level pre hooks.
    pub pre: Vec<PreHook>,
    /// Handler-level post hooks.
    pub post: Vec<PostHook>,
}

impl ResolveSpec {
    /// Spec with no hooks.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::from_fn(resolve_fn(f))
    }

    /// Spec around an already erased function.
    pub fn from_fn(resolve: ResolveFn) -> Self {
        Self {
            resolve,
            pre: Vec::new(),
            post: Vec::new(),
        }
    }

    /// Append a pre hook.
    pub fn pre<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.pre.push(pre_hook(f));
        self
    }

    /// Append a post hook.
    pub fn post<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.post.push(post_hook(f));
        self
    }
}

/// `{subscribe, pre, post}` handler.
#[derive(Clone)]
pub struct SubscribeSpec {
    /// Function opening the stream.
    pub subscribe: SubscribeFn,
    /// Handler-level pre hooks.
    pub pre: Vec<PreHook>,
    /// Handler-level post hooks; they observe `null` since the stream goes to the caller.
    pub post: Vec<PostHook>,
}

impl SubscribeSpec {
    /// Spec with no hooks.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ValueStream, BoxError>> + Send + 'static,
    {
        Self::from_fn(Arc::new(move |call: Call| -> SubscribeFuture {
            Box::pin(f(call))
        }))
    }

    /// Spec around an already erased function.
    pub fn from_fn(subscribe: SubscribeFn) -> Self {
        Self {
            subscribe,
            pre: Vec::new(),
            post: Vec::new(),
        }
    }

    /// Append a pre hook.
    pub fn pre<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.pre.push(pre_hook(f));
        self
    }

    /// Append a post hook.
    pub fn post<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.post.push(post_hook(f));
        self
    }
}

/// A resolver or subscription handler.
#[derive(Clone)]
pub enum Handler {
    /// Plain resolve function.
    Plain(ResolveFn),
    /// Resolve function with its own hooks.
    Resolve(ResolveSpec),
    /// Subscription producing a stream.
    Subscribe(SubscribeSpec),
}

impl Handler {
    /// Plain handler from an async closure.
    pub fn plain<F, Fut>(f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Handler::Plain(resolve_fn(f))
    }

    /// Handler always resolving to `value`.
    pub fn value(value: Value) -> Self {
        Handler::plain(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// Subscription handler from an async closure.
    pub fn subscribe<F, Fut>(f: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ValueStream, BoxError>> + Send + 'static,
    {
        Handler::Subscribe(SubscribeSpec::new(f))
    }

    /// True for the subscription shape.
    pub fn is_subscription(&self) -> bool {
        matches!(self, Handler::Subscribe(_))
    }
}

impl From<ResolveSpec> for Handler {
    fn from(spec: ResolveSpec) -> Self {
        Handler::Resolve(spec)
    }
}

impl From<SubscribeSpec> for Handler {
    fn from(spec: SubscribeSpec) -> Self {
        Handler::Subscribe(spec)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Plain(_) => f.write_str("Handler::Plain"),
            Handler::Resolve(spec) => f
                .debug_struct("Handler::Resolve")
                .field("pre", &spec.pre.len())
                .field("post", &spec.post.len())
                .finish(),
            Handler::Subscribe(spec) => f
                .debug_struct("Handler::Subscribe")
                .field("pre", &spec.pre.len())
                .field("post", &spec.post.len())
                .finish(),
        }
    }
}
