// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wrapping of handlers into injection + pre/resolve/post chains.

use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::{
    Call, FailureKind, Handler, Injections, PostHook, PreHook, ResolveFn, ResolverError,
    SubscribeFn,
};

/// Stream returned by a wrapped subscription.
pub type WrappedStream = BoxStream<'static, Result<Value, ResolverError>>;

/// Fragment-level settings applied around a handler.
#[derive(Clone, Default)]
pub struct WrapOptions {
    /// Name used in errors and logs (`Node.Bucket.field`).
    pub qualified_name: String,
    /// Fragment-level pre hooks, run before the handler's own.
    pub pre: Vec<PreHook>,
    /// Fragment-level post hooks, run after the handler's own.
    pub post: Vec<PostHook>,
    /// Injections merged into the context before any hook.
    pub injections: Option<Injections>,
}

impl WrapOptions {
    /// Options carrying only a qualified name.
    pub fn named(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            ..Self::default()
        }
    }
}

struct Chain {
    name: String,
    pre: Vec<PreHook>,
    post: Vec<PostHook>,
    injections: Option<Injections>,
}

impl Chain {
    fn fail(&self, kind: FailureKind) -> ResolverError {
        debug!(handler = %self.name, error = %kind, "resolver chain aborted");
        ResolverError::new(self.name.clone(), kind)
    }

    fn inject(&self, call: &Call) -> Result<(), ResolverError> {
        if let Some(injections) = &self.injections {
            let own = injections
                .produce()
                .map_err(|e| self.fail(FailureKind::InvalidInjections(e.0)))?;
            call.context.merge_injections(own);
        }
        Ok(())
    }

    async fn before(&self, call: &Call) -> Result<(), ResolverError> {
        self.inject(call)?;
        for (index, hook) in self.pre.iter().enumerate() {
            hook(call.clone())
                .await
                .map_err(|source| self.fail(FailureKind::PreHook { index, source }))?;
        }
        Ok(())
    }

    async fn after(&self, value: &Value, call: &Call) -> Result<(), ResolverError> {
        for (index, hook) in self.post.iter().enumerate() {
            hook(value.clone(), call.clone())
                .await
                .map_err(|source| self.fail(FailureKind::PostHook { index, source }))?;
        }
        Ok(())
    }
}

/// A resolve chain ready to be called.
#[derive(Clone)]
pub struct WrappedResolver {
    chain: Arc<Chain>,
    resolve: ResolveFn,
}

impl WrappedResolver {
    /// Qualified handler name.
    pub fn qualified_name(&self) -> &str {
        &self.chain.name
    }

    /// Run injection, pre hooks, the resolver and post hooks.
    pub async fn call(&self, call: Call) -> Result<Value, ResolverError> {
        self.chain.before(&call).await?;
        let value = (self.resolve)(call.clone())
            .await
            .map_err(|e| self.chain.fail(FailureKind::Handler(e)))?;
        self.chain.after(&value, &call).await?;
        Ok(value)
    }
}

impl fmt::Debug for WrappedResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WrappedResolver")
            .field(&self.chain.name)
            .finish()
    }
}

/// A subscription chain ready to be opened.
#[derive(Clone)]
pub struct WrappedSubscriber {
    chain: Arc<Chain>,
    subscribe: SubscribeFn,
}

impl WrappedSubscriber {
    /// Qualified handler name.
    pub fn qualified_name(&self) -> &str {
        &self.chain.name
    }

    /// Run injection and pre hooks, open the stream, run post hooks.
    ///
    /// Post hooks receive `null`; the stream itself is handed to the caller.
    pub async fn subscribe(&self, call: Call) -> Result<WrappedStream, ResolverError> {
        self.chain.before(&call).await?;
        let stream = (self.subscribe)(call.clone())
            .await
            .map_err(|e| self.chain.fail(FailureKind::Handler(e)))?;
        self.chain.after(&Value::Null, &call).await?;
        let name = self.chain.name.clone();
        Ok(stream
            .map(move |item| item.map_err(|e| ResolverError::new(name.clone(), FailureKind::Stream(e))))
            .boxed())
    }
}

impl fmt::Debug for WrappedSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WrappedSubscriber")
            .field(&self.chain.name)
            .finish()
    }
}

/// Output of [`wrap`].
#[derive(Clone, Debug)]
pub enum Wrapped {
    /// Query, mutation or field resolver.
    Resolver(WrappedResolver),
    /// Subscription.
    Subscriber(WrappedSubscriber),
}

impl Wrapped {
    /// Qualified handler name.
    pub fn qualified_name(&self) -> &str {
        match self {
            Wrapped::Resolver(r) => r.qualified_name(),
            Wrapped::Subscriber(s) => s.qualified_name(),
        }
    }
}

/// Wrap `handler` with the fragment's hooks and injections.
///
/// Pre hooks run fragment-level first, then the handler's own; post hooks run
/// the handler's own first, then fragment-level.
pub fn wrap(handler: &Handler, options: WrapOptions) -> Wrapped {
    let WrapOptions {
        qualified_name,
        pre,
        post,
        injections,
    } = options;
    let chain = |own_pre: &[PreHook], own_post: &[PostHook], node_pre: Vec<PreHook>| {
        let mut all_pre = node_pre;
        all_pre.extend(own_pre.iter().cloned());
        let mut all_post: Vec<PostHook> = own_post.to_vec();
        all_post.extend(post.iter().cloned());
        Arc::new(Chain {
            name: qualified_name.clone(),
            pre: all_pre,
            post: all_post,
            injections: injections.clone(),
        })
    };
    match handler {
        Handler::Plain(resolve) => Wrapped::Resolver(WrappedResolver {
            chain: chain(&[], &[], pre),
            resolve: resolve.clone(),
        }),
        Handler::Resolve(spec) => Wrapped::Resolver(WrappedResolver {
            chain: chain(&spec.pre, &spec.post, pre),
            resolve: spec.resolve.clone(),
        }),
        Handler::Subscribe(spec) => Wrapped::Subscriber(WrappedSubscriber {
            chain: chain(&spec.pre, &spec.post, pre),
            subscribe: spec.subscribe.clone(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{post_hook, pre_hook, BoxError, Context, ResolveSpec};
    use futures::stream;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    fn resolver(wrapped: Wrapped) -> WrappedResolver {
        match wrapped {
            Wrapped::Resolver(r) => r,
            Wrapped::Subscriber(_) => panic!("expected resolver"),
        }
    }

    fn bump(ctx: &Context) {
        ctx.update("counter", |v| {
            *v = json!(v.as_i64().unwrap_or(0) + 1);
        });
    }

    #[tokio::test]
    async fn pre_hook_mutation_is_visible_to_resolver_and_post_hooks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_a = seen.clone();
        let seen_b = seen.clone();
        let spec = ResolveSpec::new(|call: Call| async move {
            Ok(call.context.get("counter").unwrap_or(Value::Null))
        })
        .pre(|call: Call| async move {
            bump(&call.context);
            Ok(())
        })
        .post(move |value: Value, call: Call| {
            let seen = seen_a.clone();
            async move {
                seen.lock().unwrap().push((value, call.context.get("counter")));
                Ok(())
            }
        })
        .post(move |_value: Value, call: Call| {
            let seen = seen_b.clone();
            async move {
                seen.lock().unwrap().push((json!("second"), call.context.get("counter")));
                Ok(())
            }
        });

        let wrapped = resolver(wrap(&spec.into(), WrapOptions::named("User.Query.user")));
        let ctx = Context::new();
        let out = wrapped.call(Call::default().with_context(ctx.clone())).await.unwrap();

        assert_eq!(out, json!(1));
        assert_eq!(ctx.get("counter"), Some(json!(1)));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (json!(1), Some(json!(1))));
        assert_eq!(seen[1], (json!("second"), Some(json!(1))));
    }

    #[tokio::test]
    async fn hooks_run_in_declaration_order_around_handler() {
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let record = |tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>| {
            let log = log.clone();
            pre_hook(move |_| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(tag);
                    Ok(())
                }
            })
        };
        let record_post = |tag: &'static str, log: &Arc<Mutex<Vec<&'static str>>>| {
            let log = log.clone();
            post_hook(move |_, _| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(tag);
                    Ok(())
                }
            })
        };

        let log_resolve = log.clone();
        let mut spec = ResolveSpec::new(move |_| {
            let log = log_resolve.clone();
            async move {
                log.lock().unwrap().push("resolve");
                Ok(Value::Null)
            }
        });
        spec.pre.push(record("handler-pre", &log));
        spec.post.push(record_post("handler-post", &log));

        let options = WrapOptions {
            qualified_name: "Post.Query.post".into(),
            pre: vec![record("node-pre-1", &log), record("node-pre-2", &log)],
            post: vec![record_post("node-post", &log)],
            injections: None,
        };
        resolver(wrap(&spec.into(), options))
            .call(Call::default())
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "node-pre-1",
                "node-pre-2",
                "handler-pre",
                "resolve",
                "handler-post",
                "node-post"
            ]
        );
    }

    #[tokio::test]
    async fn failing_pre_hook_aborts_chain_with_qualified_name() {
        let called = Arc::new(Mutex::new(false));
        let called_in = called.clone();
        let spec = ResolveSpec::new(move |_| {
            let called = called_in.clone();
            async move {
                *called.lock().unwrap() = true;
                Ok(Value::Null)
            }
        })
        .pre(|_| async { Err::<(), BoxError>("denied".into()) });

        let err = resolver(wrap(&spec.into(), WrapOptions::named("User.Mutation.ban")))
            .call(Call::default())
            .await
            .unwrap_err();

        assert_eq!(err.qualified_name, "User.Mutation.ban");
        assert!(matches!(err.kind, FailureKind::PreHook { index: 0, .. }));
        assert!(err.to_string().contains("denied"));
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn injections_merge_over_existing_context_entries() {
        let handler = Handler::plain(|call: Call| async move { Ok(Value::Object(call.context.injections())) });
        let options = WrapOptions {
            qualified_name: "User.Query.user".into(),
            injections: Some(Injections::fixed(json!({ "db": "users", "mode": "rw" })).unwrap()),
            ..WrapOptions::default()
        };
        let ctx = Context::new();
        let mut existing = Map::new();
        existing.insert("db".into(), json!("shared"));
        existing.insert("tenant".into(), json!("acme"));
        ctx.merge_injections(existing);

        let out = resolver(wrap(&handler, options))
            .call(Call::default().with_context(ctx))
            .await
            .unwrap();
        assert_eq!(out, json!({ "db": "users", "mode": "rw", "tenant": "acme" }));
    }

    #[tokio::test]
    async fn producer_returning_non_object_fails_call() {
        let handler = Handler::value(json!(1));
        let options = WrapOptions {
            qualified_name: "User.Query.user".into(),
            injections: Some(Injections::producer(|| json!(42))),
            ..WrapOptions::default()
        };
        let err = resolver(wrap(&handler, options))
            .call(Call::default())
            .await
            .unwrap_err();
        assert!(matches!(err.kind, FailureKind::InvalidInjections(_)));
    }

    #[tokio::test]
    async fn subscriptions_wrap_stream_items() {
        let handler = Handler::subscribe(|_| async {
            let items: Vec<Result<Value, BoxError>> =
                vec![Ok(json!(1)), Err("boom".into())];
            Ok(stream::iter(items).boxed())
        });
        let Wrapped::Subscriber(sub) = wrap(&handler, WrapOptions::named("Post.Subscription.posted")) else {
            panic!("expected subscriber");
        };
        let items: Vec<_> = sub.subscribe(Call::default()).await.unwrap().collect().await;
        assert_eq!(items[0].as_ref().unwrap(), &json!(1));
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.qualified_name, "Post.Subscription.posted");
        assert!(matches!(err.kind, FailureKind::Stream(_)));
    }
}
