// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resolver pipeline for Quilt.
//!
//! Handlers come in three shapes ([`Handler`]): a plain resolve function, a
//! resolve function with its own hooks, or a subscription producing a lazy
//! stream. [`wrap`] turns any of them into a [`Wrapped`] entry that
//!
//! 1. merges the owning fragment's [`Injections`] into the call [`Context`],
//! 2. runs every pre hook in declaration order,
//! 3. invokes the handler,
//! 4. runs every post hook in declaration order with the resolved value,
//!
//! failing the whole chain with a [`ResolverError`] carrying the qualified
//! name of the handler as soon as any step fails.

mod context;
mod error;
mod handler;
mod inject;
mod pipeline;
mod tree;

pub use context::{Call, Context, FieldInfo};
pub use error::{BoxError, FailureKind, ResolverError};
pub use handler::{
    post_hook, pre_hook, Handler, PostHook, PreHook, ResolveFn, ResolveFuture, ResolveSpec,
    SubscribeFn, SubscribeFuture, SubscribeSpec, ValueStream,
};
pub use inject::{InjectionError, Injections};
pub use pipeline::{wrap, WrapOptions, Wrapped, WrappedResolver, WrappedStream, WrappedSubscriber};
pub use tree::{
    scalar_validator, type_resolver, typename_resolver, EnumMapping, ResolverTree, ScalarValidator,
    TypeResolver,
};
