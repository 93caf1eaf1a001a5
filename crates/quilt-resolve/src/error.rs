// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types surfaced by wrapped handlers.

/// Error type returned by user handlers and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which step of the chain failed.
#[derive(Debug, thiserror::Error)]
pub enum FailureKind {
    /// Producer returned something other than a keyed mapping.
    #[error("invalid injections: {0}")]
    InvalidInjections(String),
    /// A pre hook failed.
    #[error("pre hook #{index} failed: {source}")]
    PreHook {
        /// Position in the pre chain.
        index: usize,
        /// Hook error.
        #[source]
        source: BoxError,
    },
    /// The handler itself failed.
    #[error("{0}")]
    Handler(#[source] BoxError),
    /// A post hook failed.
    #[error("post hook #{index} failed: {source}")]
    PostHook {
        /// Position in the post chain.
        index: usize,
        /// Hook error.
        #[source]
        source: BoxError,
    },
    /// A subscription stream yielded an error.
    #[error("stream item failed: {0}")]
    Stream(#[source] BoxError),
}

/// Failure of a wrapped handler, annotated with its qualified name
/// (`Node.Bucket.field`).
#[derive(Debug, thiserror::Error)]
#[error("{qualified_name}: {kind}")]
pub struct ResolverError {
    /// Handler that failed.
    pub qualified_name: String,
    /// Failing step.
    #[source]
    pub kind: FailureKind,
}

impl ResolverError {
    /// Build an error for `qualified_name`.
    pub fn new(qualified_name: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            kind,
        }
    }
}
