// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Composition-time errors.

use std::fmt;
use std::path::PathBuf;

/// Declaration kinds a fragment is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    /// `type`
    Object,
    /// `scalar`
    Scalar,
    /// `enum`
    Enum,
    /// `union`
    Union,
    /// `interface`
    Interface,
    /// `directive @…`
    Directive,
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeclKind::Object => "object type",
            DeclKind::Scalar => "scalar",
            DeclKind::Enum => "enum",
            DeclKind::Union => "union",
            DeclKind::Interface => "interface",
            DeclKind::Directive => "directive",
        })
    }
}

/// Mismatch between a fragment's SDL and its handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The type text does not parse.
    #[error("`{fragment}`: parse error: {message}")]
    Parse {
        /// Fragment being validated.
        fragment: String,
        /// Parser message.
        message: String,
    },
    /// No declaration of the expected kind carries the fragment's name.
    #[error("`{fragment}`: no {kind} declaration named `{fragment}`")]
    MissingDeclaration {
        /// Fragment being validated.
        fragment: String,
        /// Kind that was expected.
        kind: DeclKind,
    },
    /// A handler key names a field that is not declared.
    #[error("`{fragment}`: handler `{owner}.{field}` has no declared field")]
    UnknownField {
        /// Fragment being validated.
        fragment: String,
        /// Bucket or type owning the key (`Query`, `Fields`, enum name …).
        owner: String,
        /// Offending key.
        field: String,
    },
    /// A declared field has no handler.
    #[error("`{fragment}`: declared field `{owner}.{field}` has no handler")]
    UnknownHandler {
        /// Fragment being validated.
        fragment: String,
        /// Bucket or type owning the field.
        owner: String,
        /// Field without a handler.
        field: String,
    },
}

/// Errors raised while building fragments or composing a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Bad constructor input.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Fragment failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A fragment name was registered twice in one composition.
    #[error("duplicate fragment name `{0}`")]
    DuplicateName(String),
    /// Two nodes provide the same root handler.
    #[error("duplicate handler `{bucket}.{field}` provided by `{node}`")]
    DuplicateHandler {
        /// Root bucket.
        bucket: String,
        /// Colliding key.
        field: String,
        /// Node that tried to add it second.
        node: String,
    },
    /// Declarations could not be merged.
    #[error("cannot merge declarations: {0}")]
    Merge(String),
    /// A type text could not be parsed outside of fragment validation.
    #[error("parse error: {0}")]
    Parse(String),
    /// A directive visitor rejected the composed document.
    #[error("directive `@{name}` failed: {message}")]
    Directive {
        /// Directive name.
        name: String,
        /// Visitor message.
        message: String,
    },
    /// A file type source could not be read.
    #[error("cannot read type source {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SchemaError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SchemaError::Configuration(message.into())
    }
}
