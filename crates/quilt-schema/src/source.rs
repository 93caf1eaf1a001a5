// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Where a fragment's SDL comes from.

use async_graphql_parser::types::ServiceDocument;
use std::path::PathBuf;

use crate::{sdl, SchemaError};

/// Type text as authored: inline text, a file, or an already parsed document.
#[derive(Debug, Clone)]
pub enum TypeSource {
    /// Inline SDL.
    Text(String),
    /// SDL file, read when the fragment is validated.
    File(PathBuf),
    /// Parsed document, printed when the fragment is validated.
    Document(ServiceDocument),
}

impl TypeSource {
    /// Source backed by a file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        TypeSource::File(path.into())
    }

    /// Resolve the source to SDL text.
    pub fn text(&self) -> Result<String, SchemaError> {
        match self {
            TypeSource::Text(text) => Ok(text.clone()),
            TypeSource::File(path) => {
                std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
                    path: path.clone(),
                    source,
                })
            }
            TypeSource::Document(doc) => Ok(sdl::print(doc)),
        }
    }
}

impl From<&str> for TypeSource {
    fn from(text: &str) -> Self {
        TypeSource::Text(text.to_owned())
    }
}

impl From<String> for TypeSource {
    fn from(text: String) -> Self {
        TypeSource::Text(text)
    }
}

impl From<ServiceDocument> for TypeSource {
    fn from(doc: ServiceDocument) -> Self {
        TypeSource::Document(doc)
    }
}
