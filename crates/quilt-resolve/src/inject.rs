// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Values a fragment injects into the context of each of its handlers.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Rejected injection value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("injections must be a keyed mapping, got {0}")]
pub struct InjectionError(pub String);

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A static object, or a zero-argument producer invoked once per call.
#[derive(Clone)]
pub enum Injections {
    /// Fixed mapping, checked at construction.
    Static(Map<String, Value>),
    /// Producer; its result is checked on every call.
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl Injections {
    /// Static injections; fails unless `value` is an object.
    pub fn fixed(value: Value) -> Result<Self, InjectionError> {
        match value {
            Value::Object(map) => Ok(Injections::Static(map)),
            other => Err(InjectionError(kind_of(&other).to_owned())),
        }
    }

    /// Injections produced per call.
    pub fn producer(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Injections::Producer(Arc::new(f))
    }

    /// Mapping to merge for one call.
    pub fn produce(&self) -> Result<Map<String, Value>, InjectionError> {
        match self {
            Injections::Static(map) => Ok(map.clone()),
            Injections::Producer(f) => match f() {
                Value::Object(map) => Ok(map),
                other => Err(InjectionError(kind_of(&other).to_owned())),
            },
        }
    }
}

impl fmt::Debug for Injections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Injections::Static(map) => f.debug_tuple("Static").field(map).finish(),
            Injections::Producer(_) => f.write_str("Producer"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fixed_rejects_non_objects() {
        assert!(Injections::fixed(json!({ "db": "main" })).is_ok());
        assert_eq!(
            Injections::fixed(json!([1, 2])).unwrap_err(),
            InjectionError("an array".into())
        );
    }

    #[test]
    fn producer_result_is_checked_per_call() {
        let bad = Injections::producer(|| json!("nope"));
        assert!(bad.produce().is_err());
        let good = Injections::producer(|| json!({ "now": 1 }));
        assert_eq!(good.produce().unwrap().get("now"), Some(&json!(1)));
    }
}
