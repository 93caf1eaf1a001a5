// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request context shared by reference between hooks and handlers.

use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ContextState {
    values: Map<String, Value>,
    injections: Map<String, Value>,
}

/// Mutable context shared by every hook and handler of one request.
///
/// Cloning a `Context` clones the handle, not the data: a value set by a pre
/// hook is visible to the handler and to every post hook of the same call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Mutex<ContextState>>,
}

impl Context {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with caller values.
    pub fn with_values(values: Map<String, Value>) -> Self {
        let ctx = Self::default();
        ctx.lock().values = values;
        ctx
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a context value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    /// Set a context value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().values.insert(key.into(), value)
    }

    /// Mutate a value in place; missing keys start as `null`.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut state = self.lock();
        let slot = state.values.entry(key.to_owned()).or_insert(Value::Null);
        f(slot)
    }

    /// Snapshot of all values (what travels with a remote call).
    pub fn values(&self) -> Map<String, Value> {
        self.lock().values.clone()
    }

    /// Read one injected value.
    pub fn injection(&self, key: &str) -> Option<Value> {
        self.lock().injections.get(key).cloned()
    }

    /// Snapshot of the injections map.
    pub fn injections(&self) -> Map<String, Value> {
        self.lock().injections.clone()
    }

    /// Merge `own` over the injections already present: existing keys are
    /// kept unless `own` names them.
    pub(crate) fn merge_injections(&self, own: Map<String, Value>) {
        let mut state = self.lock();
        for (key, value) in own {
            state.injections.insert(key, value);
        }
    }

    /// True when both handles point at the same context.
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Where a handler sits in the schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInfo {
    /// Parent type name (`Query`, `User`, …).
    pub parent_type: String,
    /// Field being resolved.
    pub field_name: String,
}

impl FieldInfo {
    /// Build field info.
    pub fn new(parent_type: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            parent_type: parent_type.into(),
            field_name: field_name.into(),
        }
    }
}

/// Arguments of one handler invocation.
#[derive(Debug, Clone, Default)]
pub struct Call {
    /// Parent object for field resolvers; `null` at the root.
    pub parent: Value,
    /// Field arguments.
    pub args: Map<String, Value>,
    /// Shared request context.
    pub context: Context,
    /// Position in the schema.
    pub info: FieldInfo,
}

impl Call {
    /// Call with arguments and a fresh context.
    pub fn new(args: Map<String, Value>) -> Self {
        Self {
            args,
            ..Self::default()
        }
    }

    /// Replace the context handle.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Replace the parent value.
    pub fn with_parent(mut self, parent: Value) -> Self {
        self.parent = parent;
        self
    }

    /// Replace the field info.
    pub fn with_info(mut self, info: FieldInfo) -> Self {
        self.info = info;
        self
    }

    /// Read one argument.
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }
}
