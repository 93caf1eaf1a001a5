// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime state of one gateway run.

use quilt_directory::{RetryPolicy, ServiceDirectory};
use quilt_proto::{IntrospectionReply, IntrospectionRecord, ServiceName};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Discovery bookkeeping of a gateway.
///
/// Created at start, mutated by discovery, frozen once `composed_schema` is
/// set. Snapshots are handed out by [`crate::GatewayHandle::state`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    /// Names of fragments composed locally.
    pub declared_local: BTreeSet<String>,
    /// Names of the remote services the gateway requires.
    pub declared_remote: BTreeSet<String>,
    /// Introspection records of remote services found so far.
    pub registered: BTreeMap<String, IntrospectionRecord>,
    /// Remote services not yet found.
    pub waiting: BTreeSet<String>,
    /// Service directories by remote name.
    pub directories: BTreeMap<String, Arc<ServiceDirectory>>,
    /// Composed SDL, once ready.
    pub composed_schema: Option<String>,
}

impl RuntimeState {
    /// Fresh state: every remote name is waiting.
    pub fn new(declared_local: BTreeSet<String>, declared_remote: BTreeSet<String>) -> Self {
        Self {
            waiting: declared_remote.clone(),
            declared_local,
            declared_remote,
            ..Self::default()
        }
    }

    /// True once every remote service is registered.
    pub fn all_registered(&self) -> bool {
        self.waiting.is_empty()
    }

    /// True once the schema is composed.
    pub fn is_ready(&self) -> bool {
        self.composed_schema.is_some()
    }

    /// Apply a successful introspection of `name`.
    ///
    /// The first reply moves the name from waiting to registered and creates
    /// its directory; later replies from other instances extend the directory.
    pub(crate) fn register(
        &mut self,
        name: &str,
        scope: &str,
        reply: IntrospectionReply,
        policy: RetryPolicy,
    ) -> Arc<ServiceDirectory> {
        let IntrospectionReply { instance, record } = reply;
        let directory = self
            .directories
            .entry(name.to_owned())
            .or_insert_with(|| {
                Arc::new(
                    ServiceDirectory::new(ServiceName::new(name, scope), Some(record.hash))
                        .with_policy(policy),
                )
            })
            .clone();
        directory.push(instance.clone());
        if self.waiting.remove(name) {
            info!(service = name, %instance, hash = %record.hash, "service registered");
            self.registered.insert(name.to_owned(), record);
        } else {
            debug!(service = name, %instance, "additional instance");
        }
        directory
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use quilt_proto::{ContentHash, HandlerKeys, InstanceId};

    fn reply(node: &str) -> IntrospectionReply {
        IntrospectionReply {
            instance: InstanceId::new("Post", "main", node),
            record: IntrospectionRecord {
                name: "Post".into(),
                type_text: "type Post {\n  title: String\n}".into(),
                handlers: HandlerKeys::default(),
                hash: ContentHash::of("type Post {\n  title: String\n}"),
                nodes: Vec::new(),
                appliances: Vec::new(),
            },
        }
    }

    #[test]
    fn first_reply_registers_and_later_replies_extend() {
        let mut state = RuntimeState::new(
            BTreeSet::from(["User".to_owned()]),
            BTreeSet::from(["Post".to_owned()]),
        );
        assert!(!state.all_registered());

        let dir = state.register("Post", "main", reply("a"), RetryPolicy::default());
        assert!(state.all_registered());
        assert_eq!(dir.hash(), Some(reply("a").record.hash));

        state.register("Post", "main", reply("b"), RetryPolicy::default());
        assert_eq!(state.directories["Post"].active().len(), 2);
        assert_eq!(state.registered.len(), 1);
    }
}
