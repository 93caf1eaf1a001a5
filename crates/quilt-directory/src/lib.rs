// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-service directory of live instances and the selection policy over them.
//!
//! A [`ServiceDirectory`] belongs to exactly one gateway run. It is fed by
//! discovery ([`ServiceDirectory::push`]) and by a refresh task that lists the
//! broker's live nodes for the directory's `name.scope`. Selection:
//!
//! * no live instance: `None`
//! * one: that instance
//! * two: strict alternation
//! * three or more: uniform random, re-drawn once if it repeats the last pick

use quilt_broker::{Broker, BrokerError};
use quilt_proto::{ContentHash, InstanceId, ServiceName};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest refresh period; a zero heartbeat is raised to this.
pub const MIN_REFRESH: Duration = Duration::from_millis(1);

/// Bounded retry used by [`ServiceDirectory::get_next_service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_millis(25),
        }
    }
}

#[derive(Debug)]
struct DirectoryState {
    active: BTreeSet<InstanceId>,
    last: Option<InstanceId>,
    rng: StdRng,
}

/// Live instances of one logical service.
#[derive(Debug)]
pub struct ServiceDirectory {
    service: ServiceName,
    hash: Option<ContentHash>,
    policy: RetryPolicy,
    state: Mutex<DirectoryState>,
}

impl ServiceDirectory {
    /// Empty directory for `service`, optionally remembering the fragment hash
    /// reported by its first introspection.
    pub fn new(service: ServiceName, hash: Option<ContentHash>) -> Self {
        Self::with_rng(service, hash, StdRng::from_entropy())
    }

    /// Same as [`ServiceDirectory::new`] with a deterministic random source.
    pub fn with_seed(service: ServiceName, hash: Option<ContentHash>, seed: u64) -> Self {
        Self::with_rng(service, hash, StdRng::seed_from_u64(seed))
    }

    fn with_rng(service: ServiceName, hash: Option<ContentHash>, rng: StdRng) -> Self {
        Self {
            service,
            hash,
            policy: RetryPolicy::default(),
            state: Mutex::new(DirectoryState {
                active: BTreeSet::new(),
                last: None,
                rng,
            }),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Logical service this directory tracks.
    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Fragment hash carried by the first introspection, if any.
    pub fn hash(&self) -> Option<ContentHash> {
        self.hash
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a live instance. Instances serving another `name.scope` are
    /// ignored. Returns whether the set changed.
    pub fn push(&self, instance: InstanceId) -> bool {
        if !instance.serves(&self.service) {
            warn!(service = %self.service, %instance, "ignoring instance of another service");
            return false;
        }
        let added = self.lock().active.insert(instance.clone());
        if added {
            debug!(service = %self.service, %instance, "instance added");
        }
        added
    }

    /// Forget an instance. Returns whether it was known.
    pub fn remove(&self, instance: &InstanceId) -> bool {
        self.lock().active.remove(instance)
    }

    /// Replace the live set wholesale, keeping only instances of this service.
    pub fn replace_active(&self, live: impl IntoIterator<Item = InstanceId>) {
        let next: BTreeSet<InstanceId> =
            live.into_iter().filter(|i| i.serves(&self.service)).collect();
        let mut state = self.lock();
        if state.active != next {
            info!(
                service = %self.service,
                before = state.active.len(),
                after = next.len(),
                "live instances changed"
            );
            state.active = next;
        }
    }

    /// Snapshot of the live set.
    pub fn active(&self) -> Vec<InstanceId> {
        self.lock().active.iter().cloned().collect()
    }

    /// The most recent pick, which doubles as the last known-good instance.
    pub fn last_selected(&self) -> Option<InstanceId> {
        self.lock().last.clone()
    }

    /// Pick the next instance without waiting.
    pub fn next_instance(&self) -> Option<InstanceId> {
        let mut state = self.lock();
        let live: Vec<InstanceId> = state.active.iter().cloned().collect();
        let pick = match live.as_slice() {
            [] => return None,
            [only] => only.clone(),
            [a, b] => {
                if state.last.as_ref() == Some(a) {
                    b.clone()
                } else {
                    a.clone()
                }
            }
            many => {
                let mut index = state.rng.gen_range(0..many.len());
                if state.last.as_ref() == Some(&many[index]) {
                    index = state.rng.gen_range(0..many.len());
                }
                many[index].clone()
            }
        };
        state.last = Some(pick.clone());
        Some(pick)
    }

    /// Pick the next instance, waiting between attempts while none is live and
    /// finally falling back to the last known-good instance.
    pub async fn get_next_service(&self) -> Option<InstanceId> {
        for attempt in 0..=self.policy.retries {
            if let Some(instance) = self.next_instance() {
                return Some(instance);
            }
            if attempt < self.policy.retries {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        let fallback = self.last_selected();
        debug!(
            service = %self.service,
            fallback = ?fallback.as_ref().map(ToString::to_string),
            "no live instance after retries"
        );
        fallback
    }

    /// Re-read the live set from the broker.
    pub async fn refresh(&self, broker: &dyn Broker) -> Result<(), BrokerError> {
        let live = broker.list_live_nodes(&self.service).await?;
        self.replace_active(live);
        Ok(())
    }

    /// Refresh every `interval` (at least [`MIN_REFRESH`]) until `shutdown`
    /// turns true or its sender is dropped.
    pub fn spawn_refresh(
        self: Arc<Self>,
        broker: Arc<dyn Broker>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_REFRESH));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh(broker.as_ref()).await {
                            warn!(service = %self.service, error = %err, "directory refresh failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!(service = %self.service, "directory refresh stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
