//! Per-channel registration state and sticky cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use crate::consumer::{target_key, Consumer, ConsumerMethod, Registration};
use crate::error::{BusError, BusResult};
use crate::types::{Delivery, EventTypeId};

/// The two registration maps, guarded by one bus-level lock.
#[derive(Default)]
struct RegistryMaps {
    /// Event type → registrations ordered by priority desc, insertion
    /// stable. Lists are copy-on-write: snapshots iterate without the lock.
    by_type: HashMap<EventTypeId, Arc<Vec<Arc<Registration>>>>,
    /// Target identity → event types it registered for, for teardown.
    by_target: HashMap<usize, Vec<EventTypeId>>,
}

/// Registration state of one channel: consumer lists, teardown index and
/// the sticky cache (which carries its own sharded lock).
pub(crate) struct Registry {
    maps: Mutex<RegistryMaps>,
    sticky: DashMap<EventTypeId, Delivery>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            maps: Mutex::new(RegistryMaps::default()),
            sticky: DashMap::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryMaps> {
        self.maps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers all of `methods` for `target`.
    ///
    /// Validation happens before any mutation, so a failed registration
    /// leaves the registry untouched. Returns the sticky replays owed to the
    /// new registrations: each is delivered through its consumer's own
    /// dispatcher by the caller, after this lock is released.
    pub(crate) fn register(
        &self,
        target: Arc<dyn Consumer>,
        methods: Vec<ConsumerMethod>,
        inheritance: bool,
    ) -> BusResult<Vec<(Arc<Registration>, Delivery)>> {
        let mut maps = self.lock();
        let key = target_key(&target);

        if maps.by_target.contains_key(&key) {
            let first = &methods[0];
            return Err(BusError::AlreadyRegistered {
                target: first.target_type(),
                event_type: first.event_type().name(),
            });
        }
        for (i, method) in methods.iter().enumerate() {
            if methods[..i]
                .iter()
                .any(|other| other.event_type() == method.event_type())
            {
                return Err(BusError::AlreadyRegistered {
                    target: method.target_type(),
                    event_type: method.event_type().name(),
                });
            }
        }

        let mut replays = Vec::new();
        let mut subscribed = Vec::with_capacity(methods.len());
        for method in methods {
            let event_type = method.event_type();
            let sticky = method.is_sticky();
            let registration = Arc::new(Registration::new(target.clone(), method));

            let list = maps.by_type.entry(event_type).or_default();
            let list = Arc::make_mut(list);
            let at = list
                .iter()
                .position(|existing| {
                    existing.method().priority_value() < registration.method().priority_value()
                })
                .unwrap_or(list.len());
            list.insert(at, registration.clone());
            subscribed.push(event_type);

            if sticky {
                if inheritance {
                    for entry in self.sticky.iter() {
                        if entry.value().widened().contains(&event_type) {
                            replays.push((registration.clone(), entry.value().clone()));
                        }
                    }
                } else if let Some(entry) = self.sticky.get(&event_type) {
                    replays.push((registration.clone(), entry.value().clone()));
                }
            }
        }
        maps.by_target.insert(key, subscribed);
        Ok(replays)
    }

    /// Deactivates and removes every registration of `target`. Returns
    /// false when the target was never registered.
    pub(crate) fn unregister(&self, key: usize) -> bool {
        let mut maps = self.lock();
        let Some(subscribed) = maps.by_target.remove(&key) else {
            return false;
        };
        for event_type in subscribed {
            if let Some(list) = maps.by_type.get_mut(&event_type) {
                let list = Arc::make_mut(list);
                list.retain(|registration| {
                    if registration.target_key() == key {
                        registration.deactivate();
                        false
                    } else {
                        true
                    }
                });
            }
        }
        true
    }

    /// Copy-on-write snapshot of the consumer list for one event type.
    pub(crate) fn snapshot(&self, event_type: &EventTypeId) -> Option<Arc<Vec<Arc<Registration>>>> {
        self.lock().by_type.get(event_type).cloned()
    }

    pub(crate) fn is_registered(&self, key: usize) -> bool {
        self.lock().by_target.contains_key(&key)
    }

    /// True when any of `types` has at least one registration.
    pub(crate) fn has_consumer_for(&self, types: &[EventTypeId]) -> bool {
        let maps = self.lock();
        types
            .iter()
            .any(|ty| maps.by_type.get(ty).is_some_and(|list| !list.is_empty()))
    }

    // Sticky cache. Entries are exact-type; widening happens at replay time
    // against each entry's recorded lineage.

    pub(crate) fn sticky_put(&self, delivery: Delivery) {
        self.sticky.insert(delivery.event_type(), delivery);
    }

    pub(crate) fn sticky_get(&self, event_type: &EventTypeId) -> Option<Delivery> {
        self.sticky.get(event_type).map(|entry| entry.value().clone())
    }

    pub(crate) fn sticky_remove(&self, event_type: &EventTypeId) -> Option<Delivery> {
        self.sticky.remove(event_type).map(|(_, delivery)| delivery)
    }

    /// Removes the sticky entry for `event_type` only when `matches` holds
    /// for the cached payload. The check-and-remove is atomic.
    pub(crate) fn sticky_remove_if(
        &self,
        event_type: &EventTypeId,
        matches: impl Fn(&Delivery) -> bool,
    ) -> bool {
        self.sticky
            .remove_if(event_type, |_, delivery| matches(delivery))
            .is_some()
    }

    pub(crate) fn sticky_clear(&self) {
        self.sticky.clear();
    }
}
