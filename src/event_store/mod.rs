//! `EventStore`: owns the payload cell for every registered event
//! and applies the epsilon/debounce decision before a publication is handed
//! to the dispatcher. It knows nothing about subscribers or eventgroups —
//! that bookkeeping belongs to the registry (membership) and the
//! subscription engine (who gets told). Locking order: callers must not
//! hold a [`crate::subscription::SubscriptionEngine`] lock while entering
//! here (Registry < EventStore < SubscriptionEngine < Dispatcher).

mod debounce;

pub use debounce::{unfiltered, DebounceFilter, Decision};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::ids::{EventId, InstanceId, ServiceId};
use crate::observability::{LogField, Logger};

/// Per-event state: the last published payload, when it was last forwarded,
/// and the filter deciding whether the next `set_payload` call forwards.
struct EventCell {
    payload: Option<Vec<u8>>,
    last_forwarded: Option<Instant>,
    filter: DebounceFilter,
    /// Fields retain their payload across `stop_offer`/`offer` cycles;
    /// ordinary events do not.
    is_field: bool,
}

impl EventCell {
    fn new(filter: DebounceFilter, is_field: bool) -> Self {
        Self {
            payload: None,
            last_forwarded: None,
            filter,
            is_field,
        }
    }
}

/// Outcome of a publish attempt, handed back to the caller (normally
/// `CoreFacade`) so it can decide whether to enqueue a dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    pub forwarded: bool,
    pub payload: Vec<u8>,
}

pub struct EventStore {
    cells: RwLock<HashMap<(u16, u16, u16), RwLock<EventCell>>>,
    logger: Arc<dyn Logger>,
}

impl EventStore {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            logger,
        }
    }

    fn key(service: ServiceId, instance: InstanceId, event: EventId) -> (u16, u16, u16) {
        (service.get(), instance.get(), event.get())
    }

    /// Registers (or re-registers) the payload cell for an event. Re-
    /// registering an existing field preserves its last payload unless
    /// `reset_payload` is set; re-registering a plain event always clears
    /// it, matching `is_field`'s cache-retention rule.
    pub fn register_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        filter: DebounceFilter,
        is_field: bool,
        reset_payload: bool,
    ) {
        let key = Self::key(service, instance, event);
        let mut cells = self.cells.write();
        match cells.get(&key) {
            Some(existing) => {
                let mut cell = existing.write();
                cell.filter = filter;
                cell.is_field = is_field;
                if reset_payload || !is_field {
                    cell.payload = None;
                    cell.last_forwarded = None;
                }
            }
            None => {
                cells.insert(key, RwLock::new(EventCell::new(filter, is_field)));
            }
        }
    }

    /// Drops the cached payload for an event that lost its provider.
    /// Fields keep their metadata cell but forget the
    /// value so a later `offer` starts from a clean cache.
    pub fn clear_payload(&self, service: ServiceId, instance: InstanceId, event: EventId) {
        let key = Self::key(service, instance, event);
        let cells = self.cells.read();
        if let Some(cell_lock) = cells.get(&key) {
            let mut cell = cell_lock.write();
            cell.payload = None;
            cell.last_forwarded = None;
        }
    }

    pub fn current_payload(&self, service: ServiceId, instance: InstanceId, event: EventId) -> Option<Vec<u8>> {
        let key = Self::key(service, instance, event);
        let cells = self.cells.read();
        cells.get(&key).and_then(|cell_lock| cell_lock.read().payload.clone())
    }

    /// Applies the epsilon/debounce decision for a new payload value and,
    /// on forward, records it as the current value and forwarding timestamp.
    /// `force` bypasses the filter entirely (used for
    /// `notify_one`-style unicast redelivery of a value already decided).
    pub fn set_payload(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        payload: Vec<u8>,
        now: Instant,
        force: bool,
    ) -> PublishOutcome {
        let key = Self::key(service, instance, event);
        let cells = self.cells.read();
        let cell_lock = match cells.get(&key) {
            Some(cell_lock) => cell_lock,
            None => {
                self.logger.debug(
                    "event_store",
                    "set_payload on unregistered event, dropping",
                    &[
                        LogField::new("service", service),
                        LogField::new("instance", instance),
                        LogField::new("event", event),
                    ],
                );
                return PublishOutcome {
                    forwarded: false,
                    payload,
                };
            }
        };
        let mut cell = cell_lock.write();

        let decision = if force {
            Decision {
                forward: true,
                resets_interval_timer: true,
            }
        } else {
            cell.filter.should_forward(cell.payload.as_deref(), &payload, cell.last_forwarded, now)
        };

        // Fields always retain the latest value, forwarded or not; plain
        // events only update their cell when the value is actually sent.
        if cell.is_field || decision.forward {
            cell.payload = Some(payload.clone());
        }
        if decision.resets_interval_timer {
            cell.last_forwarded = Some(now);
        }

        PublishOutcome {
            forwarded: decision.forward,
            payload,
        }
    }

    /// A unicast delivery to a single late/rejoining subscriber: always
    /// forwards (subject to the caller already having decided this
    /// recipient needs the value) without perturbing the shared debounce
    /// timer used for the broadcast path.
    pub fn notify_one(&self, service: ServiceId, instance: InstanceId, event: EventId, payload: &[u8]) -> Vec<u8> {
        let key = Self::key(service, instance, event);
        let cells = self.cells.read();
        if let Some(cell_lock) = cells.get(&key) {
            let mut cell = cell_lock.write();
            if cell.is_field {
                cell.payload = Some(payload.to_vec());
            }
        }
        payload.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NullLogger;

    fn store() -> EventStore {
        EventStore::new(Arc::new(NullLogger))
    }

    fn ids() -> (ServiceId, InstanceId, EventId) {
        (ServiceId::new(0x1234), InstanceId::new(1), EventId::new(0x8001))
    }

    #[test]
    fn unregistered_event_never_forwards() {
        let store = store();
        let (s, i, e) = ids();
        let outcome = store.set_payload(s, i, e, vec![1, 2, 3], Instant::now(), false);
        assert!(!outcome.forwarded);
    }

    #[test]
    fn plain_event_forwards_every_distinct_value_with_no_filter() {
        let store = store();
        let (s, i, e) = ids();
        store.register_event(s, i, e, unfiltered(), false, false);

        let now = Instant::now();
        let first = store.set_payload(s, i, e, vec![1], now, false);
        assert!(first.forwarded);
        let second = store.set_payload(s, i, e, vec![1], now, false);
        assert!(second.forwarded, "unfiltered forwards even unchanged values");
    }

    #[test]
    fn field_retains_payload_even_when_suppressed() {
        let store = store();
        let (s, i, e) = ids();
        let filter = DebounceFilter {
            on_change: true,
            on_change_resets_interval: false,
            interval_ms: None,
            ignore: Default::default(),
            send_current_value_after: false,
        };
        store.register_event(s, i, e, filter, true, false);

        let now = Instant::now();
        store.set_payload(s, i, e, vec![9, 9], now, false);
        let suppressed = store.set_payload(s, i, e, vec![9, 9], now, false);
        assert!(!suppressed.forwarded);
        assert_eq!(store.current_payload(s, i, e), Some(vec![9, 9]));
    }

    #[test]
    fn clear_payload_resets_field_cache() {
        let store = store();
        let (s, i, e) = ids();
        store.register_event(s, i, e, unfiltered(), true, false);
        store.set_payload(s, i, e, vec![5], Instant::now(), false);
        assert_eq!(store.current_payload(s, i, e), Some(vec![5]));

        store.clear_payload(s, i, e);
        assert_eq!(store.current_payload(s, i, e), None);
    }

    #[test]
    fn reregistering_plain_event_clears_cache_but_field_keeps_it() {
        let store = store();
        let (s, i, e) = ids();
        store.register_event(s, i, e, unfiltered(), true, false);
        store.set_payload(s, i, e, vec![7], Instant::now(), false);

        store.register_event(s, i, e, unfiltered(), true, false);
        assert_eq!(store.current_payload(s, i, e), Some(vec![7]), "field cache survives re-registration");

        store.register_event(s, i, e, unfiltered(), false, false);
        assert_eq!(store.current_payload(s, i, e), None, "downgrading to a plain event clears the cache");
    }
}
