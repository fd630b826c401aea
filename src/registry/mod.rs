//! `Registry`: the authoritative map of services → instances →
//! (events, eventgroups). Readers never block each other — a
//! `parking_lot::RwLock` per (service, instance) slot, behind an outer
//! `RwLock` over the slot map itself, mirrors the "single reader-writer
//! lock per map with fine-grained sublocks per service" guidance.
//!
//! This is the first lock in the crate's fixed global order (`Registry <
//! EventStore < SubscriptionEngine < Dispatcher`): nothing here ever
//! calls into the other three components while holding a registry lock.

mod event;
mod service;

pub use event::{EventKind, EventMeta, EventgroupInfo, Reliability};
pub use service::ServiceInfo;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CoreError, Result};
use crate::ids::{ClientId, EventId, EventgroupId, InstanceId, MajorVersion, MinorVersion, ServiceId, Ttl};
use crate::observability::{LogField, Logger};

/// Availability of a (service, instance) as reported by [`Registry::is_available`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

struct ServiceSlot {
    info: ServiceInfo,
    /// Reference count of `request_service` callers, keyed by client so
    /// `release` is idempotent per client.
    requesters: HashMap<u16, u32>,
    events: HashMap<u16, EventMeta>,
    eventgroups: HashMap<u16, EventgroupInfo>,
}

impl ServiceSlot {
    fn new(info: ServiceInfo) -> Self {
        Self {
            info,
            requesters: HashMap::new(),
            events: HashMap::new(),
            eventgroups: HashMap::new(),
        }
    }

    fn has_references(&self) -> bool {
        !self.requesters.is_empty() || !self.events.is_empty() || self.info.provider.is_some()
    }
}

/// A single entry in the bounded offer-history ring:
/// lets `stop_offer` followed by a late response from the former provider
/// still be accepted while security is in audit mode.
#[derive(Clone, Copy, Debug)]
struct OfferHistoryEntry {
    service: u16,
    instance: u16,
    former_provider: u16,
}

pub struct Registry {
    slots: RwLock<HashMap<(u16, u16), RwLock<ServiceSlot>>>,
    offer_history: RwLock<VecDeque<OfferHistoryEntry>>,
    offer_history_capacity: usize,
    logger: Arc<dyn Logger>,
}

impl Registry {
    pub fn new(offer_history_capacity: usize, logger: Arc<dyn Logger>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            offer_history: RwLock::new(VecDeque::with_capacity(offer_history_capacity)),
            offer_history_capacity,
            logger,
        }
    }

    fn key(service: ServiceId, instance: InstanceId) -> (u16, u16) {
        (service.get(), instance.get())
    }

    /// `offer(client, s, i, major, minor)`.
    pub fn offer(
        &self,
        client: ClientId,
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
        minor: MinorVersion,
    ) -> Result<()> {
        let key = Self::key(service, instance);
        // Fast path: slot already exists, only the slot's own lock is needed.
        {
            let slots = self.slots.read();
            if let Some(slot_lock) = slots.get(&key) {
                let mut slot = slot_lock.write();
                if let Some(provider) = slot.info.provider {
                    if provider == client {
                        slot.info.ttl = Ttl::DEFAULT;
                        return Ok(());
                    }
                    return Err(CoreError::AlreadyOffered {
                        service: service.get(),
                        instance: instance.get(),
                    });
                }
                if slot.info.major != major || slot.info.minor != minor {
                    return Err(CoreError::VersionMismatch {
                        service: service.get(),
                        instance: instance.get(),
                        requested_major: major.0,
                        requested_minor: minor.0,
                        actual_major: slot.info.major.0,
                        actual_minor: slot.info.minor.0,
                    });
                }
                slot.info.provider = Some(client);
                slot.info.is_local = true;
                return Ok(());
            }
        }

        // Slow path: create the slot under the write lock.
        let mut slots = self.slots.write();
        let slot = slots
            .entry(key)
            .or_insert_with(|| RwLock::new(ServiceSlot::new(ServiceInfo::new(service, instance, major, minor))));
        let mut slot = slot.write();
        if let Some(provider) = slot.info.provider {
            if provider != client {
                return Err(CoreError::AlreadyOffered {
                    service: service.get(),
                    instance: instance.get(),
                });
            }
        } else {
            slot.info.provider = Some(client);
            slot.info.is_local = true;
        }
        self.logger.info(
            "registry",
            "service offered",
            &[
                LogField::new("service", service),
                LogField::new("instance", instance),
                LogField::new("client", client),
            ],
        );
        Ok(())
    }

    /// `stop_offer(client, s, i)`.
    pub fn stop_offer(&self, client: ClientId, service: ServiceId, instance: InstanceId) -> Result<()> {
        let key = Self::key(service, instance);
        let slots = self.slots.read();
        let Some(slot_lock) = slots.get(&key) else {
            return Err(CoreError::ServiceUnknown {
                service: service.get(),
                instance: instance.get(),
            });
        };
        let should_remove = {
            let mut slot = slot_lock.write();
            if slot.info.provider != Some(client) {
                return Err(CoreError::InvalidArgument {
                    message: format!(
                        "client {client} is not the provider of {service:#06x}.{instance:#06x}"
                    ),
                });
            }
            slot.info.provider = None;
            for meta in slot.events.values_mut() {
                meta.clear_payload();
            }
            self.push_offer_history(service, instance, client);
            !slot.has_references()
        };
        drop(slots);
        if should_remove {
            self.slots.write().remove(&key);
        }
        Ok(())
    }

    fn push_offer_history(&self, service: ServiceId, instance: InstanceId, former_provider: ClientId) {
        let mut history = self.offer_history.write();
        if history.len() == self.offer_history_capacity {
            history.pop_front();
        }
        history.push_back(OfferHistoryEntry {
            service: service.get(),
            instance: instance.get(),
            former_provider: former_provider.get(),
        });
    }

    /// True if an audit-mode caller should still accept a late response
    /// from `former_provider` for `(service, instance)`.
    pub fn is_audit_accepted(&self, service: ServiceId, instance: InstanceId, former_provider: ClientId) -> bool {
        self.offer_history.read().iter().any(|entry| {
            entry.service == service.get()
                && entry.instance == instance.get()
                && entry.former_provider == former_provider.get()
        })
    }

    /// `request(client, s, i, major, minor)`.
    pub fn request(
        &self,
        client: ClientId,
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
        minor: MinorVersion,
    ) -> Result<()> {
        let key = Self::key(service, instance);
        let mut slots = self.slots.write();
        let slot_lock = slots
            .entry(key)
            .or_insert_with(|| RwLock::new(ServiceSlot::new(ServiceInfo::new(service, instance, major, minor))));
        let mut slot = slot_lock.write();

        if slot.info.provider.is_some() {
            let major_ok = major.is_any() || major == slot.info.major;
            let minor_ok = minor.is_any() || minor.0 <= slot.info.minor.0;
            if !major_ok || !minor_ok {
                return Err(CoreError::VersionMismatch {
                    service: service.get(),
                    instance: instance.get(),
                    requested_major: major.0,
                    requested_minor: minor.0,
                    actual_major: slot.info.major.0,
                    actual_minor: slot.info.minor.0,
                });
            }
        }
        *slot.requesters.entry(client.get()).or_insert(0) += 1;
        Ok(())
    }

    /// `release(client, s, i)`. Also trims `client`'s own offer-history
    /// entries for `(service, instance)`: a client that once offered this
    /// service and is now releasing it should not have late, audit-mode-
    /// accepted responses from that stale tenure outlive the release.
    pub fn release(&self, client: ClientId, service: ServiceId, instance: InstanceId) -> Result<()> {
        let key = Self::key(service, instance);
        let slots = self.slots.read();
        let Some(slot_lock) = slots.get(&key) else {
            return Err(CoreError::ServiceUnknown {
                service: service.get(),
                instance: instance.get(),
            });
        };
        let should_remove = {
            let mut slot = slot_lock.write();
            if let Some(count) = slot.requesters.get_mut(&client.get()) {
                *count -= 1;
                if *count == 0 {
                    slot.requesters.remove(&client.get());
                }
            }
            !slot.has_references()
        };
        drop(slots);
        if should_remove {
            self.slots.write().remove(&key);
        }
        self.trim_offer_history(service, instance, client);
        Ok(())
    }

    /// Drops `former_provider`'s offer-history entries for `(service,
    /// instance)`, revoking any audit-mode late-response acceptance that
    /// tenure would otherwise still grant.
    fn trim_offer_history(&self, service: ServiceId, instance: InstanceId, former_provider: ClientId) {
        self.offer_history.write().retain(|entry| {
            !(entry.service == service.get() && entry.instance == instance.get() && entry.former_provider == former_provider.get())
        });
    }

    /// `is_available(s, i, major, minor)`.
    pub fn is_available(
        &self,
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
        minor: MinorVersion,
    ) -> Availability {
        let slots = self.slots.read();
        let Some(slot_lock) = slots.get(&Self::key(service, instance)) else {
            return Availability::Unavailable;
        };
        let slot = slot_lock.read();
        if slot.info.provider.is_none() {
            return Availability::Unavailable;
        }
        let major_ok = major.is_any() || major == slot.info.major;
        let minor_ok = minor.is_any() || minor.0 <= slot.info.minor.0;
        if major_ok && minor_ok {
            Availability::Available
        } else {
            Availability::Unavailable
        }
    }

    pub fn find_service(&self, service: ServiceId, instance: InstanceId) -> Option<ServiceInfo> {
        let slots = self.slots.read();
        slots.get(&Self::key(service, instance)).map(|s| s.read().info.clone())
    }

    /// Creates or upgrades-from-placeholder the event metadata and its
    /// eventgroup memberships. Returns whether an existing placeholder was
    /// promoted in place; any subscriptions naming this event already
    /// resolve through it, so there is nothing further to move.
    #[allow(clippy::too_many_arguments)]
    pub fn register_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        eventgroups: &[EventgroupId],
        kind: EventKind,
        reliability: Reliability,
        cycle_ms: Option<u64>,
        change_resets_cycle: bool,
        update_on_change: bool,
        is_provided: bool,
    ) -> Result<bool> {
        let key = Self::key(service, instance);
        let mut slots = self.slots.write();
        let slot_lock = slots.entry(key).or_insert_with(|| {
            RwLock::new(ServiceSlot::new(ServiceInfo::new(
                service,
                instance,
                MajorVersion::ANY,
                MinorVersion::ANY,
            )))
        });
        let mut slot = slot_lock.write();
        let slot = &mut *slot;

        let was_placeholder = slot
            .events
            .get(&event.get())
            .map(|meta| meta.is_cache_placeholder)
            .unwrap_or(false);

        let entry = slot.events.entry(event.get()).or_insert_with(|| EventMeta::placeholder());
        entry.promote(kind, reliability, cycle_ms, change_resets_cycle, update_on_change);
        if is_provided {
            entry.is_shadow = false;
        }
        for group in eventgroups {
            entry.eventgroups.insert(group.get());
            slot.eventgroups
                .entry(group.get())
                .or_insert_with(EventgroupInfo::new)
                .events
                .insert(event.get());
        }
        Ok(was_placeholder)
    }

    /// Ensures a placeholder event exists for `event` as a member of
    /// `eventgroup`, without disturbing an already-registered event.
    /// Used by the subscription engine when a client subscribes to a
    /// specific event that hasn't been registered by a provider yet.
    pub fn ensure_placeholder(&self, service: ServiceId, instance: InstanceId, event: EventId, eventgroup: EventgroupId) {
        let key = Self::key(service, instance);
        let mut slots = self.slots.write();
        let slot_lock = slots.entry(key).or_insert_with(|| {
            RwLock::new(ServiceSlot::new(ServiceInfo::new(
                service,
                instance,
                MajorVersion::ANY,
                MinorVersion::ANY,
            )))
        });
        let mut slot = slot_lock.write();
        let entry = slot.events.entry(event.get()).or_insert_with(EventMeta::placeholder);
        entry.eventgroups.insert(eventgroup.get());
        slot.eventgroups
            .entry(eventgroup.get())
            .or_insert_with(EventgroupInfo::new)
            .events
            .insert(event.get());
    }

    /// All event ids currently registered for (service, instance),
    /// including placeholders. Used by `stop_offer` callers that need to
    /// clear every event's payload cell before the slot itself is dropped.
    pub fn event_ids(&self, service: ServiceId, instance: InstanceId) -> Vec<EventId> {
        let slots = self.slots.read();
        slots
            .get(&Self::key(service, instance))
            .map(|s| s.read().events.keys().copied().map(EventId::new).collect())
            .unwrap_or_default()
    }

    pub fn find_event(&self, service: ServiceId, instance: InstanceId, event: EventId) -> Option<EventMeta> {
        let slots = self.slots.read();
        slots
            .get(&Self::key(service, instance))
            .and_then(|s| s.read().events.get(&event.get()).cloned())
    }

    pub fn find_eventgroup(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
    ) -> Option<EventgroupInfo> {
        let slots = self.slots.read();
        slots
            .get(&Self::key(service, instance))
            .and_then(|s| s.read().eventgroups.get(&eventgroup.get()).cloned())
    }

    /// All event ids currently registered as members of `eventgroup`,
    /// including placeholders.
    pub fn eventgroup_members(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
    ) -> Vec<EventId> {
        self.find_eventgroup(service, instance, eventgroup)
            .map(|g| g.events.into_iter().map(EventId::new).collect())
            .unwrap_or_default()
    }
}
