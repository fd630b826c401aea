//! `SubscriptionEngine`: who is listening to which eventgroup, and
//! whether their subscription has been acknowledged yet.
//!
//! A subscription naming a specific event rather than the whole group is
//! keyed the same way whether or not that event is registered yet — there
//! is no separate "placeholder subscription" storage to migrate out of.
//! Registering the event later (via [`crate::registry::Registry::register_event`])
//! only changes what [`Registry::find_event`] reports; the subscription
//! record itself never moves, so "placeholder promotion" preserves the
//! subscriber set by construction rather than by an explicit transfer step.
//! Locking order: this component sits above `Registry` and `EventStore`
//! (`Registry < EventStore < SubscriptionEngine < Dispatcher`) and may
//! call into either while holding none of its own locks, but never the
//! reverse.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::event_store::DebounceFilter;
use crate::ids::{ClientId, EventId, EventgroupId, InstanceId, MajorVersion, ServiceId};
use crate::observability::{LogField, Logger};
use crate::registry::Registry;

/// Acknowledgment state of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckState {
    Subscribing,
    Acknowledged,
    NotAcknowledged,
}

/// A single subscriber's interest in one (service, instance, eventgroup).
/// `event = None` subscribes to every event in the group; `event = Some(e)`
/// targets only `e` (a selective-event subscription).
#[derive(Clone, Debug)]
pub struct Subscription {
    pub client: ClientId,
    pub eventgroup: EventgroupId,
    pub event: Option<EventId>,
    pub major: MajorVersion,
    pub state: AckState,
    /// The debounce filter for `event`, only carried when this subscription
    /// targets a specific event (a whole-group subscription has no single
    /// event to time against).
    filter: Option<DebounceFilter>,
    /// Set whenever a forwarded publication lands for this subscription's
    /// event since the last send-current-value-after delivery.
    pending_update: bool,
    last_delivered: Option<Instant>,
    /// A notification that arrived while this subscriber was still
    /// `Subscribing`, held until [`SubscriptionEngine::on_subscription_ack`]
    /// accepts it.
    pending_notification: Option<(EventId, Vec<u8>)>,
}

type GroupKey = (u16, u16, u16);
type MemberKey = (u16, Option<u16>);

/// One subscriber due a `send_current_value_after` resend, as reported by
/// [`SubscriptionEngine::due_send_current_value_after`].
#[derive(Clone, Copy, Debug)]
pub struct DueSendCurrentValue {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub event: EventId,
    pub client: ClientId,
    /// Whether a fresh publication landed for this event since the last
    /// delivery — callers may use this to distinguish a genuine resend of
    /// new data from a pure heartbeat of an unchanged value.
    pub had_pending_update: bool,
}

pub struct SubscriptionEngine {
    groups: RwLock<HashMap<GroupKey, RwLock<HashMap<MemberKey, Subscription>>>>,
    logger: Arc<dyn Logger>,
}

impl SubscriptionEngine {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            logger,
        }
    }

    fn group_key(service: ServiceId, instance: InstanceId, eventgroup: EventgroupId) -> GroupKey {
        (service.get(), instance.get(), eventgroup.get())
    }

    /// `subscribe(client, s, i, g, major, event, filter)`. If `event` names
    /// an event the registry doesn't know about yet, a placeholder is
    /// created so it is visible to `find_event` until a provider registers
    /// it. `filter` carries the event's debounce configuration so a
    /// `send_current_value_after` timer can run for this subscription; pass
    /// `None` for a whole-group subscription or an event with no debounce
    /// configuration. Returns `true` if this is a new subscription, `false`
    /// if it updates an existing one (e.g. a resubscribe).
    pub fn subscribe(
        &self,
        registry: &Registry,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        client: ClientId,
        major: MajorVersion,
        event: Option<EventId>,
        filter: Option<DebounceFilter>,
    ) -> bool {
        if let Some(event) = event {
            if registry.find_event(service, instance, event).is_none() {
                registry.ensure_placeholder(service, instance, event, eventgroup);
            }
        }

        let key = Self::group_key(service, instance, eventgroup);
        {
            let mut groups = self.groups.write();
            groups.entry(key).or_insert_with(|| RwLock::new(HashMap::new()));
        }
        let groups = self.groups.read();
        let bucket = groups.get(&key).expect("bucket inserted above");
        let member = (client.get(), event.map(EventId::get));
        let mut members = bucket.write();
        let is_new = !members.contains_key(&member);
        members.insert(
            member,
            Subscription {
                client,
                eventgroup,
                event,
                major,
                state: AckState::Subscribing,
                filter,
                pending_update: false,
                last_delivered: None,
                pending_notification: None,
            },
        );
        self.logger.debug(
            "subscription",
            "subscribe",
            &[
                LogField::new("service", service),
                LogField::new("instance", instance),
                LogField::new("eventgroup", eventgroup),
                LogField::new("client", client),
            ],
        );
        is_new
    }

    /// `unsubscribe(client, s, i, g, event)`. `event = None` removes
    /// every record this client holds in the group, selective or not.
    pub fn unsubscribe(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        client: ClientId,
        event: Option<EventId>,
    ) {
        let key = Self::group_key(service, instance, eventgroup);
        let groups = self.groups.read();
        let Some(bucket) = groups.get(&key) else {
            return;
        };
        let mut members = bucket.write();
        match event {
            Some(event) => {
                members.remove(&(client.get(), Some(event.get())));
            }
            None => {
                members.retain(|(c, _), _| *c != client.get());
            }
        }
    }

    /// `on_subscription_ack(client, s, i, g, event, accepted)`. Returns the
    /// notifications that arrived while this subscriber was still
    /// `Subscribing` and are now released by acceptance, as
    /// `(client, event, payload)` ready for delivery. A rejection
    /// (`accepted = false`) drops any cached notification instead of
    /// flushing it.
    pub fn on_subscription_ack(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        client: ClientId,
        event: Option<EventId>,
        accepted: bool,
    ) -> Vec<(ClientId, EventId, Vec<u8>)> {
        let key = Self::group_key(service, instance, eventgroup);
        let groups = self.groups.read();
        let Some(bucket) = groups.get(&key) else {
            return Vec::new();
        };
        let state = if accepted {
            AckState::Acknowledged
        } else {
            AckState::NotAcknowledged
        };
        let mut flushed = Vec::new();
        let mut members = bucket.write();
        for (member_key, subscription) in members.iter_mut() {
            let matches = match event {
                Some(event) => member_key.1 == Some(event.get()) || member_key.1.is_none(),
                None => true,
            };
            if member_key.0 == client.get() && matches {
                subscription.state = state;
                if let Some((event, payload)) = subscription.pending_notification.take() {
                    if accepted {
                        flushed.push((subscription.client, event, payload));
                    }
                }
            }
        }
        flushed
    }

    /// Caches `payload` for delivery once the subscriber acknowledges, if
    /// `client` has a `Subscribing` record for (service, instance) that
    /// covers `event`. Returns `true` if the notification was cached (and
    /// so should not also be delivered immediately).
    pub fn cache_if_subscribing(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        client: ClientId,
        payload: &[u8],
    ) -> bool {
        let groups = self.groups.read();
        let mut cached = false;
        for (&(s, i, _group), bucket) in groups.iter() {
            if s != service.get() || i != instance.get() {
                continue;
            }
            let mut members = bucket.write();
            for (member_key, subscription) in members.iter_mut() {
                if member_key.0 != client.get() {
                    continue;
                }
                let targets = member_key.1.is_none() || member_key.1 == Some(event.get());
                if targets && subscription.state == AckState::Subscribing {
                    subscription.pending_notification = Some((event, payload.to_vec()));
                    cached = true;
                }
            }
        }
        cached
    }

    /// Marks every subscription covering `event` as having a fresh
    /// publication since its last `send_current_value_after` delivery.
    pub fn record_update(&self, service: ServiceId, instance: InstanceId, event: EventId) {
        let groups = self.groups.read();
        for (&(s, i, _group), bucket) in groups.iter() {
            if s != service.get() || i != instance.get() {
                continue;
            }
            let mut members = bucket.write();
            for (member_key, subscription) in members.iter_mut() {
                let targets = member_key.1.is_none() || member_key.1 == Some(event.get());
                if targets {
                    subscription.pending_update = true;
                }
            }
        }
    }

    /// Subscriptions whose `send_current_value_after` interval has elapsed
    /// since their last delivery (or which have never been delivered to),
    /// due for a forced resend of the event's current cached value even
    /// though no fresh publication may have arrived. Advances each
    /// returned subscription's `last_delivered` stamp to `now` as a side
    /// effect, the way a real timer firing consumes its own deadline.
    pub fn due_send_current_value_after(&self, now: Instant) -> Vec<DueSendCurrentValue> {
        let mut due = Vec::new();
        let groups = self.groups.read();
        for (&(service, instance, _group), bucket) in groups.iter() {
            let mut members = bucket.write();
            for subscription in members.values_mut() {
                let Some(filter) = &subscription.filter else {
                    continue;
                };
                if !filter.send_current_value_after {
                    continue;
                }
                let Some(interval_ms) = filter.interval_ms else {
                    continue;
                };
                let Some(event) = subscription.event else {
                    continue;
                };
                let interval = Duration::from_millis(interval_ms);
                let elapsed = subscription
                    .last_delivered
                    .map(|last| now.duration_since(last) >= interval)
                    .unwrap_or(true);
                if elapsed {
                    due.push(DueSendCurrentValue {
                        service: ServiceId::new(service),
                        instance: InstanceId::new(instance),
                        event,
                        client: subscription.client,
                        had_pending_update: subscription.pending_update,
                    });
                    subscription.last_delivered = Some(now);
                    subscription.pending_update = false;
                }
            }
        }
        due
    }

    /// Removes every subscription held by `client` across every (service,
    /// instance, eventgroup) — used when a client disconnects.
    pub fn remove_subscriptions_for_client(&self, client: ClientId) {
        let groups = self.groups.read();
        for bucket in groups.values() {
            bucket.write().retain(|(c, _), _| *c != client.get());
        }
    }

    /// Clears every subscriber record for every eventgroup of (service,
    /// instance) — used by `stop_offer` so a subsequent `offer` of the
    /// same (service, instance) starts with an empty subscriber set.
    pub fn clear_subscriptions_for_service_instance(&self, service: ServiceId, instance: InstanceId) {
        let groups = self.groups.read();
        for (&(s, i, _group), bucket) in groups.iter() {
            if s == service.get() && i == instance.get() {
                bucket.write().clear();
            }
        }
    }

    /// Resolves the set of clients that should receive a publication of
    /// `event`, by walking the eventgroups `event` belongs to (per the
    /// registry) and collecting subscribers whose subscription covers it.
    /// A `NotAcknowledged` subscription is excluded; `Subscribing` is
    /// included since local delivery does not wait on a wire-level ack.
    pub fn subscribers_for_event(
        &self,
        registry: &Registry,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
    ) -> HashSet<ClientId> {
        let Some(meta) = registry.find_event(service, instance, event) else {
            return HashSet::new();
        };
        let groups = self.groups.read();
        let mut result = HashSet::new();
        for group_id in meta.eventgroups {
            let key = (service.get(), instance.get(), group_id);
            let Some(bucket) = groups.get(&key) else {
                continue;
            };
            for (member_key, subscription) in bucket.read().iter() {
                let targets_event = member_key.1.is_none() || member_key.1 == Some(event.get());
                if targets_event && subscription.state != AckState::NotAcknowledged {
                    result.insert(subscription.client);
                }
            }
        }
        result
    }

    /// All subscribers of an eventgroup as a whole, irrespective of which
    /// specific event (if any) they targeted — used by `CoreFacade` to
    /// answer "who is in this group" queries.
    pub fn subscribers_for_group(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
    ) -> HashSet<ClientId> {
        let key = Self::group_key(service, instance, eventgroup);
        let groups = self.groups.read();
        let Some(bucket) = groups.get(&key) else {
            return HashSet::new();
        };
        let result = bucket
            .read()
            .values()
            .filter(|subscription| subscription.state != AckState::NotAcknowledged)
            .map(|subscription| subscription.client)
            .collect();
        result
    }
}
