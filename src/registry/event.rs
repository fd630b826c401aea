use std::collections::BTreeSet;

/// Reliability requirement for an event. Derivation order when a
/// caller passes `Unknown` is (1) explicit configuration, (2) caller-
/// supplied, (3) inherit from service reliability — the registry
/// stores whatever the caller resolved to; deriving the value itself is
/// `EventStore::register_event`'s job since it is the one with access to
/// `Config`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
    Both,
    Unknown,
}

/// An event's publish semantics. `Unknown` marks a placeholder created
/// for a not-yet-registered event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Event,
    Field,
    SelectiveEvent,
    Unknown,
}

impl EventKind {
    pub fn is_field(self) -> bool {
        matches!(self, EventKind::Field)
    }
}

/// `Event`: metadata the registry tracks for one (service, instance,
/// event). The payload cell itself lives in [`crate::event_store::EventStore`];
/// this struct only carries identity and static configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventMeta {
    pub kind: EventKind,
    pub reliability: Reliability,
    pub cycle_ms: Option<u64>,
    pub change_resets_cycle: bool,
    pub update_on_change: bool,
    pub is_cache_placeholder: bool,
    /// True until a provider has registered this event (vs. it only having
    /// been synthesized from a subscription or config).
    pub is_shadow: bool,
    pub eventgroups: BTreeSet<u16>,
}

impl EventMeta {
    /// A placeholder event created to hold a subscription for an event
    /// that has not yet been registered.
    pub fn placeholder() -> Self {
        Self {
            kind: EventKind::Unknown,
            reliability: Reliability::Unknown,
            cycle_ms: None,
            change_resets_cycle: false,
            update_on_change: false,
            is_cache_placeholder: true,
            is_shadow: true,
            eventgroups: BTreeSet::new(),
        }
    }

    /// Promotes a placeholder (or re-registers an existing event) in place,
    /// preserving its eventgroup memberships and, by construction (callers
    /// never touch the subscriber set kept in `EventStore`), its subscribers.
    pub fn promote(
        &mut self,
        kind: EventKind,
        reliability: Reliability,
        cycle_ms: Option<u64>,
        change_resets_cycle: bool,
        update_on_change: bool,
    ) {
        self.kind = kind;
        self.reliability = reliability;
        self.cycle_ms = cycle_ms;
        self.change_resets_cycle = change_resets_cycle;
        self.update_on_change = update_on_change;
        self.is_cache_placeholder = false;
    }

    pub fn clear_payload(&mut self) {
        // Payload itself lives in EventStore; stop_offer only needs to mark
        // this event as no longer backed by a live provider.
        self.is_shadow = true;
    }
}

/// `Eventgroup`: the set of events subscribed to as a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventgroupInfo {
    pub events: BTreeSet<u16>,
    pub multicast: Option<(String, u16)>,
    pub threshold: u8,
    pub max_remote_subscribers: Option<u32>,
}

impl EventgroupInfo {
    pub fn new() -> Self {
        Self {
            events: BTreeSet::new(),
            multicast: None,
            threshold: 0,
            max_remote_subscribers: None,
        }
    }
}

impl Default for EventgroupInfo {
    fn default() -> Self {
        Self::new()
    }
}
