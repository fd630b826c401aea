//! The read-only configuration surface this core consumes.
//!
//! `Config` deliberately has no notion of layering, hot reload, or file
//! syntax — those are the configuration-*file* parser's job, which lives
//! outside this crate. A host application backs this trait with whatever
//! parser it uses and hands the core a `&dyn Config`.

use std::collections::BTreeMap;

use crate::ids::{EventId, EventgroupId, InstanceId, ServiceId};
use crate::observability::LogSeverity;
use crate::registry::Reliability;

/// Per-(service, instance, event) debounce configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebounceConfig {
    pub on_change: bool,
    pub on_change_resets_interval: bool,
    /// `None` means "never interval-forward", standing in for the `-1` sentinel
    /// used on the wire/config-file side.
    pub interval_ms: Option<u64>,
    /// Byte index -> mask of bits to ignore when comparing old vs. new payload.
    pub ignore: BTreeMap<usize, u8>,
    pub send_current_value_after: bool,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            on_change: false,
            on_change_resets_interval: false,
            interval_ms: None,
            ignore: BTreeMap::new(),
            send_current_value_after: false,
        }
    }
}

/// Per-event static configuration.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EventConfig {
    pub cycle_ms: Option<u64>,
    pub change_resets_cycle: bool,
    pub update_on_change: bool,
    pub reliability: Option<Reliability>,
}

/// Security-related configuration switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecurityConfig {
    pub enabled: bool,
    pub external: bool,
    pub audit: bool,
    pub allow_remote: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            external: false,
            audit: false,
            allow_remote: true,
        }
    }
}

/// Read-only configuration view consumed by the core.
pub trait Config: Send + Sync {
    fn diagnosis_address(&self) -> u8;
    fn diagnosis_mask(&self) -> u16 {
        0xFF00
    }

    fn max_dispatchers(&self) -> usize;
    fn max_dispatch_time_ms(&self) -> u64;
    fn thread_count(&self) -> usize {
        1
    }

    fn request_debounce_time_ms(&self) -> u64 {
        10
    }
    fn has_session_handling(&self) -> bool {
        true
    }
    fn shutdown_timeout_ms(&self) -> u64 {
        5_000
    }

    fn event_config(&self, service: ServiceId, instance: InstanceId, event: EventId) -> EventConfig {
        let _ = (service, instance, event);
        EventConfig::default()
    }

    fn debounce_config(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
    ) -> Option<DebounceConfig> {
        let _ = (service, instance, event);
        None
    }

    fn security(&self) -> SecurityConfig {
        SecurityConfig::default()
    }

    fn suppress_missing_event_log(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
    ) -> bool {
        let _ = (service, instance, event);
        false
    }

    /// (NEW, ambient) severity floor for this core's own diagnostics.
    fn log_level(&self) -> LogSeverity {
        LogSeverity::Info
    }

    /// (NEW, ambient) bound on the registry's offer-history ring.
    fn offer_history_capacity(&self) -> usize {
        64
    }

    /// (NEW, ambient) how often the `send_current_value_after` ticker
    /// checks for subscriptions due a forced resend.
    fn send_current_value_poll_ms(&self) -> u64 {
        50
    }

    /// Reserved client ids, e.g. other applications sharing this network
    /// that must not be handed out by the `IdAllocator`.
    fn reserved_client_ids(&self) -> &[u16] {
        &[]
    }

    fn eventgroup_members(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
    ) -> Vec<EventId> {
        let _ = (service, instance, eventgroup);
        Vec::new()
    }
}

/// A minimal, fully in-memory `Config` for tests and simple embeddings.
#[derive(Clone, Debug)]
pub struct StaticConfig {
    pub diagnosis_address: u8,
    pub diagnosis_mask: u16,
    pub max_dispatchers: usize,
    pub max_dispatch_time_ms: u64,
    pub security: SecurityConfig,
    pub reserved_client_ids: Vec<u16>,
    pub debounce: BTreeMap<(u16, u16, u16), DebounceConfig>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            diagnosis_address: 0x10,
            diagnosis_mask: 0xFF00,
            max_dispatchers: 4,
            max_dispatch_time_ms: 100,
            security: SecurityConfig::default(),
            reserved_client_ids: Vec::new(),
            debounce: BTreeMap::new(),
        }
    }
}

impl Config for StaticConfig {
    fn diagnosis_address(&self) -> u8 {
        self.diagnosis_address
    }

    fn diagnosis_mask(&self) -> u16 {
        self.diagnosis_mask
    }

    fn max_dispatchers(&self) -> usize {
        self.max_dispatchers
    }

    fn max_dispatch_time_ms(&self) -> u64 {
        self.max_dispatch_time_ms
    }

    fn security(&self) -> SecurityConfig {
        self.security
    }

    fn reserved_client_ids(&self) -> &[u16] {
        &self.reserved_client_ids
    }

    fn debounce_config(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
    ) -> Option<DebounceConfig> {
        self.debounce
            .get(&(service.get(), instance.get(), event.get()))
            .cloned()
    }
}
