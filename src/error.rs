//! The error taxonomy surfaced to callers of [`crate::facade::CoreFacade`]
//! and the components underneath it.
//!
//! `CoreError` is a flat, non-generic enum: every variant here is a terminal
//! condition a caller is expected to `match` on, not a wrapper over an
//! arbitrary cause chain. Conditions that are merely logged and swallowed
//! (serialization failures, transient ack loss) never reach this type —
//! they go through [`crate::observability::Logger`] instead.

use core::fmt;

/// The stable error taxonomy delivered to API callers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `offer_service` for an (service, instance) that already has a live
    /// provider with a different version, or a different provider entirely
    /// while the existing one is still offering.
    #[error("service {service:#06x}.{instance:#06x} is already offered by another provider")]
    AlreadyOffered { service: u16, instance: u16 },

    /// An `offer`/`request` version did not satisfy the wildcard rules.
    #[error(
        "version mismatch for service {service:#06x}.{instance:#06x}: requested {requested_major}.{requested_minor}, have {actual_major}.{actual_minor}"
    )]
    VersionMismatch {
        service: u16,
        instance: u16,
        requested_major: u8,
        requested_minor: u32,
        actual_major: u8,
        actual_minor: u32,
    },

    /// Lookup of a (service, instance) that the registry has never heard of.
    #[error("service {service:#06x}.{instance:#06x} is unknown")]
    ServiceUnknown { service: u16, instance: u16 },

    /// Lookup of an event the event store has never heard of (and no
    /// placeholder was requested).
    #[error("event {service:#06x}.{instance:#06x}.{event:#06x} is unknown")]
    EventUnknown { service: u16, instance: u16, event: u16 },

    /// A subscription exists but is still waiting on an acknowledgement.
    #[error(
        "subscription {service:#06x}.{instance:#06x}.{eventgroup:#06x} for client {client:#06x} is still pending"
    )]
    SubscriptionPending {
        service: u16,
        instance: u16,
        eventgroup: u16,
        client: u16,
    },

    /// The remote side (or local security policy) rejected a subscription.
    #[error(
        "subscription {service:#06x}.{instance:#06x}.{eventgroup:#06x} for client {client:#06x} was rejected"
    )]
    SubscriptionRejected {
        service: u16,
        instance: u16,
        eventgroup: u16,
        client: u16,
    },

    /// `SecurityPolicy::authorize_*` returned a denial outside audit mode.
    #[error("operation not authorized for client {client:#06x}")]
    NotAuthorized { client: u16 },

    /// The `IdAllocator`'s diagnosis-address range has no free ids left.
    #[error("client id pool exhausted")]
    PoolExhausted,

    /// The `EndpointRouter` reported a transport-level failure.
    #[error("endpoint I/O error: {message}")]
    IoError { message: String },

    /// A caller passed an out-of-range or otherwise malformed argument.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl CoreError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        CoreError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        CoreError::IoError {
            message: message.into(),
        }
    }

    /// A short, stable machine-readable code for this variant, suitable for
    /// metrics labels and log fields (`component.operation` convention).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::AlreadyOffered { .. } => "registry.already_offered",
            CoreError::VersionMismatch { .. } => "registry.version_mismatch",
            CoreError::ServiceUnknown { .. } => "registry.service_unknown",
            CoreError::EventUnknown { .. } => "event_store.event_unknown",
            CoreError::SubscriptionPending { .. } => "subscription.pending",
            CoreError::SubscriptionRejected { .. } => "subscription.rejected",
            CoreError::NotAuthorized { .. } => "security.not_authorized",
            CoreError::PoolExhausted => "id_allocator.pool_exhausted",
            CoreError::IoError { .. } => "endpoint.io_error",
            CoreError::InvalidArgument { .. } => "facade.invalid_argument",
        }
    }
}

/// Result alias used throughout the crate's public API.
pub type Result<T> = core::result::Result<T, CoreError>;

/// The verdict of a `SecurityPolicy` authorization check; kept separate from
/// `CoreError` since audit mode turns a `Denied` into a logged warning
/// rather than a hard failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Granted,
    Denied,
}

impl Verdict {
    pub fn is_granted(self) -> bool {
        matches!(self, Verdict::Granted)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Granted => f.write_str("granted"),
            Verdict::Denied => f.write_str("denied"),
        }
    }
}
