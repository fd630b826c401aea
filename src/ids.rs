//! Fixed-width identifier newtypes shared across the registry, event store,
//! subscription engine and dispatcher.
//!
//! Every identifier in SOME/IP is a plain wire-sized unsigned integer; the
//! newtypes here exist so the registry and subscription APIs can't be
//! called with a `MethodId` where an `EventId` was meant. Each type carries
//! its sentinel ("any") value and a cheap `is_any` check rather than a
//! validation layer — there is nothing to parse or reject.

use core::fmt;

macro_rules! wire_id {
    ($name:ident, $repr:ty, $any:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $repr);

        impl $name {
            /// Sentinel value matching any instance of this id in wildcard lookups.
            pub const ANY: $name = $name($any);

            /// Construct from the raw wire representation.
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            /// Read back the raw wire representation.
            pub const fn get(self) -> $repr {
                self.0
            }

            /// True if this is the wildcard sentinel.
            pub const fn is_any(self) -> bool {
                self.0 == $any
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#06x}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }
    };
}

wire_id!(ServiceId, u16, 0xFFFF, "A typed SOME/IP service interface id.");
wire_id!(InstanceId, u16, 0xFFFF, "A typed instance id of a `ServiceId`.");
wire_id!(EventId, u16, 0xFFFF, "A typed event or field id.");
wire_id!(EventgroupId, u16, 0xFFFF, "A typed eventgroup id.");
wire_id!(MethodId, u16, 0xFFFF, "A typed method (RPC) id.");

/// A 16-bit client identifier allocated from a diagnosis-address-derived pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u16);

impl ClientId {
    /// Sentinel meaning "no client" / pool exhausted.
    pub const ILLEGAL: ClientId = ClientId(0);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub const fn is_illegal(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// A reserved client id standing in for "the remote side, reached through
/// the endpoint router" wherever a subscriber set needs to name a non-local
/// subscriber without tracking its real client id.
pub const ROUTING_CLIENT: ClientId = ClientId(0xFFFF);

/// Monotonically increasing per-application session id (skips 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u16);

impl SessionId {
    pub const ZERO: SessionId = SessionId(0);

    pub const fn get(self) -> u16 {
        self.0
    }

    /// The next session id in sequence, wrapping from `0xFFFF` to `1` so
    /// that `0` (meaning "session handling disabled") is never reused.
    pub fn next(self) -> SessionId {
        if self.0 == 0xFFFF {
            SessionId(1)
        } else {
            SessionId(self.0 + 1)
        }
    }
}

/// SOME/IP major interface version; `0xFF` matches any major version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MajorVersion(pub u8);

impl MajorVersion {
    pub const ANY: MajorVersion = MajorVersion(0xFF);

    pub const fn is_any(self) -> bool {
        self.0 == 0xFF
    }
}

/// SOME/IP minor interface version; `0xFFFF_FFFF` matches any minor version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinorVersion(pub u32);

impl MinorVersion {
    pub const ANY: MinorVersion = MinorVersion(0xFFFF_FFFF);

    pub const fn is_any(self) -> bool {
        self.0 == 0xFFFF_FFFF
    }
}

/// Service offer time-to-live, in seconds. `0` means "offered forever"
/// (no expiry driven by this crate; liveness is explicit via
/// `offer`/`stop_offer`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ttl(pub u32);

impl Ttl {
    pub const DEFAULT: Ttl = Ttl(0);
}

/// Checks whether `requested` satisfies `required`, honoring the `ANY`
/// wildcard on either side. Used for service/event/method lookups that
/// accept a wildcard query.
pub fn matches_wildcard<T: PartialEq + Copy>(requested: T, actual: T, any: T) -> bool
where
    T: PartialEq,
{
    requested == any || requested == actual
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_round_trip() {
        assert!(ServiceId::ANY.is_any());
        assert!(!ServiceId::new(0x1234).is_any());
        assert_eq!(ClientId::ILLEGAL.get(), 0);
    }

    #[test]
    fn session_id_wraps_skipping_zero() {
        let mut s = SessionId(0xFFFF);
        s = s.next();
        assert_eq!(s.get(), 1);
    }

    #[test]
    fn wildcard_match_helper() {
        assert!(matches_wildcard(ServiceId::ANY, ServiceId::new(7), ServiceId::ANY));
        assert!(matches_wildcard(ServiceId::new(7), ServiceId::new(7), ServiceId::ANY));
        assert!(!matches_wildcard(ServiceId::new(7), ServiceId::new(8), ServiceId::ANY));
    }
}
