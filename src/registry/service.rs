use crate::ids::{ClientId, InstanceId, MajorVersion, MinorVersion, ServiceId, Ttl};

/// `ServiceInfo`: identity and lifecycle attributes of a
/// (service, instance), independent of its events and eventgroups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub major: MajorVersion,
    pub minor: MinorVersion,
    pub ttl: Ttl,
    pub provider: Option<ClientId>,
    pub is_local: bool,
}

impl ServiceInfo {
    pub fn new(service: ServiceId, instance: InstanceId, major: MajorVersion, minor: MinorVersion) -> Self {
        Self {
            service,
            instance,
            major,
            minor,
            ttl: Ttl::DEFAULT,
            provider: None,
            is_local: false,
        }
    }

    /// Derives reliability for a port pair: both ports present is `Both`,
    /// only one present picks the matching variant, neither is `Unknown`.
    pub fn reliability_from_ports(reliable_port: Option<u16>, unreliable_port: Option<u16>) -> super::Reliability {
        match (reliable_port, unreliable_port) {
            (Some(_), Some(_)) => super::Reliability::Both,
            (Some(_), None) => super::Reliability::Reliable,
            (None, Some(_)) => super::Reliability::Unreliable,
            (None, None) => super::Reliability::Unknown,
        }
    }
}
