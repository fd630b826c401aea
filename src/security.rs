//! The `SecurityPolicy` collaborator: an opaque authorization
//! verdict the facade and subscription engine consult but never interpret
//! further. Security policy evaluation itself is out of scope.

use async_trait::async_trait;

use crate::error::Verdict;
use crate::ids::{EventgroupId, InstanceId, MethodId, ServiceId};

/// Identifies the caller for authorization purposes. Opaque to this crate
/// beyond being a lookup key; a host's `SecurityPolicy` implementation
/// decides what it actually carries (UID, process credentials, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SecurityClient(pub u32);

/// Authorization collaborator consumed by the registry, subscription engine
/// and facade. Async so a host can back it with a remote policy service
/// without blocking a dispatcher or I/O thread.
#[async_trait]
pub trait SecurityPolicy: Send + Sync {
    async fn authorize_offer(&self, client: SecurityClient, service: ServiceId, instance: InstanceId) -> Verdict;

    async fn authorize_request(&self, client: SecurityClient, service: ServiceId, instance: InstanceId) -> Verdict;

    async fn authorize_subscribe(
        &self,
        client: SecurityClient,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
    ) -> Verdict;

    async fn authorize_member(
        &self,
        client: SecurityClient,
        service: ServiceId,
        instance: InstanceId,
        method: MethodId,
    ) -> Verdict;
}

/// A policy that grants everything; the default for hosts that haven't
/// enabled security (`SecurityConfig::enabled == false`).
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl SecurityPolicy for AllowAll {
    async fn authorize_offer(&self, _client: SecurityClient, _service: ServiceId, _instance: InstanceId) -> Verdict {
        Verdict::Granted
    }

    async fn authorize_request(&self, _client: SecurityClient, _service: ServiceId, _instance: InstanceId) -> Verdict {
        Verdict::Granted
    }

    async fn authorize_subscribe(
        &self,
        _client: SecurityClient,
        _service: ServiceId,
        _instance: InstanceId,
        _eventgroup: EventgroupId,
    ) -> Verdict {
        Verdict::Granted
    }

    async fn authorize_member(
        &self,
        _client: SecurityClient,
        _service: ServiceId,
        _instance: InstanceId,
        _method: MethodId,
    ) -> Verdict {
        Verdict::Granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_grants_offer() {
        let policy = AllowAll;
        let verdict = futures::executor::block_on(policy.authorize_offer(
            SecurityClient(1),
            ServiceId::new(1),
            InstanceId::new(1),
        ));
        assert!(verdict.is_granted());
    }
}
