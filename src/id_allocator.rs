//! `IdAllocator`: issues and recycles 16-bit client identifiers drawn
//! from a diagnosis-address-derived range, and tracks the routing-host
//! role for the network the allocator instance represents.
//!
//! The lock-file/shared-memory persistence of the used-id set across
//! processes is modeled behind [`ClientIdStore`] rather than hard-wired to
//! a filesystem path, so a host can back it with whatever cross-process
//! mechanism fits its platform; [`InMemoryClientIdStore`] is the default
//! for a single-process network.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::ids::ClientId;
use crate::observability::{LogField, Logger};

/// Persisted set of in-use client ids for one network. A corrupted store is
/// treated as empty rather than fatal.
pub trait ClientIdStore: Send + Sync {
    fn contains(&self, id: ClientId) -> bool;
    fn insert(&self, id: ClientId);
    fn remove(&self, id: ClientId);
    fn clear(&self);
    /// True if this store has not yet recorded a routing host for the
    /// network (first attacher becomes routing host).
    fn claim_routing_host(&self) -> bool;
}

/// A `ClientIdStore` backed by an in-process `HashSet`, adequate when a
/// single process owns the whole network (the common case for embedding
/// this core directly rather than through a routing daemon).
#[derive(Default)]
pub struct InMemoryClientIdStore {
    used: Mutex<HashSet<u16>>,
    routing_host_claimed: Mutex<bool>,
}

impl ClientIdStore for InMemoryClientIdStore {
    fn contains(&self, id: ClientId) -> bool {
        self.used.lock().contains(&id.get())
    }

    fn insert(&self, id: ClientId) {
        self.used.lock().insert(id.get());
    }

    fn remove(&self, id: ClientId) {
        self.used.lock().remove(&id.get());
    }

    fn clear(&self) {
        self.used.lock().clear();
    }

    fn claim_routing_host(&self) -> bool {
        let mut claimed = self.routing_host_claimed.lock();
        if *claimed {
            false
        } else {
            *claimed = true;
            true
        }
    }
}

/// Result of a successful client-id allocation, noting whether this
/// attacher became the routing host for the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub client_id: ClientId,
    pub is_routing_host: bool,
}

/// Allocates client ids from a diagnosis-address-derived pool.
pub struct IdAllocator {
    store: Arc<dyn ClientIdStore>,
    logger: Arc<dyn Logger>,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn ClientIdStore>, logger: Arc<dyn Logger>) -> Self {
        Self { store, logger }
    }

    pub fn with_in_memory_store(logger: Arc<dyn Logger>) -> Self {
        Self::new(Arc::new(InMemoryClientIdStore::default()), logger)
    }

    fn base(config: &dyn Config) -> u16 {
        ((config.diagnosis_address() as u16) << 8) & config.diagnosis_mask()
    }

    fn span(config: &dyn Config) -> u16 {
        !config.diagnosis_mask()
    }

    fn routing_host_id(config: &dyn Config) -> ClientId {
        ClientId::new(Self::base(config) | 1)
    }

    fn is_reserved(config: &dyn Config, id: u16) -> bool {
        config.reserved_client_ids().contains(&id)
    }

    /// Allocates a client id for `app_name` (used only for diagnostics),
    /// honoring a non-zero `requested` id when it is free and in range
    /// for the configured diagnosis address.
    pub fn request_client_id(
        &self,
        config: &dyn Config,
        app_name: &str,
        requested: Option<ClientId>,
    ) -> Result<Allocation> {
        let base = Self::base(config);
        let span = Self::span(config);
        let routing_host = Self::routing_host_id(config);
        let is_routing_host = self.store.claim_routing_host();

        if is_routing_host {
            self.store.insert(routing_host);
            self.logger.info(
                "id_allocator",
                "became routing host",
                &[LogField::new("client_id", routing_host), LogField::new("app", app_name)],
            );
            return Ok(Allocation {
                client_id: routing_host,
                is_routing_host: true,
            });
        }

        if let Some(id) = requested {
            if !id.is_illegal()
                && !self.store.contains(id)
                && !Self::is_reserved(config, id.get())
                && Self::in_range(id.get(), base, span)
            {
                self.store.insert(id);
                return Ok(Allocation {
                    client_id: id,
                    is_routing_host: false,
                });
            }
        }

        for candidate in base.wrapping_add(1)..=base.wrapping_add(span) {
            if candidate == routing_host.get() {
                continue;
            }
            if Self::is_reserved(config, candidate) {
                continue;
            }
            if !self.store.contains(ClientId::new(candidate)) {
                self.store.insert(ClientId::new(candidate));
                return Ok(Allocation {
                    client_id: ClientId::new(candidate),
                    is_routing_host: false,
                });
            }
        }

        self.logger.warn(
            "id_allocator",
            "client id pool exhausted",
            &[LogField::new("app", app_name)],
        );
        Err(CoreError::PoolExhausted)
    }

    fn in_range(id: u16, base: u16, span: u16) -> bool {
        id >= base && id <= base.wrapping_add(span)
    }

    pub fn release_client_id(&self, id: ClientId) {
        self.store.remove(id);
    }

    /// Clears the used-id set for the network. Reserved for the routing
    /// host on clean shutdown; any other caller gets `InvalidArgument`.
    pub fn reset_client_ids(&self, caller_is_routing_host: bool) -> Result<()> {
        if !caller_is_routing_host {
            return Err(CoreError::invalid_argument(
                "only the routing host may reset the client id pool",
            ));
        }
        self.store.clear();
        Ok(())
    }
}
