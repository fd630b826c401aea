//! Convenience re-exports for embedding this core in a host application.

pub use crate::config::{Config, DebounceConfig, EventConfig, SecurityConfig, StaticConfig};
pub use crate::dispatcher::{DispatchMetrics, Dispatcher};
pub use crate::endpoint::{Destination, EndpointRouter, Frame};
pub use crate::error::{CoreError, Result, Verdict};
pub use crate::facade::{CoreFacade, RegistrationType};
pub use crate::ids::{
    ClientId, EventId, EventgroupId, InstanceId, MajorVersion, MethodId, MinorVersion, ServiceId, SessionId,
    Ttl, ROUTING_CLIENT,
};
pub use crate::observability::{DefaultLogger, LogField, LogSeverity, Logger, NullLogger};
pub use crate::registry::{Availability, EventKind, Reliability};
pub use crate::security::{AllowAll, SecurityClient, SecurityPolicy};
