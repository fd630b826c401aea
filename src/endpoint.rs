//! The `EndpointRouter` collaborator and the wire framing helpers
//! that are informative for this crate: the core never builds or
//! parses a full frame itself, but `get_message_size`/`get_payload_size`
//! are needed to decide how much of an already-decoded buffer belongs to
//! one message, and several seed tests exercise
//! them directly.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::ids::{ClientId, EventId, InstanceId, MethodId, ServiceId, SessionId};

/// A destination for an outbound message: either a known local client or an
/// opaque remote address the `EndpointRouter` implementation understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Local(ClientId),
    Remote(Vec<u8>),
}

/// A decoded incoming frame, handed to [`crate::facade::CoreFacade::on_message`].
#[derive(Clone, Debug)]
pub struct Frame {
    pub service: ServiceId,
    /// The wire header carries no instance id; an `EndpointRouter`
    /// implementation resolves it from which local binding the bytes
    /// arrived on before handing the decoded frame up.
    pub instance: InstanceId,
    /// Bit 15 of the wire field distinguishes a method call from an event
    /// notification; callers read this through [`Frame::is_event`] rather
    /// than inspecting the raw id.
    pub member: u16,
    pub client: ClientId,
    pub session: SessionId,
    pub interface_version: u8,
    pub message_type: u8,
    pub return_code: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn is_event(&self) -> bool {
        self.member & 0x8000 != 0
    }

    pub fn method(&self) -> MethodId {
        MethodId::new(self.member & 0x7FFF)
    }

    pub fn event(&self) -> EventId {
        EventId::new(self.member & 0x7FFF)
    }
}

/// The endpoint/transport collaborator: the core calls into this to send
/// already-serialized frames and registers a callback to receive decoded
/// ones. Wire framing, multicast service discovery, and TCP/UDP endpoint
/// I/O live entirely on the other side of this trait.
#[async_trait]
pub trait EndpointRouter: Send + Sync {
    async fn send(&self, to: Destination, bytes: &[u8]) -> crate::error::Result<()>;

    /// Registers the facade's dispatch entry point. Implementations call
    /// this closure once per decoded frame, from their own I/O pool
    /// — never from a dispatcher worker.
    fn on_message(&self, handler: Box<dyn Fn(Frame) + Send + Sync>);
}

/// Returns the total size in bytes of the message starting at `buf`,
/// including the 16-byte header, or `0` if `buf` does not yet contain a
/// complete, parseable header.
pub fn get_message_size(buf: &[u8]) -> usize {
    if buf.len() < 16 {
        return 0;
    }
    let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if length < 8 || length > buf.len() - 8 {
        return 0;
    }
    16 + length
}

/// Returns the size of the payload (bytes after the 16-byte header) for the
/// message starting at `buf`, or `0` under the same preconditions as
/// [`get_message_size`]. `length` covers the 8-byte header tail (client id,
/// session id, protocol/interface version, message type, return code) plus
/// the payload, so a `length` under 8 is malformed rather than merely
/// payload-less — guarded here so the subtraction below never underflows.
pub fn get_payload_size(buf: &[u8]) -> usize {
    if buf.len() < 16 {
        return 0;
    }
    let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if length < 8 || length > buf.len() - 8 {
        return 0;
    }
    length - 8
}

/// Errors from this module reuse [`CoreError::IoError`]; kept here as a
/// thin constructor so callers don't have to spell out the variant.
pub fn io_error(message: impl Into<String>) -> CoreError {
    CoreError::io(message)
}
