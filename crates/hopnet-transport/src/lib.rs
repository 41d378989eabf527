//! Transport abstraction for hopnet nodes.
//!
//! The node core never sees sockets. It asks the transport to send a
//! packet to an endpoint, to open a conversation to an address, or to
//! close one; inbound packets arrive already tagged with the endpoint
//! they belong to.

pub mod error;
pub mod memory;

use async_trait::async_trait;

use hopnet_core::{EndpointId, NetAddress, Packet};

pub use error::TransportError;
pub use memory::{MemoryHub, MemoryTransport};

/// Something the transport delivered to this node.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A packet arrived on an established conversation.
    Delivered { endpoint: EndpointId, packet: Packet },
    /// The conversation with this endpoint is gone.
    Closed { endpoint: EndpointId },
}

/// One node's view of the network.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Sends on an established conversation.
    async fn send(&mut self, endpoint: &EndpointId, packet: &Packet) -> Result<(), TransportError>;

    /// Opens a conversation to `address`, binding our `local` endpoint
    /// to the peer's `remote` one, and delivers `hello` as its first
    /// packet.
    async fn open(
        &mut self,
        local: &EndpointId,
        address: &NetAddress,
        remote: &EndpointId,
        hello: &Packet,
    ) -> Result<(), TransportError>;

    /// Closes a conversation. Closing an unknown endpoint is a no-op.
    async fn close(&mut self, endpoint: &EndpointId);

    /// Waits for the next inbound event. `None` means the transport
    /// shut down.
    async fn recv(&mut self) -> Option<TransportEvent>;
}
