//! Transport error surface.

use thiserror::Error;

use hopnet_core::{EndpointId, NetAddress};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no node listens at {0}")]
    UnknownAddress(NetAddress),

    #[error("endpoint {0} is not connected")]
    NotConnected(EndpointId),
}
