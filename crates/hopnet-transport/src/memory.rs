//! In-memory transport: a hub wiring node endpoints directly to each
//! other. Delivery is ordered per conversation and never drops.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use hopnet_core::{EndpointId, NetAddress, Packet};

use crate::error::TransportError;
use crate::{Transport, TransportEvent};

#[derive(Default)]
struct HubInner {
    inboxes: BTreeMap<NetAddress, mpsc::UnboundedSender<TransportEvent>>,
    /// Conversation table: (node address, local endpoint) on one side
    /// maps to its counterpart on the other, in both directions.
    conns: BTreeMap<(NetAddress, EndpointId), (NetAddress, EndpointId)>,
}

/// Hub connecting in-memory transports.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        MemoryHub::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a node at `address` and hands it its transport.
    pub fn attach(&self, address: NetAddress) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().inboxes.insert(address.clone(), tx);
        MemoryTransport { address, hub: self.clone(), inbox: rx }
    }

    /// Pre-wires a long-lived conversation between two endpoints, the
    /// way two link peers agree out of band.
    pub fn wire(&self, a: NetAddress, a_ep: EndpointId, b: NetAddress, b_ep: EndpointId) {
        let mut inner = self.lock();
        inner
            .conns
            .insert((a.clone(), a_ep.clone()), (b.clone(), b_ep.clone()));
        inner.conns.insert((b, b_ep), (a, a_ep));
    }
}

/// One node's handle onto the hub.
pub struct MemoryTransport {
    address: NetAddress,
    hub: MemoryHub,
    inbox: mpsc::UnboundedReceiver<TransportEvent>,
}

impl MemoryTransport {
    pub fn address(&self) -> &NetAddress {
        &self.address
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, endpoint: &EndpointId, packet: &Packet) -> Result<(), TransportError> {
        let inner = self.hub.lock();
        let (peer_address, peer_endpoint) = inner
            .conns
            .get(&(self.address.clone(), endpoint.clone()))
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(endpoint.clone()))?;
        let inbox = inner
            .inboxes
            .get(&peer_address)
            .ok_or_else(|| TransportError::UnknownAddress(peer_address.clone()))?;
        debug!(from = %self.address, %endpoint, kind = packet.kind_name(), "delivering packet");
        // A full peer inbox means the peer is gone; treat like a lost
        // conversation.
        inbox
            .send(TransportEvent::Delivered { endpoint: peer_endpoint, packet: packet.clone() })
            .map_err(|_| TransportError::UnknownAddress(peer_address))
    }

    async fn open(
        &mut self,
        local: &EndpointId,
        address: &NetAddress,
        remote: &EndpointId,
        hello: &Packet,
    ) -> Result<(), TransportError> {
        let mut inner = self.hub.lock();
        let inbox = inner
            .inboxes
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::UnknownAddress(address.clone()))?;
        inner.conns.insert(
            (self.address.clone(), local.clone()),
            (address.clone(), remote.clone()),
        );
        inner.conns.insert(
            (address.clone(), remote.clone()),
            (self.address.clone(), local.clone()),
        );
        debug!(from = %self.address, to = %address, %local, %remote, "opened conversation");
        inbox
            .send(TransportEvent::Delivered { endpoint: remote.clone(), packet: hello.clone() })
            .map_err(|_| TransportError::UnknownAddress(address.clone()))
    }

    async fn close(&mut self, endpoint: &EndpointId) {
        let mut inner = self.hub.lock();
        if let Some((peer_address, peer_endpoint)) =
            inner.conns.remove(&(self.address.clone(), endpoint.clone()))
        {
            inner.conns.remove(&(peer_address.clone(), peer_endpoint.clone()));
            if let Some(inbox) = inner.inboxes.get(&peer_address) {
                let _ = inbox.send(TransportEvent::Closed { endpoint: peer_endpoint });
            }
            debug!(from = %self.address, %endpoint, "closed conversation");
        }
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbox.recv().await
    }
}
