//! Rendezvous channels the caller driving a payment blocks on.
//!
//! A node runs at most one outgoing payment, so one pair of
//! latest-value channels is enough: the receipt arriving and the
//! payment finishing. Both reset when a new payment starts.

use tokio::sync::watch;

use hopnet_core::{Amount, NodeEvent, PayFinalState};

pub struct EventHub {
    receipt_tx: watch::Sender<Option<(Amount, String)>>,
    finished_tx: watch::Sender<Option<PayFinalState>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (receipt_tx, _) = watch::channel(None);
        let (finished_tx, _) = watch::channel(None);
        EventHub { receipt_tx, finished_tx }
    }

    /// Clears leftovers of the previous payment.
    pub fn reset(&self) {
        self.receipt_tx.send_replace(None);
        self.finished_tx.send_replace(None);
    }

    pub fn publish(&self, event: &NodeEvent) {
        match event {
            NodeEvent::ReceiptReceived { amount, receipt } => {
                self.receipt_tx.send_replace(Some((*amount, receipt.clone())));
            }
            NodeEvent::PaymentFinished { state } => {
                self.finished_tx.send_replace(Some(*state));
            }
        }
    }

    pub fn receipt(&self) -> watch::Receiver<Option<(Amount, String)>> {
        self.receipt_tx.subscribe()
    }

    pub fn finished(&self) -> watch::Receiver<Option<PayFinalState>> {
        self.finished_tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        EventHub::new()
    }
}
