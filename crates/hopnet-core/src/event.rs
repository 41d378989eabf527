//! Events a node raises towards local observers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Amount;

/// Final disposition of a payment.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayFinalState {
    Committed,
    Cancelled,
}

impl fmt::Display for PayFinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayFinalState::Committed => f.write_str("committed"),
            PayFinalState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Raised by the payer entity as an outgoing payment progresses.
/// Callers blocked on the payment rendezvous on these.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeEvent {
    /// The payee's receipt arrived; the caller must confirm or refuse.
    ReceiptReceived { amount: Amount, receipt: String },
    /// The payment reached a terminal state.
    PaymentFinished { state: PayFinalState },
}
