//! Route reservations held in channel tables.

use serde::{Deserialize, Serialize};

use hopnet_core::Amount;

/// Funds set aside for one half-route, valid within a time window.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Reservation {
    pub start_ms: u64,
    pub end_ms: u64,
    pub amount: Amount,
}

impl Reservation {
    pub fn new(start_ms: u64, end_ms: u64, amount: Amount) -> Self {
        Reservation { start_ms, end_ms, amount }
    }

    /// Narrows the validity window in place.
    pub fn update_window(&mut self, start_ms: u64, end_ms: u64) {
        self.start_ms = start_ms;
        self.end_ms = end_ms;
    }
}
