//! Records of recently settled routes.
//!
//! A settle or rollback for a route that is gone has two very
//! different readings: a benign replay of something this link already
//! resolved, or a claim against a route that never existed. This table
//! is what tells them apart. It is bounded two ways: entries older
//! than the retention window are pruned, and when full the oldest
//! entry is evicted first.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use hopnet_core::RouteId;

/// How a route left the tables.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDisposition {
    Committed,
    RolledBack,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CompletedRoute {
    pub disposition: RouteDisposition,
    pub completed_at_ms: u64,
}

/// Bounded, age-pruned record of completed routes on one link.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompletedRoutes {
    entries: BTreeMap<RouteId, CompletedRoute>,
    /// Insertion order, oldest first, for capacity eviction.
    order: VecDeque<RouteId>,
}

impl CompletedRoutes {
    pub fn new() -> Self {
        CompletedRoutes::default()
    }

    /// Records a completed route, evicting the oldest entry when the
    /// capacity bound is hit. Re-recording a route refreshes it.
    pub fn record(
        &mut self,
        route: RouteId,
        disposition: RouteDisposition,
        now_ms: u64,
        capacity: usize,
    ) {
        if capacity == 0 {
            return;
        }
        if self.entries.remove(&route).is_some() {
            self.order.retain(|r| r != &route);
        }
        while self.entries.len() >= capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    debug!(route = %oldest, "evicted completed-route record");
                }
                None => break,
            }
        }
        self.entries
            .insert(route, CompletedRoute { disposition, completed_at_ms: now_ms });
        self.order.push_back(route);
    }

    pub fn get(&self, route: &RouteId) -> Option<&CompletedRoute> {
        self.entries.get(route)
    }

    pub fn contains(&self, route: &RouteId) -> bool {
        self.entries.contains_key(route)
    }

    /// Drops entries older than the retention window.
    pub fn prune(&mut self, now_ms: u64, retention_ms: u64) {
        let cutoff = now_ms.saturating_sub(retention_ms);
        let entries = &mut self.entries;
        self.order.retain(|route| {
            let stale = entries
                .get(route)
                .map(|r| r.completed_at_ms < cutoff)
                .unwrap_or(true);
            if stale {
                entries.remove(route);
            }
            !stale
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopnet_core::Token;

    fn make_route(seed: u8) -> RouteId {
        RouteId::new(Token::from_bytes([seed; 32]).transaction_id(), true)
    }

    #[test]
    fn test_record_and_lookup() {
        let mut records = CompletedRoutes::new();
        let route = make_route(1);
        records.record(route, RouteDisposition::Committed, 100, 16);
        assert!(records.contains(&route));
        assert_eq!(records.get(&route).unwrap().disposition, RouteDisposition::Committed);
        assert!(!records.contains(&make_route(2)));
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let mut records = CompletedRoutes::new();
        for seed in 1..=4 {
            records.record(make_route(seed), RouteDisposition::Committed, seed as u64, 3);
        }
        assert_eq!(records.len(), 3);
        assert!(!records.contains(&make_route(1)));
        assert!(records.contains(&make_route(2)));
        assert!(records.contains(&make_route(4)));
    }

    #[test]
    fn test_re_record_refreshes_position() {
        let mut records = CompletedRoutes::new();
        records.record(make_route(1), RouteDisposition::Committed, 1, 2);
        records.record(make_route(2), RouteDisposition::Committed, 2, 2);
        // Touch route 1 again, then push a third: route 2 is now oldest.
        records.record(make_route(1), RouteDisposition::RolledBack, 3, 2);
        records.record(make_route(3), RouteDisposition::Committed, 4, 2);
        assert!(records.contains(&make_route(1)));
        assert!(!records.contains(&make_route(2)));
        assert_eq!(records.get(&make_route(1)).unwrap().disposition, RouteDisposition::RolledBack);
    }

    #[test]
    fn test_prune_drops_old_entries() {
        let mut records = CompletedRoutes::new();
        records.record(make_route(1), RouteDisposition::Committed, 1_000, 16);
        records.record(make_route(2), RouteDisposition::RolledBack, 5_000, 16);
        records.prune(6_000, 2_000);
        assert!(!records.contains(&make_route(1)));
        assert!(records.contains(&make_route(2)));

        records.prune(60_000, 2_000);
        assert!(records.is_empty());
    }

    #[test]
    fn test_zero_capacity_records_nothing() {
        let mut records = CompletedRoutes::new();
        records.record(make_route(1), RouteDisposition::Committed, 1, 0);
        assert!(records.is_empty());
    }
}
