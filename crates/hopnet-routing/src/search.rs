//! Pending route searches.
//!
//! A node extending a half-route tries its links one at a time. The
//! search record remembers which candidates are left and who to tell
//! when they all fail; a "no route" report from the current candidate
//! resumes the search at the next one.

use serde::{Deserialize, Serialize};

use hopnet_core::{LinkId, MakeRoute, PayeeId};

/// Who is waiting for the outcome of this search.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SearchOrigin {
    /// The local payer entity started it.
    Payer,
    /// A local payee entity started it.
    Payee(PayeeId),
    /// The route extension arrived over this link; failure is
    /// reported back through it.
    Link(LinkId),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteSearch {
    pub origin: SearchOrigin,
    /// The extension request to replay on the next candidate.
    pub request: MakeRoute,
    /// Candidates not yet tried, in try order.
    remaining: Vec<LinkId>,
}

impl RouteSearch {
    pub fn new(origin: SearchOrigin, mut request: MakeRoute, candidates: Vec<LinkId>) -> Self {
        // The channel index is per hop; it must not leak into retries.
        request.channel_index = None;
        RouteSearch { origin, request, remaining: candidates }
    }

    /// The next link to try, consuming it.
    pub fn next_candidate(&mut self) -> Option<LinkId> {
        if self.remaining.is_empty() {
            None
        } else {
            Some(self.remaining.remove(0))
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }
}
