//! Read-only snapshot of a node for the API and the CLI.

use serde::{Deserialize, Serialize};

use hopnet_channel::ChannelState;
use hopnet_core::{Amount, ChannelKind, LinkId, MeetingPointId, PayeeId, PayeeState, PayerState};

use crate::state::NodeState;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub index: usize,
    pub kind: ChannelKind,
    pub state: ChannelState,
    pub amount_local: Amount,
    pub amount_remote: Amount,
    pub reserved_out: usize,
    pub reserved_in: usize,
    pub locked_out: usize,
    pub locked_in: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkSummary {
    pub link: LinkId,
    pub peer: LinkId,
    pub channels: Vec<ChannelSummary>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeetingPointSummary {
    pub id: MeetingPointId,
    pub pending_legs: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayerSummary {
    pub payee: PayeeId,
    pub state: PayerState,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayeeSummary {
    pub id: PayeeId,
    pub state: PayeeState,
    pub amount: Amount,
}

/// Everything `list` shows about a node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSummary {
    pub name: String,
    /// Total spendable over all channels.
    pub balance: Amount,
    pub links: Vec<LinkSummary>,
    pub meeting_points: Vec<MeetingPointSummary>,
    pub payer: Option<PayerSummary>,
    pub payees: Vec<PayeeSummary>,
    pub open_searches: usize,
    pub pending_timeouts: usize,
}

impl NodeSummary {
    pub fn of(state: &NodeState) -> Self {
        let links = state
            .links
            .values()
            .map(|link| LinkSummary {
                link: link.local_id.clone(),
                peer: link.remote_id.clone(),
                channels: link
                    .channels()
                    .iter()
                    .enumerate()
                    .map(|(index, c)| {
                        let e = c.engine();
                        ChannelSummary {
                            index,
                            kind: c.kind(),
                            state: e.state(),
                            amount_local: e.amount_local(),
                            amount_remote: e.amount_remote(),
                            reserved_out: e.out_reserved().len(),
                            reserved_in: e.in_reserved().len(),
                            locked_out: e.out_locked().len(),
                            locked_in: e.in_locked().len(),
                        }
                    })
                    .collect(),
            })
            .collect();
        let meeting_points = state
            .meeting_points
            .values()
            .map(|mp| MeetingPointSummary { id: mp.id.clone(), pending_legs: mp.pending_count() })
            .collect();
        let payer = state.payer.as_ref().map(|p| PayerSummary {
            payee: p.payee.clone(),
            state: p.state,
            amount: p.amount,
        });
        let payees = state
            .payees
            .values()
            .map(|p| PayeeSummary { id: p.id.clone(), state: p.state, amount: p.amount })
            .collect();
        NodeSummary {
            name: state.name.clone(),
            balance: state.balance(),
            links,
            meeting_points,
            payer,
            payees,
            open_searches: state.searches.len(),
            pending_timeouts: state.timeouts.len(),
        }
    }
}
