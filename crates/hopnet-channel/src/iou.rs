//! Debt-backed (IOU) channel.
//!
//! The depositing side issues the IOU and owes the peer whatever its
//! remote balance says. During setup the non-issuer creates a payout
//! address through the chain backend; at close the issuer broadcasts
//! one settlement transaction paying the debt to that address.
//!
//! After every settle the issuer sends an acknowledgement note with
//! the new debt total, which the non-issuer checks against its own
//! ledger. A mismatch means the two ends disagree about the debt and
//! aborts the unit of work that uncovered it.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hopnet_core::{Amount, ChainCommandKind, ChainValue, ChannelConvMsg};

use crate::channel::ChannelOutput;
use crate::engine::{ChannelEngine, ChannelState};
use crate::error::{ChannelError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IouChannel {
    pub engine: ChannelEngine,
    /// True on the side that deposited and therefore owes the debt.
    pub is_issuer: bool,
    /// Where the closing settlement pays out. Held by the issuer once
    /// the non-issuer has supplied it.
    pub payout_address: Option<String>,
    /// Settlement transaction of a completed close.
    pub close_tx_id: Option<String>,
}

impl IouChannel {
    pub fn make_for_deposit(amount: Amount) -> Self {
        IouChannel {
            engine: ChannelEngine::new_depositing(amount),
            is_issuer: true,
            payout_address: None,
            close_tx_id: None,
        }
    }

    pub fn make_accepting() -> Self {
        IouChannel {
            engine: ChannelEngine::new_accepting(),
            is_issuer: false,
            payout_address: None,
            close_tx_id: None,
        }
    }

    pub fn deposit_announcement(&self) -> ChannelConvMsg {
        ChannelConvMsg::DepositAmount { amount: self.engine.amount_local() }
    }

    pub fn on_conversation(&mut self, msg: &ChannelConvMsg) -> Result<ChannelOutput> {
        match (self.engine.state(), msg) {
            // Non-issuer learns the deposit, then needs an address from
            // the chain before the channel can open.
            (ChannelState::Initial, ChannelConvMsg::DepositAmount { amount }) => {
                self.engine.accept_deposit(*amount, ChannelState::Depositing)?;
                Ok(ChannelOutput::chain(ChainCommandKind::NewAddress))
            }
            // Issuer stores the payout address; both sides are open now.
            (ChannelState::Depositing, ChannelConvMsg::IouAddress { address }) => {
                if !self.is_issuer {
                    return Err(ChannelError::InvalidStateTransition(
                        "payout address sent to the non-issuer side".to_owned(),
                    ));
                }
                self.payout_address = Some(address.clone());
                self.engine.set_state(ChannelState::Ready);
                Ok(ChannelOutput::none())
            }
            (ChannelState::Ready, ChannelConvMsg::IouNote { amount, total_owed }) => {
                self.check_note(*amount, *total_owed)
            }
            (ChannelState::Ready, ChannelConvMsg::IouCloseRequest) => {
                if !self.is_issuer {
                    return Err(ChannelError::InvalidStateTransition(
                        "close request sent to the non-issuer side".to_owned(),
                    ));
                }
                self.broadcast_close()
            }
            (ChannelState::Ready | ChannelState::Withdrawing, ChannelConvMsg::IouClosed { tx_id }) => {
                if self.is_issuer {
                    return Err(ChannelError::InvalidStateTransition(
                        "close report sent to the issuer side".to_owned(),
                    ));
                }
                info!(tx_id = %tx_id, "iou channel closed by issuer");
                self.close_tx_id = Some(tx_id.clone());
                self.engine.set_state(ChannelState::Closed);
                Ok(ChannelOutput::none())
            }
            (ChannelState::Withdrawing, ChannelConvMsg::WithdrawAck) => {
                self.engine.set_state(ChannelState::Closed);
                Ok(ChannelOutput::none())
            }
            (state, msg) => Err(ChannelError::InvalidStateTransition(format!(
                "iou channel in state {state} cannot handle {msg:?}"
            ))),
        }
    }

    pub fn on_chain_return(&mut self, value: &ChainValue) -> Result<ChannelOutput> {
        match (self.engine.state(), value) {
            (ChannelState::Depositing, ChainValue::Address { address }) => {
                if self.is_issuer {
                    return Err(ChannelError::InvalidStateTransition(
                        "issuer side received an address from the chain".to_owned(),
                    ));
                }
                self.payout_address = Some(address.clone());
                self.engine.set_state(ChannelState::Ready);
                Ok(ChannelOutput::conversation(ChannelConvMsg::IouAddress {
                    address: address.clone(),
                }))
            }
            (ChannelState::SendingClose, ChainValue::Broadcast { tx_id }) => {
                info!(tx_id = %tx_id, "iou close settlement broadcast");
                self.close_tx_id = Some(tx_id.clone());
                self.engine.set_state(ChannelState::Closed);
                Ok(ChannelOutput::conversation(ChannelConvMsg::IouClosed {
                    tx_id: tx_id.clone(),
                }))
            }
            (state, ChainValue::Failed { reason }) => {
                // Stuck until retried; losing the channel over a flaky
                // backend would be worse.
                warn!(%state, reason = %reason, "chain command failed, channel left as is");
                Ok(ChannelOutput::none())
            }
            (state, value) => Err(ChannelError::InvalidStateTransition(format!(
                "iou channel in state {state} cannot handle chain return {value:?}"
            ))),
        }
    }

    /// Starts a close. The issuer broadcasts the settlement; the
    /// non-issuer can only ask the issuer to do so.
    pub fn begin_close(&mut self) -> Result<ChannelOutput> {
        self.require_idle("close")?;
        if self.is_issuer {
            self.broadcast_close()
        } else {
            Ok(ChannelOutput::conversation(ChannelConvMsg::IouCloseRequest))
        }
    }

    pub fn begin_withdraw(&mut self) -> Result<ChannelOutput> {
        self.require_idle("withdraw")?;
        self.engine.set_state(ChannelState::Withdrawing);
        Ok(ChannelOutput::none())
    }

    pub fn on_peer_withdraw(&mut self) -> Result<ChannelOutput> {
        self.require_idle("withdraw")?;
        self.engine.set_state(ChannelState::Closed);
        Ok(ChannelOutput::conversation(ChannelConvMsg::WithdrawAck))
    }

    /// The acknowledgement the issuer sends after a settle.
    pub fn note_after_settle(&self, amount: Amount) -> Option<ChannelConvMsg> {
        if !self.is_issuer {
            return None;
        }
        Some(ChannelConvMsg::IouNote { amount, total_owed: self.engine.amount_remote() })
    }

    fn check_note(&self, amount: Amount, total_owed: Amount) -> Result<ChannelOutput> {
        let ours = self.engine.amount_local();
        if total_owed != ours {
            return Err(ChannelError::InvalidStateTransition(format!(
                "iou note claims debt {total_owed} after settling {amount}, our ledger says {ours}"
            )));
        }
        Ok(ChannelOutput::none())
    }

    fn broadcast_close(&mut self) -> Result<ChannelOutput> {
        self.require_idle("close")?;
        let address = self.payout_address.clone().ok_or_else(|| {
            ChannelError::InvalidStateTransition("no payout address for iou close".to_owned())
        })?;
        let amount = self.engine.amount_remote();
        self.engine.set_state(ChannelState::SendingClose);
        Ok(ChannelOutput::chain(ChainCommandKind::BroadcastSettlement { address, amount }))
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        if self.engine.state() != ChannelState::Ready {
            return Err(ChannelError::InvalidStateTransition(format!(
                "cannot {what} a {} channel",
                self.engine.state()
            )));
        }
        if !self.engine.in_flight_empty() {
            return Err(ChannelError::InvalidStateTransition(format!(
                "cannot {what} while routes are reserved or locked"
            )));
        }
        Ok(())
    }
}
