//! Plain deposit-backed channel.
//!
//! The simplest channel type: one side deposits, the peer
//! acknowledges, and from then on the ledger engine does all the work.
//! Closing is the withdraw handshake; there is nothing to settle on
//! chain.

use serde::{Deserialize, Serialize};

use hopnet_core::{Amount, ChainValue, ChannelConvMsg};

use crate::channel::ChannelOutput;
use crate::engine::{ChannelEngine, ChannelState};
use crate::error::{ChannelError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlainChannel {
    pub engine: ChannelEngine,
}

impl PlainChannel {
    pub fn make_for_deposit(amount: Amount) -> Self {
        PlainChannel { engine: ChannelEngine::new_depositing(amount) }
    }

    pub fn make_accepting() -> Self {
        PlainChannel { engine: ChannelEngine::new_accepting() }
    }

    /// The first conversation message after announcing the deposit.
    pub fn deposit_announcement(&self) -> ChannelConvMsg {
        ChannelConvMsg::DepositAmount { amount: self.engine.amount_local() }
    }

    pub fn on_conversation(&mut self, msg: &ChannelConvMsg) -> Result<ChannelOutput> {
        match (self.engine.state(), msg) {
            (ChannelState::Initial, ChannelConvMsg::DepositAmount { amount }) => {
                self.engine.accept_deposit(*amount, ChannelState::Ready)?;
                Ok(ChannelOutput::conversation(ChannelConvMsg::DepositAck))
            }
            (ChannelState::Depositing, ChannelConvMsg::DepositAck) => {
                self.engine.set_state(ChannelState::Ready);
                Ok(ChannelOutput::none())
            }
            (ChannelState::Withdrawing, ChannelConvMsg::WithdrawAck) => {
                self.engine.set_state(ChannelState::Closed);
                Ok(ChannelOutput::none())
            }
            (state, msg) => Err(ChannelError::InvalidStateTransition(format!(
                "plain channel in state {state} cannot handle {msg:?}"
            ))),
        }
    }

    /// A plain channel never issues chain commands, so no chain
    /// return can legitimately arrive.
    pub fn on_chain_return(&mut self, value: &ChainValue) -> Result<ChannelOutput> {
        Err(ChannelError::InvalidStateTransition(format!(
            "plain channel in state {} cannot handle chain return {value:?}",
            self.engine.state()
        )))
    }

    /// Starts the withdraw handshake on the initiating side.
    pub fn begin_withdraw(&mut self) -> Result<ChannelOutput> {
        self.require_idle("withdraw")?;
        self.engine.set_state(ChannelState::Withdrawing);
        Ok(ChannelOutput::none())
    }

    /// Handles the peer's withdraw announcement.
    pub fn on_peer_withdraw(&mut self) -> Result<ChannelOutput> {
        self.require_idle("withdraw")?;
        self.engine.set_state(ChannelState::Closed);
        Ok(ChannelOutput::conversation(ChannelConvMsg::WithdrawAck))
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
