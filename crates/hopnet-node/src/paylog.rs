//! Append-only record of finished payments, one JSON object per line.
//!
//! Payment entities disappear from the node state once they reach a
//! terminal state; this log is where their outcome survives.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use hopnet_core::{Amount, PayFinalState, PayerState, TransactionId};

use crate::payee::PayeeLink;
use crate::payer::PayerLink;

/// Which side of the payment this node was on.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayRole {
    Payer,
    Payee,
}

/// One finished payment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletedPayment {
    pub role: PayRole,
    /// Absent when the payment died before a receipt arrived.
    pub transaction: Option<TransactionId>,
    pub amount: Amount,
    pub receipt: Option<String>,
    pub state: PayFinalState,
    pub at_ms: u64,
}

impl CompletedPayment {
    pub fn from_payer(payer: &PayerLink, at_ms: u64) -> Self {
        let state = match payer.state {
            PayerState::Committed => PayFinalState::Committed,
            _ => PayFinalState::Cancelled,
        };
        CompletedPayment {
            role: PayRole::Payer,
            transaction: payer.transaction,
            amount: payer.amount,
            receipt: payer.receipt.clone(),
            state,
            at_ms,
        }
    }

    pub fn from_payee(payee: &PayeeLink, at_ms: u64) -> Self {
        let state = match payee.state {
            hopnet_core::PayeeState::Committed => PayFinalState::Committed,
            _ => PayFinalState::Cancelled,
        };
        CompletedPayment {
            role: PayRole::Payee,
            transaction: Some(payee.transaction),
            amount: payee.amount,
            receipt: Some(payee.receipt.clone()),
            state,
            at_ms,
        }
    }
}

/// Handle on the pay log file. Cheap to clone a path into; every
/// append opens, writes one line and closes.
#[derive(Clone, Debug)]
pub struct PayLog {
    path: PathBuf,
}

impl PayLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PayLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &CompletedPayment) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening pay log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to pay log {}", self.path.display()))?;
        Ok(())
    }

    /// Reads the whole log. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<CompletedPayment>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading pay log {}", self.path.display()))?;
        let mut records = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}
