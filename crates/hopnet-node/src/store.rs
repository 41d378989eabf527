//! On-disk home of a node: the state snapshot and the pay log.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::paylog::PayLog;
use crate::state::NodeState;

const STATE_FILE: &str = "state.json";
const PAY_LOG_FILE: &str = "payments.jsonl";

/// One directory per node. The shell saves a snapshot after every
/// successfully handled message, so a restart resumes mid-payment.
#[derive(Clone, Debug)]
pub struct NodeStore {
    dir: PathBuf,
}

impl NodeStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating node directory {}", dir.display()))?;
        Ok(NodeStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pay_log(&self) -> PayLog {
        PayLog::new(self.dir.join(PAY_LOG_FILE))
    }

    /// Loads the last snapshot. A fresh directory has none.
    pub fn load_state(&self) -> Result<Option<NodeState>> {
        let path = self.dir.join(STATE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let state: NodeState =
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        info!(node = %state.name, path = %path.display(), "loaded node state");
        Ok(Some(state))
    }

    pub fn save_state(&self, state: &NodeState) -> Result<()> {
        let path = self.dir.join(STATE_FILE);
        let tmp = self.dir.join(format!("{STATE_FILE}.tmp"));
        let contents = serde_json::to_string_pretty(state)?;
        // A crash mid-write must not clobber the last good snapshot.
        std::fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}
