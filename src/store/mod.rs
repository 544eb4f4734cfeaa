//! Storage interfaces.
//!
//! [`OutputStore`] is the synchronous, read-only view the reconciler works
//! against (an already-loaded cache). [`LedgerStore`] is the durable side
//! the ledger commits reconciled changes to.
use std::collections::BTreeSet;

use async_trait::async_trait;
use bitcoin::{OutPoint, TxOut};

use crate::types::{OutputState, ProposalId};

/// Read access to the wallet's current outputs.
pub trait OutputStore {
    /// Current state and value of `outpoint`, or `None` if the wallet has never seen it.
    fn get(&self, outpoint: &OutPoint) -> Option<(OutputState, TxOut)>;

    /// Payment proposals currently referencing `outpoint`.
    fn proposals_for(&self, outpoint: &OutPoint) -> BTreeSet<ProposalId>;

    /// Height of the best known block.
    fn best_height(&self) -> u32;

    /// Whether `outpoint` is known.
    fn exists(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }
}

/// A wallet output as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutput {
    /// Current lifecycle state.
    pub state: OutputState,
    /// The output itself.
    pub output: TxOut,
    /// Height of the block that created it, if mined.
    pub height: Option<u32>,
    /// Created by a coinbase transaction.
    pub generation: bool,
}

/// Everything one reconciliation pass changes, applied as a single unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCommit {
    /// Outputs to insert or overwrite.
    pub outputs: Vec<(OutPoint, StoredOutput)>,
    /// Proposals that are fully spent and should be deleted.
    pub retired_proposals: Vec<ProposalId>,
    /// New last-scanned height, for block passes.
    pub last_scanned: Option<u32>,
    /// New best chain height, for tip advances.
    pub tip: Option<u32>,
}

impl LedgerCommit {
    /// Nothing to write.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
            && self.retired_proposals.is_empty()
            && self.last_scanned.is_none()
            && self.tip.is_none()
    }
}

/// Durable persistence for the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Every stored output.
    async fn load_outputs(&self) -> anyhow::Result<Vec<(OutPoint, StoredOutput)>>;

    /// Every `(proposal, outpoint)` reservation.
    async fn load_proposals(&self) -> anyhow::Result<Vec<(ProposalId, OutPoint)>>;

    /// Record that `proposal` reserves `outpoints`.
    async fn save_proposal(&self, proposal: ProposalId, outpoints: &[OutPoint])
        -> anyhow::Result<()>;

    /// Apply `commit` atomically: either all of it is persisted or none of it.
    /// Neither the last-scanned height nor the tip ever moves backwards.
    async fn commit(&self, commit: LedgerCommit) -> anyhow::Result<()>;

    /// Last block height folded into the ledger.
    async fn get_last_scanned(&self) -> anyhow::Result<u32>;

    /// Highest chain tip committed through [`LedgerCommit::tip`], or 0.
    async fn get_tip_height(&self) -> anyhow::Result<u32>;

    /// (Optional) wallet birth height; nothing below it is scanned.
    async fn get_birth_height(&self) -> anyhow::Result<Option<u32>> {
        Ok(None)
    }

    /// Set birth height (optional).
    async fn set_birth_height(&self, _h: u32) -> anyhow::Result<()> {
        Ok(())
    }
}

pub mod memory;
pub use memory::MemoryOutputStore;

#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;
