//! Value types shared by the reconciler, the stores and the ledger.
use std::fmt;
use std::str::FromStr;

use bitcoin::BlockHash;

/// Lifecycle state of a wallet-owned output.
///
/// This is the closed set of states that can be persisted. There is no
/// "error" or "any" member: such values only ever existed as bookkeeping
/// sentinels and cannot be represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputState {
    /// Created by a mempool transaction.
    UnconfirmedNew,
    /// Spent by a mempool transaction.
    UnconfirmedSpend,
    /// Created by a confirmed transaction.
    ConfirmedNew,
    /// Spent by a confirmed transaction.
    ConfirmedSpend,
    /// Generation output that has not reached coinbase maturity yet.
    Immature,
    /// Created on a branch that is no longer the best chain.
    OrphanedNew,
    /// Spent on a branch that is no longer the best chain.
    OrphanedSpend,
}

impl OutputState {
    /// Every persisted state, in storage-code order.
    pub const ALL: [OutputState; 7] = [
        OutputState::UnconfirmedNew,
        OutputState::UnconfirmedSpend,
        OutputState::ConfirmedNew,
        OutputState::ConfirmedSpend,
        OutputState::Immature,
        OutputState::OrphanedNew,
        OutputState::OrphanedSpend,
    ];

    /// Whether the output has been consumed (in any branch).
    pub fn is_spent(self) -> bool {
        matches!(
            self,
            OutputState::UnconfirmedSpend | OutputState::ConfirmedSpend | OutputState::OrphanedSpend
        )
    }

    /// Stable numeric code used by persistent stores.
    pub fn code(self) -> u8 {
        match self {
            OutputState::UnconfirmedNew => 1,
            OutputState::UnconfirmedSpend => 2,
            OutputState::ConfirmedNew => 3,
            OutputState::ConfirmedSpend => 4,
            OutputState::Immature => 5,
            OutputState::OrphanedNew => 6,
            OutputState::OrphanedSpend => 7,
        }
    }

    /// Inverse of [`OutputState::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputState::UnconfirmedNew => "unconfirmed-new",
            OutputState::UnconfirmedSpend => "unconfirmed-spend",
            OutputState::ConfirmedNew => "confirmed-new",
            OutputState::ConfirmedSpend => "confirmed-spend",
            OutputState::Immature => "immature",
            OutputState::OrphanedNew => "orphaned-new",
            OutputState::OrphanedSpend => "orphaned-spend",
        };
        f.write_str(s)
    }
}

/// The subset of [`OutputState`] a scan pass may request for an output.
///
/// Orphaned states are only ever reached through reorg handling, so the
/// reconciler has no way to ask for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    /// Seen created in the mempool.
    UnconfirmedNew,
    /// Seen spent in the mempool.
    UnconfirmedSpend,
    /// Seen created in a block.
    ConfirmedNew,
    /// Seen spent in a block.
    ConfirmedSpend,
    /// Generation output seen in a block, below maturity.
    Immature,
}

impl From<TargetState> for OutputState {
    fn from(t: TargetState) -> Self {
        match t {
            TargetState::UnconfirmedNew => OutputState::UnconfirmedNew,
            TargetState::UnconfirmedSpend => OutputState::UnconfirmedSpend,
            TargetState::ConfirmedNew => OutputState::ConfirmedNew,
            TargetState::ConfirmedSpend => OutputState::ConfirmedSpend,
            TargetState::Immature => OutputState::Immature,
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        OutputState::from(*self).fmt(f)
    }
}

/// Identifier of an in-flight payment proposal (32 opaque bytes, hex encoded for display).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProposalId(pub [u8; 32]);

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ProposalId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

/// Where a block sits in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPosition {
    /// Height of the block.
    pub height: u32,
    /// Hash of the block.
    pub hash: BlockHash,
}

impl BlockPosition {
    /// Build a position from `(height, hash)`.
    pub fn new(height: u32, hash: BlockHash) -> Self {
        Self { height, hash }
    }
}

/// What a reconciliation pass is applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTarget {
    /// Transactions seen in the mempool. Never carries a block position.
    Mempool,
    /// Transactions mined in the block at this position.
    Block(BlockPosition),
}

impl ScanTarget {
    /// `true` for a mempool pass.
    pub fn is_mempool(&self) -> bool {
        matches!(self, ScanTarget::Mempool)
    }

    /// Block position of a confirmed pass.
    pub fn position(&self) -> Option<BlockPosition> {
        match self {
            ScanTarget::Mempool => None,
            ScanTarget::Block(p) => Some(*p),
        }
    }
}

/// Coinbase maturity rule: an output created at `created` may be spent
/// once the best chain is `maturity` blocks past it.
pub fn is_mature(created: u32, best_height: u32, maturity: u32) -> bool {
    best_height >= created.saturating_add(maturity)
}
