//! Errors raised by a reconciliation pass.
//!
//! Every variant is fatal to the pass that produced it. Nothing is staged,
//! nothing is retried.
use bitcoin::{OutPoint, Txid};

use crate::types::{OutputState, TargetState};

/// Logically impossible situations. Seeing one means a bug upstream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Invariant {
    /// The transition table rejected the move.
    #[error("disallowed transition for {outpoint}: {from} -> {to}")]
    DisallowedTransition {
        /// Output being moved.
        outpoint: OutPoint,
        /// Its current state.
        from: OutputState,
        /// The state the pass asked for.
        to: TargetState,
    },

    /// The same outpoint was presented as created twice in one pass.
    #[error("outpoint {0} created twice in one pass")]
    DuplicateCreation(OutPoint),
}

/// Data the pass needed but could not find.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unavailable {
    /// A spent output is not staged, not stored and not in the batch.
    #[error("previous output {outpoint} spent by {spender}:{input} not found")]
    PreviousOutput {
        /// The output being spent.
        outpoint: OutPoint,
        /// Spending transaction.
        spender: Txid,
        /// Input index within the spending transaction.
        input: u32,
    },

    /// A matched input index does not exist in its transaction.
    #[error("transaction {txid} has no input {index}")]
    Input {
        /// Transaction id.
        txid: Txid,
        /// Missing input index.
        index: u32,
    },
}

/// Why a matched output was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutputDefect {
    /// Index past the end of the output list.
    #[error("index out of range")]
    OutOfRange,
    /// Value exceeds the money supply.
    #[error("value above max money")]
    ValueOutOfRange,
}

/// Errors returned by [`crate::reconcile::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Programmer or design bug: the input asked for something impossible.
    #[error("invariant violation")]
    InvariantViolation(#[from] Invariant),

    /// The match set was incomplete.
    #[error("data unavailable")]
    DataUnavailable(#[from] Unavailable),

    /// A mempool pass tried to create a generation output.
    #[error("policy violation: mempool transaction creates generation output {0}")]
    PolicyViolation(OutPoint),

    /// A matched output failed basic validation.
    #[error("invalid output {txid}:{index}: {defect}")]
    InvalidOutput {
        /// Owning transaction.
        txid: Txid,
        /// Output index.
        index: u32,
        /// What was wrong with it.
        defect: OutputDefect,
    },
}

impl ReconcileError {
    /// Whether the caller should drop its state and rescan from scratch.
    ///
    /// Invariant and data-availability errors mean the caller's view of the
    /// ledger can no longer be trusted.
    pub fn requires_rescan(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvariantViolation(_) | ReconcileError::DataUnavailable(_)
        )
    }
}
