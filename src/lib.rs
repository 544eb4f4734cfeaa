#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! niebla-ledger: the UTXO side of a compact-filter wallet.
//!
//! A filter engine finds the blocks and mempool transactions that touch the
//! wallet. This crate folds them into the wallet's record of outputs.
//!
//! ## What you implement
//! - [`LedgerStore`]: durable storage for outputs, proposals and scan progress
//!   (or use the bundled [`SqliteStore`]).
//!
//! ## What the crate does
//! - Picks the wallet-relevant inputs and outputs of each transaction.
//! - [`reconcile`](reconcile::reconcile)s them against the current outputs,
//!   producing a checked set of state transitions (creations are staged
//!   before spends, so a spend of an output created in the same block
//!   always resolves).
//! - Rejects anything impossible (a disallowed transition, a duplicate
//!   creation, an unresolvable spend, a coinbase in the mempool) instead of
//!   writing a corrupted ledger.
//! - Commits each pass atomically, matures coinbase outputs as the tip
//!   advances, and retires payment proposals once their inputs confirm.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use niebla_ledger::prelude::*;
//!
//! async fn run(script: bitcoin::ScriptBuf, block: bitcoin::Block, height: u32) -> anyhow::Result<()> {
//!     let store = SqliteStore::new("wallet.sqlite")?;
//!     let ledger = WalletLedger::open(store).await?.with_watch([script]);
//!
//!     // Typically driven by a filter engine through `WalletHooks::on_block_match`.
//!     ledger
//!         .apply_block(height, block.block_hash(), block.txdata)
//!         .await?;
//!     println!("{:?}", ledger.balance().await);
//!     Ok(())
//! }
//! ```

/// `tracing` target used by every log line in this crate.
pub const LOG_TARGET: &str = "niebla::ledger";

/// Errors returned by a reconciliation pass.
pub mod error;

/// Wallet callbacks: provide a watchlist and receive matches.
pub mod hooks;

/// Per-subchain orchestrator: match, reconcile, commit.
pub mod ledger;

/// Build match sets from decoded transactions.
pub mod matcher;

/// Matched transactions and match sets.
pub mod matchset;

/// The match reconciler.
pub mod reconcile;

/// Storage interfaces and implementations (in-memory cache, SQLite).
pub mod store;

/// Output state transition table.
pub mod transition;

/// Outpoint states, proposal ids and block positions.
pub mod types;

// Public re-exports
pub use error::ReconcileError;
pub use hooks::WalletHooks;
pub use ledger::{LedgerOptions, WalletLedger};
pub use matchset::BlockMatchSet;
pub use reconcile::{reconcile, PendingChange, ReconciliationResult};
pub use store::{LedgerStore, MemoryOutputStore, OutputStore};
#[cfg(feature = "store-sqlite")]
pub use store::SqliteStore;
pub use types::{BlockPosition, OutputState, ProposalId, ScanTarget};

/// Convenience prelude for end users.
pub mod prelude {
    #[cfg(feature = "store-sqlite")]
    pub use crate::SqliteStore;
    pub use crate::{
        LedgerStore, OutputState, ProposalId, ReconcileError, WalletHooks, WalletLedger,
    };
}
