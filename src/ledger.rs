//! Per-subchain wallet ledger.
//!
//! Glues the pieces together for one wallet subchain:
//! 1) pick the wallet-relevant parts of a block or mempool transaction,
//! 2) reconcile them against the in-memory output cache,
//! 3) commit the result durably, then fold it into the cache.
//!
//! Passes are serialized by an async mutex, so a ledger never runs two
//! reconciliations at once. Blocks are expected in chain order; replaying
//! an already-applied block is allowed and changes nothing.
use std::collections::{BTreeMap, HashSet};

use anyhow::Context;
use async_trait::async_trait;
use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Transaction};
use tokio::sync::Mutex;

use crate::{
    hooks::WalletHooks,
    matcher::match_transactions,
    matchset::MatchedTransaction,
    reconcile::{reconcile, ReconciliationResult},
    store::{LedgerCommit, LedgerStore, MemoryOutputStore, OutputStore},
    types::{BlockPosition, OutputState, ProposalId, ScanTarget},
    LOG_TARGET,
};

/// Bitcoin coinbase maturity, in blocks.
pub const COINBASE_MATURITY: u32 = 100;

/// Tunables for a [`WalletLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOptions {
    /// Blocks a generation output must wait before it is spendable.
    pub coinbase_maturity: u32,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            coinbase_maturity: COINBASE_MATURITY,
        }
    }
}

/// What one applied pass did.
#[derive(Debug, Clone)]
pub struct Applied {
    /// The reconciliation outcome that was committed.
    pub result: ReconciliationResult,
    /// Matched transactions, annotated with mined position and spent outputs.
    pub transactions: Vec<MatchedTransaction>,
    /// Proposals deleted because all their outputs are now spent.
    pub retired_proposals: Vec<ProposalId>,
}

/// Wallet ledger. `S` = durable store.
pub struct WalletLedger<S> {
    store: S,
    cache: Mutex<MemoryOutputStore>,
    watch: HashSet<ScriptBuf>,
    options: LedgerOptions,
}

impl<S> WalletLedger<S>
where
    S: LedgerStore + 'static,
{
    /// Load everything `store` holds into a fresh cache.
    pub async fn open(store: S) -> anyhow::Result<Self> {
        let outputs = store.load_outputs().await.context("load outputs")?;
        let proposals = store.load_proposals().await.context("load proposals")?;
        let last_scanned = store.get_last_scanned().await?;
        let tip = store.get_tip_height().await.context("load tip height")?;

        let cache = MemoryOutputStore::load(outputs, proposals, last_scanned.max(tip));
        tracing::info!(
            target: LOG_TARGET,
            "opened ledger: {} outputs, last scanned {last_scanned}, tip {tip}",
            cache.len()
        );

        Ok(Self {
            store,
            cache: Mutex::new(cache),
            watch: HashSet::new(),
            options: LedgerOptions::default(),
        })
    }

    /// Replace the ledger options.
    pub fn with_options(mut self, options: LedgerOptions) -> Self {
        self.options = options;
        self
    }

    /// Watch `scripts` for incoming outputs.
    pub fn with_watch(mut self, scripts: impl IntoIterator<Item = ScriptBuf>) -> Self {
        self.watch.extend(scripts);
        self
    }

    /// Current options.
    pub fn options(&self) -> &LedgerOptions {
        &self.options
    }

    /// Fold the transactions of the block `(height, hash)` into the ledger.
    ///
    /// Returns `None` when the block is below the wallet birth height.
    ///
    /// # Errors
    /// Returns an error if reconciliation rejects the block or the store
    /// cannot persist it. Neither the store nor the cache is changed then.
    pub async fn apply_block(
        &self,
        height: u32,
        hash: BlockHash,
        txs: Vec<Transaction>,
    ) -> anyhow::Result<Option<Applied>> {
        let mut cache = self.cache.lock().await;

        if let Some(birth) = self.store.get_birth_height().await? {
            if height < birth {
                tracing::debug!(target: LOG_TARGET, "skip block {hash} @{height}: below birth {birth}");
                return Ok(None);
            }
        }
        let last_scanned = self.store.get_last_scanned().await?;
        if height <= last_scanned && last_scanned > 0 {
            tracing::warn!(
                target: LOG_TARGET,
                "rescanning block {hash} @{height} (last scanned {last_scanned})"
            );
        }

        let position = BlockPosition::new(height, hash);
        let mut matches = match_transactions(txs, &self.watch, &*cache);
        let result = reconcile(
            &mut matches,
            &*cache,
            ScanTarget::Block(position),
            self.options.coinbase_maturity,
        )
        .with_context(|| format!("reconcile block {hash} @height {height}"))
        .inspect_err(|e| tracing::error!(target: LOG_TARGET, "{e:#}"))?;

        let commit = cache.prepare(&result, Some(position));
        self.persist(&mut cache, commit.clone())
            .await
            .with_context(|| format!("commit block {hash} @height {height}"))?;

        tracing::info!(
            target: LOG_TARGET,
            "applied block {hash} @{height}: {} matched txs, {} changes, {} proposals retired",
            matches.len(),
            result.changed().count(),
            commit.retired_proposals.len()
        );

        Ok(Some(Applied {
            result,
            transactions: matches.into_transactions(),
            retired_proposals: commit.retired_proposals,
        }))
    }

    /// Fold one mempool transaction into the ledger.
    ///
    /// # Errors
    /// Same as [`Self::apply_block`]; a coinbase paying the wallet is rejected.
    pub async fn apply_mempool(&self, tx: Transaction) -> anyhow::Result<Applied> {
        let mut cache = self.cache.lock().await;
        let txid = tx.compute_txid();

        let mut matches = match_transactions([tx], &self.watch, &*cache);
        let result = reconcile(
            &mut matches,
            &*cache,
            ScanTarget::Mempool,
            self.options.coinbase_maturity,
        )
        .with_context(|| format!("reconcile mempool tx {txid}"))?;

        let commit = cache.prepare(&result, None);
        self.persist(&mut cache, commit)
            .await
            .with_context(|| format!("commit mempool tx {txid}"))?;

        Ok(Applied {
            result,
            transactions: matches.into_transactions(),
            retired_proposals: vec![],
        })
    }

    /// The best chain reached `height`: mature generation outputs that are
    /// now old enough. Returns the matured outpoints.
    ///
    /// The tip is persisted with the matured outputs, so a reopened ledger
    /// judges maturity against the same height.
    pub async fn advance_tip(&self, height: u32) -> anyhow::Result<Vec<OutPoint>> {
        let mut cache = self.cache.lock().await;
        let commit = cache.prepare_tip(height, self.options.coinbase_maturity);
        let matured: Vec<OutPoint> = commit.outputs.iter().map(|(op, _)| *op).collect();
        self.persist(&mut cache, commit)
            .await
            .with_context(|| format!("commit tip @height {height}"))?;
        Ok(matured)
    }

    /// Reserve `outpoints` for the payment proposal `proposal`.
    pub async fn reserve(&self, proposal: ProposalId, outpoints: &[OutPoint]) -> anyhow::Result<()> {
        let mut cache = self.cache.lock().await;
        cache.check_reservation(&proposal, outpoints)?;
        self.store
            .save_proposal(proposal, outpoints)
            .await
            .with_context(|| format!("save proposal {proposal}"))?;
        cache.reserve(proposal, outpoints);
        Ok(())
    }

    /// Drop `proposal` and release its outputs.
    pub async fn cancel(&self, proposal: ProposalId) -> anyhow::Result<()> {
        let mut cache = self.cache.lock().await;
        let commit = LedgerCommit {
            retired_proposals: vec![proposal],
            ..Default::default()
        };
        self.persist(&mut cache, commit).await
    }

    /// Current state of `outpoint`.
    pub async fn state_of(&self, outpoint: &OutPoint) -> Option<OutputState> {
        self.cache.lock().await.get(outpoint).map(|(state, _)| state)
    }

    /// Total value per state.
    pub async fn balance(&self) -> BTreeMap<OutputState, Amount> {
        self.cache.lock().await.balance()
    }

    /// Last block height folded into the ledger.
    pub async fn last_scanned(&self) -> anyhow::Result<u32> {
        self.store.get_last_scanned().await
    }

    async fn persist(&self, cache: &mut MemoryOutputStore, commit: LedgerCommit) -> anyhow::Result<()> {
        if commit.is_empty() {
            return Ok(());
        }
        self.store.commit(commit.clone()).await?;
        cache.apply(&commit);
        Ok(())
    }
}

#[async_trait]
impl<S> WalletHooks for WalletLedger<S>
where
    S: LedgerStore + 'static,
{
    async fn watchlist(&self) -> anyhow::Result<Vec<ScriptBuf>> {
        Ok(self.watch.iter().cloned().collect())
    }

    async fn on_block_match(
        &self,
        height: u32,
        block: BlockHash,
        txs: Vec<Transaction>,
    ) -> anyhow::Result<()> {
        self.apply_block(height, block, txs).await?;
        Ok(())
    }

    async fn on_mempool_transaction(&self, tx: Transaction) -> anyhow::Result<()> {
        self.apply_mempool(tx).await?;
        Ok(())
    }
}
