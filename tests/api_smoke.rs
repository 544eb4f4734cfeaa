use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, BlockHash, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, WPubkeyHash, Witness,
};
use niebla_ledger::prelude::*; // WalletLedger, LedgerStore, WalletHooks, ...
use niebla_ledger::store::{LedgerCommit, StoredOutput};
use niebla_ledger::LedgerOptions;
use std::sync::Mutex;

/// Minimal in-memory LedgerStore for tests (keeps the ledger generic & fast).
#[derive(Default)]
struct MemStore {
    outputs: Mutex<Vec<(OutPoint, StoredOutput)>>,
    proposals: Mutex<Vec<(ProposalId, OutPoint)>>,
    last_scanned: Mutex<u32>,
    tip: Mutex<u32>,
    birth: Mutex<Option<u32>>,
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn load_outputs(&self) -> anyhow::Result<Vec<(OutPoint, StoredOutput)>> {
        Ok(self.outputs.lock().unwrap().clone())
    }
    async fn load_proposals(&self) -> anyhow::Result<Vec<(ProposalId, OutPoint)>> {
        Ok(self.proposals.lock().unwrap().clone())
    }
    async fn save_proposal(&self, proposal: ProposalId, outpoints: &[OutPoint]) -> anyhow::Result<()> {
        let mut p = self.proposals.lock().unwrap();
        p.extend(outpoints.iter().map(|op| (proposal, *op)));
        Ok(())
    }
    async fn commit(&self, commit: LedgerCommit) -> anyhow::Result<()> {
        let mut outputs = self.outputs.lock().unwrap();
        for (op, o) in commit.outputs {
            outputs.retain(|(k, _)| *k != op);
            outputs.push((op, o));
        }
        self.proposals
            .lock()
            .unwrap()
            .retain(|(id, _)| !commit.retired_proposals.contains(id));
        if let Some(h) = commit.last_scanned {
            let mut last = self.last_scanned.lock().unwrap();
            *last = (*last).max(h);
        }
        if let Some(h) = commit.tip {
            let mut tip = self.tip.lock().unwrap();
            *tip = (*tip).max(h);
        }
        Ok(())
    }
    async fn get_last_scanned(&self) -> anyhow::Result<u32> {
        Ok(*self.last_scanned.lock().unwrap())
    }
    async fn get_tip_height(&self) -> anyhow::Result<u32> {
        Ok(*self.tip.lock().unwrap())
    }
    async fn get_birth_height(&self) -> anyhow::Result<Option<u32>> {
        Ok(*self.birth.lock().unwrap())
    }
    async fn set_birth_height(&self, h: u32) -> anyhow::Result<()> {
        *self.birth.lock().unwrap() = Some(h);
        Ok(())
    }
}

fn unrelated_tx() -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([1; 32]), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([2; 20])),
        }],
    }
}

#[tokio::test]
async fn ledger_runs_with_no_hits() -> anyhow::Result<()> {
    let watch = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([7; 20]));
    let ledger = WalletLedger::open(MemStore::default())
        .await?
        .with_watch([watch.clone()]);

    assert_eq!(ledger.watchlist().await?, vec![watch]);

    // Driven through the hooks trait, the way a filter engine would.
    let hash = BlockHash::from_byte_array([5; 32]);
    ledger.on_block_match(5, hash, vec![unrelated_tx()]).await?;

    assert_eq!(ledger.last_scanned().await?, 5);
    assert!(ledger.balance().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn blocks_below_birth_height_are_skipped() -> anyhow::Result<()> {
    let store = MemStore::default();
    store.set_birth_height(100).await?;
    let ledger = WalletLedger::open(store).await?;

    let applied = ledger
        .apply_block(99, BlockHash::all_zeros(), vec![unrelated_tx()])
        .await?;
    assert!(applied.is_none());
    assert_eq!(ledger.last_scanned().await?, 0);

    let applied = ledger
        .apply_block(100, BlockHash::all_zeros(), vec![unrelated_tx()])
        .await?;
    assert!(applied.is_some_and(|a| a.result.changes.is_empty()));
    assert_eq!(ledger.last_scanned().await?, 100);
    Ok(())
}

#[tokio::test]
async fn options_default_to_bitcoin_maturity() -> anyhow::Result<()> {
    let ledger = WalletLedger::open(MemStore::default()).await?;
    assert_eq!(ledger.options().coinbase_maturity, 100);

    let ledger = ledger.with_options(LedgerOptions {
        coinbase_maturity: 10,
    });
    assert_eq!(ledger.options().coinbase_maturity, 10);
    Ok(())
}
