#![cfg(feature = "store-sqlite")]

use bitcoin::hashes::Hash;
use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, BlockHash, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, WPubkeyHash, Witness,
};
use niebla_ledger::prelude::*;
use niebla_ledger::store::{LedgerCommit, StoredOutput};

use tempfile::NamedTempFile;

fn script() -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([3; 20]))
}

fn op(n: u8, vout: u32) -> OutPoint {
    OutPoint::new(Txid::from_byte_array([n; 32]), vout)
}

fn stored(state: OutputState, sats: u64, height: Option<u32>, generation: bool) -> StoredOutput {
    StoredOutput {
        state,
        output: TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: script(),
        },
        height,
        generation,
    }
}

#[tokio::test]
async fn sqlite_store_roundtrips() -> anyhow::Result<()> {
    // temp file for each run
    let tmp = NamedTempFile::new()?;
    let store = SqliteStore::new(tmp.path())?;

    // Defaults on a fresh DB
    assert!(store.load_outputs().await?.is_empty());
    assert!(store.load_proposals().await?.is_empty());
    assert_eq!(store.get_last_scanned().await?, 0, "fresh DB starts at last_scanned=0");
    assert!(
        store.get_birth_height().await?.is_none(),
        "birth height is optional and unset by default"
    );

    let coinbase = stored(OutputState::Immature, 50_000, Some(1_000), true);
    let pending = stored(OutputState::UnconfirmedNew, 1_234, None, false);
    store
        .commit(LedgerCommit {
            outputs: vec![(op(1, 0), coinbase.clone()), (op(2, 3), pending.clone())],
            last_scanned: Some(1_000),
            ..Default::default()
        })
        .await?;

    let mut outputs = store.load_outputs().await?;
    outputs.sort_by_key(|(o, _)| *o);
    assert_eq!(outputs, vec![(op(1, 0), coinbase.clone()), (op(2, 3), pending)]);
    assert_eq!(store.get_last_scanned().await?, 1_000);

    // upsert replaces the stored state in place
    let matured = StoredOutput {
        state: OutputState::ConfirmedNew,
        ..coinbase
    };
    store
        .commit(LedgerCommit {
            outputs: vec![(op(1, 0), matured.clone())],
            ..Default::default()
        })
        .await?;
    let outputs = store.load_outputs().await?;
    assert_eq!(outputs.len(), 2);
    assert!(outputs.contains(&(op(1, 0), matured)));

    store.set_birth_height(200_000).await?;
    assert_eq!(store.get_birth_height().await?, Some(200_000));
    Ok(())
}

#[tokio::test]
async fn last_scanned_never_moves_backwards() -> anyhow::Result<()> {
    let tmp = NamedTempFile::new()?;
    let store = SqliteStore::new(tmp.path())?;

    for h in [10, 30, 20] {
        store
            .commit(LedgerCommit {
                last_scanned: Some(h),
                ..Default::default()
            })
            .await?;
    }
    assert_eq!(store.get_last_scanned().await?, 30);

    assert_eq!(store.get_tip_height().await?, 0);
    for h in [130, 101] {
        store
            .commit(LedgerCommit {
                tip: Some(h),
                ..Default::default()
            })
            .await?;
    }
    assert_eq!(store.get_tip_height().await?, 130);
    assert_eq!(store.get_last_scanned().await?, 30);
    Ok(())
}

#[tokio::test]
async fn corrupt_heights_are_errors() -> anyhow::Result<()> {
    let tmp = NamedTempFile::new()?;
    let store = SqliteStore::new(tmp.path())?;

    let conn = rusqlite::Connection::open(tmp.path())?;
    conn.execute(
        "INSERT INTO state(key, value) VALUES('birth_height', 'not-a-height')",
        [],
    )?;
    let err = store.get_birth_height().await.unwrap_err();
    assert!(format!("{err:#}").contains("birth_height"));
    Ok(())
}

#[tokio::test]
async fn proposals_are_saved_and_retired() -> anyhow::Result<()> {
    let tmp = NamedTempFile::new()?;
    let store = SqliteStore::new(tmp.path())?;

    let keep = ProposalId([1; 32]);
    let drop = ProposalId([2; 32]);
    store.save_proposal(keep, &[op(1, 0), op(1, 1)]).await?;
    store.save_proposal(drop, &[op(2, 0)]).await?;
    // saving twice is harmless
    store.save_proposal(drop, &[op(2, 0)]).await?;
    assert_eq!(store.load_proposals().await?.len(), 3);

    store
        .commit(LedgerCommit {
            retired_proposals: vec![drop],
            ..Default::default()
        })
        .await?;

    let mut left = store.load_proposals().await?;
    left.sort_by_key(|(_, o)| *o);
    assert_eq!(left, vec![(keep, op(1, 0)), (keep, op(1, 1))]);
    Ok(())
}

#[tokio::test]
async fn ledger_state_survives_reopen() -> anyhow::Result<()> {
    let tmp = NamedTempFile::new()?;

    let fund = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: op(9, 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(42_000),
            script_pubkey: script(),
        }],
    };
    let coin = OutPoint::new(fund.compute_txid(), 0);
    let proposal = ProposalId([7; 32]);

    {
        let ledger = WalletLedger::open(SqliteStore::new(tmp.path())?)
            .await?
            .with_watch([script()]);
        ledger
            .apply_block(500, BlockHash::all_zeros(), vec![fund])
            .await?;
        ledger.reserve(proposal, &[coin]).await?;
    }

    let ledger = WalletLedger::open(SqliteStore::new(tmp.path())?).await?;
    assert_eq!(ledger.state_of(&coin).await, Some(OutputState::ConfirmedNew));
    assert_eq!(ledger.last_scanned().await?, 500);
    assert_eq!(
        ledger.balance().await.get(&OutputState::ConfirmedNew),
        Some(&Amount::from_sat(42_000))
    );
    assert!(ledger.reserve(ProposalId([8; 32]), &[coin]).await.is_err());
    Ok(())
}
