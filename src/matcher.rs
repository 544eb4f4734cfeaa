use std::collections::{BTreeSet, HashSet};

use bitcoin::{OutPoint, ScriptBuf, Transaction};

use crate::matchset::BlockMatchSet;
use crate::store::OutputStore;

/// Pick the wallet-relevant parts of `txs`, in block order.
///
/// An output matches when its script is watched. An input matches when it
/// spends an output `store` knows about, or one matched earlier in `txs`.
/// Transactions with nothing matched are left out.
pub fn match_transactions<I, S>(txs: I, scripts: &HashSet<ScriptBuf>, store: &S) -> BlockMatchSet
where
    I: IntoIterator<Item = Transaction>,
    S: OutputStore + ?Sized,
{
    let mut set = BlockMatchSet::new();
    let mut created: BTreeSet<OutPoint> = BTreeSet::new();

    for tx in txs {
        let txid = tx.compute_txid();

        let inputs: Vec<u32> = tx
            .input
            .iter()
            .enumerate()
            .filter(|(_, txin)| {
                let prev = &txin.previous_output;
                !prev.is_null() && (created.contains(prev) || store.exists(prev))
            })
            .map(|(i, _)| i as u32)
            .collect();

        let outputs: Vec<u32> = tx
            .output
            .iter()
            .enumerate()
            .filter(|(_, out)| scripts.contains(&out.script_pubkey))
            .map(|(i, _)| i as u32)
            .collect();

        if inputs.is_empty() && outputs.is_empty() {
            continue;
        }
        created.extend(outputs.iter().map(|&vout| OutPoint::new(txid, vout)));
        set.insert(tx, inputs, outputs);
    }

    set
}
