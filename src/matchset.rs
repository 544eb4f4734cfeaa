//! Transactions handed to the reconciler, and which of their inputs and
//! outputs matched the wallet.
use std::collections::{btree_map, BTreeMap};

use bitcoin::{Amount, OutPoint, Transaction, TxIn, TxOut, Txid};

use crate::error::OutputDefect;
use crate::types::BlockPosition;

/// A transaction plus the metadata a reconciliation pass attaches to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedTransaction {
    tx: Transaction,
    txid: Txid,
    mined: Option<BlockPosition>,
    previous_outputs: BTreeMap<u32, TxOut>,
}

impl MatchedTransaction {
    /// Wrap a decoded transaction.
    pub fn new(tx: Transaction) -> Self {
        let txid = tx.compute_txid();
        Self {
            tx,
            txid,
            mined: None,
            previous_outputs: BTreeMap::new(),
        }
    }

    /// Transaction id.
    pub fn txid(&self) -> Txid {
        self.txid
    }

    /// The underlying transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Transaction inputs.
    pub fn inputs(&self) -> &[TxIn] {
        &self.tx.input
    }

    /// Transaction outputs.
    pub fn outputs(&self) -> &[TxOut] {
        &self.tx.output
    }

    /// Coinbase (block reward) transaction.
    pub fn is_generation(&self) -> bool {
        self.tx.is_coinbase()
    }

    /// Outpoint consumed by input `input`, if that input exists.
    pub fn previous_outpoint(&self, input: u32) -> Option<OutPoint> {
        self.tx
            .input
            .get(input as usize)
            .map(|txin| txin.previous_output)
    }

    /// Output `index`, checked for basic validity.
    pub fn output(&self, index: u32) -> Result<&TxOut, OutputDefect> {
        let out = self
            .tx
            .output
            .get(index as usize)
            .ok_or(OutputDefect::OutOfRange)?;
        if out.value > Amount::MAX_MONEY {
            return Err(OutputDefect::ValueOutOfRange);
        }
        Ok(out)
    }

    /// First output failing [`MatchedTransaction::output`], with its index.
    pub fn invalid_output(&self) -> Option<(u32, OutputDefect)> {
        (0..self.tx.output.len() as u32).find_map(|i| self.output(i).err().map(|d| (i, d)))
    }

    /// Has outputs, and all of them pass [`MatchedTransaction::output`].
    pub fn is_valid(&self) -> bool {
        !self.tx.output.is_empty() && self.invalid_output().is_none()
    }

    /// Where the transaction was mined; `None` while it is in the mempool.
    pub fn mined_position(&self) -> Option<BlockPosition> {
        self.mined
    }

    /// Record where the transaction was mined.
    pub fn set_mined_position(&mut self, position: Option<BlockPosition>) {
        self.mined = position;
    }

    /// Attach the output spent by input `input`, so signature checks and
    /// fee computation do not have to look it up again.
    pub fn associate_previous_output(&mut self, input: u32, output: TxOut) {
        self.previous_outputs.insert(input, output);
    }

    /// Output spent by input `input`, when a pass has resolved it.
    pub fn previous_output(&self, input: u32) -> Option<&TxOut> {
        self.previous_outputs.get(&input)
    }

    /// Unwrap the transaction.
    pub fn into_transaction(self) -> Transaction {
        self.tx
    }
}

/// The matched parts of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMatches {
    /// Indices of inputs spending wallet outputs.
    pub inputs: Vec<u32>,
    /// Indices of outputs paying the wallet.
    pub outputs: Vec<u32>,
    /// The transaction itself.
    pub tx: MatchedTransaction,
}

/// Matched transactions of one block (or one mempool transaction), keyed by txid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockMatchSet {
    entries: BTreeMap<Txid, TxMatches>,
}

impl BlockMatchSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction with its matched input and output indices.
    /// Replaces any earlier entry for the same txid.
    pub fn insert(&mut self, tx: Transaction, inputs: Vec<u32>, outputs: Vec<u32>) -> Txid {
        let tx = MatchedTransaction::new(tx);
        let txid = tx.txid();
        self.entries.insert(txid, TxMatches { inputs, outputs, tx });
        txid
    }

    /// Entry for `txid`.
    pub fn get(&self, txid: &Txid) -> Option<&TxMatches> {
        self.entries.get(txid)
    }

    /// Mutable entry for `txid`.
    pub fn get_mut(&mut self, txid: &Txid) -> Option<&mut TxMatches> {
        self.entries.get_mut(txid)
    }

    /// Output `outpoint.vout` of a transaction in this set, if present.
    pub fn sibling_output(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.entries
            .get(&outpoint.txid)
            .and_then(|m| m.tx.outputs().get(outpoint.vout as usize))
    }

    /// Iterate in txid order.
    pub fn iter(&self) -> btree_map::Iter<'_, Txid, TxMatches> {
        self.entries.iter()
    }

    /// Iterate mutably in txid order.
    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, Txid, TxMatches> {
        self.entries.iter_mut()
    }

    /// Number of matched transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No matched transactions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the match bookkeeping and keep the annotated transactions.
    pub fn into_transactions(self) -> Vec<MatchedTransaction> {
        self.entries.into_values().map(|m| m.tx).collect()
    }
}
