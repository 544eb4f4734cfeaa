//! In-memory output cache the reconciler reads from.
//!
//! Mirrors the durable [`LedgerStore`](super::LedgerStore): the ledger
//! builds one [`LedgerCommit`] per pass, persists it, then applies the same
//! commit here, so both sides stay in lockstep.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::bail;
use bitcoin::{Amount, OutPoint, TxOut};

use crate::reconcile::ReconciliationResult;
use crate::store::{LedgerCommit, OutputStore, StoredOutput};
use crate::types::{is_mature, BlockPosition, OutputState, ProposalId};

/// Wallet outputs and proposal reservations held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutputStore {
    outputs: HashMap<OutPoint, StoredOutput>,
    proposals: BTreeMap<ProposalId, BTreeSet<OutPoint>>,
    reserved_by: HashMap<OutPoint, BTreeSet<ProposalId>>,
    best_height: u32,
}

impl MemoryOutputStore {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a cache from what a [`LedgerStore`](super::LedgerStore) loaded.
    pub fn load(
        outputs: impl IntoIterator<Item = (OutPoint, StoredOutput)>,
        proposals: impl IntoIterator<Item = (ProposalId, OutPoint)>,
        best_height: u32,
    ) -> Self {
        let mut s = Self {
            outputs: outputs.into_iter().collect(),
            best_height,
            ..Default::default()
        };
        for (id, outpoint) in proposals {
            s.link(id, outpoint);
        }
        s
    }

    /// Stored record for `outpoint`.
    pub fn output(&self, outpoint: &OutPoint) -> Option<&StoredOutput> {
        self.outputs.get(outpoint)
    }

    /// Number of known outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// No known outputs.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Outpoints reserved by `proposal`.
    pub fn proposal(&self, proposal: &ProposalId) -> Option<&BTreeSet<OutPoint>> {
        self.proposals.get(proposal)
    }

    /// Total value per state.
    pub fn balance(&self) -> BTreeMap<OutputState, Amount> {
        let mut sats: BTreeMap<OutputState, u64> = BTreeMap::new();
        for o in self.outputs.values() {
            let e = sats.entry(o.state).or_default();
            *e = e.saturating_add(o.output.value.to_sat());
        }
        sats.into_iter()
            .map(|(state, v)| (state, Amount::from_sat(v)))
            .collect()
    }

    /// Turn a reconciliation result into a commit.
    ///
    /// For a block pass this also matures generation outputs that reach
    /// `maturity_target` at the block's height, advances the last-scanned
    /// height, and retires touched proposals whose outputs are all spent
    /// in a block.
    pub fn prepare(
        &self,
        result: &ReconciliationResult,
        position: Option<BlockPosition>,
    ) -> LedgerCommit {
        let mut staged: BTreeMap<OutPoint, StoredOutput> = BTreeMap::new();
        for (outpoint, change) in result.changed() {
            let prior = self.outputs.get(outpoint);
            staged.insert(
                *outpoint,
                StoredOutput {
                    state: change.final_state,
                    output: change.output.clone(),
                    height: change.height.or(prior.and_then(|p| p.height)),
                    generation: change.generation || prior.is_some_and(|p| p.generation),
                },
            );
        }

        let best = position.map_or(self.best_height, |p| p.height.max(self.best_height));
        self.sweep_maturity(&mut staged, best, result.maturity_target);

        let retired_proposals = result
            .touched_proposals
            .iter()
            .copied()
            .filter(|id| self.fully_spent(id, &staged))
            .collect();

        LedgerCommit {
            outputs: staged.into_iter().collect(),
            retired_proposals,
            last_scanned: position.map(|p| p.height),
            tip: None,
        }
    }

    /// Commit that only matures outputs for a new chain tip at `height`.
    pub fn prepare_tip(&self, height: u32, maturity_target: u32) -> LedgerCommit {
        let mut staged = BTreeMap::new();
        self.sweep_maturity(&mut staged, height.max(self.best_height), maturity_target);
        LedgerCommit {
            outputs: staged.into_iter().collect(),
            tip: Some(height),
            ..Default::default()
        }
    }

    /// Apply a commit that has been persisted.
    pub fn apply(&mut self, commit: &LedgerCommit) {
        for (outpoint, output) in &commit.outputs {
            self.outputs.insert(*outpoint, output.clone());
        }
        for id in &commit.retired_proposals {
            self.release(id);
        }
        for h in [commit.last_scanned, commit.tip].into_iter().flatten() {
            self.best_height = self.best_height.max(h);
        }
    }

    /// Check that `outpoints` may be reserved by `proposal`: every one is
    /// known, spendable and not held by another proposal.
    pub fn check_reservation(
        &self,
        proposal: &ProposalId,
        outpoints: &[OutPoint],
    ) -> anyhow::Result<()> {
        if outpoints.is_empty() {
            bail!("proposal {proposal} reserves no outputs");
        }
        for outpoint in outpoints {
            let Some(o) = self.outputs.get(outpoint) else {
                bail!("proposal {proposal}: unknown output {outpoint}");
            };
            if !matches!(o.state, OutputState::ConfirmedNew | OutputState::UnconfirmedNew) {
                bail!("proposal {proposal}: output {outpoint} is {}", o.state);
            }
            if let Some(holders) = self.reserved_by.get(outpoint) {
                if holders.iter().any(|h| h != proposal) {
                    bail!("proposal {proposal}: output {outpoint} already reserved");
                }
            }
        }
        Ok(())
    }

    /// Record a reservation checked with [`Self::check_reservation`].
    pub fn reserve(&mut self, proposal: ProposalId, outpoints: &[OutPoint]) {
        for outpoint in outpoints {
            self.link(proposal, *outpoint);
        }
    }

    /// Drop a proposal and all its reservations.
    pub fn release(&mut self, proposal: &ProposalId) {
        let Some(outpoints) = self.proposals.remove(proposal) else {
            return;
        };
        for outpoint in outpoints {
            if let Some(holders) = self.reserved_by.get_mut(&outpoint) {
                holders.remove(proposal);
                if holders.is_empty() {
                    self.reserved_by.remove(&outpoint);
                }
            }
        }
    }

    fn link(&mut self, proposal: ProposalId, outpoint: OutPoint) {
        self.proposals.entry(proposal).or_default().insert(outpoint);
        self.reserved_by.entry(outpoint).or_default().insert(proposal);
    }

    fn sweep_maturity(
        &self,
        staged: &mut BTreeMap<OutPoint, StoredOutput>,
        best: u32,
        maturity_target: u32,
    ) {
        let ripe = |o: &StoredOutput| {
            o.state == OutputState::Immature
                && o.height.is_some_and(|h| is_mature(h, best, maturity_target))
        };

        for o in staged.values_mut() {
            if ripe(o) {
                o.state = OutputState::ConfirmedNew;
            }
        }
        for (outpoint, o) in &self.outputs {
            if !staged.contains_key(outpoint) && ripe(o) {
                tracing::debug!(target: crate::LOG_TARGET, "{outpoint} matured at {best}");
                staged.insert(
                    *outpoint,
                    StoredOutput {
                        state: OutputState::ConfirmedNew,
                        ..o.clone()
                    },
                );
            }
        }
    }

    fn fully_spent(&self, proposal: &ProposalId, staged: &BTreeMap<OutPoint, StoredOutput>) -> bool {
        self.proposals.get(proposal).is_some_and(|outpoints| {
            outpoints.iter().all(|op| {
                staged
                    .get(op)
                    .or_else(|| self.outputs.get(op))
                    .is_some_and(|o| o.state == OutputState::ConfirmedSpend)
            })
        })
    }
}

impl OutputStore for MemoryOutputStore {
    fn get(&self, outpoint: &OutPoint) -> Option<(OutputState, TxOut)> {
        self.outputs
            .get(outpoint)
            .map(|o| (o.state, o.output.clone()))
    }

    fn proposals_for(&self, outpoint: &OutPoint) -> BTreeSet<ProposalId> {
        self.reserved_by.get(outpoint).cloned().unwrap_or_default()
    }

    fn best_height(&self) -> u32 {
        self.best_height
    }

    fn exists(&self, outpoint: &OutPoint) -> bool {
        self.outputs.contains_key(outpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchset::BlockMatchSet;
    use crate::reconcile::reconcile;
    use crate::types::ScanTarget;
    use bitcoin::{
        absolute::LockTime, hashes::Hash, transaction::Version, BlockHash, ScriptBuf, Sequence,
        Transaction, TxIn, Txid, Witness,
    };

    fn stored(state: OutputState, sat: u64, height: Option<u32>, generation: bool) -> StoredOutput {
        StoredOutput {
            state,
            output: TxOut {
                value: Amount::from_sat(sat),
                script_pubkey: ScriptBuf::new(),
            },
            height,
            generation,
        }
    }

    fn op(n: u8) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([n; 32]), 0)
    }

    fn at(height: u32) -> BlockPosition {
        BlockPosition::new(height, BlockHash::all_zeros())
    }

    fn spend(prev: OutPoint) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: prev,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn tip_advance_matures_generation_outputs() {
        let store = MemoryOutputStore::load(
            [
                (op(1), stored(OutputState::Immature, 50, Some(1000), true)),
                (op(2), stored(OutputState::Immature, 50, Some(1050), true)),
                (op(3), stored(OutputState::ConfirmedNew, 10, Some(900), false)),
            ],
            [],
            1000,
        );

        let commit = store.prepare_tip(1099, 100);
        assert!(commit.outputs.is_empty());
        assert_eq!(commit.tip, Some(1099));

        let commit = store.prepare_tip(1100, 100);
        assert_eq!(commit.outputs.len(), 1);
        assert_eq!(commit.outputs[0].0, op(1));
        assert_eq!(commit.outputs[0].1.state, OutputState::ConfirmedNew);
        assert!(commit.outputs[0].1.generation);
    }

    #[test]
    fn proposals_retire_once_every_output_is_spent() {
        let id = ProposalId([9; 32]);
        let mut store = MemoryOutputStore::load(
            [
                (op(1), stored(OutputState::ConfirmedNew, 500, Some(10), false)),
                (op(2), stored(OutputState::ConfirmedNew, 700, Some(11), false)),
            ],
            [],
            20,
        );
        store.check_reservation(&id, &[op(1), op(2)]).unwrap();
        store.reserve(id, &[op(1), op(2)]);
        assert!(store
            .check_reservation(&ProposalId([8; 32]), &[op(2)])
            .is_err());

        let mut first = BlockMatchSet::new();
        first.insert(spend(op(1)), vec![0], vec![]);
        let result = reconcile(&mut first, &store, ScanTarget::Block(at(21)), 100).unwrap();
        assert_eq!(result.touched_proposals, BTreeSet::from([id]));
        let commit = store.prepare(&result, Some(at(21)));
        assert!(commit.retired_proposals.is_empty());
        store.apply(&commit);
        assert_eq!(store.best_height(), 21);

        let mut second = BlockMatchSet::new();
        second.insert(spend(op(2)), vec![0], vec![]);
        let result = reconcile(&mut second, &store, ScanTarget::Block(at(22)), 100).unwrap();
        let commit = store.prepare(&result, Some(at(22)));
        assert_eq!(commit.retired_proposals, vec![id]);
        store.apply(&commit);
        assert!(store.proposal(&id).is_none());
        assert!(store.proposals_for(&op(2)).is_empty());
    }

    #[test]
    fn reservation_rules() {
        let id = ProposalId([1; 32]);
        let store = MemoryOutputStore::load(
            [
                (op(1), stored(OutputState::ConfirmedSpend, 5, Some(1), false)),
                (op(2), stored(OutputState::Immature, 5, Some(1), true)),
            ],
            [],
            1,
        );
        assert!(store.check_reservation(&id, &[]).is_err());
        assert!(store.check_reservation(&id, &[op(1)]).is_err());
        assert!(store.check_reservation(&id, &[op(2)]).is_err());
        assert!(store.check_reservation(&id, &[op(3)]).is_err());
    }

    #[test]
    fn balance_sums_per_state() {
        let store = MemoryOutputStore::load(
            [
                (op(1), stored(OutputState::ConfirmedNew, 500, Some(1), false)),
                (op(2), stored(OutputState::ConfirmedNew, 700, Some(2), false)),
                (op(3), stored(OutputState::UnconfirmedNew, 100, None, false)),
            ],
            [],
            2,
        );
        let b = store.balance();
        assert_eq!(b[&OutputState::ConfirmedNew], Amount::from_sat(1_200));
        assert_eq!(b[&OutputState::UnconfirmedNew], Amount::from_sat(100));
        assert!(!b.contains_key(&OutputState::Immature));
    }
}
