//! Fold matched transactions into staged output state changes.
//!
//! A pass runs three steps in a fixed order:
//! 1. scan the match set into created and consumed outpoints,
//! 2. stage every created output,
//! 3. stage every spend, seeing the creations from step 2.
//!
//! Nothing is written anywhere. The caller persists the returned
//! [`ReconciliationResult`] in one transaction, or drops it.
use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{OutPoint, TxOut};

use crate::error::{Invariant, ReconcileError};
use crate::matchset::BlockMatchSet;
use crate::store::OutputStore;
use crate::transition::{evaluate, Transition};
use crate::types::{OutputState, ProposalId, ScanTarget, TargetState};

mod consumed;
mod created;
mod scan;

/// A staged, uncommitted change to one outpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// State to persist.
    pub final_state: OutputState,
    /// State before this pass; `None` only for a first-seen outpoint.
    pub initial_state: Option<OutputState>,
    /// The output value.
    pub output: TxOut,
    /// Payment proposals associated with the outpoint.
    pub proposals: BTreeSet<ProposalId>,
    /// `false` when the outpoint already had the requested state.
    pub changed: bool,
    /// Created by a coinbase transaction in this pass.
    pub generation: bool,
    /// Creation height, when created by this pass in a block.
    pub height: Option<u32>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationResult {
    /// Maturity target the pass ran with.
    pub maturity_target: u32,
    /// Every outpoint the pass touched, at most once each.
    pub changes: BTreeMap<OutPoint, PendingChange>,
    /// Proposals referencing outputs spent in a block.
    pub touched_proposals: BTreeSet<ProposalId>,
}

impl ReconciliationResult {
    fn new(maturity_target: u32) -> Self {
        Self {
            maturity_target,
            changes: BTreeMap::new(),
            touched_proposals: BTreeSet::new(),
        }
    }

    /// Entries that actually change stored state.
    pub fn changed(&self) -> impl Iterator<Item = (&OutPoint, &PendingChange)> {
        self.changes.iter().filter(|(_, c)| c.changed)
    }

    /// The pass changed nothing (e.g. a rescan of an applied block).
    pub fn is_noop(&self) -> bool {
        self.changed().next().is_none()
    }
}

/// State shared by the resolvers of one pass.
pub(crate) struct Pass<'a, S: ?Sized> {
    store: &'a S,
    target: ScanTarget,
    maturity_target: u32,
    result: ReconciliationResult,
}

impl<'a, S: OutputStore + ?Sized> Pass<'a, S> {
    fn new(store: &'a S, target: ScanTarget, maturity_target: u32) -> Self {
        Self {
            store,
            target,
            maturity_target,
            result: ReconciliationResult::new(maturity_target),
        }
    }

    /// Run the transition table and return `(final_state, changed)`.
    fn judge(
        &self,
        outpoint: OutPoint,
        initial: Option<OutputState>,
        requested: TargetState,
    ) -> Result<(OutputState, bool), ReconcileError> {
        match (initial, evaluate(initial, requested)) {
            (Some(from), Transition::Disallowed) => Err(Invariant::DisallowedTransition {
                outpoint,
                from,
                to: requested,
            }
            .into()),
            (Some(current), Transition::Unnecessary) => {
                tracing::trace!(target: crate::LOG_TARGET, "{outpoint} already {current}");
                Ok((current, false))
            }
            (_, verdict) => {
                tracing::debug!(
                    target: crate::LOG_TARGET,
                    "{outpoint}: {} -> {requested} ({verdict:?})",
                    initial.map_or_else(|| "none".to_string(), |s| s.to_string()),
                );
                Ok((requested.into(), true))
            }
        }
    }
}

/// Reconcile a match set against the wallet's current outputs.
///
/// `matches` is annotated in place: every transaction gets its mined
/// position, and every matched input gets the output it spends.
///
/// # Errors
/// Fails on the first impossible transition, duplicate creation,
/// unresolvable spend, invalid matched output, or on a generation output
/// in a mempool pass. No partial result is returned.
pub fn reconcile<S: OutputStore + ?Sized>(
    matches: &mut BlockMatchSet,
    store: &S,
    target: ScanTarget,
    maturity_target: u32,
) -> Result<ReconciliationResult, ReconcileError> {
    let scan = scan::scan(matches, target)?;

    if target.is_mempool() {
        if let Some(outpoint) = scan.generation.iter().next() {
            return Err(ReconcileError::PolicyViolation(*outpoint));
        }
    }

    let mut pass = Pass::new(store, target, maturity_target);
    created::resolve_created(&mut pass, &scan.created, &scan.generation)?;
    consumed::resolve_consumed(&mut pass, matches, &scan.consumed)?;

    let result = pass.result;
    tracing::debug!(
        target: crate::LOG_TARGET,
        "reconciled {} txs: {} created, {} consumed, {} changed",
        matches.len(),
        scan.created.len(),
        scan.consumed.len(),
        result.changed().count(),
    );
    Ok(result)
}
