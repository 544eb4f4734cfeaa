//! Stage spends of wallet outputs.
use std::collections::{btree_map::Entry, BTreeSet};

use bitcoin::TxOut;

use super::scan::Consumed;
use super::{Pass, PendingChange};
use crate::error::{ReconcileError, Unavailable};
use crate::matchset::BlockMatchSet;
use crate::store::OutputStore;
use crate::types::{OutputState, TargetState};

/// Resolve every consumed outpoint in scan order.
///
/// The spent output is looked up in this order: entries already staged by
/// this pass, the store, then sibling transactions of the match set.
pub(crate) fn resolve_consumed<S: OutputStore + ?Sized>(
    pass: &mut Pass<'_, S>,
    matches: &mut BlockMatchSet,
    consumed: &[Consumed],
) -> Result<(), ReconcileError> {
    let mempool = pass.target.is_mempool();
    let requested = if mempool {
        TargetState::UnconfirmedSpend
    } else {
        TargetState::ConfirmedSpend
    };

    for c in consumed {
        let (initial, output) = locate(pass, matches, c)?;
        let (final_state, changed) = pass.judge(c.outpoint, initial, requested)?;

        if let Some(spender) = matches.get_mut(&c.spender) {
            spender.tx.associate_previous_output(c.input, output.clone());
        }

        let proposals = if mempool {
            BTreeSet::new()
        } else {
            pass.store.proposals_for(&c.outpoint)
        };
        pass.result.touched_proposals.extend(proposals.iter().copied());

        match pass.result.changes.entry(c.outpoint) {
            Entry::Occupied(mut e) => {
                let staged = e.get_mut();
                staged.final_state = final_state;
                staged.initial_state = initial;
                staged.changed |= changed;
                staged.proposals.extend(proposals);
            }
            Entry::Vacant(e) => {
                e.insert(PendingChange {
                    final_state,
                    initial_state: initial,
                    output,
                    proposals,
                    changed,
                    generation: false,
                    height: None,
                });
            }
        }
    }

    Ok(())
}

fn locate<S: OutputStore + ?Sized>(
    pass: &Pass<'_, S>,
    matches: &BlockMatchSet,
    c: &Consumed,
) -> Result<(Option<OutputState>, TxOut), ReconcileError> {
    if let Some(staged) = pass.result.changes.get(&c.outpoint) {
        return Ok((Some(staged.final_state), staged.output.clone()));
    }
    if let Some((state, output)) = pass.store.get(&c.outpoint) {
        return Ok((Some(state), output));
    }
    if let Some(output) = matches.sibling_output(&c.outpoint) {
        tracing::debug!(
            target: crate::LOG_TARGET,
            "{} resolved from a sibling transaction",
            c.outpoint
        );
        return Ok((None, output.clone()));
    }

    Err(Unavailable::PreviousOutput {
        outpoint: c.outpoint,
        spender: c.spender,
        input: c.input,
    }
    .into())
}
