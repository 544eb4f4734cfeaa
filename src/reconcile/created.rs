//! Stage newly created outputs.
use std::collections::BTreeSet;

use bitcoin::OutPoint;

use super::scan::Created;
use super::{Pass, PendingChange};
use crate::error::{Invariant, ReconcileError};
use crate::store::OutputStore;
use crate::types::{is_mature, ScanTarget, TargetState};

/// Resolve every created outpoint in scan order.
///
/// Must run before consumed outputs are resolved so a spend later in the
/// same block finds the creation staged.
pub(crate) fn resolve_created<S: OutputStore + ?Sized>(
    pass: &mut Pass<'_, S>,
    created: &[Created],
    generation: &BTreeSet<OutPoint>,
) -> Result<(), ReconcileError> {
    for c in created {
        if pass.result.changes.contains_key(&c.outpoint) {
            return Err(Invariant::DuplicateCreation(c.outpoint).into());
        }

        let is_generation = generation.contains(&c.outpoint);
        let requested = target_for(pass, is_generation);
        let initial = pass.store.get(&c.outpoint).map(|(state, _)| state);
        let (final_state, changed) = pass.judge(c.outpoint, initial, requested)?;

        let proposals = if pass.target.is_mempool() {
            BTreeSet::new()
        } else {
            pass.store.proposals_for(&c.outpoint)
        };

        pass.result.changes.insert(
            c.outpoint,
            PendingChange {
                final_state,
                initial_state: initial,
                output: c.output.clone(),
                proposals,
                changed,
                generation: is_generation,
                height: pass.target.position().map(|p| p.height),
            },
        );
    }

    Ok(())
}

fn target_for<S: OutputStore + ?Sized>(pass: &Pass<'_, S>, is_generation: bool) -> TargetState {
    match pass.target {
        ScanTarget::Block(pos) if is_generation => {
            if is_mature(pos.height, pass.store.best_height(), pass.maturity_target) {
                TargetState::ConfirmedNew
            } else {
                TargetState::Immature
            }
        }
        ScanTarget::Block(_) => TargetState::ConfirmedNew,
        // generation outputs never reach here in a mempool pass
        ScanTarget::Mempool => TargetState::UnconfirmedNew,
    }
}
