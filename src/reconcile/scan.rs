//! First walk over a match set: split it into created and consumed outpoints.
use std::collections::BTreeSet;

use bitcoin::{OutPoint, TxOut, Txid};

use crate::error::{OutputDefect, ReconcileError, Unavailable};
use crate::matchset::BlockMatchSet;
use crate::types::ScanTarget;

/// An output a matched transaction creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Created {
    pub outpoint: OutPoint,
    pub output: TxOut,
}

/// A wallet output a matched input spends, not resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Consumed {
    pub outpoint: OutPoint,
    pub spender: Txid,
    pub input: u32,
}

/// Scanner output, in match-set order.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    pub created: Vec<Created>,
    pub consumed: Vec<Consumed>,
    /// Created outpoints owned by a coinbase transaction.
    pub generation: BTreeSet<OutPoint>,
}

/// Walk every matched transaction once.
///
/// Stamps each transaction with the pass's block position (`None` for the
/// mempool). A transaction with matched outputs must be valid as a whole;
/// the first defective output is reported. Does not look at any store.
pub(crate) fn scan(matches: &mut BlockMatchSet, target: ScanTarget) -> Result<Scan, ReconcileError> {
    let mut out = Scan::default();

    for (txid, m) in matches.iter_mut() {
        let txid = *txid;
        m.tx.set_mined_position(target.position());

        for &input in &m.inputs {
            let outpoint = m
                .tx
                .previous_outpoint(input)
                .ok_or(Unavailable::Input { txid, index: input })?;
            out.consumed.push(Consumed {
                outpoint,
                spender: txid,
                input,
            });
        }

        if !m.outputs.is_empty() && !m.tx.is_valid() {
            let (index, defect) = m
                .tx
                .invalid_output()
                .unwrap_or((m.outputs[0], OutputDefect::OutOfRange));
            return Err(ReconcileError::InvalidOutput {
                txid,
                index,
                defect,
            });
        }

        let generation = m.tx.is_generation();
        for &index in &m.outputs {
            let output = m
                .tx
                .output(index)
                .map_err(|defect| ReconcileError::InvalidOutput {
                    txid,
                    index,
                    defect,
                })?;
            let outpoint = OutPoint::new(txid, index);
            if generation {
                out.generation.insert(outpoint);
            }
            out.created.push(Created {
                outpoint,
                output: output.clone(),
            });
        }
    }

    Ok(out)
}
