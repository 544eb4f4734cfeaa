//! Output state transition table.
//!
//! Pure and total: every `(current, requested)` pair maps to exactly one
//! verdict, with no side effects.
use crate::types::{OutputState, TargetState};

/// Verdict for moving an output into a requested state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No prior state exists; the output is seen for the first time.
    Null,
    /// The move is legal and changes the output.
    Allowed,
    /// The output already satisfies the request.
    Unnecessary,
    /// The move is impossible; the pass must abort.
    Disallowed,
}

/// Look up the verdict for moving an output in `initial` to `requested`.
///
/// Never returns [`Transition::Null`]; see [`evaluate`] for the variant
/// that accepts a missing prior state.
pub fn check_transition(initial: OutputState, requested: TargetState) -> Transition {
    use OutputState as S;
    use Transition::*;

    match requested {
        TargetState::UnconfirmedNew => match initial {
            S::UnconfirmedNew | S::UnconfirmedSpend => Unnecessary,
            S::ConfirmedNew
            | S::ConfirmedSpend
            | S::Immature
            | S::OrphanedNew
            | S::OrphanedSpend => Disallowed,
        },
        TargetState::UnconfirmedSpend => match initial {
            S::UnconfirmedNew | S::ConfirmedNew | S::Immature => Allowed,
            S::UnconfirmedSpend => Unnecessary,
            S::ConfirmedSpend | S::OrphanedNew | S::OrphanedSpend => Disallowed,
        },
        TargetState::ConfirmedNew => match initial {
            S::UnconfirmedNew => Allowed,
            S::UnconfirmedSpend | S::ConfirmedSpend | S::ConfirmedNew => Unnecessary,
            S::Immature | S::OrphanedNew | S::OrphanedSpend => Disallowed,
        },
        TargetState::ConfirmedSpend => match initial {
            S::UnconfirmedNew | S::ConfirmedNew | S::UnconfirmedSpend | S::Immature => Allowed,
            S::ConfirmedSpend => Unnecessary,
            S::OrphanedNew | S::OrphanedSpend => Disallowed,
        },
        TargetState::Immature => match initial {
            S::OrphanedNew => Allowed,
            S::Immature => Unnecessary,
            S::UnconfirmedNew
            | S::UnconfirmedSpend
            | S::ConfirmedNew
            | S::ConfirmedSpend
            | S::OrphanedSpend => Disallowed,
        },
    }
}

/// Same as [`check_transition`], with `None` meaning "no prior state".
pub fn evaluate(initial: Option<OutputState>, requested: TargetState) -> Transition {
    match initial {
        None => Transition::Null,
        Some(s) => check_transition(s, requested),
    }
}
