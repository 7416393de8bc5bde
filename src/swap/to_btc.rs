//! Smart chain -> Bitcoin: the user is the offerer and funds the escrow, the
//! LP pays out on Bitcoin and claims it.

use super::escrow::{
    is_pre_commit_tickable, on_claim, on_initialize, on_refund, sync_pre_commit, tick_quote_expiry,
};
use super::{DirectionHandlers, EscrowSwap, Outcome, SwapState};
use crate::chain::CommitStatus;

pub static HANDLERS: DirectionHandlers = DirectionHandlers {
    on_initialize,
    on_claim,
    on_refund,
    sync,
    is_tickable: is_pre_commit_tickable,
    tick: tick_quote_expiry,
};

fn sync(
    swap: &mut EscrowSwap,
    status: Option<&CommitStatus>,
    now: u64,
    grace_secs: u64,
) -> Outcome {
    if swap.state.is_pre_commit()
        && let Some(outcome) = sync_pre_commit(swap, status, now, grace_secs)
    {
        return outcome;
    }
    let Some(status) = status else {
        return Outcome::UNCHANGED;
    };

    let changed = match status {
        CommitStatus::Committed => {
            // Pre-commit swaps reach here only when the chain has the escrow.
            swap.state.is_pre_commit() && swap.set_state(SwapState::Commited)
        }
        CommitStatus::Paid {
            claim_tx_id,
            secret,
        } => {
            let mut changed = swap.set_claim_tx(claim_tx_id.as_deref());
            changed |= swap.set_claim_result(secret.as_deref());
            swap.set_state(SwapState::Claimed) || changed
        }
        CommitStatus::Expired => {
            // The LP never settled; the user can take the funds back.
            swap.set_state(SwapState::Refundable)
        }
        CommitStatus::Refunded { refund_tx_id } => {
            let changed = swap.set_refund_tx(refund_tx_id.as_deref());
            swap.set_state(SwapState::Refunded) || changed
        }
        CommitStatus::NotCommitted => {
            // Escrow gone without a claim: it was refunded while we were away.
            swap.set_state(SwapState::Refunded)
        }
    };
    Outcome {
        changed,
        remove: false,
    }
}
