//! Bitcoin -> smart chain: the LP is the offerer, the user opens the escrow
//! with the LP's authorization, pays on Bitcoin and claims.

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
            if swap.state == SwapState::SoftClaimed {
                tracing::warn!(swap_id = %swap.id, "escrow expired after the bitcoin payment, claim window missed");
            }
            swap.set_state(SwapState::Refundable)
        }
        CommitStatus::Refunded { refund_tx_id } => {
            let changed = swap.set_refund_tx(refund_tx_id.as_deref());
            swap.set_state(SwapState::Refunded) || changed
        }
        CommitStatus::NotCommitted => swap.set_state(SwapState::Refunded),
    };
    Outcome {
        changed,
        remove: false,
    }
}
