use serde::{Deserialize, Serialize};

use super::{
    BitcoinPayout, EscrowData, FeeBreakdown, SignatureData, SwapState, SwapType,
};
use crate::chain::{ChainEvent, ChainEventKind};
use crate::pricing::PriceInfo;

/// One escrow-backed swap. This is also the persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowSwap {
    pub id: String,
    pub swap_type: SwapType,
    pub state: SwapState,
    /// Address of the user who requested the swap.
    pub initiator: String,
    /// LP endpoint the quote came from.
    pub url: String,
    pub created_at: u64,
    /// Quote expiry (unix seconds).
    pub expiry: u64,

    pub escrow: EscrowData,
    pub signature: Option<SignatureData>,
    /// Admissible authorization expiry, resolved once at quote time.
    pub signature_expiry: Option<u64>,

    pub fees: FeeBreakdown,
    pub price_info: PriceInfo,
    #[serde(with = "crate::serde_amount")]
    pub amount_sats: u128,

    pub payment_hash: Option<String>,
    pub random_nonce: Option<String>,
    pub lightning_invoice: Option<String>,
    pub payout: Option<BitcoinPayout>,
    /// Revealed pre-image (HTLC) once known.
    pub secret: Option<String>,
    pub refund_authorization: Option<SignatureData>,

    pub commit_tx_id: Option<String>,
    pub claim_tx_id: Option<String>,
    pub refund_tx_id: Option<String>,
}

/// Swap id: the claim (or payment) hash, suffixed by a random nonce when the
/// same hash may be reused, e.g. paying one invoice twice.
pub fn swap_id(hash: &str, random_nonce: Option<&str>) -> String {
    match random_nonce {
        Some(nonce) => format!("{hash}{nonce}"),
        None => hash.to_string(),
    }
}

impl EscrowSwap {
    /// Latest moment the quote can still be committed.
    pub fn quote_deadline(&self) -> u64 {
        match self.signature_expiry {
            Some(sig) => sig.min(self.expiry),
            None => self.expiry,
        }
    }

    pub fn is_quote_expired(&self, now: u64) -> bool {
        now >= self.quote_deadline()
    }

    /// Past the deadline by more than `grace_secs`; an in-flight commit can no longer land.
    pub fn is_quote_definitely_expired(&self, now: u64, grace_secs: u64) -> bool {
        now >= self.quote_deadline().saturating_add(grace_secs)
    }

    pub fn is_signature_valid(&self, now: u64) -> bool {
        self.signature_expiry.is_some_and(|e| now < e)
    }

    /// Sets the escrow hash if not yet known. Never overwrites.
    pub fn set_escrow_hash(&mut self, hash: &str) -> bool {
        if self.escrow.escrow_hash.is_some() {
            return false;
        }
        self.escrow.escrow_hash = Some(hash.to_string());
        true
    }

    pub fn set_commit_tx(&mut self, tx_id: Option<&str>) -> bool {
        record(&mut self.commit_tx_id, tx_id)
    }

    pub fn set_claim_tx(&mut self, tx_id: Option<&str>) -> bool {
        record(&mut self.claim_tx_id, tx_id)
    }

    pub fn set_refund_tx(&mut self, tx_id: Option<&str>) -> bool {
        record(&mut self.refund_tx_id, tx_id)
    }

    /// Stores the claim result of an event: a secret for HTLC legs, the
    /// Bitcoin payout txid for on-chain ones.
    pub fn set_claim_result(&mut self, result: Option<&str>) -> bool {
        let Some(result) = result else {
            return false;
        };
        match (self.swap_type, self.payout.as_mut()) {
            (SwapType::ToBtc | SwapType::FromBtc, Some(payout)) => {
                record(&mut payout.tx_id, Some(result))
            }
            (SwapType::ToBtc | SwapType::FromBtc, None) => false,
            _ => record(&mut self.secret, Some(result)),
        }
    }

    pub(crate) fn set_state(&mut self, state: SwapState) -> bool {
        if self.state == state {
            return false;
        }
        tracing::debug!(swap_id = %self.id, from = ?self.state, to = ?state, "swap state change");
        self.state = state;
        true
    }
}

fn record(slot: &mut Option<String>, tx_id: Option<&str>) -> bool {
    match tx_id {
        Some(tx) if slot.as_deref() != Some(tx) => {
            *slot = Some(tx.to_string());
            true
        }
        _ => false,
    }
}

/// `Initialize` is the same for both directions: the escrow now exists.
pub(crate) fn on_initialize(swap: &mut EscrowSwap, event: &ChainEvent) -> bool {
    let mut changed = swap.set_commit_tx(event.tx_id.as_deref());
    changed |= swap.set_escrow_hash(&event.escrow_hash);
    if swap.state.is_pre_commit() {
        changed |= swap.set_state(SwapState::Commited);
    }
    changed
}

pub(crate) fn on_claim(swap: &mut EscrowSwap, event: &ChainEvent) -> bool {
    if matches!(swap.state, SwapState::Claimed | SwapState::Refunded) {
        return swap.set_claim_tx(event.tx_id.as_deref());
    }
    let mut changed = swap.set_claim_tx(event.tx_id.as_deref());
    if let ChainEventKind::Claim { result } = &event.kind {
        changed |= swap.set_claim_result(result.as_deref());
    }
    changed |= swap.set_state(SwapState::Claimed);
    changed
}

pub(crate) fn on_refund(swap: &mut EscrowSwap, event: &ChainEvent) -> bool {
    if matches!(swap.state, SwapState::Claimed | SwapState::Refunded) {
        return swap.set_refund_tx(event.tx_id.as_deref());
    }
    let changed = swap.set_refund_tx(event.tx_id.as_deref());
    swap.set_state(SwapState::Refunded) || changed
}

/// Network-free quote expiry: `CREATED -> QUOTE_SOFT_EXPIRED -> QUOTE_EXPIRED`.
pub(crate) fn tick_quote_expiry(swap: &mut EscrowSwap, now: u64, grace_secs: u64) -> bool {
    let mut changed = false;
    if swap.state == SwapState::Created && swap.is_quote_expired(now) {
        changed |= swap.set_state(SwapState::QuoteSoftExpired);
    }
    if swap.state == SwapState::QuoteSoftExpired && swap.is_quote_definitely_expired(now, grace_secs)
    {
        changed |= swap.set_state(SwapState::QuoteExpired);
    }
    changed
}

pub(crate) fn is_pre_commit_tickable(state: SwapState) -> bool {
    matches!(state, SwapState::Created | SwapState::QuoteSoftExpired)
}

/// Pre-commit half of `sync`, shared by both directions. Returns `None` when
/// the chain reports an escrow and the direction has to map the status.
pub(crate) fn sync_pre_commit(
    swap: &mut EscrowSwap,
    status: Option<&crate::chain::CommitStatus>,
    now: u64,
    grace_secs: u64,
) -> Option<super::Outcome> {
    use crate::chain::CommitStatus;
    use super::Outcome;

    // Terminal: the only thing left to decide is whether it can be dropped.
    if swap.state == SwapState::QuoteExpired {
        if matches!(status, Some(s) if *s != CommitStatus::NotCommitted) {
            tracing::warn!(swap_id = %swap.id, ?status, "escrow found for an expired quote");
        }
        return Some(Outcome {
            changed: false,
            remove: matches!(status, Some(CommitStatus::NotCommitted)),
        });
    }

    let confirmed_absent = match status {
        Some(CommitStatus::NotCommitted) => true,
        None => false,
        // Late commit of a created or soft-expired quote.
        Some(_) => return None,
    };

    if swap.is_quote_definitely_expired(now, grace_secs) {
        let changed = swap.set_state(SwapState::QuoteExpired);
        return Some(Outcome {
            changed,
            remove: confirmed_absent,
        });
    }
    if swap.state == SwapState::Created && swap.is_quote_expired(now) {
        swap.set_state(SwapState::QuoteSoftExpired);
        return Some(Outcome::CHANGED);
    }
    Some(Outcome::UNCHANGED)
}
