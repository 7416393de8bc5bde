//! Smart-chain collaborator seam.
//!
//! Everything chain specific (hash derivation, signature checks, building and
//! broadcasting transactions) sits behind [`SwapContract`]. The engine only
//! decides when to call it.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::swap::{EscrowData, SignatureData};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEventKind {
    Initialize,
    /// `result` is the revealed secret (HTLC) or the Bitcoin payout txid (PTLC).
    Claim { result: Option<String> },
    Refund,
}

/// On-chain event already matched to an escrow by the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub escrow_hash: String,
    pub tx_id: Option<String>,
    pub kind: ChainEventKind,
}

/// Authoritative escrow status as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitStatus {
    NotCommitted,
    Committed,
    Paid {
        claim_tx_id: Option<String>,
        secret: Option<String>,
    },
    Expired,
    Refunded {
        refund_tx_id: Option<String>,
    },
}

/// Chain data fetched ahead of signature checks (e.g. a recent block hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationContext(pub serde_json::Value);

#[derive(Debug, Clone)]
pub struct CommitStatusRequest {
    pub signer: String,
    pub escrow: EscrowData,
}

#[async_trait]
pub trait SwapContract: Send + Sync {
    fn chain_id(&self) -> &str;

    /// Identifier of the escrow record on-chain.
    fn escrow_hash(&self, escrow: &EscrowData) -> String;

    /// Claim hash an on-chain (PTLC) escrow commits to.
    fn onchain_claim_hash(
        &self,
        output_script: &[u8],
        amount_sats: u64,
        confirmations: u16,
        nonce: u64,
    ) -> String;

    /// Claim hash an HTLC escrow commits to for a Lightning payment hash.
    fn lightning_claim_hash(&self, payment_hash: &[u8; 32]) -> String;

    async fn pre_fetch_verification_context(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<VerificationContext>>;

    /// Errors when the LP authorization is not valid for this escrow.
    async fn is_valid_init_authorization(
        &self,
        escrow: &EscrowData,
        signature: &SignatureData,
        context: Option<&VerificationContext>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Expiry (unix seconds) the authorization states for itself.
    async fn init_authorization_expiry(
        &self,
        escrow: &EscrowData,
        signature: &SignatureData,
        context: Option<&VerificationContext>,
    ) -> Result<u64>;

    /// `Ok(false)` for a signature that does not authorize the refund; `Err`
    /// only when the check itself could not be made.
    async fn is_valid_refund_authorization(
        &self,
        escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<bool>;

    /// One round trip for many escrows, keyed by escrow hash.
    async fn commit_statuses(
        &self,
        requests: &[CommitStatusRequest],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, CommitStatus>>;

    async fn init(
        &self,
        signer: &str,
        escrow: &EscrowData,
        signature: &SignatureData,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn refund(
        &self,
        signer: &str,
        escrow: &EscrowData,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn refund_with_authorization(
        &self,
        signer: &str,
        escrow: &EscrowData,
        signature: &SignatureData,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// `proof` is the secret for HTLC escrows or the Bitcoin txid for PTLC ones.
    async fn claim(
        &self,
        signer: &str,
        escrow: &EscrowData,
        proof: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}
