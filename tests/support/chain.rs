use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::hashes::{Hash as _, sha256};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use escrow_swap::chain::{CommitStatus, CommitStatusRequest, SwapContract, VerificationContext};
use escrow_swap::swap::{EscrowData, SignatureData};

pub const COMMIT_TX: &str = "commit-tx";
pub const REFUND_TX: &str = "refund-tx";
pub const COOP_REFUND_TX: &str = "coop-refund-tx";
pub const CLAIM_TX: &str = "claim-tx";

/// In-memory smart-chain contract. Escrows default to `NotCommitted`.
#[derive(Default)]
pub struct MockContract {
    statuses: Mutex<HashMap<String, CommitStatus>>,
    pub fail_status_query: AtomicBool,
    pub reject_init_authorization: AtomicBool,
    pub fail_refund: AtomicBool,
    /// Refund authorization checks cannot reach the chain.
    pub fail_authorization_check: AtomicBool,
    /// Stated expiry of init authorizations (unix seconds).
    pub authorization_expiry: AtomicU64,
    pub status_calls: AtomicUsize,
    pub status_requests: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub claim_calls: AtomicUsize,
    pub init_sent: Notify,
}

impl MockContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, escrow_hash: &str, status: CommitStatus) {
        self.statuses
            .lock()
            .expect("statuses mutex poisoned")
            .insert(escrow_hash.to_string(), status);
    }
}

#[async_trait]
impl SwapContract for MockContract {
    fn chain_id(&self) -> &str {
        "mock"
    }

    fn escrow_hash(&self, escrow: &EscrowData) -> String {
        format!("escrow-{}-{}", escrow.claim_hash, escrow.nonce)
    }

    fn onchain_claim_hash(
        &self,
        output_script: &[u8],
        amount_sats: u64,
        confirmations: u16,
        nonce: u64,
    ) -> String {
        let mut preimage = output_script.to_vec();
        preimage.extend_from_slice(&amount_sats.to_le_bytes());
        preimage.extend_from_slice(&confirmations.to_le_bytes());
        preimage.extend_from_slice(&nonce.to_le_bytes());
        hex::encode(sha256::Hash::hash(&preimage).to_byte_array())
    }

    fn lightning_claim_hash(&self, payment_hash: &[u8; 32]) -> String {
        hex::encode(payment_hash)
    }

    async fn pre_fetch_verification_context(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Option<VerificationContext>> {
        Ok(Some(VerificationContext(serde_json::json!({ "block": 1 }))))
    }

    async fn is_valid_init_authorization(
        &self,
        _escrow: &EscrowData,
        signature: &SignatureData,
        context: Option<&VerificationContext>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        anyhow::ensure!(context.is_some(), "verification context missing");
        anyhow::ensure!(
            !self.reject_init_authorization.load(Ordering::SeqCst),
            "bad signature {}",
            signature.signature
        );
        Ok(())
    }

    async fn init_authorization_expiry(
        &self,
        _escrow: &EscrowData,
        _signature: &SignatureData,
        _context: Option<&VerificationContext>,
    ) -> Result<u64> {
        Ok(self.authorization_expiry.load(Ordering::SeqCst))
    }

    async fn is_valid_refund_authorization(
        &self,
        _escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<bool> {
        anyhow::ensure!(
            !self.fail_authorization_check.load(Ordering::SeqCst),
            "rpc unreachable"
        );
        Ok(signature.signature != "bad")
    }

    async fn commit_statuses(
        &self,
        requests: &[CommitStatusRequest],
        _cancel: &CancellationToken,
    ) -> Result<HashMap<String, CommitStatus>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_requests.fetch_add(requests.len(), Ordering::SeqCst);
        anyhow::ensure!(
            !self.fail_status_query.load(Ordering::SeqCst),
            "rpc unavailable"
        );
        let statuses = self.statuses.lock().expect("statuses mutex poisoned");
        Ok(requests
            .iter()
            .filter_map(|r| r.escrow.escrow_hash.clone())
            .map(|hash| {
                let status = statuses
                    .get(&hash)
                    .cloned()
                    .unwrap_or(CommitStatus::NotCommitted);
                (hash, status)
            })
            .collect())
    }

    async fn init(
        &self,
        _signer: &str,
        _escrow: &EscrowData,
        _signature: &SignatureData,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.init_sent.notify_one();
        Ok(COMMIT_TX.to_string())
    }

    async fn refund(
        &self,
        _signer: &str,
        _escrow: &EscrowData,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.fail_refund.load(Ordering::SeqCst), "refund reverted");
        Ok(REFUND_TX.to_string())
    }

    async fn refund_with_authorization(
        &self,
        _signer: &str,
        _escrow: &EscrowData,
        _signature: &SignatureData,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(COOP_REFUND_TX.to_string())
    }

    async fn claim(
        &self,
        _signer: &str,
        _escrow: &EscrowData,
        _proof: &str,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CLAIM_TX.to_string())
    }
}
