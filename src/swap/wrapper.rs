//! Live swaps of one swap type: creation, event routing, user actions,
//! persistence and state-change notification.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::escrow::swap_id;
use super::store::{QueryParam, SwapStore};
use super::{
    BitcoinPayout, EscrowSwap, Outcome, SignatureData, SwapState, SwapStateChange, SwapType,
};
use crate::btc::BitcoinRpc;
use crate::btc::payout::{RecoveredPayout, recover_payout};
use crate::chain::{ChainEvent, ChainEventKind, CommitStatus, CommitStatusRequest, SwapContract};
use crate::config::WrapperConfig;
use crate::lightning::invoice::{is_valid_preimage, payment_hash_from_bolt11};
use crate::quote::{Intermediary, PaymentStatus, VerifiedQuote};
use crate::{Result, SwapError};

/// Shared handle to a tracked swap. The wrapper keeps one clone in its
/// arena; the entry is evicted once that is the only one left.
#[derive(Debug, Clone)]
pub struct SwapHandle(Arc<RwLock<EscrowSwap>>);

impl SwapHandle {
    fn new(swap: EscrowSwap) -> Self {
        Self(Arc::new(RwLock::new(swap)))
    }

    pub fn snapshot(&self) -> EscrowSwap {
        self.0.read().expect("swap lock poisoned").clone()
    }

    pub fn id(&self) -> String {
        self.0.read().expect("swap lock poisoned").id.clone()
    }

    pub fn state(&self) -> SwapState {
        self.0.read().expect("swap lock poisoned").state
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, EscrowSwap> {
        self.0.write().expect("swap lock poisoned")
    }

    fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }
}

pub struct SwapWrapper {
    pub(super) swap_type: SwapType,
    pub(super) contract: Arc<dyn SwapContract>,
    pub(super) store: Arc<dyn SwapStore>,
    lp: Arc<dyn Intermediary>,
    btc: Option<Arc<dyn BitcoinRpc>>,
    pub(super) cfg: WrapperConfig,
    pub(super) arena: Mutex<HashMap<String, SwapHandle>>,
    observers: Mutex<Vec<mpsc::UnboundedSender<SwapStateChange>>>,
}

impl SwapWrapper {
    pub fn new(
        swap_type: SwapType,
        contract: Arc<dyn SwapContract>,
        store: Arc<dyn SwapStore>,
        lp: Arc<dyn Intermediary>,
        cfg: WrapperConfig,
    ) -> Self {
        Self {
            swap_type,
            contract,
            store,
            lp,
            btc: None,
            cfg,
            arena: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Required for on-chain legs: payout recovery reads Bitcoin transactions.
    pub fn with_bitcoin_rpc(mut self, btc: Arc<dyn BitcoinRpc>) -> Self {
        self.btc = Some(btc);
        self
    }

    pub fn swap_type(&self) -> SwapType {
        self.swap_type
    }

    /// Turns a verified quote into a `CREATED` swap. `salted` appends a random
    /// nonce to the id so the same hash can back several swaps.
    pub fn create_swap(&self, verified: VerifiedQuote, salted: bool) -> Result<SwapHandle> {
        let VerifiedQuote {
            request,
            quote,
            signature_expiry,
            price_info,
        } = verified;
        if request.swap_type != self.swap_type {
            return Err(SwapError::InvalidInput(format!(
                "{} quote passed to the {} wrapper",
                request.swap_type.as_str(),
                self.swap_type.as_str()
            )));
        }

        let lightning_invoice = match self.swap_type {
            SwapType::ToBtcLn => request.lightning_invoice.clone(),
            SwapType::FromBtcLn => quote.lightning_invoice.clone(),
            _ => None,
        };
        let payment_hash = lightning_invoice
            .as_deref()
            .map(payment_hash_from_bolt11)
            .transpose()
            .map_err(|e| SwapError::InvalidInput(format!("{e:#}")))?
            .map(hex::encode);

        let payout = match self.swap_type {
            SwapType::ToBtc => request.payout_address.clone().map(|address| BitcoinPayout {
                address,
                amount_sats: quote.amount_sats,
                confirmations: quote.escrow.confirmations,
                tx_id: None,
            }),
            SwapType::FromBtc => quote.payout.clone(),
            _ => None,
        };

        let random_nonce = salted.then(|| Uuid::new_v4().simple().to_string());
        let id_hash = payment_hash.as_deref().unwrap_or(&quote.escrow.claim_hash);
        let swap = EscrowSwap {
            id: swap_id(id_hash, random_nonce.as_deref()),
            swap_type: self.swap_type,
            state: SwapState::Created,
            initiator: request.user,
            url: quote.url,
            created_at: crate::now_secs(),
            expiry: quote.expiry,
            escrow: quote.escrow,
            signature: Some(quote.signature),
            signature_expiry: Some(signature_expiry),
            fees: quote.fees,
            price_info,
            amount_sats: quote.amount_sats,
            payment_hash,
            random_nonce,
            lightning_invoice,
            payout,
            secret: None,
            refund_authorization: None,
            commit_tx_id: None,
            claim_tx_id: None,
            refund_tx_id: None,
        };

        self.persist(&swap)?;
        tracing::info!(swap_id = %swap.id, swap_type = swap.swap_type.as_str(), "swap created");
        let handle = SwapHandle::new(swap);
        self.arena
            .lock()
            .expect("arena mutex poisoned")
            .insert(handle.id(), handle.clone());
        Ok(handle)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SwapStateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .expect("observers mutex poisoned")
            .push(tx);
        rx
    }

    pub(super) fn notify(&self, change: SwapStateChange) {
        self.observers
            .lock()
            .expect("observers mutex poisoned")
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Pre-commit swaps only reach storage when configured to.
    pub(super) fn is_persistable(&self, swap: &EscrowSwap) -> bool {
        !swap.state.is_pre_commit() || self.cfg.persist_pre_commit
    }

    fn persist(&self, swap: &EscrowSwap) -> Result<()> {
        if !self.is_persistable(swap) {
            return Ok(());
        }
        self.store.save(swap).map_err(SwapError::Storage)
    }

    /// Arena handle for `swap`, inserting it when not tracked yet. An already
    /// tracked copy wins over the one passed in.
    pub(super) fn track(&self, swap: EscrowSwap) -> SwapHandle {
        let mut arena = self.arena.lock().expect("arena mutex poisoned");
        arena
            .entry(swap.id.clone())
            .or_insert_with(|| SwapHandle::new(swap))
            .clone()
    }

    pub(super) fn tracked(&self) -> Vec<SwapHandle> {
        self.arena
            .lock()
            .expect("arena mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Mutates a copy of the swap, persists or removes it, and only then
    /// commits the copy to the handle. A failed write leaves the handle
    /// untouched so the same change is attempted again later.
    pub(super) fn apply(
        &self,
        handle: &SwapHandle,
        f: impl FnOnce(&mut EscrowSwap) -> Outcome,
    ) -> Result<Outcome> {
        let (previous, outcome, swap) = {
            let mut guard = handle.write();
            let previous = guard.state;
            let mut next = guard.clone();
            let outcome = f(&mut next);
            if outcome.remove {
                self.store.remove(&next).map_err(SwapError::Storage)?;
            } else if outcome.changed {
                self.persist(&next)?;
            }
            *guard = next.clone();
            (previous, outcome, next)
        };

        if outcome.remove {
            self.arena
                .lock()
                .expect("arena mutex poisoned")
                .remove(&swap.id);
            tracing::info!(swap_id = %swap.id, "expired quote removed");
        }

        if previous != swap.state {
            self.notify(SwapStateChange {
                swap_id: swap.id,
                previous,
                current: swap.state,
            });
        }
        Ok(outcome)
    }

    /// Escrow hash of a swap, derived from its escrow data while the
    /// `Initialize` event has not been seen.
    pub(super) fn escrow_hash_of(&self, swap: &EscrowSwap) -> String {
        swap.escrow
            .escrow_hash
            .clone()
            .unwrap_or_else(|| self.contract.escrow_hash(&swap.escrow))
    }

    fn find_by_escrow_hash(&self, hash: &str) -> Result<Option<SwapHandle>> {
        let found = self.tracked().into_iter().find(|h| {
            let swap = h.snapshot();
            swap.swap_type == self.swap_type && self.escrow_hash_of(&swap) == hash
        });
        if found.is_some() {
            return Ok(found);
        }

        let stored = self
            .store
            .query(&[vec![
                QueryParam::swap_type(self.swap_type),
                QueryParam::escrow_hash(hash),
            ]])
            .map_err(SwapError::Storage)?;
        Ok(stored.into_iter().next().map(|swap| self.track(swap)))
    }

    /// Routes an on-chain event to its swap. Returns whether anything changed.
    pub fn process_event(&self, event: &ChainEvent) -> Result<bool> {
        let Some(handle) = self.find_by_escrow_hash(&event.escrow_hash)? else {
            tracing::debug!(escrow_hash = %event.escrow_hash, "event for an unknown escrow");
            return Ok(false);
        };

        let handlers = self.swap_type.handlers();
        let outcome = self.apply(&handle, |swap| {
            let changed = match event.kind {
                ChainEventKind::Initialize => (handlers.on_initialize)(swap, event),
                ChainEventKind::Claim { .. } => (handlers.on_claim)(swap, event),
                ChainEventKind::Refund => (handlers.on_refund)(swap, event),
            };
            Outcome {
                changed,
                remove: false,
            }
        })?;
        Ok(outcome.changed)
    }

    pub fn get_swap(&self, id: &str) -> Result<Option<SwapHandle>> {
        if let Some(handle) = self.arena.lock().expect("arena mutex poisoned").get(id) {
            return Ok(Some(handle.clone()));
        }
        let stored = self
            .store
            .query(&[vec![QueryParam::id(id)]])
            .map_err(SwapError::Storage)?;
        Ok(stored
            .into_iter()
            .find(|s| s.swap_type == self.swap_type)
            .map(|swap| self.track(swap)))
    }

    /// Tracked and stored swaps of this type, optionally of one initiator.
    pub fn list_swaps(&self, initiator: Option<&str>) -> Result<Vec<EscrowSwap>> {
        let mut params = vec![QueryParam::swap_type(self.swap_type)];
        if let Some(initiator) = initiator {
            params.push(QueryParam::initiator(initiator));
        }
        let stored = self.store.query(&[params]).map_err(SwapError::Storage)?;

        let mut out: HashMap<String, EscrowSwap> =
            stored.into_iter().map(|s| (s.id.clone(), s)).collect();
        for handle in self.tracked() {
            let swap = handle.snapshot();
            if initiator.is_none_or(|i| i == swap.initiator) {
                out.insert(swap.id.clone(), swap);
            }
        }
        let mut out: Vec<EscrowSwap> = out.into_values().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Drops arena entries nobody else holds. Unpersisted pre-commit swaps
    /// stay until they expire, since the arena is their only copy.
    pub fn evict_unreferenced(&self) -> usize {
        let mut arena = self.arena.lock().expect("arena mutex poisoned");
        let before = arena.len();
        arena.retain(|_, handle| {
            if handle.is_shared() {
                return true;
            }
            let swap = handle.0.read().expect("swap lock poisoned");
            !swap.state.is_terminal() && !self.is_persistable(&swap)
        });
        before - arena.len()
    }

    /// Network-free expiry promotion of pre-commit swaps.
    pub fn tick(&self) {
        let handlers = self.swap_type.handlers();
        let now = crate::now_secs();
        let grace = self.cfg.quote_expiry_grace.as_secs();
        for handle in self.tracked() {
            if !(handlers.is_tickable)(handle.state()) {
                continue;
            }
            let result = self.apply(&handle, |swap| Outcome {
                changed: (handlers.tick)(swap, now, grace),
                remove: false,
            });
            if let Err(err) = result {
                tracing::warn!(swap_id = %handle.id(), error = %err, "tick failed");
            }
        }
    }

    /// Spawns the tick loop; it stops when `cancel` fires.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let wrapper = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(wrapper.cfg.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        wrapper.tick();
                        wrapper.evict_unreferenced();
                    }
                }
            }
            tracing::debug!(swap_type = wrapper.swap_type.as_str(), "tick loop stopped");
        })
    }

    /// One chain round trip bounded by the request timeout and `cancel`.
    pub(super) async fn chain_call<T>(
        &self,
        what: &'static str,
        cancel: &CancellationToken,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SwapError::Cancelled),
            r = tokio::time::timeout(self.cfg.chain_request_timeout, fut) => match r {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(SwapError::Network(err.context(what))),
                Err(_) => Err(SwapError::Timeout(what.to_string())),
            },
        }
    }

    async fn query_status(
        &self,
        swap: &EscrowSwap,
        cancel: &CancellationToken,
    ) -> Result<Option<CommitStatus>> {
        let hash = self.escrow_hash_of(swap);
        let mut escrow = swap.escrow.clone();
        escrow.escrow_hash = Some(hash.clone());
        let request = CommitStatusRequest {
            signer: swap.initiator.clone(),
            escrow,
        };
        let mut statuses = self
            .chain_call(
                "commit status",
                cancel,
                self.contract.commit_statuses(std::slice::from_ref(&request), cancel),
            )
            .await?;
        Ok(statuses.remove(&hash))
    }

    /// Re-derives one swap's state from the chain.
    pub async fn sync_swap(&self, handle: &SwapHandle, cancel: &CancellationToken) -> Result<Outcome> {
        let swap = handle.snapshot();
        if matches!(swap.state, SwapState::Claimed | SwapState::Refunded) {
            return Ok(Outcome::UNCHANGED);
        }
        let status = self.query_status(&swap, cancel).await?;
        let hash = self.escrow_hash_of(&swap);
        let handlers = self.swap_type.handlers();
        let now = crate::now_secs();
        let grace = self.cfg.quote_expiry_grace.as_secs();
        self.apply(handle, |swap| {
            let mut changed = false;
            if swap.state != SwapState::QuoteExpired
                && matches!(&status, Some(s) if *s != CommitStatus::NotCommitted)
            {
                changed |= swap.set_escrow_hash(&hash);
            }
            let mut outcome = (handlers.sync)(swap, status.as_ref(), now, grace);
            outcome.changed |= changed;
            outcome
        })
    }

    /// Opens the escrow. Resolves once the `Initialize` event was processed,
    /// falling back to a status query when it does not arrive in time.
    pub async fn commit(
        &self,
        handle: &SwapHandle,
        signer: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let swap = handle.snapshot();
        if swap.state != SwapState::Created {
            return Err(SwapError::invalid_state(&swap.id, swap.state, "created"));
        }
        if !swap.is_signature_valid(crate::now_secs()) {
            return Err(SwapError::SignatureExpired {
                expiry: swap.signature_expiry.unwrap_or_default(),
            });
        }
        let signature = swap
            .signature
            .clone()
            .ok_or_else(|| SwapError::InvalidInput("swap carries no authorization".to_string()))?;

        let mut changes = self.subscribe();
        let tx_id = self
            .chain_call(
                "init",
                cancel,
                self.contract.init(signer, &swap.escrow, &signature, cancel),
            )
            .await?;
        tracing::info!(swap_id = %swap.id, tx_id = %tx_id, "commit sent");
        self.apply(handle, |s| Outcome {
            changed: s.set_commit_tx(Some(&tx_id)),
            remove: false,
        })?;

        let committed = async {
            while handle.state().is_pre_commit() {
                match changes.recv().await {
                    Some(change) if change.swap_id == swap.id && !change.current.is_pre_commit() => {
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
        };
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SwapError::Cancelled),
            r = tokio::time::timeout(self.cfg.commit_wait_timeout, committed) => r,
        };
        drop(changes);

        if waited.is_err() {
            tracing::warn!(swap_id = %swap.id, "no initialize event in time; querying the chain");
            self.sync_swap(handle, cancel).await?;
            if handle.state().is_pre_commit() {
                return Err(SwapError::Timeout(format!("commit of swap {}", swap.id)));
            }
        }
        Ok(tx_id)
    }

    /// Takes the funds back out of an escrow the user opened.
    pub async fn refund(
        &self,
        handle: &SwapHandle,
        signer: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if !self.swap_type.is_to_btc() {
            return Err(SwapError::InvalidInput(
                "refund is only available for swaps the user funded".to_string(),
            ));
        }
        let swap = handle.snapshot();
        match swap.state {
            SwapState::Commited | SwapState::Refundable => {}
            SwapState::Claimed => {
                return Err(SwapError::ClaimedByCounterparty { swap_id: swap.id });
            }
            other => {
                return Err(SwapError::invalid_state(&swap.id, other, "commited or refundable"));
            }
        }

        let result = match &swap.refund_authorization {
            Some(authorization) => {
                self.check_refund_authorization(&swap, authorization, cancel)
                    .await?;
                self.chain_call(
                    "cooperative refund",
                    cancel,
                    self.contract.refund_with_authorization(
                        signer,
                        &swap.escrow,
                        authorization,
                        cancel,
                    ),
                )
                .await
            }
            None => {
                match self.query_status(&swap, cancel).await? {
                    Some(CommitStatus::Expired) => {}
                    Some(CommitStatus::Paid { .. }) => {
                        self.sync_swap(handle, cancel).await?;
                        return Err(SwapError::ClaimedByCounterparty { swap_id: swap.id });
                    }
                    Some(CommitStatus::Refunded { .. }) => {
                        self.sync_swap(handle, cancel).await?;
                        return Ok(handle.snapshot().refund_tx_id.unwrap_or_default());
                    }
                    _ => {
                        return Err(SwapError::invalid_state(
                            &swap.id,
                            swap.state,
                            "an expired escrow",
                        ));
                    }
                }
                self.chain_call(
                    "refund",
                    cancel,
                    self.contract.refund(signer, &swap.escrow, cancel),
                )
                .await
            }
        };

        let tx_id = match result {
            Ok(tx_id) => tx_id,
            Err(err @ SwapError::Cancelled) => return Err(err),
            Err(err) => {
                // The LP may have claimed between our check and our transaction.
                if let Ok(Some(CommitStatus::Paid { .. })) = self.query_status(&swap, cancel).await {
                    self.sync_swap(handle, cancel).await?;
                    return Err(SwapError::ClaimedByCounterparty { swap_id: swap.id });
                }
                return Err(err);
            }
        };

        tracing::info!(swap_id = %swap.id, tx_id = %tx_id, "swap refunded");
        self.apply(handle, |s| {
            let changed = s.set_refund_tx(Some(&tx_id));
            Outcome {
                changed: s.set_state(SwapState::Refunded) || changed,
                remove: false,
            }
        })?;
        Ok(tx_id)
    }

    /// Network failures stay `Network`; only a definite "no" from the chain
    /// is a signature error.
    async fn check_refund_authorization(
        &self,
        swap: &EscrowSwap,
        authorization: &SignatureData,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let valid = self
            .chain_call(
                "refund authorization check",
                cancel,
                self.contract
                    .is_valid_refund_authorization(&swap.escrow, authorization),
            )
            .await?;
        if !valid {
            return Err(SwapError::SignatureVerification(format!(
                "refund authorization for swap {} does not verify",
                swap.id
            )));
        }
        Ok(())
    }

    /// Settles an escrow the LP opened for the user, once the Bitcoin side is proven.
    pub async fn claim(
        &self,
        handle: &SwapHandle,
        signer: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if self.swap_type.is_to_btc() {
            return Err(SwapError::InvalidInput(
                "claim is only available for swaps the user receives".to_string(),
            ));
        }
        let swap = handle.snapshot();
        if swap.state != SwapState::SoftClaimed {
            return Err(SwapError::invalid_state(&swap.id, swap.state, "soft claimed"));
        }
        let proof = match self.swap_type {
            SwapType::FromBtcLn => swap.secret.clone(),
            _ => swap.payout.as_ref().and_then(|p| p.tx_id.clone()),
        }
        .ok_or_else(|| SwapError::invalid_state(&swap.id, swap.state, "a known payment proof"))?;

        let tx_id = match self
            .chain_call(
                "claim",
                cancel,
                self.contract.claim(signer, &swap.escrow, &proof, cancel),
            )
            .await
        {
            Ok(tx_id) => tx_id,
            Err(err @ SwapError::Cancelled) => return Err(err),
            Err(err) => {
                if let Err(sync_err) = self.sync_swap(handle, cancel).await {
                    tracing::warn!(swap_id = %swap.id, error = %sync_err, "status check after failed claim");
                }
                return Err(err);
            }
        };

        tracing::info!(swap_id = %swap.id, tx_id = %tx_id, "swap claimed");
        self.apply(handle, |s| {
            let changed = s.set_claim_tx(Some(&tx_id));
            Outcome {
                changed: s.set_state(SwapState::Claimed) || changed,
                remove: false,
            }
        })?;
        Ok(tx_id)
    }

    /// Records the user's proof that the Bitcoin side of a receive swap was
    /// paid: the pre-image for Lightning, the payment txid on-chain. Returns
    /// `false` while the transaction lacks confirmations.
    pub async fn submit_payment_proof(
        &self,
        handle: &SwapHandle,
        proof: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if self.swap_type.is_to_btc() {
            return Err(SwapError::InvalidInput(
                "payment proofs are only taken for swaps the user receives".to_string(),
            ));
        }
        let swap = handle.snapshot();
        if swap.state != SwapState::Commited {
            return Err(SwapError::invalid_state(&swap.id, swap.state, "commited"));
        }

        if self.swap_type == SwapType::FromBtcLn {
            let hash = swap.payment_hash.as_deref().unwrap_or(&swap.escrow.claim_hash);
            if !is_valid_preimage(proof, hash) {
                return Err(SwapError::InvalidInput("secret does not match the payment hash".to_string()));
            }
            self.apply(handle, |s| {
                let changed = s.set_claim_result(Some(proof));
                Outcome {
                    changed: s.set_state(SwapState::SoftClaimed) || changed,
                    remove: false,
                }
            })?;
            return Ok(true);
        }

        let (recovered, confirmations) = self.fetch_payout(&swap, proof, cancel).await?;
        if confirmations < u32::from(recovered.confirmations) {
            tracing::debug!(swap_id = %swap.id, confirmations, required = recovered.confirmations, "payment not confirmed yet");
            self.record_payout(handle, proof, &recovered)?;
            return Ok(false);
        }
        self.record_payout(handle, proof, &recovered)?;
        self.apply(handle, |s| Outcome {
            changed: s.set_state(SwapState::SoftClaimed),
            remove: false,
        })?;
        Ok(true)
    }

    /// Reconstructs payout details of an on-chain swap from the payout txid.
    pub async fn recover_from_tx_id(
        &self,
        handle: &SwapHandle,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RecoveredPayout> {
        if self.swap_type.is_lightning() {
            return Err(SwapError::InvalidInput(
                "payout recovery applies to on-chain swaps".to_string(),
            ));
        }
        let swap = handle.snapshot();
        let (recovered, _) = self.fetch_payout(&swap, tx_id, cancel).await?;
        self.record_payout(handle, tx_id, &recovered)?;
        Ok(recovered)
    }

    async fn fetch_payout(
        &self,
        swap: &EscrowSwap,
        tx_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(RecoveredPayout, u32)> {
        let btc = self
            .btc
            .as_ref()
            .ok_or_else(|| SwapError::InvalidInput("no bitcoin rpc configured".to_string()))?;
        let txid: bitcoin::Txid = tx_id
            .parse()
            .map_err(|e| SwapError::InvalidInput(format!("invalid txid {tx_id}: {e}")))?;
        let tx = self
            .chain_call("bitcoin transaction", cancel, btc.get_transaction(&txid, cancel))
            .await?
            .ok_or_else(|| SwapError::InvalidInput(format!("bitcoin transaction {tx_id} not found")))?;

        let recovered = recover_payout(
            self.contract.as_ref(),
            &swap.escrow.claim_hash,
            swap.escrow.nonce,
            &tx.tx,
            btc.network(),
        )
        .ok_or_else(|| {
            SwapError::Counterparty(format!("transaction {tx_id} does not pay this swap"))
        })?;
        if let Some(payout) = &swap.payout
            && (payout.address != recovered.address
                || payout.amount_sats != u128::from(recovered.amount_sats))
        {
            return Err(SwapError::Counterparty(format!(
                "transaction {tx_id} pays {} sats to {}, expected {} to {}",
                recovered.amount_sats, recovered.address, payout.amount_sats, payout.address
            )));
        }
        Ok((recovered, tx.confirmations))
    }

    fn record_payout(&self, handle: &SwapHandle, tx_id: &str, recovered: &RecoveredPayout) -> Result<()> {
        self.apply(handle, |s| {
            let payout = s.payout.get_or_insert_with(|| BitcoinPayout {
                address: recovered.address.clone(),
                amount_sats: u128::from(recovered.amount_sats),
                confirmations: recovered.confirmations,
                tx_id: None,
            });
            let changed = payout.tx_id.as_deref() != Some(tx_id);
            payout.tx_id = Some(tx_id.to_string());
            Outcome {
                changed,
                remove: false,
            }
        })?;
        Ok(())
    }

    /// Asks the LP how the Bitcoin side of a send swap is going and applies
    /// any verified answer.
    pub async fn check_payment(
        &self,
        handle: &SwapHandle,
        cancel: &CancellationToken,
    ) -> Result<PaymentStatus> {
        if !self.swap_type.is_to_btc() {
            return Err(SwapError::InvalidInput(
                "payment status is only polled for swaps the user funded".to_string(),
            ));
        }
        let swap = handle.snapshot();
        if !matches!(swap.state, SwapState::Commited | SwapState::SoftClaimed) {
            return Err(SwapError::invalid_state(&swap.id, swap.state, "commited"));
        }

        let status = self
            .chain_call("payment status", cancel, self.lp.payment_status(&swap, cancel))
            .await?;
        match &status {
            PaymentStatus::Paid { proof } => {
                if self.swap_type == SwapType::ToBtcLn {
                    let hash = swap.payment_hash.as_deref().unwrap_or(&swap.escrow.claim_hash);
                    if !is_valid_preimage(proof, hash) {
                        return Err(SwapError::Counterparty(
                            "LP returned a secret that does not match the payment hash".to_string(),
                        ));
                    }
                } else {
                    let (recovered, _) = self.fetch_payout(&swap, proof, cancel).await?;
                    self.record_payout(handle, proof, &recovered)?;
                }
                self.apply(handle, |s| {
                    let mut changed = s.set_claim_result(Some(proof.as_str()));
                    if s.state == SwapState::Commited {
                        changed |= s.set_state(SwapState::SoftClaimed);
                    }
                    Outcome {
                        changed,
                        remove: false,
                    }
                })?;
            }
            PaymentStatus::Refundable { authorization } => {
                self.check_refund_authorization(&swap, authorization, cancel)
                    .await?;
                self.apply(handle, |s| {
                    let changed = s.refund_authorization.as_ref() != Some(authorization);
                    s.refund_authorization = Some(authorization.clone());
                    Outcome {
                        changed: s.set_state(SwapState::Refundable) || changed,
                        remove: false,
                    }
                })?;
            }
            PaymentStatus::Pending | PaymentStatus::NotFound => {}
        }
        Ok(status)
    }

    /// Polls [`Self::check_payment`] until the LP reports something other
    /// than `Pending`.
    pub async fn wait_for_payment(
        &self,
        handle: &SwapHandle,
        cancel: &CancellationToken,
    ) -> Result<PaymentStatus> {
        loop {
            let status = self.check_payment(handle, cancel).await?;
            if status != PaymentStatus::Pending {
                return Ok(status);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SwapError::Cancelled),
                _ = tokio::time::sleep(self.cfg.payment_poll_interval) => {}
            }
        }
    }
}
