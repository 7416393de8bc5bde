//! Batch reconciliation of tracked swaps against on-chain escrow status.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use super::store::QueryParam;
use super::wrapper::{SwapHandle, SwapWrapper};
use super::{EscrowSwap, SwapState, SwapStateChange};
use crate::chain::{CommitStatus, CommitStatusRequest};
use crate::{Result, SwapError};

/// States a swap can be reloaded in after a restart.
const RESUMABLE: [SwapState; 6] = [
    SwapState::Created,
    SwapState::QuoteSoftExpired,
    SwapState::QuoteExpired,
    SwapState::Commited,
    SwapState::SoftClaimed,
    SwapState::Refundable,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Swaps included in the status query.
    pub queried: usize,
    pub changed: usize,
    pub removed: usize,
    /// The status query failed; only time-based updates were applied.
    pub query_failed: bool,
}

impl SwapWrapper {
    /// Loads every resumable swap of this type from storage and reconciles it.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<ResyncReport> {
        tracing::info!(swap_type = self.swap_type.as_str(), "initializing swaps from storage");
        self.resync(cancel).await
    }

    /// Puts stored swaps that may still need work back into the arena.
    /// Copies already tracked win over the stored ones.
    fn load_resumable(&self) -> Result<usize> {
        let params: Vec<Vec<QueryParam>> = RESUMABLE
            .iter()
            .map(|state| {
                vec![
                    QueryParam::swap_type(self.swap_type),
                    QueryParam::state(*state),
                ]
            })
            .collect();
        let stored = self.store.query(&params).map_err(SwapError::Storage)?;
        let loaded = stored.len();
        for swap in stored {
            self.track(swap);
        }
        Ok(loaded)
    }

    /// One batched status query for every stored or tracked swap that needs
    /// it, then the direction's `sync` on each. Claimed and refunded swaps
    /// are left alone; pre-commit swaps are only queried once their quote
    /// expired.
    pub async fn resync(&self, cancel: &CancellationToken) -> Result<ResyncReport> {
        let loaded = self.load_resumable()?;
        let now = crate::now_secs();

        let mut queued: Vec<(SwapHandle, String)> = Vec::new();
        for handle in self.tracked() {
            let swap = handle.snapshot();
            if swap.swap_type != self.swap_type
                || matches!(swap.state, SwapState::Claimed | SwapState::Refunded)
            {
                continue;
            }
            if swap.state == SwapState::Created && !swap.is_quote_expired(now) {
                continue;
            }
            let hash = self.escrow_hash_of(&swap);
            queued.push((handle, hash));
        }
        if queued.is_empty() {
            return Ok(ResyncReport::default());
        }
        // Swap locks are taken in id order.
        queued.sort_by_cached_key(|(handle, _)| handle.id());

        let requests: Vec<CommitStatusRequest> = queued
            .iter()
            .map(|(handle, hash)| {
                let swap = handle.snapshot();
                let mut escrow = swap.escrow;
                escrow.escrow_hash = Some(hash.clone());
                CommitStatusRequest {
                    signer: swap.initiator,
                    escrow,
                }
            })
            .collect();

        let mut report = ResyncReport {
            queried: queued.len(),
            ..ResyncReport::default()
        };
        let statuses: HashMap<String, CommitStatus> = match self
            .chain_call(
                "commit statuses",
                cancel,
                self.contract.commit_statuses(&requests, cancel),
            )
            .await
        {
            Ok(statuses) => statuses,
            Err(SwapError::Cancelled) => return Err(SwapError::Cancelled),
            Err(err) => {
                tracing::warn!(error = %err, swaps = queued.len(), "commit status query failed; retrying next cycle");
                report.query_failed = true;
                HashMap::new()
            }
        };

        let (changes, removed) = self.apply_statuses(&queued, &statuses, now, &mut report)?;
        if !removed.is_empty() {
            let mut arena = self.arena.lock().expect("arena mutex poisoned");
            for id in &removed {
                arena.remove(id);
            }
        }
        for change in changes {
            self.notify(change);
        }

        tracing::debug!(
            swap_type = self.swap_type.as_str(),
            loaded,
            queried = report.queried,
            changed = report.changed,
            removed = report.removed,
            "resync finished"
        );
        Ok(report)
    }

    /// Syncs copies of the queued swaps, writes the batch, and commits the
    /// copies to their handles once storage accepted them. Returns the state
    /// changes and the ids of removed swaps.
    fn apply_statuses(
        &self,
        queued: &[(SwapHandle, String)],
        statuses: &HashMap<String, CommitStatus>,
        now: u64,
        report: &mut ResyncReport,
    ) -> Result<(Vec<SwapStateChange>, Vec<String>)> {
        let handlers = self.swap_type.handlers();
        let grace = self.cfg.quote_expiry_grace.as_secs();

        let mut pending = Vec::with_capacity(queued.len());
        let mut to_save: Vec<EscrowSwap> = Vec::new();
        let mut to_remove: Vec<EscrowSwap> = Vec::new();
        for (handle, hash) in queued {
            let guard = handle.write();
            let status = statuses.get(hash);
            let mut next = guard.clone();
            let mut outcome = (handlers.sync)(&mut next, status, now, grace);
            if guard.state != SwapState::QuoteExpired
                && matches!(status, Some(s) if *s != CommitStatus::NotCommitted)
            {
                outcome.changed |= next.set_escrow_hash(hash);
            }

            if outcome.remove {
                to_remove.push(next.clone());
            } else if outcome.changed && self.is_persistable(&next) {
                to_save.push(next.clone());
            }
            pending.push((guard, next, outcome));
        }

        if !to_save.is_empty() {
            self.store.save_all(&to_save).map_err(SwapError::Storage)?;
        }
        if !to_remove.is_empty() {
            self.store
                .remove_all(&to_remove)
                .map_err(SwapError::Storage)?;
        }

        let mut changes = Vec::new();
        let mut removed = Vec::new();
        for (mut guard, next, outcome) in pending {
            report.changed += usize::from(outcome.changed);
            report.removed += usize::from(outcome.remove);
            if outcome.remove {
                removed.push(next.id.clone());
            }
            if guard.state != next.state {
                changes.push(SwapStateChange {
                    swap_id: next.id.clone(),
                    previous: guard.state,
                    current: next.state,
                });
            }
            *guard = next;
        }
        Ok((changes, removed))
    }
}
