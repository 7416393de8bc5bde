//! Recovering on-chain payout details from nothing but a transaction id.
//!
//! A PTLC escrow commits to `hash(output script, value, confirmations, nonce)`.
//! Given the LP's payout transaction we try every output against every
//! plausible confirmation target until one reproduces the swap's claim hash.

use bitcoin::{Address, Network, Transaction};

use crate::chain::SwapContract;

pub const MAX_CONFIRMATION_TARGET: u16 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredPayout {
    pub vout: u32,
    pub address: String,
    pub amount_sats: u64,
    pub confirmations: u16,
}

pub fn recover_payout(
    contract: &dyn SwapContract,
    claim_hash: &str,
    nonce: u64,
    tx: &Transaction,
    network: Network,
) -> Option<RecoveredPayout> {
    for confirmations in 1..=MAX_CONFIRMATION_TARGET {
        for (vout, out) in tx.output.iter().enumerate() {
            let amount_sats = out.value.to_sat();
            let hash = contract.onchain_claim_hash(
                out.script_pubkey.as_bytes(),
                amount_sats,
                confirmations,
                nonce,
            );
            if !hash.eq_ignore_ascii_case(claim_hash) {
                continue;
            }

            let address = Address::from_script(&out.script_pubkey, network)
                .map(|a| a.to_string())
                .unwrap_or_else(|_| hex::encode(out.script_pubkey.as_bytes()));
            return Some(RecoveredPayout {
                vout: vout as u32,
                address,
                amount_sats,
                confirmations,
            });
        }
    }
    None
}
