use anyhow::Result;
use bitcoin::hashes::Hash as _;
use lightning_invoice::Bolt11Invoice;
use std::str::FromStr as _;

/// Fields of a BOLT11 invoice the engine checks a Lightning quote against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceTerms {
    pub payment_hash: [u8; 32],
    pub amount_msat: Option<u64>,
    /// Unix seconds.
    pub expires_at: u64,
}

pub fn parse_bolt11(invoice: &str) -> Result<InvoiceTerms> {
    let invoice = Bolt11Invoice::from_str(invoice)
        .map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))?;
    let expires_at = invoice
        .duration_since_epoch()
        .saturating_add(invoice.expiry_time())
        .as_secs();
    Ok(InvoiceTerms {
        payment_hash: invoice.payment_hash().to_byte_array(),
        amount_msat: invoice.amount_milli_satoshis(),
        expires_at,
    })
}

pub fn payment_hash_from_bolt11(invoice: &str) -> Result<[u8; 32]> {
    Ok(parse_bolt11(invoice)?.payment_hash)
}

/// Whether `secret` is the pre-image of `payment_hash` (both hex).
pub fn is_valid_preimage(secret_hex: &str, payment_hash_hex: &str) -> bool {
    use bitcoin::hashes::sha256;

    let Ok(secret) = hex::decode(secret_hex) else {
        return false;
    };
    let digest = sha256::Hash::hash(&secret).to_byte_array();
    hex::encode(digest).eq_ignore_ascii_case(payment_hash_hex)
}
