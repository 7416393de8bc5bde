//! LP quotes: fetching them and deciding whether they can be trusted.

use std::str::FromStr as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chain::{SwapContract, VerificationContext};
use crate::lightning::invoice::parse_bolt11;
use crate::pricing::{PriceChecker, PriceInfo};
use crate::retry::{RetryConfig, retry_with_timeout};
use crate::swap::{BitcoinPayout, EscrowData, EscrowKind, EscrowSwap, FeeBreakdown, SignatureData, SwapType};
use crate::{Result, SwapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum RequestedAmount {
    /// Exact Bitcoin-side amount.
    Sats(#[serde(with = "crate::serde_amount")] u128),
    /// Exact smart-chain amount in token base units.
    Token(#[serde(with = "crate::serde_amount")] u128),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub swap_type: SwapType,
    /// Smart-chain address of the user.
    pub user: String,
    pub token: String,
    pub amount: RequestedAmount,
    /// Claim hash the escrow must commit to, when the user picked it.
    pub claim_hash: Option<String>,
    /// Invoice the LP should pay (`ToBtcLn`).
    pub lightning_invoice: Option<String>,
    /// Bitcoin address the LP should pay (`ToBtc`).
    pub payout_address: Option<String>,
}

/// Quote as returned by the LP, not yet trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LpQuote {
    pub url: String,
    pub escrow: EscrowData,
    pub signature: SignatureData,
    #[serde(with = "crate::serde_amount")]
    pub amount_sats: u128,
    #[serde(with = "crate::serde_amount")]
    pub sats_base_fee: u128,
    #[serde(with = "crate::serde_amount")]
    pub fee_ppm: u128,
    pub fees: FeeBreakdown,
    pub expiry: u64,
    /// Invoice the user has to pay (`FromBtcLn`).
    pub lightning_invoice: Option<String>,
    pub payout: Option<BitcoinPayout>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedQuote {
    pub request: QuoteRequest,
    pub quote: LpQuote,
    pub signature_expiry: u64,
    pub price_info: PriceInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum LpError {
    #[error("LP unavailable: {0:#}")]
    Transient(anyhow::Error),
    #[error("LP rejected the request: {0}")]
    Rejected(String),
}

impl From<LpError> for SwapError {
    fn from(err: LpError) -> Self {
        match err {
            LpError::Transient(e) => SwapError::Network(e),
            LpError::Rejected(msg) => SwapError::InvalidInput(msg),
        }
    }
}

/// What the LP says about the Bitcoin side of a swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    /// Pre-image for Lightning legs, payout txid for on-chain ones.
    Paid { proof: String },
    /// The LP gave up and authorizes a cooperative refund.
    Refundable { authorization: SignatureData },
    NotFound,
}

#[async_trait]
pub trait Intermediary: Send + Sync {
    async fn request_quote(
        &self,
        request: &QuoteRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<LpQuote, LpError>;

    async fn payment_status(
        &self,
        swap: &EscrowSwap,
        cancel: &CancellationToken,
    ) -> anyhow::Result<PaymentStatus>;
}

fn counterparty(msg: impl Into<String>) -> SwapError {
    SwapError::Counterparty(msg.into())
}

pub struct QuoteVerifier {
    contract: Arc<dyn SwapContract>,
    lp: Arc<dyn Intermediary>,
    prices: Arc<PriceChecker>,
    retry: RetryConfig,
    authorization_ceiling: Duration,
    network: bitcoin::Network,
}

impl QuoteVerifier {
    pub fn new(
        contract: Arc<dyn SwapContract>,
        lp: Arc<dyn Intermediary>,
        prices: Arc<PriceChecker>,
        retry: RetryConfig,
        authorization_ceiling: Duration,
        network: bitcoin::Network,
    ) -> Self {
        Self {
            contract,
            lp,
            prices,
            retry,
            authorization_ceiling,
            network,
        }
    }

    pub async fn fetch_quote(
        &self,
        request: &QuoteRequest,
        cancel: &CancellationToken,
    ) -> Result<LpQuote> {
        retry_with_timeout(
            "quote request",
            &self.retry,
            cancel,
            |e| matches!(e, SwapError::Network(_) | SwapError::Timeout(_)),
            || async { self.lp.request_quote(request, cancel).await.map_err(SwapError::from) },
        )
        .await
    }

    /// Fetches a quote and runs every check on it. The market price, the
    /// USD display price and the verification context are fetched alongside
    /// the quote.
    pub async fn fetch_and_verify(
        &self,
        request: QuoteRequest,
        cancel: &CancellationToken,
    ) -> Result<VerifiedQuote> {
        let (quote, price, context, usd) = tokio::try_join!(
            self.fetch_quote(&request, cancel),
            self.prices.pre_fetch_price(&request.token, cancel),
            async {
                self.contract
                    .pre_fetch_verification_context(cancel)
                    .await
                    .map_err(SwapError::Network)
            },
            async {
                match self.prices.pre_fetch_usd_price(cancel).await {
                    Ok(usd) => Ok(Some(usd)),
                    Err(SwapError::Cancelled) => Err(SwapError::Cancelled),
                    Err(err) => {
                        tracing::debug!(error = %err, "usd price unavailable");
                        Ok(None)
                    }
                }
            },
        )?;
        self.verify(request, quote, price, context.as_ref(), usd, cancel)
            .await
    }

    pub async fn verify(
        &self,
        request: QuoteRequest,
        quote: LpQuote,
        pre_fetched_price: Option<u128>,
        context: Option<&VerificationContext>,
        usd_price: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<VerifiedQuote> {
        let now = crate::now_secs();
        self.verify_escrow_fields(&request, &quote, now)?;
        let signature_expiry = self.verify_signature(&quote, context, now, cancel).await?;
        let mut price_info = self
            .verify_price(request.swap_type, &quote, pre_fetched_price, cancel)
            .await?;
        price_info.real_price_usd_per_bitcoin = usd_price;

        Ok(VerifiedQuote {
            request,
            quote,
            signature_expiry,
            price_info,
        })
    }

    pub fn verify_escrow_fields(
        &self,
        request: &QuoteRequest,
        quote: &LpQuote,
        now: u64,
    ) -> Result<()> {
        let escrow = &quote.escrow;
        if escrow.token != request.token {
            return Err(counterparty(format!(
                "escrow token {} does not match requested {}",
                escrow.token, request.token
            )));
        }

        let user_role = if request.swap_type.is_to_btc() {
            &escrow.offerer
        } else {
            &escrow.claimer
        };
        if *user_role != request.user {
            return Err(counterparty("escrow does not name the user in its role"));
        }
        if escrow.offerer == escrow.claimer {
            return Err(counterparty("escrow offerer and claimer are the same"));
        }
        if escrow.pay_in != request.swap_type.is_to_btc() {
            return Err(counterparty("escrow pay-in flag does not match the direction"));
        }

        match request.amount {
            RequestedAmount::Sats(sats) if quote.amount_sats != sats => {
                return Err(counterparty(format!(
                    "quoted {} sats, requested {sats}",
                    quote.amount_sats
                )));
            }
            RequestedAmount::Token(amount) if escrow.amount != amount => {
                return Err(counterparty(format!(
                    "escrow amount {} does not match requested {amount}",
                    escrow.amount
                )));
            }
            _ => {}
        }
        if escrow.amount == 0 || quote.amount_sats == 0 {
            return Err(counterparty("zero amount quote"));
        }

        if let Some(hash) = &request.claim_hash
            && !hash.eq_ignore_ascii_case(&escrow.claim_hash)
        {
            return Err(counterparty("escrow claim hash does not match the request"));
        }
        self.verify_claim_condition(request, quote, now)?;

        if escrow.expiry <= now {
            return Err(counterparty("escrow expiry is in the past"));
        }
        if quote.expiry <= now {
            return Err(counterparty("quote already expired"));
        }
        Ok(())
    }

    /// The claim hash has to commit to the Bitcoin side of this very swap.
    fn verify_claim_condition(&self, request: &QuoteRequest, quote: &LpQuote, now: u64) -> Result<()> {
        let escrow = &quote.escrow;
        match request.swap_type {
            SwapType::ToBtcLn | SwapType::FromBtcLn => {
                let invoice = match request.swap_type {
                    SwapType::ToBtcLn => request.lightning_invoice.as_deref().ok_or_else(|| {
                        SwapError::InvalidInput("lightning invoice required".to_string())
                    })?,
                    _ => quote
                        .lightning_invoice
                        .as_deref()
                        .ok_or_else(|| counterparty("quote carries no lightning invoice"))?,
                };
                let terms = parse_bolt11(invoice).map_err(|e| {
                    if request.swap_type == SwapType::ToBtcLn {
                        SwapError::InvalidInput(format!("{e:#}"))
                    } else {
                        SwapError::Counterparty(format!("{e:#}"))
                    }
                })?;
                if escrow.kind != EscrowKind::Htlc {
                    return Err(counterparty("lightning swap escrow must be an HTLC"));
                }
                let expected = self.contract.lightning_claim_hash(&terms.payment_hash);
                if !expected.eq_ignore_ascii_case(&escrow.claim_hash) {
                    return Err(counterparty("escrow claim hash does not match the invoice"));
                }
                let Some(msat) = terms.amount_msat else {
                    return Err(if request.swap_type == SwapType::ToBtcLn {
                        SwapError::InvalidInput("lightning invoice carries no amount".to_string())
                    } else {
                        counterparty("quote invoice carries no amount")
                    });
                };
                if u128::from(msat / 1000) != quote.amount_sats {
                    return Err(counterparty("invoice amount does not match the quote"));
                }
                if terms.expires_at <= now {
                    return Err(counterparty("lightning invoice already expired"));
                }
            }
            SwapType::ToBtc | SwapType::FromBtc => {
                let (address, amount_sats) = match request.swap_type {
                    SwapType::ToBtc => (
                        request.payout_address.as_deref().ok_or_else(|| {
                            SwapError::InvalidInput("payout address required".to_string())
                        })?,
                        quote.amount_sats,
                    ),
                    _ => {
                        let payout = quote
                            .payout
                            .as_ref()
                            .ok_or_else(|| counterparty("quote carries no bitcoin address"))?;
                        if payout.amount_sats != quote.amount_sats {
                            return Err(counterparty(format!(
                                "deposit of {} sats does not match the quoted {}",
                                payout.amount_sats, quote.amount_sats
                            )));
                        }
                        (payout.address.as_str(), payout.amount_sats)
                    }
                };
                if escrow.kind != EscrowKind::Ptlc {
                    return Err(counterparty("on-chain swap escrow must be a PTLC"));
                }
                let script = bitcoin::Address::from_str(address)
                    .and_then(|a| a.require_network(self.network))
                    .map_err(|e| counterparty(format!("invalid bitcoin address {address}: {e}")))?
                    .script_pubkey();
                let amount = u64::try_from(amount_sats)
                    .map_err(|_| counterparty("bitcoin amount out of range"))?;
                let expected = self.contract.onchain_claim_hash(
                    script.as_bytes(),
                    amount,
                    escrow.confirmations,
                    escrow.nonce,
                );
                if !expected.eq_ignore_ascii_case(&escrow.claim_hash) {
                    return Err(counterparty("escrow claim hash does not match the payout"));
                }
            }
        }
        Ok(())
    }

    /// Returns the admissible authorization expiry:
    /// `min(stated expiry, now + ceiling)`.
    pub async fn verify_signature(
        &self,
        quote: &LpQuote,
        context: Option<&VerificationContext>,
        now: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.contract
            .is_valid_init_authorization(&quote.escrow, &quote.signature, context, cancel)
            .await
            .map_err(|e| {
                if cancel.is_cancelled() {
                    SwapError::Cancelled
                } else {
                    SwapError::SignatureVerification(format!("{e:#}"))
                }
            })?;
        let stated = self
            .contract
            .init_authorization_expiry(&quote.escrow, &quote.signature, context)
            .await
            .map_err(|e| SwapError::SignatureVerification(format!("{e:#}")))?;

        let expiry = stated.min(now.saturating_add(self.authorization_ceiling.as_secs()));
        if expiry <= now {
            return Err(SwapError::SignatureExpired { expiry });
        }
        Ok(expiry)
    }

    pub async fn verify_price(
        &self,
        swap_type: SwapType,
        quote: &LpQuote,
        pre_fetched: Option<u128>,
        cancel: &CancellationToken,
    ) -> Result<PriceInfo> {
        let escrow = &quote.escrow;
        let info = if swap_type.is_to_btc() {
            // The network fee is paid in token on top of the swap itself.
            let paid_token = escrow
                .amount
                .checked_sub(quote.fees.network_fee.amount_in_token)
                .ok_or_else(|| counterparty("network fee exceeds the escrow amount"))?;
            self.prices
                .is_valid_amount_send(
                    quote.amount_sats,
                    quote.sats_base_fee,
                    quote.fee_ppm,
                    paid_token,
                    &escrow.token,
                    pre_fetched,
                    cancel,
                )
                .await?
        } else {
            self.prices
                .is_valid_amount_receive(
                    quote.amount_sats,
                    quote.sats_base_fee,
                    quote.fee_ppm,
                    escrow.amount,
                    &escrow.token,
                    pre_fetched,
                    cancel,
                )
                .await?
        };

        if !info.is_valid {
            return Err(SwapError::PriceOutOfTolerance {
                difference_ppm: info.difference_ppm,
                max_allowed_ppm: self.prices.max_allowed_fee_difference_ppm(),
            });
        }
        Ok(info)
    }
}
