//! Price checks for LP quotes.
//!
//! Prices are micro-satoshis (μsat) per whole token. Every amount is an exact
//! integer; intermediate products are checked for overflow.

pub mod redundant;
pub mod source;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Result, SwapError};
use source::PriceSource;

/// Decimals value marking a token without a market price (fixed-peg assets).
pub const IGNORED_DECIMALS: i32 = -1;

const PPM: u128 = 1_000_000;
/// Divisor of the receive-direction deviation. Kept as deployed; the send
/// direction uses [`PPM`].
const RECEIVE_DIFFERENCE_DIVISOR: i128 = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    pub is_valid: bool,
    #[serde(with = "crate::serde_amount")]
    pub difference_ppm: i128,
    #[serde(with = "crate::serde_amount")]
    pub sats_base_fee: u128,
    #[serde(with = "crate::serde_amount")]
    pub fee_ppm: u128,
    #[serde(with = "crate::serde_amount")]
    pub swap_price_usat_per_token: u128,
    #[serde(with = "crate::serde_amount::option")]
    pub real_price_usat_per_token: Option<u128>,
    pub real_price_usd_per_bitcoin: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDecimals {
    Priced(u32),
    Ignored,
}

impl TokenDecimals {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            IGNORED_DECIMALS => Ok(Self::Ignored),
            d if d >= 0 => Ok(Self::Priced(d as u32)),
            d => Err(SwapError::InvalidInput(format!("invalid token decimals {d}"))),
        }
    }
}

fn overflow() -> SwapError {
    SwapError::InvalidInput("amount arithmetic overflow".to_string())
}

fn pow10(decimals: u32) -> Result<u128> {
    10u128.checked_pow(decimals).ok_or_else(overflow)
}

fn mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or_else(overflow)
}

fn signed(v: u128) -> Result<i128> {
    i128::try_from(v).map_err(|_| overflow())
}

/// Sats -> token base units: `sats · 10^decimals · 1_000_000 / price`.
pub fn to_token_amount(sats: u128, decimals: u32, price_usat_per_token: u128) -> Result<u128> {
    if price_usat_per_token == 0 {
        return Err(SwapError::Network(anyhow::anyhow!("price source returned zero price")));
    }
    Ok(mul(mul(sats, pow10(decimals)?)?, PPM)? / price_usat_per_token)
}

/// Token base units -> sats: `amount · price / 1_000_000 / 10^decimals`.
pub fn to_sats_amount(token_amount: u128, decimals: u32, price_usat_per_token: u128) -> Result<u128> {
    Ok(mul(token_amount, price_usat_per_token)? / PPM / pow10(decimals)?)
}

/// μsat per whole token implied by paying `total_sats` for `token_amount`.
fn implied_price(total_sats: u128, token_amount: u128, decimals: u32) -> Result<u128> {
    if token_amount == 0 {
        return Err(SwapError::InvalidInput("token amount must be > 0".to_string()));
    }
    Ok(mul(mul(total_sats, PPM)?, pow10(decimals)?)? / token_amount)
}

fn send_total_sats(amount_sats: u128, sats_base_fee: u128, fee_ppm: u128) -> Result<u128> {
    (mul(amount_sats, PPM.checked_add(fee_ppm).ok_or_else(overflow)?)? / PPM)
        .checked_add(sats_base_fee)
        .ok_or_else(overflow)
}

fn receive_total_sats(amount_sats: u128, sats_base_fee: u128, fee_ppm: u128) -> Result<u128> {
    let rate = PPM
        .checked_sub(fee_ppm)
        .ok_or_else(|| SwapError::Counterparty(format!("fee_ppm {fee_ppm} exceeds 100%")))?;
    (mul(amount_sats, rate)? / PPM)
        .checked_sub(sats_base_fee)
        .ok_or_else(|| SwapError::Counterparty("fees exceed the swapped amount".to_string()))
}

/// Validates quoted prices against the market.
pub struct PriceChecker {
    source: Arc<dyn PriceSource>,
    tokens: HashMap<String, i32>,
    max_allowed_fee_difference_ppm: i128,
}

impl PriceChecker {
    /// `tokens` maps token identifiers to their decimals ([`IGNORED_DECIMALS`] for unpriced ones).
    pub fn new(
        source: Arc<dyn PriceSource>,
        tokens: HashMap<String, i32>,
        max_allowed_fee_difference_ppm: u64,
    ) -> Self {
        Self {
            source,
            tokens,
            max_allowed_fee_difference_ppm: max_allowed_fee_difference_ppm as i128,
        }
    }

    pub fn max_allowed_fee_difference_ppm(&self) -> i128 {
        self.max_allowed_fee_difference_ppm
    }

    pub fn decimals(&self, token: &str) -> Result<TokenDecimals> {
        let raw = self
            .tokens
            .get(token)
            .ok_or_else(|| SwapError::InvalidInput(format!("unsupported token {token}")))?;
        TokenDecimals::from_raw(*raw)
    }

    pub fn should_ignore(&self, token: &str) -> bool {
        matches!(self.decimals(token), Ok(TokenDecimals::Ignored))
    }

    /// Resolves the price early so later checks in the same flow skip the fetch.
    /// `None` for price-ignored tokens.
    pub async fn pre_fetch_price(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<u128>> {
        match self.decimals(token)? {
            TokenDecimals::Ignored => Ok(None),
            TokenDecimals::Priced(_) => self.fetch(token, cancel).await.map(Some),
        }
    }

    pub async fn pre_fetch_usd_price(&self, cancel: &CancellationToken) -> Result<f64> {
        self.source
            .fetch_usd_price(cancel)
            .await
            .map_err(|e| network_or_cancelled(e, cancel))
    }

    async fn fetch(&self, token: &str, cancel: &CancellationToken) -> Result<u128> {
        self.source
            .fetch_price(token, cancel)
            .await
            .map_err(|e| network_or_cancelled(e, cancel))
    }

    async fn price(
        &self,
        token: &str,
        pre_fetched: Option<u128>,
        cancel: &CancellationToken,
    ) -> Result<u128> {
        match pre_fetched {
            Some(price) => Ok(price),
            None => self.fetch(token, cancel).await,
        }
    }

    /// Token base units worth `sats` at market price. Zero for price-ignored tokens.
    pub async fn get_from_btc_swap_amount(
        &self,
        sats: u128,
        token: &str,
        pre_fetched: Option<u128>,
        cancel: &CancellationToken,
    ) -> Result<u128> {
        match self.decimals(token)? {
            TokenDecimals::Ignored => Ok(0),
            TokenDecimals::Priced(decimals) => {
                let price = self.price(token, pre_fetched, cancel).await?;
                to_token_amount(sats, decimals, price)
            }
        }
    }

    /// Sats worth `token_amount` base units at market price. Zero for price-ignored tokens.
    pub async fn get_to_btc_swap_amount(
        &self,
        token_amount: u128,
        token: &str,
        pre_fetched: Option<u128>,
        cancel: &CancellationToken,
    ) -> Result<u128> {
        match self.decimals(token)? {
            TokenDecimals::Ignored => Ok(0),
            TokenDecimals::Priced(decimals) => {
                let price = self.price(token, pre_fetched, cancel).await?;
                to_sats_amount(token_amount, decimals, price)
            }
        }
    }

    /// Checks a quote where the user pays `paid_token` to receive `amount_sats`.
    #[allow(clippy::too_many_arguments)]
    pub async fn is_valid_amount_send(
        &self,
        amount_sats: u128,
        sats_base_fee: u128,
        fee_ppm: u128,
        paid_token: u128,
        token: &str,
        pre_fetched: Option<u128>,
        cancel: &CancellationToken,
    ) -> Result<PriceInfo> {
        let mut info =
            self.recompute_price_info_send(amount_sats, sats_base_fee, fee_ppm, paid_token, token)?;
        let TokenDecimals::Priced(decimals) = self.decimals(token)? else {
            return Ok(info);
        };

        let total_sats = send_total_sats(amount_sats, sats_base_fee, fee_ppm)?;
        let price = self.price(token, pre_fetched, cancel).await?;
        let market = to_token_amount(total_sats, decimals, price)?;
        if market == 0 {
            return Err(SwapError::InvalidInput(
                "amount too small to price against the market".to_string(),
            ));
        }

        // > 0 when the user pays more than the market asks for.
        let difference = signed(paid_token)? - signed(market)?;
        let difference_ppm = difference
            .checked_mul(PPM as i128)
            .ok_or_else(overflow)?
            / signed(market)?;

        info.real_price_usat_per_token = Some(price);
        info.difference_ppm = difference_ppm;
        info.is_valid = difference_ppm <= self.max_allowed_fee_difference_ppm;
        Ok(info)
    }

    /// Checks a quote where the user pays `amount_sats` to receive `receive_token`.
    #[allow(clippy::too_many_arguments)]
    pub async fn is_valid_amount_receive(
        &self,
        amount_sats: u128,
        sats_base_fee: u128,
        fee_ppm: u128,
        receive_token: u128,
        token: &str,
        pre_fetched: Option<u128>,
        cancel: &CancellationToken,
    ) -> Result<PriceInfo> {
        let mut info = self.recompute_price_info_receive(
            amount_sats,
            sats_base_fee,
            fee_ppm,
            receive_token,
            token,
        )?;
        let TokenDecimals::Priced(decimals) = self.decimals(token)? else {
            return Ok(info);
        };

        let total_sats = receive_total_sats(amount_sats, sats_base_fee, fee_ppm)?;
        let price = self.price(token, pre_fetched, cancel).await?;
        let market = to_token_amount(total_sats, decimals, price)?;
        if market == 0 {
            return Err(SwapError::InvalidInput(
                "amount too small to price against the market".to_string(),
            ));
        }

        // > 0 when the user receives less than the market would give.
        let difference = signed(market)? - signed(receive_token)?;
        let difference_ppm = difference
            .checked_mul(RECEIVE_DIFFERENCE_DIVISOR)
            .ok_or_else(overflow)?
            / signed(market)?;

        info.real_price_usat_per_token = Some(price);
        info.difference_ppm = difference_ppm;
        info.is_valid = difference_ppm <= self.max_allowed_fee_difference_ppm;
        Ok(info)
    }

    /// Price info for a send quote without consulting the market.
    pub fn recompute_price_info_send(
        &self,
        amount_sats: u128,
        sats_base_fee: u128,
        fee_ppm: u128,
        paid_token: u128,
        token: &str,
    ) -> Result<PriceInfo> {
        let total_sats = send_total_sats(amount_sats, sats_base_fee, fee_ppm)?;
        self.unchecked_info(total_sats, sats_base_fee, fee_ppm, paid_token, token)
    }

    /// Price info for a receive quote without consulting the market.
    pub fn recompute_price_info_receive(
        &self,
        amount_sats: u128,
        sats_base_fee: u128,
        fee_ppm: u128,
        receive_token: u128,
        token: &str,
    ) -> Result<PriceInfo> {
        let total_sats = receive_total_sats(amount_sats, sats_base_fee, fee_ppm)?;
        self.unchecked_info(total_sats, sats_base_fee, fee_ppm, receive_token, token)
    }

    fn unchecked_info(
        &self,
        total_sats: u128,
        sats_base_fee: u128,
        fee_ppm: u128,
        token_amount: u128,
        token: &str,
    ) -> Result<PriceInfo> {
        let decimals = match self.decimals(token)? {
            TokenDecimals::Priced(d) => d,
            TokenDecimals::Ignored => 0,
        };
        Ok(PriceInfo {
            is_valid: true,
            difference_ppm: 0,
            sats_base_fee,
            fee_ppm,
            swap_price_usat_per_token: implied_price(total_sats, token_amount, decimals)?,
            real_price_usat_per_token: None,
            real_price_usd_per_bitcoin: None,
        })
    }
}

fn network_or_cancelled(err: anyhow::Error, cancel: &CancellationToken) -> SwapError {
    if cancel.is_cancelled() {
        SwapError::Cancelled
    } else {
        SwapError::Network(err)
    }
}
