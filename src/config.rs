use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Deserialize;

use crate::retry::RetryConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub wrapper: WrapperConfig,
    pub price: PriceConfig,
    pub quote_retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,
    /// Write swaps to storage at quote time instead of on commit.
    pub persist_pre_commit: bool,
    /// How long past its expiry a quote is still treated as possibly committed.
    #[serde(with = "duration_ms")]
    pub quote_expiry_grace: Duration,
    /// Upper bound on how far in the future an LP authorization may expire.
    #[serde(with = "duration_ms")]
    pub authorization_ceiling: Duration,
    #[serde(with = "duration_ms")]
    pub commit_wait_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub chain_request_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub payment_poll_interval: Duration,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            persist_pre_commit: false,
            quote_expiry_grace: Duration::from_secs(60),
            authorization_ceiling: Duration::from_secs(3600),
            commit_wait_timeout: Duration::from_secs(120),
            chain_request_timeout: Duration::from_secs(30),
            payment_poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub max_allowed_fee_difference_ppm: u64,
    #[serde(with = "duration_ms")]
    pub cache_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            max_allowed_fee_difference_ppm: 10_000,
            cache_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ESCROW_SWAP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let w = &mut cfg.wrapper;
        w.tick_interval = read_env_ms("ESCROW_SWAP_TICK_INTERVAL_MS", w.tick_interval)?;
        w.persist_pre_commit = read_env("ESCROW_SWAP_PERSIST_PRE_COMMIT", w.persist_pre_commit)?;
        w.quote_expiry_grace =
            read_env_ms("ESCROW_SWAP_QUOTE_EXPIRY_GRACE_MS", w.quote_expiry_grace)?;
        w.authorization_ceiling =
            read_env_ms("ESCROW_SWAP_AUTHORIZATION_CEILING_MS", w.authorization_ceiling)?;
        w.commit_wait_timeout =
            read_env_ms("ESCROW_SWAP_COMMIT_WAIT_TIMEOUT_MS", w.commit_wait_timeout)?;
        w.chain_request_timeout =
            read_env_ms("ESCROW_SWAP_CHAIN_REQUEST_TIMEOUT_MS", w.chain_request_timeout)?;

        let p = &mut cfg.price;
        p.max_allowed_fee_difference_ppm = read_env(
            "ESCROW_SWAP_MAX_FEE_DIFFERENCE_PPM",
            p.max_allowed_fee_difference_ppm,
        )?;
        p.cache_timeout = read_env_ms("ESCROW_SWAP_PRICE_CACHE_MS", p.cache_timeout)?;
        p.request_timeout = read_env_ms("ESCROW_SWAP_PRICE_TIMEOUT_MS", p.request_timeout)?;

        let r = &mut cfg.quote_retry;
        r.timeout = read_env_ms("ESCROW_SWAP_QUOTE_TIMEOUT_MS", r.timeout)?;
        r.max_retries = read_env("ESCROW_SWAP_QUOTE_MAX_RETRIES", r.max_retries)?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        validate_nonzero("tick_interval", self.wrapper.tick_interval)?;
        validate_nonzero("commit_wait_timeout", self.wrapper.commit_wait_timeout)?;
        validate_nonzero("chain_request_timeout", self.wrapper.chain_request_timeout)?;
        validate_nonzero("authorization_ceiling", self.wrapper.authorization_ceiling)?;
        validate_nonzero("price.request_timeout", self.price.request_timeout)?;
        validate_nonzero("quote_retry.timeout", self.quote_retry.timeout)?;
        Ok(())
    }
}

fn validate_nonzero(label: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        Err(anyhow!("{label} must be greater than zero"))
    } else {
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(key: &str, fallback: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={value:?}: {e}")),
        Err(_) => Ok(fallback),
    }
}

fn read_env_ms(key: &str, fallback: Duration) -> Result<Duration> {
    read_env(key, fallback.as_millis() as u64).map(Duration::from_millis)
}

/// Durations as integer milliseconds in config files.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
