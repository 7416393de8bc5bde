//! Failover aggregation over several [`PriceSource`]s with a short-lived cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use futures::future::select_ok;
use tokio_util::sync::CancellationToken;

use super::source::PriceSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Not tried yet, or left behind by a race someone else won.
    Unknown,
    Operational,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

pub struct RedundantPriceSource {
    providers: Vec<Arc<dyn PriceSource>>,
    statuses: Mutex<Vec<ProviderStatus>>,
    prices: Mutex<HashMap<String, Cached<u128>>>,
    usd: Mutex<Option<Cached<f64>>>,
    cache_timeout: Duration,
    request_timeout: Duration,
}

impl RedundantPriceSource {
    pub fn new(
        providers: Vec<Arc<dyn PriceSource>>,
        cache_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!providers.is_empty(), "at least one price provider is required");
        let statuses = vec![ProviderStatus::Unknown; providers.len()];
        Ok(Self {
            providers,
            statuses: Mutex::new(statuses),
            prices: Mutex::new(HashMap::new()),
            usd: Mutex::new(None),
            cache_timeout,
            request_timeout,
        })
    }

    pub fn provider_statuses(&self) -> Vec<(String, ProviderStatus)> {
        let statuses = self.statuses.lock().expect("statuses mutex poisoned");
        self.providers
            .iter()
            .zip(statuses.iter())
            .map(|(p, s)| (p.name().to_string(), *s))
            .collect()
    }

    fn operational(&self) -> Option<usize> {
        self.statuses
            .lock()
            .expect("statuses mutex poisoned")
            .iter()
            .position(|s| *s == ProviderStatus::Operational)
    }

    fn mark_failed(&self, idx: usize) {
        self.statuses.lock().expect("statuses mutex poisoned")[idx] = ProviderStatus::Failed;
    }

    fn mark_operational(&self, idx: usize) {
        let mut statuses = self.statuses.lock().expect("statuses mutex poisoned");
        for (i, status) in statuses.iter_mut().enumerate() {
            if i == idx {
                *status = ProviderStatus::Operational;
            } else if *status == ProviderStatus::Operational {
                *status = ProviderStatus::Unknown;
            }
        }
    }

    /// Everything not known to be broken. When every provider has failed the
    /// slate is wiped so the next race tries them all again.
    fn maybe_operational(&self) -> Vec<usize> {
        let mut statuses = self.statuses.lock().expect("statuses mutex poisoned");
        let candidates: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != ProviderStatus::Failed)
            .map(|(i, _)| i)
            .collect();
        if !candidates.is_empty() {
            return candidates;
        }
        statuses.fill(ProviderStatus::Unknown);
        (0..statuses.len()).collect()
    }

    async fn call<T, F, Fut>(&self, idx: usize, fetch: &F) -> Result<T>
    where
        F: Fn(Arc<dyn PriceSource>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let provider = self.providers[idx].clone();
        let name = provider.name().to_string();
        tokio::time::timeout(self.request_timeout, fetch(provider))
            .await
            .map_err(|_| anyhow::anyhow!("price provider {name} timed out"))?
            .with_context(|| format!("price provider {name}"))
    }

    async fn with_failover<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn PriceSource>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(idx) = self.operational() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => anyhow::bail!("price fetch cancelled"),
                r = self.call(idx, &fetch) => r,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        provider = self.providers[idx].name(),
                        what,
                        error = %format!("{err:#}"),
                        "operational price provider failed; racing the others"
                    );
                    self.mark_failed(idx);
                }
            }
        }

        let racers = self.maybe_operational().into_iter().map(|idx| {
            let fetch = &fetch;
            Box::pin(async move {
                match self.call(idx, fetch).await {
                    Ok(value) => Ok((idx, value)),
                    Err(err) => {
                        tracing::debug!(provider = self.providers[idx].name(), error = %format!("{err:#}"), "price provider failed");
                        self.mark_failed(idx);
                        Err(err)
                    }
                }
            })
        });

        let (idx, value) = tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("price fetch cancelled"),
            r = select_ok(racers) => r.map(|(won, _rest)| won).with_context(|| format!("all price providers failed for {what}"))?,
        };
        tracing::info!(provider = self.providers[idx].name(), what, "price provider now operational");
        self.mark_operational(idx);
        Ok(value)
    }

    fn cached_price(&self, token: &str) -> Option<u128> {
        let prices = self.prices.lock().expect("price cache mutex poisoned");
        prices
            .get(token)
            .filter(|c| c.fetched_at.elapsed() < self.cache_timeout)
            .map(|c| c.value)
    }
}

#[async_trait]
impl PriceSource for RedundantPriceSource {
    fn name(&self) -> &str {
        "redundant"
    }

    async fn fetch_price(&self, token: &str, cancel: &CancellationToken) -> Result<u128> {
        if let Some(price) = self.cached_price(token) {
            return Ok(price);
        }

        let price = self
            .with_failover(token, cancel, |provider| {
                let token = token.to_string();
                let cancel = cancel.clone();
                async move { provider.fetch_price(&token, &cancel).await }
            })
            .await?;

        self.prices.lock().expect("price cache mutex poisoned").insert(
            token.to_string(),
            Cached {
                value: price,
                fetched_at: Instant::now(),
            },
        );
        Ok(price)
    }

    async fn fetch_usd_price(&self, cancel: &CancellationToken) -> Result<f64> {
        let cached = *self.usd.lock().expect("usd cache mutex poisoned");
        if let Some(c) = cached
            && c.fetched_at.elapsed() < self.cache_timeout
        {
            return Ok(c.value);
        }

        let price = self
            .with_failover("usd", cancel, |provider| {
                let cancel = cancel.clone();
                async move { provider.fetch_usd_price(&cancel).await }
            })
            .await?;

        *self.usd.lock().expect("usd cache mutex poisoned") = Some(Cached {
            value: price,
            fetched_at: Instant::now(),
        });
        Ok(price)
    }
}
