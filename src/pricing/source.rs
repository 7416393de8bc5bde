use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A market-data provider.
///
/// Prices are in micro-satoshis per whole token (`10^decimals` base units).
/// Concrete exchange and aggregator clients implement this outside the crate.
#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_price(&self, token: &str, cancel: &CancellationToken) -> Result<u128>;

    /// USD per one bitcoin. Display only, never used for amounts.
    async fn fetch_usd_price(&self, cancel: &CancellationToken) -> Result<f64>;
}
