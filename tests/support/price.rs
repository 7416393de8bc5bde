use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use escrow_swap::pricing::source::PriceSource;

/// 1 whole 8-decimal token = 1 BTC = 10^14 μsat.
pub const BTC_PEGGED_PRICE: u128 = 100_000_000_000_000;

pub struct MockPriceSource {
    name: String,
    price: Mutex<u128>,
    usd: f64,
    delay: Duration,
    failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockPriceSource {
    pub fn new(name: &str, price: u128) -> Self {
        Self {
            name: name.to_string(),
            price: Mutex::new(price),
            usd: 60_000.0,
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_price(&self, price: u128) {
        *self.price.lock().expect("price mutex poisoned") = price;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        anyhow::ensure!(!self.failing.load(Ordering::SeqCst), "{} is down", self.name);
        Ok(())
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_price(&self, _token: &str, _cancel: &CancellationToken) -> Result<u128> {
        self.respond().await?;
        Ok(*self.price.lock().expect("price mutex poisoned"))
    }

    async fn fetch_usd_price(&self, _cancel: &CancellationToken) -> Result<f64> {
        self.respond().await?;
        Ok(self.usd)
    }
}
