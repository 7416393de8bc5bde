mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use escrow_swap::pricing::redundant::{ProviderStatus, RedundantPriceSource};
use escrow_swap::pricing::source::PriceSource;

use support::price::MockPriceSource;

struct Providers {
    a: Arc<MockPriceSource>,
    b: Arc<MockPriceSource>,
    c: Arc<MockPriceSource>,
}

fn providers() -> Providers {
    Providers {
        a: Arc::new(MockPriceSource::new("a", 100)),
        b: Arc::new(MockPriceSource::new("b", 200).with_delay(Duration::from_millis(20))),
        c: Arc::new(MockPriceSource::new("c", 300).with_delay(Duration::from_millis(40))),
    }
}

fn oracle(p: &Providers, cache_timeout: Duration) -> Result<RedundantPriceSource> {
    RedundantPriceSource::new(
        vec![p.a.clone(), p.b.clone(), p.c.clone()],
        cache_timeout,
        Duration::from_secs(1),
    )
}

fn statuses(oracle: &RedundantPriceSource) -> Vec<ProviderStatus> {
    oracle
        .provider_statuses()
        .into_iter()
        .map(|(_, s)| s)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn fails_over_across_three_providers() -> Result<()> {
    use ProviderStatus::{Failed, Operational, Unknown};

    let p = providers();
    let oracle = oracle(&p, Duration::ZERO)?;
    let cancel = CancellationToken::new();

    // Nobody known yet: race, fastest wins.
    assert_eq!(oracle.fetch_price("WBTC", &cancel).await?, 100);
    assert_eq!(statuses(&oracle), vec![Operational, Unknown, Unknown]);

    p.a.set_failing(true);
    assert_eq!(oracle.fetch_price("WBTC", &cancel).await?, 200);
    assert_eq!(statuses(&oracle), vec![Failed, Operational, Unknown]);

    p.b.set_failing(true);
    assert_eq!(oracle.fetch_price("WBTC", &cancel).await?, 300);
    assert_eq!(statuses(&oracle), vec![Failed, Failed, Operational]);

    p.c.set_failing(true);
    assert!(oracle.fetch_price("WBTC", &cancel).await.is_err());
    assert_eq!(statuses(&oracle), vec![Failed, Failed, Failed]);

    // Everyone failed: the next call resets and races all of them again.
    p.a.set_failing(false);
    assert_eq!(oracle.fetch_price("WBTC", &cancel).await?, 100);
    assert_eq!(statuses(&oracle), vec![Operational, Unknown, Unknown]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn operational_provider_is_asked_alone() -> Result<()> {
    let p = providers();
    let oracle = oracle(&p, Duration::ZERO)?;
    let cancel = CancellationToken::new();

    oracle.fetch_price("WBTC", &cancel).await?;
    let raced = (p.b.calls(), p.c.calls());
    oracle.fetch_price("WBTC", &cancel).await?;
    oracle.fetch_usd_price(&cancel).await?;
    assert_eq!((p.b.calls(), p.c.calls()), raced);
    assert_eq!(p.a.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn prices_are_cached_per_token() -> Result<()> {
    let p = providers();
    let oracle = oracle(&p, Duration::from_secs(60))?;
    let cancel = CancellationToken::new();

    assert_eq!(oracle.fetch_price("WBTC", &cancel).await?, 100);
    p.a.set_price(150);
    assert_eq!(oracle.fetch_price("WBTC", &cancel).await?, 100);
    assert_eq!(oracle.fetch_price("TBTC", &cancel).await?, 150);
    assert_eq!(p.a.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn cancellation_aborts_the_race() {
    let p = providers();
    p.a.set_failing(true);
    let oracle = oracle(&p, Duration::ZERO).expect("oracle");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = oracle.fetch_price("WBTC", &cancel).await.unwrap_err();
    assert!(err.to_string().contains("cancelled"));
}

#[test]
fn empty_provider_list_is_rejected() {
    assert!(RedundantPriceSource::new(Vec::new(), Duration::ZERO, Duration::ZERO).is_err());
}
