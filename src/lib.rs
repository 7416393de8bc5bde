pub mod btc;
pub mod chain;
pub mod config;
pub mod error;
pub mod lightning;
pub mod logging;
pub mod pricing;
pub mod quote;
pub mod retry;
pub mod serde_amount;
pub mod swap;

pub use error::{Result, SwapError};

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
