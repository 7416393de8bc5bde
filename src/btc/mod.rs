pub mod payout;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BtcTransaction {
    pub tx: bitcoin::Transaction,
    /// `0` while unconfirmed.
    pub confirmations: u32,
}

/// Read-only Bitcoin node/indexer access.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    fn network(&self) -> bitcoin::Network;

    async fn get_transaction(
        &self,
        txid: &bitcoin::Txid,
        cancel: &CancellationToken,
    ) -> Result<Option<BtcTransaction>>;
}
