use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::{Amount, ScriptBuf, Transaction, TxOut, Txid};
use tokio_util::sync::CancellationToken;

use escrow_swap::btc::{BitcoinRpc, BtcTransaction};

pub struct MockBitcoin {
    network: bitcoin::Network,
    txs: Mutex<HashMap<Txid, BtcTransaction>>,
}

impl MockBitcoin {
    pub fn new(network: bitcoin::Network) -> Self {
        Self {
            network,
            txs: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `tx` and returns its txid.
    pub fn add(&self, tx: Transaction, confirmations: u32) -> Txid {
        let txid = tx.compute_txid();
        self.txs
            .lock()
            .expect("txs mutex poisoned")
            .insert(txid, BtcTransaction { tx, confirmations });
        txid
    }

    pub fn confirm(&self, txid: &Txid, confirmations: u32) {
        if let Some(tx) = self.txs.lock().expect("txs mutex poisoned").get_mut(txid) {
            tx.confirmations = confirmations;
        }
    }
}

#[async_trait]
impl BitcoinRpc for MockBitcoin {
    fn network(&self) -> bitcoin::Network {
        self.network
    }

    async fn get_transaction(
        &self,
        txid: &Txid,
        _cancel: &CancellationToken,
    ) -> Result<Option<BtcTransaction>> {
        Ok(self.txs.lock().expect("txs mutex poisoned").get(txid).cloned())
    }
}

pub fn transaction(outputs: &[(ScriptBuf, u64)]) -> Transaction {
    Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: Vec::new(),
        output: outputs
            .iter()
            .map(|(script, sats)| TxOut {
                value: Amount::from_sat(*sats),
                script_pubkey: script.clone(),
            })
            .collect(),
    }
}
