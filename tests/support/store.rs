use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;

use escrow_swap::swap::EscrowSwap;
use escrow_swap::swap::store::{MemorySwapStore, QueryParam, SwapStore};

/// Memory store that counts writes and can be told to fail the next one.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemorySwapStore,
    pub saves: AtomicUsize,
    pub removes: AtomicUsize,
    pub fail_next_save: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes straight to the backing store without counting.
    pub fn seed(&self, swap: &EscrowSwap) {
        self.inner.save(swap).expect("seed swap");
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &str) -> Option<EscrowSwap> {
        self.inner
            .query(&[vec![QueryParam::id(id)]])
            .expect("query store")
            .into_iter()
            .next()
    }
}

impl CountingStore {
    fn check_write(&self) -> Result<()> {
        anyhow::ensure!(
            !self.fail_next_save.swap(false, Ordering::SeqCst),
            "disk full"
        );
        Ok(())
    }
}

impl SwapStore for CountingStore {
    fn save(&self, swap: &EscrowSwap) -> Result<()> {
        self.check_write()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(swap)
    }

    fn save_all(&self, swaps: &[EscrowSwap]) -> Result<()> {
        self.check_write()?;
        self.saves.fetch_add(swaps.len(), Ordering::SeqCst);
        self.inner.save_all(swaps)
    }

    fn remove(&self, swap: &EscrowSwap) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(swap)
    }

    fn remove_all(&self, swaps: &[EscrowSwap]) -> Result<()> {
        self.removes.fetch_add(swaps.len(), Ordering::SeqCst);
        self.inner.remove_all(swaps)
    }

    fn query(&self, params: &[Vec<QueryParam>]) -> Result<Vec<EscrowSwap>> {
        self.inner.query(params)
    }
}
