use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use escrow_swap::quote::{Intermediary, LpError, LpQuote, PaymentStatus, QuoteRequest};
use escrow_swap::swap::EscrowSwap;

pub struct MockLp {
    quote: Mutex<Option<LpQuote>>,
    payment: Mutex<PaymentStatus>,
    /// Transient failures to return before the quote.
    transient_failures: AtomicUsize,
    reject: Mutex<Option<String>>,
    pub quote_calls: AtomicUsize,
    pub payment_calls: AtomicUsize,
}

impl Default for MockLp {
    fn default() -> Self {
        Self {
            quote: Mutex::new(None),
            payment: Mutex::new(PaymentStatus::Pending),
            transient_failures: AtomicUsize::new(0),
            reject: Mutex::new(None),
            quote_calls: AtomicUsize::new(0),
            payment_calls: AtomicUsize::new(0),
        }
    }
}

impl MockLp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, quote: LpQuote) {
        *self.quote.lock().expect("quote mutex poisoned") = Some(quote);
    }

    pub fn fail_transiently(&self, times: usize) {
        self.transient_failures.store(times, Ordering::SeqCst);
    }

    pub fn reject_with(&self, reason: &str) {
        *self.reject.lock().expect("reject mutex poisoned") = Some(reason.to_string());
    }

    pub fn set_payment(&self, status: PaymentStatus) {
        *self.payment.lock().expect("payment mutex poisoned") = status;
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Intermediary for MockLp {
    async fn request_quote(
        &self,
        _request: &QuoteRequest,
        _cancel: &CancellationToken,
    ) -> Result<LpQuote, LpError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.reject.lock().expect("reject mutex poisoned").clone() {
            return Err(LpError::Rejected(reason));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LpError::Transient(anyhow::anyhow!("connection reset")));
        }
        self.quote
            .lock()
            .expect("quote mutex poisoned")
            .clone()
            .ok_or_else(|| LpError::Rejected("no quote configured".to_string()))
    }

    async fn payment_status(
        &self,
        _swap: &EscrowSwap,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<PaymentStatus> {
        self.payment_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payment.lock().expect("payment mutex poisoned").clone())
    }
}
