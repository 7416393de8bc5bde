use crate::swap::SwapState;

pub type Result<T, E = SwapError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// Caller supplied something unusable; nothing was mutated.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// LP returned data that does not match what was asked for.
    #[error("counterparty returned invalid data: {0}")]
    Counterparty(String),

    #[error("price deviation {difference_ppm} ppm exceeds tolerance {max_allowed_ppm} ppm")]
    PriceOutOfTolerance {
        difference_ppm: i128,
        max_allowed_ppm: i128,
    },

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("authorization expired at {expiry}")]
    SignatureExpired { expiry: u64 },

    #[error("swap {swap_id} is in state {actual:?}, operation requires {expected}")]
    InvalidState {
        swap_id: String,
        actual: SwapState,
        expected: &'static str,
    },

    #[error("swap {swap_id} was already claimed by the counterparty")]
    ClaimedByCounterparty { swap_id: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("storage: {0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Network(#[from] anyhow::Error),
}

impl SwapError {
    pub fn invalid_state(swap_id: &str, actual: SwapState, expected: &'static str) -> Self {
        Self::InvalidState {
            swap_id: swap_id.to_string(),
            actual,
            expected,
        }
    }

    /// Counterparty-side failures: the quote or action is discarded before funds move.
    pub fn is_counterparty(&self) -> bool {
        matches!(
            self,
            Self::Counterparty(_) | Self::PriceOutOfTolerance { .. } | Self::SignatureVerification(_)
        )
    }
}
