pub mod escrow;
pub mod from_btc;
pub mod reconcile;
pub mod store;
pub mod to_btc;
pub mod wrapper;

use serde::{Deserialize, Serialize};

pub use escrow::EscrowSwap;

/// Direction and primitive of a swap. Every variant is known up front, so
/// per-direction behaviour is looked up in a static table rather than
/// dispatched through trait objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapType {
    /// Smart chain -> Bitcoin on-chain.
    ToBtc,
    /// Smart chain -> Lightning.
    ToBtcLn,
    /// Bitcoin on-chain -> smart chain.
    FromBtc,
    /// Lightning -> smart chain.
    FromBtcLn,
}

impl SwapType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToBtc => "to_btc",
            Self::ToBtcLn => "to_btc_ln",
            Self::FromBtc => "from_btc",
            Self::FromBtcLn => "from_btc_ln",
        }
    }

    /// The user funds the escrow and the LP claims it.
    pub fn is_to_btc(self) -> bool {
        matches!(self, Self::ToBtc | Self::ToBtcLn)
    }

    pub fn is_lightning(self) -> bool {
        matches!(self, Self::ToBtcLn | Self::FromBtcLn)
    }

    pub fn handlers(self) -> &'static DirectionHandlers {
        if self.is_to_btc() {
            &to_btc::HANDLERS
        } else {
            &from_btc::HANDLERS
        }
    }
}

impl std::str::FromStr for SwapType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "to_btc" => Ok(Self::ToBtc),
            "to_btc_ln" => Ok(Self::ToBtcLn),
            "from_btc" => Ok(Self::FromBtc),
            "from_btc_ln" => Ok(Self::FromBtcLn),
            other => anyhow::bail!("unknown swap type: {other}"),
        }
    }
}

/// Swap state. The integer codes are what gets persisted and indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum SwapState {
    Refunded,
    QuoteExpired,
    QuoteSoftExpired,
    Created,
    Commited,
    SoftClaimed,
    Claimed,
    Refundable,
}

impl SwapState {
    pub fn code(self) -> i32 {
        match self {
            Self::Refunded => -3,
            Self::QuoteExpired => -2,
            Self::QuoteSoftExpired => -1,
            Self::Created => 0,
            Self::Commited => 1,
            Self::SoftClaimed => 2,
            Self::Claimed => 3,
            Self::Refundable => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::QuoteExpired | Self::Claimed | Self::Refunded)
    }

    /// No escrow exists on-chain yet (as far as we know).
    pub fn is_pre_commit(self) -> bool {
        matches!(
            self,
            Self::Created | Self::QuoteSoftExpired | Self::QuoteExpired
        )
    }
}

impl From<SwapState> for i32 {
    fn from(state: SwapState) -> Self {
        state.code()
    }
}

impl TryFrom<i32> for SwapState {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            -3 => Self::Refunded,
            -2 => Self::QuoteExpired,
            -1 => Self::QuoteSoftExpired,
            0 => Self::Created,
            1 => Self::Commited,
            2 => Self::SoftClaimed,
            3 => Self::Claimed,
            4 => Self::Refundable,
            other => return Err(format!("unknown swap state code: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowKind {
    /// Claimable with the pre-image of the claim hash.
    Htlc,
    /// Claimable with proof of a specific Bitcoin transaction output.
    Ptlc,
}

/// On-chain escrow record. Fixed once the commit transaction is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowData {
    pub offerer: String,
    pub claimer: String,
    pub token: String,
    #[serde(with = "crate::serde_amount")]
    pub amount: u128,
    pub claim_hash: String,
    pub escrow_hash: Option<String>,
    /// Unix seconds after which the offerer may refund.
    pub expiry: u64,
    #[serde(with = "crate::serde_amount")]
    pub total_deposit: u128,
    pub kind: EscrowKind,
    pub pay_in: bool,
    pub nonce: u64,
    pub confirmations: u16,
}

/// LP authorization for opening the escrow (or for a cooperative refund).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    pub prefix: String,
    pub timeout: String,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    #[serde(with = "crate::serde_amount")]
    pub amount_in_token: u128,
    #[serde(with = "crate::serde_amount")]
    pub amount_in_sats: u128,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub swap_fee: Fee,
    pub network_fee: Fee,
}

/// Bitcoin side of an on-chain leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinPayout {
    pub address: String,
    #[serde(with = "crate::serde_amount")]
    pub amount_sats: u128,
    pub confirmations: u16,
    pub tx_id: Option<String>,
}

/// State change delivered to observers of a wrapper, in subscription order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStateChange {
    pub swap_id: String,
    pub previous: SwapState,
    pub current: SwapState,
}

/// Result of applying an event or a sync to a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    pub changed: bool,
    /// Pre-commit swap whose quote is definitely gone; drop it from storage.
    pub remove: bool,
}

impl Outcome {
    pub const UNCHANGED: Self = Self {
        changed: false,
        remove: false,
    };
    pub const CHANGED: Self = Self {
        changed: true,
        remove: false,
    };
}

/// Per-direction behaviour table. Each entry is a pure function over the
/// swap; the wrapper does persistence and notification around them.
pub struct DirectionHandlers {
    pub on_initialize: fn(&mut EscrowSwap, &crate::chain::ChainEvent) -> bool,
    pub on_claim: fn(&mut EscrowSwap, &crate::chain::ChainEvent) -> bool,
    pub on_refund: fn(&mut EscrowSwap, &crate::chain::ChainEvent) -> bool,
    pub sync: fn(&mut EscrowSwap, Option<&crate::chain::CommitStatus>, u64, u64) -> Outcome,
    pub is_tickable: fn(SwapState) -> bool,
    pub tick: fn(&mut EscrowSwap, u64, u64) -> bool,
}
