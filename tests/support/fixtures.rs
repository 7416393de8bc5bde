use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address, Network, ScriptBuf, WPubkeyHash};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

use escrow_swap::config::WrapperConfig;
use escrow_swap::pricing::PriceInfo;
use escrow_swap::swap::wrapper::SwapWrapper;
use escrow_swap::swap::{
    EscrowData, EscrowKind, EscrowSwap, FeeBreakdown, SignatureData, SwapState, SwapType,
};

use super::chain::MockContract;
use super::lp::MockLp;
use super::store::CountingStore;

pub const USER: &str = "user-1";
pub const LP: &str = "lp-1";
pub const TOKEN: &str = "WBTC";
pub const NONCE: u64 = 42;

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

pub fn payout_script(seed: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([seed; 20]))
}

pub fn regtest_address(script: &ScriptBuf) -> String {
    Address::from_script(script, Network::Regtest)
        .expect("p2wpkh script has an address")
        .to_string()
}

/// Signed regtest BOLT11 invoice for `payment_hash`, valid for an hour.
pub fn invoice(payment_hash: [u8; 32], amount_msat: Option<u64>) -> String {
    let key = SecretKey::from_slice(&[0x11; 32]).expect("valid secret key");
    let builder = InvoiceBuilder::new(Currency::Regtest)
        .description("escrow swap".into())
        .payment_hash(sha256::Hash::from_byte_array(payment_hash))
        .payment_secret(PaymentSecret([42; 32]))
        .current_timestamp()
        .min_final_cltv_expiry_delta(144);
    let builder = match amount_msat {
        Some(msat) => builder.amount_milli_satoshis(msat),
        None => builder,
    };
    builder
        .build_signed(|hash| Secp256k1::new().sign_ecdsa_recoverable(hash, &key))
        .expect("sign invoice")
        .to_string()
}

pub fn escrow(swap_type: SwapType, claim_hash: &str, amount: u128) -> EscrowData {
    let (offerer, claimer) = if swap_type.is_to_btc() {
        (USER, LP)
    } else {
        (LP, USER)
    };
    EscrowData {
        offerer: offerer.to_string(),
        claimer: claimer.to_string(),
        token: TOKEN.to_string(),
        amount,
        claim_hash: claim_hash.to_string(),
        escrow_hash: None,
        expiry: now() + 3600,
        total_deposit: 0,
        kind: if swap_type.is_lightning() {
            EscrowKind::Htlc
        } else {
            EscrowKind::Ptlc
        },
        pay_in: swap_type.is_to_btc(),
        nonce: NONCE,
        confirmations: 2,
    }
}

pub fn signature() -> SignatureData {
    SignatureData {
        prefix: "claim_initialize".to_string(),
        timeout: "0".to_string(),
        signature: "sig".to_string(),
    }
}

pub fn price_info() -> PriceInfo {
    PriceInfo {
        is_valid: true,
        difference_ppm: 0,
        sats_base_fee: 0,
        fee_ppm: 0,
        swap_price_usat_per_token: 100_000_000_000_000,
        real_price_usat_per_token: Some(100_000_000_000_000),
        real_price_usd_per_bitcoin: None,
    }
}

/// A stored-looking swap with a quote valid for another ten minutes.
pub fn swap(id: &str, swap_type: SwapType, state: SwapState) -> EscrowSwap {
    let expiry = now() + 600;
    EscrowSwap {
        id: id.to_string(),
        swap_type,
        state,
        initiator: USER.to_string(),
        url: "https://lp.example".to_string(),
        created_at: now(),
        expiry,
        escrow: escrow(swap_type, id, 100_000),
        signature: Some(signature()),
        signature_expiry: Some(expiry),
        fees: FeeBreakdown::default(),
        price_info: price_info(),
        amount_sats: 100_000,
        payment_hash: None,
        random_nonce: None,
        lightning_invoice: None,
        payout: None,
        secret: None,
        refund_authorization: None,
        commit_tx_id: None,
        claim_tx_id: None,
        refund_tx_id: None,
    }
}

/// Same as [`swap`] with the escrow hash the mock contract derives.
pub fn committed_swap(contract: &MockContract, id: &str, swap_type: SwapType, state: SwapState) -> EscrowSwap {
    use escrow_swap::chain::SwapContract as _;

    let mut swap = swap(id, swap_type, state);
    swap.escrow.escrow_hash = Some(contract.escrow_hash(&swap.escrow));
    swap
}

pub fn with_quote_expiry(mut swap: EscrowSwap, expiry: u64) -> EscrowSwap {
    swap.expiry = expiry;
    swap.signature_expiry = Some(expiry);
    swap
}

pub fn wrapper_config() -> WrapperConfig {
    WrapperConfig {
        tick_interval: Duration::from_millis(10),
        commit_wait_timeout: Duration::from_secs(5),
        chain_request_timeout: Duration::from_secs(5),
        payment_poll_interval: Duration::from_millis(10),
        ..WrapperConfig::default()
    }
}

pub struct Harness {
    pub contract: Arc<MockContract>,
    pub store: Arc<CountingStore>,
    pub lp: Arc<MockLp>,
    pub wrapper: Arc<SwapWrapper>,
}

pub fn harness(swap_type: SwapType, cfg: WrapperConfig) -> Harness {
    let contract = Arc::new(MockContract::new());
    let store = Arc::new(CountingStore::new());
    let lp = Arc::new(MockLp::new());
    let wrapper = Arc::new(SwapWrapper::new(
        swap_type,
        contract.clone(),
        store.clone(),
        lp.clone(),
        cfg,
    ));
    Harness {
        contract,
        store,
        lp,
        wrapper,
    }
}
