use async_trait::async_trait;
use slab_orderbook::cache::AccountDataSource;
use slab_orderbook::config::MarketConfig;
use slab_orderbook::error::BoxError;
use slab_orderbook::lot_math::MarketLots;
use slab_orderbook::state::critbit::SlabBuilder;
use slab_orderbook::state::Side;
use slab_orderbook::venue::Venue;
use solana_program::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const UNIT_LOTS: MarketLots = MarketLots {
    base_decimals: 0,
    quote_decimals: 0,
    base_lot_size: 1,
    quote_lot_size: 1,
};

/// In-memory account store standing in for an RPC node.
pub struct MockSource {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    fetches: AtomicUsize,
    pending_failures: AtomicUsize,
    pending_panic: AtomicBool,
    latency: Duration,
}

impl MockSource {
    pub fn new(latency: Duration) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
            pending_panic: AtomicBool::new(false),
            latency,
        }
    }

    pub fn set_account(&self, key: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(key, data);
    }

    /// The next `n` fetches fail.
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// The next fetch panics, as a buggy client would.
    pub fn panic_next(&self) {
        self.pending_panic.store(true, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountDataSource for MockSource {
    async fn fetch_account_bytes(&self, key: &Pubkey) -> Result<Vec<u8>, BoxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.pending_panic.swap(false, Ordering::SeqCst) {
            panic!("rpc client bug");
        }
        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err("rpc node unavailable".into());
        }
        self.accounts
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| "account not found".into())
    }
}

pub fn market(venue: Venue, lots: MarketLots) -> MarketConfig {
    MarketConfig {
        name: "TEST/USDC".to_string(),
        venue,
        bids: Pubkey::new_unique(),
        asks: Pubkey::new_unique(),
        lots,
    }
}

/// A slab holding one leaf per `(price, quantity)`, in slot order.
pub fn book_bytes(venue: Venue, side: Side, orders: &[(u64, u64)]) -> Vec<u8> {
    let owner = Pubkey::new_unique();
    let mut builder = SlabBuilder::new(venue.layout(), side).with_capacity(64);
    for (seq, (price, quantity)) in orders.iter().enumerate() {
        builder.push_leaf(*price, seq as u64, owner, *quantity);
    }
    builder.build()
}

/// Routes cache logs to the test output. Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
