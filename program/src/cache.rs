//! A read-through cache of decoded order books.
//!
//! Each slab account moves through `Absent -> Loading -> Present -> Stale ->
//! Loading`. Expiry is checked lazily when the book is read. At most one load
//! runs per account: readers arriving while a load is in flight wait on that
//! same load and share its result, success or failure.
//!
//! Loads run as spawned tasks, so a reader that gives up waiting does not
//! cancel the load. It still completes and fills the cache for later readers.
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{try_join, BoxFuture, FutureExt, Shared};
use solana_program::pubkey::Pubkey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    config::{MarketConfig, OrderBookConfig},
    error::{BoxError, ObResult, OrderBookError},
    lot_math::MarketLots,
    state::{
        orderbook::{MarketBook, OrderBook},
        Side,
    },
    venue::VenueLayout,
};

/// Source of raw account images, typically backed by an RPC client.
///
/// Retries and timeouts are the implementor's business, the cache never retries.
#[async_trait]
pub trait AccountDataSource: Send + Sync + 'static {
    async fn fetch_account_bytes(&self, key: &Pubkey) -> Result<Vec<u8>, BoxError>;
}

type SharedLoad = Shared<BoxFuture<'static, ObResult<Arc<OrderBook>>>>;

#[derive(Clone, Copy)]
struct BookParams {
    layout: &'static VenueLayout,
    side: Side,
    lots: MarketLots,
}

struct CacheEntry {
    book: Arc<OrderBook>,
    fetched_at: Instant,
}

#[derive(Default)]
struct SlotState {
    entry: Option<CacheEntry>,
    in_flight: Option<(u64, SharedLoad)>,
}

/// Clears the in-flight marker of a load when its task ends, by panic included.
struct InFlightGuard {
    slots: Arc<DashMap<Pubkey, SlotState>>,
    account: Pubkey,
    load_id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(mut slot) = self.slots.get_mut(&self.account) {
            if slot
                .in_flight
                .as_ref()
                .map_or(false, |(id, _)| *id == self.load_id)
            {
                slot.in_flight = None;
            }
        }
    }
}

pub struct OrderBookCache<S> {
    source: Arc<S>,
    config: OrderBookConfig,
    books: DashMap<Pubkey, BookParams>,
    slots: Arc<DashMap<Pubkey, SlotState>>,
    next_load_id: AtomicU64,
}

async fn load_book(
    source: &dyn AccountDataSource,
    key: &Pubkey,
    params: BookParams,
) -> ObResult<OrderBook> {
    let data = source.fetch_account_bytes(key).await.map_err(|e| {
        warn!(account = %key, error = %e, "account fetch failed");
        OrderBookError::fetch_failed(e)
    })?;
    OrderBook::decode(&data, params.layout, params.side, params.lots)
}

impl<S: AccountDataSource> OrderBookCache<S> {
    pub fn new(source: S, config: OrderBookConfig) -> Self {
        Self::with_source(Arc::new(source), config)
    }

    pub fn with_source(source: Arc<S>, config: OrderBookConfig) -> Self {
        Self {
            source,
            config,
            books: DashMap::new(),
            slots: Arc::new(DashMap::new()),
            next_load_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &OrderBookConfig {
        &self.config
    }

    /// Registers both book accounts of `market`.
    pub fn add_market(&self, market: &MarketConfig) -> ObResult {
        market.lots.validate()?;
        for side in [Side::Bid, Side::Ask] {
            self.books.insert(
                *market.slab_address(side),
                BookParams {
                    layout: market.venue.layout(),
                    side,
                    lots: market.lots,
                },
            );
        }
        Ok(())
    }

    /// Drops the cached book of `account`. A load in flight is left to finish.
    pub fn invalidate(&self, account: &Pubkey) {
        if let Some(mut slot) = self.slots.get_mut(account) {
            slot.entry = None;
        }
    }

    /// Returns the book stored in `account`, loading it when absent or expired.
    pub async fn get(&self, account: &Pubkey) -> ObResult<Arc<OrderBook>> {
        let params = self
            .books
            .get(account)
            .map(|p| *p)
            .ok_or(OrderBookError::UnknownMarket)?;
        let ttl = match self.config.cache.ttl() {
            Some(ttl) => ttl,
            None => {
                return load_book(self.source.as_ref(), account, params)
                    .await
                    .map(Arc::new)
            }
        };

        let load = {
            let mut slot = self.slots.entry(*account).or_default();
            if let Some(entry) = &slot.entry {
                if Instant::now() < entry.fetched_at + ttl {
                    debug!(account = %account, "order book cache hit");
                    return Ok(entry.book.clone());
                }
                debug!(account = %account, "order book cache entry expired");
            }
            let joined = slot.in_flight.as_ref().map(|(_, load)| load.clone());
            match joined {
                Some(load) => {
                    debug!(account = %account, "joining in-flight order book load");
                    load
                }
                None => {
                    debug!(account = %account, "order book cache miss");
                    let load = self.spawn_load(*account, params);
                    slot.in_flight = Some(load.clone());
                    load.1
                }
            }
        };
        load.await
    }

    fn spawn_load(&self, account: Pubkey, params: BookParams) -> (u64, SharedLoad) {
        let load_id = self.next_load_id.fetch_add(1, Ordering::Relaxed);
        let source = Arc::clone(&self.source);
        let slots = Arc::clone(&self.slots);
        let handle = tokio::spawn(async move {
            let _in_flight = InFlightGuard {
                slots: Arc::clone(&slots),
                account,
                load_id,
            };
            let result = load_book(source.as_ref(), &account, params)
                .await
                .map(Arc::new);
            if let Ok(book) = &result {
                if let Some(mut slot) = slots.get_mut(&account) {
                    slot.entry = Some(CacheEntry {
                        book: Arc::clone(book),
                        fetched_at: Instant::now(),
                    });
                }
            }
            result
        });
        let load = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(OrderBookError::fetch_failed(e)),
            }
        }
        .boxed()
        .shared();
        (load_id, load)
    }

    /// Loads both sides of `market` concurrently, through their own cache slots.
    pub async fn get_market(&self, market: &MarketConfig) -> ObResult<MarketBook> {
        let (bids, asks) = try_join(self.get(&market.bids), self.get(&market.asks)).await?;
        Ok(MarketBook { bids, asks })
    }
}
