/*!
Client-side reader for on-chain order books stored as slabs.

## Overview

Serum, Zeta, Mango v3 and OpenBook v2 keep each side of a market's order book in a single
fixed-size account called a slab: a header followed by an array of fixed-width tagged nodes.
The nodes form a critbit tree of orders together with a free list of recycled slots.

This library turns the raw bytes of such an account into an [`OrderBook`][`state::orderbook::OrderBook`]
which can be queried for its orders, best bid and ask, and aggregated price levels.

## Decoding

A [`VenueLayout`][`venue::VenueLayout`] describes where each field lives for a given exchange program.
[`Slab::from_buffer`][`state::critbit::Slab::from_buffer`] reads the header and every node below the
bump index into a [`Node`][`state::critbit::Node`]. Leaves are then picked out by a linear scan of the
slots and their lot amounts converted to decimals with the market's [`MarketLots`][`lot_math::MarketLots`].
Price ordering never walks the tree. The one walk is over OpenBook v2's oracle-pegged tree, to tell
its leaves apart from fixed-price ones.

Decoding is pure and all or nothing: a truncated buffer or an unknown node tag fails the whole call.

## Caching

[`OrderBookCache`][`cache::OrderBookCache`] sits in front of an [`AccountDataSource`][`cache::AccountDataSource`]
and keeps each decoded book for a configurable time, one second by default. Concurrent readers of the
same account share a single in-flight load.
*/

/// Read-through cache of decoded order books
pub mod cache;
/// Market and cache configuration
pub mod config;
#[doc(hidden)]
pub mod error;
/// Conversions between lots and decimal amounts
pub mod lot_math;
/// Decoded slab and order book data structures
pub mod state;
/// Utility functions
pub mod utils;
/// Per-venue byte layouts
pub mod venue;

pub use error::{ObResult, OrderBookError};
