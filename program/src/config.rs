use serde::{Deserialize, Serialize};
use solana_program::pubkey::Pubkey;
use std::time::Duration;

use crate::{lot_math::MarketLots, state::Side, venue::Venue};

/// Lifetime of a cached order book when none is configured.
pub const DEFAULT_TTL_MS: u64 = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Every read fetches the account.
    Disabled,
    /// Reads within `ttl_ms` of the last load are served from memory.
    Ttl { ttl_ms: u64 },
}

impl CachePolicy {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            CachePolicy::Disabled => None,
            CachePolicy::Ttl { ttl_ms } => Some(Duration::from_millis(*ttl_ms)),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::Ttl {
            ttl_ms: DEFAULT_TTL_MS,
        }
    }
}

/// Settings fixed when an [`OrderBookCache`][`crate::cache::OrderBookCache`] is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookConfig {
    #[serde(default)]
    pub cache: CachePolicy,
}

/// A market and the two slab accounts holding its book.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub name: String,
    pub venue: Venue,
    #[serde(with = "pubkey_string")]
    pub bids: Pubkey,
    #[serde(with = "pubkey_string")]
    pub asks: Pubkey,
    #[serde(flatten)]
    pub lots: MarketLots,
}

impl MarketConfig {
    pub fn slab_address(&self, side: Side) -> &Pubkey {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }
}

// Base58 in configuration files rather than a byte array.
mod pubkey_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use solana_program::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(D::Error::custom)
    }
}
