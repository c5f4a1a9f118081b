use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};

use crate::error::{ObResult, OrderBookError};

/// Slab header, node variants and the slab decoder
pub mod critbit;
/// Orders, order books and their queries
pub mod orderbook;

/// Serum-family account flags, stored as a little-endian `u64` bitset.
#[bitflags]
#[repr(u64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum AccountFlag {
    Initialized = 0x1,
    Market = 0x2,
    OpenOrders = 0x4,
    RequestQueue = 0x8,
    EventQueue = 0x10,
    Bids = 0x20,
    Asks = 0x40,
    Disabled = 0x80,
    Closed = 0x100,
    Permissioned = 0x200,
    CrankAuthorityRequired = 0x400,
}

impl AccountFlag {
    /// Returns the book side an initialized account claims to hold.
    pub fn side_from_bits(bits: u64) -> ObResult<Side> {
        let flags: BitFlags<AccountFlag> =
            BitFlags::from_bits(bits).map_err(|_| OrderBookError::WrongAccountKind)?;
        if !flags.contains(AccountFlag::Initialized) {
            return Err(OrderBookError::WrongAccountKind);
        }
        match (
            flags.contains(AccountFlag::Bids),
            flags.contains(AccountFlag::Asks),
        ) {
            (true, false) => Ok(Side::Bid),
            (false, true) => Ok(Side::Ask),
            _ => Err(OrderBookError::WrongAccountKind),
        }
    }

    pub fn bits_for_side(side: Side) -> u64 {
        let side_flag = match side {
            Side::Bid => AccountFlag::Bids,
            Side::Ask => AccountFlag::Asks,
        };
        (AccountFlag::Initialized | side_flag).bits()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Helper function to get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}
