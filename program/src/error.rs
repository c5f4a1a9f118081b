use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by an account-data collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type ObResult<T = ()> = Result<T, OrderBookError>;

/// Errors raised while decoding slabs, converting lots or loading books.
///
/// The type is `Clone` so that one failed load can be handed unchanged to every
/// caller waiting on it.
#[derive(Clone, Debug, Error)]
pub enum OrderBookError {
    #[error("Account buffer is truncated: {required} bytes required, {actual} available")]
    TruncatedBuffer { required: usize, actual: usize },
    #[error("Node at slot {slot} is malformed: {required} bytes required, {actual} available")]
    MalformedNode {
        slot: u32,
        required: usize,
        actual: usize,
    },
    #[error("Node at slot {slot} has unknown tag {tag}")]
    UnknownTag { slot: u32, tag: u32 },
    #[error("Invalid slab header: {0}")]
    InvalidHeader(&'static str),
    #[error("Account is not the expected orderbook side")]
    WrongAccountKind,
    #[error("The orderbook is empty")]
    EmptyBook,
    #[error("Lot sizes must be non-zero")]
    InvalidLotSize,
    #[error("Token decimals {0} are out of range")]
    InvalidDecimals(u8),
    #[error("Numerical overflow")]
    NumericalOverflow,
    #[error("Negative value cannot be converted to lots")]
    NegativeValue,
    #[error("No market is registered for this account")]
    UnknownMarket,
    #[error("Failed to fetch account data: {0}")]
    FetchFailed(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl OrderBookError {
    pub(crate) fn fetch_failed<E>(e: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::FetchFailed(Arc::from(e.into()))
    }
}
