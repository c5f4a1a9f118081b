use std::convert::TryInto;

use crate::error::{ObResult, OrderBookError};

pub fn assert(statement: bool, err: OrderBookError) -> ObResult {
    if !statement {
        Err(err)
    } else {
        Ok(())
    }
}

/// Checks that `buf` holds at least `required` bytes.
pub fn check_len(buf: &[u8], required: usize) -> ObResult {
    assert(
        buf.len() >= required,
        OrderBookError::TruncatedBuffer {
            required,
            actual: buf.len(),
        },
    )
}

// The callers below check lengths beforehand, a short read yields None.

pub(crate) fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_u128(buf: &[u8], offset: usize) -> Option<u128> {
    let bytes = buf.get(offset..offset + 16)?;
    Some(u128::from_le_bytes(bytes.try_into().ok()?))
}

pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    buf.get(offset..offset + N)?.try_into().ok()
}

pub(crate) fn write_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}
