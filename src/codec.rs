//! Big-endian field codecs shared by the frame handlers and writers.

use crate::error::{H2Error, H2Result};
use crate::types::StreamId;

/// The high bit of a 4-byte stream-id field is reserved and must read as zero.
pub const STREAM_ID_MASK: u32 = u32::MAX >> 1;

/// In a priority record the reserved bit carries the exclusive flag instead.
pub const EXCLUSIVE_BIT: u32 = 1 << 31;

pub fn read_u8(buf: &[u8], at: usize) -> H2Result<u8> {
    buf.get(at)
        .copied()
        .ok_or_else(|| H2Error::frame_size("payload is shorter than expected"))
}

pub fn read_u16(buf: &[u8], at: usize) -> H2Result<u16> {
    match buf.get(at..at + 2) {
        // unwrap: the length of the slice is always 2
        Some(bytes) => Ok(u16::from_be_bytes(bytes.try_into().unwrap())),
        None => Err(H2Error::frame_size("payload is shorter than expected")),
    }
}

pub fn read_u32(buf: &[u8], at: usize) -> H2Result<u32> {
    match buf.get(at..at + 4) {
        // unwrap: the length of the slice is always 4
        Some(bytes) => Ok(u32::from_be_bytes(bytes.try_into().unwrap())),
        None => Err(H2Error::frame_size("payload is shorter than expected")),
    }
}

/// Reads a 4-byte stream-id field with the reserved bit masked off.
pub fn read_stream_id(buf: &[u8], at: usize) -> H2Result<StreamId> {
    Ok(read_u32(buf, at)? & STREAM_ID_MASK)
}

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend(value.to_be_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend(value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut buf = Vec::new();
        put_u16(&mut buf, 0xdead);
        put_u32(&mut buf, 0xbeef_cafe);
        assert_eq!(read_u16(&buf, 0).unwrap(), 0xdead);
        assert_eq!(read_u32(&buf, 2).unwrap(), 0xbeef_cafe);
    }

    #[test]
    fn short_reads_fail() {
        assert!(read_u8(&[], 0).is_err());
        assert!(read_u16(&[1], 0).is_err());
        assert!(read_u32(&[1, 2, 3], 0).is_err());
    }

    #[test]
    fn reserved_bit_is_masked() {
        let mut buf = Vec::new();
        put_u32(&mut buf, EXCLUSIVE_BIT | 77);
        assert_eq!(read_stream_id(&buf, 0).unwrap(), 77);
    }
}
