//! Byte-level primitives shared by the container codecs.
//!
//! Reads are bounds-checked against the input slice and advance an explicit
//! offset cursor. Writes append to a `Vec<u8>`; the format's three
//! self-referential size fields (container total size, section size, record
//! size) all go through the same pattern: [`reserve`] placeholder bytes,
//! serialize the payload, then `patch_*` the placeholder once the true
//! value is known.

use byteorder::{BigEndian, ByteOrder};

use super::RiteError;

pub(crate) fn read_bytes<'a>(
    bytes: &'a [u8],
    off: &mut usize,
    len: usize,
) -> Result<&'a [u8], RiteError> {
    let have = bytes.len() - *off;
    match off.checked_add(len) {
        Some(end) if end <= bytes.len() => {
            let slice = &bytes[*off..end];
            *off = end;
            Ok(slice)
        }
        _ => Err(RiteError::UnexpectedEof {
            at: *off,
            need: len,
            have,
        }),
    }
}

pub(crate) fn read_u8(bytes: &[u8], off: &mut usize) -> Result<u8, RiteError> {
    Ok(read_bytes(bytes, off, 1)?[0])
}

pub(crate) fn read_u16(bytes: &[u8], off: &mut usize) -> Result<u16, RiteError> {
    Ok(BigEndian::read_u16(read_bytes(bytes, off, 2)?))
}

pub(crate) fn read_u32(bytes: &[u8], off: &mut usize) -> Result<u32, RiteError> {
    Ok(BigEndian::read_u32(read_bytes(bytes, off, 4)?))
}

pub(crate) fn read_i32(bytes: &[u8], off: &mut usize) -> Result<i32, RiteError> {
    Ok(BigEndian::read_i32(read_bytes(bytes, off, 4)?))
}

pub(crate) fn read_tag(bytes: &[u8], off: &mut usize) -> Result<[u8; 4], RiteError> {
    let slice = read_bytes(bytes, off, 4)?;
    Ok([slice[0], slice[1], slice[2], slice[3]])
}

/// Read a 4-byte tag and require it to equal `expected`.
pub(crate) fn expect_tag(
    bytes: &[u8],
    off: &mut usize,
    field: &'static str,
    expected: &'static [u8; 4],
) -> Result<(), RiteError> {
    let found = read_tag(bytes, off)?;
    if &found != expected {
        return Err(RiteError::BadMagic {
            field,
            expected,
            found,
        });
    }
    Ok(())
}

/// Require at least `count * min_len` further bytes before allocating
/// `count` elements; declared counts in the stream are untrusted.
pub(crate) fn check_count(
    bytes: &[u8],
    off: usize,
    count: usize,
    min_len: usize,
) -> Result<(), RiteError> {
    let have = bytes.len() - off;
    match count.checked_mul(min_len) {
        Some(need) if need <= have => Ok(()),
        _ => Err(RiteError::UnexpectedEof {
            at: off,
            need: count.saturating_mul(min_len),
            have,
        }),
    }
}

pub(crate) fn put_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub(crate) fn put_u16(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0u8; 2];
    BigEndian::write_u16(&mut buf, value);
    out.extend_from_slice(&buf);
}

pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, value);
    out.extend_from_slice(&buf);
}

pub(crate) fn put_tag(out: &mut Vec<u8>, tag: &[u8; 4]) {
    out.extend_from_slice(tag);
}

/// Append `width` placeholder bytes and return their offset for a later
/// `patch_*` call.
pub(crate) fn reserve(out: &mut Vec<u8>, width: usize) -> usize {
    let at = out.len();
    out.resize(at + width, 0);
    at
}

pub(crate) fn patch_u16(out: &mut [u8], at: usize, value: u16) {
    BigEndian::write_u16(&mut out[at..at + 2], value);
}

pub(crate) fn patch_u32(out: &mut [u8], at: usize, value: u32) {
    BigEndian::write_u32(&mut out[at..at + 4], value);
}

pub(crate) fn patch_i32(out: &mut [u8], at: usize, value: i32) {
    BigEndian::write_i32(&mut out[at..at + 4], value);
}

/// Number of pad bytes needed to bring `pos` to a 4-byte boundary.
pub(crate) fn align_to_skip(pos: usize) -> usize {
    pos.wrapping_neg() & 3
}
