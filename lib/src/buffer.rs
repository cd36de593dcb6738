//! Tri-state byte buffer (§4.A): owned, mutable reference, or const reference.
//!
//! The original engine folds ownership and constness into two bits of a
//! length word (`lengthAndRefBits`) so it can pass one 16-byte struct
//! around in C. Per the REDESIGN FLAGS in the spec this is expressed here
//! as a genuine sum type instead; the 48-bit length cap was an
//! implementation detail of that encoding, not a requirement, so `usize` is
//! used directly.

use crate::error::{OxcError, Result};
use crate::hash;

/// A contiguous run of bytes that is either owned, borrowed mutably, or
/// borrowed read-only. Mirrors `Buffer` in the original engine.
#[derive(Debug)]
pub enum Buffer<'a> {
    Owned(Box<[u8]>),
    Mut(&'a mut [u8]),
    Const(&'a [u8]),
}

impl<'a> Buffer<'a> {
    /// Allocates `len` zero-initialized bytes (`createEmptyBytes`).
    pub fn create_owned(len: usize) -> Buffer<'static> {
        Buffer::Owned(vec![0u8; len].into_boxed_slice())
    }

    /// Allocates `len` bytes without guaranteeing their contents
    /// (`createUninitializedBytes`). Zero-filled here: Rust has no safe way
    /// to hand out uninitialized memory as a plain `&[u8]`, and the
    /// original's only reason to skip the zero-fill is a micro-optimization
    /// that does not change observable behaviour of a correct caller.
    pub fn create_uninitialized(len: usize) -> Buffer<'static> {
        Self::create_owned(len)
    }

    pub fn create_ref(slice: &'a mut [u8]) -> Buffer<'a> {
        Buffer::Mut(slice)
    }

    pub fn create_ref_const(slice: &'a [u8]) -> Buffer<'a> {
        Buffer::Const(slice)
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Owned(b) => b.len(),
            Buffer::Mut(s) => s.len(),
            Buffer::Const(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_const_ref(&self) -> bool {
        matches!(self, Buffer::Const(_))
    }

    pub fn is_ref(&self) -> bool {
        !matches!(self, Buffer::Owned(_))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Owned(b) => b,
            Buffer::Mut(s) => s,
            Buffer::Const(s) => s,
        }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self {
            Buffer::Owned(b) => Ok(b),
            Buffer::Mut(s) => Ok(s),
            Buffer::Const(_) => Err(OxcError::ConstData("Buffer::as_mut_slice")),
        }
    }

    /// Advances the head of a *reference* buffer by `n` bytes, shrinking its
    /// length. Owned buffers refuse this (it would leak the allocation's
    /// true start), matching §4.A.
    pub fn offset(self, n: usize) -> Result<Buffer<'a>> {
        match self {
            Buffer::Owned(_) => Err(OxcError::InvalidOperation(
                "cannot offset an owned buffer".into(),
            )),
            Buffer::Mut(slice) => {
                if n > slice.len() {
                    return Err(OxcError::out_of_bounds("Buffer::offset", n as u64, slice.len() as u64));
                }
                Ok(Buffer::Mut(&mut slice[n..]))
            }
            Buffer::Const(slice) => {
                if n > slice.len() {
                    return Err(OxcError::out_of_bounds("Buffer::offset", n as u64, slice.len() as u64));
                }
                Ok(Buffer::Const(&slice[n..]))
            }
        }
    }

    /// Writes `bytes` at the current head and advances past them.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let this = std::mem::replace(self, Buffer::Const(&[]));
        let mut this = this;
        match &mut this {
            Buffer::Owned(_) => {
                return Err(OxcError::InvalidOperation(
                    "cannot append to an owned buffer".into(),
                ))
            }
            Buffer::Const(_) => return Err(OxcError::ConstData("Buffer::append")),
            Buffer::Mut(slice) => {
                if bytes.len() > slice.len() {
                    return Err(OxcError::out_of_bounds("Buffer::append", bytes.len() as u64, slice.len() as u64));
                }
                slice[..bytes.len()].copy_from_slice(bytes);
            }
        }
        *self = this.offset(bytes.len())?;
        Ok(())
    }

    /// Reads `out_len` bytes from the head and advances past them.
    pub fn consume(&mut self, out_len: usize) -> Result<Vec<u8>> {
        let this = std::mem::replace(self, Buffer::Const(&[]));
        if matches!(this, Buffer::Owned(_)) {
            *self = this;
            return Err(OxcError::InvalidOperation(
                "cannot consume from an owned buffer".into(),
            ));
        }
        let slice = this.as_slice();
        if out_len > slice.len() {
            let limit = slice.len() as u64;
            *self = this;
            return Err(OxcError::out_of_bounds("Buffer::consume", out_len as u64, limit));
        }
        let out = slice[..out_len].to_vec();
        *self = this.offset(out_len)?;
        Ok(out)
    }

    /// Byte-wise forward copy; `false` (no-op) if `dst` is const.
    pub fn copy(dst: &mut Buffer, src: &Buffer) -> bool {
        if dst.is_const_ref() {
            return false;
        }
        let len = dst.len().min(src.len());
        let src_bytes = src.as_slice()[..len].to_vec();
        if let Ok(d) = dst.as_mut_slice() {
            d[..len].copy_from_slice(&src_bytes);
        }
        true
    }

    /// Byte-wise reverse copy (handles overlap from the tail backwards).
    pub fn rev_copy(dst: &mut Buffer, src: &Buffer) -> bool {
        if dst.is_const_ref() {
            return false;
        }
        let len = dst.len().min(src.len());
        let src_bytes = src.as_slice()[..len].to_vec();
        if let Ok(d) = dst.as_mut_slice() {
            for i in (0..len).rev() {
                d[i] = src_bytes[i];
            }
        }
        true
    }

    pub fn get_bit(&self, bit_offset: u64) -> Result<bool> {
        let byte = (bit_offset >> 3) as usize;
        if byte >= self.len() {
            return Err(OxcError::out_of_bounds("Buffer::get_bit", bit_offset, (self.len() as u64) * 8));
        }
        Ok((self.as_slice()[byte] >> (bit_offset & 7)) & 1 != 0)
    }

    pub fn set_bit(&mut self, bit_offset: u64) -> Result<()> {
        self.set_bit_to(bit_offset, true)
    }

    pub fn reset_bit(&mut self, bit_offset: u64) -> Result<()> {
        self.set_bit_to(bit_offset, false)
    }

    pub fn set_bit_to(&mut self, bit_offset: u64, value: bool) -> Result<()> {
        let byte = (bit_offset >> 3) as usize;
        let len = self.len();
        let slice = self.as_mut_slice()?;
        if byte >= len {
            return Err(OxcError::out_of_bounds("Buffer::set_bit_to", bit_offset, (len as u64) * 8));
        }
        let mask = 1u8 << (bit_offset & 7);
        if value {
            slice[byte] |= mask;
        } else {
            slice[byte] &= !mask;
        }
        Ok(())
    }

    pub fn set_bit_range(&mut self, start: u64, count: u64) -> Result<()> {
        self.fill_bit_range(start, count, true)
    }

    pub fn unset_bit_range(&mut self, start: u64, count: u64) -> Result<()> {
        self.fill_bit_range(start, count, false)
    }

    fn fill_bit_range(&mut self, start: u64, count: u64, value: bool) -> Result<()> {
        for i in 0..count {
            self.set_bit_to(start + i, value)?;
        }
        Ok(())
    }

    /// Creates a reference pointing into `self`. Fails if a non-const view
    /// is requested into a const buffer; returns a `Mut` subset rather than
    /// a `Const` one whenever the caller actually asked for one.
    pub fn create_subset(&mut self, offset: usize, length: usize, is_const: bool) -> Result<Buffer<'_>> {
        if !is_const && self.is_const_ref() {
            return Err(OxcError::ConstData("Buffer::create_subset"));
        }
        let total = self.len();
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= total)
            .ok_or_else(|| {
                OxcError::out_of_bounds(
                    "Buffer::create_subset",
                    (offset as u64).saturating_add(length as u64),
                    total as u64,
                )
            })?;
        if is_const {
            return Ok(Buffer::Const(&self.as_slice()[offset..end]));
        }
        Ok(Buffer::Mut(&mut self.as_mut_slice()?[offset..end]))
    }
}

fn bitwise<F: Fn(u8, u8) -> u8>(a: &Buffer, b: &Buffer, f: F) -> Buffer<'static> {
    let len = a.len().min(b.len());
    let a = a.as_slice();
    let b = b.as_slice();
    let out: Vec<u8> = (0..len).map(|i| f(a[i], b[i])).collect();
    Buffer::Owned(out.into_boxed_slice())
}

pub fn bitwise_or(a: &Buffer, b: &Buffer) -> Buffer<'static> {
    bitwise(a, b, |x, y| x | y)
}

pub fn bitwise_and(a: &Buffer, b: &Buffer) -> Buffer<'static> {
    bitwise(a, b, |x, y| x & y)
}

pub fn bitwise_xor(a: &Buffer, b: &Buffer) -> Buffer<'static> {
    bitwise(a, b, |x, y| x ^ y)
}

pub fn bitwise_not(a: &Buffer) -> Buffer<'static> {
    let out: Vec<u8> = a.as_slice().iter().map(|b| !b).collect();
    Buffer::Owned(out.into_boxed_slice())
}

/// Decoded UTF-8 sequence starting at a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Codepoint {
    pub codepoint: u32,
    pub chars: u8,
    pub bytes: u8,
}

/// Decodes one UTF-8 codepoint at byte index `i`, validating continuation
/// bytes strictly (`0x80..=0xBF`).
pub fn read_as_utf8(buf: &[u8], i: usize) -> Result<Utf8Codepoint> {
    if i >= buf.len() {
        return Err(OxcError::out_of_bounds("read_as_utf8", i as u64, buf.len() as u64));
    }

    let b0 = buf[i];

    let (len, mut cp) = if b0 < 0x80 {
        if b0 < 0x20 && !matches!(b0, b'\t' | b'\n' | b'\r') {
            return Err(OxcError::InvalidParameter("invalid ASCII control byte".to_string()));
        }
        (1usize, b0 as u32)
    } else if b0 & 0xE0 == 0xC0 {
        (2, (b0 & 0x1F) as u32)
    } else if b0 & 0xF0 == 0xE0 {
        (3, (b0 & 0x0F) as u32)
    } else if b0 & 0xF8 == 0xF0 {
        (4, (b0 & 0x07) as u32)
    } else {
        return Err(OxcError::InvalidParameter("invalid UTF-8 lead byte".to_string()));
    };

    if i + len > buf.len() {
        return Err(OxcError::out_of_bounds("read_as_utf8", (i + len) as u64, buf.len() as u64));
    }

    for &cont in &buf[i + 1..i + len] {
        if !(0x80..=0xBF).contains(&cont) {
            return Err(OxcError::InvalidParameter("invalid UTF-8 continuation byte".to_string()));
        }
        cp = (cp << 6) | (cont & 0x3F) as u32;
    }

    let chars = if cp > 0xFFFF { 2 } else { 1 };

    Ok(Utf8Codepoint {
        codepoint: cp,
        chars,
        bytes: len as u8,
    })
}

/// Decodes one UTF-16 codepoint (handles surrogate pairs) at u16 index `i`.
pub fn read_as_utf16(buf: &[u16], i: usize) -> Result<Utf8Codepoint> {
    if i >= buf.len() {
        return Err(OxcError::out_of_bounds("read_as_utf16", i as u64, buf.len() as u64));
    }
    let unit = buf[i];
    if (0xD800..=0xDBFF).contains(&unit) {
        if i + 1 >= buf.len() {
            return Err(OxcError::InvalidParameter("unpaired high surrogate".to_string()));
        }
        let low = buf[i + 1];
        if !(0xDC00..=0xDFFF).contains(&low) {
            return Err(OxcError::InvalidParameter("unpaired high surrogate".to_string()));
        }
        let cp = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
        Ok(Utf8Codepoint {
            codepoint: cp,
            chars: 2,
            bytes: 4,
        })
    } else if (0xDC00..=0xDFFF).contains(&unit) {
        Err(OxcError::InvalidParameter("unpaired low surrogate".to_string()))
    } else {
        Ok(Utf8Codepoint {
            codepoint: unit as u32,
            chars: 1,
            bytes: 2,
        })
    }
}

pub fn write_as_utf16(cp: u32, out: &mut Vec<u16>) -> Result<()> {
    if cp > 0x10FFFF || (0xD800..=0xDFFF).contains(&cp) {
        return Err(OxcError::InvalidParameter("codepoint not representable in UTF-16".to_string()));
    }
    if cp <= 0xFFFF {
        out.push(cp as u16);
    } else {
        let v = cp - 0x10000;
        out.push(0xD800 + (v >> 10) as u16);
        out.push(0xDC00 + (v & 0x3FF) as u16);
    }
    Ok(())
}

fn scan_error_rate<F: Fn(&[u8], usize) -> bool>(buf: &[u8], threshold: f64, valid_at: F) -> bool {
    if buf.is_empty() {
        return true;
    }
    let mut errors = 0usize;
    let mut total = 0usize;
    let mut i = 0;
    while i < buf.len() {
        total += 1;
        if valid_at(buf, i) {
            i += 1;
        } else {
            errors += 1;
            i += 1;
        }
    }
    (errors as f64) / (total as f64) <= threshold
}

pub fn is_ascii(buf: &[u8], threshold: f64) -> bool {
    scan_error_rate(buf, threshold, |b, i| b[i] < 0x80)
}

pub fn is_utf8(buf: &[u8], threshold: f64) -> bool {
    let mut errors = 0usize;
    let mut total = 0usize;
    let mut i = 0;
    while i < buf.len() {
        total += 1;
        match read_as_utf8(buf, i) {
            Ok(cp) => i += cp.bytes as usize,
            Err(_) => {
                errors += 1;
                i += 1;
            }
        }
    }
    if total == 0 {
        return true;
    }
    (errors as f64) / (total as f64) <= threshold
}

pub fn is_utf16(buf: &[u16], threshold: f64) -> bool {
    let mut errors = 0usize;
    let mut total = 0usize;
    let mut i = 0;
    while i < buf.len() {
        total += 1;
        match read_as_utf16(buf, i) {
            Ok(cp) => i += cp.chars as usize,
            Err(_) => {
                errors += 1;
                i += 1;
            }
        }
    }
    if total == 0 {
        return true;
    }
    (errors as f64) / (total as f64) <= threshold
}

/// Fills `out` with cryptographically secure random bytes.
pub fn csprng(out: &mut [u8]) -> Result<()> {
    crate::csprng::fill(out)
}

pub fn crc32c(buf: &[u8]) -> u32 {
    hash::crc32c(buf)
}

pub fn fnv1a64(buf: &[u8], seed: u64) -> u64 {
    hash::fnv1a64(buf, seed)
}

pub fn sha256(buf: &[u8]) -> [u32; 8] {
    hash::sha256(buf)
}

pub fn md5(buf: &[u8]) -> (u32, u32, u32, u32) {
    hash::md5(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_free_is_idempotent() {
        let b = Buffer::create_owned(16);
        drop(b);
        let empty = Buffer::create_owned(0);
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn copy_and_rev_copy_produce_equal_buffers() {
        let mut dst = vec![0u8; 8];
        let src = vec![1u8, 2, 3, 4, 5, 6, 7, 8];

        let mut dst_buf = Buffer::create_ref(&mut dst);
        let src_buf = Buffer::create_ref_const(&src);
        assert!(Buffer::copy(&mut dst_buf, &src_buf));
        assert_eq!(dst_buf.as_slice(), src_buf.as_slice());

        let mut dst2 = vec![0u8; 8];
        let mut dst2_buf = Buffer::create_ref(&mut dst2);
        assert!(Buffer::rev_copy(&mut dst2_buf, &src_buf));
        assert_eq!(dst2_buf.as_slice(), src_buf.as_slice());
    }

    #[test]
    fn const_copy_fails() {
        let dst = vec![0u8; 4];
        let src = vec![9u8; 4];
        let mut dst_buf = Buffer::create_ref_const(&dst);
        let src_buf = Buffer::create_ref_const(&src);
        assert!(!Buffer::copy(&mut dst_buf, &src_buf));
    }

    #[test]
    fn create_subset_returns_a_writable_view_when_requested() {
        let mut storage = vec![0u8; 8];
        let mut buf = Buffer::create_ref(&mut storage);
        {
            let mut sub = buf.create_subset(2, 4, false).unwrap();
            assert!(!sub.is_const_ref());
            sub.as_mut_slice().unwrap().copy_from_slice(&[9, 9, 9, 9]);
        }
        assert_eq!(buf.as_slice(), &[0, 0, 9, 9, 9, 9, 0, 0]);
    }

    #[test]
    fn create_subset_rejects_a_writable_request_into_a_const_buffer() {
        let storage = vec![0u8; 8];
        let mut buf = Buffer::create_ref_const(&storage);
        assert!(buf.create_subset(0, 4, false).is_err());
        assert!(buf.create_subset(0, 4, true).is_ok());
    }

    #[test]
    fn create_subset_rejects_overflowing_bounds() {
        let mut storage = vec![0u8; 8];
        let mut buf = Buffer::create_ref(&mut storage);
        assert!(buf.create_subset(usize::MAX, 4, true).is_err());
        assert!(buf.create_subset(4, 8, true).is_err());
    }

    #[test]
    fn offset_rejects_owned() {
        let owned = Buffer::create_owned(4);
        assert!(owned.offset(1).is_err());
    }

    #[test]
    fn append_then_consume_round_trips() {
        let mut storage = vec![0u8; 16];
        let mut cursor = Buffer::create_ref(&mut storage);
        cursor.append(&[1, 2, 3, 4]).unwrap();

        let mut storage2 = vec![1u8, 2, 3, 4, 0, 0, 0, 0];
        let mut read_cursor = Buffer::create_ref(&mut storage2);
        let got = read_cursor.consume(4).unwrap();
        assert_eq!(got, vec![1, 2, 3, 4]);
    }

    #[test]
    fn bit_range_set_and_get() {
        let mut storage = vec![0u8; 4];
        let mut buf = Buffer::create_ref(&mut storage);
        buf.set_bit_range(3, 10).unwrap();
        for i in 3..13 {
            assert!(buf.get_bit(i).unwrap());
        }
        assert!(!buf.get_bit(2).unwrap());
        assert!(!buf.get_bit(13).unwrap());
    }

    #[test]
    fn utf8_ascii_round_trip() {
        let s = "hello".as_bytes();
        let cp = read_as_utf8(s, 0).unwrap();
        assert_eq!(cp.codepoint, b'h' as u32);
        assert_eq!(cp.bytes, 1);
    }

    #[test]
    fn utf8_multibyte_decodes() {
        let s = "héllo".as_bytes();
        let cp = read_as_utf8(s, 1).unwrap();
        assert_eq!(cp.bytes, 2);
        assert_eq!(char::from_u32(cp.codepoint).unwrap(), 'é');
    }

    #[test]
    fn utf8_rejects_bad_continuation() {
        let bad = [0xC2, 0x00];
        assert!(read_as_utf8(&bad, 0).is_err());
    }

    #[test]
    fn utf16_surrogate_pair_round_trips() {
        let mut out = Vec::new();
        write_as_utf16(0x1F600, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        let cp = read_as_utf16(&out, 0).unwrap();
        assert_eq!(cp.codepoint, 0x1F600);
        assert_eq!(cp.chars, 2);
    }
}
