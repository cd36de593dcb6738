//! Whole-buffer and incremental hash helpers used by the oiXX codecs.
//!
//! CRC32C leans on the `crc` crate the way `sqpath.rs`'s index hash does
//! (it uses the JAMCRC flavour of the same crate for path hashing); FNV-1a
//! is hand-rolled since it needs an incremental single-word fold variant
//! (`SBFile_addVariableAsType`'s hash update) that no Hasher-trait crate
//! exposes directly. SHA-256 and MD5 wrap `sha2`/`md-5` and reshape their
//! output into the plain-old-data forms (`[u32; 8]`, a 128-bit quad) the
//! spec's data model expects.

use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest as Sha2Digest, Sha256};

const CASTAGNOLI: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

pub fn crc32c(buf: &[u8]) -> u32 {
    CASTAGNOLI.checksum(buf)
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

pub fn fnv1a64(buf: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for &b in buf {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn fnv1a64_start() -> u64 {
    FNV_OFFSET_BASIS
}

/// Folds one 64-bit word into an FNV-1a accumulator byte-by-byte
/// (little-endian), matching `Buffer_fnv1a64Single` in the original.
pub fn fnv1a64_single(word: u64, seed: u64) -> u64 {
    fnv1a64(&word.to_le_bytes(), seed)
}

pub fn sha256(buf: &[u8]) -> [u32; 8] {
    let digest = Sha256::digest(buf);
    let mut out = [0u32; 8];
    for (i, chunk) in digest.chunks_exact(4).enumerate() {
        out[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}

pub fn md5(buf: &[u8]) -> (u32, u32, u32, u32) {
    let digest = Md5::digest(buf);
    let w = |i: usize| {
        u32::from_le_bytes([digest[i], digest[i + 1], digest[i + 2], digest[i + 3]])
    };
    (w(0), w(4), w(8), w(12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32c_matches_known_vector() {
        // "123456789" -> 0xE3069283 under CRC-32C (Castagnoli).
        assert_eq!(crc32c(b"123456789"), 0xE3069283);
    }

    #[test]
    fn fnv1a64_is_seed_sensitive() {
        let a = fnv1a64(b"abc", fnv1a64_start());
        let b = fnv1a64(b"abc", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn fnv1a64_single_is_deterministic() {
        let a = fnv1a64_single(0x1122_3344_5566_7788, fnv1a64_start());
        let b = fnv1a64_single(0x1122_3344_5566_7788, fnv1a64_start());
        assert_eq!(a, b);
    }

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256("") starts with e3b0c44298fc1c14...
        let h = sha256(b"");
        assert_eq!(h[0], 0xe3b0c442);
        assert_eq!(h[1], 0x98fc1c14);
    }

    #[test]
    fn md5_matches_known_vector() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        let (a, b, c, d) = md5(b"");
        let bytes = [
            a.to_le_bytes(),
            b.to_le_bytes(),
            c.to_le_bytes(),
            d.to_le_bytes(),
        ]
        .concat();
        assert_eq!(
            bytes,
            vec![
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
                0x42, 0x7e
            ]
        );
    }
}
