//! Cryptographically secure random byte generation, backed by the OS CSPRNG
//! via `getrandom` rather than a userspace PRNG the original seeds itself.

use crate::error::Result;

/// Fills `out` with random bytes from the platform CSPRNG.
pub fn fill(out: &mut [u8]) -> Result<()> {
    getrandom::getrandom(out).map_err(|e| {
        crate::error::OxcError::PlatformError {
            code: e.code().get() as i64,
            message: "getrandom failed".to_string(),
        }
    })
}

/// Generates a random key of `N` bytes (used for AES-128/256 keys and IVs).
pub fn generate<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    fill(&mut buf)?;
    Ok(buf)
}
