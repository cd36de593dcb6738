//! oiCA/oiDL/oiSB container codecs and the streaming audio runtime built
//! on top of the shared byte buffer, ref-count, spinlock, AES-GCM,
//! CSPRNG, and hashing primitives.

pub mod error;

pub mod buffer;
mod macros;
pub mod refcount;
pub mod spinlock;

pub mod aesgcm;
pub mod csprng;
pub mod hash;

pub mod formats;

pub mod audio;

pub use error::{OxcError, Result};
