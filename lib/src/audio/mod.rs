//! Streaming audio scheduler (§3 "Audio Stream"/"Audio Source"/"Audio
//! Device", §4.G, §4.H, §5).
//!
//! The backend (OpenAL-soft in the original, `alstream.c`/`alsource.c`) is
//! an external collaborator per §1 — only its contract matters here, so it
//! is modeled as two small trait objects (`StreamBackend`, `SourceBackend`)
//! rather than bound to any particular audio library. The device/stream/
//! source graph, ring-buffer bookkeeping, runtime format fallback, and
//! dirty-mask coalescing are the actual subject of this module.

pub mod device;
pub mod source;
pub mod stream;

pub use device::{AudioDevice, Listener};
pub use source::AudioSource;
pub use stream::{AudioStream, AudioStreamInfo};

use crate::error::{OxcError, Result};
use crate::macros::bitflags_like;

/// Fixed ring depth the scheduler keeps filled ahead of the playhead
/// (GLOSSARY "Ring of decode buffers").
pub const RING_SIZE: usize = 3;

/// `ALAudioStream_bufferSize`: scratch/ring buffer length. Must be a
/// multiple of `max(channels) * max(stride) == 16` and at least 64 KiB per
/// the `streamLength >= 64 KiB` invariant (§4.G).
pub const DECODE_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum `AudioStreamInfo::stream_length` the spec requires.
pub const MIN_STREAM_LENGTH: u64 = 64 * 1024;

/// The scheduler throttles `AudioDevice::wait` to this per-tick budget
/// (§5).
pub const TARGET_TICK: std::time::Duration = std::time::Duration::from_micros(100);

bitflags_like! {
    /// `EAudioDeviceFlags`: backend-reported format extensions that gate
    /// the runtime fallback rules in §4.G step 4.
    pub struct AudioBackendCaps: u8 {
        const HAS_U24_EXT = 0x1;
        const HAS_F32_EXT = 0x2;
        const HAS_F64_EXT = 0x4;
    }
}

/// Sample encoding of a PCM stride, independent of channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStride {
    U8,
    I16,
    F32,
    F64,
    /// 3-byte packed PCM; not a power-of-two stride, so it is detected via
    /// `(format >> 1) > 3` rather than occupying one of the three
    /// power-of-two stride slots (SPEC_FULL §[MODULE] Audio).
    U24,
}

impl AudioStride {
    pub fn bytes(self) -> u8 {
        match self {
            AudioStride::U8 => 1,
            AudioStride::I16 => 2,
            AudioStride::U24 => 3,
            AudioStride::F32 => 4,
            AudioStride::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, AudioStride::F32 | AudioStride::F64)
    }

    fn selector(self) -> u8 {
        match self {
            AudioStride::U8 => 0,
            AudioStride::I16 => 1,
            AudioStride::F32 => 2,
            AudioStride::F64 => 3,
            AudioStride::U24 => 4,
        }
    }
}

/// `EAudioStreamFormat`: bit 0 selects mono(0)/stereo(1); the remaining
/// bits select the stride class, per `EAudioStreamFormat_getStrideBytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamFormat(pub u8);

impl AudioStreamFormat {
    pub fn new(stereo: bool, stride: AudioStride) -> Self {
        AudioStreamFormat((stride.selector() << 1) | stereo as u8)
    }

    pub fn is_stereo(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn channels(self) -> u8 {
        if self.is_stereo() {
            2
        } else {
            1
        }
    }

    pub fn stride(self) -> AudioStride {
        match self.0 >> 1 {
            0 => AudioStride::U8,
            1 => AudioStride::I16,
            2 => AudioStride::F32,
            3 => AudioStride::F64,
            _ => AudioStride::U24,
        }
    }

    /// Bytes per interleaved sample frame (one sample per channel).
    pub fn block_stride(self) -> u32 {
        self.channels() as u32 * self.stride().bytes() as u32
    }
}

/// State the backend reports for a playing/paused/stopped stream source
/// (`alGetSourcei(AL_SOURCE_STATE)` in the original).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// The contract a backend must provide for one [`AudioStream`] (§4.G).
/// Only the ring-queueing contract is modeled; buffer storage and the
/// actual mixing/output device belong to the backend, out of scope per §1.
pub trait StreamBackend: Send + Sync {
    fn state(&self) -> BackendState;
    /// Number of ring slots the backend has finished consuming since the
    /// last call (i.e. now free to refill), capped at [`RING_SIZE`].
    fn buffers_processed(&self) -> usize;
    /// Queues one decoded buffer into the next free ring slot.
    fn queue(&self, data: &[u8]) -> Result<()>;
    fn start(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn set_pitch(&self, pitch: f32) -> Result<()>;
}

/// The contract a backend must provide for one [`AudioSource`] (§4.H):
/// apply only the fields named by `mask`, using the `dirty` bit layout.
pub trait SourceBackend: Send + Sync {
    fn apply_dirty(&self, mask: u8, gain: f32, pitch: f32, position: [f32; 4], velocity: [f32; 4]) -> Result<()>;
}

/// A source of raw PCM bytes backing an [`AudioStream`] (`FileStream` in
/// the original). Not internally synchronized — only the scheduler reads
/// it, always while the owning device's lock is held (§5).
pub trait PcmSource: Send {
    /// Reads up to `buf.len()` bytes starting at `offset` (relative to the
    /// start of the PCM data region), returning the number of bytes
    /// actually read.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Bit assignments shared by [`AudioSource`]'s dirty mask and
/// [`AudioDevice`]'s listener dirty mask (§3, §4.H).
pub mod dirty {
    pub const GAIN: u8 = 1 << 0;
    pub const PITCH: u8 = 1 << 1;
    pub const POSITION: u8 = 1 << 2;
    pub const VELOCITY: u8 = 1 << 3;
    /// Listener-only: forward/up orientation changed.
    pub const ORIENTATION: u8 = 1 << 4;
}

pub(crate) fn round_up_to(value: u64, stride: u32) -> u64 {
    if stride == 0 {
        return value;
    }
    let stride = stride as u64;
    ((value + stride - 1) / stride) * stride
}

pub(crate) fn floor_to(value: u64, stride: u32) -> u64 {
    if stride == 0 {
        return value;
    }
    let stride = stride as u64;
    (value / stride) * stride
}

/// Picks the runtime ("effective") format a backend actually decodes into,
/// falling back per §4.G step 4 when the backend lacks a capability:
/// U24 and F64 always fall back to I16 (no backend extension checked for
/// those in the original's fallback table); F32 falls back to I16 unless
/// the backend advertises `HAS_F32_EXT`; stereo/mono is never changed here
/// (handled separately by `flattenSound`, §4.H/GLOSSARY).
pub fn resolve_effective_format(source: AudioStreamFormat, caps: AudioBackendCaps) -> AudioStreamFormat {
    let stride = match source.stride() {
        AudioStride::U24 => AudioStride::I16,
        AudioStride::F64 if !caps.contains(AudioBackendCaps::HAS_F64_EXT) => AudioStride::I16,
        AudioStride::F32 if !caps.contains(AudioBackendCaps::HAS_F32_EXT) => AudioStride::I16,
        other => other,
    };
    AudioStreamFormat::new(source.is_stereo(), stride)
}

/// Converts one frame's worth of `src_stride`-encoded sample(s) down to
/// I16, matching §4.G step 4's per-stride rules. `src` holds exactly one
/// channel's sample bytes.
pub fn convert_sample_to_i16(src: &[u8], src_stride: AudioStride) -> i16 {
    match src_stride {
        AudioStride::I16 => i16::from_le_bytes([src[0], src[1]]),
        AudioStride::U8 => ((src[0] as i16) - 128) << 8,
        AudioStride::U24 => {
            // Take the upper two bytes of the 24-bit sample (TODO: dither
            // the truncated low byte instead of dropping it).
            i16::from_le_bytes([src[1], src[2]])
        }
        AudioStride::F32 => {
            let v = f32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            clamp_float_to_i16(v as f64)
        }
        AudioStride::F64 => {
            let v = f64::from_le_bytes(src.try_into().unwrap());
            clamp_float_to_i16(v)
        }
    }
}

fn clamp_float_to_i16(sample: f64) -> i16 {
    let scaled = sample * -(i16::MIN as f64);
    scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

pub(crate) fn invalid_operation(what: &'static str) -> OxcError {
    OxcError::InvalidOperation(what.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_format_round_trips_channel_and_stride() {
        let f = AudioStreamFormat::new(true, AudioStride::F32);
        assert!(f.is_stereo());
        assert_eq!(f.channels(), 2);
        assert_eq!(f.stride(), AudioStride::F32);
        assert_eq!(f.block_stride(), 8);
    }

    #[test]
    fn u24_stride_detected_via_high_selector() {
        let f = AudioStreamFormat::new(false, AudioStride::U24);
        assert_eq!(f.stride(), AudioStride::U24);
        assert_eq!(f.stride().bytes(), 3);
    }

    #[test]
    fn fallback_downgrades_unsupported_float_and_u24() {
        let no_caps = AudioBackendCaps::empty();
        let f32_fmt = AudioStreamFormat::new(false, AudioStride::F32);
        assert_eq!(resolve_effective_format(f32_fmt, no_caps).stride(), AudioStride::I16);

        let with_f32 = AudioBackendCaps::HAS_F32_EXT;
        assert_eq!(resolve_effective_format(f32_fmt, with_f32).stride(), AudioStride::F32);

        let u24_fmt = AudioStreamFormat::new(false, AudioStride::U24);
        assert_eq!(resolve_effective_format(u24_fmt, with_f32).stride(), AudioStride::I16);
    }

    #[test]
    fn f32_sample_clamps_into_i16_range() {
        let over = 2.0f32.to_le_bytes();
        assert_eq!(convert_sample_to_i16(&over, AudioStride::F32), i16::MAX);
        let under = (-2.0f32).to_le_bytes();
        assert_eq!(convert_sample_to_i16(&under, AudioStride::F32), i16::MIN);
    }

    #[test]
    fn round_up_and_floor_respect_stride() {
        assert_eq!(round_up_to(5, 4), 8);
        assert_eq!(round_up_to(8, 4), 8);
        assert_eq!(floor_to(17, 4), 16);
    }
}
