//! `AudioStream` (§3, §4.G): a playhead over PCM data bound to a device,
//! driven forward one tick at a time by [`AudioDevice::update`].

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::audio::{
    convert_sample_to_i16, floor_to, resolve_effective_format, round_up_to, AudioBackendCaps,
    AudioDevice, AudioStreamFormat, AudioStride, BackendState, PcmSource, StreamBackend,
    DECODE_BUFFER_SIZE, MIN_STREAM_LENGTH, RING_SIZE,
};
use crate::error::{OxcError, Result};

/// Static description of the stream's source data plus the mutable
/// `FileStream` cursor the scheduler advances (§3 "Audio Stream").
pub struct AudioStreamInfo {
    pub format: AudioStreamFormat,
    pub pitch: f32,
    pub is_loop: bool,
    pub sample_rate: u32,
    pub bytes_per_second: u32,
    pub data_start: u64,
    pub data_length: u64,
    pub duration_ns: u64,
    pub stream_length: u64,
    pub flatten_sound: bool,
    pub source: Box<dyn PcmSource>,
}

struct StreamMutable {
    info: AudioStreamInfo,
    effective_format: AudioStreamFormat,
    stream_offset: u64,
    time_offset_ns: u64,
    loops: u64,
    is_playing: bool,
}

/// A decode-and-queue playhead. Owns a strong ref back to its device (§3
/// Lifecycles); the device only ever holds a [`std::sync::Weak`] to this.
pub struct AudioStream {
    pub device: Arc<AudioDevice>,
    backend: Box<dyn StreamBackend>,
    mutable: UnsafeCell<StreamMutable>,
}

// SAFETY: `mutable` is only accessed while `device`'s registry lock is
// held (by `play`/`stop`/`seek_time`) or from inside `AudioDevice::update`,
// which itself only runs with that lock held (§5).
unsafe impl Send for AudioStream {}
unsafe impl Sync for AudioStream {}

impl AudioStream {
    pub fn create(device: Arc<AudioDevice>, info: AudioStreamInfo, backend: Box<dyn StreamBackend>) -> Result<Arc<Self>> {
        if info.stream_length < MIN_STREAM_LENGTH {
            return Err(OxcError::InvalidParameter(format!(
                "AudioStream::create stream_length {} below the {} byte minimum",
                info.stream_length, MIN_STREAM_LENGTH
            )));
        }
        let effective_format = resolve_effective_format(info.format, device.caps);
        Ok(Arc::new(AudioStream {
            device,
            backend,
            mutable: UnsafeCell::new(StreamMutable {
                info,
                effective_format,
                stream_offset: 0,
                time_offset_ns: 0,
                loops: 0,
                is_playing: false,
            }),
        }))
    }

    pub fn is_playing(&self) -> bool {
        // SAFETY: a bool read racing a concurrent locked writer is the same
        // hazard as any other unsynchronized read; acceptable for a status
        // query whose precise timing the spec doesn't constrain.
        unsafe { (*self.mutable.get()).is_playing }
    }

    pub fn loops(&self) -> u64 {
        unsafe { (*self.mutable.get()).loops }
    }

    pub fn stream_offset(&self) -> u64 {
        unsafe { (*self.mutable.get()).stream_offset }
    }

    /// `AudioStream_play`: registers with the device if absent and kicks
    /// the backend to start consuming (§4.G).
    pub fn play(self: &Arc<Self>) -> Result<()> {
        self.device.with_registry_lock(|streams, _| {
            if !streams.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(self))) {
                streams.push(Arc::downgrade(self));
            }
            unsafe {
                (*self.mutable.get()).is_playing = true;
            }
        })?;
        self.backend.start()
    }

    /// `AudioStream_stop`: removes from the device's playing list and
    /// pauses the backend.
    pub fn stop(self: &Arc<Self>) -> Result<()> {
        self.device.with_registry_lock(|streams, _| {
            let ptr = Arc::as_ptr(self);
            streams.retain(|w| !std::ptr::eq(w.as_ptr(), ptr));
            unsafe {
                (*self.mutable.get()).is_playing = false;
            }
        })?;
        self.backend.pause()
    }

    /// `AudioStream_setTime`: seeks to `ns`, rounding up to the next
    /// sample-frame boundary and clamping to the last frame-aligned offset
    /// below `dataLength` (Testable Property 12).
    pub fn seek_time(self: &Arc<Self>, ns: u64) -> Result<()> {
        self.device.with_registry_lock(|_, _| {
            let m = unsafe { &mut *self.mutable.get() };
            let stride = m.info.format.block_stride();
            let raw = ((ns as u128) * (m.info.bytes_per_second as u128) / 1_000_000_000u128) as u64;
            let aligned = round_up_to(raw, stride);
            let max_offset = floor_to(m.info.data_length, stride);
            m.stream_offset = aligned.min(max_offset);
            m.time_offset_ns = ns;
        })
    }

    /// One tick of §4.G's `update` algorithm. Returns `true` if the stream
    /// naturally finished and should be removed from the device's playing
    /// list.
    pub fn update(self: &Arc<Self>) -> Result<bool> {
        let state = self.backend.state();
        let is_loop = unsafe { (*self.mutable.get()).info.is_loop };

        if matches!(state, BackendState::Stopped | BackendState::Paused) && !is_loop {
            self.device.with_registry_lock(|streams, _| {
                let ptr = Arc::as_ptr(self);
                streams.retain(|w| !std::ptr::eq(w.as_ptr(), ptr));
                unsafe {
                    (*self.mutable.get()).is_playing = false;
                }
            })?;
            return Ok(true);
        }

        let free_slots = RING_SIZE.saturating_sub(self.backend.buffers_processed().min(RING_SIZE));
        let mut filled_any = false;

        for _ in 0..free_slots {
            let Some(chunk) = self.decode_next_chunk()? else {
                break;
            };
            self.backend.queue(&chunk)?;
            filled_any = true;
        }

        if filled_any && matches!(state, BackendState::Initial | BackendState::Paused) {
            self.backend.start()?;
        }

        Ok(false)
    }

    /// Pulls and, if needed, converts the next ring-buffer's worth of PCM
    /// data (§4.G steps 3-5). Returns `None` once the tail of a
    /// non-looping stream has been reached.
    fn decode_next_chunk(self: &Arc<Self>) -> Result<Option<Vec<u8>>> {
        let m = unsafe { &mut *self.mutable.get() };

        let remaining = m.info.data_length.saturating_sub(m.stream_offset);
        let mut len = remaining.min(DECODE_BUFFER_SIZE as u64) as usize;

        if len == 0 {
            if !m.info.is_loop {
                return Ok(None);
            }
            m.loops += 1;
            m.stream_offset = 0;
            len = (m.info.data_length.min(DECODE_BUFFER_SIZE as u64)) as usize;
            if len == 0 {
                return Ok(None);
            }
        }

        let mut raw = vec![0u8; len];
        let read = m.info.source.read_at(m.info.data_start + m.stream_offset, &mut raw)?;
        raw.truncate(read);
        m.stream_offset += read as u64;

        let needs_conversion = m.effective_format != m.info.format || m.info.flatten_sound;
        let out = if needs_conversion {
            convert_chunk(&raw, m.info.format, m.effective_format, m.info.flatten_sound)
        } else {
            raw
        };

        Ok(Some(out))
    }
}

/// Converts one decoded chunk from the source format to the effective
/// format, optionally flattening stereo to mono first (§4.G step 4,
/// GLOSSARY "Flatten sound").
fn convert_chunk(src: &[u8], source_format: AudioStreamFormat, effective: AudioStreamFormat, flatten: bool) -> Vec<u8> {
    let src_stride = source_format.stride();
    let src_stride_bytes = src_stride.bytes() as usize;
    let src_channels = source_format.channels() as usize;
    let frame_bytes = src_stride_bytes * src_channels;
    if frame_bytes == 0 {
        return Vec::new();
    }

    let frames = src.len() / frame_bytes;
    let out_channels = if flatten { 1 } else { effective.channels() as usize };
    let mut out = Vec::with_capacity(frames * out_channels * 2);

    for frame in 0..frames {
        let base = frame * frame_bytes;
        let mut samples = [0i16; 2];
        for ch in 0..src_channels.min(2) {
            let off = base + ch * src_stride_bytes;
            samples[ch] = convert_sample_to_i16(&src[off..off + src_stride_bytes], src_stride);
        }

        if flatten && src_channels == 2 {
            let avg = ((samples[0] as i32 + samples[1] as i32) / 2) as i16;
            out.extend_from_slice(&avg.to_le_bytes());
        } else {
            for ch in 0..out_channels {
                let s = samples[ch.min(src_channels - 1)];
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
    }

    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) struct MemoryPcm(pub Vec<u8>);

    impl PcmSource for MemoryPcm {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let offset = offset as usize;
            if offset >= self.0.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.0.len() - offset);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }
    }

    pub(crate) fn test_info(data_length: u64) -> AudioStreamInfo {
        AudioStreamInfo {
            format: AudioStreamFormat::new(false, AudioStride::I16),
            pitch: 1.0,
            is_loop: false,
            sample_rate: 8000,
            bytes_per_second: 16000,
            data_start: 0,
            data_length,
            duration_ns: data_length * 1_000_000_000 / 16000,
            stream_length: MIN_STREAM_LENGTH.max(data_length),
            flatten_sound: false,
            source: Box::new(MemoryPcm(vec![0u8; data_length as usize])),
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    pub(crate) enum BackendAtEnd {
        Stopped,
        Playing,
    }

    pub(crate) struct FakeBackend {
        end_state: BackendAtEnd,
        processed: AtomicUsize,
        queued: Mutex<Vec<Vec<u8>>>,
        started: AtomicUsize,
    }

    impl StreamBackend for FakeBackend {
        fn state(&self) -> BackendState {
            match self.end_state {
                BackendAtEnd::Stopped => BackendState::Stopped,
                BackendAtEnd::Playing => BackendState::Playing,
            }
        }
        fn buffers_processed(&self) -> usize {
            self.processed.swap(0, Ordering::SeqCst).min(RING_SIZE)
        }
        fn queue(&self, data: &[u8]) -> Result<()> {
            self.queued.lock().unwrap().push(data.to_vec());
            Ok(())
        }
        fn start(&self) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn pause(&self) -> Result<()> {
            Ok(())
        }
        fn set_pitch(&self, _pitch: f32) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn noop_backend(end_state: BackendAtEnd) -> Box<dyn StreamBackend> {
        Box::new(FakeBackend {
            end_state,
            processed: AtomicUsize::new(RING_SIZE),
            queued: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
        })
    }

    /// A backend whose `queue` always fails, standing in for a backend API
    /// call rejected by the platform driver, so `AudioDevice::update`'s
    /// per-stream error handling has something real to catch.
    pub(crate) struct FailingQueueBackend;

    impl StreamBackend for FailingQueueBackend {
        fn state(&self) -> BackendState {
            BackendState::Playing
        }
        fn buffers_processed(&self) -> usize {
            0
        }
        fn queue(&self, _data: &[u8]) -> Result<()> {
            Err(OxcError::PlatformError {
                code: -1,
                message: "simulated backend queue failure".to_string(),
            })
        }
        fn start(&self) -> Result<()> {
            Ok(())
        }
        fn pause(&self) -> Result<()> {
            Ok(())
        }
        fn set_pitch(&self, _pitch: f32) -> Result<()> {
            Ok(())
        }
    }

    pub(crate) fn failing_queue_backend() -> Box<dyn StreamBackend> {
        Box::new(FailingQueueBackend)
    }

    #[test]
    fn seek_rounds_up_to_block_stride_and_clamps_to_tail() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let mut info = test_info(16_000);
        info.data_length = 16_001; // not a multiple of the 2-byte stride
        let stream = AudioStream::create(device, info, noop_backend(BackendAtEnd::Playing)).unwrap();

        stream.seek_time(1_000_000_000).unwrap();
        assert_eq!(stream.stream_offset(), 16_000);
    }

    #[test]
    fn decode_advances_offset_and_reports_eof_when_not_looping() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let info = test_info(4);
        let stream = AudioStream::create(device, info, noop_backend(BackendAtEnd::Playing)).unwrap();

        assert!(stream.decode_next_chunk().unwrap().is_some());
        assert_eq!(stream.stream_offset(), 4);
        assert!(stream.decode_next_chunk().unwrap().is_none());
    }

    #[test]
    fn looping_stream_wraps_and_counts_a_loop() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let mut info = test_info(4);
        info.is_loop = true;
        let stream = AudioStream::create(device, info, noop_backend(BackendAtEnd::Playing)).unwrap();

        stream.decode_next_chunk().unwrap();
        assert_eq!(stream.stream_offset(), 4);
        stream.decode_next_chunk().unwrap();
        assert_eq!(stream.loops(), 1);
        assert_eq!(stream.stream_offset(), 4);
    }

    #[test]
    fn stereo_f32_converts_and_flattens_to_mono_i16() {
        let left = 0.5f32.to_le_bytes();
        let right = (-0.5f32).to_le_bytes();
        let mut src = Vec::new();
        src.extend_from_slice(&left);
        src.extend_from_slice(&right);

        let source_format = AudioStreamFormat::new(true, AudioStride::F32);
        let effective = AudioStreamFormat::new(true, AudioStride::I16);
        let out = convert_chunk(&src, source_format, effective, true);

        assert_eq!(out.len(), 2);
        let sample = i16::from_le_bytes([out[0], out[1]]);
        assert!(sample.abs() < 100);
    }

    #[test]
    fn short_stream_length_is_rejected() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let mut info = test_info(4);
        info.stream_length = 10;
        assert!(AudioStream::create(device, info, noop_backend(BackendAtEnd::Playing)).is_err());
    }
}
