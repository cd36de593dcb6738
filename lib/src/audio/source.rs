//! `AudioSource` (§3 "Audio Source", §4.H): a positioned, gain/pitch
//! modulated handle onto a stream's playhead, with coalesced dirty-mask
//! updates flushed once per device tick.

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::audio::{dirty, invalid_operation, AudioDevice, AudioStream, SourceBackend};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    pos: [f32; 4],
    velocity: [f32; 4],
}

impl Default for Point {
    fn default() -> Self {
        Point {
            pos: [0.0, 0.0, 0.0, 0.0],
            velocity: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Modifier {
    gain: f32,
    pitch: f32,
}

impl Default for Modifier {
    fn default() -> Self {
        Modifier { gain: 1.0, pitch: 1.0 }
    }
}

struct SourceMutable {
    point: Point,
    modifier: Modifier,
    dirty_mask: u8,
    registered: bool,
}

/// A single emitter bound to a device and, optionally, the
/// [`AudioStream`] supplying its samples. Holds strong refs to both,
/// matching the destructor order source -> stream -> device (§3
/// Lifecycles) that comes for free from `Arc` drop order.
pub struct AudioSource {
    pub device: Arc<AudioDevice>,
    pub stream: Option<Arc<AudioStream>>,
    pub spatial_audio: bool,
    backend: Box<dyn SourceBackend>,
    mutable: UnsafeCell<SourceMutable>,
}

// SAFETY: `mutable` is only touched while `device`'s registry lock is held,
// by the setters below and by `flush_dirty` (called only from
// `AudioDevice::update`, itself only running under that lock).
unsafe impl Send for AudioSource {}
unsafe impl Sync for AudioSource {}

impl AudioSource {
    pub fn create(
        device: Arc<AudioDevice>,
        stream: Option<Arc<AudioStream>>,
        spatial_audio: bool,
        backend: Box<dyn SourceBackend>,
    ) -> Arc<Self> {
        Arc::new(AudioSource {
            device,
            stream,
            spatial_audio,
            backend,
            mutable: UnsafeCell::new(SourceMutable {
                point: Point::default(),
                modifier: Modifier::default(),
                dirty_mask: 0,
                registered: false,
            }),
        })
    }

    pub fn gain(&self) -> f32 {
        unsafe { (*self.mutable.get()).modifier.gain }
    }

    pub fn pitch(&self) -> f32 {
        unsafe { (*self.mutable.get()).modifier.pitch }
    }

    pub fn position(&self) -> [f32; 4] {
        unsafe { (*self.mutable.get()).point.pos }
    }

    pub fn velocity(&self) -> [f32; 4] {
        unsafe { (*self.mutable.get()).point.velocity }
    }

    pub fn dirty_mask(&self) -> u8 {
        unsafe { (*self.mutable.get()).dirty_mask }
    }

    pub fn set_gain(self: &Arc<Self>, gain: f32) -> Result<()> {
        self.mark_dirty(dirty::GAIN, |m| m.modifier.gain = gain)
    }

    /// Pitch belongs to the stream when one is bound (§4.H): an
    /// `AudioStream`'s pitch is shared across every source playing it, so
    /// per-source pitch mutation is only meaningful for a future
    /// buffer-backed (streamless) source.
    pub fn set_pitch(self: &Arc<Self>, pitch: f32) -> Result<()> {
        if self.stream.is_some() {
            return Err(invalid_operation(
                "AudioSource::set_pitch is forbidden on a source bound to an audio stream; set the stream's pitch instead",
            ));
        }
        self.mark_dirty(dirty::PITCH, |m| m.modifier.pitch = pitch)
    }

    pub fn set_position(self: &Arc<Self>, position: [f32; 4]) -> Result<()> {
        self.mark_dirty(dirty::POSITION, |m| m.point.pos = position)
    }

    pub fn set_velocity(self: &Arc<Self>, velocity: [f32; 4]) -> Result<()> {
        self.mark_dirty(dirty::VELOCITY, |m| m.point.velocity = velocity)
    }

    /// Writes the new value, ORs `bit` into the dirty mask, and registers
    /// `self` in the device's `pendingSources` list if not already present
    /// — all under the device's one registry lock, so the list push and
    /// field write are atomic together (§4.H, §5).
    fn mark_dirty(self: &Arc<Self>, bit: u8, apply: impl FnOnce(&mut SourceMutable)) -> Result<()> {
        self.device.with_registry_lock(|_, pending_sources| {
            let m = unsafe { &mut *self.mutable.get() };
            apply(m);
            m.dirty_mask |= bit;
            if !m.registered {
                m.registered = true;
                pending_sources.push(Arc::downgrade(self));
            }
        })
    }

    /// Called once per tick by [`AudioDevice::update`] for every source
    /// that was pending at the start of the tick. Passes only the dirty
    /// fields to the backend, then clears the mask (§4.H).
    pub fn flush_dirty(&self) -> Result<()> {
        let (mask, gain, pitch, position, velocity) = {
            let m = unsafe { &mut *self.mutable.get() };
            let snapshot = (m.dirty_mask, m.modifier.gain, m.modifier.pitch, m.point.pos, m.point.velocity);
            m.dirty_mask = 0;
            m.registered = false;
            snapshot
        };

        if mask == 0 {
            return Ok(());
        }

        self.backend.apply_dirty(mask, gain, pitch, position, velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream::tests::{noop_backend, test_info, BackendAtEnd};
    use crate::audio::AudioBackendCaps;
    use std::sync::Mutex;

    struct RecordingBackend {
        calls: Mutex<Vec<(u8, f32, f32, [f32; 4], [f32; 4])>>,
    }

    impl SourceBackend for Arc<RecordingBackend> {
        fn apply_dirty(&self, mask: u8, gain: f32, pitch: f32, position: [f32; 4], velocity: [f32; 4]) -> Result<()> {
            self.calls.lock().unwrap().push((mask, gain, pitch, position, velocity));
            Ok(())
        }
    }

    fn recording_backend() -> (Arc<RecordingBackend>, Box<dyn SourceBackend>) {
        let backend = Arc::new(RecordingBackend { calls: Mutex::new(Vec::new()) });
        let boxed: Box<dyn SourceBackend> = Box::new(backend.clone());
        (backend, boxed)
    }

    #[test]
    fn setting_gain_marks_dirty_and_registers_once() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let (_backend, handle) = recording_backend();
        let source = AudioSource::create(device.clone(), None, true, handle);

        source.set_gain(0.5).unwrap();
        source.set_position([1.0, 0.0, 0.0, 0.0]).unwrap();

        assert_eq!(source.dirty_mask(), dirty::GAIN | dirty::POSITION);
        assert_eq!(source.gain(), 0.5);
        assert_eq!(source.position(), [1.0, 0.0, 0.0, 0.0]);

        device
            .with_registry_lock(|_, pending| assert_eq!(pending.len(), 1))
            .unwrap();
    }

    #[test]
    fn flush_dirty_clears_mask_and_calls_backend_once() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let (backend, handle) = recording_backend();
        let source = AudioSource::create(device, None, true, handle);

        source.set_gain(0.25).unwrap();
        source.flush_dirty().unwrap();

        assert_eq!(source.dirty_mask(), 0);
        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, dirty::GAIN);
        assert_eq!(calls[0].1, 0.25);
    }

    #[test]
    fn flush_dirty_is_a_noop_when_nothing_changed() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let (backend, handle) = recording_backend();
        let source = AudioSource::create(device, None, true, handle);

        source.flush_dirty().unwrap();
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn set_pitch_is_forbidden_when_bound_to_a_stream() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let stream = AudioStream::create(device.clone(), test_info(16_000), noop_backend(BackendAtEnd::Playing)).unwrap();
        let (_backend, handle) = recording_backend();
        let source = AudioSource::create(device, Some(stream), true, handle);

        assert!(source.set_pitch(2.0).is_err());
    }

    #[test]
    fn set_pitch_is_allowed_without_a_bound_stream() {
        let device = AudioDevice::new(AudioBackendCaps::empty());
        let (_backend, handle) = recording_backend();
        let source = AudioSource::create(device, None, true, handle);

        source.set_pitch(1.5).unwrap();
        assert_eq!(source.pitch(), 1.5);
    }
}
