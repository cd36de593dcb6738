//! `AudioDevice` (§3, §4.G, §4.H, §5): owns the weak lists of currently
//! playing streams and dirty sources, the listener transform, and the one
//! lock that serialises every mutation of either list.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::audio::{dirty, AudioBackendCaps, AudioSource, AudioStream, TARGET_TICK};
use crate::error::Result;
use crate::spinlock::SpinGuarded;

/// Listener transform applied once per tick, before dirty sources are
/// flushed (§5 ordering guarantee).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: [f32; 4],
    pub forward: [f32; 4],
    pub up: [f32; 4],
    pub velocity: [f32; 4],
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            position: [0.0, 0.0, 0.0, 0.0],
            forward: [0.0, 0.0, -1.0, 0.0],
            up: [0.0, 1.0, 0.0, 0.0],
            velocity: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

struct DeviceState {
    streams: Vec<Weak<AudioStream>>,
    pending_sources: Vec<Weak<AudioSource>>,
    listener: Listener,
    pending_dirty_mask: u8,
}

/// A playback device: the root owner of every stream and source created
/// against it. `Arc<AudioDevice>` plays the role of the original's
/// `RefPtr<AudioDeviceExt>` (§3 Lifecycles) — streams and sources hold a
/// strong ref back to their device, while the device holds only weak refs
/// to them, so dropping the last source/stream never keeps the device
/// alive and the device can be torn down out from under weak holders.
pub struct AudioDevice {
    pub caps: AudioBackendCaps,
    state: SpinGuarded<DeviceState>,
}

impl AudioDevice {
    pub fn new(caps: AudioBackendCaps) -> Arc<Self> {
        Arc::new(AudioDevice {
            caps,
            state: SpinGuarded::new(DeviceState {
                streams: Vec::new(),
                pending_sources: Vec::new(),
                listener: Listener::default(),
                pending_dirty_mask: 0,
            }),
        })
    }

    /// Runs `f` with exclusive access to the streams/pending-sources
    /// registry, the same critical section `update` uses. Stream/source
    /// setters fold their own field mutation into `f` so that the registry
    /// push and the field write happen under one lock acquisition, per the
    /// §5 invariant that per-stream/source fields are only touched while
    /// the device lock is held.
    pub(crate) fn with_registry_lock<R>(
        &self,
        f: impl FnOnce(&mut Vec<Weak<AudioStream>>, &mut Vec<Weak<AudioSource>>) -> R,
    ) -> Result<R> {
        self.state.with_lock(Duration::MAX, |s| f(&mut s.streams, &mut s.pending_sources))
    }

    pub fn set_listener_position(&self, position: [f32; 4]) -> Result<()> {
        self.state.with_lock(Duration::MAX, |s| {
            s.listener.position = position;
            s.pending_dirty_mask |= dirty::POSITION;
        })
    }

    pub fn set_listener_velocity(&self, velocity: [f32; 4]) -> Result<()> {
        self.state.with_lock(Duration::MAX, |s| {
            s.listener.velocity = velocity;
            s.pending_dirty_mask |= dirty::VELOCITY;
        })
    }

    pub fn set_listener_orientation(&self, forward: [f32; 4], up: [f32; 4]) -> Result<()> {
        self.state.with_lock(Duration::MAX, |s| {
            s.listener.forward = forward;
            s.listener.up = up;
            s.pending_dirty_mask |= dirty::ORIENTATION;
        })
    }

    pub fn listener(&self) -> Result<Listener> {
        self.state.with_lock(Duration::MAX, |s| s.listener)
    }

    /// One scheduler tick (§4.G, §5 ordering guarantee):
    /// 1. the listener transform is applied (here: simply cleared, since
    ///    applying it is a backend call out of scope per §1),
    /// 2. dirty sources are flushed in insertion order and the list is
    ///    drained,
    /// 3. streams are updated in reverse storage-index order so that
    ///    swap-removing a finished stream does not skip its neighbour.
    pub fn update(&self) -> Result<()> {
        let (dirty_sources, live_streams) = self.state.with_lock(Duration::MAX, |s| {
            s.pending_dirty_mask = 0;

            let dirty_sources: Vec<Arc<AudioSource>> =
                s.pending_sources.iter().filter_map(Weak::upgrade).collect();
            s.pending_sources.clear();

            let live_streams: Vec<Arc<AudioStream>> =
                s.streams.iter().filter_map(Weak::upgrade).collect();

            (dirty_sources, live_streams)
        })?;

        for source in &dirty_sources {
            if let Err(err) = source.flush_dirty() {
                log::warn!("AudioDevice::update: dropping dirty-source flush: {err}");
            }
        }

        let count = live_streams.len();
        let mut to_remove = Vec::new();
        for i in (0..count).rev() {
            // §7: per-tick stream errors are logged and swallowed here, not
            // propagated — one bad stream must not stall the whole device.
            // The stream is stopped (removed from the playing list) either
            // way, whether it finished naturally or failed.
            match live_streams[i].update() {
                Ok(finished) => {
                    if finished {
                        to_remove.push(i);
                    }
                }
                Err(err) => {
                    log::warn!("AudioDevice::update: stopping stream {i} after error: {err}");
                    if let Err(stop_err) = live_streams[i].stop() {
                        log::warn!("AudioDevice::update: failed to cleanly stop stream {i}: {stop_err}");
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            self.state.with_lock(Duration::MAX, |s| {
                for &i in &to_remove {
                    let ptr = Arc::as_ptr(&live_streams[i]);
                    s.streams.retain(|w| !std::ptr::eq(w.as_ptr(), ptr));
                }
            })?;
        }

        Ok(())
    }

    /// Sleeps long enough to pace the scheduler to [`TARGET_TICK`], given
    /// `elapsed` time already spent this tick (§5).
    pub fn wait(&self, elapsed: Duration) {
        if elapsed < TARGET_TICK {
            std::thread::sleep(TARGET_TICK - elapsed);
        }
    }
}
