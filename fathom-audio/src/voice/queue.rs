//! Fixed-capacity ring of encoded voice frames

use std::sync::{Mutex, MutexGuard};

use tracing::trace;

#[derive(Default)]
struct Slot {
    /// Frame id stored in this slot (0 = never written)
    id: u64,
    data: Vec<u8>,
}

struct QueueState {
    slots: Vec<Slot>,
    latest: u64,
}

/// Ring of encoded frames shared between one writer and any number of readers.
///
/// Frame ids start at 1 and increase monotonically; id 0 means "nothing
/// written yet". A frame lives in slot `id % capacity` until it is
/// overwritten `capacity` frames later, so readers clamp their cursor with
/// [`clamp_read_id`](Self::clamp_read_id) before reading. Reads never block
/// on the writer beyond the short slot copy.
pub struct VoiceFrameQueue {
    capacity: usize,
    state: Mutex<QueueState>,
}

impl VoiceFrameQueue {
    /// Create a queue holding `capacity` frames (at least 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                slots: (0..capacity).map(|_| Slot::default()).collect(),
                latest: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Id of the newest frame written, or 0 if the queue is empty
    pub fn latest_frame_id(&self) -> u64 {
        self.lock().latest
    }

    /// Append a frame produced locally; returns the id it was given.
    pub fn push(&self, frame: &[u8]) -> u64 {
        let mut state = self.lock();
        let id = state.latest.saturating_add(1);
        Self::store(&mut state, self.capacity, id, frame);
        id
    }

    /// Store a frame delivered with an explicit id (network ingress).
    ///
    /// Ids at or below the latest id are stale and ignored, and `u64::MAX`
    /// is reserved. Skipped ids are left unwritten and read back as missing.
    pub fn receive(&self, frame_id: u64, frame: &[u8]) -> bool {
        let mut state = self.lock();
        if frame_id == u64::MAX {
            trace!("Dropping voice frame with reserved id");
            return false;
        }
        if frame_id <= state.latest {
            trace!(frame_id, latest = state.latest, "Dropping stale voice frame");
            return false;
        }
        Self::store(&mut state, self.capacity, frame_id, frame);
        true
    }

    fn store(state: &mut QueueState, capacity: usize, id: u64, frame: &[u8]) {
        let slot = &mut state.slots[(id % capacity as u64) as usize];
        slot.id = id;
        slot.data.clear();
        slot.data.extend_from_slice(frame);
        state.latest = id;
    }

    /// Oldest id that has not been overwritten
    pub fn oldest_frame_id(&self) -> u64 {
        let latest = self.lock().latest;
        Self::oldest(latest, self.capacity)
    }

    fn oldest(latest: u64, capacity: usize) -> u64 {
        latest.saturating_sub(capacity as u64 - 1).max(1)
    }

    /// Move a requested id forward so it never names an overwritten slot.
    pub fn clamp_read_id(&self, requested: u64) -> u64 {
        requested.max(self.oldest_frame_id())
    }

    /// Copy frame `frame_id` into `out`.
    ///
    /// Returns false (leaving `out` empty) when the frame has not arrived,
    /// was skipped, was overwritten, or is empty.
    pub fn read(&self, frame_id: u64, out: &mut Vec<u8>) -> bool {
        out.clear();
        let state = self.lock();
        if frame_id == 0 || frame_id > state.latest {
            return false;
        }
        let slot = &state.slots[(frame_id % self.capacity as u64) as usize];
        if slot.id != frame_id || slot.data.is_empty() {
            return false;
        }
        out.extend_from_slice(&slot.data);
        true
    }
}
