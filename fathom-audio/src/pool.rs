//! Fixed pools of hardware sources
//!
//! Each pool owns `N` sources created up front. A slot holds at most one
//! channel; a new channel takes the lowest-index slot that is empty or whose
//! channel has finished. Playing channels are never evicted, so a full pool
//! refuses new channels instead.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::asset::SoundAsset;
use crate::channel::PlaybackChannel;
use crate::device::{AudioDevice, SourceId};
use crate::error::Result;

/// Which pool a channel draws its source from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Sound effects, ambience and music
    General,
    /// Voice chat, sized so speech is never starved by effects
    Voice,
}

pub struct SourcePool {
    kind: PoolKind,
    sources: Vec<SourceId>,
    slots: Mutex<Vec<Option<Arc<PlaybackChannel>>>>,
}

impl SourcePool {
    /// Create `size` hardware sources. Already created sources are deleted on failure.
    pub fn new(kind: PoolKind, device: &dyn AudioDevice, size: usize) -> Result<Self> {
        let mut sources = Vec::with_capacity(size);
        for _ in 0..size {
            match device.create_source() {
                Ok(source) => sources.push(source),
                Err(e) => {
                    for source in sources {
                        let _ = device.delete_source(source);
                    }
                    return Err(e.into());
                }
            }
        }
        debug!("Created {:?} pool with {} sources", kind, size);
        Ok(Self {
            kind,
            slots: Mutex::new(vec![None; sources.len()]),
            sources,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Arc<PlaybackChannel>>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.sources.len()
    }

    /// Bind a new channel to a free slot.
    ///
    /// `make` builds and starts the channel on the chosen source. Returns
    /// `Ok(None)` when every slot is busy or the asset is at its instance
    /// limit.
    pub fn assign(
        &self,
        asset: &SoundAsset,
        make: impl FnOnce(SourceId) -> Result<Arc<PlaybackChannel>>,
    ) -> Result<Option<Arc<PlaybackChannel>>> {
        let mut slots = self.lock();

        if let Some(max) = asset.max_instances() {
            let playing = slots
                .iter()
                .flatten()
                .filter(|c| c.asset().id() == asset.id() && c.is_playing())
                .count();
            if playing >= max {
                trace!("{} is at its instance limit ({})", asset.name(), max);
                return Ok(None);
            }
        }

        let free = slots
            .iter()
            .position(|slot| slot.as_ref().is_none_or(|c| !c.is_playing()));
        let Some(index) = free else {
            debug!("No free {:?} source for {}", self.kind, asset.name());
            return Ok(None);
        };

        if let Some(old) = slots[index].take() {
            old.dispose();
        }
        let channel = make(self.sources[index])?;
        slots[index] = Some(channel.clone());
        Ok(Some(channel))
    }

    /// Live channels in slot order
    pub fn channels(&self) -> Vec<Arc<PlaybackChannel>> {
        self.lock().iter().flatten().cloned().collect()
    }

    /// Slots currently held by a playing channel
    pub fn playing_count(&self) -> usize {
        self.lock().iter().flatten().filter(|c| c.is_playing()).count()
    }

    /// Dispose every channel and empty the slots.
    pub fn release_all(&self) {
        let mut slots = self.lock();
        for channel in slots.iter_mut().filter_map(Option::take) {
            channel.dispose();
        }
    }

    /// Delete the hardware sources. Call after [`release_all`](Self::release_all).
    pub fn delete_sources(&self, device: &dyn AudioDevice) {
        for source in &self.sources {
            if let Err(e) = device.delete_source(*source) {
                warn!("Failed to delete source {:?}: {}", source, e);
            }
        }
    }
}
