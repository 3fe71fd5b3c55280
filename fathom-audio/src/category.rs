//! Named channel groups sharing gain multipliers and a mute flag

use std::sync::Mutex;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::device::clamp_safe;

/// Layer written by [`CategoryTable::set_gain`]
pub const USER_LAYER: usize = 0;
/// Layer written by voice chat ducking
pub const VOICE_ATTENUATION_LAYER: usize = 1;

#[derive(Debug, Clone, Default)]
struct CategoryModifier {
    layers: SmallVec<[f32; 2]>,
    muted: bool,
}

impl CategoryModifier {
    fn gain(&self) -> f32 {
        self.layers.iter().product()
    }
}

/// Process-wide category gain and mute table.
///
/// Names are case-insensitive. Entries are created on first write; an unknown
/// category has gain 1.0 and is not muted.
#[derive(Debug, Default)]
pub struct CategoryTable {
    entries: Mutex<HashMap<String, CategoryModifier>>,
}

impl CategoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry<R>(&self, name: &str, f: impl FnOnce(&mut CategoryModifier) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(entries.entry(name.to_ascii_lowercase()).or_default())
    }

    fn read<R>(&self, name: &str, f: impl FnOnce(&CategoryModifier) -> R, missing: R) -> R {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&name.to_ascii_lowercase()).map_or(missing, f)
    }

    /// Product of every gain layer of `name`
    pub fn gain(&self, name: &str) -> f32 {
        self.read(name, CategoryModifier::gain, 1.0)
    }

    /// Gain of one layer (1.0 when unset)
    pub fn layer_gain(&self, name: &str, layer: usize) -> f32 {
        self.read(name, |m| m.layers.get(layer).copied().unwrap_or(1.0), 1.0)
    }

    pub fn set_gain(&self, name: &str, layer: usize, gain: f32) {
        let gain = clamp_safe(gain, 0.0, 1.0);
        self.with_entry(name, |m| {
            if m.layers.len() <= layer {
                m.layers.resize(layer + 1, 1.0);
            }
            m.layers[layer] = gain;
        });
    }

    pub fn muted(&self, name: &str) -> bool {
        self.read(name, |m| m.muted, false)
    }

    pub fn set_muted(&self, name: &str, muted: bool) {
        self.with_entry(name, |m| m.muted = muted);
    }
}
