//! Texture sampling state and texture references.
//!
//! Layers do not own texture storage; they hold a [`TextureRef`] that
//! identifies a GPU texture by handle. Two references to the same
//! handle are the same texture for equality and hashing.
//!
//! Resolved sampler configurations are interned through
//! [`SamplerCache`], so every distinct filter/wrap combination maps to
//! exactly one [`SamplerId`] no matter how many layers use it.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    /// Resolved per draw; equivalent to [`WrapMode::ClampToEdge`] for
    /// program selection.
    Automatic,
}

impl WrapMode {
    /// The concrete mode used when selecting or generating programs.
    #[must_use]
    pub fn resolve(self) -> WrapMode {
        match self {
            WrapMode::Automatic => WrapMode::ClampToEdge,
            other => other,
        }
    }
}

/// Filtering and wrapping for one layer's texture unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub wrap_p: WrapMode,
}

impl SamplerState {
    /// Equality under resolved wrap modes.
    #[must_use]
    pub fn wrap_equal_resolved(&self, other: &SamplerState) -> bool {
        self.wrap_s.resolve() == other.wrap_s.resolve()
            && self.wrap_t.resolve() == other.wrap_t.resolve()
            && self.wrap_p.resolve() == other.wrap_p.resolve()
    }
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            min_filter: FilterMode::LinearMipmapLinear,
            mag_filter: FilterMode::Linear,
            wrap_s: WrapMode::Automatic,
            wrap_t: WrapMode::Automatic,
            wrap_p: WrapMode::Automatic,
        }
    }
}

new_key_type! {
    /// Handle to an interned sampler configuration.
    pub struct SamplerId;
}

/// Value-keyed intern table for sampler configurations.
///
/// Keyed by the sampler parameters themselves, not by which layer or
/// pipeline asked, so equal configurations always share one entry.
#[derive(Debug, Default)]
pub struct SamplerCache {
    entries: SlotMap<SamplerId, SamplerState>,
    by_value: FxHashMap<SamplerState, SamplerId>,
}

impl SamplerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `state`, inserting it on first sight.
    pub fn intern(&mut self, state: SamplerState) -> SamplerId {
        if let Some(&id) = self.by_value.get(&state) {
            return id;
        }
        let id = self.entries.insert(state);
        self.by_value.insert(state, id);
        id
    }

    #[must_use]
    pub fn get(&self, id: SamplerId) -> Option<&SamplerState> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shape of the texture bound to a layer, which decides the sampler
/// type and coordinate swizzle in generated shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    TwoD,
    ThreeD,
    Rectangle,
}

impl Default for TextureTarget {
    fn default() -> Self {
        TextureTarget::TwoD
    }
}

/// A texture identified by its GPU handle.
#[derive(Debug, Clone, Copy)]
pub struct TextureRef {
    pub handle: u64,
    pub target: TextureTarget,
    /// Whether the texture format carries an alpha channel.
    pub has_alpha: bool,
}

impl TextureRef {
    #[must_use]
    pub const fn new(handle: u64, target: TextureTarget) -> Self {
        Self {
            handle,
            target,
            has_alpha: true,
        }
    }

    #[must_use]
    pub const fn opaque(handle: u64, target: TextureTarget) -> Self {
        Self {
            handle,
            target,
            has_alpha: false,
        }
    }
}

impl PartialEq for TextureRef {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for TextureRef {}

impl Hash for TextureRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}
