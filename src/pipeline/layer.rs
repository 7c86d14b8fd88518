//! Layer State Groups
//!
//! Texture layers form their own sparse-difference tree, parallel to
//! the pipeline tree. A layer records only the groups that differ from
//! its parent layer; the rest resolves through layer ancestry. Each
//! layer is owned by at most one pipeline at a time, which is what
//! makes copy-on-write of owned layers safe.

use bitflags::bitflags;
use glam::Mat4;

use crate::color::Color;
use crate::driver::DriverFeatures;
use crate::node::{GraphNode, Node};
use crate::sampler::{SamplerState, TextureRef, TextureTarget};
use crate::snippet::Snippet;

use super::{LayerId, PipelineId, PipelineStore};

bitflags! {
    /// Sparse layer state groups. Bit order doubles as the group index
    /// for authority-resolution scratch arrays.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerGroups: u32 {
        const UNIT                = 1 << 0;
        const TEXTURE_TARGET      = 1 << 1;
        const TEXTURE_DATA        = 1 << 2;
        const FILTERS             = 1 << 3;
        const WRAP_MODES          = 1 << 4;
        const COMBINE             = 1 << 5;
        const COMBINE_CONSTANT    = 1 << 6;
        const USER_MATRIX         = 1 << 7;
        const POINT_SPRITE_COORDS = 1 << 8;
        const VERTEX_SNIPPETS     = 1 << 9;
        const FRAGMENT_SNIPPETS   = 1 << 10;
    }
}

/// Number of layer groups; sizes authority-resolution scratch arrays.
pub const N_LAYER_GROUPS: usize = 11;

impl LayerGroups {
    /// Groups stored inside the lazily allocated [`LayerBigState`].
    pub const NEEDS_BIG_STATE: LayerGroups = LayerGroups::COMBINE
        .union(LayerGroups::COMBINE_CONSTANT)
        .union(LayerGroups::USER_MATRIX)
        .union(LayerGroups::POINT_SPRITE_COORDS)
        .union(LayerGroups::VERTEX_SNIPPETS)
        .union(LayerGroups::FRAGMENT_SNIPPETS);

    /// Groups holding more than one property, copied wholesale before
    /// a partial write.
    pub const MULTI_PROPERTY: LayerGroups = LayerGroups::FILTERS
        .union(LayerGroups::WRAP_MODES)
        .union(LayerGroups::COMBINE)
        .union(LayerGroups::VERTEX_SNIPPETS)
        .union(LayerGroups::FRAGMENT_SNIPPETS);

    /// Groups whose value can change the automatic blend decision.
    pub const AFFECTS_BLENDING: LayerGroups = LayerGroups::TEXTURE_DATA
        .union(LayerGroups::COMBINE)
        .union(LayerGroups::COMBINE_CONSTANT)
        .union(LayerGroups::FRAGMENT_SNIPPETS);

    /// Index of a single-bit group.
    #[must_use]
    pub fn index(self) -> usize {
        debug_assert_eq!(self.bits().count_ones(), 1);
        self.bits().trailing_zeros() as usize
    }
}

/// Layer groups that change generated fragment shader code.
#[must_use]
pub fn layer_fragment_codegen_groups(features: DriverFeatures) -> LayerGroups {
    let mut groups = LayerGroups::COMBINE
        | LayerGroups::TEXTURE_TARGET
        | LayerGroups::UNIT
        | LayerGroups::FRAGMENT_SNIPPETS;
    if features.contains(DriverFeatures::POINT_COORD_BUILTIN) {
        groups |= LayerGroups::POINT_SPRITE_COORDS;
    }
    groups
}

/// Layer groups that change generated vertex shader code.
#[must_use]
pub fn layer_vertex_codegen_groups(_features: DriverFeatures) -> LayerGroups {
    LayerGroups::VERTEX_SNIPPETS
}

// ─── Combine model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineFunc {
    Replace,
    Modulate,
    Add,
    AddSigned,
    Subtract,
    Interpolate,
    Dot3Rgb,
    Dot3Rgba,
}

impl CombineFunc {
    /// Number of arguments the function consumes.
    #[must_use]
    pub fn n_args(self) -> usize {
        match self {
            CombineFunc::Replace => 1,
            CombineFunc::Modulate
            | CombineFunc::Add
            | CombineFunc::AddSigned
            | CombineFunc::Subtract
            | CombineFunc::Dot3Rgb
            | CombineFunc::Dot3Rgba => 2,
            CombineFunc::Interpolate => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineSource {
    /// This layer's own texture.
    Texture,
    /// The texture sampled by the layer on the given unit.
    TextureUnit(usize),
    Constant,
    PrimaryColor,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineOp {
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Rarely-diverging layer state, boxed like the pipeline counterpart.
#[derive(Debug, Clone)]
pub struct LayerBigState {
    pub rgb_func: CombineFunc,
    pub rgb_srcs: [CombineSource; 3],
    pub rgb_ops: [CombineOp; 3],
    pub alpha_func: CombineFunc,
    pub alpha_srcs: [CombineSource; 3],
    pub alpha_ops: [CombineOp; 3],
    pub constant: Color,
    pub user_matrix: Mat4,
    pub point_sprite_coords: bool,
    pub vertex_snippets: Vec<Snippet>,
    pub fragment_snippets: Vec<Snippet>,
}

impl LayerBigState {
    /// Whether any in-use combine argument reads the layer constant.
    #[must_use]
    pub fn references_constant(&self) -> bool {
        let rgb_n = self.rgb_func.n_args();
        let alpha_n = self.alpha_func.n_args();
        self.rgb_srcs[..rgb_n].contains(&CombineSource::Constant)
            || self.alpha_srcs[..alpha_n].contains(&CombineSource::Constant)
    }

    /// Whether the RGB and alpha halves need separate combine passes.
    #[must_use]
    pub fn need_separate_combine(&self) -> bool {
        self.rgb_func != self.alpha_func
            || self.rgb_srcs[..self.rgb_func.n_args()] != self.alpha_srcs[..self.alpha_func.n_args()]
    }
}

impl Default for LayerBigState {
    fn default() -> Self {
        Self {
            rgb_func: CombineFunc::Modulate,
            rgb_srcs: [
                CombineSource::Previous,
                CombineSource::Texture,
                CombineSource::Constant,
            ],
            rgb_ops: [CombineOp::SrcColor; 3],
            alpha_func: CombineFunc::Modulate,
            alpha_srcs: [
                CombineSource::Previous,
                CombineSource::Texture,
                CombineSource::Constant,
            ],
            alpha_ops: [CombineOp::SrcAlpha; 3],
            constant: Color::TRANSPARENT,
            user_matrix: Mat4::IDENTITY,
            point_sprite_coords: false,
            vertex_snippets: Vec::new(),
            fragment_snippets: Vec::new(),
        }
    }
}

// ─── Layer node ──────────────────────────────────────────────────────────────

/// One texture layer in the sparse layer tree.
#[derive(Debug)]
pub struct Layer {
    pub node: Node<LayerId>,
    /// The pipeline whose `layer_differences` currently holds this
    /// layer, if any. A layer never has two owners.
    pub owner: Option<PipelineId>,
    /// Application-chosen layer index; stable across unit shuffling.
    pub index: usize,
    pub differences: LayerGroups,
    pub unit_index: usize,
    pub texture: Option<TextureRef>,
    pub target: TextureTarget,
    pub sampler: SamplerState,
    pub big_state: Option<Box<LayerBigState>>,
}

impl Layer {
    /// The root default layer: no texture, default sampling, modulate
    /// combine.
    #[must_use]
    pub fn root() -> Self {
        Self {
            node: Node::new(),
            owner: None,
            index: 0,
            differences: LayerGroups::all(),
            unit_index: 0,
            texture: None,
            target: TextureTarget::TwoD,
            sampler: SamplerState::default(),
            big_state: Some(Box::default()),
        }
    }

    #[must_use]
    pub fn big(&self) -> &LayerBigState {
        self.big_state.as_ref().expect("layer big state allocated")
    }

    pub fn big_mut(&mut self) -> &mut LayerBigState {
        self.big_state.get_or_insert_with(Box::default)
    }
}

impl GraphNode<LayerId> for Layer {
    fn node(&self) -> &Node<LayerId> {
        &self.node
    }

    fn node_mut(&mut self) -> &mut Node<LayerId> {
        &mut self.node
    }
}

// ─── Authority resolution ────────────────────────────────────────────────────

/// Nearest ancestor (or `layer` itself) owning `group`.
#[must_use]
pub fn layer_authority(store: &PipelineStore, layer: LayerId, group: LayerGroups) -> LayerId {
    let mut current = layer;
    loop {
        let l = &store.layers[current];
        if l.differences.intersects(group) {
            return current;
        }
        match l.node.parent {
            Some(parent) => current = parent,
            // The root claims every group.
            None => return current,
        }
    }
}

/// Resolved unit index for a layer.
#[must_use]
pub fn layer_unit_index(store: &PipelineStore, layer: LayerId) -> usize {
    let authority = layer_authority(store, layer, LayerGroups::UNIT);
    store.layers[authority].unit_index
}

/// Resolved texture reference for a layer.
#[must_use]
pub fn layer_texture(store: &PipelineStore, layer: LayerId) -> Option<TextureRef> {
    let authority = layer_authority(store, layer, LayerGroups::TEXTURE_DATA);
    store.layers[authority].texture
}

/// Resolved texture target for a layer.
#[must_use]
pub fn layer_target(store: &PipelineStore, layer: LayerId) -> TextureTarget {
    let authority = layer_authority(store, layer, LayerGroups::TEXTURE_TARGET);
    store.layers[authority].target
}

/// Resolves the authorities for every group in `mask` with a single
/// ancestry walk. Entries for groups outside `mask` are left `None`.
pub fn layer_resolve_authorities(
    store: &PipelineStore,
    layer: LayerId,
    mask: LayerGroups,
    authorities: &mut [Option<LayerId>; N_LAYER_GROUPS],
) {
    let mut remaining = mask;
    let mut current = layer;
    loop {
        let l = &store.layers[current];
        let found = l.differences & remaining;
        if !found.is_empty() {
            for group in found.iter() {
                authorities[group.index()] = Some(current);
            }
            remaining &= !found;
            if remaining.is_empty() {
                return;
            }
        }
        match l.node.parent {
            Some(parent) => current = parent,
            None => {
                // Root backstops any group with no explicit authority.
                for group in remaining.iter() {
                    authorities[group.index()] = Some(current);
                }
                return;
            }
        }
    }
}
