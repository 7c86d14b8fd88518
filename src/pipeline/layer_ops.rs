//! Layer-level operations: lookup, copy-on-write and setters.
//!
//! Layers are shared through ancestry exactly like pipelines, with one
//! extra wrinkle: a layer can be referenced from a pipeline's
//! difference list, and at most one pipeline may own it at a time.
//! Writing through a pipeline to a layer it does not own first derives
//! a private copy for that pipeline.

use glam::Mat4;
use smallvec::SmallVec;

use crate::errors::{GlazeError, Result};
use crate::sampler::{FilterMode, SamplerId, SamplerState, TextureRef, TextureTarget, WrapMode};
use crate::snippet::{Snippet, SnippetHook};

use super::core::{
    add_layer_difference, handle_automatic_blend_enable, layer_copy, pre_change_notify,
    release_layer, remove_layer_difference, unit_ordered_layers,
};
use super::layer::{
    layer_authority, layer_unit_index, CombineFunc, CombineOp, CombineSource, Layer,
    LayerBigState, LayerGroups,
};
use super::state::StateGroups;
use super::{LayerId, PipelineId, PipelineStore};

// ─── Layer copy-on-write ─────────────────────────────────────────────────────

/// Prepares `layer` for a mutation of `change` on behalf of
/// `required_owner`. Returns the layer to write to, which is a fresh
/// private copy when the original is shared.
pub(crate) fn layer_pre_change_notify(
    store: &mut PipelineStore,
    required_owner: Option<PipelineId>,
    layer: LayerId,
    change: LayerGroups,
) -> LayerId {
    // A floating layer with no dependants can be modified freely.
    let is_floating =
        store.layers[layer].owner.is_none() && !store.layers[layer].node.has_children();

    if !is_floating {
        let owner_pipeline =
            required_owner.expect("shared layers are only mutated through a pipeline");

        // The owning pipeline is about to change; give it the chance to
        // push its state down to strong dependants first.
        pre_change_notify(store, owner_pipeline, StateGroups::LAYERS, true);

        let shared = store.layers[layer].owner != Some(owner_pipeline)
            || store.layers[layer].node.has_children();
        if shared {
            let copy = layer_copy(store, layer);
            if store.layers[layer].owner == Some(owner_pipeline) {
                remove_layer_difference(store, owner_pipeline, layer, false);
            }
            add_layer_difference(store, owner_pipeline, copy, false);
            finish_layer_pre_change(store, copy, change);
            return copy;
        }

        // In-place change of an owned, childless layer: the backends
        // hear about it through the layer hooks.
        invalidate_backend_layer_state(store, owner_pipeline, layer, change);
        store.pipelines[owner_pipeline].age += 1;
    }

    finish_layer_pre_change(store, layer, change);
    layer
}

fn finish_layer_pre_change(store: &mut PipelineStore, layer: LayerId, change: LayerGroups) {
    if change.intersects(LayerGroups::NEEDS_BIG_STATE) && store.layers[layer].big_state.is_none() {
        store.layers[layer].big_state = Some(Box::default());
    }

    if change.intersects(LayerGroups::MULTI_PROPERTY)
        && !store.layers[layer].differences.intersects(change)
    {
        init_layer_multi_property_state(store, layer, change);
        store.layers[layer].differences |= change & LayerGroups::MULTI_PROPERTY;
    }
}

fn init_layer_multi_property_state(
    store: &mut PipelineStore,
    layer: LayerId,
    change: LayerGroups,
) {
    let groups = change & LayerGroups::MULTI_PROPERTY & !store.layers[layer].differences;

    for group in groups.iter() {
        let authority = layer_authority(store, layer, group);
        debug_assert_ne!(authority, layer);
        match group {
            LayerGroups::FILTERS => {
                let (min, mag) = {
                    let a = &store.layers[authority].sampler;
                    (a.min_filter, a.mag_filter)
                };
                let s = &mut store.layers[layer].sampler;
                s.min_filter = min;
                s.mag_filter = mag;
            }
            LayerGroups::WRAP_MODES => {
                let (s_mode, t_mode, p_mode) = {
                    let a = &store.layers[authority].sampler;
                    (a.wrap_s, a.wrap_t, a.wrap_p)
                };
                let s = &mut store.layers[layer].sampler;
                s.wrap_s = s_mode;
                s.wrap_t = t_mode;
                s.wrap_p = p_mode;
            }
            LayerGroups::COMBINE => {
                let a = store.layers[authority].big().clone();
                let big = store.layers[layer].big_mut();
                big.rgb_func = a.rgb_func;
                big.rgb_srcs = a.rgb_srcs;
                big.rgb_ops = a.rgb_ops;
                big.alpha_func = a.alpha_func;
                big.alpha_srcs = a.alpha_srcs;
                big.alpha_ops = a.alpha_ops;
            }
            LayerGroups::VERTEX_SNIPPETS => {
                let v = store.layers[authority].big().vertex_snippets.clone();
                store.layers[layer].big_mut().vertex_snippets = v;
            }
            LayerGroups::FRAGMENT_SNIPPETS => {
                let v = store.layers[authority].big().fragment_snippets.clone();
                store.layers[layer].big_mut().fragment_snippets = v;
            }
            _ => unreachable!("multi-property layer group"),
        }
    }
}

fn invalidate_backend_layer_state(
    store: &mut PipelineStore,
    owner: PipelineId,
    layer: LayerId,
    change: LayerGroups,
) {
    let fragment_groups = super::layer::layer_fragment_codegen_groups(store.features);
    let vertex_groups = super::layer::layer_vertex_codegen_groups(store.features);
    let unit_index = layer_unit_index(store, layer);

    let p = &mut store.pipelines[owner];
    if change.intersects(fragment_groups) {
        p.glsl_frag_state = None;
        p.fragend = None;
    } else if let Some(arbfp_state) = &p.arbfp_state {
        if change.intersects(LayerGroups::COMBINE_CONSTANT) {
            arbfp_state.borrow_mut().mark_combine_constant_dirty(unit_index);
        }
    }
    if change.intersects(fragment_groups) {
        p.arbfp_state = None;
    }
    if change.intersects(vertex_groups) {
        p.vertend_state = None;
    }

    if change.intersects(fragment_groups | vertex_groups) {
        p.program_state = None;
    } else if let Some(program_state) = &p.program_state {
        let mut ps = program_state.borrow_mut();
        if change.intersects(LayerGroups::COMBINE_CONSTANT) {
            ps.mark_combine_constant_dirty(unit_index);
        }
        if change.intersects(LayerGroups::USER_MATRIX) {
            ps.mark_texture_matrix_dirty(unit_index);
        }
    }
}

/// Walks a layer past ancestors whose differences it fully overrides.
fn layer_prune_redundant_ancestry(store: &mut PipelineStore, layer: LayerId) {
    let differences = store.layers[layer].differences;
    let Some(mut new_parent) = store.layers[layer].node.parent else {
        return;
    };
    loop {
        let np = &store.layers[new_parent];
        let Some(grandparent) = np.node.parent else { break };
        if (np.differences | differences) != differences {
            break;
        }
        new_parent = grandparent;
    }

    if Some(new_parent) != store.layers[layer].node.parent {
        let old = crate::node::set_parent(&mut store.layers, layer, new_parent, true)
            .expect("layer had a parent");
        release_layer(store, old);
    }
}

// ─── Layer lookup and structure ──────────────────────────────────────────────

/// Number of layers drawn with this pipeline.
#[must_use]
pub fn get_n_layers(store: &PipelineStore, pipeline: PipelineId) -> usize {
    let authority = store.authority(pipeline, StateGroups::LAYERS);
    store.pipelines[authority].n_layers
}

/// Declared layer indices in increasing order.
#[must_use]
pub fn get_layer_indices(store: &mut PipelineStore, pipeline: PipelineId) -> Vec<usize> {
    unit_ordered_layers(store, pipeline)
        .iter()
        .map(|&layer| store.layers[layer].index)
        .collect()
}

struct LayerInfo {
    layer: Option<LayerId>,
    /// Unit of the closest layer below the requested index.
    insert_after: Option<usize>,
    /// Layers whose unit must shift to open or close a gap.
    layers_to_shift: SmallVec<[LayerId; 4]>,
}

fn get_layer_info(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    ignore_shift_if_found: bool,
) -> LayerInfo {
    let mut info = LayerInfo {
        layer: None,
        insert_after: None,
        layers_to_shift: SmallVec::new(),
    };

    for layer_id in unit_ordered_layers(store, pipeline) {
        let index = store.layers[layer_id].index;
        if index == layer_index {
            info.layer = Some(layer_id);
            if ignore_shift_if_found {
                return info;
            }
        } else if index < layer_index {
            info.insert_after = Some(layer_unit_index(store, layer_id));
        } else {
            info.layers_to_shift.push(layer_id);
        }
    }
    info
}

/// Finds the layer with the given index, creating a default one (and
/// shifting any higher layers up a unit) when it does not exist yet.
pub fn get_layer(store: &mut PipelineStore, pipeline: PipelineId, layer_index: usize) -> LayerId {
    let info = get_layer_info(store, pipeline, layer_index, true);
    if let Some(layer) = info.layer {
        return layer;
    }

    let unit_index = info.insert_after.map_or(0, |unit| unit + 1);
    let layer = if unit_index == 0 {
        layer_copy(store, store.default_layer_0)
    } else {
        let template = layer_copy(store, store.default_layer_n);
        set_layer_unit(store, None, template, unit_index)
    };
    store.layers[layer].index = layer_index;

    for shift_layer in info.layers_to_shift {
        let unit = layer_unit_index(store, shift_layer);
        set_layer_unit(store, Some(pipeline), shift_layer, unit + 1);
    }

    add_layer_difference(store, pipeline, layer, true);
    layer
}

/// Moves a layer to another texture unit. Returns the layer actually
/// modified, which may be a private copy.
pub(crate) fn set_layer_unit(
    store: &mut PipelineStore,
    required_owner: Option<PipelineId>,
    layer: LayerId,
    unit_index: usize,
) -> LayerId {
    let authority = layer_authority(store, layer, LayerGroups::UNIT);
    if store.layers[authority].unit_index == unit_index {
        return layer;
    }

    let working = layer_pre_change_notify(store, required_owner, layer, LayerGroups::UNIT);
    if working == layer && working == authority {
        if let Some(parent) = store.layers[working].node.parent {
            let old_authority = layer_authority(store, parent, LayerGroups::UNIT);
            if store.layers[old_authority].unit_index == unit_index {
                store.layers[working].differences &= !LayerGroups::UNIT;
                return working;
            }
        }
    }

    store.layers[working].unit_index = unit_index;
    if working != authority {
        store.layers[working].differences |= LayerGroups::UNIT;
        layer_prune_redundant_ancestry(store, working);
    }
    working
}

/// When an authority ends up with no local layer changes and the same
/// layer count as the next authority up, it stops being one.
fn try_reverting_layers_authority(
    store: &mut PipelineStore,
    authority: PipelineId,
    old_authority: Option<PipelineId>,
) {
    let p = &store.pipelines[authority];
    if !p.layer_differences.is_empty() {
        return;
    }
    let Some(parent) = p.node.parent else { return };

    let old_authority =
        old_authority.unwrap_or_else(|| store.authority(parent, StateGroups::LAYERS));
    if store.pipelines[old_authority].n_layers == store.pipelines[authority].n_layers {
        store.pipelines[authority].differences &= !StateGroups::LAYERS;
    }
}

/// Drops a difference entry whose layer no longer differs from its
/// parent, re-linking the parent in its place when possible.
fn prune_empty_layer_difference(store: &mut PipelineStore, pipeline: PipelineId, layer: LayerId) {
    debug_assert!(store.layers[layer].differences.is_empty());
    debug_assert_eq!(store.layers[layer].owner, Some(pipeline));

    let Some(parent) = store.layers[layer].node.parent else {
        return;
    };

    let parent_reusable = store.layers[parent].owner.is_none()
        && store.layers[parent].index == store.layers[layer].index
        && store.layers[parent].node.parent.is_some();

    if parent_reusable {
        // The parent stands in for the empty layer in the difference
        // list; no structural change is visible to anyone.
        store.layers[parent].owner = Some(pipeline);
        store.layers[parent].node.ref_count += 1;
        let diffs = &mut store.pipelines[pipeline].layer_differences;
        let pos = diffs
            .iter()
            .position(|&l| l == layer)
            .expect("layer was a difference of its owner");
        diffs[pos] = parent;
        store.layers[layer].owner = None;
        release_layer(store, layer);
    } else {
        remove_layer_difference(store, pipeline, layer, false);
        try_reverting_layers_authority(store, pipeline, None);
    }
}

/// Removes the layer with the given index, closing the unit gap it
/// leaves behind.
pub fn remove_layer(store: &mut PipelineStore, pipeline: PipelineId, layer_index: usize) {
    let info = get_layer_info(store, pipeline, layer_index, false);
    let Some(layer) = info.layer else { return };

    for shift_layer in info.layers_to_shift {
        let unit = layer_unit_index(store, shift_layer);
        set_layer_unit(store, Some(pipeline), shift_layer, unit - 1);
    }

    remove_layer_difference(store, pipeline, layer, true);
    try_reverting_layers_authority(store, pipeline, None);

    handle_automatic_blend_enable(store, pipeline, StateGroups::LAYERS);
}

/// Caps the pipeline at `n` layers, discarding the higher units.
pub fn prune_to_n_layers(store: &mut PipelineStore, pipeline: PipelineId, n: usize) {
    let authority = store.authority(pipeline, StateGroups::LAYERS);
    if store.pipelines[authority].n_layers <= n {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::LAYERS, false);

    store.pipelines[pipeline].differences |= StateGroups::LAYERS;
    store.pipelines[pipeline].n_layers = n;

    // Any owned differences on the discarded units go with them.
    let doomed: SmallVec<[LayerId; 4]> = store.pipelines[pipeline]
        .layer_differences
        .iter()
        .copied()
        .filter(|&l| layer_unit_index(store, l) >= n)
        .collect();
    for layer in doomed {
        let diffs = &mut store.pipelines[pipeline].layer_differences;
        if let Some(pos) = diffs.iter().position(|&l| l == layer) {
            diffs.swap_remove(pos);
        }
        store.layers[layer].owner = None;
        release_layer(store, layer);
    }

    handle_automatic_blend_enable(store, pipeline, StateGroups::LAYERS);
}

// ─── Layer setters ───────────────────────────────────────────────────────────

fn set_layer_value(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    group: LayerGroups,
    holds_new_value: impl Fn(&PipelineStore, LayerId) -> bool,
    write: impl Fn(&mut Layer),
) {
    let layer = get_layer(store, pipeline, layer_index);
    let authority = layer_authority(store, layer, group);
    if holds_new_value(store, authority) {
        return;
    }

    let working = layer_pre_change_notify(store, Some(pipeline), layer, group);

    // When the layer was already the authority, the write may restore
    // the inherited value and let the difference bit drop again.
    if working == layer && working == authority {
        if let Some(parent) = store.layers[working].node.parent {
            let old_authority = layer_authority(store, parent, group);
            if holds_new_value(store, old_authority) {
                store.layers[working].differences &= !group;
                if store.layers[working].differences.is_empty()
                    && store.layers[working].owner == Some(pipeline)
                {
                    prune_empty_layer_difference(store, pipeline, working);
                }
                if group.intersects(LayerGroups::AFFECTS_BLENDING) {
                    handle_automatic_blend_enable(store, pipeline, StateGroups::LAYERS);
                }
                return;
            }
        }
    }

    write(&mut store.layers[working]);
    if working != authority {
        store.layers[working].differences |= group;
        layer_prune_redundant_ancestry(store, working);
    }

    if group.intersects(LayerGroups::AFFECTS_BLENDING) {
        handle_automatic_blend_enable(store, pipeline, StateGroups::LAYERS);
    }
}

fn set_layer_texture_target(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    target: TextureTarget,
) {
    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::TEXTURE_TARGET,
        |s, a| s.layers[a].target == target,
        |l| l.target = target,
    );
}

fn set_layer_texture_data(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    texture: Option<TextureRef>,
) {
    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::TEXTURE_DATA,
        |s, a| s.layers[a].texture == texture,
        |l| l.texture = texture,
    );
}

/// Binds `texture` to the layer. The texture target is tracked as its
/// own state group so that swapping same-shaped textures never
/// invalidates generated programs.
pub fn set_layer_texture(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    texture: Option<TextureRef>,
) {
    let target = texture.map(|t| t.target).unwrap_or_default();
    set_layer_texture_target(store, pipeline, layer_index, target);
    set_layer_texture_data(store, pipeline, layer_index, texture);
}

pub fn set_layer_filters(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    min_filter: FilterMode,
    mag_filter: FilterMode,
) {
    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::FILTERS,
        |s, a| {
            s.layers[a].sampler.min_filter == min_filter
                && s.layers[a].sampler.mag_filter == mag_filter
        },
        |l| {
            l.sampler.min_filter = min_filter;
            l.sampler.mag_filter = mag_filter;
        },
    );
}

pub fn set_layer_wrap_mode(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    mode: WrapMode,
) {
    set_layer_wrap_modes(store, pipeline, layer_index, mode, mode, mode);
}

pub fn set_layer_wrap_modes(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    wrap_s: WrapMode,
    wrap_t: WrapMode,
    wrap_p: WrapMode,
) {
    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::WRAP_MODES,
        |s, a| {
            let sampler = &s.layers[a].sampler;
            sampler.wrap_s == wrap_s && sampler.wrap_t == wrap_t && sampler.wrap_p == wrap_p
        },
        |l| {
            l.sampler.wrap_s = wrap_s;
            l.sampler.wrap_t = wrap_t;
            l.sampler.wrap_p = wrap_p;
        },
    );
}

fn combine_rgb_equal(
    big: &LayerBigState,
    func: CombineFunc,
    srcs: &[CombineSource],
    ops: &[CombineOp],
) -> bool {
    let n = func.n_args();
    big.rgb_func == func && big.rgb_srcs[..n] == srcs[..n] && big.rgb_ops[..n] == ops[..n]
}

fn combine_alpha_equal(
    big: &LayerBigState,
    func: CombineFunc,
    srcs: &[CombineSource],
    ops: &[CombineOp],
) -> bool {
    let n = func.n_args();
    big.alpha_func == func && big.alpha_srcs[..n] == srcs[..n] && big.alpha_ops[..n] == ops[..n]
}

fn check_combine_args(
    context: &'static str,
    n: usize,
    srcs: &[CombineSource],
    ops: &[CombineOp],
) -> Result<()> {
    let supplied = usize::min(srcs.len(), ops.len());
    if supplied < n {
        return Err(GlazeError::CombineArgOutOfRange {
            context: context.to_owned(),
            index: supplied,
        });
    }
    Ok(())
}

/// Sets the RGB half of the layer's combine function. `srcs` and `ops`
/// must provide at least `func.n_args()` entries.
pub fn set_layer_combine_rgb(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    func: CombineFunc,
    srcs: &[CombineSource],
    ops: &[CombineOp],
) -> Result<()> {
    let n = func.n_args();
    check_combine_args("rgb combine", n, srcs, ops)?;

    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::COMBINE,
        |s, a| combine_rgb_equal(s.layers[a].big(), func, srcs, ops),
        |l| {
            let big = l.big_mut();
            big.rgb_func = func;
            big.rgb_srcs[..n].copy_from_slice(&srcs[..n]);
            big.rgb_ops[..n].copy_from_slice(&ops[..n]);
        },
    );
    Ok(())
}

/// Sets the alpha half of the layer's combine function.
pub fn set_layer_combine_alpha(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    func: CombineFunc,
    srcs: &[CombineSource],
    ops: &[CombineOp],
) -> Result<()> {
    let n = func.n_args();
    check_combine_args("alpha combine", n, srcs, ops)?;

    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::COMBINE,
        |s, a| combine_alpha_equal(s.layers[a].big(), func, srcs, ops),
        |l| {
            let big = l.big_mut();
            big.alpha_func = func;
            big.alpha_srcs[..n].copy_from_slice(&srcs[..n]);
            big.alpha_ops[..n].copy_from_slice(&ops[..n]);
        },
    );
    Ok(())
}

/// Sets both combine halves to the same function and arguments, the
/// common case.
pub fn set_layer_combine(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    func: CombineFunc,
    srcs: &[CombineSource],
) -> Result<()> {
    let rgb_ops = [CombineOp::SrcColor; 3];
    let alpha_ops = [CombineOp::SrcAlpha; 3];
    set_layer_combine_rgb(store, pipeline, layer_index, func, srcs, &rgb_ops)?;
    set_layer_combine_alpha(store, pipeline, layer_index, func, srcs, &alpha_ops)
}

pub fn set_layer_combine_constant(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    constant: crate::color::Color,
) {
    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::COMBINE_CONSTANT,
        |s, a| s.layers[a].big().constant == constant,
        |l| l.big_mut().constant = constant,
    );
}

pub fn set_layer_matrix(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    matrix: Mat4,
) {
    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::USER_MATRIX,
        |s, a| s.layers[a].big().user_matrix == matrix,
        |l| l.big_mut().user_matrix = matrix,
    );
}

pub fn set_layer_point_sprite_coords_enabled(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    enabled: bool,
) {
    set_layer_value(
        store,
        pipeline,
        layer_index,
        LayerGroups::POINT_SPRITE_COORDS,
        |s, a| s.layers[a].big().point_sprite_coords == enabled,
        |l| l.big_mut().point_sprite_coords = enabled,
    );
}

/// Appends a per-layer snippet. Layer snippet lists only grow.
pub fn add_layer_snippet(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
    snippet: &Snippet,
) {
    debug_assert!(matches!(
        snippet.hook(),
        SnippetHook::TextureCoordTransform | SnippetHook::LayerFragment | SnippetHook::TextureLookup
    ));

    let group = if snippet.hook().is_vertex() {
        LayerGroups::VERTEX_SNIPPETS
    } else {
        LayerGroups::FRAGMENT_SNIPPETS
    };

    let layer = get_layer(store, pipeline, layer_index);
    let working = layer_pre_change_notify(store, Some(pipeline), layer, group);

    if group == LayerGroups::VERTEX_SNIPPETS {
        store.layers[working].big_mut().vertex_snippets.push(snippet.clone());
    } else {
        store.layers[working].big_mut().fragment_snippets.push(snippet.clone());
    }
    store.layers[working].differences |= group;

    if group.intersects(LayerGroups::AFFECTS_BLENDING) {
        handle_automatic_blend_enable(store, pipeline, StateGroups::LAYERS);
    }
}

// ─── Resolved layer getters ──────────────────────────────────────────────────

#[must_use]
pub fn get_layer_texture(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
) -> Option<TextureRef> {
    let layer = get_layer(store, pipeline, layer_index);
    super::layer::layer_texture(store, layer)
}

#[must_use]
pub fn get_layer_filters(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
) -> (FilterMode, FilterMode) {
    let layer = get_layer(store, pipeline, layer_index);
    let authority = layer_authority(store, layer, LayerGroups::FILTERS);
    let sampler = &store.layers[authority].sampler;
    (sampler.min_filter, sampler.mag_filter)
}

#[must_use]
pub fn get_layer_wrap_modes(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
) -> (WrapMode, WrapMode, WrapMode) {
    let layer = get_layer(store, pipeline, layer_index);
    let authority = layer_authority(store, layer, LayerGroups::WRAP_MODES);
    let sampler = &store.layers[authority].sampler;
    (sampler.wrap_s, sampler.wrap_t, sampler.wrap_p)
}

/// Interns the layer's resolved sampler configuration and returns its
/// cache id. Filters and wrap modes resolve through their own
/// authorities, and `Automatic` wrapping collapses to clamp-to-edge,
/// so two layers that sample identically share one entry.
pub fn get_layer_sampler(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
) -> SamplerId {
    let layer = get_layer(store, pipeline, layer_index);
    let filters_authority = layer_authority(store, layer, LayerGroups::FILTERS);
    let wrap_authority = layer_authority(store, layer, LayerGroups::WRAP_MODES);

    let filters = store.layers[filters_authority].sampler;
    let wraps = store.layers[wrap_authority].sampler;
    store.samplers.intern(SamplerState {
        min_filter: filters.min_filter,
        mag_filter: filters.mag_filter,
        wrap_s: wraps.wrap_s.resolve(),
        wrap_t: wraps.wrap_t.resolve(),
        wrap_p: wraps.wrap_p.resolve(),
    })
}

#[must_use]
pub fn get_layer_matrix(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
) -> Mat4 {
    let layer = get_layer(store, pipeline, layer_index);
    let authority = layer_authority(store, layer, LayerGroups::USER_MATRIX);
    store.layers[authority].big().user_matrix
}

#[must_use]
pub fn get_layer_point_sprite_coords_enabled(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer_index: usize,
) -> bool {
    let layer = get_layer(store, pipeline, layer_index);
    let authority = layer_authority(store, layer, LayerGroups::POINT_SPRITE_COORDS);
    store.layers[authority].big().point_sprite_coords
}
