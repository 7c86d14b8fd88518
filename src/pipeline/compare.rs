//! Deep semantic comparison of pipelines.
//!
//! Equality is resolved per state group against each side's authority,
//! after first narrowing the work to the groups that can possibly
//! differ: only differences recorded between each pipeline and the two
//! chains' common ancestor need to be looked at.

use smallvec::SmallVec;

use super::core::{resolve_authorities, unit_ordered_layers};
use super::layer::{
    layer_resolve_authorities, LayerBigState, LayerGroups, N_LAYER_GROUPS,
};
use super::state::{StateGroups, N_SPARSE_GROUPS};
use super::{LayerId, PipelineId, PipelineStore};

// ─── Difference narrowing ────────────────────────────────────────────────────

fn pipeline_ancestry(store: &PipelineStore, pipeline: PipelineId) -> SmallVec<[PipelineId; 8]> {
    let mut chain = SmallVec::new();
    let mut current = Some(pipeline);
    while let Some(id) = current {
        chain.push(id);
        current = store.pipelines[id].node.parent;
    }
    chain
}

fn layer_ancestry(store: &PipelineStore, layer: LayerId) -> SmallVec<[LayerId; 8]> {
    let mut chain = SmallVec::new();
    let mut current = Some(layer);
    while let Some(id) = current {
        chain.push(id);
        current = store.layers[id].node.parent;
    }
    chain
}

/// Union of the sparse groups recorded between each pipeline and the
/// pair's common ancestor; every other group is inherited identically
/// by both and cannot differ.
#[must_use]
pub fn compare_differences(
    store: &PipelineStore,
    p0: PipelineId,
    p1: PipelineId,
) -> StateGroups {
    let chain0 = pipeline_ancestry(store, p0);
    let chain1 = pipeline_ancestry(store, p1);

    let mut i = chain0.len();
    let mut j = chain1.len();
    while i > 0 && j > 0 && chain0[i - 1] == chain1[j - 1] {
        i -= 1;
        j -= 1;
    }

    let mut differences = StateGroups::empty();
    for &node in &chain0[..i] {
        differences |= store.pipelines[node].differences;
    }
    for &node in &chain1[..j] {
        differences |= store.pipelines[node].differences;
    }
    differences & StateGroups::ALL_SPARSE
}

/// Layer-tree counterpart of [`compare_differences`].
#[must_use]
pub fn layer_compare_differences(
    store: &PipelineStore,
    l0: LayerId,
    l1: LayerId,
) -> LayerGroups {
    let chain0 = layer_ancestry(store, l0);
    let chain1 = layer_ancestry(store, l1);

    let mut i = chain0.len();
    let mut j = chain1.len();
    while i > 0 && j > 0 && chain0[i - 1] == chain1[j - 1] {
        i -= 1;
        j -= 1;
    }

    let mut differences = LayerGroups::empty();
    for &node in &chain0[..i] {
        differences |= store.layers[node].differences;
    }
    for &node in &chain1[..j] {
        differences |= store.layers[node].differences;
    }
    differences
}

// ─── Layer equality ──────────────────────────────────────────────────────────

fn combine_equal(b0: &LayerBigState, b1: &LayerBigState) -> bool {
    let rgb_n = b0.rgb_func.n_args();
    let alpha_n = b0.alpha_func.n_args();
    b0.rgb_func == b1.rgb_func
        && b0.rgb_srcs[..rgb_n] == b1.rgb_srcs[..rgb_n]
        && b0.rgb_ops[..rgb_n] == b1.rgb_ops[..rgb_n]
        && b0.alpha_func == b1.alpha_func
        && b0.alpha_srcs[..alpha_n] == b1.alpha_srcs[..alpha_n]
        && b0.alpha_ops[..alpha_n] == b1.alpha_ops[..alpha_n]
}

/// Whether `layer_differences` state renders identically for the two
/// layers.
pub fn layer_equal(
    store: &mut PipelineStore,
    l0: LayerId,
    l1: LayerId,
    layer_differences: LayerGroups,
) -> bool {
    if l0 == l1 {
        return true;
    }

    let layers_difference =
        layer_compare_differences(store, l0, l1) & layer_differences;
    if layers_difference.is_empty() {
        return true;
    }

    let mut authorities0 = [None; N_LAYER_GROUPS];
    let mut authorities1 = [None; N_LAYER_GROUPS];
    layer_resolve_authorities(store, l0, layers_difference, &mut authorities0);
    layer_resolve_authorities(store, l1, layers_difference, &mut authorities1);

    for group in layers_difference.iter() {
        let a0 = authorities0[group.index()].expect("authority resolved");
        let a1 = authorities1[group.index()].expect("authority resolved");
        if a0 == a1 {
            continue;
        }
        let layer0 = &store.layers[a0];
        let layer1 = &store.layers[a1];
        let equal = match group {
            LayerGroups::UNIT => layer0.unit_index == layer1.unit_index,
            LayerGroups::TEXTURE_TARGET => layer0.target == layer1.target,
            LayerGroups::TEXTURE_DATA => layer0.texture == layer1.texture,
            LayerGroups::FILTERS => {
                layer0.sampler.min_filter == layer1.sampler.min_filter
                    && layer0.sampler.mag_filter == layer1.sampler.mag_filter
            }
            LayerGroups::WRAP_MODES => layer0.sampler.wrap_equal_resolved(&layer1.sampler),
            LayerGroups::COMBINE => combine_equal(layer0.big(), layer1.big()),
            LayerGroups::COMBINE_CONSTANT => {
                // The constant only matters when a combine argument
                // reads it.
                let c0 = store.layers[layer_combine_authority(store, a0)].big();
                if !c0.references_constant() {
                    true
                } else {
                    layer0.big().constant == layer1.big().constant
                }
            }
            LayerGroups::USER_MATRIX => layer0.big().user_matrix == layer1.big().user_matrix,
            LayerGroups::POINT_SPRITE_COORDS => {
                layer0.big().point_sprite_coords == layer1.big().point_sprite_coords
            }
            LayerGroups::VERTEX_SNIPPETS => {
                layer0.big().vertex_snippets == layer1.big().vertex_snippets
            }
            LayerGroups::FRAGMENT_SNIPPETS => {
                layer0.big().fragment_snippets == layer1.big().fragment_snippets
            }
            _ => unreachable!("layer group"),
        };
        if !equal {
            return false;
        }
    }

    true
}

fn layer_combine_authority(store: &PipelineStore, layer: LayerId) -> LayerId {
    super::layer::layer_authority(store, layer, LayerGroups::COMBINE)
}

// ─── Pipeline equality ───────────────────────────────────────────────────────

/// Whether the two pipelines render identically as far as the state
/// named by `differences` and `layer_differences` is concerned.
pub fn equal(
    store: &mut PipelineStore,
    p0: PipelineId,
    p1: PipelineId,
    differences: StateGroups,
    layer_differences: LayerGroups,
) -> bool {
    if p0 == p1 {
        return true;
    }

    // real_blend_enable is derived and non-sparse; compare directly.
    if differences.contains(StateGroups::REAL_BLEND_ENABLE)
        && store.pipelines[p0].real_blend_enable != store.pipelines[p1].real_blend_enable
    {
        return false;
    }

    let pipelines_difference = compare_differences(store, p0, p1) & differences;
    if pipelines_difference.is_empty() {
        return true;
    }

    let mut authorities0 = [None; N_SPARSE_GROUPS];
    let mut authorities1 = [None; N_SPARSE_GROUPS];
    resolve_authorities(store, p0, pipelines_difference, &mut authorities0);
    resolve_authorities(store, p1, pipelines_difference, &mut authorities1);

    for group in pipelines_difference.iter() {
        let a0 = authorities0[group.index()].expect("authority resolved");
        let a1 = authorities1[group.index()].expect("authority resolved");
        if a0 == a1 {
            continue;
        }
        if !group_equal(store, p0, group, a0, a1, layer_differences) {
            return false;
        }
    }

    true
}

fn group_equal(
    store: &mut PipelineStore,
    p0: PipelineId,
    group: StateGroups,
    a0: PipelineId,
    a1: PipelineId,
    layer_differences: LayerGroups,
) -> bool {
    match group {
        StateGroups::COLOR => store.pipelines[a0].color == store.pipelines[a1].color,
        // An explicit enable override only matters through the derived
        // real_blend_enable flag, which is compared up front.
        StateGroups::BLEND_ENABLE => true,
        StateGroups::LAYERS => layers_equal(store, a0, a1, layer_differences),
        StateGroups::LIGHTING => {
            store.pipelines[a0].big().lighting == store.pipelines[a1].big().lighting
        }
        StateGroups::ALPHA_FUNC => {
            store.pipelines[a0].big().alpha_func == store.pipelines[a1].big().alpha_func
        }
        StateGroups::ALPHA_FUNC_REFERENCE => {
            store.pipelines[a0].big().alpha_func_reference
                == store.pipelines[a1].big().alpha_func_reference
        }
        StateGroups::BLEND => {
            // With blending off the factors are irrelevant.
            if !store.pipelines[p0].real_blend_enable {
                return true;
            }
            let b0 = store.pipelines[a0].big().blend;
            let b1 = store.pipelines[a1].big().blend;
            if b0.equation_rgb != b1.equation_rgb
                || b0.equation_alpha != b1.equation_alpha
                || b0.src_factor_rgb != b1.src_factor_rgb
                || b0.dst_factor_rgb != b1.dst_factor_rgb
                || b0.src_factor_alpha != b1.src_factor_alpha
                || b0.dst_factor_alpha != b1.dst_factor_alpha
            {
                return false;
            }
            // The constant only matters when a factor reads it.
            !b0.uses_constant() || b0.constant == b1.constant
        }
        StateGroups::USER_SHADER => {
            store.pipelines[a0].big().user_program == store.pipelines[a1].big().user_program
        }
        StateGroups::DEPTH => {
            let d0 = store.pipelines[a0].big().depth;
            let d1 = store.pipelines[a1].big().depth;
            // With the test disabled on both sides the remaining fields
            // are irrelevant, except the write mask.
            if !d0.test_enabled && !d1.test_enabled {
                d0.write_enabled == d1.write_enabled
            } else {
                d0 == d1
            }
        }
        StateGroups::FOG => store.pipelines[a0].big().fog == store.pipelines[a1].big().fog,
        StateGroups::POINT_SIZE => {
            store.pipelines[a0].big().point_size == store.pipelines[a1].big().point_size
        }
        StateGroups::LOGIC_OPS => {
            store.pipelines[a0].big().logic_ops == store.pipelines[a1].big().logic_ops
        }
        StateGroups::UNIFORMS => {
            store.pipelines[a0].big().uniform_overrides
                == store.pipelines[a1].big().uniform_overrides
        }
        StateGroups::VERTEX_SNIPPETS => {
            store.pipelines[a0].big().vertex_snippets == store.pipelines[a1].big().vertex_snippets
        }
        StateGroups::FRAGMENT_SNIPPETS => {
            store.pipelines[a0].big().fragment_snippets
                == store.pipelines[a1].big().fragment_snippets
        }
        _ => unreachable!("sparse group"),
    }
}

fn layers_equal(
    store: &mut PipelineStore,
    authority0: PipelineId,
    authority1: PipelineId,
    layer_differences: LayerGroups,
) -> bool {
    if store.pipelines[authority0].n_layers != store.pipelines[authority1].n_layers {
        return false;
    }

    let layers0 = unit_ordered_layers(store, authority0);
    let layers1 = unit_ordered_layers(store, authority1);
    debug_assert_eq!(layers0.len(), layers1.len());

    for (&l0, &l1) in layers0.iter().zip(layers1.iter()) {
        if !layer_equal(store, l0, l1, layer_differences) {
            return false;
        }
    }
    true
}

// ─── Codegen authority search ────────────────────────────────────────────────

/// Finds the oldest ancestor whose state under the given masks renders
/// identically to `pipeline`'s, so equivalent pipelines can share
/// generated shaders.
pub fn find_equivalent_parent(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    pipeline_state: StateGroups,
    layer_state: LayerGroups,
) -> PipelineId {
    let query = pipeline_state | StateGroups::LAYERS;

    let mut authority0 = store.authority(pipeline, query);
    let Some(parent) = store.pipelines[authority0].node.parent else {
        return authority0;
    };
    let mut authority1 = store.authority(parent, query);

    let n_layers = {
        let layers_authority = store.authority(authority0, StateGroups::LAYERS);
        store.pipelines[layers_authority].n_layers
    };

    loop {
        let other_n_layers = {
            let layers_authority = store.authority(authority1, StateGroups::LAYERS);
            store.pipelines[layers_authority].n_layers
        };
        if n_layers != other_n_layers {
            return authority0;
        }

        // Any non-layer difference in the mask rules the ancestor out.
        if !pipeline_state.is_empty()
            && compare_differences(store, authority0, authority1).intersects(pipeline_state)
        {
            return authority0;
        }

        let layers0 = unit_ordered_layers(store, authority0);
        let layers1 = unit_ordered_layers(store, authority1);
        for (&l0, &l1) in layers0.iter().zip(layers1.iter()) {
            if l0 == l1 {
                continue;
            }
            if layer_compare_differences(store, l0, l1).intersects(layer_state) {
                return authority0;
            }
        }

        let Some(parent) = store.pipelines[authority1].node.parent else {
            break;
        };
        authority0 = authority1;
        authority1 = store.authority(parent, query);
        if authority1 == authority0 {
            break;
        }
    }

    authority1
}
