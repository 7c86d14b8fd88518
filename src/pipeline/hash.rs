//! Semantic pipeline hashing.
//!
//! The hash visits exactly the state that [`super::compare::equal`]
//! compares, under the same relevance rules (blend factors only when
//! blending is really enabled, combine constants only when an argument
//! reads them, wrap modes resolved), so equal pipelines always hash
//! alike and the hash can key program caches.

use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::Xxh3;

use super::core::{resolve_authorities, unit_ordered_layers};
use super::layer::{layer_resolve_authorities, LayerGroups, N_LAYER_GROUPS};
use super::state::StateGroups;
use super::{LayerId, PipelineId, PipelineStore};

/// Hashes the state named by `differences` and `layer_differences`.
#[must_use]
pub fn pipeline_hash(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    differences: StateGroups,
    layer_differences: LayerGroups,
) -> u64 {
    let mut hasher = Xxh3::default();

    if differences.contains(StateGroups::REAL_BLEND_ENABLE) {
        store.pipelines[pipeline].real_blend_enable.hash(&mut hasher);
    }

    let sparse = differences & StateGroups::ALL_SPARSE;
    let mut authorities = [None; super::state::N_SPARSE_GROUPS];
    resolve_authorities(store, pipeline, sparse, &mut authorities);

    // Fixed group order keeps the hash deterministic.
    for group in sparse.iter() {
        let authority = authorities[group.index()].expect("authority resolved");
        hash_group(store, pipeline, group, authority, layer_differences, &mut hasher);
    }

    hasher.finish()
}

fn hash_group(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    group: StateGroups,
    authority: PipelineId,
    layer_differences: LayerGroups,
    hasher: &mut impl Hasher,
) {
    match group {
        StateGroups::COLOR => store.pipelines[authority].color.hash(hasher),
        // Only observable through real_blend_enable.
        StateGroups::BLEND_ENABLE => {}
        StateGroups::LAYERS => {
            let n_layers = store.pipelines[authority].n_layers;
            n_layers.hash(hasher);
            let layers = unit_ordered_layers(store, authority);
            for layer in layers {
                layer_hash(store, layer, layer_differences, hasher);
            }
        }
        StateGroups::LIGHTING => store.pipelines[authority].big().lighting.hash(hasher),
        StateGroups::ALPHA_FUNC => store.pipelines[authority].big().alpha_func.hash(hasher),
        StateGroups::ALPHA_FUNC_REFERENCE => {
            store.pipelines[authority].big().alpha_func_reference.hash(hasher);
        }
        StateGroups::BLEND => {
            // Must mirror the equality rule: irrelevant while blending
            // is off, constant only when a factor reads it.
            if !store.pipelines[pipeline].real_blend_enable {
                return;
            }
            let blend = store.pipelines[authority].big().blend;
            blend.equation_rgb.hash(hasher);
            blend.equation_alpha.hash(hasher);
            blend.src_factor_rgb.hash(hasher);
            blend.dst_factor_rgb.hash(hasher);
            blend.src_factor_alpha.hash(hasher);
            blend.dst_factor_alpha.hash(hasher);
            if blend.uses_constant() {
                blend.constant.hash(hasher);
            }
        }
        StateGroups::USER_SHADER => {
            store.pipelines[authority].big().user_program.hash(hasher);
        }
        StateGroups::DEPTH => {
            let depth = store.pipelines[authority].big().depth;
            if depth.test_enabled {
                depth.hash(hasher);
            } else {
                depth.write_enabled.hash(hasher);
            }
        }
        StateGroups::FOG => store.pipelines[authority].big().fog.hash(hasher),
        StateGroups::POINT_SIZE => store.pipelines[authority].big().point_size.hash(hasher),
        StateGroups::LOGIC_OPS => store.pipelines[authority].big().logic_ops.hash(hasher),
        StateGroups::UNIFORMS => {
            store.pipelines[authority].big().uniform_overrides.hash(hasher);
        }
        StateGroups::VERTEX_SNIPPETS => {
            store.pipelines[authority].big().vertex_snippets.hash(hasher);
        }
        StateGroups::FRAGMENT_SNIPPETS => {
            store.pipelines[authority].big().fragment_snippets.hash(hasher);
        }
        _ => unreachable!("sparse group"),
    }
}

fn layer_hash(
    store: &PipelineStore,
    layer: LayerId,
    layer_differences: LayerGroups,
    hasher: &mut impl Hasher,
) {
    let mut authorities = [None; N_LAYER_GROUPS];
    layer_resolve_authorities(store, layer, layer_differences, &mut authorities);

    for group in layer_differences.iter() {
        let authority = authorities[group.index()].expect("authority resolved");
        let l = &store.layers[authority];
        match group {
            LayerGroups::UNIT => l.unit_index.hash(hasher),
            LayerGroups::TEXTURE_TARGET => l.target.hash(hasher),
            LayerGroups::TEXTURE_DATA => l.texture.hash(hasher),
            LayerGroups::FILTERS => {
                l.sampler.min_filter.hash(hasher);
                l.sampler.mag_filter.hash(hasher);
            }
            LayerGroups::WRAP_MODES => {
                l.sampler.wrap_s.resolve().hash(hasher);
                l.sampler.wrap_t.resolve().hash(hasher);
                l.sampler.wrap_p.resolve().hash(hasher);
            }
            LayerGroups::COMBINE => {
                let big = l.big();
                let rgb_n = big.rgb_func.n_args();
                let alpha_n = big.alpha_func.n_args();
                big.rgb_func.hash(hasher);
                big.rgb_srcs[..rgb_n].hash(hasher);
                big.rgb_ops[..rgb_n].hash(hasher);
                big.alpha_func.hash(hasher);
                big.alpha_srcs[..alpha_n].hash(hasher);
                big.alpha_ops[..alpha_n].hash(hasher);
            }
            LayerGroups::COMBINE_CONSTANT => {
                let combine_authority = super::layer::layer_authority(
                    store,
                    layer,
                    LayerGroups::COMBINE,
                );
                if store.layers[combine_authority].big().references_constant() {
                    l.big().constant.hash(hasher);
                }
            }
            LayerGroups::USER_MATRIX => {
                for component in l.big().user_matrix.to_cols_array() {
                    component.to_bits().hash(hasher);
                }
            }
            LayerGroups::POINT_SPRITE_COORDS => l.big().point_sprite_coords.hash(hasher),
            LayerGroups::VERTEX_SNIPPETS => l.big().vertex_snippets.hash(hasher),
            LayerGroups::FRAGMENT_SNIPPETS => l.big().fragment_snippets.hash(hasher),
            _ => unreachable!("layer group"),
        }
    }
}
