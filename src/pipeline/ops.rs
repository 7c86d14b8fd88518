//! Pipeline-level state setters and getters.
//!
//! Every setter follows the same protocol: resolve the current
//! authority, bail when the value would not change, run the
//! copy-on-write pre-change notification, write the value, then settle
//! the authority bit (which may revert the pipeline to inheriting when
//! the write restored the ancestor's value).

use crate::color::Color;
use crate::snippet::{Snippet, SnippetHook};

use super::core::{
    handle_automatic_blend_enable, pre_change_notify, update_authority,
};
use super::state::{
    BlendEnableMode, BlendState, ColorMask, CompareFunc, DepthState, FogState, LightingState,
    OrderedF32, StateGroups, UniformValue, UserProgram,
};
use super::{PipelineId, PipelineStore};

// ─── Color ───────────────────────────────────────────────────────────────────

#[must_use]
pub fn get_color(store: &PipelineStore, pipeline: PipelineId) -> Color {
    let authority = store.authority(pipeline, StateGroups::COLOR);
    store.pipelines[authority].color
}

pub fn set_color(store: &mut PipelineStore, pipeline: PipelineId, color: Color) {
    let authority = store.authority(pipeline, StateGroups::COLOR);
    if store.pipelines[authority].color == color {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::COLOR, false);
    store.pipelines[pipeline].color = color;
    update_authority(store, pipeline, authority, StateGroups::COLOR, |s, a, b| {
        s.pipelines[a].color == s.pipelines[b].color
    });
    handle_automatic_blend_enable(store, pipeline, StateGroups::COLOR);
}

// ─── Blending ────────────────────────────────────────────────────────────────

#[must_use]
pub fn get_blend_enable(store: &PipelineStore, pipeline: PipelineId) -> BlendEnableMode {
    let authority = store.authority(pipeline, StateGroups::BLEND_ENABLE);
    store.pipelines[authority].blend_enable
}

pub fn set_blend_enable(store: &mut PipelineStore, pipeline: PipelineId, mode: BlendEnableMode) {
    let authority = store.authority(pipeline, StateGroups::BLEND_ENABLE);
    if store.pipelines[authority].blend_enable == mode {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::BLEND_ENABLE, false);
    store.pipelines[pipeline].blend_enable = mode;
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::BLEND_ENABLE,
        |s, a, b| s.pipelines[a].blend_enable == s.pipelines[b].blend_enable,
    );
    handle_automatic_blend_enable(store, pipeline, StateGroups::BLEND_ENABLE);
}

#[must_use]
pub fn get_blend_state(store: &PipelineStore, pipeline: PipelineId) -> BlendState {
    let authority = store.authority(pipeline, StateGroups::BLEND);
    store.pipelines[authority].big().blend
}

pub fn set_blend_state(store: &mut PipelineStore, pipeline: PipelineId, blend: BlendState) {
    let authority = store.authority(pipeline, StateGroups::BLEND);
    if store.pipelines[authority].big().blend == blend {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::BLEND, false);
    store.pipelines[pipeline].big_mut().blend = blend;
    update_authority(store, pipeline, authority, StateGroups::BLEND, |s, a, b| {
        s.pipelines[a].big().blend == s.pipelines[b].big().blend
    });
    handle_automatic_blend_enable(store, pipeline, StateGroups::BLEND);
}

pub fn set_blend_constant(store: &mut PipelineStore, pipeline: PipelineId, constant: Color) {
    let mut blend = get_blend_state(store, pipeline);
    blend.constant = constant;
    set_blend_state(store, pipeline, blend);
}

/// The derived blend decision for this pipeline.
#[must_use]
pub fn get_real_blend_enable(store: &PipelineStore, pipeline: PipelineId) -> bool {
    store.pipelines[pipeline].real_blend_enable
}

// ─── Alpha test ──────────────────────────────────────────────────────────────

#[must_use]
pub fn get_alpha_test_function(store: &PipelineStore, pipeline: PipelineId) -> CompareFunc {
    let authority = store.authority(pipeline, StateGroups::ALPHA_FUNC);
    store.pipelines[authority].big().alpha_func
}

pub fn set_alpha_test_function(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    function: CompareFunc,
) {
    let authority = store.authority(pipeline, StateGroups::ALPHA_FUNC);
    if store.pipelines[authority].big().alpha_func == function {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::ALPHA_FUNC, false);
    store.pipelines[pipeline].big_mut().alpha_func = function;
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::ALPHA_FUNC,
        |s, a, b| s.pipelines[a].big().alpha_func == s.pipelines[b].big().alpha_func,
    );
}

#[must_use]
pub fn get_alpha_test_reference(store: &PipelineStore, pipeline: PipelineId) -> f32 {
    let authority = store.authority(pipeline, StateGroups::ALPHA_FUNC_REFERENCE);
    store.pipelines[authority].big().alpha_func_reference.0
}

pub fn set_alpha_test_reference(store: &mut PipelineStore, pipeline: PipelineId, reference: f32) {
    let reference = OrderedF32(reference);
    let authority = store.authority(pipeline, StateGroups::ALPHA_FUNC_REFERENCE);
    if store.pipelines[authority].big().alpha_func_reference == reference {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::ALPHA_FUNC_REFERENCE, false);
    store.pipelines[pipeline].big_mut().alpha_func_reference = reference;
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::ALPHA_FUNC_REFERENCE,
        |s, a, b| {
            s.pipelines[a].big().alpha_func_reference == s.pipelines[b].big().alpha_func_reference
        },
    );
}

// ─── User programs ───────────────────────────────────────────────────────────

#[must_use]
pub fn get_user_program(store: &PipelineStore, pipeline: PipelineId) -> Option<UserProgram> {
    super::core::user_program(store, pipeline)
}

pub fn set_user_program(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    program: Option<UserProgram>,
) {
    let authority = store.authority(pipeline, StateGroups::USER_SHADER);
    if store.pipelines[authority].big().user_program == program {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::USER_SHADER, false);
    store.pipelines[pipeline].big_mut().user_program = program;
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::USER_SHADER,
        |s, a, b| s.pipelines[a].big().user_program == s.pipelines[b].big().user_program,
    );
    handle_automatic_blend_enable(store, pipeline, StateGroups::USER_SHADER);
}

// ─── Depth / fog / point size / color mask ───────────────────────────────────

#[must_use]
pub fn get_depth_state(store: &PipelineStore, pipeline: PipelineId) -> DepthState {
    let authority = store.authority(pipeline, StateGroups::DEPTH);
    store.pipelines[authority].big().depth
}

pub fn set_depth_state(store: &mut PipelineStore, pipeline: PipelineId, depth: DepthState) {
    let authority = store.authority(pipeline, StateGroups::DEPTH);
    if store.pipelines[authority].big().depth == depth {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::DEPTH, false);
    store.pipelines[pipeline].big_mut().depth = depth;
    update_authority(store, pipeline, authority, StateGroups::DEPTH, |s, a, b| {
        s.pipelines[a].big().depth == s.pipelines[b].big().depth
    });
}

#[must_use]
pub fn get_fog_state(store: &PipelineStore, pipeline: PipelineId) -> FogState {
    let authority = store.authority(pipeline, StateGroups::FOG);
    store.pipelines[authority].big().fog
}

pub fn set_fog_state(store: &mut PipelineStore, pipeline: PipelineId, fog: FogState) {
    let authority = store.authority(pipeline, StateGroups::FOG);
    if store.pipelines[authority].big().fog == fog {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::FOG, false);
    store.pipelines[pipeline].big_mut().fog = fog;
    update_authority(store, pipeline, authority, StateGroups::FOG, |s, a, b| {
        s.pipelines[a].big().fog == s.pipelines[b].big().fog
    });
}

#[must_use]
pub fn get_point_size(store: &PipelineStore, pipeline: PipelineId) -> f32 {
    let authority = store.authority(pipeline, StateGroups::POINT_SIZE);
    store.pipelines[authority].big().point_size.0
}

pub fn set_point_size(store: &mut PipelineStore, pipeline: PipelineId, point_size: f32) {
    let point_size = OrderedF32(point_size);
    let authority = store.authority(pipeline, StateGroups::POINT_SIZE);
    if store.pipelines[authority].big().point_size == point_size {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::POINT_SIZE, false);
    store.pipelines[pipeline].big_mut().point_size = point_size;
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::POINT_SIZE,
        |s, a, b| s.pipelines[a].big().point_size == s.pipelines[b].big().point_size,
    );
}

#[must_use]
pub fn get_color_mask(store: &PipelineStore, pipeline: PipelineId) -> ColorMask {
    let authority = store.authority(pipeline, StateGroups::LOGIC_OPS);
    store.pipelines[authority].big().logic_ops.color_mask
}

pub fn set_color_mask(store: &mut PipelineStore, pipeline: PipelineId, color_mask: ColorMask) {
    let authority = store.authority(pipeline, StateGroups::LOGIC_OPS);
    if store.pipelines[authority].big().logic_ops.color_mask == color_mask {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::LOGIC_OPS, false);
    store.pipelines[pipeline].big_mut().logic_ops.color_mask = color_mask;
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::LOGIC_OPS,
        |s, a, b| s.pipelines[a].big().logic_ops == s.pipelines[b].big().logic_ops,
    );
}

// ─── Lighting ────────────────────────────────────────────────────────────────

#[must_use]
pub fn get_lighting_state(store: &PipelineStore, pipeline: PipelineId) -> LightingState {
    let authority = store.authority(pipeline, StateGroups::LIGHTING);
    store.pipelines[authority].big().lighting
}

fn set_lighting_component(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    write: impl Fn(&mut LightingState),
) {
    let authority = store.authority(pipeline, StateGroups::LIGHTING);
    let mut updated = store.pipelines[authority].big().lighting;
    write(&mut updated);
    if store.pipelines[authority].big().lighting == updated {
        return;
    }

    pre_change_notify(store, pipeline, StateGroups::LIGHTING, false);
    store.pipelines[pipeline].big_mut().lighting = updated;
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::LIGHTING,
        |s, a, b| s.pipelines[a].big().lighting == s.pipelines[b].big().lighting,
    );
    handle_automatic_blend_enable(store, pipeline, StateGroups::LIGHTING);
}

pub fn set_ambient(store: &mut PipelineStore, pipeline: PipelineId, ambient: Color) {
    set_lighting_component(store, pipeline, |l| l.ambient = ambient);
}

pub fn set_diffuse(store: &mut PipelineStore, pipeline: PipelineId, diffuse: Color) {
    set_lighting_component(store, pipeline, |l| l.diffuse = diffuse);
}

pub fn set_specular(store: &mut PipelineStore, pipeline: PipelineId, specular: Color) {
    set_lighting_component(store, pipeline, |l| l.specular = specular);
}

pub fn set_emission(store: &mut PipelineStore, pipeline: PipelineId, emission: Color) {
    set_lighting_component(store, pipeline, |l| l.emission = emission);
}

pub fn set_shininess(store: &mut PipelineStore, pipeline: PipelineId, shininess: f32) {
    set_lighting_component(store, pipeline, |l| l.shininess = OrderedF32(shininess));
}

// ─── Uniform overrides ───────────────────────────────────────────────────────

pub fn set_uniform_value(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    location: u32,
    value: UniformValue,
) {
    let authority = store.authority(pipeline, StateGroups::UNIFORMS);
    {
        let overrides = &store.pipelines[authority].big().uniform_overrides;
        if overrides
            .iter()
            .any(|(loc, v)| *loc == location && *v == value)
        {
            return;
        }
    }

    pre_change_notify(store, pipeline, StateGroups::UNIFORMS, false);
    let overrides = &mut store.pipelines[pipeline].big_mut().uniform_overrides;
    if let Some(slot) = overrides.iter_mut().find(|(loc, _)| *loc == location) {
        slot.1 = value;
    } else {
        overrides.push((location, value));
    }
    update_authority(
        store,
        pipeline,
        authority,
        StateGroups::UNIFORMS,
        |s, a, b| {
            s.pipelines[a].big().uniform_overrides == s.pipelines[b].big().uniform_overrides
        },
    );
}

/// Resolved uniform override list, in insertion order.
#[must_use]
pub fn get_uniform_overrides(
    store: &PipelineStore,
    pipeline: PipelineId,
) -> super::state::UniformOverrides {
    let authority = store.authority(pipeline, StateGroups::UNIFORMS);
    store.pipelines[authority].big().uniform_overrides.clone()
}

// ─── Snippets ────────────────────────────────────────────────────────────────

pub fn add_snippet(store: &mut PipelineStore, pipeline: PipelineId, snippet: &Snippet) {
    debug_assert!(!matches!(
        snippet.hook(),
        SnippetHook::TextureCoordTransform | SnippetHook::LayerFragment | SnippetHook::TextureLookup
    ));

    let group = if snippet.hook().is_vertex() {
        StateGroups::VERTEX_SNIPPETS
    } else {
        StateGroups::FRAGMENT_SNIPPETS
    };

    // Snippet lists only ever grow, so there is no revert path here.
    pre_change_notify(store, pipeline, group, false);
    let big = store.pipelines[pipeline].big_mut();
    if group == StateGroups::VERTEX_SNIPPETS {
        big.vertex_snippets.push(snippet.clone());
    } else {
        big.fragment_snippets.push(snippet.clone());
    }
    store.pipelines[pipeline].differences |= group;
    super::core::prune_redundant_ancestry(store, pipeline);
    handle_automatic_blend_enable(store, pipeline, group);
}

#[must_use]
pub fn get_vertex_snippets(store: &PipelineStore, pipeline: PipelineId) -> Vec<Snippet> {
    let authority = store.authority(pipeline, StateGroups::VERTEX_SNIPPETS);
    store.pipelines[authority].big().vertex_snippets.clone()
}

#[must_use]
pub fn get_fragment_snippets(store: &PipelineStore, pipeline: PipelineId) -> Vec<Snippet> {
    let authority = store.authority(pipeline, StateGroups::FRAGMENT_SNIPPETS);
    store.pipelines[authority].big().fragment_snippets.clone()
}
