//! High-level shading language fragment generator.
//!
//! Generated source is deterministic for a given pipeline
//! configuration: layers are visited in texture-unit order and every
//! declaration is emitted exactly once, so semantically equal
//! pipelines produce byte-identical shaders.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::context::ContextSettings;
use crate::driver::{Driver, DriverFeatures, ShaderHandle};
use crate::errors::Result;
use crate::pipeline::compare::find_equivalent_parent;
use crate::pipeline::core::user_program;
use crate::pipeline::layer::{
    layer_authority, layer_fragment_codegen_groups, layer_target, layer_texture, CombineFunc,
    CombineOp, CombineSource, LayerGroups,
};
use crate::pipeline::ops::{get_alpha_test_function, get_fragment_snippets};
use crate::pipeline::state::{
    fragment_codegen_groups, CompareFunc, ShaderLanguage, ShaderStage, StateGroups,
};
use crate::pipeline::{LayerId, PipelineId, PipelineStore};
use crate::sampler::TextureTarget;
use crate::snippet::{Snippet, SnippetHook};

use super::CombineMask;

#[derive(Debug, Default, Clone)]
pub struct GlslUnitState {
    pub sampled: bool,
    pub combine_constant_used: bool,
}

/// Fragment shader state shared between codegen-equivalent pipelines.
#[derive(Debug, Default)]
pub struct GlslShaderState {
    pub gl_shader: Option<ShaderHandle>,
    header: String,
    source: String,
    generating: bool,
    pub unit_state: Vec<GlslUnitState>,
    user_program_age: Option<u64>,
}

fn state_rc(store: &PipelineStore, pipeline: PipelineId) -> Rc<RefCell<GlslShaderState>> {
    store.pipelines[pipeline]
        .glsl_frag_state
        .clone()
        .expect("fragment generator started")
}

/// Accepts the pipeline and prepares shared shader state. Returns
/// `false` when this backend cannot handle the configuration.
pub fn start(store: &mut PipelineStore, pipeline: PipelineId) -> bool {
    if !store.features.contains(DriverFeatures::GLSL) {
        return false;
    }

    let user = user_program(store, pipeline);
    if let Some(program) = &user {
        if matches!(
            program.stage_language(ShaderStage::Fragment),
            Some(ShaderLanguage::Asm)
        ) {
            return false;
        }
    }

    if store.pipelines[pipeline].glsl_frag_state.is_none() {
        let authority = find_equivalent_parent(
            store,
            pipeline,
            fragment_codegen_groups(store.features) & !StateGroups::LAYERS,
            layer_fragment_codegen_groups(store.features),
        );
        if store.pipelines[authority].glsl_frag_state.is_none() {
            store.pipelines[authority].glsl_frag_state =
                Some(Rc::new(RefCell::new(GlslShaderState::default())));
        }
        let shared = store.pipelines[authority].glsl_frag_state.clone();
        store.pipelines[pipeline].glsl_frag_state = shared;
    }

    let user_age = user.as_ref().map(crate::pipeline::state::UserProgram::age);
    let n_layers = crate::pipeline::layer_ops::get_n_layers(store, pipeline);

    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();

    if state.gl_shader.is_some() && state.user_program_age == user_age {
        state.generating = false;
        return true;
    }

    // A user-supplied fragment shader replaces generation entirely.
    if user
        .as_ref()
        .is_some_and(|p| p.has_stage(ShaderStage::Fragment))
    {
        state.gl_shader = None;
        state.generating = false;
        state.user_program_age = user_age;
        return true;
    }

    state.gl_shader = None;
    state.generating = true;
    state.header.clear();
    state.source.clear();
    state.unit_state.clear();
    state.unit_state.resize(n_layers, GlslUnitState::default());
    state.user_program_age = user_age;
    true
}

// ─── Source construction ─────────────────────────────────────────────────────

fn target_strings(target: TextureTarget) -> (&'static str, &'static str) {
    match target {
        TextureTarget::TwoD => ("2D", "st"),
        TextureTarget::Rectangle => ("2DRect", "st"),
        TextureTarget::ThreeD => ("3D", "stp"),
    }
}

fn layer_fragment_snippets(store: &PipelineStore, layer: LayerId) -> Vec<Snippet> {
    let authority = layer_authority(store, layer, LayerGroups::FRAGMENT_SNIPPETS);
    store.layers[authority]
        .big_state
        .as_ref()
        .map(|b| b.fragment_snippets.clone())
        .unwrap_or_default()
}

fn point_sprite_coords(store: &PipelineStore, layer: LayerId) -> bool {
    let authority = layer_authority(store, layer, LayerGroups::POINT_SPRITE_COORDS);
    store.layers[authority]
        .big_state
        .as_ref()
        .is_some_and(|b| b.point_sprite_coords)
}

fn add_texture_lookup(
    state: &mut GlslShaderState,
    store: &PipelineStore,
    settings: &ContextSettings,
    layer: LayerId,
    unit: usize,
    swizzle: &str,
) {
    if settings.disable_texturing {
        let _ = write!(state.source, "vec4 (1.0, 1.0, 1.0, 1.0).{swizzle}");
        return;
    }

    let (target_string, coord_swizzle) = match layer_texture(store, layer) {
        Some(_) => target_strings(layer_target(store, layer)),
        None => ("2D", "st"),
    };

    if !state.unit_state[unit].sampled {
        state.unit_state[unit].sampled = true;
        let _ = writeln!(state.header, "uniform sampler{target_string} glz_sampler_{unit};");
    }

    // A texture-lookup snippet replacement stands in for the whole
    // sampling expression.
    let snippets = layer_fragment_snippets(store, layer);
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::TextureLookup {
            state.header.push_str(snippet.declarations());
            if let Some(replacement) = snippet.replace() {
                let _ = write!(state.source, "({replacement}).{swizzle}");
                return;
            }
        }
    }

    let _ = write!(state.source, "texture{target_string} (glz_sampler_{unit}, ");
    if point_sprite_coords(store, layer)
        && store.features.contains(DriverFeatures::POINT_COORD_BUILTIN)
    {
        let _ = write!(state.source, "gl_PointCoord.{coord_swizzle}");
    } else {
        let _ = write!(state.source, "glz_tex_coord_in[{unit}].{coord_swizzle}");
    }
    let _ = write!(state.source, ").{swizzle}");
}

fn add_constant_lookup(state: &mut GlslShaderState, unit: usize, swizzle: &str) {
    if !state.unit_state[unit].combine_constant_used {
        state.unit_state[unit].combine_constant_used = true;
        let _ = writeln!(state.header, "uniform vec4 _glz_layer_constant_{unit};");
    }
    let _ = write!(state.source, "_glz_layer_constant_{unit}.{swizzle}");
}

#[allow(clippy::too_many_arguments)]
fn add_arg(
    state: &mut GlslShaderState,
    store: &PipelineStore,
    settings: &ContextSettings,
    layer: LayerId,
    unit: usize,
    layers: &[LayerId],
    src: CombineSource,
    op: CombineOp,
    swizzle: &str,
) {
    state.source.push('(');

    if matches!(op, CombineOp::OneMinusSrcColor | CombineOp::OneMinusSrcAlpha) {
        let _ = write!(state.source, "vec4(1.0, 1.0, 1.0, 1.0).{swizzle} - ");
    }

    // Alpha operands read the same number of alpha components as the
    // pass writes.
    let alpha_swizzle = &"aaaa"[..swizzle.len()];
    let swizzle = if matches!(op, CombineOp::SrcAlpha | CombineOp::OneMinusSrcAlpha) {
        alpha_swizzle
    } else {
        swizzle
    };

    match src {
        CombineSource::Texture => {
            add_texture_lookup(state, store, settings, layer, unit, swizzle);
        }
        CombineSource::TextureUnit(n) => {
            if let Some(&other) = layers.get(n) {
                add_texture_lookup(state, store, settings, other, n, swizzle);
            } else {
                let _ = write!(state.source, "vec4 (1.0, 1.0, 1.0, 1.0).{swizzle}");
            }
        }
        CombineSource::Constant => add_constant_lookup(state, unit, swizzle),
        CombineSource::PrimaryColor => {
            let _ = write!(state.source, "glz_color_in.{swizzle}");
        }
        CombineSource::Previous => {
            if unit == 0 {
                let _ = write!(state.source, "glz_color_in.{swizzle}");
            } else {
                let _ = write!(state.source, "glz_color_out.{swizzle}");
            }
        }
    }

    state.source.push(')');
}

#[allow(clippy::too_many_arguments)]
fn append_masked_combine(
    state: &mut GlslShaderState,
    store: &PipelineStore,
    settings: &ContextSettings,
    layer: LayerId,
    unit: usize,
    layers: &[LayerId],
    mask: CombineMask,
    function: CombineFunc,
    srcs: &[CombineSource; 3],
    ops: &[CombineOp; 3],
) {
    let swizzle = mask.swizzle();
    let _ = write!(state.source, "  glz_color_out.{swizzle} = ");

    let mut arg = |state: &mut GlslShaderState, i: usize| {
        add_arg(state, store, settings, layer, unit, layers, srcs[i], ops[i], swizzle);
    };

    match function {
        CombineFunc::Replace => arg(state, 0),
        CombineFunc::Modulate => {
            arg(state, 0);
            state.source.push_str(" * ");
            arg(state, 1);
        }
        CombineFunc::Add => {
            arg(state, 0);
            state.source.push_str(" + ");
            arg(state, 1);
        }
        CombineFunc::AddSigned => {
            arg(state, 0);
            state.source.push_str(" + ");
            arg(state, 1);
            let _ = write!(state.source, " - vec4(0.5, 0.5, 0.5, 0.5).{swizzle}");
        }
        CombineFunc::Subtract => {
            arg(state, 0);
            state.source.push_str(" - ");
            arg(state, 1);
        }
        CombineFunc::Interpolate => {
            arg(state, 0);
            state.source.push_str(" * ");
            arg(state, 2);
            state.source.push_str(" + ");
            arg(state, 1);
            let _ = write!(state.source, " * (vec4(1.0, 1.0, 1.0, 1.0).{swizzle} - ");
            arg(state, 2);
            state.source.push(')');
        }
        CombineFunc::Dot3Rgb | CombineFunc::Dot3Rgba => {
            state.source.push_str("vec4(4.0 * ((");
            arg(state, 0);
            state.source.push_str(".r - 0.5) * (");
            arg(state, 1);
            state.source.push_str(".r - 0.5) + (");
            arg(state, 0);
            state.source.push_str(".g - 0.5) * (");
            arg(state, 1);
            state.source.push_str(".g - 0.5) + (");
            arg(state, 0);
            state.source.push_str(".b - 0.5) * (");
            arg(state, 1);
            let _ = write!(state.source, ".b - 0.5))).{swizzle}");
        }
    }

    state.source.push_str(";\n");
}

/// Emits the combine pass (or passes) for one layer.
pub fn add_layer(
    store: &mut PipelineStore,
    settings: &ContextSettings,
    pipeline: PipelineId,
    layer: LayerId,
    unit: usize,
    layers: &[LayerId],
) {
    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();
    if !state.generating {
        return;
    }

    let combine_authority = layer_authority(store, layer, LayerGroups::COMBINE);
    let big = store.layers[combine_authority].big().clone();

    let snippets = layer_fragment_snippets(store, layer);
    let mut replaced = false;
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::LayerFragment {
            state.header.push_str(snippet.declarations());
            state.source.push_str(snippet.pre());
            if let Some(replacement) = snippet.replace() {
                state.source.push_str(replacement);
                replaced = true;
            }
        }
    }

    if !replaced {
        if !big.need_separate_combine() || big.rgb_func == CombineFunc::Dot3Rgba {
            append_masked_combine(
                &mut state,
                store,
                settings,
                layer,
                unit,
                layers,
                CombineMask::Rgba,
                big.rgb_func,
                &big.rgb_srcs,
                &big.rgb_ops,
            );
        } else {
            append_masked_combine(
                &mut state,
                store,
                settings,
                layer,
                unit,
                layers,
                CombineMask::Rgb,
                big.rgb_func,
                &big.rgb_srcs,
                &big.rgb_ops,
            );
            append_masked_combine(
                &mut state,
                store,
                settings,
                layer,
                unit,
                layers,
                CombineMask::Alpha,
                big.alpha_func,
                &big.alpha_srcs,
                &big.alpha_ops,
            );
        }
    }

    for snippet in &snippets {
        if snippet.hook() == SnippetHook::LayerFragment {
            state.source.push_str(snippet.post());
        }
    }
}

/// With no layers the fragment color is just the interpolated vertex
/// color.
pub fn passthrough(store: &mut PipelineStore, pipeline: PipelineId) {
    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();
    if !state.generating {
        return;
    }
    state.source.push_str("  glz_color_out = glz_color_in;\n");
}

fn inverted_comparison(function: CompareFunc) -> &'static str {
    match function {
        CompareFunc::Less => ">=",
        CompareFunc::Equal => "!=",
        CompareFunc::Lequal => ">",
        CompareFunc::Greater => "<=",
        CompareFunc::NotEqual => "==",
        CompareFunc::Gequal => "<",
        CompareFunc::Never | CompareFunc::Always => unreachable!("handled without comparison"),
    }
}

/// Assembles and compiles the fragment shader. Returns `None` when a
/// user-supplied shader replaces the generated one.
pub fn end(
    store: &mut PipelineStore,
    driver: &mut dyn Driver,
    settings: &ContextSettings,
    pipeline: PipelineId,
) -> Result<Option<ShaderHandle>> {
    let state_rc = state_rc(store, pipeline);

    {
        let state = state_rc.borrow();
        if !state.generating {
            return Ok(state.gl_shader);
        }
    }

    let snippets = get_fragment_snippets(store, pipeline);

    // The shader-side alpha test discards fragments that fail the
    // configured comparison against the reference value.
    let mut alpha_test = String::new();
    let mut alpha_test_declarations = String::new();
    if store.features.contains(DriverFeatures::SHADER_ALPHA_TEST) {
        match get_alpha_test_function(store, pipeline) {
            CompareFunc::Always => {}
            CompareFunc::Never => alpha_test.push_str("  discard;\n"),
            function => {
                alpha_test_declarations.push_str("uniform float _glz_alpha_test_ref;\n");
                let _ = write!(
                    alpha_test,
                    "  if (glz_color_out.a {} _glz_alpha_test_ref)\n    discard;\n",
                    inverted_comparison(function)
                );
            }
        }
    }

    let mut state = state_rc.borrow_mut();

    let mut full = String::with_capacity(state.header.len() + state.source.len() + 128);
    full.push_str(&state.header);
    for snippet in &snippets {
        if matches!(snippet.hook(), SnippetHook::Fragment | SnippetHook::FragmentGlobals) {
            full.push_str(snippet.declarations());
        }
    }
    full.push_str(&alpha_test_declarations);
    full.push_str("void\nmain ()\n{\n");
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::Fragment {
            full.push_str(snippet.pre());
        }
    }
    let mut replaced = false;
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::Fragment {
            if let Some(replacement) = snippet.replace() {
                full.push_str(replacement);
                replaced = true;
            }
        }
    }
    if !replaced {
        if let Some(color) = settings.force_constant_color {
            let [r, g, b, a] = color.to_array();
            let _ = writeln!(full, "  glz_color_out = vec4 ({r:?}, {g:?}, {b:?}, {a:?});");
        } else {
            full.push_str(&state.source);
        }
    }
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::Fragment {
            full.push_str(snippet.post());
        }
    }
    full.push_str(&alpha_test);
    full.push_str("}\n");

    let shader = match driver.compile_shader(ShaderStage::Fragment, &full) {
        Ok(shader) => shader,
        Err(err) => {
            log::warn!("fragment shader compilation failed: {err}\nshader source:\n{full}");
            return Err(err);
        }
    };

    state.gl_shader = Some(shader);
    state.generating = false;
    state.header.clear();
    state.source.clear();

    Ok(Some(shader))
}
