//! Assembly fragment program generator.
//!
//! Produces a complete fragment program on its own; the pipeline needs
//! no separate vertex stage or link step on this path. Programs are
//! shared through the fragment program cache, so pipelines that differ
//! only in state irrelevant to fragment processing reuse one program.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::cache::ProgramCaches;
use crate::context::ContextSettings;
use crate::driver::{Driver, DriverFeatures, ProgramHandle};
use crate::errors::Result;
use crate::pipeline::compare::find_equivalent_parent;
use crate::pipeline::core::{unit_ordered_layers, user_program};
use crate::pipeline::layer::{
    layer_authority, layer_fragment_codegen_groups, layer_target, layer_texture, CombineFunc,
    CombineOp, CombineSource, LayerGroups,
};
use crate::pipeline::ops::{get_fog_state, get_fragment_snippets, get_vertex_snippets};
use crate::pipeline::state::{
    fragment_codegen_groups, ShaderLanguage, ShaderStage, StateGroups, UserProgram,
};
use crate::pipeline::{LayerId, PipelineId, PipelineStore};
use crate::sampler::TextureTarget;

use super::CombineMask;

#[derive(Debug, Default, Clone)]
struct ArbfpUnitState {
    sampled: bool,
    /// Local parameter slot holding this unit's combine constant.
    constant_id: Option<u32>,
    dirty_combine_constant: bool,
}

/// Assembly program state shared between codegen-equivalent pipelines.
#[derive(Debug, Default)]
pub struct ArbfpProgramState {
    pub gl_program: Option<ProgramHandle>,
    source: String,
    generating: bool,
    unit_state: Vec<ArbfpUnitState>,
    next_constant_id: u32,
    user_program_age: Option<u64>,
    /// Constants are skipped when re-flushing the same pipeline.
    last_used_for_pipeline: Option<PipelineId>,
}

impl ArbfpProgramState {
    pub fn mark_combine_constant_dirty(&mut self, unit: usize) {
        if let Some(state) = self.unit_state.get_mut(unit) {
            state.dirty_combine_constant = true;
        }
    }
}

const PREAMBLE: &str = "!!ARBfp1.0\n\
TEMP output;\n\
TEMP tmp0, tmp1, tmp2, tmp3, tmp4;\n\
PARAM half = {.5, .5, .5, .5};\n\
PARAM one = {1, 1, 1, 1};\n\
PARAM two = {2, 2, 2, 2};\n\
PARAM minus_one = {-1, -1, -1, -1};\n";

fn state_rc(store: &PipelineStore, pipeline: PipelineId) -> Rc<RefCell<ArbfpProgramState>> {
    store.pipelines[pipeline]
        .arbfp_state
        .clone()
        .expect("assembly generator started")
}

fn has_snippets(store: &mut PipelineStore, pipeline: PipelineId) -> bool {
    if !get_vertex_snippets(store, pipeline).is_empty()
        || !get_fragment_snippets(store, pipeline).is_empty()
    {
        return true;
    }
    let layers = unit_ordered_layers(store, pipeline);
    layers.iter().any(|&layer| {
        let vert = layer_authority(store, layer, LayerGroups::VERTEX_SNIPPETS);
        let frag = layer_authority(store, layer, LayerGroups::FRAGMENT_SNIPPETS);
        store.layers[vert]
            .big_state
            .as_ref()
            .is_some_and(|b| !b.vertex_snippets.is_empty())
            || store.layers[frag]
                .big_state
                .as_ref()
                .is_some_and(|b| !b.fragment_snippets.is_empty())
    })
}

/// Accepts the pipeline and prepares shared program state. Returns
/// `false` when this backend cannot handle the configuration.
pub fn start(
    store: &mut PipelineStore,
    settings: &ContextSettings,
    caches: &mut ProgramCaches,
    pipeline: PipelineId,
) -> bool {
    if !store.features.contains(DriverFeatures::ASM_PROGRAMS) {
        return false;
    }

    // No assembly instructions are generated for fog or snippets.
    if get_fog_state(store, pipeline).enabled {
        return false;
    }
    if has_snippets(store, pipeline) {
        return false;
    }

    let user = user_program(store, pipeline);
    if let Some(program) = &user {
        if program
            .stage_language(ShaderStage::Vertex)
            .is_some()
            || matches!(
                program.stage_language(ShaderStage::Fragment),
                Some(ShaderLanguage::Glsl)
            )
        {
            return false;
        }
    }

    if store.pipelines[pipeline].arbfp_state.is_none() {
        let authority = find_equivalent_parent(
            store,
            pipeline,
            fragment_codegen_groups(store.features) & !StateGroups::LAYERS,
            layer_fragment_codegen_groups(store.features),
        );
        let shared = if let Some(state) = &store.pipelines[authority].arbfp_state {
            Rc::clone(state)
        } else {
            let cached = if settings.disable_program_caches {
                None
            } else {
                caches.fragment.lookup(store, authority)
            };
            let state = match cached {
                Some(state) => state,
                None => {
                    let state = Rc::<RefCell<ArbfpProgramState>>::default();
                    if !settings.disable_program_caches {
                        caches.fragment.insert(store, authority, Rc::clone(&state));
                    }
                    state
                }
            };
            store.pipelines[authority].arbfp_state = Some(Rc::clone(&state));
            state
        };
        store.pipelines[pipeline].arbfp_state = Some(shared);
    }

    let user_age = user.as_ref().map(UserProgram::age);
    let n_layers = crate::pipeline::layer_ops::get_n_layers(store, pipeline);

    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();

    if state.gl_program.is_some() && state.user_program_age == user_age {
        state.generating = false;
        return true;
    }

    // A user-supplied assembly shader is loaded verbatim.
    if user
        .as_ref()
        .is_some_and(|p| p.has_stage(ShaderStage::Fragment))
    {
        state.gl_program = None;
        state.generating = false;
        state.user_program_age = user_age;
        return true;
    }

    state.gl_program = None;
    state.generating = true;
    state.source.clear();
    state.source.push_str(PREAMBLE);
    state.unit_state.clear();
    state.unit_state.resize(n_layers, ArbfpUnitState::default());
    state.next_constant_id = 0;
    state.user_program_age = user_age;
    true
}

// ─── Source construction ─────────────────────────────────────────────────────

fn target_string(target: TextureTarget) -> &'static str {
    match target {
        TextureTarget::TwoD => "2D",
        TextureTarget::Rectangle => "RECT",
        TextureTarget::ThreeD => "3D",
    }
}

fn setup_texture_source(
    state: &mut ArbfpProgramState,
    store: &PipelineStore,
    settings: &ContextSettings,
    layer: LayerId,
    unit: usize,
) {
    if state.unit_state[unit].sampled {
        return;
    }
    state.unit_state[unit].sampled = true;

    if settings.disable_texturing || layer_texture(store, layer).is_none() {
        let _ = writeln!(state.source, "TEMP texel{unit};");
        let _ = writeln!(state.source, "MOV texel{unit}, one;");
        return;
    }

    let target = target_string(layer_target(store, layer));
    let _ = writeln!(state.source, "TEMP texel{unit};");
    let _ = writeln!(
        state.source,
        "TEX texel{unit},fragment.texcoord[{unit}],texture[{unit}],{target};"
    );
}

struct Arg {
    s: String,
    swizzle: &'static str,
}

impl Arg {
    fn render(&self) -> String {
        format!("{}{}", self.s, self.swizzle)
    }
}

#[allow(clippy::too_many_arguments)]
fn setup_arg(
    state: &mut ArbfpProgramState,
    store: &PipelineStore,
    settings: &ContextSettings,
    layer: LayerId,
    unit: usize,
    layers: &[LayerId],
    mask: CombineMask,
    arg_index: usize,
    src: CombineSource,
    op: CombineOp,
) -> Arg {
    let mut arg = Arg {
        s: match src {
            CombineSource::Texture => {
                setup_texture_source(state, store, settings, layer, unit);
                format!("texel{unit}")
            }
            CombineSource::TextureUnit(n) => {
                if let Some(&other) = layers.get(n) {
                    setup_texture_source(state, store, settings, other, n);
                    format!("texel{n}")
                } else {
                    "one".to_owned()
                }
            }
            CombineSource::Constant => {
                let id = match state.unit_state[unit].constant_id {
                    Some(id) => id,
                    None => {
                        let id = state.next_constant_id;
                        state.next_constant_id += 1;
                        state.unit_state[unit].constant_id = Some(id);
                        id
                    }
                };
                state.unit_state[unit].dirty_combine_constant = true;
                format!("program.local[{id}]")
            }
            CombineSource::PrimaryColor => "fragment.color.primary".to_owned(),
            CombineSource::Previous => {
                if unit == 0 {
                    "fragment.color.primary".to_owned()
                } else {
                    "output".to_owned()
                }
            }
        },
        swizzle: "",
    };

    // An alpha-masked pass already reads only alpha, so the swizzle
    // would be redundant there.
    match op {
        CombineOp::SrcColor => {}
        CombineOp::OneMinusSrcColor => {
            let _ = writeln!(state.source, "SUB tmp{arg_index}, one, {};", arg.s);
            arg.s = format!("tmp{arg_index}");
        }
        CombineOp::SrcAlpha => {
            if mask != CombineMask::Alpha {
                arg.swizzle = ".a";
            }
        }
        CombineOp::OneMinusSrcAlpha => {
            let swizzle = if mask == CombineMask::Alpha { "" } else { ".a" };
            let _ = writeln!(state.source, "SUB tmp{arg_index}, one, {}{swizzle};", arg.s);
            arg.s = format!("tmp{arg_index}");
            arg.swizzle = "";
        }
    }

    arg
}

fn mask_name(mask: CombineMask) -> &'static str {
    match mask {
        CombineMask::Rgba => "",
        CombineMask::Rgb => ".rgb",
        CombineMask::Alpha => ".a",
    }
}

#[allow(clippy::too_many_arguments)]
fn append_masked_combine(
    state: &mut ArbfpProgramState,
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
    let n_args = function.n_args();
    let args: Vec<Arg> = (0..n_args)
        .map(|i| setup_arg(state, store, settings, layer, unit, layers, mask, i, srcs[i], ops[i]))
        .collect();
    let out = mask_name(mask);

    match function {
        CombineFunc::Replace => {
            let _ = writeln!(state.source, "MOV output{out}, {};", args[0].render());
        }
        CombineFunc::Modulate => {
            let _ = writeln!(
                state.source,
                "MUL output{out}, {}, {};",
                args[0].render(),
                args[1].render()
            );
        }
        CombineFunc::Add => {
            let _ = writeln!(
                state.source,
                "ADD_SAT output{out}, {}, {};",
                args[0].render(),
                args[1].render()
            );
        }
        CombineFunc::AddSigned => {
            let _ = writeln!(
                state.source,
                "ADD tmp3{out}, {}, {};",
                args[0].render(),
                args[1].render()
            );
            let _ = writeln!(state.source, "SUB_SAT output{out}, tmp3, half;");
        }
        CombineFunc::Subtract => {
            let _ = writeln!(
                state.source,
                "SUB_SAT output{out}, {}, {};",
                args[0].render(),
                args[1].render()
            );
        }
        CombineFunc::Interpolate => {
            let _ = writeln!(
                state.source,
                "LRP output{out}, {}, {}, {};",
                args[2].render(),
                args[0].render(),
                args[1].render()
            );
        }
        CombineFunc::Dot3Rgb | CombineFunc::Dot3Rgba => {
            let _ = writeln!(state.source, "MAD tmp3, two, {}, minus_one;", args[0].render());
            let _ = writeln!(state.source, "MAD tmp4, two, {}, minus_one;", args[1].render());
            let _ = writeln!(state.source, "DP3_SAT output{out}, tmp3, tmp4;");
        }
    }
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

/// With no layers the fragment color is just the interpolated vertex
/// color.
pub fn passthrough(store: &mut PipelineStore, pipeline: PipelineId) {
    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();
    if !state.generating {
        return;
    }
    state.source.push_str("MOV output, fragment.color.primary;\n");
}

/// Finishes and loads the program, then uploads any combine constants
/// whose values are stale for this pipeline.
pub fn end(
    store: &mut PipelineStore,
    driver: &mut dyn Driver,
    settings: &ContextSettings,
    _caches: &mut ProgramCaches,
    pipeline: PipelineId,
) -> Result<ProgramHandle> {
    let state_rc = state_rc(store, pipeline);
    let layers = unit_ordered_layers(store, pipeline);

    let mut state = state_rc.borrow_mut();

    let freshly_loaded;
    if state.generating {
        if let Some(color) = settings.force_constant_color {
            let [r, g, b, a] = color.to_array();
            state.source.clear();
            state.source.push_str(PREAMBLE);
            let _ = writeln!(
                state.source,
                "PARAM constant_color = {{{r:?}, {g:?}, {b:?}, {a:?}}};"
            );
            state.source.push_str("MOV output, constant_color;\n");
        }
        state.source.push_str("MOV result.color,output;\nEND\n");
        let program = match driver.load_asm_program(&state.source) {
            Ok(program) => program,
            Err(err) => {
                log::warn!(
                    "assembly program load failed: {err}\nprogram source:\n{}",
                    state.source
                );
                return Err(err);
            }
        };
        state.gl_program = Some(program);
        state.generating = false;
        state.source.clear();
        freshly_loaded = true;
    } else if state.gl_program.is_none() {
        // User-supplied assembly source.
        let user = user_program(store, pipeline).expect("user fragment program");
        let source = user
            .shader_source(ShaderStage::Fragment)
            .expect("user fragment program");
        let program = match driver.load_asm_program(&source) {
            Ok(program) => program,
            Err(err) => {
                log::warn!("assembly program load failed: {err}\nprogram source:\n{source}");
                return Err(err);
            }
        };
        state.gl_program = Some(program);
        freshly_loaded = true;
    } else {
        freshly_loaded = false;
    }
    let program = state.gl_program.expect("program loaded");

    let update_all = freshly_loaded || state.last_used_for_pipeline != Some(pipeline);
    for (unit, unit_state) in state.unit_state.iter_mut().enumerate() {
        let Some(constant_id) = unit_state.constant_id else {
            continue;
        };
        if !(update_all || unit_state.dirty_combine_constant) {
            continue;
        }
        if let Some(&layer) = layers.get(unit) {
            let authority = layer_authority(store, layer, LayerGroups::COMBINE_CONSTANT);
            let constant = store.layers[authority].big().constant;
            driver.set_program_local(program, constant_id, constant.to_array());
        }
        unit_state.dirty_combine_constant = false;
    }
    state.last_used_for_pipeline = Some(pipeline);

    Ok(program)
}
