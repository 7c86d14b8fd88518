//! Program linker and uniform updater for the GLSL path.
//!
//! Takes the generated (or user-supplied) vertex and fragment shaders,
//! links them into a program shared through the combined program cache
//! and keeps the program's uniform values in sync with pipeline state:
//! sampler bindings, per-layer combine constants and texture matrices,
//! the alpha test reference, the point size and user uniform
//! overrides.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use bitflags::bitflags;

use crate::cache::ProgramCaches;
use crate::context::ContextSettings;
use crate::driver::{Driver, DriverFeatures, ProgramHandle, ShaderHandle, UniformLocation};
use crate::errors::Result;
use crate::pipeline::compare::find_equivalent_parent;
use crate::pipeline::core::{unit_ordered_layers, user_program};
use crate::pipeline::layer::{
    layer_authority, layer_fragment_codegen_groups, layer_vertex_codegen_groups, LayerGroups,
};
use crate::pipeline::ops::{
    get_alpha_test_function, get_alpha_test_reference, get_point_size, get_uniform_overrides,
};
use crate::pipeline::state::{
    fragment_codegen_groups, vertex_codegen_groups, CompareFunc, ShaderLanguage, ShaderStage,
    StateGroups, UniformValue, UserProgram,
};
use crate::pipeline::{PipelineId, PipelineStore};

bitflags! {
    /// Builtin uniforms flagged for re-upload by sparse state changes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BuiltinUniforms: u32 {
        const POINT_SIZE     = 1 << 0;
        const ALPHA_TEST_REF = 1 << 1;
    }
}

#[derive(Debug, Default, Clone)]
struct ProgramUnitState {
    combine_constant_uniform: Option<UniformLocation>,
    texture_matrix_uniform: Option<UniformLocation>,
    dirty_combine_constant: bool,
    dirty_texture_matrix: bool,
}

/// Linked program state shared between codegen-equivalent pipelines.
#[derive(Debug, Default)]
pub struct ProgramState {
    pub program: Option<ProgramHandle>,
    pub dirty_builtin_uniforms: BuiltinUniforms,
    point_size_uniform: Option<UniformLocation>,
    alpha_test_ref_uniform: Option<UniformLocation>,
    unit_state: Vec<ProgramUnitState>,
    user_program_age: Option<u64>,
    /// Uniform values are skipped when re-flushing the same pipeline.
    last_used_for_pipeline: Option<PipelineId>,
}

impl Default for BuiltinUniforms {
    fn default() -> Self {
        BuiltinUniforms::empty()
    }
}

impl ProgramState {
    pub fn mark_combine_constant_dirty(&mut self, unit: usize) {
        if let Some(state) = self.unit_state.get_mut(unit) {
            state.dirty_combine_constant = true;
        }
    }

    pub fn mark_texture_matrix_dirty(&mut self, unit: usize) {
        if let Some(state) = self.unit_state.get_mut(unit) {
            state.dirty_texture_matrix = true;
        }
    }
}

fn state_rc(store: &PipelineStore, pipeline: PipelineId) -> Rc<RefCell<ProgramState>> {
    store.pipelines[pipeline]
        .program_state
        .clone()
        .expect("program state attached")
}

fn uniform_value_upload(
    driver: &mut dyn Driver,
    program: ProgramHandle,
    location: UniformLocation,
    value: &UniformValue,
) {
    match value {
        UniformValue::Float(v) => driver.set_uniform_1f(program, location, v.0),
        UniformValue::Int(v) => driver.set_uniform_1i(program, location, *v),
        UniformValue::Vec4(v) => {
            driver.set_uniform_4f(program, location, [v[0].0, v[1].0, v[2].0, v[3].0]);
        }
        UniformValue::Mat4(v) => {
            let mut m = [0.0f32; 16];
            for (dst, src) in m.iter_mut().zip(v.iter()) {
                *dst = src.0;
            }
            driver.set_uniform_matrix(program, location, &m);
        }
    }
}

/// Links the program for the pipeline (reusing cached programs where
/// possible) and uploads stale uniform values.
#[allow(clippy::too_many_lines)]
pub fn end(
    store: &mut PipelineStore,
    driver: &mut dyn Driver,
    settings: &ContextSettings,
    caches: &mut ProgramCaches,
    pipeline: PipelineId,
    fragment_shader: Option<ShaderHandle>,
    vertex_shader: Option<ShaderHandle>,
) -> Result<ProgramHandle> {
    if store.pipelines[pipeline].program_state.is_none() {
        let authority = find_equivalent_parent(
            store,
            pipeline,
            (fragment_codegen_groups(store.features) | vertex_codegen_groups(store.features))
                & !StateGroups::LAYERS,
            layer_fragment_codegen_groups(store.features)
                | layer_vertex_codegen_groups(store.features),
        );
        let shared = if let Some(state) = &store.pipelines[authority].program_state {
            Rc::clone(state)
        } else {
            let cached = if settings.disable_program_caches {
                None
            } else {
                caches.combined.lookup(store, authority)
            };
            let state = match cached {
                Some(state) => state,
                None => {
                    let state = Rc::<RefCell<ProgramState>>::default();
                    if !settings.disable_program_caches {
                        caches.combined.insert(store, authority, Rc::clone(&state));
                    }
                    state
                }
            };
            store.pipelines[authority].program_state = Some(Rc::clone(&state));
            state
        };
        store.pipelines[pipeline].program_state = Some(shared);
    }

    let user = user_program(store, pipeline);
    let user_age = user.as_ref().map(UserProgram::age);
    let layers = unit_ordered_layers(store, pipeline);

    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();

    // Attaching shaders to a user program invalidates linked programs.
    if state.program.is_some() && state.user_program_age != user_age {
        driver.delete_program(state.program.take().expect("program present"));
    }

    let program_changed = state.program.is_none();

    let program = if let Some(program) = state.program {
        program
    } else {
        let mut shaders: Vec<ShaderHandle> = Vec::with_capacity(2);
        if let Some(program) = &user {
            for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
                if program.stage_language(stage) == Some(ShaderLanguage::Glsl) {
                    let source = program.shader_source(stage).expect("shader attached");
                    let shader = match driver.compile_shader(stage, &source) {
                        Ok(shader) => shader,
                        Err(err) => {
                            log::warn!(
                                "user shader compilation failed: {err}\nshader source:\n{source}"
                            );
                            return Err(err);
                        }
                    };
                    shaders.push(shader);
                }
            }
        }
        shaders.extend(vertex_shader);
        shaders.extend(fragment_shader);

        let program = match driver.create_program(&shaders) {
            Ok(program) => program,
            Err(err) => {
                log::warn!("program link failed: {err}");
                return Err(err);
            }
        };
        state.program = Some(program);
        state.user_program_age = user_age;
        program
    };

    if program_changed {
        state.unit_state.clear();
        state
            .unit_state
            .resize(layers.len(), ProgramUnitState::default());

        let mut name = String::new();
        for unit in 0..layers.len() {
            name.clear();
            let _ = write!(name, "glz_sampler_{unit}");
            if let Some(location) = driver.uniform_location(program, &name) {
                // Samplers bind to the texture unit of the same index.
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                driver.set_uniform_1i(program, location, unit as i32);
            }
            name.clear();
            let _ = write!(name, "_glz_layer_constant_{unit}");
            state.unit_state[unit].combine_constant_uniform =
                driver.uniform_location(program, &name);
            name.clear();
            let _ = write!(name, "glz_texture_matrix{unit}");
            state.unit_state[unit].texture_matrix_uniform = driver.uniform_location(program, &name);
        }

        state.alpha_test_ref_uniform = if store
            .features
            .contains(DriverFeatures::SHADER_ALPHA_TEST)
            && !matches!(
                get_alpha_test_function(store, pipeline),
                CompareFunc::Always | CompareFunc::Never
            ) {
            driver.uniform_location(program, "_glz_alpha_test_ref")
        } else {
            None
        };

        state.point_size_uniform = if store
            .features
            .contains(DriverFeatures::BUILTIN_POINT_SIZE_UNIFORM)
        {
            None
        } else {
            driver.uniform_location(program, "glz_point_size_in")
        };
    }

    let update_all = program_changed || state.last_used_for_pipeline != Some(pipeline);

    for (unit, unit_state) in state.unit_state.iter_mut().enumerate() {
        let Some(&layer) = layers.get(unit) else {
            break;
        };
        if let Some(location) = unit_state.combine_constant_uniform {
            if update_all || unit_state.dirty_combine_constant {
                let authority = layer_authority(store, layer, LayerGroups::COMBINE_CONSTANT);
                let constant = store.layers[authority].big().constant;
                driver.set_uniform_4f(program, location, constant.to_array());
            }
        }
        unit_state.dirty_combine_constant = false;
        if let Some(location) = unit_state.texture_matrix_uniform {
            if update_all || unit_state.dirty_texture_matrix {
                let authority = layer_authority(store, layer, LayerGroups::USER_MATRIX);
                let matrix = store.layers[authority].big().user_matrix.to_cols_array();
                driver.set_uniform_matrix(program, location, &matrix);
            }
        }
        unit_state.dirty_texture_matrix = false;
    }

    if let Some(location) = state.alpha_test_ref_uniform {
        if update_all
            || state
                .dirty_builtin_uniforms
                .contains(BuiltinUniforms::ALPHA_TEST_REF)
        {
            driver.set_uniform_1f(program, location, get_alpha_test_reference(store, pipeline));
        }
    }
    if let Some(location) = state.point_size_uniform {
        if update_all
            || state
                .dirty_builtin_uniforms
                .contains(BuiltinUniforms::POINT_SIZE)
        {
            driver.set_uniform_1f(program, location, get_point_size(store, pipeline));
        }
    }
    state.dirty_builtin_uniforms = BuiltinUniforms::empty();

    // Override values are uploaded on every flush; they are opaque to
    // the sharing logic so two pipelines sharing a program can still
    // disagree on them.
    for (location, value) in get_uniform_overrides(store, pipeline) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let location = UniformLocation(location as i32);
        uniform_value_upload(driver, program, location, &value);
    }

    state.last_used_for_pipeline = Some(pipeline);

    Ok(program)
}
