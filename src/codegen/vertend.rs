//! High-level shading language vertex generator.
//!
//! Runs alongside the GLSL fragment generator: per-layer texture
//! coordinate transforms, the point size assignment and the standard
//! position and color plumbing. Generated shaders are shared through
//! the vertex shader cache.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::cache::ProgramCaches;
use crate::context::ContextSettings;
use crate::driver::{Driver, DriverFeatures, ShaderHandle};
use crate::errors::Result;
use crate::pipeline::compare::find_equivalent_parent;
use crate::pipeline::core::user_program;
use crate::pipeline::layer::{layer_authority, layer_vertex_codegen_groups, LayerGroups};
use crate::pipeline::ops::get_vertex_snippets;
use crate::pipeline::state::{
    vertex_codegen_groups, ShaderStage, StateGroups, UserProgram,
};
use crate::pipeline::{LayerId, PipelineId, PipelineStore};
use crate::snippet::{Snippet, SnippetHook};

/// Vertex shader state shared between codegen-equivalent pipelines.
#[derive(Debug, Default)]
pub struct VertendShaderState {
    pub gl_shader: Option<ShaderHandle>,
    header: String,
    source: String,
    generating: bool,
    user_program_age: Option<u64>,
}

fn state_rc(store: &PipelineStore, pipeline: PipelineId) -> Rc<RefCell<VertendShaderState>> {
    store.pipelines[pipeline]
        .vertend_state
        .clone()
        .expect("vertex generator started")
}

/// Prepares shared vertex shader state for the pipeline.
pub fn start(
    store: &mut PipelineStore,
    settings: &ContextSettings,
    caches: &mut ProgramCaches,
    pipeline: PipelineId,
) {
    if store.pipelines[pipeline].vertend_state.is_none() {
        let authority = find_equivalent_parent(
            store,
            pipeline,
            vertex_codegen_groups(store.features) & !StateGroups::LAYERS,
            layer_vertex_codegen_groups(store.features),
        );
        let shared = if let Some(state) = &store.pipelines[authority].vertend_state {
            Rc::clone(state)
        } else {
            let cached = if settings.disable_program_caches {
                None
            } else {
                caches.vertex.lookup(store, authority)
            };
            let state = match cached {
                Some(state) => state,
                None => {
                    let state = Rc::<RefCell<VertendShaderState>>::default();
                    if !settings.disable_program_caches {
                        caches.vertex.insert(store, authority, Rc::clone(&state));
                    }
                    state
                }
            };
            store.pipelines[authority].vertend_state = Some(Rc::clone(&state));
            state
        };
        store.pipelines[pipeline].vertend_state = Some(shared);
    }

    let user = user_program(store, pipeline);
    let user_age = user.as_ref().map(UserProgram::age);

    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();

    if state.gl_shader.is_some() && state.user_program_age == user_age {
        state.generating = false;
        return;
    }

    // A user-supplied vertex shader replaces generation entirely.
    if user
        .as_ref()
        .is_some_and(|p| p.has_stage(ShaderStage::Vertex))
    {
        state.gl_shader = None;
        state.generating = false;
        state.user_program_age = user_age;
        return;
    }

    state.gl_shader = None;
    state.generating = true;
    state.header.clear();
    state.source.clear();
    state.header.push_str(
        "attribute vec4 glz_position_in;\n\
         attribute vec4 glz_color_in;\n\
         uniform mat4 glz_modelview_projection_matrix;\n\
         varying vec4 glz_color_out;\n",
    );
    state.user_program_age = user_age;
}

fn layer_vertex_snippets(store: &PipelineStore, layer: LayerId) -> Vec<Snippet> {
    let authority = layer_authority(store, layer, LayerGroups::VERTEX_SNIPPETS);
    store.layers[authority]
        .big_state
        .as_ref()
        .map(|b| b.vertex_snippets.clone())
        .unwrap_or_default()
}

/// Emits the texture coordinate transform for one layer.
pub fn add_layer(store: &mut PipelineStore, pipeline: PipelineId, layer: LayerId, unit: usize) {
    let state_rc = state_rc(store, pipeline);
    let mut state = state_rc.borrow_mut();
    if !state.generating {
        return;
    }

    let _ = writeln!(state.header, "attribute vec4 glz_tex_coord{unit}_in;");
    let _ = writeln!(state.header, "uniform mat4 glz_texture_matrix{unit};");
    let _ = writeln!(state.header, "varying vec4 glz_tex_coord{unit}_out;");

    let snippets = layer_vertex_snippets(store, layer);
    let mut replaced = false;
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::TextureCoordTransform {
            state.header.push_str(snippet.declarations());
            state.source.push_str(snippet.pre());
            if let Some(replacement) = snippet.replace() {
                state.source.push_str(replacement);
                replaced = true;
            }
        }
    }
    if !replaced {
        let _ = writeln!(
            state.source,
            "  glz_tex_coord{unit}_out = glz_texture_matrix{unit} * glz_tex_coord{unit}_in;"
        );
    }
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::TextureCoordTransform {
            state.source.push_str(snippet.post());
        }
    }
}

/// Assembles and compiles the vertex shader. Returns `None` when a
/// user-supplied shader replaces the generated one.
pub fn end(
    store: &mut PipelineStore,
    driver: &mut dyn Driver,
    pipeline: PipelineId,
) -> Result<Option<ShaderHandle>> {
    let state_rc = state_rc(store, pipeline);

    {
        let state = state_rc.borrow();
        if !state.generating {
            return Ok(state.gl_shader);
        }
    }

    let snippets = get_vertex_snippets(store, pipeline);
    let point_size = !store
        .features
        .contains(DriverFeatures::BUILTIN_POINT_SIZE_UNIFORM);

    let mut state = state_rc.borrow_mut();

    if point_size {
        state.header.push_str("uniform float glz_point_size_in;\n");
    }

    // Point size comes before the snippet-visible body so a PointSize
    // replacement can override the default assignment.
    let mut point_size_line = String::new();
    if point_size {
        let mut replaced = false;
        for snippet in &snippets {
            if snippet.hook() == SnippetHook::PointSize {
                state.header.push_str(snippet.declarations());
                point_size_line.push_str(snippet.pre());
                if let Some(replacement) = snippet.replace() {
                    point_size_line.push_str(replacement);
                    replaced = true;
                }
            }
        }
        if !replaced {
            point_size_line.push_str("  gl_PointSize = glz_point_size_in;\n");
        }
        for snippet in &snippets {
            if snippet.hook() == SnippetHook::PointSize {
                point_size_line.push_str(snippet.post());
            }
        }
    }

    let mut full = String::with_capacity(state.header.len() + state.source.len() + 256);
    full.push_str(&state.header);
    for snippet in &snippets {
        if matches!(snippet.hook(), SnippetHook::Vertex | SnippetHook::VertexGlobals) {
            full.push_str(snippet.declarations());
        }
    }
    full.push_str("void\nmain ()\n{\n");
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::Vertex {
            full.push_str(snippet.pre());
        }
    }
    let mut replaced = false;
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::Vertex {
            if let Some(replacement) = snippet.replace() {
                full.push_str(replacement);
                replaced = true;
            }
        }
    }
    if !replaced {
        full.push_str(&state.source);
        full.push_str(&point_size_line);
        full.push_str("  gl_Position = glz_modelview_projection_matrix * glz_position_in;\n");
        full.push_str("  glz_color_out = glz_color_in;\n");
    }
    for snippet in &snippets {
        if snippet.hook() == SnippetHook::Vertex {
            full.push_str(snippet.post());
        }
    }
    full.push_str("}\n");

    let shader = match driver.compile_shader(ShaderStage::Vertex, &full) {
        Ok(shader) => shader,
        Err(err) => {
            log::warn!("vertex shader compilation failed: {err}\nshader source:\n{full}");
            return Err(err);
        }
    };

    state.gl_shader = Some(shader);
    state.generating = false;
    state.header.clear();
    state.source.clear();

    Ok(Some(shader))
}
