//! Shader Generation Tests
//!
//! Tests for:
//! - deterministic high-level shader source for a given configuration
//! - combine function lowering, separate RGB/alpha passes and constants
//! - the shader-side alpha test and point sprite coordinate redirect
//! - the assembly backend's instruction output and its rejection rules
//! - user-supplied programs short-circuiting generation
//! - compile, link and combine-argument failures surfacing as errors

use glaze::color::Color;
use glaze::driver::{DriverCall, DriverFeatures, RecordingDriver};
use glaze::errors::GlazeError;
use glaze::pipeline::layer::{CombineFunc, CombineOp, CombineSource};
use glaze::pipeline::layer_ops::{
    set_layer_combine, set_layer_combine_constant, set_layer_combine_rgb,
    set_layer_point_sprite_coords_enabled, set_layer_texture,
};
use glaze::pipeline::ops::{
    add_snippet, set_alpha_test_function, set_alpha_test_reference, set_fog_state,
};
use glaze::pipeline::state::{
    CompareFunc, FogState, ShaderLanguage, ShaderStage, UserProgram,
};
use glaze::sampler::{TextureRef, TextureTarget};
use glaze::snippet::{Snippet, SnippetHook};
use glaze::{ContextSettings, PipelineContext, PipelineId};

const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);

fn glsl_ctx() -> PipelineContext<RecordingDriver> {
    PipelineContext::new(RecordingDriver::glsl())
}

fn asm_ctx() -> PipelineContext<RecordingDriver> {
    PipelineContext::new(RecordingDriver::asm_only())
}

fn derive(ctx: &mut PipelineContext<RecordingDriver>) -> PipelineId {
    let root = ctx.default_pipeline();
    ctx.copy(root)
}

// ============================================================================
// High-level source shapes
// ============================================================================

const PASSTHROUGH_FRAGMENT: &str = "\
void
main ()
{
  glz_color_out = glz_color_in;
}
";

const PASSTHROUGH_VERTEX: &str = "\
attribute vec4 glz_position_in;
attribute vec4 glz_color_in;
uniform mat4 glz_modelview_projection_matrix;
varying vec4 glz_color_out;
uniform float glz_point_size_in;
void
main ()
{
  gl_PointSize = glz_point_size_in;
  gl_Position = glz_modelview_projection_matrix * glz_position_in;
  glz_color_out = glz_color_in;
}
";

#[test]
fn layerless_pipeline_passes_the_vertex_color_through() {
    let mut ctx = glsl_ctx();
    let p = derive(&mut ctx);

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(sources, vec![PASSTHROUGH_FRAGMENT, PASSTHROUGH_VERTEX]);
    assert_eq!(ctx.driver().programs_created(), 1);
}

#[test]
fn single_texture_layer_modulates_the_primary_color() {
    let mut ctx = glsl_ctx();
    let p = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(1, TextureTarget::TwoD)),
    );

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(
        sources[0],
        "\
uniform sampler2D glz_sampler_0;
void
main ()
{
  glz_color_out.rgba = (glz_color_in.rgba) * (texture2D (glz_sampler_0, glz_tex_coord_in[0].st).rgba);
}
"
    );
    assert_eq!(
        sources[1],
        "\
attribute vec4 glz_position_in;
attribute vec4 glz_color_in;
uniform mat4 glz_modelview_projection_matrix;
varying vec4 glz_color_out;
attribute vec4 glz_tex_coord0_in;
uniform mat4 glz_texture_matrix0;
varying vec4 glz_tex_coord0_out;
uniform float glz_point_size_in;
void
main ()
{
  glz_tex_coord0_out = glz_texture_matrix0 * glz_tex_coord0_in;
  gl_PointSize = glz_point_size_in;
  gl_Position = glz_modelview_projection_matrix * glz_position_in;
  glz_color_out = glz_color_in;
}
"
    );
}

#[test]
fn diverging_alpha_combine_emits_two_passes() {
    let mut ctx = glsl_ctx();
    let p = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(1, TextureTarget::TwoD)),
    );
    set_layer_combine_rgb(
        ctx.store_mut(),
        p,
        0,
        CombineFunc::Add,
        &[CombineSource::Texture, CombineSource::Previous],
        &[CombineOp::SrcColor, CombineOp::SrcColor],
    )
    .expect("combine");

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(
        sources[0],
        "\
uniform sampler2D glz_sampler_0;
void
main ()
{
  glz_color_out.rgb = (texture2D (glz_sampler_0, glz_tex_coord_in[0].st).rgb) + (glz_color_in.rgb);
  glz_color_out.a = (glz_color_in.a) * (texture2D (glz_sampler_0, glz_tex_coord_in[0].st).a);
}
"
    );
}

#[test]
fn combine_constant_is_declared_and_uploaded() {
    let mut ctx = glsl_ctx();
    let p = derive(&mut ctx);
    set_layer_combine(
        ctx.store_mut(),
        p,
        0,
        CombineFunc::Modulate,
        &[CombineSource::Constant, CombineSource::Previous],
    )
    .expect("combine");
    set_layer_combine_constant(ctx.store_mut(), p, 0, RED);

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(
        sources[0],
        "\
uniform vec4 _glz_layer_constant_0;
void
main ()
{
  glz_color_out.rgba = (_glz_layer_constant_0.rgba) * (glz_color_in.rgba);
}
"
    );
    assert!(ctx
        .driver()
        .calls
        .iter()
        .any(|c| matches!(c, DriverCall::SetUniform4f(_, _, v) if *v == [1.0, 0.0, 0.0, 1.0])));
}

#[test]
fn alpha_test_comparison_is_inverted_into_a_discard() {
    let driver = RecordingDriver::new(DriverFeatures::GLSL | DriverFeatures::SHADER_ALPHA_TEST);
    let mut ctx = PipelineContext::new(driver);
    let p = derive(&mut ctx);
    set_alpha_test_function(ctx.store_mut(), p, CompareFunc::Gequal);
    set_alpha_test_reference(ctx.store_mut(), p, 0.5);

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(
        sources[0],
        "\
uniform float _glz_alpha_test_ref;
void
main ()
{
  glz_color_out = glz_color_in;
  if (glz_color_out.a < _glz_alpha_test_ref)
    discard;
}
"
    );
    assert!(ctx
        .driver()
        .calls
        .iter()
        .any(|c| matches!(c, DriverCall::SetUniform1f(_, _, v) if *v == 0.5)));
}

#[test]
fn never_alpha_test_discards_unconditionally() {
    let driver = RecordingDriver::new(DriverFeatures::GLSL | DriverFeatures::SHADER_ALPHA_TEST);
    let mut ctx = PipelineContext::new(driver);
    let p = derive(&mut ctx);
    set_alpha_test_function(ctx.store_mut(), p, CompareFunc::Never);

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(
        sources[0],
        "\
void
main ()
{
  glz_color_out = glz_color_in;
  discard;
}
"
    );
}

#[test]
fn point_sprite_layers_sample_the_builtin_coordinate() {
    let driver = RecordingDriver::new(DriverFeatures::GLSL | DriverFeatures::POINT_COORD_BUILTIN);
    let mut ctx = PipelineContext::new(driver);
    let p = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(1, TextureTarget::TwoD)),
    );
    set_layer_point_sprite_coords_enabled(ctx.store_mut(), p, 0, true);

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert!(sources[0].contains(
        "  glz_color_out.rgba = (glz_color_in.rgba) * (texture2D (glz_sampler_0, gl_PointCoord.st).rgba);\n"
    ));
}

#[test]
fn disabled_texturing_substitutes_opaque_white() {
    let settings = ContextSettings {
        disable_texturing: true,
        ..ContextSettings::default()
    };
    let mut ctx = PipelineContext::with_settings(RecordingDriver::glsl(), settings);
    let p = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(1, TextureTarget::TwoD)),
    );

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(
        sources[0],
        "\
void
main ()
{
  glz_color_out.rgba = (glz_color_in.rgba) * (vec4 (1.0, 1.0, 1.0, 1.0).rgba);
}
"
    );
}

#[test]
fn forced_constant_color_overrides_the_generated_body() {
    let settings = ContextSettings {
        force_constant_color: Some(Color::new(1.0, 0.0, 0.5, 1.0)),
        ..ContextSettings::default()
    };
    let mut ctx = PipelineContext::with_settings(RecordingDriver::glsl(), settings);
    let p = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(1, TextureTarget::TwoD)),
    );

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert!(sources[0].contains("  glz_color_out = vec4 (1.0, 0.0, 0.5, 1.0);\n"));
    assert!(!sources[0].contains("texture2D"));
}

#[test]
fn equal_configurations_generate_identical_source() {
    let settings = ContextSettings {
        disable_program_caches: true,
        ..ContextSettings::default()
    };
    let mut ctx = PipelineContext::with_settings(RecordingDriver::glsl(), settings);
    let p0 = derive(&mut ctx);
    let p1 = derive(&mut ctx);
    for p in [p0, p1] {
        set_layer_texture(
            ctx.store_mut(),
            p,
            0,
            Some(TextureRef::opaque(5, TextureTarget::ThreeD)),
        );
    }

    ctx.flush(p0).expect("flush");
    ctx.flush(p1).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert_eq!(sources.len(), 4);
    assert_eq!(sources[0], sources[2]);
    assert_eq!(sources[1], sources[3]);
    assert_eq!(ctx.driver().programs_created(), 2);
}

#[test]
fn user_fragment_shader_replaces_generation() {
    let mut ctx = glsl_ctx();
    let p = derive(&mut ctx);

    let program = UserProgram::new();
    program.attach_shader(
        ShaderStage::Fragment,
        ShaderLanguage::Glsl,
        "void main () { gl_FragColor = vec4 (1.0); }\n",
    );
    glaze::pipeline::ops::set_user_program(ctx.store_mut(), p, Some(program));

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    // Only the vertex stage is generated; the user source is compiled
    // verbatim and linked in.
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0], PASSTHROUGH_VERTEX);
    assert_eq!(sources[1], "void main () { gl_FragColor = vec4 (1.0); }\n");
    assert_eq!(ctx.driver().programs_created(), 1);
}

// ============================================================================
// Assembly backend
// ============================================================================

const ASM_PREAMBLE: &str = "\
!!ARBfp1.0
TEMP output;
TEMP tmp0, tmp1, tmp2, tmp3, tmp4;
PARAM half = {.5, .5, .5, .5};
PARAM one = {1, 1, 1, 1};
PARAM two = {2, 2, 2, 2};
PARAM minus_one = {-1, -1, -1, -1};
";

#[test]
fn assembly_passthrough_moves_the_primary_color() {
    let mut ctx = asm_ctx();
    let p = derive(&mut ctx);

    ctx.flush(p).expect("flush");

    let expected = format!(
        "{ASM_PREAMBLE}\
MOV output, fragment.color.primary;
MOV result.color,output;
END
"
    );
    assert_eq!(ctx.driver().compiled_sources(), vec![expected.as_str()]);
    assert_eq!(ctx.driver().programs_created(), 1);
}

#[test]
fn assembly_texture_layer_samples_and_modulates() {
    let mut ctx = asm_ctx();
    let p = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(1, TextureTarget::TwoD)),
    );

    ctx.flush(p).expect("flush");

    let expected = format!(
        "{ASM_PREAMBLE}\
TEMP texel0;
TEX texel0,fragment.texcoord[0],texture[0],2D;
MUL output, fragment.color.primary, texel0;
MOV result.color,output;
END
"
    );
    assert_eq!(ctx.driver().compiled_sources(), vec![expected.as_str()]);
}

#[test]
fn assembly_dot3_expands_to_mad_and_dp3() {
    let mut ctx = asm_ctx();
    let p = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(1, TextureTarget::TwoD)),
    );
    set_layer_combine_rgb(
        ctx.store_mut(),
        p,
        0,
        CombineFunc::Dot3Rgb,
        &[CombineSource::Texture, CombineSource::Previous],
        &[CombineOp::SrcColor, CombineOp::SrcColor],
    )
    .expect("combine");

    ctx.flush(p).expect("flush");

    let expected = format!(
        "{ASM_PREAMBLE}\
TEMP texel0;
TEX texel0,fragment.texcoord[0],texture[0],2D;
MAD tmp3, two, texel0, minus_one;
MAD tmp4, two, fragment.color.primary, minus_one;
DP3_SAT output.rgb, tmp3, tmp4;
MUL output.a, fragment.color.primary, texel0;
MOV result.color,output;
END
"
    );
    assert_eq!(ctx.driver().compiled_sources(), vec![expected.as_str()]);
}

#[test]
fn assembly_combine_constant_uses_a_local_parameter() {
    let mut ctx = asm_ctx();
    let p = derive(&mut ctx);
    set_layer_combine(
        ctx.store_mut(),
        p,
        0,
        CombineFunc::Modulate,
        &[CombineSource::Constant, CombineSource::Previous],
    )
    .expect("combine");
    set_layer_combine_constant(ctx.store_mut(), p, 0, RED);

    ctx.flush(p).expect("flush");

    let sources = ctx.driver().compiled_sources();
    assert!(sources[0].contains("MUL output, program.local[0], fragment.color.primary;\n"));
    assert!(ctx
        .driver()
        .calls
        .iter()
        .any(|c| matches!(c, DriverCall::SetProgramLocal(_, 0, v) if *v == [1.0, 0.0, 0.0, 1.0])));
}

#[test]
fn fog_forces_the_assembly_backend_to_decline() {
    let mut ctx = asm_ctx();
    let p = derive(&mut ctx);
    set_fog_state(
        ctx.store_mut(),
        p,
        FogState {
            enabled: true,
            ..FogState::default()
        },
    );

    let err = ctx.flush(p).expect_err("no backend should accept fog here");
    assert!(matches!(err, GlazeError::Unsupported(_)));
}

#[test]
fn snippets_force_the_assembly_backend_to_decline() {
    let mut ctx = asm_ctx();
    let p = derive(&mut ctx);
    let snippet = Snippet::new(SnippetHook::Fragment, "", "");
    add_snippet(ctx.store_mut(), p, &snippet);

    let err = ctx.flush(p).expect_err("snippets need the high-level path");
    assert!(matches!(err, GlazeError::Unsupported(_)));
}

#[test]
fn user_assembly_program_is_loaded_verbatim() {
    let mut ctx = asm_ctx();
    let p = derive(&mut ctx);

    let program = UserProgram::new();
    program.attach_shader(
        ShaderStage::Fragment,
        ShaderLanguage::Asm,
        "!!ARBfp1.0\nMOV result.color, fragment.color.primary;\nEND\n",
    );
    glaze::pipeline::ops::set_user_program(ctx.store_mut(), p, Some(program));

    ctx.flush(p).expect("flush");

    assert_eq!(
        ctx.driver().compiled_sources(),
        vec!["!!ARBfp1.0\nMOV result.color, fragment.color.primary;\nEND\n"]
    );
}

// ============================================================================
// Failure reporting
// ============================================================================

#[test]
fn compile_failure_surfaces_the_driver_log() {
    let mut driver = RecordingDriver::glsl();
    driver.force_compile_error = Some("0:1(1): error: syntax error".to_owned());
    let mut ctx = PipelineContext::new(driver);
    let p = derive(&mut ctx);

    let err = ctx.flush(p).expect_err("compilation should fail");
    assert!(matches!(
        err,
        GlazeError::ShaderCompileFailed { ref log } if log.contains("syntax error")
    ));
    assert_eq!(ctx.driver().programs_created(), 0);
}

#[test]
fn link_failure_surfaces_the_driver_log() {
    let mut driver = RecordingDriver::glsl();
    driver.force_link_error = Some("varying mismatch".to_owned());
    let mut ctx = PipelineContext::new(driver);
    let p = derive(&mut ctx);

    let err = ctx.flush(p).expect_err("linking should fail");
    assert!(matches!(
        err,
        GlazeError::ProgramLinkFailed { ref log } if log.contains("varying mismatch")
    ));
    // Both shaders compiled before the link was attempted.
    assert_eq!(ctx.driver().compiled_sources().len(), 2);
}

#[test]
fn too_few_combine_arguments_are_rejected() {
    let mut ctx = glsl_ctx();
    let p = derive(&mut ctx);

    let err = set_layer_combine_rgb(
        ctx.store_mut(),
        p,
        0,
        CombineFunc::Interpolate,
        &[CombineSource::Texture, CombineSource::Previous],
        &[CombineOp::SrcColor, CombineOp::SrcColor],
    )
    .expect_err("interpolate needs three arguments");
    assert!(matches!(
        err,
        GlazeError::CombineArgOutOfRange { index: 2, .. }
    ));
}

#[test]
fn glsl_backend_wins_when_both_are_available() {
    let driver = RecordingDriver::new(DriverFeatures::GLSL | DriverFeatures::ASM_PROGRAMS);
    let mut ctx = PipelineContext::new(driver);
    let p = derive(&mut ctx);

    ctx.flush(p).expect("flush");

    assert!(ctx
        .driver()
        .calls
        .iter()
        .all(|c| !matches!(c, DriverCall::LoadAsmProgram { .. })));
    assert_eq!(ctx.driver().programs_created(), 1);
}
