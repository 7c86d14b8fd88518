//! Program Cache Tests
//!
//! Tests for:
//! - program sharing between pipelines equal in codegen-relevant state
//! - state outside the codegen groups never splitting cache entries
//! - re-flushing a pipeline without recompiling or relinking
//! - per-pipeline uniform uploads on top of a shared program
//! - cache bypass, clearing and bounded growth under pruning
//! - pruning keeping in-use entries while evicting single-use ones
//! - value-keyed sampler interning across pipelines

use glaze::color::Color;
use glaze::driver::{DriverCall, RecordingDriver};
use glaze::pipeline::layer_ops::{
    set_layer_combine_constant, set_layer_filters, set_layer_texture, set_layer_wrap_mode,
};
use glaze::pipeline::ops::{set_color, set_depth_state};
use glaze::pipeline::state::DepthState;
use glaze::sampler::{FilterMode, TextureRef, TextureTarget, WrapMode};
use glaze::{ContextSettings, PipelineContext, PipelineId};

fn glsl_ctx() -> PipelineContext<RecordingDriver> {
    PipelineContext::new(RecordingDriver::glsl())
}

fn derive(ctx: &mut PipelineContext<RecordingDriver>) -> PipelineId {
    let root = ctx.default_pipeline();
    ctx.copy(root)
}

fn textured(ctx: &mut PipelineContext<RecordingDriver>, handle: u64) -> PipelineId {
    let p = derive(ctx);
    set_layer_texture(
        ctx.store_mut(),
        p,
        0,
        Some(TextureRef::opaque(handle, TextureTarget::TwoD)),
    );
    p
}

/// A pipeline with `n_layers` texture layers, so each distinct count
/// needs its own program.
fn stacked(ctx: &mut PipelineContext<RecordingDriver>, n_layers: usize) -> PipelineId {
    let p = derive(ctx);
    for index in 0..n_layers {
        set_layer_texture(
            ctx.store_mut(),
            p,
            index,
            Some(TextureRef::opaque(1, TextureTarget::TwoD)),
        );
    }
    p
}

// ============================================================================
// Sharing
// ============================================================================

#[test]
fn equivalent_pipelines_share_one_program() {
    let mut ctx = glsl_ctx();
    let p0 = textured(&mut ctx, 1);
    let p1 = textured(&mut ctx, 1);

    // Colors and depth state play no part in generated source.
    set_color(ctx.store_mut(), p1, Color::new(1.0, 0.0, 0.0, 1.0));
    set_depth_state(
        ctx.store_mut(),
        p1,
        DepthState {
            test_enabled: true,
            ..DepthState::default()
        },
    );

    let prog0 = ctx.flush(p0).expect("flush");
    let prog1 = ctx.flush(p1).expect("flush");

    assert_eq!(prog0, prog1);
    assert_eq!(ctx.driver().programs_created(), 1);
    assert_eq!(ctx.cached_program_count(), 1);
}

#[test]
fn texture_objects_do_not_split_cache_entries() {
    let mut ctx = glsl_ctx();
    let p0 = textured(&mut ctx, 1);
    let p1 = textured(&mut ctx, 2);

    // Different texture objects, same lookup code.
    let prog0 = ctx.flush(p0).expect("flush");
    let prog1 = ctx.flush(p1).expect("flush");

    assert_eq!(prog0, prog1);
    assert_eq!(ctx.cached_program_count(), 1);
}

#[test]
fn differing_codegen_state_links_separate_programs() {
    let mut ctx = glsl_ctx();
    let p0 = textured(&mut ctx, 1);
    let p1 = derive(&mut ctx);
    set_layer_texture(
        ctx.store_mut(),
        p1,
        0,
        Some(TextureRef::opaque(1, TextureTarget::ThreeD)),
    );

    let prog0 = ctx.flush(p0).expect("flush");
    let prog1 = ctx.flush(p1).expect("flush");

    assert_ne!(prog0, prog1);
    assert_eq!(ctx.driver().programs_created(), 2);
    assert_eq!(ctx.cached_program_count(), 2);
}

#[test]
fn reflushing_reuses_the_program_without_recompiling() {
    let mut ctx = glsl_ctx();
    let p = textured(&mut ctx, 1);

    let prog0 = ctx.flush(p).expect("flush");
    let compiles = ctx.driver().compiled_sources().len();
    let prog1 = ctx.flush(p).expect("flush");

    assert_eq!(prog0, prog1);
    assert_eq!(ctx.driver().compiled_sources().len(), compiles);
    assert_eq!(ctx.driver().programs_created(), 1);
}

#[test]
fn shared_program_still_gets_per_pipeline_constants() {
    let mut ctx = PipelineContext::new(RecordingDriver::asm_only());
    let p0 = derive(&mut ctx);
    let p1 = derive(&mut ctx);
    for p in [p0, p1] {
        glaze::pipeline::layer_ops::set_layer_combine(
            ctx.store_mut(),
            p,
            0,
            glaze::pipeline::layer::CombineFunc::Modulate,
            &[
                glaze::pipeline::layer::CombineSource::Constant,
                glaze::pipeline::layer::CombineSource::Previous,
            ],
        )
        .expect("combine");
    }
    set_layer_combine_constant(ctx.store_mut(), p0, 0, Color::new(1.0, 0.0, 0.0, 1.0));
    set_layer_combine_constant(ctx.store_mut(), p1, 0, Color::new(0.0, 1.0, 0.0, 1.0));

    let prog0 = ctx.flush(p0).expect("flush");
    let prog1 = ctx.flush(p1).expect("flush");

    // One program, but each flush uploads the flushed pipeline's value.
    assert_eq!(prog0, prog1);
    assert_eq!(ctx.driver().programs_created(), 1);
    let locals: Vec<[f32; 4]> = ctx
        .driver()
        .calls
        .iter()
        .filter_map(|c| match c {
            DriverCall::SetProgramLocal(_, 0, v) => Some(*v),
            _ => None,
        })
        .collect();
    assert_eq!(locals, vec![[1.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0, 1.0]]);
    assert_eq!(ctx.cached_fragment_count(), 1);
}

// ============================================================================
// Bypass, clearing and growth
// ============================================================================

#[test]
fn disabled_caches_keep_programs_separate() {
    let settings = ContextSettings {
        disable_program_caches: true,
        ..ContextSettings::default()
    };
    let mut ctx = PipelineContext::with_settings(RecordingDriver::glsl(), settings);
    let p0 = textured(&mut ctx, 1);
    let p1 = textured(&mut ctx, 1);

    let prog0 = ctx.flush(p0).expect("flush");
    let prog1 = ctx.flush(p1).expect("flush");

    assert_ne!(prog0, prog1);
    assert_eq!(ctx.driver().programs_created(), 2);
    assert_eq!(ctx.cached_program_count(), 0);
}

#[test]
fn clearing_drops_every_entry() {
    let mut ctx = glsl_ctx();
    let p = textured(&mut ctx, 1);
    ctx.flush(p).expect("flush");
    assert_eq!(ctx.cached_program_count(), 1);

    ctx.clear_caches();
    assert_eq!(ctx.cached_program_count(), 0);

    // A fresh pipeline repopulates the cache.
    let p2 = textured(&mut ctx, 1);
    ctx.flush(p2).expect("flush");
    assert_eq!(ctx.cached_program_count(), 1);
}

#[test]
fn pruning_evicts_single_use_entries_and_keeps_hot_ones() {
    let mut ctx = glsl_ctx();

    // Eighteen configurations with distinct layer counts, each flushed
    // once and dropped.
    for n in 1_usize..=18 {
        let p = stacked(&mut ctx, n);
        ctx.flush(p).expect("flush");
        ctx.release(p);
    }
    assert_eq!(ctx.cached_program_count(), 18);

    // Touch the one-layer entry so it counts as in use.
    let hot = stacked(&mut ctx, 1);
    ctx.flush(hot).expect("flush");
    let programs_before = ctx.driver().programs_created();

    // A nineteenth configuration pushes the table over its threshold.
    let p19 = stacked(&mut ctx, 19);
    ctx.flush(p19).expect("flush");
    ctx.release(p19);

    let survivors = ctx.cached_program_count();
    assert!(survivors > 0);
    assert!(
        survivors < 19,
        "single-use entries should have been evicted"
    );

    // The hot entry survived: an equivalent pipeline reuses its program.
    let hot_again = stacked(&mut ctx, 1);
    ctx.flush(hot_again).expect("flush");
    assert_eq!(
        ctx.driver().programs_created(),
        programs_before + 1,
        "only the nineteenth configuration should have linked anew"
    );

    // An evicted single-use configuration has to link again.
    let evicted = stacked(&mut ctx, 5);
    ctx.flush(evicted).expect("flush");
    assert_eq!(ctx.driver().programs_created(), programs_before + 2);
}

// ============================================================================
// Sampler interning
// ============================================================================

#[test]
fn equal_sampler_configurations_share_one_entry() {
    let mut ctx = glsl_ctx();
    let p0 = textured(&mut ctx, 1);
    let p1 = textured(&mut ctx, 2);

    let s0 = ctx.layer_sampler(p0, 0);
    let s1 = ctx.layer_sampler(p1, 0);

    // Keyed by the sampler values, not by layer or pipeline identity.
    assert_eq!(s0, s1);
    assert_eq!(ctx.sampler_count(), 1);
}

#[test]
fn differing_filters_intern_separate_entries() {
    let mut ctx = glsl_ctx();
    let p0 = textured(&mut ctx, 1);
    let p1 = textured(&mut ctx, 1);
    set_layer_filters(
        ctx.store_mut(),
        p1,
        0,
        FilterMode::Nearest,
        FilterMode::Nearest,
    );

    assert_ne!(ctx.layer_sampler(p0, 0), ctx.layer_sampler(p1, 0));
    assert_eq!(ctx.sampler_count(), 2);
}

#[test]
fn automatic_wrapping_interns_as_clamp_to_edge() {
    let mut ctx = glsl_ctx();
    let p0 = textured(&mut ctx, 1);
    let p1 = textured(&mut ctx, 1);
    // p0 keeps the default Automatic modes; p1 spells out the clamp.
    set_layer_wrap_mode(ctx.store_mut(), p1, 0, WrapMode::ClampToEdge);

    assert_eq!(ctx.layer_sampler(p0, 0), ctx.layer_sampler(p1, 0));
    assert_eq!(ctx.sampler_count(), 1);
}

#[test]
fn flushing_interns_the_layer_samplers() {
    let mut ctx = glsl_ctx();
    let p = stacked(&mut ctx, 2);

    assert_eq!(ctx.sampler_count(), 0);
    ctx.flush(p).expect("flush");

    // Both layers sample identically, so one entry covers them.
    assert_eq!(ctx.sampler_count(), 1);
}
