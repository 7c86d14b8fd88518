//! Semantic Equality and Hashing Tests
//!
//! Tests for:
//! - equality of independently built pipelines across subtrees
//! - masked comparison (irrelevant groups never break equality)
//! - blend factors ignored while blending is disabled
//! - combine constants ignored unless an argument references them
//! - Automatic wrap mode resolving to ClampToEdge
//! - identity comparison of user programs and snippets
//! - hash agreement wherever equality holds

use glaze::color::Color;
use glaze::pipeline::compare::equal;
use glaze::pipeline::core::copy;
use glaze::pipeline::hash::pipeline_hash;
use glaze::pipeline::layer::{CombineFunc, CombineSource, LayerGroups};
use glaze::pipeline::layer_ops::{
    set_layer_combine, set_layer_combine_constant, set_layer_texture, set_layer_wrap_mode,
};
use glaze::pipeline::ops::{
    add_snippet, set_blend_enable, set_blend_state, set_color, set_depth_state, set_user_program,
};
use glaze::pipeline::state::{
    BlendEnableMode, BlendFactor, BlendState, CompareFunc, DepthState, StateGroups, UserProgram,
};
use glaze::pipeline::PipelineStore;
use glaze::sampler::{TextureRef, TextureTarget, WrapMode};
use glaze::snippet::{Snippet, SnippetHook};

const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);

fn pair(store: &mut PipelineStore) -> (glaze::PipelineId, glaze::PipelineId) {
    let root = store.default_pipeline;
    (copy(store, root), copy(store, root))
}

fn assert_equal_and_hash(store: &mut PipelineStore, p0: glaze::PipelineId, p1: glaze::PipelineId) {
    assert!(equal(store, p0, p1, StateGroups::all(), LayerGroups::all()));
    let h0 = pipeline_hash(store, p0, StateGroups::all(), LayerGroups::all());
    let h1 = pipeline_hash(store, p1, StateGroups::all(), LayerGroups::all());
    assert_eq!(h0, h1, "equal pipelines must hash alike");
}

// ============================================================================
// Cross-tree equality
// ============================================================================

#[test]
fn independently_built_pipelines_compare_equal() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    for p in [p0, p1] {
        set_color(&mut store, p, RED);
        set_depth_state(
            &mut store,
            p,
            DepthState {
                test_enabled: true,
                ..DepthState::default()
            },
        );
    }

    assert_equal_and_hash(&mut store, p0, p1);
}

#[test]
fn differing_color_breaks_equality_only_under_its_group() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    set_color(&mut store, p0, RED);

    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
    // Masking COLOR out makes the difference invisible.
    assert!(equal(
        &mut store,
        p0,
        p1,
        StateGroups::all() & !StateGroups::COLOR,
        LayerGroups::all()
    ));
}

#[test]
fn copy_is_equal_to_its_source() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);
    set_color(&mut store, p, RED);
    let child = copy(&mut store, p);

    assert_equal_and_hash(&mut store, p, child);
}

// ============================================================================
// Relevance rules
// ============================================================================

#[test]
fn blend_factors_are_ignored_while_blending_is_off() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    // Force blending off on both, then give p0 exotic factors.
    set_blend_enable(&mut store, p0, BlendEnableMode::Disabled);
    set_blend_enable(&mut store, p1, BlendEnableMode::Disabled);
    set_blend_state(
        &mut store,
        p0,
        BlendState {
            src_factor_rgb: BlendFactor::DstColor,
            dst_factor_rgb: BlendFactor::SrcColor,
            ..BlendState::default()
        },
    );

    assert_equal_and_hash(&mut store, p0, p1);
}

#[test]
fn blend_factors_matter_once_blending_is_on() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    set_blend_enable(&mut store, p0, BlendEnableMode::Enabled);
    set_blend_enable(&mut store, p1, BlendEnableMode::Enabled);
    set_blend_state(
        &mut store,
        p0,
        BlendState {
            src_factor_rgb: BlendFactor::DstColor,
            ..BlendState::default()
        },
    );

    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}

#[test]
fn disabled_depth_test_compares_only_the_write_mask() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    // Both tests disabled; the comparison function is irrelevant.
    set_depth_state(
        &mut store,
        p0,
        DepthState {
            test_function: CompareFunc::Greater,
            ..DepthState::default()
        },
    );

    assert_equal_and_hash(&mut store, p0, p1);

    set_depth_state(
        &mut store,
        p0,
        DepthState {
            write_enabled: false,
            test_function: CompareFunc::Greater,
            ..DepthState::default()
        },
    );
    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}

#[test]
fn combine_constant_is_ignored_unless_referenced() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    set_layer_combine_constant(&mut store, p0, 0, RED);
    set_layer_combine_constant(&mut store, p1, 0, Color::BLACK);

    // The default modulate chain never reads the constant.
    assert_equal_and_hash(&mut store, p0, p1);

    // Referencing it from the combine arguments makes it relevant.
    for p in [p0, p1] {
        set_layer_combine(
            &mut store,
            p,
            0,
            CombineFunc::Modulate,
            &[CombineSource::Constant, CombineSource::Previous],
        )
        .expect("combine");
    }
    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}

#[test]
fn automatic_wrap_mode_resolves_to_clamp() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    let tex = TextureRef::opaque(9, TextureTarget::TwoD);
    set_layer_texture(&mut store, p0, 0, Some(tex));
    set_layer_texture(&mut store, p1, 0, Some(tex));

    // p0 keeps the default Automatic modes; p1 spells out the clamp.
    set_layer_wrap_mode(&mut store, p1, 0, WrapMode::ClampToEdge);

    assert_equal_and_hash(&mut store, p0, p1);

    set_layer_wrap_mode(&mut store, p1, 0, WrapMode::Repeat);
    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}

#[test]
fn texture_references_compare_by_handle() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    set_layer_texture(&mut store, p0, 0, Some(TextureRef::opaque(5, TextureTarget::TwoD)));
    set_layer_texture(&mut store, p1, 0, Some(TextureRef::opaque(5, TextureTarget::TwoD)));
    assert_equal_and_hash(&mut store, p0, p1);

    set_layer_texture(&mut store, p1, 0, Some(TextureRef::opaque(6, TextureTarget::TwoD)));
    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}

// ============================================================================
// Identity-compared state
// ============================================================================

#[test]
fn user_programs_compare_by_identity() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    let shared = UserProgram::new();
    set_user_program(&mut store, p0, Some(shared.clone()));
    set_user_program(&mut store, p1, Some(shared));
    assert_equal_and_hash(&mut store, p0, p1);

    set_user_program(&mut store, p1, Some(UserProgram::new()));
    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}

#[test]
fn snippets_compare_by_identity() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    let snippet = Snippet::new(SnippetHook::Fragment, "", "  glz_color_out.a = 1.0;\n");
    add_snippet(&mut store, p0, &snippet);
    add_snippet(&mut store, p1, &snippet);
    assert_equal_and_hash(&mut store, p0, p1);

    // Textually identical but a distinct object.
    let lookalike = Snippet::new(SnippetHook::Fragment, "", "  glz_color_out.a = 1.0;\n");
    add_snippet(&mut store, p1, &lookalike);
    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}

#[test]
fn number_of_layers_must_match() {
    let mut store = PipelineStore::default();
    let (p0, p1) = pair(&mut store);

    let tex = TextureRef::opaque(3, TextureTarget::TwoD);
    set_layer_texture(&mut store, p0, 0, Some(tex));
    set_layer_texture(&mut store, p1, 0, Some(tex));
    set_layer_texture(&mut store, p1, 1, Some(tex));

    assert!(!equal(
        &mut store,
        p0,
        p1,
        StateGroups::all(),
        LayerGroups::all()
    ));
}
