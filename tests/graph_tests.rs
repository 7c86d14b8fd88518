//! Pipeline Graph Tests
//!
//! Tests for:
//! - copy-on-write isolation between copies and siblings
//! - authority insertion when a parent with strong children mutates
//! - difference bits dropping when a value reverts to the inherited one
//! - weak copy destruction on dependency change
//! - weak copies never keeping their source alive, and strong copies
//!   of weak pipelines pinning the first strong ancestor
//! - layer creation, unit ordering, removal and pruning
//! - automatic blend enable derivation

use std::cell::Cell;
use std::rc::Rc;

use glaze::color::Color;
use glaze::pipeline::core::{copy, copy_weak, release};
use glaze::pipeline::core::unit_ordered_layers;
use glaze::pipeline::layer::layer_unit_index;
use glaze::pipeline::layer_ops::{
    get_layer_matrix, get_layer_texture, get_n_layers, prune_to_n_layers, remove_layer,
    set_layer_matrix, set_layer_texture,
};
use glaze::pipeline::ops::{
    get_color, get_point_size, get_real_blend_enable, set_blend_enable, set_color, set_point_size,
    set_user_program,
};
use glaze::pipeline::state::{BlendEnableMode, StateGroups, UserProgram};
use glaze::pipeline::PipelineStore;
use glaze::sampler::{TextureRef, TextureTarget};

const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);

// ============================================================================
// Copy-on-write basics
// ============================================================================

#[test]
fn copy_starts_with_no_differences() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    assert!(store.pipeline(p).differences.is_empty());
    assert_eq!(get_color(&store, p), Color::WHITE);
    assert_eq!(get_point_size(&store, p), 1.0);
}

#[test]
fn sibling_mutation_does_not_leak() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p1 = copy(&mut store, root);
    let p2 = copy(&mut store, root);

    set_color(&mut store, p1, RED);

    assert_eq!(get_color(&store, p1), RED);
    assert_eq!(get_color(&store, p2), Color::WHITE);
}

#[test]
fn parent_mutation_preserves_child_state() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let parent = copy(&mut store, root);
    let child = copy(&mut store, parent);

    // The child inherits everything from the parent; mutating the
    // parent afterwards must not be visible through the child.
    set_color(&mut store, parent, RED);

    assert_eq!(get_color(&store, parent), RED);
    assert_eq!(get_color(&store, child), Color::WHITE);
}

#[test]
fn setter_is_a_noop_when_value_matches_authority() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    let age_before = store.pipeline(p).age;
    set_color(&mut store, p, Color::WHITE);

    assert!(store.pipeline(p).differences.is_empty());
    assert_eq!(store.pipeline(p).age, age_before);
}

#[test]
fn rewriting_inherited_value_clears_difference() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    set_color(&mut store, p, RED);
    assert!(store.pipeline(p).differences.contains(StateGroups::COLOR));

    set_color(&mut store, p, Color::WHITE);
    assert!(!store.pipeline(p).differences.contains(StateGroups::COLOR));
}

#[test]
fn mutation_bumps_age() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    let age = store.pipeline(p).age;
    set_point_size(&mut store, p, 4.0);
    assert!(store.pipeline(p).age > age);
}

// ============================================================================
// Weak copies
// ============================================================================

#[test]
fn weak_copy_destroyed_on_dependency_change() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    let destroyed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&destroyed);
    let weak = copy_weak(&mut store, p, Some(Box::new(move |_| flag.set(true))));

    set_color(&mut store, p, RED);

    assert!(destroyed.get(), "weak copy should be torn down");
    assert!(
        store.pipeline(p).node.children.is_empty(),
        "no new authority should be inserted for a weak child"
    );

    release(&mut store, weak);
}

#[test]
fn weak_copy_does_not_keep_its_source_alive() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    let destroyed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&destroyed);
    let weak = copy_weak(&mut store, p, Some(Box::new(move |_| flag.set(true))));

    // The weak copy holds no reference on `p`, so dropping the last
    // user handle destroys it.
    release(&mut store, p);

    assert!(!store.pipelines.contains_key(p));
    assert!(destroyed.get(), "the orphaned weak copy should be notified");

    release(&mut store, weak);
}

#[test]
fn strong_copy_of_a_weak_pipeline_pins_the_strong_ancestor() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);
    let weak = copy_weak(&mut store, p, None);
    let strong = copy(&mut store, weak);

    // The strong copy resolves its state through the weak chain, so
    // the first strong ancestor must outlive the caller's own handle.
    release(&mut store, p);
    assert!(store.pipelines.contains_key(p));
    assert_eq!(get_color(&store, strong), Color::WHITE);

    // Destroying the strong copy reverts the promotion and the whole
    // chain above it unwinds.
    release(&mut store, strong);
    assert!(!store.pipelines.contains_key(p));

    release(&mut store, weak);
}

#[test]
fn strong_copy_survives_where_weak_does_not() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    let strong = copy(&mut store, p);
    let weak = copy_weak(&mut store, p, None);

    set_color(&mut store, p, RED);

    assert_eq!(get_color(&store, strong), Color::WHITE);
    release(&mut store, weak);
    release(&mut store, strong);
}

// ============================================================================
// Layers
// ============================================================================

#[test]
fn layers_sort_into_units_by_index() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    set_layer_texture(&mut store, p, 0, Some(TextureRef::new(10, TextureTarget::TwoD)));
    set_layer_texture(&mut store, p, 5, Some(TextureRef::new(11, TextureTarget::TwoD)));
    set_layer_texture(&mut store, p, 2, Some(TextureRef::new(12, TextureTarget::TwoD)));

    assert_eq!(get_n_layers(&store, p), 3);

    let layers = unit_ordered_layers(&mut store, p);
    let indices: Vec<usize> = layers.iter().map(|&l| store.layer(l).index).collect();
    assert_eq!(indices, vec![0, 2, 5]);
    for (unit, &layer) in layers.iter().enumerate() {
        assert_eq!(layer_unit_index(&store, layer), unit);
    }
}

#[test]
fn layer_texture_is_readable_back() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    let tex = TextureRef::new(42, TextureTarget::ThreeD);
    set_layer_texture(&mut store, p, 1, Some(tex));

    assert_eq!(get_layer_texture(&mut store, p, 1), Some(tex));
}

#[test]
fn layer_write_through_copy_leaves_original_untouched() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p1 = copy(&mut store, root);
    set_layer_texture(&mut store, p1, 0, Some(TextureRef::new(7, TextureTarget::TwoD)));

    let p2 = copy(&mut store, p1);
    let matrix = glam::Mat4::from_scale(glam::Vec3::splat(2.0));
    set_layer_matrix(&mut store, p2, 0, matrix);

    assert_eq!(get_layer_matrix(&mut store, p2, 0), matrix);
    assert_eq!(get_layer_matrix(&mut store, p1, 0), glam::Mat4::IDENTITY);
    // The texture is still inherited through the shared ancestry.
    assert_eq!(
        get_layer_texture(&mut store, p2, 0).map(|t| t.handle),
        Some(7)
    );
}

#[test]
fn remove_layer_closes_the_unit_gap() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    for (index, handle) in [(0, 20), (1, 21), (2, 22)] {
        set_layer_texture(&mut store, p, index, Some(TextureRef::new(handle, TextureTarget::TwoD)));
    }

    remove_layer(&mut store, p, 1);

    assert_eq!(get_n_layers(&store, p), 2);
    let layers = unit_ordered_layers(&mut store, p);
    let indices: Vec<usize> = layers.iter().map(|&l| store.layer(l).index).collect();
    assert_eq!(indices, vec![0, 2]);
    for (unit, &layer) in layers.iter().enumerate() {
        assert_eq!(layer_unit_index(&store, layer), unit);
    }
}

#[test]
fn prune_to_n_layers_discards_higher_units() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    for index in 0..3 {
        set_layer_texture(
            &mut store,
            p,
            index,
            Some(TextureRef::new(30 + index as u64, TextureTarget::TwoD)),
        );
    }

    prune_to_n_layers(&mut store, p, 1);

    assert_eq!(get_n_layers(&store, p), 1);
    let layers = unit_ordered_layers(&mut store, p);
    assert_eq!(layers.len(), 1);
    assert_eq!(store.layer(layers[0]).index, 0);
}

// ============================================================================
// Automatic blend enable
// ============================================================================

#[test]
fn opaque_default_needs_no_blending() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);
    assert!(!get_real_blend_enable(&store, p));
}

#[test]
fn translucent_color_enables_blending() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    set_color(&mut store, p, Color::new(1.0, 1.0, 1.0, 0.5));
    assert!(get_real_blend_enable(&store, p));

    set_color(&mut store, p, Color::WHITE);
    assert!(!get_real_blend_enable(&store, p));
}

#[test]
fn explicit_enable_overrides_the_heuristic() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    set_blend_enable(&mut store, p, BlendEnableMode::Enabled);
    assert!(get_real_blend_enable(&store, p));

    set_blend_enable(&mut store, p, BlendEnableMode::Disabled);
    assert!(!get_real_blend_enable(&store, p));
}

#[test]
fn alpha_texture_enables_blending() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    set_layer_texture(&mut store, p, 0, Some(TextureRef::new(1, TextureTarget::TwoD)));
    assert!(get_real_blend_enable(&store, p));

    set_layer_texture(&mut store, p, 0, Some(TextureRef::opaque(2, TextureTarget::TwoD)));
    assert!(!get_real_blend_enable(&store, p));
}

#[test]
fn user_program_enables_blending() {
    let mut store = PipelineStore::default();
    let root = store.default_pipeline;
    let p = copy(&mut store, root);

    set_user_program(&mut store, p, Some(UserProgram::new()));
    assert!(get_real_blend_enable(&store, p));

    set_user_program(&mut store, p, None);
    assert!(!get_real_blend_enable(&store, p));
}
