//! Copy-on-write engine for the pipeline tree.
//!
//! Every mutation funnels through [`pre_change_notify`], which keeps
//! three promises:
//!
//! * descendants never observe an ancestor's mutation (the ancestor's
//!   state is first pushed down into a freshly inserted authority),
//! * weak copies are destroyed as soon as anything they depend on
//!   changes, and
//! * generated shader and program state attached to the node is
//!   invalidated exactly when a group it depends on changes.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::codegen::arbfp::ArbfpProgramState;
use crate::codegen::glsl::GlslShaderState;
use crate::codegen::progend::{BuiltinUniforms, ProgramState};
use crate::codegen::vertend::VertendShaderState;
use crate::codegen::FragendKind;
use crate::color::Color;
use crate::node::{self, GraphNode, Node};

use super::layer::{self, CombineFunc, CombineOp, CombineSource, LayerGroups};
use super::state::{BigState, BlendEnableMode, StateGroups, N_SPARSE_GROUPS};
use super::{LayerId, PipelineId, PipelineStore};

/// Callback invoked when a weak copy is destroyed by a dependency
/// change.
pub type DestroyCallback = Box<dyn FnMut(PipelineId)>;

/// One node in the pipeline tree.
pub struct Pipeline {
    pub node: Node<PipelineId>,
    /// Weak copies are torn down when any ancestor mutates instead of
    /// forcing the ancestor to insert a new authority.
    pub is_weak: bool,
    pub destroy_callback: Option<DestroyCallback>,

    /// Groups this node is the authority for.
    pub differences: StateGroups,
    /// Derived blend decision; non-sparse, valid on every node.
    pub real_blend_enable: bool,
    /// Bumped on every mutation; cheap staleness check for external
    /// associations.
    pub age: u64,

    pub color: Color,
    pub blend_enable: BlendEnableMode,
    pub n_layers: usize,
    /// Layers this node owns, unordered.
    pub layer_differences: Vec<LayerId>,
    pub big_state: Option<Box<BigState>>,

    /// Unit-ordered layer lookup, rebuilt lazily.
    pub layers_cache: SmallVec<[Option<LayerId>; 4]>,
    pub layers_cache_dirty: bool,

    /// Which fragment backend last accepted this pipeline.
    pub fragend: Option<FragendKind>,
    pub glsl_frag_state: Option<Rc<RefCell<GlslShaderState>>>,
    pub vertend_state: Option<Rc<RefCell<VertendShaderState>>>,
    pub arbfp_state: Option<Rc<RefCell<ArbfpProgramState>>>,
    pub program_state: Option<Rc<RefCell<ProgramState>>>,

    /// Optional debug label.
    pub label: Option<&'static str>,
}

impl Pipeline {
    /// The immutable root: authority for every sparse group.
    #[must_use]
    pub fn root() -> Self {
        Self {
            node: Node::new(),
            is_weak: false,
            destroy_callback: None,
            differences: StateGroups::ALL_SPARSE,
            real_blend_enable: false,
            age: 0,
            color: Color::WHITE,
            blend_enable: BlendEnableMode::Automatic,
            n_layers: 0,
            layer_differences: Vec::new(),
            big_state: Some(Box::default()),
            layers_cache: SmallVec::new(),
            layers_cache_dirty: true,
            fragend: None,
            glsl_frag_state: None,
            vertend_state: None,
            arbfp_state: None,
            program_state: None,
            label: None,
        }
    }

    #[must_use]
    pub fn big(&self) -> &BigState {
        self.big_state.as_ref().expect("big state allocated")
    }

    pub fn big_mut(&mut self) -> &mut BigState {
        self.big_state.get_or_insert_with(Box::default)
    }
}

impl GraphNode<PipelineId> for Pipeline {
    fn node(&self) -> &Node<PipelineId> {
        &self.node
    }

    fn node_mut(&mut self) -> &mut Node<PipelineId> {
        &mut self.node
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

/// Derives a new pipeline from `src`. The copy starts with no
/// differences of its own; all state resolves through `src`.
pub fn copy(store: &mut PipelineStore, src: PipelineId) -> PipelineId {
    copy_internal(store, src, false, None)
}

/// Derives a weak copy: it never forces `src` to insert a new
/// authority when mutated, and it does not keep `src` alive. When
/// `src` changes or dies the copy is destroyed and `destroy_callback`
/// is invoked. The caller must still release the returned handle
/// afterwards.
pub fn copy_weak(
    store: &mut PipelineStore,
    src: PipelineId,
    destroy_callback: Option<DestroyCallback>,
) -> PipelineId {
    copy_internal(store, src, true, destroy_callback)
}

fn copy_internal(
    store: &mut PipelineStore,
    src: PipelineId,
    is_weak: bool,
    destroy_callback: Option<DestroyCallback>,
) -> PipelineId {
    let (real_blend_enable, fragend) = {
        let s = &store.pipelines[src];
        (s.real_blend_enable, s.fragend)
    };

    let id = store.pipelines.insert(Pipeline {
        node: Node::new(),
        is_weak,
        destroy_callback,
        differences: StateGroups::empty(),
        real_blend_enable,
        age: 0,
        color: Color::WHITE,
        blend_enable: BlendEnableMode::Automatic,
        n_layers: 0,
        layer_differences: Vec::new(),
        big_state: None,
        layers_cache: SmallVec::new(),
        layers_cache_dirty: true,
        fragend,
        glsl_frag_state: None,
        vertend_state: None,
        arbfp_state: None,
        program_state: None,
        label: None,
    });

    // Weak copies link without a reference so they never pin `src`.
    node::set_parent(&mut store.pipelines, id, src, !is_weak);
    if !is_weak {
        promote_weak_ancestors(store, id);
    }
    id
}

/// A strong pipeline hanging off a weak one must keep the state the
/// weak chain resolves through alive: walk past the weak ancestors and
/// take a reference on the first strong one.
fn promote_weak_ancestors(store: &mut PipelineStore, pipeline: PipelineId) {
    if let Some(ancestor) = strong_ancestor_past_weak(store, pipeline) {
        store.pipelines[ancestor].node.ref_count += 1;
    }
}

fn revert_weak_ancestors(store: &mut PipelineStore, pipeline: PipelineId) {
    if let Some(ancestor) = strong_ancestor_past_weak(store, pipeline) {
        release(store, ancestor);
    }
}

/// First non-weak ancestor, and only when at least one weak ancestor
/// sits in between.
fn strong_ancestor_past_weak(store: &PipelineStore, pipeline: PipelineId) -> Option<PipelineId> {
    let mut current = store.pipelines[pipeline].node.parent?;
    if !store.pipelines[current].is_weak {
        return None;
    }
    while store.pipelines[current].is_weak {
        current = store.pipelines[current].node.parent?;
    }
    Some(current)
}

/// Takes an extra reference on `id`.
pub fn retain(store: &mut PipelineStore, id: PipelineId) {
    store.pipelines[id].node.ref_count += 1;
}

/// Drops a reference; destroys the pipeline when it was the last one.
pub fn release(store: &mut PipelineStore, id: PipelineId) {
    if node::release_ref(&mut store.pipelines, id) {
        destroy(store, id);
    }
}

fn destroy(store: &mut PipelineStore, id: PipelineId) {
    // Strong children hold references, so only weak children can still
    // be attached here; they die with their source.
    destroy_weak_children(store, id);
    debug_assert!(!store.pipelines[id].node.has_children());

    if !store.pipelines[id].is_weak {
        revert_weak_ancestors(store, id);
    }

    let layers = std::mem::take(&mut store.pipelines[id].layer_differences);
    for layer in layers {
        store.layers[layer].owner = None;
        release_layer(store, layer);
    }

    let parent = node::detach(&mut store.pipelines, id);
    store.pipelines.remove(id);
    if let Some(parent) = parent {
        release(store, parent);
    }
}

/// Drops a layer reference; destroys the layer when it was the last.
pub fn release_layer(store: &mut PipelineStore, id: LayerId) {
    if node::release_ref(&mut store.layers, id) {
        debug_assert!(!store.layers[id].node.has_children());
        let parent = node::detach(&mut store.layers, id);
        store.layers.remove(id);
        if let Some(parent) = parent {
            release_layer(store, parent);
        }
    }
}

// ─── Authority resolution ────────────────────────────────────────────────────

/// Resolves the authorities for every group in `mask` with a single
/// ancestry walk. Entries for groups outside `mask` stay `None`.
pub fn resolve_authorities(
    store: &PipelineStore,
    pipeline: PipelineId,
    mask: StateGroups,
    authorities: &mut [Option<PipelineId>; N_SPARSE_GROUPS],
) {
    let mut remaining = mask & StateGroups::ALL_SPARSE;
    let mut current = pipeline;
    loop {
        let p = &store.pipelines[current];
        let found = p.differences & remaining;
        if !found.is_empty() {
            for group in found.iter() {
                authorities[group.index()] = Some(current);
            }
            remaining &= !found;
            if remaining.is_empty() {
                return;
            }
        }
        match p.node.parent {
            Some(parent) => current = parent,
            None => {
                for group in remaining.iter() {
                    authorities[group.index()] = Some(current);
                }
                return;
            }
        }
    }
}

/// Resolved user program, if any ancestor set one.
#[must_use]
pub fn user_program(store: &PipelineStore, pipeline: PipelineId) -> Option<super::state::UserProgram> {
    let authority = store.authority(pipeline, StateGroups::USER_SHADER);
    store.pipelines[authority]
        .big_state
        .as_ref()
        .and_then(|b| b.user_program.clone())
}

// ─── Mutation protocol ───────────────────────────────────────────────────────

/// Prepares `pipeline` for a mutation of the groups in `change`.
///
/// `from_layer_change` is set when the mutation originates from a
/// layer property write; the shader backends are then notified through
/// the layer hooks instead.
pub fn pre_change_notify(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    change: StateGroups,
    from_layer_change: bool,
) {
    if !from_layer_change {
        invalidate_backend_state(store, pipeline, change);
    }

    destroy_weak_children(store, pipeline);

    // Any remaining children are strong and must not observe the
    // mutation: push this node's state down into a new authority and
    // move the children there. The mutated node keeps its identity.
    if store.pipelines[pipeline].node.has_children() {
        let parent = store.pipelines[pipeline]
            .node
            .parent
            .expect("the default pipeline is never mutated");
        let new_authority = copy(store, parent);
        let differences = store.pipelines[pipeline].differences;
        copy_differences(store, new_authority, pipeline, differences);

        let children: SmallVec<[PipelineId; 4]> =
            store.pipelines[pipeline].node.children.clone();
        for child in children {
            let old = node::set_parent(&mut store.pipelines, child, new_authority, true)
                .expect("strong child held a parent reference");
            release(store, old);
        }
        // The children now keep the new authority alive.
        release(store, new_authority);
    }

    store.pipelines[pipeline].age += 1;

    if change.intersects(StateGroups::NEEDS_BIG_STATE)
        && store.pipelines[pipeline].big_state.is_none()
    {
        store.pipelines[pipeline].big_state = Some(Box::default());
    }

    // Becoming the authority for a multi-property group means taking a
    // full copy of the group value first, so untouched properties keep
    // their inherited values.
    if change.intersects(StateGroups::MULTI_PROPERTY)
        && !store.pipelines[pipeline].differences.intersects(change)
    {
        init_multi_property_sparse_state(store, pipeline, change);
        store.pipelines[pipeline].differences |= change & StateGroups::MULTI_PROPERTY;
    }

    if change.contains(StateGroups::LAYERS) {
        recursively_free_layer_caches(store, pipeline);
    }
}

fn invalidate_backend_state(store: &mut PipelineStore, pipeline: PipelineId, change: StateGroups) {
    let fragment_groups = super::state::fragment_codegen_groups(store.features);
    let vertex_groups = super::state::vertex_codegen_groups(store.features);

    let p = &mut store.pipelines[pipeline];
    if change.intersects(fragment_groups) {
        p.glsl_frag_state = None;
        p.arbfp_state = None;
        p.fragend = None;
    }
    if change.intersects(vertex_groups) {
        p.vertend_state = None;
    }

    if change.intersects(fragment_groups | vertex_groups) {
        p.program_state = None;
    } else if let Some(program_state) = &p.program_state {
        let mut ps = program_state.borrow_mut();
        if change.intersects(StateGroups::POINT_SIZE) {
            ps.dirty_builtin_uniforms |= BuiltinUniforms::POINT_SIZE;
        }
        if change.intersects(StateGroups::ALPHA_FUNC_REFERENCE) {
            ps.dirty_builtin_uniforms |= BuiltinUniforms::ALPHA_TEST_REF;
        }
    }
}

fn destroy_weak_children(store: &mut PipelineStore, pipeline: PipelineId) {
    let children: SmallVec<[PipelineId; 4]> = store.pipelines[pipeline].node.children.clone();
    for child in children {
        if !store.pipelines[child].is_weak {
            continue;
        }
        destroy_weak_children(store, child);
        if let Some(mut cb) = store.pipelines[child].destroy_callback.take() {
            cb(child);
        }
        // Weak links are uncounted, so detaching releases nothing.
        node::detach(&mut store.pipelines, child);
    }
}

fn init_multi_property_sparse_state(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    change: StateGroups,
) {
    let groups = change & StateGroups::MULTI_PROPERTY & !store.pipelines[pipeline].differences;

    for group in groups.iter() {
        let authority = store.authority(pipeline, group);
        debug_assert_ne!(authority, pipeline);
        match group {
            StateGroups::LAYERS => {
                let n_layers = store.pipelines[authority].n_layers;
                let p = &mut store.pipelines[pipeline];
                p.n_layers = n_layers;
                debug_assert!(p.layer_differences.is_empty());
            }
            StateGroups::LIGHTING => {
                let v = store.pipelines[authority].big().lighting;
                store.pipelines[pipeline].big_mut().lighting = v;
            }
            StateGroups::BLEND => {
                let v = store.pipelines[authority].big().blend;
                store.pipelines[pipeline].big_mut().blend = v;
            }
            StateGroups::DEPTH => {
                let v = store.pipelines[authority].big().depth;
                store.pipelines[pipeline].big_mut().depth = v;
            }
            StateGroups::FOG => {
                let v = store.pipelines[authority].big().fog;
                store.pipelines[pipeline].big_mut().fog = v;
            }
            StateGroups::LOGIC_OPS => {
                let v = store.pipelines[authority].big().logic_ops;
                store.pipelines[pipeline].big_mut().logic_ops = v;
            }
            StateGroups::UNIFORMS => {
                let v = store.pipelines[authority].big().uniform_overrides.clone();
                store.pipelines[pipeline].big_mut().uniform_overrides = v;
            }
            StateGroups::VERTEX_SNIPPETS => {
                let v = store.pipelines[authority].big().vertex_snippets.clone();
                store.pipelines[pipeline].big_mut().vertex_snippets = v;
            }
            StateGroups::FRAGMENT_SNIPPETS => {
                let v = store.pipelines[authority].big().fragment_snippets.clone();
                store.pipelines[pipeline].big_mut().fragment_snippets = v;
            }
            _ => unreachable!("multi-property group"),
        }
    }
}

/// Copies the group values named by `differences` from `src` into
/// `dest` and marks `dest` as their authority. `src` must be the
/// authority for every group in `differences`.
pub fn copy_differences(
    store: &mut PipelineStore,
    dest: PipelineId,
    src: PipelineId,
    differences: StateGroups,
) {
    let sparse = differences & StateGroups::ALL_SPARSE;

    if sparse.intersects(StateGroups::NEEDS_BIG_STATE)
        && store.pipelines[dest].big_state.is_none()
    {
        store.pipelines[dest].big_state = Some(Box::default());
    }

    for group in sparse.iter() {
        match group {
            StateGroups::COLOR => {
                store.pipelines[dest].color = store.pipelines[src].color;
            }
            StateGroups::BLEND_ENABLE => {
                store.pipelines[dest].blend_enable = store.pipelines[src].blend_enable;
            }
            StateGroups::LAYERS => {
                let old: Vec<LayerId> = std::mem::take(&mut store.pipelines[dest].layer_differences);
                for layer in old {
                    store.layers[layer].owner = None;
                    release_layer(store, layer);
                }
                let src_layers: SmallVec<[LayerId; 4]> =
                    store.pipelines[src].layer_differences.iter().copied().collect();
                for layer in src_layers {
                    // A layer has at most one owner, so dest gets its
                    // own derived copies.
                    let dup = layer_copy(store, layer);
                    add_layer_difference(store, dest, dup, false);
                }
                // After, so the layer additions do not disturb it.
                store.pipelines[dest].n_layers = store.pipelines[src].n_layers;
            }
            StateGroups::LIGHTING => {
                let v = store.pipelines[src].big().lighting;
                store.pipelines[dest].big_mut().lighting = v;
            }
            StateGroups::ALPHA_FUNC => {
                let v = store.pipelines[src].big().alpha_func;
                store.pipelines[dest].big_mut().alpha_func = v;
            }
            StateGroups::ALPHA_FUNC_REFERENCE => {
                let v = store.pipelines[src].big().alpha_func_reference;
                store.pipelines[dest].big_mut().alpha_func_reference = v;
            }
            StateGroups::BLEND => {
                let v = store.pipelines[src].big().blend;
                store.pipelines[dest].big_mut().blend = v;
            }
            StateGroups::USER_SHADER => {
                let v = store.pipelines[src].big().user_program.clone();
                store.pipelines[dest].big_mut().user_program = v;
            }
            StateGroups::DEPTH => {
                let v = store.pipelines[src].big().depth;
                store.pipelines[dest].big_mut().depth = v;
            }
            StateGroups::FOG => {
                let v = store.pipelines[src].big().fog;
                store.pipelines[dest].big_mut().fog = v;
            }
            StateGroups::POINT_SIZE => {
                let v = store.pipelines[src].big().point_size;
                store.pipelines[dest].big_mut().point_size = v;
            }
            StateGroups::LOGIC_OPS => {
                let v = store.pipelines[src].big().logic_ops;
                store.pipelines[dest].big_mut().logic_ops = v;
            }
            StateGroups::UNIFORMS => {
                let v = store.pipelines[src].big().uniform_overrides.clone();
                store.pipelines[dest].big_mut().uniform_overrides = v;
            }
            StateGroups::VERTEX_SNIPPETS => {
                let v = store.pipelines[src].big().vertex_snippets.clone();
                store.pipelines[dest].big_mut().vertex_snippets = v;
            }
            StateGroups::FRAGMENT_SNIPPETS => {
                let v = store.pipelines[src].big().fragment_snippets.clone();
                store.pipelines[dest].big_mut().fragment_snippets = v;
            }
            _ => unreachable!("sparse group"),
        }
    }

    store.pipelines[dest].differences |= sparse;

    if sparse.intersects(StateGroups::AFFECTS_BLENDING) {
        handle_automatic_blend_enable(store, dest, sparse);
    }
}

// ─── Layer ownership ─────────────────────────────────────────────────────────

/// Derives a copy of `src` with no differences of its own.
pub fn layer_copy(store: &mut PipelineStore, src: LayerId) -> LayerId {
    let index = store.layers[src].index;
    let id = store.layers.insert(super::layer::Layer {
        node: Node::new(),
        owner: None,
        index,
        differences: LayerGroups::empty(),
        unit_index: 0,
        texture: None,
        target: crate::sampler::TextureTarget::TwoD,
        sampler: crate::sampler::SamplerState::default(),
        big_state: None,
    });
    node::set_parent(&mut store.layers, id, src, true);
    id
}

/// Registers `layer` as a difference of `pipeline`, transferring the
/// caller's layer reference to the pipeline.
pub fn add_layer_difference(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer: LayerId,
    inc_n_layers: bool,
) {
    debug_assert!(store.layers[layer].owner.is_none());
    store.layers[layer].owner = Some(pipeline);

    // Structural layer additions count as a pipeline-level change; pure
    // layer-property changes notify the backends via the layer hooks.
    pre_change_notify(store, pipeline, StateGroups::LAYERS, !inc_n_layers);

    let p = &mut store.pipelines[pipeline];
    p.differences |= StateGroups::LAYERS;
    p.layer_differences.push(layer);
    if inc_n_layers {
        p.n_layers += 1;
    }
}

/// Unregisters `layer` from `pipeline` and drops the pipeline's layer
/// reference.
pub fn remove_layer_difference(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    layer: LayerId,
    dec_n_layers: bool,
) {
    pre_change_notify(store, pipeline, StateGroups::LAYERS, !dec_n_layers);

    // The layer may be inherited, in which case there is no local
    // difference to unlink.
    let owned = store.layers[layer].owner == Some(pipeline);
    if owned {
        store.layers[layer].owner = None;
        let p = &mut store.pipelines[pipeline];
        if let Some(pos) = p.layer_differences.iter().position(|&l| l == layer) {
            p.layer_differences.swap_remove(pos);
        }
    }

    let p = &mut store.pipelines[pipeline];
    p.differences |= StateGroups::LAYERS;
    if dec_n_layers {
        p.n_layers -= 1;
    }

    if owned {
        release_layer(store, layer);
    }
}

// ─── Ancestry pruning ────────────────────────────────────────────────────────

/// Skips over ancestors whose every difference this pipeline overrides
/// anyway, reparenting onto the first ancestor that still contributes
/// state.
pub fn prune_redundant_ancestry(store: &mut PipelineStore, pipeline: PipelineId) {
    let differences = store.pipelines[pipeline].differences;

    // A layers authority that still inherits some of its layers must
    // keep its ancestry intact.
    if differences.contains(StateGroups::LAYERS) {
        let p = &store.pipelines[pipeline];
        if p.n_layers != p.layer_differences.len() {
            return;
        }
    }

    let Some(mut new_parent) = store.pipelines[pipeline].node.parent else {
        return;
    };
    loop {
        let np = &store.pipelines[new_parent];
        let Some(grandparent) = np.node.parent else { break };
        if (np.differences | differences) != differences {
            break;
        }
        new_parent = grandparent;
    }

    if Some(new_parent) != store.pipelines[pipeline].node.parent {
        let take_ref = store.pipelines[pipeline].node.has_parent_ref;
        if let Some(old) = node::set_parent(&mut store.pipelines, pipeline, new_parent, take_ref) {
            release(store, old);
        }
    }
}

/// Settles the authority bit after a setter wrote a new value.
///
/// When the write made the pipeline redundant with the next authority
/// up the chain the bit is cleared; when the pipeline just became an
/// authority the ancestry is pruned.
pub fn update_authority(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    authority: PipelineId,
    group: StateGroups,
    values_equal: impl Fn(&PipelineStore, PipelineId, PipelineId) -> bool,
) {
    if pipeline == authority {
        if let Some(parent) = store.pipelines[pipeline].node.parent {
            let old_authority = store.authority(parent, group);
            if values_equal(&*store, authority, old_authority) {
                store.pipelines[pipeline].differences &= !group;
            }
        }
    } else {
        store.pipelines[pipeline].differences |= group;
        prune_redundant_ancestry(store, pipeline);
    }
}

// ─── Layers cache ────────────────────────────────────────────────────────────

fn recursively_free_layer_caches(store: &mut PipelineStore, pipeline: PipelineId) {
    if store.pipelines[pipeline].layers_cache_dirty {
        return;
    }
    store.pipelines[pipeline].layers_cache_dirty = true;
    store.pipelines[pipeline].layers_cache.clear();

    let children: SmallVec<[PipelineId; 4]> = store.pipelines[pipeline].node.children.clone();
    for child in children {
        recursively_free_layer_caches(store, child);
    }
}

fn update_layers_cache(store: &mut PipelineStore, authority: PipelineId) {
    let n_layers = store.pipelines[authority].n_layers;
    if !store.pipelines[authority].layers_cache_dirty || n_layers == 0 {
        return;
    }
    store.pipelines[authority].layers_cache_dirty = false;

    let mut cache: SmallVec<[Option<LayerId>; 4]> = SmallVec::new();
    cache.resize(n_layers, None);

    // layer_differences only lists layers changed relative to the
    // parent; the rest are found through the ancestry. The first layer
    // seen for a unit wins; ancestors may also reference stale units
    // >= n_layers which are ignored.
    let mut layers_found = 0;
    let mut current = Some(authority);
    'walk: while let Some(node_id) = current {
        let p = &store.pipelines[node_id];
        if p.differences.contains(StateGroups::LAYERS) {
            let layer_ids: SmallVec<[LayerId; 4]> = p.layer_differences.iter().copied().collect();
            for layer in layer_ids {
                let unit_index = layer::layer_unit_index(store, layer);
                if unit_index < n_layers && cache[unit_index].is_none() {
                    cache[unit_index] = Some(layer);
                    layers_found += 1;
                    if layers_found == n_layers {
                        break 'walk;
                    }
                }
            }
        }
        current = store.pipelines[node_id].node.parent;
    }
    debug_assert_eq!(layers_found, n_layers);

    store.pipelines[authority].layers_cache = cache;
}

/// Layers of `pipeline` in texture-unit order.
pub fn unit_ordered_layers(
    store: &mut PipelineStore,
    pipeline: PipelineId,
) -> SmallVec<[LayerId; 4]> {
    let authority = store.authority(pipeline, StateGroups::LAYERS);
    if store.pipelines[authority].n_layers == 0 {
        return SmallVec::new();
    }
    update_layers_cache(store, authority);
    store.pipelines[authority]
        .layers_cache
        .iter()
        .map(|slot| slot.expect("layers cache complete"))
        .collect()
}

// ─── Automatic blend enable ──────────────────────────────────────────────────

/// Re-derives `real_blend_enable` after the groups in `changes` were
/// touched, recording the transition as its own (non-sparse) change.
pub fn handle_automatic_blend_enable(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    changes: StateGroups,
) {
    let blend_enable = needs_blending_enabled(store, pipeline, changes, None);
    if store.pipelines[pipeline].real_blend_enable != blend_enable {
        pre_change_notify(store, pipeline, StateGroups::REAL_BLEND_ENABLE, false);
        store.pipelines[pipeline].real_blend_enable = blend_enable;
    }
}

/// Decides whether drawing with `pipeline` needs blending, looking
/// only at the groups in `changes` unless blending was previously on.
pub fn needs_blending_enabled(
    store: &mut PipelineStore,
    pipeline: PipelineId,
    changes: StateGroups,
    override_color: Option<&Color>,
) -> bool {
    let enable_authority = store.authority(pipeline, StateGroups::BLEND_ENABLE);
    match store.pipelines[enable_authority].blend_enable {
        BlendEnableMode::Enabled => return true,
        BlendEnableMode::Disabled => return false,
        BlendEnableMode::Automatic => {}
    }

    let blend_authority = store.authority(pipeline, StateGroups::BLEND);
    let blend = store.pipelines[blend_authority].big().blend;

    // Anything but premultiplied-over needs real blending regardless
    // of fragment alpha.
    if !blend.is_default_over() {
        return true;
    }

    // From here on it is a hunt for any alpha < 1. A layers change can
    // shift the alpha seen by later layers, so it widens to everything.
    let mut changes = changes;
    if changes.contains(StateGroups::LAYERS) {
        changes = StateGroups::AFFECTS_BLENDING;
    }

    if let Some(color) = override_color {
        if !color.is_opaque() {
            return true;
        }
    }

    if changes.contains(StateGroups::COLOR) {
        let color_authority = store.authority(pipeline, StateGroups::COLOR);
        if !store.pipelines[color_authority].color.is_opaque() {
            return true;
        }
    }

    // No assumptions can be made about a replacement fragment shader.
    if changes.contains(StateGroups::USER_SHADER) && user_program(store, pipeline).is_some() {
        return true;
    }

    // Snippets can write arbitrary alpha values.
    if changes.intersects(StateGroups::VERTEX_SNIPPETS | StateGroups::FRAGMENT_SNIPPETS) {
        let vertex_authority = store.authority(pipeline, StateGroups::VERTEX_SNIPPETS);
        let fragment_authority = store.authority(pipeline, StateGroups::FRAGMENT_SNIPPETS);
        if !store.pipelines[vertex_authority].big().vertex_snippets.is_empty()
            || !store.pipelines[fragment_authority]
                .big()
                .fragment_snippets
                .is_empty()
        {
            return true;
        }
    }

    if changes.contains(StateGroups::LAYERS) && any_layer_produces_alpha(store, pipeline) {
        return true;
    }

    // Blending may have been enabled by state outside `changes`.
    if store.pipelines[pipeline].real_blend_enable {
        let other = StateGroups::AFFECTS_BLENDING & !changes;
        if !other.is_empty() && needs_blending_enabled(store, pipeline, other, None) {
            return true;
        }
    }

    false
}

fn any_layer_produces_alpha(store: &mut PipelineStore, pipeline: PipelineId) -> bool {
    let layers = unit_ordered_layers(store, pipeline);
    for layer_id in layers {
        let combine_authority =
            layer::layer_authority(store, layer_id, LayerGroups::COMBINE);
        let big = store.layers[combine_authority].big();

        // Only the default modulate(previous.a, texture.a) chain can be
        // reasoned about; any custom combine is assumed translucent.
        if big.alpha_func != CombineFunc::Modulate
            || big.alpha_srcs[0] != CombineSource::Previous
            || big.alpha_ops[0] != CombineOp::SrcAlpha
            || big.alpha_srcs[1] != CombineSource::Texture
            || big.alpha_ops[1] != CombineOp::SrcAlpha
        {
            return true;
        }

        let texture_authority =
            layer::layer_authority(store, layer_id, LayerGroups::TEXTURE_DATA);
        if let Some(texture) = store.layers[texture_authority].texture {
            if texture.has_alpha {
                return true;
            }
        }
        // An absent texture samples as opaque white.
    }
    false
}
