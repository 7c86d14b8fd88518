//! Program caches keyed by semantic pipeline state.
//!
//! Each table hashes only the state groups that influence the cached
//! artifact, so pipelines differing in irrelevant state (colors, depth
//! configuration and so on) map to the same entry. Keys are strong
//! pipeline copies: a key snapshots the relevant state at insertion
//! time and later mutations of the source pipeline cannot corrupt the
//! table.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::codegen::arbfp::ArbfpProgramState;
use crate::codegen::progend::ProgramState;
use crate::codegen::vertend::VertendShaderState;
use crate::driver::DriverFeatures;
use crate::pipeline::compare::equal;
use crate::pipeline::core::{copy, release};
use crate::pipeline::hash::pipeline_hash;
use crate::pipeline::layer::{
    layer_fragment_codegen_groups, layer_vertex_codegen_groups, LayerGroups,
};
use crate::pipeline::state::{fragment_codegen_groups, vertex_codegen_groups, StateGroups};
use crate::pipeline::{PipelineId, PipelineStore};

struct CacheEntry<T> {
    key: PipelineId,
    value: Rc<RefCell<T>>,
    usage_count: u32,
}

/// Hash table from semantically-relevant pipeline state to a shared
/// value.
pub struct PipelineHashTable<T> {
    entries: FxHashMap<u64, SmallVec<[CacheEntry<T>; 1]>>,
    pipeline_mask: StateGroups,
    layer_mask: LayerGroups,
    n_entries: usize,
    /// Entries are pruned once the table outgrows this; the threshold
    /// then tracks twice the live working set.
    prune_threshold: usize,
    warned_about_size: bool,
    name: &'static str,
}

impl<T> PipelineHashTable<T> {
    #[must_use]
    pub fn new(pipeline_mask: StateGroups, layer_mask: LayerGroups, name: &'static str) -> Self {
        Self {
            entries: FxHashMap::default(),
            pipeline_mask,
            layer_mask,
            n_entries: 0,
            prune_threshold: 8,
            warned_about_size: false,
            name,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.n_entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_entries == 0
    }

    /// Looks up the entry whose key matches `pipeline` over this
    /// table's state masks.
    pub fn lookup(
        &mut self,
        store: &mut PipelineStore,
        pipeline: PipelineId,
    ) -> Option<Rc<RefCell<T>>> {
        let hash = pipeline_hash(store, pipeline, self.pipeline_mask, self.layer_mask);
        let bucket = self.entries.get_mut(&hash)?;
        for entry in bucket.iter_mut() {
            if equal(store, entry.key, pipeline, self.pipeline_mask, self.layer_mask) {
                entry.usage_count += 1;
                return Some(Rc::clone(&entry.value));
            }
        }
        None
    }

    /// Inserts `value` keyed by a strong copy of `pipeline`.
    pub fn insert(
        &mut self,
        store: &mut PipelineStore,
        pipeline: PipelineId,
        value: Rc<RefCell<T>>,
    ) {
        let hash = pipeline_hash(store, pipeline, self.pipeline_mask, self.layer_mask);
        let key = copy(store, pipeline);
        self.entries.entry(hash).or_default().push(CacheEntry {
            key,
            value,
            usage_count: 1,
        });
        self.n_entries += 1;

        if self.n_entries > 50 && !self.warned_about_size {
            self.warned_about_size = true;
            log::warn!(
                "over 50 separate {} entries generated, which is very \
                 unusual, so something is probably wrong",
                self.name
            );
        }

        if self.n_entries > self.prune_threshold {
            self.prune(store);
        }
    }

    /// Drops every entry not used since the previous prune and resets
    /// the usage counts of the survivors.
    fn prune(&mut self, store: &mut PipelineStore) {
        let mut live = 0;
        self.entries.retain(|_, bucket| {
            bucket.retain(|entry| {
                if entry.usage_count == 0 {
                    release(store, entry.key);
                    false
                } else {
                    entry.usage_count = 0;
                    live += 1;
                    true
                }
            });
            !bucket.is_empty()
        });
        self.n_entries = live;
        self.prune_threshold = usize::max(8, live * 2);
        log::debug!("pruned {} cache down to {live} entries", self.name);
    }

    /// Releases every key, emptying the table.
    pub fn clear(&mut self, store: &mut PipelineStore) {
        for (_, bucket) in self.entries.drain() {
            for entry in bucket {
                release(store, entry.key);
            }
        }
        self.n_entries = 0;
    }
}

// ─── Program caches ──────────────────────────────────────────────────────────

/// The three cache tables used by the shader backends.
pub struct ProgramCaches {
    pub vertex: PipelineHashTable<VertendShaderState>,
    pub fragment: PipelineHashTable<ArbfpProgramState>,
    pub combined: PipelineHashTable<ProgramState>,
}

impl ProgramCaches {
    #[must_use]
    pub fn new(features: DriverFeatures) -> Self {
        let frag_groups = fragment_codegen_groups(features);
        let vert_groups = vertex_codegen_groups(features);
        let layer_frag = layer_fragment_codegen_groups(features);
        let layer_vert = layer_vertex_codegen_groups(features);
        Self {
            vertex: PipelineHashTable::new(vert_groups, layer_vert, "vertex shaders"),
            fragment: PipelineHashTable::new(frag_groups, layer_frag, "fragment programs"),
            combined: PipelineHashTable::new(
                frag_groups | vert_groups,
                layer_frag | layer_vert,
                "programs",
            ),
        }
    }

    pub fn clear(&mut self, store: &mut PipelineStore) {
        self.vertex.clear(store);
        self.fragment.clear(store);
        self.combined.clear(store);
    }
}
