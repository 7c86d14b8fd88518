//! Owning context tying the pipeline store, driver and program caches
//! together.
//!
//! Most state manipulation lives in free functions over
//! [`PipelineStore`]; the context packages those up with the driver
//! and caches so a program can be generated for a pipeline in one
//! call.

use crate::cache::ProgramCaches;
use crate::codegen::generate_program;
use crate::color::Color;
use crate::driver::{Driver, ProgramHandle};
use crate::errors::Result;
use crate::pipeline::compare::{equal, layer_equal};
use crate::pipeline::core::{self, DestroyCallback};
use crate::pipeline::hash::pipeline_hash;
use crate::pipeline::layer::LayerGroups;
use crate::pipeline::layer_ops::{get_layer_indices, get_layer_sampler};
use crate::pipeline::state::StateGroups;
use crate::pipeline::{LayerId, PipelineId, PipelineStore};
use crate::sampler::SamplerId;

/// Debug switches altering code generation and caching.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextSettings {
    /// Skip the program caches entirely; every authority generates its
    /// own program.
    pub disable_program_caches: bool,
    /// Replace every texture lookup with opaque white.
    pub disable_texturing: bool,
    /// Replace the generated fragment output with a fixed color.
    pub force_constant_color: Option<Color>,
}

/// A pipeline store bundled with the driver and caches needed to turn
/// pipelines into GPU programs.
pub struct PipelineContext<D: Driver> {
    store: PipelineStore,
    driver: D,
    settings: ContextSettings,
    caches: ProgramCaches,
}

impl<D: Driver> PipelineContext<D> {
    #[must_use]
    pub fn new(driver: D) -> Self {
        Self::with_settings(driver, ContextSettings::default())
    }

    #[must_use]
    pub fn with_settings(driver: D, settings: ContextSettings) -> Self {
        let features = driver.features();
        Self {
            store: PipelineStore::new(features),
            driver,
            settings,
            caches: ProgramCaches::new(features),
        }
    }

    #[must_use]
    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PipelineStore {
        &mut self.store
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    #[must_use]
    pub fn settings(&self) -> ContextSettings {
        self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ContextSettings {
        &mut self.settings
    }

    /// The shared immutable default pipeline; copy it to derive usable
    /// pipelines.
    #[must_use]
    pub fn default_pipeline(&self) -> PipelineId {
        self.store.default_pipeline
    }

    /// Derives a fresh mutable pipeline from the default pipeline.
    pub fn new_pipeline(&mut self) -> PipelineId {
        let root = self.store.default_pipeline;
        core::copy(&mut self.store, root)
    }

    pub fn copy(&mut self, src: PipelineId) -> PipelineId {
        core::copy(&mut self.store, src)
    }

    pub fn copy_weak(
        &mut self,
        src: PipelineId,
        destroy_callback: Option<DestroyCallback>,
    ) -> PipelineId {
        core::copy_weak(&mut self.store, src, destroy_callback)
    }

    pub fn retain(&mut self, pipeline: PipelineId) {
        core::retain(&mut self.store, pipeline);
    }

    pub fn release(&mut self, pipeline: PipelineId) {
        core::release(&mut self.store, pipeline);
    }

    /// Semantic equality over the given state masks.
    pub fn pipelines_equal(
        &mut self,
        p0: PipelineId,
        p1: PipelineId,
        differences: StateGroups,
        layer_differences: LayerGroups,
    ) -> bool {
        equal(&mut self.store, p0, p1, differences, layer_differences)
    }

    /// Semantic equality of two layers over the given layer mask.
    pub fn layers_equal(
        &mut self,
        l0: LayerId,
        l1: LayerId,
        layer_differences: LayerGroups,
    ) -> bool {
        layer_equal(&mut self.store, l0, l1, layer_differences)
    }

    /// Semantic hash consistent with [`Self::pipelines_equal`].
    pub fn hash(
        &mut self,
        pipeline: PipelineId,
        differences: StateGroups,
        layer_differences: LayerGroups,
    ) -> u64 {
        pipeline_hash(&mut self.store, pipeline, differences, layer_differences)
    }

    /// Sampler-cache id for one layer's resolved filter and wrap
    /// configuration. Equal configurations get equal ids.
    pub fn layer_sampler(&mut self, pipeline: PipelineId, layer_index: usize) -> SamplerId {
        get_layer_sampler(&mut self.store, pipeline, layer_index)
    }

    /// Number of distinct sampler configurations interned so far.
    #[must_use]
    pub fn sampler_count(&self) -> usize {
        self.store.samplers.len()
    }

    /// Generates (or reuses) the GPU program for `pipeline`, uploading
    /// any stale uniform values through the driver.
    pub fn flush(&mut self, pipeline: PipelineId) -> Result<ProgramHandle> {
        // Sampler state is interned up front, so draw-time binding
        // works from deduplicated entries.
        for index in get_layer_indices(&mut self.store, pipeline) {
            get_layer_sampler(&mut self.store, pipeline, index);
        }
        generate_program(
            &mut self.store,
            &mut self.driver,
            &self.settings,
            &mut self.caches,
            pipeline,
        )
    }

    /// Number of entries currently held by the combined program cache.
    #[must_use]
    pub fn cached_program_count(&self) -> usize {
        self.caches.combined.len()
    }

    /// Number of entries currently held by the fragment program cache.
    #[must_use]
    pub fn cached_fragment_count(&self) -> usize {
        self.caches.fragment.len()
    }

    /// Drops every cache entry, releasing the key pipelines.
    pub fn clear_caches(&mut self) {
        self.caches.clear(&mut self.store);
    }
}
