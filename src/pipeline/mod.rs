//! Copy-on-write pipeline state graph.
//!
//! Pipelines and layers live in slotmap arenas owned by a
//! [`PipelineStore`]. Every graph algorithm takes the store explicitly
//! so callers can split-borrow it alongside program caches and the
//! driver.

pub mod compare;
pub mod core;
pub mod hash;
pub mod layer;
pub mod layer_ops;
pub mod ops;
pub mod state;

use slotmap::{SlotMap, new_key_type};

use crate::driver::DriverFeatures;
use crate::node::Node;
use crate::sampler::SamplerCache;

use self::core::Pipeline;
use self::layer::Layer;
use self::state::StateGroups;

new_key_type! {
    /// Handle to a pipeline node.
    pub struct PipelineId;
    /// Handle to a layer node.
    pub struct LayerId;
}

/// Arena holding both state trees plus the well-known roots.
pub struct PipelineStore {
    pub pipelines: SlotMap<PipelineId, Pipeline>,
    pub layers: SlotMap<LayerId, Layer>,
    /// Root of the pipeline tree; authority for every group.
    pub default_pipeline: PipelineId,
    /// Root of the layer tree; also the template for unit-0 layers.
    pub default_layer_0: LayerId,
    /// Template for layers on units above zero.
    pub default_layer_n: LayerId,
    /// Interned sampler configurations, deduplicated by value.
    pub samplers: SamplerCache,
    /// Driver capabilities, fixed for the store's lifetime. They decide
    /// which state groups invalidate generated shaders.
    pub features: DriverFeatures,
}

impl PipelineStore {
    #[must_use]
    pub fn new(features: DriverFeatures) -> Self {
        let mut pipelines = SlotMap::with_key();
        let mut layers = SlotMap::with_key();

        let default_pipeline = pipelines.insert(Pipeline::root());

        let default_layer_0 = layers.insert(Layer::root());
        let default_layer_n = layers.insert(Layer::root());

        let mut store = Self {
            pipelines,
            layers,
            default_pipeline,
            default_layer_0,
            default_layer_n,
            samplers: SamplerCache::new(),
            features,
        };

        // default_layer_n derives from default_layer_0 with no unit of
        // its own; get_layer assigns the unit when it instantiates one.
        {
            let layer_n = &mut store.layers[default_layer_n];
            layer_n.differences = layer::LayerGroups::empty();
            layer_n.big_state = None;
            layer_n.node = Node::new();
        }
        crate::node::set_parent(&mut store.layers, default_layer_n, default_layer_0, true);

        store
    }

    #[must_use]
    pub fn pipeline(&self, id: PipelineId) -> &Pipeline {
        &self.pipelines[id]
    }

    pub fn pipeline_mut(&mut self, id: PipelineId) -> &mut Pipeline {
        &mut self.pipelines[id]
    }

    #[must_use]
    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id]
    }

    /// Parent pipeline, if `id` is not the root.
    #[must_use]
    pub fn parent_of(&self, id: PipelineId) -> Option<PipelineId> {
        self.pipelines[id].node.parent
    }

    /// Nearest ancestor (or `id` itself) owning `group`.
    #[must_use]
    pub fn authority(&self, id: PipelineId, group: StateGroups) -> PipelineId {
        let mut current = id;
        loop {
            let p = &self.pipelines[current];
            if p.differences.intersects(group) {
                return current;
            }
            match p.node.parent {
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }
}

impl Default for PipelineStore {
    fn default() -> Self {
        Self::new(DriverFeatures::GLSL)
    }
}
