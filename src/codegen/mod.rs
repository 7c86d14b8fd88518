//! Shader program generation from pipeline state.
//!
//! Two fragment backends are tried in order: the high-level GLSL
//! generator and the assembly program generator. The first whose
//! `start` accepts the pipeline wins and is remembered on the node.
//! The GLSL path additionally runs the vertex generator and the
//! program linker; the assembly path produces a complete program by
//! itself.

pub mod arbfp;
pub mod glsl;
pub mod progend;
pub mod vertend;

use crate::cache::ProgramCaches;
use crate::context::ContextSettings;
use crate::driver::{Driver, ProgramHandle};
use crate::errors::{GlazeError, Result};
use crate::pipeline::core::unit_ordered_layers;
use crate::pipeline::{PipelineId, PipelineStore};

/// Which fragment backend owns a pipeline's generated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragendKind {
    Glsl,
    Arbfp,
}

/// Swizzle applied to one combine pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CombineMask {
    Rgba,
    Rgb,
    Alpha,
}

impl CombineMask {
    pub(crate) fn swizzle(self) -> &'static str {
        match self {
            CombineMask::Rgba => "rgba",
            CombineMask::Rgb => "rgb",
            CombineMask::Alpha => "a",
        }
    }
}

/// Generates (or reuses) a GPU program for `pipeline` and returns its
/// handle, with all program parameters freshly uploaded.
pub fn generate_program(
    store: &mut PipelineStore,
    driver: &mut dyn Driver,
    settings: &ContextSettings,
    caches: &mut ProgramCaches,
    pipeline: PipelineId,
) -> Result<ProgramHandle> {
    let layers = unit_ordered_layers(store, pipeline);

    let candidates: &[FragendKind] = match store.pipelines[pipeline].fragend {
        Some(FragendKind::Glsl) => &[FragendKind::Glsl],
        Some(FragendKind::Arbfp) => &[FragendKind::Arbfp],
        None => &[FragendKind::Glsl, FragendKind::Arbfp],
    };

    let mut chosen = None;
    for &kind in candidates {
        let accepted = match kind {
            FragendKind::Glsl => glsl::start(store, pipeline),
            FragendKind::Arbfp => arbfp::start(store, settings, caches, pipeline),
        };
        if accepted {
            chosen = Some(kind);
            break;
        }
    }
    let Some(kind) = chosen else {
        return Err(GlazeError::Unsupported(
            "no fragment backend accepts this pipeline".to_owned(),
        ));
    };
    store.pipelines[pipeline].fragend = Some(kind);

    match kind {
        FragendKind::Glsl => {
            for (i, &layer) in layers.iter().enumerate() {
                glsl::add_layer(store, settings, pipeline, layer, i, &layers);
            }
            if layers.is_empty() {
                glsl::passthrough(store, pipeline);
            }
            let fragment_shader = glsl::end(store, driver, settings, pipeline)?;

            vertend::start(store, settings, caches, pipeline);
            for (i, &layer) in layers.iter().enumerate() {
                vertend::add_layer(store, pipeline, layer, i);
            }
            let vertex_shader = vertend::end(store, driver, pipeline)?;

            progend::end(
                store,
                driver,
                settings,
                caches,
                pipeline,
                fragment_shader,
                vertex_shader,
            )
        }
        FragendKind::Arbfp => {
            for (i, &layer) in layers.iter().enumerate() {
                arbfp::add_layer(store, settings, pipeline, layer, i, &layers);
            }
            if layers.is_empty() {
                arbfp::passthrough(store, pipeline);
            }
            arbfp::end(store, driver, settings, caches, pipeline)
        }
    }
}
