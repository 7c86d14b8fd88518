#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod cache;
pub mod codegen;
pub mod color;
pub mod context;
pub mod driver;
pub mod errors;
pub mod node;
pub mod pipeline;
pub mod sampler;
pub mod snippet;

pub use cache::{PipelineHashTable, ProgramCaches};
pub use codegen::{generate_program, FragendKind};
pub use color::Color;
pub use context::{ContextSettings, PipelineContext};
pub use driver::{
    Driver, DriverCall, DriverFeatures, ProgramHandle, RecordingDriver, ShaderHandle,
    UniformLocation,
};
pub use errors::{GlazeError, Result};
pub use pipeline::layer::{
    CombineFunc, CombineOp, CombineSource, LayerGroups,
};
pub use pipeline::state::{
    BlendEnableMode, BlendEquation, BlendFactor, BlendState, ColorMask, CompareFunc, DepthState,
    FogMode, FogState, LightingState, LogicOpsState, ShaderLanguage, ShaderStage, StateGroups,
    UniformValue, UserProgram,
};
pub use pipeline::{LayerId, PipelineId, PipelineStore};
pub use sampler::{
    FilterMode, SamplerCache, SamplerId, SamplerState, TextureRef, TextureTarget, WrapMode,
};
pub use snippet::{Snippet, SnippetHook};
