//! Pipeline State Groups
//!
//! Pipeline state is partitioned into sparse groups. A pipeline only
//! stores the groups that differ from its parent; everything else is
//! resolved by walking the ancestry to the nearest *authority* for the
//! group. The one non-sparse exception is the derived
//! `real_blend_enable` flag, which every node stores directly.
//!
//! Groups that would bloat the common case live behind the lazily
//! allocated [`BigState`] box.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use bitflags::bitflags;

use crate::color::Color;
use crate::driver::DriverFeatures;
use crate::snippet::Snippet;

bitflags! {
    /// Sparse pipeline state groups, plus the derived blend flag.
    ///
    /// Bit order doubles as the group index used when resolving a set
    /// of authorities in a single ancestry walk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateGroups: u32 {
        const COLOR                = 1 << 0;
        const BLEND_ENABLE         = 1 << 1;
        const LAYERS               = 1 << 2;
        const LIGHTING             = 1 << 3;
        const ALPHA_FUNC           = 1 << 4;
        const ALPHA_FUNC_REFERENCE = 1 << 5;
        const BLEND                = 1 << 6;
        const USER_SHADER          = 1 << 7;
        const DEPTH                = 1 << 8;
        const FOG                  = 1 << 9;
        const POINT_SIZE           = 1 << 10;
        const LOGIC_OPS            = 1 << 11;
        const UNIFORMS             = 1 << 12;
        const VERTEX_SNIPPETS      = 1 << 13;
        const FRAGMENT_SNIPPETS    = 1 << 14;

        /// Derived, non-sparse: stored on every node, never inherited.
        const REAL_BLEND_ENABLE    = 1 << 15;
    }
}

/// Number of sparse groups; sizes authority-resolution scratch arrays.
pub const N_SPARSE_GROUPS: usize = 15;

impl StateGroups {
    /// All sparse groups.
    pub const ALL_SPARSE: StateGroups = StateGroups::REAL_BLEND_ENABLE
        .complement()
        .intersection(StateGroups::all());

    /// Groups stored inside the lazily allocated [`BigState`].
    pub const NEEDS_BIG_STATE: StateGroups = StateGroups::LIGHTING
        .union(StateGroups::ALPHA_FUNC)
        .union(StateGroups::ALPHA_FUNC_REFERENCE)
        .union(StateGroups::BLEND)
        .union(StateGroups::USER_SHADER)
        .union(StateGroups::DEPTH)
        .union(StateGroups::FOG)
        .union(StateGroups::POINT_SIZE)
        .union(StateGroups::LOGIC_OPS)
        .union(StateGroups::UNIFORMS)
        .union(StateGroups::VERTEX_SNIPPETS)
        .union(StateGroups::FRAGMENT_SNIPPETS);

    /// Groups holding more than one property. Becoming an authority for
    /// one of these requires copying the whole group value first so the
    /// untouched properties keep their inherited values.
    pub const MULTI_PROPERTY: StateGroups = StateGroups::LAYERS
        .union(StateGroups::LIGHTING)
        .union(StateGroups::BLEND)
        .union(StateGroups::DEPTH)
        .union(StateGroups::FOG)
        .union(StateGroups::LOGIC_OPS)
        .union(StateGroups::UNIFORMS)
        .union(StateGroups::VERTEX_SNIPPETS)
        .union(StateGroups::FRAGMENT_SNIPPETS);

    /// Groups whose value feeds the automatic blend-enable decision.
    pub const AFFECTS_BLENDING: StateGroups = StateGroups::COLOR
        .union(StateGroups::BLEND_ENABLE)
        .union(StateGroups::LAYERS)
        .union(StateGroups::LIGHTING)
        .union(StateGroups::BLEND)
        .union(StateGroups::USER_SHADER)
        .union(StateGroups::VERTEX_SNIPPETS)
        .union(StateGroups::FRAGMENT_SNIPPETS);

    /// Index of a single-bit group, usable for scratch arrays.
    #[must_use]
    pub fn index(self) -> usize {
        debug_assert_eq!(self.bits().count_ones(), 1);
        self.bits().trailing_zeros() as usize
    }
}

/// Groups that change generated fragment shader code.
///
/// When the driver has no fixed-function alpha test the reference
/// comparison is compiled into the shader, so the alpha-test groups
/// join the mask.
#[must_use]
pub fn fragment_codegen_groups(features: DriverFeatures) -> StateGroups {
    let mut groups =
        StateGroups::LAYERS | StateGroups::USER_SHADER | StateGroups::FRAGMENT_SNIPPETS;
    if features.contains(DriverFeatures::SHADER_ALPHA_TEST) {
        groups |= StateGroups::ALPHA_FUNC;
    }
    groups
}

/// Groups that change generated vertex shader code.
#[must_use]
pub fn vertex_codegen_groups(features: DriverFeatures) -> StateGroups {
    let mut groups =
        StateGroups::LAYERS | StateGroups::USER_SHADER | StateGroups::VERTEX_SNIPPETS;
    if !features.contains(DriverFeatures::BUILTIN_POINT_SIZE_UNIFORM) {
        groups |= StateGroups::POINT_SIZE;
    }
    groups
}

// ─── Blend state ─────────────────────────────────────────────────────────────

/// Whether blending follows the automatic content-based decision or an
/// explicit override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendEnableMode {
    Enabled,
    Disabled,
    #[default]
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    /// Whether this factor reads the constant blend color.
    #[must_use]
    pub fn uses_constant(self) -> bool {
        matches!(
            self,
            BlendFactor::ConstantColor
                | BlendFactor::OneMinusConstantColor
                | BlendFactor::ConstantAlpha
                | BlendFactor::OneMinusConstantAlpha
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendEquation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
}

/// Full blend configuration, with separate RGB and alpha pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub equation_rgb: BlendEquation,
    pub equation_alpha: BlendEquation,
    pub src_factor_rgb: BlendFactor,
    pub dst_factor_rgb: BlendFactor,
    pub src_factor_alpha: BlendFactor,
    pub dst_factor_alpha: BlendFactor,
    pub constant: Color,
}

impl BlendState {
    /// Whether any enabled factor reads the constant blend color.
    #[must_use]
    pub fn uses_constant(&self) -> bool {
        self.src_factor_rgb.uses_constant()
            || self.dst_factor_rgb.uses_constant()
            || self.src_factor_alpha.uses_constant()
            || self.dst_factor_alpha.uses_constant()
    }

    /// Whether this configuration is the premultiplied-over default
    /// that drivers treat as equivalent to blending disabled when the
    /// fragment alpha is known to be one.
    #[must_use]
    pub fn is_default_over(&self) -> bool {
        self.equation_rgb == BlendEquation::Add
            && self.equation_alpha == BlendEquation::Add
            && self.src_factor_rgb == BlendFactor::One
            && self.dst_factor_rgb == BlendFactor::OneMinusSrcAlpha
            && self.src_factor_alpha == BlendFactor::One
            && self.dst_factor_alpha == BlendFactor::OneMinusSrcAlpha
    }
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            equation_rgb: BlendEquation::Add,
            equation_alpha: BlendEquation::Add,
            src_factor_rgb: BlendFactor::One,
            dst_factor_rgb: BlendFactor::OneMinusSrcAlpha,
            src_factor_alpha: BlendFactor::One,
            dst_factor_alpha: BlendFactor::OneMinusSrcAlpha,
            constant: Color::TRANSPARENT,
        }
    }
}

// ─── Test functions ──────────────────────────────────────────────────────────

/// Comparison used for both the alpha test and the depth test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    Lequal,
    Greater,
    NotEqual,
    Gequal,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test_enabled: bool,
    pub write_enabled: bool,
    pub test_function: CompareFunc,
    pub range_near: OrderedF32,
    pub range_far: OrderedF32,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enabled: false,
            write_enabled: true,
            test_function: CompareFunc::Less,
            range_near: OrderedF32(0.0),
            range_far: OrderedF32(1.0),
        }
    }
}

// ─── Fog / lighting / logic ops ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FogMode {
    #[default]
    Linear,
    Exponential,
    ExponentialSquared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FogState {
    pub enabled: bool,
    pub color: Color,
    pub mode: FogMode,
    pub density: OrderedF32,
    pub z_near: OrderedF32,
    pub z_far: OrderedF32,
}

impl Default for FogState {
    fn default() -> Self {
        Self {
            enabled: false,
            color: Color::TRANSPARENT,
            mode: FogMode::Linear,
            density: OrderedF32(1.0),
            z_near: OrderedF32(0.0),
            z_far: OrderedF32(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightingState {
    pub ambient: Color,
    pub diffuse: Color,
    pub specular: Color,
    pub emission: Color,
    pub shininess: OrderedF32,
}

impl Default for LightingState {
    fn default() -> Self {
        Self {
            ambient: Color::new(0.2, 0.2, 0.2, 1.0),
            diffuse: Color::new(0.8, 0.8, 0.8, 1.0),
            specular: Color::BLACK,
            emission: Color::new(0.0, 0.0, 0.0, 1.0),
            shininess: OrderedF32(0.0),
        }
    }
}

bitflags! {
    /// Framebuffer channel write mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED   = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE  = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicOpsState {
    pub color_mask: ColorMask,
}

impl Default for LogicOpsState {
    fn default() -> Self {
        Self {
            color_mask: ColorMask::all(),
        }
    }
}

// ─── Uniform overrides ───────────────────────────────────────────────────────

/// A boxed uniform value override.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UniformValue {
    Float(OrderedF32),
    Int(i32),
    Vec4([OrderedF32; 4]),
    Mat4(Box<[OrderedF32; 16]>),
}

impl UniformValue {
    #[must_use]
    pub fn float(v: f32) -> Self {
        UniformValue::Float(OrderedF32(v))
    }

    #[must_use]
    pub fn vec4(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v.map(OrderedF32))
    }
}

/// Ordered list of `(location, value)` overrides. Order is significant
/// for equality and hashing.
pub type UniformOverrides = Vec<(u32, UniformValue)>;

// ─── User programs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    Glsl,
    Asm,
}

#[derive(Debug, Clone)]
pub struct UserShader {
    pub stage: ShaderStage,
    pub language: ShaderLanguage,
    pub source: String,
}

#[derive(Debug, Default)]
pub struct UserProgramData {
    pub shaders: Vec<UserShader>,
    /// Bumped on every shader attach so dependent GPU programs relink.
    pub age: u64,
}

impl UserProgramData {
    #[must_use]
    pub fn shader_for_stage(&self, stage: ShaderStage) -> Option<&UserShader> {
        self.shaders.iter().find(|s| s.stage == stage)
    }
}

/// A user-supplied replacement program. Identity-compared: two handles
/// are equal only when they refer to the same program object.
#[derive(Debug, Clone, Default)]
pub struct UserProgram(pub Rc<RefCell<UserProgramData>>);

impl UserProgram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_shader(&self, stage: ShaderStage, language: ShaderLanguage, source: &str) {
        let mut data = self.0.borrow_mut();
        data.shaders.push(UserShader {
            stage,
            language,
            source: source.to_owned(),
        });
        data.age += 1;
    }

    #[must_use]
    pub fn age(&self) -> u64 {
        self.0.borrow().age
    }

    #[must_use]
    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.0.borrow().shader_for_stage(stage).is_some()
    }

    /// Language of the shader attached for `stage`, if any.
    #[must_use]
    pub fn stage_language(&self, stage: ShaderStage) -> Option<ShaderLanguage> {
        self.0.borrow().shader_for_stage(stage).map(|s| s.language)
    }

    /// Source of the shader attached for `stage`, if any.
    #[must_use]
    pub fn shader_source(&self, stage: ShaderStage) -> Option<String> {
        self.0
            .borrow()
            .shader_for_stage(stage)
            .map(|s| s.source.clone())
    }
}

impl PartialEq for UserProgram {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for UserProgram {}

impl Hash for UserProgram {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}

// ─── Big state ───────────────────────────────────────────────────────────────

/// Rarely-diverging state, boxed to keep the common pipeline small.
#[derive(Debug, Clone)]
pub struct BigState {
    pub lighting: LightingState,
    pub alpha_func: CompareFunc,
    pub alpha_func_reference: OrderedF32,
    pub blend: BlendState,
    pub user_program: Option<UserProgram>,
    pub depth: DepthState,
    pub fog: FogState,
    pub point_size: OrderedF32,
    pub logic_ops: LogicOpsState,
    pub uniform_overrides: UniformOverrides,
    pub vertex_snippets: Vec<Snippet>,
    pub fragment_snippets: Vec<Snippet>,
}

impl Default for BigState {
    fn default() -> Self {
        Self {
            lighting: LightingState::default(),
            alpha_func: CompareFunc::Always,
            alpha_func_reference: OrderedF32(0.0),
            blend: BlendState::default(),
            user_program: None,
            depth: DepthState::default(),
            fog: FogState::default(),
            point_size: OrderedF32(1.0),
            logic_ops: LogicOpsState::default(),
            uniform_overrides: UniformOverrides::default(),
            vertex_snippets: Vec::new(),
            fragment_snippets: Vec::new(),
        }
    }
}

// ─── Bit-exact f32 wrapper ───────────────────────────────────────────────────

/// `f32` compared and hashed by bit pattern so state structs can derive
/// `Eq` and `Hash`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedF32(pub f32);

impl PartialEq for OrderedF32 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedF32 {}

impl Hash for OrderedF32 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f32> for OrderedF32 {
    fn from(v: f32) -> Self {
        OrderedF32(v)
    }
}
