//! GPU driver abstraction used by the shader backends.
//!
//! The code generators never talk to a GPU API directly; they go
//! through [`Driver`], which exposes the few entry points needed to
//! compile shaders, link programs and upload uniform values. Feature
//! bits steer backend selection and the shape of generated source.

use bitflags::bitflags;
use std::cell::RefCell;

use crate::errors::{GlazeError, Result};
use crate::pipeline::state::ShaderStage;

bitflags! {
    /// Capabilities reported by a driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverFeatures: u32 {
        /// High-level shading language programs.
        const GLSL = 1 << 0;
        /// Low-level assembly fragment programs.
        const ASM_PROGRAMS = 1 << 1;
        /// Point-sprite coordinates come from a builtin variable, so
        /// sprite layers must redirect their texture lookups to it.
        const POINT_COORD_BUILTIN = 1 << 2;
        /// No fixed-function alpha test; the comparison is generated
        /// into the fragment shader.
        const SHADER_ALPHA_TEST = 1 << 3;
        /// Point size comes from a builtin uniform rather than
        /// generated vertex shader code.
        const BUILTIN_POINT_SIZE_UNIFORM = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

/// GPU entry points required by the shader backends.
pub trait Driver {
    fn features(&self) -> DriverFeatures;

    /// Compiles `source` for `stage`, returning a handle or the
    /// driver's error log.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle>;

    /// Loads a low-level assembly fragment program.
    fn load_asm_program(&mut self, source: &str) -> Result<ProgramHandle>;

    /// Links the given shaders into a program.
    fn create_program(&mut self, shaders: &[ShaderHandle]) -> Result<ProgramHandle>;

    fn delete_shader(&mut self, shader: ShaderHandle);
    fn delete_program(&mut self, program: ProgramHandle);

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn set_uniform_1i(&mut self, program: ProgramHandle, location: UniformLocation, value: i32);
    fn set_uniform_1f(&mut self, program: ProgramHandle, location: UniformLocation, value: f32);
    fn set_uniform_4f(
        &mut self,
        program: ProgramHandle,
        location: UniformLocation,
        value: [f32; 4],
    );
    fn set_uniform_matrix(
        &mut self,
        program: ProgramHandle,
        location: UniformLocation,
        value: &[f32; 16],
    );

    /// Writes a local parameter slot of an assembly program.
    fn set_program_local(&mut self, program: ProgramHandle, slot: u32, value: [f32; 4]);
}

// ─── Recording driver ────────────────────────────────────────────────────────

/// One captured driver call, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    CompileShader {
        handle: ShaderHandle,
        stage: ShaderStage,
        source: String,
    },
    LoadAsmProgram {
        handle: ProgramHandle,
        source: String,
    },
    CreateProgram {
        handle: ProgramHandle,
        shaders: Vec<ShaderHandle>,
    },
    DeleteShader(ShaderHandle),
    DeleteProgram(ProgramHandle),
    SetUniform1i(ProgramHandle, UniformLocation, i32),
    SetUniform1f(ProgramHandle, UniformLocation, f32),
    SetUniform4f(ProgramHandle, UniformLocation, [f32; 4]),
    SetUniformMatrix(ProgramHandle, UniformLocation),
    SetProgramLocal(ProgramHandle, u32, [f32; 4]),
}

/// In-memory driver that records every call instead of touching a GPU.
///
/// Handles are handed out sequentially and every queried uniform name
/// resolves to a distinct location, so generated source and upload
/// traffic can be asserted byte for byte.
#[derive(Debug)]
pub struct RecordingDriver {
    features: DriverFeatures,
    next_handle: u64,
    next_location: i32,
    locations: RefCell<Vec<(ProgramHandle, String, UniformLocation)>>,
    /// When set, every compile and load reports this log as a failure.
    pub force_compile_error: Option<String>,
    /// When set, every link reports this log as a failure.
    pub force_link_error: Option<String>,
    pub calls: Vec<DriverCall>,
}

impl RecordingDriver {
    #[must_use]
    pub fn new(features: DriverFeatures) -> Self {
        Self {
            features,
            next_handle: 1,
            next_location: 0,
            locations: RefCell::new(Vec::new()),
            force_compile_error: None,
            force_link_error: None,
            calls: Vec::new(),
        }
    }

    /// GLSL-only driver, the common test configuration.
    #[must_use]
    pub fn glsl() -> Self {
        Self::new(DriverFeatures::GLSL)
    }

    /// Assembly-only driver.
    #[must_use]
    pub fn asm_only() -> Self {
        Self::new(DriverFeatures::ASM_PROGRAMS)
    }

    fn bump_handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// Sources of every shader compiled so far, in submission order.
    #[must_use]
    pub fn compiled_sources(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::CompileShader { source, .. }
                | DriverCall::LoadAsmProgram { source, .. } => Some(source.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Number of programs created or loaded so far.
    #[must_use]
    pub fn programs_created(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    DriverCall::CreateProgram { .. } | DriverCall::LoadAsmProgram { .. }
                )
            })
            .count()
    }
}

impl Driver for RecordingDriver {
    fn features(&self) -> DriverFeatures {
        self.features
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderHandle> {
        if let Some(log) = &self.force_compile_error {
            return Err(GlazeError::ShaderCompileFailed { log: log.clone() });
        }
        let handle = ShaderHandle(self.bump_handle());
        self.calls.push(DriverCall::CompileShader {
            handle,
            stage,
            source: source.to_owned(),
        });
        Ok(handle)
    }

    fn load_asm_program(&mut self, source: &str) -> Result<ProgramHandle> {
        if let Some(log) = &self.force_compile_error {
            return Err(GlazeError::ShaderCompileFailed { log: log.clone() });
        }
        let handle = ProgramHandle(self.bump_handle());
        self.calls.push(DriverCall::LoadAsmProgram {
            handle,
            source: source.to_owned(),
        });
        Ok(handle)
    }

    fn create_program(&mut self, shaders: &[ShaderHandle]) -> Result<ProgramHandle> {
        if let Some(log) = &self.force_link_error {
            return Err(GlazeError::ProgramLinkFailed { log: log.clone() });
        }
        let handle = ProgramHandle(self.bump_handle());
        self.calls.push(DriverCall::CreateProgram {
            handle,
            shaders: shaders.to_vec(),
        });
        Ok(handle)
    }

    fn delete_shader(&mut self, shader: ShaderHandle) {
        self.calls.push(DriverCall::DeleteShader(shader));
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.calls.push(DriverCall::DeleteProgram(program));
    }

    fn uniform_location(&mut self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let mut locations = self.locations.borrow_mut();
        if let Some((_, _, loc)) = locations
            .iter()
            .find(|(p, n, _)| *p == program && n == name)
        {
            return Some(*loc);
        }
        let loc = UniformLocation(self.next_location);
        self.next_location += 1;
        locations.push((program, name.to_owned(), loc));
        Some(loc)
    }

    fn set_uniform_1i(&mut self, program: ProgramHandle, location: UniformLocation, value: i32) {
        self.calls
            .push(DriverCall::SetUniform1i(program, location, value));
    }

    fn set_uniform_1f(&mut self, program: ProgramHandle, location: UniformLocation, value: f32) {
        self.calls
            .push(DriverCall::SetUniform1f(program, location, value));
    }

    fn set_uniform_4f(
        &mut self,
        program: ProgramHandle,
        location: UniformLocation,
        value: [f32; 4],
    ) {
        self.calls
            .push(DriverCall::SetUniform4f(program, location, value));
    }

    fn set_uniform_matrix(
        &mut self,
        program: ProgramHandle,
        location: UniformLocation,
        _value: &[f32; 16],
    ) {
        self.calls
            .push(DriverCall::SetUniformMatrix(program, location));
    }

    fn set_program_local(&mut self, program: ProgramHandle, slot: u32, value: [f32; 4]) {
        self.calls
            .push(DriverCall::SetProgramLocal(program, slot, value));
    }
}
