//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`GlazeError`] covers all failure modes including:
//! - Shader compilation and program link failures
//! - Missing driver capabilities
//! - Invalid pipeline or layer configuration
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, GlazeError>`.
//!
//! ```rust,ignore
//! use glaze::errors::{GlazeError, Result};
//!
//! fn generate_program() -> Result<()> {
//!     // Operations that may fail return Result
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the glaze pipeline library.
///
/// This enum covers all possible error conditions that can occur
/// while building pipeline state or generating GPU programs. Each
/// variant provides specific context about what went wrong.
#[derive(Error, Debug)]
pub enum GlazeError {
    // ========================================================================
    // Shader Generation Errors
    // ========================================================================
    /// A generated or user-supplied shader failed to compile.
    #[error("Shader compilation failed: {log}")]
    ShaderCompileFailed {
        /// The driver's compilation log.
        log: String,
    },

    /// Linking the generated shaders into a program failed.
    #[error("Program link failed: {log}")]
    ProgramLinkFailed {
        /// The driver's link log.
        log: String,
    },

    /// The driver accepts none of the available shader backends for
    /// this pipeline configuration.
    #[error("No shader backend supports this pipeline: {0}")]
    Unsupported(String),

    // ========================================================================
    // Pipeline Configuration Errors
    // ========================================================================
    /// Too few combine arguments were supplied for the requested
    /// combine function.
    #[error("Combine argument out of range: {context} (index: {index})")]
    CombineArgOutOfRange {
        /// Description of the combine slot being accessed.
        context: String,
        /// The first missing argument index.
        index: usize,
    },
}

/// Alias for `Result<T, GlazeError>`.
pub type Result<T> = std::result::Result<T, GlazeError>;
