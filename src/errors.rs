//! Error Types
//!
//! This module defines the error types used throughout the renderer.
//!
//! # Overview
//!
//! The main error type [`SigilError`] covers all failure modes including:
//! - GPU device and surface failures
//! - Frame scheduling misuse (re-entrant submission)
//! - Pipeline and shader creation errors
//!
//! All public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, SigilError>`.

use thiserror::Error;

/// The main error type for the renderer.
#[derive(Error, Debug)]
pub enum SigilError {
    // ========================================================================
    // GPU & Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// The device or its surface was lost. Fatal; recovery is the caller's
    /// responsibility.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// No presentable surface is configured on this device.
    #[error("No surface configured: {0}")]
    SurfaceUnavailable(String),

    // ========================================================================
    // Pipeline & Shader Errors
    // ========================================================================
    /// A pipeline referenced a shader module that was never registered.
    #[error("Shader module not registered: {0}")]
    ShaderNotFound(String),

    /// Render or compute pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreateFailed(String),

    // ========================================================================
    // Frame Scheduling Errors
    // ========================================================================
    /// `render()` was called while a frame was already in flight.
    #[error("render() called in stage {stage:?}; frame submission must start from Inactive")]
    InvalidRenderStage {
        /// The stage the scheduler was in when the call arrived.
        stage: crate::renderer::RenderStage,
    },

    /// The scheduler was used before `setup()` completed.
    #[error("Renderer not set up: {0}")]
    NotSetUp(String),

    // ========================================================================
    // Read-back Errors
    // ========================================================================
    /// A pick query future was abandoned before a value arrived (the query
    /// was replaced or the scene was destroyed).
    #[error("Pick query was discarded before completion")]
    PickDiscarded,
}

/// Alias for `Result<T, SigilError>`.
pub type Result<T> = std::result::Result<T, SigilError>;
