//! Error type shared by the whole crate.

use thiserror::Error;

/// Errors raised by the binding, pipeline and scheduling layers.
///
/// Soft failures (uncoercible binding values, mismatched array inputs, rendering
/// option changes on compiled pipelines) never reach this type: they are
/// reported through [`crate::utils::throw_warning`] instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown WGSL type `{0}`")]
    UnknownWgslType(String),
    #[error("geometry `{label}`: attribute `{attribute}` holds {found} vertices, expected {expected}")]
    GeometryAttributeMismatch {
        label: String,
        attribute: String,
        expected: usize,
        found: usize,
    },
    #[error("geometry `{label}`: attribute `{attribute}` has {len} values, not a multiple of {size}")]
    GeometryAttributeSize {
        label: String,
        attribute: String,
        len: usize,
        size: usize,
    },
    #[error("shader module `{label}` failed to compile: {message}")]
    ShaderModule { label: String, message: String },
    #[error("pipeline `{label}` failed to compile: {message}")]
    PipelineCompilation { label: String, message: String },
    #[error("`{0}` is not a valid storage texture format")]
    UnsupportedStorageFormat(String),
    #[error("no binding named `{0}`")]
    MissingBinding(String),
    #[error("failed to map buffer `{label}`: {message}")]
    BufferMap { label: String, message: String },
    #[error("the GPU device has been lost")]
    DeviceLost,
    #[error(transparent)]
    RequestAdapter(#[from] wgpu::RequestAdapterError),
    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error(transparent)]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error(transparent)]
    Surface(#[from] wgpu::SurfaceError),
}

/// Result alias defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
