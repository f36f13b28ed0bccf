//! Device context, GPU backends and frame recording.

pub use self::backend::{
    BindGroupEntry, BindGroupId, BindGroupLayoutEntry, BindGroupLayoutId, BindingLayout,
    BindingResource, BufferDescriptor, BufferId, ComputePipelineDescriptor, GpuBackend,
    PipelineId, PipelineLayoutId, RenderPipelineDescriptor, SamplerDescriptor, SamplerId,
    ShaderModuleId, ShaderStage, TextureDescriptor, TextureId, VertexAttribute,
    VertexBufferLayout,
};
pub use self::commands::{
    ColorAttachment, ColorTarget, CommandEncoder, ComputeCommand, ComputePassRecord,
    ComputePassRecorder, DepthAttachment, EncodedCommand, LoadOp, PassRecorder, RenderCommand,
    RenderPassRecord, RenderPassRecorder,
};
pub use self::context::{Context, PostSubmitTask};
pub use self::headless::{HeadlessBackend, HeadlessProbe, HeadlessStats};
pub use self::wgpu_backend::WgpuBackend;

mod backend;
mod commands;
mod context;
mod headless;
mod wgpu_backend;
