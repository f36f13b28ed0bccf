//! The GPU device surface consumed by the core.
//!
//! Every GPU object is referred to through a small copyable handle. Backends
//! map handles to their own resources, which keeps the binding, pipeline and
//! scheduling layers free of borrowed wgpu objects and lets them run against
//! the [`HeadlessBackend`](crate::context::HeadlessBackend) in tests.

use crate::context::CommandEncoder;
use crate::error::Result;

macro_rules! gpu_handle {
    ($($(#[$meta: meta])* $name: ident;)*) => {$(
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    )*};
}

gpu_handle! {
    /// Handle of a GPU buffer.
    BufferId;
    /// Handle of a GPU texture.
    TextureId;
    /// Handle of a GPU sampler.
    SamplerId;
    /// Handle of a bind group layout.
    BindGroupLayoutId;
    /// Handle of a bind group.
    BindGroupId;
    /// Handle of a compiled shader module.
    ShaderModuleId;
    /// Handle of a pipeline layout.
    PipelineLayoutId;
    /// Handle of a render or compute pipeline.
    PipelineId;
}

/// Describes a GPU buffer.
#[derive(Clone, Debug)]
pub struct BufferDescriptor {
    pub label: String,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

/// Describes a 2D GPU texture.
#[derive(Clone, Debug)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    pub sample_count: u32,
    pub mip_level_count: u32,
}

/// Describes a sampler.
#[derive(Clone, Debug)]
pub struct SamplerDescriptor {
    pub label: String,
    pub address_mode_u: wgpu::AddressMode,
    pub address_mode_v: wgpu::AddressMode,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::FilterMode,
    pub compare: Option<wgpu::CompareFunction>,
    pub max_anisotropy: u16,
}

/// The structural shape of one bind group layout entry.
#[derive(Clone, Debug, PartialEq)]
pub enum BindingLayout {
    Buffer {
        ty: wgpu::BufferBindingType,
    },
    Texture {
        sample_type: wgpu::TextureSampleType,
        view_dimension: wgpu::TextureViewDimension,
        multisampled: bool,
    },
    StorageTexture {
        access: wgpu::StorageTextureAccess,
        format: wgpu::TextureFormat,
        view_dimension: wgpu::TextureViewDimension,
    },
    ExternalTexture,
    Sampler(wgpu::SamplerBindingType),
}

/// One entry of a bind group layout.
#[derive(Clone, Debug, PartialEq)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: wgpu::ShaderStages,
    pub layout: BindingLayout,
}

/// The resource bound at one bind group slot.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BindingResource {
    Buffer(BufferId),
    TextureView {
        texture: TextureId,
        dimension: wgpu::TextureViewDimension,
    },
    Sampler(SamplerId),
}

/// One entry of a bind group.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

/// A vertex attribute inside an interleaved vertex buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexAttribute {
    pub format: wgpu::VertexFormat,
    pub offset: u64,
    pub shader_location: u32,
}

/// Layout of one vertex buffer slot.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

/// A programmable stage of a pipeline.
#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub module: ShaderModuleId,
    pub entry_point: String,
}

/// Describes a render pipeline.
#[derive(Clone, Debug)]
pub struct RenderPipelineDescriptor {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub vertex: ShaderStage,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub fragment: Option<ShaderStage>,
    pub targets: Vec<wgpu::ColorTargetState>,
    pub primitive: wgpu::PrimitiveState,
    pub depth_stencil: Option<wgpu::DepthStencilState>,
    pub multisample: wgpu::MultisampleState,
}

/// Describes a compute pipeline.
#[derive(Clone, Debug)]
pub struct ComputePipelineDescriptor {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub compute: ShaderStage,
}

/// A GPU device able to create resources, compile pipelines and execute
/// recorded frames.
pub trait GpuBackend {
    /// A short name identifying the backend in logs.
    fn name(&self) -> &str;

    /// Format of the presentable surface, if any.
    fn preferred_format(&self) -> wgpu::TextureFormat;

    /// Size of the presentable surface, in pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Reconfigures the presentable surface.
    fn resize_surface(&mut self, width: u32, height: u32);

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BufferId;
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId;
    /// Uploads tightly packed texel rows into the first mip level.
    fn write_texture(&mut self, texture: TextureId, data: &[u8], width: u32, height: u32);
    fn destroy_texture(&mut self, texture: TextureId);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> SamplerId;

    fn create_bind_group_layout(
        &mut self,
        label: &str,
        entries: &[BindGroupLayoutEntry],
    ) -> BindGroupLayoutId;

    fn create_bind_group(
        &mut self,
        label: &str,
        layout: BindGroupLayoutId,
        entries: &[BindGroupEntry],
    ) -> BindGroupId;

    fn create_shader_module(&mut self, label: &str, code: &str) -> Result<ShaderModuleId>;

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> PipelineLayoutId;

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> Result<PipelineId>;

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDescriptor)
        -> Result<PipelineId>;

    /// Executes a recorded frame and presents the surface if it was drawn to.
    fn submit(&mut self, encoder: CommandEncoder) -> Result<()>;

    /// Blocks until the content of a `MAP_READ` buffer is available.
    fn read_buffer(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>>;
}
