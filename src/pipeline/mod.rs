//! Pipeline entries, shader assembly and the pipeline cache.

pub use self::pipeline_entry::{
    PatchedShaders, PipelineEntry, PipelineEntryRef, PipelineStages, PipelineStatus,
    RenderStages, RenderingOptions, ShaderSource, VertexLayout,
};
pub use self::pipeline_manager::{ComputePipelineParams, PipelineManager, RenderPipelineParams};
pub use self::shader_chunks::{chunks_for, ShaderChunk};

mod pipeline_entry;
mod pipeline_manager;
pub mod shader_chunks;
