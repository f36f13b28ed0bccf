//! Frame recording.
//!
//! A frame is recorded into a [`CommandEncoder`] as a flat list of passes and
//! copies, then handed to [`GpuBackend::submit`](crate::context::GpuBackend::submit)
//! which replays it on the device.

use crate::context::{BindGroupId, BufferId, PipelineId, TextureId};

/// Where a render pass draws its color output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorTarget {
    /// The current presentable surface texture.
    Surface,
    /// An offscreen texture.
    Texture(TextureId),
}

/// What a render pass does with its attachments before drawing.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LoadOp<V> {
    Clear(V),
    Load,
}

impl<V> LoadOp<V> {
    /// `true` for [`LoadOp::Clear`].
    pub fn is_clear(&self) -> bool {
        matches!(self, LoadOp::Clear(_))
    }
}

/// A color attachment of a render pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ColorAttachment {
    pub view: ColorTarget,
    pub resolve_target: Option<ColorTarget>,
    pub load: LoadOp<wgpu::Color>,
    pub store: bool,
}

/// The depth attachment of a render pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DepthAttachment {
    pub texture: TextureId,
    pub load: LoadOp<f32>,
    pub store: bool,
}

/// A draw-time command inside a render pass.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderCommand {
    SetPipeline(PipelineId),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupId,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferId,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: wgpu::IndexFormat,
    },
    Draw {
        vertices: u32,
        instances: u32,
    },
    DrawIndexed {
        indices: u32,
        instances: u32,
    },
}

/// A dispatch-time command inside a compute pass.
#[derive(Clone, Debug, PartialEq)]
pub enum ComputeCommand {
    SetPipeline(PipelineId),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupId,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

/// A recorded render pass.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassRecord {
    pub label: String,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
    pub commands: Vec<RenderCommand>,
}

/// A recorded compute pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputePassRecord {
    pub label: String,
    pub commands: Vec<ComputeCommand>,
}

/// One step of a recorded frame.
#[derive(Clone, Debug, PartialEq)]
pub enum EncodedCommand {
    RenderPass(RenderPassRecord),
    ComputePass(ComputePassRecord),
    CopyBufferToBuffer {
        source: BufferId,
        destination: BufferId,
        size: u64,
    },
    CopyTextureToTexture {
        source: ColorTarget,
        destination: TextureId,
        width: u32,
        height: u32,
    },
}

/// Records the commands of one frame.
#[derive(Clone, Debug, Default)]
pub struct CommandEncoder {
    pub label: String,
    pub commands: Vec<EncodedCommand>,
}

impl CommandEncoder {
    /// Creates an empty encoder.
    pub fn new(label: impl Into<String>) -> Self {
        CommandEncoder {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    /// Starts recording a render pass. The pass is committed by
    /// [`RenderPassRecorder::end`].
    pub fn begin_render_pass(
        &mut self,
        label: impl Into<String>,
        color_attachments: Vec<ColorAttachment>,
        depth_attachment: Option<DepthAttachment>,
    ) -> RenderPassRecorder<'_> {
        RenderPassRecorder {
            encoder: self,
            record: RenderPassRecord {
                label: label.into(),
                color_attachments,
                depth_attachment,
                commands: Vec::new(),
            },
        }
    }

    /// Starts recording a compute pass. The pass is committed by
    /// [`ComputePassRecorder::end`].
    pub fn begin_compute_pass(&mut self, label: impl Into<String>) -> ComputePassRecorder<'_> {
        ComputePassRecorder {
            encoder: self,
            record: ComputePassRecord {
                label: label.into(),
                commands: Vec::new(),
            },
        }
    }

    pub fn copy_buffer_to_buffer(&mut self, source: BufferId, destination: BufferId, size: u64) {
        self.commands.push(EncodedCommand::CopyBufferToBuffer {
            source,
            destination,
            size,
        });
    }

    pub fn copy_texture_to_texture(
        &mut self,
        source: ColorTarget,
        destination: TextureId,
        width: u32,
        height: u32,
    ) {
        self.commands.push(EncodedCommand::CopyTextureToTexture {
            source,
            destination,
            width,
            height,
        });
    }

    /// `true` if any recorded render pass draws to the surface.
    pub fn uses_surface(&self) -> bool {
        self.commands.iter().any(|command| match command {
            EncodedCommand::RenderPass(pass) => pass.color_attachments.iter().any(|attachment| {
                attachment.view == ColorTarget::Surface
                    || attachment.resolve_target == Some(ColorTarget::Surface)
            }),
            EncodedCommand::CopyTextureToTexture { source, .. } => *source == ColorTarget::Surface,
            _ => false,
        })
    }
}

/// Operations shared by render and compute pass recorders.
pub trait PassRecorder {
    fn set_pipeline(&mut self, pipeline: PipelineId);
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupId);
}

/// Records the commands of one render pass.
pub struct RenderPassRecorder<'a> {
    encoder: &'a mut CommandEncoder,
    record: RenderPassRecord,
}

impl RenderPassRecorder<'_> {
    pub fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferId) {
        self.record
            .commands
            .push(RenderCommand::SetVertexBuffer { slot, buffer });
    }

    pub fn set_index_buffer(&mut self, buffer: BufferId, format: wgpu::IndexFormat) {
        self.record
            .commands
            .push(RenderCommand::SetIndexBuffer { buffer, format });
    }

    pub fn draw(&mut self, vertices: u32, instances: u32) {
        self.record
            .commands
            .push(RenderCommand::Draw { vertices, instances });
    }

    pub fn draw_indexed(&mut self, indices: u32, instances: u32) {
        self.record
            .commands
            .push(RenderCommand::DrawIndexed { indices, instances });
    }

    /// Commits the pass to the encoder.
    pub fn end(self) {
        self.encoder
            .commands
            .push(EncodedCommand::RenderPass(self.record));
    }
}

impl PassRecorder for RenderPassRecorder<'_> {
    fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.record.commands.push(RenderCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupId) {
        self.record
            .commands
            .push(RenderCommand::SetBindGroup { index, bind_group });
    }
}

/// Records the commands of one compute pass.
pub struct ComputePassRecorder<'a> {
    encoder: &'a mut CommandEncoder,
    record: ComputePassRecord,
}

impl ComputePassRecorder<'_> {
    pub fn dispatch_workgroups(&mut self, x: u32, y: u32, z: u32) {
        self.record
            .commands
            .push(ComputeCommand::Dispatch { x, y, z });
    }

    /// Commits the pass to the encoder.
    pub fn end(self) {
        self.encoder
            .commands
            .push(EncodedCommand::ComputePass(self.record));
    }
}

impl PassRecorder for ComputePassRecorder<'_> {
    fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.record
            .commands
            .push(ComputeCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupId) {
        self.record
            .commands
            .push(ComputeCommand::SetBindGroup { index, bind_group });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_are_committed_on_end() {
        let mut encoder = CommandEncoder::new("frame");
        {
            let mut pass = encoder.begin_compute_pass("compute");
            pass.set_pipeline(PipelineId(1));
            pass.dispatch_workgroups(4, 1, 1);
            pass.end();
        }
        {
            let mut pass = encoder.begin_render_pass(
                "main",
                vec![ColorAttachment {
                    view: ColorTarget::Surface,
                    resolve_target: None,
                    load: LoadOp::Clear(wgpu::Color::BLACK),
                    store: true,
                }],
                None,
            );
            pass.draw(3, 1);
            pass.end();
        }

        assert_eq!(encoder.commands.len(), 2);
        assert!(matches!(encoder.commands[0], EncodedCommand::ComputePass(_)));
        assert!(encoder.uses_surface());
    }
}
