//! A GPU-less backend.
//!
//! The headless backend keeps buffer contents in memory, executes copies,
//! records every submitted frame and counts every object it is asked to
//! create or destroy. Nothing is shaded. It is used for offscreen bookkeeping
//! and as the device double of the test-suite, which inspects it through a
//! [`HeadlessProbe`].

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::context::{
    BindGroupEntry, BindGroupId, BindGroupLayoutEntry, BindGroupLayoutId, BufferDescriptor,
    BufferId, CommandEncoder, ComputePipelineDescriptor, EncodedCommand, GpuBackend,
    PipelineId, PipelineLayoutId, RenderPipelineDescriptor, SamplerDescriptor, SamplerId,
    ShaderModuleId, TextureDescriptor, TextureId,
};
use crate::error::{Error, Result};

/// Counters of every call received by a [`HeadlessBackend`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub buffer_writes: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub texture_writes: usize,
    pub samplers_created: usize,
    pub bind_group_layouts_created: usize,
    pub bind_groups_created: usize,
    pub shader_modules_created: usize,
    pub pipeline_layouts_created: usize,
    pub render_pipelines_created: usize,
    pub compute_pipelines_created: usize,
    pub submissions: usize,
}

struct HeadlessBuffer {
    label: String,
    usage: wgpu::BufferUsages,
    data: Vec<u8>,
    destroyed: bool,
}

#[derive(Default)]
struct HeadlessState {
    next_id: u64,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    textures: HashMap<TextureId, TextureDescriptor>,
    shader_modules: HashMap<ShaderModuleId, String>,
    pipeline_labels: HashMap<PipelineId, String>,
    frames: Vec<CommandEncoder>,
    stats: HeadlessStats,
    pipeline_failure: Option<String>,
    surface_size: (u32, u32),
}

impl HeadlessState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A backend that executes nothing on a GPU.
pub struct HeadlessBackend {
    state: Rc<RefCell<HeadlessState>>,
    format: wgpu::TextureFormat,
}

impl HeadlessBackend {
    /// Creates a headless backend with a virtual surface of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let state = HeadlessState {
            surface_size: (width.max(1), height.max(1)),
            ..Default::default()
        };

        HeadlessBackend {
            state: Rc::new(RefCell::new(state)),
            format: wgpu::TextureFormat::Bgra8Unorm,
        }
    }

    /// Returns a handle to inspect this backend after it has been moved into
    /// a [`Context`](crate::context::Context).
    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: self.state.clone(),
        }
    }

    fn check_entry_point(&self, module: ShaderModuleId, entry_point: &str) -> Option<String> {
        let state = self.state.borrow();
        let code = state.shader_modules.get(&module)?;

        if code.contains(&format!("fn {}(", entry_point)) {
            None
        } else {
            Some(format!("entry point `{}` not found", entry_point))
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        HeadlessBackend::new(800, 600)
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn preferred_format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn surface_size(&self) -> (u32, u32) {
        self.state.borrow().surface_size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.state.borrow_mut().surface_size = (width.max(1), height.max(1));
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BufferId {
        let mut state = self.state.borrow_mut();
        let id = BufferId(state.next_id());
        state.stats.buffers_created += 1;
        let _ = state.buffers.insert(
            id,
            HeadlessBuffer {
                label: desc.label.clone(),
                usage: desc.usage,
                data: vec![0; desc.size as usize],
                destroyed: false,
            },
        );
        id
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.stats.buffer_writes += 1;

        if let Some(buffer) = state.buffers.get_mut(&buffer) {
            let start = offset as usize;
            let end = (start + data.len()).min(buffer.data.len());
            if start < end {
                buffer.data[start..end].copy_from_slice(&data[..end - start]);
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        let mut state = self.state.borrow_mut();
        state.stats.buffers_destroyed += 1;

        if let Some(buffer) = state.buffers.get_mut(&buffer) {
            buffer.destroyed = true;
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        let mut state = self.state.borrow_mut();
        let id = TextureId(state.next_id());
        state.stats.textures_created += 1;
        let _ = state.textures.insert(id, desc.clone());
        id
    }

    fn write_texture(&mut self, _: TextureId, _: &[u8], _: u32, _: u32) {
        self.state.borrow_mut().stats.texture_writes += 1;
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        let mut state = self.state.borrow_mut();
        state.stats.textures_destroyed += 1;
        let _ = state.textures.remove(&texture);
    }

    fn create_sampler(&mut self, _: &SamplerDescriptor) -> SamplerId {
        let mut state = self.state.borrow_mut();
        state.stats.samplers_created += 1;
        SamplerId(state.next_id())
    }

    fn create_bind_group_layout(
        &mut self,
        _: &str,
        _: &[BindGroupLayoutEntry],
    ) -> BindGroupLayoutId {
        let mut state = self.state.borrow_mut();
        state.stats.bind_group_layouts_created += 1;
        BindGroupLayoutId(state.next_id())
    }

    fn create_bind_group(
        &mut self,
        _: &str,
        _: BindGroupLayoutId,
        _: &[BindGroupEntry],
    ) -> BindGroupId {
        let mut state = self.state.borrow_mut();
        state.stats.bind_groups_created += 1;
        BindGroupId(state.next_id())
    }

    fn create_shader_module(&mut self, _: &str, code: &str) -> Result<ShaderModuleId> {
        let mut state = self.state.borrow_mut();
        state.stats.shader_modules_created += 1;
        let id = ShaderModuleId(state.next_id());
        let _ = state.shader_modules.insert(id, code.to_string());
        Ok(id)
    }

    fn create_pipeline_layout(&mut self, _: &str, _: &[BindGroupLayoutId]) -> PipelineLayoutId {
        let mut state = self.state.borrow_mut();
        state.stats.pipeline_layouts_created += 1;
        PipelineLayoutId(state.next_id())
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> Result<PipelineId> {
        let failure = self
            .state
            .borrow()
            .pipeline_failure
            .clone()
            .or_else(|| self.check_entry_point(desc.vertex.module, &desc.vertex.entry_point))
            .or_else(|| {
                desc.fragment
                    .as_ref()
                    .and_then(|stage| self.check_entry_point(stage.module, &stage.entry_point))
            });

        if let Some(message) = failure {
            return Err(Error::PipelineCompilation {
                label: desc.label.clone(),
                message,
            });
        }

        let mut state = self.state.borrow_mut();
        state.stats.render_pipelines_created += 1;
        let id = PipelineId(state.next_id());
        let _ = state.pipeline_labels.insert(id, desc.label.clone());
        Ok(id)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> Result<PipelineId> {
        let failure = self
            .state
            .borrow()
            .pipeline_failure
            .clone()
            .or_else(|| self.check_entry_point(desc.compute.module, &desc.compute.entry_point));

        if let Some(message) = failure {
            return Err(Error::PipelineCompilation {
                label: desc.label.clone(),
                message,
            });
        }

        let mut state = self.state.borrow_mut();
        state.stats.compute_pipelines_created += 1;
        let id = PipelineId(state.next_id());
        let _ = state.pipeline_labels.insert(id, desc.label.clone());
        Ok(id)
    }

    fn submit(&mut self, encoder: CommandEncoder) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.stats.submissions += 1;

        for command in &encoder.commands {
            if let EncodedCommand::CopyBufferToBuffer {
                source,
                destination,
                size,
            } = command
            {
                let data = state
                    .buffers
                    .get(source)
                    .map(|buffer| buffer.data[..(*size as usize).min(buffer.data.len())].to_vec());

                if let (Some(data), Some(destination)) = (data, state.buffers.get_mut(destination))
                {
                    let len = data.len().min(destination.data.len());
                    destination.data[..len].copy_from_slice(&data[..len]);
                }
            }
        }

        state.frames.push(encoder);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let state = self.state.borrow();
        let buffer = state.buffers.get(&buffer).ok_or_else(|| Error::BufferMap {
            label: format!("{:?}", buffer),
            message: "unknown buffer".to_string(),
        })?;

        if buffer.destroyed || !buffer.usage.contains(wgpu::BufferUsages::MAP_READ) {
            return Err(Error::BufferMap {
                label: buffer.label.clone(),
                message: "buffer is destroyed or not mappable".to_string(),
            });
        }

        let start = (offset as usize).min(buffer.data.len());
        let end = (start + size as usize).min(buffer.data.len());
        Ok(buffer.data[start..end].to_vec())
    }
}

/// Read access to the state of a [`HeadlessBackend`].
#[derive(Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessProbe {
    /// Call counters.
    pub fn stats(&self) -> HeadlessStats {
        self.state.borrow().stats
    }

    /// Current content of a buffer.
    pub fn buffer_data(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .map(|buffer| buffer.data.clone())
    }

    /// `true` if the buffer exists and has been destroyed.
    pub fn is_buffer_destroyed(&self, buffer: BufferId) -> bool {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .is_some_and(|buffer| buffer.destroyed)
    }

    /// Description of a live texture.
    pub fn texture(&self, texture: TextureId) -> Option<TextureDescriptor> {
        self.state.borrow().textures.get(&texture).cloned()
    }

    /// Source code of a compiled shader module.
    pub fn shader_code(&self, module: ShaderModuleId) -> Option<String> {
        self.state.borrow().shader_modules.get(&module).cloned()
    }

    /// Label of a compiled pipeline.
    pub fn pipeline_label(&self, pipeline: PipelineId) -> Option<String> {
        self.state.borrow().pipeline_labels.get(&pipeline).cloned()
    }

    /// Every frame submitted so far.
    pub fn frames(&self) -> Ref<'_, [CommandEncoder]> {
        Ref::map(self.state.borrow(), |state| state.frames.as_slice())
    }

    /// The last submitted frame.
    pub fn last_frame(&self) -> Option<CommandEncoder> {
        self.state.borrow().frames.last().cloned()
    }

    /// Makes every following pipeline creation fail with `message`, or
    /// succeed again with `None`.
    pub fn set_pipeline_failure(&self, message: Option<&str>) {
        self.state.borrow_mut().pipeline_failure = message.map(str::to_string);
    }
}
