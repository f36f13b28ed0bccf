//! The wgpu implementation of [`GpuBackend`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{
    BindGroupEntry, BindGroupId, BindGroupLayoutEntry, BindGroupLayoutId, BindingLayout,
    BindingResource, BufferDescriptor, BufferId, ColorTarget, CommandEncoder, ComputeCommand,
    ComputePipelineDescriptor, EncodedCommand, GpuBackend, LoadOp, PipelineId, PipelineLayoutId,
    RenderCommand, RenderPassRecord, RenderPipelineDescriptor, SamplerDescriptor, SamplerId,
    ShaderModuleId, TextureDescriptor, TextureId,
};
use crate::error::{Error, Result};

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// A [`GpuBackend`] executing frames on a wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
    surface: Option<(wgpu::Surface<'static>, wgpu::SurfaceConfiguration)>,
    format: wgpu::TextureFormat,
    size: (u32, u32),
    next_id: u64,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    textures: HashMap<TextureId, GpuTexture>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    bind_group_layouts: HashMap<BindGroupLayoutId, wgpu::BindGroupLayout>,
    bind_groups: HashMap<BindGroupId, wgpu::BindGroup>,
    shader_modules: HashMap<ShaderModuleId, wgpu::ShaderModule>,
    pipeline_layouts: HashMap<PipelineLayoutId, wgpu::PipelineLayout>,
    render_pipelines: HashMap<PipelineId, wgpu::RenderPipeline>,
    compute_pipelines: HashMap<PipelineId, wgpu::ComputePipeline>,
}

impl WgpuBackend {
    /// Initializes wgpu, optionally rendering to the given surface target.
    ///
    /// # Arguments
    /// * `target` - Window or canvas to present to, `None` for offscreen use
    /// * `width` - Initial surface width in pixels
    /// * `height` - Initial surface height in pixels
    pub async fn new(
        target: Option<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = match target {
            Some(target) => Some(instance.create_surface(target)?),
            None => None,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: surface.as_ref(),
                force_fallback_adapter: false,
            })
            .await?;

        let required_features = adapter.features() & wgpu::Features::EXTERNAL_TEXTURE;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("curtains device"),
                required_features,
                ..Default::default()
            })
            .await?;

        let size = (width.max(1), height.max(1));
        let (surface, format) = match surface {
            Some(surface) => {
                let caps = surface.get_capabilities(&adapter);
                let format = caps
                    .formats
                    .iter()
                    .find(|f| !f.is_srgb())
                    .copied()
                    .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);
                let config = wgpu::SurfaceConfiguration {
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                    format,
                    width: size.0,
                    height: size.1,
                    present_mode: wgpu::PresentMode::AutoVsync,
                    alpha_mode: caps
                        .alpha_modes
                        .first()
                        .copied()
                        .unwrap_or(wgpu::CompositeAlphaMode::Auto),
                    view_formats: vec![],
                    desired_maximum_frame_latency: 2,
                };
                surface.configure(&device, &config);
                (Some((surface, config)), format)
            }
            None => (None, wgpu::TextureFormat::Bgra8Unorm),
        };

        log::info!(
            "curtains: using adapter `{}` ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(WgpuBackend {
            device,
            queue,
            adapter,
            surface,
            format,
            size,
            next_id: 0,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            shader_modules: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            render_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
        })
    }

    /// Initializes wgpu presenting to a winit window.
    pub async fn from_window(window: Arc<winit::window::Window>) -> Result<Self> {
        let size = window.inner_size();
        Self::new(Some(window.into()), size.width, size.height).await
    }

    /// The wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The adapter the device was requested from.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Runs `f` inside a validation error scope and returns the captured
    /// error message, if any.
    fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<String>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);

        #[cfg(not(target_arch = "wasm32"))]
        let error = pollster::block_on(self.device.pop_error_scope()).map(|e| e.to_string());
        #[cfg(target_arch = "wasm32")]
        let error = {
            let _ = self.device.pop_error_scope();
            None
        };

        (value, error)
    }

    fn layout_entry(&self, entry: &BindGroupLayoutEntry) -> wgpu::BindGroupLayoutEntry {
        let ty = match &entry.layout {
            BindingLayout::Buffer { ty } => wgpu::BindingType::Buffer {
                ty: *ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingLayout::Texture {
                sample_type,
                view_dimension,
                multisampled,
            } => wgpu::BindingType::Texture {
                sample_type: *sample_type,
                view_dimension: *view_dimension,
                multisampled: *multisampled,
            },
            BindingLayout::StorageTexture {
                access,
                format,
                view_dimension,
            } => wgpu::BindingType::StorageTexture {
                access: *access,
                format: *format,
                view_dimension: *view_dimension,
            },
            BindingLayout::ExternalTexture
                if self
                    .device
                    .features()
                    .contains(wgpu::Features::EXTERNAL_TEXTURE) =>
            {
                wgpu::BindingType::ExternalTexture
            }
            BindingLayout::ExternalTexture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            BindingLayout::Sampler(ty) => wgpu::BindingType::Sampler(*ty),
        };

        wgpu::BindGroupLayoutEntry {
            binding: entry.binding,
            visibility: entry.visibility,
            ty,
            count: None,
        }
    }

    fn color_view<'a>(
        &'a self,
        target: ColorTarget,
        surface_view: Option<&'a wgpu::TextureView>,
    ) -> Option<&'a wgpu::TextureView> {
        match target {
            ColorTarget::Surface => surface_view,
            ColorTarget::Texture(id) => self.textures.get(&id).map(|t| &t.view),
        }
    }

    fn encode_render_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        record: &RenderPassRecord,
        surface_view: Option<&wgpu::TextureView>,
    ) {
        let color_attachments: Vec<_> = record
            .color_attachments
            .iter()
            .map(|attachment| {
                let view = self.color_view(attachment.view, surface_view)?;
                let resolve_target = attachment
                    .resolve_target
                    .and_then(|target| self.color_view(target, surface_view));

                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: match attachment.load {
                            LoadOp::Clear(color) => wgpu::LoadOp::Clear(color),
                            LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: store_op(attachment.store),
                    },
                })
            })
            .collect();

        let depth_stencil_attachment = record.depth_attachment.and_then(|depth| {
            Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.textures.get(&depth.texture)?.view,
                depth_ops: Some(wgpu::Operations {
                    load: match depth.load {
                        LoadOp::Clear(value) => wgpu::LoadOp::Clear(value),
                        LoadOp::Load => wgpu::LoadOp::Load,
                    },
                    store: store_op(depth.store),
                }),
                stencil_ops: None,
            })
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(&record.label),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for command in &record.commands {
            match command {
                RenderCommand::SetPipeline(id) => {
                    if let Some(pipeline) = self.render_pipelines.get(id) {
                        pass.set_pipeline(pipeline);
                    }
                }
                RenderCommand::SetBindGroup { index, bind_group } => {
                    pass.set_bind_group(*index, self.bind_groups.get(bind_group), &[]);
                }
                RenderCommand::SetVertexBuffer { slot, buffer } => {
                    if let Some(buffer) = self.buffers.get(buffer) {
                        pass.set_vertex_buffer(*slot, buffer.slice(..));
                    }
                }
                RenderCommand::SetIndexBuffer { buffer, format } => {
                    if let Some(buffer) = self.buffers.get(buffer) {
                        pass.set_index_buffer(buffer.slice(..), *format);
                    }
                }
                RenderCommand::Draw {
                    vertices,
                    instances,
                } => pass.draw(0..*vertices, 0..*instances),
                RenderCommand::DrawIndexed { indices, instances } => {
                    pass.draw_indexed(0..*indices, 0, 0..*instances)
                }
            }
        }
    }
}

fn store_op(store: bool) -> wgpu::StoreOp {
    if store {
        wgpu::StoreOp::Store
    } else {
        wgpu::StoreOp::Discard
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn preferred_format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));

        if let Some((surface, config)) = &mut self.surface {
            config.width = self.size.0;
            config.height = self.size.1;
            surface.configure(&self.device, config);
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BufferId {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size,
            usage: desc.usage,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id());
        let _ = self.buffers.insert(id, buffer);
        id
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        if let Some(buffer) = self.buffers.get(&buffer) {
            self.queue.write_buffer(buffer, offset, data);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_level_count.max(1),
            sample_count: desc.sample_count.max(1),
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.next_id());
        let _ = self.textures.insert(id, GpuTexture { texture, view });
        id
    }

    fn write_texture(&mut self, texture: TextureId, data: &[u8], width: u32, height: u32) {
        let Some(texture) = self.textures.get(&texture) else {
            return;
        };
        let bytes_per_texel = texture.texture.format().block_copy_size(None).unwrap_or(4);

        self.queue.write_texture(
            texture.texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_texel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(texture) = self.textures.remove(&texture) {
            texture.texture.destroy();
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> SamplerId {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&desc.label),
            address_mode_u: desc.address_mode_u,
            address_mode_v: desc.address_mode_v,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: desc.mag_filter,
            min_filter: desc.min_filter,
            mipmap_filter: desc.mipmap_filter,
            compare: desc.compare,
            anisotropy_clamp: desc.max_anisotropy.max(1),
            ..Default::default()
        });
        let id = SamplerId(self.next_id());
        let _ = self.samplers.insert(id, sampler);
        id
    }

    fn create_bind_group_layout(
        &mut self,
        label: &str,
        entries: &[BindGroupLayoutEntry],
    ) -> BindGroupLayoutId {
        let entries: Vec<_> = entries.iter().map(|e| self.layout_entry(e)).collect();
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            });
        let id = BindGroupLayoutId(self.next_id());
        let _ = self.bind_group_layouts.insert(id, layout);
        id
    }

    fn create_bind_group(
        &mut self,
        label: &str,
        layout: BindGroupLayoutId,
        entries: &[BindGroupEntry],
    ) -> BindGroupId {
        let id = BindGroupId(self.next_id());
        let Some(layout) = self.bind_group_layouts.get(&layout) else {
            log::error!("curtains: bind group `{}` uses an unknown layout", label);
            return id;
        };

        // Views are created per bind group so that each entry can pick its own
        // dimension.
        let views: Vec<Option<wgpu::TextureView>> = entries
            .iter()
            .map(|entry| match entry.resource {
                BindingResource::TextureView { texture, dimension } => {
                    self.textures.get(&texture).map(|t| {
                        t.texture.create_view(&wgpu::TextureViewDescriptor {
                            dimension: Some(dimension),
                            ..Default::default()
                        })
                    })
                }
                _ => None,
            })
            .collect();

        let wgpu_entries: Vec<_> = entries
            .iter()
            .zip(views.iter())
            .filter_map(|(entry, view)| {
                let resource = match entry.resource {
                    BindingResource::Buffer(buffer) => {
                        self.buffers.get(&buffer)?.as_entire_binding()
                    }
                    BindingResource::TextureView { .. } => {
                        wgpu::BindingResource::TextureView(view.as_ref()?)
                    }
                    BindingResource::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(self.samplers.get(&sampler)?)
                    }
                };

                Some(wgpu::BindGroupEntry {
                    binding: entry.binding,
                    resource,
                })
            })
            .collect();

        if wgpu_entries.len() != entries.len() {
            log::error!("curtains: bind group `{}` references dead resources", label);
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &wgpu_entries,
        });
        let _ = self.bind_groups.insert(id, bind_group);
        id
    }

    fn create_shader_module(&mut self, label: &str, code: &str) -> Result<ShaderModuleId> {
        let (module, error) = self.validated(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(code.into()),
            })
        });

        if let Some(message) = error {
            return Err(Error::ShaderModule {
                label: label.to_string(),
                message,
            });
        }

        let id = ShaderModuleId(self.next_id());
        let _ = self.shader_modules.insert(id, module);
        Ok(id)
    }

    fn create_pipeline_layout(
        &mut self,
        label: &str,
        bind_group_layouts: &[BindGroupLayoutId],
    ) -> PipelineLayoutId {
        let layouts: Vec<_> = bind_group_layouts
            .iter()
            .filter_map(|id| self.bind_group_layouts.get(id))
            .collect();
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });
        let id = PipelineLayoutId(self.next_id());
        let _ = self.pipeline_layouts.insert(id, layout);
        id
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> Result<PipelineId> {
        let compile_error = |message: &str| Error::PipelineCompilation {
            label: desc.label.clone(),
            message: message.to_string(),
        };

        let layout = self
            .pipeline_layouts
            .get(&desc.layout)
            .ok_or_else(|| compile_error("unknown pipeline layout"))?;
        let vertex_module = self
            .shader_modules
            .get(&desc.vertex.module)
            .ok_or_else(|| compile_error("unknown vertex shader module"))?;
        let fragment_module = match &desc.fragment {
            Some(stage) => Some(
                self.shader_modules
                    .get(&stage.module)
                    .ok_or_else(|| compile_error("unknown fragment shader module"))?,
            ),
            None => None,
        };

        let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_buffers
            .iter()
            .map(|buffer| {
                buffer
                    .attributes
                    .iter()
                    .map(|attribute| wgpu::VertexAttribute {
                        format: attribute.format,
                        offset: attribute.offset,
                        shader_location: attribute.shader_location,
                    })
                    .collect()
            })
            .collect();
        let buffers: Vec<_> = desc
            .vertex_buffers
            .iter()
            .zip(attributes.iter())
            .map(|(buffer, attributes)| wgpu::VertexBufferLayout {
                array_stride: buffer.array_stride,
                step_mode: buffer.step_mode,
                attributes,
            })
            .collect();
        let targets: Vec<_> = desc.targets.iter().cloned().map(Some).collect();

        let (pipeline, error) = self.validated(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: vertex_module,
                    entry_point: Some(&desc.vertex.entry_point),
                    compilation_options: Default::default(),
                    buffers: &buffers,
                },
                fragment: desc.fragment.as_ref().zip(fragment_module).map(
                    |(stage, module)| wgpu::FragmentState {
                        module,
                        entry_point: Some(&stage.entry_point),
                        compilation_options: Default::default(),
                        targets: &targets,
                    },
                ),
                primitive: desc.primitive,
                depth_stencil: desc.depth_stencil.clone(),
                multisample: desc.multisample,
                multiview: None,
                cache: None,
            })
        });

        if let Some(message) = error {
            return Err(compile_error(&message));
        }

        let id = PipelineId(self.next_id());
        let _ = self.render_pipelines.insert(id, pipeline);
        Ok(id)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> Result<PipelineId> {
        let compile_error = |message: &str| Error::PipelineCompilation {
            label: desc.label.clone(),
            message: message.to_string(),
        };

        let layout = self
            .pipeline_layouts
            .get(&desc.layout)
            .ok_or_else(|| compile_error("unknown pipeline layout"))?;
        let module = self
            .shader_modules
            .get(&desc.compute.module)
            .ok_or_else(|| compile_error("unknown compute shader module"))?;

        let (pipeline, error) = self.validated(|device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(layout),
                module,
                entry_point: Some(&desc.compute.entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        });

        if let Some(message) = error {
            return Err(compile_error(&message));
        }

        let id = PipelineId(self.next_id());
        let _ = self.compute_pipelines.insert(id, pipeline);
        Ok(id)
    }

    fn submit(&mut self, encoder: CommandEncoder) -> Result<()> {
        let surface_texture = match &self.surface {
            Some((surface, _)) if encoder.uses_surface() => Some(surface.get_current_texture()?),
            _ => None,
        };
        let surface_view = surface_texture
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let mut gpu_encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&encoder.label),
            });

        for command in &encoder.commands {
            match command {
                EncodedCommand::RenderPass(record) => {
                    self.encode_render_pass(&mut gpu_encoder, record, surface_view.as_ref())
                }
                EncodedCommand::ComputePass(record) => {
                    let mut pass = gpu_encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(&record.label),
                        timestamp_writes: None,
                    });

                    for command in &record.commands {
                        match command {
                            ComputeCommand::SetPipeline(id) => {
                                if let Some(pipeline) = self.compute_pipelines.get(id) {
                                    pass.set_pipeline(pipeline);
                                }
                            }
                            ComputeCommand::SetBindGroup { index, bind_group } => {
                                pass.set_bind_group(*index, self.bind_groups.get(bind_group), &[]);
                            }
                            ComputeCommand::Dispatch { x, y, z } => {
                                pass.dispatch_workgroups(*x, *y, *z)
                            }
                        }
                    }
                }
                EncodedCommand::CopyBufferToBuffer {
                    source,
                    destination,
                    size,
                } => {
                    if let (Some(source), Some(destination)) =
                        (self.buffers.get(source), self.buffers.get(destination))
                    {
                        gpu_encoder.copy_buffer_to_buffer(source, 0, destination, 0, *size);
                    }
                }
                EncodedCommand::CopyTextureToTexture {
                    source,
                    destination,
                    width,
                    height,
                } => {
                    let source = match source {
                        ColorTarget::Surface => surface_texture.as_ref().map(|f| &f.texture),
                        ColorTarget::Texture(id) => self.textures.get(id).map(|t| &t.texture),
                    };

                    if let (Some(source), Some(destination)) =
                        (source, self.textures.get(destination))
                    {
                        gpu_encoder.copy_texture_to_texture(
                            source.as_image_copy(),
                            destination.texture.as_image_copy(),
                            wgpu::Extent3d {
                                width: *width,
                                height: *height,
                                depth_or_array_layers: 1,
                            },
                        );
                    }
                }
            }
        }

        let _ = self.queue.submit(std::iter::once(gpu_encoder.finish()));

        if let Some(frame) = surface_texture {
            frame.present();
        }

        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let buffer = self.buffers.get(&buffer).ok_or_else(|| Error::BufferMap {
            label: format!("{:?}", buffer),
            message: "unknown buffer".to_string(),
        })?;

        let slice = buffer.slice(offset..offset + size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());

        let mapped = rx.recv().map_err(|e| e.to_string()).and_then(|result| {
            result.map_err(|e| e.to_string())
        });
        if let Err(message) = mapped {
            return Err(Error::BufferMap {
                label: "result buffer".to_string(),
                message,
            });
        }

        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}
