//! State shared by render and compute materials.

use crate::context::Context;
use crate::error::Result;
use crate::pipeline::{PipelineEntryRef, PipelineManager};
use crate::resource::{
    BindGroup, BindGroupRef, Binding, BindingRef, BindingType, BufferBinding, BufferBindingParams,
    InputValue, SamplerRef, TextureRef, WritableBufferBinding,
};
use crate::utils::generate_uid;

/// A storage binding written by compute shaders.
pub struct WritableStorageParams {
    pub params: BufferBindingParams,
    /// Copy the content into a mappable buffer after each compute pass.
    pub should_copy_result: bool,
}

/// Bindings and options of a material.
#[derive(Default)]
pub struct MaterialParams {
    pub label: String,
    pub uniforms: Vec<BufferBindingParams>,
    pub storages: Vec<BufferBindingParams>,
    pub writable_storages: Vec<WritableStorageParams>,
    /// Textures bound in the texture bind group.
    pub textures: Vec<TextureRef>,
    /// Samplers bound in the texture bind group. The renderer's default
    /// sampler is added when textures are given without any sampler.
    pub samplers: Vec<SamplerRef>,
    /// Bind groups created elsewhere, bound after the material's own.
    pub bind_groups: Vec<BindGroupRef>,
    /// Compile the pipeline without blocking the frame.
    pub use_async_pipeline: bool,
}

impl MaterialParams {
    pub fn new(label: impl Into<String>) -> Self {
        MaterialParams {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_uniform(mut self, params: BufferBindingParams) -> Self {
        self.uniforms.push(params);
        self
    }

    pub fn with_storage(mut self, params: BufferBindingParams) -> Self {
        self.storages.push(params);
        self
    }

    pub fn with_writable_storage(
        mut self,
        params: BufferBindingParams,
        should_copy_result: bool,
    ) -> Self {
        self.writable_storages.push(WritableStorageParams {
            params,
            should_copy_result,
        });
        self
    }

    pub fn with_texture(mut self, texture: TextureRef) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerRef) -> Self {
        self.samplers.push(sampler);
        self
    }

    pub fn with_bind_group(mut self, bind_group: BindGroupRef) -> Self {
        self.bind_groups.push(bind_group);
        self
    }

    pub fn with_async_pipeline(mut self) -> Self {
        self.use_async_pipeline = true;
        self
    }
}

/// The bind groups and pipeline entry of a material.
///
/// Bind groups are ordered once, when first created: the texture group,
/// then the camera group of projected render materials, then the input
/// group, then the bind groups supplied by the user. The position of a bind
/// group in that order is its `@group` index.
pub struct MaterialBase {
    pub uid: u64,
    pub label: String,
    textures_group: BindGroupRef,
    inputs_group: BindGroupRef,
    extra_groups: Vec<BindGroupRef>,
    bind_groups: Vec<BindGroupRef>,
    ordered: bool,
    pipeline_entry: Option<PipelineEntryRef>,
    use_async_pipeline: bool,
}

impl MaterialBase {
    /// Creates the bindings described by `params`. With `visibility` set,
    /// every buffer binding is made visible to those stages only.
    pub fn new(
        ctx: &mut Context,
        params: MaterialParams,
        visibility: Option<wgpu::ShaderStages>,
    ) -> Result<Self> {
        let restrict = |mut params: BufferBindingParams| {
            if let Some(visibility) = visibility {
                params.visibility = visibility;
            }
            params
        };

        let mut inputs = BindGroup::new(format!("{} inputs", params.label));
        for uniform in params.uniforms {
            let binding = BufferBinding::new(ctx, restrict(uniform))?;
            inputs.add_binding(Binding::Buffer(binding).into_ref());
        }
        for storage in params.storages {
            let mut storage = restrict(storage);
            storage.binding_type = BindingType::Storage;
            let binding = BufferBinding::new(ctx, storage)?;
            inputs.add_binding(Binding::Buffer(binding).into_ref());
        }
        for writable in params.writable_storages {
            let binding =
                WritableBufferBinding::new(ctx, writable.params, writable.should_copy_result)?;
            inputs.add_binding(Binding::WritableBuffer(binding).into_ref());
        }

        let mut textures = BindGroup::textures(format!("{} textures", params.label));
        for texture in params.textures {
            textures.add_texture(texture);
        }
        for sampler in params.samplers {
            textures.add_sampler(sampler);
        }

        Ok(MaterialBase {
            uid: generate_uid(),
            label: params.label,
            textures_group: textures.into_ref(),
            inputs_group: inputs.into_ref(),
            extra_groups: params.bind_groups,
            bind_groups: Vec::new(),
            ordered: false,
            pipeline_entry: None,
            use_async_pipeline: params.use_async_pipeline,
        })
    }

    /// The bind groups in `@group` order. Empty until the material has been
    /// compiled once.
    pub fn bind_groups(&self) -> &[BindGroupRef] {
        &self.bind_groups
    }

    pub fn textures_group(&self) -> &BindGroupRef {
        &self.textures_group
    }

    pub fn inputs_group(&self) -> &BindGroupRef {
        &self.inputs_group
    }

    pub fn pipeline_entry(&self) -> Option<&PipelineEntryRef> {
        self.pipeline_entry.as_ref()
    }

    pub fn set_pipeline_entry(&mut self, entry: Option<PipelineEntryRef>) {
        self.pipeline_entry = entry;
    }

    pub fn use_async_pipeline(&self) -> bool {
        self.use_async_pipeline
    }

    /// Adds a texture to the texture bind group.
    pub fn add_texture(&mut self, texture: TextureRef) {
        self.textures_group.borrow_mut().add_texture(texture);
    }

    /// Orders the bind groups on first use, then creates every bind group
    /// missing its GPU object.
    pub fn create_bind_groups(
        &mut self,
        ctx: &mut Context,
        camera: Option<&BindGroupRef>,
        default_sampler: Option<&SamplerRef>,
    ) -> Result<()> {
        if !self.ordered {
            {
                let mut textures = self.textures_group.borrow_mut();
                if !textures.textures_list().is_empty() && textures.samplers().is_empty() {
                    if let Some(sampler) = default_sampler {
                        textures.add_sampler(sampler.clone());
                    }
                }
            }

            let mut ordered = Vec::new();
            if !self.textures_group.borrow().bindings().is_empty() {
                ordered.push(self.textures_group.clone());
            }
            ordered.extend(camera.cloned());
            if !self.inputs_group.borrow().bindings().is_empty() {
                ordered.push(self.inputs_group.clone());
            }
            ordered.extend(self.extra_groups.iter().cloned());

            for bind_group in &ordered {
                bind_group.borrow_mut().add_consumer(self.uid);
            }

            self.bind_groups = ordered;
            self.ordered = true;
        }

        self.reindex();
        for bind_group in &self.bind_groups {
            bind_group.borrow_mut().create_bind_group(ctx)?;
        }

        Ok(())
    }

    /// Gives each bind group its position as index. Shared bind groups may
    /// sit at different positions in different materials.
    pub fn reindex(&self) {
        for (i, bind_group) in self.bind_groups.iter().enumerate() {
            bind_group.borrow_mut().set_index(i as u32);
        }
    }

    /// `true` once every bind group exists and the pipeline is compiled.
    pub fn ready(&self) -> bool {
        self.ordered
            && self
                .bind_groups
                .iter()
                .all(|bind_group| bind_group.borrow().bind_group().is_some())
            && self
                .pipeline_entry
                .as_ref()
                .is_some_and(|entry| entry.borrow().ready())
    }

    fn layouts_changed(&self, entry: &PipelineEntryRef) -> bool {
        let entry = entry.borrow();
        let Some(patched) = entry.patched_shaders() else {
            return false;
        };

        let layouts: Vec<_> = self
            .bind_groups
            .iter()
            .filter_map(|bind_group| bind_group.borrow().layout())
            .collect();
        layouts != patched.bind_group_layouts
    }

    /// Updates every bind group, then recompiles the pipeline if a layout
    /// changed underneath it.
    pub fn update_bind_groups(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
    ) -> Result<()> {
        for bind_group in &self.bind_groups {
            bind_group.borrow_mut().update(ctx)?;
        }

        let Some(entry) = self.pipeline_entry.clone() else {
            return Ok(());
        };

        let flagged = self
            .bind_groups
            .iter()
            .any(|bind_group| bind_group.borrow().needs_pipeline_flush());

        if (flagged || self.layouts_changed(&entry)) && entry.borrow().ready() {
            log::debug!("curtains: flushing pipeline of material `{}`", self.label);
            self.reindex();
            let entry = manager.flush_pipeline_entry(ctx, &entry, &self.bind_groups, self.uid)?;
            self.pipeline_entry = Some(entry);
        }

        for bind_group in &self.bind_groups {
            bind_group.borrow_mut().clear_pipeline_flush();
        }
        Ok(())
    }

    /// The binding named `name` in any of the bind groups.
    pub fn binding(&self, name: &str) -> Option<BindingRef> {
        [&self.textures_group, &self.inputs_group]
            .into_iter()
            .chain(self.extra_groups.iter())
            .find_map(|bind_group| bind_group.borrow().binding(name))
    }

    /// Sets the value of an input of a buffer binding.
    pub fn set_input(&self, binding: &str, input: &str, value: impl Into<InputValue>) -> bool {
        let Some(binding) = self.binding(binding) else {
            return false;
        };
        let mut binding = binding.borrow_mut();

        match binding.as_buffer_mut().and_then(|b| b.input_mut(input)) {
            Some(input) => {
                input.set_value(value);
                true
            }
            None => false,
        }
    }

    /// Releases the bind groups and the pipeline entry.
    pub fn destroy(&mut self, ctx: &mut Context, manager: &mut PipelineManager) {
        for bind_group in &self.bind_groups {
            bind_group.borrow_mut().release(ctx, self.uid);
        }

        if let Some(entry) = self.pipeline_entry.take() {
            manager.remove_pipeline_entry(&entry, self.uid);
        }
    }

    /// Forgets every GPU handle of the bind groups after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        for bind_group in self.all_groups() {
            bind_group.borrow_mut().reset_gpu_handles();
        }
    }

    fn all_groups(&self) -> Vec<BindGroupRef> {
        if self.ordered {
            self.bind_groups.clone()
        } else {
            let mut groups = vec![self.textures_group.clone(), self.inputs_group.clone()];
            groups.extend(self.extra_groups.iter().cloned());
            groups
        }
    }
}

/// Behavior shared by render and compute materials.
pub trait Material {
    fn base(&self) -> &MaterialBase;
    fn base_mut(&mut self) -> &mut MaterialBase;

    fn uid(&self) -> u64 {
        self.base().uid
    }

    fn label(&self) -> &str {
        &self.base().label
    }

    /// `true` once the material can be drawn or dispatched.
    fn ready(&self) -> bool {
        self.base().ready()
    }

    fn bind_groups(&self) -> &[BindGroupRef] {
        self.base().bind_groups()
    }

    fn binding(&self, name: &str) -> Option<BindingRef> {
        self.base().binding(name)
    }

    fn set_input(&self, binding: &str, input: &str, value: InputValue) -> bool {
        self.base().set_input(binding, input, value)
    }

    /// Runs once per frame before drawing.
    fn update_bind_groups(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
    ) -> Result<()> {
        self.base_mut().update_bind_groups(ctx, manager)
    }

    fn destroy(&mut self, ctx: &mut Context, manager: &mut PipelineManager) {
        self.base_mut().destroy(ctx, manager)
    }

    fn reset_gpu_handles(&mut self) {
        self.base_mut().reset_gpu_handles()
    }
}
