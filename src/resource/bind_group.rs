//! Bind groups.
//!
//! A bind group aggregates bindings into a GPU bind group and its layout.
//! Bindings invalidate their bind group through two independent channels:
//! a layout reset recreates the layout, the bind group and every pipeline
//! using it, while a bind group reset only recreates the bind group.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::context::{
    BindGroupEntry, BindGroupId, BindGroupLayoutEntry, BindGroupLayoutId, Context,
    PostSubmitTask,
};
use crate::error::{Error, Result};
use crate::resource::{
    Binding, BindingRef, BindingResets, BufferInput, InputValue, SamplerRef, SharedBuffer,
    TextureRef,
};
use crate::utils::generate_uid;

/// A bind group shared between materials.
pub type BindGroupRef = Rc<RefCell<BindGroup>>;

/// What a bind group holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindGroupKind {
    /// Buffer bindings.
    Buffers,
    /// Textures and samplers.
    Textures,
}

/// A group of bindings sharing one `@group` index.
#[derive(Debug)]
pub struct BindGroup {
    pub uid: u64,
    pub label: String,
    kind: BindGroupKind,
    index: u32,
    bindings: Vec<BindingRef>,
    textures: Vec<TextureRef>,
    samplers: Vec<SamplerRef>,
    layout_cache_key: String,
    pipeline_cache_key: String,
    layout: Option<BindGroupLayoutId>,
    bind_group: Option<BindGroupId>,
    needs_pipeline_flush: bool,
    last_reset_frame: Option<u64>,
    consumers: HashSet<u64>,
}

impl BindGroup {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_kind(label, BindGroupKind::Buffers)
    }

    /// Creates a bind group holding textures and samplers.
    pub fn textures(label: impl Into<String>) -> Self {
        Self::with_kind(label, BindGroupKind::Textures)
    }

    fn with_kind(label: impl Into<String>, kind: BindGroupKind) -> Self {
        BindGroup {
            uid: generate_uid(),
            label: label.into(),
            kind,
            index: 0,
            bindings: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            layout_cache_key: String::new(),
            pipeline_cache_key: String::new(),
            layout: None,
            bind_group: None,
            needs_pipeline_flush: false,
            last_reset_frame: None,
            consumers: HashSet::new(),
        }
    }

    pub fn into_ref(self) -> BindGroupRef {
        Rc::new(RefCell::new(self))
    }

    pub fn kind(&self) -> BindGroupKind {
        self.kind
    }

    /// The `@group` index of this bind group.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    pub fn bindings(&self) -> &[BindingRef] {
        &self.bindings
    }

    pub fn textures_list(&self) -> &[TextureRef] {
        &self.textures
    }

    pub fn samplers(&self) -> &[SamplerRef] {
        &self.samplers
    }

    /// Appends a binding. Adding a binding to a created bind group changes
    /// its layout.
    pub fn add_binding(&mut self, binding: BindingRef) {
        if self.layout.is_some() {
            binding.borrow_mut().base_mut().resets |= BindingResets::LAYOUT;
        }
        self.bindings.push(binding);
    }

    pub fn add_bindings(&mut self, bindings: impl IntoIterator<Item = BindingRef>) {
        for binding in bindings {
            self.add_binding(binding);
        }
    }

    /// Appends a texture and its binding.
    pub fn add_texture(&mut self, texture: TextureRef) {
        let binding = texture.borrow().binding().clone();
        self.add_binding(binding);
        self.textures.push(texture);
    }

    /// Appends a sampler and its binding.
    pub fn add_sampler(&mut self, sampler: SamplerRef) {
        let binding = sampler.borrow().binding().clone();
        self.add_binding(binding);
        self.samplers.push(sampler);
    }

    /// The binding whose WGSL name is `name`.
    pub fn binding(&self, name: &str) -> Option<BindingRef> {
        self.bindings
            .iter()
            .find(|binding| binding.borrow().name() == name)
            .cloned()
    }

    /// Replaces the value of an input of one of the buffer bindings.
    ///
    /// Returns `false` if no such input exists.
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

    /// Names of the bindings, in binding order.
    pub fn binding_names(&self) -> String {
        self.bindings
            .iter()
            .map(|binding| binding.borrow().name().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn layout_cache_key(&self) -> &str {
        &self.layout_cache_key
    }

    pub fn pipeline_cache_key(&self) -> &str {
        &self.pipeline_cache_key
    }

    pub fn layout(&self) -> Option<BindGroupLayoutId> {
        self.layout
    }

    pub fn bind_group(&self) -> Option<BindGroupId> {
        self.bind_group
    }

    /// `true` once the layout changed underneath pipelines using it.
    pub fn needs_pipeline_flush(&self) -> bool {
        self.needs_pipeline_flush
    }

    pub fn clear_pipeline_flush(&mut self) {
        self.needs_pipeline_flush = false;
    }

    /// `true` if the bind group has not been created yet and has something
    /// to bind.
    pub fn should_create_bind_group(&self) -> bool {
        self.bind_group.is_none() && !self.bindings.is_empty()
    }

    fn buffers(&self) -> Vec<SharedBuffer> {
        let mut buffers = Vec::new();

        for binding in &self.bindings {
            let binding = binding.borrow();
            if let Some(buffer) = binding.as_buffer() {
                buffers.push(buffer.buffer().clone());
            }
            if let Some(result) = binding.as_writable().and_then(|w| w.result_buffer()) {
                buffers.push(result.clone());
            }
        }

        buffers
    }

    fn create_resources(&mut self, ctx: &mut Context) {
        for texture in &self.textures {
            texture.borrow_mut().create_texture(ctx);
        }
        for sampler in &self.samplers {
            sampler.borrow_mut().create_sampler(ctx);
        }

        for binding in &self.bindings {
            let mut binding = binding.borrow_mut();
            match &mut *binding {
                Binding::Buffer(b) => {
                    b.update();
                    b.create_buffer(ctx);
                    b.write(ctx);
                }
                Binding::WritableBuffer(b) => {
                    b.inner.update();
                    b.create_buffers(ctx);
                    b.inner.write(ctx);
                }
                _ => {}
            }
        }

        for buffer in self.buffers() {
            buffer.borrow_mut().add_consumer(self.uid);
        }
    }

    fn rebuild_cache_keys(&mut self) {
        self.layout_cache_key.clear();
        self.pipeline_cache_key.clear();

        for binding in &self.bindings {
            let binding = binding.borrow();
            self.layout_cache_key
                .push_str(&binding.resource_layout_cache_key());
            self.pipeline_cache_key.push_str(binding.cache_key());
        }
    }

    fn create_layout(&mut self, ctx: &mut Context) -> BindGroupLayoutId {
        self.rebuild_cache_keys();

        let entries: Vec<_> = self
            .bindings
            .iter()
            .enumerate()
            .map(|(i, binding)| {
                let binding = binding.borrow();
                BindGroupLayoutEntry {
                    binding: i as u32,
                    visibility: binding.visibility(),
                    layout: binding.resource_layout(),
                }
            })
            .collect();

        let layout = ctx.get_or_create_bind_group_layout(
            &self.layout_cache_key,
            &format!("{} layout", self.label),
            &entries,
        );
        self.layout = Some(layout);
        layout
    }

    fn create_gpu_bind_group(
        &mut self,
        ctx: &mut Context,
        layout: BindGroupLayoutId,
    ) -> Result<()> {
        let entries = self
            .bindings
            .iter()
            .enumerate()
            .map(|(i, binding)| {
                let binding = binding.borrow();
                binding
                    .resource()
                    .map(|resource| BindGroupEntry {
                        binding: i as u32,
                        resource,
                    })
                    .ok_or_else(|| {
                        Error::MissingBinding(format!("`{}` in `{}`", binding.name(), self.label))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        self.bind_group = Some(ctx.create_bind_group(&self.label, layout, &entries));
        Ok(())
    }

    /// Creates every missing GPU resource, the layout and the bind group.
    ///
    /// Does nothing if [`BindGroup::should_create_bind_group`] is `false`.
    pub fn create_bind_group(&mut self, ctx: &mut Context) -> Result<()> {
        if !self.should_create_bind_group() {
            return Ok(());
        }

        self.create_resources(ctx);
        let layout = match self.layout {
            Some(layout) => layout,
            None => self.create_layout(ctx),
        };
        self.create_gpu_bind_group(ctx, layout)
    }

    /// Recreates the bind group, keeping the layout.
    pub fn reset_bind_group(&mut self, ctx: &mut Context) -> Result<()> {
        self.bind_group = None;
        self.create_bind_group(ctx)
    }

    /// Recreates the layout and the bind group, and flags pipelines using
    /// the old layout for a flush.
    pub fn reset_bind_group_layout(&mut self, ctx: &mut Context) -> Result<()> {
        let had_layout = self.layout.is_some();
        let previous = self.layout_cache_key.clone();

        self.layout = None;
        self.bind_group = None;
        self.create_bind_group(ctx)?;

        if self.bind_group.is_none() {
            let _ = self.create_layout(ctx);
        }

        if had_layout {
            self.needs_pipeline_flush = true;
            log::debug!(
                "curtains: bind group `{}` layout changed from `{}` to `{}`",
                self.label,
                previous,
                self.layout_cache_key
            );
        }
        Ok(())
    }

    /// Uploads dirty buffers, then performs at most one reset of each kind
    /// per frame for the bindings asking for one.
    pub fn update(&mut self, ctx: &mut Context) -> Result<()> {
        for texture in &self.textures {
            texture.borrow_mut().create_texture(ctx);
        }

        for binding in &self.bindings {
            let mut binding = binding.borrow_mut();
            if let Some(buffer) = binding.as_buffer_mut() {
                buffer.update();
                buffer.write(ctx);
            }
        }

        let resets = self
            .bindings
            .iter()
            .fold(BindingResets::empty(), |acc, binding| {
                acc | binding.borrow().base().resets
            });

        if resets.is_empty() {
            return Ok(());
        }

        if ctx.is_recording() {
            if self.last_reset_frame == Some(ctx.frame()) {
                return Ok(());
            }
            self.last_reset_frame = Some(ctx.frame());
        }

        if resets.contains(BindingResets::LAYOUT) {
            self.reset_bind_group_layout(ctx)?;
        } else if self.bind_group.is_some() {
            self.reset_bind_group(ctx)?;
        }

        self.clear_binding_resets(ctx, resets);
        Ok(())
    }

    /// Clears the reset flags once the frame reading the old bindings has
    /// been submitted, so bind groups sharing a binding all see the reset.
    fn clear_binding_resets(&self, ctx: &mut Context, resets: BindingResets) {
        if ctx.is_recording() {
            let bindings = self.bindings.iter().map(Rc::downgrade).collect();
            ctx.queue_post_submit(PostSubmitTask::ClearBindingResets(bindings, resets));
        } else {
            for binding in &self.bindings {
                binding.borrow_mut().base_mut().resets.remove(resets);
            }
        }
    }

    /// A new bind group using the given bindings, or this group's bindings
    /// if `bindings` is `None`. With `keep_layout`, the already created
    /// layout is reused.
    ///
    /// Shared bindings share their GPU buffers: each bind group registers
    /// itself as a consumer and the buffers outlive whichever is destroyed
    /// first.
    pub fn clone_with(
        &self,
        label: impl Into<String>,
        bindings: Option<Vec<BindingRef>>,
        keep_layout: bool,
    ) -> BindGroup {
        let mut clone = Self::with_kind(label, self.kind);
        clone.index = self.index;

        match bindings {
            Some(bindings) => clone.bindings = bindings,
            None => {
                clone.bindings = self.bindings.clone();
                clone.textures = self.textures.clone();
                clone.samplers = self.samplers.clone();
            }
        }

        if keep_layout {
            clone.layout = self.layout;
            clone.layout_cache_key = self.layout_cache_key.clone();
            clone.pipeline_cache_key = self.pipeline_cache_key.clone();
        }

        clone
    }

    /// Clones every buffer binding with fresh buffers and inputs produced by
    /// `inputs`, keeping the computed alignments.
    pub fn clone_with_inputs(
        &self,
        label: impl Into<String>,
        mut inputs: impl FnMut(&str) -> Vec<BufferInput>,
    ) -> BindGroup {
        let bindings = self
            .bindings
            .iter()
            .map(|binding| {
                let b = binding.borrow();
                match &*b {
                    Binding::Buffer(buffer) => {
                        let name = buffer.base().name.clone();
                        let label = buffer.base().label.clone();
                        Binding::Buffer(buffer.clone_with(label, inputs(&name))).into_ref()
                    }
                    _ => binding.clone(),
                }
            })
            .collect();

        let mut clone = self.clone_with(label, Some(bindings), true);
        clone.textures = self.textures.clone();
        clone.samplers = self.samplers.clone();
        clone
    }

    pub fn consumers(&self) -> &HashSet<u64> {
        &self.consumers
    }

    /// Registers a material using this bind group.
    pub fn add_consumer(&mut self, uid: u64) {
        let _ = self.consumers.insert(uid);
    }

    /// Unregisters a material and destroys the bind group if it was the last
    /// one.
    pub fn release(&mut self, ctx: &mut Context, uid: u64) {
        let _ = self.consumers.remove(&uid);
        if self.consumers.is_empty() {
            self.destroy(ctx);
        }
    }

    /// Releases every buffer used by this bind group. A buffer is destroyed
    /// only when no other bind group consumes it.
    pub fn destroy(&mut self, ctx: &mut Context) {
        for buffer in self.buffers() {
            buffer.borrow_mut().release(ctx, self.uid);
        }

        self.bind_group = None;
        self.layout = None;
    }

    /// Forgets every GPU handle after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        self.bind_group = None;
        self.layout = None;
        self.last_reset_frame = None;

        for binding in &self.bindings {
            binding.borrow_mut().reset_gpu_handles();
        }
        for texture in &self.textures {
            texture.borrow_mut().reset_gpu_handles();
        }
        for sampler in &self.samplers {
            sampler.borrow_mut().reset_gpu_handles();
        }
    }

    /// WGSL declarations of the bindings visible to `stages`: struct
    /// declarations first, then `@group`/`@binding` variables.
    pub fn wgsl_fragments(&self, stages: wgpu::ShaderStages) -> (Vec<String>, Vec<String>) {
        let mut structs = Vec::new();
        let mut groups = Vec::new();

        for (i, binding) in self.bindings.iter().enumerate() {
            let binding = binding.borrow();
            if !binding.visibility().intersects(stages) {
                continue;
            }

            let fragment = binding.wgsl_struct_fragment();
            if !fragment.is_empty() {
                structs.push(fragment);
            }
            groups.push(format!(
                "@group({}) @binding({}) {}",
                self.index,
                i,
                binding.wgsl_group_fragment()
            ));
        }

        (structs, groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;
    use crate::resource::{
        BufferBinding, BufferBindingParams, Sampler, Texture, TextureParams,
    };
    use glamx::Vec3;

    fn uniforms(ctx: &mut Context) -> BindingRef {
        let params = BufferBindingParams::uniform("params")
            .with_input(BufferInput::new("color", "vec3f", Vec3::ONE))
            .with_input(BufferInput::new("intensity", "f32", 1.0_f32));
        Binding::Buffer(BufferBinding::new(ctx, params).unwrap()).into_ref()
    }

    #[test]
    fn creation_is_idempotent() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut group = BindGroup::new("inputs");
        group.add_binding(uniforms(&mut ctx));

        assert!(group.should_create_bind_group());
        group.create_bind_group(&mut ctx).unwrap();
        assert!(!group.should_create_bind_group());
        group.create_bind_group(&mut ctx).unwrap();

        assert_eq!(probe.stats().bind_groups_created, 1);
        assert_eq!(probe.stats().buffers_created, 1);
    }

    #[test]
    fn empty_groups_are_never_created() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut group = BindGroup::new("empty");

        assert!(!group.should_create_bind_group());
        group.create_bind_group(&mut ctx).unwrap();
        assert!(group.bind_group().is_none());
    }

    #[test]
    fn layouts_are_shared_between_identical_groups() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut a = BindGroup::new("a");
        a.add_binding(uniforms(&mut ctx));
        let mut b = BindGroup::new("b");
        b.add_binding(uniforms(&mut ctx));

        a.create_bind_group(&mut ctx).unwrap();
        b.create_bind_group(&mut ctx).unwrap();

        assert_eq!(a.layout(), b.layout());
        assert_eq!(probe.stats().bind_group_layouts_created, 1);
        assert_eq!(probe.stats().bind_groups_created, 2);
    }

    #[test]
    fn shared_buffers_are_destroyed_with_their_last_consumer() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut a = BindGroup::new("a");
        a.add_binding(uniforms(&mut ctx));
        a.create_bind_group(&mut ctx).unwrap();

        let mut b = a.clone_with("b", None, true);
        b.create_bind_group(&mut ctx).unwrap();
        assert_eq!(probe.stats().buffers_created, 1);

        a.destroy(&mut ctx);
        assert_eq!(probe.stats().buffers_destroyed, 0);

        b.destroy(&mut ctx);
        assert_eq!(probe.stats().buffers_destroyed, 1);
    }

    #[test]
    fn texture_swap_only_recreates_the_bind_group() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let texture = Texture::new(TextureParams::new("diffuse"), (4, 4)).unwrap().into_ref();
        let mut group = BindGroup::textures("textures");
        group.add_texture(texture.clone());
        group.add_sampler(Sampler::default_sampler().into_ref());
        group.create_bind_group(&mut ctx).unwrap();
        group.update(&mut ctx).unwrap();
        let first = group.bind_group();

        texture.borrow_mut().set_pixels(&mut ctx, vec![0; 8 * 8 * 4], 8, 8);
        let encoder = ctx.begin_frame().unwrap();
        group.update(&mut ctx).unwrap();
        ctx.submit(encoder).unwrap();

        assert_ne!(group.bind_group(), first);
        assert!(!group.needs_pipeline_flush());
        assert_eq!(probe.stats().bind_group_layouts_created, 1);
        assert!(group.bindings().iter().all(|b| b.borrow().base().resets.is_empty()));
    }

    #[test]
    fn binding_type_change_flags_a_pipeline_flush() {
        let mut ctx = Context::new(HeadlessBackend::default());

        let texture = Texture::new(TextureParams::new("video"), (4, 4)).unwrap().into_ref();
        let mut group = BindGroup::textures("textures");
        group.add_texture(texture.clone());
        group.create_bind_group(&mut ctx).unwrap();
        group.update(&mut ctx).unwrap();
        let key = group.layout_cache_key().to_string();

        texture.borrow_mut().set_external(true);
        group.update(&mut ctx).unwrap();

        assert!(group.needs_pipeline_flush());
        assert_ne!(group.layout_cache_key(), key);
    }

    #[test]
    fn wgsl_fragments_carry_group_and_binding_indices() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut group = BindGroup::new("inputs");
        group.set_index(1);
        group.add_binding(uniforms(&mut ctx));

        let (structs, groups) = group.wgsl_fragments(wgpu::ShaderStages::VERTEX);
        assert_eq!(structs.len(), 1);
        assert!(group.wgsl_fragments(wgpu::ShaderStages::COMPUTE).1.is_empty());
        assert_eq!(groups, vec!["@group(1) @binding(0) var<uniform> params: Params;"]);
    }

    #[test]
    fn set_input_dirties_the_binding() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut group = BindGroup::new("inputs");
        group.add_binding(uniforms(&mut ctx));
        group.create_bind_group(&mut ctx).unwrap();

        assert!(group.set_input("params", "intensity", 3.0_f32));
        assert!(!group.set_input("params", "missing", 3.0_f32));
        group.update(&mut ctx).unwrap();

        let binding = group.binding("params").unwrap();
        let binding = binding.borrow();
        assert_eq!(
            binding.as_buffer().unwrap().element_values("intensity").unwrap(),
            vec![3.0]
        );
    }
}
