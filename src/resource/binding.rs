//! Shader resource bindings.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::context::{BindingLayout, BindingResource};
use crate::resource::{BufferBinding, SamplerBinding, TextureBinding, WritableBufferBinding};
use crate::utils::to_camel_case;

bitflags! {
    /// Pending invalidations of a binding.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BindingResets: u8 {
        /// A resource handle changed: the bind group must be recreated.
        const BIND_GROUP = 1 << 0;
        /// The binding shape changed: the bind group layout, and the
        /// pipelines using it, must be recreated.
        const LAYOUT = 1 << 1;
    }
}

/// The kind of resource a binding exposes to shaders.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingType {
    Uniform,
    Storage,
    Texture,
    ExternalTexture,
    Depth,
    Sampler,
}

impl BindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingType::Uniform => "uniform",
            BindingType::Storage => "storage",
            BindingType::Texture => "texture",
            BindingType::ExternalTexture => "externalTexture",
            BindingType::Depth => "depth",
            BindingType::Sampler => "sampler",
        }
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every binding.
#[derive(Clone, Debug)]
pub struct BindingBase {
    pub label: String,
    /// Name of the variable in WGSL.
    pub name: String,
    pub binding_type: BindingType,
    pub visibility: wgpu::ShaderStages,
    /// Concatenation of everything that affects layout compatibility and
    /// generated WGSL.
    pub cache_key: String,
    pub resets: BindingResets,
}

impl BindingBase {
    pub fn new(
        label: &str,
        name: Option<&str>,
        binding_type: BindingType,
        visibility: wgpu::ShaderStages,
    ) -> Self {
        let mut base = BindingBase {
            label: label.to_string(),
            name: to_camel_case(name.unwrap_or(label)),
            binding_type,
            visibility,
            cache_key: String::new(),
            resets: BindingResets::empty(),
        };
        base.cache_key = base.base_cache_key();
        base
    }

    /// Cache key prefix common to all bindings.
    pub fn base_cache_key(&self) -> String {
        format!("{},{},", self.binding_type, self.visibility.bits())
    }
}

/// A binding shared between bind groups.
pub type BindingRef = Rc<RefCell<Binding>>;

/// Any binding.
#[derive(Debug)]
pub enum Binding {
    Buffer(BufferBinding),
    WritableBuffer(WritableBufferBinding),
    Texture(TextureBinding),
    Sampler(SamplerBinding),
}

impl Binding {
    /// Wraps the binding so it can be shared.
    pub fn into_ref(self) -> BindingRef {
        Rc::new(RefCell::new(self))
    }

    pub fn base(&self) -> &BindingBase {
        match self {
            Binding::Buffer(b) => b.base(),
            Binding::WritableBuffer(b) => b.inner.base(),
            Binding::Texture(b) => &b.base,
            Binding::Sampler(b) => &b.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BindingBase {
        match self {
            Binding::Buffer(b) => b.base_mut(),
            Binding::WritableBuffer(b) => b.inner.base_mut(),
            Binding::Texture(b) => &mut b.base,
            Binding::Sampler(b) => &mut b.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn label(&self) -> &str {
        &self.base().label
    }

    pub fn binding_type(&self) -> BindingType {
        self.base().binding_type
    }

    pub fn visibility(&self) -> wgpu::ShaderStages {
        self.base().visibility
    }

    pub fn cache_key(&self) -> &str {
        &self.base().cache_key
    }

    pub fn should_reset_bind_group(&self) -> bool {
        self.base().resets.contains(BindingResets::BIND_GROUP)
    }

    pub fn should_reset_bind_group_layout(&self) -> bool {
        self.base().resets.contains(BindingResets::LAYOUT)
    }

    /// The buffer binding, writable ones included.
    pub fn as_buffer(&self) -> Option<&BufferBinding> {
        match self {
            Binding::Buffer(b) => Some(b),
            Binding::WritableBuffer(b) => Some(&b.inner),
            _ => None,
        }
    }

    pub fn as_buffer_mut(&mut self) -> Option<&mut BufferBinding> {
        match self {
            Binding::Buffer(b) => Some(b),
            Binding::WritableBuffer(b) => Some(&mut b.inner),
            _ => None,
        }
    }

    pub fn as_writable(&self) -> Option<&WritableBufferBinding> {
        match self {
            Binding::WritableBuffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_writable_mut(&mut self) -> Option<&mut WritableBufferBinding> {
        match self {
            Binding::WritableBuffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureBinding> {
        match self {
            Binding::Texture(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_texture_mut(&mut self) -> Option<&mut TextureBinding> {
        match self {
            Binding::Texture(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_sampler_mut(&mut self) -> Option<&mut SamplerBinding> {
        match self {
            Binding::Sampler(b) => Some(b),
            _ => None,
        }
    }

    /// Shape of the bind group layout entry.
    pub fn resource_layout(&self) -> BindingLayout {
        match self {
            Binding::Buffer(b) => b.resource_layout(),
            Binding::WritableBuffer(b) => b.inner.resource_layout(),
            Binding::Texture(b) => b.resource_layout(),
            Binding::Sampler(b) => b.resource_layout(),
        }
    }

    /// Key identifying [`Binding::resource_layout`] and visibility.
    pub fn resource_layout_cache_key(&self) -> String {
        format!("{:?},{},", self.resource_layout(), self.visibility().bits())
    }

    /// Payload of the bind group entry, if the resource exists.
    pub fn resource(&self) -> Option<BindingResource> {
        match self {
            Binding::Buffer(b) => b.resource(),
            Binding::WritableBuffer(b) => b.inner.resource(),
            Binding::Texture(b) => b.resource(),
            Binding::Sampler(b) => b.resource(),
        }
    }

    /// WGSL struct declarations needed by this binding.
    pub fn wgsl_struct_fragment(&self) -> String {
        match self {
            Binding::Buffer(b) => b.wgsl_struct_fragment(),
            Binding::WritableBuffer(b) => b.inner.wgsl_struct_fragment(),
            Binding::Texture(_) | Binding::Sampler(_) => String::new(),
        }
    }

    /// WGSL variable declaration, without its `@group`/`@binding` attributes.
    pub fn wgsl_group_fragment(&self) -> String {
        match self {
            Binding::Buffer(b) => b.wgsl_group_fragment(),
            Binding::WritableBuffer(b) => b.inner.wgsl_group_fragment(),
            Binding::Texture(b) => b.wgsl_group_fragment(),
            Binding::Sampler(b) => b.wgsl_group_fragment(),
        }
    }

    /// Forgets every GPU handle after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        match self {
            Binding::Buffer(b) => b.reset_gpu_handles(),
            Binding::WritableBuffer(b) => b.reset_gpu_handles(),
            Binding::Texture(b) => b.resource = None,
            Binding::Sampler(b) => b.resource = None,
        }
    }
}

impl From<BufferBinding> for Binding {
    fn from(binding: BufferBinding) -> Self {
        Binding::Buffer(binding)
    }
}

impl From<WritableBufferBinding> for Binding {
    fn from(binding: WritableBufferBinding) -> Self {
        Binding::WritableBuffer(binding)
    }
}

impl From<TextureBinding> for Binding {
    fn from(binding: TextureBinding) -> Self {
        Binding::Texture(binding)
    }
}

impl From<SamplerBinding> for Binding {
    fn from(binding: SamplerBinding) -> Self {
        Binding::Sampler(binding)
    }
}
