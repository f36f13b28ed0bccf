//! Samplers bound to shaders.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::{Context, SamplerDescriptor, SamplerId};
use crate::resource::{Binding, BindingRef, SamplerBinding};
use crate::utils::generate_uid;

/// A sampler shared between texture bind groups.
pub type SamplerRef = Rc<RefCell<Sampler>>;

/// Wrapping parameters of a sampler.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum SamplerWrapping {
    /// Repeats the texture when a texture coordinate is out of bounds.
    Repeat,
    /// Repeats the mirrored texture when a texture coordinate is out of bounds.
    MirroredRepeat,
    /// Repeats the nearest edge texel when a texture coordinate is out of bounds.
    ClampToEdge,
}

impl From<SamplerWrapping> for wgpu::AddressMode {
    #[inline]
    fn from(val: SamplerWrapping) -> Self {
        match val {
            SamplerWrapping::Repeat => wgpu::AddressMode::Repeat,
            SamplerWrapping::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
            SamplerWrapping::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        }
    }
}

/// Options of a [`Sampler`].
#[derive(Clone, Debug)]
pub struct SamplerParams {
    pub label: String,
    pub name: Option<String>,
    pub address_mode_u: SamplerWrapping,
    pub address_mode_v: SamplerWrapping,
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub mipmap_filter: wgpu::FilterMode,
    /// Makes this a comparison sampler.
    pub compare: Option<wgpu::CompareFunction>,
    pub max_anisotropy: u16,
    pub visibility: wgpu::ShaderStages,
}

impl Default for SamplerParams {
    fn default() -> Self {
        SamplerParams {
            label: "Sampler".to_string(),
            name: None,
            address_mode_u: SamplerWrapping::Repeat,
            address_mode_v: SamplerWrapping::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            compare: None,
            max_anisotropy: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
        }
    }
}

impl SamplerParams {
    pub fn new(label: impl Into<String>) -> Self {
        SamplerParams {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_wrapping(mut self, wrapping: SamplerWrapping) -> Self {
        self.address_mode_u = wrapping;
        self.address_mode_v = wrapping;
        self
    }

    pub fn with_compare(mut self, compare: wgpu::CompareFunction) -> Self {
        self.compare = Some(compare);
        self
    }

    fn binding_type(&self) -> wgpu::SamplerBindingType {
        if self.compare.is_some() {
            wgpu::SamplerBindingType::Comparison
        } else if self.mag_filter == wgpu::FilterMode::Nearest
            && self.min_filter == wgpu::FilterMode::Nearest
        {
            wgpu::SamplerBindingType::NonFiltering
        } else {
            wgpu::SamplerBindingType::Filtering
        }
    }
}

/// A GPU sampler together with its binding.
#[derive(Debug)]
pub struct Sampler {
    pub uid: u64,
    pub label: String,
    params: SamplerParams,
    gpu_sampler: Option<SamplerId>,
    binding: BindingRef,
}

impl Sampler {
    pub fn new(params: SamplerParams) -> Self {
        let binding = SamplerBinding::new(
            &params.label,
            params.name.as_deref(),
            params.visibility,
            params.binding_type(),
        );

        Sampler {
            uid: generate_uid(),
            label: params.label.clone(),
            params,
            gpu_sampler: None,
            binding: Binding::Sampler(binding).into_ref(),
        }
    }

    /// The sampler added to texture bind groups that declare none.
    pub fn default_sampler() -> Self {
        Sampler::new(SamplerParams::new("default sampler").with_name("defaultSampler"))
    }

    pub fn into_ref(self) -> SamplerRef {
        Rc::new(RefCell::new(self))
    }

    pub fn params(&self) -> &SamplerParams {
        &self.params
    }

    pub fn gpu_sampler(&self) -> Option<SamplerId> {
        self.gpu_sampler
    }

    pub fn binding(&self) -> &BindingRef {
        &self.binding
    }

    /// Creates the GPU sampler if needed.
    pub fn create_sampler(&mut self, ctx: &mut Context) {
        if self.gpu_sampler.is_some() {
            return;
        }

        let desc = SamplerDescriptor {
            label: self.label.clone(),
            address_mode_u: self.params.address_mode_u.into(),
            address_mode_v: self.params.address_mode_v.into(),
            mag_filter: self.params.mag_filter,
            min_filter: self.params.min_filter,
            mipmap_filter: self.params.mipmap_filter,
            compare: self.params.compare,
            max_anisotropy: self.params.max_anisotropy.max(1),
        };
        let sampler = ctx.create_sampler(&desc);
        self.gpu_sampler = Some(sampler);

        if let Some(binding) = self.binding.borrow_mut().as_sampler_mut() {
            binding.set_resource(Some(sampler));
        }
    }

    pub fn reset_gpu_handles(&mut self) {
        self.gpu_sampler = None;
        self.binding.borrow_mut().reset_gpu_handles();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;

    #[test]
    fn sampler_is_created_once() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut sampler = Sampler::default_sampler();
        sampler.create_sampler(&mut ctx);
        sampler.create_sampler(&mut ctx);

        assert_eq!(probe.stats().samplers_created, 1);
        assert_eq!(sampler.binding().borrow().name(), "defaultSampler");
        assert!(sampler.binding().borrow().resource().is_some());
    }

    #[test]
    fn compare_makes_a_comparison_sampler() {
        let sampler = Sampler::new(SamplerParams::new("shadow").with_compare(wgpu::CompareFunction::Less));
        assert_eq!(
            sampler.binding().borrow().wgsl_group_fragment(),
            "var shadow: sampler_comparison;"
        );
    }
}
