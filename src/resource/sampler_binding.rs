//! Sampler bindings.

use crate::context::{BindingLayout, BindingResource, SamplerId};
use crate::resource::{BindingBase, BindingResets, BindingType};

/// A sampler binding.
#[derive(Clone, Debug)]
pub struct SamplerBinding {
    pub base: BindingBase,
    ty: wgpu::SamplerBindingType,
    /// The bound sampler, if any.
    pub resource: Option<SamplerId>,
}

impl SamplerBinding {
    pub fn new(
        label: &str,
        name: Option<&str>,
        visibility: wgpu::ShaderStages,
        ty: wgpu::SamplerBindingType,
    ) -> Self {
        let mut base = BindingBase::new(label, name, BindingType::Sampler, visibility);
        base.cache_key = format!("{}{:?},", base.base_cache_key(), ty);

        SamplerBinding {
            base,
            ty,
            resource: None,
        }
    }

    pub fn sampler_type(&self) -> wgpu::SamplerBindingType {
        self.ty
    }

    pub fn set_resource(&mut self, sampler: Option<SamplerId>) {
        if self.resource != sampler {
            self.resource = sampler;
            self.base.resets |= BindingResets::BIND_GROUP;
        }
    }

    pub fn resource_layout(&self) -> BindingLayout {
        BindingLayout::Sampler(self.ty)
    }

    pub fn resource(&self) -> Option<BindingResource> {
        self.resource.map(BindingResource::Sampler)
    }

    pub fn wgsl_group_fragment(&self) -> String {
        let ty = match self.ty {
            wgpu::SamplerBindingType::Comparison => "sampler_comparison",
            _ => "sampler",
        };

        format!("var {}: {};", self.base.name, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_samplers_have_their_own_declaration() {
        let filtering = SamplerBinding::new(
            "default sampler",
            None,
            wgpu::ShaderStages::FRAGMENT,
            wgpu::SamplerBindingType::Filtering,
        );
        let comparison = SamplerBinding::new(
            "shadow",
            Some("shadowSampler"),
            wgpu::ShaderStages::FRAGMENT,
            wgpu::SamplerBindingType::Comparison,
        );

        assert_eq!(filtering.wgsl_group_fragment(), "var defaultSampler: sampler;");
        assert_eq!(
            comparison.wgsl_group_fragment(),
            "var shadowSampler: sampler_comparison;"
        );
        assert_ne!(filtering.base.cache_key, comparison.base.cache_key);
    }
}
