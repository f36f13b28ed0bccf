//! Texture bindings.

use crate::context::{BindingLayout, BindingResource, TextureId};
use crate::error::{Error, Result};
use crate::resource::{BindingBase, BindingResets, BindingType};

/// Parameters of a [`TextureBinding`].
#[derive(Clone, Debug)]
pub struct TextureBindingParams {
    pub label: String,
    pub name: Option<String>,
    /// One of [`BindingType::Texture`], [`BindingType::Storage`],
    /// [`BindingType::Depth`] or [`BindingType::ExternalTexture`].
    pub binding_type: BindingType,
    pub visibility: wgpu::ShaderStages,
    pub format: wgpu::TextureFormat,
    /// Access of a storage texture.
    pub access: wgpu::StorageTextureAccess,
    pub view_dimension: wgpu::TextureViewDimension,
    pub multisampled: bool,
}

impl TextureBindingParams {
    /// A sampled 2D float texture visible to the fragment stage.
    pub fn new(label: impl Into<String>) -> Self {
        TextureBindingParams {
            label: label.into(),
            name: None,
            binding_type: BindingType::Texture,
            visibility: wgpu::ShaderStages::FRAGMENT,
            format: wgpu::TextureFormat::Rgba8Unorm,
            access: wgpu::StorageTextureAccess::WriteOnly,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        }
    }
}

/// WGSL name of a storage texture format.
pub fn storage_format_name(format: wgpu::TextureFormat) -> Option<&'static str> {
    use wgpu::TextureFormat as F;

    Some(match format {
        F::Rgba8Unorm => "rgba8unorm",
        F::Rgba8Snorm => "rgba8snorm",
        F::Rgba8Uint => "rgba8uint",
        F::Rgba8Sint => "rgba8sint",
        F::Bgra8Unorm => "bgra8unorm",
        F::Rgba16Uint => "rgba16uint",
        F::Rgba16Sint => "rgba16sint",
        F::Rgba16Float => "rgba16float",
        F::R32Uint => "r32uint",
        F::R32Sint => "r32sint",
        F::R32Float => "r32float",
        F::Rg32Uint => "rg32uint",
        F::Rg32Sint => "rg32sint",
        F::Rg32Float => "rg32float",
        F::Rgba32Uint => "rgba32uint",
        F::Rgba32Sint => "rgba32sint",
        F::Rgba32Float => "rgba32float",
        _ => return None,
    })
}

fn access_name(access: wgpu::StorageTextureAccess) -> &'static str {
    match access {
        wgpu::StorageTextureAccess::ReadOnly => "read",
        wgpu::StorageTextureAccess::ReadWrite => "read_write",
        _ => "write",
    }
}

fn dimension_suffix(dimension: wgpu::TextureViewDimension) -> &'static str {
    match dimension {
        wgpu::TextureViewDimension::D1 => "1d",
        wgpu::TextureViewDimension::D2Array => "2d_array",
        wgpu::TextureViewDimension::Cube => "cube",
        wgpu::TextureViewDimension::CubeArray => "cube_array",
        wgpu::TextureViewDimension::D3 => "3d",
        wgpu::TextureViewDimension::D2 => "2d",
    }
}

/// A sampled, storage, depth or external texture binding.
#[derive(Clone, Debug)]
pub struct TextureBinding {
    pub base: BindingBase,
    format: wgpu::TextureFormat,
    access: wgpu::StorageTextureAccess,
    view_dimension: wgpu::TextureViewDimension,
    multisampled: bool,
    /// The bound texture, if any.
    pub resource: Option<TextureId>,
}

impl TextureBinding {
    pub fn new(params: TextureBindingParams) -> Result<Self> {
        if params.binding_type == BindingType::Storage
            && storage_format_name(params.format).is_none()
        {
            return Err(Error::UnsupportedStorageFormat(format!("{:?}", params.format)));
        }

        let mut binding = TextureBinding {
            base: BindingBase::new(
                &params.label,
                params.name.as_deref(),
                params.binding_type,
                params.visibility,
            ),
            format: params.format,
            access: params.access,
            view_dimension: params.view_dimension,
            multisampled: params.multisampled,
            resource: None,
        };
        binding.rebuild_cache_key();
        Ok(binding)
    }

    fn rebuild_cache_key(&mut self) {
        let mut key = self.base.base_cache_key();

        match self.base.binding_type {
            BindingType::Storage => {
                key.push_str(&format!("{:?},{:?},", self.format, self.access));
            }
            _ => {
                key.push_str(&format!("{},", self.multisampled));
            }
        }
        key.push_str(&format!("{:?},", self.view_dimension));

        self.base.cache_key = key;
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn multisampled(&self) -> bool {
        self.multisampled
    }

    pub fn view_dimension(&self) -> wgpu::TextureViewDimension {
        self.view_dimension
    }

    /// Binds a new texture. Only the bind group needs to be recreated.
    pub fn set_resource(&mut self, texture: Option<TextureId>) {
        if self.resource != texture {
            self.resource = texture;
            self.base.resets |= BindingResets::BIND_GROUP;
        }
    }

    /// Changes the kind of texture bound, which changes the layout.
    pub fn set_binding_type(&mut self, binding_type: BindingType) -> Result<()> {
        if self.base.binding_type == binding_type {
            return Ok(());
        }

        if binding_type == BindingType::Storage && storage_format_name(self.format).is_none() {
            return Err(Error::UnsupportedStorageFormat(format!("{:?}", self.format)));
        }

        self.base.binding_type = binding_type;
        self.base.resets |= BindingResets::LAYOUT | BindingResets::BIND_GROUP;
        self.rebuild_cache_key();
        Ok(())
    }

    /// Changes the texel format. Only storage textures embed the format in
    /// their layout.
    pub fn set_format(&mut self, format: wgpu::TextureFormat) -> Result<()> {
        if self.format == format {
            return Ok(());
        }

        if self.base.binding_type == BindingType::Storage {
            if storage_format_name(format).is_none() {
                return Err(Error::UnsupportedStorageFormat(format!("{:?}", format)));
            }
            self.base.resets |= BindingResets::LAYOUT;
        }

        self.format = format;
        self.rebuild_cache_key();
        Ok(())
    }

    /// Changes multisampling. Storage textures cannot be multisampled, so
    /// only sampled and depth textures see a layout change.
    pub fn set_multisampled(&mut self, multisampled: bool) {
        if self.multisampled == multisampled {
            return;
        }

        if self.base.binding_type != BindingType::Storage {
            self.base.resets |= BindingResets::LAYOUT;
        }

        self.multisampled = multisampled;
        self.rebuild_cache_key();
    }

    pub fn resource_layout(&self) -> BindingLayout {
        match self.base.binding_type {
            BindingType::Storage => BindingLayout::StorageTexture {
                access: self.access,
                format: self.format,
                view_dimension: self.view_dimension,
            },
            BindingType::ExternalTexture => BindingLayout::ExternalTexture,
            BindingType::Depth => BindingLayout::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: self.view_dimension,
                multisampled: self.multisampled,
            },
            _ => BindingLayout::Texture {
                sample_type: wgpu::TextureSampleType::Float {
                    filterable: !self.multisampled,
                },
                view_dimension: self.view_dimension,
                multisampled: self.multisampled,
            },
        }
    }

    pub fn resource(&self) -> Option<BindingResource> {
        let dimension = match self.base.binding_type {
            BindingType::ExternalTexture => wgpu::TextureViewDimension::D2,
            _ => self.view_dimension,
        };

        self.resource
            .map(|texture| BindingResource::TextureView { texture, dimension })
    }

    /// WGSL type of the bound texture.
    pub fn wgsl_type(&self) -> String {
        let dimension = dimension_suffix(self.view_dimension);

        match self.base.binding_type {
            BindingType::ExternalTexture => "texture_external".to_string(),
            BindingType::Storage => format!(
                "texture_storage_{}<{}, {}>",
                dimension,
                storage_format_name(self.format).unwrap_or("rgba8unorm"),
                access_name(self.access)
            ),
            BindingType::Depth if self.multisampled => "texture_depth_multisampled_2d".to_string(),
            BindingType::Depth => format!("texture_depth_{}", dimension),
            _ if self.multisampled => "texture_multisampled_2d<f32>".to_string(),
            _ => format!("texture_{}<f32>", dimension),
        }
    }

    pub fn wgsl_group_fragment(&self) -> String {
        format!("var {}: {};", self.base.name, self.wgsl_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapping_the_resource_only_resets_the_bind_group() {
        let mut binding = TextureBinding::new(TextureBindingParams::new("diffuse")).unwrap();

        binding.set_resource(Some(TextureId(3)));
        assert!(binding.base.resets.contains(BindingResets::BIND_GROUP));
        assert!(!binding.base.resets.contains(BindingResets::LAYOUT));
    }

    #[test]
    fn changing_the_binding_type_resets_both() {
        let mut binding = TextureBinding::new(TextureBindingParams::new("video")).unwrap();
        let key = binding.base.cache_key.clone();

        binding.set_binding_type(BindingType::ExternalTexture).unwrap();
        assert!(binding.base.resets.contains(BindingResets::BIND_GROUP | BindingResets::LAYOUT));
        assert_ne!(binding.base.cache_key, key);
        assert_eq!(binding.wgsl_group_fragment(), "var video: texture_external;");
    }

    #[test]
    fn format_changes_only_matter_for_storage_textures() {
        let mut sampled = TextureBinding::new(TextureBindingParams::new("color")).unwrap();
        sampled.set_format(wgpu::TextureFormat::Rgba16Float).unwrap();
        assert!(sampled.base.resets.is_empty());

        let mut storage = TextureBinding::new(TextureBindingParams {
            binding_type: BindingType::Storage,
            visibility: wgpu::ShaderStages::COMPUTE,
            ..TextureBindingParams::new("output")
        })
        .unwrap();
        assert_eq!(
            storage.wgsl_group_fragment(),
            "var output: texture_storage_2d<rgba8unorm, write>;"
        );

        storage.set_format(wgpu::TextureFormat::Rgba16Float).unwrap();
        assert!(storage.base.resets.contains(BindingResets::LAYOUT));
        assert!(storage.set_format(wgpu::TextureFormat::Depth32Float).is_err());
    }

    #[test]
    fn multisampling_changes_only_matter_for_sampled_textures() {
        let mut sampled = TextureBinding::new(TextureBindingParams::new("scene")).unwrap();
        sampled.set_multisampled(true);
        assert!(sampled.base.resets.contains(BindingResets::LAYOUT));
        assert_eq!(sampled.wgsl_type(), "texture_multisampled_2d<f32>");

        let mut depth = TextureBinding::new(TextureBindingParams {
            binding_type: BindingType::Depth,
            ..TextureBindingParams::new("depth")
        })
        .unwrap();
        assert_eq!(depth.wgsl_type(), "texture_depth_2d");
        depth.set_multisampled(true);
        assert_eq!(depth.wgsl_type(), "texture_depth_multisampled_2d");
    }
}
