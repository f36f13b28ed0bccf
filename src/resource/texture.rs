//! Textures bound to shaders.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::{Context, TextureDescriptor, TextureId};
use crate::error::Result;
use crate::resource::{
    Binding, BindingRef, BindingType, TextureBinding, TextureBindingParams,
};
use crate::utils::generate_uid;

/// A texture shared between bind groups, passes and the renderer.
pub type TextureRef = Rc<RefCell<Texture>>;

/// Options of a [`Texture`].
#[derive(Clone, Debug)]
pub struct TextureParams {
    pub label: String,
    /// WGSL variable name, defaults to the camel-cased label.
    pub name: Option<String>,
    pub format: wgpu::TextureFormat,
    /// [`BindingType::Texture`], [`BindingType::Storage`] or
    /// [`BindingType::Depth`].
    pub binding_type: BindingType,
    pub visibility: wgpu::ShaderStages,
    /// Access of a storage texture.
    pub access: wgpu::StorageTextureAccess,
    pub sample_count: u32,
    /// Usages added to the default ones.
    pub usage: wgpu::TextureUsages,
    /// Fixed size. When `None` the texture follows the renderer size.
    pub fixed_size: Option<(u32, u32)>,
}

impl Default for TextureParams {
    fn default() -> Self {
        TextureParams {
            label: "Texture".to_string(),
            name: None,
            format: wgpu::TextureFormat::Rgba8Unorm,
            binding_type: BindingType::Texture,
            visibility: wgpu::ShaderStages::FRAGMENT,
            access: wgpu::StorageTextureAccess::WriteOnly,
            sample_count: 1,
            usage: wgpu::TextureUsages::empty(),
            fixed_size: None,
        }
    }
}

impl TextureParams {
    pub fn new(label: impl Into<String>) -> Self {
        TextureParams {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_binding_type(mut self, binding_type: BindingType) -> Self {
        self.binding_type = binding_type;
        self
    }

    pub fn with_visibility(mut self, visibility: wgpu::ShaderStages) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_fixed_size(mut self, width: u32, height: u32) -> Self {
        self.fixed_size = Some((width, height));
        self
    }
}

/// Where the content of a texture comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum TextureSource {
    /// Tightly packed texels uploaded from the CPU.
    Pixels {
        data: Vec<u8>,
        width: u32,
        height: u32,
    },
    /// Frames supplied by an external producer, e.g. a video decoder.
    External,
}

/// A GPU texture together with its binding.
#[derive(Debug)]
pub struct Texture {
    pub uid: u64,
    pub label: String,
    params: TextureParams,
    size: (u32, u32),
    gpu_texture: Option<TextureId>,
    source: Option<TextureSource>,
    should_upload: bool,
    binding: BindingRef,
}

impl Texture {
    /// Creates a texture of the given size. The GPU texture is created
    /// lazily.
    pub fn new(params: TextureParams, size: (u32, u32)) -> Result<Self> {
        let binding = TextureBinding::new(TextureBindingParams {
            label: params.label.clone(),
            name: params.name.clone(),
            binding_type: params.binding_type,
            visibility: params.visibility,
            format: params.format,
            access: params.access,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: params.sample_count > 1,
        })?;

        Ok(Texture {
            uid: generate_uid(),
            label: params.label.clone(),
            size: params.fixed_size.unwrap_or(size),
            params,
            gpu_texture: None,
            source: None,
            should_upload: false,
            binding: Binding::Texture(binding).into_ref(),
        })
    }

    /// Wraps the texture so it can be shared.
    pub fn into_ref(self) -> TextureRef {
        Rc::new(RefCell::new(self))
    }

    pub fn params(&self) -> &TextureParams {
        &self.params
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.params.format
    }

    pub fn gpu_texture(&self) -> Option<TextureId> {
        self.gpu_texture
    }

    pub fn source(&self) -> Option<&TextureSource> {
        self.source.as_ref()
    }

    /// The binding exposing this texture to shaders.
    pub fn binding(&self) -> &BindingRef {
        &self.binding
    }

    fn usage(&self) -> wgpu::TextureUsages {
        let usage = match self.params.binding_type {
            BindingType::Storage => {
                wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
            }
            BindingType::Depth => {
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
            }
            _ => {
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::RENDER_ATTACHMENT
            }
        };

        usage | self.params.usage
    }

    fn set_binding_resource(&self) {
        if let Some(binding) = self.binding.borrow_mut().as_texture_mut() {
            binding.set_resource(self.gpu_texture);
        }
    }

    /// Creates the GPU texture if needed and uploads pending texels.
    pub fn create_texture(&mut self, ctx: &mut Context) {
        if self.gpu_texture.is_none() {
            let desc = TextureDescriptor {
                label: self.label.clone(),
                width: self.size.0.max(1),
                height: self.size.1.max(1),
                format: self.params.format,
                usage: self.usage(),
                sample_count: self.params.sample_count.max(1),
                mip_level_count: 1,
            };
            self.gpu_texture = Some(ctx.create_texture(&desc));
            self.should_upload = matches!(self.source, Some(TextureSource::Pixels { .. }));
            self.set_binding_resource();
        }

        self.upload(ctx);
    }

    fn upload(&mut self, ctx: &mut Context) {
        if !self.should_upload {
            return;
        }

        if let (Some(texture), Some(TextureSource::Pixels { data, width, height })) =
            (self.gpu_texture, &self.source)
        {
            ctx.write_texture(texture, data, *width, *height);
        }
        self.should_upload = false;
    }

    /// Uses CPU texels as source, resizing the texture to match.
    pub fn set_pixels(&mut self, ctx: &mut Context, data: Vec<u8>, width: u32, height: u32) {
        if self.binding.borrow().binding_type() == BindingType::ExternalTexture {
            self.set_external(false);
        }

        self.source = Some(TextureSource::Pixels {
            data,
            width,
            height,
        });
        self.should_upload = true;

        if self.size != (width, height) {
            self.destroy(ctx);
            self.size = (width, height);
        }
    }

    /// Switches to or from an external frame source. The binding type
    /// changes, which resets the bind group layout.
    pub fn set_external(&mut self, external: bool) {
        let binding_type = if external {
            BindingType::ExternalTexture
        } else {
            self.params.binding_type
        };

        if let Some(binding) = self.binding.borrow_mut().as_texture_mut() {
            let _ = binding.set_binding_type(binding_type);
        }

        self.source = external.then_some(TextureSource::External);
    }

    /// Resizes a texture that follows the renderer size. Fixed size textures
    /// ignore this.
    pub fn resize(&mut self, ctx: &mut Context, width: u32, height: u32) {
        if self.params.fixed_size.is_some() || self.size == (width, height) {
            return;
        }

        self.destroy(ctx);
        self.size = (width, height);
        self.create_texture(ctx);
    }

    /// Destroys the GPU texture. The next [`Texture::create_texture`] call
    /// creates a new one.
    pub fn destroy(&mut self, ctx: &mut Context) {
        if let Some(texture) = self.gpu_texture.take() {
            ctx.destroy_texture(texture);
            self.set_binding_resource();
        }
    }

    /// Forgets the GPU texture after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        self.gpu_texture = None;
        self.binding.borrow_mut().reset_gpu_handles();
        self.should_upload = matches!(self.source, Some(TextureSource::Pixels { .. }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;

    #[test]
    fn creation_binds_the_texture() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut texture = Texture::new(TextureParams::new("diffuse"), (64, 32)).unwrap();
        texture.create_texture(&mut ctx);

        let binding = texture.binding().borrow();
        assert_eq!(binding.as_texture().unwrap().resource, texture.gpu_texture());
        assert!(binding.should_reset_bind_group());
        assert!(!binding.should_reset_bind_group_layout());

        let desc = probe.texture(texture.gpu_texture().unwrap()).unwrap();
        assert_eq!((desc.width, desc.height), (64, 32));
    }

    #[test]
    fn pixels_are_uploaded_once() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);

        let mut texture = Texture::new(TextureParams::new("image"), (1, 1)).unwrap();
        texture.set_pixels(&mut ctx, vec![255; 4 * 4], 2, 2);
        texture.create_texture(&mut ctx);
        texture.create_texture(&mut ctx);

        assert_eq!(texture.size(), (2, 2));
        assert_eq!(probe.stats().texture_writes, 1);
    }

    #[test]
    fn external_source_changes_the_layout() {
        let mut texture = Texture::new(TextureParams::new("video"), (16, 16)).unwrap();
        texture.set_external(true);

        let binding = texture.binding().borrow();
        assert_eq!(binding.binding_type(), BindingType::ExternalTexture);
        assert!(binding.should_reset_bind_group_layout());
    }

    #[test]
    fn fixed_size_textures_ignore_resizes() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut texture =
            Texture::new(TextureParams::new("lut").with_fixed_size(256, 1), (800, 600)).unwrap();

        texture.resize(&mut ctx, 1024, 768);
        assert_eq!(texture.size(), (256, 1));
    }
}
