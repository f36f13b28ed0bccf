use crate::context::{ColorTarget, Context};
use crate::error::Result;
use crate::resource::{Texture, TextureParams, TextureRef};
use crate::scene::{RenderPass, RenderPassOptions};
use crate::utils::generate_uid;

/// Options of a [`RenderTarget`].
#[derive(Clone, Debug)]
pub struct RenderTargetParams {
    pub label: String,
    pub pass: RenderPassOptions,
    /// Fixed size. When `None` the target follows the renderer size.
    pub fixed_size: Option<(u32, u32)>,
}

impl RenderTargetParams {
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        RenderTargetParams {
            pass: RenderPassOptions {
                label: format!("{} render pass", label),
                ..Default::default()
            },
            label,
            fixed_size: None,
        }
    }

    pub fn with_fixed_size(mut self, width: u32, height: u32) -> Self {
        self.fixed_size = Some((width, height));
        self
    }
}

/// An offscreen render pass drawing into a texture.
///
/// The texture is exposed to shaders as `renderTexture`.
#[derive(Debug)]
pub struct RenderTarget {
    pub uid: u64,
    pub label: String,
    render_pass: RenderPass,
    render_texture: TextureRef,
}

impl RenderTarget {
    pub fn new(params: RenderTargetParams, size: (u32, u32)) -> Result<Self> {
        let size = params.fixed_size.unwrap_or(size);

        let mut texture_params = TextureParams::new(format!("{} render texture", params.label))
            .with_name("renderTexture")
            .with_format(params.pass.color_format);
        if let Some((width, height)) = params.fixed_size {
            texture_params = texture_params.with_fixed_size(width, height);
        }

        Ok(RenderTarget {
            uid: generate_uid(),
            label: params.label,
            render_texture: Texture::new(texture_params, size)?.into_ref(),
            render_pass: RenderPass::new(params.pass, size),
        })
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn render_pass_mut(&mut self) -> &mut RenderPass {
        &mut self.render_pass
    }

    pub fn render_texture(&self) -> &TextureRef {
        &self.render_texture
    }

    /// The color target drawn into, creating the texture if needed.
    pub fn output(&self, ctx: &mut Context) -> Option<ColorTarget> {
        let mut texture = self.render_texture.borrow_mut();
        texture.create_texture(ctx);
        texture.gpu_texture().map(ColorTarget::Texture)
    }

    pub fn resize(&mut self, ctx: &mut Context, width: u32, height: u32) {
        let mut texture = self.render_texture.borrow_mut();
        texture.resize(ctx, width, height);
        let (width, height) = texture.size();
        self.render_pass.resize(ctx, width, height);
    }

    pub fn destroy(&mut self, ctx: &mut Context) {
        self.render_pass.destroy(ctx);
        self.render_texture.borrow_mut().destroy(ctx);
    }

    pub fn reset_gpu_handles(&mut self) {
        self.render_pass.reset_gpu_handles();
        self.render_texture.borrow_mut().reset_gpu_handles();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;

    #[test]
    fn fixed_size_targets_ignore_resizes() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut target =
            RenderTarget::new(RenderTargetParams::new("shadow").with_fixed_size(256, 256), (800, 600))
                .unwrap();

        assert!(target.output(&mut ctx).is_some());
        target.resize(&mut ctx, 1024, 768);
        assert_eq!(target.render_texture().borrow().size(), (256, 256));
        assert_eq!(target.render_pass().size(), (256, 256));
    }
}
