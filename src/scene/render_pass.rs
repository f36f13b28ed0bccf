//! Render passes and their attachments.

use crate::context::{
    ColorAttachment, ColorTarget, CommandEncoder, Context, DepthAttachment, LoadOp,
    RenderPassRecorder, TextureDescriptor, TextureId,
};
use crate::resource::TextureRef;

/// Options of a [`RenderPass`].
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassOptions {
    pub label: String,
    /// Samples per pixel. Above 1 the pass draws into a multisampled texture
    /// resolved into its output.
    pub sample_count: u32,
    pub use_depth: bool,
    pub color_format: wgpu::TextureFormat,
    pub depth_format: wgpu::TextureFormat,
    pub load_op: LoadOp<wgpu::Color>,
    pub depth_load_op: LoadOp<f32>,
    pub store: bool,
}

impl Default for RenderPassOptions {
    fn default() -> Self {
        RenderPassOptions {
            label: "Render pass".to_string(),
            sample_count: 4,
            use_depth: true,
            color_format: wgpu::TextureFormat::Bgra8Unorm,
            depth_format: wgpu::TextureFormat::Depth24Plus,
            load_op: LoadOp::Clear(wgpu::Color::TRANSPARENT),
            depth_load_op: LoadOp::Clear(1.0),
            store: true,
        }
    }
}

/// A render pass description with its lazily created multisampled and depth
/// textures.
#[derive(Debug)]
pub struct RenderPass {
    options: RenderPassOptions,
    size: (u32, u32),
    clear_value: wgpu::Color,
    msaa_texture: Option<TextureId>,
    depth_texture: Option<TextureId>,
}

impl RenderPass {
    pub fn new(options: RenderPassOptions, size: (u32, u32)) -> Self {
        let clear_value = match options.load_op {
            LoadOp::Clear(color) => color,
            LoadOp::Load => wgpu::Color::TRANSPARENT,
        };

        RenderPass {
            options,
            size,
            clear_value,
            msaa_texture: None,
            depth_texture: None,
        }
    }

    pub fn options(&self) -> &RenderPassOptions {
        &self.options
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn sample_count(&self) -> u32 {
        self.options.sample_count.max(1)
    }

    /// Clears or loads the color attachment on the next pass. Clearing
    /// reuses the color the pass was created with.
    pub fn set_load_op(&mut self, clear: bool) {
        self.options.load_op = if clear {
            LoadOp::Clear(self.clear_value)
        } else {
            LoadOp::Load
        };
    }

    pub fn set_clear_value(&mut self, color: wgpu::Color) {
        self.clear_value = color;
        if self.options.load_op.is_clear() {
            self.options.load_op = LoadOp::Clear(color);
        }
    }

    fn attachment_texture(
        &self,
        ctx: &mut Context,
        label: &str,
        format: wgpu::TextureFormat,
    ) -> TextureId {
        ctx.create_texture(&TextureDescriptor {
            label: format!("{} {}", self.options.label, label),
            width: self.size.0.max(1),
            height: self.size.1.max(1),
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            sample_count: self.sample_count(),
            mip_level_count: 1,
        })
    }

    /// Resolves the attachments drawing into `output`, creating the
    /// multisampled and depth textures on first use.
    pub fn update_view(
        &mut self,
        ctx: &mut Context,
        output: ColorTarget,
    ) -> (Vec<ColorAttachment>, Option<DepthAttachment>) {
        let color = if self.sample_count() > 1 {
            let texture = match self.msaa_texture {
                Some(texture) => texture,
                None => {
                    let texture = self.attachment_texture(ctx, "msaa texture", self.options.color_format);
                    self.msaa_texture = Some(texture);
                    texture
                }
            };

            ColorAttachment {
                view: ColorTarget::Texture(texture),
                resolve_target: Some(output),
                load: self.options.load_op,
                store: self.options.store,
            }
        } else {
            ColorAttachment {
                view: output,
                resolve_target: None,
                load: self.options.load_op,
                store: self.options.store,
            }
        };

        let depth = if self.options.use_depth {
            let texture = match self.depth_texture {
                Some(texture) => texture,
                None => {
                    let texture = self.attachment_texture(ctx, "depth texture", self.options.depth_format);
                    self.depth_texture = Some(texture);
                    texture
                }
            };

            Some(DepthAttachment {
                texture,
                load: self.options.depth_load_op,
                store: true,
            })
        } else {
            None
        };

        (vec![color], depth)
    }

    /// Starts a render pass drawing into `output`.
    pub fn begin<'a>(
        &mut self,
        ctx: &mut Context,
        encoder: &'a mut CommandEncoder,
        output: ColorTarget,
    ) -> RenderPassRecorder<'a> {
        let (colors, depth) = self.update_view(ctx, output);
        encoder.begin_render_pass(self.options.label.clone(), colors, depth)
    }

    /// Resizes the attachments. They are recreated on the next pass.
    pub fn resize(&mut self, ctx: &mut Context, width: u32, height: u32) {
        if self.size == (width, height) {
            return;
        }

        self.destroy(ctx);
        self.size = (width, height);
    }

    pub fn destroy(&mut self, ctx: &mut Context) {
        if let Some(texture) = self.msaa_texture.take() {
            ctx.destroy_texture(texture);
        }
        if let Some(texture) = self.depth_texture.take() {
            ctx.destroy_texture(texture);
        }
    }

    /// Forgets the attachments after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        self.msaa_texture = None;
        self.depth_texture = None;
    }
}

/// Work recorded right before or right after a render pass.
pub enum PassHook {
    /// Copies a color target into a texture.
    CopyTargetInto(TextureRef),
    Custom(Box<dyn FnMut(&mut CommandEncoder)>),
}

impl PassHook {
    /// Records the hook. `source` is the color target copied from.
    pub fn run(&mut self, ctx: &mut Context, encoder: &mut CommandEncoder, source: ColorTarget) {
        match self {
            PassHook::CopyTargetInto(texture) => {
                let mut texture = texture.borrow_mut();
                texture.create_texture(ctx);

                if let Some(destination) = texture.gpu_texture() {
                    if source != ColorTarget::Texture(destination) {
                        let (width, height) = texture.size();
                        encoder.copy_texture_to_texture(source, destination, width, height);
                    }
                }
            }
            PassHook::Custom(hook) => hook(encoder),
        }
    }
}

impl std::fmt::Debug for PassHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassHook::CopyTargetInto(texture) => {
                write!(f, "CopyTargetInto({})", texture.borrow().label)
            }
            PassHook::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EncodedCommand, HeadlessBackend};

    #[test]
    fn multisampled_passes_resolve_into_the_output() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);
        let mut pass = RenderPass::new(RenderPassOptions::default(), (800, 600));

        let (colors, depth) = pass.update_view(&mut ctx, ColorTarget::Surface);
        assert!(matches!(colors[0].view, ColorTarget::Texture(_)));
        assert_eq!(colors[0].resolve_target, Some(ColorTarget::Surface));
        assert!(depth.is_some());

        pass.update_view(&mut ctx, ColorTarget::Surface);
        assert_eq!(probe.stats().textures_created, 2);

        pass.resize(&mut ctx, 400, 300);
        assert_eq!(probe.stats().textures_destroyed, 2);
    }

    #[test]
    fn load_op_keeps_the_clear_color() {
        let mut pass = RenderPass::new(
            RenderPassOptions {
                load_op: LoadOp::Clear(wgpu::Color::RED),
                ..Default::default()
            },
            (1, 1),
        );

        pass.set_load_op(false);
        assert_eq!(pass.options().load_op, LoadOp::Load);
        pass.set_load_op(true);
        assert_eq!(pass.options().load_op, LoadOp::Clear(wgpu::Color::RED));
    }

    #[test]
    fn copy_hook_records_a_texture_copy() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let texture = crate::resource::Texture::new(
            crate::resource::TextureParams::new("copy"),
            (800, 600),
        )
        .unwrap()
        .into_ref();

        let mut encoder = CommandEncoder::new("frame");
        let mut hook = PassHook::CopyTargetInto(texture);
        hook.run(&mut ctx, &mut encoder, ColorTarget::Surface);

        assert!(matches!(
            encoder.commands[0],
            EncodedCommand::CopyTextureToTexture {
                source: ColorTarget::Surface,
                width: 800,
                height: 600,
                ..
            }
        ));
    }
}
