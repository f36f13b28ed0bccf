use std::sync::Arc;

use crate::context::{BufferId, Context, GpuBackend, WgpuBackend};
use crate::error::{Error, Result};
use crate::material::Material;
use crate::pipeline::{PipelineManager, RenderingOptions};
use crate::resource::{
    BindGroupRef, Sampler, SamplerParams, SamplerRef, SharedBuffer, Texture, TextureParams,
    TextureRef,
};
use crate::scene::{
    Camera, ComputePass, ComputePassParams, Geometry, Mesh, MeshKind, MeshParams,
    RenderPassOptions, RenderTarget, RenderTargetParams, Scene, ShaderPassParams,
};
use crate::utils::generate_uid;

/// Options of a [`Renderer`].
#[derive(Clone, Debug, PartialEq)]
pub struct RendererOptions {
    pub label: String,
    /// Samples per pixel of the main scene pass.
    pub sample_count: u32,
    pub clear_color: wgpu::Color,
    pub use_depth: bool,
    pub depth_format: wgpu::TextureFormat,
    /// Vertical field of view of the camera, in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for RendererOptions {
    fn default() -> Self {
        RendererOptions {
            label: "Renderer".to_string(),
            sample_count: 4,
            clear_color: wgpu::Color::TRANSPARENT,
            use_depth: true,
            depth_format: wgpu::TextureFormat::Depth24Plus,
            fov: 50.0_f32.to_radians(),
            near: 0.1,
            far: 150.0,
        }
    }
}

/// Owns the device context, the scene and everything shared by its meshes:
/// the camera, the default sampler and the registered textures.
///
/// The renderer is driven by an external loop calling [`Renderer::render`]
/// once per frame.
pub struct Renderer {
    uid: u64,
    label: String,
    ctx: Context,
    pipelines: PipelineManager,
    scene: Scene,
    camera: Camera,
    camera_bind_group: BindGroupRef,
    default_sampler: SamplerRef,
    textures: Vec<TextureRef>,
    samplers: Vec<SamplerRef>,
    format: wgpu::TextureFormat,
    size: (u32, u32),
}

impl Renderer {
    /// Creates a renderer driving the given backend.
    pub fn new(backend: impl GpuBackend + 'static, options: RendererOptions) -> Result<Self> {
        Self::from_boxed(Box::new(backend), options)
    }

    /// Creates a renderer presenting to a winit window.
    pub async fn from_window(
        window: Arc<winit::window::Window>,
        options: RendererOptions,
    ) -> Result<Self> {
        let backend = WgpuBackend::from_window(window).await?;
        Self::new(backend, options)
    }

    /// Creates a renderer from an already boxed backend.
    pub fn from_boxed(backend: Box<dyn GpuBackend>, options: RendererOptions) -> Result<Self> {
        let mut ctx = Context::from_boxed(backend);
        let size = ctx.backend().surface_size();
        let format = ctx.backend().preferred_format();
        let uid = generate_uid();

        let mut camera = Camera::new(options.fov, 1.0, options.near, options.far);
        camera.set_size(size.0, size.1);
        let camera_bind_group = camera.create_bind_group(&mut ctx)?;
        camera_bind_group.borrow_mut().add_consumer(uid);

        let main = RenderPassOptions {
            label: format!("{} main render pass", options.label),
            sample_count: options.sample_count,
            use_depth: options.use_depth,
            color_format: format,
            depth_format: options.depth_format,
            load_op: crate::context::LoadOp::Clear(options.clear_color),
            ..Default::default()
        };
        let post_processing = RenderPassOptions {
            label: format!("{} post processing render pass", options.label),
            sample_count: 1,
            use_depth: false,
            color_format: format,
            load_op: crate::context::LoadOp::Clear(options.clear_color),
            ..Default::default()
        };

        log::info!(
            "curtains: renderer `{}` created ({}x{}, {:?})",
            options.label,
            size.0,
            size.1,
            format
        );

        Ok(Renderer {
            uid,
            label: options.label,
            scene: Scene::new(main, post_processing, size),
            ctx,
            pipelines: PipelineManager::new(),
            camera,
            camera_bind_group,
            default_sampler: Sampler::default_sampler().into_ref(),
            textures: Vec::new(),
            samplers: Vec::new(),
            format,
            size,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn pipeline_manager(&self) -> &PipelineManager {
        &self.pipelines
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// The bind group holding the `camera` uniform.
    pub fn camera_bind_group(&self) -> &BindGroupRef {
        &self.camera_bind_group
    }

    /// GPU buffer of the `camera` uniform, once created.
    pub fn camera_buffer(&self) -> Option<BufferId> {
        let binding = self.camera_bind_group.borrow().binding("camera")?;
        let buffer = binding.borrow().as_buffer()?.buffer().clone();
        let id = buffer.borrow().gpu_buffer();
        id
    }

    /// The sampler added to texture bind groups declaring none.
    pub fn default_sampler(&self) -> &SamplerRef {
        &self.default_sampler
    }

    /// Format of the presented surface.
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Mesh shorthand for [`Scene::mesh`].
    pub fn mesh(&self, uid: u64) -> Option<&Mesh> {
        self.scene.mesh(uid)
    }

    /// Mesh shorthand for [`Scene::mesh_mut`].
    pub fn mesh_mut(&mut self, uid: u64) -> Option<&mut Mesh> {
        self.scene.mesh_mut(uid)
    }

    /// Resizes the surface and everything following its size.
    pub fn resize(&mut self, width: u32, height: u32) {
        let size = (width.max(1), height.max(1));
        if size == self.size {
            return;
        }

        self.size = size;
        self.ctx.backend_mut().resize_surface(size.0, size.1);
        self.camera.set_size(size.0, size.1);
        self.scene.resize(&mut self.ctx, size.0, size.1);

        for texture in &self.textures {
            texture.borrow_mut().resize(&mut self.ctx, size.0, size.1);
        }
    }

    /// Creates a texture sized like the renderer unless its parameters fix
    /// its size.
    pub fn create_texture(&mut self, params: TextureParams) -> Result<TextureRef> {
        let texture = Texture::new(params, self.size)?.into_ref();
        self.textures.push(texture.clone());
        Ok(texture)
    }

    /// Destroys a texture created by this renderer.
    pub fn remove_texture(&mut self, texture: &TextureRef) {
        self.textures.retain(|other| !std::rc::Rc::ptr_eq(other, texture));
        texture.borrow_mut().destroy(&mut self.ctx);
    }

    pub fn create_sampler(&mut self, params: SamplerParams) -> SamplerRef {
        let sampler = Sampler::new(params).into_ref();
        self.samplers.push(sampler.clone());
        sampler
    }

    /// Forgets a sampler created by this renderer.
    pub fn remove_sampler(&mut self, sampler: &SamplerRef) {
        self.samplers.retain(|other| !std::rc::Rc::ptr_eq(other, sampler));
    }

    fn match_pass_options(
        &self,
        kind: MeshKind,
        output: Option<u64>,
        options: &mut RenderingOptions,
    ) {
        let pass = self.scene.pass_options(kind, output);
        options.target_format = pass.color_format;
        options.sample_count = pass.sample_count.max(1);
        options.depth = options.depth && pass.use_depth;
        options.depth_format = pass.depth_format;
    }

    /// Creates a mesh and adds it to the scene. Its rendering options are
    /// matched to the pass it draws in.
    pub fn create_mesh(&mut self, geometry: Geometry, mut params: MeshParams) -> Result<u64> {
        self.match_pass_options(MeshKind::Mesh, params.output_target, &mut params.options);
        let mesh = Mesh::new(&mut self.ctx, geometry, params)?;
        Ok(self.scene.add_mesh(mesh))
    }

    /// Changes the rendering options of a mesh, keeping the format, sample
    /// count and depth of the pass it draws in. A mesh becoming transparent,
    /// or opaque, moves to the matching list of its pass.
    ///
    /// Returns `false` if there is no such mesh.
    pub fn set_mesh_rendering_options(&mut self, uid: u64, mut options: RenderingOptions) -> bool {
        let Some((kind, output)) = self.scene.mesh(uid).map(|m| (m.kind(), m.output_target()))
        else {
            return false;
        };
        self.match_pass_options(kind, output, &mut options);

        if let Some(mesh) = self.scene.mesh_mut(uid) {
            mesh.set_rendering_options(&mut self.pipelines, options);
        }
        self.scene.restack_mesh(uid);
        true
    }

    /// Creates a full-screen pass sampling `renderTexture`: the screen
    /// content, or the texture of its input render target.
    pub fn create_shader_pass(&mut self, mut params: ShaderPassParams) -> Result<u64> {
        self.match_pass_options(MeshKind::ShaderPass, params.output_target, &mut params.options);

        let input = params
            .input_target
            .and_then(|uid| self.scene.render_target(uid))
            .map(|target| target.render_texture().clone());

        let (texture, owned) = match input {
            Some(texture) => (texture, false),
            None => {
                let texture = Texture::new(
                    TextureParams::new(format!("{} render texture", params.label))
                        .with_name("renderTexture")
                        .with_format(self.format),
                    self.size,
                )?;
                (texture.into_ref(), true)
            }
        };

        let mesh = Mesh::full_screen(&mut self.ctx, MeshKind::ShaderPass, params, texture, owned)?;
        Ok(self.scene.add_mesh(mesh))
    }

    /// Creates a full-screen plane drawing into its own render target. The
    /// plane samples the previous frame content as `renderTexture`.
    pub fn create_ping_pong_plane(&mut self, mut params: ShaderPassParams) -> Result<u64> {
        let mut target_params = RenderTargetParams::new(format!("{} target", params.label));
        target_params.pass.sample_count = 1;
        target_params.pass.use_depth = false;
        target_params.pass.color_format = self.format;
        let target = self.create_render_target(target_params)?;

        params.output_target = Some(target);
        params.input_target = None;
        self.match_pass_options(MeshKind::PingPongPlane, Some(target), &mut params.options);

        let texture = Texture::new(
            TextureParams::new(format!("{} render texture", params.label))
                .with_name("renderTexture")
                .with_format(self.format),
            self.size,
        )?;

        let mesh = Mesh::full_screen(
            &mut self.ctx,
            MeshKind::PingPongPlane,
            params,
            texture.into_ref(),
            true,
        )?;
        Ok(self.scene.add_mesh(mesh))
    }

    /// Removes and destroys a mesh, shader pass or ping-pong plane.
    pub fn remove_mesh(&mut self, uid: u64) -> bool {
        let Some(mut mesh) = self.scene.remove_mesh(uid) else {
            return false;
        };

        mesh.destroy(&mut self.ctx, &mut self.pipelines);
        if mesh.kind() == MeshKind::PingPongPlane {
            if let Some(target) = mesh.output_target() {
                let _ = self.remove_render_target(target);
            }
        }
        true
    }

    pub fn create_render_target(&mut self, params: RenderTargetParams) -> Result<u64> {
        let target = RenderTarget::new(params, self.size)?;
        Ok(self.scene.add_render_target(target))
    }

    /// Removes and destroys a render target. Meshes drawing into it now draw
    /// to the screen.
    pub fn remove_render_target(&mut self, uid: u64) -> bool {
        match self.scene.remove_render_target(uid) {
            Some(mut target) => {
                target.destroy(&mut self.ctx);
                true
            }
            None => false,
        }
    }

    pub fn create_compute_pass(&mut self, params: ComputePassParams) -> Result<u64> {
        let pass = ComputePass::new(&mut self.ctx, params)?;
        Ok(self.scene.add_compute_pass(pass))
    }

    pub fn remove_compute_pass(&mut self, uid: u64) -> bool {
        match self.scene.remove_compute_pass(uid) {
            Some(mut pass) => {
                pass.destroy(&mut self.ctx, &mut self.pipelines);
                true
            }
            None => false,
        }
    }

    /// Renders one frame.
    ///
    /// Frames are skipped while the device is lost. Failures of pipelines
    /// compiled asynchronously are returned once the frame is submitted.
    pub fn render(&mut self) -> Result<()> {
        if self.ctx.is_lost() {
            return Ok(());
        }

        let camera_changed = self.camera.is_dirty();
        self.camera.update_bind_group(&self.camera_bind_group);
        {
            let mut camera = self.camera_bind_group.borrow_mut();
            camera.create_bind_group(&mut self.ctx)?;
            camera.update(&mut self.ctx)?;
        }

        self.scene.on_before_render(&self.camera, camera_changed);

        let mut encoder = self.ctx.begin_frame()?;
        let recorded = self.scene.render(
            &mut self.ctx,
            &mut self.pipelines,
            &mut encoder,
            &self.camera,
            &self.camera_bind_group,
            &self.default_sampler,
        );
        let submitted = self.ctx.submit(encoder);

        recorded?;
        submitted?;
        self.pipelines.poll_pending(&mut self.ctx)
    }

    fn result_buffer(&self, pass: u64, binding: &str) -> Result<SharedBuffer> {
        self.scene
            .compute_pass(pass)
            .and_then(|pass| pass.material().result_buffer(binding))
            .ok_or_else(|| Error::MissingBinding(binding.to_string()))
    }

    /// Reads back the result buffer of the writable storage binding named
    /// `binding` of a compute pass.
    ///
    /// Must not be called while a frame is being recorded.
    pub async fn get_compute_result(&mut self, pass: u64, binding: &str) -> Result<Vec<u8>> {
        let buffer = self.result_buffer(pass, binding)?;
        let buffer = buffer.borrow();

        let id = buffer.gpu_buffer().ok_or_else(|| Error::BufferMap {
            label: buffer.label.clone(),
            message: "the result buffer has not been created yet".to_string(),
        })?;

        self.ctx.backend_mut().read_buffer(id, 0, buffer.size())
    }

    /// Reads back a single element of a compute result.
    pub async fn get_compute_result_element(
        &mut self,
        pass: u64,
        binding: &str,
        element: &str,
    ) -> Result<Vec<f64>> {
        let data = self.get_compute_result(pass, binding).await?;

        let binding_ref = self
            .scene
            .compute_pass(pass)
            .and_then(|pass| pass.material().binding(binding))
            .ok_or_else(|| Error::MissingBinding(binding.to_string()))?;
        let binding_ref = binding_ref.borrow();

        binding_ref
            .as_writable()
            .and_then(|writable| writable.inner.extract_data_from_buffer_result(&data, element))
            .ok_or_else(|| Error::MissingBinding(format!("{}.{}", binding, element)))
    }

    /// Drops every GPU handle after the device has been lost. Frames are
    /// skipped until [`Renderer::restore_device`] is called.
    pub fn lose_device(&mut self) {
        self.ctx.lose();
        self.pipelines.reset_gpu_handles();
        self.scene.reset_gpu_handles();
        self.camera_bind_group.borrow_mut().reset_gpu_handles();
        self.default_sampler.borrow_mut().reset_gpu_handles();

        for texture in &self.textures {
            texture.borrow_mut().reset_gpu_handles();
        }
        for sampler in &self.samplers {
            sampler.borrow_mut().reset_gpu_handles();
        }
    }

    /// Resumes rendering, on `backend` if given. Every GPU object is
    /// recreated lazily by the next frame.
    pub fn restore_device(&mut self, backend: Option<Box<dyn GpuBackend>>) {
        self.ctx.restore(backend);
        self.format = self.ctx.backend().preferred_format();

        let (width, height) = self.ctx.backend().surface_size();
        self.resize(width, height);
    }

    /// Destroys the scene and every registered resource.
    pub fn destroy(&mut self) {
        self.scene.destroy(&mut self.ctx, &mut self.pipelines);
        self.camera_bind_group
            .borrow_mut()
            .release(&mut self.ctx, self.uid);

        for texture in self.textures.drain(..) {
            texture.borrow_mut().destroy(&mut self.ctx);
        }
        self.samplers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ColorTarget, EncodedCommand, HeadlessBackend, HeadlessProbe};
    use crate::material::{MaterialParams, RenderShaders};
    use crate::pipeline::{PatchedShaders, ShaderSource};
    use crate::resource::{BufferBindingParams, BufferInput};
    use crate::scene::PassKind;
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    const FRAGMENT: &str = "@fragment fn main(fsInput: VSOutput) -> @location(0) vec4f {\n\
                            \treturn textureSample(renderTexture, defaultSampler, fsInput.uv);\n}";

    fn renderer() -> (Renderer, HeadlessProbe) {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        (Renderer::new(backend, RendererOptions::default()).unwrap(), probe)
    }

    fn pass_params(label: &str) -> ShaderPassParams {
        ShaderPassParams::new(label, ShaderSource::new(FRAGMENT, "main"))
    }

    fn patched(material: &impl Material) -> PatchedShaders {
        let entry = material.base().pipeline_entry().unwrap();
        let shaders = entry.borrow().patched_shaders().cloned().unwrap();
        shaders
    }

    /// Parses and validates `code` the way wgpu does before creating a module.
    fn validate_wgsl(code: &str) {
        let module = naga::front::wgsl::parse_str(code)
            .unwrap_or_else(|err| panic!("{}\n{}", err.emit_to_string(code), code));

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        if let Err(err) = validator.validate(&module) {
            panic!("{:?}\n{}", err, code);
        }
    }

    fn add_mesh(renderer: &mut Renderer, code: &str, material: MaterialParams) -> u64 {
        let params = MeshParams::new("mesh", RenderShaders::new(code, "vs_main", "fs_main"))
            .with_material(material);
        renderer.create_mesh(Geometry::plane(1, 1).unwrap(), params).unwrap()
    }

    #[test]
    fn projected_mesh_shaders_are_valid_wgsl() {
        let (mut renderer, _probe) = renderer();
        let code = "@vertex fn vs_main(attributes: Attributes) -> @builtin(position) vec4f {\n\
                    \treturn getOutputPosition(attributes.position);\n}\n\
                    @fragment fn fs_main() -> @location(0) vec4f { return params.color; }";
        let material = MaterialParams::new("flat").with_uniform(
            BufferBindingParams::uniform("params")
                .with_input(BufferInput::new("color", "vec4f", glamx::Vec4::ONE)),
        );
        let mesh = add_mesh(&mut renderer, code, material);
        renderer.render().unwrap();

        let shaders = patched(renderer.mesh(mesh).unwrap().material());
        assert!(shaders.fragment.is_none());
        assert!(shaders.main.contains("var<uniform> camera: Camera;"));
        validate_wgsl(&shaders.main);
    }

    #[test]
    fn array_inputs_are_valid_wgsl() {
        let (mut renderer, _probe) = renderer();
        let code = "@vertex fn vs_main(attributes: Attributes) -> @builtin(position) vec4f {\n\
                    \tlet shift = points.positions[attributes.vertexIndex % 4u];\n\
                    \treturn getOutputPosition(attributes.position) + vec4f(shift, 0.0, 0.0);\n}\n\
                    @fragment fn fs_main() -> @location(0) vec4f {\n\
                    \treturn colors[0] * blur.elements[2].weights * blur.radius;\n}";
        let material = MaterialParams::new("arrays")
            .with_uniform(
                BufferBindingParams::uniform("blur")
                    .with_input(BufferInput::new("radius", "f32", 2.0_f32))
                    .with_input(BufferInput::new("weights", "array<f32>", vec![0.25_f32; 4])),
            )
            .with_storage(
                BufferBindingParams::storage("points")
                    .with_input(BufferInput::new("positions", "array<vec2f>", vec![0.0_f32; 8])),
            )
            .with_storage(
                BufferBindingParams::storage("colors")
                    .without_struct()
                    .with_input(BufferInput::new("colors", "array<vec4f>", vec![1.0_f32; 8])),
            );
        let mesh = add_mesh(&mut renderer, code, material);
        renderer.render().unwrap();

        let shaders = patched(renderer.mesh(mesh).unwrap().material());
        assert!(shaders.main.contains("@align(16) elements: array<BlurElement, 4>"));
        validate_wgsl(&shaders.main);
    }

    #[test]
    fn shader_pass_modules_are_valid_wgsl() {
        let (mut renderer, _probe) = renderer();
        let fragment = "@fragment fn main(fsInput: VSOutput) -> @location(0) vec4f {\n\
                        \treturn textureSample(renderTexture, defaultSampler, fsInput.uv) * params.tint;\n}";
        let material = MaterialParams::new("tint").with_uniform(
            BufferBindingParams::uniform("params")
                .with_input(BufferInput::new("tint", "vec4f", glamx::Vec4::ONE)),
        );
        let pass = renderer
            .create_shader_pass(
                ShaderPassParams::new("tint", ShaderSource::new(fragment, "main"))
                    .with_material(material),
            )
            .unwrap();
        renderer.render().unwrap();

        let shaders = patched(renderer.mesh(pass).unwrap().material());
        let fragment = shaders.fragment.unwrap();
        assert!(shaders.main.contains("struct VSOutput"));
        assert!(fragment.contains("struct VSOutput"));
        validate_wgsl(&shaders.main);
        validate_wgsl(&fragment);
    }

    #[test]
    fn compute_shaders_are_valid_wgsl() {
        let (mut renderer, _probe) = renderer();
        let code = "@compute @workgroup_size(64) fn main(@builtin(global_invocation_id) id: vec3u) {\n\
                    \tif (id.x >= arrayLength(&particles.elements)) {\n\t\treturn;\n\t}\n\
                    \tlet velocity = particles.elements[id.x].velocity;\n\
                    \tparticles.elements[id.x].position += velocity * params.delta;\n}";
        let particles = BufferBindingParams::storage("particles")
            .with_input(BufferInput::new("position", "array<vec4f>", vec![0.0_f32; 16]))
            .with_input(BufferInput::new("velocity", "array<vec4f>", vec![1.0_f32; 16]));
        let material = MaterialParams::new("particles")
            .with_uniform(
                BufferBindingParams::uniform("params")
                    .with_input(BufferInput::new("delta", "f32", 0.016_f32)),
            )
            .with_writable_storage(particles, false);
        let params = ComputePassParams::new("particles", ShaderSource::new(code, "main"))
            .with_material(material);
        let pass = renderer.create_compute_pass(params).unwrap();
        renderer.render().unwrap();

        let shaders = patched(renderer.scene().compute_pass(pass).unwrap().material());
        assert!(shaders.main.contains("var<storage, read_write> particles: Particles;"));
        validate_wgsl(&shaders.main);
    }

    #[test]
    fn ping_pong_planes_copy_their_output() {
        let (mut renderer, probe) = renderer();
        let plane = renderer.create_ping_pong_plane(pass_params("feedback")).unwrap();
        let target = renderer.mesh(plane).unwrap().output_target().unwrap();
        assert_eq!(renderer.scene().entries(PassKind::PingPong).len(), 1);

        renderer.render().unwrap();

        let output = renderer
            .scene()
            .render_target(target)
            .unwrap()
            .render_texture()
            .borrow()
            .gpu_texture()
            .unwrap();
        let frame = probe.last_frame().unwrap();
        let EncodedCommand::RenderPass(record) = &frame.commands[0] else {
            panic!("expected a render pass");
        };
        assert_eq!(record.color_attachments[0].view, ColorTarget::Texture(output));
        assert!(matches!(
            frame.commands[1],
            EncodedCommand::CopyTextureToTexture { source, .. }
                if source == ColorTarget::Texture(output)
        ));

        assert!(renderer.remove_mesh(plane));
        assert!(renderer.scene().render_target(target).is_none());
        assert!(renderer.scene().entries(PassKind::PingPong).is_empty());
    }

    #[test]
    fn selective_shader_passes_sample_their_input_target() {
        let (mut renderer, _probe) = renderer();
        let target = renderer
            .create_render_target(RenderTargetParams::new("scene"))
            .unwrap();
        let pass = renderer
            .create_shader_pass(pass_params("blur").with_input_target(target))
            .unwrap();

        let input = renderer.scene().render_target(target).unwrap().render_texture().clone();
        let texture = renderer.mesh(pass).unwrap().render_texture().unwrap().clone();
        assert!(std::rc::Rc::ptr_eq(&input, &texture));

        let entry = &renderer.scene().entries(PassKind::Screen)[0];
        assert!(!entry.is_post_process());
    }

    #[test]
    fn meshes_match_the_format_of_their_pass() {
        let (mut renderer, _probe) = renderer();
        let pass = renderer.create_shader_pass(pass_params("grade")).unwrap();

        let options = renderer.mesh(pass).unwrap().material().rendering_options().clone();
        assert_eq!(options.sample_count, 1);
        assert!(!options.depth);
        assert_eq!(options.target_format, renderer.format());
    }

    #[test]
    fn removed_textures_are_destroyed() {
        let (mut renderer, probe) = renderer();
        let texture = renderer.create_texture(TextureParams::new("scratch")).unwrap();
        texture.borrow_mut().create_texture(renderer.context_mut());
        assert_eq!(probe.stats().textures_created, 1);

        renderer.remove_texture(&texture);
        assert_eq!(probe.stats().textures_destroyed, 1);
        assert!(texture.borrow().gpu_texture().is_none());
    }
}
