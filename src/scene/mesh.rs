//! Drawable elements of a scene.

use glamx::{Mat3, Vec3, Vec4};

use crate::context::{Context, RenderPassRecorder};
use crate::error::Result;
use crate::material::{
    Material, MaterialParams, RenderMaterial, RenderMaterialTarget, RenderShaders,
};
use crate::pipeline::{PipelineManager, RenderingOptions, ShaderSource};
use crate::resource::{BindGroupRef, BufferBindingParams, BufferInput, SamplerRef, TextureRef};
use crate::scene::{Camera, Geometry, Transform};
use crate::utils::generate_uid;

static SHADER_PASS_VERTEX: &str = include_str!("shaders/shader_pass_vertex.wgsl");
static SHADER_PASS_VARYINGS: &str = include_str!("shaders/shader_pass_varyings.wgsl");

/// What a mesh is used for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MeshKind {
    /// A geometry drawn in a scene stack.
    Mesh,
    /// A full-screen quad post-processing the content of the screen or of a
    /// render target.
    ShaderPass,
    /// A full-screen quad drawing into a render target that it reads back
    /// on the next frame.
    PingPongPlane,
}

/// Hook run on a mesh once per frame, before the matrix stack update.
pub type MeshHook = Box<dyn FnMut(&mut Mesh)>;

/// Options of a [`Mesh`].
pub struct MeshParams {
    pub label: String,
    pub material: MaterialParams,
    pub shaders: RenderShaders,
    pub options: RenderingOptions,
    /// Draw order within a pass. Lower values are drawn first.
    pub render_order: i32,
    /// Skip meshes whose bounding sphere is out of the camera frustum.
    pub frustum_culling: bool,
    pub visible: bool,
    /// Uid of the render target drawn into, instead of the screen.
    pub output_target: Option<u64>,
    /// Use the camera and the `matrices` binding to project vertices.
    pub projected: bool,
}

impl MeshParams {
    pub fn new(label: impl Into<String>, shaders: RenderShaders) -> Self {
        let label = label.into();
        MeshParams {
            material: MaterialParams::new(label.clone()),
            label,
            shaders,
            options: RenderingOptions::default(),
            render_order: 0,
            frustum_culling: true,
            visible: true,
            output_target: None,
            projected: true,
        }
    }

    pub fn with_material(mut self, material: MaterialParams) -> Self {
        self.material = material;
        self
    }

    pub fn with_options(mut self, options: RenderingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_render_order(mut self, render_order: i32) -> Self {
        self.render_order = render_order;
        self
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.options.transparent = transparent;
        self
    }

    pub fn with_output_target(mut self, target: u64) -> Self {
        self.output_target = Some(target);
        self
    }

    pub fn without_frustum_culling(mut self) -> Self {
        self.frustum_culling = false;
        self
    }

    pub fn unprojected(mut self) -> Self {
        self.projected = false;
        self
    }
}

/// Options of a shader pass or of a ping-pong plane.
pub struct ShaderPassParams {
    pub label: String,
    pub material: MaterialParams,
    /// Fragment shader. The vertex stage outputs `@location(0) uv: vec2f`.
    pub fragment: ShaderSource,
    pub options: RenderingOptions,
    pub render_order: i32,
    pub visible: bool,
    /// Uid of the render target whose texture is post-processed. When
    /// `None`, the screen content is copied before drawing.
    pub input_target: Option<u64>,
    /// Uid of the render target drawn into, instead of the screen.
    pub output_target: Option<u64>,
}

impl ShaderPassParams {
    pub fn new(label: impl Into<String>, fragment: ShaderSource) -> Self {
        let label = label.into();
        ShaderPassParams {
            material: MaterialParams::new(label.clone()),
            label,
            fragment,
            options: RenderingOptions {
                cull_mode: None,
                depth: false,
                ..Default::default()
            },
            render_order: 0,
            visible: true,
            input_target: None,
            output_target: None,
        }
    }

    pub fn with_material(mut self, material: MaterialParams) -> Self {
        self.material = material;
        self
    }

    pub fn with_render_order(mut self, render_order: i32) -> Self {
        self.render_order = render_order;
        self
    }

    pub fn with_input_target(mut self, target: u64) -> Self {
        self.input_target = Some(target);
        self
    }

    pub fn with_output_target(mut self, target: u64) -> Self {
        self.output_target = Some(target);
        self
    }
}

/// A geometry drawn with a render material.
pub struct Mesh {
    pub uid: u64,
    pub label: String,
    kind: MeshKind,
    geometry: Geometry,
    material: RenderMaterial,
    /// Position, rotation and scale.
    pub transform: Transform,
    pub render_order: i32,
    pub visible: bool,
    pub frustum_culling: bool,
    in_frustum: bool,
    matrices_dirty: bool,
    output_target: Option<u64>,
    input_target: Option<u64>,
    render_texture: Option<TextureRef>,
    owns_render_texture: bool,
    on_before_render: Option<MeshHook>,
}

impl Mesh {
    /// Creates a mesh. Projected meshes get a `matrices` uniform holding
    /// their model, model view, model view projection and normal matrices.
    pub fn new(ctx: &mut Context, geometry: Geometry, params: MeshParams) -> Result<Self> {
        let mut material = params.material;
        if params.projected {
            material.uniforms.push(
                BufferBindingParams::uniform("matrices")
                    .with_input(BufferInput::new("model", "mat4x4f", glamx::Mat4::IDENTITY))
                    .with_input(BufferInput::new("modelView", "mat4x4f", glamx::Mat4::IDENTITY))
                    .with_input(BufferInput::new(
                        "modelViewProjection",
                        "mat4x4f",
                        glamx::Mat4::IDENTITY,
                    ))
                    .with_input(BufferInput::new("normal", "mat3x3f", Mat3::IDENTITY)),
            );
        }

        let material = RenderMaterial::new(
            ctx,
            material,
            params.shaders,
            params.options,
            params.projected,
        )?;

        Ok(Mesh {
            uid: generate_uid(),
            label: params.label,
            kind: MeshKind::Mesh,
            geometry,
            material,
            transform: Transform::default(),
            render_order: params.render_order,
            visible: params.visible,
            frustum_culling: params.frustum_culling,
            in_frustum: true,
            matrices_dirty: params.projected,
            output_target: params.output_target,
            input_target: None,
            render_texture: None,
            owns_render_texture: false,
            on_before_render: None,
        })
    }

    /// Creates a full-screen quad sampling `render_texture` as
    /// `renderTexture`.
    ///
    /// `owned` is `false` when the texture belongs to the input render
    /// target.
    pub fn full_screen(
        ctx: &mut Context,
        kind: MeshKind,
        params: ShaderPassParams,
        render_texture: TextureRef,
        owned: bool,
    ) -> Result<Self> {
        let mut material = params.material;
        material.textures.insert(0, render_texture.clone());

        let shaders = RenderShaders {
            vertex: ShaderSource::new(SHADER_PASS_VERTEX, "main"),
            fragment: Some(params.fragment),
            varyings: Some(SHADER_PASS_VARYINGS.trim_end().to_string()),
        };

        let material = RenderMaterial::new(ctx, material, shaders, params.options, false)?;

        Ok(Mesh {
            uid: generate_uid(),
            label: params.label,
            kind,
            geometry: Geometry::plane(1, 1)?,
            material,
            transform: Transform::default(),
            render_order: params.render_order,
            visible: params.visible,
            frustum_culling: false,
            in_frustum: true,
            matrices_dirty: false,
            output_target: params.output_target,
            input_target: params.input_target,
            render_texture: Some(render_texture),
            owns_render_texture: owned,
            on_before_render: None,
        })
    }

    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }

    pub fn material(&self) -> &RenderMaterial {
        &self.material
    }

    pub fn material_mut(&mut self) -> &mut RenderMaterial {
        &mut self.material
    }

    pub fn is_projected(&self) -> bool {
        self.material.is_projected()
    }

    pub fn is_transparent(&self) -> bool {
        self.material.is_transparent()
    }

    /// `false` if the last culling test found the mesh out of the camera
    /// frustum.
    pub fn in_frustum(&self) -> bool {
        self.in_frustum
    }

    pub fn output_target(&self) -> Option<u64> {
        self.output_target
    }

    pub(crate) fn set_output_target(&mut self, target: Option<u64>) {
        self.output_target = target;
    }

    pub fn input_target(&self) -> Option<u64> {
        self.input_target
    }

    /// The texture sampled by shader passes and ping-pong planes.
    pub fn render_texture(&self) -> Option<&TextureRef> {
        self.render_texture.as_ref()
    }

    /// Sets the hook run before every frame.
    pub fn set_on_before_render(&mut self, hook: impl FnMut(&mut Mesh) + 'static) {
        self.on_before_render = Some(Box::new(hook));
    }

    pub(crate) fn run_on_before_render(&mut self) {
        if let Some(mut hook) = self.on_before_render.take() {
            hook(self);
            if self.on_before_render.is_none() {
                self.on_before_render = Some(hook);
            }
        }
    }

    /// Sets the value of an input of one of the material buffer bindings.
    pub fn set_input(
        &self,
        binding: &str,
        input: &str,
        value: impl Into<crate::resource::InputValue>,
    ) -> bool {
        self.material.set_input(binding, input, value.into())
    }

    /// Changes the rendering options of the material.
    pub fn set_rendering_options(
        &mut self,
        manager: &mut PipelineManager,
        options: RenderingOptions,
    ) {
        self.material.set_rendering_options(manager, options);
    }

    pub(crate) fn update_matrix_stack(&mut self) {
        if self.transform.update_matrix_stack() {
            self.matrices_dirty = true;
        }
    }

    /// Refreshes the `matrices` uniform if the mesh or the camera moved.
    pub(crate) fn update_matrices(&mut self, camera: &Camera, camera_changed: bool) {
        if !self.is_projected() || !(self.matrices_dirty || camera_changed) {
            return;
        }

        let model = self.transform.world_matrix();
        let model_view = camera.view_matrix() * model;
        let model_view_projection = camera.projection_matrix() * model_view;
        let normal = Mat3::from_mat4(model_view).inverse().transpose();

        let base = self.material.base();
        base.set_input("matrices", "model", model);
        base.set_input("matrices", "modelView", model_view);
        base.set_input("matrices", "modelViewProjection", model_view_projection);
        base.set_input("matrices", "normal", normal);
        self.matrices_dirty = false;
    }

    /// World space center and radius of the bounding sphere.
    pub fn world_bounding_sphere(&self) -> (Vec3, f32) {
        let (center, radius) = self.geometry.bounding_sphere();
        (
            self.transform.world_matrix().transform_point3(center),
            radius * self.transform.world_scale(),
        )
    }

    /// Distance from `eye` to the closest point of the bounding sphere.
    pub fn camera_distance(&self, eye: Vec3) -> f32 {
        let (center, radius) = self.world_bounding_sphere();
        eye.distance(center) - radius
    }

    /// Tests the bounding sphere against the six planes of the camera
    /// frustum.
    pub(crate) fn check_frustum(&mut self, camera: &Camera) {
        if !self.is_projected() || !self.frustum_culling {
            self.in_frustum = true;
            return;
        }

        let m = camera.view_projection();
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let planes: [Vec4; 6] = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2];
        let (center, radius) = self.world_bounding_sphere();

        self.in_frustum = planes.iter().all(|plane| {
            let normal = plane.truncate();
            let length = normal.length();
            if length == 0.0 {
                return true;
            }
            (normal.dot(center) + plane.w) / length >= -radius
        });
    }

    /// Creates the GPU buffers, compiles the material and updates its bind
    /// groups.
    pub fn prepare(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
        camera: Option<&BindGroupRef>,
        default_sampler: Option<&SamplerRef>,
    ) -> Result<()> {
        self.geometry.create_buffers(ctx);
        self.material.compile_material(
            ctx,
            manager,
            RenderMaterialTarget {
                vertex_layout: self.geometry.vertex_layout(),
                camera,
                default_sampler,
            },
        )?;
        self.material.update_bind_groups(ctx, manager)
    }

    /// `true` if the mesh would issue a draw call this frame.
    pub fn is_drawable(&self) -> bool {
        self.visible && self.in_frustum
    }

    /// Records the draw call. Returns `false` if nothing was drawn.
    pub fn render(&self, manager: &mut PipelineManager, pass: &mut RenderPassRecorder<'_>) -> bool {
        if !self.is_drawable() || !self.geometry.ready() {
            return false;
        }

        if !self.material.render(manager, pass) {
            return false;
        }

        self.geometry.draw(pass);
        true
    }

    /// Resizes the render texture the mesh owns.
    pub fn resize(&mut self, ctx: &mut Context, width: u32, height: u32) {
        if self.owns_render_texture {
            if let Some(texture) = &self.render_texture {
                texture.borrow_mut().resize(ctx, width, height);
            }
        }
    }

    /// Releases the material, the geometry buffers and the owned render
    /// texture.
    pub fn destroy(&mut self, ctx: &mut Context, manager: &mut PipelineManager) {
        self.material.destroy(ctx, manager);
        self.geometry.destroy(ctx);

        if self.owns_render_texture {
            if let Some(texture) = &self.render_texture {
                texture.borrow_mut().destroy(ctx);
            }
        }
    }

    /// Forgets every GPU handle after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        self.material.reset_gpu_handles();
        self.geometry.reset_gpu_handles();
        if let Some(texture) = &self.render_texture {
            texture.borrow_mut().reset_gpu_handles();
        }
        self.matrices_dirty = self.is_projected();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;

    const SHADER: &str = "@vertex fn vs_main(attributes: Attributes) -> @builtin(position) vec4f {\n\
                          \treturn getOutputPosition(attributes.position);\n}\n\
                          @fragment fn fs_main() -> @location(0) vec4f { return vec4f(1.0); }";

    fn mesh(ctx: &mut Context) -> Mesh {
        Mesh::new(
            ctx,
            Geometry::plane(1, 1).unwrap(),
            MeshParams::new("quad", RenderShaders::new(SHADER, "vs_main", "fs_main")),
        )
        .unwrap()
    }

    #[test]
    fn meshes_behind_the_camera_are_culled() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let camera = Camera::default();
        let mut mesh = mesh(&mut ctx);

        mesh.update_matrix_stack();
        mesh.check_frustum(&camera);
        assert!(mesh.in_frustum());

        mesh.transform.set_position(Vec3::new(0.0, 0.0, 20.0));
        mesh.update_matrix_stack();
        mesh.check_frustum(&camera);
        assert!(!mesh.in_frustum());

        mesh.frustum_culling = false;
        mesh.check_frustum(&camera);
        assert!(mesh.in_frustum());
    }

    #[test]
    fn camera_distance_accounts_for_the_scaled_radius() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut mesh = mesh(&mut ctx);
        mesh.transform.set_scale(Vec3::splat(2.0));
        mesh.update_matrix_stack();

        let radius = std::f32::consts::SQRT_2 * 2.0;
        let distance = mesh.camera_distance(Vec3::new(0.0, 0.0, 10.0));
        assert!((distance - (10.0 - radius)).abs() < 1.0e-5);
    }

    #[test]
    fn matrices_follow_the_camera() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut camera = Camera::default();
        let mut mesh = mesh(&mut ctx);

        mesh.update_matrix_stack();
        mesh.update_matrices(&camera, false);

        camera.set_position(Vec3::new(0.0, 0.0, 4.0));
        mesh.update_matrices(&camera, true);

        let binding = mesh.material().binding("matrices").unwrap();
        let binding = binding.borrow();
        let input = binding.as_buffer().unwrap().input("modelView").unwrap();
        let values = input.value().components();
        assert_eq!(values[14], -4.0);
        assert!(input.should_update());
    }

    #[test]
    fn hooks_run_with_the_mesh() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut mesh = mesh(&mut ctx);
        mesh.set_on_before_render(|mesh| mesh.render_order += 1);

        mesh.run_on_before_render();
        mesh.run_on_before_render();
        assert_eq!(mesh.render_order, 2);
    }
}
