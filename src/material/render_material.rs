//! Materials drawing geometries.

use crate::context::{Context, RenderPassRecorder};
use crate::error::Result;
use crate::material::{Material, MaterialBase, MaterialParams};
use crate::pipeline::{
    PipelineManager, RenderPipelineParams, RenderStages, RenderingOptions, ShaderSource,
    VertexLayout,
};
use crate::resource::{BindGroupRef, SamplerRef};

/// Shaders of a render material.
#[derive(Clone, Debug)]
pub struct RenderShaders {
    pub vertex: ShaderSource,
    /// `None` disables the fragment stage, e.g. for depth-only passes.
    pub fragment: Option<ShaderSource>,
    /// Declarations added to both stages, such as the struct passed from the
    /// vertex to the fragment stage.
    pub varyings: Option<String>,
}

impl RenderShaders {
    /// Vertex and fragment stages read from the same WGSL source.
    pub fn new(code: &str, vertex_entry: &str, fragment_entry: &str) -> Self {
        RenderShaders {
            vertex: ShaderSource::new(code, vertex_entry),
            fragment: Some(ShaderSource::new(code, fragment_entry)),
            varyings: None,
        }
    }
}

/// What the pipeline of a render material needs besides its own state.
pub struct RenderMaterialTarget<'a> {
    pub vertex_layout: &'a VertexLayout,
    /// Camera bind group of projected materials.
    pub camera: Option<&'a BindGroupRef>,
    pub default_sampler: Option<&'a SamplerRef>,
}

/// A material drawing a geometry with a render pipeline.
pub struct RenderMaterial {
    base: MaterialBase,
    shaders: RenderShaders,
    options: RenderingOptions,
    projected: bool,
}

impl RenderMaterial {
    /// Creates the material. A `projected` material binds the camera and
    /// uses the camera based `getOutputPosition` helper.
    pub fn new(
        ctx: &mut Context,
        params: MaterialParams,
        shaders: RenderShaders,
        options: RenderingOptions,
        projected: bool,
    ) -> Result<Self> {
        Ok(RenderMaterial {
            base: MaterialBase::new(ctx, params, None)?,
            shaders,
            options,
            projected,
        })
    }

    pub fn shaders(&self) -> &RenderShaders {
        &self.shaders
    }

    pub fn rendering_options(&self) -> &RenderingOptions {
        &self.options
    }

    pub fn is_projected(&self) -> bool {
        self.projected
    }

    pub fn is_transparent(&self) -> bool {
        self.options.transparent
    }

    /// Changes the rendering options.
    ///
    /// A pipeline used by this material only is recompiled in place, with a
    /// warning if it was already compiled. A shared pipeline is left to its
    /// other users and a matching one is looked up on the next compilation.
    pub fn set_rendering_options(
        &mut self,
        manager: &mut PipelineManager,
        options: RenderingOptions,
    ) {
        if self.options.differences(&options).is_empty() {
            return;
        }
        self.options = options.clone();

        let Some(entry) = self.base.pipeline_entry().cloned() else {
            return;
        };

        if entry.borrow().consumers().len() > 1 {
            manager.remove_pipeline_entry(&entry, self.base.uid);
            self.base.set_pipeline_entry(None);
        } else {
            entry.borrow_mut().set_rendering_options(options);
        }
    }

    /// Creates the bind groups and compiles the pipeline. Does nothing once
    /// the material is ready.
    pub fn compile_material(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
        target: RenderMaterialTarget<'_>,
    ) -> Result<()> {
        if self.base.ready() {
            return Ok(());
        }

        let camera = target.camera.filter(|_| self.projected);
        self.base
            .create_bind_groups(ctx, camera, target.default_sampler)?;

        let entry = match self.base.pipeline_entry() {
            Some(entry) => entry.clone(),
            None => {
                let params = RenderPipelineParams {
                    label: format!("{} render pipeline", self.base.label),
                    stages: RenderStages {
                        vertex: self.shaders.vertex.clone(),
                        fragment: self.shaders.fragment.clone(),
                        varyings: self.shaders.varyings.clone(),
                        vertex_layout: target.vertex_layout.clone(),
                        options: self.options.clone(),
                        projected: self.projected,
                    },
                    use_async: self.base.use_async_pipeline(),
                };

                let entry =
                    manager.create_render_pipeline(params, self.base.bind_groups(), self.base.uid);
                self.base.set_pipeline_entry(Some(entry.clone()));
                entry
            }
        };

        self.base.reindex();
        manager.compile(ctx, &entry, self.base.bind_groups())
    }

    /// Binds the pipeline and the bind groups. Returns `false` if the
    /// material is not ready, in which case nothing must be drawn.
    pub fn render(&self, manager: &mut PipelineManager, pass: &mut RenderPassRecorder<'_>) -> bool {
        if !self.base.ready() {
            return false;
        }

        let Some(entry) = self.base.pipeline_entry() else {
            return false;
        };

        if !manager.set_current_pipeline(pass, &entry.borrow()) {
            return false;
        }
        manager.set_active_bind_groups(pass, self.base.bind_groups());
        true
    }
}

impl Material for RenderMaterial {
    fn base(&self) -> &MaterialBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MaterialBase {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CommandEncoder, EncodedCommand, HeadlessBackend, RenderCommand};
    use crate::resource::{
        BindGroup, Binding, BufferBinding, BufferBindingParams, BufferInput, BindingType, Sampler,
        Texture, TextureParams,
    };
    use glamx::Vec4;

    const SHADER: &str = "@vertex fn vs_main(attributes: Attributes) -> @builtin(position) vec4f {\n\
                          \treturn getOutputPosition(attributes.position);\n}\n\
                          @fragment fn fs_main() -> @location(0) vec4f { return params.color; }";

    fn layout() -> VertexLayout {
        VertexLayout {
            layout_cache_key: "position:vec3f,".to_string(),
            buffers: Vec::new(),
            wgsl_struct_fragment: "struct Attributes {\n\t@location(0) position: vec3f,\n};".to_string(),
        }
    }

    fn camera(ctx: &mut Context) -> BindGroupRef {
        let binding = BufferBinding::new(
            ctx,
            BufferBindingParams::uniform("camera")
                .with_input(BufferInput::new("view", "mat4x4f", glamx::Mat4::IDENTITY)),
        )
        .unwrap();
        let mut group = BindGroup::new("camera");
        group.add_binding(Binding::Buffer(binding).into_ref());
        group.into_ref()
    }

    fn params(texture: bool) -> MaterialParams {
        let mut params = MaterialParams::new("plane").with_uniform(
            BufferBindingParams::uniform("params")
                .with_input(BufferInput::new("color", "vec4f", Vec4::ONE)),
        );

        if texture {
            let texture = Texture::new(TextureParams::new("map"), (4, 4)).unwrap().into_ref();
            params = params.with_texture(texture);
        }
        params
    }

    #[test]
    fn bind_groups_are_ordered() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let camera = camera(&mut ctx);
        let sampler = Sampler::default_sampler().into_ref();
        let params = params(true);

        let mut material = RenderMaterial::new(
            &mut ctx,
            params,
            RenderShaders::new(SHADER, "vs_main", "fs_main"),
            RenderingOptions::default(),
            true,
        )
        .unwrap();

        material
            .compile_material(
                &mut ctx,
                &mut manager,
                RenderMaterialTarget {
                    vertex_layout: &layout(),
                    camera: Some(&camera),
                    default_sampler: Some(&sampler),
                },
            )
            .unwrap();

        let groups = material.bind_groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].borrow().binding_names(), "map,defaultSampler");
        assert!(std::rc::Rc::ptr_eq(&groups[1], &camera));
        assert_eq!(groups[2].borrow().binding_names(), "params");
        assert!(material.ready());

        let entry = material.base().pipeline_entry().unwrap().borrow();
        let code = &entry.patched_shaders().unwrap().main;
        assert!(code.contains("@group(1) @binding(0) var<uniform> camera: Camera;"));
        assert!(code.contains("@group(2) @binding(0) var<uniform> params: Params;"));
    }

    #[test]
    fn unprojected_materials_skip_the_camera() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let camera = camera(&mut ctx);
        let params = params(false);

        let mut material = RenderMaterial::new(
            &mut ctx,
            params,
            RenderShaders::new(SHADER, "vs_main", "fs_main"),
            RenderingOptions::default(),
            false,
        )
        .unwrap();

        material
            .compile_material(
                &mut ctx,
                &mut manager,
                RenderMaterialTarget {
                    vertex_layout: &layout(),
                    camera: Some(&camera),
                    default_sampler: None,
                },
            )
            .unwrap();

        assert_eq!(material.bind_groups().len(), 1);
        assert_eq!(material.bind_groups()[0].borrow().index(), 0);
    }

    #[test]
    fn compile_is_a_no_op_once_ready() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);
        let mut manager = PipelineManager::new();
        let params = params(false);

        let mut material = RenderMaterial::new(
            &mut ctx,
            params,
            RenderShaders::new(SHADER, "vs_main", "fs_main"),
            RenderingOptions::default(),
            false,
        )
        .unwrap();

        for _ in 0..3 {
            material
                .compile_material(
                    &mut ctx,
                    &mut manager,
                    RenderMaterialTarget {
                        vertex_layout: &layout(),
                        camera: None,
                        default_sampler: None,
                    },
                )
                .unwrap();
        }

        assert_eq!(probe.stats().render_pipelines_created, 1);
        assert_eq!(probe.stats().bind_groups_created, 1);

        let mut encoder = CommandEncoder::new("frame");
        let mut pass = encoder.begin_render_pass("main", Vec::new(), None);
        assert!(material.render(&mut manager, &mut pass));
        pass.end();

        let EncodedCommand::RenderPass(record) = &encoder.commands[0] else {
            panic!("expected a render pass");
        };
        assert!(matches!(record.commands[0], RenderCommand::SetPipeline(_)));
        assert!(matches!(record.commands[1], RenderCommand::SetBindGroup { index: 0, .. }));
    }

    #[test]
    fn texture_type_change_flushes_the_pipeline() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);
        let mut manager = PipelineManager::new();
        let sampler = Sampler::default_sampler().into_ref();
        let params = params(true);
        let texture = params.textures[0].clone();

        let mut material = RenderMaterial::new(
            &mut ctx,
            params,
            RenderShaders::new(SHADER, "vs_main", "fs_main"),
            RenderingOptions::default(),
            false,
        )
        .unwrap();
        let layout = layout();
        material
            .compile_material(
                &mut ctx,
                &mut manager,
                RenderMaterialTarget {
                    vertex_layout: &layout,
                    camera: None,
                    default_sampler: Some(&sampler),
                },
            )
            .unwrap();
        material.update_bind_groups(&mut ctx, &mut manager).unwrap();
        assert_eq!(probe.stats().render_pipelines_created, 1);

        texture.borrow_mut().set_external(true);
        assert_eq!(
            texture.borrow().binding().borrow().binding_type(),
            BindingType::ExternalTexture
        );
        material.update_bind_groups(&mut ctx, &mut manager).unwrap();

        assert!(material.ready());
        assert_eq!(probe.stats().render_pipelines_created, 2);
        let entry = material.base().pipeline_entry().unwrap().borrow();
        assert!(entry
            .patched_shaders()
            .unwrap()
            .fragment
            .is_none());
        assert!(entry
            .patched_shaders()
            .unwrap()
            .main
            .contains("var map: texture_external;"));
    }
}
