//! Pipeline entries: assembled shader code, compile status and the compiled
//! pipeline.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::context::{
    BindGroupLayoutId, ComputePipelineDescriptor, Context, PipelineId, PipelineLayoutId,
    RenderPipelineDescriptor, ShaderModuleId, ShaderStage, VertexBufferLayout,
};
use crate::error::{Error, Result};
use crate::pipeline::shader_chunks;
use crate::resource::BindGroupRef;
use crate::utils::{generate_uid, throw_warning};

/// A pipeline entry shared between materials.
pub type PipelineEntryRef = Rc<RefCell<PipelineEntry>>;

/// WGSL source and entry point of one stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSource {
    pub code: String,
    pub entry_point: String,
}

impl ShaderSource {
    pub fn new(code: impl Into<String>, entry_point: impl Into<String>) -> Self {
        ShaderSource {
            code: code.into(),
            entry_point: entry_point.into(),
        }
    }
}

/// The vertex input description supplied by a geometry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexLayout {
    /// Key identifying the attribute layout.
    pub layout_cache_key: String,
    pub buffers: Vec<VertexBufferLayout>,
    /// The `Attributes` struct declaration.
    pub wgsl_struct_fragment: String,
}

/// Fixed-function state of a render pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderingOptions {
    pub topology: wgpu::PrimitiveTopology,
    pub front_face: wgpu::FrontFace,
    pub cull_mode: Option<wgpu::Face>,
    /// Enables blending. Transparent meshes are also drawn after opaque ones.
    pub transparent: bool,
    /// Blend state used when `transparent` is set. Defaults to alpha
    /// blending.
    pub blend: Option<wgpu::BlendState>,
    pub write_mask: wgpu::ColorWrites,
    pub target_format: wgpu::TextureFormat,
    pub depth: bool,
    pub depth_write_enabled: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub depth_format: wgpu::TextureFormat,
    pub sample_count: u32,
}

impl Default for RenderingOptions {
    fn default() -> Self {
        RenderingOptions {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            transparent: false,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
            target_format: wgpu::TextureFormat::Bgra8Unorm,
            depth: true,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            depth_format: wgpu::TextureFormat::Depth24Plus,
            sample_count: 1,
        }
    }
}

impl RenderingOptions {
    /// Names of the options differing between `self` and `other`.
    pub fn differences(&self, other: &RenderingOptions) -> Vec<&'static str> {
        let mut differences = Vec::new();

        macro_rules! compare {
            ($($field: ident),*) => {$(
                if self.$field != other.$field {
                    differences.push(stringify!($field));
                }
            )*};
        }

        compare!(
            topology,
            front_face,
            cull_mode,
            transparent,
            blend,
            write_mask,
            target_format,
            depth,
            depth_write_enabled,
            depth_compare,
            depth_format,
            sample_count
        );

        differences
    }

    fn color_target(&self) -> wgpu::ColorTargetState {
        let blend = if self.transparent {
            Some(self.blend.unwrap_or(wgpu::BlendState::ALPHA_BLENDING))
        } else {
            self.blend
        };

        wgpu::ColorTargetState {
            format: self.target_format,
            blend,
            write_mask: self.write_mask,
        }
    }

    fn depth_stencil(&self) -> Option<wgpu::DepthStencilState> {
        self.depth.then(|| wgpu::DepthStencilState {
            format: self.depth_format,
            depth_write_enabled: self.depth_write_enabled,
            depth_compare: self.depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }

    fn primitive(&self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: self.topology,
            front_face: self.front_face,
            cull_mode: self.cull_mode,
            ..Default::default()
        }
    }
}

/// Compile status of a pipeline entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Nothing requested yet, or flushed.
    CanCompile,
    Compiling,
    Compiled,
    Error(String),
}

/// Stages of a render pipeline.
#[derive(Clone, Debug)]
pub struct RenderStages {
    pub vertex: ShaderSource,
    pub fragment: Option<ShaderSource>,
    /// Declarations shared by the vertex and fragment modules.
    pub varyings: Option<String>,
    pub vertex_layout: VertexLayout,
    pub options: RenderingOptions,
    /// Use the camera based `getOutputPosition` helper.
    pub projected: bool,
}

/// What a pipeline entry compiles.
#[derive(Clone, Debug)]
pub enum PipelineStages {
    Render(RenderStages),
    Compute(ShaderSource),
}

/// Shader code after patching, with the layouts it was patched against.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatchedShaders {
    /// Vertex or compute module code.
    pub main: String,
    /// Fragment module code, `None` when the fragment stage reuses the main
    /// module.
    pub fragment: Option<String>,
    pub bind_group_layouts: Vec<BindGroupLayoutId>,
}

/// A pipeline and everything needed to (re)compile it.
#[derive(Debug)]
pub struct PipelineEntry {
    pub uid: u64,
    pub label: String,
    stages: PipelineStages,
    cache_key: String,
    status: PipelineStatus,
    use_async: bool,
    consumers: HashSet<u64>,
    patched: Option<PatchedShaders>,
    modules: Vec<ShaderModuleId>,
    pipeline_layout: Option<PipelineLayoutId>,
    pipeline: Option<PipelineId>,
}

impl PipelineEntry {
    pub fn new(label: impl Into<String>, stages: PipelineStages, use_async: bool) -> Self {
        PipelineEntry {
            uid: generate_uid(),
            label: label.into(),
            stages,
            cache_key: String::new(),
            status: PipelineStatus::CanCompile,
            use_async,
            consumers: HashSet::new(),
            patched: None,
            modules: Vec::new(),
            pipeline_layout: None,
            pipeline: None,
        }
    }

    pub fn into_ref(self) -> PipelineEntryRef {
        Rc::new(RefCell::new(self))
    }

    /// A fresh entry with the same stages and cache key.
    pub fn fork(&self) -> PipelineEntry {
        let mut entry = PipelineEntry::new(self.label.clone(), self.stages.clone(), self.use_async);
        entry.cache_key = self.cache_key.clone();
        entry
    }

    pub fn stages(&self) -> &PipelineStages {
        &self.stages
    }

    pub fn render_stages(&self) -> Option<&RenderStages> {
        match &self.stages {
            PipelineStages::Render(stages) => Some(stages),
            PipelineStages::Compute(_) => None,
        }
    }

    pub fn is_compute(&self) -> bool {
        matches!(self.stages, PipelineStages::Compute(_))
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    pub fn can_compile(&self) -> bool {
        self.status == PipelineStatus::CanCompile
    }

    /// `true` once the pipeline is compiled and can be bound.
    pub fn ready(&self) -> bool {
        self.status == PipelineStatus::Compiled
    }

    pub fn use_async(&self) -> bool {
        self.use_async
    }

    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn set_cache_key(&mut self, cache_key: String) {
        self.cache_key = cache_key;
    }

    /// Shader code produced by the last [`PipelineEntry::patch_shaders`].
    pub fn patched_shaders(&self) -> Option<&PatchedShaders> {
        self.patched.as_ref()
    }

    pub fn consumers(&self) -> &HashSet<u64> {
        &self.consumers
    }

    pub fn add_consumer(&mut self, uid: u64) {
        let _ = self.consumers.insert(uid);
    }

    /// Returns `true` if no consumer is left.
    pub fn remove_consumer(&mut self, uid: u64) -> bool {
        let _ = self.consumers.remove(&uid);
        self.consumers.is_empty()
    }

    /// Key under which pipelines are deduplicated: the vertex layout key
    /// followed by the names and cache keys of every bind group binding.
    pub fn compute_cache_key(vertex_layout_key: &str, bind_groups: &[BindGroupRef]) -> String {
        let mut key = vertex_layout_key.to_string();

        for bind_group in bind_groups {
            let bind_group = bind_group.borrow();
            key.push_str(&bind_group.binding_names());
            key.push_str(bind_group.pipeline_cache_key());
        }

        key
    }

    fn push_unique(code: &mut String, fragment: &str) {
        if !fragment.is_empty() && !code.contains(fragment) {
            code.push_str(fragment);
            code.push_str("\n\n");
        }
    }

    fn patch_stage(
        user_code: &str,
        stages: wgpu::ShaderStages,
        bind_groups: &[BindGroupRef],
        attributes: Option<&str>,
        varyings: Option<&str>,
        projected: bool,
    ) -> String {
        let mut code = String::new();

        for chunk in shader_chunks::chunks_for(user_code, projected) {
            Self::push_unique(&mut code, chunk.trim_end());
        }

        let mut groups = Vec::new();
        for bind_group in bind_groups {
            let (structs, declarations) = bind_group.borrow().wgsl_fragments(stages);
            for fragment in structs {
                Self::push_unique(&mut code, &fragment);
            }
            groups.extend(declarations);
        }
        for declaration in groups {
            Self::push_unique(&mut code, &declaration);
        }

        for declarations in [attributes, varyings].into_iter().flatten() {
            Self::push_unique(&mut code, declarations);
        }

        code.push_str(user_code);
        code
    }

    /// Assembles the final shader code: helper functions, binding
    /// declarations, the vertex attributes struct, then the user code.
    ///
    /// Every bind group must have a layout already.
    pub fn patch_shaders(&mut self, bind_groups: &[BindGroupRef]) -> Result<()> {
        let mut bind_groups = bind_groups.to_vec();
        bind_groups.sort_by_key(|bind_group| bind_group.borrow().index());

        let bind_group_layouts = bind_groups
            .iter()
            .map(|bind_group| {
                let bind_group = bind_group.borrow();
                bind_group.layout().ok_or_else(|| {
                    Error::MissingBinding(format!("layout of bind group `{}`", bind_group.label))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let patched = match &self.stages {
            PipelineStages::Render(render) => {
                let attributes = Some(render.vertex_layout.wgsl_struct_fragment.as_str());
                let varyings = render.varyings.as_deref();

                match &render.fragment {
                    Some(fragment) if fragment.code == render.vertex.code => PatchedShaders {
                        main: Self::patch_stage(
                            &render.vertex.code,
                            wgpu::ShaderStages::VERTEX_FRAGMENT,
                            &bind_groups,
                            attributes,
                            varyings,
                            render.projected,
                        ),
                        fragment: None,
                        bind_group_layouts,
                    },
                    fragment => PatchedShaders {
                        main: Self::patch_stage(
                            &render.vertex.code,
                            wgpu::ShaderStages::VERTEX,
                            &bind_groups,
                            attributes,
                            varyings,
                            render.projected,
                        ),
                        fragment: fragment.as_ref().map(|fragment| {
                            Self::patch_stage(
                                &fragment.code,
                                wgpu::ShaderStages::FRAGMENT,
                                &bind_groups,
                                None,
                                varyings,
                                render.projected,
                            )
                        }),
                        bind_group_layouts,
                    },
                }
            }
            PipelineStages::Compute(compute) => PatchedShaders {
                main: Self::patch_stage(
                    &compute.code,
                    wgpu::ShaderStages::COMPUTE,
                    &bind_groups,
                    None,
                    None,
                    false,
                ),
                fragment: None,
                bind_group_layouts,
            },
        };

        self.patched = Some(patched);
        Ok(())
    }

    /// Patches the shaders and marks the entry as compiling. The pipeline
    /// itself is created by [`PipelineEntry::finish`].
    pub fn prepare(&mut self, bind_groups: &[BindGroupRef]) -> Result<()> {
        if let Err(err) = self.patch_shaders(bind_groups) {
            self.status = PipelineStatus::Error(err.to_string());
            return Err(err);
        }

        self.status = PipelineStatus::Compiling;
        Ok(())
    }

    /// Creates the shader modules, the pipeline layout and the pipeline from
    /// the patched shaders.
    pub fn finish(&mut self, ctx: &mut Context) -> Result<()> {
        if self.status != PipelineStatus::Compiling {
            return Ok(());
        }

        match self.create_pipeline(ctx) {
            Ok(pipeline) => {
                log::debug!("curtains: pipeline `{}` compiled", self.label);
                self.pipeline = Some(pipeline);
                self.status = PipelineStatus::Compiled;
                Ok(())
            }
            Err(err) => {
                self.status = PipelineStatus::Error(err.to_string());
                Err(err)
            }
        }
    }

    fn create_pipeline(&mut self, ctx: &mut Context) -> Result<PipelineId> {
        let patched = self.patched.clone().ok_or_else(|| Error::PipelineCompilation {
            label: self.label.clone(),
            message: "shaders were not patched".to_string(),
        })?;

        let backend = ctx.backend_mut();
        let main = backend.create_shader_module(&format!("{} shader", self.label), &patched.main)?;
        self.modules = vec![main];

        let layout = backend.create_pipeline_layout(
            &format!("{} layout", self.label),
            &patched.bind_group_layouts,
        );
        self.pipeline_layout = Some(layout);

        match &self.stages {
            PipelineStages::Render(render) => {
                let fragment_module = match &patched.fragment {
                    Some(code) => {
                        let module = backend
                            .create_shader_module(&format!("{} fragment shader", self.label), code)?;
                        self.modules.push(module);
                        module
                    }
                    None => main,
                };

                backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: self.label.clone(),
                    layout,
                    vertex: ShaderStage {
                        module: main,
                        entry_point: render.vertex.entry_point.clone(),
                    },
                    vertex_buffers: render.vertex_layout.buffers.clone(),
                    fragment: render.fragment.as_ref().map(|fragment| ShaderStage {
                        module: fragment_module,
                        entry_point: fragment.entry_point.clone(),
                    }),
                    targets: vec![render.options.color_target()],
                    primitive: render.options.primitive(),
                    depth_stencil: render.options.depth_stencil(),
                    multisample: wgpu::MultisampleState {
                        count: render.options.sample_count.max(1),
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                })
            }
            PipelineStages::Compute(compute) => {
                backend.create_compute_pipeline(&ComputePipelineDescriptor {
                    label: self.label.clone(),
                    layout,
                    compute: ShaderStage {
                        module: main,
                        entry_point: compute.entry_point.clone(),
                    },
                })
            }
        }
    }

    /// Replaces the rendering options. A compiled pipeline has to be
    /// recompiled, which is warned about.
    pub fn set_rendering_options(&mut self, options: RenderingOptions) {
        let PipelineStages::Render(render) = &mut self.stages else {
            return;
        };

        let differences = render.options.differences(&options);
        if differences.is_empty() {
            return;
        }

        if self.status == PipelineStatus::Compiled {
            let _ = throw_warning(format!(
                "curtains: pipeline `{}` recompiles because {:?} changed",
                self.label, differences
            ));
        }

        render.options = options;
        self.flush();
    }

    /// Resets the entry so that it compiles again.
    pub fn flush(&mut self) {
        self.status = PipelineStatus::CanCompile;
        self.pipeline = None;
        self.pipeline_layout = None;
        self.modules.clear();
        self.patched = None;
    }

    /// Forgets every GPU handle after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;
    use crate::resource::{BindGroup, Binding, BufferBinding, BufferBindingParams, BufferInput};

    const SHADER: &str = "@vertex fn vs_main() -> @builtin(position) vec4f { return getOutputPosition(vec3f(0.0)); }\n\
                          @fragment fn fs_main() -> @location(0) vec4f { return params.color; }";

    fn bind_group(ctx: &mut Context) -> BindGroupRef {
        let binding = BufferBinding::new(
            ctx,
            BufferBindingParams::uniform("params")
                .with_input(BufferInput::new("color", "vec4f", glamx::Vec4::ONE)),
        )
        .unwrap();

        let mut group = BindGroup::new("inputs");
        group.add_binding(Binding::Buffer(binding).into_ref());
        group.create_bind_group(ctx).unwrap();
        group.into_ref()
    }

    fn render_entry() -> PipelineEntry {
        PipelineEntry::new(
            "mesh",
            PipelineStages::Render(RenderStages {
                vertex: ShaderSource::new(SHADER, "vs_main"),
                fragment: Some(ShaderSource::new(SHADER, "fs_main")),
                varyings: None,
                vertex_layout: VertexLayout {
                    layout_cache_key: "position:vec3f,".to_string(),
                    buffers: Vec::new(),
                    wgsl_struct_fragment: "struct Attributes {\n\t@builtin(vertex_index) vertexIndex: u32,\n};"
                        .to_string(),
                },
                options: RenderingOptions::default(),
                projected: false,
            }),
            false,
        )
    }

    #[test]
    fn patched_code_is_ordered() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let groups = vec![bind_group(&mut ctx)];
        let mut entry = render_entry();
        entry.patch_shaders(&groups).unwrap();

        let patched = entry.patched_shaders().unwrap();
        assert!(patched.fragment.is_none());

        let code = &patched.main;
        let chunk = code.find("fn getOutputPosition(").unwrap();
        let structs = code.find("struct Params").unwrap();
        let declaration = code.find("@group(0) @binding(0) var<uniform> params: Params;").unwrap();
        let attributes = code.find("struct Attributes").unwrap();
        let user = code.find("@vertex fn vs_main").unwrap();
        assert!(chunk < structs && structs < declaration);
        assert!(declaration < attributes && attributes < user);
    }

    #[test]
    fn varyings_are_declared_in_both_modules() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let groups = vec![bind_group(&mut ctx)];
        let varyings = "struct Varyings {\n\t@builtin(position) position: vec4f,\n};";

        let mut entry = PipelineEntry::new(
            "pass",
            PipelineStages::Render(RenderStages {
                vertex: ShaderSource::new("@vertex fn main() -> Varyings { return Varyings(); }", "main"),
                fragment: Some(ShaderSource::new(
                    "@fragment fn main(input: Varyings) -> @location(0) vec4f { return params.color; }",
                    "main",
                )),
                varyings: Some(varyings.to_string()),
                vertex_layout: VertexLayout::default(),
                options: RenderingOptions::default(),
                projected: false,
            }),
            false,
        );
        entry.patch_shaders(&groups).unwrap();

        let patched = entry.patched_shaders().unwrap();
        let fragment = patched.fragment.as_ref().unwrap();
        assert_eq!(patched.main.matches(varyings).count(), 1);
        assert_eq!(fragment.matches(varyings).count(), 1);
        assert!(fragment.find(varyings).unwrap() < fragment.find("@fragment fn main").unwrap());
    }

    #[test]
    fn shared_module_is_compiled_once() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);
        let groups = vec![bind_group(&mut ctx)];

        let mut entry = render_entry();
        entry.prepare(&groups).unwrap();
        assert_eq!(entry.status(), &PipelineStatus::Compiling);
        entry.finish(&mut ctx).unwrap();

        assert!(entry.ready());
        assert_eq!(probe.stats().shader_modules_created, 1);
        assert_eq!(probe.stats().render_pipelines_created, 1);
    }

    #[test]
    fn failures_are_reported_and_recorded() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);
        let groups = vec![bind_group(&mut ctx)];
        probe.set_pipeline_failure(Some("invalid shader"));

        let mut entry = render_entry();
        entry.prepare(&groups).unwrap();
        assert!(entry.finish(&mut ctx).is_err());
        assert!(matches!(entry.status(), PipelineStatus::Error(_)));
    }

    #[test]
    fn option_changes_flush_the_entry() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let groups = vec![bind_group(&mut ctx)];
        let mut entry = render_entry();
        entry.prepare(&groups).unwrap();
        entry.finish(&mut ctx).unwrap();

        entry.set_rendering_options(RenderingOptions {
            cull_mode: None,
            ..RenderingOptions::default()
        });
        assert!(entry.can_compile());
        assert!(entry.pipeline().is_none());
    }

    #[test]
    fn differences_name_the_changed_options() {
        let a = RenderingOptions::default();
        let b = RenderingOptions {
            transparent: true,
            sample_count: 4,
            ..RenderingOptions::default()
        };

        assert_eq!(a.differences(&b), vec!["transparent", "sample_count"]);
    }
}
