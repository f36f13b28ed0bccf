//! Pipeline cache and bound-state tracking.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::context::{BindGroupId, Context, PassRecorder, PipelineId};
use crate::error::{Error, Result};
use crate::pipeline::{
    PipelineEntry, PipelineEntryRef, PipelineStages, PipelineStatus, RenderStages, ShaderSource,
};
use crate::resource::BindGroupRef;

/// Parameters of a render pipeline request.
#[derive(Clone, Debug)]
pub struct RenderPipelineParams {
    pub label: String,
    pub stages: RenderStages,
    pub use_async: bool,
}

/// Parameters of a compute pipeline request.
#[derive(Clone, Debug)]
pub struct ComputePipelineParams {
    pub label: String,
    pub shader: ShaderSource,
    pub use_async: bool,
}

/// Keeps every pipeline entry of a renderer, deduplicates render pipelines
/// and elides redundant pipeline and bind group binding calls.
#[derive(Default)]
pub struct PipelineManager {
    entries: Vec<PipelineEntryRef>,
    pending: Vec<Weak<RefCell<PipelineEntry>>>,
    current_pipeline: Option<PipelineId>,
    active_bind_groups: Vec<Option<BindGroupId>>,
}

impl PipelineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[PipelineEntryRef] {
        &self.entries
    }

    /// Number of asynchronous compilations waiting for
    /// [`PipelineManager::poll_pending`].
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns a render pipeline entry for `params`.
    ///
    /// An existing entry is reused when its cache key, shader code, entry
    /// points and rendering options are identical. Otherwise a new entry is
    /// created. The entry is not compiled yet.
    pub fn create_render_pipeline(
        &mut self,
        params: RenderPipelineParams,
        bind_groups: &[BindGroupRef],
        owner: u64,
    ) -> PipelineEntryRef {
        let cache_key = PipelineEntry::compute_cache_key(
            &params.stages.vertex_layout.layout_cache_key,
            bind_groups,
        );

        let existing = self.entries.iter().find(|entry| {
            let entry = entry.borrow();
            let Some(stages) = entry.render_stages() else {
                return false;
            };

            entry.cache_key() == cache_key
                && !matches!(entry.status(), PipelineStatus::Error(_))
                && stages.vertex == params.stages.vertex
                && stages.fragment == params.stages.fragment
                && stages.varyings == params.stages.varyings
                && stages.projected == params.stages.projected
                && stages.options.differences(&params.stages.options).is_empty()
        });

        if let Some(entry) = existing {
            log::debug!("curtains: pipeline cache hit for `{}`", params.label);
            entry.borrow_mut().add_consumer(owner);
            return entry.clone();
        }

        log::debug!("curtains: pipeline cache miss for `{}`", params.label);
        let mut entry = PipelineEntry::new(
            params.label,
            PipelineStages::Render(params.stages),
            params.use_async,
        );
        entry.set_cache_key(cache_key);
        entry.add_consumer(owner);

        let entry = entry.into_ref();
        self.entries.push(entry.clone());
        entry
    }

    /// Returns a new compute pipeline entry. Compute pipelines are never
    /// shared.
    pub fn create_compute_pipeline(
        &mut self,
        params: ComputePipelineParams,
        bind_groups: &[BindGroupRef],
        owner: u64,
    ) -> PipelineEntryRef {
        let mut entry = PipelineEntry::new(
            params.label,
            PipelineStages::Compute(params.shader),
            params.use_async,
        );
        entry.set_cache_key(PipelineEntry::compute_cache_key("", bind_groups));
        entry.add_consumer(owner);

        let entry = entry.into_ref();
        self.entries.push(entry.clone());
        entry
    }

    /// Compiles an entry that can compile. Asynchronous entries are only
    /// prepared here and finish in [`PipelineManager::poll_pending`].
    pub fn compile(
        &mut self,
        ctx: &mut Context,
        entry: &PipelineEntryRef,
        bind_groups: &[BindGroupRef],
    ) -> Result<()> {
        let mut pipeline = entry.borrow_mut();
        if !pipeline.can_compile() {
            return Ok(());
        }

        pipeline.prepare(bind_groups)?;

        if pipeline.use_async() {
            self.pending.push(Rc::downgrade(entry));
            Ok(())
        } else {
            pipeline.finish(ctx)
        }
    }

    /// Finishes the pending asynchronous compilations. Entries whose owners
    /// have all been removed are skipped.
    ///
    /// Every failure is logged; the first one is returned.
    pub fn poll_pending(&mut self, ctx: &mut Context) -> Result<()> {
        let mut first_error: Option<Error> = None;

        for entry in std::mem::take(&mut self.pending) {
            let Some(entry) = entry.upgrade() else {
                continue;
            };
            let mut entry = entry.borrow_mut();

            if entry.consumers().is_empty() {
                continue;
            }

            if let Err(err) = entry.finish(ctx) {
                log::error!("curtains: async pipeline `{}` failed: {}", entry.label, err);
                let _ = first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Recompiles `entry` against new bind group layouts.
    ///
    /// An entry used by other owners keeps its pipeline for them: `owner`
    /// gets a fresh fork instead. Returns the entry `owner` must use.
    pub fn flush_pipeline_entry(
        &mut self,
        ctx: &mut Context,
        entry: &PipelineEntryRef,
        bind_groups: &[BindGroupRef],
        owner: u64,
    ) -> Result<PipelineEntryRef> {
        let shared = entry.borrow().consumers().len() > 1;
        let previous = entry.borrow().pipeline();

        let target = if shared {
            let fork = entry.borrow().fork();
            let _ = entry.borrow_mut().remove_consumer(owner);

            let fork = fork.into_ref();
            fork.borrow_mut().add_consumer(owner);
            self.entries.push(fork.clone());
            fork
        } else {
            entry.borrow_mut().flush();
            entry.clone()
        };

        {
            let mut pipeline = target.borrow_mut();
            let layout_key = pipeline
                .render_stages()
                .map(|stages| stages.vertex_layout.layout_cache_key.clone())
                .unwrap_or_default();
            pipeline.set_cache_key(PipelineEntry::compute_cache_key(&layout_key, bind_groups));
        }

        if previous.is_some() && self.current_pipeline == previous {
            self.current_pipeline = None;
        }

        self.compile(ctx, &target, bind_groups)?;
        Ok(target)
    }

    /// Unregisters `owner` from `entry` and drops the entry once unused.
    pub fn remove_pipeline_entry(&mut self, entry: &PipelineEntryRef, owner: u64) {
        if entry.borrow_mut().remove_consumer(owner) {
            self.entries.retain(|e| !Rc::ptr_eq(e, entry));
        }
    }

    /// Binds the entry's pipeline unless it is already bound. Returns
    /// `false` if the pipeline is not compiled.
    pub fn set_current_pipeline(
        &mut self,
        pass: &mut impl PassRecorder,
        entry: &PipelineEntry,
    ) -> bool {
        let Some(pipeline) = entry.pipeline().filter(|_| entry.ready()) else {
            return false;
        };

        if self.current_pipeline != Some(pipeline) {
            pass.set_pipeline(pipeline);
            self.current_pipeline = Some(pipeline);
        }
        true
    }

    /// Binds every bind group whose slot holds something else. The slot of
    /// a bind group is its position in `bind_groups`.
    pub fn set_active_bind_groups(
        &mut self,
        pass: &mut impl PassRecorder,
        bind_groups: &[BindGroupRef],
    ) {
        for (index, bind_group) in bind_groups.iter().enumerate() {
            let Some(id) = bind_group.borrow().bind_group() else {
                continue;
            };

            if self.active_bind_groups.len() <= index {
                self.active_bind_groups.resize(index + 1, None);
            }

            if self.active_bind_groups[index] != Some(id) {
                pass.set_bind_group(index as u32, id);
                self.active_bind_groups[index] = Some(id);
            }
        }
    }

    /// Forgets the bound pipeline and bind groups. Called at every pass
    /// boundary.
    pub fn reset_current_pipeline(&mut self) {
        self.current_pipeline = None;
        self.active_bind_groups.clear();
    }

    /// Forgets every GPU handle after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        for entry in &self.entries {
            entry.borrow_mut().reset_gpu_handles();
        }

        self.pending.clear();
        self.reset_current_pipeline();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CommandEncoder, EncodedCommand, HeadlessBackend, RenderCommand};
    use crate::pipeline::{RenderingOptions, VertexLayout};
    use crate::resource::{BindGroup, Binding, BufferBinding, BufferBindingParams, BufferInput};

    const SHADER: &str = "@vertex fn vs_main() -> @builtin(position) vec4f { return vec4f(0.0); }\n\
                          @fragment fn fs_main() -> @location(0) vec4f { return vec4f(1.0); }\n\
                          @compute @workgroup_size(64) fn main() {}";

    fn bind_group(ctx: &mut Context, ty: &str) -> BindGroupRef {
        let binding = BufferBinding::new(
            ctx,
            BufferBindingParams::uniform("params").with_input(BufferInput::new("value", ty, 1.0_f32)),
        )
        .unwrap();

        let mut group = BindGroup::new("inputs");
        group.add_binding(Binding::Buffer(binding).into_ref());
        group.create_bind_group(ctx).unwrap();
        group.into_ref()
    }

    fn params(layout: &str) -> RenderPipelineParams {
        RenderPipelineParams {
            label: "mesh".to_string(),
            stages: RenderStages {
                vertex: ShaderSource::new(SHADER, "vs_main"),
                fragment: Some(ShaderSource::new(SHADER, "fs_main")),
                varyings: None,
                vertex_layout: VertexLayout {
                    layout_cache_key: layout.to_string(),
                    ..Default::default()
                },
                options: RenderingOptions::default(),
                projected: false,
            },
            use_async: false,
        }
    }

    #[test]
    fn identical_requests_share_an_entry() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let groups = vec![bind_group(&mut ctx, "f32")];

        let a = manager.create_render_pipeline(params("position:vec3f,"), &groups, 1);
        let b = manager.create_render_pipeline(params("position:vec3f,"), &groups, 2);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.borrow().consumers().len(), 2);

        let other_layout = manager.create_render_pipeline(params("position:vec2f,"), &groups, 3);
        assert!(!Rc::ptr_eq(&a, &other_layout));

        let other_groups = vec![bind_group(&mut ctx, "u32")];
        let other_bindings = manager.create_render_pipeline(params("position:vec3f,"), &other_groups, 4);
        assert!(!Rc::ptr_eq(&a, &other_bindings));

        let mut shader = params("position:vec3f,");
        shader.stages.fragment = Some(ShaderSource::new(format!("{}\n// variant", SHADER), "fs_main"));
        let other_shader = manager.create_render_pipeline(shader, &groups, 5);
        assert!(!Rc::ptr_eq(&a, &other_shader));
    }

    #[test]
    fn compute_pipelines_are_never_shared() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let groups = vec![bind_group(&mut ctx, "f32")];
        let params = ComputePipelineParams {
            label: "compute".to_string(),
            shader: ShaderSource::new(SHADER, "main"),
            use_async: false,
        };

        let a = manager.create_compute_pipeline(params.clone(), &groups, 1);
        let b = manager.create_compute_pipeline(params, &groups, 1);
        assert!(!Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn async_compilation_finishes_on_poll() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let groups = vec![bind_group(&mut ctx, "f32")];
        let mut params = params("position:vec3f,");
        params.use_async = true;

        let entry = manager.create_render_pipeline(params, &groups, 1);
        manager.compile(&mut ctx, &entry, &groups).unwrap();
        assert_eq!(entry.borrow().status(), &PipelineStatus::Compiling);
        assert_eq!(manager.pending(), 1);

        manager.poll_pending(&mut ctx).unwrap();
        assert!(entry.borrow().ready());
    }

    #[test]
    fn async_completion_after_removal_is_a_no_op() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);
        let mut manager = PipelineManager::new();
        let groups = vec![bind_group(&mut ctx, "f32")];
        let mut params = params("position:vec3f,");
        params.use_async = true;

        let entry = manager.create_render_pipeline(params, &groups, 1);
        manager.compile(&mut ctx, &entry, &groups).unwrap();
        manager.remove_pipeline_entry(&entry, 1);
        drop(entry);

        manager.poll_pending(&mut ctx).unwrap();
        assert_eq!(probe.stats().render_pipelines_created, 0);
    }

    #[test]
    fn flushing_a_shared_entry_forks_it() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let groups = vec![bind_group(&mut ctx, "f32")];

        let entry = manager.create_render_pipeline(params("position:vec3f,"), &groups, 1);
        let _ = manager.create_render_pipeline(params("position:vec3f,"), &groups, 2);
        manager.compile(&mut ctx, &entry, &groups).unwrap();

        let forked = manager.flush_pipeline_entry(&mut ctx, &entry, &groups, 2).unwrap();
        assert!(!Rc::ptr_eq(&entry, &forked));
        assert!(entry.borrow().ready());
        assert!(forked.borrow().ready());
        assert_eq!(entry.borrow().consumers().len(), 1);

        let same = manager.flush_pipeline_entry(&mut ctx, &entry, &groups, 1).unwrap();
        assert!(Rc::ptr_eq(&entry, &same));
    }

    #[test]
    fn redundant_binds_are_elided() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let groups = vec![bind_group(&mut ctx, "f32")];
        let entry = manager.create_render_pipeline(params("position:vec3f,"), &groups, 1);
        manager.compile(&mut ctx, &entry, &groups).unwrap();

        let mut encoder = CommandEncoder::new("frame");
        let mut pass = encoder.begin_render_pass("main", Vec::new(), None);
        for _ in 0..2 {
            assert!(manager.set_current_pipeline(&mut pass, &entry.borrow()));
            manager.set_active_bind_groups(&mut pass, &groups);
            pass.draw(3, 1);
        }
        manager.reset_current_pipeline();
        assert!(manager.set_current_pipeline(&mut pass, &entry.borrow()));
        pass.end();

        let EncodedCommand::RenderPass(record) = &encoder.commands[0] else {
            panic!("expected a render pass");
        };
        let pipelines = record
            .commands
            .iter()
            .filter(|c| matches!(c, RenderCommand::SetPipeline(_)))
            .count();
        let bind_groups = record
            .commands
            .iter()
            .filter(|c| matches!(c, RenderCommand::SetBindGroup { .. }))
            .count();
        assert_eq!(pipelines, 2);
        assert_eq!(bind_groups, 1);
    }
}
