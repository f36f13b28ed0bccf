//! Materials dispatching compute shaders.

use crate::context::{CommandEncoder, ComputePassRecorder, Context, PipelineId};
use crate::error::Result;
use crate::material::{Material, MaterialBase, MaterialParams};
use crate::pipeline::{ComputePipelineParams, PipelineManager, ShaderSource};
use crate::resource::{BindGroupRef, Binding, SharedBuffer};

/// Replaces the automatic binding and dispatch of a compute material. It
/// receives the compiled pipeline and the bind groups in `@group` order.
pub type CustomComputeRender =
    Box<dyn FnMut(&mut ComputePassRecorder<'_>, PipelineId, &[BindGroupRef])>;

/// A material dispatching a compute pipeline.
pub struct ComputeMaterial {
    base: MaterialBase,
    shader: ShaderSource,
    /// Number of workgroups dispatched along each axis.
    pub dispatch_size: [u32; 3],
    custom_render: Option<CustomComputeRender>,
}

impl ComputeMaterial {
    /// Creates the material. Every buffer binding is made visible to the
    /// compute stage only.
    pub fn new(
        ctx: &mut Context,
        params: MaterialParams,
        shader: ShaderSource,
        dispatch_size: [u32; 3],
    ) -> Result<Self> {
        Ok(ComputeMaterial {
            base: MaterialBase::new(ctx, params, Some(wgpu::ShaderStages::COMPUTE))?,
            shader,
            dispatch_size,
            custom_render: None,
        })
    }

    pub fn shader(&self) -> &ShaderSource {
        &self.shader
    }

    /// Takes over binding and dispatching.
    pub fn use_custom_render(
        &mut self,
        render: impl FnMut(&mut ComputePassRecorder<'_>, PipelineId, &[BindGroupRef]) + 'static,
    ) {
        self.custom_render = Some(Box::new(render));
    }

    pub fn has_custom_render(&self) -> bool {
        self.custom_render.is_some()
    }

    /// Creates the bind groups and compiles the pipeline. Does nothing once
    /// the material is ready.
    pub fn compile_material(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
    ) -> Result<()> {
        if self.base.ready() {
            return Ok(());
        }

        self.base.create_bind_groups(ctx, None, None)?;

        let entry = match self.base.pipeline_entry() {
            Some(entry) => entry.clone(),
            None => {
                let params = ComputePipelineParams {
                    label: format!("{} compute pipeline", self.base.label),
                    shader: self.shader.clone(),
                    use_async: self.base.use_async_pipeline(),
                };

                let entry =
                    manager.create_compute_pipeline(params, self.base.bind_groups(), self.base.uid);
                self.base.set_pipeline_entry(Some(entry.clone()));
                entry
            }
        };

        self.base.reindex();
        manager.compile(ctx, &entry, self.base.bind_groups())
    }

    /// Records the dispatch, or hands the pass to the custom render
    /// callback. Returns `false` if the material is not ready.
    pub fn render(
        &mut self,
        manager: &mut PipelineManager,
        pass: &mut ComputePassRecorder<'_>,
    ) -> bool {
        if !self.base.ready() {
            return false;
        }

        let Some(entry) = self.base.pipeline_entry() else {
            return false;
        };
        let Some(pipeline) = entry.borrow().pipeline() else {
            return false;
        };

        if let Some(render) = &mut self.custom_render {
            render(pass, pipeline, self.base.bind_groups());
            manager.reset_current_pipeline();
            return true;
        }

        let _ = manager.set_current_pipeline(pass, &entry.borrow());
        manager.set_active_bind_groups(pass, self.base.bind_groups());

        let [x, y, z] = self.dispatch_size;
        pass.dispatch_workgroups(x.max(1), y.max(1), z.max(1));
        true
    }

    /// Copies every writable storage flagged for readback into its result
    /// buffer.
    pub fn copy_buffers_to_results(&self, encoder: &mut CommandEncoder) {
        for bind_group in self.base.bind_groups() {
            for binding in bind_group.borrow().bindings() {
                let binding = binding.borrow();
                let Binding::WritableBuffer(writable) = &*binding else {
                    continue;
                };
                if !writable.should_copy_result {
                    continue;
                }

                let source = writable.inner.buffer().borrow().gpu_buffer();
                let destination = writable
                    .result_buffer()
                    .and_then(|result| result.borrow().gpu_buffer());

                if let (Some(source), Some(destination)) = (source, destination) {
                    encoder.copy_buffer_to_buffer(
                        source,
                        destination,
                        writable.inner.array_buffer_size() as u64,
                    );
                }
            }
        }
    }

    /// The result buffer of the writable storage named `binding`.
    pub fn result_buffer(&self, binding: &str) -> Option<SharedBuffer> {
        let binding = self.base.binding(binding)?;
        let binding = binding.borrow();
        binding.as_writable()?.result_buffer().cloned()
    }
}

impl Material for ComputeMaterial {
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
    use crate::context::{ComputeCommand, EncodedCommand, HeadlessBackend, PassRecorder};
    use crate::resource::{BufferBindingParams, BufferInput};
    use std::cell::Cell;
    use std::rc::Rc;

    const SHADER: &str = "@compute @workgroup_size(64) fn main(@builtin(global_invocation_id) id: vec3u) {\n\
                          \tresult[id.x] = params.scale * f32(id.x);\n}";

    fn material(ctx: &mut Context) -> ComputeMaterial {
        let params = MaterialParams::new("simulation")
            .with_uniform(
                BufferBindingParams::uniform("params")
                    .with_input(BufferInput::new("scale", "f32", 2.0_f32)),
            )
            .with_writable_storage(
                BufferBindingParams::storage("result")
                    .without_struct()
                    .with_input(BufferInput::new("values", "array<f32>", vec![0.0_f32; 64])),
                true,
            );

        ComputeMaterial::new(ctx, params, ShaderSource::new(SHADER, "main"), [1, 1, 1]).unwrap()
    }

    #[test]
    fn dispatch_and_copy_are_recorded() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let mut material = material(&mut ctx);
        material.compile_material(&mut ctx, &mut manager).unwrap();
        assert!(material.ready());

        let mut encoder = CommandEncoder::new("frame");
        let mut pass = encoder.begin_compute_pass("simulation");
        assert!(material.render(&mut manager, &mut pass));
        pass.end();
        material.copy_buffers_to_results(&mut encoder);

        let EncodedCommand::ComputePass(record) = &encoder.commands[0] else {
            panic!("expected a compute pass");
        };
        assert!(matches!(record.commands[0], ComputeCommand::SetPipeline(_)));
        assert!(matches!(
            record.commands.last(),
            Some(ComputeCommand::Dispatch { x: 1, y: 1, z: 1 })
        ));
        assert!(matches!(
            encoder.commands[1],
            EncodedCommand::CopyBufferToBuffer { size: 256, .. }
        ));

        let code = {
            let entry = material.base().pipeline_entry().unwrap().borrow();
            entry.patched_shaders().unwrap().main.clone()
        };
        assert!(code.contains("var<storage, read_write> result: array<f32>;"));
        assert!(material.result_buffer("result").is_some());
    }

    #[test]
    fn repeated_dispatches_bind_the_pipeline_once() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let mut material = material(&mut ctx);
        material.compile_material(&mut ctx, &mut manager).unwrap();

        let mut encoder = CommandEncoder::new("frame");
        let mut pass = encoder.begin_compute_pass("simulation");
        assert!(material.render(&mut manager, &mut pass));
        assert!(material.render(&mut manager, &mut pass));
        pass.end();

        let EncodedCommand::ComputePass(record) = &encoder.commands[0] else {
            panic!("expected a compute pass");
        };
        let count =
            |f: fn(&ComputeCommand) -> bool| record.commands.iter().filter(|c| f(c)).count();
        assert_eq!(count(|c| matches!(c, ComputeCommand::SetPipeline(_))), 1);
        assert_eq!(count(|c| matches!(c, ComputeCommand::Dispatch { .. })), 2);
    }

    #[test]
    fn custom_render_replaces_the_dispatch() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut manager = PipelineManager::new();
        let mut material = material(&mut ctx);
        material.compile_material(&mut ctx, &mut manager).unwrap();

        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        material.use_custom_render(move |pass, pipeline, bind_groups| {
            counter.set(counter.get() + 1);
            pass.set_pipeline(pipeline);
            for (i, bind_group) in bind_groups.iter().enumerate() {
                if let Some(id) = bind_group.borrow().bind_group() {
                    pass.set_bind_group(i as u32, id);
                }
            }
            pass.dispatch_workgroups(4, 1, 1);
            pass.dispatch_workgroups(2, 1, 1);
        });

        let mut encoder = CommandEncoder::new("frame");
        let mut pass = encoder.begin_compute_pass("simulation");
        assert!(material.render(&mut manager, &mut pass));
        pass.end();

        assert_eq!(calls.get(), 1);
        let EncodedCommand::ComputePass(record) = &encoder.commands[0] else {
            panic!("expected a compute pass");
        };
        let dispatches = record
            .commands
            .iter()
            .filter(|c| matches!(c, ComputeCommand::Dispatch { .. }))
            .count();
        assert_eq!(dispatches, 2);
    }
}
