use crate::context::{CommandEncoder, Context};
use crate::error::Result;
use crate::material::{ComputeMaterial, Material, MaterialParams};
use crate::pipeline::{PipelineManager, ShaderSource};
use crate::utils::generate_uid;

/// Options of a [`ComputePass`].
pub struct ComputePassParams {
    pub label: String,
    pub material: MaterialParams,
    pub shader: ShaderSource,
    /// Workgroups dispatched along each axis.
    pub dispatch_size: [u32; 3],
    /// Passes with lower values run first.
    pub render_order: i32,
    pub active: bool,
}

impl ComputePassParams {
    pub fn new(label: impl Into<String>, shader: ShaderSource) -> Self {
        let label = label.into();
        ComputePassParams {
            material: MaterialParams::new(label.clone()),
            label,
            shader,
            dispatch_size: [1, 1, 1],
            render_order: 0,
            active: true,
        }
    }

    pub fn with_material(mut self, material: MaterialParams) -> Self {
        self.material = material;
        self
    }

    pub fn with_dispatch_size(mut self, dispatch_size: [u32; 3]) -> Self {
        self.dispatch_size = dispatch_size;
        self
    }

    pub fn with_render_order(mut self, render_order: i32) -> Self {
        self.render_order = render_order;
        self
    }
}

/// A compute material dispatched once per frame, in its own compute pass.
pub struct ComputePass {
    pub uid: u64,
    pub label: String,
    material: ComputeMaterial,
    pub render_order: i32,
    /// Inactive passes are skipped.
    pub active: bool,
}

impl ComputePass {
    pub fn new(ctx: &mut Context, params: ComputePassParams) -> Result<Self> {
        let material =
            ComputeMaterial::new(ctx, params.material, params.shader, params.dispatch_size)?;

        Ok(ComputePass {
            uid: generate_uid(),
            material,
            label: params.label,
            render_order: params.render_order,
            active: params.active,
        })
    }

    pub fn material(&self) -> &ComputeMaterial {
        &self.material
    }

    pub fn material_mut(&mut self) -> &mut ComputeMaterial {
        &mut self.material
    }

    /// Compiles the material, updates its bind groups, records the dispatch
    /// and the copies of the results. Returns `false` if nothing was
    /// dispatched.
    pub fn render(
        &mut self,
        ctx: &mut Context,
        manager: &mut PipelineManager,
        encoder: &mut CommandEncoder,
    ) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }

        self.material.compile_material(ctx, manager)?;
        self.material.update_bind_groups(ctx, manager)?;

        if !self.material.ready() {
            return Ok(false);
        }

        let mut pass = encoder.begin_compute_pass(self.label.clone());
        let dispatched = self.material.render(manager, &mut pass);
        pass.end();
        manager.reset_current_pipeline();

        if dispatched {
            self.material.copy_buffers_to_results(encoder);
        }
        Ok(dispatched)
    }

    pub fn destroy(&mut self, ctx: &mut Context, manager: &mut PipelineManager) {
        self.material.destroy(ctx, manager);
    }

    pub fn reset_gpu_handles(&mut self) {
        self.material.reset_gpu_handles();
    }
}
