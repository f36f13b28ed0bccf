#![allow(dead_code)]

use curtains::context::{
    BufferId, EncodedCommand, HeadlessBackend, HeadlessProbe, RenderCommand, RenderPassRecord,
};
use curtains::prelude::*;

pub const SHADER: &str = "@vertex fn vs_main(attributes: Attributes) -> @builtin(position) vec4f {\n\
                          \treturn getOutputPosition(attributes.position);\n}\n\
                          @fragment fn fs_main() -> @location(0) vec4f { return vec4f(1.0); }";

pub fn renderer() -> (Renderer, HeadlessProbe) {
    let _ = env_logger::builder().is_test(true).try_init();

    let backend = HeadlessBackend::default();
    let probe = backend.probe();
    let renderer = Renderer::new(backend, RendererOptions::default()).unwrap();
    (renderer, probe)
}

pub fn mesh_params(label: &str) -> MeshParams {
    MeshParams::new(label, RenderShaders::new(SHADER, "vs_main", "fs_main"))
}

pub fn add_quad(renderer: &mut Renderer, params: MeshParams) -> u64 {
    renderer
        .create_mesh(Geometry::plane(1, 1).unwrap(), params)
        .unwrap()
}

pub fn vertex_buffer(renderer: &Renderer, mesh: u64) -> BufferId {
    renderer
        .mesh(mesh)
        .unwrap()
        .geometry()
        .vertex_buffer()
        .borrow()
        .gpu_buffer()
        .unwrap()
}

pub fn render_passes(probe: &HeadlessProbe) -> Vec<RenderPassRecord> {
    probe
        .last_frame()
        .unwrap()
        .commands
        .into_iter()
        .filter_map(|command| match command {
            EncodedCommand::RenderPass(record) => Some(record),
            _ => None,
        })
        .collect()
}

/// Vertex buffers bound by a render pass, in draw order.
pub fn bound_vertex_buffers(record: &RenderPassRecord) -> Vec<BufferId> {
    record
        .commands
        .iter()
        .filter_map(|command| match command {
            RenderCommand::SetVertexBuffer { slot: 0, buffer } => Some(*buffer),
            _ => None,
        })
        .collect()
}
