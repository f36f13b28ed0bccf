mod common;

use common::*;
use curtains::prelude::*;

fn simulation(copy_result: bool) -> ComputePassParams {
    ComputePassParams::new(
        "simulation",
        ShaderSource::new(
            "@compute @workgroup_size(4) fn main(@builtin(global_invocation_id) id: vec3u) {\n\
             \tresult.values[id.x] = result.values[id.x] * 2.0;\n}",
            "main",
        ),
    )
    .with_material(
        MaterialParams::new("simulation").with_writable_storage(
            BufferBindingParams::storage("result").with_input(BufferInput::new(
                "values",
                "array<f32>",
                vec![1.0_f32, 2.0, 3.0, 4.0],
            )),
            copy_result,
        ),
    )
}

#[test]
fn removed_meshes_release_their_buffers() {
    let (mut renderer, probe) = renderer();

    let first = add_quad(&mut renderer, mesh_params("first"));
    let second = add_quad(&mut renderer, mesh_params("second"));
    renderer.render().unwrap();

    let vertices = vertex_buffer(&renderer, first);
    let kept = vertex_buffer(&renderer, second);

    assert!(renderer.remove_mesh(first));
    assert!(!renderer.remove_mesh(first));
    assert!(probe.is_buffer_destroyed(vertices));
    assert!(!probe.is_buffer_destroyed(kept));

    // The camera buffer is shared by every mesh and still alive.
    let camera_buffer = renderer.camera_buffer().unwrap();
    assert!(!probe.is_buffer_destroyed(camera_buffer));

    renderer.render().unwrap();
    let passes = render_passes(&probe);
    assert_eq!(bound_vertex_buffers(&passes[0]), vec![kept]);
    assert_eq!(renderer.camera_buffer(), Some(camera_buffer));
}

#[test]
fn frames_are_skipped_while_the_device_is_lost() {
    let (mut renderer, probe) = renderer();

    let _ = add_quad(&mut renderer, mesh_params("quad"));
    renderer.render().unwrap();
    let stats = probe.stats();
    assert_eq!(stats.submissions, 1);
    assert_eq!(stats.render_pipelines_created, 1);

    renderer.lose_device();
    assert!(renderer.context().is_lost());
    renderer.render().unwrap();
    assert_eq!(probe.stats().submissions, 1);

    renderer.restore_device(None);
    renderer.render().unwrap();

    let after = probe.stats();
    assert_eq!(after.submissions, 2);
    // Every GPU object has been recreated.
    assert_eq!(after.render_pipelines_created, 2);
    assert!(after.buffers_created > stats.buffers_created);
    assert_eq!(render_passes(&probe).len(), 1);
}

#[test]
fn restored_device_can_use_a_new_backend() {
    let (mut renderer, probe) = renderer();

    let _ = add_quad(&mut renderer, mesh_params("quad"));
    renderer.render().unwrap();

    renderer.lose_device();
    let backend = HeadlessBackend::new(400, 300);
    let new_probe = backend.probe();
    renderer.restore_device(Some(Box::new(backend)));
    renderer.render().unwrap();

    assert_eq!(probe.stats().submissions, 1);
    assert_eq!(new_probe.stats().submissions, 1);
    assert_eq!(new_probe.stats().render_pipelines_created, 1);
    assert_eq!(renderer.size(), (400, 300));
}

#[test]
fn textures_are_recreated_after_a_device_loss() {
    let (mut renderer, _probe) = renderer();

    let texture = renderer
        .create_texture(TextureParams::new("albedo").with_name("albedo"))
        .unwrap();
    let material = MaterialParams::new("textured").with_texture(texture.clone());
    let _ = add_quad(&mut renderer, mesh_params("textured").with_material(material));

    renderer.render().unwrap();
    assert!(texture.borrow().gpu_texture().is_some());

    renderer.lose_device();
    assert!(texture.borrow().gpu_texture().is_none());
    assert!(renderer.default_sampler().borrow().gpu_sampler().is_none());

    renderer.restore_device(None);
    renderer.render().unwrap();
    assert!(texture.borrow().gpu_texture().is_some());
    assert!(renderer.default_sampler().borrow().gpu_sampler().is_some());
}

#[test]
fn compute_results_are_read_back() {
    let (mut renderer, _probe) = renderer();

    let pass = renderer.create_compute_pass(simulation(true)).unwrap();
    renderer.render().unwrap();

    let bytes = pollster::block_on(renderer.get_compute_result(pass, "result")).unwrap();
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);

    let values =
        pollster::block_on(renderer.get_compute_result_element(pass, "result", "values")).unwrap();
    assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn compute_results_need_a_result_buffer() {
    let (mut renderer, _probe) = renderer();

    let pass = renderer.create_compute_pass(simulation(false)).unwrap();
    renderer.render().unwrap();

    let result = pollster::block_on(renderer.get_compute_result(pass, "result"));
    assert!(matches!(result, Err(Error::MissingBinding(_))));

    let result = pollster::block_on(renderer.get_compute_result(pass, "unknown"));
    assert!(matches!(result, Err(Error::MissingBinding(_))));
}

#[test]
fn resizing_follows_the_surface() {
    let (mut renderer, probe) = renderer();

    let texture = renderer.create_texture(TextureParams::new("screen sized")).unwrap();
    let fixed = renderer
        .create_texture(TextureParams::new("fixed").with_fixed_size(64, 64))
        .unwrap();
    let _ = add_quad(&mut renderer, mesh_params("quad"));
    renderer.render().unwrap();

    renderer.resize(1024, 512);
    assert_eq!(renderer.size(), (1024, 512));
    assert_eq!(texture.borrow().size(), (1024, 512));
    assert_eq!(fixed.borrow().size(), (64, 64));

    renderer.render().unwrap();
    // The main pass attachments have been recreated at the new size.
    assert!(probe.stats().textures_destroyed >= 2);
}
