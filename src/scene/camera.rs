//! The camera shared by every projected mesh.

use glamx::{Mat4, Vec3};

use crate::context::Context;
use crate::error::Result;
use crate::resource::{
    BindGroup, BindGroupRef, Binding, BufferBinding, BufferBindingParams, BufferInput,
};

/// A perspective camera.
///
/// The view and projection matrices are recomputed whenever one of their
/// parameters changes, and uploaded to the camera bind group on the next
/// frame.
#[derive(Clone, Debug)]
pub struct Camera {
    fov: f32,
    aspect: f32,
    near: f32,
    far: f32,
    position: Vec3,
    target: Vec3,
    up: Vec3,
    view_matrix: Mat4,
    projection_matrix: Mat4,
    dirty: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Camera::new(50.0_f32.to_radians(), 1.0, 0.1, 150.0)
    }
}

impl Camera {
    /// Creates a camera at `(0, 0, 10)` looking at the origin.
    ///
    /// # Arguments
    /// * `fov` - Vertical field of view, in radians
    /// * `aspect` - Width over height of the render surface
    /// * `near` - Near clipping plane distance
    /// * `far` - Far clipping plane distance
    pub fn new(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Camera {
            fov,
            aspect,
            near,
            far,
            position: Vec3::new(0.0, 0.0, 10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            dirty: true,
        };
        camera.update_view();
        camera.update_projection();
        camera
    }

    fn update_view(&mut self) {
        self.view_matrix = Mat4::look_at_rh(self.position, self.target, self.up);
        self.dirty = true;
    }

    fn update_projection(&mut self) {
        // WebGPU clip space depth goes from 0 to 1.
        self.projection_matrix = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        self.dirty = true;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.update_view();
    }

    /// Points the camera at `target`.
    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
        self.update_view();
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov;
        self.update_projection();
    }

    pub fn clip_planes(&self) -> (f32, f32) {
        (self.near, self.far)
    }

    pub fn set_clip_planes(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
        self.update_projection();
    }

    /// Updates the aspect ratio after a resize.
    pub fn set_size(&mut self, width: u32, height: u32) {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        if aspect != self.aspect {
            self.aspect = aspect;
            self.update_projection();
        }
    }

    /// Overrides both matrices, e.g. with the output of an external camera
    /// controller.
    pub fn set_matrices(&mut self, view: Mat4, projection: Mat4, position: Vec3) {
        self.view_matrix = view;
        self.projection_matrix = projection;
        self.position = position;
        self.dirty = true;
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view_matrix
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    /// `projection * view`.
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix * self.view_matrix
    }

    /// `true` if the matrices changed since the last upload.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Creates the `camera` uniform bind group.
    pub fn create_bind_group(&self, ctx: &mut Context) -> Result<BindGroupRef> {
        let binding = BufferBinding::new(
            ctx,
            BufferBindingParams::uniform("camera")
                .with_visibility(wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT)
                .with_input(BufferInput::new("view", "mat4x4f", self.view_matrix))
                .with_input(BufferInput::new("projection", "mat4x4f", self.projection_matrix))
                .with_input(BufferInput::new("position", "vec3f", self.position)),
        )?;

        let mut bind_group = BindGroup::new("camera");
        bind_group.add_binding(Binding::Buffer(binding).into_ref());
        Ok(bind_group.into_ref())
    }

    /// Copies the matrices into the bind group inputs if they changed.
    pub fn update_bind_group(&mut self, bind_group: &BindGroupRef) {
        if !self.dirty {
            return;
        }

        let bind_group = bind_group.borrow();
        bind_group.set_input("camera", "view", self.view_matrix);
        bind_group.set_input("camera", "projection", self.projection_matrix);
        bind_group.set_input("camera", "position", self.position);
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;

    #[test]
    fn matrices_are_uploaded_once() {
        let mut ctx = Context::new(HeadlessBackend::default());
        let mut camera = Camera::default();
        let bind_group = camera.create_bind_group(&mut ctx).unwrap();

        camera.set_position(Vec3::new(0.0, 2.0, 5.0));
        camera.update_bind_group(&bind_group);
        assert!(!camera.is_dirty());

        let binding = bind_group.borrow().binding("camera").unwrap();
        let binding = binding.borrow();
        let values = binding.as_buffer().unwrap().input("position").unwrap().value().components();
        assert_eq!(values, vec![0.0, 2.0, 5.0]);
    }

    #[test]
    fn origin_is_in_front_of_the_camera() {
        let camera = Camera::default();
        let clip = camera.view_projection() * glamx::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = clip.z / clip.w;

        assert!(depth > 0.0 && depth < 1.0);
    }
}
