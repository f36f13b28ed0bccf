use glamx::{Mat4, Quat, Vec3};

/// Position, rotation and scale of a mesh.
///
/// Transforms are flat: the world matrix is the local matrix. It is only
/// recomputed by [`Transform::update_matrix_stack`], once per frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
    world_matrix: Mat4,
    dirty: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            world_matrix: Mat4::IDENTITY,
            dirty: false,
        }
    }
}

impl Transform {
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.dirty = true;
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    /// `true` if the world matrix is stale.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Recomputes the world matrix if needed. Returns `true` if it changed.
    pub fn update_matrix_stack(&mut self) -> bool {
        if !self.dirty {
            return false;
        }

        self.world_matrix =
            Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position);
        self.dirty = false;
        true
    }

    pub fn world_matrix(&self) -> Mat4 {
        self.world_matrix
    }

    /// The largest world scale component, used to scale bounding spheres.
    pub fn world_scale(&self) -> f32 {
        self.scale.abs().max_element()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_matrix_follows_the_last_update() {
        let mut transform = Transform::default();
        transform.set_position(Vec3::new(1.0, 2.0, 3.0));
        transform.set_scale(Vec3::new(2.0, -4.0, 1.0));
        assert_eq!(transform.world_matrix(), Mat4::IDENTITY);

        assert!(transform.update_matrix_stack());
        assert!(!transform.update_matrix_stack());
        assert_eq!(
            transform.world_matrix().transform_point3(Vec3::ZERO),
            Vec3::new(1.0, 2.0, 3.0)
        );
        assert_eq!(transform.world_scale(), 4.0);
    }
}
