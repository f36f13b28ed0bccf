//! Meshes, passes and their per-frame scheduling.

pub use self::camera::Camera;
pub use self::compute_pass::{ComputePass, ComputePassParams};
pub use self::geometry::{Geometry, GeometryAttribute};
pub use self::mesh::{Mesh, MeshHook, MeshKind, MeshParams, ShaderPassParams};
pub use self::render_pass::{PassHook, RenderPass, RenderPassOptions};
pub use self::render_target::{RenderTarget, RenderTargetParams};
pub use self::scene::{MeshStack, PassContent, PassKind, RenderPassEntry, Scene};
pub use self::transform::Transform;

mod camera;
mod compute_pass;
mod geometry;
mod mesh;
mod render_pass;
mod render_target;
#[allow(clippy::module_inception)]
mod scene;
mod transform;
