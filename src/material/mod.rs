//! Materials: bind groups plus the pipeline drawing or dispatching with them.

pub use self::compute_material::{ComputeMaterial, CustomComputeRender};
pub use self::material::{Material, MaterialBase, MaterialParams, WritableStorageParams};
pub use self::render_material::{RenderMaterial, RenderMaterialTarget, RenderShaders};

mod compute_material;
#[allow(clippy::module_inception)]
mod material;
mod render_material;
