/*!
# Curtains

A small WebGPU core drawing meshes, full-screen shader passes and compute
passes out of WGSL snippets.

Most GPU boilerplate is handled for you:

* uniform and storage buffers are laid out following the WGSL alignment rules
  and written only when one of their inputs changes.
* bind groups and their layouts are created lazily and shared when identical.
* render and compute pipelines are cached and compiled once per shader and
  layout combination.
* meshes are sorted in render passes (opaque first, then transparent meshes
  back to front), culled against the camera frustum and drawn into the screen
  or into render targets.
* the whole scene survives a device loss: every GPU object is recreated on the
  first frame after [`Renderer::restore_device`](crate::renderer::Renderer::restore_device).

As an example, a full-screen pass tinting the screen is as simple as:

```no_run
use curtains::prelude::*;

fn main() -> curtains::error::Result<()> {
    let mut renderer = Renderer::new(HeadlessBackend::default(), RendererOptions::default())?;

    let fragment = ShaderSource::new(
        "@fragment fn main(fsInput: VSOutput) -> @location(0) vec4f {
            return textureSample(renderTexture, defaultSampler, fsInput.uv) * params.tint;
        }",
        "main",
    );
    let material = MaterialParams::new("tint").with_uniform(
        BufferBindingParams::uniform("params")
            .with_input(BufferInput::new("tint", "vec4f", Vec4::new(1.0, 0.5, 0.5, 1.0))),
    );
    renderer.create_shader_pass(ShaderPassParams::new("tint", fragment).with_material(material))?;

    for _ in 0..3 {
        renderer.render()?;
    }
    Ok(())
}
```

Frames are recorded into a backend agnostic command list replayed by a
[`GpuBackend`](crate::context::GpuBackend). Use
[`WgpuBackend`](crate::context::WgpuBackend) to draw into a window and
[`HeadlessBackend`](crate::context::HeadlessBackend) to run without any GPU,
which is what the tests do.
*/
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

#[macro_use]
extern crate bitflags;

pub use glamx;

#[cfg(not(target_arch = "wasm32"))]
#[doc(hidden)]
pub use pollster;

pub mod context;
pub mod error;
pub mod material;
pub mod pipeline;
pub mod renderer;
pub mod resource;
pub mod scene;
pub mod utils;

pub mod prelude {
    pub use crate::context::{GpuBackend, HeadlessBackend, WgpuBackend};
    pub use crate::error::{Error, Result};
    pub use crate::material::*;
    pub use crate::pipeline::{RenderingOptions, ShaderSource};
    pub use crate::renderer::*;
    pub use crate::resource::*;
    pub use crate::scene::*;
    pub use glamx::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
    pub use std::cell::RefCell;
    pub use std::rc::Rc;
}
