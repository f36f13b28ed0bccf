//! The entry point driving a scene frame after frame.

pub use self::renderer::{Renderer, RendererOptions};

#[allow(clippy::module_inception)]
mod renderer;
