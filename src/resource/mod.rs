//! GPU resources: buffer layouts, bindings, buffers, textures, samplers and
//! bind groups.

pub use crate::resource::bind_group::{BindGroup, BindGroupKind, BindGroupRef};
pub use crate::resource::binding::{
    Binding, BindingBase, BindingRef, BindingResets, BindingType,
};
pub use crate::resource::buffer::{Buffer, SharedBuffer};
pub use crate::resource::buffer_binding::{
    BufferAccess, BufferBinding, BufferBindingParams, WritableBufferBinding,
};
pub use crate::resource::buffer_element::{
    Alignment, BufferArrayElement, BufferElement, BufferInterleavedArrayElement, Element,
    FieldDescriptor, InterleavedField, Position, StructLayout, BYTES_PER_ROW,
};
pub use crate::resource::buffer_layout::{
    array_element_type, get_buffer_layout, BufferLayout, ScalarType,
};
pub use crate::resource::input::{BufferInput, InputValue, OnBeforeUpdate};
pub use crate::resource::sampler::{Sampler, SamplerParams, SamplerRef, SamplerWrapping};
pub use crate::resource::sampler_binding::SamplerBinding;
pub use crate::resource::texture::{Texture, TextureParams, TextureRef, TextureSource};
pub use crate::resource::texture_binding::{
    storage_format_name, TextureBinding, TextureBindingParams,
};

mod bind_group;
mod binding;
mod buffer;
mod buffer_binding;
mod buffer_element;
mod buffer_layout;
mod input;
mod sampler;
mod sampler_binding;
mod texture;
mod texture_binding;
