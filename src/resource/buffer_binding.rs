//! Uniform and storage buffer bindings.

use std::rc::Rc;

use crate::context::{BindingLayout, BindingResource, Context};
use crate::error::{Error, Result};
use crate::resource::{
    array_element_type, BindingBase, BindingType, Buffer, BufferInput, Element, FieldDescriptor,
    SharedBuffer, StructLayout, BYTES_PER_ROW,
};
use crate::utils::{align_to, to_pascal_case};

/// Access mode of a storage buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum BufferAccess {
    #[default]
    Read,
    ReadWrite,
}

impl BufferAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferAccess::Read => "read",
            BufferAccess::ReadWrite => "read_write",
        }
    }
}

/// Parameters of a [`BufferBinding`].
pub struct BufferBindingParams {
    pub label: String,
    /// WGSL variable name, defaults to the camel-cased label.
    pub name: Option<String>,
    /// [`BindingType::Uniform`] or [`BindingType::Storage`].
    pub binding_type: BindingType,
    pub visibility: wgpu::ShaderStages,
    /// Declare the inputs as a WGSL struct. When `false`, a binding with a
    /// single input declares that input directly.
    pub use_struct: bool,
    pub access: BufferAccess,
    /// Extra usages of the GPU buffer.
    pub usage: wgpu::BufferUsages,
    pub inputs: Vec<BufferInput>,
}

impl BufferBindingParams {
    /// A uniform binding visible to the vertex and fragment stages.
    pub fn uniform(label: impl Into<String>) -> Self {
        BufferBindingParams {
            label: label.into(),
            name: None,
            binding_type: BindingType::Uniform,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            use_struct: true,
            access: BufferAccess::Read,
            usage: wgpu::BufferUsages::empty(),
            inputs: Vec::new(),
        }
    }

    /// A read-only storage binding visible to the vertex and fragment stages.
    pub fn storage(label: impl Into<String>) -> Self {
        BufferBindingParams {
            binding_type: BindingType::Storage,
            ..Self::uniform(label)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_visibility(mut self, visibility: wgpu::ShaderStages) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_access(mut self, access: BufferAccess) -> Self {
        self.access = access;
        self
    }

    pub fn with_usage(mut self, usage: wgpu::BufferUsages) -> Self {
        self.usage = usage;
        self
    }

    pub fn without_struct(mut self) -> Self {
        self.use_struct = false;
        self
    }

    pub fn with_input(mut self, input: BufferInput) -> Self {
        self.inputs.push(input);
        self
    }
}

/// WGSL alignment of an element type, before any row padding.
fn natural_align(element: &Element) -> usize {
    match element {
        Element::Single(e) => e.layout.align,
        Element::Array(e) => e.element.layout.align,
        Element::Interleaved(e) => e
            .fields
            .iter()
            .map(|field| field.layout.align)
            .max()
            .unwrap_or(4),
    }
}

/// A uniform or storage buffer binding.
///
/// Inputs are serialized into a CPU mirror laid out per WGSL rules. Dirty
/// inputs are re-serialized by [`BufferBinding::update`]; the bind group
/// owning the binding then uploads the mirror.
#[derive(Debug)]
pub struct BufferBinding {
    base: BindingBase,
    pub use_struct: bool,
    pub access: BufferAccess,
    struct_name: String,
    inputs: Vec<BufferInput>,
    layout: Rc<StructLayout>,
    array_buffer: Vec<u8>,
    buffer: SharedBuffer,
    extra_usage: wgpu::BufferUsages,
    should_update: bool,
}

impl BufferBinding {
    /// Creates the binding, reusing the layout of a structurally identical
    /// binding if `ctx` has already computed one.
    pub fn new(ctx: &mut Context, params: BufferBindingParams) -> Result<Self> {
        if !matches!(
            params.binding_type,
            BindingType::Uniform | BindingType::Storage
        ) {
            return Err(Error::UnknownWgslType(format!(
                "{} buffer binding `{}`",
                params.binding_type, params.label
            )));
        }

        let struct_name = to_pascal_case(&params.label);
        let fields: Vec<_> = params
            .inputs
            .iter()
            .map(|input| FieldDescriptor {
                key: &input.name,
                ty: &input.ty,
                len: input.value().len(),
            })
            .collect();

        let uniform = params.binding_type == BindingType::Uniform;
        let layout =
            StructLayout::get_or_create(&struct_name, &fields, uniform, ctx.struct_layouts())?;

        Ok(Self::with_layout(params, struct_name, layout))
    }

    fn with_layout(
        params: BufferBindingParams,
        struct_name: String,
        layout: Rc<StructLayout>,
    ) -> Self {
        let inputs: Vec<_> = params
            .inputs
            .into_iter()
            .filter(|input| !layout.dropped_keys.contains(&input.name))
            .collect();

        let mut base = BindingBase::new(
            &params.label,
            params.name.as_deref(),
            params.binding_type,
            params.visibility,
        );
        let access = match params.binding_type {
            BindingType::Uniform => BufferAccess::Read,
            _ => params.access,
        };

        base.cache_key = format!(
            "{}{},{},{}",
            base.base_cache_key(),
            params.use_struct,
            access.as_str(),
            inputs
                .iter()
                .map(|input| format!("{}:{},", input.name, input.ty))
                .collect::<String>()
        );

        BufferBinding {
            buffer: Buffer::shared(&params.label),
            array_buffer: vec![0; layout.array_buffer_size],
            base,
            use_struct: params.use_struct,
            access,
            struct_name,
            inputs,
            layout,
            extra_usage: params.usage,
            should_update: true,
        }
    }

    /// Creates a structurally identical binding with its own inputs and GPU
    /// buffer. The alignment computed for `self` is reused as is.
    pub fn clone_with(&self, label: impl Into<String>, inputs: Vec<BufferInput>) -> Self {
        let params = BufferBindingParams {
            label: label.into(),
            name: Some(self.base.name.clone()),
            binding_type: self.base.binding_type,
            visibility: self.base.visibility,
            use_struct: self.use_struct,
            access: self.access,
            usage: self.extra_usage,
            inputs,
        };

        let mut clone = Self::with_layout(params, self.struct_name.clone(), self.layout.clone());
        clone.array_buffer.copy_from_slice(&self.array_buffer);
        clone
    }

    pub fn base(&self) -> &BindingBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BindingBase {
        &mut self.base
    }

    pub fn struct_name(&self) -> &str {
        &self.struct_name
    }

    pub fn layout(&self) -> &Rc<StructLayout> {
        &self.layout
    }

    pub fn elements(&self) -> &[Element] {
        &self.layout.elements
    }

    /// Size of the CPU mirror and of the GPU buffer.
    pub fn array_buffer_size(&self) -> usize {
        self.layout.array_buffer_size
    }

    /// The CPU mirror of the buffer content.
    pub fn array_buffer(&self) -> &[u8] {
        &self.array_buffer
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Shares another buffer instead of the binding's own.
    pub fn set_buffer(&mut self, buffer: SharedBuffer) {
        self.buffer = buffer;
    }

    pub fn inputs(&self) -> &[BufferInput] {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&BufferInput> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut BufferInput> {
        self.inputs.iter_mut().find(|input| input.name == name)
    }

    /// `true` once inputs have been serialized and the mirror must be
    /// uploaded.
    pub fn should_update(&self) -> bool {
        self.should_update
    }

    pub fn set_should_update(&mut self, should_update: bool) {
        self.should_update = should_update;
    }

    /// GPU usages of the buffer backing this binding.
    pub fn buffer_usage(&self) -> wgpu::BufferUsages {
        let usage = match self.base.binding_type {
            BindingType::Storage => wgpu::BufferUsages::STORAGE,
            _ => wgpu::BufferUsages::UNIFORM,
        };

        usage | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC | self.extra_usage
    }

    /// Re-serializes every dirty input.
    ///
    /// A value that cannot be coerced to its field type is skipped with a
    /// warning; other inputs are still written.
    pub fn update(&mut self) {
        for input in self.inputs.iter_mut().filter(|input| input.should_update()) {
            input.run_on_before_update();

            if let Some(element) = self.layout.element(&input.name) {
                let _ = element.update(&mut self.array_buffer, &input.name, input.value());
            }

            input.clear_dirty();
            self.should_update = true;
        }
    }

    /// Allocates the GPU buffer if needed.
    pub fn create_buffer(&mut self, ctx: &mut Context) {
        let usage = self.buffer_usage();
        self.buffer
            .borrow_mut()
            .create_buffer(ctx, self.array_buffer.len() as u64, usage);
    }

    /// Uploads the CPU mirror if it changed.
    pub fn write(&mut self, ctx: &mut Context) {
        if self.should_update && self.buffer.borrow().gpu_buffer().is_some() {
            self.buffer.borrow().write(ctx, 0, &self.array_buffer);
            self.should_update = false;
        }
    }

    /// Current values of the input `name`, read from the CPU mirror.
    pub fn element_values(&self, name: &str) -> Option<Vec<f64>> {
        self.layout
            .element(name)
            .map(|element| element.extract(&self.array_buffer, name))
    }

    /// Extracts the input `name` from bytes read back from the GPU.
    pub fn extract_data_from_buffer_result(&self, data: &[u8], name: &str) -> Option<Vec<f64>> {
        self.layout
            .element(name)
            .map(|element| element.extract(data, name))
    }

    pub fn resource_layout(&self) -> BindingLayout {
        let ty = match self.base.binding_type {
            BindingType::Storage => wgpu::BufferBindingType::Storage {
                read_only: self.access == BufferAccess::Read,
            },
            _ => wgpu::BufferBindingType::Uniform,
        };

        BindingLayout::Buffer { ty }
    }

    pub fn resource(&self) -> Option<BindingResource> {
        self.buffer
            .borrow()
            .gpu_buffer()
            .map(BindingResource::Buffer)
    }

    fn address_space(&self) -> String {
        match self.base.binding_type {
            BindingType::Storage => format!("storage, {}", self.access.as_str()),
            _ => "uniform".to_string(),
        }
    }

    fn element_wgsl_type(&self, element: &Element) -> String {
        let uniform = self.base.binding_type == BindingType::Uniform;

        match element {
            Element::Single(e) => e.ty.clone(),
            Element::Array(e) => {
                let item = array_element_type(&e.element.ty).unwrap_or(&e.element.ty);
                if uniform {
                    format!("array<{}, {}>", item, e.num_elements)
                } else {
                    format!("array<{}>", item)
                }
            }
            Element::Interleaved(e) => {
                if uniform {
                    format!("array<{}, {}>", e.item_struct_name, e.num_elements)
                } else {
                    format!("array<{}>", e.item_struct_name)
                }
            }
        }
    }

    fn declares_struct(&self) -> bool {
        self.use_struct || self.layout.elements.len() != 1
    }

    /// WGSL struct declarations of this binding.
    pub fn wgsl_struct_fragment(&self) -> String {
        let mut fragment = String::new();

        for element in &self.layout.elements {
            if let Element::Interleaved(e) = element {
                let last = e.fields.len().saturating_sub(1);
                let fields: Vec<_> = e
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        if i == last && e.array_stride > e.item_size {
                            let size = e.array_stride - field.offset;
                            format!("\t@size({}) {}: {}", size, field.name, field.ty)
                        } else {
                            format!("\t{}: {}", field.name, field.ty)
                        }
                    })
                    .collect();

                fragment.push_str(&format!(
                    "struct {} {{\n{}\n}};\n\n",
                    e.item_struct_name,
                    fields.join(",\n")
                ));
            }
        }

        if self.declares_struct() {
            let mut cursor = 0;
            let fields: Vec<_> = self
                .layout
                .elements
                .iter()
                .map(|element| {
                    let name = match element {
                        Element::Single(e) => &e.name,
                        Element::Array(e) => &e.element.name,
                        Element::Interleaved(e) => &e.name,
                    };
                    // Elements pushed to the next row need an explicit alignment.
                    let start = element.start_offset();
                    let align = if start == align_to(cursor, natural_align(element)) {
                        String::new()
                    } else {
                        format!("@align({}) ", BYTES_PER_ROW)
                    };
                    cursor = element.end_offset() + 1;

                    format!("\t{}{}: {}", align, name, self.element_wgsl_type(element))
                })
                .collect();

            fragment.push_str(&format!(
                "struct {} {{\n{}\n}};",
                self.struct_name,
                fields.join(",\n")
            ));
        }

        fragment
    }

    /// WGSL variable declaration of this binding.
    pub fn wgsl_group_fragment(&self) -> String {
        let ty = match (self.declares_struct(), self.layout.elements.first()) {
            (false, Some(element)) => self.element_wgsl_type(element),
            _ => self.struct_name.clone(),
        };

        format!("var<{}> {}: {};", self.address_space(), self.base.name, ty)
    }

    /// Forgets the GPU buffer after a device loss and marks every input
    /// dirty so the mirror is rebuilt and uploaded again.
    pub fn reset_gpu_handles(&mut self) {
        self.buffer.borrow_mut().reset();

        for input in &mut self.inputs {
            input.mark_dirty();
        }
        self.should_update = true;
    }
}

/// A storage binding written by compute shaders.
///
/// It is always visible to the compute stage with `read_write` access. When
/// `should_copy_result` is set, its content is copied after each compute pass
/// into a mappable result buffer so it can be read back without mapping the
/// live storage buffer.
#[derive(Debug)]
pub struct WritableBufferBinding {
    pub inner: BufferBinding,
    pub should_copy_result: bool,
    result_buffer: Option<SharedBuffer>,
}

impl WritableBufferBinding {
    pub fn new(
        ctx: &mut Context,
        params: BufferBindingParams,
        should_copy_result: bool,
    ) -> Result<Self> {
        let params = BufferBindingParams {
            binding_type: BindingType::Storage,
            visibility: wgpu::ShaderStages::COMPUTE,
            access: BufferAccess::ReadWrite,
            ..params
        };
        let label = params.label.clone();

        Ok(WritableBufferBinding {
            inner: BufferBinding::new(ctx, params)?,
            should_copy_result,
            result_buffer: should_copy_result.then(|| Buffer::shared(format!("{} result", label))),
        })
    }

    pub fn result_buffer(&self) -> Option<&SharedBuffer> {
        self.result_buffer.as_ref()
    }

    /// Allocates the storage buffer and, if needed, the result buffer.
    pub fn create_buffers(&mut self, ctx: &mut Context) {
        self.inner.create_buffer(ctx);

        if let Some(result) = &self.result_buffer {
            result.borrow_mut().create_buffer(
                ctx,
                self.inner.array_buffer_size() as u64,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            );
        }
    }

    pub fn reset_gpu_handles(&mut self) {
        self.inner.reset_gpu_handles();

        if let Some(result) = &self.result_buffer {
            result.borrow_mut().reset();
        }
    }
}
