//! Vertex data drawn by meshes.

use glamx::Vec3;

use crate::context::{Context, RenderPassRecorder, VertexAttribute, VertexBufferLayout};
use crate::error::{Error, Result};
use crate::pipeline::VertexLayout;
use crate::resource::{get_buffer_layout, Buffer, SharedBuffer};
use crate::utils::generate_uid;

/// A named vertex attribute and its values, tightly packed.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryAttribute {
    /// WGSL name of the attribute.
    pub name: String,
    /// WGSL type of one vertex value, e.g. `vec3f`.
    pub ty: String,
    pub array: Vec<f32>,
}

impl GeometryAttribute {
    pub fn new(name: impl Into<String>, ty: impl Into<String>, array: Vec<f32>) -> Self {
        GeometryAttribute {
            name: name.into(),
            ty: ty.into(),
            array,
        }
    }
}

/// Vertex attributes interleaved in one vertex buffer, plus optional
/// indices.
#[derive(Debug)]
pub struct Geometry {
    pub uid: u64,
    pub label: String,
    attributes: Vec<GeometryAttribute>,
    indices: Option<Vec<u32>>,
    vertex_count: u32,
    pub instances_count: u32,
    vertex_data: Vec<u8>,
    vertex_layout: VertexLayout,
    bounding_box: (Vec3, Vec3),
    vertex_buffer: SharedBuffer,
    index_buffer: Option<SharedBuffer>,
}

impl Geometry {
    /// Creates a geometry.
    ///
    /// Fails if an attribute has an unsupported type, a length that is not a
    /// multiple of its type size, or a vertex count differing from the first
    /// attribute.
    pub fn new(
        label: impl Into<String>,
        attributes: Vec<GeometryAttribute>,
        indices: Option<Vec<u32>>,
    ) -> Result<Self> {
        let label = label.into();
        let mut vertex_count = None;
        let mut layouts = Vec::with_capacity(attributes.len());

        for attribute in &attributes {
            let layout = get_buffer_layout(&attribute.ty)
                .filter(|l| l.scalar_type.vertex_format(l.num_values()).is_some())
                .ok_or_else(|| Error::UnknownWgslType(attribute.ty.clone()))?;
            let size = layout.num_values();

            if attribute.array.len() % size != 0 {
                return Err(Error::GeometryAttributeSize {
                    label,
                    attribute: attribute.name.clone(),
                    len: attribute.array.len(),
                    size,
                });
            }

            let count = attribute.array.len() / size;
            match vertex_count {
                None => vertex_count = Some(count),
                Some(expected) if expected != count => {
                    return Err(Error::GeometryAttributeMismatch {
                        label,
                        attribute: attribute.name.clone(),
                        expected,
                        found: count,
                    });
                }
                Some(_) => {}
            }

            layouts.push(layout);
        }

        let vertex_count = vertex_count.unwrap_or(0);

        let mut buffer_attributes = Vec::with_capacity(attributes.len());
        let mut stride = 0;
        for (location, layout) in layouts.iter().enumerate() {
            if let Some(format) = layout.scalar_type.vertex_format(layout.num_values()) {
                buffer_attributes.push(VertexAttribute {
                    format,
                    offset: stride,
                    shader_location: location as u32,
                });
            }
            stride += (layout.num_values() * 4) as u64;
        }

        let mut vertex_data = Vec::with_capacity(stride as usize * vertex_count);
        for vertex in 0..vertex_count {
            for (attribute, layout) in attributes.iter().zip(&layouts) {
                let size = layout.num_values();
                for value in &attribute.array[vertex * size..(vertex + 1) * size] {
                    vertex_data.extend_from_slice(&layout.scalar_type.encode(*value as f64));
                }
            }
        }

        let fields: Vec<_> = attributes
            .iter()
            .enumerate()
            .map(|(location, attribute)| {
                format!("\t@location({}) {}: {}", location, attribute.name, attribute.ty)
            })
            .collect();
        let wgsl_struct_fragment = format!(
            "struct Attributes {{\n\t@builtin(vertex_index) vertexIndex: u32,\n\t@builtin(instance_index) instanceIndex: u32,{}{}\n}};",
            if fields.is_empty() { "" } else { "\n" },
            fields.join(",\n")
        );
        let layout_cache_key = attributes
            .iter()
            .map(|attribute| format!("{}:{},", attribute.name, attribute.ty))
            .collect();

        let vertex_buffers = if buffer_attributes.is_empty() {
            Vec::new()
        } else {
            vec![VertexBufferLayout {
                array_stride: stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: buffer_attributes,
            }]
        };

        let bounding_box = Self::compute_bounding_box(&attributes);

        Ok(Geometry {
            uid: generate_uid(),
            vertex_buffer: Buffer::shared(format!("{} vertex buffer", label)),
            index_buffer: indices
                .as_ref()
                .map(|_| Buffer::shared(format!("{} index buffer", label))),
            label,
            attributes,
            indices,
            vertex_count: vertex_count as u32,
            instances_count: 1,
            vertex_data,
            vertex_layout: VertexLayout {
                layout_cache_key,
                buffers: vertex_buffers,
                wgsl_struct_fragment,
            },
            bounding_box,
        })
    }

    fn compute_bounding_box(attributes: &[GeometryAttribute]) -> (Vec3, Vec3) {
        let Some(position) = attributes.iter().find(|a| a.name == "position") else {
            return (Vec3::ZERO, Vec3::ZERO);
        };

        let size = get_buffer_layout(&position.ty).map_or(3, |l| l.num_values());
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);

        for vertex in position.array.chunks(size) {
            let p = Vec3::new(
                vertex.first().copied().unwrap_or(0.0),
                vertex.get(1).copied().unwrap_or(0.0),
                vertex.get(2).copied().unwrap_or(0.0),
            );
            min = min.min(p);
            max = max.max(p);
        }

        if position.array.is_empty() {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            (min, max)
        }
    }

    /// A `width_segments` × `height_segments` plane covering clip space,
    /// with `position`, `uv` and `normal` attributes.
    pub fn plane(width_segments: u32, height_segments: u32) -> Result<Self> {
        let (ws, hs) = (width_segments.max(1), height_segments.max(1));
        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        let mut normals = Vec::new();

        for y in 0..=hs {
            for x in 0..=ws {
                let u = x as f32 / ws as f32;
                let v = y as f32 / hs as f32;

                positions.extend_from_slice(&[u * 2.0 - 1.0, 1.0 - v * 2.0, 0.0]);
                uvs.extend_from_slice(&[u, v]);
                normals.extend_from_slice(&[0.0, 0.0, 1.0]);
            }
        }

        let mut indices = Vec::with_capacity((ws * hs * 6) as usize);
        for y in 0..hs {
            for x in 0..ws {
                let a = y * (ws + 1) + x;
                let b = a + ws + 1;
                indices.extend_from_slice(&[a, b, a + 1, b, b + 1, a + 1]);
            }
        }

        Geometry::new(
            format!("plane {}x{}", ws, hs),
            vec![
                GeometryAttribute::new("position", "vec3f", positions),
                GeometryAttribute::new("uv", "vec2f", uvs),
                GeometryAttribute::new("normal", "vec3f", normals),
            ],
            Some(indices),
        )
    }

    pub fn attributes(&self) -> &[GeometryAttribute] {
        &self.attributes
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// The vertex input description given to render pipelines.
    pub fn vertex_layout(&self) -> &VertexLayout {
        &self.vertex_layout
    }

    /// The interleaved vertex data uploaded to the vertex buffer.
    pub fn vertex_data(&self) -> &[u8] {
        &self.vertex_data
    }

    /// Local space bounding box, from the `position` attribute.
    pub fn bounding_box(&self) -> (Vec3, Vec3) {
        self.bounding_box
    }

    /// Center and radius of the sphere enclosing the bounding box.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        let (min, max) = self.bounding_box;
        ((min + max) * 0.5, (max - min).length() * 0.5)
    }

    pub fn vertex_buffer(&self) -> &SharedBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> Option<&SharedBuffer> {
        self.index_buffer.as_ref()
    }

    /// Creates and fills the GPU buffers if needed.
    pub fn create_buffers(&mut self, ctx: &mut Context) {
        if self.vertex_buffer.borrow().gpu_buffer().is_none() && !self.vertex_data.is_empty() {
            let mut buffer = self.vertex_buffer.borrow_mut();
            buffer.create_buffer(
                ctx,
                self.vertex_data.len() as u64,
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            );
            buffer.write(ctx, 0, &self.vertex_data);
            buffer.add_consumer(self.uid);
        }

        if let (Some(buffer), Some(indices)) = (&self.index_buffer, &self.indices) {
            if buffer.borrow().gpu_buffer().is_none() && !indices.is_empty() {
                let mut buffer = buffer.borrow_mut();
                let data: &[u8] = bytemuck::cast_slice(indices);
                buffer.create_buffer(
                    ctx,
                    data.len() as u64,
                    wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                );
                buffer.write(ctx, 0, data);
                buffer.add_consumer(self.uid);
            }
        }
    }

    /// `true` once every buffer needed for drawing exists.
    pub fn ready(&self) -> bool {
        let vertices =
            self.vertex_data.is_empty() || self.vertex_buffer.borrow().gpu_buffer().is_some();
        let indices = self
            .index_buffer
            .as_ref()
            .is_none_or(|buffer| buffer.borrow().gpu_buffer().is_some());
        vertices && indices
    }

    /// Binds the buffers and records the draw call.
    pub fn draw(&self, pass: &mut RenderPassRecorder<'_>) {
        if let Some(buffer) = self.vertex_buffer.borrow().gpu_buffer() {
            pass.set_vertex_buffer(0, buffer);
        }

        let index_buffer = self
            .index_buffer
            .as_ref()
            .and_then(|buffer| buffer.borrow().gpu_buffer());

        match (index_buffer, &self.indices) {
            (Some(buffer), Some(indices)) => {
                pass.set_index_buffer(buffer, wgpu::IndexFormat::Uint32);
                pass.draw_indexed(indices.len() as u32, self.instances_count);
            }
            _ => pass.draw(self.vertex_count, self.instances_count),
        }
    }

    /// Releases the GPU buffers.
    pub fn destroy(&mut self, ctx: &mut Context) {
        self.vertex_buffer.borrow_mut().release(ctx, self.uid);
        if let Some(buffer) = &self.index_buffer {
            buffer.borrow_mut().release(ctx, self.uid);
        }
    }

    /// Forgets the GPU buffers after a device loss.
    pub fn reset_gpu_handles(&mut self) {
        self.vertex_buffer.borrow_mut().reset();
        if let Some(buffer) = &self.index_buffer {
            buffer.borrow_mut().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeadlessBackend;

    #[test]
    fn attributes_are_interleaved() {
        let geometry = Geometry::new(
            "triangle",
            vec![
                GeometryAttribute::new("position", "vec3f", vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
                GeometryAttribute::new("uv", "vec2f", vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0]),
            ],
            None,
        )
        .unwrap();

        assert_eq!(geometry.vertex_count(), 3);
        let layout = geometry.vertex_layout();
        assert_eq!(layout.layout_cache_key, "position:vec3f,uv:vec2f,");
        assert_eq!(layout.buffers[0].array_stride, 20);
        assert_eq!(layout.buffers[0].attributes[1].offset, 12);
        assert_eq!(layout.buffers[0].attributes[1].shader_location, 1);
        assert!(layout.wgsl_struct_fragment.contains("@location(1) uv: vec2f"));
        assert_eq!(geometry.vertex_data().len(), 60);

        let second_uv: &[f32] = bytemuck::cast_slice(&geometry.vertex_data()[32..40]);
        assert_eq!(second_uv, &[1.0, 0.0]);
    }

    #[test]
    fn mismatched_attributes_are_fatal() {
        let err = Geometry::new(
            "broken",
            vec![
                GeometryAttribute::new("position", "vec3f", vec![0.0; 9]),
                GeometryAttribute::new("uv", "vec2f", vec![0.0; 4]),
            ],
            None,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::GeometryAttributeMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));

        let err = Geometry::new(
            "broken",
            vec![GeometryAttribute::new("position", "vec3f", vec![0.0; 8])],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::GeometryAttributeSize { len: 8, size: 3, .. }));
    }

    #[test]
    fn plane_covers_clip_space() {
        let plane = Geometry::plane(1, 1).unwrap();

        assert_eq!(plane.vertex_count(), 4);
        assert_eq!(plane.indices().unwrap().len(), 6);
        assert_eq!(plane.bounding_box(), (Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn buffers_are_shared_until_released() {
        let backend = HeadlessBackend::default();
        let probe = backend.probe();
        let mut ctx = Context::new(backend);
        let mut plane = Geometry::plane(1, 1).unwrap();

        plane.create_buffers(&mut ctx);
        plane.create_buffers(&mut ctx);
        assert!(plane.ready());
        assert_eq!(probe.stats().buffers_created, 2);

        plane.destroy(&mut ctx);
        assert_eq!(probe.stats().buffers_destroyed, 2);
    }
}
