//! Host-shareable memory layout of WGSL types.

/// The numeric type backing a buffer element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    F32,
    I32,
    U32,
}

impl ScalarType {
    /// Encodes one component as little-endian bytes.
    pub fn encode(self, value: f64) -> [u8; 4] {
        match self {
            ScalarType::F32 => (value as f32).to_le_bytes(),
            ScalarType::I32 => (value as i32).to_le_bytes(),
            ScalarType::U32 => (value as u32).to_le_bytes(),
        }
    }

    /// Decodes one little-endian component.
    pub fn decode(self, bytes: [u8; 4]) -> f64 {
        match self {
            ScalarType::F32 => f32::from_le_bytes(bytes) as f64,
            ScalarType::I32 => i32::from_le_bytes(bytes) as f64,
            ScalarType::U32 => u32::from_le_bytes(bytes) as f64,
        }
    }

    /// The WGSL vertex format of a vector of `components` such scalars.
    pub fn vertex_format(self, components: usize) -> Option<wgpu::VertexFormat> {
        use wgpu::VertexFormat::*;

        let format = match (self, components) {
            (ScalarType::F32, 1) => Float32,
            (ScalarType::F32, 2) => Float32x2,
            (ScalarType::F32, 3) => Float32x3,
            (ScalarType::F32, 4) => Float32x4,
            (ScalarType::I32, 1) => Sint32,
            (ScalarType::I32, 2) => Sint32x2,
            (ScalarType::I32, 3) => Sint32x3,
            (ScalarType::I32, 4) => Sint32x4,
            (ScalarType::U32, 1) => Uint32,
            (ScalarType::U32, 2) => Uint32x2,
            (ScalarType::U32, 3) => Uint32x3,
            (ScalarType::U32, 4) => Uint32x4,
            _ => return None,
        };

        Some(format)
    }
}

/// Memory layout of a WGSL type.
///
/// `pad` is `Some([per, count])` for matrices whose columns are vec3: every
/// `per` components are followed by `count` padding components.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    /// Number of scalar components, padding included.
    pub num_elements: usize,
    /// Required alignment, in bytes.
    pub align: usize,
    /// Size, in bytes.
    pub size: usize,
    pub scalar_type: ScalarType,
    pub pad: Option<[usize; 2]>,
}

impl BufferLayout {
    const fn new(num_elements: usize, align: usize, size: usize, scalar_type: ScalarType) -> Self {
        BufferLayout {
            num_elements,
            align,
            size,
            scalar_type,
            pad: None,
        }
    }

    const fn padded(num_elements: usize, align: usize, size: usize) -> Self {
        BufferLayout {
            num_elements,
            align,
            size,
            scalar_type: ScalarType::F32,
            pad: Some([3, 1]),
        }
    }

    /// Number of meaningful components, padding excluded.
    pub fn num_values(&self) -> usize {
        match self.pad {
            Some([per, count]) => self.num_elements / (per + count) * per,
            None => self.num_elements,
        }
    }
}

/// Returns the layout of a WGSL type, or of the element type of an
/// `array<T>`.
///
/// ```
/// # use curtains::resource::get_buffer_layout;
/// let layout = get_buffer_layout("vec3f").unwrap();
/// assert_eq!((layout.align, layout.size), (16, 12));
/// ```
pub fn get_buffer_layout(wgsl_type: &str) -> Option<BufferLayout> {
    use ScalarType::*;

    let ty = array_element_type(wgsl_type).unwrap_or(wgsl_type);

    let layout = match ty {
        "f32" => BufferLayout::new(1, 4, 4, F32),
        "i32" => BufferLayout::new(1, 4, 4, I32),
        "u32" => BufferLayout::new(1, 4, 4, U32),

        "vec2f" | "vec2<f32>" => BufferLayout::new(2, 8, 8, F32),
        "vec2i" | "vec2<i32>" => BufferLayout::new(2, 8, 8, I32),
        "vec2u" | "vec2<u32>" => BufferLayout::new(2, 8, 8, U32),

        "vec3f" | "vec3<f32>" => BufferLayout::new(3, 16, 12, F32),
        "vec3i" | "vec3<i32>" => BufferLayout::new(3, 16, 12, I32),
        "vec3u" | "vec3<u32>" => BufferLayout::new(3, 16, 12, U32),

        "vec4f" | "vec4<f32>" => BufferLayout::new(4, 16, 16, F32),
        "vec4i" | "vec4<i32>" => BufferLayout::new(4, 16, 16, I32),
        "vec4u" | "vec4<u32>" => BufferLayout::new(4, 16, 16, U32),

        "mat2x2f" | "mat2x2<f32>" => BufferLayout::new(4, 8, 16, F32),
        "mat3x2f" | "mat3x2<f32>" => BufferLayout::new(6, 8, 24, F32),
        "mat4x2f" | "mat4x2<f32>" => BufferLayout::new(8, 8, 32, F32),

        "mat2x3f" | "mat2x3<f32>" => BufferLayout::padded(8, 16, 32),
        "mat3x3f" | "mat3x3<f32>" => BufferLayout::padded(12, 16, 48),
        "mat4x3f" | "mat4x3<f32>" => BufferLayout::padded(16, 16, 64),

        "mat2x4f" | "mat2x4<f32>" => BufferLayout::new(8, 16, 32, F32),
        "mat3x4f" | "mat3x4<f32>" => BufferLayout::new(12, 16, 48, F32),
        "mat4x4f" | "mat4x4<f32>" => BufferLayout::new(16, 16, 64, F32),

        _ => return None,
    };

    Some(layout)
}

/// Returns `T` if `wgsl_type` is `array<T>` or `array<T, N>`.
pub fn array_element_type(wgsl_type: &str) -> Option<&str> {
    let inner = wgsl_type.strip_prefix("array<")?.strip_suffix('>')?;

    match inner.rfind(',') {
        Some(comma) if !inner[comma..].contains('>') => Some(inner[..comma].trim()),
        _ => Some(inner.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_is_16_aligned() {
        let layout = get_buffer_layout("vec3f").unwrap();
        assert_eq!(layout.align, 16);
        assert_eq!(layout.size, 12);
        assert_eq!(layout.num_elements, 3);
    }

    #[test]
    fn padded_matrices() {
        let mat3 = get_buffer_layout("mat3x3f").unwrap();
        assert_eq!(mat3.size, 48);
        assert_eq!(mat3.pad, Some([3, 1]));
        assert_eq!(mat3.num_values(), 9);

        let mat4 = get_buffer_layout("mat4x4f").unwrap();
        assert_eq!(mat4.pad, None);
        assert_eq!(mat4.num_values(), 16);
    }

    #[test]
    fn arrays_use_element_layout() {
        assert_eq!(array_element_type("array<vec4f>"), Some("vec4f"));
        assert_eq!(array_element_type("array<f32, 12>"), Some("f32"));
        assert_eq!(array_element_type("array<vec3<f32>>"), Some("vec3<f32>"));
        assert_eq!(get_buffer_layout("array<u32>").unwrap().scalar_type, ScalarType::U32);
        assert_eq!(array_element_type("vec4f"), None);
    }

    #[test]
    fn unknown_types() {
        assert!(get_buffer_layout("f16").is_none());
        assert!(get_buffer_layout("sampler").is_none());
    }
}
