//! Placement of struct fields inside a buffer binding.
//!
//! Buffers are addressed as rows of 16 bytes, the largest WGSL alignment.
//! Each field is placed at the first position at or after the cursor that
//! honors its alignment, and is pushed to the next row when a field smaller
//! than a row would straddle two rows. Arrays are laid out with their WGSL
//! stride, and several arrays sharing the same element count are packed into
//! a single interleaved array of structs.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::resource::{array_element_type, get_buffer_layout, BufferLayout, InputValue};
use crate::utils::{align_to, throw_warning, to_camel_case};

/// Bytes per buffer row.
pub const BYTES_PER_ROW: usize = 16;

/// A byte position expressed as a row and a byte inside that row.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub row: usize,
    pub byte: usize,
}

impl Position {
    pub fn from_offset(offset: usize) -> Self {
        Position {
            row: offset / BYTES_PER_ROW,
            byte: offset % BYTES_PER_ROW,
        }
    }

    pub fn offset(&self) -> usize {
        self.row * BYTES_PER_ROW + self.byte
    }
}

/// First and last byte (inclusive) occupied by an element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Alignment {
    pub start: Position,
    pub end: Position,
}

impl Alignment {
    /// Places `size` bytes aligned on `align` at the first valid position at
    /// or after `offset`.
    pub fn place(offset: usize, align: usize, size: usize) -> Self {
        let mut start = align_to(offset, align);

        if size <= BYTES_PER_ROW && start % BYTES_PER_ROW + size > BYTES_PER_ROW {
            start = align_to(start, BYTES_PER_ROW);
        }

        Alignment::spanning(start, size)
    }

    /// An alignment covering `size` bytes from `start`.
    pub fn spanning(start: usize, size: usize) -> Self {
        Alignment {
            start: Position::from_offset(start),
            end: Position::from_offset(start + size.max(1) - 1),
        }
    }

    /// Size of the buffer needed to hold everything up to the end of this
    /// element, rounded to whole rows.
    pub fn padded_byte_count(&self) -> usize {
        (self.end.row + 1) * BYTES_PER_ROW
    }
}

/// Writes `values` as consecutive components at `offset`, skipping padding
/// components and stopping at the layout capacity.
fn write_components(data: &mut [u8], offset: usize, layout: &BufferLayout, values: &[f64]) {
    for (i, value) in values.iter().take(layout.num_values()).enumerate() {
        let slot = match layout.pad {
            Some([per, count]) => (i / per) * (per + count) + i % per,
            None => i,
        };
        let at = offset + slot * 4;

        if let Some(bytes) = data.get_mut(at..at + 4) {
            bytes.copy_from_slice(&layout.scalar_type.encode(*value));
        }
    }
}

fn read_components(data: &[u8], offset: usize, layout: &BufferLayout) -> Vec<f64> {
    (0..layout.num_values())
        .filter_map(|i| {
            let slot = match layout.pad {
                Some([per, count]) => (i / per) * (per + count) + i % per,
                None => i,
            };
            let at = offset + slot * 4;
            let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
            Some(layout.scalar_type.decode(bytes))
        })
        .collect()
}

fn is_vector(ty: &str) -> bool {
    ty.starts_with("vec")
}

/// Converts a value to the components expected by a field of type `ty`, or
/// `None` if the value cannot be coerced.
fn coerce(ty: &str, layout: &BufferLayout, value: &InputValue) -> Option<Vec<f64>> {
    if value.is_scalar() && layout.num_values() != 1 {
        return None;
    }

    let mut components = value.components();

    if is_vector(ty) && components.len() < layout.num_values() {
        components.resize(layout.num_values(), 0.0);
    }

    Some(components)
}

fn warn_uncoercible(name: &str, ty: &str, value: &InputValue) {
    let _ = throw_warning(format!(
        "curtains: cannot write {} into `{}` of type `{}`, skipping",
        value, name, ty
    ));
}

/// A single struct field.
#[derive(Clone, Debug)]
pub struct BufferElement {
    /// Field name in WGSL.
    pub name: String,
    /// Key of the input feeding this field.
    pub key: String,
    /// WGSL type.
    pub ty: String,
    pub layout: BufferLayout,
    pub alignment: Alignment,
}

impl BufferElement {
    pub fn new(key: &str, ty: &str) -> Result<Self> {
        let layout =
            get_buffer_layout(ty).ok_or_else(|| Error::UnknownWgslType(ty.to_string()))?;

        Ok(BufferElement {
            name: to_camel_case(key),
            key: key.to_string(),
            ty: ty.to_string(),
            layout,
            alignment: Alignment::default(),
        })
    }

    /// Positions the element at the first valid place at or after `offset`.
    pub fn set_alignment(&mut self, offset: usize) {
        self.alignment = Alignment::place(offset, self.layout.align, self.layout.size);
    }

    pub fn start_offset(&self) -> usize {
        self.alignment.start.offset()
    }

    pub fn end_offset(&self) -> usize {
        self.alignment.end.offset()
    }

    /// Serializes `value` into `data`. Returns `false` if the value was
    /// skipped because it cannot be coerced to this field's type.
    pub fn update(&self, data: &mut [u8], value: &InputValue) -> bool {
        match coerce(&self.ty, &self.layout, value) {
            Some(components) => {
                write_components(data, self.start_offset(), &self.layout, &components);
                true
            }
            None => {
                warn_uncoercible(&self.name, &self.ty, value);
                false
            }
        }
    }

    /// Reads the field back, padding excluded.
    pub fn extract(&self, data: &[u8]) -> Vec<f64> {
        read_components(data, self.start_offset(), &self.layout)
    }
}

/// An array field.
#[derive(Clone, Debug)]
pub struct BufferArrayElement {
    pub element: BufferElement,
    /// Number of components of the input array.
    pub array_length: usize,
    /// Number of array items.
    pub num_elements: usize,
    /// Distance between two consecutive array items, in bytes.
    pub array_stride: usize,
}

impl BufferArrayElement {
    pub fn new(key: &str, ty: &str, array_length: usize) -> Result<Self> {
        let element = BufferElement::new(key, ty)?;
        let per_item = element.layout.num_values().max(1);
        let array_stride = align_to(element.layout.size, element.layout.align);

        Ok(BufferArrayElement {
            element,
            array_length,
            num_elements: array_length.div_ceil(per_item).max(1),
            array_stride,
        })
    }

    pub fn set_alignment(&mut self, offset: usize) {
        let layout = &self.element.layout;
        let start = Alignment::place(offset, layout.align, layout.size)
            .start
            .offset();
        self.element.alignment = Alignment::spanning(start, self.array_stride * self.num_elements);
    }

    pub fn update(&self, data: &mut [u8], value: &InputValue) -> bool {
        if value.is_scalar() {
            warn_uncoercible(&self.element.name, &self.element.ty, value);
            return false;
        }

        let layout = &self.element.layout;
        let components = value.components();
        let start = self.element.start_offset();

        for (i, item) in components
            .chunks(layout.num_values().max(1))
            .take(self.num_elements)
            .enumerate()
        {
            write_components(data, start + i * self.array_stride, layout, item);
        }

        true
    }

    pub fn extract(&self, data: &[u8]) -> Vec<f64> {
        let start = self.element.start_offset();

        (0..self.num_elements)
            .flat_map(|i| {
                read_components(data, start + i * self.array_stride, &self.element.layout)
            })
            .take(self.array_length)
            .collect()
    }
}

/// One field of an interleaved array item.
#[derive(Clone, Debug)]
pub struct InterleavedField {
    pub name: String,
    pub key: String,
    /// WGSL type of one item, e.g. `vec3f` for an `array<vec3f>` input.
    pub ty: String,
    pub layout: BufferLayout,
    /// Offset of the field inside one array item.
    pub offset: usize,
}

/// Several arrays of the same length packed as one array of structs.
#[derive(Clone, Debug)]
pub struct BufferInterleavedArrayElement {
    /// Field name of the array in the parent struct.
    pub name: String,
    /// Name of the WGSL struct describing one item.
    pub item_struct_name: String,
    pub fields: Vec<InterleavedField>,
    pub num_elements: usize,
    /// Natural WGSL size of one item.
    pub item_size: usize,
    pub array_stride: usize,
    pub alignment: Alignment,
}

impl BufferInterleavedArrayElement {
    /// `inputs` are `(key, array type, component count)` triples.
    pub fn new(struct_name: &str, inputs: &[(&str, &str, usize)]) -> Result<Self> {
        let mut fields = Vec::with_capacity(inputs.len());
        let mut cursor = 0;
        let mut item_align = 4;
        let mut num_elements = 0;

        for (key, ty, len) in inputs {
            let item_ty = array_element_type(ty).unwrap_or(ty);
            let layout =
                get_buffer_layout(item_ty).ok_or_else(|| Error::UnknownWgslType(ty.to_string()))?;
            let alignment = Alignment::place(cursor, layout.align, layout.size);

            num_elements = len.div_ceil(layout.num_values().max(1));
            item_align = item_align.max(layout.align);
            cursor = alignment.start.offset() + layout.size;

            fields.push(InterleavedField {
                name: to_camel_case(key),
                key: key.to_string(),
                ty: item_ty.to_string(),
                layout,
                offset: alignment.start.offset(),
            });
        }

        Ok(BufferInterleavedArrayElement {
            name: "elements".to_string(),
            item_struct_name: format!("{}Element", struct_name),
            fields,
            num_elements: num_elements.max(1),
            item_size: align_to(cursor, item_align),
            array_stride: align_to(cursor, BYTES_PER_ROW),
            alignment: Alignment::default(),
        })
    }

    /// Interleaved arrays always start on a fresh row.
    pub fn set_alignment(&mut self, offset: usize) {
        let start = align_to(offset, BYTES_PER_ROW);
        self.alignment = Alignment::spanning(start, self.array_stride * self.num_elements);
    }

    pub fn field(&self, key: &str) -> Option<&InterleavedField> {
        self.fields.iter().find(|field| field.key == key)
    }

    pub fn update(&self, data: &mut [u8], key: &str, value: &InputValue) -> bool {
        let Some(field) = self.field(key) else {
            return false;
        };

        if value.is_scalar() {
            warn_uncoercible(&field.name, &field.ty, value);
            return false;
        }

        let start = self.alignment.start.offset();
        let components = value.components();

        for (i, item) in components
            .chunks(field.layout.num_values().max(1))
            .take(self.num_elements)
            .enumerate()
        {
            write_components(
                data,
                start + i * self.array_stride + field.offset,
                &field.layout,
                item,
            );
        }

        true
    }

    pub fn extract(&self, data: &[u8], key: &str) -> Vec<f64> {
        let Some(field) = self.field(key) else {
            return Vec::new();
        };
        let start = self.alignment.start.offset();

        (0..self.num_elements)
            .flat_map(|i| {
                let offset = start + i * self.array_stride + field.offset;
                read_components(data, offset, &field.layout)
            })
            .collect()
    }
}

/// Any element of a buffer binding struct.
#[derive(Clone, Debug)]
pub enum Element {
    Single(BufferElement),
    Array(BufferArrayElement),
    Interleaved(BufferInterleavedArrayElement),
}

impl Element {
    pub fn alignment(&self) -> Alignment {
        match self {
            Element::Single(e) => e.alignment,
            Element::Array(e) => e.element.alignment,
            Element::Interleaved(e) => e.alignment,
        }
    }

    pub fn set_alignment(&mut self, offset: usize) {
        match self {
            Element::Single(e) => e.set_alignment(offset),
            Element::Array(e) => e.set_alignment(offset),
            Element::Interleaved(e) => e.set_alignment(offset),
        }
    }

    pub fn start_offset(&self) -> usize {
        self.alignment().start.offset()
    }

    pub fn end_offset(&self) -> usize {
        self.alignment().end.offset()
    }

    pub fn padded_byte_count(&self) -> usize {
        self.alignment().padded_byte_count()
    }

    /// `true` if this element is fed by the input named `key`.
    pub fn has_key(&self, key: &str) -> bool {
        match self {
            Element::Single(e) => e.key == key,
            Element::Array(e) => e.element.key == key,
            Element::Interleaved(e) => e.field(key).is_some(),
        }
    }

    /// Writes the input `key` into `data`.
    pub fn update(&self, data: &mut [u8], key: &str, value: &InputValue) -> bool {
        match self {
            Element::Single(e) => e.update(data, value),
            Element::Array(e) => e.update(data, value),
            Element::Interleaved(e) => e.update(data, key, value),
        }
    }

    /// Reads the input `key` back from `data`.
    pub fn extract(&self, data: &[u8], key: &str) -> Vec<f64> {
        match self {
            Element::Single(e) => e.extract(data),
            Element::Array(e) => e.extract(data),
            Element::Interleaved(e) => e.extract(data, key),
        }
    }
}

/// Description of one input when computing a [`StructLayout`].
#[derive(Copy, Clone, Debug)]
pub struct FieldDescriptor<'a> {
    pub key: &'a str,
    pub ty: &'a str,
    /// Number of components of the input value.
    pub len: usize,
}

/// The computed layout of a whole buffer binding.
#[derive(Clone, Debug, Default)]
pub struct StructLayout {
    pub elements: Vec<Element>,
    /// Size of the CPU mirror and of the GPU buffer.
    pub array_buffer_size: usize,
    /// Keys of the inputs dropped because their arrays could not be packed.
    pub dropped_keys: Vec<String>,
}

impl StructLayout {
    /// Cache key identifying layouts computed from identical fields.
    pub fn cache_key(fields: &[FieldDescriptor]) -> String {
        fields
            .iter()
            .map(|f| {
                if array_element_type(f.ty).is_some() {
                    format!("{}:{}[{}],", f.key, f.ty, f.len)
                } else {
                    format!("{}:{},", f.key, f.ty)
                }
            })
            .collect()
    }

    /// Lays out `fields`: plain fields first in declaration order, then
    /// arrays.
    ///
    /// In a `uniform` struct a lone array whose stride is not a whole row is
    /// laid out as an interleaved array of one field, padded to 16 bytes.
    pub fn new(struct_name: &str, fields: &[FieldDescriptor], uniform: bool) -> Result<Self> {
        let (arrays, singles): (Vec<&FieldDescriptor>, Vec<&FieldDescriptor>) = fields
            .iter()
            .partition(|f| array_element_type(f.ty).is_some());

        let mut elements = Vec::with_capacity(fields.len());
        let mut dropped_keys = Vec::new();

        for field in singles {
            elements.push(Element::Single(BufferElement::new(field.key, field.ty)?));
        }

        match arrays.as_slice() {
            [] => {}
            [array] => {
                let element = BufferArrayElement::new(array.key, array.ty, array.len)?;
                if uniform && element.array_stride % BYTES_PER_ROW != 0 {
                    elements.push(Element::Interleaved(BufferInterleavedArrayElement::new(
                        struct_name,
                        &[(array.key, array.ty, array.len)],
                    )?));
                } else {
                    elements.push(Element::Array(element));
                }
            }
            _ => {
                let counts: Vec<usize> = arrays
                    .iter()
                    .map(|f| {
                        let per_item = get_buffer_layout(f.ty)
                            .map(|l| l.num_values())
                            .unwrap_or(1)
                            .max(1);
                        f.len.div_ceil(per_item)
                    })
                    .collect();

                if counts.windows(2).all(|w| w[0] == w[1]) {
                    let inputs: Vec<_> = arrays.iter().map(|f| (f.key, f.ty, f.len)).collect();
                    elements.push(Element::Interleaved(BufferInterleavedArrayElement::new(
                        struct_name,
                        &inputs,
                    )?));
                } else {
                    let _ = throw_warning(format!(
                        "curtains: `{}` holds arrays of different lengths ({:?}), \
                         they are dropped from the struct",
                        struct_name, counts
                    ));
                    dropped_keys.extend(arrays.iter().map(|f| f.key.to_string()));
                }
            }
        }

        let mut cursor = 0;
        for element in &mut elements {
            element.set_alignment(cursor);
            cursor = element.end_offset() + 1;
        }

        let array_buffer_size = elements.last().map_or(0, Element::padded_byte_count);

        Ok(StructLayout {
            elements,
            array_buffer_size,
            dropped_keys,
        })
    }

    /// Returns the layout cached in `cache` for these fields, computing and
    /// caching it on a miss.
    pub fn get_or_create(
        struct_name: &str,
        fields: &[FieldDescriptor],
        uniform: bool,
        cache: &mut HashMap<String, Rc<StructLayout>>,
    ) -> Result<Rc<StructLayout>> {
        let key = format!("{}|{}|{}", struct_name, uniform, Self::cache_key(fields));

        if let Some(layout) = cache.get(&key) {
            return Ok(layout.clone());
        }

        let layout = Rc::new(Self::new(struct_name, fields, uniform)?);
        let _ = cache.insert(key, layout.clone());
        Ok(layout)
    }

    pub fn element(&self, key: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.has_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glamx::{Mat3, Vec3};

    fn field<'a>(key: &'a str, ty: &'a str, len: usize) -> FieldDescriptor<'a> {
        FieldDescriptor { key, ty, len }
    }

    fn floats(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn vec3_then_f32_share_a_row() {
        let layout = StructLayout::new(
            "Params",
            &[field("color", "vec3f", 3), field("intensity", "f32", 1)],
            false,
        )
        .unwrap();

        assert_eq!(layout.elements[0].start_offset(), 0);
        assert_eq!(layout.elements[1].start_offset(), 12);
        assert_eq!(layout.array_buffer_size, 16);
    }

    #[test]
    fn small_fields_do_not_straddle_rows() {
        let layout = StructLayout::new(
            "Params",
            &[
                field("a", "f32", 1),
                field("b", "vec2f", 2),
                field("c", "vec2f", 2),
                field("d", "vec3f", 3),
                field("e", "vec4f", 4),
            ],
            false,
        )
        .unwrap();

        let offsets: Vec<_> = layout.elements.iter().map(Element::start_offset).collect();
        assert_eq!(offsets, vec![0, 8, 16, 32, 48]);
        assert_eq!(layout.array_buffer_size, 64);
    }

    #[test]
    fn scalar_after_vec3_is_packed_after_the_vector() {
        let mut first = BufferElement::new("position", "vec3f").unwrap();
        first.set_alignment(4);
        assert_eq!(first.start_offset(), 16);
        assert_eq!(first.end_offset(), 27);

        let mut second = BufferElement::new("size", "f32").unwrap();
        second.set_alignment(first.end_offset() + 1);
        assert_eq!(second.start_offset(), 28);
    }

    #[test]
    fn mat3_is_written_with_padding() {
        let element = {
            let mut e = BufferElement::new("normal", "mat3x3f").unwrap();
            e.set_alignment(0);
            e
        };
        let mut data = vec![0u8; 48];

        let m = Mat3::from_cols(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(4.0, 5.0, 6.0),
            Vec3::new(7.0, 8.0, 9.0),
        );
        assert!(element.update(&mut data, &InputValue::Mat3(m)));

        assert_eq!(
            floats(&data),
            vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0]
        );
        assert_eq!(
            element.extract(&data),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]
        );
    }

    #[test]
    fn vec2_from_short_array_defaults_missing_components() {
        let mut element = BufferElement::new("offset", "vec2f").unwrap();
        element.set_alignment(0);
        let mut data = vec![0xff; 16];

        assert!(element.update(&mut data, &InputValue::Array(vec![3.0])));
        assert_eq!(element.extract(&data), vec![3.0, 0.0]);
    }

    #[test]
    fn uncoercible_values_are_skipped() {
        let mut element = BufferElement::new("color", "vec4f").unwrap();
        element.set_alignment(0);
        let mut data = vec![0u8; 16];

        assert!(!element.update(&mut data, &InputValue::Float(1.0)));
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn array_stride_follows_element_alignment() {
        let mut element = BufferArrayElement::new("points", "array<vec3f>", 6).unwrap();
        element.set_alignment(0);

        assert_eq!(element.num_elements, 2);
        assert_eq!(element.array_stride, 16);
        assert_eq!(element.element.end_offset(), 31);

        let mut data = vec![0u8; 32];
        assert!(element.update(
            &mut data,
            &InputValue::Array(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        ));
        assert_eq!(floats(&data), vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]);
        assert_eq!(element.extract(&data), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn equal_length_arrays_are_interleaved() {
        let layout = StructLayout::new(
            "Particles",
            &[
                field("time", "f32", 1),
                field("position", "array<vec3f>", 6),
                field("size", "array<f32>", 2),
            ],
            false,
        )
        .unwrap();

        assert_eq!(layout.elements.len(), 2);
        let Element::Interleaved(interleaved) = &layout.elements[1] else {
            panic!("expected an interleaved element");
        };

        assert_eq!(interleaved.item_struct_name, "ParticlesElement");
        assert_eq!(interleaved.fields[0].offset, 0);
        assert_eq!(interleaved.fields[1].offset, 12);
        assert_eq!(interleaved.array_stride, 16);
        assert_eq!(interleaved.alignment.start.offset(), 16);
        assert_eq!(layout.array_buffer_size, 48);

        let mut data = vec![0u8; layout.array_buffer_size];
        assert!(layout.elements[1].update(&mut data, "size", &InputValue::Array(vec![0.5, 0.25])));
        let floats = floats(&data);
        assert_eq!(floats[7], 0.5);
        assert_eq!(floats[11], 0.25);
    }

    #[test]
    fn mismatched_arrays_are_dropped() {
        let layout = StructLayout::new(
            "Broken",
            &[
                field("scale", "f32", 1),
                field("a", "array<f32>", 4),
                field("b", "array<vec2f>", 2),
            ],
            false,
        )
        .unwrap();

        assert_eq!(layout.elements.len(), 1);
        assert_eq!(layout.dropped_keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(layout.array_buffer_size, 16);
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(matches!(
            StructLayout::new("Oops", &[field("x", "f64", 1)], false),
            Err(Error::UnknownWgslType(_))
        ));
    }
}
