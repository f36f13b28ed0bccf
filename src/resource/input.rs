//! Values fed to buffer bindings.

use glamx::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use std::fmt;

/// A value that can be written into a buffer binding.
#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Quat(Quat),
    Mat3(Mat3),
    Mat4(Mat4),
    Array(Vec<f32>),
    IntArray(Vec<i32>),
    UIntArray(Vec<u32>),
}

impl InputValue {
    /// `true` for single numbers.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            InputValue::Float(_) | InputValue::Int(_) | InputValue::UInt(_)
        )
    }

    /// `true` for raw arrays.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            InputValue::Array(_) | InputValue::IntArray(_) | InputValue::UIntArray(_)
        )
    }

    /// Every component of the value, matrices in column-major order.
    pub fn components(&self) -> Vec<f64> {
        match self {
            InputValue::Float(x) => vec![*x as f64],
            InputValue::Int(x) => vec![*x as f64],
            InputValue::UInt(x) => vec![*x as f64],
            InputValue::Vec2(v) => v.to_array().iter().map(|x| *x as f64).collect(),
            InputValue::Vec3(v) => v.to_array().iter().map(|x| *x as f64).collect(),
            InputValue::Vec4(v) => v.to_array().iter().map(|x| *x as f64).collect(),
            InputValue::Quat(q) => q.to_array().iter().map(|x| *x as f64).collect(),
            InputValue::Mat3(m) => m.to_cols_array().iter().map(|x| *x as f64).collect(),
            InputValue::Mat4(m) => m.to_cols_array().iter().map(|x| *x as f64).collect(),
            InputValue::Array(a) => a.iter().map(|x| *x as f64).collect(),
            InputValue::IntArray(a) => a.iter().map(|x| *x as f64).collect(),
            InputValue::UIntArray(a) => a.iter().map(|x| *x as f64).collect(),
        }
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        match self {
            InputValue::Float(_) | InputValue::Int(_) | InputValue::UInt(_) => 1,
            InputValue::Vec2(_) => 2,
            InputValue::Vec3(_) => 3,
            InputValue::Vec4(_) | InputValue::Quat(_) => 4,
            InputValue::Mat3(_) => 9,
            InputValue::Mat4(_) => 16,
            InputValue::Array(a) => a.len(),
            InputValue::IntArray(a) => a.len(),
            InputValue::UIntArray(a) => a.len(),
        }
    }

    /// `true` for empty arrays.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            InputValue::Float(_) => "f32",
            InputValue::Int(_) => "i32",
            InputValue::UInt(_) => "u32",
            InputValue::Vec2(_) => "Vec2",
            InputValue::Vec3(_) => "Vec3",
            InputValue::Vec4(_) => "Vec4",
            InputValue::Quat(_) => "Quat",
            InputValue::Mat3(_) => "Mat3",
            InputValue::Mat4(_) => "Mat4",
            InputValue::Array(_) => "[f32]",
            InputValue::IntArray(_) => "[i32]",
            InputValue::UIntArray(_) => "[u32]",
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} components)", self.kind(), self.len())
    }
}

macro_rules! input_from {
    ($($ty: ty => $variant: ident;)*) => {$(
        impl From<$ty> for InputValue {
            fn from(value: $ty) -> Self {
                InputValue::$variant(value)
            }
        }
    )*};
}

input_from! {
    f32 => Float;
    i32 => Int;
    u32 => UInt;
    Vec2 => Vec2;
    Vec3 => Vec3;
    Vec4 => Vec4;
    Quat => Quat;
    Mat3 => Mat3;
    Mat4 => Mat4;
    Vec<f32> => Array;
    Vec<i32> => IntArray;
    Vec<u32> => UIntArray;
}

impl From<&[f32]> for InputValue {
    fn from(value: &[f32]) -> Self {
        InputValue::Array(value.to_vec())
    }
}

/// Hook run right before a dirty input is written to its buffer.
pub type OnBeforeUpdate = Box<dyn FnMut(&mut InputValue)>;

/// A named, typed input of a buffer binding.
///
/// Every mutation goes through [`BufferInput::set_value`] or
/// [`BufferInput::modify`], which flag the input as dirty.
pub struct BufferInput {
    pub name: String,
    /// WGSL type of the input, e.g. `vec3f` or `array<f32>`.
    pub ty: String,
    value: InputValue,
    should_update: bool,
    on_before_update: Option<OnBeforeUpdate>,
}

impl BufferInput {
    /// Creates a new input. Inputs start dirty so that their initial value
    /// reaches the GPU.
    pub fn new(
        name: impl Into<String>,
        ty: impl Into<String>,
        value: impl Into<InputValue>,
    ) -> Self {
        BufferInput {
            name: name.into(),
            ty: ty.into(),
            value: value.into(),
            should_update: true,
            on_before_update: None,
        }
    }

    /// Sets the hook run before each upload.
    pub fn with_on_before_update(mut self, hook: impl FnMut(&mut InputValue) + 'static) -> Self {
        self.on_before_update = Some(Box::new(hook));
        self
    }

    /// The current value.
    pub fn value(&self) -> &InputValue {
        &self.value
    }

    /// Replaces the value and flags the input as dirty.
    pub fn set_value(&mut self, value: impl Into<InputValue>) {
        self.value = value.into();
        self.should_update = true;
    }

    /// Mutates the value in place and flags the input as dirty.
    ///
    /// ```
    /// # use curtains::resource::{BufferInput, InputValue};
    /// # use glamx::Vec3;
    /// let mut input = BufferInput::new("color", "vec3f", Vec3::ZERO);
    /// input.modify(|value| {
    ///     if let InputValue::Vec3(v) = value {
    ///         v.x = 1.0;
    ///     }
    /// });
    /// assert!(input.should_update());
    /// ```
    pub fn modify(&mut self, f: impl FnOnce(&mut InputValue)) {
        f(&mut self.value);
        self.should_update = true;
    }

    /// `true` if the value changed since the last upload.
    pub fn should_update(&self) -> bool {
        self.should_update
    }

    /// Flags the input as dirty without changing its value.
    pub fn mark_dirty(&mut self) {
        self.should_update = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.should_update = false;
    }

    pub(crate) fn run_on_before_update(&mut self) {
        if let Some(hook) = &mut self.on_before_update {
            hook(&mut self.value);
        }
    }
}

impl fmt::Debug for BufferInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferInput")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("value", &self.value)
            .field("should_update", &self.should_update)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_dirty_the_input() {
        let mut input = BufferInput::new("intensity", "f32", 1.0_f32);
        input.clear_dirty();
        assert!(!input.should_update());

        input.set_value(2.0_f32);
        assert!(input.should_update());
        assert_eq!(input.value(), &InputValue::Float(2.0));
    }

    #[test]
    fn matrix_components_are_column_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let components = InputValue::Mat4(m).components();
        assert_eq!(&components[12..15], &[1.0, 2.0, 3.0]);
    }
}
