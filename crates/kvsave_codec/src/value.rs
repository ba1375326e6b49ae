//! Typed save values.

use std::collections::HashMap;
use std::fmt;

/// The entries of one group: key to typed value.
pub type Entries = HashMap<String, TypedValue>;

/// Stable numeric tag identifying a [`TypedValue`] variant.
///
/// Tags are persisted by every serializer. Never renumber them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// 32-bit float.
    Float = 1,
    /// UTF-8 string.
    String = 2,
    /// 32-bit signed integer.
    Int = 3,
}

impl ValueType {
    /// Returns the persisted tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Resolves a persisted tag.
    #[must_use]
    pub const fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(Self::Float),
            2 => Some(Self::String),
            3 => Some(Self::Int),
            _ => None,
        }
    }

    /// Human readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::String => "string",
            Self::Int => "int",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single stored value.
///
/// Holds exactly one primitive. Reading with the wrong type is not an
/// error; [`TypedValue::get`] degrades to the caller's default.
#[derive(Debug, Clone)]
pub enum TypedValue {
    /// 32-bit float.
    Float(f32),
    /// UTF-8 string.
    String(String),
    /// 32-bit signed integer.
    Int(i32),
}

impl TypedValue {
    /// Returns the variant tag.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
        }
    }

    /// Replaces this value.
    ///
    /// Returns `false` without touching anything when `value` has the same
    /// type and content, so callers can skip marking their group dirty.
    pub fn set(&mut self, value: TypedValue) -> bool {
        if *self == value {
            return false;
        }
        match (self, value) {
            (Self::String(current), Self::String(new)) => *current = new,
            (Self::Float(current), Self::Float(new)) => *current = new,
            (Self::Int(current), Self::Int(new)) => *current = new,
            (slot, new) => *slot = new,
        }
        true
    }

    /// Returns the stored value if it is a `T`, otherwise `default`.
    pub fn get<T: FromTypedValue>(&self, default: T) -> T {
        T::from_typed(self).unwrap_or(default)
    }

    /// Returns the float payload, if this is a float.
    #[must_use]
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

// Floats compare by bit pattern so a NaN re-set with the same bits is a no-op
// and `Eq` stays lawful.
impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypedValue {}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

/// Types that can be read back out of a [`TypedValue`].
pub trait FromTypedValue: Sized {
    /// Extracts `Self` if the variant matches.
    fn from_typed(value: &TypedValue) -> Option<Self>;
}

impl FromTypedValue for i32 {
    fn from_typed(value: &TypedValue) -> Option<Self> {
        value.as_int()
    }
}

impl FromTypedValue for f32 {
    fn from_typed(value: &TypedValue) -> Option<Self> {
        value.as_float()
    }
}

impl FromTypedValue for String {
    fn from_typed(value: &TypedValue) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromTypedValue for TypedValue {
    fn from_typed(value: &TypedValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for TypedValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(ValueType::Float.tag(), 1);
        assert_eq!(ValueType::String.tag(), 2);
        assert_eq!(ValueType::Int.tag(), 3);
        assert_eq!(ValueType::from_tag(3), Some(ValueType::Int));
        assert_eq!(ValueType::from_tag(0), None);
        assert_eq!(ValueType::from_tag(4), None);
    }

    #[test]
    fn set_same_value_is_noop() {
        let mut value = TypedValue::from(100);
        assert!(!value.set(TypedValue::Int(100)));
        assert!(value.set(TypedValue::Int(101)));
        assert_eq!(value, TypedValue::Int(101));
    }

    #[test]
    fn set_different_type_replaces_entry() {
        let mut value = TypedValue::from(1);
        assert!(value.set(TypedValue::from("one")));
        assert_eq!(value.value_type(), ValueType::String);
        assert_eq!(value.as_str(), Some("one"));
    }

    #[test]
    fn nan_is_equal_to_itself() {
        let mut value = TypedValue::Float(f32::NAN);
        assert!(!value.set(TypedValue::Float(f32::NAN)));
        assert_ne!(TypedValue::Float(0.0), TypedValue::Float(-0.0));
    }

    #[test]
    fn get_with_wrong_type_returns_default() {
        let value = TypedValue::from("Ada");
        assert_eq!(value.get(0i32), 0);
        assert_eq!(value.get(1.5f32), 1.5);
        assert_eq!(value.get(String::new()), "Ada");
    }

    #[test]
    fn display() {
        assert_eq!(TypedValue::Int(-3).to_string(), "-3");
        assert_eq!(TypedValue::from("x").to_string(), "\"x\"");
        assert_eq!(ValueType::Float.to_string(), "float");
    }
}
