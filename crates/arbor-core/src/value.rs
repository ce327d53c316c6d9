//! Property payloads.
//!
//! [`Value`] is the closed set of things a dependency property can hold.
//! Primitive payloads are copied; [`Value::Object`] shares the referenced
//! node, so the node stays reachable for as long as its longest holder.
//! Storing an object value inside a [`DependencyObject`] additionally takes a
//! logical reference on it (see [`DependencyObject::ref_`]).
//!
//! # Example
//!
//! ```
//! use arbor_core::{Value, ValueKind};
//!
//! let opacity = Value::from(0.5);
//! assert_eq!(opacity.kind(), Some(ValueKind::Double));
//! assert_eq!(opacity.as_f64().unwrap(), 0.5);
//! assert!(opacity.as_bool().is_err());
//! ```

use std::fmt;
use std::sync::Arc;

use crate::collection::Collection;
use crate::dependency_object::DependencyObject;
use crate::types::TypeKind;

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A 2D size.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    /// Horizontal extent.
    pub width: f64,
    /// Vertical extent.
    pub height: f64,
}

impl Size {
    /// Create a size.
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Horizontal extent.
    pub width: f64,
    /// Vertical extent.
    pub height: f64,
}

impl Rect {
    /// Create a rectangle.
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// An RGBA color with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    /// Red channel.
    pub r: f64,
    /// Green channel.
    pub g: f64,
    /// Blue channel.
    pub b: f64,
    /// Alpha channel.
    pub a: f64,
}

impl Color {
    /// Opaque black.
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    /// Fully transparent black.
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    /// Create a color from its channels.
    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Create a color from packed `0xAARRGGBB`.
    pub fn from_argb(argb: u32) -> Self {
        let channel = |shift: u32| f64::from((argb >> shift) & 0xff) / 255.0;
        Self::new(channel(16), channel(8), channel(0), channel(24))
    }
}

/// The declared kind of a property, or the runtime kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `bool`.
    Bool,
    /// `i32`.
    Int32,
    /// `i64`.
    Int64,
    /// `f64`.
    Double,
    /// Shared string.
    String,
    /// [`Point`].
    Point,
    /// [`Size`].
    Size,
    /// [`Rect`].
    Rect,
    /// [`Color`].
    Color,
    /// Integer-backed enumeration.
    Enum,
    /// Reference to a [`DependencyObject`] of the given type or a subclass.
    Object(TypeKind),
}

impl ValueKind {
    /// Whether `Value::Null` is an acceptable value of this kind.
    pub fn is_nullable(self) -> bool {
        matches!(self, Self::String | Self::Object(_))
    }

    /// Whether this kind holds shared references to graph nodes.
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// The value a property of this kind defaults to when none is given.
    pub fn zero_value(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int32 => Value::Int32(0),
            Self::Int64 => Value::Int64(0),
            Self::Double => Value::Double(0.0),
            Self::Point => Value::Point(Point::default()),
            Self::Size => Value::Size(Size::default()),
            Self::Rect => Value::Rect(Rect::default()),
            Self::Color => Value::Color(Color::default()),
            Self::Enum => Value::Enum(0),
            Self::String | Self::Object(_) => Value::Null,
        }
    }

    /// Check whether `value` may be stored in a property of this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (kind, Value::Null) => kind.is_nullable(),
            (Self::Object(required), Value::Object(obj)) => obj.type_kind().is_subclass_of(required),
            (kind, value) => value.kind() == Some(kind),
        }
    }

    /// Short human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::String => "string",
            Self::Point => "point",
            Self::Size => "size",
            Self::Rect => "rect",
            Self::Color => "color",
            Self::Enum => "enum",
            Self::Object(_) => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(kind) => write!(f, "object<{}>", kind.name()),
            other => f.write_str(other.name()),
        }
    }
}

/// Errors from typed value accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The value holds a different kind than requested.
    #[error("expected {expected} value, got {got}")]
    WrongKind {
        /// The requested kind.
        expected: &'static str,
        /// The kind actually held.
        got: &'static str,
    },
}

/// A property payload.
#[derive(Clone, Default)]
pub enum Value {
    /// No value. Only valid for nullable kinds.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Double-precision float.
    Double(f64),
    /// Shared immutable string.
    String(Arc<str>),
    /// Point.
    Point(Point),
    /// Size.
    Size(Size),
    /// Rectangle.
    Rect(Rect),
    /// Color.
    Color(Color),
    /// Enumeration ordinal.
    Enum(i32),
    /// Shared reference to a graph node (collections included).
    Object(DependencyObject),
}

macro_rules! copy_accessor {
    ($(#[$doc:meta])* $fn:ident, $variant:ident, $ty:ty, $name:literal) => {
        $(#[$doc])*
        pub fn $fn(&self) -> Result<$ty, ValueError> {
            match self {
                Self::$variant(v) => Ok(*v),
                other => Err(other.wrong_kind($name)),
            }
        }
    };
}

impl Value {
    /// The runtime kind, or `None` for [`Value::Null`].
    pub fn kind(&self) -> Option<ValueKind> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Double(_) => ValueKind::Double,
            Self::String(_) => ValueKind::String,
            Self::Point(_) => ValueKind::Point,
            Self::Size(_) => ValueKind::Size,
            Self::Rect(_) => ValueKind::Rect,
            Self::Color(_) => ValueKind::Color,
            Self::Enum(_) => ValueKind::Enum,
            Self::Object(obj) => ValueKind::Object(obj.type_kind()),
        })
    }

    /// Name of the held kind, `"null"` for [`Value::Null`].
    pub fn kind_name(&self) -> &'static str {
        self.kind().map_or("null", ValueKind::name)
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn wrong_kind(&self, expected: &'static str) -> ValueError {
        ValueError::WrongKind {
            expected,
            got: self.kind_name(),
        }
    }

    copy_accessor!(
        /// Read a `bool`.
        as_bool, Bool, bool, "bool"
    );
    copy_accessor!(
        /// Read an `i32`.
        as_i32, Int32, i32, "int32"
    );
    copy_accessor!(
        /// Read an `i64`.
        as_i64, Int64, i64, "int64"
    );
    copy_accessor!(
        /// Read an `f64`.
        as_f64, Double, f64, "double"
    );
    copy_accessor!(
        /// Read a [`Point`].
        as_point, Point, Point, "point"
    );
    copy_accessor!(
        /// Read a [`Size`].
        as_size, Size, Size, "size"
    );
    copy_accessor!(
        /// Read a [`Rect`].
        as_rect, Rect, Rect, "rect"
    );
    copy_accessor!(
        /// Read a [`Color`].
        as_color, Color, Color, "color"
    );
    copy_accessor!(
        /// Read an enumeration ordinal.
        as_enum, Enum, i32, "enum"
    );

    /// Read a string. `Null` is reported as a kind mismatch.
    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(other.wrong_kind("string")),
        }
    }

    /// Read an object reference.
    pub fn as_object(&self) -> Result<&DependencyObject, ValueError> {
        match self {
            Self::Object(obj) => Ok(obj),
            other => Err(other.wrong_kind("object")),
        }
    }

    /// Read an object reference, treating `Null` as `None`.
    pub fn as_object_or_null(&self) -> Result<Option<&DependencyObject>, ValueError> {
        match self {
            Self::Null => Ok(None),
            Self::Object(obj) => Ok(Some(obj)),
            other => Err(other.wrong_kind("object")),
        }
    }

    /// Read a collection reference.
    pub fn as_collection(&self) -> Result<Collection, ValueError> {
        match self {
            Self::Object(obj) => obj.as_collection().ok_or(ValueError::WrongKind {
                expected: "collection",
                got: "object",
            }),
            other => Err(other.wrong_kind("collection")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Point(a), Self::Point(b)) => a == b,
            (Self::Size(a), Self::Size(b)) => a == b,
            (Self::Rect(a), Self::Rect(b)) => a == b,
            (Self::Color(a), Self::Color(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            // Identity, not structural equality.
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int32(v) => write!(f, "Int32({v})"),
            Self::Int64(v) => write!(f, "Int64({v})"),
            Self::Double(v) => write!(f, "Double({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Point(v) => write!(f, "{v:?}"),
            Self::Size(v) => write!(f, "{v:?}"),
            Self::Rect(v) => write!(f, "{v:?}"),
            Self::Color(v) => write!(f, "{v:?}"),
            Self::Enum(v) => write!(f, "Enum({v})"),
            Self::Object(obj) => write!(f, "Object({}#{})", obj.type_name(), obj.id()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Point(p) => write!(f, "{},{}", p.x, p.y),
            Self::Size(s) => write!(f, "{}x{}", s.width, s.height),
            Self::Rect(r) => write!(f, "{},{},{},{}", r.x, r.y, r.width, r.height),
            Self::Color(c) => write!(f, "rgba({},{},{},{})", c.r, c.g, c.b, c.a),
            Self::Enum(v) => write!(f, "enum {v}"),
            Self::Object(obj) => write!(f, "<{} {}>", obj.type_name(), obj.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<Point> for Value {
    fn from(v: Point) -> Self {
        Self::Point(v)
    }
}

impl From<Size> for Value {
    fn from(v: Size) -> Self {
        Self::Size(v)
    }
}

impl From<Rect> for Value {
    fn from(v: Rect) -> Self {
        Self::Rect(v)
    }
}

impl From<Color> for Value {
    fn from(v: Color) -> Self {
        Self::Color(v)
    }
}

impl From<DependencyObject> for Value {
    fn from(v: DependencyObject) -> Self {
        Self::Object(v)
    }
}

impl From<&DependencyObject> for Value {
    fn from(v: &DependencyObject) -> Self {
        Self::Object(v.clone())
    }
}

impl From<Collection> for Value {
    fn from(v: Collection) -> Self {
        Self::Object(v.into_object())
    }
}

impl From<&Collection> for Value {
    fn from(v: &Collection) -> Self {
        Self::Object(v.as_object().clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_match_kind() {
        assert!(Value::from(true).as_bool().unwrap());
        assert_eq!(Value::from(7).as_i32().unwrap(), 7);
        assert_eq!(Value::from(7i64).as_i64().unwrap(), 7);
        assert_eq!(Value::from("hi").as_str().unwrap(), "hi");
        assert_eq!(
            Value::from(Point::new(1.0, 2.0)).as_point().unwrap(),
            Point::new(1.0, 2.0)
        );
    }

    #[test]
    fn test_wrong_kind_reports_both_sides() {
        let err = Value::from(1.5).as_i32().unwrap_err();
        assert_eq!(
            err,
            ValueError::WrongKind {
                expected: "int32",
                got: "double"
            }
        );
        assert_eq!(
            Value::Null.as_str().unwrap_err(),
            ValueError::WrongKind {
                expected: "string",
                got: "null"
            }
        );
    }

    #[test]
    fn test_equality_is_per_kind() {
        assert_eq!(Value::from(1), Value::from(1));
        assert_ne!(Value::from(1), Value::from(1i64));
        assert_ne!(Value::from(1), Value::Null);
        assert_eq!(Value::from("a"), Value::from("a".to_string()));
    }

    #[test]
    fn test_kind_accepts_null_only_when_nullable() {
        assert!(ValueKind::String.accepts(&Value::Null));
        assert!(ValueKind::Object(TypeKind::DEPENDENCY_OBJECT).accepts(&Value::Null));
        assert!(!ValueKind::Double.accepts(&Value::Null));
        assert!(ValueKind::Double.accepts(&Value::from(0.0)));
        assert!(!ValueKind::Double.accepts(&Value::from(0)));
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(ValueKind::Bool.zero_value(), Value::Bool(false));
        assert_eq!(ValueKind::String.zero_value(), Value::Null);
        assert_eq!(ValueKind::Color.zero_value(), Value::Color(Color::default()));
    }

    #[test]
    fn test_color_from_argb() {
        let c = Color::from_argb(0xff00_ff00);
        assert_eq!(c, Color::new(0.0, 1.0, 0.0, 1.0));
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<i32> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some(3)), Value::Int32(3));
    }
}
