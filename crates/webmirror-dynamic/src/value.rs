use crate::array::Array;
use crate::object::Object;
use ordered_float::OrderedFloat;

/// A dynamically typed value.
///
/// Intended to be convertible to the same set of types as Lua; floats go
/// through [`OrderedFloat`] so `Value` can be `Eq`/`Ord`/`Hash` and used
/// as a map key or compared field-by-field in tests.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(OrderedFloat<f64>),
    String(String),
    Array(Array),
    Object(Object),
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Null => fmt.write_str("nil"),
            Self::Bool(b) => b.fmt(fmt),
            Self::I64(i) => i.fmt(fmt),
            Self::F64(f) => f.fmt(fmt),
            Self::String(s) => s.fmt(fmt),
            Self::Array(a) => a.fmt(fmt),
            Self::Object(o) => o.fmt(fmt),
        }
    }
}

impl Value {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::I64(_) => "I64",
            Self::F64(_) => "F64",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
            Self::Object(_) => "Object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Integer view of the value; whole-number floats are accepted.
    pub fn coerce_signed(&self) -> Option<i64> {
        match self {
            Self::I64(i) => Some(*i),
            Self::F64(OrderedFloat(f))
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 =>
            {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    /// Float view of the value; integers widen losslessly enough for the
    /// record fields this model carries.
    pub fn coerce_float(&self) -> Option<f64> {
        match self {
            Self::I64(i) => Some(*i as f64),
            Self::F64(OrderedFloat(f)) => Some(*f),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::I64(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::I64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::F64(OrderedFloat(f))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Self::Array(a)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}
