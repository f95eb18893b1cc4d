//! Core type definitions for the catalog.

use onyx_proto::Value;
use rkyv::{Archive, Deserialize, Serialize};

/// Scalar data types an attribute can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

/// Field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
    /// An optional scalar value (nullable).
    OptionalScalar(ScalarType),
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64
        )
    }

    /// Check if this type is a string-like type.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ScalarType::String | ScalarType::Bytes)
    }

    /// Name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float64 => "float64",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Uuid => "uuid",
        }
    }

    /// Convert a non-null value to this type without losing information.
    ///
    /// Integers widen and narrow when in range, integral floats become
    /// integers, integers become floats, 16-byte blobs become UUIDs.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ScalarType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
            (ScalarType::Int32, Value::Int32(i)) => Some(Value::Int32(*i)),
            (ScalarType::Int32, Value::Int64(i)) => i32::try_from(*i).ok().map(Value::Int32),
            (ScalarType::Int32, Value::Float64(f)) => integral(*f)
                .and_then(|i| i32::try_from(i).ok())
                .map(Value::Int32),
            (ScalarType::Int64, Value::Int32(i)) => Some(Value::Int64(*i as i64)),
            (ScalarType::Int64, Value::Int64(i)) => Some(Value::Int64(*i)),
            (ScalarType::Int64, Value::Float64(f)) => integral(*f).map(Value::Int64),
            (ScalarType::Float64, v) => v.as_f64().map(Value::Float64),
            (ScalarType::String, Value::String(s)) => Some(Value::String(s.clone())),
            (ScalarType::Bytes, Value::Bytes(b)) => Some(Value::Bytes(b.clone())),
            (ScalarType::Timestamp, Value::Timestamp(t)) => Some(Value::Timestamp(*t)),
            (ScalarType::Timestamp, Value::Int64(t)) => Some(Value::Timestamp(*t)),
            (ScalarType::Uuid, Value::Uuid(u)) => Some(Value::Uuid(*u)),
            (ScalarType::Uuid, Value::Bytes(b)) => {
                <[u8; 16]>::try_from(b.as_slice()).ok().map(Value::Uuid)
            }
            _ => None,
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl FieldType {
    /// Create a scalar field type.
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldType::Scalar(scalar)
    }

    /// Create an optional scalar field type.
    pub fn optional_scalar(scalar: ScalarType) -> Self {
        FieldType::OptionalScalar(scalar)
    }

    /// Check if this type is nullable.
    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldType::OptionalScalar(_))
    }

    /// Get the inner scalar type.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            FieldType::Scalar(s) | FieldType::OptionalScalar(s) => *s,
        }
    }

    /// Coerce a value for storage in a field of this type.
    ///
    /// Null is accepted only by optional types.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return self.is_nullable().then_some(Value::Null);
        }
        self.scalar_type().coerce(value)
    }

    /// Name used in error messages.
    pub fn describe(&self) -> String {
        match self {
            FieldType::Scalar(s) => s.name().to_string(),
            FieldType::OptionalScalar(s) => format!("optional {}", s.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_checks() {
        assert!(ScalarType::Int32.is_numeric());
        assert!(ScalarType::Float64.is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(!ScalarType::Bool.is_numeric());

        assert!(ScalarType::String.is_string_like());
        assert!(ScalarType::Bytes.is_string_like());
        assert!(!ScalarType::Int32.is_string_like());
    }

    #[test]
    fn test_field_type_builders() {
        let int_type = FieldType::scalar(ScalarType::Int32);
        assert!(!int_type.is_nullable());
        assert_eq!(int_type.scalar_type(), ScalarType::Int32);

        let optional_int = FieldType::optional_scalar(ScalarType::Int32);
        assert!(optional_int.is_nullable());
        assert_eq!(optional_int.describe(), "optional int32");
    }

    #[test]
    fn test_integer_coercion() {
        let int32 = ScalarType::Int32;
        assert_eq!(int32.coerce(&Value::Int64(7)), Some(Value::Int32(7)));
        assert_eq!(int32.coerce(&Value::Int64(i64::MAX)), None);
        assert_eq!(int32.coerce(&Value::Float64(3.0)), Some(Value::Int32(3)));
        assert_eq!(int32.coerce(&Value::Float64(3.5)), None);
        assert_eq!(
            ScalarType::Float64.coerce(&Value::Int32(2)),
            Some(Value::Float64(2.0))
        );
    }

    #[test]
    fn test_null_coercion() {
        assert_eq!(
            FieldType::optional_scalar(ScalarType::String).coerce(&Value::Null),
            Some(Value::Null)
        );
        assert_eq!(
            FieldType::scalar(ScalarType::String).coerce(&Value::Null),
            None
        );
        assert_eq!(
            FieldType::scalar(ScalarType::String).coerce(&Value::Int32(1)),
            None
        );
    }

    #[test]
    fn test_uuid_from_bytes() {
        let bytes = Value::Bytes(vec![9; 16]);
        assert_eq!(ScalarType::Uuid.coerce(&bytes), Some(Value::Uuid([9; 16])));
        assert_eq!(ScalarType::Uuid.coerce(&Value::Bytes(vec![1, 2])), None);
    }
}
