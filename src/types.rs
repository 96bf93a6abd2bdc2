//! Element types, tagged scalars and host arrays
//!
//! Every buffer and every scalar argument carries an explicit element kind.
//! Byte widths and device type names are table lookups on these enums.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::kernel::KernelArg;

/// Element kind of a host array / device buffer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Float64,
    Float32,
    Uint32,
    Int32,
    Uint16,
    Int16,
    Uint8,
    Int8,
}

impl ElementType {
    pub const ALL: [ElementType; 8] = [
        ElementType::Float64,
        ElementType::Float32,
        ElementType::Uint32,
        ElementType::Int32,
        ElementType::Uint16,
        ElementType::Int16,
        ElementType::Uint8,
        ElementType::Int8,
    ];

    /// Size of one element in bytes
    pub fn byte_width(self) -> usize {
        match self {
            ElementType::Float64 => 8,
            ElementType::Float32 | ElementType::Uint32 | ElementType::Int32 => 4,
            ElementType::Uint16 | ElementType::Int16 => 2,
            ElementType::Uint8 | ElementType::Int8 => 1,
        }
    }

    /// OpenCL C spelling of the element type
    pub fn device_type(self) -> &'static str {
        match self {
            ElementType::Float64 => "double",
            ElementType::Float32 => "float",
            ElementType::Uint32 => "uint",
            ElementType::Int32 => "int",
            ElementType::Uint16 => "ushort",
            ElementType::Int16 => "short",
            ElementType::Uint8 => "uchar",
            ElementType::Int8 => "char",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementType::Float64 | ElementType::Float32)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Float64 => "float64",
            ElementType::Float32 => "float32",
            ElementType::Uint32 => "uint32",
            ElementType::Int32 => "int32",
            ElementType::Uint16 => "uint16",
            ElementType::Int16 => "int16",
            ElementType::Uint8 => "uint8",
            ElementType::Int8 => "int8",
        };
        write!(f, "{}", name)
    }
}

/// Type label attached to a scalar kernel argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarTag {
    Char,
    Float,
    Int32,
    Int16,
    Int8,
    Uint32,
    Uint16,
    Uint8,
}

impl ScalarTag {
    pub fn label(self) -> &'static str {
        match self {
            ScalarTag::Char => "Char",
            ScalarTag::Float => "Float",
            ScalarTag::Int32 => "Int32",
            ScalarTag::Int16 => "Int16",
            ScalarTag::Int8 => "Int8",
            ScalarTag::Uint32 => "Uint32",
            ScalarTag::Uint16 => "Uint16",
            ScalarTag::Uint8 => "Uint8",
        }
    }

    /// OpenCL C scalar type the tag marshals as
    pub fn device_type(self) -> &'static str {
        match self {
            ScalarTag::Char | ScalarTag::Int8 => "char",
            ScalarTag::Float => "float",
            ScalarTag::Int32 => "int",
            ScalarTag::Int16 => "short",
            ScalarTag::Uint32 => "uint",
            ScalarTag::Uint16 => "ushort",
            ScalarTag::Uint8 => "uchar",
        }
    }

    pub fn byte_width(self) -> usize {
        match self {
            ScalarTag::Char | ScalarTag::Int8 | ScalarTag::Uint8 => 1,
            ScalarTag::Int16 | ScalarTag::Uint16 => 2,
            ScalarTag::Float | ScalarTag::Int32 | ScalarTag::Uint32 => 4,
        }
    }
}

impl FromStr for ScalarTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Char" => Ok(ScalarTag::Char),
            "Float" => Ok(ScalarTag::Float),
            "Int32" => Ok(ScalarTag::Int32),
            "Int16" => Ok(ScalarTag::Int16),
            "Int8" => Ok(ScalarTag::Int8),
            "Uint32" => Ok(ScalarTag::Uint32),
            "Uint16" => Ok(ScalarTag::Uint16),
            "Uint8" => Ok(ScalarTag::Uint8),
            other => Err(format!("unknown scalar label `{}`", other)),
        }
    }
}

impl fmt::Display for ScalarTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A number carrying an explicit device scalar type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericValue {
    value: f64,
    tag: ScalarTag,
}

impl NumericValue {
    pub fn new(value: f64, tag: ScalarTag) -> Self {
        Self { value, tag }
    }

    pub fn char(value: i8) -> Self {
        Self::new(value as f64, ScalarTag::Char)
    }

    pub fn float(value: f32) -> Self {
        Self::new(value as f64, ScalarTag::Float)
    }

    pub fn int32(value: i32) -> Self {
        Self::new(value as f64, ScalarTag::Int32)
    }

    pub fn int16(value: i16) -> Self {
        Self::new(value as f64, ScalarTag::Int16)
    }

    pub fn int8(value: i8) -> Self {
        Self::new(value as f64, ScalarTag::Int8)
    }

    pub fn uint32(value: u32) -> Self {
        Self::new(value as f64, ScalarTag::Uint32)
    }

    pub fn uint16(value: u16) -> Self {
        Self::new(value as f64, ScalarTag::Uint16)
    }

    pub fn uint8(value: u8) -> Self {
        Self::new(value as f64, ScalarTag::Uint8)
    }

    /// Tag a number by label. Unknown labels produce an untyped argument.
    pub fn labeled(value: f64, label: &str) -> KernelArg {
        match label.parse::<ScalarTag>() {
            Ok(tag) => KernelArg::Number(Self::new(value, tag)),
            Err(_) => KernelArg::Untyped(value),
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn tag(&self) -> ScalarTag {
        self.tag
    }
}

impl From<NumericValue> for f64 {
    fn from(n: NumericValue) -> f64 {
        n.value
    }
}

impl PartialEq<f64> for NumericValue {
    fn eq(&self, other: &f64) -> bool {
        self.value == *other
    }
}

impl PartialOrd<f64> for NumericValue {
    fn partial_cmp(&self, other: &f64) -> Option<std::cmp::Ordering> {
        self.value.partial_cmp(other)
    }
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

macro_rules! numeric_binop {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait<f64> for NumericValue {
            type Output = f64;
            fn $method(self, rhs: f64) -> f64 {
                self.value $op rhs
            }
        }

        impl $trait<NumericValue> for NumericValue {
            type Output = f64;
            fn $method(self, rhs: NumericValue) -> f64 {
                self.value $op rhs.value
            }
        }

        impl $trait<NumericValue> for f64 {
            type Output = f64;
            fn $method(self, rhs: NumericValue) -> f64 {
                self $op rhs.value
            }
        }
    };
}

numeric_binop!(Add, add, +);
numeric_binop!(Sub, sub, -);
numeric_binop!(Mul, mul, *);
numeric_binop!(Div, div, /);

/// Contiguous, strongly-typed host buffer
#[derive(Debug, Clone, PartialEq)]
pub enum HostArray {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Uint32(Vec<u32>),
    Int32(Vec<i32>),
    Uint16(Vec<u16>),
    Int16(Vec<i16>),
    Uint8(Vec<u8>),
    Int8(Vec<i8>),
}

/// Apply `$body` to the inner vector whatever its element type
macro_rules! with_vec {
    ($array:expr, $v:ident => $body:expr) => {
        match $array {
            HostArray::Float64($v) => $body,
            HostArray::Float32($v) => $body,
            HostArray::Uint32($v) => $body,
            HostArray::Int32($v) => $body,
            HostArray::Uint16($v) => $body,
            HostArray::Int16($v) => $body,
            HostArray::Uint8($v) => $body,
            HostArray::Int8($v) => $body,
        }
    };
}

impl HostArray {
    /// Zero-filled array of the given kind
    pub fn zeros(ty: ElementType, len: usize) -> Self {
        match ty {
            ElementType::Float64 => HostArray::Float64(vec![0.0; len]),
            ElementType::Float32 => HostArray::Float32(vec![0.0; len]),
            ElementType::Uint32 => HostArray::Uint32(vec![0; len]),
            ElementType::Int32 => HostArray::Int32(vec![0; len]),
            ElementType::Uint16 => HostArray::Uint16(vec![0; len]),
            ElementType::Int16 => HostArray::Int16(vec![0; len]),
            ElementType::Uint8 => HostArray::Uint8(vec![0; len]),
            ElementType::Int8 => HostArray::Int8(vec![0; len]),
        }
    }

    /// Build an array of the given kind, converting each value with `as`
    pub fn from_f64s(ty: ElementType, values: &[f64]) -> Self {
        match ty {
            ElementType::Float64 => HostArray::Float64(values.to_vec()),
            ElementType::Float32 => HostArray::Float32(values.iter().map(|&v| v as f32).collect()),
            ElementType::Uint32 => HostArray::Uint32(values.iter().map(|&v| v as u32).collect()),
            ElementType::Int32 => HostArray::Int32(values.iter().map(|&v| v as i32).collect()),
            ElementType::Uint16 => HostArray::Uint16(values.iter().map(|&v| v as u16).collect()),
            ElementType::Int16 => HostArray::Int16(values.iter().map(|&v| v as i16).collect()),
            ElementType::Uint8 => HostArray::Uint8(values.iter().map(|&v| v as u8).collect()),
            ElementType::Int8 => HostArray::Int8(values.iter().map(|&v| v as i8).collect()),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            HostArray::Float64(_) => ElementType::Float64,
            HostArray::Float32(_) => ElementType::Float32,
            HostArray::Uint32(_) => ElementType::Uint32,
            HostArray::Int32(_) => ElementType::Int32,
            HostArray::Uint16(_) => ElementType::Uint16,
            HostArray::Int16(_) => ElementType::Int16,
            HostArray::Uint8(_) => ElementType::Uint8,
            HostArray::Int8(_) => ElementType::Int8,
        }
    }

    pub fn len(&self) -> usize {
        with_vec!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the contents in bytes
    pub fn byte_len(&self) -> usize {
        self.len() * self.element_type().byte_width()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        with_vec!(self, v => v.get(index).map(|&x| x as f64))
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_vec!(self, v => v.iter().map(|&x| x as f64).collect())
    }

    /// Little-endian byte image of the contents
    pub fn to_bytes(&self) -> Vec<u8> {
        with_vec!(self, v => v.iter().flat_map(|x| x.to_le_bytes()).collect())
    }

    /// Overwrite the contents from a little-endian byte image.
    ///
    /// `bytes` must hold exactly `byte_len()` bytes.
    pub fn copy_from_bytes(&mut self, bytes: &[u8]) {
        let width = self.element_type().byte_width();
        debug_assert_eq!(bytes.len(), self.byte_len());
        macro_rules! decode {
            ($v:ident, $t:ty) => {
                for (dst, chunk) in $v.iter_mut().zip(bytes.chunks_exact(width)) {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(chunk);
                    *dst = <$t>::from_le_bytes(raw);
                }
            };
        }
        match self {
            HostArray::Float64(v) => decode!(v, f64),
            HostArray::Float32(v) => decode!(v, f32),
            HostArray::Uint32(v) => decode!(v, u32),
            HostArray::Int32(v) => decode!(v, i32),
            HostArray::Uint16(v) => decode!(v, u16),
            HostArray::Int16(v) => decode!(v, i16),
            HostArray::Uint8(v) => decode!(v, u8),
            HostArray::Int8(v) => decode!(v, i8),
        }
    }
}

macro_rules! host_array_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$t>> for HostArray {
                fn from(v: Vec<$t>) -> Self {
                    HostArray::$variant(v)
                }
            }
        )*
    };
}

host_array_from! {
    f64 => Float64,
    f32 => Float32,
    u32 => Uint32,
    i32 => Int32,
    u16 => Uint16,
    i16 => Int16,
    u8 => Uint8,
    i8 => Int8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_widths() {
        let widths: Vec<usize> = ElementType::ALL.iter().map(|t| t.byte_width()).collect();
        assert_eq!(widths, vec![8, 4, 4, 4, 2, 2, 1, 1]);
    }

    #[test]
    fn test_device_types() {
        assert_eq!(ElementType::Uint32.device_type(), "uint");
        assert_eq!(ElementType::Int16.device_type(), "short");
        assert_eq!(ElementType::Float64.device_type(), "double");
        assert_eq!(ScalarTag::Int8.device_type(), "char");
    }

    #[test]
    fn test_numeric_value_behaves_as_number() {
        let n = NumericValue::uint32(30);
        assert_eq!(n, 30.0);
        assert!(n > 29.0);
        assert_eq!(n + 1.0, 31.0);
        assert_eq!(2.0 * n, 60.0);
        assert_eq!(f64::from(n), 30.0);
        assert_eq!(n.tag(), ScalarTag::Uint32);
    }

    #[test]
    fn test_labeled_fallback() {
        match NumericValue::labeled(3.0, "Int16") {
            KernelArg::Number(n) => assert_eq!(n.tag(), ScalarTag::Int16),
            other => panic!("expected typed number, got {:?}", other),
        }
        match NumericValue::labeled(3.0, "Quad") {
            KernelArg::Untyped(v) => assert_eq!(v, 3.0),
            other => panic!("expected untyped value, got {:?}", other),
        }
    }

    #[test]
    fn test_host_array_bytes() {
        let arr = HostArray::from(vec![1u16, 258]);
        assert_eq!(arr.byte_len(), 4);
        assert_eq!(arr.to_bytes(), vec![1, 0, 2, 1]);

        let mut back = HostArray::zeros(ElementType::Uint16, 2);
        back.copy_from_bytes(&arr.to_bytes());
        assert_eq!(back, arr);
    }

    #[test]
    fn test_from_f64s() {
        let arr = HostArray::from_f64s(ElementType::Int8, &[-1.0, 2.0]);
        assert_eq!(arr, HostArray::Int8(vec![-1, 2]));
        assert_eq!(arr.get(0), Some(-1.0));
        assert_eq!(arr.get(5), None);
    }
}
