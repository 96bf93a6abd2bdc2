//! Runtime values for the kernel interpreter
//!
//! Every value carries its OpenCL C scalar type. Arithmetic follows the C
//! usual arithmetic conversions: integer promotion to `int`, then the wider
//! rank wins, unsigned wins at equal rank, and any floating operand makes the
//! operation floating. Integer results wrap to the width of their type.

use std::fmt;

use crate::ast::{BinaryOp, ScalarType, UnaryOp};

/// Runtime value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Integer of the given type. Unsigned 64-bit values keep their bit
    /// pattern in the `i64`.
    Int(i64, ScalarType),
    /// `float` or `double`; `float` values are already rounded to `f32`
    Float(f64, ScalarType),
}

impl Value {
    pub fn int(v: i64) -> Value {
        Value::Int(v, ScalarType::Int).convert(ScalarType::Int)
    }

    pub fn uint(v: u32) -> Value {
        Value::Int(v as i64, ScalarType::UInt)
    }

    pub fn size(v: usize) -> Value {
        Value::Int(v as u64 as i64, ScalarType::ULong)
    }

    pub fn double(v: f64) -> Value {
        Value::Float(v, ScalarType::Double)
    }

    pub fn bool(b: bool) -> Value {
        Value::Int(b as i64, ScalarType::Int)
    }

    /// Zero of the given type
    pub fn zero(ty: ScalarType) -> Value {
        if ty.is_float() {
            Value::Float(0.0, ty)
        } else {
            Value::Int(0, ty)
        }
    }

    pub fn ty(&self) -> ScalarType {
        match *self {
            Value::Int(_, ty) | Value::Float(_, ty) => ty,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::Int(v, _) => v != 0,
            Value::Float(v, _) => v != 0.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v, ScalarType::ULong) => v as u64 as f64,
            Value::Int(v, _) => v as f64,
            Value::Float(v, _) => v,
        }
    }

    /// Integer view, truncating floats toward zero
    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::Int(v, _) => v,
            Value::Float(v, _) => v as i64,
        }
    }

    /// Convert to `ty` as a C assignment or cast would
    pub fn convert(self, ty: ScalarType) -> Value {
        match ty {
            ScalarType::Float => Value::Float(self.as_f64() as f32 as f64, ty),
            ScalarType::Double => Value::Float(self.as_f64(), ty),
            ScalarType::Bool => Value::Int(self.is_truthy() as i64, ty),
            _ => {
                let bits = match self {
                    Value::Int(v, _) => v,
                    Value::Float(v, _) if ty.is_signed() => v as i64,
                    Value::Float(v, _) => v as u64 as i64,
                };
                Value::Int(wrap(bits, ty), ty)
            }
        }
    }

    /// Decode one element of type `ty` from little-endian bytes
    pub fn read_le(ty: ScalarType, bytes: &[u8]) -> Value {
        macro_rules! le {
            ($t:ty) => {{
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(raw)
            }};
        }
        match ty {
            ScalarType::Bool => Value::Int((le!(u8) != 0) as i64, ty),
            ScalarType::Char => Value::Int(le!(i8) as i64, ty),
            ScalarType::UChar => Value::Int(le!(u8) as i64, ty),
            ScalarType::Short => Value::Int(le!(i16) as i64, ty),
            ScalarType::UShort => Value::Int(le!(u16) as i64, ty),
            ScalarType::Int => Value::Int(le!(i32) as i64, ty),
            ScalarType::UInt => Value::Int(le!(u32) as i64, ty),
            ScalarType::Long | ScalarType::ULong => Value::Int(le!(i64), ty),
            ScalarType::Float => Value::Float(le!(f32) as f64, ty),
            ScalarType::Double => Value::Float(le!(f64), ty),
        }
    }

    /// Encode as type `ty` into `out`, which must hold `ty.byte_width()` bytes
    pub fn write_le(self, ty: ScalarType, out: &mut [u8]) {
        match self.convert(ty) {
            Value::Float(v, ScalarType::Float) => out.copy_from_slice(&(v as f32).to_le_bytes()),
            Value::Float(v, _) => out.copy_from_slice(&v.to_le_bytes()),
            Value::Int(v, _) => {
                let width = ty.byte_width();
                out.copy_from_slice(&v.to_le_bytes()[..width]);
            }
        }
    }

    /// Apply a non-short-circuiting binary operator
    pub fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, String> {
        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            return shift(op, lhs, rhs);
        }
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let result = match op {
                BinaryOp::And => lhs.is_truthy() && rhs.is_truthy(),
                _ => lhs.is_truthy() || rhs.is_truthy(),
            };
            return Ok(Value::bool(result));
        }

        let ty = common_type(lhs.ty(), rhs.ty());
        let (a, b) = (lhs.convert(ty), rhs.convert(ty));

        if op.is_comparison() {
            let ordering = match (a, b) {
                (Value::Float(x, _), Value::Float(y, _)) => x.partial_cmp(&y),
                (Value::Int(x, _), Value::Int(y, _)) if ty.is_signed() => Some(x.cmp(&y)),
                (Value::Int(x, _), Value::Int(y, _)) => Some((x as u64).cmp(&(y as u64))),
                _ => None,
            };
            let result = match ordering {
                // NaN compares false except for `!=`
                None => op == BinaryOp::Ne,
                Some(ord) => match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    BinaryOp::Ge => ord.is_ge(),
                    BinaryOp::Eq => ord.is_eq(),
                    _ => ord.is_ne(),
                },
            };
            return Ok(Value::bool(result));
        }

        match (a, b) {
            (Value::Float(x, _), Value::Float(y, _)) => {
                let v = match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    _ => return Err(format!("invalid operands to `{}` of type {}", op_str(op), ty)),
                };
                Ok(Value::Float(v, ty).convert(ty))
            }
            (Value::Int(x, _), Value::Int(y, _)) => {
                let v = if ty.is_signed() {
                    match op {
                        BinaryOp::Add => x.wrapping_add(y),
                        BinaryOp::Sub => x.wrapping_sub(y),
                        BinaryOp::Mul => x.wrapping_mul(y),
                        BinaryOp::Div | BinaryOp::Rem if y == 0 => {
                            return Err("integer division by zero".to_string());
                        }
                        BinaryOp::Div => x.wrapping_div(y),
                        BinaryOp::Rem => x.wrapping_rem(y),
                        BinaryOp::BitAnd => x & y,
                        BinaryOp::BitOr => x | y,
                        _ => x ^ y,
                    }
                } else {
                    let (x, y) = (x as u64, y as u64);
                    let v = match op {
                        BinaryOp::Add => x.wrapping_add(y),
                        BinaryOp::Sub => x.wrapping_sub(y),
                        BinaryOp::Mul => x.wrapping_mul(y),
                        BinaryOp::Div | BinaryOp::Rem if y == 0 => {
                            return Err("integer division by zero".to_string());
                        }
                        BinaryOp::Div => x / y,
                        BinaryOp::Rem => x % y,
                        BinaryOp::BitAnd => x & y,
                        BinaryOp::BitOr => x | y,
                        _ => x ^ y,
                    };
                    v as i64
                };
                Ok(Value::Int(wrap(v, ty), ty))
            }
            _ => Err(format!("invalid operands to `{}`", op_str(op))),
        }
    }

    pub fn unary(op: UnaryOp, value: Value) -> Result<Value, String> {
        match (op, value) {
            (UnaryOp::Not, v) => Ok(Value::bool(!v.is_truthy())),
            (UnaryOp::Plus, Value::Float(..)) => Ok(value),
            (UnaryOp::Neg, Value::Float(v, ty)) => Ok(Value::Float(-v, ty)),
            (UnaryOp::BitNot, Value::Float(..)) => {
                Err("invalid operand to `~` of floating type".to_string())
            }
            (_, Value::Int(..)) => {
                let ty = promote(value.ty());
                let v = value.convert(ty).as_i64();
                let v = match op {
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::BitNot => !v,
                    _ => v,
                };
                Ok(Value::Int(wrap(v, ty), ty))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Int(v, ScalarType::ULong) => write!(f, "{}", v as u64),
            Value::Int(v, _) => write!(f, "{}", v),
            Value::Float(v, _) => write!(f, "{}", v),
        }
    }
}

/// Truncate an integer bit pattern to the width and signedness of `ty`
fn wrap(v: i64, ty: ScalarType) -> i64 {
    match ty {
        ScalarType::Bool => (v != 0) as i64,
        ScalarType::Char => v as i8 as i64,
        ScalarType::UChar => v as u8 as i64,
        ScalarType::Short => v as i16 as i64,
        ScalarType::UShort => v as u16 as i64,
        ScalarType::Int => v as i32 as i64,
        ScalarType::UInt => v as u32 as i64,
        _ => v,
    }
}

fn rank(ty: ScalarType) -> u8 {
    match ty {
        ScalarType::Bool => 0,
        ScalarType::Char | ScalarType::UChar => 1,
        ScalarType::Short | ScalarType::UShort => 2,
        ScalarType::Int | ScalarType::UInt => 3,
        ScalarType::Long | ScalarType::ULong => 4,
        ScalarType::Float => 5,
        ScalarType::Double => 6,
    }
}

/// Integer promotion: everything narrower than `int` becomes `int`
pub fn promote(ty: ScalarType) -> ScalarType {
    if rank(ty) < rank(ScalarType::Int) {
        ScalarType::Int
    } else {
        ty
    }
}

/// Result type of the usual arithmetic conversions
pub fn common_type(a: ScalarType, b: ScalarType) -> ScalarType {
    if a.is_float() || b.is_float() {
        return if a == ScalarType::Double || b == ScalarType::Double {
            ScalarType::Double
        } else {
            ScalarType::Float
        };
    }
    let (a, b) = (promote(a), promote(b));
    match rank(a).cmp(&rank(b)) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal if a.is_signed() => b,
        std::cmp::Ordering::Equal => a,
    }
}

fn shift(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    let (Value::Int(..), Value::Int(count, _)) = (lhs, rhs) else {
        return Err(format!("invalid operands to `{}` of floating type", op_str(op)));
    };
    let ty = promote(lhs.ty());
    let v = lhs.convert(ty).as_i64();
    // The shift count is taken modulo the bit width of the promoted type
    let bits = (ty.byte_width() * 8) as i64;
    let count = count.rem_euclid(bits) as u32;
    let v = match op {
        BinaryOp::Shl => v.wrapping_shl(count),
        _ if ty.is_signed() => v.wrapping_shr(count),
        _ => match ty {
            ScalarType::ULong => ((v as u64) >> count) as i64,
            _ => v >> count,
        },
    };
    Ok(Value::Int(wrap(v, ty), ty))
}

fn op_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_wraps() {
        let v = Value::binary(BinaryOp::Sub, Value::uint(0), Value::int(1)).unwrap();
        assert_eq!(v, Value::Int(u32::MAX as i64, ScalarType::UInt));
    }

    #[test]
    fn test_float_store_rounds_to_f32() {
        let v = Value::double(0.1).convert(ScalarType::Float);
        assert_eq!(v.as_f64(), 0.1f32 as f64);
    }

    #[test]
    fn test_mixed_comparison_is_unsigned() {
        // -1 converts to UINT_MAX when compared with an unsigned operand
        let v = Value::binary(BinaryOp::Lt, Value::int(-1), Value::uint(1)).unwrap();
        assert!(!v.is_truthy());
    }

    #[test]
    fn test_integer_division_by_zero() {
        assert!(Value::binary(BinaryOp::Div, Value::int(1), Value::int(0)).is_err());
        let v = Value::binary(BinaryOp::Div, Value::double(1.0), Value::int(0)).unwrap();
        assert_eq!(v.as_f64(), f64::INFINITY);
    }

    #[test]
    fn test_byte_round_trip_short() {
        let mut buf = [0u8; 2];
        Value::int(-2).write_le(ScalarType::Short, &mut buf);
        assert_eq!(Value::read_le(ScalarType::Short, &buf), Value::Int(-2, ScalarType::Short));
    }

    #[test]
    fn test_shift_right_unsigned() {
        let v = Value::binary(BinaryOp::Shr, Value::uint(0x8000_0000), Value::int(31)).unwrap();
        assert_eq!(v.as_i64(), 1);
        let v = Value::binary(BinaryOp::Shr, Value::int(-8), Value::int(1)).unwrap();
        assert_eq!(v.as_i64(), -4);
    }
}
