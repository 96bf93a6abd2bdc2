//! Built-in functions and constants of the kernel language

use std::ops::RangeInclusive;

use crate::ast::ScalarType;

use super::value::{Value, common_type};

/// Work-item query functions; each takes one dimension index
pub const WORK_ITEM_FUNCTIONS: &[&str] = &[
    "get_global_id",
    "get_local_id",
    "get_group_id",
    "get_global_size",
    "get_local_size",
    "get_num_groups",
    "get_global_offset",
];

/// Accepted argument counts of a builtin, or `None` if `name` is not one
pub fn arity(name: &str) -> Option<RangeInclusive<usize>> {
    if WORK_ITEM_FUNCTIONS.contains(&name) {
        return Some(1..=1);
    }
    Some(match name {
        "get_work_dim" => 0..=0,
        "barrier" | "work_group_barrier" | "mem_fence" => 1..=1,
        "abs" | "fabs" | "sqrt" | "rsqrt" | "exp" | "exp2" | "log" | "log2" | "log10"
        | "floor" | "ceil" | "round" | "trunc" | "sin" | "cos" | "tan" => 1..=1,
        "min" | "max" | "fmin" | "fmax" | "pow" | "fmod" | "hypot" => 2..=2,
        "mad" | "fma" | "clamp" | "select" => 3..=3,
        _ => return None,
    })
}

/// Value of a predefined constant
pub fn constant(name: &str) -> Option<Value> {
    let float = |v: f32| Value::Float(v as f64, ScalarType::Float);
    Some(match name {
        "CLK_LOCAL_MEM_FENCE" => Value::uint(1),
        "CLK_GLOBAL_MEM_FENCE" => Value::uint(2),
        "CHAR_BIT" => Value::int(8),
        "CHAR_MAX" | "SCHAR_MAX" => Value::int(i8::MAX as i64),
        "CHAR_MIN" | "SCHAR_MIN" => Value::int(i8::MIN as i64),
        "UCHAR_MAX" => Value::int(u8::MAX as i64),
        "SHRT_MAX" => Value::int(i16::MAX as i64),
        "SHRT_MIN" => Value::int(i16::MIN as i64),
        "USHRT_MAX" => Value::int(u16::MAX as i64),
        "INT_MAX" => Value::int(i32::MAX as i64),
        "INT_MIN" => Value::int(i32::MIN as i64),
        "UINT_MAX" => Value::uint(u32::MAX),
        "LONG_MAX" => Value::Int(i64::MAX, ScalarType::Long),
        "LONG_MIN" => Value::Int(i64::MIN, ScalarType::Long),
        "ULONG_MAX" => Value::Int(-1, ScalarType::ULong),
        "FLT_MAX" | "MAXFLOAT" => float(f32::MAX),
        "FLT_MIN" => float(f32::MIN_POSITIVE),
        "FLT_EPSILON" => float(f32::EPSILON),
        "DBL_MAX" => Value::double(f64::MAX),
        "DBL_MIN" => Value::double(f64::MIN_POSITIVE),
        "DBL_EPSILON" => Value::double(f64::EPSILON),
        "INFINITY" | "HUGE_VALF" => float(f32::INFINITY),
        "HUGE_VAL" => Value::double(f64::INFINITY),
        "NAN" => float(f32::NAN),
        "M_PI" => Value::double(std::f64::consts::PI),
        "M_PI_F" => float(std::f32::consts::PI),
        "M_E" => Value::double(std::f64::consts::E),
        "M_E_F" => float(std::f32::consts::E),
        _ => return None,
    })
}

/// Evaluate a math builtin on already-evaluated arguments
pub fn call_math(name: &str, args: &[Value]) -> Result<Value, String> {
    match (name, args) {
        ("abs", [x]) => Ok(match *x {
            Value::Int(v, ty) => Value::Int(v.wrapping_abs(), ty).convert(ty),
            Value::Float(v, ty) => Value::Float(v.abs(), ty),
        }),
        ("min" | "max", [a, b]) => {
            let ty = common_type(a.ty(), b.ty());
            let lt = Value::binary(crate::ast::BinaryOp::Lt, *a, *b)?.is_truthy();
            let pick = if (name == "min") == lt { a } else { b };
            Ok(pick.convert(ty))
        }
        ("clamp", [x, lo, hi]) => {
            let upper = call_math("max", &[*x, *lo])?;
            call_math("min", &[upper, *hi])
        }
        ("select", [a, b, c]) => Ok(if c.is_truthy() { *b } else { *a }),
        (_, [x]) => {
            let f = x.as_f64();
            let v = match name {
                "fabs" => f.abs(),
                "sqrt" => f.sqrt(),
                "rsqrt" => 1.0 / f.sqrt(),
                "exp" => f.exp(),
                "exp2" => f.exp2(),
                "log" => f.ln(),
                "log2" => f.log2(),
                "log10" => f.log10(),
                "floor" => f.floor(),
                "ceil" => f.ceil(),
                "round" => f.round(),
                "trunc" => f.trunc(),
                "sin" => f.sin(),
                "cos" => f.cos(),
                "tan" => f.tan(),
                _ => return Err(format!("unknown builtin `{}`", name)),
            };
            Ok(Value::Float(v, float_type(&[*x])).convert(float_type(&[*x])))
        }
        (_, [a, b]) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let v = match name {
                "fmin" => x.min(y),
                "fmax" => x.max(y),
                "pow" => x.powf(y),
                "fmod" => x % y,
                "hypot" => x.hypot(y),
                _ => return Err(format!("unknown builtin `{}`", name)),
            };
            let ty = float_type(&[*a, *b]);
            Ok(Value::Float(v, ty).convert(ty))
        }
        ("mad" | "fma", [a, b, c]) => {
            let ty = float_type(&[*a, *b, *c]);
            Ok(Value::Float(a.as_f64().mul_add(b.as_f64(), c.as_f64()), ty).convert(ty))
        }
        _ => Err(format!(
            "builtin `{}` called with {} arguments",
            name,
            args.len()
        )),
    }
}

/// Floating result type for a math builtin: `float` unless a `double` is involved
fn float_type(args: &[Value]) -> ScalarType {
    if args.iter().any(|v| v.ty() == ScalarType::Double) {
        ScalarType::Double
    } else {
        ScalarType::Float
    }
}
