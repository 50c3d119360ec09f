//! Runtime values and numeric operator semantics.
//!
//! Values are a closed tagged variant. Arithmetic between mismatched numeric
//! kinds promotes by fixed precedence Int -> Uint -> Float; anything else is
//! a `TypeMismatch`. String and list operands carry table handles and are
//! resolved by the runner, which owns access to the tables.

use serde::{Deserialize, Serialize};

use fable_story::{BinaryOp, PathId, UnaryOp};

use crate::error::RuntimeError;
use crate::lists::ListId;
use crate::strings::StrId;

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value. Renders as empty text.
    None,
    /// Boolean.
    Bool(bool),
    /// Signed 32-bit integer.
    Int(i32),
    /// Unsigned 32-bit integer.
    Uint(u32),
    /// 32-bit float.
    Float(f32),
    /// Interned string handle.
    Str(StrId),
    /// List value handle.
    List(ListId),
    /// Divert target path.
    Divert(PathId),
}

impl Value {
    /// Kind name used in error reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Divert(_) => "divert",
        }
    }

    /// Boolean interpretation of bools and numbers.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for non-truthy kinds (strings, lists, diverts, none).
    pub fn truthy(&self) -> Result<bool, RuntimeError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Int(i) => Ok(*i != 0),
            Self::Uint(u) => Ok(*u != 0),
            Self::Float(f) => Ok(*f != 0.0),
            other => Err(RuntimeError::type_mismatch("bool", other.kind(), "bool")),
        }
    }
}

/// Numeric operand after promotion.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i32),
    Uint(u32),
    Float(f32),
}

fn as_num(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::Int(i32::from(*b))),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Uint(u) => Some(Num::Uint(*u)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

/// Promote two numeric operands to a common kind (Int -> Uint -> Float).
fn promote(a: Num, b: Num) -> (Num, Num) {
    use Num::{Float, Int, Uint};
    match (a, b) {
        (Float(_), _) | (_, Float(_)) => (Float(to_f32(a)), Float(to_f32(b))),
        (Uint(_), _) | (_, Uint(_)) => (Uint(to_u32(a)), Uint(to_u32(b))),
        (Int(x), Int(y)) => (Int(x), Int(y)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f32(n: Num) -> f32 {
    match n {
        Num::Int(i) => i as f32,
        Num::Uint(u) => u as f32,
        Num::Float(f) => f,
    }
}

#[allow(clippy::cast_sign_loss)]
fn to_u32(n: Num) -> u32 {
    match n {
        Num::Int(i) => i as u32,
        Num::Uint(u) => u,
        Num::Float(f) => f as u32,
    }
}

/// Apply a binary operator to two numeric (or boolean) values.
///
/// # Errors
///
/// `TypeMismatch` when either operand is not numeric, or for logic
/// operators on operands without a boolean interpretation.
pub fn numeric_binop(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let a = lhs.truthy()?;
        let b = rhs.truthy()?;
        return Ok(Value::Bool(match op {
            BinaryOp::And => a && b,
            _ => a || b,
        }));
    }

    let (a, b) = match (as_num(lhs), as_num(rhs)) {
        (Some(a), Some(b)) => promote(a, b),
        _ => return Err(RuntimeError::type_mismatch(op, lhs.kind(), rhs.kind())),
    };

    match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_binop(op, x, y),
        (Num::Uint(x), Num::Uint(y)) => uint_binop(op, x, y),
        (Num::Float(x), Num::Float(y)) => Ok(float_binop(op, x, y)),
        _ => unreachable!("promote yields matching kinds"),
    }
}

fn int_binop(op: BinaryOp, x: i32, y: i32) -> Result<Value, RuntimeError> {
    use BinaryOp::{Add, Div, Eq, Ge, Gt, Le, Lt, Max, Min, Mod, Mul, Ne, Sub};
    Ok(match op {
        Add => Value::Int(x.wrapping_add(y)),
        Sub => Value::Int(x.wrapping_sub(y)),
        Mul => Value::Int(x.wrapping_mul(y)),
        Div => Value::Int(
            x.checked_div(y)
                .ok_or_else(|| RuntimeError::StoryCorruption("integer division by zero".into()))?,
        ),
        Mod => Value::Int(
            x.checked_rem(y)
                .ok_or_else(|| RuntimeError::StoryCorruption("integer modulo by zero".into()))?,
        ),
        Min => Value::Int(x.min(y)),
        Max => Value::Int(x.max(y)),
        Eq => Value::Bool(x == y),
        Ne => Value::Bool(x != y),
        Lt => Value::Bool(x < y),
        Gt => Value::Bool(x > y),
        Le => Value::Bool(x <= y),
        Ge => Value::Bool(x >= y),
        BinaryOp::And | BinaryOp::Or => unreachable!("logic handled above"),
    })
}

fn uint_binop(op: BinaryOp, x: u32, y: u32) -> Result<Value, RuntimeError> {
    use BinaryOp::{Add, Div, Eq, Ge, Gt, Le, Lt, Max, Min, Mod, Mul, Ne, Sub};
    Ok(match op {
        Add => Value::Uint(x.wrapping_add(y)),
        Sub => Value::Uint(x.wrapping_sub(y)),
        Mul => Value::Uint(x.wrapping_mul(y)),
        Div => Value::Uint(
            x.checked_div(y)
                .ok_or_else(|| RuntimeError::StoryCorruption("integer division by zero".into()))?,
        ),
        Mod => Value::Uint(
            x.checked_rem(y)
                .ok_or_else(|| RuntimeError::StoryCorruption("integer modulo by zero".into()))?,
        ),
        Min => Value::Uint(x.min(y)),
        Max => Value::Uint(x.max(y)),
        Eq => Value::Bool(x == y),
        Ne => Value::Bool(x != y),
        Lt => Value::Bool(x < y),
        Gt => Value::Bool(x > y),
        Le => Value::Bool(x <= y),
        Ge => Value::Bool(x >= y),
        BinaryOp::And | BinaryOp::Or => unreachable!("logic handled above"),
    })
}

fn float_binop(op: BinaryOp, x: f32, y: f32) -> Value {
    use BinaryOp::{Add, Div, Eq, Ge, Gt, Le, Lt, Max, Min, Mod, Mul, Ne, Sub};
    match op {
        Add => Value::Float(x + y),
        Sub => Value::Float(x - y),
        Mul => Value::Float(x * y),
        Div => Value::Float(x / y),
        Mod => Value::Float(x % y),
        Min => Value::Float(x.min(y)),
        Max => Value::Float(x.max(y)),
        Eq => Value::Bool(x == y),
        Ne => Value::Bool(x != y),
        Lt => Value::Bool(x < y),
        Gt => Value::Bool(x > y),
        Le => Value::Bool(x <= y),
        Ge => Value::Bool(x >= y),
        BinaryOp::And | BinaryOp::Or => unreachable!("logic handled above"),
    }
}

/// Apply a unary operator to a numeric or boolean value.
///
/// # Errors
///
/// `TypeMismatch` for non-numeric operands.
pub fn numeric_unop(op: UnaryOp, v: &Value) -> Result<Value, RuntimeError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.truthy()?)),
        UnaryOp::Negate => match v {
            Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
            Value::Uint(u) => Ok(Value::Int((*u as i32).wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(RuntimeError::type_mismatch("-", other.kind(), other.kind())),
        },
    }
}

/// Render a numeric value as line text. Floats with no fractional part
/// print as integers, matching narrative output conventions.
#[must_use]
pub fn number_to_text(v: &Value) -> Option<String> {
    match v {
        Value::Int(i) => Some(i.to_string()),
        Value::Uint(u) => Some(u.to_string()),
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                Some(format!("{}", *f as i64))
            } else {
                Some(format!("{f}"))
            }
        }
        Value::Bool(b) => Some(if *b { "true".into() } else { "false".into() }),
        Value::None => Some(String::new()),
        _ => None,
    }
}
