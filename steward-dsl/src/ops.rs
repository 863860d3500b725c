//! Binary operations on DSL values.
//!
//! Arithmetic dispatch is a flat lookup table keyed by
//! `(lhs kind, rhs kind, operator)`. Comparisons are handled separately:
//! equality works across any pair of types (incompatible pairs compare
//! unequal), ordering is strongly typed and rejects cross-type operands.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use steward_core::{Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "//" => Self::IntDiv,
            "%" => Self::Mod,
            "**" => Self::Pow,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::IntDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }
}

type ArithFn = fn(&Value, &Value) -> Result<Value, String>;

/// Floor division, matching the DSL's `//` semantics (round toward
/// negative infinity, like the sign conventions of its `%`).
fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}

fn as_i64(value: &Value) -> i64 {
    match value {
        Value::Int(i) => *i,
        _ => 0,
    }
}

fn int_add(a: &Value, b: &Value) -> Result<Value, String> {
    as_i64(a)
        .checked_add(as_i64(b))
        .map(Value::Int)
        .ok_or_else(|| "Integer overflow.".to_string())
}

fn int_sub(a: &Value, b: &Value) -> Result<Value, String> {
    as_i64(a)
        .checked_sub(as_i64(b))
        .map(Value::Int)
        .ok_or_else(|| "Integer overflow.".to_string())
}

fn int_mul(a: &Value, b: &Value) -> Result<Value, String> {
    as_i64(a)
        .checked_mul(as_i64(b))
        .map(Value::Int)
        .ok_or_else(|| "Integer overflow.".to_string())
}

fn int_floor_div(a: &Value, b: &Value) -> Result<Value, String> {
    floor_div(as_i64(a), as_i64(b))
        .map(Value::Int)
        .ok_or_else(|| "Integer division by zero or overflow.".to_string())
}

fn int_mod(a: &Value, b: &Value) -> Result<Value, String> {
    floor_mod(as_i64(a), as_i64(b))
        .map(Value::Int)
        .ok_or_else(|| "Integer modulo by zero or overflow.".to_string())
}

fn int_pow(a: &Value, b: &Value) -> Result<Value, String> {
    let base = as_i64(a);
    let exp = as_i64(b);
    if exp < 0 {
        // A negative exponent leaves the integers, like `/` does.
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let exp = u32::try_from(exp).map_err(|_| "Exponent out of range.".to_string())?;
    base.checked_pow(exp)
        .map(Value::Int)
        .ok_or_else(|| "Integer overflow.".to_string())
}

fn float_add(a: &Value, b: &Value) -> Result<Value, String> {
    Ok(Value::Float(as_f64(a) + as_f64(b)))
}

fn float_sub(a: &Value, b: &Value) -> Result<Value, String> {
    Ok(Value::Float(as_f64(a) - as_f64(b)))
}

fn float_mul(a: &Value, b: &Value) -> Result<Value, String> {
    Ok(Value::Float(as_f64(a) * as_f64(b)))
}

fn float_div(a: &Value, b: &Value) -> Result<Value, String> {
    let rhs = as_f64(b);
    if rhs == 0.0 {
        return Err("Division by zero.".to_string());
    }
    Ok(Value::Float(as_f64(a) / rhs))
}

fn float_floor_div(a: &Value, b: &Value) -> Result<Value, String> {
    let rhs = as_f64(b);
    if rhs == 0.0 {
        return Err("Division by zero.".to_string());
    }
    Ok(Value::Float((as_f64(a) / rhs).floor()))
}

fn float_mod(a: &Value, b: &Value) -> Result<Value, String> {
    let rhs = as_f64(b);
    if rhs == 0.0 {
        return Err("Modulo by zero.".to_string());
    }
    Ok(Value::Float(as_f64(a).rem_euclid(rhs)))
}

fn float_pow(a: &Value, b: &Value) -> Result<Value, String> {
    Ok(Value::Float(as_f64(a).powf(as_f64(b))))
}

fn str_concat(a: &Value, b: &Value) -> Result<Value, String> {
    let (Value::Str(lhs), Value::Str(rhs)) = (a, b) else {
        return Err("String concatenation expects two strings.".to_string());
    };
    let mut out = lhs.value.clone();
    out.push_str(&rhs.value);
    if lhs.protected || rhs.protected {
        Ok(Value::protected_str(out))
    } else {
        Ok(Value::str(out))
    }
}

fn str_repeat(a: &Value, b: &Value) -> Result<Value, String> {
    let Value::Str(lhs) = a else {
        return Err("String repetition expects a string.".to_string());
    };
    let count = usize::try_from(as_i64(b)).unwrap_or(0);
    let out = lhs.value.repeat(count);
    if lhs.protected {
        Ok(Value::protected_str(out))
    } else {
        Ok(Value::str(out))
    }
}

static ARITH_TABLE: Lazy<HashMap<(ValueKind, ValueKind, BinOp), ArithFn>> = Lazy::new(|| {
    use BinOp::*;
    use ValueKind::{Float, Int, Str};

    let mut table: HashMap<(ValueKind, ValueKind, BinOp), ArithFn> = HashMap::new();

    table.insert((Int, Int, Add), int_add);
    table.insert((Int, Int, Sub), int_sub);
    table.insert((Int, Int, Mul), int_mul);
    // True division of integers leaves the integers.
    table.insert((Int, Int, Div), float_div);
    table.insert((Int, Int, IntDiv), int_floor_div);
    table.insert((Int, Int, Mod), int_mod);
    table.insert((Int, Int, Pow), int_pow);

    // Mixed int/float promotes to float.
    for pair in [(Int, Float), (Float, Int), (Float, Float)] {
        table.insert((pair.0, pair.1, Add), float_add);
        table.insert((pair.0, pair.1, Sub), float_sub);
        table.insert((pair.0, pair.1, Mul), float_mul);
        table.insert((pair.0, pair.1, Div), float_div);
        table.insert((pair.0, pair.1, IntDiv), float_floor_div);
        table.insert((pair.0, pair.1, Mod), float_mod);
        table.insert((pair.0, pair.1, Pow), float_pow);
    }

    table.insert((Str, Str, Add), str_concat);
    table.insert((Str, Int, Mul), str_repeat);

    table
});

/// Applies an arithmetic operator via the dispatch table.
pub fn apply_arith(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    match ARITH_TABLE.get(&(lhs.kind(), rhs.kind(), op)) {
        Some(func) => func(lhs, rhs),
        None => Err(format!(
            "No overload of operation {} for operands of types {} and {}.",
            op.symbol(),
            lhs.type_of().name,
            rhs.type_of().name,
        )),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Equality across any two values. Numeric operands compare by value;
/// otherwise incompatible kinds are simply unequal.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(a), Some(b)) = (numeric(lhs), numeric(rhs)) {
        return a == b;
    }
    if lhs.kind() != rhs.kind() {
        return false;
    }
    lhs == rhs
}

/// Applies a comparison operator. Ordering comparisons are strongly typed:
/// both operands must be numbers, or both strings.
pub fn apply_comparison(symbol: &str, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    match symbol {
        "==" => return Ok(Value::Bool(values_equal(lhs, rhs))),
        "!=" => return Ok(Value::Bool(!values_equal(lhs, rhs))),
        _ => {}
    }

    let ordering = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a.value.cmp(&b.value),
        _ => match (numeric(lhs), numeric(rhs)) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .ok_or_else(|| "Cannot order NaN values.".to_string())?,
            _ => {
                return Err(format!(
                    "Cannot order values of types {} and {}.",
                    lhs.type_of().name,
                    rhs.type_of().name,
                ))
            }
        },
    };

    let result = match symbol {
        "<" => ordering.is_lt(),
        ">" => ordering.is_gt(),
        "<=" => ordering.is_le(),
        ">=" => ordering.is_ge(),
        other => return Err(format!("Unknown comparison operator '{other}'.")),
    };
    Ok(Value::Bool(result))
}
