//! Numeric primitives: conversions, integer/float arithmetic with
//! wrap-around, and number <-> string coercion.

use super::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

/// How the fast path of an operator treats its operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    /// Integer result for two integers, float otherwise.
    Mixed,
    /// Always converts both operands to floats.
    Float,
    /// Both operands must have an exact integer representation.
    Int,
}

impl ArithOp {
    pub const ALL: [ArithOp; 12] = [
        ArithOp::Add,
        ArithOp::Sub,
        ArithOp::Mul,
        ArithOp::Mod,
        ArithOp::Pow,
        ArithOp::Div,
        ArithOp::IDiv,
        ArithOp::BAnd,
        ArithOp::BOr,
        ArithOp::BXor,
        ArithOp::Shl,
        ArithOp::Shr,
    ];

    pub fn domain(self) -> Domain {
        use ArithOp as A;
        match self {
            A::Add | A::Sub | A::Mul | A::Mod | A::IDiv => Domain::Mixed,
            A::Pow | A::Div => Domain::Float,
            A::BAnd | A::BOr | A::BXor | A::Shl | A::Shr => Domain::Int,
        }
    }

    /// Integer division and modulo raise on a zero divisor.
    pub fn may_raise(self) -> bool {
        matches!(self, ArithOp::Mod | ArithOp::IDiv)
    }

    pub fn name(self) -> &'static str {
        use ArithOp as A;
        match self {
            A::Add => "Add",
            A::Sub => "Sub",
            A::Mul => "Mul",
            A::Mod => "Mod",
            A::Pow => "Pow",
            A::Div => "Div",
            A::IDiv => "IDiv",
            A::BAnd => "BAnd",
            A::BOr => "BOr",
            A::BXor => "BXor",
            A::Shl => "Shl",
            A::Shr => "Shr",
        }
    }
}

/// Rounding used when converting a float to an integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum F2I {
    Exact,
    Floor,
    Ceil,
}

// -(2^63) is exactly representable, 2^63 is the first float above i64::MAX
const MIN_INT_F: f64 = -9223372036854775808.0;
const MAX_INT_F_EXCL: f64 = 9223372036854775808.0;

pub fn float_to_int(f: f64, mode: F2I) -> Option<i64> {
    let mut v = f.floor();
    if f != v {
        match mode {
            F2I::Exact => return None,
            F2I::Floor => {}
            F2I::Ceil => v += 1.0,
        }
    }
    if (MIN_INT_F..MAX_INT_F_EXCL).contains(&v) {
        Some(v as i64)
    } else {
        None
    }
}

#[inline]
pub fn float_to_int_exact(f: f64) -> Option<i64> {
    float_to_int(f, F2I::Exact)
}

/// Number value without string coercion.
#[inline]
pub fn to_float_ns(v: &Value) -> Option<f64> {
    match *v {
        Value::Int(i) => Some(i as f64),
        Value::Float(f) => Some(f),
        _ => None,
    }
}

/// Integer value without string coercion, floats must be integral.
#[inline]
pub fn to_int_ns(v: &Value) -> Option<i64> {
    match *v {
        Value::Int(i) => Some(i),
        Value::Float(f) => float_to_int_exact(f),
        _ => None,
    }
}

/// Numeric value of `v`, converting strings.
pub fn to_number(v: &Value) -> Option<Value> {
    match v {
        Value::Int(_) | Value::Float(_) => Some(v.clone()),
        Value::Str(s) => str_to_number(s.as_str()),
        _ => None,
    }
}

pub fn to_float(v: &Value) -> Option<f64> {
    match to_number(v)? {
        Value::Int(i) => Some(i as f64),
        Value::Float(f) => Some(f),
        _ => None,
    }
}

pub fn to_int(v: &Value, mode: F2I) -> Option<i64> {
    match to_number(v)? {
        Value::Int(i) => Some(i),
        Value::Float(f) => float_to_int(f, mode),
        _ => None,
    }
}

pub fn imod(m: i64, n: i64) -> i64 {
    debug_assert!(n != 0);
    if n == -1 {
        return 0;
    }
    let r = m % n;
    if r != 0 && (r ^ n) < 0 { r + n } else { r }
}

pub fn idiv(m: i64, n: i64) -> i64 {
    debug_assert!(n != 0);
    if n == -1 {
        return m.wrapping_neg();
    }
    let q = m / n;
    if (m ^ n) < 0 && m % n != 0 { q - 1 } else { q }
}

pub fn fmod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if if m > 0.0 { b < 0.0 } else { m < 0.0 && b != m } {
        m + b
    } else {
        m
    }
}

#[inline]
pub fn fpow(a: f64, b: f64) -> f64 {
    if b == 2.0 { a * a } else { a.powf(b) }
}

pub fn shift_left(x: i64, y: i64) -> i64 {
    if y < 0 {
        if y <= -64 {
            0
        } else {
            ((x as u64) >> (-y) as u32) as i64
        }
    } else if y >= 64 {
        0
    } else {
        ((x as u64) << y as u32) as i64
    }
}

#[inline]
pub fn shift_right(x: i64, y: i64) -> i64 {
    shift_left(x, y.wrapping_neg())
}

/// Integer fast path. `None` for a zero divisor of `%` and `//`,
/// which the caller reports as an error.
pub fn int_arith(op: ArithOp, a: i64, b: i64) -> Option<i64> {
    use ArithOp as A;
    Some(match op {
        A::Add => a.wrapping_add(b),
        A::Sub => a.wrapping_sub(b),
        A::Mul => a.wrapping_mul(b),
        A::Mod if b == 0 => return None,
        A::Mod => imod(a, b),
        A::IDiv if b == 0 => return None,
        A::IDiv => idiv(a, b),
        A::BAnd => a & b,
        A::BOr => a | b,
        A::BXor => a ^ b,
        A::Shl => shift_left(a, b),
        A::Shr => shift_right(a, b),
        A::Pow | A::Div => unreachable!("float-only operator"),
    })
}

pub fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    use ArithOp as A;
    match op {
        A::Add => a + b,
        A::Sub => a - b,
        A::Mul => a * b,
        A::Mod => fmod(a, b),
        A::Pow => fpow(a, b),
        A::Div => a / b,
        A::IDiv => (a / b).floor(),
        A::BAnd | A::BOr | A::BXor | A::Shl | A::Shr => unreachable!("integer-only operator"),
    }
}

/// Outcome of trying an operator on two values without metamethods.
#[derive(Debug, PartialEq)]
pub enum Arith {
    Done(Value),
    DivByZero,
    /// Not applicable to these operand types.
    NotNumbers,
}

/// The inline fast path shared by every engine: numbers only, no
/// string coercion.
pub fn arith_fast(op: ArithOp, a: &Value, b: &Value) -> Arith {
    match op.domain() {
        Domain::Mixed => {
            if let (Value::Int(x), Value::Int(y)) = (a, b) {
                return match int_arith(op, *x, *y) {
                    Some(v) => Arith::Done(Value::Int(v)),
                    None => Arith::DivByZero,
                };
            }
            match (to_float_ns(a), to_float_ns(b)) {
                (Some(x), Some(y)) => Arith::Done(Value::Float(float_arith(op, x, y))),
                _ => Arith::NotNumbers,
            }
        }
        Domain::Float => match (to_float_ns(a), to_float_ns(b)) {
            (Some(x), Some(y)) => Arith::Done(Value::Float(float_arith(op, x, y))),
            _ => Arith::NotNumbers,
        },
        Domain::Int => match (to_int_ns(a), to_int_ns(b)) {
            (Some(x), Some(y)) => match int_arith(op, x, y) {
                Some(v) => Arith::Done(Value::Int(v)),
                None => Arith::DivByZero,
            },
            _ => Arith::NotNumbers,
        },
    }
}

/// The string-coercing arithmetic used when a fast path failed and no
/// metamethod is defined. Bitwise operators never coerce strings.
pub fn arith_coerce(op: ArithOp, a: &Value, b: &Value) -> Arith {
    if op.domain() == Domain::Int {
        return Arith::NotNumbers;
    }
    match (to_number(a), to_number(b)) {
        (Some(x), Some(y)) => arith_fast(op, &x, &y),
        _ => Arith::NotNumbers,
    }
}

/// `i < f` without losing precision.
pub fn lt_int_float(i: i64, f: f64) -> bool {
    if fits_float(i) {
        (i as f64) < f
    } else {
        match float_to_int(f, F2I::Ceil) {
            Some(fi) => i < fi,
            None => f > 0.0,
        }
    }
}

pub fn le_int_float(i: i64, f: f64) -> bool {
    if fits_float(i) {
        (i as f64) <= f
    } else {
        match float_to_int(f, F2I::Floor) {
            Some(fi) => i <= fi,
            None => f > 0.0,
        }
    }
}

pub fn lt_float_int(f: f64, i: i64) -> bool {
    if fits_float(i) {
        f < (i as f64)
    } else {
        match float_to_int(f, F2I::Floor) {
            Some(fi) => fi < i,
            None => f < 0.0,
        }
    }
}

pub fn le_float_int(f: f64, i: i64) -> bool {
    if fits_float(i) {
        f <= (i as f64)
    } else {
        match float_to_int(f, F2I::Ceil) {
            Some(fi) => fi <= i,
            None => f < 0.0,
        }
    }
}

#[inline]
fn fits_float(i: i64) -> bool {
    const MAX: i64 = 1 << 53;
    (-MAX..=MAX).contains(&i)
}

/// Numeric `<`, or `None` if either side is not a number.
pub fn num_lt(a: &Value, b: &Value) -> Option<bool> {
    Some(match (a, b) {
        (Value::Int(x), Value::Int(y)) => x < y,
        (Value::Float(x), Value::Float(y)) => x < y,
        (Value::Int(x), Value::Float(y)) => lt_int_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => lt_float_int(*x, *y),
        _ => return None,
    })
}

pub fn num_le(a: &Value, b: &Value) -> Option<bool> {
    Some(match (a, b) {
        (Value::Int(x), Value::Int(y)) => x <= y,
        (Value::Float(x), Value::Float(y)) => x <= y,
        (Value::Int(x), Value::Float(y)) => le_int_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => le_float_int(*x, *y),
        _ => return None,
    })
}

/// `%.14g`, with `.0` appended to integral values so floats stay
/// distinguishable from integers.
pub fn fmt_float(v: f64) -> String {
    if v.is_nan() {
        return if v.is_sign_negative() { "-nan" } else { "nan" }.to_owned();
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf" } else { "inf" }.to_owned();
    }
    let s = fmt_g(v, 14);
    if s.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        s + ".0"
    } else {
        s
    }
}

fn fmt_g(v: f64, precision: usize) -> String {
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }
    let sci = format!("{:.*e}", precision - 1, v);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= precision as i32 {
        let mantissa = strip_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        strip_zeros(&format!("{v:.decimals$}")).to_owned()
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Converts a numeral (decimal or hexadecimal, surrounding whitespace
/// allowed) to an integer or float.
pub fn str_to_number(s: &str) -> Option<Value> {
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        return None;
    }
    let (neg, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        return hex_to_number(hex, neg);
    }
    if body.is_empty()
        || !body
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    if body.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(v) = s.parse::<i64>() {
            return Some(Value::Int(v));
        }
        // decimal integers that overflow become floats
    }
    s.parse::<f64>().ok().map(Value::Float)
}

fn hex_to_number(hex: &str, neg: bool) -> Option<Value> {
    let (mantissa, exp) = match hex.find(['p', 'P']) {
        Some(at) => (&hex[..at], Some(hex[at + 1..].parse::<i32>().ok()?)),
        None => (hex, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (mantissa, None),
    };
    if int_part.is_empty() && frac_part.is_none_or(str::is_empty) {
        return None;
    }
    if frac_part.is_none() && exp.is_none() {
        // hexadecimal integers wrap around
        let mut v: u64 = 0;
        for c in int_part.chars() {
            v = v.wrapping_mul(16).wrapping_add(c.to_digit(16)? as u64);
        }
        let v = v as i64;
        return Some(Value::Int(if neg { v.wrapping_neg() } else { v }));
    }
    let mut v = 0.0f64;
    for c in int_part.chars() {
        v = v * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.unwrap_or("").chars() {
        v += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    let v = v * 2f64.powi(exp.unwrap_or(0));
    Some(Value::Float(if neg { -v } else { v }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formatting() {
        assert_eq!(fmt_float(1.0), "1.0");
        assert_eq!(fmt_float(-0.5), "-0.5");
        assert_eq!(fmt_float(0.1), "0.1");
        assert_eq!(fmt_float(1e15), "1e+15");
        assert_eq!(fmt_float(123456789012.5), "123456789012.5");
        assert_eq!(fmt_float(1.0 / 3.0), "0.33333333333333");
        assert_eq!(fmt_float(1e-5), "1e-05");
        assert_eq!(fmt_float(f64::INFINITY), "inf");
        assert_eq!(fmt_float(2f64.powi(53)), "9.007199254741e+15");
    }

    #[test]
    fn numerals() {
        assert_eq!(str_to_number(" 10 "), Some(Value::Int(10)));
        assert_eq!(str_to_number("0x10"), Some(Value::Int(16)));
        assert_eq!(str_to_number("0xffffffffffffffff"), Some(Value::Int(-1)));
        assert_eq!(str_to_number("1.5"), Some(Value::Float(1.5)));
        assert_eq!(str_to_number("-2e2"), Some(Value::Float(-200.0)));
        assert_eq!(str_to_number("0x1p4"), Some(Value::Float(16.0)));
        assert_eq!(str_to_number("inf"), None);
        assert_eq!(str_to_number("1e"), None);
        assert_eq!(str_to_number(""), None);
        assert!(matches!(
            str_to_number("9223372036854775808"),
            Some(Value::Float(_))
        ));
    }

    #[test]
    fn integer_division_rounds_down() {
        assert_eq!(idiv(7, 2), 3);
        assert_eq!(idiv(-7, 2), -4);
        assert_eq!(idiv(i64::MIN, -1), i64::MIN);
        assert_eq!(imod(-7, 2), 1);
        assert_eq!(imod(7, -2), -1);
        assert_eq!(imod(i64::MIN, -1), 0);
        assert_eq!(fmod(-7.0, 2.0), 1.0);
        assert_eq!(fmod(7.0, -2.0), -1.0);
    }

    #[test]
    fn shifts_saturate() {
        assert_eq!(shift_left(1, 63), i64::MIN);
        assert_eq!(shift_left(1, 64), 0);
        assert_eq!(shift_right(-1, 1), i64::MAX);
        assert_eq!(shift_right(1, i64::MIN), 0);
        assert_eq!(shift_left(8, -2), 2);
    }

    #[test]
    fn mixed_comparisons_are_exact() {
        let big = (1i64 << 62) + 1;
        assert!(!lt_int_float(big, (1i64 << 62) as f64));
        assert!(lt_float_int((1i64 << 62) as f64, big));
        assert!(le_int_float(i64::MAX, f64::INFINITY));
        assert!(!lt_int_float(i64::MIN, f64::NEG_INFINITY));
        assert_eq!(num_lt(&Value::Int(1), &Value::str("2")), None);
    }
}
