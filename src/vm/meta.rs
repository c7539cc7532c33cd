//! Metamethods and the slow paths of every operator: binary fallbacks,
//! comparisons, length, concatenation and `__index`/`__newindex` chains.

use super::{
    Runtime,
    number::{self, Arith, ArithOp},
    value::{TableRef, Value},
};
use crate::error::Result;

/// Bound on `__index`/`__newindex` chains.
const MAX_TAG_LOOP: usize = 2000;

macro_rules! events {
    ($($name:ident = $str:literal),* $(,)?) => {
        /// Metamethod events, numbered as in the `MMBIN` family's `C` operand.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Tm {
            $($name),*
        }

        impl Tm {
            pub const ALL: &[Tm] = &[$(Tm::$name),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Tm::$name => $str),*
                }
            }
        }
    };
}

events! {
    Index = "__index",
    NewIndex = "__newindex",
    Gc = "__gc",
    Mode = "__mode",
    Len = "__len",
    Eq = "__eq",
    Add = "__add",
    Sub = "__sub",
    Mul = "__mul",
    Mod = "__mod",
    Pow = "__pow",
    Div = "__div",
    IDiv = "__idiv",
    BAnd = "__band",
    BOr = "__bor",
    BXor = "__bxor",
    Shl = "__shl",
    Shr = "__shr",
    Unm = "__unm",
    BNot = "__bnot",
    Lt = "__lt",
    Le = "__le",
    Concat = "__concat",
    Call = "__call",
    Close = "__close",
}

impl Tm {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Tm> {
        Self::ALL.get(v as usize).copied()
    }

    /// The arithmetic operator behind a binary event in `Add..=Shr`.
    pub fn arith_op(self) -> Option<ArithOp> {
        Some(match self {
            Tm::Add => ArithOp::Add,
            Tm::Sub => ArithOp::Sub,
            Tm::Mul => ArithOp::Mul,
            Tm::Mod => ArithOp::Mod,
            Tm::Pow => ArithOp::Pow,
            Tm::Div => ArithOp::Div,
            Tm::IDiv => ArithOp::IDiv,
            Tm::BAnd => ArithOp::BAnd,
            Tm::BOr => ArithOp::BOr,
            Tm::BXor => ArithOp::BXor,
            Tm::Shl => ArithOp::Shl,
            Tm::Shr => ArithOp::Shr,
            _ => return None,
        })
    }

    pub fn from_arith(op: ArithOp) -> Tm {
        match op {
            ArithOp::Add => Tm::Add,
            ArithOp::Sub => Tm::Sub,
            ArithOp::Mul => Tm::Mul,
            ArithOp::Mod => Tm::Mod,
            ArithOp::Pow => Tm::Pow,
            ArithOp::Div => Tm::Div,
            ArithOp::IDiv => Tm::IDiv,
            ArithOp::BAnd => Tm::BAnd,
            ArithOp::BOr => Tm::BOr,
            ArithOp::BXor => Tm::BXor,
            ArithOp::Shl => Tm::Shl,
            ArithOp::Shr => Tm::Shr,
        }
    }

    fn is_bitwise(self) -> bool {
        matches!(
            self,
            Tm::BAnd | Tm::BOr | Tm::BXor | Tm::Shl | Tm::Shr | Tm::BNot
        )
    }
}

/// Which immediate comparison a `LTI`-family slow path performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderI {
    Lt,
    Le,
    Gt,
    Ge,
}

impl OrderI {
    pub fn name(self) -> &'static str {
        match self {
            OrderI::Lt => "Lt",
            OrderI::Le => "Le",
            OrderI::Gt => "Gt",
            OrderI::Ge => "Ge",
        }
    }
}

impl Runtime {
    pub fn metatable(&self, v: &Value) -> Option<TableRef> {
        match v {
            Value::Table(t) => t.borrow().metatable.clone(),
            _ => None,
        }
    }

    /// `nil` when `v` has no handler for `event`.
    pub fn metamethod(&self, v: &Value, event: Tm) -> Value {
        match self.metatable(v) {
            Some(mt) => mt.borrow().get_str(event.name()),
            None => Value::Nil,
        }
    }

    /// Calls `f(args...)` above the current top, keeping `nresults`
    /// results there.
    pub(crate) fn call_meta(&mut self, f: Value, args: &[Value], nresults: i32) -> Result<usize> {
        let func = self.top;
        self.check_stack(args.len() + 1)?;
        self.push(f);
        for arg in args {
            self.push(arg.clone());
        }
        self.call(func, nresults)?;
        Ok(func)
    }

    /// Calls a handler for its first result.
    pub fn call_tm_res(&mut self, f: Value, p1: Value, p2: Value) -> Result<Value> {
        let func = self.call_meta(f, &[p1, p2], 1)?;
        let v = std::mem::take(&mut self.stack[func]);
        self.top = func;
        Ok(v)
    }

    pub fn call_tm(&mut self, f: Value, p1: Value, p2: Value, p3: Value) -> Result<()> {
        self.call_meta(f, &[p1, p2, p3], 0)?;
        Ok(())
    }

    fn bin_tm(&self, p1: &Value, p2: &Value, event: Tm) -> Value {
        let tm = self.metamethod(p1, event);
        if tm.is_nil() {
            self.metamethod(p2, event)
        } else {
            tm
        }
    }

    /// The binary-operator fallback: a metamethod of either operand,
    /// then string coercion, then the matching error.
    pub fn try_bin_tm(&mut self, p1: &Value, p2: &Value, event: Tm) -> Result<Value> {
        self.stats.fallbacks += 1;
        let tm = self.bin_tm(p1, p2, event);
        if !tm.is_nil() {
            return self.call_tm_res(tm, p1.clone(), p2.clone());
        }
        if let Some(op) = event.arith_op() {
            if matches!(p1, Value::Str(_)) || matches!(p2, Value::Str(_)) {
                match number::arith_coerce(op, p1, p2) {
                    Arith::Done(v) => return Ok(v),
                    Arith::DivByZero => return Err(self.div_by_zero(op)),
                    Arith::NotNumbers => {}
                }
            }
        }
        if event == Tm::Unm {
            if let Some(n) = number::to_number(p1) {
                return Ok(match n {
                    Value::Int(i) => Value::Int(i.wrapping_neg()),
                    Value::Float(f) => Value::Float(-f),
                    other => other,
                });
            }
        }
        Err(match event {
            _ if event.is_bitwise() => {
                if number::to_float_ns(p1).is_some() && number::to_float_ns(p2).is_some() {
                    self.runtime_error("number has no integer representation")
                } else {
                    self.op_error(p1, p2, "perform bitwise operation on")
                }
            }
            Tm::Concat => {
                let culprit = if is_concatable(p1) { p2 } else { p1 };
                self.type_error(culprit, "concatenate")
            }
            _ => self.op_error(p1, p2, "perform arithmetic on"),
        })
    }

    fn op_error(&self, p1: &Value, p2: &Value, msg: &str) -> crate::error::Error {
        let culprit = if number::to_float_ns(p1).is_none() { p1 } else { p2 };
        self.type_error(culprit, msg)
    }

    pub(crate) fn div_by_zero(&self, op: ArithOp) -> crate::error::Error {
        match op {
            ArithOp::Mod => self.runtime_error("attempt to perform 'n%0'"),
            _ => self.runtime_error("attempt to perform 'n//0'"),
        }
    }

    /// `==` with `__eq`.
    pub fn equal(&mut self, a: &Value, b: &Value) -> Result<bool> {
        match (a, b) {
            (Value::Table(x), Value::Table(y)) => {
                if std::rc::Rc::ptr_eq(x, y) {
                    return Ok(true);
                }
                let tm = self.bin_tm(a, b, Tm::Eq);
                if tm.is_nil() {
                    return Ok(false);
                }
                let r = self.call_tm_res(tm, a.clone(), b.clone())?;
                Ok(!r.is_falsy())
            }
            _ => Ok(a.raw_eq(b)),
        }
    }

    pub fn less_than(&mut self, a: &Value, b: &Value) -> Result<bool> {
        if let Some(r) = number::num_lt(a, b) {
            return Ok(r);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            return Ok(x.as_str() < y.as_str());
        }
        self.call_order_tm(a, b, Tm::Lt)
    }

    pub fn less_equal(&mut self, a: &Value, b: &Value) -> Result<bool> {
        if let Some(r) = number::num_le(a, b) {
            return Ok(r);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            return Ok(x.as_str() <= y.as_str());
        }
        self.call_order_tm(a, b, Tm::Le)
    }

    pub fn call_order_tm(&mut self, a: &Value, b: &Value, event: Tm) -> Result<bool> {
        let tm = self.bin_tm(a, b, event);
        if tm.is_nil() {
            let (t1, t2) = (a.type_name(), b.type_name());
            return Err(if t1 == t2 {
                self.runtime_error(format_args!("attempt to compare two {t1} values"))
            } else {
                self.runtime_error(format_args!("attempt to compare {t1} with {t2}"))
            });
        }
        let r = self.call_tm_res(tm, a.clone(), b.clone())?;
        Ok(!r.is_falsy())
    }

    /// Slow path of a comparison against an immediate. `flip` means
    /// the immediate is the left operand.
    pub fn call_order_i_tm(&mut self, a: &Value, imm: i32, is_float: bool, cmp: OrderI) -> Result<bool> {
        let imm = if is_float {
            Value::Float(imm as f64)
        } else {
            Value::Int(imm as i64)
        };
        match cmp {
            OrderI::Lt => self.call_order_tm(a, &imm, Tm::Lt),
            OrderI::Le => self.call_order_tm(a, &imm, Tm::Le),
            OrderI::Gt => self.call_order_tm(&imm, a, Tm::Lt),
            OrderI::Ge => self.call_order_tm(&imm, a, Tm::Le),
        }
    }

    /// `#v`.
    pub fn objlen(&mut self, v: &Value) -> Result<Value> {
        let tm = self.metamethod(v, Tm::Len);
        if !tm.is_nil() {
            return self.call_tm_res(tm, v.clone(), v.clone());
        }
        match v {
            Value::Table(t) => Ok(Value::Int(t.borrow().len())),
            Value::Str(s) => Ok(Value::Int(s.len() as i64)),
            _ => Err(self.type_error(v, "get length of")),
        }
    }

    /// Concatenates the `total` values just below `top`, leaving the
    /// result in the first of them.
    pub fn concat(&mut self, mut total: usize) -> Result<()> {
        while total > 1 {
            let top = self.top;
            let mut n = 2;
            let (a, b) = (self.stack[top - 2].clone(), self.stack[top - 1].clone());
            if !is_concatable(&a) || !is_concatable(&b) {
                let v = self.try_bin_tm(&a, &b, Tm::Concat)?;
                self.stack[top - 2] = v;
            } else if is_empty_str(&b) {
                let s = to_str(&a);
                self.stack[top - 2] = Value::Str(self.heap.intern_owned(s));
            } else if is_empty_str(&a) {
                self.stack[top - 2] = b;
            } else {
                while n < total && is_concatable(&self.stack[top - n - 1]) {
                    n += 1;
                }
                let mut buf = String::new();
                for v in &self.stack[top - n..top] {
                    push_str(&mut buf, v);
                }
                self.stack[top - n] = Value::Str(self.heap.intern_owned(buf));
            }
            total -= n - 1;
            self.top -= n - 1;
        }
        Ok(())
    }

    /// `t[key]` with the `__index` chain. Assumes a raw lookup may
    /// already have failed.
    pub fn index(&mut self, mut t: Value, key: &Value) -> Result<Value> {
        for _ in 0..MAX_TAG_LOOP {
            let tm = match &t {
                Value::Table(tbl) => {
                    let v = tbl.borrow().get(key);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    let tm = self.metamethod(&t, Tm::Index);
                    if tm.is_nil() {
                        return Ok(Value::Nil);
                    }
                    tm
                }
                _ => {
                    let tm = self.metamethod(&t, Tm::Index);
                    if tm.is_nil() {
                        return Err(self.type_error(&t, "index"));
                    }
                    tm
                }
            };
            if let Value::Function(_) = tm {
                return self.call_tm_res(tm, t, key.clone());
            }
            t = tm;
        }
        Err(self.runtime_error("'__index' chain too long; possible loop"))
    }

    /// `t[key] = val` with the `__newindex` chain.
    pub fn set_index(&mut self, mut t: Value, key: Value, val: Value) -> Result<()> {
        for _ in 0..MAX_TAG_LOOP {
            let tm = match &t {
                Value::Table(tbl) => {
                    let present = !tbl.borrow().get(&key).is_nil();
                    let tm = if present {
                        Value::Nil
                    } else {
                        self.metamethod(&t, Tm::NewIndex)
                    };
                    if tm.is_nil() {
                        let r = tbl.borrow_mut().set(&key, val);
                        self.heap.barrier();
                        return r.map_err(|e| self.runtime_error(e.message()));
                    }
                    tm
                }
                _ => {
                    let tm = self.metamethod(&t, Tm::NewIndex);
                    if tm.is_nil() {
                        return Err(self.type_error(&t, "index"));
                    }
                    tm
                }
            };
            if let Value::Function(_) = tm {
                return self.call_tm(tm, t, key, val);
            }
            t = tm;
        }
        Err(self.runtime_error("'__newindex' chain too long; possible loop"))
    }

    /// `tostring(v)`, honoring `__tostring`.
    pub fn tostring(&mut self, v: &Value) -> Result<Value> {
        let tm = match self.metatable(v) {
            Some(mt) => mt.borrow().get_str("__tostring"),
            None => Value::Nil,
        };
        if !tm.is_nil() {
            let r = self.call_tm_res(tm, v.clone(), Value::Nil)?;
            return match r {
                Value::Str(_) => Ok(r),
                _ => Err(self.runtime_error("'__tostring' must return a string")),
            };
        }
        Ok(match v {
            Value::Str(_) => v.clone(),
            _ => Value::Str(self.heap.intern_owned(v.to_string())),
        })
    }
}

fn is_concatable(v: &Value) -> bool {
    matches!(v, Value::Str(_) | Value::Int(_) | Value::Float(_))
}

fn is_empty_str(v: &Value) -> bool {
    matches!(v, Value::Str(s) if s.is_empty())
}

fn push_str(buf: &mut String, v: &Value) {
    use std::fmt::Write;
    match v {
        Value::Str(s) => buf.push_str(s.as_str()),
        Value::Int(i) => {
            let _ = write!(buf, "{i}");
        }
        Value::Float(f) => buf.push_str(&number::fmt_float(*f)),
        _ => {}
    }
}

fn to_str(v: &Value) -> String {
    let mut buf = String::new();
    push_str(&mut buf, v);
    buf
}
