//! The base library.
//!
//! Every builtin is a [`NativeCallback`]: its arguments are the stack
//! slots between its frame's function and `top`, and it returns how
//! many results it pushed.

use std::io::Write as _;

use super::{
    FrameId, Runtime,
    call::MULTRET,
    number::{self, F2I},
    value::{NativeCallback, TableRef, Value},
};
use crate::error::{Error, Result, runtime_error};

pub(crate) fn open(rt: &mut Runtime) {
    const BUILTINS: &[(&str, NativeCallback)] = &[
        ("assert", assert),
        ("collectgarbage", collectgarbage),
        ("error", error),
        ("getmetatable", getmetatable),
        ("ipairs", ipairs),
        ("next", next),
        ("pairs", pairs),
        ("pcall", pcall),
        ("print", print),
        ("rawequal", rawequal),
        ("rawget", rawget),
        ("rawlen", rawlen),
        ("rawset", rawset),
        ("select", select),
        ("setmetatable", setmetatable),
        ("tonumber", tonumber),
        ("tostring", tostring),
        ("type", type_),
    ];
    for &(name, f) in BUILTINS {
        rt.set_global(name, Value::native(name, f));
    }
    let g = Value::Table(rt.globals.clone());
    rt.set_global("_G", g);
    let version = rt.intern("Lua 5.4");
    rt.set_global("_VERSION", version);
}

/// Arguments of the running builtin.
struct Args {
    base: usize,
    len: usize,
    name: &'static str,
}

impl Args {
    fn new(rt: &Runtime, name: &'static str) -> Self {
        let func = rt.frame(rt.current()).func;
        Self {
            base: func + 1,
            len: rt.top - func - 1,
            name,
        }
    }

    /// 1-based; `nil` past the end.
    fn get(&self, rt: &Runtime, i: usize) -> Value {
        if i <= self.len {
            rt.stack[self.base + i - 1].clone()
        } else {
            Value::Nil
        }
    }

    fn any(&self, rt: &Runtime, i: usize) -> Result<Value> {
        if i > self.len {
            return Err(self.bad(rt, i, "value expected"));
        }
        Ok(self.get(rt, i))
    }

    fn table(&self, rt: &Runtime, i: usize) -> Result<TableRef> {
        match self.get(rt, i) {
            Value::Table(t) => Ok(t),
            v => Err(self.expected(rt, i, "table", &v)),
        }
    }

    fn int(&self, rt: &Runtime, i: usize) -> Result<i64> {
        let v = self.get(rt, i);
        match number::to_int(&v, F2I::Exact) {
            Some(n) => Ok(n),
            None if number::to_number(&v).is_some() => {
                Err(self.bad(rt, i, "number has no integer representation"))
            }
            None => Err(self.expected(rt, i, "number", &v)),
        }
    }

    fn opt_int(&self, rt: &Runtime, i: usize, default: i64) -> Result<i64> {
        match self.get(rt, i) {
            Value::Nil => Ok(default),
            _ => self.int(rt, i),
        }
    }

    fn expected(&self, rt: &Runtime, i: usize, what: &str, got: &Value) -> Error {
        let got = if i > self.len { "no value" } else { got.type_name() };
        self.bad(rt, i, &format!("{what} expected, got {got}"))
    }

    fn bad(&self, rt: &Runtime, i: usize, msg: &str) -> Error {
        caller_error(rt, format!("bad argument #{i} to '{}' ({msg})", self.name))
    }
}

/// Position prefix of the frame `level` calls above the running builtin.
fn location(rt: &Runtime, level: usize) -> String {
    let mut id = Some(rt.current());
    for _ in 0..level {
        id = id.and_then(|id| rt.frame(id).previous);
    }
    let Some(id) = id else {
        return String::new();
    };
    match (rt.frame(id).closure.as_ref(), rt.current_line(id)) {
        (Some(cl), Some(line)) => format!("{}:{line}: ", cl.proto.chunk_id()),
        _ => String::new(),
    }
}

fn caller_error(rt: &Runtime, msg: String) -> Error {
    runtime_error(format!("{}{msg}", location(rt, 1)))
}

fn ret(rt: &mut Runtime, values: &[Value]) -> Result<usize> {
    rt.check_stack(values.len())?;
    for v in values {
        rt.push(v.clone());
    }
    Ok(values.len())
}

fn print(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "print");
    let mut line = String::new();
    for i in 1..=args.len {
        if i > 1 {
            line.push('\t');
        }
        let v = args.get(rt, i);
        match rt.tostring(&v)? {
            Value::Str(s) => line.push_str(s.as_str()),
            other => line.push_str(&other.to_string()),
        }
    }
    line.push('\n');
    rt.out
        .write_all(line.as_bytes())
        .map_err(|e| runtime_error(format!("print: {e}")))?;
    Ok(0)
}

fn type_(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "type");
    let v = args.any(rt, 1)?;
    let name = rt.intern(v.type_name());
    ret(rt, &[name])
}

fn tostring(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "tostring");
    let v = args.any(rt, 1)?;
    let s = rt.tostring(&v)?;
    ret(rt, &[s])
}

fn tonumber(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "tonumber");
    let v = args.any(rt, 1)?;
    let result = match args.get(rt, 2) {
        Value::Nil => number::to_number(&v).unwrap_or(Value::Nil),
        _ => {
            let base = args.int(rt, 2)?;
            if !(2..=36).contains(&base) {
                return Err(args.bad(rt, 2, "base out of range"));
            }
            let Value::Str(s) = &v else {
                return Err(args.expected(rt, 1, "string", &v));
            };
            parse_int_base(s.as_str().trim(), base as u32).map_or(Value::Nil, Value::Int)
        }
    };
    ret(rt, &[result])
}

fn parse_int_base(s: &str, base: u32) -> Option<i64> {
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(base)?;
        n = n.wrapping_mul(base as i64).wrapping_add(d as i64);
    }
    Some(if neg { n.wrapping_neg() } else { n })
}

fn ipairs(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "ipairs");
    let t = args.any(rt, 1)?;
    ret(rt, &[Value::native("ipairs_aux", ipairs_aux), t, Value::Int(0)])
}

fn ipairs_aux(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "ipairs_aux");
    let t = args.get(rt, 1);
    let i = args.int(rt, 2)?.wrapping_add(1);
    let v = match &t {
        Value::Table(tbl) if rt.metatable(&t).is_none() => tbl.borrow().get_int(i),
        _ => rt.index(t.clone(), &Value::Int(i))?,
    };
    if v.is_nil() {
        ret(rt, &[Value::Nil])
    } else {
        ret(rt, &[Value::Int(i), v])
    }
}

fn next(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "next");
    let t = args.table(rt, 1)?;
    let key = args.get(rt, 2);
    let entry = t
        .borrow()
        .next(&key)
        .map_err(|e| caller_error(rt, e.message().to_owned()))?;
    match entry {
        Some((k, v)) => ret(rt, &[k, v]),
        None => ret(rt, &[Value::Nil]),
    }
}

fn pairs(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "pairs");
    let t = args.any(rt, 1)?;
    let tm = match rt.metatable(&t) {
        Some(mt) => mt.borrow().get_str("__pairs"),
        None => Value::Nil,
    };
    if !tm.is_nil() {
        let func = rt.top;
        rt.check_stack(2)?;
        rt.push(tm);
        rt.push(t);
        rt.call(func, 3)?;
        return Ok(3);
    }
    if !matches!(t, Value::Table(_)) {
        return Err(args.expected(rt, 1, "table", &t));
    }
    ret(rt, &[Value::native("next", next), t, Value::Nil])
}

fn select(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "select");
    let n = args.len as i64;
    if let Value::Str(s) = args.get(rt, 1) {
        if s.as_str() == "#" {
            return ret(rt, &[Value::Int(n - 1)]);
        }
    }
    let i = args.int(rt, 1)?;
    let first = if i < 0 {
        n + i
    } else if i == 0 {
        return Err(args.bad(rt, 1, "index out of range"));
    } else {
        i.min(n)
    };
    if first < 1 {
        return Err(args.bad(rt, 1, "index out of range"));
    }
    let values: Vec<Value> = (first as usize + 1..=args.len).map(|i| args.get(rt, i)).collect();
    ret(rt, &values)
}

fn rawequal(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "rawequal");
    let (a, b) = (args.any(rt, 1)?, args.any(rt, 2)?);
    ret(rt, &[Value::Bool(a.raw_eq(&b))])
}

fn rawget(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "rawget");
    let t = args.table(rt, 1)?;
    let v = t.borrow().get(&args.get(rt, 2));
    ret(rt, &[v])
}

fn rawset(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "rawset");
    let t = args.table(rt, 1)?;
    let (k, v) = (args.get(rt, 2), args.get(rt, 3));
    let r = t.borrow_mut().set(&k, v);
    r.map_err(|e| caller_error(rt, e.message().to_owned()))?;
    rt.heap.barrier();
    ret(rt, &[Value::Table(t)])
}

fn rawlen(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "rawlen");
    let n = match args.get(rt, 1) {
        Value::Table(t) => t.borrow().len(),
        Value::Str(s) => s.len() as i64,
        _ => return Err(args.bad(rt, 1, "table or string expected")),
    };
    ret(rt, &[Value::Int(n)])
}

fn setmetatable(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "setmetatable");
    let t = args.table(rt, 1)?;
    let mt = match args.get(rt, 2) {
        Value::Nil => None,
        Value::Table(mt) => Some(mt),
        v => return Err(args.expected(rt, 2, "nil or table", &v)),
    };
    if let Some(old) = t.borrow().metatable() {
        if !old.borrow().get_str("__metatable").is_nil() {
            return Err(caller_error(rt, "cannot change a protected metatable".into()));
        }
    }
    t.borrow_mut().set_metatable(mt);
    rt.heap.barrier();
    ret(rt, &[Value::Table(t)])
}

fn getmetatable(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "getmetatable");
    let v = args.any(rt, 1)?;
    let result = match rt.metatable(&v) {
        None => Value::Nil,
        Some(mt) => {
            let protected = mt.borrow().get_str("__metatable");
            if protected.is_nil() {
                Value::Table(mt)
            } else {
                protected
            }
        }
    };
    ret(rt, &[result])
}

fn assert(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "assert");
    let v = args.any(rt, 1)?;
    if !v.is_falsy() {
        return Ok(args.len);
    }
    match args.get(rt, 2) {
        Value::Nil => Err(caller_error(rt, "assertion failed!".into())),
        msg => Err(runtime_error(error_text(&msg))),
    }
}

fn error(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "error");
    let msg = args.get(rt, 1);
    let level = args.opt_int(rt, 2, 1)?;
    let text = error_text(&msg);
    if matches!(msg, Value::Str(_)) && level > 0 {
        return Err(runtime_error(format!("{}{text}", location(rt, level as usize))));
    }
    Err(runtime_error(text))
}

fn error_text(v: &Value) -> String {
    match v {
        Value::Str(s) => s.as_str().to_owned(),
        Value::Int(_) | Value::Float(_) => v.to_string(),
        Value::Nil => "nil".to_owned(),
        _ => format!("(error object is a {} value)", v.type_name()),
    }
}

/// `pcall(f, ...)`: runs `f` in protected mode. On failure the frames
/// and open upvalues above the call are unwound and
/// `false, message` is returned.
fn pcall(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "pcall");
    args.any(rt, 1)?;
    rt.check_stack(1)?;
    let slot = args.base;
    let mut p = rt.top;
    while p > slot {
        rt.stack[p] = std::mem::take(&mut rt.stack[p - 1]);
        p -= 1;
    }
    rt.stack[slot] = Value::Bool(true);
    rt.top += 1;

    let frames = rt.frames.len();
    let caller: FrameId = rt.current();
    match rt.call(slot + 1, MULTRET) {
        Ok(()) => Ok(rt.top - slot),
        Err(e) => {
            tracing::debug!(frame = %caller, error = %e, "pcall caught an error");
            let mut msg = rt.intern(e.message());
            if let Err(e) = rt.unwind(frames, slot + 1, &msg) {
                msg = rt.intern(e.message());
            }
            rt.stack[slot] = Value::Bool(false);
            rt.push(msg);
            Ok(2)
        }
    }
}

fn collectgarbage(rt: &mut Runtime) -> Result<usize> {
    let args = Args::new(rt, "collectgarbage");
    let opt = match args.get(rt, 1) {
        Value::Nil => "collect".to_owned(),
        Value::Str(s) => s.as_str().to_owned(),
        v => return Err(args.expected(rt, 1, "string", &v)),
    };
    match opt.as_str() {
        "collect" | "step" => {
            rt.heap.step();
            ret(rt, &[Value::Int(0)])
        }
        "count" => {
            let kb = rt.heap.stats().allocated as f64 / 1024.0;
            ret(rt, &[Value::Float(kb)])
        }
        _ => Err(args.bad(rt, 1, &format!("invalid option '{opt}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_bases() {
        assert_eq!(parse_int_base("ff", 16), Some(255));
        assert_eq!(parse_int_base("-101", 2), Some(-5));
        assert_eq!(parse_int_base("zz", 36), Some(35 * 36 + 35));
        assert_eq!(parse_int_base("12", 2), None);
        assert_eq!(parse_int_base("", 10), None);
    }

    #[test]
    fn error_objects() {
        assert_eq!(error_text(&Value::str("boom")), "boom");
        assert_eq!(error_text(&Value::Int(42)), "42");
        assert_eq!(error_text(&Value::Bool(true)), "(error object is a boolean value)");
    }
}
