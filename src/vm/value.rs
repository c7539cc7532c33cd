use std::{
    cell::RefCell,
    fmt::{Debug, Display},
    rc::Rc,
};

use super::{FunctionProto, Runtime, number, table::Table};
use crate::error::Result;

pub type TableRef = Rc<RefCell<Table>>;
pub type UpvalRef = Rc<RefCell<Upval>>;

/// Signature of host functions. Arguments are the stack slots between
/// the native frame's function slot and the stack top; the function
/// pushes its results and returns how many it pushed.
pub type NativeCallback = fn(&mut Runtime) -> Result<usize>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(LuaStr),
    Table(TableRef),
    Function(Function),
}

#[derive(Clone)]
pub enum Function {
    Lua(Rc<LuaClosure>),
    Native(Rc<NativeFunction>),
}

pub struct LuaClosure {
    pub proto: Rc<FunctionProto>,
    pub upvals: Box<[UpvalRef]>,
}

pub struct NativeFunction {
    pub name: &'static str,
    pub f: NativeCallback,
}

/// A captured variable. Open while the owning frame is active,
/// closed (holding its own copy) afterwards.
#[derive(Debug)]
pub enum Upval {
    Open(usize),
    Closed(Value),
}

/// Immutable string. Short strings are interned by the runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LuaStr(Rc<str>);

impl LuaStr {
    pub(crate) fn new(s: Rc<str>) -> Self {
        Self(s)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn rc(&self) -> &Rc<str> {
        &self.0
    }
}

impl From<&str> for LuaStr {
    fn from(s: &str) -> Self {
        Self(Rc::from(s))
    }
}

impl Value {
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }

    pub fn str(s: &str) -> Self {
        Value::Str(LuaStr::from(s))
    }

    #[inline]
    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn native(name: &'static str, f: NativeCallback) -> Self {
        Value::Function(Function::Native(Rc::new(NativeFunction { name, f })))
    }

    /// Raw equality: no `__eq`, integers and floats compare by value.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => {
                number::float_to_int_exact(*f) == Some(*i)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Identity used for `%p`-style display and table keys.
    pub(crate) fn addr(&self) -> usize {
        match self {
            Value::Table(t) => Rc::as_ptr(t) as *const u8 as usize,
            Value::Function(f) => f.addr(),
            _ => 0,
        }
    }
}

impl Function {
    pub fn ptr_eq(&self, other: &Function) -> bool {
        self.addr() == other.addr()
    }

    pub(crate) fn addr(&self) -> usize {
        match self {
            Function::Lua(c) => Rc::as_ptr(c) as *const u8 as usize,
            Function::Native(n) => Rc::as_ptr(n) as *const u8 as usize,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_eq(other)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v:?})"),
            Value::Str(s) => write!(f, "Str({:?})", s.as_str()),
            Value::Table(_) => write!(f, "Table({:#x})", self.addr()),
            Value::Function(_) => write!(f, "Function({:#x})", self.addr()),
        }
    }
}

/// `tostring` without metamethods.
impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => f.write_str(&number::fmt_float(*v)),
            Value::Str(s) => f.write_str(s.as_str()),
            Value::Table(_) => write!(f, "table: {:#016x}", self.addr()),
            Value::Function(Function::Native(n)) => {
                write!(f, "builtin: {} {:#016x}", n.name, self.addr())
            }
            Value::Function(Function::Lua(_)) => write!(f, "function: {:#016x}", self.addr()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<LuaStr> for Value {
    fn from(v: LuaStr) -> Self {
        Value::Str(v)
    }
}
