//! The host runtime: value stack, call frames, tables, metamethods,
//! hooks and the primitive operations that both execution engines
//! (the interpreter and compiled routines) are built from.
//!
//! The stack is a single `Vec<Value>` addressed by index. Frames refer
//! to it through `func`/`top` indices, never through references, so
//! growing the stack (which may move it) never leaves a dangling
//! pointer behind. Frames that cache their register-window base must
//! still refresh it when their trap flag says so:
//!
//! ```text,ignore
//! stack: [ base fn | ... | f | a0 a1 a2 | r3 r4 ... r{n-1} | <free> ]
//!                         ^   ^                           ^
//!                      func   base = func + 1             top = base + max_stack
//! ```

pub mod call;
pub mod heap;
pub mod hook;
pub mod meta;
pub mod number;
pub mod stdlib;
pub mod table;
pub mod value;

use std::{cell::OnceCell, cell::RefCell, io::Write, rc::Rc};

pub use call::{CallInfo, FrameId};
pub use heap::HeapStats;
pub use hook::{HookEvent, HookFn, HookMask};
pub use table::Table;
pub use value::{Function, LuaClosure, LuaStr, TableRef, Upval, UpvalRef, Value};

use crate::{
    aot::{self, Routine},
    bytecode::{Chunk, Constant, Instruction, Prototype, UpvalueDesc},
    error::{Error, Result, runtime_error},
};

/// Slots every native function may use without checking.
pub const MIN_STACK: usize = 20;
/// Slack above `stack_last` so short bursts never need a check.
pub const EXTRA_STACK: usize = 5;
pub const MAX_STACK: usize = 1_000_000;
/// Depth limit for nested host calls (metamethods, `pcall`, iterators).
pub const MAX_NATIVE_CALLS: u32 = 200;

const INITIAL_STACK: usize = 2 * MIN_STACK;

/// Signature of a routine emitted as Rust source and linked in.
pub type NativeRoutine = fn(&mut Runtime, FrameId) -> Result<Option<FrameId>>;

/// A prototype's "compiled implementation" slot.
#[derive(Clone)]
pub enum Compiled {
    /// Translated in-process.
    Routine(Rc<Routine>),
    /// Generated Rust code.
    Native(NativeRoutine),
}

/// A loaded prototype: constants are runtime values, nested
/// prototypes are shared, and it has a slot for its compiled routine.
pub struct FunctionProto {
    pub source: Option<Rc<str>>,
    pub line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Box<[Instruction]>,
    pub k: Box<[Value]>,
    pub upvalues: Box<[UpvalueDesc]>,
    pub protos: Box<[Rc<FunctionProto>]>,
    pub line_info: Box<[u32]>,
    compiled: OnceCell<Compiled>,
}

impl FunctionProto {
    #[inline]
    pub fn compiled(&self) -> Option<&Compiled> {
        self.compiled.get()
    }

    /// Fills the compiled-implementation slot. A slot is bound at
    /// most once.
    pub fn bind(&self, compiled: Compiled) -> Result<()> {
        self.compiled
            .set(compiled)
            .map_err(|_| runtime_error("prototype already has a compiled implementation"))
    }

    #[inline]
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }

    /// Chunk name as shown in messages.
    pub fn chunk_id(&self) -> String {
        chunk_id(self.source.as_deref())
    }
}

/// `@file` → `file`, `=name` → `name`, anything else is quoted source.
pub fn chunk_id(source: Option<&str>) -> String {
    match source {
        None => "?".to_owned(),
        Some(s) => {
            if let Some(rest) = s.strip_prefix('@').or_else(|| s.strip_prefix('=')) {
                rest.to_owned()
            } else {
                let first = s.lines().next().unwrap_or("");
                let text: String = first.chars().take(45).collect();
                let dots = if text.len() < s.len() { "..." } else { "" };
                format!("[string \"{text}{dots}\"]")
            }
        }
    }
}

/// Which implementation runs a Lua frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Engine {
    /// Use a prototype's compiled routine when one is bound.
    #[default]
    Compiled,
    /// Always dispatch through the interpreter.
    Interpreted,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub heap: HeapStats,
    /// Routines started or resumed by a trampoline driver.
    pub dispatches: u64,
    /// Largest number of simultaneously live frames.
    pub max_frames: usize,
    /// Deepest nesting of trampoline drivers.
    pub max_drivers: u32,
    /// Invocations of the binary-operator fallback.
    pub fallbacks: u64,
}

pub struct Runtime {
    pub(crate) stack: Vec<Value>,
    pub(crate) top: usize,
    pub(crate) frames: Vec<CallInfo>,
    pub(crate) open_upvals: std::collections::BTreeMap<usize, UpvalRef>,
    pub(crate) tbc: Vec<usize>,
    pub(crate) globals: TableRef,
    pub(crate) heap: heap::Heap,
    pub(crate) hooks: hook::HookState,
    pub(crate) engine: Engine,
    pub(crate) native_calls: u32,
    pub(crate) drivers: u32,
    pub(crate) stats: Stats,
    pub(crate) out: Box<dyn Write>,
}

impl Runtime {
    pub fn new() -> Self {
        let mut stack = Vec::new();
        stack.resize(INITIAL_STACK + EXTRA_STACK, Value::Nil);
        let mut rt = Self {
            stack,
            top: 1,
            frames: vec![CallInfo::base(MIN_STACK + 1)],
            open_upvals: Default::default(),
            tbc: Vec::new(),
            globals: Rc::new(RefCell::new(Table::new())),
            heap: heap::Heap::new(),
            hooks: hook::HookState::default(),
            engine: Engine::default(),
            native_calls: 0,
            drivers: 0,
            stats: Stats::default(),
            out: Box::new(std::io::stdout()),
        };
        stdlib::open(&mut rt);
        rt
    }

    pub fn set_engine(&mut self, engine: Engine) {
        self.engine = engine;
    }

    #[inline]
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Destination of `print`.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    pub fn stats(&self) -> Stats {
        Stats {
            heap: self.heap.stats(),
            ..self.stats
        }
    }

    pub fn globals(&self) -> &TableRef {
        &self.globals
    }

    pub fn global(&self, name: &str) -> Value {
        self.globals.borrow().get_str(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.heap.intern(name);
        self.globals.borrow_mut().set_str(key, value);
    }

    pub fn intern(&mut self, s: &str) -> Value {
        Value::Str(self.heap.intern(s))
    }

    pub fn new_table(&mut self, array: usize, hash: usize) -> TableRef {
        self.heap.alloc(Table::footprint(array, hash));
        Rc::new(RefCell::new(Table::with_capacity(array, hash)))
    }

    /// Turns a prototype tree into runtime prototypes.
    pub fn load_proto(&mut self, proto: &Prototype) -> Rc<FunctionProto> {
        let k = proto
            .constants
            .iter()
            .map(|k| match k {
                Constant::Nil => Value::Nil,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::Str(self.heap.intern(s)),
            })
            .collect();
        let protos = proto.protos.iter().map(|p| self.load_proto(p)).collect();
        Rc::new(FunctionProto {
            source: proto.source.as_deref().map(Rc::from),
            line_defined: proto.line_defined,
            num_params: proto.num_params,
            is_vararg: proto.is_vararg,
            max_stack_size: proto.max_stack_size,
            code: proto.code.clone().into_boxed_slice(),
            k,
            upvalues: proto.upvalues.clone().into_boxed_slice(),
            protos,
            line_info: proto.line_info.clone().into_boxed_slice(),
            compiled: OnceCell::new(),
        })
    }

    /// Wraps a main prototype in a closure whose first upvalue is the
    /// globals table.
    pub fn main_closure(&mut self, proto: Rc<FunctionProto>) -> Rc<LuaClosure> {
        let upvals = (0..proto.upvalues.len())
            .map(|i| {
                let v = if i == 0 {
                    Value::Table(self.globals.clone())
                } else {
                    Value::Nil
                };
                Rc::new(RefCell::new(Upval::Closed(v)))
            })
            .collect();
        Rc::new(LuaClosure { proto, upvals })
    }

    pub fn load(&mut self, chunk: &Chunk) -> Rc<LuaClosure> {
        let proto = self.load_proto(&chunk.main);
        self.main_closure(proto)
    }

    /// Calls `f` with `args` from the host and collects every result.
    pub fn call_function(&mut self, f: Value, args: &[Value]) -> Result<Vec<Value>> {
        let func = self.top;
        self.check_stack(args.len() + 1)?;
        self.push(f);
        for arg in args {
            self.push(arg.clone());
        }
        self.call(func, call::MULTRET)?;
        let results = self.stack[func..self.top].to_vec();
        self.top = func;
        Ok(results)
    }

    /// Loads `chunk` and runs its main function. Unless the interpreter
    /// is selected, every prototype is compiled and bound first.
    pub fn execute_module(&mut self, chunk: &Chunk) -> Result<Vec<Value>> {
        let proto = self.load_proto(&chunk.main);
        if self.engine == Engine::Compiled {
            let program =
                aot::Compiler::new(aot::CompileOptions::bare()).compile_tree(&*proto)?;
            aot::bind(&proto, &program)?;
        }
        let main = self.main_closure(proto);
        self.call_closure(main, &[])
    }

    pub fn call_closure(&mut self, cl: Rc<LuaClosure>, args: &[Value]) -> Result<Vec<Value>> {
        self.call_function(Value::Function(Function::Lua(cl)), args)
    }

    #[inline]
    pub(crate) fn push(&mut self, v: Value) {
        self.stack[self.top] = v;
        self.top += 1;
    }

    /// Highest index usable without growing, `EXTRA_STACK` excluded.
    #[inline]
    pub(crate) fn stack_last(&self) -> usize {
        self.stack.len() - EXTRA_STACK
    }

    /// Ensures `n` free slots above `top`.
    #[inline]
    pub fn check_stack(&mut self, n: usize) -> Result<()> {
        if self.top + n >= self.stack_last() {
            self.grow_stack(n)?;
        }
        Ok(())
    }

    /// Reallocates the stack. Every Lua frame gets its trap set so
    /// that it re-derives its register base before the next use.
    #[cold]
    pub fn grow_stack(&mut self, n: usize) -> Result<()> {
        let size = self.stack_last();
        let needed = self.top + n;
        if needed > MAX_STACK {
            return Err(self.runtime_error("stack overflow"));
        }
        let new_size = (size * 2).max(needed).min(MAX_STACK);
        self.stack.resize(new_size + EXTRA_STACK, Value::Nil);
        for ci in &mut self.frames {
            if ci.is_lua() {
                ci.trap = true;
            }
        }
        tracing::trace!(from = size, to = new_size, "stack reallocated");
        Ok(())
    }

    #[inline]
    pub fn frame(&self, id: FrameId) -> &CallInfo {
        &self.frames[id.index()]
    }

    #[inline]
    pub(crate) fn frame_mut(&mut self, id: FrameId) -> &mut CallInfo {
        &mut self.frames[id.index()]
    }

    #[inline]
    pub(crate) fn current(&self) -> FrameId {
        FrameId::new(self.frames.len() - 1)
    }

    /// Line currently executing in frame `id`, from its saved pc.
    pub fn current_line(&self, id: FrameId) -> Option<u32> {
        let ci = self.frame(id);
        let cl = ci.closure.as_ref()?;
        cl.proto.line_at(ci.savedpc.saturating_sub(1) as usize)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// A runtime error positioned at the current Lua frame's committed pc.
    #[cold]
    pub fn runtime_error(&self, msg: impl std::fmt::Display) -> Error {
        let id = self.current();
        let ci = self.frame(id);
        match (&ci.closure, self.current_line(id)) {
            (Some(cl), Some(line)) => {
                runtime_error(format!("{}:{line}: {msg}", cl.proto.chunk_id()))
            }
            _ => runtime_error(msg.to_string()),
        }
    }

    pub(crate) fn type_error(&self, v: &Value, op: &str) -> Error {
        self.runtime_error(format_args!("attempt to {op} a {} value", v.type_name()))
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
