//! The ahead-of-time compiler.
//!
//! Compilation runs in three passes per prototype: the [walker] numbers
//! the tree, the [labels] resolver builds the control-flow graph and
//! the [translate] pass turns every instruction into a [`Block`] of the
//! routine's IR. The result is either bound in-process ([`bind`]) or
//! written out as Rust source ([`emit`]) and bound when the generated
//! module is opened ([`open_bundle`]).
//!
//! [`Block`]: ir::Block

pub mod emit;
pub mod fallback;
pub mod ir;
pub mod labels;
pub mod run;
pub mod translate;
pub mod walker;

use std::rc::Rc;

use bumpalo::Bump;

pub use ir::Routine;
use walker::Tree;

use crate::{
    bytecode::Chunk,
    error::{Error, ErrorKind, Result, error},
    vm::{Compiled, FunctionProto, NativeRoutine, Runtime, Value},
};

pub struct CompileOptions {
    /// Put a disassembly comment above every block.
    pub comments: bool,
    /// Add each instruction's protection class to its comment.
    pub protection: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            comments: true,
            protection: false,
        }
    }
}

impl CompileOptions {
    pub fn bare() -> Self {
        Self {
            comments: false,
            protection: false,
        }
    }
}

/// Routines of a whole tree, in walk order.
#[derive(Debug, Default)]
pub struct Program {
    pub routines: Vec<Rc<Routine>>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

/// Compilation context. Holds the scratch arena that control-flow
/// graphs are built in; it is reset between prototypes.
pub struct Compiler {
    options: CompileOptions,
    buf: Bump,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            buf: Bump::new(),
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile_function<T: Tree>(&mut self, index: usize, proto: &T) -> Result<Routine> {
        self.buf.reset();
        let routine = translate::translate(&self.buf, index, proto)
            .map_err(|e| in_function(e, index, proto))?;
        tracing::debug!(
            index,
            name = %routine.name,
            blocks = routine.blocks.len(),
            labels = routine.labels.len(),
            "compiled prototype"
        );
        Ok(routine)
    }

    pub fn compile_tree<T: Tree>(&mut self, main: &T) -> Result<Program> {
        let mut program = Program::default();
        walker::walk(main, |index, proto| {
            let routine = self.compile_function(index, proto)?;
            program.routines.push(Rc::new(routine));
            Ok::<_, Error>(())
        })?;
        Ok(program)
    }

    /// Compiles `chunk` and renders it as the Rust module `module`.
    pub fn emit(&mut self, module: &str, chunk: &Chunk) -> Result<String> {
        let program = self.compile_tree(&chunk.main)?;
        emit::emit_module(module, chunk, &program.routines, &self.options)
    }
}

fn in_function<T: Tree>(e: Error, index: usize, proto: &T) -> Error {
    error(
        e.kind(),
        format!("{} (#{index}): {}", proto.describe(), e.message()),
    )
}

/// Binds `program` onto the loaded tree rooted at `main`.
pub fn bind(main: &FunctionProto, program: &Program) -> Result<()> {
    bind_with(main, program.len(), |index| {
        Compiled::Routine(program.routines[index].clone())
    })
}

/// Binds a generated routine table onto the loaded tree rooted at `main`.
pub fn bind_native(main: &FunctionProto, table: &[NativeRoutine]) -> Result<()> {
    bind_with(main, table.len(), |index| Compiled::Native(table[index]))
}

fn bind_with(
    main: &FunctionProto,
    count: usize,
    mut compiled: impl FnMut(usize) -> Compiled,
) -> Result<()> {
    let protos = walker::preorder(main);
    if protos.len() != count {
        return Err(error(
            ErrorKind::Config,
            format!(
                "{count} routines cannot be bound to {} prototypes",
                protos.len()
            ),
        ));
    }
    for (index, proto) in protos.into_iter().enumerate() {
        proto.bind(compiled(index))?;
        tracing::debug!(index, name = %proto.describe(), "bound routine");
    }
    Ok(())
}

/// Entry point of generated modules: loads the bundled chunk, binds
/// `table` onto it and runs the main function.
pub fn open_bundle(rt: &mut Runtime, chunk: &[u8], table: &[NativeRoutine]) -> Result<Vec<Value>> {
    let chunk = Chunk::from_bytes(chunk)?;
    let proto = rt.load_proto(&chunk.main);
    bind_native(&proto, table)?;
    let main = rt.main_closure(proto);
    rt.call_closure(main, &[])
}

/// A routine was entered at an offset that has no label.
#[cold]
pub fn bad_entry(routine: usize, pc: u32) -> Error {
    error(
        ErrorKind::Bytecode,
        format!("routine #{routine} entered at pc {pc}, which is not a label"),
    )
}

#[cold]
pub fn stray_extraarg(pc: u32) -> Error {
    error(
        ErrorKind::Bytecode,
        format!("EXTRAARG executed at pc {pc}"),
    )
}
