//! Deterministic traversal of prototype trees.
//!
//! Routines are numbered in pre-order: a prototype comes before its
//! nested prototypes, which are visited in the order they appear in
//! the parent's list. Compiling, emitting and binding all use this same
//! order, so routine `n` of a generated file always lands on the `n`th
//! prototype of the reloaded tree.

use crate::{
    bytecode::{Instruction, Prototype},
    vm::FunctionProto,
};

/// The parts of a prototype the compiler reads. Implemented by the
/// serialized form and by the loaded form, which compile identically.
pub trait Tree {
    fn children(&self) -> impl DoubleEndedIterator<Item = &Self>;
    fn code(&self) -> &[Instruction];
    fn lines(&self) -> &[u32];
    fn num_constants(&self) -> usize;
    fn num_children(&self) -> usize;
    /// `main <name:0>` or `function <name:line>`.
    fn describe(&self) -> String;
}

impl Tree for Prototype {
    fn children(&self) -> impl DoubleEndedIterator<Item = &Self> {
        self.protos.iter()
    }

    fn code(&self) -> &[Instruction] {
        &self.code
    }

    fn lines(&self) -> &[u32] {
        &self.line_info
    }

    fn num_constants(&self) -> usize {
        self.constants.len()
    }

    fn num_children(&self) -> usize {
        self.protos.len()
    }

    fn describe(&self) -> String {
        Prototype::describe(self)
    }
}

impl Tree for FunctionProto {
    fn children(&self) -> impl DoubleEndedIterator<Item = &Self> {
        self.protos.iter().map(|p| &**p)
    }

    fn code(&self) -> &[Instruction] {
        &self.code
    }

    fn lines(&self) -> &[u32] {
        &self.line_info
    }

    fn num_constants(&self) -> usize {
        self.k.len()
    }

    fn num_children(&self) -> usize {
        self.protos.len()
    }

    fn describe(&self) -> String {
        let name = self.chunk_id();
        if self.line_defined == 0 {
            format!("main <{name}:0>")
        } else {
            format!("function <{name}:{}>", self.line_defined)
        }
    }
}

/// Every prototype of the tree rooted at `root`, in routine order.
///
/// Uses an explicit stack, so arbitrarily deep nesting does not
/// recurse on the native stack.
pub fn preorder<T: Tree>(root: &T) -> Vec<&T> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children().rev());
    }
    out
}

/// Visits the tree in routine order, passing each prototype's index.
pub fn walk<'a, T: Tree, E>(
    root: &'a T,
    mut f: impl FnMut(usize, &'a T) -> Result<(), E>,
) -> Result<(), E> {
    for (index, node) in preorder(root).into_iter().enumerate() {
        f(index, node)?;
    }
    Ok(())
}
