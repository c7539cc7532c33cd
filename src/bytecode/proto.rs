use serde::{Deserialize, Serialize};

use super::Instruction;

/// Compiled-function template produced by a front-end.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    /// Chunk name, e.g. `@fib.lua` or `=stdin`.
    pub source: Option<String>,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    /// Size of the register window.
    pub max_stack_size: u8,
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub upvalues: Vec<UpvalueDesc>,
    pub protos: Vec<Prototype>,
    /// Source line of each instruction, parallel to `code`. May be empty.
    pub line_info: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Where a closure finds a captured variable when it is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpvalueDesc {
    pub name: Option<String>,
    /// `true` if it is a register of the enclosing function,
    /// `false` if it is one of the enclosing function's upvalues.
    pub in_stack: bool,
    pub index: u8,
}

impl UpvalueDesc {
    pub fn stack(name: &str, index: u8) -> Self {
        Self {
            name: Some(name.to_owned()),
            in_stack: true,
            index,
        }
    }

    pub fn outer(name: &str, index: u8) -> Self {
        Self {
            name: Some(name.to_owned()),
            in_stack: false,
            index,
        }
    }
}

impl Prototype {
    #[inline]
    pub fn line_at(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }

    /// `name:line` used for routine headers and diagnostics.
    pub fn describe(&self) -> String {
        let source = self.source.as_deref().unwrap_or("?");
        let source = source
            .strip_prefix('@')
            .or_else(|| source.strip_prefix('='))
            .unwrap_or(source);
        if self.line_defined == 0 {
            format!("main <{source}:0>")
        } else {
            format!("function <{source}:{}>", self.line_defined)
        }
    }

    /// Number of prototypes in this tree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.protos.iter().map(Prototype::count).sum::<usize>()
    }
}
