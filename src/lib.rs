pub mod error;

pub mod bytecode;

pub mod vm;

pub mod exec;

pub mod aot;

pub use bytecode::{Chunk, Prototype};
pub use error::{Error, ErrorKind, Result};
pub use vm::{Engine, Runtime, Value};
