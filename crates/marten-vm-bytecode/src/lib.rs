//! Bytecode artifacts for the Marten VM
//!
//! The compiler lowers its IR tree into a [`ScriptFunction`]: a stack-machine
//! instruction stream plus constant pool, nested function table, debug line
//! table and optional raw source. A toplevel artifact and a function artifact
//! share the representation and differ only in their flags.

mod constant;
mod debug;
mod error;
mod instruction;
mod script;

pub use constant::Constant;
pub use debug::DebuggableScript;
pub use error::{BytecodeError, BytecodeResult};
pub use instruction::Instruction;
pub use script::{LineTable, ScriptFlags, ScriptFunction, ScriptFunctionBuilder};
