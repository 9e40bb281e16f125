//! The bytecode virtual machine: values, chunks, the
//! open-bucket table, and the evaluator.

pub mod chunk;
pub mod dasm;
pub mod state;
pub mod table;
pub mod value;

pub use chunk::{Aop, Chunk, Instr, Op, Quark, Shape};
pub use state::{RuntimeError, State};
pub use value::Value;
