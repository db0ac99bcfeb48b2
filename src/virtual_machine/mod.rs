//! Register virtual machine shared by every connected client.
//!
//! # Architecture
//!
//! - **Memory**: 1024 signed 32-bit words; the first nine are registers
//!   (R0-R3, PC, LR, BP, SP, SB)
//! - **Instruction format**: fixed 16-byte records `{code, dest, arg1, arg2}`
//! - **Execution model**: arithmetic with wrapping semantics, a word stack,
//!   absolute branches into the program, and a return slot in R0
//! - **Cooperative scheduling**: execution can be bounded to a slice of
//!   instructions and resumed later
//!
//! # Modules
//!
//! - [`errors`]: Execution, parse and store error types
//! - [`isa`]: Opcode set, instruction record and text syntax
//! - [`program`]: Growable instruction store
//! - [`vm`]: Interpreter, memory layout and slice budget

pub mod errors;
pub mod isa;
pub mod program;
pub mod vm;
