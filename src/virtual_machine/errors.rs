use thiserror::Error;

/// Errors that can occur while executing or parsing instructions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    /// An operand addressed a word outside VM memory, or a branch targeted
    /// an index outside the program.
    #[error("memory overflow at address {address}")]
    MemoryOverflow { address: i32 },
    /// Division by a zero register or a zero immediate.
    #[error("division by zero")]
    DivisionByZero,
    /// The instruction code does not name a known opcode.
    #[error("malformed instruction: unknown opcode {opcode}")]
    MalformedInstruction { opcode: i32 },
    /// The program counter was written with a negative value.
    #[error("invalid program counter {pc}")]
    InvalidProgramCounter { pc: i32 },
    /// Unrecognized mnemonic in the text instruction syntax.
    #[error("invalid instruction name: {0}")]
    InvalidInstructionName(String),
    /// Operand is not a valid 32-bit integer.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    /// More operands than an instruction record can hold.
    #[error("arity mismatch")]
    ArityMismatch,
}

/// Errors raised by the instruction store.
///
/// Every failing operation leaves the store unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    /// Delete range is reversed or reaches past the last instruction.
    #[error("invalid range [{start}, {end}] for program of size {size}")]
    InvalidRange { start: usize, end: usize, size: usize },
    /// Insert position lies past the end of the program.
    #[error("insert position {start} out of bounds for program of size {size}")]
    InsertOutOfBounds { start: usize, size: usize },
    /// Growing the backing buffer failed.
    #[error("failed to allocate room for {requested} instructions")]
    AllocationFailed { requested: usize },
}
