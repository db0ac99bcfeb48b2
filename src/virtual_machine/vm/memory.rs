use crate::virtual_machine::errors::VMError;

/// Number of addressable words.
pub const MEMORY_SIZE: usize = 1024;

/// General purpose register; also the return-value slot.
pub const R0: i32 = 0;
pub const R1: i32 = 1;
pub const R2: i32 = 2;
pub const R3: i32 = 3;
/// Program counter.
pub const PC: i32 = 4;
/// Link register.
pub const LR: i32 = 5;
/// Base pointer.
pub const BP: i32 = 6;
/// Stack pointer: address of the next free stack word.
pub const SP: i32 = 7;
/// Stack-base register.
pub const SB: i32 = 8;

/// First word of the stack, just past the reserved register block.
pub const STACK_BASE: i32 = 16;

/// Flat word-addressed VM memory.
///
/// Registers are ordinary words at fixed addresses, so every instruction
/// operand is just an index into this array. All accessors bounds-check and
/// report [`VMError::MemoryOverflow`] instead of panicking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Memory {
    words: Box<[i32; MEMORY_SIZE]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Creates zeroed memory with the register block in its canonical state.
    pub fn new() -> Self {
        let mut memory = Self {
            words: Box::new([0; MEMORY_SIZE]),
        };
        memory.reset_registers();
        memory
    }

    /// Validates `addr` and converts it to an index.
    pub fn check(addr: i32) -> Result<usize, VMError> {
        usize::try_from(addr)
            .ok()
            .filter(|&index| index < MEMORY_SIZE)
            .ok_or(VMError::MemoryOverflow { address: addr })
    }

    /// Returns the word at `addr`.
    pub fn get(&self, addr: i32) -> Result<i32, VMError> {
        Ok(self.words[Self::check(addr)?])
    }

    /// Stores `value` at `addr`.
    pub fn set(&mut self, addr: i32, value: i32) -> Result<(), VMError> {
        self.words[Self::check(addr)?] = value;
        Ok(())
    }

    /// Current program counter.
    pub fn pc(&self) -> i32 {
        self.words[PC as usize]
    }

    pub fn set_pc(&mut self, value: i32) {
        self.words[PC as usize] = value;
    }

    /// Restores the register block: R0-R3, PC and LR to zero, BP, SP and SB
    /// to [`STACK_BASE`]. Words outside the register block are untouched.
    pub fn reset_registers(&mut self) {
        for reg in [R0, R1, R2, R3, PC, LR] {
            self.words[reg as usize] = 0;
        }
        for reg in [BP, SP, SB] {
            self.words[reg as usize] = STACK_BASE;
        }
    }

    /// Returns up to `count` words starting at `offset`, clamped to memory.
    pub fn slice(&self, offset: usize, count: usize) -> &[i32] {
        let start = offset.min(MEMORY_SIZE);
        let end = start.saturating_add(count).min(MEMORY_SIZE);
        &self.words[start..end]
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.words[..]
    }
}
