//! Core virtual machine implementation.
//!
//! The VM executes fixed-width [`Instruction`]s against a flat memory of 1024
//! words whose first slots double as registers (see [`memory`]). All arithmetic
//! uses wrapping semantics to prevent overflow panics, and every address an
//! instruction touches is bounds-checked before anything is written.
//!
//! Two drivers are provided:
//! - [`Vm::run`] executes to completion, for standalone use
//! - [`Vm::run_slice`] executes at most a [`SliceBudget`] worth of instructions
//!   and can be resumed, which is how the server interleaves one client's
//!   long-running program with everybody else's requests

pub mod budget;
pub mod memory;
#[cfg(test)]
mod tests;

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, Opcode};
use crate::virtual_machine::program::Program;
use budget::{ExecStats, SliceBudget, StepResult};
use memory::{Memory, R0, SP};

/// Register machine executing a shared [`Program`].
#[derive(Debug, Default)]
pub struct Vm {
    memory: Memory,
    program: Program,
    /// Totals for the execution in progress.
    stats: ExecStats,
}

impl Vm {
    /// Creates a VM with an empty program and canonical registers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a VM that will execute `program`.
    pub fn with_program(program: Program) -> Self {
        Self {
            program,
            ..Self::default()
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Value of the return register.
    pub fn result(&self) -> i32 {
        self.memory.as_slice()[R0 as usize]
    }

    /// Totals for the current (or last) execution.
    pub fn stats(&self) -> ExecStats {
        self.stats
    }

    /// Puts the registers back into their canonical state and starts a fresh
    /// execution record.
    pub fn reset_registers(&mut self) {
        self.memory.reset_registers();
        self.stats = ExecStats::default();
    }

    /// Returns up to `count` memory words starting at `offset`.
    pub fn dump(&self, offset: usize, count: usize) -> &[i32] {
        self.memory.slice(offset, count)
    }

    /// Returns the instruction the program counter points at, or `None` once
    /// execution has run off the end.
    pub fn fetch(&self) -> Option<Instruction> {
        usize::try_from(self.memory.pc())
            .ok()
            .and_then(|pc| self.program.fetch(pc))
            .copied()
    }

    /// Whether the program counter has reached the end of the program.
    fn finished(&self) -> bool {
        usize::try_from(self.memory.pc()).map_or(false, |pc| pc >= self.program.len())
    }

    /// Fetches, advances the program counter and executes one instruction.
    ///
    /// The caller checks [`finished`](Self::finished) first.
    fn step(&mut self) -> Result<(), VMError> {
        let pc = self.memory.pc();
        let inst = self
            .fetch()
            .ok_or(VMError::InvalidProgramCounter { pc })?;
        self.memory.set_pc(pc.wrapping_add(1));
        self.execute(inst)
    }

    /// Executes until the program counter runs off the end of the program.
    pub fn run(&mut self) -> Result<(), VMError> {
        while !self.finished() {
            self.step()?;
            self.stats.instructions = self.stats.instructions.saturating_add(1);
        }
        Ok(())
    }

    /// Executes at most `limit` instructions.
    ///
    /// Returns [`StepResult::BudgetExhausted`] when the program has more to do;
    /// calling again continues where this slice stopped.
    pub fn run_slice(&mut self, limit: u32) -> StepResult {
        let mut budget = SliceBudget::new(limit);
        let result = loop {
            if self.finished() {
                break StepResult::Finished;
            }
            if let Err(err) = self.step() {
                budget.charge();
                break StepResult::Errored(err);
            }
            budget.charge();
            if self.finished() {
                break StepResult::Finished;
            }
            if budget.exhausted() {
                break StepResult::BudgetExhausted;
            }
        };
        self.stats.record(&budget);
        result
    }

    /// Executes a single instruction. The program counter has already been
    /// advanced past it.
    pub fn execute(&mut self, inst: Instruction) -> Result<(), VMError> {
        let Instruction {
            dest, arg1, arg2, ..
        } = inst;

        match inst.opcode()? {
            // Arithmetic
            Opcode::Add => self.op_add(dest, arg1, arg2),
            Opcode::Addi => self.op_addi(dest, arg1, arg2),
            Opcode::Sub => self.op_sub(dest, arg1, arg2),
            Opcode::Subi => self.op_subi(dest, arg1, arg2),
            Opcode::Mul => self.op_mul(dest, arg1, arg2),
            Opcode::Muli => self.op_muli(dest, arg1, arg2),
            Opcode::Div => self.op_div(dest, arg1, arg2),
            Opcode::Divi => self.op_divi(dest, arg1, arg2),
            // Moves and stack
            Opcode::Mov => self.op_addi(dest, arg1, 0),
            Opcode::Movi => self.op_movi(dest, arg1),
            Opcode::Push => self.op_push(dest),
            Opcode::Pushi => self.op_pushi(dest),
            Opcode::Pop => self.op_pop(dest),
            // Control flow
            Opcode::B => self.op_beq(dest, 0, 0),
            Opcode::Beq => self.op_beq(dest, arg1, arg2),
            Opcode::Beqi => self.op_beqi(dest, arg1, arg2),
            Opcode::Bne => self.op_bne(dest, arg1, arg2),
            Opcode::Bnei => self.op_bnei(dest, arg1, arg2),
            Opcode::Bge => self.op_bge(dest, arg1, arg2),
            Opcode::Bgei => self.op_bgei(dest, arg1, arg2),
            Opcode::Blei => self.op_bgei(dest, arg2, arg1),
            Opcode::Ret => self.op_ret(dest),
            Opcode::Reti => self.op_reti(dest),
            Opcode::Halt => self.op_halt(),
        }
    }

    fn op_add(&mut self, dst: i32, a: i32, b: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        let vb = self.memory.get(b)?;
        self.memory.set(dst, va.wrapping_add(vb))
    }

    fn op_addi(&mut self, dst: i32, a: i32, imm: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        self.memory.set(dst, va.wrapping_add(imm))
    }

    fn op_sub(&mut self, dst: i32, a: i32, b: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        let vb = self.memory.get(b)?;
        self.memory.set(dst, va.wrapping_sub(vb))
    }

    fn op_subi(&mut self, dst: i32, a: i32, imm: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        self.memory.set(dst, va.wrapping_sub(imm))
    }

    fn op_mul(&mut self, dst: i32, a: i32, b: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        let vb = self.memory.get(b)?;
        self.memory.set(dst, va.wrapping_mul(vb))
    }

    fn op_muli(&mut self, dst: i32, a: i32, imm: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        self.memory.set(dst, va.wrapping_mul(imm))
    }

    fn op_div(&mut self, dst: i32, a: i32, b: i32) -> Result<(), VMError> {
        Memory::check(dst)?;
        let va = self.memory.get(a)?;
        let vb = self.memory.get(b)?;
        if vb == 0 {
            return Err(VMError::DivisionByZero);
        }
        self.memory.set(dst, va.wrapping_div(vb))
    }

    fn op_divi(&mut self, dst: i32, a: i32, imm: i32) -> Result<(), VMError> {
        if imm == 0 {
            return Err(VMError::DivisionByZero);
        }
        let va = self.memory.get(a)?;
        self.memory.set(dst, va.wrapping_div(imm))
    }

    fn op_movi(&mut self, dst: i32, imm: i32) -> Result<(), VMError> {
        self.memory.set(dst, imm)
    }

    /// Writes `value` to the word SP points at, then bumps SP.
    fn push_value(&mut self, value: i32) -> Result<(), VMError> {
        let sp = self.memory.get(SP)?;
        self.memory.set(sp, value)?;
        self.memory.set(SP, sp.wrapping_add(1))
    }

    fn op_push(&mut self, src: i32) -> Result<(), VMError> {
        let value = self.memory.get(src)?;
        self.push_value(value)
    }

    fn op_pushi(&mut self, imm: i32) -> Result<(), VMError> {
        self.push_value(imm)
    }

    fn op_pop(&mut self, dst: i32) -> Result<(), VMError> {
        Memory::check(dst)?;
        let sp = self.memory.get(SP)?;
        if sp <= 0 {
            return Err(VMError::MemoryOverflow { address: sp });
        }
        let value = self.memory.get(sp - 1)?;
        self.memory.set(SP, sp - 1)?;
        self.memory.set(dst, value)
    }

    /// Validates a branch target against the current program.
    fn check_target(&self, target: i32) -> Result<(), VMError> {
        match usize::try_from(target) {
            Ok(index) if index < self.program.len() => Ok(()),
            _ => Err(VMError::MemoryOverflow { address: target }),
        }
    }

    /// Sets the program counter to `target` when `taken`.
    fn branch(&mut self, target: i32, taken: bool) -> Result<(), VMError> {
        self.check_target(target)?;
        if taken {
            self.memory.set_pc(target);
        }
        Ok(())
    }

    fn op_beq(&mut self, target: i32, a: i32, b: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        let vb = self.memory.get(b)?;
        self.branch(target, a == b || va == vb)
    }

    fn op_beqi(&mut self, target: i32, a: i32, imm: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        self.branch(target, va == imm)
    }

    fn op_bne(&mut self, target: i32, a: i32, b: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        let vb = self.memory.get(b)?;
        self.branch(target, va != vb)
    }

    fn op_bnei(&mut self, target: i32, a: i32, imm: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        self.branch(target, va != imm)
    }

    fn op_bge(&mut self, target: i32, a: i32, b: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        let vb = self.memory.get(b)?;
        self.branch(target, va >= vb)
    }

    fn op_bgei(&mut self, target: i32, a: i32, imm: i32) -> Result<(), VMError> {
        let va = self.memory.get(a)?;
        self.branch(target, va >= imm)
    }

    fn op_ret(&mut self, src: i32) -> Result<(), VMError> {
        let value = self.memory.get(src)?;
        self.memory.set(R0, value)
    }

    fn op_reti(&mut self, imm: i32) -> Result<(), VMError> {
        self.memory.set(R0, imm)
    }

    fn op_halt(&mut self) -> Result<(), VMError> {
        let end = i32::try_from(self.program.len()).unwrap_or(i32::MAX);
        self.memory.set_pc(end);
        Ok(())
    }
}
