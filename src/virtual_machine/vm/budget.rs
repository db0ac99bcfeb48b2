use crate::virtual_machine::errors::VMError;

/// Instructions executed per cooperative slice when nothing else is configured.
pub const DEFAULT_SLICE_BUDGET: u32 = 256;

/// Outcome of one bounded execution slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// The program counter reached the end of the program.
    Finished,
    /// Execution stopped on an error; the program counter points past the
    /// faulting instruction.
    Errored(VMError),
    /// The slice budget ran out before the program finished. Calling the
    /// driver again resumes at the current program counter.
    BudgetExhausted,
}

/// Per-slice instruction allowance.
///
/// Charged once per executed instruction, the same way gas is charged per
/// opcode, but exhaustion suspends execution instead of failing it.
#[derive(Clone, Copy, Debug)]
pub struct SliceBudget {
    limit: u32,
    used: u32,
}

impl SliceBudget {
    /// Creates a budget of `limit` instructions. A zero limit still allows one
    /// instruction so every slice makes progress.
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            used: 0,
        }
    }

    /// Records one executed instruction.
    #[inline(always)]
    pub fn charge(&mut self) {
        self.used = self.used.saturating_add(1);
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Instructions executed so far in this slice.
    pub fn used(&self) -> u32 {
        self.used
    }
}

impl Default for SliceBudget {
    fn default() -> Self {
        Self::new(DEFAULT_SLICE_BUDGET)
    }
}

/// Running totals for one EXEC, accumulated across slices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Instructions executed.
    pub instructions: u64,
    /// Slices the execution was spread over.
    pub slices: u64,
}

impl ExecStats {
    /// Folds a finished slice into the totals.
    pub fn record(&mut self, budget: &SliceBudget) {
        self.instructions = self.instructions.saturating_add(budget.used() as u64);
        self.slices = self.slices.saturating_add(1);
    }
}
