//! Growable instruction store.
//!
//! [`Program`] is the ordered sequence of [`Instruction`]s the VM executes and
//! clients edit through the wire protocol. Capacity starts at one slot and
//! doubles whenever an append or splice would overflow it. Growth goes through
//! `try_reserve_exact`, so running out of memory surfaces as
//! [`ProgramError::AllocationFailed`] instead of aborting the process.
//!
//! Every fallible operation validates before mutating: on error the store is
//! left exactly as it was.

use crate::virtual_machine::errors::ProgramError;
use crate::virtual_machine::isa::Instruction;

/// Capacity of a freshly created store.
const INITIAL_CAPACITY: usize = 1;

/// Ordered, contiguous instruction sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    items: Vec<Instruction>,
}

impl Program {
    /// Creates an empty store with the initial capacity.
    pub fn new() -> Self {
        Self {
            items: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Number of stored instructions.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of instructions the store can hold without growing.
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Returns the instruction at `index`, if any.
    pub fn fetch(&self, index: usize) -> Option<&Instruction> {
        self.items.get(index)
    }

    pub fn as_slice(&self) -> &[Instruction] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.items.iter()
    }

    /// Makes room for `additional` more instructions, doubling capacity until
    /// they fit.
    fn grow_for(&mut self, additional: usize) -> Result<(), ProgramError> {
        let required = self
            .items
            .len()
            .checked_add(additional)
            .ok_or(ProgramError::AllocationFailed {
                requested: usize::MAX,
            })?;
        if required <= self.items.capacity() {
            return Ok(());
        }

        let mut target = self.items.capacity().max(INITIAL_CAPACITY);
        while target < required {
            target = target.checked_mul(2).unwrap_or(required);
        }

        self.items
            .try_reserve_exact(target - self.items.len())
            .map_err(|_| ProgramError::AllocationFailed { requested: target })
    }

    /// Appends one instruction.
    pub fn append(&mut self, inst: Instruction) -> Result<(), ProgramError> {
        self.grow_for(1)?;
        self.items.push(inst);
        Ok(())
    }

    /// Appends every instruction of `insts`, in order.
    pub fn merge(&mut self, insts: &[Instruction]) -> Result<(), ProgramError> {
        self.grow_for(insts.len())?;
        self.items.extend_from_slice(insts);
        Ok(())
    }

    /// Splices `insts` in before position `start`, shifting the tail right.
    ///
    /// `start == len()` behaves like [`merge`](Self::merge).
    pub fn insert(&mut self, insts: &[Instruction], start: usize) -> Result<(), ProgramError> {
        if start > self.items.len() {
            return Err(ProgramError::InsertOutOfBounds {
                start,
                size: self.items.len(),
            });
        }
        self.grow_for(insts.len())?;
        self.items.splice(start..start, insts.iter().copied());
        Ok(())
    }

    /// Removes the inclusive range `[start, end]`, shifting the tail left.
    ///
    /// Returns the number of instructions removed.
    pub fn delete(&mut self, start: usize, end: usize) -> Result<usize, ProgramError> {
        if start > end || end >= self.items.len() {
            return Err(ProgramError::InvalidRange {
                start,
                end,
                size: self.items.len(),
            });
        }
        self.items.drain(start..=end);
        Ok(end - start + 1)
    }

    /// Copies up to `dst.len()` instructions starting at `start` into `dst`.
    ///
    /// Returns how many were copied; zero when `start` is at or past the end.
    pub fn read(&self, dst: &mut [Instruction], start: usize) -> usize {
        let Some(available) = self.items.get(start..) else {
            return 0;
        };
        let count = available.len().min(dst.len());
        dst[..count].copy_from_slice(&available[..count]);
        count
    }

    /// Removes every instruction, keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Replaces the contents of `dst` with a copy of this program.
    pub fn copy_into(&self, dst: &mut Program) -> Result<(), ProgramError> {
        dst.items.clear();
        dst.grow_for(self.items.len())?;
        dst.items.extend_from_slice(&self.items);
        Ok(())
    }
}

impl FromIterator<Instruction> for Program {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
