// stack.rs - Bounded LIFO stacks for the VM
//
// Two separate types so that overflow/underflow diagnostics name the
// stack that actually failed. Both are fixed-depth: the original engine
// left bounds unchecked, here every push and pop is a checked operation.

use crate::error::VmError;

pub const STACK_DEPTH: usize = 256;

/// The data stack. Cells are i64; flags are -1 (true) and 0 (false).
#[derive(Debug, Clone, Default)]
pub struct Stack {
    data: Vec<i64>,
}

impl Stack {
    pub fn new() -> Self {
        Stack {
            data: Vec::with_capacity(STACK_DEPTH),
        }
    }

    pub fn push(&mut self, value: i64) -> Result<(), VmError> {
        if self.data.len() >= STACK_DEPTH {
            return Err(VmError::StackOverflow);
        }
        self.data.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i64, VmError> {
        self.data.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn peek(&self) -> Result<i64, VmError> {
        self.data.last().copied().ok_or(VmError::StackUnderflow)
    }

    /// Pick the nth cell from the top (0 = top).
    pub fn from_top(&self, n: usize) -> Result<i64, VmError> {
        if n >= self.data.len() {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.data[self.data.len() - 1 - n])
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate from bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &i64> {
        self.data.iter()
    }
}

/// The return stack. Holds saved instruction pointers and counted-loop
/// limit/index pairs, interleaved with whatever a definition moves there
/// with >R. Anything a definition pushes must be popped before it exits.
#[derive(Debug, Clone, Default)]
pub struct ReturnStack {
    data: Vec<i64>,
}

impl ReturnStack {
    pub fn new() -> Self {
        ReturnStack {
            data: Vec::with_capacity(STACK_DEPTH),
        }
    }

    pub fn push(&mut self, value: i64) -> Result<(), VmError> {
        if self.data.len() >= STACK_DEPTH {
            return Err(VmError::ReturnStackOverflow);
        }
        self.data.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i64, VmError> {
        self.data.pop().ok_or(VmError::ReturnStackUnderflow)
    }

    pub fn peek(&self) -> Result<i64, VmError> {
        self.data.last().copied().ok_or(VmError::ReturnStackUnderflow)
    }

    pub fn from_top(&self, n: usize) -> Result<i64, VmError> {
        if n >= self.data.len() {
            return Err(VmError::ReturnStackUnderflow);
        }
        Ok(self.data[self.data.len() - 1 - n])
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
