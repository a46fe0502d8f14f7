// vm.rs - The Forth virtual machine
//
// Memory model: one flat byte arena. All Forth addresses are byte
// offsets into `mem`, never native pointers, so execution tokens,
// branch targets and string payloads stay comparable, boundable and
// serializable. The instruction pointer is a byte offset into compiled
// code. Threading is indirect: compiled bodies are lists of XT cells,
// and a closed match on the entry's behavior kind dispatches each one.

use crate::dict::{Code, Word};
use crate::error::VmError;
use crate::stack::{ReturnStack, Stack};

pub const CELL: usize = 8;
pub const MEM_SIZE: usize = 1024 * 1024;
pub const TIB_SIZE: usize = 1024;
pub const MAX_FILES: usize = 16;

/// Pictured numeric output buffer: the last 128 bytes of the arena,
/// filled backward.
pub const PNO_SIZE: usize = 128;
pub const PNO_TOP: usize = MEM_SIZE;
pub const PNO_BASE: usize = MEM_SIZE - PNO_SIZE;

/// PAD: fixed scratch for interpret-mode string literals, just below the
/// pictured-output buffer. Overwritten by every interpret-mode literal.
pub const PAD_SIZE: usize = 4096;
pub const PAD_BASE: usize = PNO_BASE - PAD_SIZE;

/// System variables live in the first bytes of the arena so STATE and
/// BASE can hand out real, fetchable addresses.
pub const STATE_ADDR: usize = 0;
pub const BASE_ADDR: usize = CELL;
const SYS_RESERVED: usize = 64;

/// Outer-interpreter mode. Immediate words execute in both states;
/// everything else is executed when interpreting and compiled when
/// compiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Interpret,
    Compile,
}

pub struct Vm {
    // Dictionary
    pub dict: Vec<Word>,
    pub latest: Option<usize>,
    /// The entry currently being compiled, captured by `:` so RECURSE
    /// and `;` do not have to trust `latest`.
    pub current_def: Option<usize>,

    // Arena
    pub mem: Vec<u8>,
    pub here: usize,

    // Stacks
    pub stack: Stack,
    pub rstack: ReturnStack,

    // Inner interpreter
    pub ip: usize,
    pub state: State,
    pub running: bool,

    // Input
    pub tib: Vec<u8>,
    pub tib_pos: usize,
    pub input_depth: usize,

    // Pictured numeric output cursor (top-down into mem)
    pub pno_pos: usize,

    // Open file handles for the file word set
    pub files: Vec<Option<std::fs::File>>,
    // REQUIRE's load-once list (canonical paths)
    pub loaded: Vec<std::path::PathBuf>,

    // Cached XTs for compiler internals
    pub xt_lit: usize,
    pub xt_branch: usize,
    pub xt_zbranch: usize,
    pub xt_exit: usize,
    pub xt_slit: usize,
    pub xt_do: usize,
    pub xt_qdo: usize,
    pub xt_loop: usize,
    pub xt_ploop: usize,
    pub xt_does: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create a VM with the core and I/O word sets installed.
    pub fn new() -> Self {
        let mut vm = Vm {
            dict: Vec::new(),
            latest: None,
            current_def: None,
            mem: vec![0; MEM_SIZE],
            here: SYS_RESERVED,
            stack: Stack::new(),
            rstack: ReturnStack::new(),
            ip: 0,
            state: State::Interpret,
            running: true,
            tib: Vec::new(),
            tib_pos: 0,
            input_depth: 0,
            pno_pos: PNO_TOP,
            files: (0..MAX_FILES).map(|_| None).collect(),
            loaded: Vec::new(),
            xt_lit: 0,
            xt_branch: 0,
            xt_zbranch: 0,
            xt_exit: 0,
            xt_slit: 0,
            xt_do: 0,
            xt_qdo: 0,
            xt_loop: 0,
            xt_ploop: 0,
            xt_does: 0,
        };
        vm.mem[BASE_ADDR..BASE_ADDR + CELL].copy_from_slice(&10i64.to_le_bytes());
        crate::prims::install(&mut vm);
        crate::io::install(&mut vm);
        vm.align_here();
        vm
    }

    // === Stack shorthands ===

    pub fn push(&mut self, v: i64) -> Result<(), VmError> {
        self.stack.push(v)
    }

    pub fn pop(&mut self) -> Result<i64, VmError> {
        self.stack.pop()
    }

    pub fn rpush(&mut self, v: i64) -> Result<(), VmError> {
        self.rstack.push(v)
    }

    pub fn rpop(&mut self) -> Result<i64, VmError> {
        self.rstack.pop()
    }

    /// Pop a cell and reinterpret it as an arena offset.
    pub fn pop_addr(&mut self) -> Result<usize, VmError> {
        let v = self.stack.pop()?;
        if v < 0 || v as usize >= MEM_SIZE {
            return Err(VmError::InvalidAddress(v as usize));
        }
        Ok(v as usize)
    }

    // === Arena access (byte-offset addressing, all bounds-checked) ===

    fn check(&self, addr: usize, len: usize) -> Result<(), VmError> {
        if addr.checked_add(len).map_or(true, |end| end > MEM_SIZE) {
            return Err(VmError::InvalidAddress(addr));
        }
        Ok(())
    }

    pub fn mem_fetch(&self, addr: usize) -> Result<i64, VmError> {
        self.check(addr, CELL)?;
        let mut bytes = [0u8; CELL];
        bytes.copy_from_slice(&self.mem[addr..addr + CELL]);
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn mem_store(&mut self, addr: usize, val: i64) -> Result<(), VmError> {
        self.check(addr, CELL)?;
        self.mem[addr..addr + CELL].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    pub fn mem_c_fetch(&self, addr: usize) -> Result<u8, VmError> {
        self.check(addr, 1)?;
        Ok(self.mem[addr])
    }

    pub fn mem_c_store(&mut self, addr: usize, val: u8) -> Result<(), VmError> {
        self.check(addr, 1)?;
        self.mem[addr] = val;
        Ok(())
    }

    pub fn mem_slice(&self, addr: usize, len: usize) -> Result<&[u8], VmError> {
        self.check(addr, len)?;
        Ok(&self.mem[addr..addr + len])
    }

    pub fn mem_copy_in(&mut self, addr: usize, bytes: &[u8]) -> Result<(), VmError> {
        self.check(addr, bytes.len())?;
        self.mem[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    // === Bump allocation and compilation ===

    pub fn align(n: usize) -> usize {
        (n + CELL - 1) & !(CELL - 1)
    }

    pub fn align_here(&mut self) {
        self.here = Self::align(self.here);
    }

    /// Move the allocation cursor. Negative amounts give space back at
    /// the top; there is no other reclamation. Growth stops at the PAD
    /// scratch region.
    pub fn allot(&mut self, n: i64) -> Result<(), VmError> {
        let new_here = self.here as i64 + n;
        if new_here < SYS_RESERVED as i64 || new_here > PAD_BASE as i64 {
            return Err(VmError::OutOfMemory);
        }
        self.here = new_here as usize;
        Ok(())
    }

    /// Append one cell at HERE and advance.
    pub fn compile_cell(&mut self, val: i64) -> Result<(), VmError> {
        if self.here + CELL > PAD_BASE {
            return Err(VmError::OutOfMemory);
        }
        self.mem[self.here..self.here + CELL].copy_from_slice(&val.to_le_bytes());
        self.here += CELL;
        Ok(())
    }

    /// Append raw bytes at HERE, advancing by the cell-aligned length so
    /// compiled code stays aligned.
    pub fn compile_bytes(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        let span = Self::align(bytes.len());
        if self.here + span > PAD_BASE {
            return Err(VmError::OutOfMemory);
        }
        self.mem[self.here..self.here + bytes.len()].copy_from_slice(bytes);
        self.here += span;
        Ok(())
    }

    // === Interpreter state ===

    pub fn set_state(&mut self, state: State) {
        self.state = state;
        let flag: i64 = if state == State::Compile { -1 } else { 0 };
        self.mem[STATE_ADDR..STATE_ADDR + CELL].copy_from_slice(&flag.to_le_bytes());
    }

    pub fn compiling(&self) -> bool {
        self.state == State::Compile
    }

    /// Current conversion radix, clamped to something sane.
    pub fn radix(&self) -> i64 {
        let base = self.mem_fetch(BASE_ADDR).unwrap_or(10);
        base.clamp(2, 36)
    }

    pub fn set_radix(&mut self, base: i64) {
        self.mem[BASE_ADDR..BASE_ADDR + CELL].copy_from_slice(&base.to_le_bytes());
    }

    // === Inner interpreter ===

    /// Fetch the cell at IP and advance past it.
    pub fn fetch_ip(&mut self) -> Result<i64, VmError> {
        let val = self.mem_fetch(self.ip)?;
        self.ip += CELL;
        Ok(val)
    }

    fn dispatch(&mut self, xt: usize) -> Result<(), VmError> {
        let code = self
            .dict
            .get(xt)
            .ok_or(VmError::InvalidAddress(xt))?
            .code;
        match code {
            Code::Native(f) => f(self),
            Code::Colon { body } => {
                self.rpush(self.ip as i64)?;
                self.ip = body;
                Ok(())
            }
            Code::Variable { addr } => self.push(addr as i64),
            Code::Constant { value } => self.push(value),
            Code::Does { addr, code } => {
                self.push(addr as i64)?;
                self.rpush(self.ip as i64)?;
                self.ip = code;
                Ok(())
            }
        }
    }

    /// Run compiled code from the current IP until the return stack
    /// drops below its depth at entry. Each (exit) pops one saved IP;
    /// the outermost one drains the loop.
    pub fn run(&mut self) -> Result<(), VmError> {
        let floor = self.rstack.depth();
        while self.running && self.rstack.depth() >= floor {
            let xt = self.fetch_ip()?;
            if xt < 0 {
                return Err(VmError::InvalidAddress(xt as usize));
            }
            self.dispatch(xt as usize)?;
        }
        Ok(())
    }

    /// Execute a single execution token. Threaded entries (Colon, Does)
    /// set up the IP and then run until they return; everything else is
    /// a single dispatch.
    pub fn execute(&mut self, xt: usize) -> Result<(), VmError> {
        match self.dict.get(xt).ok_or(VmError::InvalidAddress(xt))?.code {
            Code::Colon { .. } | Code::Does { .. } => {
                self.dispatch(xt)?;
                self.run()
            }
            _ => self.dispatch(xt),
        }
    }

    // === Abort ===

    /// Recover after a fatal error: empty both stacks, leave compile
    /// mode, reset the pictured-output cursor. Dictionary and arena are
    /// deliberately left alone so an interactive session can continue;
    /// definitions completed before the abort remain.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.rstack.clear();
        self.set_state(State::Interpret);
        self.current_def = None;
        self.pno_pos = PNO_TOP;
        self.input_depth = 0;
    }
}
