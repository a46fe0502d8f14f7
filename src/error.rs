// error.rs - VM error taxonomy

/// Errors raised while interpreting or executing Forth code.
///
/// Everything except `Io` is fatal to the current top-level operation:
/// the caller is expected to print the diagnostic, call `Vm::reset`, and
/// keep going with the dictionary and arena intact. `Io` carries
/// host-side failures (unreadable files and the like).
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    UndefinedWord(String),
    DivisionByZero,
    StackOverflow,
    StackUnderflow,
    ReturnStackOverflow,
    ReturnStackUnderflow,
    OutOfMemory,
    InvalidAddress(usize),
    Throw(i64),
    Aborted(String),
    Io(String),
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VmError::UndefinedWord(name) => write!(f, "{} ?  undefined word", name),
            VmError::DivisionByZero => write!(f, "division by zero"),
            VmError::StackOverflow => write!(f, "stack overflow"),
            VmError::StackUnderflow => write!(f, "stack underflow"),
            VmError::ReturnStackOverflow => write!(f, "return stack overflow"),
            VmError::ReturnStackUnderflow => write!(f, "return stack underflow"),
            VmError::OutOfMemory => write!(f, "dictionary space exhausted"),
            VmError::InvalidAddress(addr) => write!(f, "invalid address {}", addr),
            VmError::Throw(code) => write!(f, "THROW {}", code),
            VmError::Aborted(msg) => write!(f, "{}", msg),
            VmError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for VmError {}
