// outer.rs - Outer (text) interpreter
//
// Tokenizes the terminal input buffer on whitespace and resolves each
// token: dictionary hit, number, or undefined. Immediate words execute
// even in compile mode, which is what lets the control-flow and literal
// families run their compile-time logic.

use std::path::Path;

use crate::error::VmError;
use crate::vm::{State, Vm, TIB_SIZE};

/// Bound on nested INCLUDE frames.
pub const MAX_INPUT_DEPTH: usize = 16;

/// Skip leading whitespace, then collect the next whitespace-delimited
/// token from the input buffer. Empty string means end of line.
pub fn parse_word(vm: &mut Vm) -> String {
    while vm.tib_pos < vm.tib.len() && vm.tib[vm.tib_pos] <= b' ' {
        vm.tib_pos += 1;
    }
    let start = vm.tib_pos;
    while vm.tib_pos < vm.tib.len() && vm.tib[vm.tib_pos] > b' ' {
        vm.tib_pos += 1;
    }
    String::from_utf8_lossy(&vm.tib[start..vm.tib_pos]).into_owned()
}

/// Collect bytes until the delimiter (no whitespace skipping beyond one
/// leading blank). The delimiter itself is consumed and not included.
pub fn parse_delim(vm: &mut Vm, delim: u8) -> Vec<u8> {
    if vm.tib_pos < vm.tib.len() && vm.tib[vm.tib_pos] == b' ' {
        vm.tib_pos += 1;
    }
    let mut buf = Vec::new();
    while vm.tib_pos < vm.tib.len() && vm.tib[vm.tib_pos] != delim {
        buf.push(vm.tib[vm.tib_pos]);
        vm.tib_pos += 1;
    }
    if vm.tib_pos < vm.tib.len() {
        vm.tib_pos += 1; // consume delimiter
    }
    buf
}

/// Escape-aware variant of `parse_delim` for S\". An escaped delimiter
/// decodes to a literal delimiter and does not terminate; only a bare
/// delimiter closes the literal.
pub fn parse_escaped(vm: &mut Vm, delim: u8) -> Vec<u8> {
    if vm.tib_pos < vm.tib.len() && vm.tib[vm.tib_pos] == b' ' {
        vm.tib_pos += 1;
    }
    let mut buf = Vec::new();
    while vm.tib_pos < vm.tib.len() {
        let c = vm.tib[vm.tib_pos];
        vm.tib_pos += 1;
        if c == delim {
            break;
        }
        if c == b'\\' && vm.tib_pos < vm.tib.len() {
            let esc = vm.tib[vm.tib_pos];
            vm.tib_pos += 1;
            buf.push(match esc {
                b'n' => b'\n',
                b'r' => b'\r',
                b't' => b'\t',
                b'\\' => b'\\',
                b'0' => 0,
                b'a' => 7,
                b'b' => 8,
                b'e' => 27,
                _ => esc, // includes the escaped delimiter
            });
        } else {
            buf.push(c);
        }
    }
    buf
}

/// Parse a token as a number in the current radix. Grammar: optional
/// sign, optional radix override ($ hex, # decimal, % binary, or 0x),
/// then digits (letters past 9, case-insensitive).
pub fn try_number(vm: &Vm, s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let mut i = 0;
    let mut negative = false;
    if bytes[0] == b'-' && bytes.len() > 1 {
        negative = true;
        i = 1;
    } else if bytes[0] == b'+' && bytes.len() > 1 {
        i = 1;
    }

    let mut base = vm.radix();
    if i < bytes.len() && bytes[i] == b'$' {
        base = 16;
        i += 1;
    } else if i < bytes.len() && bytes[i] == b'#' {
        base = 10;
        i += 1;
    } else if i < bytes.len() && bytes[i] == b'%' {
        base = 2;
        i += 1;
    } else if bytes.len() > i + 2 && bytes[i] == b'0' && (bytes[i + 1] | 0x20) == b'x' {
        base = 16;
        i += 2;
    }

    if i >= bytes.len() {
        return None;
    }

    let mut val: i64 = 0;
    for &c in &bytes[i..] {
        let digit = match c {
            b'0'..=b'9' => (c - b'0') as i64,
            b'a'..=b'z' => (c - b'a') as i64 + 10,
            b'A'..=b'Z' => (c - b'A') as i64 + 10,
            _ => return None,
        };
        if digit >= base {
            return None;
        }
        val = val.wrapping_mul(base).wrapping_add(digit);
    }

    Some(if negative { -val } else { val })
}

/// Interpret the tokens currently in the input buffer.
fn interpret_tib(vm: &mut Vm) -> Result<(), VmError> {
    while vm.running {
        let token = parse_word(vm);
        if token.is_empty() {
            break; // end of line
        }

        if let Some(xt) = vm.find(&token) {
            if vm.compiling() && !vm.dict[xt].immediate {
                vm.compile_cell(xt as i64)?;
            } else {
                vm.execute(xt)?;
            }
            continue;
        }

        if let Some(n) = try_number(vm, &token) {
            if vm.compiling() {
                vm.compile_cell(vm.xt_lit as i64)?;
                vm.compile_cell(n)?;
            } else {
                vm.push(n)?;
            }
            continue;
        }

        return Err(VmError::UndefinedWord(token));
    }
    Ok(())
}

/// Interpret a single line of source text.
pub fn interpret_line(vm: &mut Vm, line: &str) -> Result<(), VmError> {
    let mut bytes = line.as_bytes();
    if bytes.len() >= TIB_SIZE {
        bytes = &bytes[..TIB_SIZE - 1];
    }
    vm.tib = bytes.to_vec();
    vm.tib_pos = 0;
    interpret_tib(vm)
}

/// Interpret multi-line source text line by line.
pub fn interpret_source(vm: &mut Vm, source: &str) -> Result<(), VmError> {
    for line in source.lines() {
        if !vm.running {
            break;
        }
        interpret_line(vm, line)?;
    }
    Ok(())
}

/// Load and interpret a file. The caller's input position is an open
/// input frame: it is saved around the nested file and restored
/// afterward, so an INCLUDE mid-line resumes cleanly.
pub fn load_file(vm: &mut Vm, path: &Path) -> Result<(), VmError> {
    if vm.input_depth >= MAX_INPUT_DEPTH {
        return Err(VmError::Io(format!(
            "{}: include nesting too deep",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| VmError::Io(format!("{}: {}", path.display(), e)))?;

    let saved_tib = std::mem::take(&mut vm.tib);
    let saved_pos = vm.tib_pos;
    vm.input_depth += 1;

    let result = interpret_source(vm, &text);

    vm.input_depth = vm.input_depth.saturating_sub(1);
    vm.tib = saved_tib;
    vm.tib_pos = saved_pos;
    result
}

/// Load the bootstrap definitions that are written in Forth itself.
pub fn load_boot(vm: &mut Vm) -> Result<(), VmError> {
    interpret_source(vm, include_str!("boot.fth"))
}

/// Compile-mode check used by words that only make sense inside a
/// definition.
pub fn require_compiling(vm: &Vm, who: &str) -> Result<(), VmError> {
    if vm.state == State::Compile {
        Ok(())
    } else {
        Err(VmError::Aborted(format!("{}: compile-only word", who)))
    }
}
