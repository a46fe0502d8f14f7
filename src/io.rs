// io.rs - Terminal and file word sets
//
// File words follow the usual convention of returning an ior on top:
// zero for success, nonzero for failure, so scripts can test and
// recover instead of aborting.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Read as _, Write as _};
use std::path::PathBuf;

use crate::error::VmError;
use crate::outer;
use crate::vm::{Vm, MAX_FILES};

const IOR_OK: i64 = 0;
const IOR_FAIL: i64 = -1;

/// Sentinel fid for the process stdout, recognized by the output file
/// words so scripts can target console and file through one path.
const FID_STDOUT: i64 = -2;

fn flush() -> Result<(), VmError> {
    io::stdout().flush().map_err(|e| VmError::Io(e.to_string()))
}

// ============================================================================
// TERMINAL
// ============================================================================

fn p_emit(vm: &mut Vm) -> Result<(), VmError> {
    let c = vm.pop()? as u8;
    io::stdout()
        .write_all(&[c])
        .map_err(|e| VmError::Io(e.to_string()))?;
    flush()
}

// type ( addr u -- )
fn p_type(vm: &mut Vm) -> Result<(), VmError> {
    let len = vm.pop()? as usize;
    let addr = vm.pop_addr()?;
    let bytes = vm.mem_slice(addr, len)?;
    io::stdout()
        .write_all(bytes)
        .map_err(|e| VmError::Io(e.to_string()))?;
    flush()
}

fn p_cr(_vm: &mut Vm) -> Result<(), VmError> {
    println!();
    Ok(())
}

// key ( -- c ) one byte from stdin
fn p_key(vm: &mut Vm) -> Result<(), VmError> {
    let mut buf = [0u8; 1];
    io::stdin()
        .read_exact(&mut buf)
        .map_err(|e| VmError::Io(e.to_string()))?;
    vm.push(buf[0] as i64)
}

// accept ( addr u1 -- u2 ) read a line from stdin into the arena
fn p_accept(vm: &mut Vm) -> Result<(), VmError> {
    let max = vm.pop()? as usize;
    let addr = vm.pop_addr()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| VmError::Io(e.to_string()))?;
    let bytes = line.trim_end_matches(['\n', '\r']).as_bytes();
    let n = bytes.len().min(max);
    vm.mem_copy_in(addr, &bytes[..n])?;
    vm.push(n as i64)
}

// ============================================================================
// FILE ACCESS
// ============================================================================

fn file_slot(vm: &mut Vm) -> Option<usize> {
    vm.files.iter().position(|f| f.is_none())
}

fn take_path(vm: &mut Vm) -> Result<String, VmError> {
    let len = vm.pop()? as usize;
    let addr = vm.pop_addr()?;
    let s = String::from_utf8_lossy(vm.mem_slice(addr, len)?).into_owned();
    Ok(expand_home(&s))
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

fn open_with(vm: &mut Vm, opts: &OpenOptions) -> Result<(), VmError> {
    let path = take_path(vm)?;
    let slot = match file_slot(vm) {
        Some(s) => s,
        None => {
            vm.push(0)?;
            return vm.push(IOR_FAIL);
        }
    };
    match opts.open(&path) {
        Ok(f) => {
            vm.files[slot] = Some(f);
            vm.push(slot as i64)?;
            vm.push(IOR_OK)
        }
        Err(_) => {
            vm.push(0)?;
            vm.push(IOR_FAIL)
        }
    }
}

// open-file ( addr u mode -- fid ior )
fn p_open_file(vm: &mut Vm) -> Result<(), VmError> {
    let mode = vm.pop()?;
    let mut opts = OpenOptions::new();
    match mode {
        0 => opts.read(true),
        1 => opts.write(true),
        _ => opts.read(true).write(true),
    };
    open_with(vm, &opts)
}

// create-file ( addr u mode -- fid ior ) truncates
fn p_create_file(vm: &mut Vm) -> Result<(), VmError> {
    vm.pop()?; // mode, always writable
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    open_with(vm, &opts)
}

/// Look up an open slot. Bad handles yield None; the callers report
/// them as a failed ior, never as a fatal error.
fn slot_file(vm: &mut Vm, fid: i64) -> Option<&mut File> {
    if fid < 0 || fid as usize >= MAX_FILES {
        return None;
    }
    vm.files[fid as usize].as_mut()
}

// close-file ( fid -- ior )
fn p_close_file(vm: &mut Vm) -> Result<(), VmError> {
    let fid = vm.pop()?;
    let had = fid >= 0
        && (fid as usize) < MAX_FILES
        && vm.files[fid as usize].take().is_some();
    vm.push(if had { IOR_OK } else { IOR_FAIL })
}

// write-file ( addr u fid -- ior )
fn p_write_file(vm: &mut Vm) -> Result<(), VmError> {
    let fid = vm.pop()?;
    let len = vm.pop()? as usize;
    let addr = vm.pop_addr()?;
    let bytes = vm.mem_slice(addr, len)?.to_vec();
    let ior = if fid == FID_STDOUT {
        let mut out = io::stdout();
        if out.write_all(&bytes).and_then(|_| out.flush()).is_ok() {
            IOR_OK
        } else {
            IOR_FAIL
        }
    } else {
        match slot_file(vm, fid) {
            Some(f) => {
                if f.write_all(&bytes).is_ok() {
                    IOR_OK
                } else {
                    IOR_FAIL
                }
            }
            None => IOR_FAIL,
        }
    };
    vm.push(ior)
}

// read-line ( addr u1 fid -- u2 flag ior )
fn p_read_line(vm: &mut Vm) -> Result<(), VmError> {
    let fid = vm.pop()?;
    let max = vm.pop()? as usize;
    let addr = vm.pop_addr()?;
    vm.mem_slice(addr, max)?;

    let read = match slot_file(vm, fid) {
        Some(f) => read_one_line(f, max),
        None => Err(()),
    };
    match read {
        Ok((buf, saw_any)) => {
            vm.mem_copy_in(addr, &buf)?;
            vm.push(buf.len() as i64)?;
            vm.push(if saw_any { -1 } else { 0 })?;
            vm.push(IOR_OK)
        }
        Err(()) => {
            vm.push(0)?;
            vm.push(0)?;
            vm.push(IOR_FAIL)
        }
    }
}

// Byte-at-a-time keeps the file position right after the newline.
fn read_one_line(file: &mut File, max: usize) -> Result<(Vec<u8>, bool), ()> {
    let mut buf = Vec::new();
    let mut one = [0u8; 1];
    let mut saw_any = false;
    loop {
        match file.read(&mut one) {
            Ok(0) => break,
            Ok(_) => {
                saw_any = true;
                if one[0] == b'\n' {
                    break;
                }
                if one[0] != b'\r' && buf.len() < max {
                    buf.push(one[0]);
                }
            }
            Err(_) => return Err(()),
        }
    }
    Ok((buf, saw_any))
}

// emit-file ( c fid -- ior )
fn p_emit_file(vm: &mut Vm) -> Result<(), VmError> {
    let fid = vm.pop()?;
    let c = vm.pop()? as u8;
    let ior = if fid == FID_STDOUT {
        let mut out = io::stdout();
        if out.write_all(&[c]).and_then(|_| out.flush()).is_ok() {
            IOR_OK
        } else {
            IOR_FAIL
        }
    } else {
        match slot_file(vm, fid) {
            Some(f) => {
                if f.write_all(&[c]).is_ok() {
                    IOR_OK
                } else {
                    IOR_FAIL
                }
            }
            None => IOR_FAIL,
        }
    };
    vm.push(ior)
}

// flush-file ( fid -- ior )
fn p_flush_file(vm: &mut Vm) -> Result<(), VmError> {
    let fid = vm.pop()?;
    let ior = if fid == FID_STDOUT {
        if io::stdout().flush().is_ok() {
            IOR_OK
        } else {
            IOR_FAIL
        }
    } else {
        match slot_file(vm, fid) {
            Some(f) => {
                if f.flush().is_ok() {
                    IOR_OK
                } else {
                    IOR_FAIL
                }
            }
            None => IOR_FAIL,
        }
    };
    vm.push(ior)
}

// stdout ( -- fid ) the console as a writable file handle
fn p_stdout(vm: &mut Vm) -> Result<(), VmError> {
    vm.push(FID_STDOUT)
}

// slurp-file ( addr1 u1 -- addr2 u2 ) whole file into bump-allocated arena
fn p_slurp_file(vm: &mut Vm) -> Result<(), VmError> {
    let path = take_path(vm)?;
    let mut contents = Vec::new();
    File::open(&path)
        .and_then(|mut f| f.read_to_end(&mut contents))
        .map_err(|e| VmError::Io(format!("{}: {}", path, e)))?;
    let addr = vm.here;
    // reserve first so a full arena cannot spill into the scratch regions
    vm.allot(contents.len() as i64)?;
    vm.mem_copy_in(addr, &contents)?;
    vm.align_here();
    vm.push(addr as i64)?;
    vm.push(contents.len() as i64)
}

// ============================================================================
// SOURCE LOADING
// ============================================================================

// include ( "path" -- ) missing files are reported, not fatal
fn p_include(vm: &mut Vm) -> Result<(), VmError> {
    let name = outer::parse_word(vm);
    let path = PathBuf::from(expand_home(&name));
    if let Err(e) = outer::load_file(vm, &path) {
        match e {
            VmError::Io(msg) => {
                eprintln!("include: {}", msg);
                Ok(())
            }
            other => Err(other),
        }
    } else {
        Ok(())
    }
}

// require ( "path" -- ) include at most once per canonical path
fn p_require(vm: &mut Vm) -> Result<(), VmError> {
    let name = outer::parse_word(vm);
    let path = PathBuf::from(expand_home(&name));
    let canon = path.canonicalize().unwrap_or_else(|_| path.clone());
    if vm.loaded.contains(&canon) {
        return Ok(());
    }
    vm.loaded.push(canon);
    if let Err(e) = outer::load_file(vm, &path) {
        match e {
            VmError::Io(msg) => {
                eprintln!("require: {}", msg);
                Ok(())
            }
            other => Err(other),
        }
    } else {
        Ok(())
    }
}

// included ( addr u -- ) like include with the path on the stack
fn p_included(vm: &mut Vm) -> Result<(), VmError> {
    let path = PathBuf::from(take_path(vm)?);
    outer::load_file(vm, &path)
}

// ============================================================================
// COMMENTS AND CONTROL
// ============================================================================

// \ ( -- ) skip the rest of the line
fn p_backslash(vm: &mut Vm) -> Result<(), VmError> {
    vm.tib_pos = vm.tib.len();
    Ok(())
}

// ( ( -- ) skip until the closing paren
fn p_paren(vm: &mut Vm) -> Result<(), VmError> {
    outer::parse_delim(vm, b')');
    Ok(())
}

fn p_throw(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    if n == 0 {
        Ok(())
    } else {
        Err(VmError::Throw(n))
    }
}

fn p_bye(vm: &mut Vm) -> Result<(), VmError> {
    vm.running = false;
    Ok(())
}

// ============================================================================
// REGISTRATION
// ============================================================================

pub fn install(vm: &mut Vm) {
    // Terminal
    vm.register("emit", p_emit, false);
    vm.register("type", p_type, false);
    vm.register("cr", p_cr, false);
    vm.register("key", p_key, false);
    vm.register("accept", p_accept, false);

    // File access
    vm.add_constant("r/o", 0);
    vm.add_constant("w/o", 1);
    vm.add_constant("r/w", 2);
    vm.register("open-file", p_open_file, false);
    vm.register("create-file", p_create_file, false);
    vm.register("close-file", p_close_file, false);
    vm.register("write-file", p_write_file, false);
    vm.register("read-line", p_read_line, false);
    vm.register("emit-file", p_emit_file, false);
    vm.register("flush-file", p_flush_file, false);
    vm.register("stdout", p_stdout, false);
    vm.register("slurp-file", p_slurp_file, false);

    // Source loading
    vm.register("include", p_include, false);
    vm.register("require", p_require, false);
    vm.register("included", p_included, false);

    // Comments
    vm.register("\\", p_backslash, true);
    vm.register("(", p_paren, true);

    // Control
    vm.register("throw", p_throw, false);
    vm.register("bye", p_bye, false);
}
