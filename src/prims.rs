// prims.rs - Core primitive words
//
// Stack, arithmetic, comparison, logic, memory, the compiler word
// family, control flow, string literals, and pictured numeric output.
// Registration order at the bottom caches the XTs the compiler words
// emit: (lit), (branch), (0branch), (exit), (s"), the loop runtimes,
// and (does>).

use std::io::{self, Write};

use crate::dict::Code;
use crate::error::VmError;
use crate::outer;
use crate::vm::{State, Vm, BASE_ADDR, CELL, PAD_BASE, PAD_SIZE, PNO_BASE, PNO_TOP, STATE_ADDR};

fn flush() -> Result<(), VmError> {
    io::stdout().flush().map_err(|e| VmError::Io(e.to_string()))
}

// ============================================================================
// STACK OPERATIONS
// ============================================================================

fn p_dup(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.stack.peek()?;
    vm.push(a)
}

fn p_drop(vm: &mut Vm) -> Result<(), VmError> {
    vm.pop()?;
    Ok(())
}

fn p_swap(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(b)?;
    vm.push(a)
}

fn p_over(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.stack.from_top(1)?;
    vm.push(a)
}

fn p_rot(vm: &mut Vm) -> Result<(), VmError> {
    // ( a b c -- b c a )
    let c = vm.pop()?;
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(b)?;
    vm.push(c)?;
    vm.push(a)
}

fn p_mrot(vm: &mut Vm) -> Result<(), VmError> {
    // ( a b c -- c a b )
    let c = vm.pop()?;
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(c)?;
    vm.push(a)?;
    vm.push(b)
}

fn p_nip(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    vm.pop()?;
    vm.push(b)
}

fn p_tuck(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(b)?;
    vm.push(a)?;
    vm.push(b)
}

fn p_qdup(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.stack.peek()?;
    if a != 0 {
        vm.push(a)?;
    }
    Ok(())
}

fn p_2dup(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.stack.from_top(1)?;
    let b = vm.stack.from_top(0)?;
    vm.push(a)?;
    vm.push(b)
}

fn p_2drop(vm: &mut Vm) -> Result<(), VmError> {
    vm.pop()?;
    vm.pop()?;
    Ok(())
}

fn p_2swap(vm: &mut Vm) -> Result<(), VmError> {
    let d = vm.pop()?;
    let c = vm.pop()?;
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(c)?;
    vm.push(d)?;
    vm.push(a)?;
    vm.push(b)
}

fn p_2over(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.stack.from_top(3)?;
    let b = vm.stack.from_top(2)?;
    vm.push(a)?;
    vm.push(b)
}

fn p_to_r(vm: &mut Vm) -> Result<(), VmError> {
    let v = vm.pop()?;
    vm.rpush(v)
}

fn p_r_from(vm: &mut Vm) -> Result<(), VmError> {
    let v = vm.rpop()?;
    vm.push(v)
}

fn p_r_fetch(vm: &mut Vm) -> Result<(), VmError> {
    let v = vm.rstack.peek()?;
    vm.push(v)
}

fn p_2to_r(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.rpush(a)?;
    vm.rpush(b)
}

fn p_2r_from(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.rpop()?;
    let a = vm.rpop()?;
    vm.push(a)?;
    vm.push(b)
}

fn p_2r_fetch(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.rstack.from_top(1)?;
    let b = vm.rstack.from_top(0)?;
    vm.push(a)?;
    vm.push(b)
}

fn p_depth(vm: &mut Vm) -> Result<(), VmError> {
    let d = vm.stack.depth() as i64;
    vm.push(d)
}

fn p_pick(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    if n < 0 {
        return Err(VmError::StackUnderflow);
    }
    let v = vm.stack.from_top(n as usize)?;
    vm.push(v)
}

// ============================================================================
// ARITHMETIC
// ============================================================================

fn p_add(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a.wrapping_add(b))
}

fn p_sub(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a.wrapping_sub(b))
}

fn p_mul(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a.wrapping_mul(b))
}

fn p_div(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    vm.push(a.wrapping_div(b))
}

fn p_mod(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    vm.push(a.wrapping_rem(b))
}

fn p_divmod(vm: &mut Vm) -> Result<(), VmError> {
    // ( a b -- rem quot )
    let b = vm.pop()?;
    let a = vm.pop()?;
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    vm.push(a.wrapping_rem(b))?;
    vm.push(a.wrapping_div(b))
}

fn p_star_slash(vm: &mut Vm) -> Result<(), VmError> {
    // ( a b c -- a*b/c ) with a double-width intermediate
    let c = vm.pop()?;
    let b = vm.pop()?;
    let a = vm.pop()?;
    if c == 0 {
        return Err(VmError::DivisionByZero);
    }
    vm.push(((a as i128 * b as i128) / c as i128) as i64)
}

fn p_negate(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(a.wrapping_neg())
}

fn p_abs(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(a.wrapping_abs())
}

fn p_min(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a.min(b))
}

fn p_max(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a.max(b))
}

fn p_1add(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(a.wrapping_add(1))
}

fn p_1sub(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(a.wrapping_sub(1))
}

// ============================================================================
// COMPARISON AND LOGIC
// ============================================================================

fn flag(b: bool) -> i64 {
    if b {
        -1
    } else {
        0
    }
}

fn p_eq(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(flag(a == b))
}

fn p_neq(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(flag(a != b))
}

fn p_lt(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(flag(a < b))
}

fn p_gt(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(flag(a > b))
}

fn p_ult(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()? as u64;
    let a = vm.pop()? as u64;
    vm.push(flag(a < b))
}

fn p_0eq(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(flag(a == 0))
}

fn p_0lt(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(flag(a < 0))
}

fn p_0gt(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(flag(a > 0))
}

fn p_and(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a & b)
}

fn p_or(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a | b)
}

fn p_xor(vm: &mut Vm) -> Result<(), VmError> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(a ^ b)
}

fn p_invert(vm: &mut Vm) -> Result<(), VmError> {
    let a = vm.pop()?;
    vm.push(!a)
}

fn p_lshift(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    let a = vm.pop()? as u64;
    vm.push(a.checked_shl(n as u32).unwrap_or(0) as i64)
}

fn p_rshift(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    let a = vm.pop()? as u64;
    vm.push(a.checked_shr(n as u32).unwrap_or(0) as i64)
}

// ============================================================================
// MEMORY
// ============================================================================

fn p_fetch(vm: &mut Vm) -> Result<(), VmError> {
    let addr = vm.pop_addr()?;
    let v = vm.mem_fetch(addr)?;
    vm.push(v)
}

fn p_store(vm: &mut Vm) -> Result<(), VmError> {
    let addr = vm.pop_addr()?;
    let v = vm.pop()?;
    vm.mem_store(addr, v)
}

fn p_cfetch(vm: &mut Vm) -> Result<(), VmError> {
    let addr = vm.pop_addr()?;
    let v = vm.mem_c_fetch(addr)?;
    vm.push(v as i64)
}

fn p_cstore(vm: &mut Vm) -> Result<(), VmError> {
    let addr = vm.pop_addr()?;
    let v = vm.pop()?;
    vm.mem_c_store(addr, v as u8)
}

fn p_pstore(vm: &mut Vm) -> Result<(), VmError> {
    // +! ( n addr -- )
    let addr = vm.pop_addr()?;
    let n = vm.pop()?;
    let old = vm.mem_fetch(addr)?;
    vm.mem_store(addr, old.wrapping_add(n))
}

fn p_here(vm: &mut Vm) -> Result<(), VmError> {
    let h = vm.here as i64;
    vm.push(h)
}

fn p_allot(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    vm.allot(n)
}

fn p_cells(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    vm.push(n.wrapping_mul(CELL as i64))
}

fn p_cell_plus(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    vm.push(n.wrapping_add(CELL as i64))
}

fn p_comma(vm: &mut Vm) -> Result<(), VmError> {
    let v = vm.pop()?;
    vm.align_here();
    vm.compile_cell(v)
}

fn p_c_comma(vm: &mut Vm) -> Result<(), VmError> {
    let v = vm.pop()?;
    let addr = vm.here;
    vm.allot(1)?;
    vm.mem_c_store(addr, v as u8)
}

fn p_move(vm: &mut Vm) -> Result<(), VmError> {
    // ( src dst n -- )
    let n = vm.pop()? as usize;
    let dst = vm.pop_addr()?;
    let src = vm.pop_addr()?;
    vm.mem_slice(src, n)?;
    vm.mem_slice(dst, n)?;
    vm.mem.copy_within(src..src + n, dst);
    Ok(())
}

fn p_fill(vm: &mut Vm) -> Result<(), VmError> {
    // ( addr n c -- )
    let c = vm.pop()? as u8;
    let n = vm.pop()? as usize;
    let addr = vm.pop_addr()?;
    vm.mem_slice(addr, n)?;
    vm.mem[addr..addr + n].fill(c);
    Ok(())
}

fn p_slash_string(vm: &mut Vm) -> Result<(), VmError> {
    // ( addr u n -- addr+n u-n )
    let n = vm.pop()?;
    let u = vm.pop()?;
    let addr = vm.pop()?;
    let n = n.min(u);
    vm.push(addr.wrapping_add(n))?;
    vm.push(u.wrapping_sub(n))
}

fn p_count(vm: &mut Vm) -> Result<(), VmError> {
    // ( addr -- addr+1 len ) counted-string unpack
    let addr = vm.pop_addr()?;
    let len = vm.mem_c_fetch(addr)?;
    vm.push(addr as i64 + 1)?;
    vm.push(len as i64)
}

// ============================================================================
// COMPILER WORDS
// ============================================================================

// : ( "name" -- ) open a new colon definition
fn p_colon(vm: &mut Vm) -> Result<(), VmError> {
    let name = outer::parse_word(vm);
    if name.is_empty() {
        return Err(VmError::Aborted(": requires a name".into()));
    }
    vm.align_here();
    let body = vm.here;
    let xt = vm.add_word(&name, Code::Colon { body }, false, true);
    vm.current_def = Some(xt);
    vm.set_state(State::Compile);
    Ok(())
}

// ; ( -- ) close the definition: compile (exit), reveal, leave compile mode
fn p_semicolon(vm: &mut Vm) -> Result<(), VmError> {
    let xt = vm
        .current_def
        .take()
        .ok_or_else(|| VmError::Aborted("; without :".into()))?;
    vm.compile_cell(vm.xt_exit as i64)?;
    vm.dict[xt].hidden = false;
    vm.set_state(State::Interpret);
    Ok(())
}

fn p_immediate(vm: &mut Vm) -> Result<(), VmError> {
    let xt = vm
        .latest
        .ok_or_else(|| VmError::Aborted("immediate: empty dictionary".into()))?;
    vm.dict[xt].immediate = true;
    Ok(())
}

fn p_lbracket(vm: &mut Vm) -> Result<(), VmError> {
    vm.set_state(State::Interpret);
    Ok(())
}

fn p_rbracket(vm: &mut Vm) -> Result<(), VmError> {
    vm.set_state(State::Compile);
    Ok(())
}

// ' ( "name" -- xt )
fn p_tick(vm: &mut Vm) -> Result<(), VmError> {
    let name = outer::parse_word(vm);
    let xt = vm.find(&name).ok_or(VmError::UndefinedWord(name))?;
    vm.push(xt as i64)
}

// ['] ( "name" -- ) compile the XT as a literal
fn p_bracket_tick(vm: &mut Vm) -> Result<(), VmError> {
    let name = outer::parse_word(vm);
    let xt = vm.find(&name).ok_or(VmError::UndefinedWord(name))?;
    vm.compile_cell(vm.xt_lit as i64)?;
    vm.compile_cell(xt as i64)
}

fn p_execute(vm: &mut Vm) -> Result<(), VmError> {
    let xt = vm.pop()?;
    if xt < 0 || xt as usize >= vm.dict.len() {
        return Err(VmError::InvalidAddress(xt as usize));
    }
    vm.execute(xt as usize)
}

fn p_to_body(vm: &mut Vm) -> Result<(), VmError> {
    let xt = vm.pop()?;
    if xt < 0 || xt as usize >= vm.dict.len() {
        return Err(VmError::InvalidAddress(xt as usize));
    }
    let addr = vm.body_addr(xt as usize)?;
    vm.push(addr as i64)
}

// create ( "name" -- ) new entry whose invocation pushes its data address
fn p_create(vm: &mut Vm) -> Result<(), VmError> {
    let name = outer::parse_word(vm);
    if name.is_empty() {
        return Err(VmError::Aborted("create requires a name".into()));
    }
    vm.align_here();
    let addr = vm.here;
    vm.add_word(&name, Code::Variable { addr }, false, false);
    Ok(())
}

// find ( addr u -- xt 1 | xt -1 | addr u 0 )
fn p_find(vm: &mut Vm) -> Result<(), VmError> {
    let len = vm.pop()?;
    let addr = vm.pop()?;
    let name =
        String::from_utf8_lossy(vm.mem_slice(addr as usize, len as usize)?).into_owned();
    match vm.find(&name) {
        Some(xt) => {
            vm.push(xt as i64)?;
            vm.push(if vm.dict[xt].immediate { 1 } else { -1 })
        }
        None => {
            vm.push(addr)?;
            vm.push(len)?;
            vm.push(0)
        }
    }
}

// literal ( x -- ) compile the top of stack as an inline literal
fn p_literal(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "literal")?;
    let v = vm.pop()?;
    vm.compile_cell(vm.xt_lit as i64)?;
    vm.compile_cell(v)
}

fn p_compile_comma(vm: &mut Vm) -> Result<(), VmError> {
    let xt = vm.pop()?;
    vm.compile_cell(xt)
}

// postpone ( "name" -- ) compile the compilation semantics of name
fn p_postpone(vm: &mut Vm) -> Result<(), VmError> {
    let name = outer::parse_word(vm);
    let xt = vm.find(&name).ok_or(VmError::UndefinedWord(name))?;
    if vm.dict[xt].immediate {
        vm.compile_cell(xt as i64)
    } else {
        let cc = vm
            .find("compile,")
            .ok_or_else(|| VmError::UndefinedWord("compile,".into()))?;
        vm.compile_cell(vm.xt_lit as i64)?;
        vm.compile_cell(xt as i64)?;
        vm.compile_cell(cc as i64)
    }
}

// recurse ( -- ) compile a call to the definition being compiled
fn p_recurse(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "recurse")?;
    let xt = vm
        .current_def
        .ok_or_else(|| VmError::Aborted("recurse outside a definition".into()))?;
    vm.compile_cell(xt as i64)
}

// exit ( -- ) compile an early return
fn p_user_exit(vm: &mut Vm) -> Result<(), VmError> {
    if vm.compiling() {
        vm.compile_cell(vm.xt_exit as i64)?;
    }
    Ok(())
}

// ============================================================================
// RUNTIME SUPPORT (threaded-code internals)
// ============================================================================

// (lit) push the inline cell
fn p_lit(vm: &mut Vm) -> Result<(), VmError> {
    let v = vm.fetch_ip()?;
    vm.push(v)
}

// (branch) unconditional jump to the inline target
fn p_branch(vm: &mut Vm) -> Result<(), VmError> {
    let dest = vm.fetch_ip()?;
    vm.ip = dest as usize;
    Ok(())
}

// (0branch) jump if the popped flag is zero
fn p_zbranch(vm: &mut Vm) -> Result<(), VmError> {
    let dest = vm.fetch_ip()?;
    if vm.pop()? == 0 {
        vm.ip = dest as usize;
    }
    Ok(())
}

// (exit) pop the continuation
fn p_exit(vm: &mut Vm) -> Result<(), VmError> {
    vm.ip = vm.rpop()? as usize;
    Ok(())
}

// (does>) retag the newest entry and return from the defining word.
// The defining word's own execution ends here; the custom code after
// this instruction runs only when the children are invoked later.
fn p_does_runtime(vm: &mut Vm) -> Result<(), VmError> {
    let xt = vm
        .latest
        .ok_or_else(|| VmError::Aborted("does> with empty dictionary".into()))?;
    let addr = match vm.dict[xt].code {
        Code::Variable { addr } => addr,
        Code::Does { addr, .. } => addr,
        _ => {
            return Err(VmError::Aborted(format!(
                "does>: {} was not created",
                vm.dict[xt].name
            )))
        }
    };
    vm.dict[xt].code = Code::Does {
        addr,
        code: vm.ip,
    };
    vm.ip = vm.rpop()? as usize;
    Ok(())
}

// does> ( -- ) compile-time: emit (does>)
fn p_does_compile(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "does>")?;
    vm.compile_cell(vm.xt_does as i64)
}

// (s") push the inline string's payload address and length, then step
// over the cell-aligned payload
fn p_slit(vm: &mut Vm) -> Result<(), VmError> {
    let len = vm.fetch_ip()?;
    let addr = vm.ip;
    vm.push(addr as i64)?;
    vm.push(len)?;
    vm.ip += Vm::align(len as usize);
    Ok(())
}

// ============================================================================
// CONTROL FLOW (immediate compile-time words)
// ============================================================================

// if ( -- fwd )
fn p_if(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "if")?;
    vm.compile_cell(vm.xt_zbranch as i64)?;
    vm.push(vm.here as i64)?;
    vm.compile_cell(0) // placeholder
}

// else ( fwd1 -- fwd2 )
fn p_else(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "else")?;
    vm.compile_cell(vm.xt_branch as i64)?;
    let fwd2 = vm.here;
    vm.compile_cell(0)?;
    let fwd1 = vm.pop_addr()?;
    vm.mem_store(fwd1, vm.here as i64)?;
    vm.push(fwd2 as i64)
}

// then ( fwd -- )
fn p_then(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "then")?;
    let fwd = vm.pop_addr()?;
    vm.mem_store(fwd, vm.here as i64)
}

// begin ( -- back )
fn p_begin(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "begin")?;
    vm.push(vm.here as i64)
}

// while ( back -- fwd back ) forward branch over the loop, BEGIN target kept on top
fn p_while(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "while")?;
    vm.compile_cell(vm.xt_zbranch as i64)?;
    let fwd = vm.here;
    vm.compile_cell(0)?;
    let back = vm.pop()?;
    vm.push(fwd as i64)?;
    vm.push(back)
}

// repeat ( fwd back -- )
fn p_repeat(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "repeat")?;
    let back = vm.pop()?;
    let fwd = vm.pop_addr()?;
    vm.compile_cell(vm.xt_branch as i64)?;
    vm.compile_cell(back)?;
    vm.mem_store(fwd, vm.here as i64)
}

// until ( back -- )
fn p_until(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "until")?;
    let back = vm.pop()?;
    vm.compile_cell(vm.xt_zbranch as i64)?;
    vm.compile_cell(back)
}

// again ( back -- )
fn p_again(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "again")?;
    let back = vm.pop()?;
    vm.compile_cell(vm.xt_branch as i64)?;
    vm.compile_cell(back)
}

// === Counted loops ===

// (do) runtime ( limit index -- ) ( R: -- limit index )
fn p_do_rt(vm: &mut Vm) -> Result<(), VmError> {
    let idx = vm.pop()?;
    let lim = vm.pop()?;
    vm.rpush(lim)?;
    vm.rpush(idx)
}

// (?do) runtime: skip the whole loop when the range is already empty
fn p_qdo_rt(vm: &mut Vm) -> Result<(), VmError> {
    let dest = vm.fetch_ip()?;
    let idx = vm.pop()?;
    let lim = vm.pop()?;
    if idx == lim {
        vm.ip = dest as usize;
        Ok(())
    } else {
        vm.rpush(lim)?;
        vm.rpush(idx)
    }
}

// (loop) runtime: increment by one, branch back unless the limit is hit
fn p_loop_rt(vm: &mut Vm) -> Result<(), VmError> {
    let dest = vm.fetch_ip()?;
    let idx = vm.rpop()?.wrapping_add(1);
    let lim = vm.rstack.peek()?;
    if idx == lim {
        vm.rpop()?; // discard limit
        Ok(())
    } else {
        vm.rpush(idx)?;
        vm.ip = dest as usize;
        Ok(())
    }
}

// (+loop) runtime: add the popped step and terminate on boundary
// crossing, so a step that overshoots the limit still stops the loop
fn p_ploop_rt(vm: &mut Vm) -> Result<(), VmError> {
    let dest = vm.fetch_ip()?;
    let step = vm.pop()?;
    let old_idx = vm.rpop()?;
    let new_idx = old_idx.wrapping_add(step);
    let lim = vm.rstack.peek()?;

    let old_diff = old_idx.wrapping_sub(lim);
    let new_diff = new_idx.wrapping_sub(lim);
    let crossed = ((old_diff ^ new_diff) < 0) && ((old_diff ^ step) < 0);
    if crossed || new_diff == 0 {
        vm.rpop()?; // discard limit
        Ok(())
    } else {
        vm.rpush(new_idx)?;
        vm.ip = dest as usize;
        Ok(())
    }
}

// do ( -- 0 back )
fn p_do(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "do")?;
    vm.compile_cell(vm.xt_do as i64)?;
    vm.push(0)?; // only ?do needs a forward ref
    vm.push(vm.here as i64)
}

// ?do ( -- fwd back )
fn p_qdo(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "?do")?;
    vm.compile_cell(vm.xt_qdo as i64)?;
    let fwd = vm.here;
    vm.compile_cell(0)?;
    vm.push(fwd as i64)?;
    vm.push(vm.here as i64)
}

// loop ( fwd back -- )
fn p_loop(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "loop")?;
    let back = vm.pop()?;
    let fwd = vm.pop()?;
    vm.compile_cell(vm.xt_loop as i64)?;
    vm.compile_cell(back)?;
    if fwd != 0 {
        vm.mem_store(fwd as usize, vm.here as i64)?;
    }
    Ok(())
}

// +loop ( fwd back -- )
fn p_ploop(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "+loop")?;
    let back = vm.pop()?;
    let fwd = vm.pop()?;
    vm.compile_cell(vm.xt_ploop as i64)?;
    vm.compile_cell(back)?;
    if fwd != 0 {
        vm.mem_store(fwd as usize, vm.here as i64)?;
    }
    Ok(())
}

// i ( -- index )
fn p_i(vm: &mut Vm) -> Result<(), VmError> {
    let idx = vm.rstack.from_top(0)?;
    vm.push(idx)
}

// j ( -- index ) index of the next outer loop
fn p_j(vm: &mut Vm) -> Result<(), VmError> {
    let idx = vm.rstack.from_top(2)?;
    vm.push(idx)
}

// unloop ( R: limit index -- )
fn p_unloop(vm: &mut Vm) -> Result<(), VmError> {
    vm.rpop()?;
    vm.rpop()?;
    Ok(())
}

// === Multi-way dispatch ===

// case ( -- 0 ) sentinel under the accumulated exit branches
fn p_case(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "case")?;
    vm.push(0)
}

// of ( -- fwd ) compile: over = (0branch) fwd drop
fn p_of(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "of")?;
    let xt_over = vm.find("over").ok_or_else(|| VmError::UndefinedWord("over".into()))?;
    let xt_eq = vm.find("=").ok_or_else(|| VmError::UndefinedWord("=".into()))?;
    let xt_drop = vm.find("drop").ok_or_else(|| VmError::UndefinedWord("drop".into()))?;
    vm.compile_cell(xt_over as i64)?;
    vm.compile_cell(xt_eq as i64)?;
    vm.compile_cell(vm.xt_zbranch as i64)?;
    let fwd = vm.here;
    vm.compile_cell(0)?;
    vm.compile_cell(xt_drop as i64)?;
    vm.push(fwd as i64)
}

// endof ( fwd -- exit ) branch to ENDCASE, resolve the arm's skip
fn p_endof(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "endof")?;
    vm.compile_cell(vm.xt_branch as i64)?;
    let exit = vm.here;
    vm.compile_cell(0)?;
    let fwd = vm.pop_addr()?;
    vm.mem_store(fwd, vm.here as i64)?;
    vm.push(exit as i64)
}

// endcase ( 0 exit... -- ) drop the selector, resolve every exit branch
fn p_endcase(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "endcase")?;
    let xt_drop = vm.find("drop").ok_or_else(|| VmError::UndefinedWord("drop".into()))?;
    vm.compile_cell(xt_drop as i64)?;
    while vm.stack.peek()? != 0 {
        let exit = vm.pop_addr()?;
        vm.mem_store(exit, vm.here as i64)?;
    }
    vm.pop()?; // sentinel
    Ok(())
}

// ============================================================================
// STRING LITERALS
// ============================================================================

/// Common tail of S" and S\": either compile an inline (s") instruction
/// or park the bytes in the PAD scratch region.
fn string_literal(vm: &mut Vm, buf: &[u8]) -> Result<(), VmError> {
    if vm.compiling() {
        vm.compile_cell(vm.xt_slit as i64)?;
        vm.compile_cell(buf.len() as i64)?;
        vm.compile_bytes(buf)
    } else {
        if buf.len() > PAD_SIZE {
            return Err(VmError::OutOfMemory);
        }
        vm.mem_copy_in(PAD_BASE, buf)?;
        vm.push(PAD_BASE as i64)?;
        vm.push(buf.len() as i64)
    }
}

// s" ( -- addr u ) plain delimited string
fn p_s_quote(vm: &mut Vm) -> Result<(), VmError> {
    let buf = outer::parse_delim(vm, b'"');
    string_literal(vm, &buf)
}

// s\" ( -- addr u ) escape-aware string
fn p_s_bs_quote(vm: &mut Vm) -> Result<(), VmError> {
    let buf = outer::parse_escaped(vm, b'"');
    string_literal(vm, &buf)
}

// ." ( -- ) print the string; compiles string + type inside a definition
fn p_dot_quote(vm: &mut Vm) -> Result<(), VmError> {
    let buf = outer::parse_delim(vm, b'"');
    if vm.compiling() {
        vm.compile_cell(vm.xt_slit as i64)?;
        vm.compile_cell(buf.len() as i64)?;
        vm.compile_bytes(&buf)?;
        let xt_type = vm.find("type").ok_or_else(|| VmError::UndefinedWord("type".into()))?;
        vm.compile_cell(xt_type as i64)
    } else {
        io::stdout()
            .write_all(&buf)
            .map_err(|e| VmError::Io(e.to_string()))?;
        flush()
    }
}

// .( ( -- ) print immediately, even mid-compilation
fn p_dot_paren(vm: &mut Vm) -> Result<(), VmError> {
    let buf = outer::parse_delim(vm, b')');
    io::stdout()
        .write_all(&buf)
        .map_err(|e| VmError::Io(e.to_string()))?;
    flush()
}

// abort" ( flag -- ) compile a conditional abort with a message
fn p_abort_quote(vm: &mut Vm) -> Result<(), VmError> {
    outer::require_compiling(vm, "abort\"")?;
    let buf = outer::parse_delim(vm, b'"');

    // flag false: (0branch) skips the message and the abort
    vm.compile_cell(vm.xt_zbranch as i64)?;
    let fwd = vm.here;
    vm.compile_cell(0)?;

    vm.compile_cell(vm.xt_slit as i64)?;
    vm.compile_cell(buf.len() as i64)?;
    vm.compile_bytes(&buf)?;

    let xt_type = vm.find("type").ok_or_else(|| VmError::UndefinedWord("type".into()))?;
    let xt_abort = vm.find("abort").ok_or_else(|| VmError::UndefinedWord("abort".into()))?;
    vm.compile_cell(xt_type as i64)?;
    vm.compile_cell(xt_abort as i64)?;

    vm.mem_store(fwd, vm.here as i64)
}

// [char] ( "c" -- ) character literal, compiled when compiling
fn p_bracket_char(vm: &mut Vm) -> Result<(), VmError> {
    let word = outer::parse_word(vm);
    let c = *word
        .as_bytes()
        .first()
        .ok_or_else(|| VmError::Aborted("[char] needs a character".into()))? as i64;
    if vm.compiling() {
        vm.compile_cell(vm.xt_lit as i64)?;
        vm.compile_cell(c)
    } else {
        vm.push(c)
    }
}

// char ( "c" -- c )
fn p_char(vm: &mut Vm) -> Result<(), VmError> {
    let word = outer::parse_word(vm);
    let c = *word
        .as_bytes()
        .first()
        .ok_or_else(|| VmError::Aborted("char needs a character".into()))? as i64;
    vm.push(c)
}

// parse-name ( "name" -- addr u ) parsed token, bump-allocated
fn p_parse_name(vm: &mut Vm) -> Result<(), VmError> {
    let word = outer::parse_word(vm);
    let addr = vm.here;
    // reserve first so a full arena cannot spill into the scratch regions
    vm.allot(word.len() as i64)?;
    vm.mem_copy_in(addr, word.as_bytes())?;
    vm.push(addr as i64)?;
    vm.push(word.len() as i64)
}

// ============================================================================
// NUMERIC OUTPUT
// ============================================================================

fn p_dot(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    print!("{} ", n);
    flush()
}

fn p_u_dot(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()? as u64;
    print!("{} ", n);
    flush()
}

fn p_dot_s(vm: &mut Vm) -> Result<(), VmError> {
    print!("<{}> ", vm.stack.depth());
    for v in vm.stack.iter() {
        print!("{} ", v);
    }
    flush()
}

/// Prepend one character to the pictured-output buffer.
fn pno_put(vm: &mut Vm, c: u8) -> Result<(), VmError> {
    if vm.pno_pos <= PNO_BASE {
        return Err(VmError::Aborted("pictured numeric output overflow".into()));
    }
    vm.pno_pos -= 1;
    vm.mem[vm.pno_pos] = c;
    Ok(())
}

// <# ( -- ) begin pictured numeric output
fn p_pno_begin(vm: &mut Vm) -> Result<(), VmError> {
    vm.pno_pos = PNO_TOP;
    Ok(())
}

// # ( u -- u' ) extract and prepend one digit in the active radix
fn p_pno_digit(vm: &mut Vm) -> Result<(), VmError> {
    let base = vm.radix() as u64;
    let u = vm.pop()? as u64;
    let rem = (u % base) as u8;
    vm.push((u / base) as i64)?;
    let c = if rem < 10 { b'0' + rem } else { b'a' + rem - 10 };
    pno_put(vm, c)
}

// #s ( u -- 0 ) all remaining digits
fn p_pno_digits(vm: &mut Vm) -> Result<(), VmError> {
    loop {
        p_pno_digit(vm)?;
        if vm.stack.peek()? == 0 {
            return Ok(());
        }
    }
}

// #> ( u -- addr u ) finish: what remains between the cursor and the end
fn p_pno_end(vm: &mut Vm) -> Result<(), VmError> {
    vm.pop()?; // discard remaining magnitude
    vm.push(vm.pno_pos as i64)?;
    vm.push((PNO_TOP - vm.pno_pos) as i64)
}

// hold ( c -- ) prepend an arbitrary character
fn p_hold(vm: &mut Vm) -> Result<(), VmError> {
    let c = vm.pop()? as u8;
    pno_put(vm, c)
}

// sign ( n -- ) prepend '-' when negative
fn p_sign(vm: &mut Vm) -> Result<(), VmError> {
    if vm.pop()? < 0 {
        pno_put(vm, b'-')?;
    }
    Ok(())
}

// ============================================================================
// NUMBER RE-PARSING
// ============================================================================

// s>number? ( addr u -- n 0 -1 | 0 0 0 )
fn p_s_to_number(vm: &mut Vm) -> Result<(), VmError> {
    let len = vm.pop()? as usize;
    let addr = vm.pop_addr()?;
    let text = String::from_utf8_lossy(vm.mem_slice(addr, len)?).into_owned();
    match outer::try_number(vm, text.trim()) {
        Some(n) => {
            vm.push(n)?;
            vm.push(0)?;
            vm.push(-1)
        }
        None => {
            vm.push(0)?;
            vm.push(0)?;
            vm.push(0)
        }
    }
}

// >number ( u1 addr1 len1 -- u2 addr2 len2 ) partial conversion
fn p_to_number(vm: &mut Vm) -> Result<(), VmError> {
    let mut len = vm.pop()?;
    let mut addr = vm.pop()?;
    let mut acc = vm.pop()?;
    let base = vm.radix();
    while len > 0 {
        let c = vm.mem_c_fetch(addr as usize)?;
        let digit = match c {
            b'0'..=b'9' => (c - b'0') as i64,
            b'a'..=b'z' => (c - b'a') as i64 + 10,
            b'A'..=b'Z' => (c - b'A') as i64 + 10,
            _ => break,
        };
        if digit >= base {
            break;
        }
        acc = acc.wrapping_mul(base).wrapping_add(digit);
        addr += 1;
        len -= 1;
    }
    vm.push(acc)?;
    vm.push(addr)?;
    vm.push(len)
}

// ============================================================================
// MISCELLANEOUS
// ============================================================================

fn p_noop(_vm: &mut Vm) -> Result<(), VmError> {
    Ok(())
}

fn p_true(vm: &mut Vm) -> Result<(), VmError> {
    vm.push(-1)
}

fn p_false(vm: &mut Vm) -> Result<(), VmError> {
    vm.push(0)
}

fn p_bl(vm: &mut Vm) -> Result<(), VmError> {
    vm.push(32)
}

fn p_space(vm: &mut Vm) -> Result<(), VmError> {
    print!(" ");
    flush()
}

fn p_spaces(vm: &mut Vm) -> Result<(), VmError> {
    let n = vm.pop()?;
    for _ in 0..n.max(0) {
        print!(" ");
    }
    flush()
}

fn p_abort(_vm: &mut Vm) -> Result<(), VmError> {
    Err(VmError::Aborted("ABORT".into()))
}

fn p_decimal(vm: &mut Vm) -> Result<(), VmError> {
    vm.set_radix(10);
    Ok(())
}

fn p_hex(vm: &mut Vm) -> Result<(), VmError> {
    vm.set_radix(16);
    Ok(())
}

// ============================================================================
// REGISTRATION
// ============================================================================

pub fn install(vm: &mut Vm) {
    // Threaded-code internals first, so the compiler words can cache
    // their XTs.
    vm.xt_lit = vm.register("(lit)", p_lit, false);
    vm.xt_branch = vm.register("(branch)", p_branch, false);
    vm.xt_zbranch = vm.register("(0branch)", p_zbranch, false);
    vm.xt_exit = vm.register("(exit)", p_exit, false);
    vm.xt_slit = vm.register("(s\")", p_slit, false);
    vm.xt_do = vm.register("(do)", p_do_rt, false);
    vm.xt_qdo = vm.register("(?do)", p_qdo_rt, false);
    vm.xt_loop = vm.register("(loop)", p_loop_rt, false);
    vm.xt_ploop = vm.register("(+loop)", p_ploop_rt, false);
    vm.xt_does = vm.register("(does>)", p_does_runtime, false);

    // Stack
    vm.register("dup", p_dup, false);
    vm.register("drop", p_drop, false);
    vm.register("swap", p_swap, false);
    vm.register("over", p_over, false);
    vm.register("rot", p_rot, false);
    vm.register("-rot", p_mrot, false);
    vm.register("nip", p_nip, false);
    vm.register("tuck", p_tuck, false);
    vm.register("?dup", p_qdup, false);
    vm.register("2dup", p_2dup, false);
    vm.register("2drop", p_2drop, false);
    vm.register("2swap", p_2swap, false);
    vm.register("2over", p_2over, false);
    vm.register(">r", p_to_r, false);
    vm.register("r>", p_r_from, false);
    vm.register("r@", p_r_fetch, false);
    vm.register("2>r", p_2to_r, false);
    vm.register("2r>", p_2r_from, false);
    vm.register("2r@", p_2r_fetch, false);
    vm.register("depth", p_depth, false);
    vm.register("pick", p_pick, false);

    // Arithmetic
    vm.register("+", p_add, false);
    vm.register("-", p_sub, false);
    vm.register("*", p_mul, false);
    vm.register("/", p_div, false);
    vm.register("mod", p_mod, false);
    vm.register("/mod", p_divmod, false);
    vm.register("*/", p_star_slash, false);
    vm.register("negate", p_negate, false);
    vm.register("abs", p_abs, false);
    vm.register("min", p_min, false);
    vm.register("max", p_max, false);
    vm.register("1+", p_1add, false);
    vm.register("1-", p_1sub, false);

    // Comparison
    vm.register("=", p_eq, false);
    vm.register("<>", p_neq, false);
    vm.register("<", p_lt, false);
    vm.register(">", p_gt, false);
    vm.register("u<", p_ult, false);
    vm.register("0=", p_0eq, false);
    vm.register("0<", p_0lt, false);
    vm.register("0>", p_0gt, false);

    // Logic
    vm.register("and", p_and, false);
    vm.register("or", p_or, false);
    vm.register("xor", p_xor, false);
    vm.register("invert", p_invert, false);
    vm.register("lshift", p_lshift, false);
    vm.register("rshift", p_rshift, false);

    // Memory
    vm.register("@", p_fetch, false);
    vm.register("!", p_store, false);
    vm.register("c@", p_cfetch, false);
    vm.register("c!", p_cstore, false);
    vm.register("+!", p_pstore, false);
    vm.register("here", p_here, false);
    vm.register("allot", p_allot, false);
    vm.register("cells", p_cells, false);
    vm.register("cell+", p_cell_plus, false);
    vm.register(",", p_comma, false);
    vm.register("c,", p_c_comma, false);
    vm.register("move", p_move, false);
    vm.register("fill", p_fill, false);
    vm.register("/string", p_slash_string, false);
    vm.register("count", p_count, false);

    // Compiler
    vm.register(":", p_colon, false);
    vm.register(";", p_semicolon, true);
    vm.register("immediate", p_immediate, false);
    vm.register("[", p_lbracket, true);
    vm.register("]", p_rbracket, false);
    vm.register("'", p_tick, false);
    vm.register("[']", p_bracket_tick, true);
    vm.register("execute", p_execute, false);
    vm.register(">body", p_to_body, false);
    vm.register("create", p_create, false);
    vm.register("find", p_find, false);
    vm.register("literal", p_literal, true);
    vm.register("compile,", p_compile_comma, false);
    vm.register("postpone", p_postpone, true);
    vm.register("does>", p_does_compile, true);
    vm.register("recurse", p_recurse, true);
    vm.register("exit", p_user_exit, true);

    // Control flow
    vm.register("if", p_if, true);
    vm.register("else", p_else, true);
    vm.register("then", p_then, true);
    vm.register("begin", p_begin, true);
    vm.register("while", p_while, true);
    vm.register("repeat", p_repeat, true);
    vm.register("until", p_until, true);
    vm.register("again", p_again, true);
    vm.register("do", p_do, true);
    vm.register("?do", p_qdo, true);
    vm.register("loop", p_loop, true);
    vm.register("+loop", p_ploop, true);
    vm.register("i", p_i, false);
    vm.register("j", p_j, false);
    vm.register("unloop", p_unloop, false);
    vm.register("case", p_case, true);
    vm.register("of", p_of, true);
    vm.register("endof", p_endof, true);
    vm.register("endcase", p_endcase, true);

    // Strings
    vm.register("s\"", p_s_quote, true);
    vm.register("s\\\"", p_s_bs_quote, true);
    vm.register(".\"", p_dot_quote, true);
    vm.register(".(", p_dot_paren, true);
    vm.register("abort\"", p_abort_quote, true);
    vm.register("[char]", p_bracket_char, true);
    vm.register("char", p_char, false);
    vm.register("parse-name", p_parse_name, false);

    // Numeric output
    vm.register(".", p_dot, false);
    vm.register("u.", p_u_dot, false);
    vm.register(".s", p_dot_s, false);
    vm.register("<#", p_pno_begin, false);
    vm.register("#", p_pno_digit, false);
    vm.register("#s", p_pno_digits, false);
    vm.register("#>", p_pno_end, false);
    vm.register("hold", p_hold, false);
    vm.register("sign", p_sign, false);

    // Number re-parsing
    vm.register("s>number?", p_s_to_number, false);
    vm.register(">number", p_to_number, false);

    // Miscellaneous
    vm.register("noop", p_noop, false);
    vm.register("true", p_true, false);
    vm.register("false", p_false, false);
    vm.register("bl", p_bl, false);
    vm.register("space", p_space, false);
    vm.register("spaces", p_spaces, false);
    vm.register("abort", p_abort, false);
    vm.register("decimal", p_decimal, false);
    vm.register("hex", p_hex, false);
    vm.add_constant("cell", CELL as i64);

    // STATE and BASE expose real arena addresses.
    vm.add_word("state", Code::Variable { addr: STATE_ADDR }, false, false);
    vm.add_word("base", Code::Variable { addr: BASE_ADDR }, false, false);
}
