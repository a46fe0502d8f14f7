// test_literals.rs - String literals, pictured numeric output, and
// number re-parsing

use rivet::outer;
use rivet::vm::Vm;

fn forth(src: &str) -> Vm {
    let mut vm = Vm::new();
    outer::load_boot(&mut vm).expect("boot");
    outer::interpret_source(&mut vm, src).expect("interpret");
    vm
}

fn stack(vm: &Vm) -> Vec<i64> {
    vm.stack.iter().copied().collect()
}

/// Pop ( addr u ) and read the bytes out of the arena.
fn pop_string(vm: &mut Vm) -> String {
    let len = vm.pop().expect("len") as usize;
    let addr = vm.pop().expect("addr") as usize;
    String::from_utf8_lossy(vm.mem_slice(addr, len).expect("slice")).into_owned()
}

// === Plain strings ===

#[test]
fn test_s_quote_interpreted() {
    let mut vm = forth("s\" hello world\"");
    assert_eq!(pop_string(&mut vm), "hello world");
}

#[test]
fn test_s_quote_compiled() {
    let mut vm = forth(": greet s\" hello\" ; greet");
    assert_eq!(pop_string(&mut vm), "hello");
}

#[test]
fn test_s_quote_empty() {
    let mut vm = forth("s\" \"");
    assert_eq!(pop_string(&mut vm), "");
}

#[test]
fn test_compiled_string_survives_later_definitions() {
    // the payload lives inline in the body, not in shared scratch
    let mut vm = forth(
        ": a s\" first\" ; \
         : b s\" second\" ; \
         a",
    );
    assert_eq!(pop_string(&mut vm), "first");
}

#[test]
fn test_interpreted_string_is_usable_until_next_one() {
    let vm = forth("s\" abc\" drop c@");
    assert_eq!(stack(&vm), vec![b'a' as i64]);
}

#[test]
fn test_code_after_compiled_string_still_runs() {
    // execution must step over the inline payload
    let mut vm = forth(": t s\" xy\" 42 ; t");
    let answer = vm.pop().expect("answer");
    assert_eq!(answer, 42);
    assert_eq!(pop_string(&mut vm), "xy");
}

// === Escaped strings ===

#[test]
fn test_escape_sequences() {
    let mut vm = forth("s\\\" a\\nb\\tc\"");
    assert_eq!(pop_string(&mut vm), "a\nb\tc");
}

#[test]
fn test_escaped_delimiter_does_not_terminate() {
    let mut vm = forth("s\\\" say \\\"hi\\\" now\"");
    assert_eq!(pop_string(&mut vm), "say \"hi\" now");
}

#[test]
fn test_escaped_backslash_and_controls() {
    let mut vm = forth("s\\\" a\\\\b\\0c\\ad\"");
    assert_eq!(
        pop_string(&mut vm).as_bytes(),
        &[b'a', b'\\', b'b', 0, b'c', 7, b'd']
    );
}

#[test]
fn test_unknown_escape_is_literal() {
    let mut vm = forth("s\\\" a\\qb\"");
    assert_eq!(pop_string(&mut vm), "aqb");
}

// === Character literals ===

#[test]
fn test_char_words() {
    assert_eq!(stack(&forth("char A")), vec![65]);
    assert_eq!(stack(&forth(": t [char] * ; t")), vec![42]);
    assert_eq!(stack(&forth("bl")), vec![32]);
}

#[test]
fn test_parse_name() {
    let mut vm = forth("parse-name hello");
    assert_eq!(pop_string(&mut vm), "hello");
}

#[test]
fn test_parse_name_never_writes_into_scratch() {
    let mut vm = Vm::new();
    outer::load_boot(&mut vm).expect("boot");
    // park a string in the interpret scratch, then exhaust the arena
    outer::interpret_source(&mut vm, "s\" keepme\"").expect("scratch");
    let len = vm.pop().expect("len") as usize;
    let addr = vm.pop().expect("addr") as usize;
    let free = rivet::vm::PAD_BASE - vm.here;
    outer::interpret_source(&mut vm, &format!("{} allot", free)).expect("fill");
    let err = outer::interpret_source(&mut vm, "parse-name hello").expect_err("full");
    assert!(matches!(err, rivet::error::VmError::OutOfMemory));
    // the scratch string must survive the failed allocation
    let kept = vm.mem_slice(addr, len).expect("slice");
    assert_eq!(kept, &b"keepme"[..]);
}

// === Pictured numeric output ===

#[test]
fn test_pictured_basic() {
    let mut vm = forth("1234 <# #s #>");
    assert_eq!(pop_string(&mut vm), "1234");
}

#[test]
fn test_pictured_zero_produces_one_digit() {
    let mut vm = forth("0 <# #s #>");
    assert_eq!(pop_string(&mut vm), "0");
}

#[test]
fn test_pictured_respects_radix() {
    let mut vm = forth("hex 255 <# #s #>");
    assert_eq!(pop_string(&mut vm), "ff");
    let mut vm = forth("5 2 base ! <# #s #>");
    assert_eq!(pop_string(&mut vm), "101");
}

#[test]
fn test_pictured_hold_and_sign() {
    // classic dollars-and-cents formatting
    let mut vm = forth("-1234 dup abs <# # # [char] . hold #s swap sign #>");
    assert_eq!(pop_string(&mut vm), "-12.34");
}

#[test]
fn test_pictured_fixed_digits() {
    let mut vm = forth("7 <# # # # #>");
    assert_eq!(pop_string(&mut vm), "007");
}

// === Number re-parsing ===

#[test]
fn test_s_to_number_roundtrip() {
    let vm = forth("1234 <# #s #> s>number?");
    assert_eq!(stack(&vm), vec![1234, 0, -1]);
}

#[test]
fn test_s_to_number_roundtrip_hex() {
    let vm = forth("hex beef <# #s #> s>number? decimal");
    assert_eq!(stack(&vm), vec![0xbeef, 0, -1]);
}

#[test]
fn test_s_to_number_rejects_garbage() {
    let vm = forth("s\" 12x4\" s>number?");
    assert_eq!(stack(&vm), vec![0, 0, 0]);
}

#[test]
fn test_s_to_number_negative() {
    let vm = forth("s\" -42\" s>number?");
    assert_eq!(stack(&vm), vec![-42, 0, -1]);
}

#[test]
fn test_to_number_partial() {
    // stops at the first non-digit, reports the rest
    let vm = forth("0 s\" 12ab\" >number");
    let got = stack(&vm);
    assert_eq!(got[0], 12);
    assert_eq!(got[2], 2); // "ab" unconsumed in decimal
}

#[test]
fn test_count_unpacks_counted_string() {
    // build a counted string by hand at here
    let mut vm = forth("here 3 over c! char x over 1+ c! char y over 2 + c! char z over 3 + c! count");
    assert_eq!(pop_string(&mut vm), "xyz");
}
