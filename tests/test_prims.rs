// test_prims.rs - Core word set: stack, arithmetic, comparison, logic,
// memory, and error behavior

use rivet::error::VmError;
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

// === Stack operations ===

#[test]
fn test_dup_drop_swap_over() {
    assert_eq!(stack(&forth("1 2 dup")), vec![1, 2, 2]);
    assert_eq!(stack(&forth("1 2 drop")), vec![1]);
    assert_eq!(stack(&forth("1 2 swap")), vec![2, 1]);
    assert_eq!(stack(&forth("1 2 over")), vec![1, 2, 1]);
}

#[test]
fn test_rot_family() {
    assert_eq!(stack(&forth("1 2 3 rot")), vec![2, 3, 1]);
    assert_eq!(stack(&forth("1 2 3 -rot")), vec![3, 1, 2]);
    assert_eq!(stack(&forth("1 2 nip")), vec![2]);
    assert_eq!(stack(&forth("1 2 tuck")), vec![2, 1, 2]);
}

#[test]
fn test_qdup() {
    assert_eq!(stack(&forth("5 ?dup")), vec![5, 5]);
    assert_eq!(stack(&forth("0 ?dup")), vec![0]);
}

#[test]
fn test_double_cell_ops() {
    assert_eq!(stack(&forth("1 2 3 4 2swap")), vec![3, 4, 1, 2]);
    assert_eq!(stack(&forth("1 2 3 4 2over")), vec![1, 2, 3, 4, 1, 2]);
    assert_eq!(stack(&forth("1 2 2dup")), vec![1, 2, 1, 2]);
    assert_eq!(stack(&forth("1 2 2drop")), Vec::<i64>::new());
}

#[test]
fn test_return_stack_ops() {
    assert_eq!(stack(&forth(": t 1 >r 2 r> ; t")), vec![2, 1]);
    assert_eq!(stack(&forth(": t 7 >r r@ r> ; t")), vec![7, 7]);
    assert_eq!(stack(&forth(": t 1 2 2>r 2r@ 2r> ; t")), vec![1, 2, 1, 2]);
}

#[test]
fn test_depth_and_pick() {
    assert_eq!(stack(&forth("depth 1 2 depth")), vec![0, 1, 2, 3]);
    assert_eq!(stack(&forth("10 20 30 2 pick")), vec![10, 20, 30, 10]);
    assert_eq!(stack(&forth("10 20 0 pick")), vec![10, 20, 20]);
}

// === Arithmetic ===

#[test]
fn test_basic_arithmetic() {
    assert_eq!(stack(&forth("3 4 +")), vec![7]);
    assert_eq!(stack(&forth("10 3 -")), vec![7]);
    assert_eq!(stack(&forth("6 7 *")), vec![42]);
    assert_eq!(stack(&forth("20 3 /")), vec![6]);
    assert_eq!(stack(&forth("20 3 mod")), vec![2]);
    assert_eq!(stack(&forth("20 3 /mod")), vec![2, 6]);
}

#[test]
fn test_negative_arithmetic() {
    assert_eq!(stack(&forth("-7 2 /")), vec![-3]);
    assert_eq!(stack(&forth("5 negate")), vec![-5]);
    assert_eq!(stack(&forth("-5 abs")), vec![5]);
}

#[test]
fn test_star_slash_uses_wide_intermediate() {
    // a*b overflows 64 bits; the scaled result does not
    let vm = forth("4611686018427387904 2 4 */");
    assert_eq!(stack(&vm), vec![4611686018427387904 / 2]);
}

#[test]
fn test_min_max_incr_decr() {
    assert_eq!(stack(&forth("3 7 min")), vec![3]);
    assert_eq!(stack(&forth("3 7 max")), vec![7]);
    assert_eq!(stack(&forth("5 1+ 1-")), vec![5]);
}

#[test]
fn test_wrapping_overflow() {
    // i64::MAX + 1 wraps, it does not abort
    assert_eq!(stack(&forth("9223372036854775807 1 +")), vec![i64::MIN]);
}

// === Comparison and logic ===

#[test]
fn test_comparisons_use_canonical_flags() {
    assert_eq!(stack(&forth("3 3 =")), vec![-1]);
    assert_eq!(stack(&forth("3 4 =")), vec![0]);
    assert_eq!(stack(&forth("3 4 <>")), vec![-1]);
    assert_eq!(stack(&forth("3 4 <")), vec![-1]);
    assert_eq!(stack(&forth("4 3 >")), vec![-1]);
    assert_eq!(stack(&forth("0 0=")), vec![-1]);
    assert_eq!(stack(&forth("-1 0<")), vec![-1]);
    assert_eq!(stack(&forth("1 0>")), vec![-1]);
}

#[test]
fn test_unsigned_compare() {
    // -1 as unsigned is the largest value
    assert_eq!(stack(&forth("-1 1 u<")), vec![0]);
    assert_eq!(stack(&forth("1 -1 u<")), vec![-1]);
}

#[test]
fn test_bitwise() {
    assert_eq!(stack(&forth("12 10 and")), vec![8]);
    assert_eq!(stack(&forth("12 10 or")), vec![14]);
    assert_eq!(stack(&forth("12 10 xor")), vec![6]);
    assert_eq!(stack(&forth("0 invert")), vec![-1]);
    assert_eq!(stack(&forth("1 4 lshift")), vec![16]);
    assert_eq!(stack(&forth("16 4 rshift")), vec![1]);
    // rshift is logical, not arithmetic
    assert_eq!(stack(&forth("-1 63 rshift")), vec![1]);
}

#[test]
fn test_boot_comparisons() {
    assert_eq!(stack(&forth("3 3 <=")), vec![-1]);
    assert_eq!(stack(&forth("4 3 >=")), vec![-1]);
    assert_eq!(stack(&forth("5 0<>")), vec![-1]);
    assert_eq!(stack(&forth("5 3 10 within")), vec![-1]);
    assert_eq!(stack(&forth("10 3 10 within")), vec![0]);
}

// === Memory ===

#[test]
fn test_fetch_store() {
    assert_eq!(stack(&forth("here 42 over ! @")), vec![42]);
    assert_eq!(stack(&forth("here 200 over c! c@")), vec![200]);
}

#[test]
fn test_plus_store() {
    let vm = forth("variable x 3 x ! 4 x +! x @");
    assert_eq!(stack(&vm), vec![7]);
}

#[test]
fn test_allot_and_comma() {
    let vm = forth("here 3 cells allot here swap -");
    assert_eq!(stack(&vm), vec![24]);
    let vm = forth("here 99 , @");
    assert_eq!(stack(&vm), vec![99]);
}

#[test]
fn test_cells_and_cell() {
    assert_eq!(stack(&forth("3 cells")), vec![24]);
    assert_eq!(stack(&forth("0 cell+")), vec![8]);
    assert_eq!(stack(&forth("cell")), vec![8]);
}

#[test]
fn test_move_and_fill() {
    let vm = forth(
        "here 16 allot \
         dup 8 65 fill \
         dup dup 8 + 4 move \
         dup 8 + c@ swap 11 + c@",
    );
    assert_eq!(stack(&vm), vec![65, 65]);
}

#[test]
fn test_variables_are_independent() {
    let vm = forth("variable a variable b 1 a ! 2 b ! a @ b @");
    assert_eq!(stack(&vm), vec![1, 2]);
}

#[test]
fn test_constant() {
    let vm = forth("42 constant answer answer answer +");
    assert_eq!(stack(&vm), vec![84]);
}

// === Radix ===

#[test]
fn test_radix_switch() {
    assert_eq!(stack(&forth("hex ff decimal")), vec![255]);
    assert_eq!(stack(&forth("hex 10 decimal 10")), vec![16, 10]);
}

#[test]
fn test_radix_prefixes() {
    assert_eq!(stack(&forth("$ff")), vec![255]);
    assert_eq!(stack(&forth("%1010")), vec![10]);
    assert_eq!(stack(&forth("hex #99 decimal")), vec![99]);
    assert_eq!(stack(&forth("0x1F")), vec![31]);
    assert_eq!(stack(&forth("-$10")), vec![-16]);
}

#[test]
fn test_base_is_a_real_variable() {
    assert_eq!(stack(&forth("base @")), vec![10]);
    assert_eq!(stack(&forth("16 base ! ff decimal")), vec![255]);
}

// === Errors ===

fn expect_err(src: &str) -> VmError {
    let mut vm = Vm::new();
    outer::load_boot(&mut vm).expect("boot");
    outer::interpret_source(&mut vm, src).expect_err("should fail")
}

#[test]
fn test_undefined_word() {
    match expect_err("no-such-word") {
        VmError::UndefinedWord(name) => assert_eq!(name, "no-such-word"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_division_by_zero() {
    assert!(matches!(expect_err("1 0 /"), VmError::DivisionByZero));
    assert!(matches!(expect_err("1 0 mod"), VmError::DivisionByZero));
}

#[test]
fn test_stack_underflow() {
    assert!(matches!(expect_err("drop"), VmError::StackUnderflow));
    assert!(matches!(expect_err("1 +"), VmError::StackUnderflow));
}

#[test]
fn test_out_of_range_access() {
    assert!(matches!(
        expect_err("99999999 @"),
        VmError::InvalidAddress(_)
    ));
    assert!(matches!(expect_err("-1 @"), VmError::InvalidAddress(_)));
}

#[test]
fn test_throw() {
    assert!(matches!(expect_err("-57 throw"), VmError::Throw(-57)));
    // zero is a no-op
    assert_eq!(stack(&forth("0 throw 1")), vec![1]);
}

#[test]
fn test_stdout_is_a_writable_file_handle() {
    assert_eq!(stack(&forth("stdout")), vec![-2]);
    assert_eq!(stack(&forth("s\" \" stdout write-file")), vec![0]);
    assert_eq!(stack(&forth("bl stdout emit-file")), vec![0]);
    assert_eq!(stack(&forth("stdout flush-file")), vec![0]);
}

#[test]
fn test_bad_file_handle_reports_ior() {
    // unknown handles fail with a status cell, they do not abort
    assert_eq!(stack(&forth("s\" x\" 99 write-file")), vec![-1]);
    assert_eq!(stack(&forth("bl 7 emit-file")), vec![-1]);
    assert_eq!(stack(&forth("99 close-file")), vec![-1]);
}

#[test]
fn test_session_survives_abort() {
    let mut vm = Vm::new();
    outer::load_boot(&mut vm).expect("boot");
    outer::interpret_source(&mut vm, ": good 42 ;").expect("define");
    assert!(outer::interpret_source(&mut vm, "1 0 /").is_err());
    vm.reset();
    // earlier definitions still work after the abort
    outer::interpret_source(&mut vm, "good").expect("resume");
    assert_eq!(stack(&vm), vec![42]);
}
