// test_compiler.rs - Colon definitions, control flow, defining words

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

// === Colon definitions ===

#[test]
fn test_simple_definition() {
    assert_eq!(stack(&forth(": double 2 * ; 5 double")), vec![10]);
}

#[test]
fn test_definitions_compose() {
    let vm = forth(": double 2 * ; : quad double double ; 3 quad");
    assert_eq!(stack(&vm), vec![12]);
}

#[test]
fn test_redefinition_shadows() {
    let vm = forth(": f 1 ; : f 2 ; f");
    assert_eq!(stack(&vm), vec![2]);
}

#[test]
fn test_old_callers_keep_old_binding() {
    // g compiled against the first f; redefining f later must not
    // change g
    let vm = forth(": f 1 ; : g f ; : f 2 ; g f");
    assert_eq!(stack(&vm), vec![1, 2]);
}

#[test]
fn test_definition_is_hidden_while_compiling() {
    // f inside the body refers to the previous f, not the new one
    let vm = forth(": f 10 ; : f f 1 + ; f");
    assert_eq!(stack(&vm), vec![11]);
}

#[test]
fn test_recurse() {
    let vm = forth(": fact dup 1 > if dup 1 - recurse * then ; 5 fact");
    assert_eq!(stack(&vm), vec![120]);
}

#[test]
fn test_exit_returns_early() {
    let vm = forth(": t 1 exit 2 ; t");
    assert_eq!(stack(&vm), vec![1]);
}

#[test]
fn test_lookup_is_case_insensitive() {
    let vm = forth(": Double 2 * ; 5 DOUBLE 5 double");
    assert_eq!(stack(&vm), vec![10, 10]);
}

#[test]
fn test_tick_and_execute() {
    assert_eq!(stack(&forth(": f 42 ; ' f execute")), vec![42]);
    assert_eq!(stack(&forth(": f 42 ; : g ['] f execute ; g")), vec![42]);
}

#[test]
fn test_bracket_state_switch() {
    // [ 2 3 + ] literal computes at compile time
    let vm = forth(": t [ 2 3 + ] literal ; t");
    assert_eq!(stack(&vm), vec![5]);
}

#[test]
fn test_postpone() {
    // mine behaves like if at compile time
    let vm = forth(
        ": mine postpone if ; immediate \
         : t mine 1 else 2 then ; \
         -1 t 0 t",
    );
    assert_eq!(stack(&vm), vec![1, 2]);
}

// === Conditionals ===

#[test]
fn test_if_then() {
    let vm = forth(": t if 1 else 2 then ; -1 t 0 t");
    assert_eq!(stack(&vm), vec![1, 2]);
}

#[test]
fn test_if_without_else() {
    let vm = forth(": t if 1 then ; -1 t 0 t");
    assert_eq!(stack(&vm), vec![1]);
}

#[test]
fn test_any_nonzero_is_true() {
    let vm = forth(": t if 1 else 2 then ; 7 t -7 t");
    assert_eq!(stack(&vm), vec![1, 1]);
}

#[test]
fn test_nested_conditionals() {
    let vm = forth(
        ": sgn dup 0< if drop -1 else 0> if 1 else 0 then then ; \
         -5 sgn 0 sgn 9 sgn",
    );
    assert_eq!(stack(&vm), vec![-1, 0, 1]);
}

// === Indefinite loops ===

#[test]
fn test_begin_until() {
    let vm = forth(": t 0 begin 1+ dup 5 = until ; t");
    assert_eq!(stack(&vm), vec![5]);
}

#[test]
fn test_begin_while_repeat() {
    let vm = forth(": t 0 10 begin dup 0> while swap 1+ swap 1- repeat drop ; t");
    assert_eq!(stack(&vm), vec![10]);
}

#[test]
fn test_while_loop_may_run_zero_times() {
    let vm = forth(": t 99 0 begin dup 0> while 1- repeat drop ; t");
    assert_eq!(stack(&vm), vec![99]);
}

// === Counted loops ===

#[test]
fn test_do_loop_sums_indices() {
    let vm = forth(": t 0 5 0 do i + loop ; t");
    assert_eq!(stack(&vm), vec![10]);
}

#[test]
fn test_do_loop_single_iteration() {
    let vm = forth(": t 0 1 0 do 1+ loop ; t");
    assert_eq!(stack(&vm), vec![1]);
}

#[test]
fn test_qdo_skips_empty_range() {
    assert_eq!(stack(&forth(": t 0 0 0 ?do 1+ loop ; t")), vec![0]);
    assert_eq!(stack(&forth(": t 0 5 0 ?do 1+ loop ; t")), vec![5]);
}

#[test]
fn test_nested_loops_and_j() {
    let vm = forth(": t 0 3 0 do 3 0 do j i * + loop loop ; t");
    // sum over j,i in 0..3 of j*i = (0+1+2)^2
    assert_eq!(stack(&vm), vec![9]);
}

#[test]
fn test_plus_loop_step() {
    let vm = forth(": t 0 10 0 do i + 2 +loop ; t");
    assert_eq!(stack(&vm), vec![0 + 2 + 4 + 6 + 8]);
}

#[test]
fn test_plus_loop_terminates_on_crossing() {
    // step does not divide the range; crossing the boundary must stop it
    let vm = forth(": t 0 10 0 do 1+ 3 +loop ; t");
    assert_eq!(stack(&vm), vec![4]);
}

#[test]
fn test_plus_loop_negative_step() {
    let vm = forth(": t 0 0 10 do 1+ -2 +loop ; t");
    assert_eq!(stack(&vm), vec![5]);
}

#[test]
fn test_unloop() {
    let vm = forth(": t 10 0 do i 5 = if i unloop exit then loop -1 ; t");
    assert_eq!(stack(&vm), vec![5]);
}

// === CASE ===

#[test]
fn test_case_selects_matching_arm() {
    let src = ": t case 1 of 100 endof 2 of 200 endof 999 swap endcase ;";
    assert_eq!(stack(&forth(&format!("{} 1 t", src))), vec![100]);
    assert_eq!(stack(&forth(&format!("{} 2 t", src))), vec![200]);
    assert_eq!(stack(&forth(&format!("{} 7 t", src))), vec![999]);
}

#[test]
fn test_case_default_sees_selector() {
    let vm = forth(": t case 1 of 0 endof dup endcase ; 42 t");
    assert_eq!(stack(&vm), vec![42]);
}

// === Defining words ===

#[test]
fn test_create_pushes_data_address() {
    let vm = forth("create buf 16 allot 77 buf ! buf @");
    assert_eq!(stack(&vm), vec![77]);
}

#[test]
fn test_create_does() {
    let vm = forth(
        ": array create cells allot does> swap cells + ; \
         10 array a \
         42 3 a ! \
         3 a @ 5 a @",
    );
    assert_eq!(stack(&vm), vec![42, 0]);
}

#[test]
fn test_does_children_have_distinct_bodies() {
    let vm = forth(
        ": box create , does> @ ; \
         11 box a 22 box b \
         a b a",
    );
    assert_eq!(stack(&vm), vec![11, 22, 11]);
}

#[test]
fn test_to_body_matches_create() {
    let vm = forth("create buf ' buf >body buf =");
    assert_eq!(stack(&vm), vec![-1]);
}

#[test]
fn test_compile_comma() {
    // mine appends dup to the definition being compiled
    let vm = forth(": mine ['] dup compile, ; immediate : t mine * ; 6 t");
    assert_eq!(stack(&vm), vec![36]);
}

// === Compile-only guards ===

#[test]
fn test_control_flow_outside_definition_fails() {
    let mut vm = Vm::new();
    outer::load_boot(&mut vm).expect("boot");
    let err = outer::interpret_source(&mut vm, "1 if 2 then").expect_err("should fail");
    assert!(matches!(err, VmError::Aborted(_)));
}

#[test]
fn test_semicolon_without_colon_fails() {
    let mut vm = Vm::new();
    outer::load_boot(&mut vm).expect("boot");
    let before = vm.here;
    let err = outer::interpret_source(&mut vm, ";").expect_err("should fail");
    assert!(matches!(err, VmError::Aborted(_)));
    // nothing may be compiled on the failure path
    assert_eq!(vm.here, before);
}
