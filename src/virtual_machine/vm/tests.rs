use super::*;
use crate::utils::test_utils::utils::{factorial, fibonacci, fibonacci_reference, spin_forever};
use crate::virtual_machine::vm::memory::{MEMORY_SIZE, PC, R1, R2, R3, STACK_BASE};

fn ins(op: Opcode, dest: i32, arg1: i32, arg2: i32) -> Instruction {
    Instruction::new(op, dest, arg1, arg2)
}

fn vm_with(insts: &[Instruction]) -> Vm {
    Vm::with_program(insts.iter().copied().collect())
}

fn run_vm(insts: &[Instruction]) -> Vm {
    let mut vm = vm_with(insts);
    vm.run().expect("vm run failed");
    vm
}

fn run_and_get(insts: &[Instruction], addr: i32) -> i32 {
    run_vm(insts).memory().get(addr).unwrap()
}

fn run_expect_err(insts: &[Instruction]) -> VMError {
    let mut vm = vm_with(insts);
    vm.run().expect_err("expected vm error")
}

/// Drives `run_slice` until the program stops, returning the final result and
/// the number of slices used.
fn run_sliced(vm: &mut Vm, limit: u32) -> (StepResult, usize) {
    let mut slices = 0;
    loop {
        slices += 1;
        match vm.run_slice(limit) {
            StepResult::BudgetExhausted => continue,
            other => return (other, slices),
        }
    }
}

// ==================== Arithmetic ====================

#[test]
fn add_and_addi() {
    let prog = [
        ins(Opcode::Movi, R1, 40, 0),
        ins(Opcode::Movi, R2, 2, 0),
        ins(Opcode::Add, R0, R1, R2),
        ins(Opcode::Addi, R3, R0, 8),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), 42);
    assert_eq!(vm.memory().get(R3).unwrap(), 50);
}

#[test]
fn sub_and_subi() {
    let prog = [
        ins(Opcode::Movi, R1, 10, 0),
        ins(Opcode::Movi, R2, 3, 0),
        ins(Opcode::Sub, R0, R1, R2),
        ins(Opcode::Subi, R3, R1, 20),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), 7);
    assert_eq!(vm.memory().get(R3).unwrap(), -10);
}

#[test]
fn mul_and_muli() {
    let prog = [
        ins(Opcode::Movi, R1, 6, 0),
        ins(Opcode::Movi, R2, 7, 0),
        ins(Opcode::Mul, R0, R1, R2),
        ins(Opcode::Muli, R3, R1, -2),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), 42);
    assert_eq!(vm.memory().get(R3).unwrap(), -12);
}

#[test]
fn div_and_divi_truncate() {
    let prog = [
        ins(Opcode::Movi, R1, -7, 0),
        ins(Opcode::Movi, R2, 2, 0),
        ins(Opcode::Div, R0, R1, R2),
        ins(Opcode::Divi, R3, R1, 7),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), -3);
    assert_eq!(vm.memory().get(R3).unwrap(), -1);
}

#[test]
fn arithmetic_wraps() {
    let prog = [
        ins(Opcode::Movi, R1, i32::MAX, 0),
        ins(Opcode::Addi, R0, R1, 1),
        ins(Opcode::Movi, R2, i32::MIN, 0),
        ins(Opcode::Divi, R3, R2, -1),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), i32::MIN);
    assert_eq!(vm.memory().get(R3).unwrap(), i32::MIN);
}

#[test]
fn mov_copies_and_movi_loads() {
    let prog = [ins(Opcode::Movi, 100, 69420, 0), ins(Opcode::Mov, R0, 100, 0)];
    assert_eq!(run_and_get(&prog, R0), 69420);
}

// ==================== Stack ====================

#[test]
fn push_pop_round_trip() {
    let prog = [
        ins(Opcode::Movi, R1, 11, 0),
        ins(Opcode::Push, R1, 0, 0),
        ins(Opcode::Pushi, 22, 0, 0),
        ins(Opcode::Pop, R2, 0, 0),
        ins(Opcode::Pop, R3, 0, 0),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.memory().get(R2).unwrap(), 22);
    assert_eq!(vm.memory().get(R3).unwrap(), 11);
    assert_eq!(vm.memory().get(SP).unwrap(), STACK_BASE);
    assert_eq!(vm.memory().get(STACK_BASE).unwrap(), 11);
}

#[test]
fn pop_at_zero_fails() {
    let prog = [ins(Opcode::Movi, SP, 0, 0), ins(Opcode::Pop, R1, 0, 0)];
    assert_eq!(
        run_expect_err(&prog),
        VMError::MemoryOverflow { address: 0 }
    );
}

#[test]
fn push_past_memory_fails_without_write() {
    let prog = [
        ins(Opcode::Movi, SP, MEMORY_SIZE as i32, 0),
        ins(Opcode::Pushi, 5, 0, 0),
    ];
    let mut vm = vm_with(&prog);
    assert_eq!(
        vm.run(),
        Err(VMError::MemoryOverflow {
            address: MEMORY_SIZE as i32
        })
    );
    assert_eq!(vm.memory().get(SP).unwrap(), MEMORY_SIZE as i32);
}

// ==================== Control Flow ====================

#[test]
fn factorial_of_five() {
    let vm = run_vm(&factorial(5));
    assert_eq!(vm.result(), 120);
    assert_eq!(vm.memory().pc(), 7);
}

#[test]
fn fibonacci_matches_reference() {
    for n in [0, 1, 2, 10, 46, 99_999] {
        let vm = run_vm(&fibonacci(n));
        assert_eq!(vm.result(), fibonacci_reference(n), "fib({n})");
    }
}

#[test]
fn unconditional_branch_skips() {
    let prog = [
        ins(Opcode::B, 2, 0, 0),
        ins(Opcode::Movi, R0, 1, 0),
        ins(Opcode::Movi, R1, 2, 0),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), 0);
    assert_eq!(vm.memory().get(R1).unwrap(), 2);
}

#[test]
fn conditional_branches() {
    // Each case: set R1 = 5, R2 = 7, branch over `MOVI R0 1` to `HALT`.
    let cases = [
        (ins(Opcode::Beq, 4, R1, R2), false),
        (ins(Opcode::Beq, 4, R1, R1), true),
        (ins(Opcode::Beqi, 4, R1, 5), true),
        (ins(Opcode::Bne, 4, R1, R2), true),
        (ins(Opcode::Bnei, 4, R1, 5), false),
        (ins(Opcode::Bge, 4, R2, R1), true),
        (ins(Opcode::Bge, 4, R1, R2), false),
        (ins(Opcode::Bgei, 4, R1, 5), true),
        (ins(Opcode::Bgei, 4, R1, 6), false),
        (ins(Opcode::Blei, 4, 5, R1), true),
        (ins(Opcode::Blei, 4, 6, R1), false),
    ];

    for (branch, taken) in cases {
        let prog = [
            ins(Opcode::Movi, R1, 5, 0),
            ins(Opcode::Movi, R2, 7, 0),
            branch,
            ins(Opcode::Movi, R0, 1, 0),
            ins(Opcode::Halt, 0, 0, 0),
        ];
        let expected = if taken { 0 } else { 1 };
        assert_eq!(run_and_get(&prog, R0), expected, "{branch}");
    }
}

#[test]
fn branch_target_out_of_program_fails() {
    let prog = [ins(Opcode::B, 5, 0, 0), ins(Opcode::Halt, 0, 0, 0)];
    assert_eq!(run_expect_err(&prog), VMError::MemoryOverflow { address: 5 });

    let prog = [ins(Opcode::Beqi, -1, R0, 1)];
    assert_eq!(run_expect_err(&prog), VMError::MemoryOverflow { address: -1 });
}

#[test]
fn ret_and_reti_write_r0() {
    let prog = [ins(Opcode::Movi, R3, 9, 0), ins(Opcode::Ret, R3, 0, 0)];
    assert_eq!(run_and_get(&prog, R0), 9);

    let prog = [ins(Opcode::Reti, 77, 0, 0), ins(Opcode::Movi, R1, 1, 0)];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), 77);
    assert_eq!(vm.memory().get(R1).unwrap(), 1);
}

#[test]
fn halt_stops_execution() {
    let prog = [
        ins(Opcode::Halt, 0, 0, 0),
        ins(Opcode::Movi, R0, 1, 0),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), 0);
    assert_eq!(vm.memory().pc(), 2);
}

#[test]
fn writing_pc_jumps() {
    let prog = [
        ins(Opcode::Movi, PC, 2, 0),
        ins(Opcode::Movi, R0, 1, 0),
        ins(Opcode::Movi, R1, 1, 0),
    ];
    let vm = run_vm(&prog);
    assert_eq!(vm.result(), 0);
    assert_eq!(vm.memory().get(R1).unwrap(), 1);
}

#[test]
fn negative_pc_is_reported() {
    let prog = [ins(Opcode::Movi, PC, -3, 0)];
    assert_eq!(
        run_expect_err(&prog),
        VMError::InvalidProgramCounter { pc: -3 }
    );
}

#[test]
fn empty_program_finishes_immediately() {
    let mut vm = Vm::new();
    assert_eq!(vm.run(), Ok(()));
    assert_eq!(vm.run_slice(8), StepResult::Finished);
}

// ==================== Error Cases ====================

#[test]
fn division_by_zero() {
    let prog = [ins(Opcode::Div, R0, R1, R2)];
    assert_eq!(run_expect_err(&prog), VMError::DivisionByZero);

    let prog = [ins(Opcode::Divi, R0, R1, 0)];
    assert_eq!(run_expect_err(&prog), VMError::DivisionByZero);
}

#[test]
fn unknown_opcode_is_malformed() {
    let prog = [Instruction {
        code: 42,
        dest: 0,
        arg1: 0,
        arg2: 0,
    }];
    assert_eq!(
        run_expect_err(&prog),
        VMError::MalformedInstruction { opcode: 42 }
    );
}

#[test]
fn out_of_range_operands_do_not_mutate() {
    let cases = [
        ins(Opcode::Add, R0, 1024, R1),
        ins(Opcode::Addi, 5000, R1, 1),
        ins(Opcode::Movi, -1, 3, 0),
        ins(Opcode::Mov, R0, i32::MAX, 0),
        ins(Opcode::Div, 2048, R1, R1),
        ins(Opcode::Push, 1024, 0, 0),
        ins(Opcode::Pop, -5, 0, 0),
        ins(Opcode::Ret, 1024, 0, 0),
        ins(Opcode::Beq, 0, 1024, R0),
    ];

    for inst in cases {
        let mut vm = vm_with(&[inst]);
        vm.memory_mut().set(R1, 3).unwrap();
        let before = vm.memory().clone();

        let err = vm.run().expect_err("expected overflow");
        assert!(matches!(err, VMError::MemoryOverflow { .. }), "{inst}: {err}");

        let mut after = vm.memory().clone();
        after.set_pc(before.pc());
        assert_eq!(after, before, "{inst} mutated memory");
    }
}

#[test]
fn error_leaves_pc_past_faulting_instruction() {
    let prog = [
        ins(Opcode::Movi, R0, 1, 0),
        ins(Opcode::Divi, R0, R0, 0),
        ins(Opcode::Movi, R0, 2, 0),
    ];
    let mut vm = vm_with(&prog);
    assert!(vm.run().is_err());
    assert_eq!(vm.memory().pc(), 2);
    assert_eq!(vm.result(), 1);
}

// ==================== Bounded Execution ====================

#[test]
fn slices_resume_where_they_stopped() {
    let mut vm = vm_with(&factorial(5));
    assert_eq!(vm.run_slice(3), StepResult::BudgetExhausted);
    assert_eq!(vm.memory().pc(), 3);
    let (result, _) = run_sliced(&mut vm, 3);
    assert_eq!(result, StepResult::Finished);
    assert_eq!(vm.result(), 120);
}

#[test]
fn sliced_run_matches_unbounded_run() {
    for limit in [1, 2, 3, 7, 64, 1000] {
        let reference = run_vm(&fibonacci(500));

        let mut sliced = vm_with(&fibonacci(500));
        let (result, slices) = run_sliced(&mut sliced, limit);
        assert_eq!(result, StepResult::Finished);
        assert_eq!(sliced.memory(), reference.memory(), "limit {limit}");
        if limit == 1 {
            assert!(slices > 1000);
        }
    }
}

#[test]
fn finishing_on_last_budget_step_reports_finished() {
    let prog = [ins(Opcode::Movi, R0, 1, 0), ins(Opcode::Movi, R1, 1, 0)];
    let mut vm = vm_with(&prog);
    assert_eq!(vm.run_slice(2), StepResult::Finished);
}

#[test]
fn slice_surfaces_errors() {
    let prog = [ins(Opcode::Movi, R0, 1, 0), ins(Opcode::Divi, R0, R0, 0)];
    let mut vm = vm_with(&prog);
    assert_eq!(vm.run_slice(1), StepResult::BudgetExhausted);
    assert_eq!(
        vm.run_slice(1),
        StepResult::Errored(VMError::DivisionByZero)
    );
}

#[test]
fn endless_loop_never_finishes_a_slice() {
    let mut vm = vm_with(&spin_forever());
    for _ in 0..10 {
        assert_eq!(vm.run_slice(16), StepResult::BudgetExhausted);
    }
    assert_eq!(vm.stats().slices, 10);
    assert_eq!(vm.stats().instructions, 160);
}

#[test]
fn shrinking_program_mid_execution_finishes() {
    let mut vm = vm_with(&spin_forever());
    assert_eq!(vm.run_slice(4), StepResult::BudgetExhausted);
    vm.program_mut().clear();
    assert_eq!(vm.run_slice(4), StepResult::Finished);
}

#[test]
fn reset_restores_registers_and_stats() {
    let mut vm = run_vm(&factorial(5));
    vm.memory_mut().set(200, 1).unwrap();
    vm.reset_registers();
    assert_eq!(vm.result(), 0);
    assert_eq!(vm.memory().pc(), 0);
    assert_eq!(vm.memory().get(SP).unwrap(), STACK_BASE);
    assert_eq!(vm.memory().get(200).unwrap(), 1);
    assert_eq!(vm.stats(), ExecStats::default());
}

#[test]
fn dump_reads_words() {
    let vm = run_vm(&factorial(5));
    let words = vm.dump(0, 5);
    assert_eq!(words, &[120, 1, 0, 0, 7]);
}
