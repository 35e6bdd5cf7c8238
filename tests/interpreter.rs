//! Integration coverage of the interpreter's fetch-decode-dispatch loop:
//! traps, the FFI bridge, the address whitelist, and the instruction
//! cache, all driven through assembled programs rather than hand-built
//! `Instruction` values.

mod common;

use common::assemble;
use terp_vm::asm::{OpSize, Operand};
use terp_vm::error::PanicReason;
use terp_vm::ffi::{CallingConvention, ForeignType, FunctionSignature};
use terp_vm::registers::IntReg;
use terp_vm::{Interpreter, StopReason};

const PROGRAM_START: u64 = 512;
const MEMORY_SIZE: u64 = 8192;

#[test]
fn a_registered_trap_handler_runs_and_can_mutate_registers() {
    fn double_i0(interp: &mut Interpreter) -> Result<(), terp_vm::RuntimeError> {
        let current = interp.registers().read(IntReg(0), OpSize::Qword)?;
        interp.registers_mut().write(IntReg(0), OpSize::Qword, current * 2)?;
        Ok(())
    }

    let program = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.mov(OpSize::Qword, Operand::int_reg(0), Operand::imm(OpSize::Qword, 21)).unwrap();
            b.trap(7).unwrap();
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.register_trap(7, double_i0);
    interp.load_program(program.entry, &program.image).unwrap();
    let stop = interp.run(100).unwrap();

    assert_eq!(stop, StopReason::Exited);
    assert_eq!(interp.registers().read(IntReg(0), OpSize::Qword).unwrap(), 42);
}

#[test]
fn an_unregistered_trap_index_panics_with_a_diagnostic_reason() {
    let program = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.trap(9).unwrap();
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.load_program(program.entry, &program.image).unwrap();
    let err = interp.run(100).unwrap_err();
    assert!(err.panic_reason().is_some());
}

#[test]
fn ffi_pops_its_declared_argument_count_and_pushes_a_return_value() {
    let program = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.push_value(OpSize::Qword, Operand::imm(OpSize::Qword, 1)).unwrap();
            b.push_value(OpSize::Qword, Operand::imm(OpSize::Qword, 2)).unwrap();
            b.ffi(Operand::imm(OpSize::Qword, 0)).unwrap();
            b.pop(OpSize::Qword, Operand::int_reg(0)).unwrap();
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    let sig = interp.register_signature(FunctionSignature {
        name: "add_two".into(),
        library: "libm".into(),
        convention: CallingConvention::CDefault,
        arguments: vec![ForeignType::I64, ForeignType::I64],
        return_type: ForeignType::I64,
    });
    assert_eq!(sig.0, 0);

    interp.load_program(program.entry, &program.image).unwrap();
    let stop = interp.run(100).unwrap();
    assert_eq!(stop, StopReason::Exited);
    // The bridge itself is a named collaborator (no real call happens
    // here); the interpreter's contract is just popping arguments and
    // pushing a placeholder return slot.
    assert_eq!(interp.registers().read(IntReg(0), OpSize::Qword).unwrap(), 0);
}

#[test]
fn calling_an_unregistered_signature_id_is_an_invalid_ffi_call() {
    let program = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.ffi(Operand::imm(OpSize::Qword, 999)).unwrap();
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.load_program(program.entry, &program.image).unwrap();
    let err = interp.run(100).unwrap_err();
    assert_eq!(err.panic_reason(), Some(&PanicReason::InvalidFfiCall));
}

#[test]
fn whitelisting_an_address_lets_memory_ops_reach_outside_the_heap() {
    let program = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.store(OpSize::Qword, Operand::int_reg(0), Operand::imm(OpSize::Qword, 0x99)).unwrap();
            b.load(OpSize::Qword, Operand::int_reg(1), Operand::int_reg(0)).unwrap();
            b.exit().unwrap();
        });
    });

    // Address 8 sits before the heap's base (the vector tables occupy
    // the first 160 bytes), so it would normally trap.
    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.registers_mut().write(IntReg(0), OpSize::Qword, 8).unwrap();
    interp.whitelist_address(8);
    interp.load_program(program.entry, &program.image).unwrap();
    let stop = interp.run(100).unwrap();

    assert_eq!(stop, StopReason::Exited);
    assert_eq!(interp.registers().read(IntReg(1), OpSize::Qword).unwrap(), 0x99);
}

#[test]
fn forgetting_a_whitelisted_address_makes_it_trap_again() {
    let program = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.load(OpSize::Qword, Operand::int_reg(1), Operand::int_reg(0)).unwrap();
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.registers_mut().write(IntReg(0), OpSize::Qword, 8).unwrap();
    interp.whitelist_address(8);
    interp.forget_address(8);
    interp.load_program(program.entry, &program.image).unwrap();
    let err = interp.run(100).unwrap_err();
    assert_eq!(err.panic_reason(), Some(&PanicReason::InvalidAddress));
}

#[test]
fn an_explicit_icache_reset_lets_a_program_observe_its_own_rewritten_code() {
    // Two back-to-back programs loaded at the same address: the second
    // must actually run, not the cached decode of the first.
    let first = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.mov(OpSize::Qword, Operand::int_reg(0), Operand::imm(OpSize::Qword, 1)).unwrap();
            b.exit().unwrap();
        });
    });
    let second = assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.mov(OpSize::Qword, Operand::int_reg(0), Operand::imm(OpSize::Qword, 2)).unwrap();
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.load_program(first.entry, &first.image).unwrap();
    interp.run(100).unwrap();
    assert_eq!(interp.registers().read(IntReg(0), OpSize::Qword).unwrap(), 1);

    interp.load_program(second.entry, &second.image).unwrap();
    interp.reset_icache();
    interp
        .registers_mut()
        .write_special(terp_vm::registers::SpecialReg::Pc, PROGRAM_START);
    interp.run(100).unwrap();
    assert_eq!(interp.registers().read(IntReg(0), OpSize::Qword).unwrap(), 2);
}
