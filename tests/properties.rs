//! Universal properties of the encoder, heap, and interpreter, checked
//! against many generated inputs rather than a handful of fixed cases.

mod common;

use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

use terp_vm::asm::{Instruction, OpSize, Opcode, Operand, ALIGNMENT};
use terp_vm::heap::Heap;
use terp_vm::interpreter::ConditionCode;
use terp_vm::registers::{Flag, IntReg, RegisterFile};
use terp_vm::Interpreter;

const PROGRAM_START: u64 = 512;
const MEMORY_SIZE: u64 = 8192;

/// `decode(encode(x)) == x`, and the encoded length is always a multiple
/// of the instruction alignment.
#[quickcheck]
fn move_instructions_round_trip_through_encode_and_decode(reg: u8, value: u64) -> bool {
    let reg = reg % 64;
    let ins = Instruction::new(
        Opcode::Move,
        OpSize::Qword,
        &[Operand::int_reg(reg), Operand::imm(OpSize::Qword, value)],
    )
    .unwrap();
    let bytes = ins.encode().unwrap();
    if bytes.len() % ALIGNMENT != 0 {
        return false;
    }
    let (decoded, consumed) = Instruction::decode(&bytes, 0).unwrap();
    consumed == bytes.len() && decoded == ins
}

/// No matter the sequence of allocations and frees, the allocator never
/// hands out more total live bytes than the heap's declared capacity.
#[quickcheck]
fn heap_live_bytes_never_exceed_capacity(requests: Vec<(u16, bool)>) -> TestResult {
    if requests.len() > 64 {
        return TestResult::discard();
    }
    let capacity = 4096u64;
    let mut heap = Heap::new();
    heap.initialize(0, capacity);
    let mut live: Vec<(u64, u64)> = Vec::new();

    for (raw_size, should_free) in requests {
        if should_free {
            if let Some((addr, _)) = live.pop() {
                heap.free(addr);
            }
            continue;
        }
        let size = (raw_size as u64 % 512) + 1;
        if let Some(addr) = heap.alloc(size) {
            let actual = heap.size_of(addr).expect("just-allocated address must report a size");
            live.push((addr, actual));
        }
    }

    let total: u64 = live.iter().map(|(_, size)| size).sum();
    TestResult::from_bool(total <= capacity)
}

/// Every `ConditionCode` matches its defining boolean formula over the
/// four arithmetic flags, for every combination of flag settings.
#[quickcheck]
fn branch_conditions_match_their_defining_formula(z: bool, c: bool, v: bool, n: bool) -> bool {
    let mut regs = RegisterFile::default();
    regs.set_flag(Flag::Zero, z);
    regs.set_flag(Flag::Carry, c);
    regs.set_flag(Flag::Overflow, v);
    regs.set_flag(Flag::Negative, n);

    ConditionCode::Zero.holds(&regs) == z
        && ConditionCode::NotZero.holds(&regs) == !z
        && ConditionCode::Sign.holds(&regs) == n
        && ConditionCode::NotSign.holds(&regs) == !n
        && ConditionCode::Overflow.holds(&regs) == v
        && ConditionCode::NotOverflow.holds(&regs) == !v
        && ConditionCode::CarrySet.holds(&regs) == c
        && ConditionCode::CarryClear.holds(&regs) == !c
        && ConditionCode::Above.holds(&regs) == (!c && !z)
        && ConditionCode::AboveOrEqual.holds(&regs) == !c
        && ConditionCode::Below.holds(&regs) == c
        && ConditionCode::BelowOrEqual.holds(&regs) == (c || z)
        && ConditionCode::Greater.holds(&regs) == (!z && n == v)
        && ConditionCode::GreaterOrEqual.holds(&regs) == (n == v)
        && ConditionCode::Less.holds(&regs) == (n != v)
        && ConditionCode::LessOrEqual.holds(&regs) == (z || n != v)
}

/// `moves.b` sign-extends a byte to a full register; `movez.b` zero-
/// extends the same byte.
#[quickcheck]
fn moves_and_movez_extend_a_byte_as_their_name_promises(byte: u8) -> bool {
    let program = common::assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            b.mov(OpSize::Byte, Operand::int_reg(0), Operand::imm(OpSize::Byte, byte as u64)).unwrap();
            b.moves(OpSize::Byte, Operand::int_reg(1), Operand::int_reg(0)).unwrap();
            b.movez(OpSize::Byte, Operand::int_reg(2), Operand::int_reg(0)).unwrap();
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.load_program(program.entry, &program.image).unwrap();
    interp.run(100).unwrap();

    let signed = interp.registers().read(IntReg(1), OpSize::Qword).unwrap();
    let zeroed = interp.registers().read(IntReg(2), OpSize::Qword).unwrap();

    signed == ((byte as i8) as i64 as u64) && zeroed == (byte as u64)
}

/// Pushing N values and popping N values leaves the stack pointer
/// exactly where it started, decreasing by `8 * N` at the deepest point.
#[quickcheck]
fn push_then_pop_restores_the_stack_pointer(values: Vec<u64>) -> TestResult {
    if values.len() > 16 {
        return TestResult::discard();
    }
    let count = values.len();

    let program = common::assemble(PROGRAM_START, |_asm, block| {
        common::build_with(block, |b| {
            for &v in &values {
                b.mov(OpSize::Qword, Operand::int_reg(0), Operand::imm(OpSize::Qword, v)).unwrap();
                b.push_value(OpSize::Qword, Operand::int_reg(0)).unwrap();
            }
            for _ in 0..count {
                b.pop(OpSize::Qword, Operand::int_reg(1)).unwrap();
            }
            b.exit().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    let sp_before = interp.registers().read_special(terp_vm::registers::SpecialReg::Sp);
    interp.load_program(program.entry, &program.image).unwrap();
    interp.run(1_000).unwrap();
    let sp_after = interp.registers().read_special(terp_vm::registers::SpecialReg::Sp);

    TestResult::from_bool(sp_after == sp_before)
}

/// `jsr target; ...; rts` always returns to the instruction immediately
/// following the `jsr`, regardless of how much code precedes it.
#[quickcheck]
fn jsr_always_returns_to_the_instruction_after_it(padding_nops: u8) -> bool {
    let padding_nops = padding_nops % 8;
    let program = common::assemble(PROGRAM_START, |asm, block| {
        let sub = asm.labels_mut().declare(terp_vm::assembler::label::NamedRefKind::Label, "sub");
        common::build_with(block, |b| {
            for _ in 0..padding_nops {
                b.nop().unwrap();
            }
            b.jsr(sub).unwrap();
            b.mov(OpSize::Qword, Operand::int_reg(0), Operand::imm(OpSize::Qword, 0x99)).unwrap();
            b.exit().unwrap();
        });
        block.push(terp_vm::assembler::block::BlockEntry::Label(sub));
        common::build_with(block, |b| {
            b.rts().unwrap();
        });
    });

    let mut interp = Interpreter::new(MEMORY_SIZE, PROGRAM_START);
    interp.load_program(program.entry, &program.image).unwrap();
    interp.run(1_000).unwrap();

    // If `rts` had returned anywhere else, the `mov #$99` right after the
    // `jsr` would never have run.
    interp.registers().read(IntReg(0), OpSize::Qword).unwrap() == 0x99
}
