//! Control flow: conditional/unconditional branches, calls, interrupts,
//! traps, and FFI dispatch (spec §4.5, §9 — the condition-code table is
//! the spec's adopted resolution of the ambiguous x86-style flag
//! semantics named in the open questions).

use crate::asm::{Instruction, OpSize, Opcode};
use crate::consts::{INTERRUPT_VECTOR_TABLE_LEN, WORD_SIZE};
use crate::error::{PanicReason, RuntimeError};
use crate::registers::{Flag, RegisterFile};

use super::Interpreter;

/// A branch/setcc condition, evaluated against the flags register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionCode {
    Zero,
    NotZero,
    Sign,
    NotSign,
    Overflow,
    NotOverflow,
    CarrySet,
    CarryClear,
    Above,
    AboveOrEqual,
    Below,
    BelowOrEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

impl ConditionCode {
    /// The condition a branch or setcc opcode tests, if it's conditional.
    pub fn for_opcode(opcode: Opcode) -> Option<Self> {
        use Opcode::*;
        Some(match opcode {
            Bz | Setz => ConditionCode::Zero,
            Bnz | Setnz => ConditionCode::NotZero,
            Bs | Sets => ConditionCode::Sign,
            Setns => ConditionCode::NotSign,
            Bo | Seto => ConditionCode::Overflow,
            Setno => ConditionCode::NotOverflow,
            Bcs | Bae | Setc => ConditionCode::CarrySet,
            Bcc | Setnc => ConditionCode::CarryClear,
            Ba | Seta => ConditionCode::Above,
            Setae => ConditionCode::AboveOrEqual,
            Bb | Setb => ConditionCode::Below,
            Bbe | Setbe => ConditionCode::BelowOrEqual,
            Bg | Setg => ConditionCode::Greater,
            Bge | Setge => ConditionCode::GreaterOrEqual,
            Bl | Setl => ConditionCode::Less,
            Ble | Setle => ConditionCode::LessOrEqual,
            Bne | Setnae => ConditionCode::NotZero,
            Beq | Setnbe => ConditionCode::Zero,
            Setna => ConditionCode::BelowOrEqual,
            Setnb => ConditionCode::AboveOrEqual,
            Setnge => ConditionCode::Less,
            Setnl => ConditionCode::GreaterOrEqual,
            Setnle => ConditionCode::Greater,
            Setng => ConditionCode::LessOrEqual,
            _ => return None,
        })
    }

    /// Evaluate this condition against the current flags.
    pub fn holds(self, regs: &RegisterFile) -> bool {
        let z = regs.flag(Flag::Zero);
        let c = regs.flag(Flag::Carry);
        let v = regs.flag(Flag::Overflow);
        let n = regs.flag(Flag::Negative);
        match self {
            ConditionCode::Zero => z,
            ConditionCode::NotZero => !z,
            ConditionCode::Sign => n,
            ConditionCode::NotSign => !n,
            ConditionCode::Overflow => v,
            ConditionCode::NotOverflow => !v,
            ConditionCode::CarrySet => c,
            ConditionCode::CarryClear => !c,
            ConditionCode::Above => !c && !z,
            ConditionCode::AboveOrEqual => !c,
            ConditionCode::Below => c,
            ConditionCode::BelowOrEqual => c || z,
            ConditionCode::Greater => !z && n == v,
            ConditionCode::GreaterOrEqual => n == v,
            ConditionCode::Less => n != v,
            ConditionCode::LessOrEqual => z || n != v,
        }
    }
}

impl Interpreter {
    fn branch_target(&self, instruction: &Instruction) -> Result<u64, RuntimeError> {
        let target = instruction.operand(instruction.operand_count() - 1).ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        self.read_operand(target, OpSize::Qword)
    }

    pub(crate) fn exec_branch(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let cc = ConditionCode::for_opcode(instruction.opcode()).ok_or(RuntimeError::Recoverable(PanicReason::InvalidOpcode))?;
        if cc.holds(&self.regs) {
            let target = self.branch_target(instruction)?;
            self.set_pc(target);
        }
        Ok(())
    }

    pub(crate) fn exec_tbz(&mut self, instruction: &Instruction, branch_if_nonzero: bool) -> Result<(), RuntimeError> {
        let value_op = instruction.operand(0).ok_or(RuntimeError::Recoverable(PanicReason::InvalidRegister))?;
        let mask_op = instruction.operand(1).ok_or(RuntimeError::Recoverable(PanicReason::InvalidRegister))?;
        let value = self.read_operand(value_op, instruction.size())?;
        let mask = self.read_operand(mask_op, instruction.size())?;
        let result_nonzero = value & mask != 0;
        if result_nonzero == branch_if_nonzero {
            let target = self.branch_target(instruction)?;
            self.set_pc(target);
        }
        Ok(())
    }

    pub(crate) fn exec_jmp(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let target = self.branch_target(instruction)?;
        self.set_pc(target);
        Ok(())
    }

    pub(crate) fn exec_jsr(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let target = self.branch_target(instruction)?;
        let return_address = self.regs.read_special(crate::registers::SpecialReg::Pc);
        self.push_stack_value(return_address)?;
        self.set_pc(target);
        Ok(())
    }

    pub(crate) fn exec_rts(&mut self) -> Result<(), RuntimeError> {
        let return_address = self.pop_stack_value()?;
        self.set_pc(return_address);
        Ok(())
    }

    pub(crate) fn exec_swi(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let vector_op = instruction.operand(0).ok_or(RuntimeError::Recoverable(PanicReason::InvalidInterruptVector))?;
        let vector = self.read_operand(vector_op, OpSize::Byte)? as usize;
        if vector >= INTERRUPT_VECTOR_TABLE_LEN {
            return Err(RuntimeError::Recoverable(PanicReason::InvalidInterruptVector));
        }
        let entry_offset = vector * WORD_SIZE;
        let bytes = self
            .memory
            .get(entry_offset..entry_offset + WORD_SIZE)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidInterruptVector))?;
        let handler_address = u64::from_le_bytes(bytes.try_into().unwrap());

        let return_address = self.regs.read_special(crate::registers::SpecialReg::Pc);
        self.push_stack_value(return_address)?;
        self.set_pc(handler_address);
        Ok(())
    }

    pub(crate) fn exec_trap(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let index_op = instruction.operand(0).ok_or(RuntimeError::Recoverable(PanicReason::InvalidFfiCall))?;
        let index = self.read_operand(index_op, OpSize::Byte)? as u8;
        let handler = *self.traps_table().get(&index).ok_or(RuntimeError::Recoverable(PanicReason::InvalidFfiCall))?;
        handler(self)
    }

    /// Marshal a foreign call: pop one VM-stack value per declared
    /// argument (in signature order), then push a placeholder return value
    /// unless the signature is void. The native call itself is the FFI
    /// bridge's job (spec §4.5, §6) — this crate only validates the
    /// signature id and keeps the VM stack balanced the way a real call
    /// would.
    pub(crate) fn exec_ffi(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let id_op = instruction.operand(0).ok_or(RuntimeError::Recoverable(PanicReason::InvalidFfiCall))?;
        let raw_id = self.read_operand(id_op, OpSize::Qword)? as u32;
        let (arg_count, return_type) = {
            let signature = self.signatures.resolve(crate::ffi::SignatureId(raw_id))?;
            (signature.arguments.len(), signature.return_type)
        };

        for _ in 0..arg_count {
            self.pop_stack_value()?;
        }
        if !matches!(return_type, crate::ffi::ForeignType::Void) {
            self.push_stack_value(0)?;
        }
        Ok(())
    }

    fn traps_table(&self) -> &std::collections::HashMap<u8, super::TrapHandler> {
        &self.traps
    }

    pub(crate) fn push_stack_value(&mut self, value: u64) -> Result<(), RuntimeError> {
        let sp = self.sp();
        let new_sp = sp
            .checked_sub(WORD_SIZE as u64)
            .ok_or(RuntimeError::Recoverable(PanicReason::MemoryOverflow))?;
        let slice = self
            .memory
            .get_mut(new_sp as usize..new_sp as usize + WORD_SIZE)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        slice.copy_from_slice(&value.to_le_bytes());
        self.set_sp(new_sp);
        Ok(())
    }

    pub(crate) fn pop_stack_value(&mut self) -> Result<u64, RuntimeError> {
        let sp = self.sp();
        let slice = self
            .memory
            .get(sp as usize..sp as usize + WORD_SIZE)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        let value = u64::from_le_bytes(slice.try_into().unwrap());
        self.set_sp(sp + WORD_SIZE as u64);
        Ok(value)
    }
}
