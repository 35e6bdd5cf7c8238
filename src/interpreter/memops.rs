//! Memory-touching opcodes (spec §4.5): the heap allocator surface
//! (`alloc, free, size`), effective-address load/store/copy/fill,
//! register↔float `convert`, and the VM-stack opcodes (`push, pushm, pop,
//! popm, dup, swap, move`).
//!
//! Grounded on the effective-address whitelist rule spec §4.5 names for
//! native pointers an `ffi` call hands back to VM code: any address
//! outside `[heap_base, heap_base+heap_size)` traps unless it was
//! explicitly whitelisted via [`Interpreter::whitelist_address`].

use crate::asm::{Instruction, Modifier, OpSize, Operand, RegisterBank};
use crate::error::{PanicReason, RuntimeError};
use crate::registers::{FloatReg, IntReg};

use super::Interpreter;

fn operand_at<'a>(instruction: &'a Instruction, index: usize) -> Result<&'a Operand, RuntimeError> {
    instruction
        .operand(index)
        .ok_or(RuntimeError::Recoverable(PanicReason::InvalidRegister))
}

fn width_of(size: OpSize) -> usize {
    size.bytes().max(1)
}

impl Interpreter {
    /// Resolve an address operand to a concrete effective address,
    /// honoring pre/post-increment modifiers on a register operand. The
    /// register is stepped by `step` bytes — typically the access width.
    fn effective_address(&mut self, operand: &Operand, step: u64) -> Result<u64, RuntimeError> {
        match operand {
            Operand::Register { bank: RegisterBank::Integer, index, modifier } => {
                let reg = IntReg(*index);
                let current = self.regs.read(reg, OpSize::Qword)?;
                match modifier {
                    Modifier::Prefix => {
                        let next = current.wrapping_add(step);
                        self.regs.write(reg, OpSize::Qword, next)?;
                        Ok(next)
                    }
                    Modifier::Postfix => {
                        let next = current.wrapping_add(step);
                        self.regs.write(reg, OpSize::Qword, next)?;
                        Ok(current)
                    }
                    Modifier::None => Ok(current),
                }
            }
            Operand::ImmInt { value, .. } => Ok(*value),
            _ => Err(RuntimeError::Recoverable(PanicReason::InvalidAddress)),
        }
    }

    /// Validate that `[addr, addr+len)` is safe for a memory-touching
    /// opcode to access: either explicitly whitelisted, or fully contained
    /// in `[heap_base, heap_base+heap_size]` (spec §4.5).
    fn check_address(&self, addr: u64, len: u64) -> Result<(), RuntimeError> {
        if self.whitelist.contains(&addr) {
            return Ok(());
        }
        let base = self.heap.base();
        let end = base + self.heap.capacity();
        let addr_end = addr
            .checked_add(len)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        if addr < base || addr_end > end {
            return Err(RuntimeError::Recoverable(PanicReason::InvalidAddress));
        }
        Ok(())
    }

    fn read_memory(&self, addr: u64, width: usize) -> Result<u64, RuntimeError> {
        let slice = self
            .memory
            .get(addr as usize..addr as usize + width)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(slice);
        Ok(u64::from_le_bytes(buf))
    }

    fn write_memory(&mut self, addr: u64, width: usize, value: u64) -> Result<(), RuntimeError> {
        let slice = self
            .memory
            .get_mut(addr as usize..addr as usize + width)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        slice.copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    pub(crate) fn exec_alloc(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let dest = operand_at(instruction, 0)?;
        let size_op = operand_at(instruction, 1)?;
        let requested = self.read_operand(size_op, OpSize::Qword)?;
        let addr = self
            .heap
            .alloc(requested)
            .ok_or(RuntimeError::Recoverable(PanicReason::OutOfMemory))?;
        self.write_operand(dest, OpSize::Qword, addr)
    }

    pub(crate) fn exec_free(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let addr_op = operand_at(instruction, 0)?;
        let addr = self.read_operand(addr_op, OpSize::Qword)?;
        self.heap.free(addr);
        Ok(())
    }

    pub(crate) fn exec_size(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let dest = operand_at(instruction, 0)?;
        let addr_op = operand_at(instruction, 1)?;
        let addr = self.read_operand(addr_op, OpSize::Qword)?;
        let size = self.heap.size_of(addr).unwrap_or(0);
        self.write_operand(dest, OpSize::Qword, size)
    }

    pub(crate) fn exec_load(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let size = instruction.size();
        let width = width_of(size);
        let dest = *operand_at(instruction, 0)?;
        let addr_op = *operand_at(instruction, 1)?;
        let addr = self.effective_address(&addr_op, width as u64)?;
        self.check_address(addr, width as u64)?;
        let value = self.read_memory(addr, width)?;
        self.write_operand(&dest, size, value)
    }

    pub(crate) fn exec_store(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let size = instruction.size();
        let width = width_of(size);
        let addr_op = *operand_at(instruction, 0)?;
        let src = *operand_at(instruction, 1)?;
        let addr = self.effective_address(&addr_op, width as u64)?;
        self.check_address(addr, width as u64)?;
        let value = self.read_operand(&src, size)?;
        self.write_memory(addr, width, value)
    }

    pub(crate) fn exec_copy(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let dest_op = *operand_at(instruction, 0)?;
        let src_op = *operand_at(instruction, 1)?;
        let len_op = operand_at(instruction, 2)?;
        let len = self.read_operand(len_op, OpSize::Qword)? as usize;

        let dest_addr = self.effective_address(&dest_op, len as u64)?;
        let src_addr = self.effective_address(&src_op, len as u64)?;
        self.check_address(dest_addr, len as u64)?;
        self.check_address(src_addr, len as u64)?;

        let src_bytes = self
            .memory
            .get(src_addr as usize..src_addr as usize + len)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?
            .to_vec();
        let dest_slice = self
            .memory
            .get_mut(dest_addr as usize..dest_addr as usize + len)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        dest_slice.copy_from_slice(&src_bytes);
        Ok(())
    }

    pub(crate) fn exec_fill(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let addr_op = *operand_at(instruction, 0)?;
        let value_op = operand_at(instruction, 1)?;
        let len_op = operand_at(instruction, 2)?;
        let value = self.read_operand(value_op, OpSize::Byte)? as u8;
        let len = self.read_operand(len_op, OpSize::Qword)? as usize;

        let addr = self.effective_address(&addr_op, len as u64)?;
        self.check_address(addr, len as u64)?;
        let slice = self
            .memory
            .get_mut(addr as usize..addr as usize + len)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidAddress))?;
        slice.fill(value);
        Ok(())
    }

    /// `convert dest, src`: an explicit int↔float cast (not a bit
    /// reinterpretation) at the instruction's declared size, which must be
    /// dword (`f32`) or qword (`f64`).
    pub(crate) fn exec_convert(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let size = instruction.size();
        if !size.is_valid_float_size() {
            return Err(RuntimeError::Recoverable(PanicReason::InvalidFloatSize));
        }
        let dest = operand_at(instruction, 0)?;
        let src = operand_at(instruction, 1)?;

        let dest_is_float = matches!(dest, Operand::Register { bank: RegisterBank::Float, .. });
        let src_is_float = matches!(src, Operand::Register { bank: RegisterBank::Float, .. })
            || matches!(src, Operand::ImmFloat { .. });

        match (src_is_float, dest_is_float) {
            (false, true) => {
                let raw = self.read_operand(src, OpSize::Qword)?;
                let signed = raw as i64;
                let bits = if size == OpSize::Dword {
                    (signed as f32).to_bits() as u64
                } else {
                    (signed as f64).to_bits()
                };
                self.write_operand(dest, size, bits)
            }
            (true, false) => {
                let bits = self.read_operand(src, size)?;
                let value = if size == OpSize::Dword {
                    f32::from_bits(bits as u32) as f64
                } else {
                    f64::from_bits(bits)
                };
                self.write_operand(dest, OpSize::Qword, value as i64 as u64)
            }
            _ => {
                let value = self.read_operand(src, size)?;
                self.write_operand(dest, size, value)
            }
        }
    }

    pub(crate) fn exec_move(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let size = instruction.size();
        let dest = operand_at(instruction, 0)?;
        let src = operand_at(instruction, 1)?;
        let value = self.read_operand(src, size)?;
        self.write_operand(dest, size, value)
    }

    pub(crate) fn exec_push(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let size = instruction.size();
        let src = operand_at(instruction, 0)?;
        let value = self.read_operand(src, size)?;
        self.push_stack_value(value)
    }

    pub(crate) fn exec_pop(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let size = instruction.size();
        let dest = operand_at(instruction, 0)?;
        let value = self.pop_stack_value()?;
        self.write_operand(dest, size, value)
    }

    fn register_range(instruction: &Instruction) -> Result<(RegisterBank, u8, u8), RuntimeError> {
        match operand_at(instruction, 0)? {
            Operand::Range { bank, begin, end } => Ok((*bank, *begin, *end)),
            _ => Err(RuntimeError::Recoverable(PanicReason::InvalidRegister)),
        }
    }

    fn read_ranged_register(&self, bank: RegisterBank, index: u8) -> Result<u64, RuntimeError> {
        match bank {
            RegisterBank::Integer => self.regs.read(IntReg(index), OpSize::Qword),
            RegisterBank::Float => self.regs.read_f64(FloatReg(index)).map(f64::to_bits),
        }
    }

    fn write_ranged_register(&mut self, bank: RegisterBank, index: u8, value: u64) -> Result<(), RuntimeError> {
        match bank {
            RegisterBank::Integer => self.regs.write(IntReg(index), OpSize::Qword, value),
            RegisterBank::Float => self.regs.write_f64(FloatReg(index), f64::from_bits(value)),
        }
    }

    /// `pushm r0..r1`: pushes `begin..=end` in ascending order, so the
    /// matching `popm` (which pops in descending order, LIFO) restores
    /// every register to the value it held before the push.
    pub(crate) fn exec_pushm(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let (bank, begin, end) = Self::register_range(instruction)?;
        for index in begin..=end {
            let value = self.read_ranged_register(bank, index)?;
            self.push_stack_value(value)?;
        }
        Ok(())
    }

    pub(crate) fn exec_popm(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let (bank, begin, end) = Self::register_range(instruction)?;
        for index in (begin..=end).rev() {
            let value = self.pop_stack_value()?;
            self.write_ranged_register(bank, index, value)?;
        }
        Ok(())
    }

    /// `dup`: duplicate the top of the VM stack without disturbing it.
    pub(crate) fn exec_dup(&mut self, _instruction: &Instruction) -> Result<(), RuntimeError> {
        let top = self.sp();
        let value = self.read_memory(top, crate::consts::WORD_SIZE)?;
        self.push_stack_value(value)
    }

    pub(crate) fn exec_swap(&mut self, instruction: &Instruction) -> Result<(), RuntimeError> {
        let size = instruction.size();
        let a = operand_at(instruction, 0)?;
        let b = operand_at(instruction, 1)?;
        let a_value = self.read_operand(a, size)?;
        let b_value = self.read_operand(b, size)?;
        let a = *a;
        let b = *b;
        self.write_operand(&a, size, b_value)?;
        self.write_operand(&b, size, a_value)
    }
}
