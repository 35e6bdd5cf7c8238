//! The interpreter: fetch-decode-dispatch loop plus the register file,
//! heap, instruction cache, and trap table it owns.
//!
//! Grounded on the dispatch-loop shape of `interpreter::execute` in the
//! teacher crate (fetch → advance `pc` → big opcode match → per-category
//! handler), generalized from that crate's gas-metered transaction
//! opcodes to this VM's arithmetic/memory/control-flow instruction set.

mod alu;
mod flow;
mod memops;

use std::collections::{HashMap, HashSet};

use tracing::{instrument, trace, warn};

use crate::asm::{Instruction, OpSize, Opcode};
use crate::consts::HeapVector;
use crate::error::{InterpreterError, PanicReason, RuntimeError};
use crate::ffi::SignatureRegistry;
use crate::heap::Heap;
use crate::icache::InstructionCache;
use crate::registers::{Flag, RegisterFile, SpecialReg};

pub use flow::ConditionCode;

/// A registered handler for the `trap` instruction. Plain function
/// pointers rather than closures, so the trap table can sit alongside the
/// interpreter it operates on without a self-referential borrow.
pub type TrapHandler = fn(&mut Interpreter) -> Result<(), RuntimeError>;

/// Why [`Interpreter::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An `exit` instruction ran.
    Exited,
    /// `max_steps` was reached without the program exiting.
    StepLimitReached,
}

/// Owns everything one program execution needs: registers, heap memory,
/// the instruction cache, and the trap/FFI registries instructions can
/// reach into.
pub struct Interpreter {
    pub(crate) regs: RegisterFile,
    pub(crate) memory: Vec<u8>,
    pub(crate) heap: Heap,
    pub(crate) icache: InstructionCache,
    pub(crate) signatures: SignatureRegistry,
    traps: HashMap<u8, TrapHandler>,
    /// Addresses a memory-touching opcode may target even though they lie
    /// outside `[heap_base, heap_base+heap_size)` — native pointers
    /// returned by an `ffi` call (spec §4.5).
    whitelist: HashSet<u64>,
}

impl Interpreter {
    /// Build an interpreter over a fresh heap of `memory_size` bytes.
    /// `program_start` is recorded in the heap vector table so programs
    /// can discover their own load address.
    pub fn new(memory_size: u64, program_start: u64) -> Self {
        let free_space_start = program_start.max(crate::consts::HEAP_VECTOR_TABLE_END as u64);
        let mut heap = Heap::new();
        heap.initialize(free_space_start, memory_size.saturating_sub(free_space_start));

        let mut interp = Self {
            regs: RegisterFile::default(),
            memory: vec![0u8; memory_size as usize],
            heap,
            icache: InstructionCache::new(),
            signatures: SignatureRegistry::new(),
            traps: HashMap::new(),
            whitelist: HashSet::new(),
        };

        interp.write_heap_vector(HeapVector::TopOfStack, memory_size);
        interp.write_heap_vector(HeapVector::BottomOfStack, memory_size / 2);
        interp.write_heap_vector(HeapVector::ProgramStart, program_start);
        interp.write_heap_vector(HeapVector::FreeSpaceStart, free_space_start);

        interp.regs.write_special(SpecialReg::Pc, program_start);
        interp.regs.write_special(SpecialReg::Sp, memory_size);
        interp.regs.write_special(SpecialReg::Fp, memory_size);

        interp
    }

    fn write_heap_vector(&mut self, vector: HeapVector, value: u64) {
        let offset = vector.offset();
        self.memory[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Load `image` into memory starting at `address`.
    pub fn load_program(&mut self, address: u64, image: &[u8]) -> Result<(), RuntimeError> {
        let end = address as usize + image.len();
        let dest = self
            .memory
            .get_mut(address as usize..end)
            .ok_or(RuntimeError::Recoverable(PanicReason::MemoryOverflow))?;
        dest.copy_from_slice(image);

        let memory_size = self.memory.len() as u64;
        let free_space_start =
            crate::assembler::block::align_up(end as u64, 4).max(crate::consts::HEAP_VECTOR_TABLE_END as u64);
        self.heap
            .initialize(free_space_start, memory_size.saturating_sub(free_space_start));
        self.write_heap_vector(HeapVector::ProgramStart, address);
        self.write_heap_vector(HeapVector::FreeSpaceStart, free_space_start);

        self.icache.reset();
        Ok(())
    }

    /// Direct access to the register file.
    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Direct mutable access to the register file, for host-side setup.
    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    /// Direct access to the flat backing memory.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Register a trap handler at `index`, replacing any previous
    /// registration.
    pub fn register_trap(&mut self, index: u8, handler: TrapHandler) {
        self.traps.insert(index, handler);
    }

    /// Register an FFI function signature, returning the id `ffi`
    /// instructions use to call it through the bridge.
    pub fn register_signature(&mut self, signature: crate::ffi::FunctionSignature) -> crate::ffi::SignatureId {
        self.signatures.register(signature)
    }

    /// Permit memory-touching opcodes to target `address` even though it
    /// falls outside the heap range — used for native pointers an `ffi`
    /// call hands back to VM code.
    pub fn whitelist_address(&mut self, address: u64) {
        self.whitelist.insert(address);
    }

    /// Revoke a previously whitelisted address.
    pub fn forget_address(&mut self, address: u64) {
        self.whitelist.remove(&address);
    }

    /// Invalidate every cached decode. The only operation that lets a
    /// program observe its own writes to code it has already executed.
    pub fn reset_icache(&mut self) {
        self.icache.reset();
    }

    /// Run until `exit`, a step limit, or an error.
    #[instrument(skip(self), fields(max_steps))]
    pub fn run(&mut self, max_steps: u64) -> Result<StopReason, InterpreterError> {
        for _ in 0..max_steps {
            match self.step() {
                Ok(Some(reason)) => return Ok(reason),
                Ok(None) => continue,
                Err((error, instruction)) => {
                    warn!(opcode = %instruction.opcode(), "trapped");
                    return Err(InterpreterError::from_runtime(error, instruction));
                }
            }
        }
        Ok(StopReason::StepLimitReached)
    }

    /// Execute a single instruction. Returns `Ok(Some(reason))` if this
    /// step stopped execution (`exit`), `Ok(None)` to keep going, or the
    /// runtime error paired with the instruction that raised it.
    pub fn step(&mut self) -> Result<Option<StopReason>, (RuntimeError, Instruction)> {
        let pc = self.regs.read_special(SpecialReg::Pc);
        let fallback = || Instruction::new(Opcode::Nop, OpSize::None, &[]).expect("nop is always encodable");
        let (instruction, size) = self
            .icache
            .fetch(&self.memory, pc)
            .map_err(|_| (RuntimeError::Recoverable(PanicReason::InvalidOpcode), fallback()))?;
        self.regs.write_special(SpecialReg::Pc, pc + size as u64);

        trace!(opcode = %instruction.opcode(), pc, "dispatch");

        match self.dispatch(&instruction) {
            Ok(outcome) => Ok(outcome),
            Err(RuntimeError::Recoverable(PanicReason::Exited)) => Ok(Some(StopReason::Exited)),
            Err(e) => Err((e, instruction)),
        }
    }

    fn dispatch(&mut self, instruction: &Instruction) -> Result<Option<StopReason>, RuntimeError> {
        use Opcode::*;
        match instruction.opcode() {
            Nop => {}

            Alloc => self.exec_alloc(instruction)?,
            Free => self.exec_free(instruction)?,
            Size => self.exec_size(instruction)?,
            Load => self.exec_load(instruction)?,
            Store => self.exec_store(instruction)?,
            Copy => self.exec_copy(instruction)?,
            Convert => self.exec_convert(instruction)?,
            Fill => self.exec_fill(instruction)?,
            Clr => self.exec_clr(instruction)?,

            Move => self.exec_move(instruction)?,
            Moves => self.exec_moves(instruction)?,
            Movez => self.exec_movez(instruction)?,
            Push => self.exec_push(instruction)?,
            Pushm => self.exec_pushm(instruction)?,
            Pop => self.exec_pop(instruction)?,
            Popm => self.exec_popm(instruction)?,
            Dup => self.exec_dup(instruction)?,

            Inc => self.exec_inc(instruction)?,
            Dec => self.exec_dec(instruction)?,

            Add => self.exec_binary_arith(instruction, alu::ArithOp::Add)?,
            Sub => self.exec_binary_arith(instruction, alu::ArithOp::Sub)?,
            Mul => self.exec_binary_arith(instruction, alu::ArithOp::Mul)?,
            Div => self.exec_binary_arith(instruction, alu::ArithOp::Div)?,
            Mod => self.exec_binary_arith(instruction, alu::ArithOp::Mod)?,
            Neg => self.exec_neg(instruction)?,
            Shr => self.exec_binary_arith(instruction, alu::ArithOp::Shr)?,
            Shl => self.exec_binary_arith(instruction, alu::ArithOp::Shl)?,
            Ror => self.exec_binary_arith(instruction, alu::ArithOp::Ror)?,
            Rol => self.exec_binary_arith(instruction, alu::ArithOp::Rol)?,
            Pow => self.exec_binary_arith(instruction, alu::ArithOp::Pow)?,

            And => self.exec_binary_arith(instruction, alu::ArithOp::And)?,
            Or => self.exec_binary_arith(instruction, alu::ArithOp::Or)?,
            Xor => self.exec_binary_arith(instruction, alu::ArithOp::Xor)?,
            Not => self.exec_not(instruction)?,
            Bis => self.exec_binary_arith(instruction, alu::ArithOp::Bis)?,
            Bic => self.exec_binary_arith(instruction, alu::ArithOp::Bic)?,
            Test => self.exec_test(instruction)?,

            Cmp => self.exec_cmp(instruction)?,
            Bz | Bnz | Bne | Beq | Bs | Bo | Bcc | Bcs | Ba | Bae | Bb | Bbe | Bg | Bl | Bge | Ble => {
                self.exec_branch(instruction)?
            }
            Tbz => self.exec_tbz(instruction, false)?,
            Tbnz => self.exec_tbz(instruction, true)?,

            Seta | Setna | Setae | Setnae | Setb | Setnb | Setbe | Setnbe | Setc | Setnc | Setg
            | Setng | Setge | Setnge | Setl | Setnl | Setle | Setnle | Setz | Setnz | Sets
            | Setns | Seto | Setno => self.exec_setcc(instruction)?,

            Jsr => self.exec_jsr(instruction)?,
            Rts => self.exec_rts()?,
            Jmp => self.exec_jmp(instruction)?,
            Swi => self.exec_swi(instruction)?,
            Swap => self.exec_swap(instruction)?,
            Trap => self.exec_trap(instruction)?,
            Ffi => self.exec_ffi(instruction)?,
            Meta => {}
            Exit => return Err(RuntimeError::Recoverable(PanicReason::Exited)),
        }
        Ok(None)
    }

    pub(crate) fn fp(&self) -> u64 {
        self.regs.read_special(SpecialReg::Fp)
    }

    pub(crate) fn sp(&self) -> u64 {
        self.regs.read_special(SpecialReg::Sp)
    }

    pub(crate) fn set_sp(&mut self, value: u64) {
        self.regs.write_special(SpecialReg::Sp, value);
    }

    pub(crate) fn set_pc(&mut self, value: u64) {
        self.regs.write_special(SpecialReg::Pc, value);
    }

    pub(crate) fn flag(&self, flag: Flag) -> bool {
        self.regs.flag(flag)
    }

    /// Read an operand's value. Registers read through their declared
    /// size (zero-extended); immediates carry their value directly, since
    /// `Operand::imm_signed` already stores the full 64-bit two's
    /// complement representation. Auto-increment modifiers are only
    /// honored on effective-address operands (see `memops::effective_address`);
    /// here they're ignored, since no arithmetic opcode in this set takes
    /// an auto-incrementing operand.
    pub(crate) fn read_operand(&self, operand: &crate::asm::Operand, size: OpSize) -> Result<u64, RuntimeError> {
        use crate::asm::{Operand, RegisterBank};
        use crate::registers::{FloatReg, IntReg};
        match operand {
            Operand::Register { bank, index, .. } => match bank {
                RegisterBank::Integer => self.regs.read(IntReg(*index), size),
                RegisterBank::Float if size == OpSize::Dword => {
                    self.regs.read_f32(FloatReg(*index)).map(|v| v.to_bits() as u64)
                }
                RegisterBank::Float => self.regs.read_f64(FloatReg(*index)).map(f64::to_bits),
            },
            Operand::ImmInt { value, .. } => Ok(*value),
            Operand::ImmFloat { bits, .. } => Ok(*bits),
            Operand::Range { .. } | Operand::NamedRef { .. } => {
                Err(RuntimeError::Recoverable(PanicReason::InvalidRegister))
            }
        }
    }

    /// Write a value to a destination operand. Only register operands are
    /// valid write targets.
    pub(crate) fn write_operand(&mut self, operand: &crate::asm::Operand, size: OpSize, value: u64) -> Result<(), RuntimeError> {
        use crate::asm::{Operand, RegisterBank};
        use crate::registers::{FloatReg, IntReg};
        match operand {
            Operand::Register { bank, index, .. } => match bank {
                RegisterBank::Integer => self.regs.write(IntReg(*index), size, value),
                RegisterBank::Float if size == OpSize::Dword => {
                    self.regs.write_f32(FloatReg(*index), f32::from_bits(value as u32))
                }
                RegisterBank::Float => self.regs.write_f64(FloatReg(*index), f64::from_bits(value)),
            },
            _ => Err(RuntimeError::Recoverable(PanicReason::ReservedRegisterNotWritable)),
        }
    }
}
