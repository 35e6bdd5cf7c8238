//! VM layout parameters: register indices, heap vector offsets, size constants.

use std::mem;

/* REGISTER LAYOUT */

/// Number of general-purpose integer registers.
pub const INT_REGISTER_COUNT: usize = 64;

/// Number of general-purpose float registers.
pub const FLOAT_REGISTER_COUNT: usize = 64;

/// Number of special registers (`pc, sp, fp, fr, sr`).
pub const SPECIAL_REGISTER_COUNT: usize = 5;

/// Total addressable register slots in the register file.
pub const TOTAL_REGISTER_COUNT: usize =
    INT_REGISTER_COUNT + FLOAT_REGISTER_COUNT + SPECIAL_REGISTER_COUNT;

/// Index of the first float register within the flat register array.
pub const FLOAT_REGISTER_START: usize = INT_REGISTER_COUNT;

/// Index of the first special register within the flat register array.
pub const SPECIAL_REGISTER_START: usize = INT_REGISTER_COUNT + FLOAT_REGISTER_COUNT;

/// Program counter.
pub const REG_PC: usize = SPECIAL_REGISTER_START;
/// Stack pointer.
pub const REG_SP: usize = SPECIAL_REGISTER_START + 1;
/// Flags register.
pub const REG_FR: usize = SPECIAL_REGISTER_START + 2;
/// Status register (reserved for trap/context bookkeeping).
pub const REG_SR: usize = SPECIAL_REGISTER_START + 3;
/// Frame pointer.
pub const REG_FP: usize = SPECIAL_REGISTER_START + 4;

/* FLAG BITS (packed into `$fr`) */

/// Bitmask constants for the flags register.
pub mod flags {
    /// Result was zero.
    pub const ZERO: u64 = 0b0000_0001;
    /// Unsigned overflow (carry out).
    pub const CARRY: u64 = 0b0000_0010;
    /// Signed (two's-complement) overflow.
    pub const OVERFLOW: u64 = 0b0000_0100;
    /// Result's sign bit was set.
    pub const NEGATIVE: u64 = 0b0000_1000;
    /// Set by extension opcodes (`moves`/`movez`) to record the direction taken.
    pub const EXTENDED: u64 = 0b0001_0000;
    /// True for subtractive operations (`sub`, `cmp`, `dec`).
    pub const SUBTRACT: u64 = 0b0010_0000;
}

/* MEMORY LAYOUT */

/// Length of a machine word, in bytes.
pub const WORD_SIZE: usize = mem::size_of::<u64>();

/// Number of entries in the interrupt vector table.
pub const INTERRUPT_VECTOR_TABLE_LEN: usize = 16;

/// Byte offset of the interrupt vector table, relative to `heap_base`.
pub const INTERRUPT_VECTOR_TABLE_START: usize = 0;

/// Byte length of the interrupt vector table (16 qwords).
pub const INTERRUPT_VECTOR_TABLE_SIZE: usize = INTERRUPT_VECTOR_TABLE_LEN * WORD_SIZE;

/// Byte offset immediately after the interrupt vector table.
pub const INTERRUPT_VECTOR_TABLE_END: usize =
    INTERRUPT_VECTOR_TABLE_START + INTERRUPT_VECTOR_TABLE_SIZE;

/// Number of entries in the heap vector table.
pub const HEAP_VECTOR_TABLE_LEN: usize = 4;

/// Byte offset of the heap vector table, relative to `heap_base`.
pub const HEAP_VECTOR_TABLE_START: usize = INTERRUPT_VECTOR_TABLE_END;

/// Byte length of the heap vector table (well-known qwords: top/bottom of
/// stack, program start, free-space start).
pub const HEAP_VECTOR_TABLE_SIZE: usize = HEAP_VECTOR_TABLE_LEN * WORD_SIZE;

/// Byte offset immediately after the heap vector table; the default
/// `program_start` when the caller doesn't override it.
pub const HEAP_VECTOR_TABLE_END: usize = HEAP_VECTOR_TABLE_START + HEAP_VECTOR_TABLE_SIZE;

/// Well-known slots within the heap vector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumIter)]
#[repr(u8)]
pub enum HeapVector {
    /// Highest writable stack address (`heap_base + heap_size`).
    TopOfStack = 0,
    /// Lowest writable stack address (`top_of_stack - stack_size`).
    BottomOfStack = 1,
    /// Address of the first instruction.
    ProgramStart = 2,
    /// Address of the first free heap byte after the program image.
    FreeSpaceStart = 3,
}

impl HeapVector {
    /// Byte offset of this vector's slot within the heap vector table.
    pub const fn offset(self) -> usize {
        HEAP_VECTOR_TABLE_START + (self as usize) * WORD_SIZE
    }
}

/// A heap block is merged into its neighbor as-is (no split) when the
/// leftover space after satisfying an allocation is at or below this many
/// bytes.
pub const ALLOC_SPLIT_THRESHOLD: u64 = 64;

/// Reserved trap index for out-of-memory conditions raised by `alloc`.
pub const TRAP_OUT_OF_MEMORY: u8 = 0xff;

/// Reserved trap index for invalid FFI calls.
pub const TRAP_INVALID_FFI_CALL: u8 = 0xfe;
