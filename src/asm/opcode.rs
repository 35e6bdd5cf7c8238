//! Opcode mnemonics (spec §3, §4.5) plus the supplemented set pulled from
//! `basecode::vm::op_codes` (SPEC_FULL §C.4–C.6).

/// One opcode byte. The discriminant is the on-the-wire encoding (spec
/// §4.3, encoded byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// No-op.
    Nop = 0x00,

    // --- memory ---
    /// Allocate `n` bytes on the VM heap.
    Alloc = 0x01,
    /// Free a previously-allocated heap block.
    Free = 0x02,
    /// Query the size of an allocated heap block.
    Size = 0x03,
    /// Load from an effective address into a register.
    Load = 0x04,
    /// Store a register's value to an effective address.
    Store = 0x05,
    /// Copy `n` bytes between two effective addresses.
    Copy = 0x06,
    /// Explicit integer↔float bit-pattern conversion.
    Convert = 0x07,
    /// Fill `n` bytes at an effective address with a byte value.
    Fill = 0x08,
    /// Clear (zero) a register.
    Clr = 0x09,

    // --- data movement ---
    /// Plain register/immediate move.
    Move = 0x0a,
    /// Move with sign extension from `size - 1`.
    Moves = 0x0b,
    /// Move with zero extension (mask) from `size - 1`.
    Movez = 0x0c,
    /// Push a value onto the VM stack.
    Push = 0x0d,
    /// Push a register range onto the VM stack.
    Pushm = 0x0e,
    /// Pop the VM stack into a register.
    Pop = 0x0f,
    /// Pop the VM stack into a register range.
    Popm = 0x10,
    /// Duplicate the top of the VM stack.
    Dup = 0x11,

    // --- increment/decrement ---
    /// Increment a register by one.
    Inc = 0x12,
    /// Decrement a register by one.
    Dec = 0x13,

    // --- arithmetic ---
    /// Add.
    Add = 0x14,
    /// Subtract.
    Sub = 0x15,
    /// Multiply.
    Mul = 0x16,
    /// Divide.
    Div = 0x17,
    /// Modulo/remainder.
    Mod = 0x18,
    /// Negate (two's-complement, or IEEE-754 sign flip for floats).
    Neg = 0x19,
    /// Shift right.
    Shr = 0x1a,
    /// Shift left.
    Shl = 0x1b,
    /// Rotate right.
    Ror = 0x1c,
    /// Rotate left.
    Rol = 0x1d,
    /// Raise to a power.
    Pow = 0x1e,

    // --- bitwise ---
    /// Bitwise AND.
    And = 0x1f,
    /// Bitwise OR.
    Or = 0x20,
    /// Bitwise XOR.
    Xor = 0x21,
    /// Bitwise NOT.
    Not = 0x22,
    /// Bit-set: `dest |= mask`.
    Bis = 0x23,
    /// Bit-clear: `dest &= !mask`.
    Bic = 0x24,
    /// Test `value & mask`, updating flags without writing a destination.
    Test = 0x25,

    // --- comparison & branching ---
    /// Compare two operands, updating flags.
    Cmp = 0x26,
    /// Branch if a register is zero.
    Bz = 0x27,
    /// Branch if a register is non-zero.
    Bnz = 0x28,
    /// Test a mask against a register; branch if the result is zero.
    Tbz = 0x29,
    /// Test a mask against a register; branch if the result is non-zero.
    Tbnz = 0x2a,
    /// Branch if not equal (`Z=0`).
    Bne = 0x2b,
    /// Branch if equal (`Z=1`).
    Beq = 0x2c,
    /// Branch if sign set (`N=1`).
    Bs = 0x2d,
    /// Branch if overflow set (`V=1`).
    Bo = 0x2e,
    /// Branch if carry clear (`C=0`).
    Bcc = 0x2f,
    /// Branch if carry set (`C=1`).
    Bcs = 0x30,
    /// Branch if above, unsigned (`C=0 ∧ Z=0`).
    Ba = 0x31,
    /// Branch if above-or-equal, unsigned (`C=1`, alias of `bcs`/`bb`).
    Bae = 0x32,
    /// Branch if below, unsigned (`C=1`, alias of `bcs`).
    Bb = 0x33,
    /// Branch if below-or-equal, unsigned (`C=1 ∨ Z=1`).
    Bbe = 0x34,
    /// Branch if greater, signed (`Z=0 ∧ N=V`).
    Bg = 0x35,
    /// Branch if less, signed (`N≠V`).
    Bl = 0x36,
    /// Branch if greater-or-equal, signed (`N=V`).
    Bge = 0x37,
    /// Branch if less-or-equal, signed (`Z=1 ∨ N≠V`).
    Ble = 0x38,

    // --- setcc ---
    /// Set destination to 1 if above (unsigned), else 0.
    Seta = 0x39,
    /// Set destination to 1 if not-above (unsigned), else 0.
    Setna = 0x3a,
    /// Set destination to 1 if above-or-equal (unsigned), else 0.
    Setae = 0x3b,
    /// Set destination to 1 if not-above-or-equal (unsigned), else 0.
    Setnae = 0x3c,
    /// Set destination to 1 if below (unsigned), else 0.
    Setb = 0x3d,
    /// Set destination to 1 if not-below (unsigned), else 0.
    Setnb = 0x3e,
    /// Set destination to 1 if below-or-equal (unsigned), else 0.
    Setbe = 0x3f,
    /// Set destination to 1 if not-below-or-equal (unsigned), else 0.
    Setnbe = 0x40,
    /// Set destination to 1 if carry set, else 0.
    Setc = 0x41,
    /// Set destination to 1 if carry clear, else 0.
    Setnc = 0x42,
    /// Set destination to 1 if greater (signed), else 0.
    Setg = 0x43,
    /// Set destination to 1 if not-greater (signed), else 0.
    Setng = 0x44,
    /// Set destination to 1 if greater-or-equal (signed), else 0.
    Setge = 0x45,
    /// Set destination to 1 if not-greater-or-equal (signed), else 0.
    Setnge = 0x46,
    /// Set destination to 1 if less (signed), else 0.
    Setl = 0x47,
    /// Set destination to 1 if not-less (signed), else 0.
    Setnl = 0x48,
    /// Set destination to 1 if less-or-equal (signed), else 0.
    Setle = 0x49,
    /// Set destination to 1 if not-less-or-equal (signed), else 0.
    Setnle = 0x4a,
    /// Set destination to 1 if zero, else 0.
    Setz = 0x4b,
    /// Set destination to 1 if non-zero, else 0.
    Setnz = 0x4c,
    /// Set destination to 1 if sign set, else 0.
    Sets = 0x4d,
    /// Set destination to 1 if sign clear, else 0.
    Setns = 0x4e,
    /// Set destination to 1 if overflow set, else 0.
    Seto = 0x4f,
    /// Set destination to 1 if overflow clear, else 0.
    Setno = 0x50,

    // --- calls & control flow ---
    /// Jump to subroutine: push `pc`, set `pc` to target.
    Jsr = 0x51,
    /// Return from subroutine: `pc` ← pop().
    Rts = 0x52,
    /// Unconditional jump.
    Jmp = 0x53,
    /// Software interrupt: push `pc`, `pc` ← interrupt vector table entry.
    Swi = 0x54,
    /// Swap two registers' contents.
    Swap = 0x55,
    /// Invoke a registered trap callable; does not modify `pc`.
    Trap = 0x56,
    /// Foreign call through the FFI bridge.
    Ffi = 0x57,
    /// Source-position metadata marker (no runtime effect).
    Meta = 0x58,
    /// Stop execution.
    Exit = 0x59,
}

impl Opcode {
    /// Mnemonic text, lowercase (matches [`strum::Display`]).
    pub fn mnemonic(self) -> String {
        self.to_string()
    }
}
