//! Instruction encoding and decoding (spec §4.3): a variable-length,
//! self-describing, 4-byte-aligned wire format.
//!
//! Byte layout, grounded on `instruction_t::encode`/`decode` in the source
//! `terp.cpp`:
//!
//! ```text
//! byte 0       total encoded length, post-alignment
//! byte 1       opcode
//! byte 2       (size nibble << 4) | operand count nibble
//! byte 3..     per-operand: one flag byte, then 0+ value bytes
//! ```
//!
//! Each operand's flag byte packs `reg | integer | negative | range |
//! dword | word | byte | float`; a register operand's index byte packs
//! `index (bits 0..5) | modifier (bits 6..7)`. An instruction with no
//! explicit size bits set defaults to qword.

use crate::asm::opcode::Opcode;
use crate::asm::operand::{Modifier, OpSize, Operand, RegisterBank};
use crate::error::Diagnostic;

/// Base header size before any operand bytes: length + opcode + size/count.
pub const BASE_SIZE: usize = 3;

/// Every encoded instruction is padded to a multiple of this many bytes.
pub const ALIGNMENT: usize = 4;

/// Maximum operands a single instruction can carry (fits the 4-bit count
/// nibble with headroom; no opcode in this set needs more than four).
pub const MAX_OPERANDS: usize = 4;

mod operand_flags {
    pub const REG: u8 = 1;
    pub const INTEGER: u8 = 2;
    pub const NEGATIVE: u8 = 4;
    pub const RANGE: u8 = 8;
    pub const DWORD: u8 = 16;
    pub const WORD: u8 = 32;
    pub const BYTE: u8 = 64;
    pub const FLOAT: u8 = 128;
}

fn size_to_flag(size: OpSize) -> u8 {
    match size {
        OpSize::Dword => operand_flags::DWORD,
        OpSize::Word => operand_flags::WORD,
        OpSize::Byte => operand_flags::BYTE,
        OpSize::Qword | OpSize::None => 0,
    }
}

fn size_from_flags(flags: u8) -> OpSize {
    if flags & operand_flags::DWORD != 0 {
        OpSize::Dword
    } else if flags & operand_flags::WORD != 0 {
        OpSize::Word
    } else if flags & operand_flags::BYTE != 0 {
        OpSize::Byte
    } else {
        OpSize::Qword
    }
}

/// A fully decoded instruction: opcode, overall size, and up to
/// [`MAX_OPERANDS`] operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    opcode: Opcode,
    size: OpSize,
    operands: [Option<Operand>; MAX_OPERANDS],
}

impl Instruction {
    /// Build an instruction from its opcode, overall size, and operands.
    ///
    /// Returns a diagnostic (`A005`) if more than [`MAX_OPERANDS`] operands
    /// are supplied.
    pub fn new(opcode: Opcode, size: OpSize, operands: &[Operand]) -> Result<Self, Diagnostic> {
        if operands.len() > MAX_OPERANDS {
            return Err(Diagnostic::new(
                "A005",
                format!(
                    "{opcode} takes at most {MAX_OPERANDS} operands, got {}",
                    operands.len()
                ),
            ));
        }
        let mut slots = [None; MAX_OPERANDS];
        for (slot, op) in slots.iter_mut().zip(operands.iter()) {
            *slot = Some(*op);
        }
        Ok(Self {
            opcode,
            size,
            operands: slots,
        })
    }

    /// This instruction's opcode.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// This instruction's overall operation size.
    pub const fn size(&self) -> OpSize {
        self.size
    }

    /// The operands in encoding order.
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.operands.iter().filter_map(Option::as_ref)
    }

    /// Number of operands actually present.
    pub fn operand_count(&self) -> usize {
        self.operands().count()
    }

    /// The operand at `index`, if present.
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index).and_then(Option::as_ref)
    }

    /// Encode this instruction, returning the padded, 4-byte-aligned byte
    /// sequence. Every operand must already be resolved: encoding a
    /// [`Operand::NamedRef`] is a diagnostic (`B010`), not a panic, since
    /// the assembler is expected to have resolved it first.
    pub fn encode(&self) -> Result<Vec<u8>, Diagnostic> {
        let mut body = Vec::new();
        for operand in self.operands() {
            encode_operand(operand, &mut body)?;
        }

        let raw_len = BASE_SIZE + body.len();
        let aligned_len = align_up(raw_len, ALIGNMENT);
        if aligned_len > u8::MAX as usize {
            return Err(Diagnostic::new(
                "B010",
                format!("encoded instruction length {aligned_len} exceeds 255 bytes"),
            ));
        }

        let mut out = Vec::with_capacity(aligned_len);
        out.push(aligned_len as u8);
        out.push(self.opcode as u8);
        out.push(((size_nibble(self.size)) << 4) | (self.operand_count() as u8 & 0x0f));
        out.extend_from_slice(&body);
        out.resize(aligned_len, 0);
        Ok(out)
    }

    /// Decode one instruction starting at `bytes[offset]`. Returns the
    /// instruction and its encoded length in bytes (always a multiple of
    /// [`ALIGNMENT`]), so callers can advance `pc` directly.
    pub fn decode(bytes: &[u8], offset: usize) -> Result<(Self, usize), Diagnostic> {
        if offset % ALIGNMENT != 0 {
            return Err(Diagnostic::new("B012", format!("decode address {offset} is not 4-byte aligned")));
        }
        let header = bytes
            .get(offset..offset + BASE_SIZE)
            .ok_or_else(|| Diagnostic::new("B003", "instruction header runs past end of memory"))?;
        let len = header[0] as usize;
        if len < BASE_SIZE {
            return Err(Diagnostic::new("B004", format!("encoded length {len} is shorter than the instruction header")));
        }
        if len % ALIGNMENT != 0 {
            return Err(Diagnostic::new("B005", format!("encoded length {len} is not 4-byte aligned")));
        }
        let opcode = decode_opcode(header[1])?;
        let size = decode_size_nibble(header[2] >> 4)?;
        let operand_count = (header[2] & 0x0f) as usize;
        if operand_count > MAX_OPERANDS {
            return Err(Diagnostic::new("B006", format!("operand count {operand_count} exceeds {MAX_OPERANDS}")));
        }

        let body = bytes
            .get(offset + BASE_SIZE..offset + len)
            .ok_or_else(|| Diagnostic::new("B003", "instruction body runs past end of memory"))?;

        let mut cursor = 0usize;
        let mut operands = [None; MAX_OPERANDS];
        for slot in operands.iter_mut().take(operand_count) {
            let (operand, consumed) = decode_operand(&body[cursor..])?;
            *slot = Some(operand);
            cursor += consumed;
        }

        Ok((
            Self {
                opcode,
                size,
                operands,
            },
            len,
        ))
    }

    /// The byte length this instruction will encode to, without actually
    /// encoding it. Unlike [`Self::encode`], an unresolved
    /// [`Operand::NamedRef`] is not an error here: it is sized as a qword
    /// immediate placeholder, since `resolve_named_refs` always replaces
    /// it with exactly that (spec §4.3, "an instruction whose operands
    /// reference a named-ref uses the referenced symbol's declared size
    /// for the immediate slot when computing length"). This lets the
    /// assembler's address-assignment pass size a forward branch before
    /// its target label is resolved.
    pub fn encoding_size(&self) -> Result<usize, Diagnostic> {
        let mut body_len = 0usize;
        for operand in self.operands() {
            body_len += operand_encoded_size(operand)?;
        }
        Ok(align_up(BASE_SIZE + body_len, ALIGNMENT))
    }

    /// This instruction with its operands replaced, keeping the same
    /// opcode and size. Used by the assembler's second pass to patch in
    /// resolved named references.
    pub fn with_operands(&self, operands: &[Operand]) -> Result<Self, Diagnostic> {
        Self::new(self.opcode, self.size, operands)
    }
}

const fn align_up(value: usize, alignment: usize) -> usize {
    (value + (alignment - 1)) & !(alignment - 1)
}

const fn size_nibble(size: OpSize) -> u8 {
    size as u8
}

fn decode_size_nibble(nibble: u8) -> Result<OpSize, Diagnostic> {
    match nibble {
        0 => Ok(OpSize::None),
        1 => Ok(OpSize::Byte),
        2 => Ok(OpSize::Word),
        3 => Ok(OpSize::Dword),
        4 => Ok(OpSize::Qword),
        other => Err(Diagnostic::new("B007", format!("unrecognized size nibble {other}"))),
    }
}

fn decode_opcode(byte: u8) -> Result<Opcode, Diagnostic> {
    use strum::IntoEnumIterator;
    Opcode::iter()
        .find(|op| *op as u8 == byte)
        .ok_or_else(|| Diagnostic::new("B008", format!("unrecognized opcode byte 0x{byte:02x}")))
}

/// The width in bytes an integer immediate of `size` encodes to, or a
/// diagnostic if `size` is [`OpSize::None`] — an immediate always carries
/// one of the four concrete sizes (spec §4.3); `none` is only meaningful
/// as an instruction's overall operation size; on an `ImmInt`/`ImmFloat`
/// operand it would decode back as qword (`size_from_flags`'s default),
/// breaking `decode(encode(x)) == x`.
fn immediate_width(size: OpSize) -> Result<usize, Diagnostic> {
    if size == OpSize::None {
        return Err(Diagnostic::new(
            "B014",
            "an immediate operand must have an explicit byte/word/dword/qword size, not `none`",
        ));
    }
    Ok(size.bytes())
}

/// The number of body bytes `operand` will contribute once encoded,
/// without requiring a `NamedRef` to already be resolved (see
/// [`Instruction::encoding_size`]).
fn operand_encoded_size(operand: &Operand) -> Result<usize, Diagnostic> {
    match operand {
        Operand::Register { .. } => Ok(2),
        Operand::Range { .. } => Ok(3),
        Operand::ImmInt { size, .. } => Ok(1 + immediate_width(*size)?),
        Operand::ImmFloat { size, .. } => {
            if !size.is_valid_float_size() {
                return Err(Diagnostic::new(
                    "B013",
                    format!("float immediate size {size:?} must be dword or qword"),
                ));
            }
            Ok(1 + size.bytes())
        }
        // Placeholder size: `resolve_named_refs` always replaces this with
        // `Operand::imm(OpSize::Qword, ..)`, so size it the same way.
        Operand::NamedRef { .. } => Ok(1 + OpSize::Qword.bytes()),
    }
}

fn encode_operand(operand: &Operand, out: &mut Vec<u8>) -> Result<(), Diagnostic> {
    match operand {
        Operand::Register { bank, index, modifier } => {
            let mut flags = operand_flags::REG;
            if matches!(bank, RegisterBank::Float) {
                flags |= operand_flags::FLOAT;
            }
            out.push(flags);
            out.push(encode_register_byte(*index, *modifier)?);
        }
        Operand::Range { bank, begin, end } => {
            let mut flags = operand_flags::REG | operand_flags::RANGE;
            if matches!(bank, RegisterBank::Float) {
                flags |= operand_flags::FLOAT;
            }
            out.push(flags);
            out.push(encode_register_byte(*begin, Modifier::None)?);
            out.push(encode_register_byte(*end, Modifier::None)?);
        }
        Operand::ImmInt { size, value, negative } => {
            let width = immediate_width(*size)?;
            let mut flags = operand_flags::INTEGER | size_to_flag(*size);
            if *negative {
                flags |= operand_flags::NEGATIVE;
            }
            out.push(flags);
            out.extend_from_slice(&value.to_le_bytes()[..width]);
        }
        Operand::ImmFloat { size, bits } => {
            if !size.is_valid_float_size() {
                return Err(Diagnostic::new(
                    "B013",
                    format!("float immediate size {size:?} must be dword or qword"),
                ));
            }
            let flags = operand_flags::INTEGER | operand_flags::FLOAT | size_to_flag(*size);
            out.push(flags);
            out.extend_from_slice(&bits.to_le_bytes()[..size.bytes()]);
        }
        Operand::NamedRef { .. } => {
            return Err(Diagnostic::new(
                "B010",
                "cannot encode an instruction with an unresolved named reference",
            ));
        }
    }
    Ok(())
}

fn encode_register_byte(index: u8, modifier: Modifier) -> Result<u8, Diagnostic> {
    if index > 0x3f {
        return Err(Diagnostic::new("B009", format!("register index {index} exceeds 63")));
    }
    let modifier_bits = match modifier {
        Modifier::None => 0b00,
        Modifier::Prefix => 0b01,
        Modifier::Postfix => 0b10,
    };
    Ok(index | (modifier_bits << 6))
}

fn decode_register_byte(byte: u8) -> (u8, Modifier) {
    let index = byte & 0x3f;
    let modifier = match byte >> 6 {
        0b01 => Modifier::Prefix,
        0b10 => Modifier::Postfix,
        _ => Modifier::None,
    };
    (index, modifier)
}

/// Read an operand value of `size` bytes. `size` always comes from
/// `size_from_flags`, which only ever returns a concrete byte/word/dword/
/// qword size (never `none`), so there is no placeholder-width case here.
fn read_sized(bytes: &[u8], size: OpSize) -> Result<u64, Diagnostic> {
    let width = size.bytes();
    let slice = bytes
        .get(..width)
        .ok_or_else(|| Diagnostic::new("B003", "operand value runs past end of instruction"))?;
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(slice);
    Ok(u64::from_le_bytes(buf))
}

fn decode_operand(bytes: &[u8]) -> Result<(Operand, usize), Diagnostic> {
    let flags = *bytes
        .first()
        .ok_or_else(|| Diagnostic::new("B003", "operand flag byte runs past end of instruction"))?;
    let bank = if flags & operand_flags::FLOAT != 0 {
        RegisterBank::Float
    } else {
        RegisterBank::Integer
    };
    let size = size_from_flags(flags);

    if flags & operand_flags::REG != 0 && flags & operand_flags::RANGE != 0 {
        let (begin, _) = decode_register_byte(
            *bytes
                .get(1)
                .ok_or_else(|| Diagnostic::new("B003", "range begin byte runs past end of instruction"))?,
        );
        let (end, _) = decode_register_byte(
            *bytes
                .get(2)
                .ok_or_else(|| Diagnostic::new("B003", "range end byte runs past end of instruction"))?,
        );
        return Ok((Operand::Range { bank, begin, end }, 3));
    }

    if flags & operand_flags::REG != 0 {
        let (index, modifier) = decode_register_byte(
            *bytes
                .get(1)
                .ok_or_else(|| Diagnostic::new("B003", "register byte runs past end of instruction"))?,
        );
        return Ok((Operand::Register { bank, index, modifier }, 2));
    }

    if flags & operand_flags::INTEGER != 0 {
        // `size_from_flags` never returns `None`: with no size bits set it
        // defaults to qword.
        let width = size.bytes();
        let value = read_sized(&bytes[1..], size)?;
        if flags & operand_flags::FLOAT != 0 {
            if !size.is_valid_float_size() {
                return Err(Diagnostic::new(
                    "B013",
                    format!("float immediate size {size:?} must be dword or qword"),
                ));
            }
            return Ok((Operand::ImmFloat { size, bits: value }, 1 + width));
        }
        let negative = flags & operand_flags::NEGATIVE != 0;
        return Ok((Operand::ImmInt { size, value, negative }, 1 + width));
    }

    Err(Diagnostic::new("B011", format!("operand flag byte 0x{flags:02x} names no recognized operand kind")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_register_to_register_move() {
        let ins = Instruction::new(Opcode::Move, OpSize::Qword, &[Operand::int_reg(0), Operand::int_reg(1)]).unwrap();
        let bytes = ins.encode().unwrap();
        assert_eq!(bytes.len() % ALIGNMENT, 0);
        let (decoded, len) = Instruction::decode(&bytes, 0).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(decoded, ins);
    }

    #[test]
    fn round_trips_a_signed_immediate() {
        let ins = Instruction::new(
            Opcode::Add,
            OpSize::Dword,
            &[Operand::int_reg(3), Operand::imm_signed(OpSize::Dword, -42)],
        )
        .unwrap();
        let bytes = ins.encode().unwrap();
        let (decoded, _) = Instruction::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, ins);
        match decoded.operand(1).unwrap() {
            Operand::ImmInt { value, negative, .. } => {
                assert!(*negative);
                assert_eq!(*value as i32, -42);
            }
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn round_trips_a_register_range() {
        let ins = Instruction::new(
            Opcode::Pushm,
            OpSize::None,
            &[Operand::Register {
                bank: RegisterBank::Integer,
                index: 0,
                modifier: Modifier::None,
            }],
        )
        .unwrap();
        let range = Instruction::new(Opcode::Pushm, OpSize::None, &[Operand::Range {
            bank: RegisterBank::Integer,
            begin: 2,
            end: 9,
        }])
        .unwrap();
        assert_ne!(ins.encode().unwrap(), range.encode().unwrap());
        let bytes = range.encode().unwrap();
        let (decoded, _) = Instruction::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn round_trips_a_float_immediate() {
        let ins = Instruction::new(Opcode::Move, OpSize::Qword, &[Operand::float_reg(4), Operand::imm_f64(1.5)]).unwrap();
        let bytes = ins.encode().unwrap();
        let (decoded, _) = Instruction::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, ins);
    }

    #[test]
    fn encoding_is_always_four_byte_aligned() {
        let ins = Instruction::new(Opcode::Nop, OpSize::None, &[]).unwrap();
        let bytes = ins.encode().unwrap();
        assert_eq!(bytes.len(), BASE_SIZE + 1);
        assert_eq!(bytes.len() % ALIGNMENT, 0);
    }

    #[test]
    fn encoding_an_unresolved_named_reference_is_a_diagnostic() {
        let ins = Instruction::new(
            Opcode::Jmp,
            OpSize::None,
            &[Operand::NamedRef {
                id: crate::assembler::label::NamedRefId(0),
                offset: 0,
            }],
        )
        .unwrap();
        let err = ins.encode().unwrap_err();
        assert_eq!(err.code, "B010");
    }

    #[test]
    fn encoding_size_of_an_unresolved_named_reference_sizes_it_as_a_qword_immediate() {
        let with_ref = Instruction::new(
            Opcode::Jmp,
            OpSize::None,
            &[Operand::NamedRef {
                id: crate::assembler::label::NamedRefId(0),
                offset: 0,
            }],
        )
        .unwrap();
        let resolved = Instruction::new(Opcode::Jmp, OpSize::None, &[Operand::imm(OpSize::Qword, 0x1000)]).unwrap();
        assert_eq!(with_ref.encoding_size().unwrap(), resolved.encoding_size().unwrap());
        assert_eq!(with_ref.encoding_size().unwrap(), resolved.encode().unwrap().len());
    }

    #[test]
    fn an_immediate_with_no_explicit_size_is_a_diagnostic() {
        let ins = Instruction::new(
            Opcode::Move,
            OpSize::Qword,
            &[Operand::int_reg(0), Operand::ImmInt { size: OpSize::None, value: 1, negative: false }],
        )
        .unwrap();
        let err = ins.encode().unwrap_err();
        assert_eq!(err.code, "B014");
        let err = ins.encoding_size().unwrap_err();
        assert_eq!(err.code, "B014");
    }

    #[test]
    fn encoding_a_byte_sized_float_immediate_is_a_diagnostic() {
        let ins = Instruction::new(
            Opcode::Move,
            OpSize::Byte,
            &[Operand::float_reg(0), Operand::ImmFloat { size: OpSize::Byte, bits: 0 }],
        )
        .unwrap();
        let err = ins.encode().unwrap_err();
        assert_eq!(err.code, "B013");
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        let err = Instruction::decode(&[4, 0, 0], 0).unwrap_err();
        assert_eq!(err.code, "B003");
    }

    #[test]
    fn decoding_at_an_unaligned_offset_is_rejected() {
        let ins = Instruction::new(Opcode::Nop, OpSize::None, &[]).unwrap();
        let bytes = ins.encode().unwrap();
        let err = Instruction::decode(&bytes, 1).unwrap_err();
        assert_eq!(err.code, "B012");
    }
}
