//! The two-pass assembler pipeline (spec §6): `apply_addresses` walks
//! blocks assigning a location counter, `resolve_named_refs` patches every
//! operand that named a label/local/frame offset, and `assemble` emits
//! the final byte image.

pub mod block;
pub mod builder;
pub mod label;
pub mod segment;

use std::collections::HashMap;

use crate::asm::{Instruction, OpSize, Operand};
use crate::consts::WORD_SIZE;
use crate::error::DiagnosticBag;

use block::{align_up, BasicBlock, BlockEntry};
use label::LabelTable;
use segment::{Segment, SegmentKind};

/// The finished byte image produced by [`Assembler::assemble`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledProgram {
    /// The assembled bytes, ready to be copied into the VM heap at
    /// `program_start`.
    pub image: Vec<u8>,
    /// Address of the first instruction.
    pub entry: u64,
    /// Offsets (relative to `program_start`) at which the assembler
    /// recorded an explicit `reset` directive; callers reassembling over
    /// a live heap should invalidate the instruction cache at these
    /// addresses.
    pub reset_points: Vec<u64>,
}

/// Owns the blocks produced by [`builder::Builder`] plus the symbol table
/// they reference, and drives the two-pass resolution and final emission.
#[derive(Debug, Default)]
pub struct Assembler {
    blocks: Vec<BasicBlock>,
    labels: LabelTable,
    segments: HashMap<SegmentKind, Segment>,
    program_start: u64,
}

impl Assembler {
    /// Start a new assembler whose first instruction will be placed at
    /// `program_start`.
    pub fn new(program_start: u64) -> Self {
        Self {
            program_start,
            ..Self::default()
        }
    }

    /// Mutable access to the label table, for declaring labels/locals
    /// while building blocks.
    pub fn labels_mut(&mut self) -> &mut LabelTable {
        &mut self.labels
    }

    /// Mutable access to a segment's symbol table, creating it if absent.
    pub fn segment_mut(&mut self, kind: SegmentKind) -> &mut Segment {
        self.segments.entry(kind).or_default()
    }

    /// Append a finished block to the program, in emission order.
    pub fn push_block(&mut self, block: BasicBlock) {
        self.blocks.push(block);
    }

    /// First pass: walk every block in order, assigning each instruction
    /// and data definition an address, and recording the address of every
    /// label, local, and frame offset declared along the way.
    pub fn apply_addresses(&mut self) -> Result<(), DiagnosticBag> {
        let mut diagnostics = DiagnosticBag::new();
        let mut pc = self.program_start;
        let mut frame_cursor: i64 = 0;

        for block in &mut self.blocks {
            if block.is_procedure {
                frame_cursor = 0;
            }
            block.address = Some(pc);
            for entry in block.entries_mut() {
                match entry {
                    BlockEntry::Instruction(instruction) => match instruction.encoding_size() {
                        Ok(size) => pc += size as u64,
                        Err(d) => diagnostics.error(d.code, d.message),
                    },
                    BlockEntry::DataDefinition { bytes, .. } => pc += bytes.len() as u64,
                    BlockEntry::Label(id) => self.labels.define(*id, pc),
                    BlockEntry::Local(id) | BlockEntry::FrameOffset(id) => {
                        self.labels.define(*id, frame_cursor as u64);
                        frame_cursor += WORD_SIZE as i64;
                    }
                    BlockEntry::Align { size } => pc = align_up(pc, *size as u64),
                    BlockEntry::Section(_)
                    | BlockEntry::SymbolDeclaration { .. }
                    | BlockEntry::Comment(_)
                    | BlockEntry::BlankLine
                    | BlockEntry::MetaBegin(_)
                    | BlockEntry::MetaEnd
                    | BlockEntry::Reset
                    | BlockEntry::ProgramEnd => {}
                }
            }
        }

        if diagnostics.is_failed() {
            Err(diagnostics)
        } else {
            Ok(())
        }
    }

    /// Second pass: replace every operand naming an unresolved reference
    /// with the concrete qword value `apply_addresses` assigned it.
    /// Reports `A001` for any reference that never resolved.
    pub fn resolve_named_refs(&mut self) -> Result<(), DiagnosticBag> {
        let mut diagnostics = DiagnosticBag::new();

        for block in &mut self.blocks {
            for entry in block.entries_mut() {
                let BlockEntry::Instruction(instruction) = entry else {
                    continue;
                };
                let mut resolved_operands = Vec::with_capacity(instruction.operand_count());
                let mut ok = true;
                for operand in instruction.operands() {
                    match operand {
                        Operand::NamedRef { id, offset } => match self.labels.resolve(*id) {
                            Some(address) => {
                                let value = (address as i64).wrapping_add(*offset) as u64;
                                resolved_operands.push(Operand::imm(OpSize::Qword, value));
                            }
                            None => {
                                let name = self
                                    .labels
                                    .declaration(*id)
                                    .map(|d| d.name.clone())
                                    .unwrap_or_else(|| "<unknown>".to_string());
                                diagnostics.error("A001", format!("unresolved reference to `{name}`"));
                                ok = false;
                            }
                        },
                        other => resolved_operands.push(*other),
                    }
                }
                if !ok {
                    continue;
                }
                match instruction.with_operands(&resolved_operands) {
                    Ok(replacement) => *instruction = replacement,
                    Err(d) => diagnostics.error(d.code, d.message),
                }
            }
        }

        if diagnostics.is_failed() {
            Err(diagnostics)
        } else {
            Ok(())
        }
    }

    /// Final pass: emit the resolved blocks into one contiguous byte
    /// image. Must be called after both [`Self::apply_addresses`] and
    /// [`Self::resolve_named_refs`] succeed.
    pub fn assemble(&self) -> Result<AssembledProgram, DiagnosticBag> {
        let mut diagnostics = DiagnosticBag::new();
        let mut image = Vec::new();
        let mut reset_points = Vec::new();
        let mut pc = self.program_start;

        for block in &self.blocks {
            for entry in block.entries() {
                match entry {
                    BlockEntry::Instruction(instruction) => match instruction.encode() {
                        Ok(bytes) => {
                            pc += bytes.len() as u64;
                            image.extend_from_slice(&bytes);
                        }
                        Err(d) => diagnostics.error(d.code, d.message),
                    },
                    BlockEntry::DataDefinition { bytes, .. } => {
                        pc += bytes.len() as u64;
                        image.extend_from_slice(bytes);
                    }
                    BlockEntry::Align { size } => {
                        let target = align_up(pc, *size as u64);
                        image.resize(image.len() + (target - pc) as usize, 0);
                        pc = target;
                    }
                    BlockEntry::Reset => reset_points.push(pc),
                    BlockEntry::Label(_)
                    | BlockEntry::Local(_)
                    | BlockEntry::FrameOffset(_)
                    | BlockEntry::Section(_)
                    | BlockEntry::SymbolDeclaration { .. }
                    | BlockEntry::Comment(_)
                    | BlockEntry::BlankLine
                    | BlockEntry::MetaBegin(_)
                    | BlockEntry::MetaEnd
                    | BlockEntry::ProgramEnd => {}
                }
            }
        }

        if diagnostics.is_failed() {
            return Err(diagnostics);
        }

        Ok(AssembledProgram {
            image,
            entry: self.program_start,
            reset_points,
        })
    }
}
