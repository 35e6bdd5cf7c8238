//! Instruction set: opcodes, operands, and the wire encoding between them.

mod instruction;
mod opcode;
mod operand;

pub use instruction::{Instruction, ALIGNMENT, BASE_SIZE, MAX_OPERANDS};
pub use opcode::Opcode;
pub use operand::{Modifier, OpSize, Operand, RegisterBank};
