//! Shared scaffolding for the integration test suites: a thin wrapper
//! around the assembler pipeline so each test only has to describe the
//! instructions it cares about.

use terp_vm::assembler::block::BasicBlock;
use terp_vm::assembler::builder::Builder;
use terp_vm::assembler::{AssembledProgram, Assembler};

/// Assemble a single basic block built by `build` into a loadable image,
/// starting at `program_start`. Panics (via `unwrap`) on any assembler
/// diagnostic, which is the right behavior for a test fixture: a failure
/// here means the test itself is malformed.
pub fn assemble(program_start: u64, build: impl FnOnce(&mut Assembler, &mut BasicBlock)) -> AssembledProgram {
    let mut asm = Assembler::new(program_start);
    let mut block = BasicBlock::new();
    build(&mut asm, &mut block);
    asm.push_block(block);
    asm.apply_addresses().expect("apply_addresses");
    asm.resolve_named_refs().expect("resolve_named_refs");
    asm.assemble().expect("assemble")
}

/// Convenience for tests that only need a `Builder` over the block, not
/// the `Assembler` (no labels involved).
pub fn build_with(block: &mut BasicBlock, f: impl FnOnce(&mut Builder)) {
    let mut builder = Builder::new(block);
    f(&mut builder);
}
