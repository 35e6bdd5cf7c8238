//! Labels, locals, and frame offsets: the named references an [`Operand`]
//! can defer to until addresses are known (spec §3, §6).
//!
//! [`Operand`]: crate::asm::Operand

use std::collections::HashMap;

use crate::error::DiagnosticBag;

/// Opaque handle for a declared label, local, or frame offset. An
/// [`Operand::NamedRef`] carries one of these plus a byte addend.
///
/// [`Operand::NamedRef`]: crate::asm::Operand::NamedRef
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NamedRefId(pub u32);

/// What kind of thing a [`NamedRefId`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedRefKind {
    /// A block label (spec §3: "label").
    Label,
    /// A procedure-local variable (spec §3: "local").
    Local,
    /// A stack-frame offset, resolved against the enclosing procedure
    /// block's frame map (SPEC_FULL §C.9).
    FrameOffset,
}

/// A declared-but-not-yet-resolved name: its kind and spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRef {
    /// What this name refers to.
    pub kind: NamedRefKind,
    /// The name as written in the source block.
    pub name: String,
}

/// Monotonically increasing id allocator shared by labels, locals, and
/// frame offsets declared while building basic blocks.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    /// A fresh allocator starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn next(&mut self) -> NamedRefId {
        let id = NamedRefId(self.next);
        self.next += 1;
        id
    }
}

/// The assembler's symbol table for named references: declarations made
/// while building blocks, and addresses resolved by
/// [`apply_addresses`](crate::assembler::Assembler::apply_addresses) and
/// [`resolve_named_refs`](crate::assembler::Assembler::resolve_named_refs).
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    ids: IdAllocator,
    declarations: HashMap<NamedRefId, NamedRef>,
    by_name: HashMap<String, NamedRefId>,
    addresses: HashMap<NamedRefId, u64>,
}

impl LabelTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a named reference, or return the existing id if `name` was
    /// already declared with the same kind.
    pub fn declare(&mut self, kind: NamedRefKind, name: impl Into<String>) -> NamedRefId {
        let name = name.into();
        if let Some(existing) = self.by_name.get(&name) {
            return *existing;
        }
        let id = self.ids.next();
        self.by_name.insert(name.clone(), id);
        self.declarations.insert(id, NamedRef { kind, name });
        id
    }

    /// Look up a previously declared name.
    pub fn id_for(&self, name: &str) -> Option<NamedRefId> {
        self.by_name.get(name).copied()
    }

    /// The declaration behind an id.
    pub fn declaration(&self, id: NamedRefId) -> Option<&NamedRef> {
        self.declarations.get(&id)
    }

    /// Record the resolved address for a named reference.
    pub fn define(&mut self, id: NamedRefId, address: u64) {
        self.addresses.insert(id, address);
    }

    /// The resolved address for a named reference, if one has been
    /// assigned.
    pub fn resolve(&self, id: NamedRefId) -> Option<u64> {
        self.addresses.get(&id).copied()
    }

    /// All ids that were declared but never resolved, reported as
    /// diagnostics (`A002`) by
    /// [`resolve_named_refs`](crate::assembler::Assembler::resolve_named_refs).
    pub fn check_fully_resolved(&self, diagnostics: &mut DiagnosticBag) {
        for (id, decl) in &self.declarations {
            if !self.addresses.contains_key(id) {
                diagnostics.error("A002", format!("unresolved reference to `{}`", decl.name));
            }
        }
    }
}
