//! Foreign-function signatures (SPEC_FULL §C.7). Modeled on the source's
//! `dyncall`/`dynload`-backed `function_signature_t`, but scoped down to
//! the signature/registry contract only — this crate never actually
//! resolves or invokes a foreign symbol.

use std::collections::HashMap;

use crate::error::{PanicReason, RuntimeError};

/// How a foreign function expects its arguments to be passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallingConvention {
    /// The platform's default calling convention.
    CDefault,
    /// A variadic function declared with a fixed prototype (`printf`-style,
    /// but with no variadic arguments actually passed).
    CEllipsis,
    /// A variadic function called with a concrete set of trailing
    /// arguments.
    CEllipsisVarargs,
}

/// A scalar type a foreign function can take or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ForeignType {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// A pointer into VM heap memory.
    Pointer,
}

/// A registered foreign function's call shape: the crate never loads or
/// invokes the underlying symbol (that lives with a host embedding this
/// VM), but instruction decoding and the trap/panic surface need to know
/// a signature id is valid and how many arguments to expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    /// The symbol name as it would be resolved in the foreign library.
    pub name: String,
    /// Source library name, for diagnostics.
    pub library: String,
    /// Calling convention.
    pub convention: CallingConvention,
    /// Argument types, in call order.
    pub arguments: Vec<ForeignType>,
    /// Return type.
    pub return_type: ForeignType,
}

/// Opaque id naming a registered [`FunctionSignature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureId(pub u32);

/// The table of signatures an `ffi` instruction can reference by id.
///
/// A real embedding is expected to populate this registry (resolving
/// symbols via something like `dyncall`/`dynload`) before handing it to
/// the interpreter; this crate only validates that an id is registered.
#[derive(Debug, Clone, Default)]
pub struct SignatureRegistry {
    signatures: HashMap<SignatureId, FunctionSignature>,
    next_id: u32,
}

impl SignatureRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature, returning its assigned id.
    pub fn register(&mut self, signature: FunctionSignature) -> SignatureId {
        let id = SignatureId(self.next_id);
        self.next_id += 1;
        self.signatures.insert(id, signature);
        id
    }

    /// Look up a registered signature by id, failing with
    /// [`PanicReason::InvalidFfiCall`] if it isn't registered — the
    /// interpreter's `ffi` handler uses this directly.
    pub fn resolve(&self, id: SignatureId) -> Result<&FunctionSignature, RuntimeError> {
        self.signatures
            .get(&id)
            .ok_or(RuntimeError::Recoverable(PanicReason::InvalidFfiCall))
    }
}
