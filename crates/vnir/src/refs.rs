//! Entity handles.
//!
//! Every handle is a `u32` arena index tagged with the [`ContextId`] of the
//! context that allocated it. The tag lets the context reject handles that
//! were minted by a different context instead of silently indexing into the
//! wrong arena.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use cranelift_entity::{EntityRef, entity_impl};

/// Identity of one [`Context`](crate::Context).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(0);

impl ContextId {
    pub(crate) fn fresh() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context #{}", self.0)
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

macro_rules! context_entity {
    ($(#[$meta:meta])* $name:ident, $key:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub(crate) struct $key(u32);
        entity_impl!($key, $prefix);

        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            ctx: ContextId,
            key: $key,
        }

        impl $name {
            pub(crate) fn new(ctx: ContextId, key: $key) -> Self {
                Self { ctx, key }
            }

            pub(crate) fn key(self) -> $key {
                self.key
            }

            /// The context that allocated this handle.
            pub fn context_id(self) -> ContextId {
                self.ctx
            }

            /// Arena index, stable for the lifetime of the context.
            pub fn index(self) -> u32 {
                self.key.index() as u32
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.key.index())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }
    };
}

context_entity!(
    /// Reference to an operation.
    OpRef,
    OpKey,
    "op"
);
context_entity!(
    /// Reference to a value (result, block argument, literal or placeholder).
    ValueRef,
    ValueKey,
    "v"
);
context_entity!(
    /// Reference to a block.
    BlockRef,
    BlockKey,
    "block"
);
context_entity!(
    /// Reference to a region or symbol table.
    RegionRef,
    RegionKey,
    "region"
);
context_entity!(
    /// Reference to one named operand group of an operation.
    OperandRef,
    OperandKey,
    "operand"
);
context_entity!(
    /// Reference to a canonical value type.
    TypeRef,
    TypeKey,
    "ty"
);
context_entity!(
    /// Reference to a canonical literal payload.
    LiteralRef,
    LiteralKey,
    "lit"
);
context_entity!(
    /// Reference to a source file (`DIFile`).
    FileRef,
    FileKey,
    "file"
);

/// Where a value comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueDef {
    /// Result of an operation at the given index.
    OpResult(OpRef, u32),
    /// Block argument at the given index.
    BlockArg(BlockRef, u32),
    /// Canonical literal owned by the context.
    Literal(LiteralRef),
    /// Stand-in for a value that does not exist yet.
    Placeholder,
}

impl fmt::Display for ValueDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueDef::OpResult(op, idx) => write!(f, "{op}#{idx}"),
            ValueDef::BlockArg(block, idx) => write!(f, "{block}#{idx}"),
            ValueDef::Literal(lit) => write!(f, "{lit}"),
            ValueDef::Placeholder => f.write_str("placeholder"),
        }
    }
}
