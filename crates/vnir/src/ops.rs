//! Typed views over operations.
//!
//! `#[ir_dialect]` generates one [`DialectOp`] wrapper per declared op; the
//! wrapper is a checked `OpRef` whose accessors index the op's fields by
//! declaration order.

use crate::context::Context;
use crate::error::ConversionError;
use crate::refs::OpRef;
use crate::symbol::Symbol;

/// Trait for typed dialect operation wrappers.
pub trait DialectOp: Sized + Copy {
    const DIALECT_NAME: &'static str;
    const OP_NAME: &'static str;

    fn from_op(ctx: &Context, op: OpRef) -> Result<Self, ConversionError>;
    fn op_ref(&self) -> OpRef;

    fn matches(ctx: &Context, op: OpRef) -> bool {
        ctx.is_op(
            op,
            Symbol::new(Self::DIALECT_NAME),
            Symbol::new(Self::OP_NAME),
        )
    }
}

/// `dialect.name` of an op, for diagnostics.
pub fn op_full_name(ctx: &Context, op: OpRef) -> String {
    let data = ctx.op(op);
    format!("{}.{}", data.dialect, data.name)
}
