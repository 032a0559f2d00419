//! Built-in `core` dialect.

use crate::context::Context;
use crate::ops::DialectOp;
use crate::refs::{RegionRef, ValueRef};

#[crate::ir_dialect(crate = crate)]
mod core {
    /// Top-level container; its body is a symbol table.
    #[symbol]
    fn module() {
        #[symbol_table(body)] {}
    }

    /// Named stand-in registered before the value it refers to exists.
    #[symbol]
    fn forward_ref(#[optional] target: ()) {}

    #[attr(text: String)]
    fn comment() {}

    /// Marks a construct the producer could not lower.
    #[attr(message: String)]
    fn error(#[rest] inputs: ()) {}
}

/// Value a symbol stands for.
///
/// A `core.forward_ref` resolves to its target (`None` while unset); any
/// other symbol resolves to its first result.
pub fn resolve_symbol_value(ctx: &Context, table: RegionRef, name: &str) -> Option<ValueRef> {
    let op = ctx.lookup_symbol(table, name)?;
    match ForwardRef::from_op(ctx, op) {
        Ok(fwd) => fwd.target(ctx),
        Err(_) => ctx.op_results(op).first().copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationBuilder;
    use crate::error::{ConversionError, IrError};
    use crate::location::Location;

    #[test]
    fn module_body_is_a_symbol_table() {
        let mut ctx = Context::new();
        let m = module(&mut ctx, Location::UNKNOWN, "story");
        assert_eq!(m.sym_name(&ctx), "story");

        let body = m.body(&ctx);
        assert!(ctx.is_symbol_table(body));
        assert_eq!(ctx.region_blocks(body).len(), 1);
        assert_eq!(ctx.op_region(m.op_ref(), "body"), Some(body));

        let inner = module(&mut ctx, Location::UNKNOWN, "chapter1");
        ctx.add_symbol(body, inner.op_ref()).unwrap();
        assert_eq!(ctx.lookup_symbol(body, "chapter1"), Some(inner.op_ref()));
    }

    #[test]
    fn forward_ref_resolves_after_set_target() {
        let mut ctx = Context::new();
        let m = module(&mut ctx, Location::UNKNOWN, "story");
        let table = m.body(&ctx);

        let fwd = forward_ref(&mut ctx, Location::UNKNOWN, "hero_name", None);
        ctx.add_symbol(table, fwd.op_ref()).unwrap();
        assert_eq!(resolve_symbol_value(&ctx, table, "hero_name"), None);

        let value = ctx.string_literal("Alice");
        fwd.set_target(&mut ctx, Some(value));
        assert_eq!(resolve_symbol_value(&ctx, table, "hero_name"), Some(value));
        assert_eq!(ctx.uses(value).len(), 1);

        fwd.set_target(&mut ctx, None);
        assert!(!ctx.has_uses(value));
        assert_eq!(resolve_symbol_value(&ctx, table, "missing"), None);
    }

    #[test]
    fn resolve_plain_symbol_uses_first_result() {
        let mut ctx = Context::new();
        let m = module(&mut ctx, Location::UNKNOWN, "story");
        let table = m.body(&ctx);
        let ty = ctx.int_type();
        let op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "vn", "variable")
                .sym_name("counter")
                .result("result", ty),
        );
        ctx.add_symbol(table, op).unwrap();
        assert_eq!(
            resolve_symbol_value(&ctx, table, "counter"),
            Some(ctx.op_result(op, 0))
        );
    }

    #[test]
    fn set_sym_name_goes_through_the_table() {
        let mut ctx = Context::new();
        let m = module(&mut ctx, Location::UNKNOWN, "story");
        let table = m.body(&ctx);
        let a = forward_ref(&mut ctx, Location::UNKNOWN, "a", None);
        let b = forward_ref(&mut ctx, Location::UNKNOWN, "b", None);
        ctx.add_symbol(table, a.op_ref()).unwrap();
        ctx.add_symbol(table, b.op_ref()).unwrap();

        assert!(matches!(
            b.set_sym_name(&mut ctx, "a"),
            Err(IrError::DuplicateSymbol { .. })
        ));
        b.set_sym_name(&mut ctx, "c").unwrap();
        assert_eq!(ctx.lookup_symbol(table, "c"), Some(b.op_ref()));
    }

    #[test]
    fn dialect_enum_dispatch() {
        let mut ctx = Context::new();
        let c = comment(&mut ctx, Location::UNKNOWN, "TODO: art".to_owned());
        let v = ctx.int_literal(1);
        let e = error(&mut ctx, Location::UNKNOWN, [v], "unsupported".to_owned());

        assert_eq!(c.text(&ctx), "TODO: art");
        assert_eq!(e.inputs(&ctx), &[v]);
        assert_eq!(e.message(&ctx), "unsupported");

        match CoreOp::from_op(&ctx, c.op_ref()).unwrap() {
            CoreOp::Comment(op) => assert_eq!(op, c),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(CoreOp::from_op(&ctx, e.op_ref()).unwrap().op_ref(), e.op_ref());
    }

    #[test]
    fn from_op_rejects_other_ops() {
        let mut ctx = Context::new();
        let c = comment(&mut ctx, Location::UNKNOWN, "note".to_owned());
        let err = Module::from_op(&ctx, c.op_ref()).unwrap_err();
        assert_eq!(
            err,
            ConversionError::WrongOperation {
                expected: "core.module",
                actual: "core.comment".into(),
            }
        );

        let foreign = ctx.create_op(OperationBuilder::new(Location::UNKNOWN, "vn", "say"));
        assert!(CoreOp::from_op(&ctx, foreign).is_err());
        assert!(!Comment::matches(&ctx, foreign));
        assert!(Comment::matches(&ctx, c.op_ref()));
    }
}
