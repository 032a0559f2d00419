//! End-to-end scenario over the public API: canonical types, a dialect op
//! with literal operands, and replace-all-uses.

use vnir::{Arity, Context, DialectOp, Location, OperationBuilder, Use};

#[vnir::ir_dialect]
mod arith {
    #[result_type(result = Int)]
    fn add(lhs: Int, rhs: Int) -> result {}
}

#[test]
fn test_add_with_literals_and_rauw() {
    let mut ctx = Context::new();

    // Same parameters, same handle
    let int_ty = ctx.int_type();
    assert_eq!(ctx.int_type(), int_ty);

    let op = ctx.create_op(
        OperationBuilder::new(Location::UNKNOWN, "arith", "add")
            .typed_operand("lhs", Arity::Single, int_ty, [])
            .typed_operand("rhs", Arity::Single, int_ty, [])
            .result("result", int_ty),
    );
    let add = Add::from_op(&ctx, op).expect("arith.add");
    assert_eq!(add.result_ty(&ctx), int_ty);

    let three = ctx.int_literal(3);
    let four = ctx.int_literal(4);
    add.set_lhs(&mut ctx, three);
    add.set_rhs(&mut ctx, four);

    let lhs = add.lhs_operand(&ctx);
    assert_eq!(
        ctx.uses(three),
        &[Use {
            operand: lhs,
            index: 0
        }]
    );

    let five = ctx.int_literal(5);
    ctx.replace_all_uses_with(three, five);
    assert_eq!(add.lhs(&ctx), five);
    assert_eq!(add.rhs(&ctx), four);
    assert!(ctx.uses(three).is_empty());
    assert_eq!(ctx.operand_len(lhs), 1);

    // Literals stay canonical after losing their uses
    assert_eq!(ctx.int_literal(3), three);
}

#[test]
fn test_generated_constructor_matches_builder() {
    let mut ctx = Context::new();
    let three = ctx.int_literal(3);
    let four = ctx.int_literal(4);
    let add = add(&mut ctx, Location::UNKNOWN, three, four);

    assert_eq!(add.lhs(&ctx), three);
    assert_eq!(add.rhs(&ctx), four);
    assert_eq!(add.result_ty(&ctx), ctx.int_type());
    assert_eq!(ArithOp::from_op(&ctx, add.op_ref()), Ok(ArithOp::Add(add)));
    assert_eq!(
        vnir::print_op(&ctx, add.op_ref()),
        "%0 = arith.add(lhs: 3, rhs: 4) : core.int\n"
    );
}

#[test]
fn test_rauw_with_itself_is_a_no_op() {
    let mut ctx = Context::new();
    let three = ctx.int_literal(3);
    let four = ctx.int_literal(4);
    let add = add(&mut ctx, Location::UNKNOWN, three, three);
    ctx.replace_all_uses_with(three, three);
    assert_eq!(ctx.uses(three).len(), 2);
    assert_eq!(add.rhs(&ctx), three);
    assert!(!ctx.has_uses(four));
}

#[test]
#[should_panic(expected = "belongs to")]
fn test_handles_do_not_cross_contexts() {
    let mut first = Context::new();
    let mut second = Context::new();
    let three = first.int_literal(3);
    let four = second.int_literal(4);
    add(&mut second, Location::UNKNOWN, three, four);
}
