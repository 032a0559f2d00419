//! Recursive operation traversal.
//!
//! Walks are depth-first pre-order: an op, then each of its regions' blocks
//! in order, then its standalone block fields.

use std::ops::ControlFlow;

use crate::context::{BlockOwner, Context};
use crate::ops::DialectOp;
use crate::refs::{BlockRef, OpRef, RegionRef};

/// Controls whether to descend into children during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Continue walking and descend into nested regions.
    Advance,
    /// Skip the children of the current operation.
    Skip,
}

/// Walk all operations in a region recursively.
pub fn walk_region<B>(
    ctx: &Context,
    region: RegionRef,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for &block in ctx.region_blocks(region) {
        walk_block(ctx, block, f)?;
    }
    ControlFlow::Continue(())
}

/// Walk all operations in a block recursively.
pub fn walk_block<B>(
    ctx: &Context,
    block: BlockRef,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for &op in ctx.block_ops(block) {
        walk_op(ctx, op, f)?;
    }
    ControlFlow::Continue(())
}

/// Walk an operation and everything nested in it.
pub fn walk_op<B>(
    ctx: &Context,
    op: OpRef,
    f: &mut dyn FnMut(OpRef) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    match f(op) {
        ControlFlow::Break(b) => return ControlFlow::Break(b),
        ControlFlow::Continue(WalkAction::Skip) => return ControlFlow::Continue(()),
        ControlFlow::Continue(WalkAction::Advance) => {}
    }
    for &region in ctx.op_regions(op) {
        walk_region(ctx, region, f)?;
    }
    for block in standalone_blocks(ctx, op) {
        walk_block(ctx, block, f)?;
    }
    ControlFlow::Continue(())
}

/// Block fields of `op` that are not placed in one of its regions.
pub fn standalone_blocks(ctx: &Context, op: OpRef) -> impl Iterator<Item = BlockRef> + '_ {
    ctx.op_blocks(op)
        .iter()
        .copied()
        .filter(move |&b| matches!(ctx.block(b).owner, Some(BlockOwner::Op(_))))
}

/// Walk operations of a specific dialect type in a region.
pub fn walk_typed<T, B>(
    ctx: &Context,
    region: RegionRef,
    f: &mut dyn FnMut(T) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()>
where
    T: DialectOp,
{
    walk_region(ctx, region, &mut |op| {
        if let Ok(typed) = T::from_op(ctx, op) {
            f(typed)
        } else {
            ControlFlow::Continue(WalkAction::Advance)
        }
    })
}

/// All ops nested in `root`, including `root`, in pre-order.
pub fn collect_ops(ctx: &Context, root: OpRef) -> Vec<OpRef> {
    let mut ops = Vec::new();
    let _ = walk_op::<()>(ctx, root, &mut |op| {
        ops.push(op);
        ControlFlow::Continue(WalkAction::Advance)
    });
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationBuilder;
    use crate::dialect::core;
    use crate::location::Location;

    fn leaf(ctx: &mut Context, name: &'static str) -> OpRef {
        ctx.create_op(OperationBuilder::new(Location::UNKNOWN, "test", name))
    }

    fn container(ctx: &mut Context) -> (OpRef, BlockRef) {
        let op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "container").region_with_entry("body"),
        );
        let region = ctx.op_region(op, "body").unwrap();
        let block = ctx.region_entry_block(region).unwrap();
        (op, block)
    }

    #[test]
    fn walk_region_finds_all_ops() {
        let mut ctx = Context::new();
        let (outer, block) = container(&mut ctx);
        let a = leaf(&mut ctx, "a");
        let b = leaf(&mut ctx, "b");
        ctx.push_op(block, a);
        ctx.push_op(block, b);

        let region = ctx.op_region(outer, "body").unwrap();
        let mut count = 0;
        let _ = walk_region::<()>(&ctx, region, &mut |_op| {
            count += 1;
            ControlFlow::Continue(WalkAction::Advance)
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn walk_with_early_exit() {
        let mut ctx = Context::new();
        let (outer, block) = container(&mut ctx);
        let a = leaf(&mut ctx, "a");
        let b = leaf(&mut ctx, "b");
        ctx.push_op(block, a);
        ctx.push_op(block, b);

        let mut visited = 0;
        let result = walk_op::<OpRef>(&ctx, outer, &mut |op| {
            visited += 1;
            if op == a {
                ControlFlow::Break(op)
            } else {
                ControlFlow::Continue(WalkAction::Advance)
            }
        });

        assert_eq!(result, ControlFlow::Break(a));
        assert_eq!(visited, 2);
    }

    #[test]
    fn walk_skip_nested_regions() {
        let mut ctx = Context::new();
        let (outer, outer_block) = container(&mut ctx);
        let (inner, inner_block) = container(&mut ctx);
        let deep = leaf(&mut ctx, "deep");
        let sibling = leaf(&mut ctx, "sibling");
        ctx.push_op(inner_block, deep);
        ctx.push_op(outer_block, inner);
        ctx.push_op(outer_block, sibling);

        let mut seen = Vec::new();
        let _ = walk_op::<()>(&ctx, outer, &mut |op| {
            seen.push(op);
            if op == inner {
                ControlFlow::Continue(WalkAction::Skip)
            } else {
                ControlFlow::Continue(WalkAction::Advance)
            }
        });
        assert_eq!(seen, vec![outer, inner, sibling]);
        assert_eq!(collect_ops(&ctx, outer), vec![outer, inner, deep, sibling]);
    }

    #[test]
    fn walk_visits_standalone_block_fields_after_regions() {
        let mut ctx = Context::new();
        let op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "scene")
                .region_with_entry("body")
                .block("placed", Some("body".into()))
                .block("standalone", None),
        );
        let body = ctx.op_region(op, "body").unwrap();
        let entry = ctx.region_entry_block(body).unwrap();
        let placed = ctx.op_block(op, "placed").unwrap();
        let standalone = ctx.op_block(op, "standalone").unwrap();

        let in_entry = leaf(&mut ctx, "in_entry");
        let in_placed = leaf(&mut ctx, "in_placed");
        let in_standalone = leaf(&mut ctx, "in_standalone");
        ctx.push_op(entry, in_entry);
        ctx.push_op(placed, in_placed);
        ctx.push_op(standalone, in_standalone);

        assert_eq!(standalone_blocks(&ctx, op).collect::<Vec<_>>(), vec![standalone]);
        assert_eq!(
            collect_ops(&ctx, op),
            vec![op, in_entry, in_placed, in_standalone]
        );
    }

    #[test]
    fn walk_typed_filters_by_op() {
        let mut ctx = Context::new();
        let m = core::module(&mut ctx, Location::UNKNOWN, "story");
        let table = m.body(&ctx);
        let inner = core::module(&mut ctx, Location::UNKNOWN, "chapter");
        ctx.add_symbol(table, inner.op_ref()).unwrap();
        let fwd = core::forward_ref(&mut ctx, Location::UNKNOWN, "x", None);
        ctx.add_symbol(inner.body(&ctx), fwd.op_ref()).unwrap();

        let mut names = Vec::new();
        let _ = walk_typed::<core::ForwardRef, ()>(&ctx, table, &mut |fwd| {
            names.push(fwd.sym_name(&ctx).to_owned());
            ControlFlow::Continue(WalkAction::Advance)
        });
        assert_eq!(names, vec!["x".to_owned()]);
    }
}
