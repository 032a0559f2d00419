//! Visitor interface over the op tree.
//!
//! Every method defaults to recursing into children, so a visitor overrides
//! only the hooks it cares about. Overrides that still want the nested ops
//! call [`Visitor::visit_children`] (or [`Visitor::visit_block_ops`] /
//! [`Visitor::visit_region_blocks`]) themselves.
//!
//! Per-dialect dispatch is a `match` on the generated `<Dialect>Op` enum
//! inside `visit_op`; ops of dialects the visitor does not know simply fall
//! through to `visit_children`.
//!
//! ```
//! use vnir::{Context, OpRef, Visitor};
//! use vnir::dialect::core::{self, CoreOp};
//!
//! #[derive(Default)]
//! struct CountComments(usize);
//!
//! impl Visitor for CountComments {
//!     fn visit_op(&mut self, ctx: &Context, op: OpRef) {
//!         if let Ok(CoreOp::Comment(_)) = CoreOp::from_op(ctx, op) {
//!             self.0 += 1;
//!         }
//!         self.visit_children(ctx, op);
//!     }
//! }
//!
//! let mut ctx = Context::new();
//! let note = core::comment(&mut ctx, vnir::Location::UNKNOWN, "hi".into());
//! let mut counter = CountComments::default();
//! counter.visit_op(&ctx, note.op_ref());
//! assert_eq!(counter.0, 1);
//! ```

use crate::context::Context;
use crate::refs::{BlockRef, OpRef, RegionRef};
use crate::walk::standalone_blocks;

pub trait Visitor {
    fn visit_op(&mut self, ctx: &Context, op: OpRef) {
        self.visit_children(ctx, op);
    }

    fn visit_region(&mut self, ctx: &Context, region: RegionRef) {
        self.visit_region_blocks(ctx, region);
    }

    fn visit_block(&mut self, ctx: &Context, block: BlockRef) {
        self.visit_block_ops(ctx, block);
    }

    /// Generic fallback: visit the op's regions, then its standalone block
    /// fields.
    fn visit_children(&mut self, ctx: &Context, op: OpRef) {
        for &region in ctx.op_regions(op) {
            self.visit_region(ctx, region);
        }
        for block in standalone_blocks(ctx, op) {
            self.visit_block(ctx, block);
        }
    }

    fn visit_region_blocks(&mut self, ctx: &Context, region: RegionRef) {
        for &block in ctx.region_blocks(region) {
            self.visit_block(ctx, block);
        }
    }

    fn visit_block_ops(&mut self, ctx: &Context, block: BlockRef) {
        for &op in ctx.block_ops(block) {
            self.visit_op(ctx, op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationBuilder;
    use crate::dialect::core::{self, CoreOp};
    use crate::location::Location;

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl Visitor for Trace {
        fn visit_op(&mut self, ctx: &Context, op: OpRef) {
            self.0.push(crate::ops::op_full_name(ctx, op));
            self.visit_children(ctx, op);
        }

        fn visit_region(&mut self, ctx: &Context, region: RegionRef) {
            self.0.push(format!("region {}", ctx.region(region).name));
            self.visit_region_blocks(ctx, region);
        }

        fn visit_block(&mut self, ctx: &Context, block: BlockRef) {
            self.0.push("block".to_owned());
            self.visit_block_ops(ctx, block);
        }
    }

    #[test]
    fn default_methods_visit_in_pre_order() {
        let mut ctx = Context::new();
        let m = core::module(&mut ctx, Location::UNKNOWN, "story");
        let scene = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "vn", "scene")
                .sym_name("intro")
                .region_with_entry("body")
                .block("finally", None),
        );
        ctx.add_symbol(m.body(&ctx), scene).unwrap();
        let body = ctx.op_region(scene, "body").unwrap();
        let entry = ctx.region_entry_block(body).unwrap();
        let say = ctx.create_op(OperationBuilder::new(Location::UNKNOWN, "vn", "say"));
        ctx.push_op(entry, say);
        let finally = ctx.op_block(scene, "finally").unwrap();
        let note = core::comment(&mut ctx, Location::UNKNOWN, "end".into());
        ctx.push_op(finally, note.op_ref());

        let mut trace = Trace::default();
        trace.visit_op(&ctx, m.op_ref());
        assert_eq!(
            trace.0,
            vec![
                "core.module",
                "region body",
                "block",
                "vn.scene",
                "region body",
                "block",
                "vn.say",
                "block",
                "core.comment",
            ]
        );
    }

    #[test]
    fn unknown_ops_fall_back_to_children() {
        #[derive(Default)]
        struct Comments(Vec<String>);

        impl Visitor for Comments {
            fn visit_op(&mut self, ctx: &Context, op: OpRef) {
                match CoreOp::from_op(ctx, op) {
                    Ok(CoreOp::Comment(c)) => self.0.push(c.text(ctx)),
                    _ => self.visit_children(ctx, op),
                }
            }
        }

        let mut ctx = Context::new();
        let outer = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "ui", "frame").region_with_entry("children"),
        );
        let block = ctx
            .region_entry_block(ctx.op_region(outer, "children").unwrap())
            .unwrap();
        let note = core::comment(&mut ctx, Location::UNKNOWN, "inside".into());
        ctx.push_op(block, note.op_ref());

        let mut comments = Comments::default();
        comments.visit_op(&ctx, outer);
        assert_eq!(comments.0, vec!["inside".to_owned()]);
    }
}
