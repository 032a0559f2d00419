//! Structural validation.
//!
//! Every mutator on [`Context`] keeps the graph consistent, so these checks
//! are for tests and for pass checkpoints, where they catch bugs in code
//! that reaches past the public API (importers, raw builders).
//!
//! 1. **Use-lists**: operand slots and use-list entries mirror each other.
//! 2. **Ownership**: parent back-links agree with child lists, and nothing
//!    is reachable twice.
//! 3. **Symbol tables**: the name index matches the table block.
//! 4. **Arity**: single operands hold one value, optional ones at most one.
//! 5. **Scope**: operands reference literals, placeholders or values defined
//!    inside the validated tree.

use std::collections::{HashMap, HashSet};
use std::fmt;

use derive_more::Display;

use crate::context::{BlockOwner, Context, RegionKind};
use crate::operand::{Arity, Use};
use crate::ops::op_full_name;
use crate::refs::{BlockRef, OpRef, RegionRef, ValueDef, ValueRef};
use crate::walk::collect_ops;

// ============================================================================
// Error types
// ============================================================================

/// Which check reported an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum ValidationKind {
    #[display("use-list")]
    UseList,
    #[display("ownership")]
    Ownership,
    #[display("symbol-table")]
    SymbolTable,
    #[display("arity")]
    Arity,
    #[display("scope")]
    Scope,
}

#[derive(Clone, PartialEq, Eq, Display)]
#[display("{kind}: {message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
}

impl fmt::Debug for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Result of validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors reported by one check.
    pub fn errors_of(&self, kind: ValidationKind) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    fn push(&mut self, kind: ValidationKind, message: String) {
        self.errors.push(ValidationError { kind, message });
    }

    fn extend(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "validation passed");
        }
        writeln!(f, "{} error(s) found:", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

/// Describe a value for diagnostic purposes.
fn describe_value(ctx: &Context, v: ValueRef) -> String {
    if ctx.erased_values.contains(v.key()) {
        return format!("erased value {v}");
    }
    match ctx.values[v.key()].def {
        ValueDef::OpResult(op, idx) => match ctx.ops[op.key()].sym_name.as_deref() {
            Some(name) => format!("result #{idx} of {} (@{name})", op_full_name(ctx, op)),
            None => format!("result #{idx} of {}", op_full_name(ctx, op)),
        },
        ValueDef::BlockArg(block, idx) => format!("block arg #{idx} of {block}"),
        ValueDef::Literal(lit) => format!("literal {lit}"),
        ValueDef::Placeholder => format!("placeholder {v}"),
    }
}

// ============================================================================
// Use-lists
// ============================================================================

/// Check every live operand slot against the use-lists, in both directions.
pub fn validate_use_lists(ctx: &Context) -> ValidationResult {
    let mut result = ValidationResult::default();
    let kind = ValidationKind::UseList;

    // Direction 1: operand slot → use-list entry must exist
    for operand in ctx.live_operands() {
        let data = &ctx.operands[operand.key()];
        for (index, &value) in data.values.iter().enumerate() {
            if ctx.erased_values.contains(value.key()) {
                result.push(
                    kind,
                    format!("slot #{index} of {operand} references erased value {value}"),
                );
                continue;
            }
            let entry = Use {
                operand,
                index: index as u32,
            };
            let count = ctx.uses[value.key()].iter().filter(|u| **u == entry).count();
            if count != 1 {
                result.push(
                    kind,
                    format!(
                        "slot #{index} of {operand} (`{}` of {}) uses {value}, but its use-list has {count} matching entries",
                        data.name,
                        op_full_name(ctx, data.owner),
                    ),
                );
            }
        }
    }

    // Direction 2: use-list entry → operand slot must point back
    for value in ctx.live_values() {
        for u in &ctx.uses[value.key()] {
            let points_back = !ctx.erased_operands.contains(u.operand.key())
                && ctx.operands[u.operand.key()].values.get(u.index as usize) == Some(&value);
            if !points_back {
                result.push(
                    kind,
                    format!(
                        "use-list of {value} ({}) claims slot #{} of {}, but that slot does not reference it",
                        describe_value(ctx, value),
                        u.index,
                        u.operand,
                    ),
                );
            }
        }
    }

    result
}

// ============================================================================
// Ownership
// ============================================================================

/// Check parent back-links below `root` and that each op, block and region
/// is reachable exactly once.
pub fn validate_ownership(ctx: &Context, root: OpRef) -> ValidationResult {
    let mut checker = OwnershipChecker {
        ctx,
        result: ValidationResult::default(),
        ops: HashSet::new(),
        blocks: HashSet::new(),
        regions: HashSet::new(),
    };
    checker.op(root);
    checker.result
}

struct OwnershipChecker<'a> {
    ctx: &'a Context,
    result: ValidationResult,
    ops: HashSet<OpRef>,
    blocks: HashSet<BlockRef>,
    regions: HashSet<RegionRef>,
}

impl OwnershipChecker<'_> {
    fn error(&mut self, message: String) {
        self.result.push(ValidationKind::Ownership, message);
    }

    fn op(&mut self, op: OpRef) {
        if !self.ops.insert(op) {
            self.error(format!("{op} is reachable more than once"));
            return;
        }
        let ctx = self.ctx;
        for &region in ctx.op_regions(op) {
            if ctx.region(region).parent_op != op {
                self.error(format!(
                    "{region} is listed by {op} but names {} as its parent",
                    ctx.region(region).parent_op
                ));
            }
            self.region(region);
        }
        for &block in ctx.op_blocks(op) {
            if ctx.block(block).field_of != Some(op) {
                self.error(format!("{block} is a block field of {op} but is not marked as one"));
            }
            match ctx.block(block).owner {
                Some(BlockOwner::Op(owner)) if owner == op => self.block(block),
                Some(BlockOwner::Region(region)) if ctx.region(region).parent_op == op => {}
                other => self.error(format!(
                    "block field {block} of {op} is owned by {}",
                    other.map_or_else(|| "nothing".to_owned(), |o| o.to_string())
                )),
            }
        }
    }

    fn region(&mut self, region: RegionRef) {
        if !self.regions.insert(region) {
            self.error(format!("{region} is reachable more than once"));
            return;
        }
        let ctx = self.ctx;
        for &block in ctx.region_blocks(region) {
            if ctx.block(block).owner != Some(BlockOwner::Region(region)) {
                self.error(format!("{block} is listed by {region} but not owned by it"));
            }
            self.block(block);
        }
    }

    fn block(&mut self, block: BlockRef) {
        if !self.blocks.insert(block) {
            self.error(format!("{block} is reachable more than once"));
            return;
        }
        let ctx = self.ctx;
        for &op in ctx.block_ops(block) {
            if ctx.parent_block(op) != Some(block) {
                self.error(format!("{op} is listed by {block} but not owned by it"));
            }
            self.op(op);
        }
    }
}

// ============================================================================
// Symbol tables
// ============================================================================

/// Check that each symbol table below `root` has one block, unique names,
/// and an index that matches the block contents.
pub fn validate_symbol_tables(ctx: &Context, root: OpRef) -> ValidationResult {
    let mut result = ValidationResult::default();
    let kind = ValidationKind::SymbolTable;

    for op in collect_ops(ctx, root) {
        for &table in ctx.op_regions(op) {
            if ctx.region_kind(table) != RegionKind::SymbolTable {
                continue;
            }
            let blocks = ctx.region_blocks(table);
            if blocks.len() != 1 {
                result.push(kind, format!("{table} has {} blocks", blocks.len()));
                continue;
            }
            let Some(index) = ctx.region(table).symbols.as_ref() else {
                result.push(kind, format!("{table} has no name index"));
                continue;
            };

            let mut names: HashMap<&str, OpRef> = HashMap::new();
            for &symbol in ctx.block_ops(blocks[0]) {
                let Some(name) = ctx.sym_name(symbol) else {
                    result.push(kind, format!("{symbol} in {table} has no name"));
                    continue;
                };
                if let Some(first) = names.insert(name, symbol) {
                    result.push(
                        kind,
                        format!("`{name}` is defined twice in {table} ({first} and {symbol})"),
                    );
                }
                if index.lookup.get(name) != Some(&symbol) {
                    result.push(kind, format!("index of {table} does not map `{name}` to {symbol}"));
                }
            }
            if index.lookup.len() != names.len() {
                result.push(
                    kind,
                    format!(
                        "index of {table} has {} entries, but the table holds {} symbols",
                        index.lookup.len(),
                        names.len()
                    ),
                );
            }
        }
    }

    result
}

// ============================================================================
// Arity
// ============================================================================

/// Check operand group sizes and declared type constraints below `root`.
pub fn validate_arity(ctx: &Context, root: OpRef) -> ValidationResult {
    let mut result = ValidationResult::default();
    let kind = ValidationKind::Arity;

    for op in collect_ops(ctx, root) {
        for &operand in ctx.op_operands(op) {
            let data = ctx.operand(operand);
            let len = data.values.len();
            let bad_len = match data.arity {
                Arity::Single => len != 1,
                Arity::Optional => len > 1,
                Arity::Variadic => false,
            };
            if bad_len {
                result.push(
                    kind,
                    format!(
                        "`{}` of {} ({op}) is {:?} but holds {len} value(s)",
                        data.name,
                        op_full_name(ctx, op),
                        data.arity
                    ),
                );
            }
            if let Some(expected) = data.constraint {
                for &v in &data.values {
                    if ctx.value_def(v) == ValueDef::Placeholder {
                        continue;
                    }
                    if ctx.value_ty(v) != expected {
                        result.push(
                            kind,
                            format!(
                                "`{}` of {} ({op}) expects {}, got {}",
                                data.name,
                                op_full_name(ctx, op),
                                ctx.type_display(expected),
                                ctx.type_display(ctx.value_ty(v)),
                            ),
                        );
                    }
                }
            }
        }
    }

    result
}

// ============================================================================
// Scope
// ============================================================================

/// Check that every operand below `root` references a literal, a
/// placeholder, or a value defined inside the tree.
pub fn validate_scope(ctx: &Context, root: OpRef) -> ValidationResult {
    let mut result = ValidationResult::default();
    let ops = collect_ops(ctx, root);

    let mut defined: HashSet<ValueRef> = HashSet::new();
    for &op in &ops {
        defined.extend(ctx.op_results(op).iter().copied());
        for &region in ctx.op_regions(op) {
            for &block in ctx.region_blocks(region) {
                defined.extend(ctx.block_args(block).iter().copied());
            }
        }
        for &block in ctx.op_blocks(op) {
            defined.extend(ctx.block_args(block).iter().copied());
        }
    }

    for &op in &ops {
        for &operand in ctx.op_operands(op) {
            for (i, &v) in ctx.operand_values(operand).iter().enumerate() {
                if ctx.erased_values.contains(v.key()) {
                    continue;
                }
                let in_scope = match ctx.value_def(v) {
                    ValueDef::Literal(_) | ValueDef::Placeholder => true,
                    ValueDef::OpResult(..) | ValueDef::BlockArg(..) => defined.contains(&v),
                };
                if !in_scope {
                    result.push(
                        ValidationKind::Scope,
                        format!(
                            "slot #{i} of `{}` in {} ({op}) references {}, defined outside the tree",
                            ctx.operand_name(operand),
                            op_full_name(ctx, op),
                            describe_value(ctx, v),
                        ),
                    );
                }
            }
        }
    }

    result
}

// ============================================================================
// Combined
// ============================================================================

/// Run every check and combine the results.
pub fn validate_all(ctx: &Context, root: OpRef) -> ValidationResult {
    let mut result = validate_use_lists(ctx);
    result.extend(validate_ownership(ctx, root));
    result.extend(validate_symbol_tables(ctx, root));
    result.extend(validate_arity(ctx, root));
    result.extend(validate_scope(ctx, root));
    result
}

/// Debug-only validation that panics on any error.
///
/// Only runs under `cfg!(debug_assertions)`. Useful for checkpoints after
/// IR transformation passes.
pub fn debug_assert_valid(ctx: &Context, root: OpRef, pass_name: &str) {
    if !cfg!(debug_assertions) {
        return;
    }
    let result = validate_all(ctx, root);
    if !result.is_ok() {
        panic!("IR validation failed after `{pass_name}`:\n{result}");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationBuilder;
    use crate::dialect::core;
    use crate::location::Location;

    /// `core.module @story { vn.scene @intro { %a = int 1; vn.say(%a) } }`
    fn build_valid_tree(ctx: &mut Context) -> (OpRef, OpRef, ValueRef) {
        let m = core::module(ctx, Location::UNKNOWN, "story");
        let scene = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "vn", "scene")
                .sym_name("intro")
                .region_with_entry("body"),
        );
        ctx.add_symbol(m.body(ctx), scene).unwrap();
        let entry = ctx
            .region_entry_block(ctx.op_region(scene, "body").unwrap())
            .unwrap();

        let int_ty = ctx.int_type();
        let def = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "vn", "const").result("result", int_ty),
        );
        ctx.push_op(entry, def);
        let value = ctx.op_result(def, 0);

        let text = ctx.string_literal("hello");
        let string_ty = ctx.string_type();
        let say = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "vn", "say")
                .operand("count", Arity::Single, [value])
                .typed_operand("text", Arity::Optional, string_ty, [text]),
        );
        ctx.push_op(entry, say);
        (m.op_ref(), say, value)
    }

    #[test]
    fn valid_tree_passes() {
        let mut ctx = Context::new();
        let (root, _, _) = build_valid_tree(&mut ctx);
        let result = validate_all(&ctx, root);
        assert!(result.is_ok(), "valid tree should pass: {result}");
        debug_assert_valid(&ctx, root, "build");
    }

    #[test]
    fn unresolved_placeholder_satisfies_constraints() {
        let mut ctx = Context::new();
        let (root, say, _) = build_valid_tree(&mut ctx);
        let void = ctx.void_type();
        let placeholder = ctx.create_placeholder(void);
        let operand = ctx.op_operand(say, "text").unwrap();
        ctx.operand_set(operand, 0, placeholder);

        let result = validate_all(&ctx, root);
        assert!(result.is_ok(), "{result}");
    }

    #[test]
    fn missing_use_list_entry_detected() {
        let mut ctx = Context::new();
        let (root, _, value) = build_valid_tree(&mut ctx);
        ctx.uses[value.key()].clear();

        let result = validate_all(&ctx, root);
        let errors: Vec<_> = result.errors_of(ValidationKind::UseList).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("0 matching entries"));
    }

    #[test]
    fn stale_use_list_entry_detected() {
        let mut ctx = Context::new();
        let (_, say, value) = build_valid_tree(&mut ctx);
        let operand = ctx.op_operand(say, "count").unwrap();
        ctx.operands[operand.key()].values.clear();

        let result = validate_use_lists(&ctx);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains(&value.to_string()));
        assert!(result.errors[0].message.contains("does not reference it"));
    }

    #[test]
    fn broken_parent_link_detected() {
        let mut ctx = Context::new();
        let (root, say, _) = build_valid_tree(&mut ctx);
        ctx.ops[say.key()].parent_block = None;

        let result = validate_ownership(&ctx, root);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("not owned by it"));
    }

    #[test]
    fn op_listed_twice_detected() {
        let mut ctx = Context::new();
        let (root, say, _) = build_valid_tree(&mut ctx);
        let block = ctx.parent_block(say).unwrap();
        ctx.blocks[block.key()].ops.push(say);

        let result = validate_ownership(&ctx, root);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.message.contains("reachable more than once"))
        );
    }

    #[test]
    fn stale_symbol_index_detected() {
        let mut ctx = Context::new();
        let (root, _, _) = build_valid_tree(&mut ctx);
        let table = ctx.op_region(root, "body").unwrap();
        if let Some(index) = ctx.regions[table.key()].symbols.as_mut() {
            index.lookup.clear();
        }

        let result = validate_symbol_tables(&ctx, root);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].message.contains("does not map `intro`"));
        assert!(result.errors[1].message.contains("0 entries"));
    }

    #[test]
    fn empty_single_operand_detected() {
        let mut ctx = Context::new();
        let (root, say, value) = build_valid_tree(&mut ctx);
        let operand = ctx.op_operand(say, "count").unwrap();
        ctx.operand_clear(operand);
        assert!(!ctx.has_uses(value));

        let result = validate_all(&ctx, root);
        let errors: Vec<_> = result.errors_of(ValidationKind::Arity).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("`count` of vn.say"));
        assert!(errors[0].message.contains("holds 0 value(s)"));
    }

    #[test]
    fn value_from_outside_tree_detected() {
        let mut ctx = Context::new();
        let (root, say, _) = build_valid_tree(&mut ctx);
        let int_ty = ctx.int_type();
        let outsider = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "vn", "const").result("result", int_ty),
        );
        let stale = ctx.op_result(outsider, 0);
        let operand = ctx.op_operand(say, "count").unwrap();
        ctx.operand_set(operand, 0, stale);

        let result = validate_scope(&ctx, root);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("result #0 of vn.const"));

        let placeholder = ctx.create_placeholder(int_ty);
        ctx.operand_set(operand, 0, placeholder);
        assert!(validate_scope(&ctx, root).is_ok());
    }

    #[test]
    #[should_panic(expected = "IR validation failed after `broken-pass`")]
    #[cfg(debug_assertions)]
    fn debug_assert_valid_panics() {
        let mut ctx = Context::new();
        let (root, _, value) = build_valid_tree(&mut ctx);
        ctx.uses[value.key()].clear();
        debug_assert_valid(&ctx, root, "broken-pass");
    }
}
