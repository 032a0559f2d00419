//! Use-lists stay consistent with operand slots under random edits.

use proptest::prelude::*;
use vnir::validation::validate_use_lists;
use vnir::{Arity, Context, Location, OperandRef, OperationBuilder, Use, ValueRef};

#[derive(Clone, Debug)]
enum Edit {
    Add { operand: usize, value: usize },
    Set { operand: usize, slot: usize, value: usize },
    Clear { operand: usize },
    Replace { from: usize, to: usize },
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (0..3usize, 0..5usize).prop_map(|(operand, value)| Edit::Add { operand, value }),
        3 => (0..3usize, 0..4usize, 0..5usize)
            .prop_map(|(operand, slot, value)| Edit::Set { operand, slot, value }),
        1 => (0..3usize).prop_map(|operand| Edit::Clear { operand }),
        1 => (0..5usize, 0..5usize).prop_map(|(from, to)| Edit::Replace { from, to }),
    ]
}

struct Fixture {
    ctx: Context,
    operands: Vec<OperandRef>,
    values: Vec<ValueRef>,
}

fn fixture() -> Fixture {
    let mut ctx = Context::new();
    let values = (0..5).map(|i| ctx.int_literal(i)).collect();
    let operands = (0..3)
        .map(|i| {
            let op = ctx.create_op(
                OperationBuilder::new(Location::UNKNOWN, "test", "user").operand(
                    format!("input{i}"),
                    Arity::Variadic,
                    [],
                ),
            );
            ctx.op_operands(op)[0]
        })
        .collect();
    Fixture {
        ctx,
        operands,
        values,
    }
}

/// Every slot is mirrored by exactly one use, and every use by its slot.
fn assert_consistent(f: &Fixture) -> Result<(), TestCaseError> {
    let mut expected_uses = 0;
    for &operand in &f.operands {
        for (index, &v) in f.ctx.operand_values(operand).iter().enumerate() {
            let slot = Use {
                operand,
                index: index as u32,
            };
            prop_assert_eq!(f.ctx.uses(v).iter().filter(|u| **u == slot).count(), 1);
            expected_uses += 1;
        }
    }
    let total: usize = f.values.iter().map(|&v| f.ctx.uses(v).len()).sum();
    prop_assert_eq!(total, expected_uses);
    for &v in &f.values {
        for u in f.ctx.uses(v) {
            prop_assert_eq!(f.ctx.operand_get(u.operand, u.index as usize), Some(v));
        }
    }
    prop_assert!(validate_use_lists(&f.ctx).is_ok());
    Ok(())
}

proptest! {
    #[test]
    fn use_lists_match_operands(edits in prop::collection::vec(arb_edit(), 0..64)) {
        let mut f = fixture();
        for edit in edits {
            match edit {
                Edit::Add { operand, value } => {
                    f.ctx.operand_add(f.operands[operand], f.values[value]);
                }
                Edit::Set { operand, slot, value } => {
                    let operand = f.operands[operand];
                    // Out-of-range slots are skipped rather than panicking
                    if slot < f.ctx.operand_len(operand) {
                        f.ctx.operand_set(operand, slot, f.values[value]);
                    }
                }
                Edit::Clear { operand } => f.ctx.operand_clear(f.operands[operand]),
                Edit::Replace { from, to } => {
                    let (from, to) = (f.values[from], f.values[to]);
                    let counts: Vec<usize> =
                        f.operands.iter().map(|&o| f.ctx.operand_len(o)).collect();
                    let moved = if from == to {
                        f.ctx.uses(to).len()
                    } else {
                        f.ctx.uses(from).len() + f.ctx.uses(to).len()
                    };
                    f.ctx.replace_all_uses_with(from, to);
                    if from != to {
                        prop_assert!(f.ctx.uses(from).is_empty());
                    }
                    prop_assert_eq!(f.ctx.uses(to).len(), moved);
                    let after: Vec<usize> =
                        f.operands.iter().map(|&o| f.ctx.operand_len(o)).collect();
                    prop_assert_eq!(counts, after);
                }
            }
            assert_consistent(&f)?;
        }
    }
}
