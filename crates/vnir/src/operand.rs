//! Def-use engine.
//!
//! An operand group ([`OperandRef`]) is a named, ordered list of value
//! references owned by one op. Every slot is mirrored by a [`Use`] entry in
//! the referenced value's use-list, and every mutator below keeps the two
//! sides in sync.

use smallvec::SmallVec;

use crate::context::Context;
use crate::refs::{OpRef, OperandRef, TypeRef, ValueDef, ValueRef};
use crate::symbol::Symbol;

/// A single use of a value: which operand group references it, at which slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub operand: OperandRef,
    pub index: u32,
}

/// How many values an operand group holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arity {
    /// Exactly one value once the op is complete.
    Single,
    /// Zero or one value.
    Optional,
    /// Any number of values.
    Variadic,
}

impl Arity {
    pub fn max_len(self) -> Option<usize> {
        match self {
            Arity::Single | Arity::Optional => Some(1),
            Arity::Variadic => None,
        }
    }
}

/// Data for one operand group.
#[derive(Debug)]
#[non_exhaustive]
pub struct OperandData {
    pub name: Symbol,
    pub owner: OpRef,
    pub arity: Arity,
    /// Declared type every referenced value must have.
    pub constraint: Option<TypeRef>,
    pub values: SmallVec<[ValueRef; 2]>,
}

impl Context {
    pub fn operand(&self, operand: OperandRef) -> &OperandData {
        self.check_operand(operand);
        &self.operands[operand.key()]
    }

    pub fn operand_name(&self, operand: OperandRef) -> Symbol {
        self.operand(operand).name
    }

    pub fn operand_owner(&self, operand: OperandRef) -> OpRef {
        self.operand(operand).owner
    }

    pub fn operand_values(&self, operand: OperandRef) -> &[ValueRef] {
        &self.operand(operand).values
    }

    pub fn operand_len(&self, operand: OperandRef) -> usize {
        self.operand(operand).values.len()
    }

    /// Value at `index`, or `None` past the end.
    pub fn operand_get(&self, operand: OperandRef, index: usize) -> Option<ValueRef> {
        self.operand(operand).values.get(index).copied()
    }

    #[track_caller]
    fn check_constraint(&self, operand: OperandRef, value: ValueRef) {
        let data = &self.operands[operand.key()];
        // Placeholders are checked when they are replaced.
        if self.values[value.key()].def == ValueDef::Placeholder {
            return;
        }
        if let Some(expected) = data.constraint {
            let actual = self.values[value.key()].ty;
            assert!(
                actual == expected,
                "{operand} (`{}` of {}) expects {}, got {value} of type {}",
                data.name,
                data.owner,
                self.type_display(expected),
                self.type_display(actual),
            );
        }
    }

    /// Append `value` to an operand group and record the use.
    ///
    /// # Panics
    ///
    /// Panics if the group's arity is already full or if the value's type
    /// violates the group's declared constraint. Placeholders satisfy any
    /// constraint until they are replaced.
    #[track_caller]
    pub fn operand_add(&mut self, operand: OperandRef, value: ValueRef) {
        self.check_operand(operand);
        self.check_value(value);
        let data = &self.operands[operand.key()];
        if let Some(max) = data.arity.max_len() {
            assert!(
                data.values.len() < max,
                "{operand} (`{}` of {}) is full",
                data.name,
                data.owner
            );
        }
        self.check_constraint(operand, value);

        let data = &mut self.operands[operand.key()];
        let index = data.values.len() as u32;
        data.values.push(value);
        self.uses[value.key()].push(Use { operand, index });
        tracing::trace!(%operand, index, %value, "use added");
    }

    /// Point slot `index` at `value`, moving the use-list entry.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range or the type constraint is violated.
    #[track_caller]
    pub fn operand_set(&mut self, operand: OperandRef, index: usize, value: ValueRef) {
        self.check_operand(operand);
        self.check_value(value);
        let len = self.operands[operand.key()].values.len();
        assert!(
            index < len,
            "operand_set: index {index} out of range for {operand} with {len} value(s)"
        );
        let old = self.operands[operand.key()].values[index];
        if old == value {
            return;
        }
        self.check_constraint(operand, value);

        let slot = Use {
            operand,
            index: index as u32,
        };
        self.remove_use(old, slot);
        self.operands[operand.key()].values[index] = value;
        self.uses[value.key()].push(slot);
        tracing::trace!(%operand, index, %old, %value, "use moved");
    }

    /// Drop every value from an operand group.
    pub fn operand_clear(&mut self, operand: OperandRef) {
        self.check_operand(operand);
        let values = std::mem::take(&mut self.operands[operand.key()].values);
        for (index, &value) in values.iter().enumerate() {
            self.remove_use(
                value,
                Use {
                    operand,
                    index: index as u32,
                },
            );
        }
        tracing::trace!(%operand, count = values.len(), "operand cleared");
    }

    fn remove_use(&mut self, value: ValueRef, slot: Use) {
        let uses = &mut self.uses[value.key()];
        if let Some(pos) = uses.iter().position(|u| *u == slot) {
            uses.swap_remove(pos);
        } else {
            debug_assert!(false, "use-list of {value} is missing {slot:?}");
        }
    }

    /// All operand slots currently referencing `value`.
    pub fn uses(&self, value: ValueRef) -> &[Use] {
        self.check_value(value);
        &self.uses[value.key()]
    }

    pub fn has_uses(&self, value: ValueRef) -> bool {
        !self.uses(value).is_empty()
    }

    /// Replace all uses of `old` with `new`.
    ///
    /// Runs in O(#uses of `old`) and leaves `old`'s use-list empty. A no-op
    /// when `old == new`.
    ///
    /// # Panics
    ///
    /// Panics if the two values have different types, unless `old` is a
    /// placeholder, or if `new` violates the constraint of a rewritten
    /// operand group.
    #[track_caller]
    pub fn replace_all_uses_with(&mut self, old: ValueRef, new: ValueRef) {
        self.check_value(old);
        self.check_value(new);
        if old == new {
            return;
        }
        let old_data = &self.values[old.key()];
        let new_ty = self.values[new.key()].ty;
        if old_data.def != ValueDef::Placeholder {
            assert!(
                old_data.ty == new_ty,
                "replace_all_uses_with: {old} has type {}, but {new} has type {}",
                self.type_display(old_data.ty),
                self.type_display(new_ty),
            );
        }
        for u in self.uses[old.key()].iter() {
            self.check_constraint(u.operand, new);
        }

        let old_uses = std::mem::take(&mut self.uses[old.key()]);
        for u in &old_uses {
            let slot = &mut self.operands[u.operand.key()].values[u.index as usize];
            debug_assert_eq!(*slot, old);
            *slot = new;
            self.uses[new.key()].push(*u);
        }
        tracing::debug!(%old, %new, count = old_uses.len(), "replaced all uses");
    }

    /// Create a free-standing value standing in for one that does not exist
    /// yet. Resolve it with [`replace_all_uses_with`](Self::replace_all_uses_with).
    pub fn create_placeholder(&mut self, ty: TypeRef) -> ValueRef {
        self.check_type(ty);
        self.push_value(ValueDef::Placeholder, ty, None)
    }

    /// Destroy a placeholder.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not a placeholder or is still used.
    #[track_caller]
    pub fn erase_placeholder(&mut self, value: ValueRef) {
        self.check_value(value);
        assert!(
            self.values[value.key()].def == ValueDef::Placeholder,
            "erase_placeholder: {value} is not a placeholder"
        );
        let count = self.uses[value.key()].len();
        assert!(
            count == 0,
            "erase_placeholder: {value} still has {count} use(s)"
        );
        self.erased_values.insert(value.key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationBuilder;
    use crate::location::Location;

    fn value_of(ctx: &mut Context, ty: TypeRef) -> ValueRef {
        let op = ctx.create_op(OperationBuilder::new(Location::UNKNOWN, "test", "def").result("result", ty));
        ctx.op_result(op, 0)
    }

    fn user(ctx: &mut Context, arity: Arity, constraint: Option<TypeRef>) -> OperandRef {
        let op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "use").operand_with("input", arity, constraint, []),
        );
        ctx.op_operands(op)[0]
    }

    #[test]
    fn add_set_clear_keep_use_lists_in_sync() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let a = value_of(&mut ctx, int);
        let b = value_of(&mut ctx, int);
        let operand = user(&mut ctx, Arity::Variadic, None);

        ctx.operand_add(operand, a);
        ctx.operand_add(operand, a);
        assert_eq!(ctx.operand_values(operand), &[a, a]);
        assert_eq!(ctx.uses(a).len(), 2);

        ctx.operand_set(operand, 1, b);
        assert_eq!(ctx.operand_values(operand), &[a, b]);
        assert_eq!(ctx.uses(a), &[Use { operand, index: 0 }]);
        assert_eq!(ctx.uses(b), &[Use { operand, index: 1 }]);
        assert_eq!(ctx.operand_get(operand, 1), Some(b));
        assert_eq!(ctx.operand_get(operand, 2), None);

        ctx.operand_clear(operand);
        assert_eq!(ctx.operand_len(operand), 0);
        assert!(!ctx.has_uses(a));
        assert!(!ctx.has_uses(b));
    }

    #[test]
    fn lookup_operand_by_name() {
        let mut ctx = Context::new();
        let operand = user(&mut ctx, Arity::Single, None);
        let owner = ctx.operand_owner(operand);
        assert_eq!(ctx.op_operand(owner, "input"), Some(operand));
        assert_eq!(ctx.op_operand(owner, "missing"), None);
        assert_eq!(ctx.operand_name(operand), "input");
    }

    #[test]
    #[should_panic(expected = "is full")]
    fn single_operand_rejects_second_value() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let a = value_of(&mut ctx, int);
        let operand = user(&mut ctx, Arity::Single, None);
        ctx.operand_add(operand, a);
        ctx.operand_add(operand, a);
    }

    #[test]
    #[should_panic(expected = "expects core.int")]
    fn constraint_is_enforced() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let text = ctx.text_type();
        let t = value_of(&mut ctx, text);
        let operand = user(&mut ctx, Arity::Single, Some(int));
        ctx.operand_add(operand, t);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn set_out_of_range_panics() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let a = value_of(&mut ctx, int);
        let operand = user(&mut ctx, Arity::Variadic, None);
        ctx.operand_set(operand, 0, a);
    }

    #[test]
    fn rauw_moves_every_use() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let old = value_of(&mut ctx, int);
        let new = value_of(&mut ctx, int);
        let first = user(&mut ctx, Arity::Variadic, None);
        let second = user(&mut ctx, Arity::Single, Some(int));
        ctx.operand_add(first, old);
        ctx.operand_add(first, old);
        ctx.operand_add(second, old);

        ctx.replace_all_uses_with(old, new);
        assert!(!ctx.has_uses(old));
        assert_eq!(ctx.uses(new).len(), 3);
        assert_eq!(ctx.operand_values(first), &[new, new]);
        assert_eq!(ctx.operand_values(second), &[new]);
    }

    #[test]
    fn rauw_with_self_is_noop() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let v = value_of(&mut ctx, int);
        let operand = user(&mut ctx, Arity::Single, None);
        ctx.operand_add(operand, v);
        ctx.replace_all_uses_with(v, v);
        assert_eq!(ctx.uses(v), &[Use { operand, index: 0 }]);
    }

    #[test]
    #[should_panic(expected = "has type core.int, but")]
    fn rauw_type_mismatch_panics() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let text = ctx.text_type();
        let a = value_of(&mut ctx, int);
        let b = value_of(&mut ctx, text);
        ctx.replace_all_uses_with(a, b);
    }

    #[test]
    fn placeholder_resolves_across_types() {
        let mut ctx = Context::new();
        let void = ctx.void_type();
        let text = ctx.text_type();
        let placeholder = ctx.create_placeholder(void);
        let operand = user(&mut ctx, Arity::Single, None);
        ctx.operand_add(operand, placeholder);

        let real = value_of(&mut ctx, text);
        ctx.replace_all_uses_with(placeholder, real);
        assert_eq!(ctx.operand_get(operand, 0), Some(real));
        ctx.erase_placeholder(placeholder);
    }

    #[test]
    fn placeholder_fills_constrained_operands_until_replaced() {
        let mut ctx = Context::new();
        let void = ctx.void_type();
        let int = ctx.int_type();
        let text = ctx.text_type();
        let placeholder = ctx.create_placeholder(void);
        let loose = user(&mut ctx, Arity::Single, None);
        let typed = user(&mut ctx, Arity::Single, Some(int));
        ctx.operand_add(loose, placeholder);
        ctx.operand_add(typed, placeholder);
        assert_eq!(ctx.uses(placeholder).len(), 2);

        let real = value_of(&mut ctx, int);
        ctx.replace_all_uses_with(placeholder, real);
        assert_eq!(ctx.operand_get(typed, 0), Some(real));
        assert_eq!(ctx.operand_get(loose, 0), Some(real));
        ctx.erase_placeholder(placeholder);

        let other = ctx.create_placeholder(text);
        ctx.operand_set(typed, 0, other);
        assert_eq!(ctx.uses(other), &[Use { operand: typed, index: 0 }]);
    }

    #[test]
    #[should_panic(expected = "expects core.int")]
    fn resolving_placeholder_still_checks_constraint() {
        let mut ctx = Context::new();
        let void = ctx.void_type();
        let int = ctx.int_type();
        let text = ctx.text_type();
        let placeholder = ctx.create_placeholder(void);
        let typed = user(&mut ctx, Arity::Single, Some(int));
        ctx.operand_add(typed, placeholder);
        let wrong = value_of(&mut ctx, text);
        ctx.replace_all_uses_with(placeholder, wrong);
    }

    #[test]
    #[should_panic(expected = "still has 1 use(s)")]
    fn erase_used_placeholder_panics() {
        let mut ctx = Context::new();
        let void = ctx.void_type();
        let placeholder = ctx.create_placeholder(void);
        let operand = user(&mut ctx, Arity::Single, None);
        ctx.operand_add(operand, placeholder);
        ctx.erase_placeholder(placeholder);
    }
}
