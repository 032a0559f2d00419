//! Symbol tables.
//!
//! A symbol-table region has exactly one block whose ops are the table's
//! symbols, in insertion order, plus a name index kept in sync by every
//! mutator. Ops only enter a symbol table through [`Context::add_symbol`].

use crate::context::{Context, RegionKind, SymbolIndex};
use crate::error::IrError;
use crate::refs::{OpRef, RegionRef};

impl Context {
    #[track_caller]
    fn symbol_index(&self, table: RegionRef) -> &SymbolIndex {
        self.check_region(table);
        match self.regions[table.key()].symbols.as_ref() {
            Some(index) => index,
            None => panic!("{table} is not a symbol table"),
        }
    }

    fn table_block(&self, table: RegionRef) -> crate::refs::BlockRef {
        self.regions[table.key()].blocks[0]
    }

    /// Register a detached op as a symbol of `table`.
    ///
    /// An op without a name gets a fresh `anon<N>` name. On a name clash the
    /// table is left unchanged and [`IrError::DuplicateSymbol`] is returned.
    ///
    /// # Panics
    ///
    /// Panics if `table` is not a symbol table, if `op` already has an owner,
    /// or if `table` lies inside `op`.
    #[track_caller]
    pub fn add_symbol(&mut self, table: RegionRef, op: OpRef) -> Result<(), IrError> {
        self.symbol_index(table);
        self.check_op(op);
        if let Some(existing) = self.ops[op.key()].parent_block {
            panic!("add_symbol: {op} already belongs to {existing}; detach it first");
        }
        assert!(
            !self.encloses(op, self.table_block(table)),
            "add_symbol: {op} cannot be placed inside its own subtree"
        );

        let name = match self.ops[op.key()].sym_name.clone() {
            Some(name) => name,
            None => self.fresh_anonymous_name(table),
        };
        let index = self.symbol_index(table);
        if index.lookup.contains_key(&name) {
            return Err(IrError::DuplicateSymbol { name, table });
        }

        let block = self.table_block(table);
        self.ops[op.key()].sym_name = Some(name.clone());
        self.ops[op.key()].parent_block = Some(block);
        self.blocks[block.key()].ops.push(op);
        if let Some(index) = self.regions[table.key()].symbols.as_mut() {
            index.lookup.insert(name.clone(), op);
        }
        tracing::debug!(%table, %op, symbol = %name, "symbol added");
        Ok(())
    }

    fn fresh_anonymous_name(&mut self, table: RegionRef) -> String {
        let Some(index) = self.regions[table.key()].symbols.as_mut() else {
            unreachable!("checked by symbol_index");
        };
        loop {
            let candidate = format!("anon{}", index.next_anon);
            index.next_anon += 1;
            if !index.lookup.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn lookup_symbol(&self, table: RegionRef, name: &str) -> Option<OpRef> {
        self.symbol_index(table).lookup.get(name).copied()
    }

    /// Like [`lookup_symbol`](Self::lookup_symbol) for names that must exist.
    ///
    /// # Panics
    ///
    /// Panics if the symbol is not found.
    #[track_caller]
    pub fn symbol(&self, table: RegionRef, name: &str) -> OpRef {
        match self.lookup_symbol(table, name) {
            Some(op) => op,
            None => panic!("symbol `{name}` not found in {table}"),
        }
    }

    /// Symbols of `table` in insertion order.
    pub fn symbols(&self, table: RegionRef) -> impl Iterator<Item = OpRef> + '_ {
        self.symbol_index(table);
        self.blocks[self.table_block(table).key()].ops.iter().copied()
    }

    pub fn symbol_count(&self, table: RegionRef) -> usize {
        self.symbol_index(table).lookup.len()
    }

    /// Symbol table `op` is registered in, if any.
    pub fn owning_symbol_table(&self, op: OpRef) -> Option<RegionRef> {
        self.parent_block(op).and_then(|b| self.symbol_table_of(b))
    }

    /// Rename a registered symbol, keeping the table's index and order.
    ///
    /// Fails with [`IrError::SymbolNotFound`] if `op` is not in a symbol
    /// table, and with [`IrError::DuplicateSymbol`] if `new_name` is taken by
    /// another symbol; the table is unchanged on failure.
    pub fn rename_symbol(&mut self, op: OpRef, new_name: &str) -> Result<(), IrError> {
        self.check_op(op);
        let old_name = self.ops[op.key()].sym_name.clone().unwrap_or_default();
        let Some(table) = self.owning_symbol_table(op) else {
            return Err(IrError::SymbolNotFound { name: old_name });
        };
        if old_name == new_name {
            return Ok(());
        }
        if self.symbol_index(table).lookup.contains_key(new_name) {
            return Err(IrError::DuplicateSymbol {
                name: new_name.to_owned(),
                table,
            });
        }

        if let Some(index) = self.regions[table.key()].symbols.as_mut() {
            index.lookup.remove(&old_name);
            index.lookup.insert(new_name.to_owned(), op);
        }
        self.ops[op.key()].sym_name = Some(new_name.to_owned());
        tracing::debug!(%table, %op, from = %old_name, to = new_name, "symbol renamed");
        Ok(())
    }

    /// Rename an op, going through [`rename_symbol`](Self::rename_symbol)
    /// when it is registered in a symbol table.
    pub fn set_sym_name(&mut self, op: OpRef, name: &str) -> Result<(), IrError> {
        self.check_op(op);
        if self.owning_symbol_table(op).is_some() {
            return self.rename_symbol(op, name);
        }
        self.ops[op.key()].sym_name = Some(name.to_owned());
        Ok(())
    }

    pub fn is_symbol_table(&self, region: RegionRef) -> bool {
        self.region_kind(region) == RegionKind::SymbolTable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationBuilder;
    use crate::location::Location;

    fn table(ctx: &mut Context) -> RegionRef {
        let op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "module").symbol_table("symbols"),
        );
        ctx.op_region(op, "symbols").unwrap()
    }

    fn named(ctx: &mut Context, name: Option<&str>) -> OpRef {
        let mut builder = OperationBuilder::new(Location::UNKNOWN, "test", "scene");
        if let Some(name) = name {
            builder = builder.sym_name(name);
        }
        ctx.create_op(builder)
    }

    #[test]
    fn add_and_lookup() {
        let mut ctx = Context::new();
        let t = table(&mut ctx);
        let a = named(&mut ctx, Some("intro"));
        let b = named(&mut ctx, Some("ending"));
        ctx.add_symbol(t, a).unwrap();
        ctx.add_symbol(t, b).unwrap();

        assert_eq!(ctx.lookup_symbol(t, "intro"), Some(a));
        assert_eq!(ctx.symbol(t, "ending"), b);
        assert_eq!(ctx.lookup_symbol(t, "missing"), None);
        assert_eq!(ctx.symbols(t).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(ctx.symbol_count(t), 2);
        assert_eq!(ctx.owning_symbol_table(a), Some(t));
        assert!(ctx.is_symbol_table(t));
    }

    #[test]
    fn duplicate_leaves_table_unchanged() {
        let mut ctx = Context::new();
        let t = table(&mut ctx);
        let a = named(&mut ctx, Some("intro"));
        let b = named(&mut ctx, Some("intro"));
        ctx.add_symbol(t, a).unwrap();

        let err = ctx.add_symbol(t, b).unwrap_err();
        assert_eq!(
            err,
            IrError::DuplicateSymbol {
                name: "intro".into(),
                table: t
            }
        );
        assert_eq!(ctx.symbol_count(t), 1);
        assert_eq!(ctx.symbols(t).collect::<Vec<_>>(), vec![a]);
        assert_eq!(ctx.parent_block(b), None);
    }

    #[test]
    fn anonymous_symbols_get_fresh_names() {
        let mut ctx = Context::new();
        let t = table(&mut ctx);
        let taken = named(&mut ctx, Some("anon0"));
        ctx.add_symbol(t, taken).unwrap();
        let a = named(&mut ctx, None);
        let b = named(&mut ctx, None);
        ctx.add_symbol(t, a).unwrap();
        ctx.add_symbol(t, b).unwrap();
        assert_eq!(ctx.sym_name(a), Some("anon1"));
        assert_eq!(ctx.sym_name(b), Some("anon2"));
    }

    #[test]
    fn rename_keeps_index_in_sync() {
        let mut ctx = Context::new();
        let t = table(&mut ctx);
        let a = named(&mut ctx, Some("intro"));
        let b = named(&mut ctx, Some("ending"));
        ctx.add_symbol(t, a).unwrap();
        ctx.add_symbol(t, b).unwrap();

        ctx.rename_symbol(a, "prologue").unwrap();
        assert_eq!(ctx.lookup_symbol(t, "intro"), None);
        assert_eq!(ctx.lookup_symbol(t, "prologue"), Some(a));
        assert_eq!(ctx.symbols(t).collect::<Vec<_>>(), vec![a, b]);

        assert!(matches!(
            ctx.set_sym_name(a, "ending"),
            Err(IrError::DuplicateSymbol { .. })
        ));
        assert_eq!(ctx.sym_name(a), Some("prologue"));
    }

    #[test]
    fn rename_detached_op_is_not_found() {
        let mut ctx = Context::new();
        let a = named(&mut ctx, Some("loose"));
        assert_eq!(
            ctx.rename_symbol(a, "other"),
            Err(IrError::SymbolNotFound {
                name: "loose".into()
            })
        );
        ctx.set_sym_name(a, "other").unwrap();
        assert_eq!(ctx.sym_name(a), Some("other"));
    }

    #[test]
    fn detach_drops_symbol_from_index() {
        let mut ctx = Context::new();
        let t = table(&mut ctx);
        let a = named(&mut ctx, Some("intro"));
        ctx.add_symbol(t, a).unwrap();
        ctx.detach_op(a);
        assert_eq!(ctx.lookup_symbol(t, "intro"), None);
        assert_eq!(ctx.symbol_count(t), 0);
        ctx.add_symbol(t, a).unwrap();
        assert_eq!(ctx.symbol(t, "intro"), a);
    }

    #[test]
    #[should_panic(expected = "symbol `ghost` not found")]
    fn missing_symbol_panics() {
        let mut ctx = Context::new();
        let t = table(&mut ctx);
        ctx.symbol(t, "ghost");
    }

    #[test]
    #[should_panic(expected = "cannot be placed inside its own subtree")]
    fn add_symbol_into_own_table_panics() {
        let mut ctx = Context::new();
        let module = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "module")
                .sym_name("story")
                .symbol_table("symbols"),
        );
        let t = ctx.op_region(module, "symbols").unwrap();
        let _ = ctx.add_symbol(t, module);
    }

    #[test]
    #[should_panic(expected = "cannot be placed inside its own subtree")]
    fn add_symbol_into_descendant_table_panics() {
        let mut ctx = Context::new();
        let outer = table(&mut ctx);
        let outer_op = ctx.parent_op(outer);
        let inner_op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "module")
                .sym_name("chapter")
                .symbol_table("symbols"),
        );
        ctx.add_symbol(outer, inner_op).unwrap();
        let inner = ctx.op_region(inner_op, "symbols").unwrap();
        let _ = ctx.add_symbol(inner, outer_op);
    }

    #[test]
    #[should_panic(expected = "use add_symbol")]
    fn push_into_symbol_table_panics() {
        let mut ctx = Context::new();
        let t = table(&mut ctx);
        let block = ctx.region_entry_block(t).unwrap();
        let a = named(&mut ctx, Some("intro"));
        ctx.push_op(block, a);
    }
}
