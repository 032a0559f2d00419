//! Context: arena-based mutable IR storage.
//!
//! All IR entities (operations, values, blocks, regions, operand groups) are
//! stored in `PrimaryMap`s owned by [`Context`], together with the type,
//! literal and file canonicalization tables. Erased entities are tombstoned
//! rather than removed, so stale handles fail loudly instead of aliasing a
//! newer entity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use cranelift_entity::{EntityRef, EntitySet, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::literal::LiteralTable;
use crate::location::{FileTable, Location, SourcePos};
use crate::operand::{Arity, Use};
use crate::refs::*;
use crate::symbol::Symbol;
use crate::types::{Attribute, TypeTable};

// ============================================================================
// Entity data types
// ============================================================================

/// Data for a single operation.
#[derive(Debug)]
#[non_exhaustive]
pub struct OperationData {
    pub location: Location,
    pub dialect: Symbol,
    pub name: Symbol,
    /// Instance name; mandatory for ops registered in a symbol table.
    pub sym_name: Option<String>,
    pub operands: SmallVec<[OperandRef; 4]>,
    pub results: SmallVec<[ValueRef; 2]>,
    pub regions: SmallVec<[RegionRef; 2]>,
    /// Declared block fields, in declaration order.
    pub blocks: SmallVec<[BlockRef; 2]>,
    pub attributes: BTreeMap<Symbol, Attribute>,
    pub parent_block: Option<BlockRef>,
}

/// Data for a single value.
#[derive(Debug)]
#[non_exhaustive]
pub struct ValueData {
    pub def: ValueDef,
    pub ty: TypeRef,
    pub name: Option<Symbol>,
}

/// Who owns a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOwner {
    Region(RegionRef),
    /// A block field declared directly on an operation.
    Op(OpRef),
}

/// Data for a block.
#[derive(Debug)]
#[non_exhaustive]
pub struct BlockData {
    pub name: Option<Symbol>,
    pub args: SmallVec<[ValueRef; 2]>,
    pub ops: Vec<OpRef>,
    pub owner: Option<BlockOwner>,
    /// Set when the block is a declared field of an operation. Such blocks
    /// live and die with that operation.
    pub field_of: Option<OpRef>,
}

/// Whether a region is an ordinary block list or a symbol table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Plain,
    SymbolTable,
}

/// Data for a region.
#[derive(Debug)]
#[non_exhaustive]
pub struct RegionData {
    pub name: Symbol,
    pub kind: RegionKind,
    pub blocks: SmallVec<[BlockRef; 2]>,
    pub parent_op: OpRef,
    pub(crate) symbols: Option<SymbolIndex>,
}

/// Name index of a symbol-table region.
#[derive(Debug, Default)]
pub(crate) struct SymbolIndex {
    pub(crate) lookup: HashMap<String, OpRef>,
    pub(crate) next_anon: u32,
}

// ============================================================================
// Context
// ============================================================================

/// Owns every IR entity of one compilation.
///
/// Mutation requires `&mut Context`; read-only traversals take `&Context`.
/// Use-lists are maintained automatically by every mutator.
#[derive(Debug)]
pub struct Context {
    id: ContextId,

    pub(crate) ops: PrimaryMap<OpKey, OperationData>,
    pub(crate) values: PrimaryMap<ValueKey, ValueData>,
    pub(crate) blocks: PrimaryMap<BlockKey, BlockData>,
    pub(crate) regions: PrimaryMap<RegionKey, RegionData>,
    pub(crate) operands: PrimaryMap<OperandKey, crate::operand::OperandData>,

    /// Use-list: for each value, the operand slots referencing it.
    pub(crate) uses: SecondaryMap<ValueKey, SmallVec<[Use; 2]>>,

    pub(crate) erased_ops: EntitySet<OpKey>,
    pub(crate) erased_values: EntitySet<ValueKey>,
    pub(crate) erased_blocks: EntitySet<BlockKey>,
    pub(crate) erased_regions: EntitySet<RegionKey>,
    pub(crate) erased_operands: EntitySet<OperandKey>,

    pub(crate) types: TypeTable,
    pub(crate) literals: LiteralTable,
    pub(crate) files: FileTable,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: ContextId::fresh(),
            ops: PrimaryMap::new(),
            values: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            regions: PrimaryMap::new(),
            operands: PrimaryMap::new(),
            uses: SecondaryMap::new(),
            erased_ops: EntitySet::new(),
            erased_values: EntitySet::new(),
            erased_blocks: EntitySet::new(),
            erased_regions: EntitySet::new(),
            erased_operands: EntitySet::new(),
            types: TypeTable::default(),
            literals: LiteralTable::default(),
            files: FileTable::default(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    // ========================================================================
    // Handle checks
    // ========================================================================

    #[track_caller]
    fn check_context(&self, handle: impl fmt::Display, owner: ContextId) {
        assert!(
            owner == self.id,
            "{handle} belongs to {owner}, not {}",
            self.id
        );
    }

    #[track_caller]
    pub(crate) fn check_op(&self, op: OpRef) {
        self.check_context(op, op.context_id());
        assert!(!self.erased_ops.contains(op.key()), "{op} has been erased");
    }

    #[track_caller]
    pub(crate) fn check_value(&self, v: ValueRef) {
        self.check_context(v, v.context_id());
        assert!(!self.erased_values.contains(v.key()), "{v} has been erased");
    }

    #[track_caller]
    pub(crate) fn check_block(&self, b: BlockRef) {
        self.check_context(b, b.context_id());
        assert!(!self.erased_blocks.contains(b.key()), "{b} has been erased");
    }

    #[track_caller]
    pub(crate) fn check_region(&self, r: RegionRef) {
        self.check_context(r, r.context_id());
        assert!(!self.erased_regions.contains(r.key()), "{r} has been erased");
    }

    #[track_caller]
    pub(crate) fn check_operand(&self, o: OperandRef) {
        self.check_context(o, o.context_id());
        assert!(
            !self.erased_operands.contains(o.key()),
            "{o} has been erased"
        );
    }

    #[track_caller]
    pub(crate) fn check_type(&self, ty: TypeRef) {
        self.check_context(ty, ty.context_id());
    }

    #[track_caller]
    pub(crate) fn check_file(&self, file: FileRef) {
        self.check_context(file, file.context_id());
    }

    // ========================================================================
    // Files and locations
    // ========================================================================

    /// Unique file handle for a path (`DIFile`).
    pub fn di_file(&mut self, path: &str) -> FileRef {
        FileRef::new(self.id, self.files.intern(path))
    }

    /// Location inside a file (`DILocation`).
    pub fn di_location(&self, file: FileRef, page: u32, row: u32, column: u32) -> Location {
        self.check_file(file);
        Location::new(file, SourcePos::new(page, row, column))
    }

    pub fn file_path(&self, file: FileRef) -> &str {
        self.check_file(file);
        self.files.get(file.key())
    }

    /// All files in creation order.
    pub fn files(&self) -> impl Iterator<Item = FileRef> + '_ {
        let id = self.id;
        (0..self.files.len()).map(move |i| FileRef::new(id, FileKey::new(i)))
    }

    // ========================================================================
    // Operation
    // ========================================================================

    /// Create an operation and every field it declares.
    ///
    /// Operand groups are filled with the builder's initial values (use-lists
    /// included), results are allocated, regions get their entry block when
    /// requested, symbol tables get their single block, and block fields are
    /// placed into their parent region or left op-owned.
    ///
    /// # Panics
    ///
    /// Panics if two fields share a name, if a block field names a missing or
    /// symbol-table parent region, or if an initial operand value violates
    /// its group's arity or type constraint.
    pub fn create_op(&mut self, builder: OperationBuilder) -> OpRef {
        let OperationBuilder {
            location,
            dialect,
            name,
            sym_name,
            operands,
            results,
            regions,
            blocks,
            attributes,
        } = builder;

        let mut seen = HashSet::new();
        let field_names = operands
            .iter()
            .map(|o| o.name)
            .chain(results.iter().map(|r| r.name))
            .chain(regions.iter().map(|r| r.name))
            .chain(blocks.iter().map(|b| b.name));
        for field in field_names {
            assert!(
                seen.insert(field),
                "create_op: duplicate field `{field}` in {dialect}.{name}"
            );
        }
        let mut block_parents = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let Some(parent) = block.parent else {
                block_parents.push(None);
                continue;
            };
            match regions.iter().position(|r| r.name == parent) {
                None => panic!(
                    "create_op: block field `{}` names undeclared region `{parent}` in {dialect}.{name}",
                    block.name
                ),
                Some(idx) if regions[idx].kind == RegionKind::SymbolTable => panic!(
                    "create_op: block field `{}` cannot live in symbol table `{parent}` of {dialect}.{name}",
                    block.name
                ),
                Some(idx) => block_parents.push(Some(idx)),
            }
        }
        if let Some(loc_file) = location.file {
            self.check_file(loc_file);
        }

        let key = self.ops.push(OperationData {
            location,
            dialect,
            name,
            sym_name,
            operands: SmallVec::new(),
            results: SmallVec::new(),
            regions: SmallVec::new(),
            blocks: SmallVec::new(),
            attributes,
            parent_block: None,
        });
        let op = OpRef::new(self.id, key);

        for spec in operands {
            if let Some(ty) = spec.constraint {
                self.check_type(ty);
            }
            let operand = OperandRef::new(
                self.id,
                self.operands.push(crate::operand::OperandData {
                    name: spec.name,
                    owner: op,
                    arity: spec.arity,
                    constraint: spec.constraint,
                    values: SmallVec::new(),
                }),
            );
            self.ops[key].operands.push(operand);
            for v in spec.values {
                self.operand_add(operand, v);
            }
        }

        for (idx, spec) in results.into_iter().enumerate() {
            self.check_type(spec.ty);
            let v = self.push_value(ValueDef::OpResult(op, idx as u32), spec.ty, Some(spec.name));
            self.ops[key].results.push(v);
        }

        for spec in regions {
            let region = RegionRef::new(
                self.id,
                self.regions.push(RegionData {
                    name: spec.name,
                    kind: spec.kind,
                    blocks: SmallVec::new(),
                    parent_op: op,
                    symbols: (spec.kind == RegionKind::SymbolTable).then(SymbolIndex::default),
                }),
            );
            self.ops[key].regions.push(region);
            if spec.entry_block || spec.kind == RegionKind::SymbolTable {
                let block = self.alloc_block(None);
                self.blocks[block.key()].owner = Some(BlockOwner::Region(region));
                self.regions[region.key()].blocks.push(block);
            }
        }

        for (spec, parent) in blocks.into_iter().zip(block_parents) {
            let block = self.alloc_block(Some(spec.name));
            let owner = match parent {
                Some(idx) => {
                    let region = self.ops[key].regions[idx];
                    self.regions[region.key()].blocks.push(block);
                    BlockOwner::Region(region)
                }
                None => BlockOwner::Op(op),
            };
            let data = &mut self.blocks[block.key()];
            data.owner = Some(owner);
            data.field_of = Some(op);
            self.ops[key].blocks.push(block);
        }

        tracing::debug!(%op, %dialect, %name, "op created");
        op
    }

    /// Immutable view of an operation.
    pub fn op(&self, op: OpRef) -> &OperationData {
        self.check_op(op);
        &self.ops[op.key()]
    }

    /// `true` if the op is `dialect.name`.
    pub fn is_op(&self, op: OpRef, dialect: Symbol, name: Symbol) -> bool {
        let data = self.op(op);
        data.dialect == dialect && data.name == name
    }

    pub fn op_location(&self, op: OpRef) -> Location {
        self.op(op).location
    }

    pub fn sym_name(&self, op: OpRef) -> Option<&str> {
        self.op(op).sym_name.as_deref()
    }

    pub fn op_operands(&self, op: OpRef) -> &[OperandRef] {
        &self.op(op).operands
    }

    pub fn op_results(&self, op: OpRef) -> &[ValueRef] {
        &self.op(op).results
    }

    /// The i-th result value.
    pub fn op_result(&self, op: OpRef, index: usize) -> ValueRef {
        self.op(op).results[index]
    }

    pub fn op_regions(&self, op: OpRef) -> &[RegionRef] {
        &self.op(op).regions
    }

    pub fn op_blocks(&self, op: OpRef) -> &[BlockRef] {
        &self.op(op).blocks
    }

    /// Operand group of `op` declared under `name`.
    pub fn op_operand(&self, op: OpRef, name: impl Into<Symbol>) -> Option<OperandRef> {
        let name = name.into();
        self.op(op)
            .operands
            .iter()
            .copied()
            .find(|&o| self.operands[o.key()].name == name)
    }

    /// Result of `op` declared under `name`.
    pub fn op_result_named(&self, op: OpRef, name: impl Into<Symbol>) -> Option<ValueRef> {
        let name = name.into();
        self.op(op)
            .results
            .iter()
            .copied()
            .find(|&v| self.values[v.key()].name == Some(name))
    }

    /// Region of `op` declared under `name`.
    pub fn op_region(&self, op: OpRef, name: impl Into<Symbol>) -> Option<RegionRef> {
        let name = name.into();
        self.op(op)
            .regions
            .iter()
            .copied()
            .find(|&r| self.regions[r.key()].name == name)
    }

    /// Block field of `op` declared under `name`.
    pub fn op_block(&self, op: OpRef, name: impl Into<Symbol>) -> Option<BlockRef> {
        let name = name.into();
        self.op(op)
            .blocks
            .iter()
            .copied()
            .find(|&b| self.blocks[b.key()].name == Some(name))
    }

    pub fn attr(&self, op: OpRef, key: impl Into<Symbol>) -> Option<&Attribute> {
        self.op(op).attributes.get(&key.into())
    }

    /// Set an attribute, returning the previous value.
    pub fn set_attr(
        &mut self,
        op: OpRef,
        key: impl Into<Symbol>,
        value: impl Into<Attribute>,
    ) -> Option<Attribute> {
        self.check_op(op);
        self.ops[op.key()]
            .attributes
            .insert(key.into(), value.into())
    }

    pub fn remove_attr(&mut self, op: OpRef, key: impl Into<Symbol>) -> Option<Attribute> {
        self.check_op(op);
        self.ops[op.key()].attributes.remove(&key.into())
    }

    // ========================================================================
    // Value
    // ========================================================================

    pub(crate) fn push_value(&mut self, def: ValueDef, ty: TypeRef, name: Option<Symbol>) -> ValueRef {
        ValueRef::new(self.id, self.values.push(ValueData { def, ty, name }))
    }

    pub fn value(&self, v: ValueRef) -> &ValueData {
        self.check_value(v);
        &self.values[v.key()]
    }

    pub fn value_ty(&self, v: ValueRef) -> TypeRef {
        self.value(v).ty
    }

    pub fn value_def(&self, v: ValueRef) -> ValueDef {
        self.value(v).def
    }

    pub fn value_name(&self, v: ValueRef) -> Option<Symbol> {
        self.value(v).name
    }

    pub fn set_value_name(&mut self, v: ValueRef, name: Option<Symbol>) {
        self.check_value(v);
        self.values[v.key()].name = name;
    }

    // ========================================================================
    // Block
    // ========================================================================

    fn alloc_block(&mut self, name: Option<Symbol>) -> BlockRef {
        BlockRef::new(
            self.id,
            self.blocks.push(BlockData {
                name,
                args: SmallVec::new(),
                ops: Vec::new(),
                owner: None,
                field_of: None,
            }),
        )
    }

    /// Create a detached block with the given named, typed arguments.
    pub fn create_block(
        &mut self,
        name: Option<Symbol>,
        args: impl IntoIterator<Item = (Symbol, TypeRef)>,
    ) -> BlockRef {
        let block = self.alloc_block(name);
        for (arg_name, ty) in args {
            self.add_block_argument(block, arg_name, ty);
        }
        block
    }

    /// Append an argument to a block, returning its value.
    pub fn add_block_argument(&mut self, block: BlockRef, name: Symbol, ty: TypeRef) -> ValueRef {
        self.check_block(block);
        self.check_type(ty);
        let index = self.blocks[block.key()].args.len() as u32;
        let v = self.push_value(ValueDef::BlockArg(block, index), ty, Some(name));
        self.blocks[block.key()].args.push(v);
        v
    }

    pub fn block(&self, block: BlockRef) -> &BlockData {
        self.check_block(block);
        &self.blocks[block.key()]
    }

    pub fn block_args(&self, block: BlockRef) -> &[ValueRef] {
        &self.block(block).args
    }

    pub fn block_arg(&self, block: BlockRef, index: usize) -> ValueRef {
        self.block(block).args[index]
    }

    pub fn block_ops(&self, block: BlockRef) -> &[OpRef] {
        &self.block(block).ops
    }

    /// Symbol-table region owning `block`, if any.
    pub(crate) fn symbol_table_of(&self, block: BlockRef) -> Option<RegionRef> {
        match self.blocks[block.key()].owner {
            Some(BlockOwner::Region(r)) if self.regions[r.key()].kind == RegionKind::SymbolTable => {
                Some(r)
            }
            _ => None,
        }
    }

    /// `true` if `op` is `block`'s owning op or one of its ancestors.
    pub(crate) fn encloses(&self, op: OpRef, block: BlockRef) -> bool {
        let mut current = self.block_parent_op(block);
        while let Some(ancestor) = current {
            if ancestor == op {
                return true;
            }
            current = self.ops[ancestor.key()]
                .parent_block
                .and_then(|b| self.block_parent_op(b));
        }
        false
    }

    fn block_parent_op(&self, block: BlockRef) -> Option<OpRef> {
        match self.blocks[block.key()].owner? {
            BlockOwner::Region(r) => Some(self.regions[r.key()].parent_op),
            BlockOwner::Op(op) => Some(op),
        }
    }

    #[track_caller]
    fn check_attachable(&self, caller: &str, block: BlockRef, op: OpRef) {
        self.check_block(block);
        self.check_op(op);
        if let Some(existing) = self.ops[op.key()].parent_block {
            panic!("{caller}: {op} already belongs to {existing}; detach it first");
        }
        if let Some(table) = self.symbol_table_of(block) {
            panic!("{caller}: {block} belongs to symbol table {table}; use add_symbol");
        }
        assert!(
            !self.encloses(op, block),
            "{caller}: {op} cannot be placed inside its own subtree"
        );
    }

    /// Append a detached operation to the end of a block.
    ///
    /// # Panics
    ///
    /// Panics if the op already has an owner or if the block belongs to a
    /// symbol table.
    #[track_caller]
    pub fn push_op(&mut self, block: BlockRef, op: OpRef) {
        self.check_attachable("push_op", block, op);
        self.blocks[block.key()].ops.push(op);
        self.ops[op.key()].parent_block = Some(block);
    }

    /// Insert a detached operation at the start of a block.
    #[track_caller]
    pub fn push_op_front(&mut self, block: BlockRef, op: OpRef) {
        self.check_attachable("push_op_front", block, op);
        self.blocks[block.key()].ops.insert(0, op);
        self.ops[op.key()].parent_block = Some(block);
    }

    /// Insert a detached operation before `before` in the given block.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`push_op`](Self::push_op), or if
    /// `before` is not in the block.
    #[track_caller]
    pub fn insert_op_before(&mut self, block: BlockRef, before: OpRef, op: OpRef) {
        self.check_attachable("insert_op_before", block, op);
        let ops = &mut self.blocks[block.key()].ops;
        let Some(pos) = ops.iter().position(|&o| o == before) else {
            panic!("insert_op_before: {before} is not in {block}");
        };
        ops.insert(pos, op);
        self.ops[op.key()].parent_block = Some(block);
    }

    /// Remove an op from its block without destroying it. Detaching a symbol
    /// also drops it from the table's name index. No-op for a detached op.
    pub fn detach_op(&mut self, op: OpRef) {
        self.check_op(op);
        let Some(block) = self.ops[op.key()].parent_block.take() else {
            return;
        };
        self.blocks[block.key()].ops.retain(|o| *o != op);
        if let Some(table) = self.symbol_table_of(block) {
            let name = self.ops[op.key()].sym_name.as_deref();
            if let (Some(name), Some(index)) = (name, self.regions[table.key()].symbols.as_mut()) {
                index.lookup.remove(name);
            }
        }
        tracing::trace!(%op, %block, "op detached");
    }

    /// Append a detached block to a region.
    ///
    /// # Panics
    ///
    /// Panics if the block already has an owner or if the region is a symbol
    /// table.
    #[track_caller]
    pub fn append_block(&mut self, region: RegionRef, block: BlockRef) {
        self.check_block_attachable("append_block", region, block);
        self.regions[region.key()].blocks.push(block);
        self.blocks[block.key()].owner = Some(BlockOwner::Region(region));
    }

    /// Insert a detached block at the start of a region.
    #[track_caller]
    pub fn push_block_front(&mut self, region: RegionRef, block: BlockRef) {
        self.check_block_attachable("push_block_front", region, block);
        self.regions[region.key()].blocks.insert(0, block);
        self.blocks[block.key()].owner = Some(BlockOwner::Region(region));
    }

    #[track_caller]
    fn check_block_attachable(&self, caller: &str, region: RegionRef, block: BlockRef) {
        self.check_region(region);
        self.check_block(block);
        if let Some(owner) = self.blocks[block.key()].owner {
            panic!("{caller}: {block} already belongs to {owner}; detach it first");
        }
        assert!(
            self.regions[region.key()].kind != RegionKind::SymbolTable,
            "{caller}: {region} is a symbol table and holds exactly one block"
        );
        let mut ancestor = Some(self.regions[region.key()].parent_op);
        while let Some(op) = ancestor {
            let parent = self.ops[op.key()].parent_block;
            assert!(
                parent != Some(block),
                "{caller}: {block} cannot be placed inside its own subtree"
            );
            ancestor = parent.and_then(|b| self.block_parent_op(b));
        }
    }

    /// Remove a block from its region without destroying it.
    ///
    /// # Panics
    ///
    /// Panics if the block is a declared block field or the single block of
    /// a symbol table.
    #[track_caller]
    pub fn detach_block(&mut self, block: BlockRef) {
        self.check_block(block);
        if let Some(op) = self.blocks[block.key()].field_of {
            panic!("detach_block: {block} is a block field of {op}");
        }
        if let Some(table) = self.symbol_table_of(block) {
            panic!("detach_block: {block} is the body of symbol table {table}");
        }
        if let Some(BlockOwner::Region(region)) = self.blocks[block.key()].owner.take() {
            self.regions[region.key()].blocks.retain(|b| *b != block);
        }
    }

    // ========================================================================
    // Region
    // ========================================================================

    pub fn region(&self, region: RegionRef) -> &RegionData {
        self.check_region(region);
        &self.regions[region.key()]
    }

    pub fn region_blocks(&self, region: RegionRef) -> &[BlockRef] {
        &self.region(region).blocks
    }

    pub fn region_kind(&self, region: RegionRef) -> RegionKind {
        self.region(region).kind
    }

    /// First block of a region.
    pub fn region_entry_block(&self, region: RegionRef) -> Option<BlockRef> {
        self.region(region).blocks.first().copied()
    }

    // ========================================================================
    // Parents
    // ========================================================================

    pub fn parent_block(&self, op: OpRef) -> Option<BlockRef> {
        self.op(op).parent_block
    }

    /// Region owning `block`; `None` for detached and op-owned blocks.
    pub fn parent_region(&self, block: BlockRef) -> Option<RegionRef> {
        match self.block(block).owner {
            Some(BlockOwner::Region(r)) => Some(r),
            _ => None,
        }
    }

    pub fn parent_op(&self, region: RegionRef) -> OpRef {
        self.region(region).parent_op
    }

    /// Nearest op enclosing `op`, if it is attached.
    pub fn enclosing_op(&self, op: OpRef) -> Option<OpRef> {
        self.parent_block(op).and_then(|b| self.block_parent_op(b))
    }

    // ========================================================================
    // Erasure
    // ========================================================================

    /// Detach `op` and destroy its whole subtree.
    ///
    /// # Panics
    ///
    /// Panics if a value defined in the subtree is still used from outside
    /// it. A value is never destroyed while used.
    #[track_caller]
    pub fn erase_op(&mut self, op: OpRef) {
        self.check_op(op);
        let mut subtree = Subtree::default();
        self.collect_op(op, &mut subtree);
        self.check_no_outside_uses("erase_op", &subtree);
        self.detach_op(op);
        self.destroy(subtree);
        tracing::debug!(%op, "op erased");
    }

    /// Detach `block` and destroy it with every op it contains.
    ///
    /// # Panics
    ///
    /// Panics like [`erase_op`](Self::erase_op), and additionally for block
    /// fields and symbol-table bodies.
    #[track_caller]
    pub fn erase_block(&mut self, block: BlockRef) {
        self.check_block(block);
        let mut subtree = Subtree::default();
        self.collect_block(block, &mut subtree);
        self.check_no_outside_uses("erase_block", &subtree);
        self.detach_block(block);
        self.destroy(subtree);
        tracing::debug!(%block, "block erased");
    }

    fn collect_op(&self, op: OpRef, out: &mut Subtree) {
        let data = &self.ops[op.key()];
        out.ops.push(op);
        out.operands.extend(data.operands.iter().copied());
        out.values.extend(data.results.iter().copied());
        for &region in &data.regions {
            out.regions.push(region);
            for &block in &self.regions[region.key()].blocks {
                if self.blocks[block.key()].field_of != Some(op) {
                    self.collect_block(block, out);
                }
            }
        }
        for &block in &data.blocks {
            self.collect_block(block, out);
        }
    }

    fn collect_block(&self, block: BlockRef, out: &mut Subtree) {
        let data = &self.blocks[block.key()];
        out.blocks.push(block);
        out.values.extend(data.args.iter().copied());
        for &op in &data.ops {
            self.collect_op(op, out);
        }
    }

    #[track_caller]
    fn check_no_outside_uses(&self, caller: &str, subtree: &Subtree) {
        let inside: HashSet<OperandRef> = subtree.operands.iter().copied().collect();
        for &v in &subtree.values {
            let outside = self.uses[v.key()]
                .iter()
                .filter(|u| !inside.contains(&u.operand))
                .count();
            assert!(
                outside == 0,
                "{caller}: {v} still has {outside} use(s) outside the erased subtree"
            );
        }
    }

    fn destroy(&mut self, subtree: Subtree) {
        for &operand in &subtree.operands {
            self.operand_clear(operand);
        }
        for op in subtree.ops {
            self.erased_ops.insert(op.key());
        }
        for v in subtree.values {
            self.erased_values.insert(v.key());
        }
        for block in subtree.blocks {
            self.erased_blocks.insert(block.key());
        }
        for region in subtree.regions {
            self.regions[region.key()].symbols = None;
            self.erased_regions.insert(region.key());
        }
        for operand in subtree.operands {
            self.erased_operands.insert(operand.key());
        }
    }

    // ========================================================================
    // Live entity iteration
    // ========================================================================

    pub(crate) fn live_operands(&self) -> impl Iterator<Item = OperandRef> + '_ {
        self.operands
            .keys()
            .filter(|k| !self.erased_operands.contains(*k))
            .map(|k| OperandRef::new(self.id, k))
    }

    pub(crate) fn live_values(&self) -> impl Iterator<Item = ValueRef> + '_ {
        self.values
            .keys()
            .filter(|k| !self.erased_values.contains(*k))
            .map(|k| ValueRef::new(self.id, k))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOwner::Region(r) => write!(f, "{r}"),
            BlockOwner::Op(op) => write!(f, "{op}"),
        }
    }
}

#[derive(Default)]
struct Subtree {
    ops: Vec<OpRef>,
    values: Vec<ValueRef>,
    blocks: Vec<BlockRef>,
    regions: Vec<RegionRef>,
    operands: Vec<OperandRef>,
}

// ============================================================================
// OperationBuilder
// ============================================================================

struct OperandSpec {
    name: Symbol,
    arity: Arity,
    constraint: Option<TypeRef>,
    values: SmallVec<[ValueRef; 2]>,
}

struct ResultSpec {
    name: Symbol,
    ty: TypeRef,
}

struct RegionSpec {
    name: Symbol,
    kind: RegionKind,
    entry_block: bool,
}

struct BlockSpec {
    name: Symbol,
    parent: Option<Symbol>,
}

/// Declarative description of an operation's shape, consumed by
/// [`Context::create_op`].
pub struct OperationBuilder {
    location: Location,
    dialect: Symbol,
    name: Symbol,
    sym_name: Option<String>,
    operands: Vec<OperandSpec>,
    results: Vec<ResultSpec>,
    regions: Vec<RegionSpec>,
    blocks: Vec<BlockSpec>,
    attributes: BTreeMap<Symbol, Attribute>,
}

impl OperationBuilder {
    pub fn new(location: Location, dialect: impl Into<Symbol>, name: impl Into<Symbol>) -> Self {
        Self {
            location,
            dialect: dialect.into(),
            name: name.into(),
            sym_name: None,
            operands: Vec::new(),
            results: Vec::new(),
            regions: Vec::new(),
            blocks: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn sym_name(mut self, name: impl Into<String>) -> Self {
        self.sym_name = Some(name.into());
        self
    }

    /// Declare an unconstrained operand group with initial values.
    pub fn operand(
        self,
        name: impl Into<Symbol>,
        arity: Arity,
        values: impl IntoIterator<Item = ValueRef>,
    ) -> Self {
        self.operand_with(name, arity, None, values)
    }

    /// Declare an operand group whose values must have type `constraint`.
    pub fn typed_operand(
        self,
        name: impl Into<Symbol>,
        arity: Arity,
        constraint: TypeRef,
        values: impl IntoIterator<Item = ValueRef>,
    ) -> Self {
        self.operand_with(name, arity, Some(constraint), values)
    }

    pub fn operand_with(
        mut self,
        name: impl Into<Symbol>,
        arity: Arity,
        constraint: Option<TypeRef>,
        values: impl IntoIterator<Item = ValueRef>,
    ) -> Self {
        self.operands.push(OperandSpec {
            name: name.into(),
            arity,
            constraint,
            values: values.into_iter().collect(),
        });
        self
    }

    pub fn result(mut self, name: impl Into<Symbol>, ty: TypeRef) -> Self {
        self.results.push(ResultSpec {
            name: name.into(),
            ty,
        });
        self
    }

    /// Declare an empty region.
    pub fn region(mut self, name: impl Into<Symbol>) -> Self {
        self.regions.push(RegionSpec {
            name: name.into(),
            kind: RegionKind::Plain,
            entry_block: false,
        });
        self
    }

    /// Declare a region that starts with one empty entry block.
    pub fn region_with_entry(mut self, name: impl Into<Symbol>) -> Self {
        self.regions.push(RegionSpec {
            name: name.into(),
            kind: RegionKind::Plain,
            entry_block: true,
        });
        self
    }

    /// Declare a symbol-table region.
    pub fn symbol_table(mut self, name: impl Into<Symbol>) -> Self {
        self.regions.push(RegionSpec {
            name: name.into(),
            kind: RegionKind::SymbolTable,
            entry_block: true,
        });
        self
    }

    /// Declare a block field, optionally placed in one of the op's regions.
    pub fn block(mut self, name: impl Into<Symbol>, parent: Option<Symbol>) -> Self {
        self.blocks.push(BlockSpec {
            name: name.into(),
            parent,
        });
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, value: impl Into<Attribute>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(ctx: &mut Context) -> Location {
        let file = ctx.di_file("story/chapter1.docx");
        ctx.di_location(file, 1, 2, 3)
    }

    fn constant(ctx: &mut Context, name: &'static str) -> OpRef {
        let int = ctx.int_type();
        let loc = loc(ctx);
        ctx.create_op(OperationBuilder::new(loc, "test", name).result("result", int))
    }

    #[test]
    fn di_file_is_uniqued() {
        let mut ctx = Context::new();
        let a = ctx.di_file("a.docx");
        let b = ctx.di_file("a.docx");
        let c = ctx.di_file("b.docx");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ctx.file_path(c), "b.docx");
        assert_eq!(ctx.files().collect::<Vec<_>>(), vec![a, c]);

        let l1 = ctx.di_location(a, 1, 2, 3);
        let l2 = ctx.di_location(a, 1, 2, 3);
        assert_eq!(l1, l2);
        assert!(!l1.is_unknown());
        assert!(Location::UNKNOWN.is_unknown());
    }

    #[test]
    fn create_op_allocates_every_field() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let loc = loc(&mut ctx);
        let op = ctx.create_op(
            OperationBuilder::new(loc, "vn", "scene")
                .sym_name("intro")
                .operand("args", Arity::Variadic, [])
                .result("handle", int)
                .region_with_entry("body")
                .region("extra")
                .symbol_table("locals")
                .block("on_enter", Some(Symbol::new("body")))
                .block("on_exit", None)
                .attr("weight", 3i64),
        );

        assert!(ctx.is_op(op, Symbol::new("vn"), Symbol::new("scene")));
        assert_eq!(ctx.sym_name(op), Some("intro"));
        assert_eq!(ctx.op_location(op), loc);
        assert_eq!(ctx.op_operands(op).len(), 1);
        assert_eq!(ctx.op_results(op).len(), 1);
        assert_eq!(ctx.op_result_named(op, "handle"), Some(ctx.op_result(op, 0)));
        assert_eq!(ctx.value_def(ctx.op_result(op, 0)), ValueDef::OpResult(op, 0));

        let body = ctx.op_region(op, "body").unwrap();
        let extra = ctx.op_region(op, "extra").unwrap();
        let locals = ctx.op_region(op, "locals").unwrap();
        assert_eq!(ctx.parent_op(body), op);
        assert_eq!(ctx.region_blocks(body).len(), 2, "entry block + on_enter");
        assert!(ctx.region_blocks(extra).is_empty());
        assert_eq!(ctx.region_blocks(locals).len(), 1);
        assert_eq!(ctx.region_kind(locals), RegionKind::SymbolTable);

        let on_enter = ctx.op_block(op, "on_enter").unwrap();
        let on_exit = ctx.op_block(op, "on_exit").unwrap();
        assert_eq!(ctx.parent_region(on_enter), Some(body));
        assert_eq!(ctx.parent_region(on_exit), None);
        assert_eq!(ctx.block(on_exit).owner, Some(BlockOwner::Op(op)));
        assert_eq!(ctx.attr(op, "weight"), Some(&Attribute::Int(3)));
    }

    #[test]
    #[should_panic(expected = "duplicate field `x`")]
    fn duplicate_field_names_panic() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "dup")
                .operand("x", Arity::Single, [])
                .result("x", int),
        );
    }

    #[test]
    #[should_panic(expected = "cannot live in symbol table")]
    fn block_field_in_symbol_table_panics() {
        let mut ctx = Context::new();
        ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "bad")
                .symbol_table("table")
                .block("b", Some(Symbol::new("table"))),
        );
    }

    #[test]
    fn push_and_insert_keep_order() {
        let mut ctx = Context::new();
        let block = ctx.create_block(None, []);
        let a = constant(&mut ctx, "a");
        let b = constant(&mut ctx, "b");
        let c = constant(&mut ctx, "c");
        let z = constant(&mut ctx, "z");
        ctx.push_op(block, a);
        ctx.push_op(block, c);
        ctx.insert_op_before(block, c, b);
        ctx.push_op_front(block, z);
        assert_eq!(ctx.block_ops(block), &[z, a, b, c]);
        assert_eq!(ctx.parent_block(b), Some(block));

        ctx.detach_op(b);
        assert_eq!(ctx.block_ops(block), &[z, a, c]);
        assert_eq!(ctx.parent_block(b), None);
    }

    #[test]
    #[should_panic(expected = "already belongs to")]
    fn push_owned_op_panics() {
        let mut ctx = Context::new();
        let b1 = ctx.create_block(None, []);
        let b2 = ctx.create_block(None, []);
        let op = constant(&mut ctx, "a");
        ctx.push_op(b1, op);
        ctx.push_op(b2, op);
    }

    #[test]
    #[should_panic(expected = "inside its own subtree")]
    fn op_cannot_contain_itself() {
        let mut ctx = Context::new();
        let op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "wrapper").region_with_entry("body"),
        );
        let body = ctx.op_region(op, "body").unwrap();
        let entry = ctx.region_entry_block(body).unwrap();
        ctx.push_op(entry, op);
    }

    #[test]
    fn block_arguments_are_values() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let text = ctx.text_type();
        let block = ctx.create_block(Some(Symbol::new("entry")), [(Symbol::new("n"), int)]);
        let extra = ctx.add_block_argument(block, Symbol::new("line"), text);

        assert_eq!(ctx.block_args(block).len(), 2);
        assert_eq!(ctx.block_arg(block, 1), extra);
        assert_eq!(ctx.value_def(extra), ValueDef::BlockArg(block, 1));
        assert_eq!(ctx.value_ty(extra), text);
        assert_eq!(ctx.value_name(extra), Some(Symbol::new("line")));
    }

    #[test]
    fn blocks_move_between_regions() {
        let mut ctx = Context::new();
        let op = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "cfg")
                .region("body"),
        );
        let body = ctx.op_region(op, "body").unwrap();
        let b1 = ctx.create_block(None, []);
        let b2 = ctx.create_block(None, []);
        ctx.append_block(body, b1);
        ctx.push_block_front(body, b2);
        assert_eq!(ctx.region_blocks(body), &[b2, b1]);
        assert_eq!(ctx.region_entry_block(body), Some(b2));

        ctx.detach_block(b2);
        assert_eq!(ctx.region_blocks(body), &[b1]);
        assert_eq!(ctx.parent_region(b2), None);
    }

    #[test]
    fn attributes_set_and_remove() {
        let mut ctx = Context::new();
        let op = constant(&mut ctx, "a");
        assert_eq!(ctx.set_attr(op, "speaker", "narrator"), None);
        assert_eq!(
            ctx.set_attr(op, "speaker", "alice"),
            Some(Attribute::String("narrator".into()))
        );
        assert_eq!(
            ctx.remove_attr(op, "speaker"),
            Some(Attribute::String("alice".into()))
        );
        assert_eq!(ctx.attr(op, "speaker"), None);
    }

    #[test]
    fn erase_op_releases_operand_uses() {
        let mut ctx = Context::new();
        let block = ctx.create_block(None, []);
        let def = constant(&mut ctx, "def");
        let v = ctx.op_result(def, 0);
        let user = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "user")
                .operand("input", Arity::Single, [v]),
        );
        ctx.push_op(block, def);
        ctx.push_op(block, user);
        assert!(ctx.has_uses(v));

        ctx.erase_op(user);
        assert!(!ctx.has_uses(v));
        assert_eq!(ctx.block_ops(block), &[def]);
    }

    #[test]
    fn erase_op_allows_uses_inside_subtree() {
        let mut ctx = Context::new();
        let outer = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "outer").region_with_entry("body"),
        );
        let entry = ctx.region_entry_block(ctx.op_region(outer, "body").unwrap()).unwrap();
        let def = constant(&mut ctx, "def");
        let v = ctx.op_result(def, 0);
        let user = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "user")
                .operand("input", Arity::Single, [v]),
        );
        ctx.push_op(entry, def);
        ctx.push_op(entry, user);

        ctx.erase_op(outer);
        assert_eq!(ctx.live_values().count(), 0);
    }

    #[test]
    #[should_panic(expected = "still has 1 use(s)")]
    fn erase_op_with_outside_use_panics() {
        let mut ctx = Context::new();
        let def = constant(&mut ctx, "def");
        let v = ctx.op_result(def, 0);
        let _user = ctx.create_op(
            OperationBuilder::new(Location::UNKNOWN, "test", "user")
                .operand("input", Arity::Single, [v]),
        );
        ctx.erase_op(def);
    }

    #[test]
    #[should_panic(expected = "has been erased")]
    fn erased_op_access_panics() {
        let mut ctx = Context::new();
        let op = constant(&mut ctx, "a");
        ctx.erase_op(op);
        ctx.op(op);
    }

    #[test]
    fn erase_block_destroys_contents() {
        let mut ctx = Context::new();
        let op = ctx.create_op(OperationBuilder::new(Location::UNKNOWN, "test", "cfg").region("body"));
        let body = ctx.op_region(op, "body").unwrap();
        let block = ctx.create_block(None, []);
        ctx.append_block(body, block);
        let inner = constant(&mut ctx, "inner");
        ctx.push_op(block, inner);

        ctx.erase_block(block);
        assert!(ctx.region_blocks(body).is_empty());
        assert!(ctx.erased_ops.contains(inner.key()));
    }

    #[test]
    #[should_panic(expected = "belongs to context")]
    fn foreign_handle_panics() {
        let mut other = Context::new();
        let foreign = constant(&mut other, "a");
        let ctx = Context::new();
        ctx.op(foreign);
    }
}
