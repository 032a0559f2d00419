//! vnir: the IR substrate of the visual-novel compiler.
//!
//! A [`Context`] owns every operation, block, region and value of one
//! compilation and hands out typed, context-tagged handles to them. Def-use
//! chains, symbol tables, canonical types and literals are kept consistent by
//! the context's mutators. Dialects are declared with [`ir_dialect`].

// === Core entities ===
pub mod context;
pub mod literal;
pub mod location;
pub mod operand;
pub mod refs;
pub mod symbol;
pub mod symbol_table;
pub mod types;

// === Dialects ===
pub mod dialect;
pub mod ops;

// === Infrastructure ===
pub mod error;
pub mod json;
pub mod printer;
pub mod validation;
pub mod visit;
pub mod walk;

// Re-export proc macro for dialect definitions
pub use vnir_macros::ir_dialect;

pub use context::{
    BlockData, BlockOwner, Context, OperationBuilder, OperationData, RegionData, RegionKind,
    ValueData,
};
pub use error::{ConversionError, IrError};
pub use json::{JsonError, JsonExporter, JsonImporter, JsonKey, export_json, import_json};
pub use literal::{AssetData, AssetKind, Color, LiteralData, LiteralKind};
pub use location::{Location, SourcePos};
pub use operand::{Arity, OperandData, Use};
pub use ops::{DialectOp, op_full_name};
pub use printer::{print_op, print_type};
pub use refs::{
    BlockRef, ContextId, FileRef, LiteralRef, OpRef, OperandRef, RegionRef, TypeRef, ValueDef,
    ValueRef,
};
pub use symbol::Symbol;
pub use types::{Attribute, BuiltinType, TypeData, TypeDataBuilder, TypeKind, TypeParam};
pub use validation::{ValidationError, ValidationKind, ValidationResult, validate_all};
pub use visit::Visitor;
pub use walk::{WalkAction, walk_block, walk_op, walk_region, walk_typed};
