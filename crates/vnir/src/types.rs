//! Value types and attributes.
//!
//! Types are canonicalized per [`Context`]: the same `(kind, params)` key
//! always yields the same [`TypeRef`], so type equality is handle equality.

use std::collections::HashMap;
use std::fmt;

use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::context::Context;
use crate::refs::{TypeKey, TypeRef};
use crate::symbol::Symbol;

// ============================================================================
// TypeKind
// ============================================================================

/// The family a type belongs to, e.g. `core.int` or `core.optional`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TypeKind {
    pub dialect: Symbol,
    pub name: Symbol,
}

impl TypeKind {
    pub fn new(dialect: impl Into<Symbol>, name: impl Into<Symbol>) -> Self {
        Self {
            dialect: dialect.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dialect, self.name)
    }
}

/// Stateless types provided by the `core` dialect.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BuiltinType {
    Void,
    Int,
    Float,
    Bool,
    String,
    Text,
    TextStyle,
    AggregateText,
    Image,
    Audio,
    Bytes,
    BlockRef,
    AssetRef,
    Color,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 14] = [
        BuiltinType::Void,
        BuiltinType::Int,
        BuiltinType::Float,
        BuiltinType::Bool,
        BuiltinType::String,
        BuiltinType::Text,
        BuiltinType::TextStyle,
        BuiltinType::AggregateText,
        BuiltinType::Image,
        BuiltinType::Audio,
        BuiltinType::Bytes,
        BuiltinType::BlockRef,
        BuiltinType::AssetRef,
        BuiltinType::Color,
    ];

    /// Name of the type inside the `core` dialect.
    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Void => "void",
            BuiltinType::Int => "int",
            BuiltinType::Float => "float",
            BuiltinType::Bool => "bool",
            BuiltinType::String => "string",
            BuiltinType::Text => "text",
            BuiltinType::TextStyle => "text_style",
            BuiltinType::AggregateText => "aggregate_text",
            BuiltinType::Image => "image",
            BuiltinType::Audio => "audio",
            BuiltinType::Bytes => "bytes",
            BuiltinType::BlockRef => "block_ref",
            BuiltinType::AssetRef => "asset_ref",
            BuiltinType::Color => "color",
        }
    }

    pub fn kind(self) -> TypeKind {
        TypeKind::new(Symbol::new("core"), Symbol::new(self.name()))
    }
}

crate::symbols! {
    CORE => "core",
    OPTIONAL => "optional",
    ENUM => "enum",
    CLASS => "class",
    LIST => "list",
}

// ============================================================================
// TypeData
// ============================================================================

/// One entry of a parameterized type's parameter tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeParam {
    Type(TypeRef),
    Int(i64),
    Str(String),
    Bool(bool),
    /// Separates groups of parameters (e.g. inputs from outputs).
    Separator,
}

impl From<TypeRef> for TypeParam {
    fn from(value: TypeRef) -> Self {
        TypeParam::Type(value)
    }
}

impl From<i64> for TypeParam {
    fn from(value: i64) -> Self {
        TypeParam::Int(value)
    }
}

impl From<bool> for TypeParam {
    fn from(value: bool) -> Self {
        TypeParam::Bool(value)
    }
}

impl From<&str> for TypeParam {
    fn from(value: &str) -> Self {
        TypeParam::Str(value.to_owned())
    }
}

impl From<String> for TypeParam {
    fn from(value: String) -> Self {
        TypeParam::Str(value)
    }
}

/// Structural description of a type; the canonicalization key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeData {
    pub kind: TypeKind,
    pub params: SmallVec<[TypeParam; 2]>,
}

impl TypeData {
    pub fn is_stateless(&self) -> bool {
        self.params.is_empty()
    }
}

/// Builder for `TypeData` with a fluent API.
pub struct TypeDataBuilder {
    kind: TypeKind,
    params: SmallVec<[TypeParam; 2]>,
}

impl TypeDataBuilder {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            params: SmallVec::new(),
        }
    }

    pub fn param(mut self, param: impl Into<TypeParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn params<P: Into<TypeParam>>(mut self, params: impl IntoIterator<Item = P>) -> Self {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> TypeData {
        TypeData {
            kind: self.kind,
            params: self.params,
        }
    }
}

// ============================================================================
// TypeTable
// ============================================================================

/// Per-context canonical type storage.
#[derive(Debug, Default)]
pub(crate) struct TypeTable {
    types: PrimaryMap<TypeKey, TypeData>,
    stateless: HashMap<TypeKind, TypeKey>,
    parameterized: HashMap<TypeData, TypeKey>,
    /// Insertion-ordered members of each parameterized family.
    families: HashMap<TypeKind, Vec<TypeKey>>,
}

impl TypeTable {
    fn stateless(&mut self, kind: TypeKind) -> (TypeKey, bool) {
        if let Some(&existing) = self.stateless.get(&kind) {
            return (existing, false);
        }
        let key = self.types.push(TypeData {
            kind,
            params: SmallVec::new(),
        });
        self.stateless.insert(kind, key);
        (key, true)
    }

    fn parameterized(&mut self, data: TypeData) -> (TypeKey, bool) {
        if let Some(&existing) = self.parameterized.get(&data) {
            return (existing, false);
        }
        let kind = data.kind;
        let key = self.types.push(data.clone());
        self.parameterized.insert(data, key);
        self.families.entry(kind).or_default().push(key);
        (key, true)
    }

    pub(crate) fn get(&self, key: TypeKey) -> &TypeData {
        &self.types[key]
    }
}

/// Read view over one parameterized type family.
pub struct TypeFamily<'a> {
    ctx: &'a Context,
    kind: TypeKind,
    members: &'a [TypeKey],
}

impl<'a> TypeFamily<'a> {
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in creation order.
    pub fn iter(&self) -> impl Iterator<Item = TypeRef> + 'a {
        let id = self.ctx.id();
        self.members.iter().map(move |&key| TypeRef::new(id, key))
    }

    /// Existing instance for the given parameters, without creating one.
    pub fn get(&self, params: &[TypeParam]) -> Option<TypeRef> {
        let data = TypeData {
            kind: self.kind,
            params: params.iter().cloned().collect(),
        };
        self.ctx
            .types
            .parameterized
            .get(&data)
            .map(|&key| TypeRef::new(self.ctx.id(), key))
    }
}

// ============================================================================
// Context API
// ============================================================================

impl Context {
    /// Canonical instance of a type kind without parameters.
    pub fn stateless_type(&mut self, kind: TypeKind) -> TypeRef {
        let (key, created) = self.types.stateless(kind);
        if created {
            tracing::trace!(%kind, "stateless type created");
        }
        TypeRef::new(self.id(), key)
    }

    /// Canonical instance of a parameterized type.
    ///
    /// An empty parameter list yields the stateless instance of `kind`.
    ///
    /// # Panics
    ///
    /// Panics if a type parameter belongs to a different context.
    pub fn parameterized_type<P: Into<TypeParam>>(
        &mut self,
        kind: TypeKind,
        params: impl IntoIterator<Item = P>,
    ) -> TypeRef {
        let data = TypeDataBuilder::new(kind).params(params).build();
        self.intern_type(data)
    }

    /// Canonical instance for arbitrary type data.
    ///
    /// Stateless data is routed to the stateless table, so both entry points
    /// agree on identity.
    pub fn intern_type(&mut self, data: TypeData) -> TypeRef {
        if data.is_stateless() {
            return self.stateless_type(data.kind);
        }
        for param in &data.params {
            if let TypeParam::Type(ty) = param {
                self.check_type(*ty);
            }
        }
        let kind = data.kind;
        let (key, created) = self.types.parameterized(data);
        if created {
            tracing::trace!(%kind, "parameterized type created");
        }
        TypeRef::new(self.id(), key)
    }

    /// Keyed cache of one parameterized type family.
    pub fn parameterized_type_dict(&self, kind: TypeKind) -> TypeFamily<'_> {
        let members = self
            .types
            .families
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        TypeFamily {
            ctx: self,
            kind,
            members,
        }
    }

    /// Structural data of a type.
    pub fn type_data(&self, ty: TypeRef) -> &TypeData {
        self.check_type(ty);
        self.types.get(ty.key())
    }

    pub fn type_kind(&self, ty: TypeRef) -> TypeKind {
        self.type_data(ty).kind
    }

    pub fn is_type_kind(&self, ty: TypeRef, kind: TypeKind) -> bool {
        self.type_kind(ty) == kind
    }

    pub fn builtin_type(&mut self, builtin: BuiltinType) -> TypeRef {
        self.stateless_type(builtin.kind())
    }

    pub fn void_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::Void)
    }

    pub fn int_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::Int)
    }

    pub fn float_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::Float)
    }

    pub fn bool_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::Bool)
    }

    pub fn string_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::String)
    }

    pub fn text_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::Text)
    }

    pub fn image_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::Image)
    }

    pub fn audio_type(&mut self) -> TypeRef {
        self.builtin_type(BuiltinType::Audio)
    }

    /// `core.optional(T)`. Optional of an optional collapses to the inner
    /// optional.
    pub fn optional_type(&mut self, element: TypeRef) -> TypeRef {
        if self.optional_element(element).is_some() {
            return element;
        }
        self.parameterized_type(TypeKind::new(CORE(), OPTIONAL()), [element])
    }

    /// Element type if `ty` is `core.optional(T)`.
    pub fn optional_element(&self, ty: TypeRef) -> Option<TypeRef> {
        let data = self.type_data(ty);
        if data.kind != TypeKind::new(CORE(), OPTIONAL()) {
            return None;
        }
        match data.params.first() {
            Some(TypeParam::Type(inner)) => Some(*inner),
            _ => None,
        }
    }

    /// `core.list(T)`.
    pub fn list_type(&mut self, element: TypeRef) -> TypeRef {
        self.parameterized_type(TypeKind::new(CORE(), LIST()), [element])
    }

    /// `core.enum("<name>")`: the type of enumerator literals of one enum.
    pub fn enum_type(&mut self, enum_name: &str) -> TypeRef {
        self.parameterized_type(TypeKind::new(CORE(), ENUM()), [enum_name])
    }

    /// `core.class("<name>")`: the type of a reference to a class of IR objects.
    pub fn class_type(&mut self, class_name: &str) -> TypeRef {
        self.parameterized_type(TypeKind::new(CORE(), CLASS()), [class_name])
    }
}

// ============================================================================
// Attribute
// ============================================================================

/// Constant data attached to an operation by key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Int(i64),
    /// Float stored as raw bits.
    FloatBits(u64),
    String(String),
    Symbol(Symbol),
    Type(TypeRef),
    List(Vec<Attribute>),
}

impl Attribute {
    pub fn float(value: f64) -> Self {
        Attribute::FloatBits(value.to_bits())
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Int(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Attribute::Bool(value)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Attribute::float(value)
    }
}

impl From<Vec<Attribute>> for Attribute {
    fn from(value: Vec<Attribute>) -> Self {
        Attribute::List(value)
    }
}

impl From<Symbol> for Attribute {
    fn from(value: Symbol) -> Self {
        Attribute::Symbol(value)
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Attribute::String(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_string())
    }
}

impl From<TypeRef> for Attribute {
    fn from(value: TypeRef) -> Self {
        Attribute::Type(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stateless_type_is_canonical() {
        let mut ctx = Context::new();
        let a = ctx.int_type();
        let b = ctx.stateless_type(BuiltinType::Int.kind());
        assert_eq!(a, b, "same kind must yield same TypeRef");
        assert_ne!(a, ctx.bool_type());
    }

    #[test]
    fn parameterized_type_is_structural() {
        let mut ctx = Context::new();
        let int = ctx.int_type();
        let kind = TypeKind::new("vn", "handle");
        let a = ctx.parameterized_type(kind, [TypeParam::Type(int), TypeParam::Int(2)]);
        let b = ctx.parameterized_type(kind, [TypeParam::Type(int), TypeParam::Int(2)]);
        let c = ctx.parameterized_type(kind, [TypeParam::Type(int), TypeParam::Int(3)]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let family = ctx.parameterized_type_dict(kind);
        assert_eq!(family.len(), 2);
        assert_eq!(family.iter().collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(
            family.get(&[TypeParam::Type(int), TypeParam::Int(3)]),
            Some(c)
        );
        assert_eq!(family.get(&[TypeParam::Int(9)]), None);
    }

    #[test]
    fn intern_type_with_no_params_is_stateless() {
        let mut ctx = Context::new();
        let kind = TypeKind::new("vn", "device");
        let a = ctx.intern_type(TypeDataBuilder::new(kind).build());
        let b = ctx.stateless_type(kind);
        assert_eq!(a, b);
        assert!(ctx.parameterized_type_dict(kind).is_empty());
    }

    #[test]
    fn optional_collapses() {
        let mut ctx = Context::new();
        let text = ctx.text_type();
        let opt = ctx.optional_type(text);
        assert_eq!(ctx.optional_type(opt), opt);
        assert_eq!(ctx.optional_element(opt), Some(text));
        assert_eq!(ctx.optional_element(text), None);
    }

    #[test]
    fn enum_and_class_types_are_keyed_by_name() {
        let mut ctx = Context::new();
        let a = ctx.enum_type("Transition");
        let b = ctx.enum_type("Transition");
        let c = ctx.class_type("Transition");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    #[should_panic(expected = "belongs to context")]
    fn foreign_type_parameter_panics() {
        let mut other = Context::new();
        let foreign = other.int_type();

        let mut ctx = Context::new();
        ctx.optional_type(foreign);
    }
}
