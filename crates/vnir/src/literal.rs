//! Canonical literal values.
//!
//! Every literal is a [`ValueRef`] owned by the [`Context`]. Literals are
//! uniqued by payload inside one dictionary per [`LiteralKind`], so asking
//! twice for the integer `3` yields the same value.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cranelift_entity::PrimaryMap;
use derive_more::{Display, Error};

use crate::context::Context;
use crate::refs::{LiteralKey, LiteralRef, TypeRef, ValueDef, ValueKey, ValueRef};
use crate::types::BuiltinType;

// ============================================================================
// Color
// ============================================================================

/// RGBA color with 8-bit channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

const PREDEFINED_COLORS: &[(&str, Color)] = &[
    ("transparent", Color::rgba(0, 0, 0, 0)),
    ("透明", Color::rgba(0, 0, 0, 0)),
    ("red", Color::rgb(255, 0, 0)),
    ("红色", Color::rgb(255, 0, 0)),
    ("green", Color::rgb(0, 255, 0)),
    ("绿色", Color::rgb(0, 255, 0)),
    ("blue", Color::rgb(0, 0, 255)),
    ("蓝色", Color::rgb(0, 0, 255)),
    ("white", Color::rgb(255, 255, 255)),
    ("白色", Color::rgb(255, 255, 255)),
    ("black", Color::rgb(0, 0, 0)),
    ("黑色", Color::rgb(0, 0, 0)),
];

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Look up a predefined color name (English or Chinese).
    pub fn predefined(name: &str) -> Option<Color> {
        PREDEFINED_COLORS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|&(_, color)| color)
    }

    /// Parse `#rrggbb`, `#rrggbbaa` or a predefined name.
    pub fn parse(text: &str) -> Result<Color, ColorParseError> {
        let text = text.trim();
        if let Some(color) = Color::predefined(text) {
            return Ok(color);
        }
        let invalid = || ColorParseError {
            input: text.to_owned(),
        };
        let hex = text.strip_prefix('#').ok_or_else(invalid)?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Ok(Color::rgba(channel(0)?, channel(2)?, channel(4)?, a))
    }
}

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::parse(s)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

/// A string that is neither a hex color nor a predefined color name.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("invalid color `{input}`")]
pub struct ColorParseError {
    pub input: String,
}

// ============================================================================
// AssetData
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum AssetKind {
    #[display("bytes")]
    Bytes,
    #[display("image")]
    Image,
    #[display("audio")]
    Audio,
}

impl AssetKind {
    pub fn builtin_type(self) -> BuiltinType {
        match self {
            AssetKind::Bytes => BuiltinType::Bytes,
            AssetKind::Image => BuiltinType::Image,
            AssetKind::Audio => BuiltinType::Audio,
        }
    }
}

/// Embedded asset payload, uniqued by content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AssetData {
    pub kind: AssetKind,
    /// File format hint such as `png` or `ogg`.
    pub format: Option<String>,
    pub bytes: Arc<[u8]>,
}

impl AssetData {
    pub fn new(kind: AssetKind, format: Option<&str>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind,
            format: format.map(str::to_owned),
            bytes: bytes.into(),
        }
    }
}

// ============================================================================
// LiteralData
// ============================================================================

/// Payload of a literal value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LiteralData {
    Int(i64),
    /// Raw `f64` bits; canonicalized on insertion so `-0.0` equals `0.0`
    /// and every NaN is one literal.
    Float(u64),
    Bool(bool),
    String(String),
    StringList(Vec<String>),
    Enum {
        ty: String,
        variant: String,
    },
    Color(Color),
    Asset(AssetData),
}

/// Literal family; one uniquing dictionary per kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum LiteralKind {
    #[display("int")]
    Int,
    #[display("float")]
    Float,
    #[display("bool")]
    Bool,
    #[display("string")]
    String,
    #[display("string_list")]
    StringList,
    #[display("enum")]
    Enum,
    #[display("color")]
    Color,
    #[display("asset")]
    Asset,
}

impl LiteralKind {
    pub const ALL: [LiteralKind; 8] = [
        LiteralKind::Int,
        LiteralKind::Float,
        LiteralKind::Bool,
        LiteralKind::String,
        LiteralKind::StringList,
        LiteralKind::Enum,
        LiteralKind::Color,
        LiteralKind::Asset,
    ];

    pub fn from_name(name: &str) -> Option<LiteralKind> {
        LiteralKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == name)
    }
}

fn canonical_float_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

impl LiteralData {
    pub fn float(value: f64) -> Self {
        LiteralData::Float(canonical_float_bits(value))
    }

    pub fn kind(&self) -> LiteralKind {
        match self {
            LiteralData::Int(_) => LiteralKind::Int,
            LiteralData::Float(_) => LiteralKind::Float,
            LiteralData::Bool(_) => LiteralKind::Bool,
            LiteralData::String(_) => LiteralKind::String,
            LiteralData::StringList(_) => LiteralKind::StringList,
            LiteralData::Enum { .. } => LiteralKind::Enum,
            LiteralData::Color(_) => LiteralKind::Color,
            LiteralData::Asset(_) => LiteralKind::Asset,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            LiteralData::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    fn canonicalize(self) -> Self {
        match self {
            LiteralData::Float(bits) => LiteralData::float(f64::from_bits(bits)),
            other => other,
        }
    }
}

// ============================================================================
// LiteralTable
// ============================================================================

#[derive(Debug)]
struct LiteralEntry {
    data: LiteralData,
    value: ValueKey,
}

/// Insertion-ordered payload index of one literal family.
#[derive(Debug, Default)]
struct UniquingDict {
    index: HashMap<LiteralData, LiteralKey>,
    order: Vec<LiteralKey>,
}

/// Per-context literal storage.
#[derive(Debug, Default)]
pub(crate) struct LiteralTable {
    entries: PrimaryMap<LiteralKey, LiteralEntry>,
    dicts: HashMap<LiteralKind, UniquingDict>,
}

/// Read view over one literal family.
pub struct LiteralFamily<'a> {
    ctx: &'a Context,
    kind: LiteralKind,
    dict: Option<&'a UniquingDict>,
}

impl<'a> LiteralFamily<'a> {
    pub fn kind(&self) -> LiteralKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.dict.map_or(0, |d| d.order.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Literal values in creation order.
    pub fn iter(&self) -> impl Iterator<Item = ValueRef> + 'a {
        let ctx = self.ctx;
        self.dict
            .into_iter()
            .flat_map(|d| d.order.iter())
            .map(move |&key| ValueRef::new(ctx.id(), ctx.literals.entries[key].value))
    }

    /// Existing literal for a payload, without creating one.
    pub fn get(&self, data: &LiteralData) -> Option<ValueRef> {
        let data = data.clone().canonicalize();
        let key = *self.dict?.index.get(&data)?;
        Some(ValueRef::new(
            self.ctx.id(),
            self.ctx.literals.entries[key].value,
        ))
    }
}

// ============================================================================
// Context API
// ============================================================================

impl Context {
    /// Canonical literal value for a payload.
    pub fn get_or_create_literal(&mut self, data: LiteralData) -> ValueRef {
        let data = data.canonicalize();
        let kind = data.kind();
        if let Some(&key) = self
            .literals
            .dicts
            .get(&kind)
            .and_then(|d| d.index.get(&data))
        {
            return ValueRef::new(self.id(), self.literals.entries[key].value);
        }

        let ty = self.literal_type(&data);
        let key = self.literals.entries.next_key();
        let value = self.push_value(
            ValueDef::Literal(LiteralRef::new(self.id(), key)),
            ty,
            None,
        );
        self.literals.entries.push(LiteralEntry {
            data: data.clone(),
            value: value.key(),
        });
        let dict = self.literals.dicts.entry(kind).or_default();
        dict.index.insert(data, key);
        dict.order.push(key);
        tracing::trace!(%value, %kind, "literal created");
        value
    }

    /// Read view over the literals of one kind.
    pub fn constant_uniquing_dict(&self, kind: LiteralKind) -> LiteralFamily<'_> {
        LiteralFamily {
            ctx: self,
            kind,
            dict: self.literals.dicts.get(&kind),
        }
    }

    fn literal_type(&mut self, data: &LiteralData) -> TypeRef {
        match data {
            LiteralData::Int(_) => self.int_type(),
            LiteralData::Float(_) => self.float_type(),
            LiteralData::Bool(_) => self.bool_type(),
            LiteralData::String(_) => self.string_type(),
            LiteralData::StringList(_) => {
                let string = self.string_type();
                self.list_type(string)
            }
            LiteralData::Enum { ty, .. } => self.enum_type(ty),
            LiteralData::Color(_) => self.builtin_type(BuiltinType::Color),
            LiteralData::Asset(asset) => self.builtin_type(asset.kind.builtin_type()),
        }
    }

    /// Payload of `value` if it is a literal.
    pub fn literal(&self, value: ValueRef) -> Option<&LiteralData> {
        match self.value_def(value) {
            ValueDef::Literal(lit) => Some(self.literal_data(lit)),
            _ => None,
        }
    }

    pub fn literal_data(&self, lit: LiteralRef) -> &LiteralData {
        assert!(
            lit.context_id() == self.id(),
            "{lit} belongs to {}, not {}",
            lit.context_id(),
            self.id()
        );
        &self.literals.entries[lit.key()].data
    }

    pub fn int_literal(&mut self, value: i64) -> ValueRef {
        self.get_or_create_literal(LiteralData::Int(value))
    }

    pub fn float_literal(&mut self, value: f64) -> ValueRef {
        self.get_or_create_literal(LiteralData::float(value))
    }

    pub fn bool_literal(&mut self, value: bool) -> ValueRef {
        self.get_or_create_literal(LiteralData::Bool(value))
    }

    pub fn string_literal(&mut self, value: &str) -> ValueRef {
        self.get_or_create_literal(LiteralData::String(value.to_owned()))
    }

    pub fn string_list_literal<S: Into<String>>(
        &mut self,
        values: impl IntoIterator<Item = S>,
    ) -> ValueRef {
        self.get_or_create_literal(LiteralData::StringList(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    /// Enumerator `variant` of the enum named `ty`.
    pub fn enum_literal(&mut self, ty: &str, variant: &str) -> ValueRef {
        self.get_or_create_literal(LiteralData::Enum {
            ty: ty.to_owned(),
            variant: variant.to_owned(),
        })
    }

    pub fn color_literal(&mut self, color: Color) -> ValueRef {
        self.get_or_create_literal(LiteralData::Color(color))
    }

    pub fn asset_literal(&mut self, asset: AssetData) -> ValueRef {
        self.get_or_create_literal(LiteralData::Asset(asset))
    }
}
