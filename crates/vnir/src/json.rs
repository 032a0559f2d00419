//! Persisted JSON form.
//!
//! A document holds three tables:
//!
//! ```text
//! {
//!   "file_path": ["story.odt"],
//!   "type": [{"name": "core.int"}, {"name": "core.optional", "type_param": [{"kind": "ref", "ref": 0}]}],
//!   "body": {"type": "core.module", "name": "story", "region": [...]}
//! }
//! ```
//!
//! Types and files are referenced by table index. Values are referenced by
//! a document-local id (`vid`), assigned on first mention. Ints, strings
//! and bools are stored inline; floats are a decimal `sign`/`digit`/`exponent`
//! triple; other literals are `{"kind": "literal", "type": ..., "body": ...}`.
//!
//! Importing reads a document into a fresh [`Context`]. References to values
//! defined later in the document go through placeholders that are replaced
//! once the definition is read.

use std::collections::{HashMap, HashSet};

use derive_more::{Display, Error, From};
use serde_json::{Map, Value, json};
use smallvec::SmallVec;

use crate::context::{Context, OperationBuilder, RegionKind};
use crate::error::IrError;
use crate::literal::{AssetData, AssetKind, Color, LiteralData, LiteralKind};
use crate::location::{Location, SourcePos};
use crate::operand::Arity;
use crate::refs::{BlockRef, FileRef, OpRef, RegionRef, TypeRef, ValueDef, ValueRef};
use crate::symbol::Symbol;
use crate::types::{Attribute, TypeData, TypeKind, TypeParam};

/// Keys used in the persisted form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JsonKey {
    Name,
    Type,
    Body,
    Kind,
    Float,
    Ref,
    Sign,
    Digit,
    Exponent,
    FilePath,
    TypeParam,
    ValueType,
    ValueId,
    Location,
    Region,
    Block,
    Operand,
    Result,
    Attribute,
    Argument,
    Literal,
    Value,
}

impl JsonKey {
    pub const ALL: [JsonKey; 22] = [
        JsonKey::Name,
        JsonKey::Type,
        JsonKey::Body,
        JsonKey::Kind,
        JsonKey::Float,
        JsonKey::Ref,
        JsonKey::Sign,
        JsonKey::Digit,
        JsonKey::Exponent,
        JsonKey::FilePath,
        JsonKey::TypeParam,
        JsonKey::ValueType,
        JsonKey::ValueId,
        JsonKey::Location,
        JsonKey::Region,
        JsonKey::Block,
        JsonKey::Operand,
        JsonKey::Result,
        JsonKey::Attribute,
        JsonKey::Argument,
        JsonKey::Literal,
        JsonKey::Value,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            JsonKey::Name => "name",
            JsonKey::Type => "type",
            JsonKey::Body => "body",
            JsonKey::Kind => "kind",
            JsonKey::Float => "float",
            JsonKey::Ref => "ref",
            JsonKey::Sign => "sign",
            JsonKey::Digit => "digit",
            JsonKey::Exponent => "exponent",
            JsonKey::FilePath => "file_path",
            JsonKey::TypeParam => "type_param",
            JsonKey::ValueType => "vty",
            JsonKey::ValueId => "vid",
            JsonKey::Location => "loc",
            JsonKey::Region => "region",
            JsonKey::Block => "block",
            JsonKey::Operand => "operand",
            JsonKey::Result => "result",
            JsonKey::Attribute => "attr",
            JsonKey::Argument => "arg",
            JsonKey::Literal => "literal",
            JsonKey::Value => "value",
        }
    }
}

impl std::fmt::Display for JsonKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// `kind` values that are not keys themselves.
const KIND_PLACEHOLDER: &str = "placeholder";
const KIND_SEPARATOR: &str = "separator";
const KIND_SYMBOL: &str = "symbol";
const KIND_FIELD: &str = "field";
const REGION_PLAIN: &str = "plain";
const REGION_SYMBOL_TABLE: &str = "symbol_table";

#[derive(Debug, Display, Error, From)]
pub enum JsonError {
    #[display("invalid JSON: {_0}")]
    Syntax(serde_json::Error),

    #[display("malformed IR document: {message}")]
    #[from(ignore)]
    Malformed { message: String },

    #[display("value #{vid} is referenced but never defined")]
    #[from(ignore)]
    UnknownValue { vid: u64 },

    #[display("{_0}")]
    Ir(IrError),
}

fn malformed(message: impl Into<String>) -> JsonError {
    JsonError::Malformed {
        message: message.into(),
    }
}

/// Record a field name of an operation, rejecting repeats.
fn declare_field(fields: &mut HashSet<String>, name: &str, op: &str) -> Result<(), JsonError> {
    if fields.insert(name.to_owned()) {
        Ok(())
    } else {
        Err(malformed(format!("{op} declares field `{name}` twice")))
    }
}

fn key(obj: &mut Map<String, Value>, key: JsonKey, value: Value) {
    obj.insert(key.as_str().to_owned(), value);
}

fn arity_name(arity: Arity) -> &'static str {
    match arity {
        Arity::Single => "single",
        Arity::Optional => "optional",
        Arity::Variadic => "variadic",
    }
}

// ============================================================================
// Export
// ============================================================================

/// Writes one op tree as a JSON document.
///
/// Values referenced from the tree but defined outside it are written as
/// references that never get a definition; importing such a document fails
/// with [`JsonError::UnknownValue`].
pub struct JsonExporter<'a> {
    ctx: &'a Context,
    type_index: HashMap<TypeRef, usize>,
    type_table: Vec<Value>,
    file_index: HashMap<FileRef, usize>,
    file_table: Vec<Value>,
    value_ids: HashMap<ValueRef, u64>,
}

impl<'a> JsonExporter<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            type_index: HashMap::new(),
            type_table: Vec::new(),
            file_index: HashMap::new(),
            file_table: Vec::new(),
            value_ids: HashMap::new(),
        }
    }

    pub fn export(mut self, root: OpRef) -> Value {
        let body = self.op(root);
        json!({
            "file_path": self.file_table,
            "type": self.type_table,
            "body": body,
        })
    }

    fn type_ref(&mut self, ty: TypeRef) -> usize {
        if let Some(&idx) = self.type_index.get(&ty) {
            return idx;
        }
        let ctx = self.ctx;
        let data = ctx.type_data(ty);
        let mut entry = Map::new();
        key(&mut entry, JsonKey::Name, Value::String(data.kind.to_string()));
        if !data.params.is_empty() {
            let params: Vec<Value> = data
                .params
                .iter()
                .map(|param| match param {
                    TypeParam::Type(inner) => {
                        let idx = self.type_ref(*inner);
                        json!({"kind": JsonKey::Ref.as_str(), "ref": idx})
                    }
                    TypeParam::Int(v) => json!(v),
                    TypeParam::Str(s) => json!(s),
                    TypeParam::Bool(b) => json!(b),
                    TypeParam::Separator => json!({"kind": KIND_SEPARATOR}),
                })
                .collect();
            key(&mut entry, JsonKey::TypeParam, Value::Array(params));
        }
        // Parameters are registered first, so an entry only refers backwards
        let idx = self.type_table.len();
        self.type_table.push(Value::Object(entry));
        self.type_index.insert(ty, idx);
        idx
    }

    fn file_ref(&mut self, file: FileRef) -> usize {
        if let Some(&idx) = self.file_index.get(&file) {
            return idx;
        }
        let idx = self.file_table.len();
        self.file_table
            .push(Value::String(self.ctx.file_path(file).to_owned()));
        self.file_index.insert(file, idx);
        idx
    }

    fn vid(&mut self, v: ValueRef) -> u64 {
        let next = self.value_ids.len() as u64;
        *self.value_ids.entry(v).or_insert(next)
    }

    fn value_def(&mut self, v: ValueRef) -> Value {
        let mut entry = Map::new();
        if let Some(name) = self.ctx.value_name(v) {
            key(&mut entry, JsonKey::Name, Value::String(name.to_string()));
        }
        let ty = self.type_ref(self.ctx.value_ty(v));
        key(&mut entry, JsonKey::ValueType, json!(ty));
        key(&mut entry, JsonKey::ValueId, json!(self.vid(v)));
        Value::Object(entry)
    }

    fn value_use(&mut self, v: ValueRef) -> Value {
        if let Some(lit) = self.ctx.literal(v) {
            return self.literal(lit);
        }
        if self.ctx.value_def(v) == ValueDef::Placeholder {
            let ty = self.type_ref(self.ctx.value_ty(v));
            return json!({
                "kind": KIND_PLACEHOLDER,
                "vid": self.vid(v),
                "vty": ty,
            });
        }
        json!({"kind": JsonKey::Ref.as_str(), "ref": self.vid(v)})
    }

    fn literal(&mut self, lit: &LiteralData) -> Value {
        let body = match lit {
            LiteralData::Int(v) => return json!(v),
            LiteralData::Bool(b) => return json!(b),
            LiteralData::String(s) => return json!(s),
            LiteralData::Float(bits) => return float_to_json(f64::from_bits(*bits)),
            LiteralData::StringList(items) => json!(items),
            LiteralData::Enum { ty, variant } => json!({
                "type": ty,
                "value": variant,
            }),
            LiteralData::Color(color) => json!(color.to_string()),
            LiteralData::Asset(asset) => json!({
                "kind": asset.kind.to_string(),
                "type": asset.format,
                "body": asset.bytes.as_ref(),
            }),
        };
        json!({
            "kind": JsonKey::Literal.as_str(),
            "type": lit.kind().to_string(),
            "body": body,
        })
    }

    fn attribute(&mut self, attr: &Attribute) -> Value {
        match attr {
            Attribute::Unit => Value::Null,
            Attribute::Bool(b) => json!(b),
            Attribute::Int(v) => json!(v),
            Attribute::FloatBits(bits) => float_to_json(f64::from_bits(*bits)),
            Attribute::String(s) => json!(s),
            Attribute::Symbol(sym) => json!({
                "kind": KIND_SYMBOL,
                "name": sym.to_string(),
            }),
            Attribute::Type(ty) => {
                let idx = self.type_ref(*ty);
                json!({"kind": JsonKey::Type.as_str(), "ref": idx})
            }
            Attribute::List(items) => Value::Array(items.iter().map(|a| self.attribute(a)).collect()),
        }
    }

    fn op(&mut self, op: OpRef) -> Value {
        let ctx = self.ctx;
        let data = ctx.op(op);
        let mut obj = Map::new();
        key(
            &mut obj,
            JsonKey::Type,
            Value::String(format!("{}.{}", data.dialect, data.name)),
        );
        if let Some(sym_name) = &data.sym_name {
            key(&mut obj, JsonKey::Name, json!(sym_name));
        }
        if let Some(file) = data.location.file {
            let file = self.file_ref(file);
            key(
                &mut obj,
                JsonKey::Location,
                json!({"file_path": file, "value": data.location.pos}),
            );
        }

        if !data.operands.is_empty() {
            let operands = data
                .operands
                .iter()
                .map(|&operand| {
                    let operand = ctx.operand(operand);
                    let mut entry = Map::new();
                    key(&mut entry, JsonKey::Name, json!(operand.name.to_string()));
                    key(&mut entry, JsonKey::Kind, json!(arity_name(operand.arity)));
                    if let Some(constraint) = operand.constraint {
                        key(&mut entry, JsonKey::Type, json!(self.type_ref(constraint)));
                    }
                    let values = operand.values.iter().map(|&v| self.value_use(v)).collect();
                    key(&mut entry, JsonKey::Value, Value::Array(values));
                    Value::Object(entry)
                })
                .collect();
            key(&mut obj, JsonKey::Operand, Value::Array(operands));
        }

        if !data.results.is_empty() {
            let results = data.results.iter().map(|&v| self.value_def(v)).collect();
            key(&mut obj, JsonKey::Result, Value::Array(results));
        }

        if !data.attributes.is_empty() {
            let attrs: Map<String, Value> = data
                .attributes
                .iter()
                .map(|(k, v)| (k.to_string(), self.attribute(v)))
                .collect();
            key(&mut obj, JsonKey::Attribute, Value::Object(attrs));
        }

        if !data.regions.is_empty() {
            let regions = data.regions.iter().map(|&r| self.region(r)).collect();
            key(&mut obj, JsonKey::Region, Value::Array(regions));
        }

        if !data.blocks.is_empty() {
            let blocks = data
                .blocks
                .iter()
                .map(|&block| {
                    let name = ctx.block(block).name.map(|n| n.to_string());
                    match ctx.parent_region(block) {
                        Some(region) => json!({
                            "name": name,
                            "region": ctx.region(region).name.to_string(),
                        }),
                        None => self.block(block, false),
                    }
                })
                .collect();
            key(&mut obj, JsonKey::Block, Value::Array(blocks));
        }

        Value::Object(obj)
    }

    fn region(&mut self, region: RegionRef) -> Value {
        let ctx = self.ctx;
        let data = ctx.region(region);
        let kind = match data.kind {
            RegionKind::Plain => REGION_PLAIN,
            RegionKind::SymbolTable => REGION_SYMBOL_TABLE,
        };
        let blocks: Vec<Value> = data
            .blocks
            .iter()
            .map(|&b| self.block(b, ctx.block(b).field_of.is_some()))
            .collect();
        json!({
            "name": data.name.to_string(),
            "kind": kind,
            "block": blocks,
        })
    }

    fn block(&mut self, block: BlockRef, is_field: bool) -> Value {
        let ctx = self.ctx;
        let data = ctx.block(block);
        let mut obj = Map::new();
        if let Some(name) = data.name {
            key(&mut obj, JsonKey::Name, json!(name.to_string()));
        }
        if is_field {
            key(&mut obj, JsonKey::Kind, json!(KIND_FIELD));
        }
        if !data.args.is_empty() {
            let args = data.args.iter().map(|&v| self.value_def(v)).collect();
            key(&mut obj, JsonKey::Argument, Value::Array(args));
        }
        let ops = data.ops.iter().map(|&op| self.op(op)).collect();
        key(&mut obj, JsonKey::Body, Value::Array(ops));
        Value::Object(obj)
    }
}

/// Serialize the tree under `root` as pretty-printed JSON.
pub fn export_json(ctx: &Context, root: OpRef) -> String {
    format!("{:#}", JsonExporter::new(ctx).export(root))
}

/// Decimal triple from the shortest representation that round-trips.
fn float_to_json(v: f64) -> Value {
    let sign = u8::from(v.is_sign_negative());
    let (digits, exponent) = if v.is_nan() {
        (Vec::new(), json!("n"))
    } else if v.is_infinite() {
        (Vec::new(), json!("F"))
    } else {
        let text = format!("{:e}", v.abs());
        let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let exp: i64 = exp.parse().unwrap_or(0);
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let digits: Vec<u8> = int_part
            .chars()
            .chain(frac_part.chars())
            .filter_map(|c| c.to_digit(10).map(|d| d as u8))
            .collect();
        (digits, json!(exp - frac_part.len() as i64))
    };
    json!({
        "kind": JsonKey::Float.as_str(),
        "sign": sign,
        "digit": digits,
        "exponent": exponent,
    })
}

// ============================================================================
// Import
// ============================================================================

fn object<'v>(value: &'v Value, what: &str) -> Result<&'v Map<String, Value>, JsonError> {
    value
        .as_object()
        .ok_or_else(|| malformed(format!("{what} must be an object")))
}

fn array<'v>(value: &'v Value, what: &str) -> Result<&'v [Value], JsonError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(format!("{what} must be an array")))
}

fn string<'v>(value: &'v Value, what: &str) -> Result<&'v str, JsonError> {
    value
        .as_str()
        .ok_or_else(|| malformed(format!("{what} must be a string")))
}

fn index(value: &Value, what: &str) -> Result<u64, JsonError> {
    value
        .as_u64()
        .ok_or_else(|| malformed(format!("{what} must be a non-negative integer")))
}

fn required<'v>(
    obj: &'v Map<String, Value>,
    key: JsonKey,
    what: &str,
) -> Result<&'v Value, JsonError> {
    obj.get(key.as_str())
        .ok_or_else(|| malformed(format!("{what} is missing `{key}`")))
}

/// Optional array field; absent means empty.
fn list<'v>(obj: &'v Map<String, Value>, key: JsonKey, what: &str) -> Result<&'v [Value], JsonError> {
    match obj.get(key.as_str()) {
        Some(value) => array(value, &format!("{what}.{key}")),
        None => Ok(&[]),
    }
}

fn split_name<'s>(full: &'s str, what: &str) -> Result<(&'s str, &'s str), JsonError> {
    full.split_once('.')
        .filter(|(dialect, name)| !dialect.is_empty() && !name.is_empty())
        .ok_or_else(|| malformed(format!("{what} `{full}` is not of the form `dialect.name`")))
}

fn float_from_json(obj: &Map<String, Value>) -> Result<f64, JsonError> {
    let sign = index(required(obj, JsonKey::Sign, "float")?, "float sign")?;
    let digits = array(required(obj, JsonKey::Digit, "float")?, "float digits")?;
    let exponent = required(obj, JsonKey::Exponent, "float")?;
    let negative = sign != 0;
    let magnitude = match exponent.as_str() {
        Some("n") => f64::NAN,
        Some("F") => f64::INFINITY,
        Some(other) => return Err(malformed(format!("unknown float exponent `{other}`"))),
        None => {
            let exponent = exponent
                .as_i64()
                .ok_or_else(|| malformed("float exponent must be an integer"))?;
            let mut text = String::with_capacity(digits.len() + 8);
            for digit in digits {
                match digit.as_u64() {
                    Some(d) if d < 10 => text.push(char::from(b'0' + d as u8)),
                    _ => return Err(malformed("float digits must be decimal digits")),
                }
            }
            if text.is_empty() {
                text.push('0');
            }
            format!("{text}e{exponent}")
                .parse::<f64>()
                .map_err(|e| malformed(format!("invalid float: {e}")))?
        }
    };
    Ok(if negative { -magnitude } else { magnitude })
}

/// Reads a JSON document into a fresh [`Context`].
///
/// Dialect, operation, field and attribute names from the document are
/// interned as [`Symbol`]s. The interner is process-global and never shrinks,
/// so every distinct name stays allocated until the process exits. That is
/// fine for one-shot tools like `vnc`; long-running hosts importing untrusted
/// documents should keep this in mind.
pub struct JsonImporter {
    ctx: Context,
    types: Vec<TypeRef>,
    files: Vec<FileRef>,
    values: HashMap<u64, ValueRef>,
    /// Placeholders standing in for values referenced before their definition.
    pending: HashMap<u64, ValueRef>,
}

impl Default for JsonImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonImporter {
    pub fn new() -> Self {
        Self {
            ctx: Context::new(),
            types: Vec::new(),
            files: Vec::new(),
            values: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Import a parsed document, returning the context and the root op.
    pub fn import(mut self, doc: &Value) -> Result<(Context, OpRef), JsonError> {
        let doc = object(doc, "document")?;
        for path in list(doc, JsonKey::FilePath, "document")? {
            let file = self.ctx.di_file(string(path, "file path")?);
            self.files.push(file);
        }
        for entry in list(doc, JsonKey::Type, "document")? {
            let ty = self.type_entry(entry)?;
            self.types.push(ty);
        }
        let root = self.op(required(doc, JsonKey::Body, "document")?)?;

        if let Some(vid) = self.pending.keys().min().copied() {
            return Err(JsonError::UnknownValue { vid });
        }
        tracing::debug!(
            %root,
            types = self.types.len(),
            values = self.values.len(),
            "imported IR document"
        );
        Ok((self.ctx, root))
    }

    fn type_entry(&mut self, entry: &Value) -> Result<TypeRef, JsonError> {
        let entry = object(entry, "type entry")?;
        let name = string(required(entry, JsonKey::Name, "type entry")?, "type name")?;
        let (dialect, name) = split_name(name, "type name")?;
        let mut params = SmallVec::new();
        for param in list(entry, JsonKey::TypeParam, "type entry")? {
            let param = match param {
                Value::Bool(b) => TypeParam::Bool(*b),
                Value::String(s) => TypeParam::Str(s.clone()),
                Value::Number(n) => TypeParam::Int(
                    n.as_i64()
                        .ok_or_else(|| malformed(format!("type parameter {n} is not an i64")))?,
                ),
                Value::Object(obj) => match string(required(obj, JsonKey::Kind, "type parameter")?, "kind")? {
                    KIND_SEPARATOR => TypeParam::Separator,
                    kind if kind == JsonKey::Ref.as_str() => {
                        TypeParam::Type(self.type_at(required(obj, JsonKey::Ref, "type parameter")?)?)
                    }
                    other => return Err(malformed(format!("unknown type parameter kind `{other}`"))),
                },
                other => return Err(malformed(format!("invalid type parameter {other}"))),
            };
            params.push(param);
        }
        Ok(self.ctx.intern_type(TypeData {
            kind: TypeKind::new(Symbol::from_dynamic(dialect), Symbol::from_dynamic(name)),
            params,
        }))
    }

    /// Resolve a type table index; only earlier entries are visible.
    fn type_at(&self, value: &Value) -> Result<TypeRef, JsonError> {
        let idx = index(value, "type reference")?;
        self.types
            .get(idx as usize)
            .copied()
            .ok_or_else(|| malformed(format!("type #{idx} is not defined")))
    }

    fn location(&self, value: Option<&Value>) -> Result<Location, JsonError> {
        let Some(value) = value else {
            return Ok(Location::UNKNOWN);
        };
        let obj = object(value, "location")?;
        let idx = index(required(obj, JsonKey::FilePath, "location")?, "file reference")?;
        let file = self
            .files
            .get(idx as usize)
            .copied()
            .ok_or_else(|| malformed(format!("file #{idx} is not defined")))?;
        let pos: SourcePos = serde_json::from_value(required(obj, JsonKey::Value, "location")?.clone())?;
        Ok(Location::new(file, pos))
    }

    fn literal(&mut self, obj: &Map<String, Value>) -> Result<ValueRef, JsonError> {
        let kind_name = string(required(obj, JsonKey::Type, "literal")?, "literal type")?;
        let body = required(obj, JsonKey::Body, "literal")?;
        let data = match LiteralKind::from_name(kind_name) {
            Some(LiteralKind::StringList) => LiteralData::StringList(
                array(body, "string list")?
                    .iter()
                    .map(|item| string(item, "string list item").map(str::to_owned))
                    .collect::<Result<_, _>>()?,
            ),
            Some(LiteralKind::Enum) => {
                let body = object(body, "enum literal")?;
                LiteralData::Enum {
                    ty: string(required(body, JsonKey::Type, "enum literal")?, "enum type")?.to_owned(),
                    variant: string(required(body, JsonKey::Value, "enum literal")?, "enum variant")?
                        .to_owned(),
                }
            }
            Some(LiteralKind::Color) => {
                let text = string(body, "color")?;
                LiteralData::Color(Color::parse(text).map_err(|e| malformed(e.to_string()))?)
            }
            Some(LiteralKind::Asset) => {
                let body = object(body, "asset literal")?;
                let kind = match string(required(body, JsonKey::Kind, "asset literal")?, "asset kind")? {
                    "bytes" => AssetKind::Bytes,
                    "image" => AssetKind::Image,
                    "audio" => AssetKind::Audio,
                    other => return Err(malformed(format!("unknown asset kind `{other}`"))),
                };
                let format = match body.get(JsonKey::Type.as_str()) {
                    None | Some(Value::Null) => None,
                    Some(format) => Some(string(format, "asset format")?),
                };
                let bytes: Vec<u8> =
                    serde_json::from_value(required(body, JsonKey::Body, "asset literal")?.clone())?;
                LiteralData::Asset(AssetData::new(kind, format, bytes))
            }
            Some(kind) => {
                return Err(malformed(format!(
                    "{kind} literals are stored inline, not as `literal` objects"
                )));
            }
            None => return Err(malformed(format!("unknown literal type `{kind_name}`"))),
        };
        Ok(self.ctx.get_or_create_literal(data))
    }

    /// Resolve a value mention. A forward reference gets a `void`
    /// placeholder that is replaced once the value is defined.
    fn value(&mut self, value: &Value) -> Result<ValueRef, JsonError> {
        let obj = match value {
            Value::Bool(b) => return Ok(self.ctx.bool_literal(*b)),
            Value::String(s) => return Ok(self.ctx.string_literal(s)),
            Value::Number(n) => {
                return match n.as_i64() {
                    Some(v) => Ok(self.ctx.int_literal(v)),
                    None => Err(malformed(format!("integer literal {n} is out of range"))),
                };
            }
            Value::Object(obj) => obj,
            other => return Err(malformed(format!("invalid value {other}"))),
        };
        match string(required(obj, JsonKey::Kind, "value")?, "value kind")? {
            kind if kind == JsonKey::Ref.as_str() => {
                let vid = index(required(obj, JsonKey::Ref, "value reference")?, "value id")?;
                if let Some(&v) = self.values.get(&vid).or_else(|| self.pending.get(&vid)) {
                    return Ok(v);
                }
                let void = self.ctx.void_type();
                let placeholder = self.ctx.create_placeholder(void);
                self.pending.insert(vid, placeholder);
                Ok(placeholder)
            }
            kind if kind == JsonKey::Float.as_str() => {
                let v = float_from_json(obj)?;
                Ok(self.ctx.float_literal(v))
            }
            kind if kind == JsonKey::Literal.as_str() => self.literal(obj),
            KIND_PLACEHOLDER => {
                let vid = index(required(obj, JsonKey::ValueId, "placeholder")?, "value id")?;
                if let Some(&v) = self.values.get(&vid) {
                    return Ok(v);
                }
                let ty = self.type_at(required(obj, JsonKey::ValueType, "placeholder")?)?;
                let placeholder = self.ctx.create_placeholder(ty);
                self.define(vid, placeholder)?;
                Ok(placeholder)
            }
            other => Err(malformed(format!("unknown value kind `{other}`"))),
        }
    }

    /// Bind `vid` to a freshly defined value, resolving earlier references.
    fn define(&mut self, vid: u64, v: ValueRef) -> Result<(), JsonError> {
        if self.values.insert(vid, v).is_some() {
            return Err(malformed(format!("value #{vid} is defined twice")));
        }
        let Some(placeholder) = self.pending.remove(&vid) else {
            return Ok(());
        };
        let ty = self.ctx.value_ty(v);
        // A placeholder defined by the document is checked when it is resolved.
        let uses = match self.ctx.value_def(v) {
            ValueDef::Placeholder => &[][..],
            _ => self.ctx.uses(placeholder),
        };
        for u in uses {
            let Some(expected) = self.ctx.operand(u.operand).constraint else {
                continue;
            };
            if expected != ty {
                return Err(malformed(format!(
                    "value #{vid} has type {}, but is used where {} is expected",
                    self.ctx.type_display(ty),
                    self.ctx.type_display(expected),
                )));
            }
        }
        self.ctx.replace_all_uses_with(placeholder, v);
        self.ctx.erase_placeholder(placeholder);
        Ok(())
    }

    /// Name and type of a result or block argument entry, plus its id.
    fn value_def(
        &self,
        entry: &Value,
        what: &str,
        position: usize,
    ) -> Result<(Symbol, TypeRef, u64), JsonError> {
        let obj = object(entry, what)?;
        let ty = self.type_at(required(obj, JsonKey::ValueType, what)?)?;
        let vid = index(required(obj, JsonKey::ValueId, what)?, "value id")?;
        let name = match obj.get(JsonKey::Name.as_str()) {
            Some(name) => Symbol::from_dynamic(string(name, "value name")?),
            None => {
                let name = format!("{what}{position}");
                tracing::warn!(vid, %name, "unnamed {what}; using a generated name");
                Symbol::from_dynamic(&name)
            }
        };
        Ok((name, ty, vid))
    }

    fn op(&mut self, value: &Value) -> Result<OpRef, JsonError> {
        let obj = object(value, "operation")?;
        let full_name = string(required(obj, JsonKey::Type, "operation")?, "operation type")?;
        let (dialect, name) = split_name(full_name, "operation type")?;
        let location = self.location(obj.get(JsonKey::Location.as_str()))?;
        let mut builder = OperationBuilder::new(
            location,
            Symbol::from_dynamic(dialect),
            Symbol::from_dynamic(name),
        );
        if let Some(sym_name) = obj.get(JsonKey::Name.as_str()) {
            builder = builder.sym_name(string(sym_name, "symbol name")?);
        }
        let mut fields = HashSet::new();

        for entry in list(obj, JsonKey::Operand, full_name)? {
            let entry = object(entry, "operand")?;
            let name = string(required(entry, JsonKey::Name, "operand")?, "operand name")?;
            let arity = match string(required(entry, JsonKey::Kind, "operand")?, "operand kind")? {
                "single" => Arity::Single,
                "optional" => Arity::Optional,
                "variadic" => Arity::Variadic,
                other => return Err(malformed(format!("unknown operand kind `{other}`"))),
            };
            let constraint = entry
                .get(JsonKey::Type.as_str())
                .map(|ty| self.type_at(ty))
                .transpose()?;
            let mut values = Vec::new();
            for v in list(entry, JsonKey::Value, "operand")? {
                values.push(self.value(v)?);
            }
            if let Some(expected) = constraint {
                for &v in &values {
                    let ty = self.ctx.value_ty(v);
                    if self.ctx.value_def(v) != ValueDef::Placeholder && ty != expected {
                        return Err(malformed(format!(
                            "operand `{name}` of {full_name} expects {}, got a value of type {}",
                            self.ctx.type_display(expected),
                            self.ctx.type_display(ty),
                        )));
                    }
                }
            }
            if arity.max_len().is_some_and(|max| values.len() > max) {
                return Err(malformed(format!(
                    "operand `{name}` of {full_name} holds {} values",
                    values.len()
                )));
            }
            declare_field(&mut fields, name, full_name)?;
            builder = builder.operand_with(Symbol::from_dynamic(name), arity, constraint, values);
        }

        let mut result_ids = Vec::new();
        for (idx, entry) in list(obj, JsonKey::Result, full_name)?.iter().enumerate() {
            let (name, ty, vid) = self.value_def(entry, "result", idx)?;
            name.with_str(|n| declare_field(&mut fields, n, full_name))?;
            builder = builder.result(name, ty);
            result_ids.push(vid);
        }

        if let Some(attrs) = obj.get(JsonKey::Attribute.as_str()) {
            for (k, v) in object(attrs, "attributes")? {
                let attr = self.attribute(v)?;
                builder = builder.attr(Symbol::from_dynamic(k), attr);
            }
        }

        let regions = list(obj, JsonKey::Region, full_name)?;
        let mut plain_regions = HashSet::new();
        for region in regions {
            let region = object(region, "region")?;
            let region_name = string(required(region, JsonKey::Name, "region")?, "region name")?;
            declare_field(&mut fields, region_name, full_name)?;
            let name = Symbol::from_dynamic(region_name);
            builder = match string(required(region, JsonKey::Kind, "region")?, "region kind")? {
                REGION_PLAIN => {
                    plain_regions.insert(region_name);
                    builder.region(name)
                }
                REGION_SYMBOL_TABLE => builder.symbol_table(name),
                other => return Err(malformed(format!("unknown region kind `{other}`"))),
            };
        }

        let block_fields = list(obj, JsonKey::Block, full_name)?;
        for field in block_fields {
            let field = object(field, "block field")?;
            let name = string(required(field, JsonKey::Name, "block field")?, "block name")?;
            declare_field(&mut fields, name, full_name)?;
            let parent = field
                .get(JsonKey::Region.as_str())
                .map(|r| string(r, "block region"))
                .transpose()?;
            match parent {
                Some(parent) if !plain_regions.contains(parent) => {
                    return Err(malformed(format!(
                        "block field `{name}` of {full_name} names `{parent}`, which is not a plain region"
                    )));
                }
                _ => {}
            }
            builder = builder.block(Symbol::from_dynamic(name), parent.map(Symbol::from_dynamic));
        }

        let op = self.ctx.create_op(builder);
        for (idx, vid) in result_ids.into_iter().enumerate() {
            let v = self.ctx.op_result(op, idx);
            self.define(vid, v)?;
        }

        for (idx, region) in regions.iter().enumerate() {
            let r = self.ctx.op_regions(op)[idx];
            self.region_contents(op, r, object(region, "region")?)?;
        }
        for field in block_fields {
            let field = object(field, "block field")?;
            if field.contains_key(JsonKey::Region.as_str()) {
                continue;
            }
            let name = string(required(field, JsonKey::Name, "block field")?, "block name")?;
            let Some(block) = self.ctx.op_block(op, Symbol::from_dynamic(name)) else {
                return Err(malformed(format!("{full_name} has no block field `{name}`")));
            };
            self.block_contents(block, field)?;
        }
        Ok(op)
    }

    fn region_contents(
        &mut self,
        op: OpRef,
        region: RegionRef,
        obj: &Map<String, Value>,
    ) -> Result<(), JsonError> {
        let blocks = list(obj, JsonKey::Block, "region")?;
        if self.ctx.is_symbol_table(region) {
            let [block] = blocks else {
                return Err(malformed("a symbol table holds exactly one block"));
            };
            let block = object(block, "block")?;
            for entry in list(block, JsonKey::Body, "block")? {
                let symbol = self.op(entry)?;
                let anonymous = self.ctx.sym_name(symbol).is_none();
                self.ctx.add_symbol(region, symbol)?;
                if anonymous {
                    tracing::warn!(
                        %region,
                        name = self.ctx.sym_name(symbol).unwrap_or_default(),
                        "symbol without a name; assigned an anonymous one"
                    );
                }
            }
            return Ok(());
        }

        let mut order: SmallVec<[BlockRef; 2]> = SmallVec::new();
        for block in blocks {
            let entry = object(block, "block")?;
            let name = entry
                .get(JsonKey::Name.as_str())
                .map(|n| string(n, "block name").map(Symbol::from_dynamic))
                .transpose()?;
            let is_field = match entry.get(JsonKey::Kind.as_str()) {
                Some(kind) => string(kind, "block kind")? == KIND_FIELD,
                None => false,
            };
            let b = if is_field {
                // Field blocks already sit in the region; each may be listed once.
                let field = name
                    .and_then(|n| self.ctx.op_block(op, n))
                    .filter(|&b| self.ctx.parent_region(b) == Some(region));
                let b = field
                    .ok_or_else(|| malformed(format!("{region} lists an undeclared block field")))?;
                if order.contains(&b) {
                    return Err(malformed(format!("{region} lists {b} twice")));
                }
                b
            } else {
                let b = self.ctx.create_block(name, []);
                self.ctx.append_block(region, b);
                b
            };
            order.push(b);
        }
        if order.len() != self.ctx.region_blocks(region).len() {
            return Err(malformed(format!(
                "{region} does not list all of its block fields"
            )));
        }
        self.ctx.regions[region.key()].blocks = order.clone();

        for (b, block) in order.into_iter().zip(blocks) {
            self.block_contents(b, object(block, "block")?)?;
        }
        Ok(())
    }

    fn block_contents(&mut self, block: BlockRef, obj: &Map<String, Value>) -> Result<(), JsonError> {
        for (idx, arg) in list(obj, JsonKey::Argument, "block")?.iter().enumerate() {
            let (name, ty, vid) = self.value_def(arg, "arg", idx)?;
            let v = self.ctx.add_block_argument(block, name, ty);
            self.define(vid, v)?;
        }
        for entry in list(obj, JsonKey::Body, "block")? {
            let op = self.op(entry)?;
            self.ctx.push_op(block, op);
        }
        Ok(())
    }

    fn attribute(&self, value: &Value) -> Result<Attribute, JsonError> {
        Ok(match value {
            Value::Null => Attribute::Unit,
            Value::Bool(b) => Attribute::Bool(*b),
            Value::Number(n) => Attribute::Int(
                n.as_i64()
                    .ok_or_else(|| malformed(format!("attribute {n} is not an i64")))?,
            ),
            Value::String(s) => Attribute::String(s.clone()),
            Value::Array(items) => Attribute::List(
                items
                    .iter()
                    .map(|item| self.attribute(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(obj) => match string(required(obj, JsonKey::Kind, "attribute")?, "attribute kind")? {
                KIND_SYMBOL => Attribute::Symbol(Symbol::from_dynamic(string(
                    required(obj, JsonKey::Name, "symbol attribute")?,
                    "symbol",
                )?)),
                kind if kind == JsonKey::Float.as_str() => Attribute::float(float_from_json(obj)?),
                kind if kind == JsonKey::Type.as_str() => {
                    Attribute::Type(self.type_at(required(obj, JsonKey::Ref, "type attribute")?)?)
                }
                other => return Err(malformed(format!("unknown attribute kind `{other}`"))),
            },
        })
    }
}

/// Parse and import a JSON document.
pub fn import_json(text: &str) -> Result<(Context, OpRef), JsonError> {
    let doc: Value = serde_json::from_str(text)?;
    JsonImporter::new().import(&doc)
}
