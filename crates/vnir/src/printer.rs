//! Text format printer.
//!
//! Produces a readable dump of an operation tree:
//!
//! ```text
//! core.module @story body {
//!     vn.scene @intro {title = "Intro"} body {
//!         %0 = vn.const {value = 3} : core.int
//!         vn.say(text: "Hello", voice: -, args: [%0, 4])
//!     }
//! }
//! ```
//!
//! Results and block arguments are numbered in pre-order. Literals are
//! printed inline at their use. Values defined outside the printed tree
//! show up as `%?v<N>`.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

use crate::context::Context;
use crate::literal::LiteralData;
use crate::operand::Arity;
use crate::refs::{BlockRef, OpRef, RegionRef, TypeRef, ValueRef};
use crate::types::{Attribute, TypeParam};

/// Print state for value numbering and block labeling.
struct PrintState<'a> {
    ctx: &'a Context,
    value_names: HashMap<ValueRef, String>,
    block_labels: HashMap<BlockRef, String>,
    next_value_num: usize,
    next_block_num: usize,
}

impl<'a> PrintState<'a> {
    fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            value_names: HashMap::new(),
            block_labels: HashMap::new(),
            next_value_num: 0,
            next_block_num: 0,
        }
    }

    fn assign_value_name(&mut self, v: ValueRef) {
        self.value_names
            .insert(v, format!("%{}", self.next_value_num));
        self.next_value_num += 1;
    }

    fn assign_block_label(&mut self, b: BlockRef) {
        let label = match self.ctx.block(b).name {
            Some(name) => format!("^{name}"),
            None => {
                let label = format!("^bb{}", self.next_block_num);
                self.next_block_num += 1;
                label
            }
        };
        self.block_labels.insert(b, label);
    }

    fn block_label(&self, b: BlockRef) -> &str {
        self.block_labels
            .get(&b)
            .map(|s| s.as_str())
            .unwrap_or("^bb?")
    }

    /// Number every result and block argument under `op`, in print order.
    fn number_op(&mut self, op: OpRef) {
        for &v in self.ctx.op_results(op) {
            self.assign_value_name(v);
        }
        for &region in self.ctx.op_regions(op) {
            for &block in self.ctx.region_blocks(region) {
                self.number_block(block);
            }
        }
        for block in crate::walk::standalone_blocks(self.ctx, op) {
            self.number_block(block);
        }
    }

    fn number_block(&mut self, block: BlockRef) {
        self.assign_block_label(block);
        for &arg in self.ctx.block_args(block) {
            self.assign_value_name(arg);
        }
        for &op in self.ctx.block_ops(block) {
            self.number_op(op);
        }
    }

    fn write_value(&self, f: &mut impl Write, v: ValueRef) -> fmt::Result {
        if let Some(lit) = self.ctx.literal(v) {
            return write_literal(f, lit);
        }
        match self.value_names.get(&v) {
            Some(name) => f.write_str(name),
            None => write!(f, "%?{v}"),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Print an operation and everything nested in it.
pub fn print_op(ctx: &Context, op: OpRef) -> String {
    let mut state = PrintState::new(ctx);
    state.number_op(op);
    let mut out = String::new();
    print_operation(&state, &mut out, op, 0).expect("fmt::Write to String never fails");
    out
}

/// Print a type in its textual form, e.g. `core.optional(core.text)`.
pub fn print_type(ctx: &Context, ty: TypeRef) -> String {
    let mut out = String::new();
    write_type(ctx, &mut out, ty).expect("fmt::Write to String never fails");
    out
}

/// Lazily formatted type, see [`Context::type_display`].
pub struct TypeDisplay<'a> {
    ctx: &'a Context,
    ty: TypeRef,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type(self.ctx, f, self.ty)
    }
}

impl Context {
    /// Display adapter for a type, for use in messages.
    pub fn type_display(&self, ty: TypeRef) -> TypeDisplay<'_> {
        self.check_type(ty);
        TypeDisplay { ctx: self, ty }
    }
}

// ============================================================================
// Types, attributes and literals
// ============================================================================

fn write_type(ctx: &Context, f: &mut impl Write, ty: TypeRef) -> fmt::Result {
    let data = ctx.type_data(ty);
    write!(f, "{}", data.kind)?;
    if data.params.is_empty() {
        return Ok(());
    }
    f.write_char('(')?;
    for (i, param) in data.params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        match param {
            TypeParam::Type(inner) => write_type(ctx, f, *inner)?,
            TypeParam::Int(v) => write!(f, "{v}")?,
            TypeParam::Str(s) => write_quoted(f, s)?,
            TypeParam::Bool(b) => write!(f, "{b}")?,
            TypeParam::Separator => f.write_char(';')?,
        }
    }
    f.write_char(')')
}

fn write_float(f: &mut impl Write, v: f64) -> fmt::Result {
    let s = format!("{v}");
    f.write_str(&s)?;
    // Whole numbers keep a decimal point; inf and NaN stay as they are
    if v.is_finite() && !s.contains('.') && !s.contains('e') && !s.contains('E') {
        f.write_str(".0")?;
    }
    Ok(())
}

fn write_attribute(ctx: &Context, f: &mut impl Write, attr: &Attribute) -> fmt::Result {
    match attr {
        Attribute::Unit => f.write_str("unit"),
        Attribute::Bool(b) => write!(f, "{b}"),
        Attribute::Int(v) => write!(f, "{v}"),
        Attribute::FloatBits(bits) => write_float(f, f64::from_bits(*bits)),
        Attribute::String(s) => write_quoted(f, s),
        Attribute::Symbol(sym) => sym.with_str(|s| write_symbol(f, s)),
        Attribute::Type(ty) => write_type(ctx, f, *ty),
        Attribute::List(items) => {
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_attribute(ctx, f, item)?;
            }
            f.write_char(']')
        }
    }
}

fn write_literal(f: &mut impl Write, lit: &LiteralData) -> fmt::Result {
    match lit {
        LiteralData::Int(v) => write!(f, "{v}"),
        LiteralData::Float(bits) => write_float(f, f64::from_bits(*bits)),
        LiteralData::Bool(b) => write!(f, "{b}"),
        LiteralData::String(s) => write_quoted(f, s),
        LiteralData::StringList(items) => {
            f.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_quoted(f, item)?;
            }
            f.write_char(']')
        }
        LiteralData::Enum { ty, variant } => write!(f, "{ty}::{variant}"),
        LiteralData::Color(color) => write!(f, "{color}"),
        LiteralData::Asset(asset) => {
            write!(f, "asset({}", asset.kind)?;
            if let Some(format) = &asset.format {
                f.write_str(", ")?;
                write_quoted(f, format)?;
            }
            write!(f, ", {} bytes)", asset.bytes.len())
        }
    }
}

fn write_quoted(f: &mut impl Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    write_escaped_string(f, s)?;
    f.write_char('"')
}

fn write_escaped_string(f: &mut impl Write, s: &str) -> fmt::Result {
    for ch in s.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\0' => f.write_str("\\0")?,
            c if c.is_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

fn write_symbol(f: &mut impl Write, s: &str) -> fmt::Result {
    let needs_quoting = s.is_empty() || !s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if needs_quoting {
        f.write_char('@')?;
        write_quoted(f, s)
    } else {
        write!(f, "@{s}")
    }
}

// ============================================================================
// Operation printing
// ============================================================================

fn print_operation(
    state: &PrintState<'_>,
    f: &mut impl Write,
    op: OpRef,
    indent: usize,
) -> fmt::Result {
    let ctx = state.ctx;
    let data = ctx.op(op);
    write!(f, "{:indent$}", "")?;

    if !data.results.is_empty() {
        for (i, &v) in data.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            state.write_value(f, v)?;
        }
        f.write_str(" = ")?;
    }

    write!(f, "{}.{}", data.dialect, data.name)?;
    if let Some(sym_name) = &data.sym_name {
        f.write_char(' ')?;
        write_symbol(f, sym_name)?;
    }

    if !data.operands.is_empty() {
        f.write_char('(')?;
        for (i, &operand) in data.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let operand = ctx.operand(operand);
            write!(f, "{}: ", operand.name)?;
            match (operand.arity, operand.values.as_slice()) {
                (Arity::Variadic, values) => {
                    f.write_char('[')?;
                    for (j, &v) in values.iter().enumerate() {
                        if j > 0 {
                            f.write_str(", ")?;
                        }
                        state.write_value(f, v)?;
                    }
                    f.write_char(']')?;
                }
                (_, [v]) => state.write_value(f, *v)?,
                (_, _) => f.write_char('-')?,
            }
        }
        f.write_char(')')?;
    }

    if !data.attributes.is_empty() {
        // Symbol order is interning order; sort by text for stable output
        let mut attrs: Vec<_> = data
            .attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        attrs.sort_by(|a, b| a.0.cmp(&b.0));
        f.write_str(" {")?;
        for (i, (key, value)) in attrs.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key} = ")?;
            write_attribute(ctx, f, value)?;
        }
        f.write_char('}')?;
    }

    if !data.results.is_empty() {
        f.write_str(" : ")?;
        for (i, &v) in data.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_type(ctx, f, ctx.value_ty(v))?;
        }
    }

    for &region in data.regions.iter() {
        write!(f, " {} ", ctx.region(region).name)?;
        print_region(state, f, region, indent)?;
    }
    for block in crate::walk::standalone_blocks(ctx, op) {
        let name = ctx.block(block).name.map(|n| n.to_string()).unwrap_or_default();
        write!(f, " {name} ")?;
        let show_label = !ctx.block_args(block).is_empty();
        print_braced(f, indent, |f| print_block(state, f, block, indent + 4, show_label))?;
    }

    f.write_char('\n')
}

/// Print `{`, the nested content, and `}`; empty content stays on one line.
fn print_braced(
    f: &mut impl Write,
    indent: usize,
    content: impl FnOnce(&mut String) -> fmt::Result,
) -> fmt::Result {
    let mut body = String::new();
    content(&mut body)?;
    if body.is_empty() {
        f.write_str("{}")
    } else {
        f.write_str("{\n")?;
        f.write_str(&body)?;
        write!(f, "{:indent$}}}", "")
    }
}

fn print_region(
    state: &PrintState<'_>,
    f: &mut impl Write,
    region: RegionRef,
    indent: usize,
) -> fmt::Result {
    let ctx = state.ctx;
    let blocks = ctx.region_blocks(region);
    let elide_label = blocks.len() == 1
        && ctx.block_args(blocks[0]).is_empty()
        && ctx.block(blocks[0]).name.is_none();
    print_braced(f, indent, |f| {
        for &block in blocks {
            print_block(state, f, block, indent + 4, !elide_label)?;
        }
        Ok(())
    })
}

fn print_block(
    state: &PrintState<'_>,
    f: &mut impl Write,
    block: BlockRef,
    indent: usize,
    show_label: bool,
) -> fmt::Result {
    let ctx = state.ctx;
    if show_label {
        let label_indent = indent - 2;
        write!(f, "{:label_indent$}{}", "", state.block_label(block))?;
        let args = ctx.block_args(block);
        if !args.is_empty() {
            f.write_char('(')?;
            for (i, &arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                state.write_value(f, arg)?;
                f.write_str(": ")?;
                write_type(ctx, f, ctx.value_ty(arg))?;
            }
            f.write_char(')')?;
        }
        f.write_str(":\n")?;
    }
    for &op in ctx.block_ops(block) {
        print_operation(state, f, op, indent)?;
    }
    Ok(())
}
