//! DSL parser for `#[ir_dialect]`.
//!
//! Parses the module body into structured types for code generation and
//! rejects malformed declarations before any code is emitted.

use std::collections::HashSet;

use proc_macro2::{Delimiter, Ident, Literal, TokenTree};
use unsynn::{Parser, ToTokenIter, TokenIter};

/// Stateless built-in types an operand constraint or result type may name.
pub const BUILTIN_TYPES: &[&str] = &[
    "Void",
    "Int",
    "Float",
    "Bool",
    "String",
    "Text",
    "TextStyle",
    "AggregateText",
    "Image",
    "Audio",
    "Bytes",
    "BlockRef",
    "AssetRef",
    "Color",
];

// ============================================================================
// Parsed types
// ============================================================================

#[derive(Debug)]
pub struct DialectModule {
    pub name: String,
    pub ops: Vec<OperationDef>,
}

#[derive(Debug)]
pub struct OperationDef {
    /// Clean name without `r#` prefix (e.g., "return")
    pub name: String,
    /// Original ident for use in generated code (e.g., `r#return`)
    pub raw_ident: Ident,
    pub symbol: bool,
    pub attrs: Vec<AttrDef>,
    pub operands: Vec<Operand>,
    pub results: ResultDef,
    pub result_types: Vec<ResultType>,
    pub body: Vec<BodyField>,
}

#[derive(Debug)]
pub struct AttrDef {
    /// Clean name without `r#` prefix
    pub name: String,
    /// Original ident
    pub raw_ident: Ident,
    pub ty: AttrType,
    pub optional: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrType {
    Any,
    Bool,
    I64,
    U32,
    F64,
    Type,
    String,
    Symbol,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandArity {
    Single,
    Optional,
    Rest,
}

#[derive(Debug)]
pub struct Operand {
    pub name: String,
    pub raw_ident: Ident,
    pub arity: OperandArity,
    /// Built-in type name the operand's values must have.
    pub constraint: Option<String>,
    pub default: Option<DefaultValue>,
}

/// Literal used when the constructor receives `None`.
#[derive(Clone, Debug)]
pub enum DefaultValue {
    Int(Literal, bool),
    Float(Literal, bool),
    Str(Literal),
    Bool(bool),
}

#[derive(Debug)]
pub enum ResultDef {
    None,
    Single(String),
    Multi(Vec<String>),
    Variadic(String),
}

impl ResultDef {
    pub fn fixed_names(&self) -> &[String] {
        match self {
            ResultDef::None | ResultDef::Variadic(_) => &[],
            ResultDef::Single(name) => std::slice::from_ref(name),
            ResultDef::Multi(names) => names,
        }
    }
}

#[derive(Debug)]
pub struct ResultType {
    pub result: String,
    pub source: ResultTypeSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultTypeSource {
    Builtin(String),
    /// Same type as the named single operand.
    Operand(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BodyField {
    Region { name: String, entry_block: bool },
    SymbolTable(String),
    Block { name: String, parent: Option<String> },
}

impl BodyField {
    pub fn name(&self) -> &str {
        match self {
            BodyField::Region { name, .. }
            | BodyField::SymbolTable(name)
            | BodyField::Block { name, .. } => name,
        }
    }
}

// ============================================================================
// Top-level input parsing
// ============================================================================

/// Parse attribute macro input: `attr` contains optional `crate = path`,
/// `item` contains `mod name { ... }`.
pub fn parse_input(
    attr: proc_macro2::TokenStream,
    item: proc_macro2::TokenStream,
) -> Result<(proc_macro2::TokenStream, DialectModule), String> {
    let crate_path = parse_crate_attr(attr)?;
    let module = parse_module(item)?;
    Ok((crate_path, module))
}

/// Parse optional `crate = path` from the attribute arguments.
fn parse_crate_attr(stream: proc_macro2::TokenStream) -> Result<proc_macro2::TokenStream, String> {
    let mut iter = stream.to_token_iter();

    if !has_remaining(&iter) {
        return Ok(quote::quote!(::vnir));
    }

    let kw: Ident =
        Ident::parser(&mut iter).map_err(|e| format!("expected `crate` keyword: {e}"))?;
    if kw != "crate" {
        return Err(format!("expected `crate`, got `{kw}`"));
    }

    expect_punct(&mut iter, '=')?;

    let mut path_tokens = proc_macro2::TokenStream::new();
    while has_remaining(&iter) {
        let tt: TokenTree =
            TokenTree::parser(&mut iter).map_err(|e| format!("error parsing crate path: {e}"))?;
        path_tokens.extend(std::iter::once(tt));
    }

    if path_tokens.is_empty() {
        return Err("expected crate path after `=`".into());
    }

    Ok(path_tokens)
}

fn parse_module(stream: proc_macro2::TokenStream) -> Result<DialectModule, String> {
    let mut iter = stream.to_token_iter();

    // Outer attributes and visibility on the module itself are ignored.
    while peek_punct(&iter, '#') {
        consume_punct(&mut iter)?;
        expect_group(&mut iter, Delimiter::Bracket)?;
    }
    let mut kw: Ident = Ident::parser(&mut iter).map_err(|e| format!("expected `mod`: {e}"))?;
    if kw == "pub" {
        if peek_group(&iter, Delimiter::Parenthesis) {
            expect_group(&mut iter, Delimiter::Parenthesis)?;
        }
        kw = Ident::parser(&mut iter).map_err(|e| format!("expected `mod`: {e}"))?;
    }
    if kw != "mod" {
        return Err(format!("expected `mod`, got `{kw}`"));
    }

    let name_ident: Ident =
        Ident::parser(&mut iter).map_err(|e| format!("expected dialect name: {e}"))?;
    let name = ident_str(&name_ident);

    let body = expect_group(&mut iter, Delimiter::Brace)?;
    let mut body_iter = body.stream().to_token_iter();

    let mut ops = Vec::new();
    let mut seen = HashSet::new();
    while has_remaining(&body_iter) {
        let op = parse_item(&mut body_iter)?;
        if !seen.insert(op.name.clone()) {
            return Err(format!("duplicate operation `{}` in dialect `{name}`", op.name));
        }
        ops.push(op);
    }

    Ok(DialectModule { name, ops })
}

// ============================================================================
// Item parsing
// ============================================================================

#[derive(Default)]
struct OpHeader {
    attrs: Option<Vec<AttrDef>>,
    rest_results: bool,
    symbol: bool,
    result_types: Vec<ResultType>,
}

fn parse_item(iter: &mut TokenIter) -> Result<OperationDef, String> {
    let mut header = OpHeader::default();

    while peek_punct(iter, '#') {
        parse_outer_attr(iter, &mut header)?;
    }

    let kw: Ident = Ident::parser(iter).map_err(|e| format!("expected `fn`: {e}"))?;
    if kw != "fn" {
        return Err(format!("expected `fn`, got `{kw}`"));
    }
    let op = parse_operation(iter, header)?;
    validate_operation(&op)?;
    Ok(op)
}

/// Parse one `#[...]` in front of an operation.
fn parse_outer_attr(iter: &mut TokenIter, header: &mut OpHeader) -> Result<(), String> {
    expect_punct(iter, '#')?;
    let bracket = expect_group(iter, Delimiter::Bracket)?;
    let mut inner = bracket.stream().to_token_iter();

    let ident: Ident =
        Ident::parser(&mut inner).map_err(|e| format!("expected attribute name: {e}"))?;

    match ident.to_string().as_str() {
        "doc" => {}
        "attr" => {
            if header.attrs.is_some() {
                return Err(
                    "duplicate #[attr(...)] on the same operation; merge into a single #[attr(...)]"
                        .into(),
                );
            }
            let paren = expect_group(&mut inner, Delimiter::Parenthesis)?;
            header.attrs = Some(parse_attr_list(paren.stream())?);
        }
        "rest_results" => header.rest_results = true,
        "symbol" => header.symbol = true,
        "result_type" => {
            let paren = expect_group(&mut inner, Delimiter::Parenthesis)?;
            header
                .result_types
                .extend(parse_result_types(paren.stream())?);
        }
        other => {
            return Err(format!(
                "unexpected attribute `{other}`, expected `doc`, `attr`, `symbol`, `result_type`, or `rest_results`"
            ));
        }
    }
    Ok(())
}

/// Parse comma-separated attribute definitions: `name: Type, opt?: Type`.
fn parse_attr_list(stream: proc_macro2::TokenStream) -> Result<Vec<AttrDef>, String> {
    let mut iter = stream.to_token_iter();
    let mut attrs = Vec::new();

    while has_remaining(&iter) {
        let name_ident: Ident =
            Ident::parser(&mut iter).map_err(|e| format!("expected attribute name: {e}"))?;

        let optional = peek_punct(&iter, '?');
        if optional {
            consume_punct(&mut iter)?;
        }

        expect_punct(&mut iter, ':')?;

        let ty_ident: Ident =
            Ident::parser(&mut iter).map_err(|e| format!("expected attribute type: {e}"))?;
        let ty = parse_attr_type(&ty_ident)?;

        attrs.push(AttrDef {
            name: ident_str(&name_ident),
            raw_ident: name_ident,
            ty,
            optional,
        });

        if peek_punct(&iter, ',') {
            consume_punct(&mut iter)?;
        }
    }

    Ok(attrs)
}

fn parse_attr_type(ident: &Ident) -> Result<AttrType, String> {
    match ident.to_string().as_str() {
        "any" => Ok(AttrType::Any),
        "bool" => Ok(AttrType::Bool),
        "i64" => Ok(AttrType::I64),
        "u32" => Ok(AttrType::U32),
        "f64" => Ok(AttrType::F64),
        "Type" => Ok(AttrType::Type),
        "String" => Ok(AttrType::String),
        "Symbol" => Ok(AttrType::Symbol),
        other => Err(format!("unknown attribute type `{other}`")),
    }
}

/// Parse `result = Int, other = lhs`.
fn parse_result_types(stream: proc_macro2::TokenStream) -> Result<Vec<ResultType>, String> {
    let mut iter = stream.to_token_iter();
    let mut out = Vec::new();

    while has_remaining(&iter) {
        let result: Ident =
            Ident::parser(&mut iter).map_err(|e| format!("expected result name: {e}"))?;
        expect_punct(&mut iter, '=')?;
        let source: Ident = Ident::parser(&mut iter)
            .map_err(|e| format!("expected built-in type or operand name: {e}"))?;
        let source_name = ident_str(&source);
        let source = if starts_uppercase(&source_name) {
            ResultTypeSource::Builtin(builtin_type_name(&source_name)?)
        } else {
            ResultTypeSource::Operand(source_name)
        };
        out.push(ResultType {
            result: ident_str(&result),
            source,
        });
        if peek_punct(&iter, ',') {
            consume_punct(&mut iter)?;
        }
    }

    Ok(out)
}

// ============================================================================
// Operation parsing
// ============================================================================

fn parse_operation(iter: &mut TokenIter, header: OpHeader) -> Result<OperationDef, String> {
    let name_ident: Ident =
        Ident::parser(iter).map_err(|e| format!("expected operation name: {e}"))?;

    let paren = expect_group(iter, Delimiter::Parenthesis)?;
    let operands = parse_operands(paren.stream())?;

    let results = if peek_punct(iter, '-') {
        let r = parse_results(iter)?;
        if header.rest_results {
            match r {
                ResultDef::Single(name) => ResultDef::Variadic(name),
                _ => return Err("#[rest_results] requires a single result name".into()),
            }
        } else {
            r
        }
    } else if header.rest_results {
        return Err("#[rest_results] requires a result name".into());
    } else {
        ResultDef::None
    };

    let body = expect_group(iter, Delimiter::Brace)?;
    let body = parse_body(body.stream())?;

    Ok(OperationDef {
        name: ident_str(&name_ident),
        raw_ident: name_ident,
        symbol: header.symbol,
        attrs: header.attrs.unwrap_or_default(),
        operands,
        results,
        result_types: header.result_types,
        body,
    })
}

/// Parse operand list: `a: (), b: Int, #[optional] c: (), #[rest] d: ()`.
fn parse_operands(stream: proc_macro2::TokenStream) -> Result<Vec<Operand>, String> {
    let mut iter = stream.to_token_iter();
    let mut operands = Vec::new();
    let mut seen_variadic = false;

    while has_remaining(&iter) {
        let mut arity = OperandArity::Single;
        let mut default = None;

        while peek_punct(&iter, '#') {
            consume_punct(&mut iter)?;
            let bracket = expect_group(&mut iter, Delimiter::Bracket)?;
            let mut inner = bracket.stream().to_token_iter();
            let kw: Ident = Ident::parser(&mut inner)
                .map_err(|e| format!("expected `rest`, `optional` or `default`: {e}"))?;
            match kw.to_string().as_str() {
                "rest" => {
                    if seen_variadic {
                        return Err("at most one #[rest] operand is allowed".into());
                    }
                    arity = OperandArity::Rest;
                }
                "optional" => arity = OperandArity::Optional,
                "default" => {
                    let paren = expect_group(&mut inner, Delimiter::Parenthesis)?;
                    default = Some(parse_default(paren.stream())?);
                }
                other => {
                    return Err(format!(
                        "unknown operand marker `{other}`, expected `rest`, `optional` or `default`"
                    ));
                }
            }
        }
        if seen_variadic {
            return Err("#[rest] operand must be the last operand".into());
        }
        if arity == OperandArity::Rest {
            seen_variadic = true;
            if default.is_some() {
                return Err("#[default] is not allowed on a #[rest] operand".into());
            }
        }

        let name_ident: Ident =
            Ident::parser(&mut iter).map_err(|e| format!("expected operand name: {e}"))?;

        expect_punct(&mut iter, ':')?;
        let constraint = parse_operand_type(&mut iter)?;

        operands.push(Operand {
            name: ident_str(&name_ident),
            raw_ident: name_ident,
            arity,
            constraint,
            default,
        });

        if peek_punct(&iter, ',') {
            consume_punct(&mut iter)?;
        }
    }

    Ok(operands)
}

/// `()` for an unconstrained operand, or a built-in type name.
fn parse_operand_type(iter: &mut TokenIter) -> Result<Option<String>, String> {
    let tt: TokenTree =
        TokenTree::parser(iter).map_err(|e| format!("expected type annotation: {e}"))?;
    match tt {
        TokenTree::Group(g) if g.delimiter() == Delimiter::Parenthesis && g.stream().is_empty() => {
            Ok(None)
        }
        TokenTree::Ident(ident) => Ok(Some(builtin_type_name(&ident.to_string())?)),
        other => Err(format!(
            "expected `()` or a built-in type name, got `{other}`"
        )),
    }
}

fn parse_default(stream: proc_macro2::TokenStream) -> Result<DefaultValue, String> {
    let mut iter = stream.to_token_iter();
    let negative = peek_punct(&iter, '-');
    if negative {
        consume_punct(&mut iter)?;
    }
    let tt: TokenTree =
        TokenTree::parser(&mut iter).map_err(|e| format!("expected default literal: {e}"))?;
    if has_remaining(&iter) {
        return Err("#[default(...)] takes a single literal".into());
    }
    match tt {
        TokenTree::Ident(ident) if !negative && (ident == "true" || ident == "false") => {
            Ok(DefaultValue::Bool(ident == "true"))
        }
        TokenTree::Literal(lit) => {
            let text = lit.to_string();
            if text.starts_with('"') {
                if negative {
                    return Err("a string default cannot be negated".into());
                }
                Ok(DefaultValue::Str(lit))
            } else if !text.starts_with("0x") && (text.contains('.') || text.contains('e')) {
                Ok(DefaultValue::Float(lit, negative))
            } else if text.starts_with(|c: char| c.is_ascii_digit()) {
                Ok(DefaultValue::Int(lit, negative))
            } else {
                Err(format!("unsupported default literal `{text}`"))
            }
        }
        other => Err(format!("unsupported default `{other}`")),
    }
}

/// Parse result definition after `->`: single `result`, multi `(a, b)`.
///
/// Variadic results are indicated by the `#[rest_results]` outer attribute
/// on the function, not by `-> #[rest] results` (which is not valid Rust).
fn parse_results(iter: &mut TokenIter) -> Result<ResultDef, String> {
    expect_punct(iter, '-')?;
    expect_punct(iter, '>')?;

    if peek_group(iter, Delimiter::Parenthesis) {
        let paren = expect_group(iter, Delimiter::Parenthesis)?;
        let mut inner = paren.stream().to_token_iter();
        let mut names = Vec::new();
        while has_remaining(&inner) {
            let ident: Ident =
                Ident::parser(&mut inner).map_err(|e| format!("expected result name: {e}"))?;
            names.push(ident_str(&ident));
            if peek_punct(&inner, ',') {
                consume_punct(&mut inner)?;
            }
        }
        return Ok(ResultDef::Multi(names));
    }

    let name_ident: Ident =
        Ident::parser(iter).map_err(|e| format!("expected result name: {e}"))?;
    Ok(ResultDef::Single(ident_str(&name_ident)))
}

/// Parse body content: `#[region(name)] {}`, `#[symbol_table(name)] {}` and
/// `#[block(name, parent = region)] {}`.
fn parse_body(stream: proc_macro2::TokenStream) -> Result<Vec<BodyField>, String> {
    let mut iter = stream.to_token_iter();
    let mut items = Vec::new();

    while has_remaining(&iter) {
        expect_punct(&mut iter, '#')?;
        let bracket = expect_group(&mut iter, Delimiter::Bracket)?;
        let mut inner = bracket.stream().to_token_iter();

        let kw: Ident = Ident::parser(&mut inner)
            .map_err(|e| format!("expected `region`, `symbol_table` or `block`: {e}"))?;

        let paren = expect_group(&mut inner, Delimiter::Parenthesis)?;
        let mut args = paren.stream().to_token_iter();
        let name_ident: Ident =
            Ident::parser(&mut args).map_err(|e| format!("expected field name: {e}"))?;
        let name = ident_str(&name_ident);
        let options = parse_field_options(&mut args)?;

        // `{}` after the attribute keeps the body valid Rust syntax
        expect_group(&mut iter, Delimiter::Brace)?;

        let field = match kw.to_string().as_str() {
            "region" => {
                let mut entry_block = false;
                for (key, value) in options {
                    match (key.as_str(), value) {
                        ("entry_block", None) => entry_block = true,
                        _ => return Err(format!("unknown region option `{key}` on `{name}`")),
                    }
                }
                BodyField::Region { name, entry_block }
            }
            "symbol_table" => {
                if let Some((key, _)) = options.first() {
                    return Err(format!("unknown symbol_table option `{key}` on `{name}`"));
                }
                BodyField::SymbolTable(name)
            }
            "block" => {
                let mut parent = None;
                for (key, value) in options {
                    match (key.as_str(), value) {
                        ("parent", Some(region)) => parent = Some(region),
                        _ => return Err(format!("unknown block option `{key}` on `{name}`")),
                    }
                }
                BodyField::Block { name, parent }
            }
            other => {
                return Err(format!(
                    "unknown field kind `{other}`, expected `region`, `symbol_table` or `block`"
                ));
            }
        };
        items.push(field);
    }

    Ok(items)
}

/// Parse `, key` and `, key = value` options after a field name.
fn parse_field_options(iter: &mut TokenIter) -> Result<Vec<(String, Option<String>)>, String> {
    let mut options = Vec::new();
    while has_remaining(iter) {
        expect_punct(iter, ',')?;
        if !has_remaining(iter) {
            break;
        }
        let key: Ident = Ident::parser(iter).map_err(|e| format!("expected option name: {e}"))?;
        let value = if peek_punct(iter, '=') {
            consume_punct(iter)?;
            let value: Ident =
                Ident::parser(iter).map_err(|e| format!("expected option value: {e}"))?;
            Some(ident_str(&value))
        } else {
            None
        };
        options.push((ident_str(&key), value));
    }
    Ok(options)
}

// ============================================================================
// Validation
// ============================================================================

fn validate_operation(op: &OperationDef) -> Result<(), String> {
    let op_name = &op.name;

    let mut seen = HashSet::new();
    let results: Vec<&str> = match &op.results {
        ResultDef::Variadic(name) => vec![name.as_str()],
        other => other.fixed_names().iter().map(String::as_str).collect(),
    };
    let names = op
        .operands
        .iter()
        .map(|o| o.name.as_str())
        .chain(results)
        .chain(op.body.iter().map(BodyField::name));
    for name in names {
        if !seen.insert(name) {
            return Err(format!("duplicate field `{name}` in operation `{op_name}`"));
        }
    }

    for field in &op.body {
        if let BodyField::Block {
            name,
            parent: Some(parent),
        } = field
        {
            match op.body.iter().find(|f| f.name() == parent) {
                Some(BodyField::Region { .. }) => {}
                Some(BodyField::SymbolTable(_)) => {
                    return Err(format!(
                        "block `{name}` in operation `{op_name}` cannot be placed in symbol table `{parent}`"
                    ));
                }
                _ => {
                    return Err(format!(
                        "block `{name}` in operation `{op_name}` names undeclared region `{parent}`"
                    ));
                }
            }
        }
    }

    let mut typed = HashSet::new();
    for rt in &op.result_types {
        if !op.results.fixed_names().contains(&rt.result) {
            return Err(format!(
                "result_type names undeclared result `{}` in operation `{op_name}`",
                rt.result
            ));
        }
        if !typed.insert(rt.result.as_str()) {
            return Err(format!(
                "result `{}` has more than one result_type in operation `{op_name}`",
                rt.result
            ));
        }
        if let ResultTypeSource::Operand(source) = &rt.source {
            match op.operands.iter().find(|o| &o.name == source) {
                Some(operand) if operand.arity == OperandArity::Single => {}
                Some(_) => {
                    return Err(format!(
                        "result_type of `{}` must copy a single operand, but `{source}` is optional or variadic",
                        rt.result
                    ));
                }
                None => {
                    return Err(format!(
                        "result_type of `{}` names undeclared operand `{source}`",
                        rt.result
                    ));
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper functions
// ============================================================================

fn builtin_type_name(name: &str) -> Result<String, String> {
    if BUILTIN_TYPES.contains(&name) {
        Ok(name.to_string())
    } else {
        Err(format!("unknown built-in type `{name}`"))
    }
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(char::is_uppercase)
}

/// Strip `r#` prefix from an ident.
fn ident_str(ident: &Ident) -> String {
    let s = ident.to_string();
    s.strip_prefix("r#").unwrap_or(&s).to_string()
}

fn peek_punct(iter: &TokenIter, ch: char) -> bool {
    matches!(iter.clone().next(), Some(TokenTree::Punct(p)) if p.as_char() == ch)
}

fn peek_group(iter: &TokenIter, delim: Delimiter) -> bool {
    matches!(iter.clone().next(), Some(TokenTree::Group(g)) if g.delimiter() == delim)
}

fn has_remaining(iter: &TokenIter) -> bool {
    iter.clone().next().is_some()
}

fn expect_punct(iter: &mut TokenIter, ch: char) -> Result<(), String> {
    let tt: TokenTree = TokenTree::parser(iter).map_err(|e| format!("expected `{ch}`: {e}"))?;
    match tt {
        TokenTree::Punct(p) if p.as_char() == ch => Ok(()),
        other => Err(format!("expected `{ch}`, got `{other}`")),
    }
}

/// Consume any single punct token.
fn consume_punct(iter: &mut TokenIter) -> Result<(), String> {
    let tt: TokenTree = TokenTree::parser(iter).map_err(|e| format!("expected punct: {e}"))?;
    match tt {
        TokenTree::Punct(_) => Ok(()),
        other => Err(format!("expected punct, got `{other}`")),
    }
}

fn expect_group(iter: &mut TokenIter, delim: Delimiter) -> Result<proc_macro2::Group, String> {
    let tt: TokenTree =
        TokenTree::parser(iter).map_err(|e| format!("expected {delim:?} group: {e}"))?;
    match tt {
        TokenTree::Group(g) if g.delimiter() == delim => Ok(g),
        other => Err(format!("expected {delim:?} group, got `{other}`")),
    }
}

// ============================================================================
// Tests
// ============================================================================
