//! Code generation for `#[ir_dialect]`.

use heck::{ToShoutySnakeCase, ToUpperCamelCase};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::parse::{
    AttrDef, AttrType, BodyField, DefaultValue, DialectModule, Operand, OperandArity,
    OperationDef, ResultDef, ResultTypeSource,
};

/// Generate all code for a dialect module.
pub fn generate(crate_path: &TokenStream, module: &DialectModule) -> TokenStream {
    let dialect_name_fn = gen_dialect_name(crate_path, &module.name);

    let op_items: Vec<TokenStream> = module
        .ops
        .iter()
        .map(|op| gen_operation(crate_path, &module.name, op))
        .collect();

    let dialect_enum = gen_dialect_enum(crate_path, module);

    quote! {
        #dialect_name_fn
        #(#op_items)*
        #dialect_enum
    }
}

fn gen_dialect_name(crate_path: &TokenStream, dialect: &str) -> TokenStream {
    quote! {
        #[allow(non_snake_case)]
        #[inline]
        pub fn DIALECT_NAME() -> #crate_path::Symbol {
            #crate_path::Symbol::new(#dialect)
        }
    }
}

fn gen_operation(crate_path: &TokenStream, dialect: &str, op: &OperationDef) -> TokenStream {
    let op_name_fn = gen_op_name_fn(crate_path, &op.name);
    let struct_and_trait = gen_struct_and_trait(crate_path, dialect, op);
    let impl_block = gen_impl_block(crate_path, op);
    let constructor = gen_constructor(crate_path, op);

    quote! {
        #op_name_fn
        #struct_and_trait
        #impl_block
        #constructor
    }
}

fn gen_op_name_fn(crate_path: &TokenStream, op_name: &str) -> TokenStream {
    let upper_name = op_name_fn_ident(op_name);
    quote! {
        #[allow(non_snake_case)]
        #[inline]
        pub fn #upper_name() -> #crate_path::Symbol {
            #crate_path::Symbol::new(#op_name)
        }
    }
}

fn op_name_fn_ident(op_name: &str) -> proc_macro2::Ident {
    format_ident!("{}", op_name.to_shouty_snake_case())
}

fn struct_name(op_name: &str) -> proc_macro2::Ident {
    format_ident!("{}", op_name.to_upper_camel_case())
}

fn gen_struct_and_trait(crate_path: &TokenStream, dialect: &str, op: &OperationDef) -> TokenStream {
    let sname = struct_name(&op.name);
    let op_name = &op.name;
    let full_name = format!("{dialect}.{op_name}");

    quote! {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct #sname(#crate_path::OpRef);

        impl #crate_path::DialectOp for #sname {
            const DIALECT_NAME: &'static str = #dialect;
            const OP_NAME: &'static str = #op_name;

            fn from_op(
                ctx: &#crate_path::Context,
                op: #crate_path::OpRef,
            ) -> Result<Self, #crate_path::ConversionError> {
                if !Self::matches(ctx, op) {
                    return Err(#crate_path::ConversionError::WrongOperation {
                        expected: #full_name,
                        actual: #crate_path::op_full_name(ctx, op),
                    });
                }
                Ok(Self(op))
            }

            fn op_ref(&self) -> #crate_path::OpRef {
                self.0
            }
        }
    }
}

fn gen_impl_block(crate_path: &TokenStream, op: &OperationDef) -> TokenStream {
    let sname = struct_name(&op.name);
    let op_ref_method = quote! {
        pub fn op_ref(&self) -> #crate_path::OpRef {
            self.0
        }
    };
    let symbol_accessors = if op.symbol {
        gen_symbol_accessors(crate_path)
    } else {
        quote!()
    };
    let operand_accessors = gen_operand_accessors(crate_path, &op.operands);
    let result_accessors = gen_result_accessors(crate_path, &op.results);
    let attr_accessors = gen_attr_accessors(crate_path, &op.attrs);
    let body_accessors = gen_body_accessors(crate_path, &op.body);

    quote! {
        impl #sname {
            #op_ref_method
            #symbol_accessors
            #operand_accessors
            #result_accessors
            #attr_accessors
            #body_accessors
        }
    }
}

fn gen_symbol_accessors(crate_path: &TokenStream) -> TokenStream {
    quote! {
        pub fn sym_name<'a>(&self, ctx: &'a #crate_path::Context) -> &'a str {
            ctx.sym_name(self.0).unwrap_or_default()
        }

        pub fn set_sym_name(
            &self,
            ctx: &mut #crate_path::Context,
            name: &str,
        ) -> Result<(), #crate_path::IrError> {
            ctx.set_sym_name(self.0, name)
        }
    }
}

// ============================================================================
// Operand accessors
// ============================================================================

fn gen_operand_accessors(crate_path: &TokenStream, operands: &[Operand]) -> TokenStream {
    let methods = operands.iter().enumerate().map(|(idx, operand)| {
        let name = &operand.raw_ident;
        let setter = format_ident!("set_{}", operand.name);
        let group = format_ident!("{}_operand", operand.name);

        let group_accessor = quote! {
            pub fn #group(&self, ctx: &#crate_path::Context) -> #crate_path::OperandRef {
                ctx.op_operands(self.0)[#idx]
            }
        };

        let value_accessors = match operand.arity {
            OperandArity::Single => quote! {
                pub fn #name(&self, ctx: &#crate_path::Context) -> #crate_path::ValueRef {
                    ctx.operand_values(self.#group(ctx))[0]
                }

                pub fn #setter(&self, ctx: &mut #crate_path::Context, value: #crate_path::ValueRef) {
                    let operand = self.#group(ctx);
                    if ctx.operand_len(operand) == 0 {
                        ctx.operand_add(operand, value);
                    } else {
                        ctx.operand_set(operand, 0, value);
                    }
                }
            },
            OperandArity::Optional => quote! {
                pub fn #name(&self, ctx: &#crate_path::Context) -> Option<#crate_path::ValueRef> {
                    ctx.operand_get(self.#group(ctx), 0)
                }

                pub fn #setter(
                    &self,
                    ctx: &mut #crate_path::Context,
                    value: Option<#crate_path::ValueRef>,
                ) {
                    let operand = self.#group(ctx);
                    ctx.operand_clear(operand);
                    if let Some(value) = value {
                        ctx.operand_add(operand, value);
                    }
                }
            },
            OperandArity::Rest => quote! {
                pub fn #name<'a>(&self, ctx: &'a #crate_path::Context) -> &'a [#crate_path::ValueRef] {
                    ctx.operand_values(self.#group(ctx))
                }

                pub fn #setter(
                    &self,
                    ctx: &mut #crate_path::Context,
                    values: impl IntoIterator<Item = #crate_path::ValueRef>,
                ) {
                    let operand = self.#group(ctx);
                    ctx.operand_clear(operand);
                    for value in values {
                        ctx.operand_add(operand, value);
                    }
                }
            },
        };

        quote! {
            #group_accessor
            #value_accessors
        }
    });

    quote!(#(#methods)*)
}

// ============================================================================
// Result accessors
// ============================================================================

fn gen_result_accessors(crate_path: &TokenStream, results: &ResultDef) -> TokenStream {
    match results {
        ResultDef::None => quote!(),
        ResultDef::Single(_) | ResultDef::Multi(_) => {
            let methods: Vec<TokenStream> = results
                .fixed_names()
                .iter()
                .enumerate()
                .map(|(idx, name)| {
                    let name_ident = format_ident!("{name}");
                    let ty_name = format_ident!("{name}_ty");
                    quote! {
                        pub fn #name_ident(&self, ctx: &#crate_path::Context) -> #crate_path::ValueRef {
                            ctx.op_result(self.0, #idx)
                        }

                        pub fn #ty_name(&self, ctx: &#crate_path::Context) -> #crate_path::TypeRef {
                            ctx.value_ty(ctx.op_result(self.0, #idx))
                        }
                    }
                })
                .collect();
            quote!(#(#methods)*)
        }
        ResultDef::Variadic(name) => {
            let name_ident = format_ident!("{name}");
            quote! {
                pub fn #name_ident<'a>(&self, ctx: &'a #crate_path::Context) -> &'a [#crate_path::ValueRef] {
                    ctx.op_results(self.0)
                }
            }
        }
    }
}

// ============================================================================
// Attribute accessors
// ============================================================================

fn gen_attr_accessors(crate_path: &TokenStream, attrs: &[AttrDef]) -> TokenStream {
    let methods: Vec<TokenStream> = attrs
        .iter()
        .map(|attr| gen_attr_accessor(crate_path, attr))
        .collect();
    quote!(#(#methods)*)
}

fn gen_attr_accessor(crate_path: &TokenStream, attr: &AttrDef) -> TokenStream {
    let name = &attr.raw_ident;
    let name_str = &attr.name;
    let rust_ty = attr_rust_type(crate_path, attr.ty);
    let from_attr = attr_from_attr(crate_path, attr.ty);

    if attr.optional {
        quote! {
            pub fn #name(&self, ctx: &#crate_path::Context) -> Option<#rust_ty> {
                ctx.attr(self.0, #crate_path::Symbol::new(#name_str))
                    .map(|attr| #from_attr)
            }
        }
    } else {
        quote! {
            pub fn #name(&self, ctx: &#crate_path::Context) -> #rust_ty {
                let attr = ctx.attr(self.0, #crate_path::Symbol::new(#name_str))
                    .expect(concat!("missing attribute: ", #name_str));
                #from_attr
            }
        }
    }
}

// ============================================================================
// Region/block accessors
// ============================================================================

fn gen_body_accessors(crate_path: &TokenStream, body: &[BodyField]) -> TokenStream {
    let mut region_idx = 0usize;
    let mut block_idx = 0usize;
    let mut methods = Vec::new();

    for field in body {
        let name_ident = format_ident!("{}", field.name());
        match field {
            BodyField::Region { .. } | BodyField::SymbolTable(_) => {
                let idx = region_idx;
                methods.push(quote! {
                    pub fn #name_ident(&self, ctx: &#crate_path::Context) -> #crate_path::RegionRef {
                        ctx.op_regions(self.0)[#idx]
                    }
                });
                region_idx += 1;
            }
            BodyField::Block { .. } => {
                let idx = block_idx;
                methods.push(quote! {
                    pub fn #name_ident(&self, ctx: &#crate_path::Context) -> #crate_path::BlockRef {
                        ctx.op_blocks(self.0)[#idx]
                    }
                });
                block_idx += 1;
            }
        }
    }

    quote!(#(#methods)*)
}

// ============================================================================
// Constructor function
// ============================================================================

fn gen_constructor(crate_path: &TokenStream, op: &OperationDef) -> TokenStream {
    let sname = struct_name(&op.name);
    let fn_name = &op.raw_ident;
    let op_name = &op.name;

    let mut params = Vec::new();
    // Statements that must run before the builder exists (defaults, types).
    let mut prelude = Vec::new();
    let mut body_stmts = Vec::new();

    if op.symbol {
        params.push(quote!(sym_name: impl Into<::std::string::String>));
        body_stmts.push(quote!(__builder = __builder.sym_name(sym_name);));
    }

    // Operands
    for operand in &op.operands {
        let name = &operand.raw_ident;
        let name_str = &operand.name;
        let arity = match operand.arity {
            OperandArity::Single => quote!(#crate_path::Arity::Single),
            OperandArity::Optional => quote!(#crate_path::Arity::Optional),
            OperandArity::Rest => quote!(#crate_path::Arity::Variadic),
        };

        let values = match (operand.arity, &operand.default) {
            (OperandArity::Rest, _) => {
                params.push(quote!(#name: impl IntoIterator<Item = #crate_path::ValueRef>));
                quote!(#name)
            }
            (_, Some(default)) => {
                let literal = default_literal(default);
                params.push(quote!(#name: Option<#crate_path::ValueRef>));
                prelude.push(quote! {
                    let #name = match #name {
                        Some(value) => value,
                        None => #literal,
                    };
                });
                quote!([#name])
            }
            (OperandArity::Optional, None) => {
                params.push(quote!(#name: Option<#crate_path::ValueRef>));
                quote!(#name)
            }
            (OperandArity::Single, None) => {
                params.push(quote!(#name: #crate_path::ValueRef));
                quote!([#name])
            }
        };

        let constraint = match &operand.constraint {
            Some(builtin) => {
                let variant = format_ident!("{builtin}");
                let ty_var = format_ident!("__{}_constraint", operand.name);
                prelude.push(quote! {
                    let #ty_var = ctx.builtin_type(#crate_path::BuiltinType::#variant);
                });
                quote!(Some(#ty_var))
            }
            None => quote!(None),
        };

        body_stmts.push(quote! {
            __builder = __builder.operand_with(
                #crate_path::Symbol::new(#name_str),
                #arity,
                #constraint,
                #values,
            );
        });
    }

    // Results
    match &op.results {
        ResultDef::None => {}
        ResultDef::Single(_) | ResultDef::Multi(_) => {
            for name in op.results.fixed_names() {
                let ty_var = format_ident!("{name}_ty");
                let fixed = op.result_types.iter().find(|rt| &rt.result == name);
                match fixed.map(|rt| &rt.source) {
                    Some(ResultTypeSource::Builtin(builtin)) => {
                        let variant = format_ident!("{builtin}");
                        prelude.push(quote! {
                            let #ty_var = ctx.builtin_type(#crate_path::BuiltinType::#variant);
                        });
                    }
                    Some(ResultTypeSource::Operand(source)) => {
                        let source = op
                            .operands
                            .iter()
                            .find(|o| &o.name == source)
                            .map(|o| &o.raw_ident);
                        prelude.push(quote! {
                            let #ty_var = ctx.value_ty(#source);
                        });
                    }
                    None => params.push(quote!(#ty_var: #crate_path::TypeRef)),
                }
                body_stmts.push(quote! {
                    __builder = __builder.result(#crate_path::Symbol::new(#name), #ty_var);
                });
            }
        }
        ResultDef::Variadic(name) => {
            params.push(quote!(result_types: impl IntoIterator<Item = #crate_path::TypeRef>));
            body_stmts.push(quote! {
                for (__idx, __ty) in result_types.into_iter().enumerate() {
                    __builder = __builder.result(
                        #crate_path::Symbol::from_dynamic(&format!("{}{}", #name, __idx)),
                        __ty,
                    );
                }
            });
        }
    }

    // Attributes
    for attr in &op.attrs {
        let name = &attr.raw_ident;
        let name_str = &attr.name;
        let rust_ty = attr_rust_type(crate_path, attr.ty);
        let to_attr_expr = |val: TokenStream| attr_to_attr(crate_path, attr.ty, val);

        if attr.optional {
            params.push(quote!(#name: Option<#rust_ty>));
            let attr_conv = to_attr_expr(quote!(__attr_val));
            body_stmts.push(quote! {
                if let ::core::option::Option::Some(__attr_val) = #name {
                    __builder = __builder.attr(
                        #crate_path::Symbol::new(#name_str),
                        #attr_conv,
                    );
                }
            });
        } else {
            params.push(quote!(#name: #rust_ty));
            let attr_conv = to_attr_expr(quote!(#name));
            body_stmts.push(quote! {
                __builder = __builder.attr(
                    #crate_path::Symbol::new(#name_str),
                    #attr_conv,
                );
            });
        }
    }

    // Regions, symbol tables and block fields are always created empty.
    for field in &op.body {
        body_stmts.push(match field {
            BodyField::Region {
                name,
                entry_block: false,
            } => quote!(__builder = __builder.region(#crate_path::Symbol::new(#name));),
            BodyField::Region {
                name,
                entry_block: true,
            } => quote!(__builder = __builder.region_with_entry(#crate_path::Symbol::new(#name));),
            BodyField::SymbolTable(name) => {
                quote!(__builder = __builder.symbol_table(#crate_path::Symbol::new(#name));)
            }
            BodyField::Block { name, parent } => {
                let parent = match parent {
                    Some(region) => quote!(Some(#crate_path::Symbol::new(#region))),
                    None => quote!(None),
                };
                quote!(__builder = __builder.block(#crate_path::Symbol::new(#name), #parent);)
            }
        });
    }

    quote! {
        #[allow(clippy::too_many_arguments)]
        pub fn #fn_name(
            ctx: &mut #crate_path::Context,
            location: #crate_path::Location,
            #(#params),*
        ) -> #sname {
            #(#prelude)*
            #[allow(unused_mut)]
            let mut __builder = #crate_path::OperationBuilder::new(
                location,
                DIALECT_NAME(),
                #crate_path::Symbol::new(#op_name),
            );
            #(#body_stmts)*
            let __op_ref = ctx.create_op(__builder);
            #sname(__op_ref)
        }
    }
}

fn default_literal(default: &DefaultValue) -> TokenStream {
    match default {
        DefaultValue::Int(lit, negative) => {
            let sign = negative.then(|| quote!(-));
            quote!(ctx.int_literal(#sign #lit))
        }
        DefaultValue::Float(lit, negative) => {
            let sign = negative.then(|| quote!(-));
            quote!(ctx.float_literal(#sign #lit))
        }
        DefaultValue::Str(lit) => quote!(ctx.string_literal(#lit)),
        DefaultValue::Bool(value) => quote!(ctx.bool_literal(#value)),
    }
}

// ============================================================================
// Dialect enum
// ============================================================================

fn gen_dialect_enum(crate_path: &TokenStream, module: &DialectModule) -> TokenStream {
    let enum_name = format_ident!("{}Op", module.name.to_upper_camel_case());
    let wildcard = format!("{}.*", module.name);

    let variants: Vec<_> = module.ops.iter().map(|op| struct_name(&op.name)).collect();
    let name_fns: Vec<_> = module
        .ops
        .iter()
        .map(|op| op_name_fn_ident(&op.name))
        .collect();

    quote! {
        /// Closed set of this dialect's operations.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum #enum_name {
            #(#variants(#variants),)*
        }

        impl #enum_name {
            pub fn from_op(
                ctx: &#crate_path::Context,
                op: #crate_path::OpRef,
            ) -> Result<Self, #crate_path::ConversionError> {
                let __data = ctx.op(op);
                if __data.dialect == DIALECT_NAME() {
                    #(
                        if __data.name == #name_fns() {
                            return Ok(Self::#variants(#variants(op)));
                        }
                    )*
                }
                Err(#crate_path::ConversionError::WrongOperation {
                    expected: #wildcard,
                    actual: #crate_path::op_full_name(ctx, op),
                })
            }

            pub fn op_ref(&self) -> #crate_path::OpRef {
                match self {
                    #(Self::#variants(op) => op.op_ref(),)*
                }
            }
        }
    }
}

// ============================================================================
// Attribute type helpers
// ============================================================================

fn attr_rust_type(crate_path: &TokenStream, ty: AttrType) -> TokenStream {
    match ty {
        AttrType::Any => quote!(#crate_path::Attribute),
        AttrType::Bool => quote!(bool),
        AttrType::I64 => quote!(i64),
        AttrType::U32 => quote!(u32),
        AttrType::F64 => quote!(f64),
        AttrType::Type => quote!(#crate_path::TypeRef),
        AttrType::String => quote!(::std::string::String),
        AttrType::Symbol => quote!(#crate_path::Symbol),
    }
}

fn attr_to_attr(crate_path: &TokenStream, ty: AttrType, val: TokenStream) -> TokenStream {
    match ty {
        AttrType::Any => quote!(#val),
        AttrType::Bool => quote!(#crate_path::Attribute::Bool(#val)),
        AttrType::I64 => quote!(#crate_path::Attribute::Int(#val)),
        AttrType::U32 => quote!(#crate_path::Attribute::Int(i64::from(#val))),
        AttrType::F64 => quote!(#crate_path::Attribute::float(#val)),
        AttrType::Type => quote!(#crate_path::Attribute::Type(#val)),
        AttrType::String => quote!(#crate_path::Attribute::String(#val)),
        AttrType::Symbol => quote!(#crate_path::Attribute::Symbol(#val)),
    }
}

fn attr_from_attr(crate_path: &TokenStream, ty: AttrType) -> TokenStream {
    match ty {
        AttrType::Any => quote!(attr.clone()),
        AttrType::Bool => quote! {
            match attr {
                #crate_path::Attribute::Bool(v) => *v,
                _ => panic!("expected Bool attribute"),
            }
        },
        AttrType::I64 => quote! {
            match attr {
                #crate_path::Attribute::Int(v) => *v,
                _ => panic!("expected Int attribute"),
            }
        },
        AttrType::U32 => quote! {
            match attr {
                #crate_path::Attribute::Int(v) => *v as u32,
                _ => panic!("expected Int attribute"),
            }
        },
        AttrType::F64 => quote! {
            match attr {
                #crate_path::Attribute::FloatBits(v) => f64::from_bits(*v),
                _ => panic!("expected FloatBits attribute"),
            }
        },
        AttrType::Type => quote! {
            match attr {
                #crate_path::Attribute::Type(v) => *v,
                _ => panic!("expected Type attribute"),
            }
        },
        AttrType::String => quote! {
            match attr {
                #crate_path::Attribute::String(v) => v.clone(),
                _ => panic!("expected String attribute"),
            }
        },
        AttrType::Symbol => quote! {
            match attr {
                #crate_path::Attribute::Symbol(v) => *v,
                _ => panic!("expected Symbol attribute"),
            }
        },
    }
}
