//! Proc macros for vnir dialect definitions.
//!
//! Provides the `#[ir_dialect]` attribute macro, which turns a terse module
//! of operation declarations into typed wrappers, accessors and constructors.

use proc_macro::TokenStream as ProcTokenStream;

mod codegen;
mod parse;

/// Define dialect operations.
///
/// ```ignore
/// #[ir_dialect]
/// mod vn {
///     #[symbol]
///     fn scene() {
///         #[region(body, entry_block)] {}
///     }
///
///     #[attr(speaker?: String)]
///     fn say(text: Text, #[optional] voice: Audio) {}
///
///     #[result_type(result = Int)]
///     fn add(lhs: Int, rhs: Int) -> result {}
///
///     fn r#return(#[rest] values: ()) {}
/// }
/// ```
///
/// ## Crate path
///
/// - `#[ir_dialect] mod ...` defaults to `vnir` (for external crates)
/// - `#[ir_dialect(crate = crate)] mod ...` is for use within `vnir` itself
///
/// ## Generated code
///
/// For each operation `fn op_name(...)`:
/// - `DIALECT_NAME()` / `OP_NAME()` symbol helper functions
/// - `struct OpName(OpRef)` implementing `DialectOp`
/// - operand, result, attribute, region and block accessors
/// - constructor function `op_name(ctx, location, ...)`
///
/// Plus an `enum DialectOp` over all operations of the module.
///
/// Malformed declarations expand to `compile_error!`.
#[proc_macro_attribute]
pub fn ir_dialect(attr: ProcTokenStream, item: ProcTokenStream) -> ProcTokenStream {
    match ir_dialect_impl(attr.into(), item.into()) {
        Ok(tokens) => tokens.into(),
        Err(msg) => quote::quote!(compile_error!(#msg);).into(),
    }
}

fn ir_dialect_impl(
    attr: proc_macro2::TokenStream,
    item: proc_macro2::TokenStream,
) -> Result<proc_macro2::TokenStream, String> {
    let (crate_path, module) = parse::parse_input(attr, item)?;
    Ok(codegen::generate(&crate_path, &module))
}
