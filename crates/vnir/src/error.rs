//! Recoverable errors.
//!
//! Identity and structural violations are programming errors and panic at
//! the call site. The conditions below depend on data (names coming from a
//! document, ops coming from a walk) and are returned to the caller instead.

use derive_more::{Display, Error, From};

use crate::refs::RegionRef;

/// Failure to view an op as a specific dialect op.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ConversionError {
    #[display("expected `{expected}` operation, found `{actual}`")]
    WrongOperation {
        expected: &'static str,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error, From)]
pub enum IrError {
    #[display("symbol `{name}` is already defined in {table}")]
    #[from(ignore)]
    DuplicateSymbol { name: String, table: RegionRef },

    #[display("symbol `{name}` not found")]
    #[from(ignore)]
    SymbolNotFound { name: String },

    #[display("{_0}")]
    Conversion(ConversionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_symbol() {
        let err = IrError::SymbolNotFound {
            name: "chapter2".into(),
        };
        assert_eq!(err.to_string(), "symbol `chapter2` not found");

        let err: IrError = ConversionError::WrongOperation {
            expected: "core.module",
            actual: "vn.say".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "expected `core.module` operation, found `vn.say`"
        );
    }
}
