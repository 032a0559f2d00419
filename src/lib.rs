//! vnc: command-line access to persisted vnir documents.
//!
//! The binary is a thin wrapper around [`print`] and [`verify`], which load
//! a JSON document into a fresh context.

use std::fmt;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use vnir::validation::ValidationResult;
use vnir::{Context, JsonError, OpRef};

/// Output format of `vnc print`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable dump
    Text,
    /// Re-exported JSON document
    Json,
}

#[derive(Debug, Display, Error, From)]
pub enum VncError {
    #[display("cannot read {}: {source}", path.display())]
    #[from(ignore)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[display("{_0}")]
    Json(JsonError),

    #[display("IR verification failed:\n{result}")]
    #[from(ignore)]
    Invalid { result: ValidationResult },
}

/// Read and import the document at `path`.
pub fn load(path: &Path) -> Result<(Context, OpRef), VncError> {
    let text = std::fs::read_to_string(path).map_err(|source| VncError::Io {
        path: path.to_owned(),
        source,
    })?;
    let (ctx, root) = vnir::import_json(&text)?;
    tracing::debug!(path = %path.display(), %root, "document loaded");
    Ok((ctx, root))
}

pub fn print(path: &Path, format: Format) -> Result<String, VncError> {
    let (ctx, root) = load(path)?;
    Ok(match format {
        Format::Text => vnir::print_op(&ctx, root),
        Format::Json => {
            let mut out = vnir::export_json(&ctx, root);
            out.push('\n');
            out
        }
    })
}

/// What `vnc verify` checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifySummary {
    pub root: String,
    pub ops: usize,
}

impl fmt::Display for VerifySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ok: {} ({} operations)", self.root, self.ops)
    }
}

pub fn verify(path: &Path) -> Result<VerifySummary, VncError> {
    let (ctx, root) = load(path)?;
    let result = vnir::validate_all(&ctx, root);
    if !result.is_ok() {
        return Err(VncError::Invalid { result });
    }
    Ok(VerifySummary {
        root: vnir::op_full_name(&ctx, root),
        ops: vnir::walk::collect_ops(&ctx, root).len(),
    })
}
