//! Diagnostic source locations.
//!
//! Locations point into authored story documents, which are paged (office
//! documents) rather than flat byte streams, so a position is a
//! `(page, row, column)` triple inside a [`FileRef`].

use cranelift_entity::PrimaryMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::refs::{FileKey, FileRef};

/// Position inside one source document.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SourcePos {
    pub page: u32,
    pub row: u32,
    pub column: u32,
}

impl SourcePos {
    pub const fn new(page: u32, row: u32, column: u32) -> Self {
        Self { page, row, column }
    }
}

/// Source location (`DILocation`). Copy-able; equality is by value, so two
/// requests for the same coordinates are interchangeable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Option<FileRef>,
    pub pos: SourcePos,
}

impl Location {
    /// The null location, used for synthesized IR.
    pub const UNKNOWN: Location = Location {
        file: None,
        pos: SourcePos::new(0, 0, 0),
    };

    pub const fn new(file: FileRef, pos: SourcePos) -> Self {
        Self {
            file: Some(file),
            pos,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.file.is_none()
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::UNKNOWN
    }
}

/// Deduplicating file path table (`DIFile`).
#[derive(Debug, Default)]
pub(crate) struct FileTable {
    paths: PrimaryMap<FileKey, String>,
    dedup: HashMap<String, FileKey>,
}

impl FileTable {
    pub(crate) fn intern(&mut self, path: &str) -> FileKey {
        if let Some(&existing) = self.dedup.get(path) {
            return existing;
        }
        let key = self.paths.push(path.to_owned());
        self.dedup.insert(path.to_owned(), key);
        key
    }

    pub(crate) fn get(&self, key: FileKey) -> &str {
        &self.paths[key]
    }

    pub(crate) fn len(&self) -> usize {
        self.paths.len()
    }
}
