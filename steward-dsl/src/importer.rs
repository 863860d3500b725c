//! Module resolution for `import` and `from … import` statements.
//!
//! A dotted path resolves against the search path (the bundled library
//! plus every installed package's source directory), preferring
//! `a/b/c/__init__.stw` over `a/b/c.stw`. Native modules (the bundled
//! `std` library) shadow the filesystem.

use crate::stdlib::{native_modules, NativeModule};
use std::collections::HashMap;
use std::path::PathBuf;

/// File extension of DSL sources.
pub const SOURCE_EXTENSION: &str = "stw";

pub struct Importer {
    search_paths: Vec<PathBuf>,
    natives: HashMap<String, NativeModule>,
}

impl Importer {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            natives: native_modules(),
        }
    }

    pub fn native(&self, dotted: &str) -> Option<&NativeModule> {
        self.natives.get(dotted)
    }

    /// Resolves a dotted module path to a source file.
    pub fn resolve(&self, path: &[String]) -> Option<PathBuf> {
        for root in &self.search_paths {
            let mut dir = root.clone();
            for segment in path {
                dir.push(segment);
            }

            let init = dir.join(format!("__init__.{SOURCE_EXTENSION}"));
            if init.is_file() {
                return Some(init);
            }
            let file = dir.with_extension(SOURCE_EXTENSION);
            if file.is_file() {
                return Some(file);
            }
        }
        None
    }
}
