//! Source spans carried by tokens, AST nodes and errors.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Location of a token in its source file. Line and column are zero-based
/// internally and rendered one-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub file: Arc<PathBuf>,
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(file: Arc<PathBuf>, line: u32, col: u32) -> Self {
        Self { file, line, col }
    }

    /// Span for code that did not come from a file, such as re-parsed
    /// f-string fragments.
    pub fn synthetic() -> Self {
        Self {
            file: Arc::new(PathBuf::from("<inline>")),
            line: 0,
            col: 0,
        }
    }

    /// Two-line source excerpt: the offending line followed by a caret
    /// marker. Returns `None` when the source file cannot be read.
    pub fn excerpt(&self) -> Option<String> {
        let content = std::fs::read_to_string(self.file.as_ref()).ok()?;
        let line = content.lines().nth(self.line as usize)?;
        let trimmed = line.trim_start();
        let shift = line.len() - trimmed.len();
        let caret_col = (self.col as usize).saturating_sub(shift);
        Some(format!(
            "        {}\n        {}^",
            trimmed.trim_end(),
            " ".repeat(caret_col)
        ))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({},{})",
            self.file.display(),
            self.line + 1,
            self.col + 1
        )
    }
}
