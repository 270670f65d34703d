//! ESQL translation pipeline for COBOL sources.
//!
//! COBOL programs with embedded SQL carry their statements inside
//! `EXEC SQL ... END-EXEC` blocks. This crate rewrites such programs into
//! pure COBOL that drives the `cobsql-runtime` library at execution time:
//!
//! 1. [`consolidate::SourceConsolidation`] inlines `COPY` / `EXEC SQL
//!    INCLUDE` references into a single buffer, leaving origin markers so
//!    later stages can map lines back to their source files.
//! 2. [`parser::EsqlParser`] lexes the consolidated buffer into an
//!    intermediate representation of host-variable declarations, cursor
//!    declarations and embedded statements.
//! 3. [`codegen::EsqlGenerator`] replaces each embedded statement with a
//!    runtime call sequence and emits the generated source plus optional
//!    map and symbol files.
//!
//! The stages are chained by [`pipeline::Preprocessor`], which owns the
//! option map and the error record inspected by the command-line front
//! end.

pub mod codegen;
pub mod consolidate;
pub mod copy;
pub mod ir;
pub mod options;
pub mod parser;
pub mod pipeline;
pub mod step;

pub use copy::CopyResolver;
pub use ir::{CobolVarType, CursorDecl, EsqlProgram, EsqlStmt, HostVarDecl, StmtKind};
pub use options::{OptValue, Options};
pub use pipeline::{ErrorData, Preprocessor};
pub use step::{StepData, TransformationStep};

use thiserror::Error;

/// Errors raised by pipeline stages.
#[derive(Error, Debug)]
pub enum PpError {
    /// A copybook name could not be resolved on the search path.
    #[error("copybook '{name}' not found")]
    CopyNotFound { name: String },

    /// A copybook directly or indirectly includes itself.
    #[error("copybook inclusion cycle: {cycle}")]
    CopyCycle { cycle: String },

    /// Malformed ESQL at a known source position.
    #[error("{file}:{line}:{column}: syntax error: {message}")]
    SyntaxError {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    /// The source ended inside an open construct.
    #[error("unexpected end of file in {context}")]
    UnexpectedEof { context: String },

    /// The same host variable was declared twice in one declare section.
    #[error("host variable '{name}' declared twice in the same declare section")]
    DuplicateDeclare { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stage was run without the state it needs (driver bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for pipeline operations.
pub type PpResult<T> = Result<T, PpError>;

impl PpError {
    /// Numeric code stored into [`pipeline::ErrorData`] when a stage fails.
    pub fn code(&self) -> i32 {
        match self {
            PpError::CopyNotFound { .. } => 5,
            PpError::CopyCycle { .. } => 6,
            PpError::SyntaxError { .. } => 7,
            PpError::UnexpectedEof { .. } => 8,
            PpError::DuplicateDeclare { .. } => 9,
            PpError::Io(_) => 10,
            PpError::Internal(_) => 11,
        }
    }
}

/// Normalize all line endings to `\n`.
///
/// Offsets and line counts are computed on the normalized text; running
/// this first keeps them stable for `\r\n` and bare-`\r` inputs.
pub(crate) fn normalize_line_endings(raw: &str) -> String {
    if !raw.contains('\r') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_crlf_and_bare_cr() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(normalize_line_endings("plain\n"), "plain\n");
    }

    #[test]
    fn error_codes_are_stable() {
        let e = PpError::CopyNotFound {
            name: "FOO".into(),
        };
        assert_eq!(e.code(), 5);
        let e = PpError::DuplicateDeclare {
            name: "WS-X".into(),
        };
        assert_eq!(e.code(), 9);
    }
}
