//! Source consolidation: recursive COPY / INCLUDE inlining.
//!
//! Produces a single flat buffer in which every inclusion is bracketed by
//! origin markers, so downstream stages can map consolidated lines back
//! to the files they came from.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::copy::CopyResolver;
use crate::options::keys;
use crate::step::{publish_output, StepContext, StepData, TransformationStep};
use crate::{normalize_line_endings, PpError, PpResult};

/// Marker emitted before the contents of an included (or the main) file.
pub const FILE_PUSH_MARKER: &str = "*>CBSQL-FILE-PUSH";
/// Marker emitted after the contents of an included file.
pub const FILE_POP_MARKER: &str = "*>CBSQL-FILE-POP";
/// Marker preserving a REPLACING clause when debug info is requested.
pub const REPLACING_MARKER: &str = "*>CBSQL-REPLACING";

/// A recognised textual-include directive.
#[derive(Debug, PartialEq)]
struct CopyDirective {
    name: String,
    replacing: Option<String>,
    /// `EXEC SQL INCLUDE` rather than a plain `COPY`.
    from_esql: bool,
}

/// The consolidation stage: input filename, output buffer (or the final
/// output file in consolidate-only mode).
#[derive(Default)]
pub struct SourceConsolidation {
    input: Option<StepData>,
    output: Option<StepData>,
}

impl SourceConsolidation {
    pub fn new() -> Self {
        Self::default()
    }

    fn expand_file(
        &self,
        path: &Path,
        stack: &mut Vec<PathBuf>,
        out: &mut String,
        resolver: Option<&CopyResolver>,
        expand_plain_copy: bool,
        emit_debug_info: bool,
    ) -> PpResult<()> {
        let abs = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        if stack.contains(&abs) {
            let mut cycle: Vec<String> =
                stack.iter().map(|p| p.display().to_string()).collect();
            cycle.push(abs.display().to_string());
            return Err(PpError::CopyCycle {
                cycle: cycle.join(" -> "),
            });
        }
        stack.push(abs.clone());

        let raw = fs::read_to_string(path)?;
        let text = normalize_line_endings(&raw);

        out.push_str(&format!("{} {}\n", FILE_PUSH_MARKER, abs.display()));

        for line in text.lines() {
            match parse_copy_directive(line) {
                Some(dir) if dir.from_esql || expand_plain_copy => {
                    trace!(copybook = %dir.name, "inlining copybook");
                    if emit_debug_info {
                        if let Some(ref clause) = dir.replacing {
                            out.push_str(&format!("{} {}\n", REPLACING_MARKER, clause));
                        }
                    }
                    let resolved = resolver.and_then(|r| r.resolve(&dir.name));
                    match resolved {
                        Some(inc) => {
                            self.expand_file(
                                &inc,
                                stack,
                                out,
                                resolver,
                                expand_plain_copy,
                                emit_debug_info,
                            )?;
                        }
                        None if dir.from_esql && dir.name.eq_ignore_ascii_case("SQLCA") => {
                            // No SQLCA copybook on disk: splice the
                            // built-in communication area.
                            out.push_str(&format!("{} SQLCA\n", FILE_PUSH_MARKER));
                            out.push_str(builtin_sqlca());
                            out.push_str(&format!("{}\n", FILE_POP_MARKER));
                        }
                        None => {
                            return Err(PpError::CopyNotFound { name: dir.name });
                        }
                    }
                }
                _ => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }

        out.push_str(&format!("{}\n", FILE_POP_MARKER));
        stack.pop();
        Ok(())
    }
}

impl TransformationStep for SourceConsolidation {
    fn name(&self) -> &'static str {
        "consolidate"
    }

    fn input(&self) -> Option<&StepData> {
        self.input.as_ref()
    }

    fn set_input(&mut self, data: StepData) {
        self.input = Some(data);
    }

    fn output(&self) -> Option<&StepData> {
        self.output.as_ref()
    }

    fn set_output(&mut self, data: StepData) {
        self.output = Some(data);
    }

    fn run(&mut self, ctx: &mut StepContext<'_>) -> PpResult<()> {
        let input = self.input.clone().ok_or_else(|| PpError::UnexpectedEof {
            context: "consolidation input".into(),
        })?;
        let path = input.as_path().ok_or_else(|| PpError::UnexpectedEof {
            context: "consolidation expects a filename input".into(),
        })?;

        let expand_plain_copy = ctx.opts.get_bool(keys::PREPROCESS_COPY_FILES, false);
        let emit_debug_info = ctx.opts.get_bool(keys::EMIT_DEBUG_INFO, false);

        let mut out = String::new();
        let mut stack = Vec::new();
        self.expand_file(
            path,
            &mut stack,
            &mut out,
            ctx.copy_resolver,
            expand_plain_copy,
            emit_debug_info,
        )?;

        publish_output(&mut self.output, out)?;
        Ok(())
    }
}

/// Recognise `COPY name [REPLACING ...].` and
/// `EXEC SQL INCLUDE name END-EXEC[.]` on a single line.
fn parse_copy_directive(line: &str) -> Option<CopyDirective> {
    let content = line.trim();
    if content.starts_with("*>") {
        return None;
    }
    // fixed-format comment indicator
    if line.len() > 6 && matches!(line.as_bytes()[6], b'*' | b'/') {
        return None;
    }

    let upper = content.to_uppercase();

    if let Some(rest) = upper.strip_prefix("EXEC SQL INCLUDE ") {
        let name = rest
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches('.')
            .to_string();
        if name.is_empty() || !upper.contains("END-EXEC") {
            return None;
        }
        return Some(CopyDirective {
            name,
            replacing: None,
            from_esql: true,
        });
    }

    if let Some(rest) = upper.strip_prefix("COPY ") {
        let stmt = rest.trim_end_matches('.').trim();
        let mut parts = stmt.splitn(2, " REPLACING ");
        let name = parts.next().unwrap_or("").trim().to_string();
        if name.is_empty() || name.contains(' ') {
            return None;
        }
        // recover the clause in its original case
        let replacing = parts.next().and_then(|_| {
            content
                .to_uppercase()
                .find(" REPLACING ")
                .map(|pos| content[pos + 1..].trim_end_matches('.').to_string())
        });
        return Some(CopyDirective {
            name,
            replacing,
            from_esql: false,
        });
    }

    None
}

/// Communication-area copybook spliced for `EXEC SQL INCLUDE SQLCA` when
/// no SQLCA copybook exists on the search path.
fn builtin_sqlca() -> &'static str {
    r#"       01  SQLCA.
           05  SQLCAID           PIC X(8) VALUE 'SQLCA   '.
           05  SQLCABC           PIC S9(9) COMP-5 VALUE 136.
           05  SQLCODE           PIC S9(9) COMP-5.
           05  SQLERRM.
               10  SQLERRML      PIC S9(4) COMP-5.
               10  SQLERRMC      PIC X(70).
           05  SQLERRP           PIC X(8).
           05  SQLERRD           OCCURS 6 TIMES
                                 PIC S9(9) COMP-5.
           05  SQLWARN.
               10  SQLWARN0      PIC X.
               10  SQLWARN1      PIC X.
               10  SQLWARN2      PIC X.
               10  SQLWARN3      PIC X.
               10  SQLWARN4      PIC X.
               10  SQLWARN5      PIC X.
               10  SQLWARN6      PIC X.
               10  SQLWARN7      PIC X.
           05  SQLSTATE          PIC X(5).
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::pipeline::ErrorData;
    use std::fs;
    use tempfile::tempdir;

    fn run_step(
        main: &Path,
        resolver: &CopyResolver,
        opts: &Options,
    ) -> PpResult<String> {
        let mut step = SourceConsolidation::new();
        step.set_input(StepData::filename(main));
        let mut err = ErrorData::default();
        let mut program = None;
        let mut ctx = StepContext {
            opts,
            copy_resolver: Some(resolver),
            err: &mut err,
            program: &mut program,
            symbol_file: None,
        };
        step.run(&mut ctx)?;
        Ok(step.output().unwrap().text().unwrap())
    }

    #[test]
    fn inlines_copybook_with_markers() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        fs::write(&main, "       COPY FOO.\n").unwrap();
        fs::write(dir.path().join("FOO"), "       01 X PIC X(10).\n").unwrap();

        let resolver = CopyResolver::new(dir.path());
        let mut opts = Options::new();
        opts.set(keys::PREPROCESS_COPY_FILES, true);

        let out = run_step(&main, &resolver, &opts).unwrap();

        assert!(out.contains("01 X PIC X(10)."));
        let foo_abs = dir.path().join("FOO").canonicalize().unwrap();
        assert!(out.contains(&format!("{} {}", FILE_PUSH_MARKER, foo_abs.display())));
        assert!(out.contains(FILE_POP_MARKER));
    }

    #[test]
    fn plain_copy_kept_verbatim_without_preprocess_option() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        fs::write(&main, "       COPY FOO.\n").unwrap();
        fs::write(dir.path().join("FOO"), "       01 X PIC X(10).\n").unwrap();

        let resolver = CopyResolver::new(dir.path());
        let opts = Options::new();

        let out = run_step(&main, &resolver, &opts).unwrap();
        assert!(out.contains("       COPY FOO."));
        assert!(!out.contains("01 X PIC X(10)."));
    }

    #[test]
    fn esql_include_always_expanded() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        fs::write(&main, "       EXEC SQL INCLUDE ACCT END-EXEC.\n").unwrap();
        fs::write(dir.path().join("ACCT"), "       01 ACCT-NO PIC 9(8).\n").unwrap();

        let resolver = CopyResolver::new(dir.path());
        let out = run_step(&main, &resolver, &Options::new()).unwrap();
        assert!(out.contains("01 ACCT-NO PIC 9(8)."));
    }

    #[test]
    fn include_sqlca_splices_builtin_when_unresolved() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        fs::write(&main, "       EXEC SQL INCLUDE SQLCA END-EXEC.\n").unwrap();

        let resolver = CopyResolver::new(dir.path());
        let out = run_step(&main, &resolver, &Options::new()).unwrap();
        assert!(out.contains("01  SQLCA."));
        assert!(out.contains("SQLSTATE"));
    }

    #[test]
    fn cycle_is_fatal() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        fs::write(&main, "       COPY A.\n").unwrap();
        fs::write(dir.path().join("A"), "       COPY B.\n").unwrap();
        fs::write(dir.path().join("B"), "       COPY A.\n").unwrap();

        let resolver = CopyResolver::new(dir.path());
        let mut opts = Options::new();
        opts.set(keys::PREPROCESS_COPY_FILES, true);

        let err = run_step(&main, &resolver, &opts).unwrap_err();
        assert!(matches!(err, PpError::CopyCycle { .. }));
    }

    #[test]
    fn unresolved_copy_is_fatal() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        fs::write(&main, "       COPY NOPE.\n").unwrap();

        let resolver = CopyResolver::new(dir.path());
        let mut opts = Options::new();
        opts.set(keys::PREPROCESS_COPY_FILES, true);

        let err = run_step(&main, &resolver, &opts).unwrap_err();
        assert!(matches!(err, PpError::CopyNotFound { name } if name == "NOPE"));
    }

    #[test]
    fn non_directive_lines_pass_through_verbatim() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        let body = "       IDENTIFICATION DIVISION.\n       PROGRAM-ID. T.\n";
        fs::write(&main, body).unwrap();

        let resolver = CopyResolver::new(dir.path());
        let out = run_step(&main, &resolver, &Options::new()).unwrap();

        // everything between the outer push/pop markers is byte-identical
        let inner: Vec<&str> = out
            .lines()
            .filter(|l| !l.starts_with(FILE_PUSH_MARKER) && !l.starts_with(FILE_POP_MARKER))
            .collect();
        assert_eq!(inner.join("\n") + "\n", body);
    }

    #[test]
    fn replacing_clause_preserved_as_marker_with_debug_info() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cbl");
        fs::write(&main, "       COPY FOO REPLACING ==A== BY ==B==.\n").unwrap();
        fs::write(dir.path().join("FOO"), "       01 A PIC X.\n").unwrap();

        let resolver = CopyResolver::new(dir.path());
        let mut opts = Options::new();
        opts.set(keys::PREPROCESS_COPY_FILES, true);
        opts.set(keys::EMIT_DEBUG_INFO, true);

        let out = run_step(&main, &resolver, &opts).unwrap();
        assert!(out.contains(REPLACING_MARKER));
        assert!(out.contains("REPLACING ==A== BY ==B=="));
    }
}
