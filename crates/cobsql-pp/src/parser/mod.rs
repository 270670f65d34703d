//! ESQL parsing: consolidated buffer in, intermediate representation out.

pub mod picture;
pub mod scanner;

use std::collections::HashSet;

use tracing::trace;

use crate::ir::{
    CursorDecl, CursorSource, EsqlProgram, EsqlStmt, HostRef, StmtKind,
};
use crate::options::keys;
use crate::step::{publish_output, StepContext, StepData, TransformationStep};
use crate::{PpError, PpResult};

use scanner::SqlBlock;

/// The parser stage. Reads the consolidated buffer, publishes the IR via
/// the shared pipeline state, and passes the buffer through unchanged for
/// the generator.
#[derive(Default)]
pub struct EsqlParser {
    input: Option<StepData>,
    output: Option<StepData>,
}

impl EsqlParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransformationStep for EsqlParser {
    fn name(&self) -> &'static str {
        "esql-parse"
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
        let input = self
            .input
            .clone()
            .ok_or_else(|| PpError::Internal("parser input not set".into()))?;
        let text = input.text()?;

        let debug = ctx.opts.get_bool(keys::DEBUG_PARSER_SCANNER, false);
        let program = parse_program(&text, debug)?;

        trace!(
            host_vars = program.host_vars.len(),
            cursors = program.cursors.len(),
            statements = program.statements.len(),
            "parse complete"
        );

        *ctx.program = Some(program);
        publish_output(&mut self.output, text)?;
        Ok(())
    }
}

/// Parse a consolidated buffer into an [`EsqlProgram`].
pub fn parse_program(text: &str, debug: bool) -> PpResult<EsqlProgram> {
    let scan = scanner::scan(text, debug)?;
    let lines: Vec<&str> = text.lines().collect();

    let mut program = EsqlProgram::default();
    let mut pending_begin: Option<&SqlBlock> = None;

    for block in &scan.blocks {
        let kind = StmtKind::classify(&block.sql);
        match kind {
            StmtKind::BeginDeclareSection => {
                pending_begin = Some(block);
                program.statements.push(bare_stmt(block, kind));
            }
            StmtKind::EndDeclareSection => {
                if let Some(begin) = pending_begin.take() {
                    let window = declaration_window(&lines, begin.end_line, block.start_line);
                    let decls = picture::parse_declarations(&window, &scan.origins)?;

                    let mut seen = HashSet::new();
                    for d in &decls {
                        if !seen.insert(d.name.clone()) {
                            return Err(PpError::DuplicateDeclare {
                                name: d.name.clone(),
                            });
                        }
                    }
                    program.host_vars.extend(decls);
                }
                program.statements.push(bare_stmt(block, kind));
            }
            _ => {
                let (stmt, cursor) = parse_statement(block, kind)?;
                if let Some(c) = cursor {
                    program.cursors.push(c);
                }
                program.statements.push(stmt);
            }
        }
    }

    Ok(program)
}

/// Lines strictly between the declare-section delimiters, with
/// fixed-format areas stripped and markers/comments dropped.
fn declaration_window<'a>(
    lines: &[&'a str],
    begin_end: usize,
    end_start: usize,
) -> Vec<(usize, &'a str)> {
    let mut window = Vec::new();
    for lineno in (begin_end + 1)..end_start {
        let Some(raw) = lines.get(lineno - 1) else {
            continue;
        };
        if scanner::is_marker(raw) || scanner::is_comment(raw) {
            continue;
        }
        window.push((lineno, scanner::code_content(raw)));
    }
    window
}

fn bare_stmt(block: &SqlBlock, kind: StmtKind) -> EsqlStmt {
    EsqlStmt {
        kind,
        sql: block.sql.clone(),
        params: Vec::new(),
        into_vars: Vec::new(),
        operand: None,
        location: block.origin.clone(),
        start_line: block.start_line,
        end_line: block.end_line,
    }
}

fn syntax_error(block: &SqlBlock, message: impl Into<String>) -> PpError {
    PpError::SyntaxError {
        file: block.origin.file.clone(),
        line: block.origin.line,
        column: block.origin.column,
        message: message.into(),
    }
}

fn parse_statement(
    block: &SqlBlock,
    kind: StmtKind,
) -> PpResult<(EsqlStmt, Option<CursorDecl>)> {
    let sql = block.sql.trim();
    let words: Vec<&str> = sql.split_whitespace().collect();

    let mut stmt = bare_stmt(block, kind);
    let mut cursor = None;

    match kind {
        StmtKind::Connect | StmtKind::Dml | StmtKind::Other => {
            let (rewritten, params) = rewrite_params(sql);
            stmt.sql = rewritten;
            stmt.params = params;
        }

        StmtKind::Disconnect | StmtKind::Commit | StmtKind::Rollback => {
            // verb only; text goes through as-is
        }

        StmtKind::SelectInto => {
            let (remaining, into_vars) = strip_into_clause(sql);
            let (rewritten, params) = rewrite_params(&remaining);
            stmt.sql = rewritten;
            stmt.params = params;
            stmt.into_vars = into_vars;
        }

        StmtKind::DeclareCursor => {
            // DECLARE <name> CURSOR [WITH HOLD] FOR <sql-or-:ref>
            let name = words
                .get(1)
                .ok_or_else(|| syntax_error(block, "missing cursor name"))?
                .to_uppercase();
            if !words
                .get(2)
                .map(|w| w.eq_ignore_ascii_case("CURSOR"))
                .unwrap_or(false)
            {
                return Err(syntax_error(block, "expected CURSOR after DECLARE"));
            }
            let upper = sql.to_uppercase();
            let with_hold = upper.contains(" WITH HOLD ");
            let for_pos = upper
                .find(" FOR ")
                .ok_or_else(|| syntax_error(block, "missing FOR in cursor declaration"))?;
            let body = sql[for_pos + 5..].trim();

            let (source, params) = if let Some(rest) = body.strip_prefix(':') {
                (CursorSource::HostVar(rest.to_uppercase()), Vec::new())
            } else {
                let (rewritten, params) = rewrite_params(body);
                (CursorSource::Sql(rewritten), params)
            };

            stmt.sql = match source {
                CursorSource::Sql(ref s) => s.clone(),
                CursorSource::HostVar(_) => String::new(),
            };
            stmt.params = params.clone();
            stmt.operand = Some(name.clone());
            cursor = Some(CursorDecl {
                name,
                source,
                with_hold,
                params,
                location: block.origin.clone(),
            });
        }

        StmtKind::Open => {
            let name = words
                .get(1)
                .ok_or_else(|| syntax_error(block, "missing cursor name"))?
                .to_uppercase();
            stmt.operand = Some(name);
            if let Some(using_pos) = sql.to_uppercase().find(" USING ") {
                stmt.params = parse_host_ref_list(&sql[using_pos + 7..]);
            }
        }

        StmtKind::Fetch => {
            let name = words
                .get(1)
                .ok_or_else(|| syntax_error(block, "missing cursor name"))?
                .to_uppercase();
            stmt.operand = Some(name);
            let upper = sql.to_uppercase();
            let into_pos = upper
                .find(" INTO ")
                .ok_or_else(|| syntax_error(block, "missing INTO in FETCH"))?;
            stmt.into_vars = parse_host_ref_list(&sql[into_pos + 6..]);
        }

        StmtKind::Close => {
            let name = words
                .get(1)
                .ok_or_else(|| syntax_error(block, "missing cursor name"))?
                .to_uppercase();
            stmt.operand = Some(name);
        }

        StmtKind::Prepare => {
            // PREPARE <name> FROM <:ref | 'literal'>
            let name = words
                .get(1)
                .ok_or_else(|| syntax_error(block, "missing statement name"))?
                .to_uppercase();
            stmt.operand = Some(name);
            let upper = sql.to_uppercase();
            let from_pos = upper
                .find(" FROM ")
                .ok_or_else(|| syntax_error(block, "missing FROM in PREPARE"))?;
            let body = sql[from_pos + 6..].trim();
            if let Some(rest) = body.strip_prefix(':') {
                stmt.params = vec![HostRef::new(rest.to_uppercase())];
                stmt.sql = String::new();
            } else {
                stmt.sql = body.trim_matches('\'').to_string();
            }
        }

        StmtKind::Execute => {
            let name = words
                .get(1)
                .ok_or_else(|| syntax_error(block, "missing statement name"))?
                .to_uppercase();
            stmt.operand = Some(name);
            if let Some(using_pos) = sql.to_uppercase().find(" USING ") {
                stmt.params = parse_host_ref_list(&sql[using_pos + 7..]);
            }
        }

        StmtKind::ExecuteImmediate => {
            let body = sql["EXECUTE IMMEDIATE".len()..].trim();
            if let Some(rest) = body.strip_prefix(':') {
                stmt.params = vec![HostRef::new(rest.to_uppercase())];
                stmt.sql = String::new();
            } else {
                stmt.sql = body.trim_matches('\'').to_string();
            }
        }

        StmtKind::BeginDeclareSection | StmtKind::EndDeclareSection => unreachable!(),
    }

    Ok((stmt, cursor))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Rewrite `:name` (with optional `:name:indicator`) and legacy `?`
/// markers to `$1, $2, …` in first-appearance order, preserving quoted
/// strings. Returns the rewritten text and the ordered references.
pub fn rewrite_params(sql: &str) -> (String, Vec<HostRef>) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut params: Vec<HostRef> = Vec::new();

    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
                i += 1;
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
                i += 1;
            }
            ':' if !in_single && !in_double => {
                // `::` is a cast, not a reference
                if i + 1 < chars.len() && chars[i + 1] == ':' {
                    out.push_str("::");
                    i += 2;
                    continue;
                }
                if i + 1 < chars.len() && is_ident_char(chars[i + 1]) {
                    let (name, next) = take_ident(&chars, i + 1);
                    let mut indicator = None;
                    let mut after = next;
                    if after + 1 < chars.len()
                        && chars[after] == ':'
                        && is_ident_char(chars[after + 1])
                    {
                        let (ind, next2) = take_ident(&chars, after + 1);
                        indicator = Some(ind);
                        after = next2;
                    }
                    params.push(HostRef {
                        name,
                        indicator,
                    });
                    out.push_str(&format!("${}", params.len()));
                    i = after;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            '?' if !in_single && !in_double => {
                params.push(HostRef::new(format!("?{}", params.len() + 1)));
                out.push_str(&format!("${}", params.len()));
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    (out, params)
}

fn take_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (
        chars[start..end].iter().collect::<String>().to_uppercase(),
        end,
    )
}

/// Parse a comma-separated list of `:name[:indicator]` references.
pub fn parse_host_ref_list(text: &str) -> Vec<HostRef> {
    let mut refs = Vec::new();
    for piece in text.split(',') {
        let piece = piece.trim().trim_end_matches('.');
        let Some(body) = piece.strip_prefix(':') else {
            continue;
        };
        let mut parts = body.split(':');
        let name = match parts.next() {
            Some(n) if !n.is_empty() => n.to_uppercase(),
            _ => continue,
        };
        let indicator = parts
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_uppercase());
        refs.push(HostRef { name, indicator });
    }
    refs
}

/// Split a SELECT's INTO clause out: returns the statement without the
/// clause and the INTO targets.
fn strip_into_clause(sql: &str) -> (String, Vec<HostRef>) {
    let upper = sql.to_uppercase();
    let Some(into_pos) = find_outside_quotes(&upper, " INTO ") else {
        return (sql.to_string(), Vec::new());
    };
    let after_into = into_pos + " INTO ".len();
    let from_rel = find_outside_quotes(&upper[after_into..], " FROM ");

    match from_rel {
        Some(rel) => {
            let from_pos = after_into + rel;
            let into_vars = parse_host_ref_list(&sql[after_into..from_pos]);
            let remaining = format!("{}{}", &sql[..into_pos], &sql[from_pos..]);
            (remaining, into_vars)
        }
        None => {
            let into_vars = parse_host_ref_list(&sql[after_into..]);
            (sql[..into_pos].to_string(), into_vars)
        }
    }
}

fn find_outside_quotes(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let nlen = needle.len();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;
    while i + nlen <= bytes.len() {
        match bytes[i] {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            _ => {}
        }
        if !in_single && !in_double && &haystack[i..i + nlen] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}
