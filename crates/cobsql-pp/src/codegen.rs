//! Code generation: IR in, pure COBOL out.
//!
//! Each embedded statement is replaced by a call sequence into the
//! runtime library; the statement texts become working-storage string
//! constants. Optional sidecar outputs: a map file linking generated
//! call sites back to original source positions and a symbol file
//! listing the host variables.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::ir::{
    field_flags, CobolVarType, CursorSource, EsqlProgram, EsqlStmt, HostRef, HostVarDecl,
    StmtKind,
};
use crate::options::keys;
use crate::step::{publish_output, StepContext, StepData, TransformationStep};
use crate::{PpError, PpResult};

/// Text host variables longer than this become varlen fields under
/// `picx_as_varchar`.
const VARLEN_PICX_THRESHOLD: u32 = 100;

/// Chunk width for SQL constant FILLER pieces.
const SQL_CHUNK: usize = 28;

const AREA_B: &str = "           ";
const ARG_INDENT: &str = "               ";

/// The generator stage.
#[derive(Default)]
pub struct EsqlGenerator {
    input: Option<StepData>,
    output: Option<StepData>,
}

impl EsqlGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

struct GenConfig {
    static_calls: bool,
    params_style: char,
    cobol85: bool,
    picx_varchar: bool,
    varlen_suffixes: (String, String),
    no_rec_code: Option<i32>,
    emit_map: bool,
    debug_info: bool,
}

impl GenConfig {
    fn from_opts(opts: &crate::options::Options) -> Self {
        let style = opts
            .get_str(keys::PARAMS_STYLE, "d")
            .chars()
            .next()
            .unwrap_or('d');
        let suffixes = opts.get_str(keys::VARLEN_SUFFIXES, "LEN,ARR");
        let (len_sfx, arr_sfx) = match suffixes.split_once(',') {
            Some((a, b)) => (a.to_string(), b.to_string()),
            None => ("LEN".to_string(), "ARR".to_string()),
        };
        let no_rec_code = match opts.get_int(keys::NO_REC_CODE, 0) {
            0 => None,
            n => Some(n),
        };
        Self {
            static_calls: opts.get_bool(keys::EMIT_STATIC_CALLS, false),
            params_style: style,
            cobol85: opts.get_bool(keys::EMIT_COBOL85, false),
            picx_varchar: opts.get_bool(keys::PICX_AS_VARCHAR, false),
            varlen_suffixes: (len_sfx, arr_sfx),
            no_rec_code,
            emit_map: opts.get_bool(keys::EMIT_MAP_FILE, false),
            debug_info: opts.get_bool(keys::EMIT_DEBUG_INFO, false),
        }
    }

    fn comment(&self, text: &str) -> String {
        if self.cobol85 {
            format!("      * {text}")
        } else {
            format!("      *> {text}")
        }
    }

    fn call_open(&self, entry: &str) -> String {
        if self.static_calls {
            format!("{AREA_B}CALL STATIC \"{entry}\" USING")
        } else {
            format!("{AREA_B}CALL \"{entry}\" USING")
        }
    }

    fn call_close(&self, out: &mut Vec<String>) {
        if self.cobol85 {
            out.push(format!("{AREA_B}END-CALL"));
        }
    }
}

/// Effective attributes of a referenced host variable.
struct VarInfo {
    name: String,
    type_code: u32,
    length: u32,
    scale: u32,
    flags: u32,
    indicator: Option<String>,
}

fn var_info(
    r: &HostRef,
    host_vars: &[HostVarDecl],
    warnings: &mut Vec<String>,
) -> VarInfo {
    let decl = host_vars
        .iter()
        .find(|v| v.name.eq_ignore_ascii_case(&r.name));
    let mut info = match decl {
        Some(v) => VarInfo {
            name: v.name.clone(),
            type_code: v.var_type.code(),
            length: v.length,
            scale: v.scale,
            flags: v.flags(),
            indicator: r.indicator.clone(),
        },
        None => {
            if !r.name.starts_with('?') {
                warnings.push(format!(
                    "host variable '{}' is not declared in a declare section; \
                     treated as PIC X(256)",
                    r.name
                ));
            }
            VarInfo {
                name: r.name.clone(),
                type_code: CobolVarType::Alphanumeric.code(),
                length: 256,
                scale: 0,
                flags: field_flags::NONE,
                indicator: r.indicator.clone(),
            }
        }
    };
    if info.indicator.is_some() {
        info.flags |= field_flags::NULL_IND;
    }
    info
}

fn emit_set_param(out: &mut Vec<String>, cfg: &GenConfig, entry: &str, v: &VarInfo) {
    out.push(cfg.call_open(entry));
    out.push(format!("{ARG_INDENT}BY VALUE {}", v.type_code));
    out.push(format!("{ARG_INDENT}BY VALUE {}", v.length));
    out.push(format!("{ARG_INDENT}BY VALUE {}", v.scale));
    out.push(format!("{ARG_INDENT}BY VALUE {}", v.flags));
    out.push(format!("{ARG_INDENT}BY REFERENCE {}", v.name));
    if let Some(ref ind) = v.indicator {
        out.push(format!("{ARG_INDENT}BY REFERENCE {ind}"));
    }
    cfg.call_close(out);
}

fn emit_no_rec_check(out: &mut Vec<String>, code: i32) {
    out.push(format!("{AREA_B}IF SQLCODE = 100"));
    out.push(format!("{AREA_B}    MOVE {code} TO SQLCODE"));
    out.push(format!("{AREA_B}END-IF"));
}

/// Rewrite `$n` placeholders to the configured parameter style.
fn apply_params_style(sql: &str, params: &[HostRef], style: char) -> String {
    if style == 'a' {
        return sql.to_string();
    }
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
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
            '$' if !in_single && !in_double => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                if j == i + 1 {
                    out.push(c);
                    i += 1;
                    continue;
                }
                let n: usize = chars[i + 1..j]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0);
                match style {
                    'c' => {
                        let name = params
                            .get(n.saturating_sub(1))
                            .map(|p| p.name.as_str())
                            .unwrap_or("");
                        if name.is_empty() || name.starts_with('?') {
                            out.push('?');
                        } else {
                            let _ = write!(out, ":{name}");
                        }
                    }
                    _ => out.push('?'),
                }
                i = j;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Working-storage constant holding one statement's SQL text.
fn emit_sql_constant(name: &str, sql: &str) -> Vec<String> {
    let mut out = vec![format!("       01  {name}.")];
    let chars: Vec<char> = sql.chars().collect();
    for chunk in chars.chunks(SQL_CHUNK) {
        let raw: String = chunk.iter().collect();
        let escaped = raw.replace('"', "\"\"");
        out.push(format!(
            "{AREA_B}02  FILLER PIC X({}) VALUE \"{}\".",
            chunk.len(),
            escaped
        ));
    }
    out.push(format!("{AREA_B}02  FILLER PIC X(1) VALUE LOW-VALUE."));
    out
}

/// Varlen group replacing a long `PIC X` declaration under
/// `picx_as_varchar`.
fn emit_varlen_group(v: &HostVarDecl, suffixes: &(String, String)) -> Vec<String> {
    vec![
        format!("       {:02}  {}.", v.level, v.name),
        format!(
            "{AREA_B}49  {}-{}    PIC 9(4) COMP-5.",
            v.name, suffixes.0
        ),
        format!(
            "{AREA_B}49  {}-{}    PIC X({}).",
            v.name, suffixes.1, v.length
        ),
    ]
}

fn const_name(idx: usize) -> String {
    format!("SQ{:04}", idx + 1)
}

/// Does this statement carry SQL text that must live in a constant?
fn stmt_sql_text(stmt: &EsqlStmt) -> Option<String> {
    match stmt.kind {
        StmtKind::SelectInto | StmtKind::Dml | StmtKind::Other => Some(stmt.sql.clone()),
        StmtKind::Commit => Some("COMMIT".to_string()),
        StmtKind::Rollback => Some("ROLLBACK".to_string()),
        StmtKind::DeclareCursor | StmtKind::Prepare | StmtKind::ExecuteImmediate => {
            if stmt.sql.is_empty() {
                None
            } else {
                Some(stmt.sql.clone())
            }
        }
        _ => None,
    }
}

/// Generate the replacement lines for one statement.
fn gen_statement(
    stmt: &EsqlStmt,
    program: &EsqlProgram,
    host_vars: &[HostVarDecl],
    cfg: &GenConfig,
    sq_name: &str,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut out = Vec::new();

    if cfg.debug_info {
        out.push(cfg.comment(&format!(
            "source: {}:{}",
            stmt.location.file, stmt.location.line
        )));
    }

    match stmt.kind {
        StmtKind::BeginDeclareSection | StmtKind::EndDeclareSection => {
            out.push(cfg.comment("ESQL declare section"));
        }

        StmtKind::Connect => {
            for p in &stmt.params {
                emit_set_param(&mut out, cfg, "CBSQLSetParam", &var_info(p, host_vars, warnings));
            }
            out.push(cfg.call_open("CBSQLConnect"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY VALUE {}", stmt.params.len()));
            cfg.call_close(&mut out);
        }

        StmtKind::Disconnect => {
            out.push(cfg.call_open("CBSQLDisconnect"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            cfg.call_close(&mut out);
        }

        StmtKind::DeclareCursor => {
            let name = stmt.operand.clone().unwrap_or_default();
            let decl = program.find_cursor(&name);
            let with_hold = decl.map(|c| c.with_hold).unwrap_or(false);
            for p in &stmt.params {
                emit_set_param(&mut out, cfg, "CBSQLSetParam", &var_info(p, host_vars, warnings));
            }
            out.push(cfg.call_open("CBSQLCursorDeclare"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY CONTENT \"{name}\""));
            out.push(format!("{ARG_INDENT}BY VALUE {}", i32::from(with_hold)));
            match decl.map(|c| &c.source) {
                Some(CursorSource::HostVar(v)) => {
                    out.push(format!("{ARG_INDENT}BY REFERENCE {v}"));
                }
                _ => out.push(format!("{ARG_INDENT}BY REFERENCE {sq_name}")),
            }
            out.push(format!("{ARG_INDENT}BY VALUE {}", stmt.params.len()));
            cfg.call_close(&mut out);
        }

        StmtKind::Open => {
            let name = stmt.operand.clone().unwrap_or_default();
            // parameter values are marshalled at OPEN time
            let params: &[HostRef] = if stmt.params.is_empty() {
                program.find_cursor(&name).map(|c| c.params.as_slice()).unwrap_or(&[])
            } else {
                &stmt.params
            };
            for p in params {
                emit_set_param(&mut out, cfg, "CBSQLSetParam", &var_info(p, host_vars, warnings));
            }
            out.push(cfg.call_open("CBSQLCursorOpen"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY CONTENT \"{name}\""));
            out.push(format!("{ARG_INDENT}BY VALUE {}", params.len()));
            cfg.call_close(&mut out);
        }

        StmtKind::Fetch => {
            let name = stmt.operand.clone().unwrap_or_default();
            for v in &stmt.into_vars {
                emit_set_param(
                    &mut out,
                    cfg,
                    "CBSQLSetResultParam",
                    &var_info(v, host_vars, warnings),
                );
            }
            out.push(cfg.call_open("CBSQLCursorFetchOne"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY CONTENT \"{name}\""));
            cfg.call_close(&mut out);
            if let Some(code) = cfg.no_rec_code {
                emit_no_rec_check(&mut out, code);
            }
        }

        StmtKind::Close => {
            let name = stmt.operand.clone().unwrap_or_default();
            out.push(cfg.call_open("CBSQLCursorClose"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY CONTENT \"{name}\""));
            cfg.call_close(&mut out);
        }

        StmtKind::Prepare => {
            let name = stmt.operand.clone().unwrap_or_default();
            for p in &stmt.params {
                emit_set_param(&mut out, cfg, "CBSQLSetParam", &var_info(p, host_vars, warnings));
            }
            out.push(cfg.call_open("CBSQLPrepare"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY CONTENT \"{name}\""));
            if stmt.params.is_empty() {
                out.push(format!("{ARG_INDENT}BY REFERENCE {sq_name}"));
            }
            cfg.call_close(&mut out);
        }

        StmtKind::Execute => {
            let name = stmt.operand.clone().unwrap_or_default();
            for p in &stmt.params {
                emit_set_param(&mut out, cfg, "CBSQLSetParam", &var_info(p, host_vars, warnings));
            }
            out.push(cfg.call_open("CBSQLExecPrepared"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY CONTENT \"{name}\""));
            out.push(format!("{ARG_INDENT}BY VALUE {}", stmt.params.len()));
            cfg.call_close(&mut out);
        }

        StmtKind::ExecuteImmediate => {
            for p in &stmt.params {
                emit_set_param(&mut out, cfg, "CBSQLSetParam", &var_info(p, host_vars, warnings));
            }
            out.push(cfg.call_open("CBSQLExecImmediate"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            if stmt.params.is_empty() {
                out.push(format!("{ARG_INDENT}BY REFERENCE {sq_name}"));
            }
            cfg.call_close(&mut out);
        }

        StmtKind::Commit | StmtKind::Rollback => {
            out.push(cfg.call_open("CBSQLExec"));
            out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
            out.push(format!("{ARG_INDENT}BY REFERENCE {sq_name}"));
            cfg.call_close(&mut out);
        }

        StmtKind::SelectInto | StmtKind::Dml | StmtKind::Other => {
            for p in &stmt.params {
                emit_set_param(&mut out, cfg, "CBSQLSetParam", &var_info(p, host_vars, warnings));
            }
            for v in &stmt.into_vars {
                emit_set_param(
                    &mut out,
                    cfg,
                    "CBSQLSetResultParam",
                    &var_info(v, host_vars, warnings),
                );
            }
            if stmt.params.is_empty() && stmt.into_vars.is_empty() {
                out.push(cfg.call_open("CBSQLExec"));
                out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
                out.push(format!("{ARG_INDENT}BY REFERENCE {sq_name}"));
            } else {
                out.push(cfg.call_open("CBSQLExecParams"));
                out.push(format!("{ARG_INDENT}BY REFERENCE SQLCA"));
                out.push(format!("{ARG_INDENT}BY REFERENCE {sq_name}"));
                out.push(format!("{ARG_INDENT}BY VALUE {}", stmt.params.len()));
            }
            cfg.call_close(&mut out);
            if stmt.kind == StmtKind::SelectInto {
                if let Some(code) = cfg.no_rec_code {
                    emit_no_rec_check(&mut out, code);
                }
            }
        }
    }

    out
}

struct Edit {
    start: usize,
    end: usize,
    lines: Vec<String>,
}

impl TransformationStep for EsqlGenerator {
    fn name(&self) -> &'static str {
        "esql-generate"
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
            .ok_or_else(|| PpError::Internal("generator input not set".into()))?;
        let text = input.text()?;
        let program = ctx
            .program
            .as_ref()
            .ok_or_else(|| PpError::Internal("no parsed program available".into()))?
            .clone();
        let cfg = GenConfig::from_opts(ctx.opts);

        let mut warnings = Vec::new();
        let mut lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();

        // picx_as_varchar re-types long text fields as varlen groups
        let mut host_vars = program.host_vars.clone();
        let mut edits: Vec<Edit> = Vec::new();
        if cfg.picx_varchar {
            for v in host_vars.iter_mut() {
                if v.var_type == CobolVarType::Alphanumeric
                    && !v.varlen
                    && v.length > VARLEN_PICX_THRESHOLD
                {
                    v.varlen = true;
                    edits.push(Edit {
                        start: v.start_line,
                        end: v.end_line,
                        lines: emit_varlen_group(v, &cfg.varlen_suffixes),
                    });
                }
            }
        }

        for (idx, stmt) in program.statements.iter().enumerate() {
            let sq = const_name(idx);
            edits.push(Edit {
                start: stmt.start_line,
                end: stmt.end_line,
                lines: gen_statement(stmt, &program, &host_vars, &cfg, &sq, &mut warnings),
            });
        }

        edits.sort_by(|a, b| b.start.cmp(&a.start));
        for edit in &edits {
            let start = edit.start.saturating_sub(1).min(lines.len());
            let end = edit.end.min(lines.len());
            lines.splice(start..end, edit.lines.iter().cloned());
        }

        // statement text constants go into working storage
        let mut const_lines = Vec::new();
        for (idx, stmt) in program.statements.iter().enumerate() {
            if let Some(sql) = stmt_sql_text(stmt) {
                let styled = apply_params_style(&sql, &stmt.params, cfg.params_style);
                const_lines.extend(emit_sql_constant(&const_name(idx), &styled));
            }
        }
        if !const_lines.is_empty() {
            let mut block = vec![cfg.comment("ESQL statement texts")];
            block.extend(const_lines);
            insert_into_working_storage(&mut lines, block);
        }

        // consolidation markers have served their purpose; REPLACING
        // placeholders stay, they are ordinary comments
        lines.retain(|l| {
            let t = l.trim_start();
            !t.starts_with(crate::consolidate::FILE_PUSH_MARKER)
                && !t.starts_with(crate::consolidate::FILE_POP_MARKER)
        });

        // map rows pair generated verb calls with their statements
        let map_rows = if cfg.emit_map {
            collect_map_rows(&lines, &program)
        } else {
            Vec::new()
        };

        let generated = lines.join("\n") + "\n";

        if let Some(StepData::Filename(out_path)) = &self.output {
            if cfg.emit_map && !out_path.as_os_str().is_empty() {
                let map_path = PathBuf::from(format!("{}.map", out_path.display()));
                fs::write(&map_path, map_rows.join("\n") + "\n")?;
                trace!(path = %map_path.display(), rows = map_rows.len(), "map file written");
            }
        }
        if let Some(sym_path) = ctx.symbol_file {
            write_symbol_file(sym_path, &host_vars)?;
        }

        ctx.err.warnings.extend(warnings);
        publish_output(&mut self.output, generated)?;
        Ok(())
    }
}

fn insert_into_working_storage(lines: &mut Vec<String>, block: Vec<String>) {
    let find = |needle: &str, lines: &[String]| {
        lines
            .iter()
            .position(|l| l.to_uppercase().contains(needle))
    };
    if let Some(pos) = find("WORKING-STORAGE SECTION", lines) {
        let at = pos + 1;
        lines.splice(at..at, block);
    } else if let Some(pos) = find("PROCEDURE DIVISION", lines) {
        let mut full = vec!["       WORKING-STORAGE SECTION.".to_string()];
        full.extend(block);
        lines.splice(pos..pos, full);
    } else {
        lines.extend(block);
    }
}

fn is_verb_call(line: &str) -> bool {
    (line.contains("CALL \"CBSQL") || line.contains("CALL STATIC \"CBSQL"))
        && !line.contains("CBSQLSetParam")
        && !line.contains("CBSQLSetResultParam")
}

fn collect_map_rows(lines: &[String], program: &EsqlProgram) -> Vec<String> {
    let call_stmts: Vec<(usize, &EsqlStmt)> = program
        .statements
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            !matches!(
                s.kind,
                StmtKind::BeginDeclareSection | StmtKind::EndDeclareSection
            )
        })
        .collect();

    let mut rows = Vec::new();
    let mut next = 0usize;
    for (lineno, line) in lines.iter().enumerate() {
        if is_verb_call(line) {
            if let Some((idx, stmt)) = call_stmts.get(next) {
                rows.push(format!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    lineno + 1,
                    stmt.location.file,
                    stmt.location.line,
                    stmt.location.column,
                    stmt.kind.verb(),
                    const_name(*idx),
                ));
                next += 1;
            }
        }
    }
    rows
}

fn write_symbol_file(path: &Path, host_vars: &[HostVarDecl]) -> std::io::Result<()> {
    let mut out = String::new();
    let mut offset = 0u32;
    for v in host_vars {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            v.name,
            v.var_type.code(),
            v.length,
            v.scale,
            offset
        );
        offset += v.storage_size() + if v.varlen { 2 } else { 0 };
    }
    fs::write(path, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::parser::parse_program;
    use crate::pipeline::ErrorData;
    use crate::step::StepContext;

    fn generate(src: &str, opts: &Options) -> (String, Vec<String>) {
        let program = parse_program(src, false).unwrap();
        let mut step = EsqlGenerator::new();
        step.set_input(StepData::buffer(src));
        let mut err = ErrorData::default();
        let mut slot = Some(program);
        let mut ctx = StepContext {
            opts,
            copy_resolver: None,
            err: &mut err,
            program: &mut slot,
            symbol_file: None,
        };
        step.run(&mut ctx).unwrap();
        (step.output().unwrap().text().unwrap(), err.warnings)
    }

    const SELECT_SRC: &str = "\
       IDENTIFICATION DIVISION.
       PROGRAM-ID. T.
       DATA DIVISION.
       WORKING-STORAGE SECTION.
       EXEC SQL BEGIN DECLARE SECTION END-EXEC.
       01 WS-NAME PIC X(30).
       01 WS-ID PIC 9(8).
       EXEC SQL END DECLARE SECTION END-EXEC.
       PROCEDURE DIVISION.
           EXEC SQL
             SELECT NAME INTO :WS-NAME
             FROM CUSTOMER WHERE ID = :WS-ID
           END-EXEC.
           STOP RUN.
";

    #[test]
    fn select_into_becomes_exec_params_call() {
        let (out, warnings) = generate(SELECT_SRC, &Options::new());
        assert!(out.contains("CALL \"CBSQLExecParams\""));
        assert!(out.contains("BY REFERENCE WS-ID"));
        assert!(out.contains("CALL \"CBSQLSetResultParam\""));
        assert!(out.contains("BY REFERENCE WS-NAME"));
        assert!(!out.contains("EXEC SQL\n"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn sql_constant_lands_in_working_storage() {
        let (out, _) = generate(SELECT_SRC, &Options::new());
        let ws = out.find("WORKING-STORAGE SECTION").unwrap();
        let proc = out.find("PROCEDURE DIVISION").unwrap();
        let sq = out.find("01  SQ0003").unwrap();
        assert!(ws < sq && sq < proc, "constant must sit in working storage");
        assert!(out.contains("VALUE LOW-VALUE"));
    }

    #[test]
    fn default_params_style_emits_question_marks() {
        let (out, _) = generate(SELECT_SRC, &Options::new());
        assert!(out.contains("ID = ?"));
        assert!(!out.contains("$1"));
    }

    #[test]
    fn numbered_params_style_keeps_placeholders() {
        let mut opts = Options::new();
        opts.set(keys::PARAMS_STYLE, "a");
        let (out, _) = generate(SELECT_SRC, &opts);
        assert!(out.contains("ID = $1"));
    }

    #[test]
    fn named_params_style_restores_references() {
        let mut opts = Options::new();
        opts.set(keys::PARAMS_STYLE, "c");
        let (out, _) = generate(SELECT_SRC, &opts);
        assert!(out.contains("ID = :WS-ID"));
    }

    #[test]
    fn static_calls_option() {
        let mut opts = Options::new();
        opts.set(keys::EMIT_STATIC_CALLS, true);
        let (out, _) = generate(SELECT_SRC, &opts);
        assert!(out.contains("CALL STATIC \"CBSQLExecParams\""));
    }

    #[test]
    fn cobol85_mode_adds_end_call() {
        let mut opts = Options::new();
        opts.set(keys::EMIT_COBOL85, true);
        let (out, _) = generate(SELECT_SRC, &opts);
        assert!(out.contains("END-CALL"));
        assert!(!out.contains("*>"));
    }

    #[test]
    fn undeclared_host_variable_warns() {
        let src = "\
       PROCEDURE DIVISION.
           EXEC SQL DELETE FROM T WHERE K = :NOT-DECLARED END-EXEC.
";
        let (_, warnings) = generate(src, &Options::new());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("NOT-DECLARED"));
    }

    #[test]
    fn cursor_sequence_generates_cursor_calls() {
        let src = "\
       PROCEDURE DIVISION.
           EXEC SQL DECLARE CUR1 CURSOR FOR SELECT A FROM T WHERE K = :WS-K END-EXEC.
           EXEC SQL OPEN CUR1 END-EXEC.
           EXEC SQL FETCH CUR1 INTO :WS-A END-EXEC.
           EXEC SQL CLOSE CUR1 END-EXEC.
";
        let (out, _) = generate(src, &Options::new());
        assert!(out.contains("CALL \"CBSQLCursorDeclare\""));
        assert!(out.contains("BY CONTENT \"CUR1\""));
        assert!(out.contains("CALL \"CBSQLCursorOpen\""));
        assert!(out.contains("CALL \"CBSQLCursorFetchOne\""));
        assert!(out.contains("CALL \"CBSQLCursorClose\""));
    }

    #[test]
    fn open_reuses_cursor_parameters() {
        let src = "\
       PROCEDURE DIVISION.
           EXEC SQL DECLARE CUR1 CURSOR FOR SELECT A FROM T WHERE K = :WS-K END-EXEC.
           EXEC SQL OPEN CUR1 END-EXEC.
";
        let (out, _) = generate(src, &Options::new());
        // the OPEN site marshals WS-K even though OPEN itself names no vars
        let open_pos = out.find("CBSQLCursorOpen").unwrap();
        let setparam_before_open = out[..open_pos].rfind("CBSQLSetParam");
        assert!(setparam_before_open.is_some());
    }

    #[test]
    fn no_rec_code_check_after_fetch() {
        let src = "\
       PROCEDURE DIVISION.
           EXEC SQL FETCH CUR1 INTO :WS-A END-EXEC.
";
        let mut opts = Options::new();
        opts.set(keys::NO_REC_CODE, -1403);
        let (out, _) = generate(src, &opts);
        assert!(out.contains("IF SQLCODE = 100"));
        assert!(out.contains("MOVE -1403 TO SQLCODE"));
    }

    #[test]
    fn picx_as_varchar_rewrites_long_text_fields() {
        let src = "\
       DATA DIVISION.
       WORKING-STORAGE SECTION.
       EXEC SQL BEGIN DECLARE SECTION END-EXEC.
       01 WS-NOTES PIC X(500).
       01 WS-CODE PIC X(8).
       EXEC SQL END DECLARE SECTION END-EXEC.
       PROCEDURE DIVISION.
           EXEC SQL DELETE FROM T WHERE A = :WS-CODE END-EXEC.
";
        let mut opts = Options::new();
        opts.set(keys::PICX_AS_VARCHAR, true);
        opts.set(keys::VARLEN_SUFFIXES, "LEN,ARR");
        let (out, _) = generate(src, &opts);
        assert!(out.contains("49  WS-NOTES-LEN"));
        assert!(out.contains("49  WS-NOTES-ARR    PIC X(500)"));
        // short fields stay as-is
        assert!(out.contains("01 WS-CODE PIC X(8)."));
    }

    #[test]
    fn non_esql_lines_pass_through_verbatim() {
        let (out, _) = generate(SELECT_SRC, &Options::new());
        assert!(out.contains("       IDENTIFICATION DIVISION."));
        assert!(out.contains("       PROGRAM-ID. T."));
        assert!(out.contains("           STOP RUN."));
    }

    #[test]
    fn commit_uses_plain_exec_with_constant() {
        let src = "\
       PROCEDURE DIVISION.
           EXEC SQL COMMIT END-EXEC.
";
        let (out, _) = generate(src, &Options::new());
        assert!(out.contains("CALL \"CBSQLExec\""));
        assert!(out.contains("VALUE \"COMMIT\""));
    }
}
