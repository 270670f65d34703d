//! EXEC SQL block scanner over the consolidated buffer.
//!
//! Walks the buffer line by line, tracking the origin markers left by
//! consolidation so every scanned block carries both its consolidated
//! line span and its original (file, line, column).

use tracing::trace;

use crate::consolidate::{FILE_POP_MARKER, FILE_PUSH_MARKER, REPLACING_MARKER};
use crate::ir::SourceLocation;
use crate::{PpError, PpResult};

/// A scanned `EXEC SQL ... END-EXEC` block.
#[derive(Debug, Clone)]
pub struct SqlBlock {
    /// Whitespace-normalised SQL text, markers stripped.
    pub sql: String,
    /// 1-based line span in the consolidated buffer, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    /// 1-based column of `EXEC` on its line.
    pub column: usize,
    /// Original position reconstructed from the file markers.
    pub origin: SourceLocation,
}

/// Scanner output: the blocks plus a per-line origin table
/// (`origins[k]` describes consolidated line `k + 1`).
#[derive(Debug)]
pub struct ScanResult {
    pub blocks: Vec<SqlBlock>,
    pub origins: Vec<SourceLocation>,
}

/// Extract the code content of a line.
///
/// Fixed-format lines (blank-or-numeric sequence area, blank or `-`
/// indicator) yield columns 8..72; anything else is treated as free
/// format. Returns the content and its starting column offset.
fn line_content(line: &str) -> (&str, usize) {
    if line.len() > 7 {
        let area = line.get(..6);
        let ind = line.as_bytes()[6] as char;
        let area_is_sequence = area
            .map(|a| a.chars().all(|c| c == ' ' || c.is_ascii_digit()))
            .unwrap_or(false);
        if area_is_sequence && (ind == ' ' || ind == '-') {
            let end = line.len().min(72);
            if let Some(content) = line.get(7..end) {
                return (content, 7);
            }
        }
    }
    (line, 0)
}

fn is_comment_line(line: &str) -> bool {
    if line.trim_start().starts_with("*>") {
        return true;
    }
    line.len() > 6 && matches!(line.as_bytes()[6], b'*' | b'/')
}

fn is_marker_line(line: &str) -> Option<&str> {
    let t = line.trim_start();
    if t.starts_with(FILE_PUSH_MARKER) {
        Some(FILE_PUSH_MARKER)
    } else if t.starts_with(FILE_POP_MARKER) {
        Some(FILE_POP_MARKER)
    } else if t.starts_with(REPLACING_MARKER) {
        Some(REPLACING_MARKER)
    } else {
        None
    }
}

/// True for consolidation marker lines.
pub(crate) fn is_marker(line: &str) -> bool {
    is_marker_line(line).is_some()
}

/// True for comment lines in either format.
pub(crate) fn is_comment(line: &str) -> bool {
    is_comment_line(line)
}

/// Code content of a line (fixed-format areas stripped).
pub(crate) fn code_content(line: &str) -> &str {
    line_content(line).0
}

/// Collapse runs of whitespace to single spaces.
fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last_was_space = false;
    for c in sql.chars() {
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Scan the consolidated buffer.
pub fn scan(text: &str, debug: bool) -> PpResult<ScanResult> {
    let mut origins = Vec::new();
    let mut blocks = Vec::new();

    // origin stack: (file, lines seen so far); the sentinel entry covers
    // buffers produced without markers (e.g. direct unit tests)
    let mut stack: Vec<(String, usize)> = vec![("<buffer>".to_string(), 0)];

    let mut in_block = false;
    let mut sql_buffer = String::new();
    let mut block_start = 0usize;
    let mut block_column = 0usize;
    let mut block_origin = SourceLocation::new("<buffer>", 0, 0);

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;

        // marker bookkeeping happens before anything else
        if let Some(kind) = is_marker_line(line) {
            match kind {
                FILE_PUSH_MARKER => {
                    let file = line.trim_start()[FILE_PUSH_MARKER.len()..]
                        .trim()
                        .to_string();
                    let file = if file.is_empty() {
                        "<buffer>".to_string()
                    } else {
                        file
                    };
                    origins.push(SourceLocation::new(file.clone(), 0, 1));
                    stack.push((file, 0));
                }
                FILE_POP_MARKER => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                    let top = stack.last().unwrap();
                    origins.push(SourceLocation::new(top.0.clone(), top.1, 1));
                }
                _ => {
                    let top = stack.last().unwrap();
                    origins.push(SourceLocation::new(top.0.clone(), top.1, 1));
                }
            }
            continue;
        }

        {
            let top = stack.last_mut().unwrap();
            top.1 += 1;
            origins.push(SourceLocation::new(top.0.clone(), top.1, 1));
        }

        if is_comment_line(line) {
            continue;
        }

        let (content, col_offset) = line_content(line);
        let upper = content.to_uppercase();

        if !in_block {
            if let Some(pos) = upper.find("EXEC SQL") {
                in_block = true;
                block_start = lineno;
                block_column = col_offset + pos + 1;
                let top = stack.last().unwrap();
                block_origin =
                    SourceLocation::new(top.0.clone(), top.1, block_column);

                let after = &content[pos + "EXEC SQL".len()..];
                if let Some(end_pos) = after.to_uppercase().find("END-EXEC") {
                    let sql = normalize_sql(&after[..end_pos]);
                    if debug {
                        trace!(target: "cobsql_pp::scanner", line = lineno, sql = %sql, "block");
                    }
                    blocks.push(SqlBlock {
                        sql,
                        start_line: block_start,
                        end_line: lineno,
                        column: block_column,
                        origin: block_origin.clone(),
                    });
                    in_block = false;
                } else {
                    sql_buffer = after.trim().to_string();
                }
            }
        } else if let Some(end_pos) = upper.find("END-EXEC") {
            let before = content[..end_pos].trim();
            if !before.is_empty() {
                if !sql_buffer.is_empty() {
                    sql_buffer.push(' ');
                }
                sql_buffer.push_str(before);
            }
            let sql = normalize_sql(&sql_buffer);
            if debug {
                trace!(target: "cobsql_pp::scanner", line = block_start, sql = %sql, "block");
            }
            blocks.push(SqlBlock {
                sql,
                start_line: block_start,
                end_line: lineno,
                column: block_column,
                origin: block_origin.clone(),
            });
            in_block = false;
            sql_buffer.clear();
        } else {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                if !sql_buffer.is_empty() {
                    sql_buffer.push(' ');
                }
                sql_buffer.push_str(trimmed);
            }
        }
    }

    if in_block {
        return Err(PpError::UnexpectedEof {
            context: format!("EXEC SQL block starting at line {block_start}"),
        });
    }

    Ok(ScanResult { blocks, origins })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_block() {
        let src = "       EXEC SQL SELECT 1 END-EXEC.\n";
        let r = scan(src, false).unwrap();
        assert_eq!(r.blocks.len(), 1);
        assert_eq!(r.blocks[0].sql, "SELECT 1");
        assert_eq!(r.blocks[0].start_line, 1);
        assert_eq!(r.blocks[0].end_line, 1);
    }

    #[test]
    fn multi_line_block_collects_and_normalises() {
        let src = "       EXEC SQL\n           SELECT    A,  B\n           FROM T\n       END-EXEC.\n";
        let r = scan(src, false).unwrap();
        assert_eq!(r.blocks.len(), 1);
        assert_eq!(r.blocks[0].sql, "SELECT A, B FROM T");
        assert_eq!(r.blocks[0].start_line, 1);
        assert_eq!(r.blocks[0].end_line, 4);
    }

    #[test]
    fn comments_inside_block_are_skipped() {
        let src = "       EXEC SQL\n      * a fixed comment\n           SELECT 1\n       END-EXEC.\n";
        let r = scan(src, false).unwrap();
        assert_eq!(r.blocks[0].sql, "SELECT 1");
    }

    #[test]
    fn unclosed_block_is_an_error() {
        let src = "       EXEC SQL\n           SELECT 1\n";
        let err = scan(src, false).unwrap_err();
        assert!(matches!(err, PpError::UnexpectedEof { .. }));
    }

    #[test]
    fn origins_follow_push_pop_markers() {
        let src = format!(
            "{} /src/main.cbl\n       MOVE A TO B.\n{} /src/FOO\n       01 X PIC X.\n{}\n       DISPLAY X.\n{}\n",
            FILE_PUSH_MARKER, FILE_PUSH_MARKER, FILE_POP_MARKER, FILE_POP_MARKER,
        );
        let r = scan(&src, false).unwrap();
        // line 2 is main.cbl line 1
        assert_eq!(r.origins[1].file, "/src/main.cbl");
        assert_eq!(r.origins[1].line, 1);
        // line 4 is FOO line 1
        assert_eq!(r.origins[3].file, "/src/FOO");
        assert_eq!(r.origins[3].line, 1);
        // line 6 is main.cbl line 2
        assert_eq!(r.origins[5].file, "/src/main.cbl");
        assert_eq!(r.origins[5].line, 2);
    }

    #[test]
    fn block_origin_points_into_original_file() {
        let src = format!(
            "{} /src/main.cbl\n       MOVE A TO B.\n       EXEC SQL COMMIT END-EXEC.\n{}\n",
            FILE_PUSH_MARKER, FILE_POP_MARKER,
        );
        let r = scan(&src, false).unwrap();
        assert_eq!(r.blocks.len(), 1);
        assert_eq!(r.blocks[0].origin.file, "/src/main.cbl");
        assert_eq!(r.blocks[0].origin.line, 2);
    }
}
