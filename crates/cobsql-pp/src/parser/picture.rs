//! Host-variable declaration parsing for declare sections.

use crate::ir::{CobolVarType, HostVarDecl, SourceLocation};
use crate::{PpError, PpResult};

/// What a PICTURE string describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PicCategory {
    Numeric,
    Alphanumeric,
    National,
}

#[derive(Debug, Clone, Copy)]
struct PicInfo {
    category: PicCategory,
    /// Digits for numerics, characters otherwise.
    size: u32,
    scale: u32,
    signed: bool,
}

/// USAGE clause of a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Usage {
    #[default]
    Display,
    Packed,
    Binary,
}

/// SIGN clause of a display numeric.
#[derive(Debug, Clone, Copy, Default)]
struct SignSpec {
    leading: bool,
    separate: bool,
}

/// Analyze a PICTURE string: category, size, scale, signedness.
fn analyze_picture(picture: &str) -> PicInfo {
    let upper = picture.to_uppercase();
    let chars: Vec<char> = upper.chars().collect();

    let mut size = 0u32;
    let mut scale = 0u32;
    let mut seen_v = false;
    let mut signed = false;
    let mut has_9 = false;
    let mut has_x = false;
    let mut has_a = false;
    let mut has_n = false;

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let count = if i + 1 < chars.len() && chars[i + 1] == '(' {
            let mut end = i + 2;
            while end < chars.len() && chars[end] != ')' {
                end += 1;
            }
            let count: u32 = chars[i + 2..end]
                .iter()
                .collect::<String>()
                .parse()
                .unwrap_or(1);
            i = end + 1;
            count
        } else {
            i += 1;
            1
        };

        match ch {
            '9' => {
                has_9 = true;
                size += count;
                if seen_v {
                    scale += count;
                }
            }
            'X' => {
                has_x = true;
                size += count;
            }
            'A' => {
                has_a = true;
                size += count;
            }
            'N' => {
                has_n = true;
                size += count;
            }
            'S' => signed = true,
            'V' => seen_v = true,
            _ => {}
        }
    }

    let category = if has_n {
        PicCategory::National
    } else if has_9 && !has_x && !has_a {
        PicCategory::Numeric
    } else {
        PicCategory::Alphanumeric
    };

    PicInfo {
        category,
        size,
        scale,
        signed,
    }
}

fn var_type(pic: PicInfo, usage: Usage, sign: SignSpec) -> CobolVarType {
    match pic.category {
        PicCategory::National => CobolVarType::Japanese,
        PicCategory::Alphanumeric => CobolVarType::Alphanumeric,
        PicCategory::Numeric => match usage {
            Usage::Packed => {
                if pic.signed {
                    CobolVarType::SignedNumberPd
                } else {
                    CobolVarType::UnsignedNumberPd
                }
            }
            Usage::Binary => {
                if pic.signed {
                    CobolVarType::SignedBinary
                } else {
                    CobolVarType::UnsignedBinary
                }
            }
            Usage::Display => {
                if !pic.signed {
                    CobolVarType::UnsignedNumber
                } else {
                    match (sign.leading, sign.separate) {
                        (false, false) => CobolVarType::SignedNumberTc,
                        (false, true) => CobolVarType::SignedNumberTs,
                        (true, false) => CobolVarType::SignedNumberLc,
                        (true, true) => CobolVarType::SignedNumberLs,
                    }
                }
            }
        },
    }
}

/// One logical declaration sentence: the joined words plus its line span.
struct Sentence {
    words: Vec<String>,
    start_line: usize,
    end_line: usize,
}

/// Parse the data-item declarations of a declare-section window.
///
/// `lines` carries `(consolidated line number, raw line)` pairs; marker
/// and comment lines must already be excluded by the caller.
pub fn parse_declarations(
    lines: &[(usize, &str)],
    origins: &[SourceLocation],
) -> PpResult<Vec<HostVarDecl>> {
    let mut sentences = Vec::new();
    let mut current: Option<Sentence> = None;

    for (lineno, raw) in lines {
        let content = raw.trim();
        if content.is_empty() {
            continue;
        }
        let sentence = current.get_or_insert_with(|| Sentence {
            words: Vec::new(),
            start_line: *lineno,
            end_line: *lineno,
        });
        sentence.end_line = *lineno;
        sentence
            .words
            .extend(content.split_whitespace().map(|w| w.to_string()));
        if content.ends_with('.') {
            // strip the terminator from the last word
            if let Some(last) = sentence.words.last_mut() {
                *last = last.trim_end_matches('.').to_string();
                if last.is_empty() {
                    sentence.words.pop();
                }
            }
            sentences.push(current.take().unwrap());
        }
    }

    let mut vars = Vec::new();
    for sentence in &sentences {
        if let Some(decl) = parse_sentence(sentence, origins)? {
            vars.push(decl);
        }
    }
    Ok(vars)
}

fn parse_sentence(
    sentence: &Sentence,
    origins: &[SourceLocation],
) -> PpResult<Option<HostVarDecl>> {
    let words = &sentence.words;
    if words.len() < 2 {
        return Ok(None);
    }

    let level: u8 = match words[0].parse() {
        Ok(l) => l,
        Err(_) => return Ok(None),
    };
    // condition names and renames are not host variables
    if level == 88 || level == 66 {
        return Ok(None);
    }

    let name = words[1].to_uppercase();

    let mut pic: Option<PicInfo> = None;
    let mut usage = Usage::default();
    let mut sign = SignSpec::default();

    let mut i = 2;
    while i < words.len() {
        let w = words[i].to_uppercase();
        match w.as_str() {
            "PIC" | "PICTURE" => {
                let mut j = i + 1;
                if j < words.len() && words[j].eq_ignore_ascii_case("IS") {
                    j += 1;
                }
                if j >= words.len() {
                    let loc = location_of(sentence.start_line, origins);
                    return Err(PpError::SyntaxError {
                        file: loc.file,
                        line: loc.line,
                        column: loc.column,
                        message: format!("missing PICTURE string for '{name}'"),
                    });
                }
                pic = Some(analyze_picture(&words[j]));
                i = j;
            }
            "COMP-3" | "COMPUTATIONAL-3" | "PACKED-DECIMAL" => usage = Usage::Packed,
            "COMP" | "COMP-4" | "COMP-5" | "COMPUTATIONAL" | "COMPUTATIONAL-4"
            | "COMPUTATIONAL-5" | "BINARY" => usage = Usage::Binary,
            "SIGN" => { /* modifiers follow */ }
            "LEADING" => sign.leading = true,
            "TRAILING" => sign.leading = false,
            "SEPARATE" => sign.separate = true,
            "VALUE" | "VALUES" => break, // initial value: rest is irrelevant
            _ => {}
        }
        i += 1;
    }

    let Some(pic) = pic else {
        // group item or usage-only filler: not addressable as a host
        // variable on its own
        return Ok(None);
    };

    let location = location_of(sentence.start_line, origins);

    Ok(Some(HostVarDecl {
        level,
        name,
        var_type: var_type(pic, usage, sign),
        length: pic.size,
        scale: pic.scale,
        varlen: false,
        location,
        start_line: sentence.start_line,
        end_line: sentence.end_line,
    }))
}

fn location_of(lineno: usize, origins: &[SourceLocation]) -> SourceLocation {
    origins
        .get(lineno.saturating_sub(1))
        .cloned()
        .unwrap_or_else(|| SourceLocation::new("<buffer>", lineno, 1))
}
