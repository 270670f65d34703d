//! Typed option values for the preprocessor.
//!
//! The command-line layer fills an [`Options`] map before the pipeline
//! runs; stages only ever read it.

use std::collections::HashMap;
use std::fmt;

/// A single option value holding exactly one payload kind.
#[derive(Debug, Clone, PartialEq)]
pub enum OptValue {
    Bool(bool),
    Int(i32),
    Float(f64),
    Char(char),
    Str(String),
}

impl fmt::Display for OptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptValue::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            OptValue::Int(i) => write!(f, "{i}"),
            OptValue::Float(x) => write!(f, "{x}"),
            OptValue::Char(c) => write!(f, "{c}"),
            OptValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Bool(v)
    }
}

impl From<i32> for OptValue {
    fn from(v: i32) -> Self {
        OptValue::Int(v)
    }
}

impl From<f64> for OptValue {
    fn from(v: f64) -> Self {
        OptValue::Float(v)
    }
}

impl From<char> for OptValue {
    fn from(v: char) -> Self {
        OptValue::Char(v)
    }
}

impl From<&str> for OptValue {
    fn from(v: &str) -> Self {
        OptValue::Str(v.to_string())
    }
}

impl From<String> for OptValue {
    fn from(v: String) -> Self {
        OptValue::Str(v)
    }
}

/// String-keyed option map with typed accessors.
///
/// Unknown keys yield the caller-supplied default.
#[derive(Debug, Clone, Default)]
pub struct Options {
    values: HashMap<String, OptValue>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<OptValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&OptValue> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(OptValue::Bool(b)) => *b,
            _ => default,
        }
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.values.get(key) {
            Some(OptValue::Int(i)) => *i,
            _ => default,
        }
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(OptValue::Str(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// Iterate over all set options, for verbose echoing.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptValue)> {
        self.values.iter()
    }
}

/// Recognised option keys.
pub mod keys {
    pub const VARLEN_SUFFIXES: &str = "varlen_suffixes";
    pub const EMIT_STATIC_CALLS: &str = "emit_static_calls";
    pub const PARAMS_STYLE: &str = "params_style";
    pub const PREPROCESS_COPY_FILES: &str = "preprocess_copy_files";
    pub const CONSOLIDATED_MAP: &str = "consolidated_map";
    pub const EMIT_MAP_FILE: &str = "emit_map_file";
    pub const EMIT_COBOL85: &str = "emit_cobol85";
    pub const PICX_AS_VARCHAR: &str = "picx_as_varchar";
    pub const DEBUG_PARSER_SCANNER: &str = "debug_parser_scanner";
    pub const NO_REC_CODE: &str = "no_rec_code";
    pub const EMIT_DEBUG_INFO: &str = "emit_debug_info";
    pub const NO_OUTPUT: &str = "no_output";
    pub const KEEP_TEMP_FILES: &str = "keep_temp_files";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringification_per_tag() {
        assert_eq!(OptValue::Bool(true).to_string(), "true");
        assert_eq!(OptValue::Bool(false).to_string(), "false");
        assert_eq!(OptValue::Int(-7).to_string(), "-7");
        assert_eq!(OptValue::Char('d').to_string(), "d");
        assert_eq!(OptValue::Str("LEN,ARR".into()).to_string(), "LEN,ARR");
    }

    #[test]
    fn typed_getters_fall_back_to_default() {
        let mut opts = Options::new();
        opts.set(keys::EMIT_STATIC_CALLS, true);
        opts.set(keys::PARAMS_STYLE, "a");
        opts.set(keys::NO_REC_CODE, -1234);

        assert!(opts.get_bool(keys::EMIT_STATIC_CALLS, false));
        assert_eq!(opts.get_str(keys::PARAMS_STYLE, "d"), "a");
        assert_eq!(opts.get_int(keys::NO_REC_CODE, 0), -1234);

        // unknown key -> default
        assert!(!opts.get_bool("nope", false));
        assert_eq!(opts.get_str("nope", "d"), "d");

        // wrong payload kind -> default
        assert_eq!(opts.get_int(keys::PARAMS_STYLE, 42), 42);
    }
}
