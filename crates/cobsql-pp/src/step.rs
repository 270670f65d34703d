//! Pipeline stage contract.

use std::fs;
use std::path::{Path, PathBuf};

use crate::copy::CopyResolver;
use crate::ir::EsqlProgram;
use crate::options::Options;
use crate::pipeline::ErrorData;
use crate::PpResult;

/// Payload passed between pipeline stages: a file on disk or an
/// in-memory buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum StepData {
    Filename(PathBuf),
    Buffer(String),
}

impl StepData {
    pub fn filename(path: impl Into<PathBuf>) -> Self {
        StepData::Filename(path.into())
    }

    pub fn buffer(text: impl Into<String>) -> Self {
        StepData::Buffer(text.into())
    }

    /// A filename is valid when the path is non-empty; a buffer always is.
    pub fn is_valid(&self) -> bool {
        match self {
            StepData::Filename(p) => !p.as_os_str().is_empty(),
            StepData::Buffer(_) => true,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            StepData::Filename(p) => Some(p),
            StepData::Buffer(_) => None,
        }
    }

    /// Full text content: read from disk for a filename, cloned for a
    /// buffer.
    pub fn text(&self) -> std::io::Result<String> {
        match self {
            StepData::Filename(p) => fs::read_to_string(p),
            StepData::Buffer(b) => Ok(b.clone()),
        }
    }

    /// Short description for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            StepData::Filename(p) => p.display().to_string(),
            StepData::Buffer(b) => format!("<buffer, {} bytes>", b.len()),
        }
    }
}

/// Shared state visible to every stage while the pipeline runs.
///
/// The options map is read-only for the whole run; the ESQL program slot
/// is written by the parser stage and read by the generator stage.
pub struct StepContext<'a> {
    pub opts: &'a Options,
    pub copy_resolver: Option<&'a CopyResolver>,
    pub err: &'a mut ErrorData,
    pub program: &'a mut Option<EsqlProgram>,
    /// Destination for the host-variable symbol table, when requested.
    pub symbol_file: Option<&'a Path>,
}

/// A transformation stage: reads its input, does its work, publishes its
/// output for the next stage.
///
/// The driver pre-sets the first stage's input and the last stage's
/// output; a stage whose output slot already names a file writes its
/// result there instead of producing a buffer.
pub trait TransformationStep {
    fn name(&self) -> &'static str;

    fn input(&self) -> Option<&StepData>;
    fn set_input(&mut self, data: StepData);

    fn output(&self) -> Option<&StepData>;
    fn set_output(&mut self, data: StepData);

    fn run(&mut self, ctx: &mut StepContext<'_>) -> PpResult<()>;
}

/// Write `text` to the stage's pre-set output file, or store it as the
/// stage's output buffer when no file was assigned.
pub(crate) fn publish_output(
    output: &mut Option<StepData>,
    text: String,
) -> std::io::Result<()> {
    match output {
        Some(StepData::Filename(p)) if !p.as_os_str().is_empty() => fs::write(p, text),
        _ => {
            *output = Some(StepData::Buffer(text));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_validity() {
        assert!(!StepData::filename("").is_valid());
        assert!(StepData::filename("a.cbl").is_valid());
        assert!(StepData::buffer("").is_valid());
    }

    #[test]
    fn buffer_text_roundtrip() {
        let d = StepData::buffer("hello");
        assert_eq!(d.text().unwrap(), "hello");
        assert!(d.as_path().is_none());
    }
}
