//! The preprocessor driver: owns the ordered stage list, the option map
//! and the error record, and chains stage outputs to successor inputs.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::info;

use crate::copy::CopyResolver;
use crate::ir::EsqlProgram;
use crate::options::{keys, OptValue, Options};
use crate::step::{StepContext, StepData, TransformationStep};

/// Error codes surfaced through [`ErrorData::code`].
pub mod err_code {
    pub const OK: i32 = 0;
    pub const BAD_INPUT: i32 = 1;
    pub const BAD_OUTPUT: i32 = 2;
    pub const MISSING_INPUT: i32 = 4;
}

/// Error record examined by the caller after [`Preprocessor::process`].
#[derive(Debug, Clone, Default)]
pub struct ErrorData {
    /// 0 means success.
    pub code: i32,
    pub messages: Vec<String>,
    pub warnings: Vec<String>,
}

impl ErrorData {
    pub fn set_error(&mut self, code: i32, message: impl Into<String>) {
        self.code = code;
        self.messages.push(message.into());
    }
}

/// The pipeline driver.
pub struct Preprocessor {
    steps: Vec<Box<dyn TransformationStep>>,
    opts: Options,
    pub err_data: ErrorData,
    copy_resolver: Option<Rc<CopyResolver>>,
    infile: PathBuf,
    outfile: PathBuf,
    symbol_file: Option<PathBuf>,
    pub verbose: bool,
    pub verbose_debug: bool,
    pub keep_temp_files: bool,
    input: Option<StepData>,
    output: Option<StepData>,
    program: Option<EsqlProgram>,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            opts: Options::new(),
            err_data: ErrorData::default(),
            copy_resolver: None,
            infile: PathBuf::new(),
            outfile: PathBuf::new(),
            symbol_file: None,
            verbose: false,
            verbose_debug: false,
            keep_temp_files: false,
            input: None,
            output: None,
            program: None,
        }
    }

    pub fn set_copy_resolver(&mut self, resolver: Rc<CopyResolver>) {
        self.copy_resolver = Some(resolver);
    }

    pub fn copy_resolver(&self) -> Option<&CopyResolver> {
        self.copy_resolver.as_deref()
    }

    pub fn add_step(&mut self, step: Box<dyn TransformationStep>) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Box<dyn TransformationStep>] {
        &self.steps
    }

    pub fn set_opt(&mut self, key: &str, value: impl Into<OptValue>) {
        self.opts.set(key, value);
    }

    pub fn opts(&self) -> &Options {
        &self.opts
    }

    pub fn set_input_file(&mut self, path: impl AsRef<Path>) {
        self.infile = path.as_ref().to_path_buf();
    }

    pub fn set_output_file(&mut self, path: impl AsRef<Path>) {
        self.outfile = path.as_ref().to_path_buf();
    }

    pub fn set_symbol_file(&mut self, path: impl AsRef<Path>) {
        self.symbol_file = Some(path.as_ref().to_path_buf());
    }

    pub fn input_file(&self) -> &Path {
        &self.infile
    }

    pub fn output_file(&self) -> &Path {
        &self.outfile
    }

    /// The parsed program, available after a successful ESQL run.
    pub fn program(&self) -> Option<&EsqlProgram> {
        self.program.as_ref()
    }

    /// Run the pipeline. Returns `true` on success; on failure the
    /// details are in [`Self::err_data`].
    pub fn process(&mut self) -> bool {
        if self.steps.is_empty() {
            return false;
        }

        let input = StepData::filename(self.infile.clone());
        self.steps[0].set_input(input.clone());
        self.input = Some(input);

        let output = StepData::filename(self.outfile.clone());
        self.steps.last_mut().unwrap().set_output(output.clone());
        self.output = Some(output);

        if !self.input.as_ref().map(StepData::is_valid).unwrap_or(false) {
            self.err_data
                .set_error(err_code::BAD_INPUT, "Bad input file");
            return false;
        }

        let no_output = self.opts.get_bool(keys::NO_OUTPUT, false);
        if !no_output
            && !self
                .output
                .as_ref()
                .map(StepData::is_valid)
                .unwrap_or(false)
        {
            self.err_data
                .set_error(err_code::BAD_OUTPUT, "Bad output file");
            return false;
        }

        if !self.infile.exists() {
            self.err_data
                .set_error(err_code::MISSING_INPUT, "Input file does not exist");
            return false;
        }

        if self.verbose {
            info!("Input file: {}", self.infile.display());
            info!("Output file: {}", self.outfile.display());
            if let Some(resolver) = self.copy_resolver.as_deref() {
                for dir in resolver.copy_dirs() {
                    info!("Copy dir: {}", dir.display());
                }
                for ext in resolver.extensions() {
                    info!("Copy extension: {ext}");
                }
            }
            for (key, value) in self.opts.iter() {
                info!("Option [{key}] : [{value}]");
            }
        }

        self.transform()
    }

    /// Chain the stages: stage 0 keeps its pre-set input, every later
    /// stage reads its predecessor's output. A failing stage stops the
    /// run immediately.
    fn transform(&mut self) -> bool {
        let mut steps = std::mem::take(&mut self.steps);
        let mut ok = true;
        let mut prev_output: Option<StepData> = None;

        for (k, step) in steps.iter_mut().enumerate() {
            if k > 0 {
                match prev_output.take() {
                    Some(data) => step.set_input(data),
                    None => {
                        self.err_data
                            .set_error(err_code::BAD_INPUT, "previous step produced no output");
                        ok = false;
                        break;
                    }
                }
            }

            let mut ctx = StepContext {
                opts: &self.opts,
                copy_resolver: self.copy_resolver.as_deref(),
                err: &mut self.err_data,
                program: &mut self.program,
                symbol_file: self.symbol_file.as_deref(),
            };

            if let Err(e) = step.run(&mut ctx) {
                self.err_data.set_error(e.code(), e.to_string());
                ok = false;
                break;
            }

            prev_output = step.output().cloned();
        }

        self.steps = steps;
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::SourceConsolidation;
    use crate::parser::EsqlParser;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn empty_pipeline_returns_false_with_code_zero() {
        let mut pp = Preprocessor::new();
        pp.set_input_file("a.cbl");
        pp.set_output_file("b.cbl");
        assert!(!pp.process());
        assert_eq!(pp.err_data.code, 0);
    }

    #[test]
    fn missing_input_file_sets_code_4() {
        let dir = tempdir().unwrap();
        let mut pp = Preprocessor::new();
        pp.set_copy_resolver(Rc::new(CopyResolver::new(dir.path())));
        pp.add_step(Box::new(SourceConsolidation::new()));
        pp.set_input_file(dir.path().join("nope.cbl"));
        pp.set_output_file(dir.path().join("out.cbl"));
        assert!(!pp.process());
        assert_eq!(pp.err_data.code, err_code::MISSING_INPUT);
    }

    #[test]
    fn empty_input_path_sets_code_1() {
        let mut pp = Preprocessor::new();
        pp.add_step(Box::new(SourceConsolidation::new()));
        pp.set_output_file("out.cbl");
        assert!(!pp.process());
        assert_eq!(pp.err_data.code, err_code::BAD_INPUT);
    }

    #[test]
    fn empty_output_path_sets_code_2() {
        let dir = tempdir().unwrap();
        let infile = dir.path().join("in.cbl");
        fs::write(&infile, "       MOVE A TO B.\n").unwrap();

        let mut pp = Preprocessor::new();
        pp.add_step(Box::new(SourceConsolidation::new()));
        pp.set_input_file(&infile);
        assert!(!pp.process());
        assert_eq!(pp.err_data.code, err_code::BAD_OUTPUT);
    }

    #[test]
    fn no_output_option_skips_output_validation() {
        let dir = tempdir().unwrap();
        let infile = dir.path().join("in.cbl");
        fs::write(&infile, "       MOVE A TO B.\n").unwrap();

        let mut pp = Preprocessor::new();
        pp.set_copy_resolver(Rc::new(CopyResolver::new(dir.path())));
        pp.add_step(Box::new(SourceConsolidation::new()));
        pp.set_input_file(&infile);
        pp.set_opt(crate::options::keys::NO_OUTPUT, true);
        // output path left empty on purpose: the stage falls back to an
        // in-memory buffer instead of writing a file
        assert!(pp.process(), "{:?}", pp.err_data);
        assert_eq!(pp.err_data.code, 0);
    }

    #[test]
    fn chained_steps_feed_predecessor_output() {
        let dir = tempdir().unwrap();
        let infile = dir.path().join("in.cbl");
        let outfile = dir.path().join("out.cbl");
        fs::write(
            &infile,
            "       EXEC SQL COMMIT END-EXEC.\n",
        )
        .unwrap();

        let mut pp = Preprocessor::new();
        pp.set_copy_resolver(Rc::new(CopyResolver::new(dir.path())));
        pp.add_step(Box::new(SourceConsolidation::new()));
        pp.add_step(Box::new(EsqlParser::new()));
        pp.set_input_file(&infile);
        pp.set_output_file(&outfile);

        assert!(pp.process(), "{:?}", pp.err_data);

        // invariant: step k input == step k-1 output, and step 0 input
        // names the configured infile
        let steps = pp.steps();
        assert_eq!(
            steps[0].input(),
            Some(&StepData::filename(infile.clone()))
        );
        assert_eq!(steps[1].input(), steps[0].output());

        assert!(pp.program().is_some());
        assert_eq!(pp.program().unwrap().statements.len(), 1);
    }

    #[test]
    fn full_esql_run_writes_output_map_and_symbols() {
        use crate::codegen::EsqlGenerator;
        use crate::options::keys;

        let dir = tempdir().unwrap();
        let infile = dir.path().join("prog.cbl");
        let outfile = dir.path().join("prog.cob");
        let symfile = dir.path().join("prog.sym");
        fs::write(
            &infile,
            "\
       IDENTIFICATION DIVISION.
       PROGRAM-ID. PROG.
       DATA DIVISION.
       WORKING-STORAGE SECTION.
       EXEC SQL BEGIN DECLARE SECTION END-EXEC.
       01 WS-ID PIC 9(8).
       01 WS-NAME PIC X(30).
       EXEC SQL END DECLARE SECTION END-EXEC.
       PROCEDURE DIVISION.
           EXEC SQL
             SELECT NAME INTO :WS-NAME
             FROM CUSTOMER WHERE ID = :WS-ID
           END-EXEC.
           STOP RUN.
",
        )
        .unwrap();

        let mut pp = Preprocessor::new();
        pp.set_copy_resolver(Rc::new(CopyResolver::new(dir.path())));
        pp.add_step(Box::new(SourceConsolidation::new()));
        pp.add_step(Box::new(EsqlParser::new()));
        pp.add_step(Box::new(EsqlGenerator::new()));
        pp.set_opt(keys::PARAMS_STYLE, "a");
        pp.set_opt(keys::EMIT_MAP_FILE, true);
        pp.set_input_file(&infile);
        pp.set_output_file(&outfile);
        pp.set_symbol_file(&symfile);

        assert!(pp.process(), "{:?}", pp.err_data);

        let generated = fs::read_to_string(&outfile).unwrap();
        assert!(generated.contains("CALL \"CBSQLExecParams\""));
        assert!(generated.contains("ID = $1"));
        assert!(generated.contains("       STOP RUN.") || generated.contains("STOP RUN."));
        assert!(!generated.to_uppercase().contains("END-EXEC"));

        // one map row per generated call site, pointing at the original file
        let map = fs::read_to_string(format!("{}.map", outfile.display())).unwrap();
        let rows: Vec<&str> = map.lines().collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains("prog.cbl"));
        assert!(rows[0].contains("SELECT-INTO"));

        // symbol table lists both host variables with offsets
        let sym = fs::read_to_string(&symfile).unwrap();
        let sym_rows: Vec<&str> = sym.lines().collect();
        assert_eq!(sym_rows.len(), 2);
        assert!(sym_rows[0].starts_with("WS-ID"));
        assert!(sym_rows[1].starts_with("WS-NAME"));
    }

    #[test]
    fn failing_step_stops_the_chain() {
        let dir = tempdir().unwrap();
        let infile = dir.path().join("in.cbl");
        let outfile = dir.path().join("out.cbl");
        // unresolvable copybook with preprocessing on
        fs::write(&infile, "       COPY NOPE.\n").unwrap();

        let mut pp = Preprocessor::new();
        pp.set_copy_resolver(Rc::new(CopyResolver::new(dir.path())));
        pp.add_step(Box::new(SourceConsolidation::new()));
        pp.add_step(Box::new(EsqlParser::new()));
        pp.set_input_file(&infile);
        pp.set_output_file(&outfile);
        pp.set_opt(crate::options::keys::PREPROCESS_COPY_FILES, true);

        assert!(!pp.process());
        assert_eq!(pp.err_data.code, 5);
        assert_eq!(pp.err_data.messages.len(), 1);
        // parser never ran
        assert!(pp.steps()[1].output().is_none());
    }
}
