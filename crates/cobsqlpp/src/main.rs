//! Command-line front end for the ESQL preprocessor.
//!
//! ```bash
//! # translate embedded SQL, writing foo.cob next to the input
//! cobsqlpp -e -i foo.cbl -o @.cob
//!
//! # consolidate copybooks into a single file
//! cobsqlpp -c -p -I ./copy -i foo.cbl -o foo.consolidated.cbl
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use cobsql_pp::codegen::EsqlGenerator;
use cobsql_pp::consolidate::SourceConsolidation;
use cobsql_pp::options::keys;
use cobsql_pp::parser::EsqlParser;
use cobsql_pp::{CopyResolver, Preprocessor};

#[cfg(windows)]
const PATH_LIST_SEP: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEP: char = ':';

#[derive(Parser, Debug)]
#[command(
    name = "cobsqlpp",
    version,
    about = "cobsqlpp - ESQL preprocessor for COBOL",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// displays help on commandline options
    #[arg(short = 'h', long = "help", action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// displays version information
    #[arg(short = 'V', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// COPY file path list
    #[arg(short = 'I', long = "copypath", value_name = "PATH")]
    copypath: Vec<String>,

    /// input file
    #[arg(short = 'i', long = "infile", value_name = "FILE")]
    infile: Option<PathBuf>,

    /// output file
    #[arg(short = 'o', long = "outfile", value_name = "FILE")]
    outfile: Option<PathBuf>,

    /// output symbol file
    #[arg(short = 's', long = "symfile", value_name = "FILE")]
    symfile: Option<PathBuf>,

    /// preprocess for ESQL
    #[arg(short = 'e', long = "esql")]
    esql: bool,

    /// ESQL: preprocess all included COPY files
    #[arg(short = 'p', long = "esql-preprocess-copy")]
    esql_preprocess_copy: bool,

    /// ESQL: copy files extension list (comma-separated)
    #[arg(short = 'E', long = "esql-copy-exts", value_name = "EXT,EXT,...")]
    esql_copy_exts: Option<String>,

    /// ESQL: generated parameters style (a|d|c)
    #[arg(short = 'z', long = "param-style", value_name = "STYLE", default_value = "d")]
    param_style: String,

    /// ESQL: emit static calls
    #[arg(short = 'S', long = "esql-static-calls")]
    esql_static_calls: bool,

    /// generate debug info
    #[arg(short = 'g', long = "debug-info")]
    debug_info: bool,

    /// consolidate source to single-file
    #[arg(short = 'c', long = "consolidate")]
    consolidate: bool,

    /// keep temporary files
    #[arg(short = 'k', long = "keep")]
    keep: bool,

    /// verbose
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// verbose (debug)
    #[arg(short = 'd', long = "verbose-debug")]
    verbose_debug: bool,

    /// parser/scanner debug output
    #[arg(short = 'D', long = "parser-scanner-debug")]
    parser_scanner_debug: bool,

    /// emit map file
    #[arg(short = 'm', long = "map")]
    emit_map: bool,

    /// emit COBOL85-compliant code
    #[arg(short = 'C', long = "cobol85")]
    cobol85: bool,

    /// length/data suffixes for varlen fields (=LEN,ARR)
    #[arg(short = 'Y', long = "varying", value_name = "LEN,ARR")]
    varying: Option<String>,

    /// text field options (=char|charf|varchar)
    #[arg(short = 'P', long = "picx-as", value_name = "OPT", default_value = "char")]
    picx_as: String,

    /// custom code for "no record" condition (=nnn)
    #[arg(long = "no-rec-code", value_name = "NNN")]
    no_rec_code: Option<i64>,
}

fn usage_error(message: &str) -> ExitCode {
    let mut cmd = Cli::command();
    let _ = cmd.print_help();
    eprintln!("ERROR: {message}");
    ExitCode::from(1)
}

/// `@.ext` output names derive the stem from the input file.
fn resolve_output_alias(outfile: &Path, infile: &Path) -> PathBuf {
    let stem = outfile.file_stem().and_then(|s| s.to_str());
    if stem != Some("@") {
        return outfile.to_path_buf();
    }
    let ext = outfile.extension().and_then(|s| s.to_str()).unwrap_or("");
    let base = infile
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let name = if ext.is_empty() {
        base.to_string()
    } else {
        format!("{base}.{ext}")
    };
    match outfile.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.join(name),
        _ => PathBuf::from(name),
    }
}

fn valid_varying(spec: &str) -> bool {
    match spec.split_once(',') {
        Some((len, arr)) => !len.is_empty() && !arr.is_empty(),
        None => false,
    }
}

fn init_tracing(verbose: bool, verbose_debug: bool) {
    let level = if verbose_debug {
        "trace"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let mut cmd = Cli::command();
            let _ = cmd.print_help();
            eprintln!("ERROR: {e}");
            return ExitCode::from(1);
        }
    };

    if !cli.consolidate && !cli.esql {
        return usage_error("please enter at least one of the -e or -c options");
    }

    let (Some(infile), Some(outfile)) = (cli.infile.as_ref(), cli.outfile.as_ref()) else {
        return usage_error("please enter at least the input and output file parameters");
    };

    if !matches!(cli.picx_as.as_str(), "char" | "charf" | "varchar") {
        return usage_error("-P/--picx-as argument must be one of \"char\", \"charf\", \"varchar\"");
    }

    if !matches!(cli.param_style.as_str(), "a" | "d" | "c") {
        return usage_error("-z/--param-style argument must be one of \"a\", \"d\", \"c\"");
    }

    if let Some(ref spec) = cli.varying {
        if !valid_varying(spec) {
            return usage_error("please enter suffixes as --varying=LEN,ARR");
        }
    }

    init_tracing(cli.verbose, cli.verbose_debug);

    let abs_infile = infile
        .canonicalize()
        .unwrap_or_else(|_| infile.to_path_buf());
    let base_dir = abs_infile
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut resolver = CopyResolver::new(base_dir);
    resolver.set_verbose(cli.verbose);
    for group in &cli.copypath {
        let dirs: Vec<PathBuf> = group
            .split(PATH_LIST_SEP)
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .collect();
        resolver.add_copy_dirs(dirs);
    }
    if let Some(ref exts) = cli.esql_copy_exts {
        resolver.set_extensions(exts.split(',').map(|e| e.to_string()).collect());
    }

    let mut pp = Preprocessor::new();
    pp.set_copy_resolver(Rc::new(resolver));

    if cli.consolidate || cli.esql {
        pp.add_step(Box::new(SourceConsolidation::new()));
    }

    if cli.esql {
        if let Some(ref spec) = cli.varying {
            pp.set_opt(keys::VARLEN_SUFFIXES, spec.as_str());
        }
        pp.set_opt(keys::EMIT_STATIC_CALLS, cli.esql_static_calls);
        pp.set_opt(keys::PARAMS_STYLE, cli.param_style.as_str());
        pp.set_opt(keys::PREPROCESS_COPY_FILES, cli.esql_preprocess_copy);
        pp.set_opt(keys::CONSOLIDATED_MAP, true);
        pp.set_opt(keys::EMIT_MAP_FILE, cli.emit_map);
        pp.set_opt(keys::EMIT_COBOL85, cli.cobol85);
        pp.set_opt(keys::PICX_AS_VARCHAR, cli.picx_as == "varchar");
        pp.set_opt(keys::DEBUG_PARSER_SCANNER, cli.parser_scanner_debug);

        if let Some(code) = cli.no_rec_code {
            if code != 0 && (-999_999_999..=999_999_999).contains(&code) {
                pp.set_opt(keys::NO_REC_CODE, code as i32);
            }
        }

        pp.add_step(Box::new(EsqlParser::new()));
        pp.add_step(Box::new(EsqlGenerator::new()));
    }

    pp.set_opt(keys::EMIT_DEBUG_INFO, cli.debug_info);
    pp.set_opt(keys::KEEP_TEMP_FILES, cli.keep);
    pp.verbose = cli.verbose;
    pp.verbose_debug = cli.verbose_debug;
    pp.keep_temp_files = cli.keep;

    let outfile = resolve_output_alias(outfile, infile);
    if *infile == outfile {
        eprintln!("ERROR: input and output file must be different");
        return ExitCode::from(1);
    }

    pp.set_input_file(infile.clone());
    pp.set_output_file(outfile.clone());
    if let Some(ref sym) = cli.symfile {
        pp.set_symbol_file(sym.clone());
    }

    let ok = pp.process();
    if !ok {
        for m in &pp.err_data.messages {
            eprintln!("{m}");
        }
    }
    for w in &pp.err_data.warnings {
        eprintln!("{w}");
    }

    let code = pp.err_data.code.clamp(0, 255) as u8;
    if ok {
        ExitCode::SUCCESS
    } else if code == 0 {
        // a failed run never reports success
        ExitCode::from(1)
    } else {
        ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_alias_derives_from_input_stem() {
        let out = resolve_output_alias(Path::new("@.cob"), Path::new("foo.cbl"));
        assert_eq!(out, PathBuf::from("foo.cob"));
    }

    #[test]
    fn output_alias_keeps_directory() {
        let out = resolve_output_alias(Path::new("build/@.cob"), Path::new("src/foo.cbl"));
        assert_eq!(out, PathBuf::from("build/foo.cob"));
    }

    #[test]
    fn non_alias_output_unchanged() {
        let out = resolve_output_alias(Path::new("bar.cob"), Path::new("foo.cbl"));
        assert_eq!(out, PathBuf::from("bar.cob"));
    }

    #[test]
    fn varying_spec_validation() {
        assert!(valid_varying("LEN,ARR"));
        assert!(!valid_varying("LENARR"));
        assert!(!valid_varying(",ARR"));
        assert!(!valid_varying("LEN,"));
    }

    #[test]
    fn cli_parses_typical_invocation() {
        let cli = Cli::try_parse_from([
            "cobsqlpp", "-e", "-i", "foo.cbl", "-o", "@.cob", "-z", "a", "-S", "-m",
        ])
        .unwrap();
        assert!(cli.esql);
        assert_eq!(cli.param_style, "a");
        assert!(cli.esql_static_calls);
        assert!(cli.emit_map);
        assert_eq!(cli.infile.unwrap(), PathBuf::from("foo.cbl"));
    }

    #[test]
    fn cli_rejects_unknown_option() {
        assert!(Cli::try_parse_from(["cobsqlpp", "--frobnicate"]).is_err());
    }

    #[test]
    fn repeatable_copypath_groups() {
        let cli = Cli::try_parse_from([
            "cobsqlpp", "-e", "-i", "a", "-o", "b", "-I", "p1", "-I", "p2",
        ])
        .unwrap();
        assert_eq!(cli.copypath, vec!["p1".to_string(), "p2".to_string()]);
    }
}
