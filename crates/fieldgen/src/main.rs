use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use fieldgen::diagnostics::{Diagnostic, Report, Severity};
use fieldgen::generate::{self, CheckPolicy, GenerateOptions, TargetCaps};
use fieldgen::model::GeneratorInput;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fieldgen")]
#[command(about = "Finite-field arithmetic generator for MAC constructions.", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Emit the C header for a generator input.
    Generate(GenerateArgs),
    /// Print closed-form and fixpoint carry bounds as JSON.
    Bounds(BoundsArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab_case")]
enum CheckArg {
    Auto,
    Always,
    Never,
}

impl From<CheckArg> for CheckPolicy {
    fn from(arg: CheckArg) -> Self {
        match arg {
            CheckArg::Auto => CheckPolicy::Auto,
            CheckArg::Always => CheckPolicy::Always,
            CheckArg::Never => CheckPolicy::Never,
        }
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Generator input JSON (field, limbs, encoding, multiplication).
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Output header path; stdout when omitted.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Runtime overflow checks in the emitted routines.
    #[arg(long, value_enum, default_value_t = CheckArg::Auto)]
    check: CheckArg,

    #[arg(long, value_name = "N")]
    max_fixpoint_iterations: Option<usize>,

    /// Treat the target as lacking a carry-less multiply instruction.
    #[arg(long)]
    no_clmul: bool,

    /// Print the generation report as JSON on stdout.
    #[arg(long, requires = "out")]
    report_json: bool,
}

#[derive(Debug, Args)]
struct BoundsArgs {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    #[arg(long, value_name = "N")]
    max_fixpoint_iterations: Option<usize>,
}

fn main() -> ExitCode {
    init_tracing();
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => cmd_generate(args),
        Command::Bounds(args) => cmd_bounds(args),
    }
}

fn read_input(path: &Path) -> Result<GeneratorInput> {
    let bytes = std::fs::read(path).with_context(|| format!("read input: {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse input: {}", path.display()))
}

fn cmd_generate(args: GenerateArgs) -> Result<ExitCode> {
    let input = read_input(&args.input)?;
    let mut options = GenerateOptions {
        check: args.check.into(),
        max_fixpoint_iterations: args.max_fixpoint_iterations,
        ..GenerateOptions::default()
    };
    if args.no_clmul {
        options.caps = TargetCaps { clmul: false };
    }

    let out = match generate::generate_field_arithmetic(&input, &options) {
        Ok(out) => out,
        Err(err) => {
            let report = Report::ok().with_diagnostics(vec![Diagnostic::from_gen_error(&err)]);
            if args.report_json {
                print_json(&report)?;
            } else {
                eprintln!("error: {err}");
            }
            return Ok(ExitCode::from(1));
        }
    };

    match &args.out {
        Some(path) => std::fs::write(path, out.c_src.as_bytes())
            .with_context(|| format!("write output: {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(out.c_src.as_bytes())?;
            stdout.flush()?;
        }
    }

    if args.report_json {
        print_json(&out.report)?;
    } else {
        for d in &out.report.diagnostics {
            if d.severity == Severity::Warning {
                eprintln!("warning: {}: {}", d.code, d.message);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_bounds(args: BoundsArgs) -> Result<ExitCode> {
    let input = read_input(&args.input)?;
    match generate::analyze_bounds(&input, args.max_fixpoint_iterations) {
        Ok(summary) => {
            print_json(&summary)?;
            Ok(if summary.converged {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Err(err) => {
            print_json(&Report::ok().with_diagnostics(vec![Diagnostic::from_gen_error(&err)]))?;
            Ok(ExitCode::from(1))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
