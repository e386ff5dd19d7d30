//! dlx - run a Datalog program and print its answers
//!
//! Usage: dlx [OPTIONS] [FILE]
//!
//! Reads the program from FILE, or from stdin when FILE is omitted or `-`.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::debug;

use datalog_explorer::{EvalOptions, Execution, Inspection, Session};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default)]
struct Args {
    file: Option<PathBuf>,
    json: bool,
    tree: bool,
    options: EvalOptions,
}

/// Parse command line arguments.
///
/// Options:
///   --json                Print a JSON report instead of the transcript
///   --tree                Also print the facts and rules grouped by predicate
///   --max-iterations <N>  Fail if the fixpoint needs more than N rounds
///   --timeout-ms <N>      Fail if evaluation takes longer than N milliseconds
///   -h, --help            Show help and exit
///   -v, --version         Show version and exit
fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "--json" => parsed.json = true,
            "--tree" => parsed.tree = true,
            "--max-iterations" => {
                let n = numeric_value(args, i)?;
                parsed.options = parsed.options.with_max_iterations(n);
                i += 1;
            }
            "--timeout-ms" => {
                let ms = numeric_value(args, i)?;
                parsed.options = parsed.options.with_time_budget(Duration::from_millis(ms));
                i += 1;
            }
            "-h" | "--help" => {
                println!("dlx v{VERSION} - bottom-up Datalog");
                println!();
                println!("Usage: dlx [OPTIONS] [FILE]");
                println!();
                println!("Options:");
                println!("  --json                Print a JSON report instead of the transcript");
                println!("  --tree                Also print facts and rules grouped by predicate");
                println!("  --max-iterations <N>  Fail if the fixpoint needs more than N rounds");
                println!("  --timeout-ms <N>      Fail if evaluation takes longer than N ms");
                println!("  -h, --help            Show this help message");
                println!("  -v, --version         Show version");
                println!();
                println!("Reads the program from stdin when FILE is omitted or `-`.");
                std::process::exit(0);
            }
            "-v" | "--version" => {
                println!("dlx v{VERSION}");
                std::process::exit(0);
            }
            "-" => parsed.file = None,
            _ if arg.starts_with('-') => {
                bail!("unknown option '{arg}' (try 'dlx --help')");
            }
            _ => {
                if parsed.file.is_some() {
                    bail!("only one program file may be given");
                }
                parsed.file = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn numeric_value<T>(args: &[String], i: usize) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let flag = &args[i];
    let value = args
        .get(i + 1)
        .with_context(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .with_context(|| format!("{flag}: '{value}' is not a non-negative integer"))
}

fn read_source(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("failed to read program from stdin")?;
            Ok(source)
        }
    }
}

fn print_tree(inspection: &Inspection) {
    println!("Facts");
    for group in &inspection.facts {
        println!("  {}", group.key);
        for entry in &group.entries {
            println!("    {entry}");
        }
    }
    println!("Rules");
    for group in &inspection.rules {
        println!("  {}", group.key);
        for entry in &group.entries {
            println!("    {entry}");
        }
    }
    println!();
}

#[cfg(feature = "serde")]
fn print_json(execution: &Execution) -> Result<()> {
    println!("{}", execution.to_json().context("failed to encode report")?);
    Ok(())
}

#[cfg(not(feature = "serde"))]
fn print_json(_execution: &Execution) -> Result<()> {
    bail!("--json needs dlx built with the `serde` feature")
}

fn main() -> Result<()> {
    env_logger::init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&argv)?;
    debug!("{args:?}");

    let source = read_source(args.file.as_ref())?;
    let execution = Session::with_options(args.options)
        .execute(&source)
        .context("program failed")?;

    if args.json {
        return print_json(&execution);
    }
    if args.tree {
        print_tree(&execution.inspect());
    }
    print!("{}", execution.transcript());
    Ok(())
}
