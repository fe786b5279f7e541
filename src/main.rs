use clap::{Parser, ValueEnum};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use jsflow::ast::{Expression, Statement, VariableDeclaration};
use jsflow::interpreter::{Interpreter, Observation};
use jsflow::logging::{LogFormat, LogLevel, LogOptions, init_logging};
use jsflow::parser::parse_body;
use jsflow::printer::print_statements;
use jsflow::{
    DefaultServices, Error, rewrite_async_function, rewrite_iterator_block,
    rewrite_normal_function,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Normal,
    Iterator,
    Async,
}

#[derive(Parser)]
#[command(
    name = "jsflow",
    version,
    about = "Lowers labels, goto, yield and await into a state-machine dispatch loop"
)]
struct Cli {
    /// Fixture file holding a function body (stdin when omitted)
    file: Option<PathBuf>,

    /// Lower an inline body
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// How the body suspends
    #[arg(long, value_enum, default_value_t = Kind::Normal)]
    kind: Kind,

    /// Run the original and the lowered body and compare what they do
    #[arg(long)]
    check: bool,

    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_level(name: &str) -> Result<LogLevel, String> {
    LogLevel::parse(name).ok_or_else(|| format!("unknown log level `{name}`"))
}

fn parse_log_format(name: &str) -> Result<LogFormat, String> {
    LogFormat::parse(name).ok_or_else(|| format!("unknown log format `{name}`"))
}

fn read_source(cli: &Cli) -> Result<String, Error> {
    if let Some(code) = &cli.eval {
        return Ok(code.clone());
    }
    match &cli.file {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut source = String::new();
            io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
    }
}

/// Compares two runs, printing both on a mismatch.
fn compare(original: Observation, lowered: Observation) -> bool {
    if original == lowered {
        info!(outcome = %original.outcome, "lowered body matches original");
        return true;
    }
    eprintln!("mismatch:\n  original: {original:?}\n  lowered:  {lowered:?}");
    false
}

/// Lowers the body and prints it. Returns whether `--check` passed.
fn run(cli: &Cli, source: &str) -> Result<bool, Error> {
    let body = parse_body(source)?;
    let mut services = DefaultServices::new();
    match cli.kind {
        Kind::Normal => {
            let lowered = rewrite_normal_function(body.clone(), &mut services)?;
            print!("{}", print_statements(&lowered));
            if cli.check {
                return Ok(compare(
                    Interpreter::new().run_body(&body),
                    Interpreter::new().run_body(&lowered),
                ));
            }
        }
        Kind::Iterator => {
            let block = rewrite_iterator_block(body.clone(), &mut services)?;
            let mut out = vec![Statement::Variable(VariableDeclaration {
                declarations: block.variables.clone(),
            })];
            out.extend(block.finally_handlers.iter().map(|handler| {
                Statement::Expression(Expression::assign(
                    Expression::ident(handler.name.as_str()),
                    Expression::Function(handler.function.clone()),
                ))
            }));
            print!("{}", print_statements(&out));
            println!("// resume");
            print!("{}", print_statements(&block.body));
            if let Some(disposer) = &block.disposer {
                println!("// dispose");
                print!("{}", print_statements(std::slice::from_ref(disposer)));
            }
            if cli.check {
                let current = services.current_name();
                return Ok(compare(
                    Interpreter::new().run_iterator(&body, None),
                    Interpreter::new().drive_iterator(&block, current, None),
                ));
            }
        }
        Kind::Async => {
            let lowered = rewrite_async_function(body.clone(), &mut services)?;
            print!("{}", print_statements(&lowered));
            if cli.check {
                return Ok(compare(
                    Interpreter::new().run_async(&body),
                    Interpreter::new().drive_async(&lowered),
                ));
            }
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(LogOptions::from_env().with_overrides(cli.log_format, cli.log_level));

    let source = match read_source(&cli) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };
    match run(&cli, &source) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!(error = %e, "lowering failed");
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}
