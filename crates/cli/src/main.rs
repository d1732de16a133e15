//! psi CLI
//!
//! Runs PostScript files, then an optional code string, in one interpreter.
//! With neither, the program is read from standard input.

use clap::Parser;
use psi_core::ErrorCode;
use psi_runtime::print::repr_text;
use psi_runtime::report::{ReportData, emit_from_env};
use psi_runtime::{InterpConfig, Interpreter, RunError, signal};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tracing::warn;

#[derive(Parser)]
#[command(name = "psi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "psi - run PostScript programs", long_about = None)]
struct Cli {
    /// PostScript files to run, in order
    files: Vec<PathBuf>,

    /// Code to run after the files
    #[arg(short = 'c', long = "code", value_name = "CODE")]
    code: Option<String>,

    /// Interpreter configuration (TOML); PSI_* variables still apply on top
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the operand stack when the run ends
    #[arg(long)]
    stack: bool,

    /// Do not print uncaught errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match InterpConfig::load(path) {
            Ok(config) => config.with_env_overrides(),
            Err(e) => {
                eprintln!("Error: {}: {}", path.display(), e);
                process::exit(2);
            }
        },
        None => InterpConfig::from_env(),
    };

    let mut interp = Interpreter::new(config);
    if let Err(e) = signal::install_interrupt(interp.interrupt_handle()) {
        warn!(error = %e, "could not install SIGINT handler");
    }

    let started = Instant::now();
    let result = run(&mut interp, &cli);
    let _ = interp.context_mut().out.flush();

    if cli.stack {
        print_stack(&interp);
    }
    emit_from_env(&ReportData::new(started.elapsed(), *interp.stats()));

    if let Err(e) = result {
        if e.code == ErrorCode::Quit && e.exit_code == 0 {
            return;
        }
        if !cli.quiet {
            eprintln!("{}", e);
        }
        process::exit(e.exit_code);
    }
}

fn run(interp: &mut Interpreter, cli: &Cli) -> Result<(), RunError> {
    for file in &cli.files {
        interp.run_file(file)?;
    }
    if let Some(code) = &cli.code {
        interp.run_string(code)?;
    }
    if cli.files.is_empty() && cli.code.is_none() {
        interp.run_file("%stdin")?;
    }
    Ok(())
}

/// Top of the stack first, as `pstack` prints it.
fn print_stack(interp: &Interpreter) {
    let ctx = interp.context();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for v in ctx.ostack.iter_from_top() {
        let _ = writeln!(out, "{}", repr_text(ctx, &v));
    }
}
