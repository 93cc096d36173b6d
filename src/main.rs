//! Command-line front end.
//!
//! Usage:
//!   `toyvm assemble <file.toy> [-o <out.tbc|out.tbin>]`
//!   `toyvm run <file.toy|file.tbc|file.tbin> [--trace]`
//!   `toyvm disasm <file>`

use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use toyvm::bytecode::disasm::print_program;
use toyvm::runtime::vm::TRACE_TARGET;
use toyvm::{LabelTable, Program, VmConfig, assemble, run_program};

#[derive(Parser, Debug)]
#[command(name = "toyvm")]
#[command(about = "Tiny stack-based VM: assemble and run .toy programs")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a .toy source file into bytecode
    Assemble {
        /// Input .toy file
        input: PathBuf,

        /// Output file; `.tbin` selects the binary format (default: <input>.tbc)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a program (.toy source, .tbc or .tbin bytecode)
    Run {
        /// Program path
        input: PathBuf,

        /// Log every instruction with the stack and variables (to stderr)
        #[arg(long)]
        trace: bool,
    },

    /// Print a listing of a program
    Disasm {
        /// Program path
        input: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    let trace = matches!(args.command, Command::Run { trace: true, .. });
    init_logging(trace);

    let result = match args.command {
        Command::Assemble { input, output } => cmd_assemble(&input, output),
        Command::Run { input, trace } => cmd_run(&input, trace),
        Command::Disasm { input } => cmd_disasm(&input),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

/// Diagnostics go to stderr so they never mix with program output.
fn init_logging(trace: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let filter = if trace {
        match format!("{}=info", TRACE_TARGET).parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    } else {
        filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn cmd_assemble(input: &Path, output: Option<PathBuf>) -> toyvm::Result<()> {
    let source = fs::read_to_string(input)?;
    let asm = assemble(&source)?;
    if asm.program.is_empty() {
        warn!(input = %input.display(), "source contains no instructions");
    }

    let out_path = output.unwrap_or_else(|| input.with_extension("tbc"));
    if has_extension(&out_path, "tbin") {
        fs::write(&out_path, asm.program.to_bytes()?)?;
    } else {
        fs::write(&out_path, asm.program.to_json()?)?;
    }

    println!(
        "Assembled {} -> {} ({} instructions)",
        input.display(),
        out_path.display(),
        asm.program.len()
    );
    Ok(())
}

fn cmd_run(input: &Path, trace: bool) -> toyvm::Result<()> {
    let (program, _) = load_program(input)?;
    let config = VmConfig::default().with_trace(trace);

    let stdout = io::stdout();
    run_program(&program, BufWriter::new(stdout.lock()), config)?;
    Ok(())
}

fn cmd_disasm(input: &Path) -> toyvm::Result<()> {
    let (program, labels) = load_program(input)?;
    print_program(&program, labels.as_ref());
    Ok(())
}

/// Bytecode files are picked by extension; anything else is assembled.
/// Labels are only available when assembling from source.
fn load_program(path: &Path) -> toyvm::Result<(Program, Option<LabelTable>)> {
    if has_extension(path, "tbc") {
        debug!(path = %path.display(), "loading json bytecode");
        let text = fs::read_to_string(path)?;
        Ok((Program::from_json(&text)?, None))
    } else if has_extension(path, "tbin") {
        debug!(path = %path.display(), "loading binary bytecode");
        let bytes = fs::read(path)?;
        Ok((Program::from_bytes(&bytes)?, None))
    } else {
        let source = fs::read_to_string(path)?;
        let asm = assemble(&source)?;
        Ok((asm.program, Some(asm.labels)))
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
