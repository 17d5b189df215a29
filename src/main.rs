//! The `ant` command: run a script file, or start a REPL when no file is given.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ant::vm::{Vm, VmConfig};
use ant::{AntError, run_file};

#[derive(Parser, Debug)]
#[command(name = "ant", version, about = "Run Ant scripts")]
struct Cli {
    /// Script to run.  Starts a REPL when omitted.
    file: Option<PathBuf>,

    /// Log the disassembly of every compiled function.
    #[arg(long)]
    print_code: bool,

    /// Log the stack and each instruction as it executes.
    #[arg(long)]
    trace: bool,

    /// Maximum call depth, script frame included.
    #[arg(long, value_name = "N", default_value_t = VmConfig::DEFAULT_FRAMES_MAX)]
    max_frames: usize,

    /// Collect garbage before every instruction.
    #[arg(long)]
    gc_stress: bool,
}

impl Cli {
    fn vm_config(&self) -> VmConfig {
        VmConfig::default()
            .with_frames_max(self.max_frames)
            .with_gc_stress(self.gc_stress)
            .with_trace_execution(self.trace)
    }

    /// `RUST_LOG` wins; otherwise `warn`, raised for the flags that log.
    fn env_filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        let mut directives = String::from("warn");
        if self.print_code {
            directives.push_str(",ant::compiler=debug");
        }
        if self.trace {
            directives.push_str(",ant::vm=trace");
        }
        EnvFilter::new(directives)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.env_filter())
        .with_writer(io::stderr)
        .without_time()
        .init();

    match &cli.file {
        Some(path) => match run_file(path, cli.vm_config()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                report(&err);
                ExitCode::from(err.exit_code() as u8)
            }
        },
        None => match repl(cli.vm_config()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                ExitCode::from(74)
            }
        },
    }
}

fn report(err: &AntError) {
    match err {
        AntError::Io(e) => eprintln!("Error: {e}"),
        other => eprintln!("{other}"),
    }
}

/// Interactive loop.  Globals and heap persist between lines; errors are
/// reported and the session continues.
fn repl(config: VmConfig) -> io::Result<()> {
    let mut vm = Vm::with_config(config, io::stdout());
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            println!();
            return Ok(());
        }

        let source = line.trim();
        match source {
            "" => continue,
            "exit" | "q" => return Ok(()),
            _ => {}
        }

        if let Err(err) = vm.interpret(source) {
            report(&AntError::from(err));
        }
    }
}
