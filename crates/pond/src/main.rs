use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use pond_core::home::pond_home;
use pond_core::PondError;
use pond_vm::VM;

#[derive(Parser)]
#[command(name = "pond", about = "Pond: a small scripting language", version)]
struct Cli {
    /// Script file to run (omit for a REPL)
    paths: Vec<String>,

    /// Evaluate an expression and exit
    #[arg(short, long)]
    eval: Option<String>,

    /// Suppress the REPL banner
    #[arg(short, long)]
    quiet: bool,

    /// Dump compiled bytecode to stderr before running
    #[arg(long)]
    disassemble: bool,

    /// Trace each instruction and the stack to stderr while executing
    #[arg(long)]
    trace: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.paths.len() > 1 {
        eprintln!("Usage: pond [path]");
        std::process::exit(64);
    }

    let mut vm = VM::new();
    vm.disassemble = cli.disassemble;
    vm.trace = cli.trace;

    if let Some(expr) = &cli.eval {
        if let Err(e) = vm.interpret(expr) {
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
        return;
    }

    match cli.paths.first() {
        Some(path) => run_file(&mut vm, path),
        None => repl(&mut vm, cli.quiet),
    }
}

fn run_file(vm: &mut VM, path: &str) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            let e = PondError::Io {
                path: path.to_string(),
            };
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    };

    tracing::debug!(path, bytes = source.len(), "running script");
    if let Err(e) = vm.interpret(&source) {
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
}

fn repl(vm: &mut VM, quiet: bool) {
    let mut rl = DefaultEditor::new().expect("failed to create editor");
    let history_path = pond_home().join("history.txt");
    let _ = rl.load_history(&history_path);

    if !quiet {
        println!("Pond v{}", env!("CARGO_PKG_VERSION"));
    }

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                // errors are reported and the session continues; globals
                // defined so far survive
                if let Err(e) = vm.interpret(input) {
                    eprintln!("{e}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {e}");
                break;
            }
        }
    }

    let _ = std::fs::create_dir_all(pond_home());
    let _ = rl.save_history(&history_path);
}
