use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use waygate::compile::{Script, compile_script};
use waygate::zasm::dis;

/// Compile a rule script and report what came out.
#[derive(Debug, Parser)]
#[command(name = "waygate", version, about)]
struct Cli {
    /// Script file: name declarations, macros, and rules as JSON parse trees.
    script: PathBuf,

    /// Print the disassembly of every compiled unit.
    #[arg(short, long)]
    disassemble: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error reading {}: {e}", cli.script.display());
            return ExitCode::FAILURE;
        }
    };
    let script: Script = match serde_json::from_str(&source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error parsing {}: {e}", cli.script.display());
            return ExitCode::FAILURE;
        }
    };

    let outcome = compile_script(&script);
    for err in &outcome.failures {
        eprintln!("error: {err}");
    }
    if !outcome.unresolved.is_empty() {
        eprintln!("unresolved identifiers: {}", outcome.unresolved.join(", "));
    }

    println!(
        "{} units, {} names, {} strings, {} constants",
        outcome.assembly.len(),
        outcome.assembly.data.names.len(),
        outcome.assembly.data.strings.len(),
        outcome.assembly.data.consts.len()
    );
    if cli.disassemble {
        print!("{}", dis::disassemble(&outcome.assembly));
    }

    if outcome.failures.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
