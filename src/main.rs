//! macrun - scripted text transformations with staged, cancellable runs
//!
//! This is the main entry point. It parses CLI arguments and hands off to
//! the script-run mode.

mod cli;
mod run;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = cli::Cli::parse()?;
    run::run_script_mode(&cli)
}
