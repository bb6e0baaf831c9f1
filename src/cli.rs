//! Command-line argument parsing for macrun.
//!
//! This module provides the `Cli` struct which encapsulates all command-line
//! options and methods for parsing them.

use std::path::PathBuf;

/// Command-line interface configuration.
#[derive(Debug, Default)]
pub struct Cli {
    /// File the macro runs against (the active document)
    pub target: Option<PathBuf>,

    /// Macro file path (-f flag)
    pub script_file: Option<PathBuf>,

    /// Inline macro sources (-e flag)
    pub expression: Vec<String>,

    /// Write staged changes back to the target file
    pub in_place: bool,

    /// Suppress the macro's output log and dry-run diff
    pub quiet: bool,

    /// Run even without the first-line safety marker
    pub force: bool,

    /// Workspace root for file capabilities (default: current directory)
    pub workspace: Option<PathBuf>,
}

impl Cli {
    /// Parse command-line arguments.
    ///
    /// Returns a `Cli` struct populated with parsed arguments.
    /// Returns an error if required values are missing.
    pub fn parse() -> Result<Self, Box<dyn std::error::Error>> {
        Self::parse_from(std::env::args().skip(1))
    }

    /// Parse from an explicit argument iterator (program name excluded).
    pub fn parse_from<I>(args: I) -> Result<Self, Box<dyn std::error::Error>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut cli = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-i" | "--in-place" => cli.in_place = true,
                "-n" | "--quiet" => cli.quiet = true,
                "--force" => cli.force = true,
                "-e" | "--expression" => {
                    if let Some(expr) = args.next() {
                        cli.expression.push(expr);
                    } else {
                        return Err("--expression requires a value".into());
                    }
                }
                "-f" | "--file" => {
                    if let Some(path) = args.next() {
                        cli.script_file = Some(PathBuf::from(path));
                    } else {
                        return Err("--file requires a value".into());
                    }
                }
                "-w" | "--workspace" => {
                    if let Some(dir) = args.next() {
                        cli.workspace = Some(PathBuf::from(dir));
                    } else {
                        return Err("--workspace requires a value".into());
                    }
                }
                "-h" | "--help" => {
                    println!("macrun - run text-transformation macros against files");
                    println!();
                    println!("Usage: macrun [OPTIONS] [FILE]");
                    println!();
                    println!("Options:");
                    println!("  -h, --help            Show this help message");
                    println!("  -f, --file PATH       Load the macro from a file");
                    println!("  -e, --expression SRC  Add macro source inline (repeatable)");
                    println!("  -i, --in-place        Write staged changes back to FILE");
                    println!("  -n, --quiet           Suppress the output log and diff preview");
                    println!("  -w, --workspace DIR   Workspace root for file capabilities");
                    println!("      --force           Run even without the safety marker");
                    std::process::exit(0);
                }
                arg if arg.starts_with('-') => {
                    return Err(format!("Unknown flag: {}. Use --help for usage.", arg).into());
                }
                _ => {
                    if cli.target.is_some() {
                        return Err(format!("Unexpected extra argument: {}", arg).into());
                    }
                    cli.target = Some(PathBuf::from(arg));
                }
            }
        }

        Ok(cli)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, Box<dyn std::error::Error>> {
        Cli::parse_from(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_flags_and_target() {
        let cli = parse(&["-i", "-n", "--force", "notes.txt"]).unwrap();
        assert!(cli.in_place);
        assert!(cli.quiet);
        assert!(cli.force);
        assert_eq!(cli.target, Some(PathBuf::from("notes.txt")));
    }

    #[test]
    fn test_parse_script_sources() {
        let cli = parse(&["-f", "macro.lua", "-e", "set_text('x')", "-e", "log('y')"]).unwrap();
        assert_eq!(cli.script_file, Some(PathBuf::from("macro.lua")));
        assert_eq!(cli.expression.len(), 2);
    }

    #[test]
    fn test_parse_workspace() {
        let cli = parse(&["-w", "/tmp/project"]).unwrap();
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/project")));
    }

    #[test]
    fn test_missing_value_is_an_error() {
        assert!(parse(&["-e"]).is_err());
        assert!(parse(&["-f"]).is_err());
        assert!(parse(&["-w"]).is_err());
    }

    #[test]
    fn test_unknown_flag_is_an_error() {
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn test_second_target_is_an_error() {
        assert!(parse(&["a.txt", "b.txt"]).is_err());
    }
}
