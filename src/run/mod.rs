//! Script-run execution mode for macrun.
//!
//! Wires the CLI to the library: loads the macro source, vets it, builds the
//! host seams (filesystem tree, document sink, stdin prompter), installs the
//! Ctrl-C cancel handler, runs the macro, and either previews the staged
//! changes as a diff or applies them in place.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use macrun::context::cancel_all_running;
use macrun::diffview::DiffView;
use macrun::host::{
    DocKey, DocumentSink, FsSink, FsTree, HostDocument, RecordingSink, StdinPrompter,
};
use macrun::script::{self, RunHost, source};
use macrun::timers::CancelSignal;

use crate::cli::Cli;

/// Run the macro described by `cli` to completion and report the outcome.
pub fn run_script_mode(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let macro_source = load_source(cli)?;

    if !cli.force && !source::has_safety_marker(&macro_source) {
        return Err("macro is missing the safety marker: put the word \"macro\" or \"script\" \
                    on its first line, or pass --force"
            .into());
    }
    if source::contains_unbounded_loop(&macro_source) {
        eprintln!(
            "warning: macro contains a loop with a constant-true condition; \
             press Ctrl-C to cancel a stuck run"
        );
    }

    let target = match &cli.target {
        Some(path) => Some(validate_file_path(path)?),
        None => None,
    };
    if cli.in_place && target.is_none() {
        return Err("--in-place requires a target file".into());
    }
    let doc = match &target {
        Some(path) => HostDocument::from_text(
            fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?,
        ),
        None => HostDocument::from_text(String::new()),
    };

    let workspace = match &cli.workspace {
        Some(dir) => Some(dir.clone()),
        None => std::env::current_dir().ok(),
    };

    let cancel = CancelSignal::new();
    let handler_signal = cancel.clone();
    ctrlc::set_handler(move || {
        handler_signal.cancel();
        cancel_all_running();
    })?;

    let sink: Rc<RefCell<dyn DocumentSink>> = if cli.in_place {
        Rc::new(RefCell::new(FsSink::new(target.clone())))
    } else {
        Rc::new(RefCell::new(RecordingSink::new()))
    };
    let host = RunHost {
        tree: Rc::new(FsTree::new(workspace)),
        sink: Rc::clone(&sink),
        prompter: Rc::new(StdinPrompter),
    };

    match script::run_script_with_cancel(&macro_source, &doc, &host, &cancel) {
        Ok(result) => {
            if !cli.quiet {
                for line in &result.output_log {
                    println!("{}", line);
                }
            }
            if cli.in_place {
                result.apply(&mut *sink.borrow_mut())?;
            } else if !cli.quiet {
                preview(&result, &doc, target.as_deref());
            }
            Ok(())
        }
        Err(err) if err.is_soft() => {
            // a deliberate early exit or cancellation, not a bug
            if !cli.quiet {
                eprintln!("{}", err);
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}

/// Print every staged document as a unified diff against what is on disk.
fn preview(result: &macrun::context::ScriptResult, doc: &HostDocument, target: Option<&Path>) {
    if result.files.is_empty() {
        println!("no changes");
        return;
    }
    for file in &result.files {
        match &file.key {
            DocKey::Active => {
                let label = target
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<active>".to_string());
                print_diff(&doc.text, &file.text, &label);
            }
            DocKey::File(path) => {
                // the file may not exist yet when the macro created it
                let original = fs::read_to_string(path).unwrap_or_default();
                print_diff(&original, &file.text, &path.display().to_string());
            }
            DocKey::Output(i) => {
                println!("--- output {} ---", i);
                print!("{}", file.text);
            }
        }
    }
}

fn print_diff(original: &str, modified: &str, label: &str) {
    let view = DiffView::new(original.to_string(), modified.to_string());
    if view.is_unchanged() {
        return;
    }
    print!("{}", view.render(label));
}

/// Assemble the macro source from `-f` and any `-e` flags, in that order.
fn load_source(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    let mut parts = Vec::new();
    if let Some(path) = &cli.script_file {
        parts.push(
            fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?,
        );
    }
    parts.extend(cli.expression.iter().cloned());
    if parts.is_empty() {
        return Err("no macro given: use -f FILE or -e SOURCE".into());
    }
    Ok(parts.join("\n"))
}

/// Validate and canonicalize the target path, blocking special files that
/// could hang the run.
pub fn validate_file_path(path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let canonical = match path.canonicalize() {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(format!("{}: file not found", path.display()).into());
        }
        Err(e) => return Err(format!("Invalid path: {}", e).into()),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if let Ok(metadata) = fs::metadata(&canonical) {
            let ft = metadata.file_type();
            if ft.is_char_device() || ft.is_block_device() {
                return Err("Cannot run macros against device files".into());
            }
            if ft.is_fifo() || ft.is_socket() {
                return Err("Cannot run macros against FIFO or socket files".into());
            }
        }
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_source_joins_file_then_expressions() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("m.lua");
        fs::write(&script, "-- macro\n").unwrap();

        let cli = Cli {
            script_file: Some(script),
            expression: vec!["set_text('x')".to_string()],
            ..Cli::default()
        };
        let source = load_source(&cli).unwrap();
        assert!(source.starts_with("-- macro\n"));
        assert!(source.ends_with("set_text('x')"));
    }

    #[test]
    fn test_load_source_requires_something() {
        assert!(load_source(&Cli::default()).is_err());
    }

    #[test]
    fn test_validate_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("t.txt");
        fs::write(&file, "x").unwrap();
        let canonical = validate_file_path(&file).unwrap();
        assert!(canonical.ends_with("t.txt"));
    }

    #[test]
    fn test_validate_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_file_path(&dir.path().join("absent.txt")).is_err());
    }
}
