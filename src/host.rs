//! Host adapter seams.
//!
//! The core never talks to an editor, a terminal, or the filesystem
//! directly. A host hands in a [`HostDocument`] when a run starts and
//! receives staged writes back through a [`DocumentSink`]; workspace access
//! goes through [`FileTree`]; interactive prompts go through [`Prompter`].
//! The filesystem-backed implementations live here next to in-memory ones
//! used by the dry-run mode and the tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::fs;
use std::io::Write;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::range_edit::Range;

/// Line terminator convention of the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// Detect the convention from document text. The first terminator wins;
    /// documents without one default to LF.
    pub fn detect(text: &str) -> Self {
        match text.find('\n') {
            Some(i) if i > 0 && text.as_bytes()[i - 1] == b'\r' => LineEnding::CrLf,
            _ => LineEnding::Lf,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }

    /// Rewrite every line terminator in `text` to this convention. Scripts
    /// routinely substitute text whose terminators differ from the source
    /// document's.
    pub fn normalize(&self, text: &str) -> String {
        let unified = text.replace("\r\n", "\n").replace('\r', "\n");
        match self {
            LineEnding::Lf => unified,
            LineEnding::CrLf => unified.replace('\n', "\r\n"),
        }
    }
}

/// Snapshot of the host document handed in at context construction.
#[derive(Debug, Clone)]
pub struct HostDocument {
    pub text: String,
    pub selections: Vec<Range>,
    pub line_ending: LineEnding,
}

impl HostDocument {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let line_ending = LineEnding::detect(&text);
        Self {
            text,
            selections: Vec::new(),
            line_ending,
        }
    }

    pub fn with_selections(mut self, selections: Vec<Range>) -> Self {
        self.selections = selections;
        self
    }
}

/// Identity of a staged document: the implicit active buffer, another
/// workspace file, or a scratch output buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocKey {
    Active,
    File(PathBuf),
    Output(usize),
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::Active => write!(f, "<active>"),
            DocKey::File(p) => write!(f, "{}", p.display()),
            DocKey::Output(i) => write!(f, "<output {}>", i),
        }
    }
}

/// Host-side failure: filesystem trouble or a missing workspace.
#[derive(Debug, Clone)]
pub enum HostError {
    /// A file-walk or path resolution needs a workspace root and none is
    /// available.
    NoWorkspace,
    Io { path: PathBuf, message: String },
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::NoWorkspace => {
                write!(f, "no workspace is open; file operations need a workspace root")
            }
            HostError::Io { path, message } => {
                write!(f, "{}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for HostError {}

fn io_err(path: &Path, err: io::Error) -> HostError {
    HostError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// ==================== Document sink ====================

/// Where staged writes are materialized. One call per intermediate snapshot
/// (in order), then one for the final text; `undo_stop` marks writes that
/// should become distinct undo checkpoints on hosts that have an undo stack.
pub trait DocumentSink {
    fn write_document(&mut self, key: &DocKey, text: &str, undo_stop: bool)
    -> Result<(), HostError>;
}

/// Filesystem sink used by in-place mode: the active buffer goes to the
/// target file, staged file writes go to their own paths, output buffers go
/// to stdout. `undo_stop` has no meaning on disk and is ignored.
pub struct FsSink {
    target: Option<PathBuf>,
}

impl FsSink {
    pub fn new(target: Option<PathBuf>) -> Self {
        Self { target }
    }
}

impl DocumentSink for FsSink {
    fn write_document(
        &mut self,
        key: &DocKey,
        text: &str,
        _undo_stop: bool,
    ) -> Result<(), HostError> {
        match key {
            DocKey::Active => match &self.target {
                Some(path) => write_file_atomic(path, text),
                None => {
                    print!("{}", text);
                    Ok(())
                }
            },
            DocKey::File(path) => write_file_atomic(path, text),
            DocKey::Output(i) => {
                println!("--- output {} ---", i);
                print!("{}", text);
                Ok(())
            }
        }
    }
}

/// In-memory sink recording every write in order. Backs the dry-run mode
/// and lets tests observe exactly when staged text reaches the host.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub writes: Vec<(DocKey, String, bool)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write for a key, if any.
    pub fn final_text(&self, key: &DocKey) -> Option<&str> {
        self.writes
            .iter()
            .rev()
            .find(|(k, _, _)| k == key)
            .map(|(_, text, _)| text.as_str())
    }
}

impl DocumentSink for RecordingSink {
    fn write_document(
        &mut self,
        key: &DocKey,
        text: &str,
        undo_stop: bool,
    ) -> Result<(), HostError> {
        self.writes.push((key.clone(), text.to_string(), undo_stop));
        Ok(())
    }
}

/// Write via a temp file in the same directory, then rename into place.
pub fn write_file_atomic(path: &Path, text: &str) -> Result<(), HostError> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| io_err(path, e))?;
    temp.write_all(text.as_bytes()).map_err(|e| io_err(path, e))?;
    temp.flush().map_err(|e| io_err(path, e))?;
    // flush to disk before the rename, otherwise a crash can lose the data
    temp.as_file().sync_all().map_err(|e| io_err(path, e))?;
    temp.persist(path)
        .map_err(|e| io_err(path, e.error))?;
    Ok(())
}

// ==================== File tree ====================

/// Immediate contents of one directory, both halves sorted by name.
#[derive(Debug, Default, Clone)]
pub struct DirListing {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

/// Read-side view of the host's workspace.
pub trait FileTree {
    /// Workspace root, or `None` when no workspace is open.
    fn root(&self) -> Option<&Path>;

    fn read_file(&self, path: &Path) -> Result<String, HostError>;

    fn list_dir(&self, dir: &Path) -> Result<DirListing, HostError>;

    /// Resolve a script-supplied path against the workspace root.
    fn resolve(&self, path: &Path) -> Result<PathBuf, HostError> {
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        match self.root() {
            Some(root) => Ok(root.join(path)),
            None => Err(HostError::NoWorkspace),
        }
    }
}

/// Filesystem-backed tree. Dot-entries are skipped and listings are sorted
/// so traversal order is deterministic.
pub struct FsTree {
    root: Option<PathBuf>,
}

impl FsTree {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl FileTree for FsTree {
    fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn read_file(&self, path: &Path) -> Result<String, HostError> {
        fs::read_to_string(path).map_err(|e| io_err(path, e))
    }

    fn list_dir(&self, dir: &Path) -> Result<DirListing, HostError> {
        let mut listing = DirListing::default();
        for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                listing.dirs.push(path);
            } else if file_type.is_file() {
                listing.files.push(path);
            }
        }
        listing.dirs.sort();
        listing.files.sort();
        Ok(listing)
    }
}

/// In-memory tree keyed by absolute-style paths. Used by tests and by runs
/// without a real workspace.
#[derive(Debug, Default)]
pub struct MemoryTree {
    root: Option<PathBuf>,
    files: BTreeMap<PathBuf, String>,
}

impl MemoryTree {
    /// An empty tree rooted at `/`.
    pub fn new() -> Self {
        Self {
            root: Some(PathBuf::from("/")),
            files: BTreeMap::new(),
        }
    }

    /// A tree with no workspace root: every walk and resolve fails.
    pub fn unrooted() -> Self {
        Self {
            root: None,
            files: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }
}

impl FileTree for MemoryTree {
    fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn read_file(&self, path: &Path) -> Result<String, HostError> {
        self.files.get(path).cloned().ok_or_else(|| HostError::Io {
            path: path.to_path_buf(),
            message: "file not found".to_string(),
        })
    }

    fn list_dir(&self, dir: &Path) -> Result<DirListing, HostError> {
        let mut dirs = BTreeSet::new();
        let mut files = Vec::new();
        for path in self.files.keys() {
            let Ok(rest) = path.strip_prefix(dir) else {
                continue;
            };
            let mut components = rest.components();
            match (components.next(), components.next()) {
                (Some(first), None) => files.push(dir.join(first)),
                (Some(first), Some(_)) => {
                    dirs.insert(dir.join(first));
                }
                _ => {}
            }
        }
        Ok(DirListing {
            dirs: dirs.into_iter().collect(),
            files,
        })
    }
}

// ==================== Walkers ====================

/// Walk failure: the tree itself failed, or the visitor did.
#[derive(Debug)]
pub enum WalkError<E> {
    Host(HostError),
    Visitor(E),
}

impl<E: fmt::Display> fmt::Display for WalkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::Host(e) => write!(f, "{}", e),
            WalkError::Visitor(e) => write!(f, "{}", e),
        }
    }
}

/// Visit every file breadth-first, level by level: all of a directory's
/// files before any of its subdirectories' contents. The first `Some`
/// returned by the visitor ends the walk early.
pub fn walk_top_down<R, E>(
    tree: &dyn FileTree,
    visit: &mut dyn FnMut(&Path) -> Result<Option<R>, E>,
) -> Result<Option<R>, WalkError<E>> {
    let root = tree
        .root()
        .ok_or(WalkError::Host(HostError::NoWorkspace))?
        .to_path_buf();
    let mut queue = VecDeque::from([root]);
    while let Some(dir) = queue.pop_front() {
        let listing = tree.list_dir(&dir).map_err(WalkError::Host)?;
        for file in &listing.files {
            if let Some(value) = visit(file).map_err(WalkError::Visitor)? {
                return Ok(Some(value));
            }
        }
        queue.extend(listing.dirs);
    }
    Ok(None)
}

/// Visit every file post-order: a directory's subdirectories are fully
/// visited before its own files, so children always complete before their
/// parent. The first `Some` returned by the visitor ends the walk early.
pub fn walk_bottom_up<R, E>(
    tree: &dyn FileTree,
    visit: &mut dyn FnMut(&Path) -> Result<Option<R>, E>,
) -> Result<Option<R>, WalkError<E>> {
    let root = tree
        .root()
        .ok_or(WalkError::Host(HostError::NoWorkspace))?
        .to_path_buf();
    walk_bottom_up_dir(tree, &root, visit)
}

fn walk_bottom_up_dir<R, E>(
    tree: &dyn FileTree,
    dir: &Path,
    visit: &mut dyn FnMut(&Path) -> Result<Option<R>, E>,
) -> Result<Option<R>, WalkError<E>> {
    let listing = tree.list_dir(dir).map_err(WalkError::Host)?;
    for sub in &listing.dirs {
        if let Some(value) = walk_bottom_up_dir(tree, sub, visit)? {
            return Ok(Some(value));
        }
    }
    for file in &listing.files {
        if let Some(value) = visit(file).map_err(WalkError::Visitor)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

// ==================== Prompts ====================

/// Interactive input. `None` means the user declined, which ends the run as
/// a soft exit.
pub trait Prompter {
    fn input(&self, prompt: &str) -> Option<String>;
}

/// Reads one line from stdin per prompt. EOF or a blank line declines.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn input(&self, prompt: &str) -> Option<String> {
        eprint!("{}: ", prompt);
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                if line.is_empty() { None } else { Some(line) }
            }
        }
    }
}

/// Canned answers for tests and non-interactive runs. `None` entries (and
/// running out of answers) decline the prompt.
#[derive(Debug, Default)]
pub struct QueuedPrompter {
    answers: std::cell::RefCell<VecDeque<Option<String>>>,
}

impl QueuedPrompter {
    pub fn new(answers: Vec<Option<String>>) -> Self {
        Self {
            answers: std::cell::RefCell::new(answers.into()),
        }
    }
}

impl Prompter for QueuedPrompter {
    fn input(&self, _prompt: &str) -> Option<String> {
        self.answers.borrow_mut().pop_front().flatten()
    }
}
