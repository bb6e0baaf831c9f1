//! Per-run execution context.
//!
//! Every mutation a script performs is staged here against [`TextBuffer`]s
//! keyed by [`DocKey`]; nothing reaches the host until the run completes and
//! [`ScriptResult::apply`] replays the staged writes through a sink. A global
//! registry tracks live runs so a cancel command can reach all of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::buffer::TextBuffer;
use crate::host::{DocKey, DocumentSink, HostDocument, HostError, LineEnding};
use crate::range_edit::Range;
use crate::timers::CancelSignal;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Staged state for one run: buffers, selection overrides, the output log,
/// and the shared cancel signal.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Staged buffers in creation order; the active document is always the
    /// first entry.
    buffers: Vec<(DocKey, TextBuffer)>,
    pub line_ending: LineEnding,
    initial_selections: Vec<Range>,
    /// Script-set selections. `None` means the host's own selections stand.
    selected_ranges: Option<Vec<Range>>,
    pub cancel: CancelSignal,
    pub state: RunState,
    output_log: Vec<String>,
    output_count: usize,
}

impl ExecutionContext {
    pub fn new(doc: &HostDocument) -> Self {
        Self {
            buffers: vec![(DocKey::Active, TextBuffer::from_text(doc.text.clone()))],
            line_ending: doc.line_ending,
            initial_selections: doc.selections.clone(),
            selected_ranges: None,
            cancel: CancelSignal::new(),
            state: RunState::Created,
            output_log: Vec::new(),
            output_count: 0,
        }
    }

    /// Staged buffer for `key`, created empty on first access.
    pub fn buffer(&mut self, key: &DocKey) -> &mut TextBuffer {
        if let Some(i) = self.buffers.iter().position(|(k, _)| k == key) {
            return &mut self.buffers[i].1;
        }
        let i = self.buffers.len();
        self.buffers.push((key.clone(), TextBuffer::new()));
        &mut self.buffers[i].1
    }

    /// Staged buffer for `key`, if one exists. Unlike [`buffer`](Self::buffer)
    /// this never creates one, so reads can fall through to the file tree.
    pub fn staged(&self, key: &DocKey) -> Option<&TextBuffer> {
        self.buffers.iter().find(|(k, _)| k == key).map(|(_, b)| b)
    }

    pub fn active(&mut self) -> &mut TextBuffer {
        self.buffer(&DocKey::Active)
    }

    pub fn active_text(&self) -> &str {
        self.staged(&DocKey::Active)
            .map(|b| b.text())
            .unwrap_or_default()
    }

    /// Current selections: the script's override if set, otherwise the
    /// selections the host handed in.
    pub fn selected_ranges(&self) -> &[Range] {
        self.selected_ranges
            .as_deref()
            .unwrap_or(&self.initial_selections)
    }

    pub fn set_selected_ranges(&mut self, ranges: Vec<Range>) {
        self.selected_ranges = Some(ranges);
    }

    /// Allocate the next output buffer. Output numbering is per run and
    /// starts at zero.
    pub fn new_output(&mut self) -> usize {
        let index = self.output_count;
        self.output_count += 1;
        self.buffer(&DocKey::Output(index));
        index
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.output_log.push(line.into());
    }

    pub fn output_log(&self) -> &[String] {
        &self.output_log
    }

    /// Consume the context into the run result. Only modified buffers are
    /// carried over: an untouched document is never rewritten.
    pub fn into_result(mut self) -> ScriptResult {
        self.take_result()
    }

    /// [`into_result`](Self::into_result) for contexts still shared with a
    /// script environment: drains the staged state in place.
    pub fn take_result(&mut self) -> ScriptResult {
        let files = std::mem::take(&mut self.buffers)
            .into_iter()
            .filter(|(_, buf)| buf.modified())
            .map(|(key, buf)| {
                let (snapshots, text) = buf.into_parts();
                StagedFile { key, snapshots, text }
            })
            .collect();
        ScriptResult {
            files,
            selections: self.selected_ranges.take(),
            output_log: std::mem::take(&mut self.output_log),
        }
    }
}

/// One staged document: intermediate undo snapshots plus the final text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub key: DocKey,
    pub snapshots: Vec<String>,
    pub text: String,
}

/// Everything a completed run hands back to the host.
#[derive(Debug, Clone, Default)]
pub struct ScriptResult {
    pub files: Vec<StagedFile>,
    pub selections: Option<Vec<Range>>,
    pub output_log: Vec<String>,
}

impl ScriptResult {
    /// Replay every staged document through `sink`: each intermediate
    /// snapshot in order, then the final text, each as its own undo stop.
    pub fn apply(&self, sink: &mut dyn DocumentSink) -> Result<(), HostError> {
        for file in &self.files {
            for snapshot in &file.snapshots {
                sink.write_document(&file.key, snapshot, true)?;
            }
            sink.write_document(&file.key, &file.text, true)?;
        }
        Ok(())
    }

    /// Final staged text for a key, if that document was touched.
    pub fn final_text(&self, key: &DocKey) -> Option<&str> {
        self.files
            .iter()
            .find(|f| &f.key == key)
            .map(|f| f.text.as_str())
    }
}

// ==================== Run registry ====================

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(0);
static RUNNING: OnceLock<Mutex<HashMap<u64, CancelSignal>>> = OnceLock::new();

fn running() -> &'static Mutex<HashMap<u64, CancelSignal>> {
    RUNNING.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_running() -> std::sync::MutexGuard<'static, HashMap<u64, CancelSignal>> {
    // the map holds only cancel flags, so a poisoned lock is still usable
    running().lock().unwrap_or_else(|e| e.into_inner())
}

/// Registration of a live run; dropping it unregisters.
pub struct RunGuard {
    id: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock_running().remove(&self.id);
    }
}

/// Make a run's cancel signal reachable by [`cancel_all_running`].
pub fn register_run(cancel: &CancelSignal) -> RunGuard {
    let id = NEXT_RUN_ID.fetch_add(1, Ordering::SeqCst);
    lock_running().insert(id, cancel.clone());
    RunGuard { id }
}

/// Flip the cancel signal of every registered run. Callable from any thread,
/// including a signal handler's.
pub fn cancel_all_running() {
    for signal in lock_running().values() {
        signal.cancel();
    }
}

pub fn running_count() -> usize {
    lock_running().len()
}
