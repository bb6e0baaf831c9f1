//! TextBuffer: staged text plus its undo-point snapshot history.
//!
//! A buffer never touches the host document. Scripts mutate it through the
//! range edit engine; the host replays `snapshots` in order and then applies
//! `content` once the run completes, giving one native undo step per
//! snapshot.

use crate::range_edit::{self, ProcessError, Range, RangeEditError};

/// Mutable text with an ordered list of prior snapshots.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    content: String,
    snapshots: Vec<String>,
    /// True once any mutation has happened. Unmodified buffers are left out
    /// of the run result so an untouched document is never rewritten.
    modified: bool,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            snapshots: Vec::new(),
            modified: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Snapshots pushed so far, oldest first. Immutable once pushed.
    pub fn snapshots(&self) -> &[String] {
        &self.snapshots
    }

    /// Replace the whole content.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content = text.into();
        self.modified = true;
    }

    /// Record the current content as an undo point.
    pub fn mark_undo_point(&mut self) {
        self.snapshots.push(self.content.clone());
        self.modified = true;
    }

    /// Consume the buffer into `(snapshots, final_content)`.
    pub fn into_parts(self) -> (Vec<String>, String) {
        (self.snapshots, self.content)
    }

    // ==================== Engine wrappers ====================

    /// Batch replace; see [`range_edit::replace_many`].
    pub fn replace_many<S: AsRef<str>>(
        &mut self,
        ranges: &[Option<Range>],
        replacements: &[S],
    ) -> Result<Vec<Range>, RangeEditError> {
        let (text, new_ranges) = range_edit::replace_many(&self.content, ranges, replacements)?;
        self.content = text;
        self.modified = true;
        Ok(new_ranges)
    }

    /// Batch insert; see [`range_edit::insert_many`].
    pub fn insert_many<S: AsRef<str>>(
        &mut self,
        positions: &[Option<usize>],
        strings: &[S],
    ) -> Result<Vec<Range>, RangeEditError> {
        let (text, new_ranges) = range_edit::insert_many(&self.content, positions, strings)?;
        self.content = text;
        self.modified = true;
        Ok(new_ranges)
    }

    /// Batch delete; see [`range_edit::remove_many`].
    pub fn remove_many(&mut self, ranges: &[Option<Range>]) -> Result<Vec<Range>, RangeEditError> {
        let (text, new_ranges) = range_edit::remove_many(&self.content, ranges)?;
        self.content = text;
        self.modified = true;
        Ok(new_ranges)
    }

    /// In-place transform of each range's substring; `ranges` is rewritten
    /// to the post-edit offsets. See [`range_edit::process_ranges`].
    pub fn process_ranges<E, F>(
        &mut self,
        ranges: &mut [Range],
        transform: F,
    ) -> Result<(), ProcessError<E>>
    where
        F: FnMut(&str) -> Result<String, E>,
    {
        let text = range_edit::process_ranges(&self.content, ranges, transform)?;
        self.content = text;
        self.modified = true;
        Ok(())
    }

    /// Replace `[start, end)` with `text`.
    pub fn replace(&mut self, text: &str, start: usize, end: usize) -> Result<(), RangeEditError> {
        let new_ranges = self.replace_many(&[Some(Range::new(start, end))], &[text])?;
        debug_assert_eq!(new_ranges.len(), 1);
        Ok(())
    }

    /// Insert `text` at `position`.
    pub fn insert(&mut self, text: &str, position: usize) -> Result<(), RangeEditError> {
        self.replace(text, position, position)
    }

    /// Delete `[start, end)`.
    pub fn remove(&mut self, start: usize, end: usize) -> Result<(), RangeEditError> {
        self.replace("", start, end)
    }
}
