//! Dry-run diff preview.
//!
//! By default a run never touches the target file; the CLI renders the
//! staged result against the original as a unified diff instead.

use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone)]
pub struct Hunk {
    pub start_line: usize,
    pub end_line: usize,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
}

pub struct DiffView {
    pub original: String,
    pub modified: String,
}

impl DiffView {
    pub fn new(original: String, modified: String) -> Self {
        Self { original, modified }
    }

    pub fn is_unchanged(&self) -> bool {
        self.original == self.modified
    }

    /// Changed regions only, with 0-based line positions in the original.
    pub fn compute_hunks(&self) -> Vec<Hunk> {
        let diff = TextDiff::from_lines(&self.original, &self.modified);
        let mut hunks = Vec::new();

        for hunk in diff.unified_diff().iter_hunks() {
            let mut old_lines = Vec::new();
            let mut new_lines = Vec::new();
            let mut start_line = 0;
            let mut end_line = 0;
            let mut first = true;

            for change in hunk.iter_changes() {
                if first {
                    start_line = change.old_index().unwrap_or(0);
                    first = false;
                }
                end_line = change.old_index().unwrap_or(end_line);

                match change.tag() {
                    ChangeTag::Delete => old_lines.push(change.value().to_string()),
                    ChangeTag::Insert => new_lines.push(change.value().to_string()),
                    ChangeTag::Equal => {}
                }
            }

            if !old_lines.is_empty() || !new_lines.is_empty() {
                hunks.push(Hunk {
                    start_line,
                    end_line,
                    old_lines,
                    new_lines,
                });
            }
        }

        hunks
    }

    /// Unified diff text with `label` in the header, ready to print.
    pub fn render(&self, label: &str) -> String {
        let diff = TextDiff::from_lines(&self.original, &self.modified);
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", label), &format!("b/{}", label))
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_text_has_no_hunks() {
        let view = DiffView::new("a\nb\n".to_string(), "a\nb\n".to_string());
        assert!(view.is_unchanged());
        assert!(view.compute_hunks().is_empty());
    }

    #[test]
    fn test_hunks_capture_changed_lines() {
        let view = DiffView::new("one\ntwo\nthree\n".to_string(), "one\nTWO\nthree\n".to_string());
        let hunks = view.compute_hunks();
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].start_line, 0);
        assert_eq!(hunks[0].old_lines, vec!["two\n".to_string()]);
        assert_eq!(hunks[0].new_lines, vec!["TWO\n".to_string()]);
    }

    #[test]
    fn test_render_contains_markers_and_header() {
        let view = DiffView::new("old\n".to_string(), "new\n".to_string());
        let rendered = view.render("notes.txt");
        assert!(rendered.contains("a/notes.txt"));
        assert!(rendered.contains("b/notes.txt"));
        assert!(rendered.contains("-old"));
        assert!(rendered.contains("+new"));
    }
}
