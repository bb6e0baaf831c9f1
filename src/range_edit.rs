//! Range edit engine: pure functions over `(text, ranges, replacements)`.
//!
//! All offsets are byte offsets into UTF-8 text and every range is a
//! half-open interval `[start, end)`. Nothing in this module has side
//! effects; stateful wrappers live in [`crate::buffer`].

use regex::Regex;
use std::fmt;

/// Half-open byte interval `[start, end)` over a text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    pub start: usize,
    pub end: usize,
}

impl Range {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length of the interval in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Validation failure from a batch edit.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeEditError {
    /// Two ranges overlap after sorting. Indices refer to sorted order.
    Overlap {
        first_index: usize,
        first: Range,
        second_index: usize,
        second: Range,
    },
    /// A range reaches past the end of the text.
    OutOfBounds { index: usize, range: Range, len: usize },
    /// A range is inverted (`start > end`).
    Inverted { index: usize, range: Range },
    /// A range boundary falls inside a multi-byte character.
    NotCharBoundary { index: usize, range: Range },
    /// A replacement list is required but empty.
    EmptyReplacements,
    /// A scanner pattern failed to compile.
    Pattern(String),
}

impl fmt::Display for RangeEditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeEditError::Overlap {
                first_index,
                first,
                second_index,
                second,
            } => write!(
                f,
                "range {} : {} overlaps with range {} : {}",
                first_index, first, second_index, second
            ),
            RangeEditError::OutOfBounds { index, range, len } => write!(
                f,
                "range {} : {} extends past the end of the text (length {})",
                index, range, len
            ),
            RangeEditError::Inverted { index, range } => {
                write!(f, "range {} : {} has start greater than end", index, range)
            }
            RangeEditError::NotCharBoundary { index, range } => write!(
                f,
                "range {} : {} does not fall on a character boundary",
                index, range
            ),
            RangeEditError::EmptyReplacements => {
                write!(f, "replacement list is empty but there are ranges to fill")
            }
            RangeEditError::Pattern(msg) => write!(f, "invalid pattern: {}", msg),
        }
    }
}

impl std::error::Error for RangeEditError {}

/// Failure from [`process_ranges`]: either a validation error or an error
/// raised by the caller's transform.
#[derive(Debug)]
pub enum ProcessError<E> {
    Edit(RangeEditError),
    Transform(E),
}

impl<E: fmt::Display> fmt::Display for ProcessError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Edit(e) => write!(f, "{}", e),
            ProcessError::Transform(e) => write!(f, "transform failed: {}", e),
        }
    }
}

/// Replace the substrings at `ranges` with `replacements`, in one pass.
///
/// `None` slots are skip placeholders: they sort first, produce no output
/// range, and (when the replacement list is being reused cyclically) still
/// consume their replacement index.
///
/// Pairing rule: when `replacements.len() == ranges.len()` the two lists are
/// argsorted together so each range keeps its own replacement regardless of
/// input order. Otherwise only the ranges are sorted and range `i` takes
/// `replacements[i % replacements.len()]`, which lets a single string be
/// reused for many ranges.
///
/// Returns the new text and the post-edit positions of every defined range,
/// in ascending order.
pub fn replace_many<S: AsRef<str>>(
    text: &str,
    ranges: &[Option<Range>],
    replacements: &[S],
) -> Result<(String, Vec<Range>), RangeEditError> {
    let mut slots: Vec<(Option<Range>, usize)> = if replacements.len() == ranges.len() {
        ranges.iter().copied().zip(0..ranges.len()).collect()
    } else {
        let mut sorted: Vec<Option<Range>> = ranges.to_vec();
        sort_slots(&mut sorted);
        sorted.into_iter().enumerate().map(|(i, r)| (r, i)).collect()
    };
    // the argsort case still needs sorting; sorting twice is harmless for
    // the cyclic case, so do it unconditionally
    slots.sort_by(|a, b| compare_slots(&a.0, &b.0));

    if replacements.is_empty() && slots.iter().any(|(r, _)| r.is_some()) {
        return Err(RangeEditError::EmptyReplacements);
    }

    validate_sorted(
        text,
        slots.iter().map(|(r, _)| *r),
    )?;

    let mut out = String::with_capacity(text.len());
    let mut new_ranges = Vec::new();
    let mut prev_end = 0usize;
    let mut delta = 0isize;

    for (range, rep_index) in &slots {
        let Some(range) = range else { continue };
        let replacement = replacements[rep_index % replacements.len()].as_ref();

        out.push_str(&text[prev_end..range.start]);
        out.push_str(replacement);
        prev_end = range.end;

        let new_start = (range.start as isize + delta) as usize;
        new_ranges.push(Range::new(new_start, new_start + replacement.len()));
        delta += replacement.len() as isize - range.len() as isize;
    }
    out.push_str(&text[prev_end..]);

    Ok((out, new_ranges))
}

/// Insert `strings` at `positions`. `None` positions are dropped before
/// delegating to [`replace_many`] with degenerate (empty) ranges.
pub fn insert_many<S: AsRef<str>>(
    text: &str,
    positions: &[Option<usize>],
    strings: &[S],
) -> Result<(String, Vec<Range>), RangeEditError> {
    let ranges: Vec<Option<Range>> = positions
        .iter()
        .filter_map(|p| p.map(|p| Some(Range::new(p, p))))
        .collect();
    replace_many(text, &ranges, strings)
}

/// Delete the substrings at `ranges`.
pub fn remove_many(
    text: &str,
    ranges: &[Option<Range>],
) -> Result<(String, Vec<Range>), RangeEditError> {
    let empties = vec![""; ranges.len()];
    replace_many(text, ranges, &empties)
}

/// Apply `transform` to each range's substring and splice the results back.
///
/// `ranges` is sorted by start and then rewritten in place to the post-edit
/// offsets, so the caller can keep using the ranges afterwards (e.g. to
/// restore selections after a transform changed substring lengths).
pub fn process_ranges<E, F>(
    text: &str,
    ranges: &mut [Range],
    mut transform: F,
) -> Result<String, ProcessError<E>>
where
    F: FnMut(&str) -> Result<String, E>,
{
    ranges.sort_by_key(|r| r.start);
    validate_sorted(text, ranges.iter().map(|r| Some(*r))).map_err(ProcessError::Edit)?;

    let mut out = String::with_capacity(text.len());
    let mut prev_end = 0usize;
    let mut delta = 0isize;

    for range in ranges.iter_mut() {
        out.push_str(&text[prev_end..range.start]);
        let replaced =
            transform(&text[range.start..range.end]).map_err(ProcessError::Transform)?;
        prev_end = range.end;

        let new_start = (range.start as isize + delta) as usize;
        let new_end = new_start + replaced.len();
        delta += replaced.len() as isize - range.len() as isize;
        out.push_str(&replaced);
        *range = Range::new(new_start, new_end);
    }
    out.push_str(&text[prev_end..]);

    Ok(out)
}

// ==================== Scanners ====================

fn compile_pattern(pattern: &str) -> Result<Regex, RangeEditError> {
    Regex::new(pattern).map_err(|e| RangeEditError::Pattern(e.to_string()))
}

/// All non-overlapping matches of `pattern`, as matched substrings.
pub fn find_all(text: &str, pattern: &str) -> Result<Vec<String>, RangeEditError> {
    let re = compile_pattern(pattern)?;
    Ok(re.find_iter(text).map(|m| m.as_str().to_string()).collect())
}

/// Start offsets of all non-overlapping matches of `pattern`.
pub fn find_all_positions(text: &str, pattern: &str) -> Result<Vec<usize>, RangeEditError> {
    let re = compile_pattern(pattern)?;
    Ok(re.find_iter(text).map(|m| m.start()).collect())
}

/// Ranges of all non-overlapping matches of `pattern`.
pub fn find_all_ranges(text: &str, pattern: &str) -> Result<Vec<Range>, RangeEditError> {
    let re = compile_pattern(pattern)?;
    Ok(re
        .find_iter(text)
        .map(|m| Range::new(m.start(), m.end()))
        .collect())
}

/// First match of `pattern` at or after `position`.
pub fn match_next(
    text: &str,
    pattern: &str,
    position: usize,
) -> Result<Option<Range>, RangeEditError> {
    let re = compile_pattern(pattern)?;
    let start = floor_char_boundary(text, position);
    Ok(re
        .find_at(text, start)
        .map(|m| Range::new(m.start(), m.end())))
}

/// One past the end of the first occurrence of the literal `needle` at or
/// after `position`, or `None`.
pub fn index_after(text: &str, needle: &str, position: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let start = floor_char_boundary(text, position);
    text[start..]
        .find(needle)
        .map(|i| start + i + needle.len())
}

/// One past the end of the rightmost occurrence of the literal `needle`
/// ending at or before `position + 1`, or `None`.
///
/// The "one past match end" return convention is deliberate: it composes
/// with half-open ranges, so `last_index_after` of an opening delimiter is
/// exactly where the enclosed content begins.
pub fn last_index_after(text: &str, needle: &str, position: usize) -> Option<usize> {
    if needle.is_empty() {
        // an empty needle would match everywhere with zero width
        return None;
    }
    let cap = floor_char_boundary(text, position.saturating_add(1));
    text[..cap].rfind(needle).map(|i| i + needle.len())
}

/// Largest char boundary less than or equal to `position`, clamped to the
/// text length.
fn floor_char_boundary(text: &str, position: usize) -> usize {
    let mut p = position.min(text.len());
    while !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

// ==================== Validation helpers ====================

fn sort_slots(slots: &mut [Option<Range>]) {
    slots.sort_by(compare_slots);
}

/// `None` sorts first; defined ranges sort by start. Stable with respect to
/// equal starts (which validation rejects anyway).
fn compare_slots(a: &Option<Range>, b: &Option<Range>) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(a), Some(b)) => a.start.cmp(&b.start),
    }
}

/// Check bounds, char boundaries, and the adjacency overlap rule over an
/// already-sorted slot sequence. Equal starts count as overlap.
fn validate_sorted<I>(text: &str, slots: I) -> Result<(), RangeEditError>
where
    I: Iterator<Item = Option<Range>>,
{
    let mut prev: Option<(usize, Range)> = None;
    for (index, slot) in slots.enumerate() {
        let Some(range) = slot else { continue };
        if range.start > range.end {
            return Err(RangeEditError::Inverted { index, range });
        }
        if range.end > text.len() {
            return Err(RangeEditError::OutOfBounds {
                index,
                range,
                len: text.len(),
            });
        }
        if !text.is_char_boundary(range.start) || !text.is_char_boundary(range.end) {
            return Err(RangeEditError::NotCharBoundary { index, range });
        }
        if let Some((prev_index, prev_range)) = prev {
            if prev_range.end > range.start || prev_range.start == range.start {
                return Err(RangeEditError::Overlap {
                    first_index: prev_index,
                    first: prev_range,
                    second_index: index,
                    second: range,
                });
            }
        }
        prev = Some((index, range));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: usize, end: usize) -> Option<Range> {
        Some(Range::new(start, end))
    }

    #[test]
    fn test_noop_edit_is_identity() {
        let (text, ranges) = replace_many::<&str>("hello", &[], &[]).unwrap();
        assert_eq!(text, "hello");
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_basic_replace() {
        let (text, ranges) =
            replace_many("foo bar foo", &[r(0, 3), r(8, 11)], &["baz", "qux"]).unwrap();
        assert_eq!(text, "baz bar qux");
        assert_eq!(ranges, vec![Range::new(0, 3), Range::new(8, 11)]);
    }

    #[test]
    fn test_replacement_length_shift() {
        let (text, ranges) = replace_many("ab", &[r(0, 1), r(1, 2)], &["xxx", "y"]).unwrap();
        assert_eq!(text, "xxxy");
        assert_eq!(ranges, vec![Range::new(0, 3), Range::new(3, 4)]);
    }

    #[test]
    fn test_unordered_input_is_normalized() {
        let (text, ranges) =
            replace_many("123", &[r(2, 3), r(0, 1), r(1, 2)], &["5", "3", "4"]).unwrap();
        assert_eq!(text, "345");
        assert_eq!(
            ranges,
            vec![Range::new(0, 1), Range::new(1, 2), Range::new(2, 3)]
        );
    }

    #[test]
    fn test_overlap_rejected() {
        let err = replace_many("12", &[r(0, 2), r(1, 2)], &["a", "b"]).unwrap_err();
        match err {
            RangeEditError::Overlap {
                first_index,
                second_index,
                ..
            } => {
                assert_eq!(first_index, 0);
                assert_eq!(second_index, 1);
            }
            other => panic!("expected overlap error, got {:?}", other),
        }
    }

    #[test]
    fn test_touching_ranges_allowed() {
        let (text, ranges) = replace_many("12", &[r(0, 1), r(1, 2)], &["3", "4"]).unwrap();
        assert_eq!(text, "34");
        assert_eq!(ranges, vec![Range::new(0, 1), Range::new(1, 2)]);
    }

    #[test]
    fn test_equal_starts_rejected() {
        let err = replace_many("abc", &[r(1, 1), r(1, 2)], &["x", "y"]).unwrap_err();
        assert!(matches!(err, RangeEditError::Overlap { .. }));
    }

    #[test]
    fn test_cyclic_replacement_reuse() {
        let text = "a ".repeat(10);
        let ranges: Vec<Option<Range>> = (0..10).map(|i| r(i * 2, i * 2 + 1)).collect();
        let (new_text, new_ranges) = replace_many(&text, &ranges, &["bbb"]).unwrap();
        assert_eq!(new_text, "bbb ".repeat(10));
        assert_eq!(new_ranges.len(), 10);
        for (i, range) in new_ranges.iter().enumerate() {
            assert_eq!(*range, Range::new(i * 4, i * 4 + 3));
        }
    }

    #[test]
    fn test_round_trip_ranges_locate_replacements() {
        let text = "the quick brown fox";
        let replacements = ["slow", "red"];
        let (new_text, new_ranges) =
            replace_many(text, &[r(4, 9), r(10, 15)], &replacements).unwrap();
        for (range, expected) in new_ranges.iter().zip(replacements.iter()) {
            assert_eq!(&new_text[range.start..range.end], *expected);
        }
    }

    #[test]
    fn test_none_slots_are_skipped() {
        let (text, ranges) =
            replace_many("abcdef", &[None, r(0, 2), None, r(4, 6)], &["X"]).unwrap();
        assert_eq!(text, "XcdX");
        assert_eq!(ranges, vec![Range::new(0, 1), Range::new(3, 4)]);
    }

    #[test]
    fn test_empty_replacements_with_defined_ranges() {
        let err = replace_many::<&str>("abc", &[r(0, 1)], &[]).unwrap_err();
        assert_eq!(err, RangeEditError::EmptyReplacements);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let err = replace_many("ab", &[r(0, 5)], &["x"]).unwrap_err();
        assert!(matches!(err, RangeEditError::OutOfBounds { .. }));
    }

    #[test]
    fn test_char_boundary_rejected() {
        // "é" is two bytes; offset 1 splits it
        let err = replace_many("é", &[r(0, 1)], &["x"]).unwrap_err();
        assert!(matches!(err, RangeEditError::NotCharBoundary { .. }));
    }

    #[test]
    fn test_insert_many_drops_none_positions() {
        let (text, ranges) =
            insert_many("ac", &[Some(1), None, Some(2)], &["b", "d"]).unwrap();
        assert_eq!(text, "abcd");
        assert_eq!(ranges, vec![Range::new(1, 2), Range::new(3, 4)]);
    }

    #[test]
    fn test_remove_many() {
        let (text, ranges) = remove_many("abcdef", &[r(1, 3), r(4, 5)]).unwrap();
        assert_eq!(text, "adf");
        assert_eq!(ranges, vec![Range::new(1, 1), Range::new(2, 2)]);
    }

    #[test]
    fn test_process_ranges_rewrites_in_place() {
        let mut ranges = [Range::new(8, 11), Range::new(0, 3)];
        let text = process_ranges("foo bar baz", &mut ranges, |s| {
            Ok::<_, RangeEditError>(s.to_uppercase())
        })
        .unwrap();
        assert_eq!(text, "FOO bar BAZ");
        // sorted and rewritten to post-edit offsets
        assert_eq!(ranges, [Range::new(0, 3), Range::new(8, 11)]);
    }

    #[test]
    fn test_process_ranges_length_changes_shift_later_ranges() {
        let mut ranges = [Range::new(0, 1), Range::new(2, 3)];
        let text = process_ranges("a b", &mut ranges, |s| {
            Ok::<_, RangeEditError>(format!("{}{}", s, s))
        })
        .unwrap();
        assert_eq!(text, "aa bb");
        assert_eq!(ranges, [Range::new(0, 2), Range::new(3, 5)]);
    }

    #[test]
    fn test_process_ranges_rejects_overlap() {
        let mut ranges = [Range::new(0, 2), Range::new(1, 3)];
        let err = process_ranges("abcd", &mut ranges, |s| {
            Ok::<_, RangeEditError>(s.to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ProcessError::Edit(RangeEditError::Overlap { .. })));
    }

    #[test]
    fn test_process_ranges_transform_error_propagates() {
        let mut ranges = [Range::new(0, 1)];
        let err = process_ranges("a", &mut ranges, |_| Err::<String, _>("boom")).unwrap_err();
        assert!(matches!(err, ProcessError::Transform("boom")));
    }

    #[test]
    fn test_find_all_variants() {
        assert_eq!(
            find_all("foo bar foo", "foo").unwrap(),
            vec!["foo".to_string(), "foo".to_string()]
        );
        assert_eq!(find_all_positions("foo bar foo", "foo").unwrap(), vec![0, 8]);
        assert_eq!(
            find_all_ranges("foo bar foo", "fo+").unwrap(),
            vec![Range::new(0, 3), Range::new(8, 11)]
        );
    }

    #[test]
    fn test_find_all_bad_pattern() {
        assert!(matches!(
            find_all("x", "(").unwrap_err(),
            RangeEditError::Pattern(_)
        ));
    }

    #[test]
    fn test_match_next_from_position() {
        assert_eq!(
            match_next("foo bar foo", "foo", 1).unwrap(),
            Some(Range::new(8, 11))
        );
        assert_eq!(match_next("foo bar foo", "foo", 9).unwrap(), None);
        // at the match start is still a match
        assert_eq!(
            match_next("foo bar foo", "foo", 8).unwrap(),
            Some(Range::new(8, 11))
        );
    }

    #[test]
    fn test_index_after() {
        assert_eq!(index_after("foo bar", "foo", 0), Some(3));
        assert_eq!(index_after("foo bar", "bar", 0), Some(7));
        assert_eq!(index_after("foo bar", "foo", 1), None);
        assert_eq!(index_after("foo bar", "", 0), None);
    }

    #[test]
    fn test_last_index_after_boundaries() {
        let text = "foo bar foo";
        // rightmost "foo" ends at 11; one past its end is 11
        assert_eq!(last_index_after(text, "foo", 10), Some(11));
        // a match must end at or before position + 1
        assert_eq!(last_index_after(text, "foo", 9), Some(3));
        assert_eq!(last_index_after(text, "foo", 2), Some(3));
        assert_eq!(last_index_after(text, "foo", 1), None);
        // empty needle is rejected outright
        assert_eq!(last_index_after(text, "", 5), None);
        // position past the end clamps to the text length
        assert_eq!(last_index_after(text, "foo", 100), Some(11));
    }
}
