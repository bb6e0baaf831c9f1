//! End-to-end macro runs against in-memory hosts.

use std::cell::RefCell;
use std::rc::Rc;

use macrun::context::ScriptResult;
use macrun::error::MacroError;
use macrun::host::{
    DocKey, DocumentSink, HostDocument, MemoryTree, QueuedPrompter, Prompter, RecordingSink,
};
use macrun::range_edit::Range;
use macrun::script::{RunHost, run_script};

struct Fixture {
    host: RunHost,
    sink: Rc<RefCell<RecordingSink>>,
}

fn fixture(tree: MemoryTree, prompter: impl Prompter + 'static) -> Fixture {
    let sink = Rc::new(RefCell::new(RecordingSink::new()));
    let dyn_sink: Rc<RefCell<dyn DocumentSink>> = sink.clone();
    Fixture {
        host: RunHost {
            tree: Rc::new(tree),
            sink: dyn_sink,
            prompter: Rc::new(prompter),
        },
        sink,
    }
}

fn run(script: &str, text: &str) -> Result<ScriptResult, MacroError> {
    let fx = fixture(MemoryTree::new(), QueuedPrompter::default());
    run_script(script, &HostDocument::from_text(text), &fx.host)
}

fn active_text(result: &ScriptResult) -> &str {
    result.final_text(&DocKey::Active).unwrap_or_default()
}

#[test]
fn cyclic_replacement_reuses_a_single_string() {
    let doc = "a ".repeat(10);
    let result = run(
        "local ranges = find_all_ranges(\"a \")\nreplace_many(ranges, {\"bbb \"})",
        &doc,
    )
    .unwrap();
    assert_eq!(active_text(&result), "bbb ".repeat(10));
}

#[test]
fn unordered_ranges_keep_their_replacements() {
    let result = run("replace_many({{1, 2}, {0, 1}}, {\"4\", \"3\"})", "123").unwrap();
    assert_eq!(active_text(&result), "345");
}

#[test]
fn skip_placeholders_consume_their_replacement() {
    let result = run("replace_many({false, {0, 1}}, {\"X\", \"Y\"})", "ab").unwrap();
    assert_eq!(active_text(&result), "Yb");
}

#[test]
fn adjacent_ranges_do_not_overlap() {
    let result = run("replace_many({{0, 1}, {1, 2}}, {\"3\", \"4\"})", "12").unwrap();
    assert_eq!(active_text(&result), "34");
}

#[test]
fn overlapping_ranges_fail_hard_and_stage_nothing() {
    let err = run("replace_many({{0, 2}, {1, 2}}, {\"a\", \"b\"})", "12").unwrap_err();
    assert!(matches!(err, MacroError::Hard(_)));
}

#[test]
fn noop_replacement_is_idempotent() {
    let result = run("replace_many({{0, 5}}, {\"hello\"})", "hello world").unwrap();
    assert_eq!(active_text(&result), "hello world");
}

#[test]
fn undo_snapshots_apply_before_the_final_text() {
    let result = run("set_text(\"v2\")\nmark_undo_point()\nset_text(\"v3\")", "v1").unwrap();

    let mut sink = RecordingSink::new();
    result.apply(&mut sink).unwrap();
    let texts: Vec<&str> = sink.writes.iter().map(|(_, t, _)| t.as_str()).collect();
    assert_eq!(texts, vec!["v2", "v3"]);
}

#[test]
fn apply_changes_immediately_writes_mid_run() {
    let fx = fixture(MemoryTree::new(), QueuedPrompter::default());
    run_script(
        "set_text(\"now\")\napply_changes_immediately(true)",
        &HostDocument::from_text("x"),
        &fx.host,
    )
    .unwrap();

    // the write happened during the run, before any apply of the result
    let writes = &fx.sink.borrow().writes;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0], (DocKey::Active, "now".to_string(), true));
}

#[test]
fn prompter_answers_reach_the_script() {
    let fx = fixture(
        MemoryTree::new(),
        QueuedPrompter::new(vec![Some("World".to_string())]),
    );
    let result = run_script(
        "set_text(\"Hello \" .. input(\"name\"))",
        &HostDocument::from_text(""),
        &fx.host,
    )
    .unwrap();
    assert_eq!(active_text(&result), "Hello World");
}

#[test]
fn file_edits_stage_and_read_through() {
    let mut tree = MemoryTree::new();
    tree.insert("/a.txt", "one");
    let fx = fixture(tree, QueuedPrompter::default());
    let result = run_script(
        "set_file_text(\"a.txt\", \"two\")\nset_text(get_file_text(\"a.txt\"))",
        &HostDocument::from_text("x"),
        &fx.host,
    )
    .unwrap();

    assert_eq!(active_text(&result), "two");
    assert_eq!(
        result.final_text(&DocKey::File("/a.txt".into())),
        Some("two")
    );
}

#[test]
fn walk_early_stop_returns_the_visitor_value() {
    let mut tree = MemoryTree::new();
    tree.insert("/a.txt", "hay");
    tree.insert("/b.txt", "needle");
    tree.insert("/c.txt", "hay");
    let fx = fixture(tree, QueuedPrompter::default());
    let script = "\
        local found = walk_files_top_down(function(path)\n\
          if get_file_text(path) == \"needle\" then return path end\n\
        end)\n\
        set_text(found or \"none\")";
    let result = run_script(script, &HostDocument::from_text("x"), &fx.host).unwrap();
    assert_eq!(active_text(&result), "/b.txt");
}

#[test]
fn runs_settle_only_after_nested_timers_fire() {
    let script = "\
        set_timeout(function()\n\
          set_timeout(function() set_text(\"inner\") end, 10)\n\
        end, 10)";
    let result = run(script, "x").unwrap();
    assert_eq!(active_text(&result), "inner");
}

#[test]
fn soft_exit_discards_staged_changes() {
    let err = run("set_text(\"staged\")\nexit()", "x").unwrap_err();
    assert!(err.is_soft());
}

#[test]
fn substituted_text_adopts_the_document_line_ending() {
    let result = run("set_text(\"x\\ny\\n\")", "a\r\nb").unwrap();
    assert_eq!(active_text(&result), "x\r\ny\r\n");
}

#[test]
fn process_ranges_rewrites_selections_to_new_offsets() {
    let doc = HostDocument::from_text("ab cd").with_selections(vec![Range::new(0, 2)]);
    let fx = fixture(MemoryTree::new(), QueuedPrompter::default());
    let script = "\
        local ranges = process_ranges(get_selected_ranges(), function(s)\n\
          return s .. s\n\
        end)\n\
        set_selected_ranges(ranges)";
    let result = run_script(script, &doc, &fx.host).unwrap();
    assert_eq!(active_text(&result), "abab cd");
    assert_eq!(result.selections, Some(vec![Range::new(0, 4)]));
}

#[test]
fn output_buffers_flow_into_the_result() {
    let script = "\
        local i = new_output()\n\
        set_output_text(i, \"report\")\n\
        set_text(\"done\")";
    let result = run(script, "x").unwrap();
    assert_eq!(result.final_text(&DocKey::Output(0)), Some("report"));
    assert_eq!(active_text(&result), "done");
}

#[test]
fn script_fault_traces_stay_inside_the_script() {
    let script = "\
        local function helper()\n\
          error(\"deliberate\")\n\
        end\n\
        helper()";
    let err = run(script, "x").unwrap_err();
    let MacroError::Script { message, trace } = err else {
        panic!("expected a script fault, got {:?}", err);
    };
    assert!(message.contains("deliberate"));
    assert!(!trace.is_empty());
    assert!(trace.iter().all(|line| line.contains("[string \"macro\"]")));
}
