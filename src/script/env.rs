//! Restricted script environment.
//!
//! Scripts never see the interpreter's real globals. [`build_env`] assembles
//! a fresh environment table holding a safe subset of the standard library
//! plus the capability functions, and the chunk runs with that table as its
//! `_ENV`. Everything a script can observe or mutate goes through here.
//!
//! Byte offsets in the capability API are 0-based and ranges are half-open
//! `{start, end}` pairs, matching the edit engine. A literal `false` in a
//! range or position list is a skip placeholder.

use mlua::{Function, Lua, Table, Value, Variadic};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use super::{CANCELLED_MESSAGE, RunHost};
use crate::context::ExecutionContext;
use crate::error::MacroError;
use crate::host::{
    DocKey, FileTree, WalkError, walk_bottom_up, walk_top_down,
};
use crate::range_edit::{self, ProcessError, Range};
use crate::timers::{self, CancelSignal, TimerId, TimerStore};

/// Lift a structured failure into an interpreter error so it survives the
/// trip through Lua and can be recovered by downcast on the way out.
pub(crate) fn raise(err: MacroError) -> mlua::Error {
    mlua::Error::external(err)
}

fn soft(message: impl Into<String>) -> mlua::Error {
    raise(MacroError::soft(message))
}

fn hard(message: impl Into<String>) -> mlua::Error {
    raise(MacroError::hard(message))
}

// ==================== Value conversions ====================

pub(crate) fn ranges_to_table(lua: &Lua, ranges: &[Range]) -> mlua::Result<Table> {
    let out = lua.create_table()?;
    for (i, range) in ranges.iter().enumerate() {
        out.set(i + 1, range_to_pair(lua, *range)?)?;
    }
    Ok(out)
}

fn range_to_pair(lua: &Lua, range: Range) -> mlua::Result<Table> {
    let pair = lua.create_table()?;
    pair.set(1, range.start)?;
    pair.set(2, range.end)?;
    Ok(pair)
}

fn pair_to_range(index: usize, value: &Value) -> mlua::Result<Range> {
    let Value::Table(pair) = value else {
        return Err(hard(format!(
            "range #{} must be a {{start, end}} pair, got {}",
            index,
            value.type_name()
        )));
    };
    let start: i64 = pair
        .get(1)
        .map_err(|_| hard(format!("range #{} has a non-integer start", index)))?;
    let end: i64 = pair
        .get(2)
        .map_err(|_| hard(format!("range #{} has a non-integer end", index)))?;
    if start < 0 || end < 0 {
        return Err(hard(format!("range #{} has a negative offset", index)));
    }
    Ok(Range::new(start as usize, end as usize))
}

pub(crate) fn table_to_ranges(value: &Value) -> mlua::Result<Vec<Range>> {
    let Value::Table(table) = value else {
        return Err(hard(format!(
            "expected a table of ranges, got {}",
            value.type_name()
        )));
    };
    let mut out = Vec::new();
    for (i, item) in table.clone().sequence_values::<Value>().enumerate() {
        out.push(pair_to_range(i + 1, &item?)?);
    }
    Ok(out)
}

/// Like [`table_to_ranges`] but `false` entries become skip placeholders.
fn table_to_opt_ranges(value: &Value) -> mlua::Result<Vec<Option<Range>>> {
    let Value::Table(table) = value else {
        return Err(hard(format!(
            "expected a table of ranges, got {}",
            value.type_name()
        )));
    };
    let mut out = Vec::new();
    for (i, item) in table.clone().sequence_values::<Value>().enumerate() {
        let item = item?;
        match item {
            Value::Boolean(false) => out.push(None),
            other => out.push(Some(pair_to_range(i + 1, &other)?)),
        }
    }
    Ok(out)
}

fn table_to_opt_positions(value: &Value) -> mlua::Result<Vec<Option<usize>>> {
    let Value::Table(table) = value else {
        return Err(hard(format!(
            "expected a table of positions, got {}",
            value.type_name()
        )));
    };
    let mut out = Vec::new();
    for (i, item) in table.clone().sequence_values::<Value>().enumerate() {
        match item? {
            Value::Boolean(false) => out.push(None),
            Value::Integer(n) if n >= 0 => out.push(Some(n as usize)),
            other => {
                return Err(hard(format!(
                    "position #{} must be a non-negative integer, got {}",
                    i + 1,
                    other.type_name()
                )));
            }
        }
    }
    Ok(out)
}

fn table_to_strings(value: &Value) -> mlua::Result<Vec<String>> {
    let Value::Table(table) = value else {
        return Err(hard(format!(
            "expected a table of strings, got {}",
            value.type_name()
        )));
    };
    let mut out = Vec::new();
    for (i, item) in table.clone().sequence_values::<Value>().enumerate() {
        match item? {
            Value::String(s) => out.push(s.to_string_lossy().to_string()),
            other => {
                return Err(hard(format!(
                    "replacement #{} must be a string, got {}",
                    i + 1,
                    other.type_name()
                )));
            }
        }
    }
    Ok(out)
}

fn expect_string(name: &str, value: &Value) -> mlua::Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        other => Err(hard(format!(
            "{} expects a string, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => format!("<{}>", other.type_name()),
    }
}

fn flatten_process_error(err: ProcessError<mlua::Error>) -> mlua::Error {
    match err {
        ProcessError::Edit(e) => raise(e.into()),
        ProcessError::Transform(e) => e,
    }
}

// ==================== Environment assembly ====================

const SAFE_GLOBALS: &[&str] = &[
    "assert", "error", "ipairs", "next", "pairs", "pcall", "select", "tonumber", "tostring",
    "type", "xpcall",
];

const SAFE_TABLES: &[&str] = &["string", "table", "math"];

fn install_safe_builtins(lua: &Lua, env: &Table) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in SAFE_GLOBALS {
        env.set(*name, globals.get::<Value>(*name)?)?;
    }
    for name in SAFE_TABLES {
        env.set(*name, globals.get::<Value>(*name)?)?;
    }
    Ok(())
}

/// Build the `_ENV` table for one run: safe builtins plus every capability,
/// all closing over the shared context, timer store, and host seams.
pub(crate) fn build_env(
    lua: &Lua,
    context: &Rc<RefCell<ExecutionContext>>,
    timers: &Rc<RefCell<TimerStore<Function>>>,
    host: &RunHost,
) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    install_safe_builtins(lua, &env)?;
    let cancel = context.borrow().cancel.clone();

    // ---- document text ----

    let ctx = Rc::clone(context);
    env.set(
        "get_text",
        lua.create_function(move |_, ()| Ok(ctx.borrow().active_text().to_string()))?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "set_text",
        lua.create_function(move |_, value: Value| {
            let text = expect_string("set_text", &value)?;
            let mut ctx = ctx.borrow_mut();
            let normalized = ctx.line_ending.normalize(&text);
            ctx.active().set_text(normalized);
            Ok(())
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "mark_undo_point",
        lua.create_function(move |_, ()| {
            ctx.borrow_mut().active().mark_undo_point();
            Ok(())
        })?,
    )?;

    let ctx = Rc::clone(context);
    let sink = Rc::clone(&host.sink);
    env.set(
        "apply_changes_immediately",
        lua.create_function(move |_, undo_stop: bool| {
            let text = ctx.borrow().active_text().to_string();
            sink.borrow_mut()
                .write_document(&DocKey::Active, &text, undo_stop)
                .map_err(|e| raise(e.into()))
        })?,
    )?;

    // ---- selections ----

    let ctx = Rc::clone(context);
    env.set(
        "get_selected_ranges",
        lua.create_function(move |lua, ()| ranges_to_table(lua, ctx.borrow().selected_ranges()))?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "set_selected_ranges",
        lua.create_function(move |_, value: Value| {
            let ranges = table_to_ranges(&value)?;
            ctx.borrow_mut().set_selected_ranges(ranges);
            Ok(())
        })?,
    )?;

    // ---- batch edits ----

    let ctx = Rc::clone(context);
    env.set(
        "replace_many",
        lua.create_function(move |lua, (ranges, replacements): (Value, Value)| {
            let slots = table_to_opt_ranges(&ranges)?;
            let replacements = table_to_strings(&replacements)?;
            let new_ranges = ctx
                .borrow_mut()
                .active()
                .replace_many(&slots, &replacements)
                .map_err(|e| raise(e.into()))?;
            ranges_to_table(lua, &new_ranges)
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "insert_many",
        lua.create_function(move |lua, (positions, strings): (Value, Value)| {
            let positions = table_to_opt_positions(&positions)?;
            let strings = table_to_strings(&strings)?;
            let new_ranges = ctx
                .borrow_mut()
                .active()
                .insert_many(&positions, &strings)
                .map_err(|e| raise(e.into()))?;
            ranges_to_table(lua, &new_ranges)
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "remove_many",
        lua.create_function(move |lua, ranges: Value| {
            let slots = table_to_opt_ranges(&ranges)?;
            let new_ranges = ctx
                .borrow_mut()
                .active()
                .remove_many(&slots)
                .map_err(|e| raise(e.into()))?;
            ranges_to_table(lua, &new_ranges)
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "replace",
        lua.create_function(move |_, (text, start, end): (String, usize, usize)| {
            ctx.borrow_mut()
                .active()
                .replace(&text, start, end)
                .map_err(|e| raise(e.into()))
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "insert",
        lua.create_function(move |_, (text, position): (String, usize)| {
            ctx.borrow_mut()
                .active()
                .insert(&text, position)
                .map_err(|e| raise(e.into()))
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "remove",
        lua.create_function(move |_, (start, end): (usize, usize)| {
            ctx.borrow_mut()
                .active()
                .remove(start, end)
                .map_err(|e| raise(e.into()))
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "process_ranges",
        lua.create_function(move |lua, (ranges, transform): (Value, Function)| {
            let mut ranges = table_to_ranges(&ranges)?;
            // copy the text out so capability calls made by the transform
            // can re-borrow the context
            let text = ctx.borrow().active_text().to_string();
            let line_ending = ctx.borrow().line_ending;
            let new_text = range_edit::process_ranges(&text, &mut ranges, |piece| {
                match transform.call::<Value>(piece.to_string())? {
                    Value::String(s) => Ok(line_ending.normalize(&s.to_string_lossy())),
                    other => Err(hard(format!(
                        "process_ranges callback must return a string, got {}",
                        other.type_name()
                    ))),
                }
            })
            .map_err(flatten_process_error)?;
            ctx.borrow_mut().active().set_text(new_text);
            ranges_to_table(lua, &ranges)
        })?,
    )?;

    // ---- searching ----

    let ctx = Rc::clone(context);
    env.set(
        "find_all",
        lua.create_function(move |_, pattern: String| {
            range_edit::find_all(ctx.borrow().active_text(), &pattern).map_err(|e| raise(e.into()))
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "find_all_positions",
        lua.create_function(move |_, pattern: String| {
            range_edit::find_all_positions(ctx.borrow().active_text(), &pattern)
                .map_err(|e| raise(e.into()))
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "find_all_ranges",
        lua.create_function(move |lua, pattern: String| {
            let ranges = range_edit::find_all_ranges(ctx.borrow().active_text(), &pattern)
                .map_err(|e| raise(e.into()))?;
            ranges_to_table(lua, &ranges)
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "match_next",
        lua.create_function(move |lua, (pattern, position): (String, usize)| {
            let found = range_edit::match_next(ctx.borrow().active_text(), &pattern, position)
                .map_err(|e| raise(e.into()))?;
            match found {
                Some(range) => Ok(Value::Table(range_to_pair(lua, range)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "index_after",
        lua.create_function(move |_, (needle, position): (String, usize)| {
            Ok(range_edit::index_after(
                ctx.borrow().active_text(),
                &needle,
                position,
            ))
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "last_index_after",
        lua.create_function(move |_, (needle, position): (String, usize)| {
            Ok(range_edit::last_index_after(
                ctx.borrow().active_text(),
                &needle,
                position,
            ))
        })?,
    )?;

    // ---- workspace files ----

    let ctx = Rc::clone(context);
    let tree = Rc::clone(&host.tree);
    env.set(
        "get_file_text",
        lua.create_function(move |_, path: String| {
            let resolved = tree
                .resolve(Path::new(&path))
                .map_err(|e| raise(e.into()))?;
            let key = DocKey::File(resolved.clone());
            if let Some(buffer) = ctx.borrow().staged(&key) {
                return Ok(buffer.text().to_string());
            }
            tree.read_file(&resolved).map_err(|e| raise(e.into()))
        })?,
    )?;

    let ctx = Rc::clone(context);
    let tree = Rc::clone(&host.tree);
    env.set(
        "set_file_text",
        lua.create_function(move |_, (path, value): (String, Value)| {
            let text = expect_string("set_file_text", &value)?;
            let resolved = tree
                .resolve(Path::new(&path))
                .map_err(|e| raise(e.into()))?;
            let mut ctx = ctx.borrow_mut();
            let normalized = ctx.line_ending.normalize(&text);
            ctx.buffer(&DocKey::File(resolved)).set_text(normalized);
            Ok(())
        })?,
    )?;

    let tree = Rc::clone(&host.tree);
    env.set(
        "workspace_root",
        lua.create_function(move |_, ()| {
            Ok(tree.root().map(|p| p.display().to_string()))
        })?,
    )?;

    let tree = Rc::clone(&host.tree);
    let walk_cancel = cancel.clone();
    env.set(
        "walk_files_top_down",
        lua.create_function(move |_, visitor: Function| {
            walk_files(tree.as_ref(), &walk_cancel, &visitor, walk_top_down)
        })?,
    )?;

    let tree = Rc::clone(&host.tree);
    let walk_cancel = cancel.clone();
    env.set(
        "walk_files_bottom_up",
        lua.create_function(move |_, visitor: Function| {
            walk_files(tree.as_ref(), &walk_cancel, &visitor, walk_bottom_up)
        })?,
    )?;

    // ---- outputs and logging ----

    let ctx = Rc::clone(context);
    env.set(
        "new_output",
        lua.create_function(move |_, ()| Ok(ctx.borrow_mut().new_output()))?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "set_output_text",
        lua.create_function(move |_, (index, value): (usize, Value)| {
            let text = expect_string("set_output_text", &value)?;
            let mut ctx = ctx.borrow_mut();
            if index >= ctx.output_count() {
                return Err(hard(format!("no output #{}; call new_output first", index)));
            }
            ctx.buffer(&DocKey::Output(index)).set_text(text);
            Ok(())
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "output_text",
        lua.create_function(move |_, index: usize| {
            let ctx = ctx.borrow();
            if index >= ctx.output_count() {
                return Err(hard(format!("no output #{}; call new_output first", index)));
            }
            Ok(ctx
                .staged(&DocKey::Output(index))
                .map(|b| b.text().to_string())
                .unwrap_or_default())
        })?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "output_count",
        lua.create_function(move |_, ()| Ok(ctx.borrow().output_count()))?,
    )?;

    let ctx = Rc::clone(context);
    env.set(
        "log",
        lua.create_function(move |_, values: Variadic<Value>| {
            let line = values
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join("\t");
            ctx.borrow_mut().log(line);
            Ok(())
        })?,
    )?;
    env.set("print", env.get::<Value>("log")?)?;

    // ---- control flow ----

    env.set(
        "exit",
        lua.create_function(|_, reason: Option<String>| -> mlua::Result<()> {
            Err(soft(reason.unwrap_or_else(|| "macro exited".to_string())))
        })?,
    )?;

    let prompter = Rc::clone(&host.prompter);
    env.set(
        "input",
        lua.create_function(move |_, prompt: Option<String>| {
            prompter
                .input(prompt.as_deref().unwrap_or("input"))
                .ok_or_else(|| soft("input cancelled"))
        })?,
    )?;

    let sleep_cancel = cancel.clone();
    env.set(
        "sleep",
        lua.create_function(move |_, milliseconds: u64| {
            timers::sleep(&sleep_cancel, milliseconds);
            if sleep_cancel.is_cancelled() {
                return Err(soft(CANCELLED_MESSAGE));
            }
            Ok(())
        })?,
    )?;

    let poll_cancel = cancel.clone();
    env.set(
        "is_cancelled",
        lua.create_function(move |_, ()| Ok(poll_cancel.is_cancelled()))?,
    )?;

    // ---- timers ----

    let store = Rc::clone(timers);
    env.set(
        "set_timeout",
        lua.create_function(move |_, (callback, milliseconds): (Function, Option<u64>)| {
            Ok(store
                .borrow_mut()
                .set_timeout(callback, milliseconds.unwrap_or(0))
                .as_u64())
        })?,
    )?;

    let store = Rc::clone(timers);
    env.set(
        "set_interval",
        lua.create_function(move |_, (callback, milliseconds): (Function, Option<u64>)| {
            Ok(store
                .borrow_mut()
                .set_interval(callback, milliseconds.unwrap_or(0))
                .as_u64())
        })?,
    )?;

    let store = Rc::clone(timers);
    let clear = lua.create_function(move |_, id: u64| {
        Ok(store.borrow_mut().clear(TimerId::from_u64(id)))
    })?;
    // timeouts and intervals share one id space, so one clear serves both
    env.set("clear_timeout", clear.clone())?;
    env.set("clear_interval", clear)?;

    Ok(env)
}

type WalkFn = fn(
    &dyn FileTree,
    &mut dyn FnMut(&Path) -> Result<Option<Value>, mlua::Error>,
) -> Result<Option<Value>, WalkError<mlua::Error>>;

fn walk_files(
    tree: &dyn FileTree,
    cancel: &CancelSignal,
    visitor: &Function,
    walk: WalkFn,
) -> mlua::Result<Value> {
    let mut visit = |path: &Path| -> Result<Option<Value>, mlua::Error> {
        if cancel.is_cancelled() {
            return Err(soft(CANCELLED_MESSAGE));
        }
        let result = visitor.call::<Value>(path.display().to_string())?;
        Ok(if result.is_nil() { None } else { Some(result) })
    };
    match walk(tree, &mut visit) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Ok(Value::Nil),
        Err(WalkError::Host(e)) => Err(raise(e.into())),
        Err(WalkError::Visitor(e)) => Err(e),
    }
}
