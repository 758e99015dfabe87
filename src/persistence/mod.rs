//! Program loading and insert persistence (spec.md §6.2, §6.4, §6.5).
//!
//! `load` parses a program file (permissive JSON5, per spec.md §6.2),
//! injecting a `line: N` field into every task so traceback labels can
//! cite source lines, and caches the parsed `Program` keyed by an MD5
//! hash of the raw file content so a `run_task`-triggered reload of the
//! same unchanged file is free. `save` splices a single key's new value
//! back into the original file text in place, preserving everything else
//! byte-for-byte, via `splice_key_into_json5`.
//!
//! Ported from `add_line_numbers`, `load`, `save`, and
//! `splice_key_into_json5` in
//! `examples/original_source/src/interpolation_engine/interpolation_engine.py:820-873,2016-2064`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use indexmap::IndexMap;
use md5::{Digest, Md5};
use regex_lite::Regex;
use serde_json::Value as Json;

use crate::ast::{DefaultState, OrderIndex, Program, SaveSlot, State, Task, Value};
use crate::error::ProgramError;

lazy_static::lazy_static! {
    static ref CMD_LINE_RE: Regex = Regex::new(r#"['"]cmd['"]\s*:\s*['"][A-Za-z_][A-Za-z0-9_]*['"]"#).unwrap();
    static ref LOAD_CACHE: Mutex<BTreeMap<String, Program>> = Mutex::new(BTreeMap::new());
}

fn content_hash(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Inject `, line: N` immediately after each `cmd: "..."` field, one scan
/// per physical line (so line numbers reported in tracebacks match what a
/// human sees in an editor).
pub fn add_line_numbers(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.lines().count() * 12);
    for (i, line) in source.lines().enumerate() {
        let line_no = i + 1;
        if let Some(m) = CMD_LINE_RE.find(line) {
            out.push_str(&line[..m.end()]);
            out.push_str(&format!(", line: {line_no}"));
            out.push_str(&line[m.end()..]);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn parse_task(json: &Json, index: usize) -> Result<Task, ProgramError> {
    Task::from_json(json, index, 0, None)
}

fn parse_inserts(json: Option<&Json>) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    if let Some(Json::Object(map)) = json {
        for (k, v) in map {
            out.insert(k.clone(), Value::from_json(v));
        }
    }
    out
}

fn parse_order_indices(json: Option<&Json>) -> IndexMap<String, OrderIndex> {
    let mut out = IndexMap::new();
    if let Some(Json::Object(map)) = json {
        for (k, v) in map {
            let counter = v.get("counter").and_then(Json::as_i64).unwrap_or(0);
            let items = v
                .get("items")
                .and_then(Json::as_array)
                .map(|a| a.iter().map(Value::from_json).collect())
                .unwrap_or_default();
            out.insert(k.clone(), OrderIndex { counter, items });
        }
    }
    out
}

fn parse_state(json: &Json) -> State {
    State {
        inserts: parse_inserts(json.get("inserts")),
        output: json.get("output").and_then(Json::as_str).unwrap_or_default().to_string(),
        cursor: json.get("order_index").and_then(Json::as_u64).unwrap_or(0) as usize,
        order_indices: parse_order_indices(json.get("order_indices")),
    }
}

/// Load and validate a program file, caching by content hash so repeated
/// loads of an unchanged file (e.g. via `run_task` re-entering the same
/// program) skip reparsing.
pub fn load(path: &Path) -> Result<Program, ProgramError> {
    let raw = fs::read_to_string(path).map_err(ProgramError::Io)?;
    let hash = content_hash(&raw);

    if let Some(cached) = LOAD_CACHE.lock().unwrap().get(&hash) {
        return Ok(cached.clone());
    }

    let numbered = add_line_numbers(&raw);
    let json: Json = json5::from_str(&numbered).map_err(|e| ProgramError::structural("<load>", format!("failed to parse program file: {e}")))?;

    let default_state_json = json
        .get("default_state")
        .ok_or_else(|| ProgramError::structural("<load>", "program file must have a top-level 'default_state' object"))?;
    let default_state = DefaultState {
        inserts: parse_inserts(default_state_json.get("inserts")),
    };

    let order_json = json
        .get("order")
        .and_then(Json::as_array)
        .ok_or_else(|| ProgramError::structural("<load>", "program file must have a top-level 'order' array"))?;
    let mut order = Vec::with_capacity(order_json.len());
    let mut labels = BTreeMap::new();
    for (i, t) in order_json.iter().enumerate() {
        let task = parse_task(t, i)?;
        if let Some(name) = task.label_name() {
            labels.insert(name.to_string(), i);
        }
        order.push(task);
    }

    let mut named_tasks = IndexMap::new();
    if let Some(Json::Object(map)) = json.get("named_tasks") {
        for (name, t) in map {
            named_tasks.insert(name.clone(), parse_task(t, 0)?);
        }
    }

    let mut save_states = IndexMap::new();
    if let Some(Json::Object(map)) = json.get("save_states") {
        for (slot, snapshot) in map {
            let label = snapshot.get("label").and_then(Json::as_str).unwrap_or_default().to_string();
            save_states.insert(slot.clone(), SaveSlot { label, state: parse_state(snapshot) });
        }
    }

    let completion_args = json.get("completion_args").and_then(Json::as_object).cloned().unwrap_or_default();

    let program = Program {
        order,
        named_tasks,
        default_state,
        save_states,
        completion_args,
        labels,
    };
    LOAD_CACHE.lock().unwrap().insert(hash, program.clone());
    Ok(program)
}

/// Splice a single top-level key's new JSON5-literal value back into the
/// original file text, finding the key by regex, measuring its value's
/// brace/bracket depth to find the end of the old value, and reusing the
/// indentation of the line the key starts on. No-ops (returns `false`) if
/// the new serialization is byte-identical to what's already on disk.
pub fn splice_key_into_json5(source: &str, key: &str, new_value_json5: &str) -> Result<(String, bool), ProgramError> {
    let key_re = Regex::new(&format!(r#"['"]?{}['"]?\s*:\s*"#, regex_lite::escape(key)))
        .map_err(|e| ProgramError::execution("<save>", e.to_string()))?;

    let m = key_re
        .find(source)
        .ok_or_else(|| ProgramError::execution("<save>", format!("key '{key}' not found in program file for splice")))?;

    let value_start = m.end();
    let end = find_value_end(source, value_start)?;

    let mut spliced = String::with_capacity(source.len());
    spliced.push_str(&source[..value_start]);
    spliced.push_str(new_value_json5);
    spliced.push_str(&source[end..]);

    let unchanged = &source[value_start..end] == new_value_json5;
    Ok((spliced, !unchanged))
}

/// Find the end of a JSON5 value starting at `start`: brace/bracket depth
/// scan for objects/arrays, quote scan for strings, or a scan to the next
/// unescaped `,`/`}`/`]`/newline for bare scalars.
fn find_value_end(source: &str, start: usize) -> Result<usize, ProgramError> {
    let bytes = source.as_bytes();
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(ProgramError::execution("<save>", "unexpected end of file while splicing"));
    }

    match bytes[i] {
        b'{' | b'[' => {
            let open = bytes[i];
            let close = if open == b'{' { b'}' } else { b']' };
            let mut depth = 0;
            let mut in_string: Option<u8> = None;
            let mut j = i;
            while j < bytes.len() {
                let b = bytes[j];
                if let Some(q) = in_string {
                    if b == b'\\' {
                        j += 1;
                    } else if b == q {
                        in_string = None;
                    }
                } else if b == b'"' || b == b'\'' {
                    in_string = Some(b);
                } else if b == open {
                    depth += 1;
                } else if b == close {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(j + 1);
                    }
                }
                j += 1;
            }
            Err(ProgramError::execution("<save>", "unbalanced braces while splicing"))
        }
        b'"' | b'\'' => {
            let quote = bytes[i];
            let mut j = i + 1;
            while j < bytes.len() {
                if bytes[j] == b'\\' {
                    j += 2;
                    continue;
                }
                if bytes[j] == quote {
                    return Ok(j + 1);
                }
                j += 1;
            }
            Err(ProgramError::execution("<save>", "unterminated string while splicing"))
        }
        _ => {
            let mut j = i;
            while j < bytes.len() && !matches!(bytes[j], b',' | b'}' | b']' | b'\n') {
                j += 1;
            }
            Ok(j)
        }
    }
}

/// Render a `State` snapshot as a JSON5 object literal suitable for
/// splicing into a `save_states/<slot>` value (spec.md §3.5, §6.4).
pub fn render_save_slot(slot: &SaveSlot) -> String {
    let mut inserts = serde_json::Map::with_capacity(slot.state.inserts.len());
    for (k, v) in &slot.state.inserts {
        inserts.insert(k.clone(), v.to_json());
    }
    let mut order_indices = serde_json::Map::with_capacity(slot.state.order_indices.len());
    for (k, oi) in &slot.state.order_indices {
        let mut entry = serde_json::Map::new();
        entry.insert("counter".to_string(), Json::Number(oi.counter.into()));
        entry.insert("items".to_string(), Json::Array(oi.items.iter().map(Value::to_json).collect()));
        order_indices.insert(k.clone(), Json::Object(entry));
    }
    let mut obj = serde_json::Map::new();
    obj.insert("label".to_string(), Json::String(slot.label.clone()));
    obj.insert("inserts".to_string(), Json::Object(inserts));
    obj.insert("output".to_string(), Json::String(slot.state.output.clone()));
    obj.insert("order_index".to_string(), Json::Number((slot.state.cursor as u64).into()));
    obj.insert("order_indices".to_string(), Json::Object(order_indices));
    serde_json::to_string_pretty(&Json::Object(obj)).unwrap_or_default()
}

/// Render the whole `save_states` table (all nine slots, not just the one
/// just written) as a single JSON5 object literal — `save()` splices the
/// entire table back in one shot (`interpolation_engine.py:2064-2082`),
/// not just the changed slot.
fn render_save_states(save_states: &IndexMap<String, SaveSlot>) -> String {
    let mut obj = serde_json::Map::with_capacity(save_states.len());
    for (slot, state) in save_states {
        let rendered: Json = json5::from_str(&render_save_slot(state)).unwrap_or(Json::Null);
        obj.insert(slot.clone(), rendered);
    }
    serde_json::to_string_pretty(&Json::Object(obj)).unwrap_or_default()
}

/// Splice the current `save_states` table back into the on-disk program
/// file at `path`, in place, leaving every other key untouched. No-ops if
/// the spliced content is unchanged from what's already on disk (mirrors
/// `save()`'s own hash-compare short-circuit).
pub fn save_program(path: &Path, save_states: &IndexMap<String, SaveSlot>) -> Result<(), ProgramError> {
    let raw = fs::read_to_string(path).map_err(ProgramError::Io)?;
    let rendered = render_save_states(save_states);
    let (spliced, changed) = splice_key_into_json5(&raw, "save_states", &rendered)?;
    if changed {
        fs::write(path, spliced).map_err(ProgramError::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn injects_line_numbers_after_cmd_field() {
        let src = "{order: [\n  {cmd: 'print', text: 'hi'},\n]}";
        let numbered = add_line_numbers(src);
        assert!(numbered.contains("cmd: 'print', line: 2"));
    }

    #[test]
    fn splice_replaces_scalar_value() {
        let src = "{order: [], counter: 5, done: false}";
        let (spliced, changed) = splice_key_into_json5(src, "counter", "6").unwrap();
        assert!(changed);
        assert!(spliced.contains("counter: 6"));
        assert!(spliced.contains("done: false"));
    }

    #[test]
    fn splice_is_noop_when_value_unchanged() {
        let src = "{counter: 5}";
        let (_, changed) = splice_key_into_json5(src, "counter", "5").unwrap();
        assert!(!changed);
    }

    #[test]
    fn splice_replaces_nested_object_value() {
        let src = "{save_states: {a: 1, b: 2}, other: true}";
        let (spliced, _) = splice_key_into_json5(src, "save_states", "{a: 9}").unwrap();
        assert_eq!(spliced, "{save_states: {a: 9}, other: true}");
    }

    #[test]
    fn load_parses_minimal_program_from_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.json5");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "{{default_state: {{inserts: {{}}}}, save_states: {{}}, named_tasks: {{}}, order: [{{cmd: 'print', text: 'hi'}}]}}"
        )
        .unwrap();
        let program = load(&path).unwrap();
        assert_eq!(program.order.len(), 1);
        assert_eq!(program.order[0].cmd, "print");
        assert_eq!(program.order[0].line, 1);
    }

    #[test]
    fn load_builds_label_index_from_label_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.json5");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "{{default_state: {{inserts: {{}}}}, save_states: {{}}, named_tasks: {{}}, order: [{{cmd: 'label', name: 'start'}}, {{cmd: 'print', text: 'hi'}}]}}"
        )
        .unwrap();
        let program = load(&path).unwrap();
        assert_eq!(program.labels.get("start"), Some(&0));
    }
}
