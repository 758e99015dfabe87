//! List-manipulation task kinds (`list_join`, `list_concat`, `list_append`,
//! `list_remove`, `list_index`, `list_slice`) — the pieces of spec.md
//! §4.7's task vocabulary that operate on `Value::List` inserts. Split out
//! of `executor/mod.rs` purely to keep that file's dispatch table
//! readable; these all run synchronously against `self.state`.
//!
//! Ported from the `list_*` cases in
//! `examples/original_source/src/interpolation_engine/interpolation_engine.py:1358-1409`.

use crate::ast::Task;
use crate::ast::Value;
use crate::error::ProgramError;
use crate::interpolation;

use super::Executor;
use super::Flow;

fn require_list_field(exec: &Executor, task: &Task, key: &str) -> Result<Vec<Value>, ProgramError> {
    let json = interpolated_field(exec, task, key)?;
    let list = match &json {
        serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
        _ => {
            return Err(ProgramError::execution(
                task.traceback_label(),
                format!("'{key}' field for cmd '{}' must be a list", task.cmd),
            ))
        }
    };
    Ok(list)
}

fn interpolated_field(exec: &Executor, task: &Task, key: &str) -> Result<serde_json::Value, ProgramError> {
    let raw = task.require_field(key)?;
    interpolation::interpolate_json(raw, &exec.resolver(), &task.traceback_label())
}

fn interpolated_str(exec: &Executor, task: &Task, key: &str) -> Result<String, ProgramError> {
    let json = interpolated_field(exec, task, key)?;
    Ok(match json {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

pub fn list_join(exec: &mut Executor, task: &Task) -> Result<Flow, ProgramError> {
    let list = require_list_field(exec, task, "list")?;
    let before = interpolated_str(exec, task, "before")?;
    let between = interpolated_str(exec, task, "between")?;
    let after = interpolated_str(exec, task, "after")?;
    let output_name = task.require_str("output_name")?.to_string();
    let joined = list.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(&between);
    exec.state.inserts.insert(output_name, Value::Str(format!("{before}{joined}{after}")));
    Ok(Flow::Continue)
}

pub fn list_concat(exec: &mut Executor, task: &Task) -> Result<Flow, ProgramError> {
    let lists_json = interpolated_field(exec, task, "lists")?;
    let lists = lists_json.as_array().ok_or_else(|| ProgramError::execution(task.traceback_label(), "'lists' field must be a list of lists"))?;
    let mut out = Vec::new();
    for entry in lists {
        let items = entry.as_array().ok_or_else(|| ProgramError::execution(task.traceback_label(), "'lists' entries must each be a list"))?;
        out.extend(items.iter().map(Value::from_json));
    }
    let output_name = task.require_str("output_name")?.to_string();
    exec.state.inserts.insert(output_name, Value::List(out));
    Ok(Flow::Continue)
}

pub fn list_append(exec: &mut Executor, task: &Task) -> Result<Flow, ProgramError> {
    let mut list = require_list_field(exec, task, "list")?;
    let item = Value::from_json(&interpolated_field(exec, task, "item")?);
    list.push(item);
    let output_name = task.require_str("output_name")?.to_string();
    exec.state.inserts.insert(output_name, Value::List(list));
    Ok(Flow::Continue)
}

/// Tolerates an absent item: removing a value that isn't present leaves
/// the list unchanged rather than erroring (mirrors the original's
/// `except ValueError: pass`).
pub fn list_remove(exec: &mut Executor, task: &Task) -> Result<Flow, ProgramError> {
    let mut list = require_list_field(exec, task, "list")?;
    let item = Value::from_json(&interpolated_field(exec, task, "item")?);
    if let Some(pos) = list.iter().position(|v| v == &item) {
        list.remove(pos);
    }
    let output_name = task.require_str("output_name")?.to_string();
    exec.state.inserts.insert(output_name, Value::List(list));
    Ok(Flow::Continue)
}

/// Parse an `index`-like field that may already be an integer, or a
/// string (when it comes from a `math` result insert) that parses as one.
fn int_field(exec: &Executor, task: &Task, key: &str) -> Result<i64, ProgramError> {
    let json = interpolated_field(exec, task, key)?;
    match json {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ProgramError::execution(task.traceback_label(), format!("'{key}' field for cmd '{}' is not an integer", task.cmd))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ProgramError::execution(task.traceback_label(), format!("'{key}' field '{s}' is not an integer"))),
        _ => Err(ProgramError::execution(task.traceback_label(), format!("'{key}' field for cmd '{}' must be an int or string", task.cmd))),
    }
}

/// Convert a 1-based, possibly-negative program index into a 0-based
/// Rust index (spec.md §4.7: "unlike python, order indexing is
/// 1-based"). Negative indices count from the tail using plain Python
/// semantics (`len + index`), not the interpolation resolver's separate
/// `len + index + 1` convention for slice bounds.
fn zero_based(index: i64, len: i64) -> i64 {
    if index > 0 {
        index - 1
    } else {
        len + index
    }
}

pub fn list_index(exec: &mut Executor, task: &Task) -> Result<Flow, ProgramError> {
    let list = require_list_field(exec, task, "list")?;
    let len = list.len() as i64;
    let index = int_field(exec, task, "index")?;
    let zi = zero_based(index, len);
    if zi < 0 || zi >= len {
        return Err(ProgramError::execution(task.traceback_label(), format!("list_index index {index} out of range for a list of length {len}")));
    }
    let output_name = task.require_str("output_name")?.to_string();
    exec.state.inserts.insert(output_name, list[zi as usize].clone());
    Ok(Flow::Continue)
}

pub fn list_slice(exec: &mut Executor, task: &Task) -> Result<Flow, ProgramError> {
    let list = require_list_field(exec, task, "list")?;
    let len = list.len() as i64;
    let from_index = int_field(exec, task, "from_index")?;
    let to_index = int_field(exec, task, "to_index")?;

    let lo = zero_based(from_index, len);
    let hi = if to_index == 0 { 0 } else { zero_based(to_index, len) } + 1;

    let lo = lo.clamp(0, len);
    let hi = hi.clamp(0, len);
    let slice = if lo >= hi { Vec::new() } else { list[lo as usize..hi as usize].to_vec() };

    let output_name = task.require_str("output_name")?.to_string();
    exec.state.inserts.insert(output_name, Value::List(slice));
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Program, State};
    use crate::executor::Cancellation;
    use indexmap::IndexMap;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn make_executor() -> Executor {
        let program = Program {
            order: Vec::new(),
            named_tasks: IndexMap::new(),
            default_state: Default::default(),
            save_states: IndexMap::new(),
            completion_args: serde_json::Map::new(),
            labels: Default::default(),
        };
        let io: Arc<dyn crate::io::IOManager> = Arc::new(crate::io::agent::AgentIo::new(std::env::temp_dir()));
        let (_tx, rx) = watch::channel(Cancellation::None);
        Executor::new(program, State::default(), Vec::new(), io, rx)
    }

    fn task(cmd: &str, fields: serde_json::Map<String, serde_json::Value>) -> Task {
        Task { index: 0, line: 1, cmd: cmd.to_string(), fields, parent_label: None }
    }

    #[test]
    fn join_wraps_with_before_between_after() {
        let mut exec = make_executor();
        exec.state.inserts.insert("l".into(), Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]));
        let mut fields = serde_json::Map::new();
        fields.insert("list".into(), serde_json::json!("{l}"));
        fields.insert("before".into(), serde_json::json!("["));
        fields.insert("between".into(), serde_json::json!(", "));
        fields.insert("after".into(), serde_json::json!("]"));
        fields.insert("output_name".into(), serde_json::json!("out"));
        let t = task("list_join", fields);
        list_join(&mut exec, &t).unwrap();
        assert_eq!(exec.state.inserts.get("out"), Some(&Value::Str("[a, b]".into())));
    }

    #[test]
    fn remove_tolerates_absent_item() {
        let mut exec = make_executor();
        exec.state.inserts.insert("l".into(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        let mut fields = serde_json::Map::new();
        fields.insert("list".into(), serde_json::json!("{l}"));
        fields.insert("item".into(), serde_json::json!(99));
        fields.insert("output_name".into(), serde_json::json!("out"));
        let t = task("list_remove", fields);
        list_remove(&mut exec, &t).unwrap();
        assert_eq!(exec.state.inserts.get("out"), Some(&Value::List(vec![Value::Int(1), Value::Int(2)])));
    }

    #[test]
    fn index_is_one_based_with_negative_tail_support() {
        let mut exec = make_executor();
        exec.state.inserts.insert("l".into(), Value::List(vec![Value::Int(10), Value::Int(20), Value::Int(30)]));
        let mut fields = serde_json::Map::new();
        fields.insert("list".into(), serde_json::json!("{l}"));
        fields.insert("index".into(), serde_json::json!(-1));
        fields.insert("output_name".into(), serde_json::json!("out"));
        let t = task("list_index", fields);
        list_index(&mut exec, &t).unwrap();
        assert_eq!(exec.state.inserts.get("out"), Some(&Value::Int(30)));
    }

    #[test]
    fn slice_is_left_right_inclusive() {
        let mut exec = make_executor();
        exec.state.inserts.insert("l".into(), Value::List((1..=5).map(Value::Int).collect()));
        let mut fields = serde_json::Map::new();
        fields.insert("list".into(), serde_json::json!("{l}"));
        fields.insert("from_index".into(), serde_json::json!(2));
        fields.insert("to_index".into(), serde_json::json!(4));
        fields.insert("output_name".into(), serde_json::json!("out"));
        let t = task("list_slice", fields);
        list_slice(&mut exec, &t).unwrap();
        assert_eq!(exec.state.inserts.get("out"), Some(&Value::List(vec![Value::Int(2), Value::Int(3), Value::Int(4)])));
    }
}
