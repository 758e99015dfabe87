//! Static program validator (spec.md §4.6): walks every task before
//! execution begins and rejects structurally invalid programs up front
//! rather than failing mid-run. Ported from `validate_program`
//! (`examples/original_source/src/interpolation_engine/interpolation_engine.py:884-1289`).
//!
//! This is a simplified port: it checks known-cmd membership, per-cmd
//! required fields, and `goto`/`goto_map` label existence, but does not
//! reproduce the original's full key-reachability data-flow analysis
//! (tracing which inserts are guaranteed to exist at each point) — see
//! DESIGN.md.

use std::collections::BTreeSet;

use serde_json::Value as Json;

use crate::ast::{Program, Task};
use crate::error::ProgramError;

const KNOWN_CMDS: &[&str] = &[
    "set", "unescape", "list_join", "list_concat", "list_append", "list_remove", "list_index",
    "list_slice", "print", "clear", "sleep", "show_inserts", "user_input", "user_choice",
    "random_choice", "label", "goto", "goto_map", "serial", "parallel_wait", "parallel_race",
    "for", "run_task", "replace_map", "await_insert", "delete", "delete_except", "math", "chat",
];

/// Validate a loaded program: unique top-level labels, then every task
/// (both `order` and each `named_tasks` entry) against its cmd's required
/// fields.
pub fn validate_program(program: &Program) -> Result<(), ProgramError> {
    validate_unique_labels(program)?;
    for task in &program.order {
        validate_task(task, program)?;
    }
    for task in program.named_tasks.values() {
        validate_task(task, program)?;
    }
    Ok(())
}

fn validate_unique_labels(program: &Program) -> Result<(), ProgramError> {
    let mut seen = BTreeSet::new();
    for task in &program.order {
        if let Some(label) = task.label_name() {
            if !seen.insert(label.to_string()) {
                return Err(ProgramError::structural(task.traceback_label(), format!("duplicate label '{label}'")));
            }
        }
    }
    Ok(())
}

fn validate_task(task: &Task, program: &Program) -> Result<(), ProgramError> {
    if !KNOWN_CMDS.contains(&task.cmd.as_str()) {
        return Err(ProgramError::structural(task.traceback_label(), format!("unknown cmd '{}'", task.cmd)));
    }

    match task.cmd.as_str() {
        "set" | "unescape" => require_fields(task, &["item", "output_name"])?,
        "list_join" => require_fields(task, &["list", "output_name"])?,
        "list_concat" => require_fields(task, &["lists", "output_name"])?,
        "list_append" | "list_remove" => require_fields(task, &["list", "item", "output_name"])?,
        "list_index" => require_fields(task, &["list", "index", "output_name"])?,
        "list_slice" => require_fields(task, &["list", "output_name"])?,
        "print" => require_fields(task, &["text"])?,
        "sleep" => require_fields(task, &["seconds"])?,
        "user_input" | "user_choice" => require_fields(task, &["output_name"])?,
        "random_choice" => require_fields(task, &["list", "output_name"])?,
        "label" => require_fields(task, &["name"])?,
        "goto" => {
            let target = task.require_str("name")?;
            if program.task_for_label(target).is_none() && !target.contains('{') {
                return Err(ProgramError::structural(task.traceback_label(), format!("goto target label '{target}' does not exist")));
            }
        }
        "goto_map" => {
            require_fields(task, &["text", "target_maps"])?;
            let maps = task.require_list("target_maps")?;
            for entry in maps {
                let obj = entry.as_object().ok_or_else(|| {
                    ProgramError::structural(task.traceback_label(), "'target_maps' entries must be single-key objects")
                })?;
                for (pattern, target) in obj {
                    if let Some(label) = target.as_str() {
                        if program.task_for_label(label).is_none() && !pattern.contains('*') && !label.contains('{') {
                            return Err(ProgramError::structural(
                                task.traceback_label(),
                                format!("goto_map target label '{label}' does not exist"),
                            ));
                        }
                    }
                }
            }
        }
        "replace_map" => {
            require_fields(task, &["item", "output_name", "wildcard_maps"])?;
            let maps = task.require_list("wildcard_maps")?;
            for entry in maps {
                if !entry.is_object() {
                    return Err(ProgramError::structural(task.traceback_label(), "'wildcard_maps' entries must be single-key objects"));
                }
            }
        }
        "serial" | "parallel_wait" | "parallel_race" => {
            let tasks = task.require_list("tasks")?;
            validate_nested(tasks, task, program)?;
        }
        "for" => {
            require_fields(task, &["name_list_map", "tasks"])?;
            if !matches!(task.field("name_list_map"), Some(Json::Object(_))) {
                return Err(ProgramError::structural(task.traceback_label(), "'name_list_map' must be an object mapping item names to list fields"));
            }
            let tasks = task.require_list("tasks")?;
            validate_nested(tasks, task, program)?;
        }
        "run_task" => {
            let name = task.require_str("task_name")?;
            if program.named_tasks.get(name).is_none() && !name.contains('{') {
                return Err(ProgramError::structural(task.traceback_label(), format!("run_task target '{name}' not found in named_tasks")));
            }
        }
        "await_insert" => require_fields(task, &["name"])?,
        "delete" | "delete_except" => require_fields(task, &["wildcards"])?,
        "math" => require_fields(task, &["input", "output_name"])?,
        "chat" => require_fields(task, &["messages", "output_name"])?,
        "clear" | "show_inserts" => {}
        _ => unreachable!("unknown cmd already rejected above"),
    }

    Ok(())
}

fn validate_nested(tasks: &[Json], parent: &Task, program: &Program) -> Result<(), ProgramError> {
    for (i, t) in tasks.iter().enumerate() {
        let nested_task = Task::from_json(t, parent.index, parent.line, Some(parent.traceback_label()))
            .map_err(|_| ProgramError::structural(parent.traceback_label(), format!("nested task #{i} in '{}' is malformed", parent.cmd)))?;
        validate_task(&nested_task, program)?;
    }
    Ok(())
}

fn require_fields(task: &Task, keys: &[&str]) -> Result<(), ProgramError> {
    for key in keys {
        if task.field(key).is_none() {
            return Err(ProgramError::structural(
                task.traceback_label(),
                format!("cmd '{}' requires field '{key}'", task.cmd),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::DefaultState;
    use indexmap::IndexMap;
    use std::collections::BTreeMap;

    fn task(cmd: &str, fields: serde_json::Map<String, Json>) -> Task {
        Task {
            index: 0,
            line: 1,
            cmd: cmd.to_string(),
            fields,
            parent_label: None,
        }
    }

    fn program(order: Vec<Task>) -> Program {
        let mut labels = BTreeMap::new();
        for (i, t) in order.iter().enumerate() {
            if let Some(l) = t.label_name() {
                labels.insert(l.to_string(), i);
            }
        }
        Program {
            order,
            named_tasks: IndexMap::new(),
            default_state: DefaultState::default(),
            save_states: IndexMap::new(),
            completion_args: serde_json::Map::new(),
            labels,
        }
    }

    #[test]
    fn rejects_unknown_cmd() {
        let p = program(vec![task("frobnicate", serde_json::Map::new())]);
        assert!(validate_program(&p).is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let p = program(vec![task("print", serde_json::Map::new())]);
        assert!(validate_program(&p).is_err());
    }

    #[test]
    fn accepts_minimal_valid_program() {
        let mut fields = serde_json::Map::new();
        fields.insert("text".to_string(), Json::String("hi".to_string()));
        let p = program(vec![task("print", fields)]);
        assert!(validate_program(&p).is_ok());
    }

    #[test]
    fn rejects_goto_to_unknown_label() {
        let mut fields = serde_json::Map::new();
        fields.insert("name".to_string(), Json::String("nowhere".to_string()));
        let p = program(vec![task("goto", fields)]);
        assert!(validate_program(&p).is_err());
    }

    #[test]
    fn rejects_duplicate_labels() {
        let mut f1 = serde_json::Map::new();
        f1.insert("name".to_string(), Json::String("dup".to_string()));
        let t1 = task("label", f1);
        let mut f2 = serde_json::Map::new();
        f2.insert("name".to_string(), Json::String("dup".to_string()));
        let t2 = task("label", f2);
        let p = program(vec![t1, t2]);
        assert!(validate_program(&p).is_err());
    }

    #[test]
    fn rejects_run_task_to_unknown_name() {
        let mut fields = serde_json::Map::new();
        fields.insert("task_name".to_string(), Json::String("missing".to_string()));
        let p = program(vec![task("run_task", fields)]);
        assert!(validate_program(&p).is_err());
    }
}
