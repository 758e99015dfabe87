//! Core data types shared by every subsystem: the `Value` tagged union that
//! backs the `inserts` variable environment, and the `Program`/`Task`/`State`
//! shapes produced by loading a program file (spec.md §3).

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{InterpolationFault, ProgramError};

/// Runtime value stored under an insert key. Tagged union rather than a
/// bare `serde_json::Value` so arithmetic and list operations can match on
/// shape without re-deciding "is this an object or an array" at every call
/// site (spec.md §3.3, §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Stringify for interpolation. Only scalar values are stringifiable;
    /// lists and maps raise a `WrongType` fault (spec.md §4.3/§4.4).
    pub fn as_interpolated_str(&self, key: &str) -> Result<String, InterpolationFault> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::List(_) | Value::Map(_) => Err(InterpolationFault::WrongType {
                key: key.to_string(),
            }),
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert from a parsed JSON5 fragment (task fields are authored as
    /// JSON5 literals before interpolation substitutes strings in).
    pub fn from_json(value: &Json) -> Value {
        match value {
            Json::String(s) => Value::Str(s.clone()),
            Json::Number(n) if n.is_i64() => Value::Int(n.as_i64().unwrap()),
            Json::Number(n) => Value::Str(n.to_string()),
            Json::Bool(b) => Value::Str(b.to_string()),
            Json::Null => Value::Str(String::new()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), Value::from_json(v));
                }
                Value::Map(out)
            }
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Str(s) => Json::String(s.clone()),
            Value::Int(i) => Json::Number((*i).into()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json());
                }
                Json::Object(out)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::List(_) | Value::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// A single task record as it appears in the program file, after JSON5
/// parsing and line-number injection (spec.md §3.2, §6.2) but before
/// interpolation. `cmd` and `line` are hoisted out for dispatch; everything
/// else stays in `fields` (including `name`, for `label`/`goto`/`for`'s
/// iteration-variable map) so the executor can look up task-kind-specific
/// keys without a second parse pass.
///
/// `parent_label` is the slash-joined traceback prefix inherited from an
/// enclosing `serial`/`for`/`parallel_*` task, so `traceback_label` renders
/// `"<cmd>-<line>"` at top level and `"<parent>/<cmd>-<line>"` when nested
/// (spec.md §3.3).
#[derive(Debug, Clone)]
pub struct Task {
    pub index: usize,
    pub line: u32,
    pub cmd: String,
    pub fields: serde_json::Map<String, Json>,
    pub parent_label: Option<String>,
}

impl Task {
    pub fn traceback_label(&self) -> String {
        let own = format!("{}-{}", self.cmd, self.line);
        match &self.parent_label {
            Some(parent) => format!("{parent}/{own}"),
            None => own,
        }
    }

    /// The `name` a `label` task registers for `goto`/`goto_map` targeting.
    pub fn label_name(&self) -> Option<&str> {
        if self.cmd == "label" {
            self.fields.get("name").and_then(Json::as_str)
        } else {
            None
        }
    }

    pub fn field(&self, key: &str) -> Option<&Json> {
        self.fields.get(key)
    }

    pub fn require_field<'a>(&'a self, key: &str) -> Result<&'a Json, ProgramError> {
        self.fields
            .get(key)
            .ok_or_else(|| ProgramError::structural(self.traceback_label(), format!("missing required field '{key}' for cmd '{}'", self.cmd)))
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ProgramError> {
        self.require_field(key)?.as_str().ok_or_else(|| {
            ProgramError::structural(
                self.traceback_label(),
                format!("field '{key}' must be a string for cmd '{}'", self.cmd),
            )
        })
    }

    pub fn require_list<'a>(&'a self, key: &str) -> Result<&'a Vec<Json>, ProgramError> {
        self.require_field(key)?.as_array().ok_or_else(|| {
            ProgramError::structural(
                self.traceback_label(),
                format!("field '{key}' must be a list for cmd '{}'", self.cmd),
            )
        })
    }

    pub fn require_object<'a>(&'a self, key: &str) -> Result<&'a serde_json::Map<String, Json>, ProgramError> {
        self.require_field(key)?.as_object().ok_or_else(|| {
            ProgramError::structural(
                self.traceback_label(),
                format!("field '{key}' must be an object for cmd '{}'", self.cmd),
            )
        })
    }

    /// Re-root this task under a new parent traceback label, used when a
    /// `run_task` dispatches into a `named_tasks` entry: the subtask's own
    /// traceback becomes `"<run_task label>/<subtask label>"` (spec.md
    /// §3.3).
    pub fn with_parent_label(mut self, parent_label: String) -> Task {
        self.parent_label = Some(parent_label);
        self
    }

    /// Build a `Task` from a nested task object (a `serial`/`for`/etc.
    /// body entry), tagging it with the enclosing task's traceback label
    /// as its `parent_label` (spec.md §3.3's slash-joined nesting) and
    /// inheriting `line` from the parent when the nested object doesn't
    /// carry its own (it always should, since `add_line_numbers` stamps
    /// every `cmd` field, but defensive anyway).
    pub fn from_json(json: &Json, index: usize, default_line: u32, parent_label: Option<String>) -> Result<Task, ProgramError> {
        let obj = json
            .as_object()
            .ok_or_else(|| ProgramError::structural(format!("task #{index}"), "nested task must be an object"))?;
        let cmd = obj
            .get("cmd")
            .and_then(Json::as_str)
            .ok_or_else(|| ProgramError::structural(format!("task #{index}"), "nested task is missing 'cmd'"))?
            .to_string();
        let line = obj.get("line").and_then(Json::as_u64).map(|n| n as u32).unwrap_or(default_line);
        let mut fields = obj.clone();
        fields.remove("cmd");
        Ok(Task {
            index,
            line,
            cmd,
            fields,
            parent_label,
        })
    }
}

/// The seed state every fresh run starts from (spec.md §3.1's
/// `default_state`): just the initial `inserts` map. `output`/cursor/
/// order-index bookkeeping are runtime-only and start empty regardless.
#[derive(Debug, Clone, Default)]
pub struct DefaultState {
    pub inserts: IndexMap<String, Value>,
}

/// One of the nine `save_states` slots (spec.md §3.1, §3.5, §6.4): a
/// user-supplied label plus the full state snapshot at save time.
#[derive(Debug, Clone)]
pub struct SaveSlot {
    pub label: String,
    pub state: State,
}

/// A fully loaded, line-numbered program: the top-level `order` sequence,
/// the `named_tasks` table `run_task` dispatches into, the seed state, any
/// saved snapshots, and default chat completion arguments (spec.md §3.1).
/// `labels` indexes `order`'s own `label` tasks for O(1) top-level `goto`
/// resolution; nested bodies resolve their own labels locally, since a
/// label's scope is its containing sequence (spec.md §3.4).
#[derive(Debug, Clone)]
pub struct Program {
    pub order: Vec<Task>,
    pub named_tasks: IndexMap<String, Task>,
    pub default_state: DefaultState,
    pub save_states: IndexMap<String, SaveSlot>,
    pub completion_args: serde_json::Map<String, Json>,
    pub labels: BTreeMap<String, usize>,
}

impl Program {
    pub fn task_for_label(&self, label: &str) -> Option<&Task> {
        self.labels.get(label).map(|&i| &self.order[i])
    }
}

/// Bookkeeping for a `for` loop's nested cursor, persisted under the
/// synthetic `order_index/<label>` state keys so a saved-and-resumed
/// program can re-enter mid-body (spec.md §4.7, §5 "Resumability").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderIndex {
    pub counter: i64,
    pub items: Vec<Value>,
}

/// Everything about an in-progress (or resumed) run besides the program
/// text itself: the insert environment, the accumulated visible output
/// (replayed verbatim on load, spec.md §3.2), and the task cursors.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub inserts: IndexMap<String, Value>,
    pub output: String,
    pub cursor: usize,
    pub order_indices: IndexMap<String, OrderIndex>,
}

impl State {
    /// Plain insert lookup. Synthetic `order_index/<label>` keys, `ARG<n>`,
    /// and `HH:MM`/`HH:MM:SS` are resolved separately by the interpolation
    /// resolver (spec.md §4.4), since their value is either derived or
    /// process-global rather than stored in `inserts`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inserts.get(key)
    }

    pub fn seeded_from(default_state: &DefaultState) -> Self {
        Self {
            inserts: default_state.inserts.clone(),
            output: String::new(),
            cursor: 0,
            order_indices: IndexMap::new(),
        }
    }
}
