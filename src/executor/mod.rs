//! Task executor (spec.md §4.7, Component G): the cooperative, single-
//! threaded-logically async scheduler that walks a `Program`'s task list,
//! dispatching each task by `cmd`, handling `goto`/`label` control flow,
//! and fanning out `serial`/`parallel_wait`/`parallel_race`/`for` bodies.
//!
//! Ported from `execute_task`'s per-`cmd` dispatch in
//! `examples/original_source/src/interpolation_engine/interpolation_engine.py:1331-1877`,
//! restructured around `tokio::task::JoinSet` for the two parallel forms
//! (spec.md §5), matching the teacher's preference for `tokio`'s
//! structured-concurrency primitives over manual `Arc<Mutex<_>>` fan-out.
//!
//! Label scope is "the same containing sequence" (spec.md §4.7): the
//! top-level `order` list has its own namespace (`Program::labels`), and
//! each `serial`/`for` body resolves `goto`/`goto_map` targets against its
//! own locally-built label index rather than the top level's.

mod chat;
mod list_ops;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::Value as Json;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::arithmetic;
use crate::ast::{OrderIndex, Program, SaveSlot, State, Task, Value};
use crate::error::ProgramError;
use crate::interpolation::{self, resolver::RuntimeResolver};
use crate::io::IOManager;
use crate::network::ChatClient;
use crate::persistence;

/// What to do after a task finishes running.
enum Flow {
    Continue,
    Goto(String),
    Terminate,
}

/// Signal broadcast to whichever task is currently running: a toggle-menu
/// request (SIGINT) or an unconditional stop (Ctrl-D / EOF), per spec.md
/// §5 "Cancellation".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    None,
    ToggleMenu,
    Terminate,
}

pub struct Executor {
    pub program: Program,
    pub state: State,
    pub args: Vec<String>,
    pub io: Arc<dyn IOManager>,
    pub chat_client: ChatClient,
    pub cancel: watch::Receiver<Cancellation>,
    pub retry_limit: u32,
    pub inserts_dir: Option<std::path::PathBuf>,
    pub program_path: Option<std::path::PathBuf>,
    last_seen_cancel: Cancellation,
}

impl Executor {
    pub fn new(program: Program, state: State, args: Vec<String>, io: Arc<dyn IOManager>, cancel: watch::Receiver<Cancellation>) -> Self {
        Self {
            program,
            state,
            args,
            io,
            chat_client: ChatClient::new(),
            cancel,
            retry_limit: 5,
            inserts_dir: None,
            program_path: None,
            last_seen_cancel: Cancellation::None,
        }
    }

    pub fn with_inserts_dir(mut self, dir: Option<std::path::PathBuf>) -> Self {
        self.inserts_dir = dir;
        self
    }

    pub fn with_program_path(mut self, path: Option<std::path::PathBuf>) -> Self {
        self.program_path = path;
        self
    }

    fn resolver(&self) -> RuntimeResolver<'_> {
        RuntimeResolver {
            state: &self.state,
            args: &self.args,
            inserts_dir: self.inserts_dir.as_deref(),
        }
    }

    fn check_cancelled(&self) -> Result<(), ProgramError> {
        match *self.cancel.borrow() {
            Cancellation::Terminate => Err(ProgramError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Run from `state.cursor` to completion (or cancellation/terminate).
    /// Returns normally when the task list is exhausted. A `ToggleMenu`
    /// signal pauses the loop and hands control to the IOManager's menu;
    /// `Resume` continues, `Save`/`Terminate` both stop the run here (the
    /// caller is responsible for persisting state on a normal return —
    /// spec.md §5's "Save" choice and "reached the end" are otherwise
    /// indistinguishable on purpose, since both leave `state` ready to
    /// be written back).
    pub async fn run(&mut self) -> Result<(), ProgramError> {
        loop {
            let current = *self.cancel.borrow();
            if current != self.last_seen_cancel {
                self.last_seen_cancel = current;
                if current == Cancellation::ToggleMenu {
                    match self.io.menu().await? {
                        crate::io::MenuChoice::Resume => {}
                        crate::io::MenuChoice::Save => self.save_state().await?,
                        crate::io::MenuChoice::Terminate => return Ok(()),
                    }
                }
            }
            self.check_cancelled()?;
            if self.state.cursor >= self.program.order.len() {
                return Ok(());
            }
            let task = self.program.order[self.state.cursor].clone();
            match self.dispatch(&task).await? {
                Flow::Continue => self.state.cursor += 1,
                Flow::Goto(target) => {
                    self.state.cursor = self
                        .program
                        .labels
                        .get(&target)
                        .copied()
                        .ok_or_else(|| ProgramError::execution(task.traceback_label(), format!("goto target label '{target}' does not exist at runtime")))?;
                }
                Flow::Terminate => return Ok(()),
            }
        }
    }

    /// Prompt for one of the nine save-state slots and a label, snapshot
    /// `self.state` into it, and splice the updated `save_states` table
    /// back into the on-disk program file (spec.md §5 "Save", §6.4).
    /// Ported from the "Save State" case of `main_menu`
    /// (`interpolation_engine.py:1804-1824`).
    async fn save_state(&mut self) -> Result<(), ProgramError> {
        let labels: Vec<String> = (1..=9)
            .map(|i| {
                self.program
                    .save_states
                    .get(&i.to_string())
                    .map(|s| s.label.clone())
                    .unwrap_or_else(|| "(Empty Slot)".to_string())
            })
            .collect();
        let slot_i = self.io.choice("Pick a save slot", &labels).await?;
        let save_label = self.io.input("What do you want to call this save state?\n> ").await?;
        let slot = (slot_i + 1).to_string();
        self.program.save_states.insert(
            slot,
            SaveSlot {
                label: save_label,
                state: self.state.clone(),
            },
        );
        if let Some(path) = &self.program_path {
            persistence::save_program(path, &self.program.save_states)?;
        }
        Ok(())
    }

    async fn dispatch(&mut self, task: &Task) -> Result<Flow, ProgramError> {
        let label = task.traceback_label();
        match task.cmd.as_str() {
            "label" => Ok(Flow::Continue),

            "set" => {
                let output_name = task.require_str("output_name")?.to_string();
                let value = self.interpolate_field(task, "item")?;
                self.state.inserts.insert(output_name, json_to_value(&value));
                Ok(Flow::Continue)
            }

            "unescape" => {
                let output_name = task.require_str("output_name")?.to_string();
                let item = self.interpolate_field(task, "item")?;
                self.state.inserts.insert(output_name, interpolation::recursive_unescape(&json_to_value(&item)));
                Ok(Flow::Continue)
            }

            "list_join" => list_ops::list_join(self, task),
            "list_concat" => list_ops::list_concat(self, task),
            "list_append" => list_ops::list_append(self, task),
            "list_remove" => list_ops::list_remove(self, task),
            "list_index" => list_ops::list_index(self, task),
            "list_slice" => list_ops::list_slice(self, task),

            "print" => {
                let text = self.interpolate_field_str(task, "text")?;
                self.io.output(&text).await;
                self.io.output("\n").await;
                self.state.output.push_str(&text);
                self.state.output.push('\n');
                Ok(Flow::Continue)
            }

            "clear" => {
                self.state.inserts.clear();
                Ok(Flow::Continue)
            }

            "sleep" => {
                let seconds = self.interpolate_field(task, "seconds")?;
                let secs = seconds.as_f64().unwrap_or(0.0).max(0.0);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                Ok(Flow::Continue)
            }

            "show_inserts" => {
                let dump: serde_json::Map<String, Json> = self.state.inserts.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                let text = serde_json::to_string_pretty(&Json::Object(dump)).unwrap_or_default();
                self.io.output(&text).await;
                self.io.output("\n").await;
                Ok(Flow::Continue)
            }

            "user_input" => {
                let output_name = task.require_str("output_name")?.to_string();
                let prompt = task.field("prompt").map(|_| self.interpolate_field_str(task, "prompt")).transpose()?.unwrap_or_default();
                let answer = self.io.input(&prompt).await?;
                self.state.inserts.insert(output_name, Value::Str(answer));
                Ok(Flow::Continue)
            }

            "user_choice" => {
                let output_name = task.require_str("output_name")?.to_string();
                let choices_json = task.require_list("list")?.clone();
                let mut choices = Vec::with_capacity(choices_json.len());
                for c in &choices_json {
                    choices.push(interpolation::interpolate_json(c, &self.resolver(), &label)?.as_str().unwrap_or_default().to_string());
                }
                let description = task.field("description").map(|_| self.interpolate_field_str(task, "description")).transpose()?.unwrap_or_default();
                let idx = self.io.choice(&description, &choices).await?;
                self.state.inserts.insert(output_name, Value::Str(choices.get(idx).cloned().unwrap_or_default()));
                Ok(Flow::Continue)
            }

            "random_choice" => {
                let output_name = task.require_str("output_name")?.to_string();
                let choices_json = task.require_list("list")?.clone();
                let mut rng = rand::thread_rng();
                let picked = choices_json.choose(&mut rng).ok_or_else(|| ProgramError::execution(&label, "random_choice requires a non-empty 'list'"))?;
                let interpolated = interpolation::interpolate_json(picked, &self.resolver(), &label)?;
                self.state.inserts.insert(output_name, json_to_value(&interpolated));
                Ok(Flow::Continue)
            }

            "goto" => {
                let target = self.interpolate_field_str(task, "name")?;
                Ok(Flow::Goto(target))
            }

            "goto_map" => {
                let (pattern, target) = self.resolve_wildcard_map(task, "text", "target_maps")?;
                match target {
                    Some(target) => Ok(Flow::Goto(target)),
                    None => Err(ProgramError::execution(&label, format!("goto_map value '{pattern}' matched no pattern and no 'NULL' fallback is defined"))),
                }
            }

            "replace_map" => {
                let output_name = task.require_str("output_name")?.to_string();
                let (_, replacement) = self.resolve_wildcard_map(task, "item", "wildcard_maps")?;
                let value = match replacement {
                    Some(target) => Value::Str(target),
                    None => Value::Str(String::new()),
                };
                self.state.inserts.insert(output_name, value);
                Ok(Flow::Continue)
            }

            "serial" => {
                let tasks = task.require_list("tasks")?.clone();
                self.run_body_serial(&tasks, task).await
            }

            "parallel_wait" => {
                let tasks = task.require_list("tasks")?.clone();
                self.run_body_parallel_wait(&tasks, task).await?;
                Ok(Flow::Continue)
            }

            "parallel_race" => {
                let tasks = task.require_list("tasks")?.clone();
                self.run_body_parallel_race(&tasks, task).await?;
                Ok(Flow::Continue)
            }

            "for" => self.run_for(task).await,

            "run_task" => {
                let name = self.interpolate_field_str(task, "task_name")?;
                let named = self
                    .program
                    .named_tasks
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| ProgramError::execution(&label, format!("run_task target '{name}' not found in named_tasks")))?;
                let named = named.with_parent_label(label.clone());
                match self.dispatch(&named).await? {
                    Flow::Continue => Ok(Flow::Continue),
                    Flow::Goto(target) => Err(ProgramError::execution(&label, format!("goto target '{target}' is not reachable from a run_task's top level"))),
                    Flow::Terminate => Ok(Flow::Terminate),
                }
            }

            "await_insert" => {
                let name = task.require_str("name")?.to_string();
                loop {
                    self.check_cancelled()?;
                    if self.state.inserts.contains_key(&name) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Ok(Flow::Continue)
            }

            "delete" => {
                let wildcards = self.interpolated_wildcards(task, "wildcards")?;
                let matching: Vec<String> = self.state.inserts.keys().filter(|k| wildcards.iter().any(|w| crate::wildcard::is_match(w, k))).cloned().collect();
                for k in matching {
                    self.state.inserts.shift_remove(&k);
                }
                Ok(Flow::Continue)
            }

            "delete_except" => {
                let wildcards = self.interpolated_wildcards(task, "wildcards")?;
                self.state.inserts.retain(|k, _| wildcards.iter().any(|w| crate::wildcard::is_match(w, k)));
                Ok(Flow::Continue)
            }

            "math" => {
                let expr = self.interpolate_field_str(task, "input")?;
                let output_name = task.require_str("output_name")?.to_string();
                let inserts = &self.state.inserts;
                let value = arithmetic::eval_math(&expr, &label, |name| {
                    inserts.get(name).and_then(Value::as_list).map(|list| list.iter().filter_map(Value::as_int).collect())
                })?;
                self.state.inserts.insert(output_name, Value::Int(value.parse().unwrap_or(0)));
                Ok(Flow::Continue)
            }

            "chat" => chat::execute_chat(self, task).await,

            other => Err(ProgramError::execution(&label, format!("unsupported cmd '{other}' reached the executor"))),
        }
    }

    /// Shared `goto_map`/`replace_map` resolution: both pick the
    /// best-matching wildcard pattern (with a literal `"NULL"` key as a
    /// guaranteed catch-all) against an interpolated text/item field, then
    /// interpolate (for `replace_map`) or return verbatim (for
    /// `goto_map`, whose value is always a label name) the matched
    /// entry's value (spec.md §4.7).
    fn resolve_wildcard_map(&self, task: &Task, text_field: &str, maps_field: &str) -> Result<(String, Option<String>), ProgramError> {
        let label = task.traceback_label();
        let text = self.interpolate_field_str(task, text_field)?;
        let entries = task.require_list(maps_field)?.clone();

        let mut patterns = Vec::with_capacity(entries.len());
        let mut lookup: BTreeMap<String, Json> = BTreeMap::new();
        for entry in &entries {
            let obj = entry.as_object().ok_or_else(|| ProgramError::structural(&label, format!("'{maps_field}' entries must be single-key objects")))?;
            for (pattern, target) in obj {
                patterns.push(pattern.clone());
                lookup.insert(pattern.clone(), target.clone());
            }
        }

        let chosen = crate::wildcard::best_match(patterns.iter().map(String::as_str), &text)
            .map(str::to_string)
            .or_else(|| lookup.contains_key("NULL").then(|| "NULL".to_string()));

        match chosen {
            Some(pattern) => {
                let raw = &lookup[&pattern];
                if maps_field == "target_maps" {
                    Ok((text, raw.as_str().map(str::to_string)))
                } else {
                    let interpolated = interpolation::interpolate_json(raw, &self.resolver(), &label)?;
                    let value = match interpolated {
                        Json::String(s) => s,
                        other => other.to_string(),
                    };
                    Ok((text, Some(value)))
                }
            }
            None => Ok((text, None)),
        }
    }

    fn interpolated_wildcards(&self, task: &Task, key: &str) -> Result<Vec<String>, ProgramError> {
        let label = task.traceback_label();
        let raw = task.require_list(key)?.clone();
        raw.iter()
            .map(|w| {
                let interpolated = interpolation::interpolate_json(w, &self.resolver(), &label)?;
                Ok(match interpolated {
                    Json::String(s) => s,
                    other => other.to_string(),
                })
            })
            .collect()
    }

    fn interpolate_field(&self, task: &Task, key: &str) -> Result<Json, ProgramError> {
        let raw = task.require_field(key)?;
        interpolation::interpolate_json(raw, &self.resolver(), &task.traceback_label())
    }

    fn interpolate_field_str(&self, task: &Task, key: &str) -> Result<String, ProgramError> {
        let value = self.interpolate_field(task, key)?;
        Ok(match value {
            Json::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Run a `serial` body as its own local sequence: labels declared
    /// inside it are resolved against a label index scoped to this body
    /// alone, so a `goto` inside a `serial` can only reach labels declared
    /// in that same `serial` (spec.md §4.7). A `Terminate` propagates up
    /// to the caller; it is not itself a label target.
    async fn run_body_serial(&mut self, tasks: &[Json], parent: &Task) -> Result<Flow, ProgramError> {
        let (built, labels) = self.build_local_sequence(tasks, parent)?;
        let mut cursor = 0usize;
        while cursor < built.len() {
            self.check_cancelled()?;
            match self.dispatch(&built[cursor]).await? {
                Flow::Continue => cursor += 1,
                Flow::Goto(target) => {
                    cursor = *labels
                        .get(&target)
                        .ok_or_else(|| ProgramError::execution(built[cursor].traceback_label(), format!("goto target label '{target}' not found in this sequence")))?;
                }
                Flow::Terminate => return Ok(Flow::Terminate),
            }
        }
        Ok(Flow::Continue)
    }

    fn build_local_sequence(&self, tasks: &[Json], parent: &Task) -> Result<(Vec<Task>, BTreeMap<String, usize>), ProgramError> {
        let parent_label = Some(parent.traceback_label());
        let mut built = Vec::with_capacity(tasks.len());
        let mut labels = BTreeMap::new();
        for (i, t) in tasks.iter().enumerate() {
            let nested = Task::from_json(t, parent.index, parent.line, parent_label.clone())?;
            if let Some(name) = nested.label_name() {
                labels.insert(name.to_string(), i);
            }
            built.push(nested);
        }
        Ok((built, labels))
    }

    async fn run_body_parallel_wait(&mut self, tasks: &[Json], parent: &Task) -> Result<(), ProgramError> {
        let parent_label = Some(parent.traceback_label());
        let mut set = JoinSet::new();
        for t in tasks {
            let nested = Task::from_json(t, parent.index, parent.line, parent_label.clone())?;
            let resolver_state = self.state.clone();
            let args = self.args.clone();
            let io = self.io.clone();
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let mut sub = Executor {
                    program: empty_program(),
                    state: resolver_state,
                    args,
                    io,
                    chat_client: ChatClient::new(),
                    cancel,
                    retry_limit: 5,
                    inserts_dir: None,
                    program_path: None,
                    last_seen_cancel: Cancellation::None,
                };
                sub.dispatch(&nested).await.map(|_| sub.state)
            });
        }
        while let Some(res) = set.join_next().await {
            let sub_state = res.map_err(|e| ProgramError::execution("<parallel_wait>", e.to_string()))??;
            merge_state(&mut self.state, sub_state);
        }
        Ok(())
    }

    async fn run_body_parallel_race(&mut self, tasks: &[Json], parent: &Task) -> Result<(), ProgramError> {
        let parent_label = Some(parent.traceback_label());
        let mut set = JoinSet::new();
        for t in tasks {
            let nested = Task::from_json(t, parent.index, parent.line, parent_label.clone())?;
            let resolver_state = self.state.clone();
            let args = self.args.clone();
            let io = self.io.clone();
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let mut sub = Executor {
                    program: empty_program(),
                    state: resolver_state,
                    args,
                    io,
                    chat_client: ChatClient::new(),
                    cancel,
                    retry_limit: 5,
                    inserts_dir: None,
                    program_path: None,
                    last_seen_cancel: Cancellation::None,
                };
                sub.dispatch(&nested).await.map(|_| sub.state)
            });
        }
        if let Some(res) = set.join_next().await {
            let sub_state = res.map_err(|e| ProgramError::execution("<parallel_race>", e.to_string()))??;
            merge_state(&mut self.state, sub_state);
        }
        set.abort_all();
        Ok(())
    }

    /// `for` zips one or more named lists together (`name_list_map`:
    /// `{item_name: list_field, ...}`), running `tasks` once per index with
    /// each `item_name` bound to that index's element (spec.md §4.7). The
    /// outer per-iteration counter and the inner per-task cursor are both
    /// persisted under synthetic `order_index/<label>` keys so a
    /// save/resume lands back mid-body (spec.md §5 "Resumability"); a
    /// `goto` inside the body resolves against labels declared in the
    /// body alone.
    async fn run_for(&mut self, task: &Task) -> Result<Flow, ProgramError> {
        let label = task.traceback_label();
        let runtime_label = label.clone();
        let name_list_map = task.require_object("name_list_map")?.clone();
        let body = task.require_list("tasks")?.clone();

        let mut item_names = Vec::with_capacity(name_list_map.len());
        let mut lists: Vec<Vec<Json>> = Vec::with_capacity(name_list_map.len());
        for (item_name, list_field) in &name_list_map {
            let interpolated = interpolation::interpolate_json(list_field, &self.resolver(), &label)?;
            let items = interpolated.as_array().cloned().ok_or_else(|| ProgramError::structural(&label, format!("'name_list_map' entry '{item_name}' must resolve to a list")))?;
            item_names.push(item_name.clone());
            lists.push(items);
        }
        let lengths: Vec<usize> = lists.iter().map(Vec::len).collect();
        if let Some(&first) = lengths.first() {
            if lengths.iter().any(|&l| l != first) {
                return Err(ProgramError::structural(&label, format!("name_list_map lists have differing lengths {lengths:?}")));
            }
        }
        let total = lengths.first().copied().unwrap_or(0);

        let (built, local_labels) = self.build_local_sequence(&body, task)?;

        let counter_key = format!("order_index/{runtime_label}/counter");
        let mut counter = self.state.order_indices.get(&counter_key).map(|oi| oi.counter).unwrap_or(1);

        while (counter as usize) <= total {
            self.check_cancelled()?;
            for (item_name, list) in item_names.iter().zip(lists.iter()) {
                self.state.inserts.insert(item_name.clone(), Value::from_json(&list[(counter - 1) as usize]));
            }

            let sub_key = format!("order_index/{runtime_label}");
            let mut sub_cursor = self.state.order_indices.get(&sub_key).map(|oi| oi.counter).unwrap_or(1);

            while (sub_cursor as usize) <= built.len() {
                self.check_cancelled()?;
                let idx = (sub_cursor - 1) as usize;
                match self.dispatch(&built[idx]).await? {
                    Flow::Continue => sub_cursor += 1,
                    Flow::Goto(target) => {
                        sub_cursor = local_labels
                            .get(&target)
                            .map(|&i| i as i64 + 2)
                            .ok_or_else(|| ProgramError::execution(built[idx].traceback_label(), format!("goto target label '{target}' not found in this for body")))?;
                    }
                    Flow::Terminate => return Ok(Flow::Terminate),
                }
                self.state.order_indices.insert(sub_key.clone(), OrderIndex { counter: sub_cursor, items: Vec::new() });
            }

            counter += 1;
            self.state.order_indices.insert(counter_key.clone(), OrderIndex { counter, items: Vec::new() });
            self.state.order_indices.shift_remove(&sub_key);
        }
        self.state.order_indices.shift_remove(&counter_key);
        Ok(Flow::Continue)
    }
}

fn empty_program() -> Program {
    Program {
        order: Vec::new(),
        named_tasks: Default::default(),
        default_state: Default::default(),
        save_states: Default::default(),
        completion_args: serde_json::Map::new(),
        labels: BTreeMap::new(),
    }
}

fn merge_state(into: &mut State, from: State) {
    for (k, v) in from.inserts {
        into.inserts.insert(k, v);
    }
    into.output.push_str(&from.output);
}

fn json_to_value(json: &Json) -> Value {
    Value::from_json(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn task(cmd: &str, fields: serde_json::Map<String, Json>) -> Task {
        Task {
            index: 0,
            line: 1,
            cmd: cmd.to_string(),
            fields,
            parent_label: None,
        }
    }

    struct NullIo;

    #[async_trait::async_trait]
    impl IOManager for NullIo {
        async fn output(&self, _text: &str) {}
        async fn input(&self, _prompt: &str) -> Result<String, ProgramError> {
            Ok(String::new())
        }
        async fn choice(&self, _prompt: &str, _choices: &[String]) -> Result<usize, ProgramError> {
            Ok(0)
        }
        async fn menu(&self) -> Result<crate::io::MenuChoice, ProgramError> {
            Ok(crate::io::MenuChoice::Resume)
        }
    }

    fn make_executor(order: Vec<Task>) -> Executor {
        let mut labels = BTreeMap::new();
        for (i, t) in order.iter().enumerate() {
            if let Some(l) = t.label_name() {
                labels.insert(l.to_string(), i);
            }
        }
        let (_tx, rx) = watch::channel(Cancellation::None);
        Executor::new(
            Program {
                order,
                named_tasks: IndexMap::new(),
                default_state: Default::default(),
                save_states: IndexMap::new(),
                completion_args: serde_json::Map::new(),
                labels,
            },
            State::default(),
            vec![],
            Arc::new(NullIo),
            rx,
        )
    }

    #[tokio::test]
    async fn set_task_stores_interpolated_value() {
        let mut fields = serde_json::Map::new();
        fields.insert("output_name".to_string(), Json::String("greeting".to_string()));
        fields.insert("item".to_string(), Json::String("hi".to_string()));
        let mut exec = make_executor(vec![task("set", fields)]);
        exec.run().await.unwrap();
        assert_eq!(exec.state.inserts.get("greeting"), Some(&Value::Str("hi".to_string())));
    }

    #[tokio::test]
    async fn goto_jumps_to_label() {
        let mut t0_fields = serde_json::Map::new();
        t0_fields.insert("name".to_string(), Json::String("skip".to_string()));
        let t0 = task("goto", t0_fields);

        let mut t1_fields = serde_json::Map::new();
        t1_fields.insert("output_name".to_string(), Json::String("x".to_string()));
        t1_fields.insert("item".to_string(), Json::String("should not run".to_string()));
        let t1 = task("set", t1_fields);

        let mut t2_fields = serde_json::Map::new();
        t2_fields.insert("name".to_string(), Json::String("skip".to_string()));
        let t2 = task("label", t2_fields);

        let mut exec = make_executor(vec![t0, t1, t2]);
        exec.run().await.unwrap();
        assert!(exec.state.inserts.get("x").is_none());
    }

    #[tokio::test]
    async fn for_loop_iterates_and_clears_order_index() {
        let mut fields = serde_json::Map::new();
        let mut name_list_map = serde_json::Map::new();
        name_list_map.insert("it".to_string(), Json::Array(vec![Json::Number(1.into()), Json::Number(2.into())]));
        fields.insert("name_list_map".to_string(), Json::Object(name_list_map));

        let body_task = {
            let mut m = serde_json::Map::new();
            m.insert("cmd".to_string(), Json::String("set".to_string()));
            m.insert("output_name".to_string(), Json::String("last".to_string()));
            m.insert("item".to_string(), Json::String("{it}".to_string()));
            Json::Object(m)
        };
        fields.insert("tasks".to_string(), Json::Array(vec![body_task]));
        let mut exec = make_executor(vec![task("for", fields)]);
        exec.run().await.unwrap();
        assert_eq!(exec.state.inserts.get("last"), Some(&Value::Int(2)));
        assert!(exec.state.order_indices.is_empty());
    }

    #[tokio::test]
    async fn goto_inside_serial_jumps_to_local_label() {
        let goto_task = {
            let mut m = serde_json::Map::new();
            m.insert("cmd".to_string(), Json::String("goto".to_string()));
            m.insert("name".to_string(), Json::String("inner".to_string()));
            Json::Object(m)
        };
        let bad_set = {
            let mut m = serde_json::Map::new();
            m.insert("cmd".to_string(), Json::String("set".to_string()));
            m.insert("output_name".to_string(), Json::String("x".to_string()));
            m.insert("item".to_string(), Json::String("skipped".to_string()));
            Json::Object(m)
        };
        let label_task = {
            let mut m = serde_json::Map::new();
            m.insert("cmd".to_string(), Json::String("label".to_string()));
            m.insert("name".to_string(), Json::String("inner".to_string()));
            Json::Object(m)
        };
        let good_set = {
            let mut m = serde_json::Map::new();
            m.insert("cmd".to_string(), Json::String("set".to_string()));
            m.insert("output_name".to_string(), Json::String("x".to_string()));
            m.insert("item".to_string(), Json::String("reached".to_string()));
            Json::Object(m)
        };
        let mut serial_fields = serde_json::Map::new();
        serial_fields.insert("tasks".to_string(), Json::Array(vec![goto_task, bad_set, label_task, good_set]));
        let mut exec = make_executor(vec![task("serial", serial_fields)]);
        exec.run().await.unwrap();
        assert_eq!(exec.state.inserts.get("x"), Some(&Value::Str("reached".to_string())));
    }

    #[tokio::test]
    async fn run_task_dispatches_into_named_tasks() {
        let mut fields = serde_json::Map::new();
        fields.insert("task_name".to_string(), Json::String("greet".to_string()));
        let run_task = task("run_task", fields);

        let mut named_fields = serde_json::Map::new();
        named_fields.insert("output_name".to_string(), Json::String("greeting".to_string()));
        named_fields.insert("item".to_string(), Json::String("hi".to_string()));
        let named_task = task("set", named_fields);

        let mut exec = make_executor(vec![run_task]);
        exec.program.named_tasks.insert("greet".to_string(), named_task);
        exec.run().await.unwrap();
        assert_eq!(exec.state.inserts.get("greeting"), Some(&Value::Str("hi".to_string())));
    }

    #[test]
    fn order_index_default_counter_is_zero() {
        let oi = OrderIndex::default();
        assert_eq!(oi.counter, 0);
    }
}
