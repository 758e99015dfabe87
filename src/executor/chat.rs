//! The `chat` task (spec.md §4.8, Component G): sends an interpolated
//! message list to a streaming chat-completion endpoint, runs the
//! incoming delta text through the `extract`/`hide` filters, stores the
//! accumulated result, and retries (up to a bounded attempt count) when
//! the server produces fewer outputs than requested before the stream
//! ends.
//!
//! Ported from the `chat`-task branch of `execute_task` and the `chat()`
//! helper in
//! `examples/original_source/src/interpolation_engine/interpolation_engine.py:556-713,1728-1789`.

use serde_json::Value as Json;

use crate::ast::{Task, Value};
use crate::error::ProgramError;
use crate::filter::{InvertedFilter, StreamFilter};
use crate::interpolation;

use super::{Executor, Flow};

const NON_TASK_FIELDS: &[&str] = &["messages", "output_name", "line"];

/// Merge the task's own completion fields over the program's default
/// `completion_args` (spec.md §3.1), with `extra_body` merged specially:
/// the default's `extra_body` entries win over the task's own on key
/// conflicts, matching `other_args['extra_body'].update(completion_args.pop('extra_body',{}))`.
fn merge_completion_args(task: &Task, defaults: &serde_json::Map<String, Json>) -> serde_json::Map<String, Json> {
    let mut task_fields = task.fields.clone();
    for key in NON_TASK_FIELDS {
        task_fields.remove(*key);
    }
    let task_extra_body = task_fields.remove("extra_body").and_then(|v| v.as_object().cloned()).unwrap_or_default();

    let mut merged = defaults.clone();
    let default_extra_body = merged.remove("extra_body").and_then(|v| v.as_object().cloned()).unwrap_or_default();

    for (k, v) in task_fields {
        merged.insert(k, v);
    }

    let mut extra_body = task_extra_body;
    for (k, v) in default_extra_body {
        extra_body.insert(k, v);
    }
    for (k, v) in extra_body {
        merged.insert(k, v);
    }

    merged
}

fn pop_str(args: &mut serde_json::Map<String, Json>, key: &str, default: &str) -> String {
    args.remove(key).and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| default.to_string())
}

fn pop_bool(args: &mut serde_json::Map<String, Json>, key: &str, default: bool) -> bool {
    match args.remove(key) {
        Some(Json::Bool(b)) => b,
        Some(Json::String(s)) if s == "true" => true,
        Some(Json::String(s)) if s == "false" => false,
        _ => default,
    }
}

fn pop_int(args: &mut serde_json::Map<String, Json>, key: &str, default: i64) -> i64 {
    match args.remove(key) {
        Some(Json::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Json::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn interpolate_scalar(exec: &Executor, label: &str, json: &Json) -> Result<Json, ProgramError> {
    interpolation::interpolate_json(json, &exec.resolver(), label)
}

fn interpolate_map(exec: &Executor, label: &str, map: serde_json::Map<String, Json>) -> Result<serde_json::Map<String, Json>, ProgramError> {
    let mut out = serde_json::Map::with_capacity(map.len());
    for (k, v) in map {
        out.insert(k, interpolate_scalar(exec, label, &v)?);
    }
    Ok(out)
}

pub async fn execute_chat(exec: &mut Executor, task: &Task) -> Result<Flow, ProgramError> {
    let label = task.traceback_label();

    let messages_json = interpolation::interpolate_json(task.require_field("messages")?, &exec.resolver(), &label)?;
    let messages = messages_json
        .as_array()
        .cloned()
        .ok_or_else(|| ProgramError::structural(&label, "'messages' must resolve to a list of message objects"))?;

    let output_name = task.require_str("output_name")?.to_string();

    let mut args = merge_completion_args(task, &exec.program.completion_args);
    let start_str = interpolate_scalar(exec, &label, &Json::String(pop_str(&mut args, "start_str", "")))?.as_str().unwrap_or_default().to_string();
    let stop_str = interpolate_scalar(exec, &label, &Json::String(pop_str(&mut args, "stop_str", "")))?.as_str().unwrap_or_default().to_string();
    let hide_start_str = interpolate_scalar(exec, &label, &Json::String(pop_str(&mut args, "hide_start_str", "")))?.as_str().unwrap_or_default().to_string();
    let hide_stop_str = interpolate_scalar(exec, &label, &Json::String(pop_str(&mut args, "hide_stop_str", "")))?.as_str().unwrap_or_default().to_string();
    let n_outputs = pop_int(&mut args, "n_outputs", 1).max(1);
    let shown = pop_bool(&mut args, "shown", true);
    let choices_list: Option<Vec<String>> = args
        .remove("choices_list")
        .and_then(|v| v.as_array().map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect()));
    let api_url = interpolate_scalar(exec, &label, &Json::String(pop_str(&mut args, "api_url", "http://localhost:8080")))?
        .as_str()
        .unwrap_or_default()
        .to_string();
    let api_key = pop_str(&mut args, "api_key", "unused");
    let model = pop_str(&mut args, "model", "default");

    if let Some(max_completion_tokens) = args.remove("max_completion_tokens") {
        args.insert("max_tokens".to_string(), max_completion_tokens);
    }

    let args = interpolate_map(exec, &label, args)?;

    if let Some(choices) = choices_list {
        return run_choices_list_chat(exec, &label, &output_name, messages, args, &api_url, &api_key, &model, shown, choices).await;
    }

    run_filtered_chat(
        exec,
        &label,
        &output_name,
        messages,
        args,
        &api_url,
        &api_key,
        &model,
        shown,
        n_outputs,
        &start_str,
        &stop_str,
        &hide_start_str,
        &hide_stop_str,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn run_filtered_chat(
    exec: &mut Executor,
    label: &str,
    output_name: &str,
    messages: Vec<Json>,
    args: serde_json::Map<String, Json>,
    api_url: &str,
    api_key: &str,
    model: &str,
    shown: bool,
    n_outputs: i64,
    start_str: &str,
    stop_str: &str,
    hide_start_str: &str,
    hide_stop_str: &str,
) -> Result<Flow, ProgramError> {
    let mut attempts = 0u32;

    let (outputs, visual_output) = loop {
        attempts += 1;

        let mut extract_filter = StreamFilter::new(start_str.to_string(), stop_str.to_string(), n_outputs > 1);
        let mut hide_filter = InvertedFilter::new(hide_start_str.to_string(), hide_stop_str.to_string());

        let (delta_tx, mut delta_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let io = exec.io.clone();
        let drain = async move {
            let mut visual = String::new();
            while let Some(delta) = delta_rx.recv().await {
                let extracted = extract_filter.update(&delta);
                if extracted.is_empty() {
                    continue;
                }
                let visible = hide_filter.update(&extracted);
                if !visible.is_empty() {
                    if shown {
                        io.output(&visible).await;
                    }
                    visual.push_str(&visible);
                }
            }
            (visual, extract_filter)
        };

        let stream_fut = exec.chat_client.stream_chat(api_url, api_key, model, &messages, args.clone(), None, delta_tx);
        let (stream_result, (this_attempt_visual, extract_filter)) = tokio::join!(stream_fut, drain);
        let (_full_text, finish_reason) = stream_result?;

        let extracted_outputs = extract_filter.outputs().to_vec();

        if finish_reason.as_deref() != Some("length") && (extracted_outputs.len() as i64) >= n_outputs {
            break (extracted_outputs, this_attempt_visual);
        }
        if attempts >= exec.retry_limit {
            return Err(ProgramError::execution(
                label,
                format!("chat task produced only {}/{n_outputs} outputs after {attempts} attempts", extracted_outputs.len()),
            ));
        }
    };

    let value = if outputs.len() == 1 {
        Value::Str(interpolation::escape(&outputs[0]))
    } else {
        Value::List(outputs.into_iter().map(|s| Value::Str(interpolation::escape(&s))).collect())
    };
    exec.state.inserts.insert(output_name.to_string(), value);
    exec.state.output.push_str(&visual_output);
    Ok(Flow::Continue)
}

/// Structured-output variant: the model is constrained (via a JSON-schema
/// `response_format`) to respond with `{"choice": <one of choices>}`, and
/// the extract/hide filters are bypassed entirely (spec.md §4.8 step 2).
#[allow(clippy::too_many_arguments)]
async fn run_choices_list_chat(
    exec: &mut Executor,
    label: &str,
    output_name: &str,
    messages: Vec<Json>,
    args: serde_json::Map<String, Json>,
    api_url: &str,
    api_key: &str,
    model: &str,
    shown: bool,
    choices: Vec<String>,
) -> Result<Flow, ProgramError> {
    let schema = serde_json::json!({
        "title": "Choice",
        "type": "object",
        "properties": { "choice": { "title": "choice", "enum": choices } },
        "required": ["choice"],
    });
    let schema_str = serde_json::to_string(&schema).unwrap_or_default();
    let response_format = serde_json::json!({ "type": "json_schema", "json_schema": schema_str });

    let schema_prompt = format!("Respond only with a valid JSON object conforming to this schema: {schema_str}. Do not add any additional text.");
    let mut request_messages = messages;
    request_messages.push(serde_json::json!({ "role": "user", "content": schema_prompt }));

    let mut attempts = 0u32;
    loop {
        if attempts >= exec.retry_limit {
            return Err(ProgramError::execution(label, format!("chat task with choices_list produced no valid choice after {attempts} attempts")));
        }
        attempts += 1;

        let (delta_tx, mut delta_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let io = exec.io.clone();
        let drain = async move {
            let mut visual = String::new();
            while let Some(delta) = delta_rx.recv().await {
                if shown {
                    io.output(&delta).await;
                }
                visual.push_str(&delta);
            }
            visual
        };

        let stream_fut = exec.chat_client.stream_chat(api_url, api_key, model, &request_messages, args.clone(), Some(response_format.clone()), delta_tx);
        let (stream_result, visual_output) = tokio::join!(stream_fut, drain);
        let (full_text, _finish_reason) = stream_result?;

        let parsed: Result<Json, _> = serde_json::from_str(full_text.trim());
        let choice = parsed.ok().and_then(|v| v.get("choice").and_then(Json::as_str).map(str::to_string));

        match choice {
            Some(choice) if choices.contains(&choice) => {
                exec.state.inserts.insert(output_name.to_string(), Value::Str(choice));
                exec.state.output.push_str(&visual_output);
                return Ok(Flow::Continue);
            }
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_task_fields_over_defaults() {
        let mut defaults = serde_json::Map::new();
        defaults.insert("model".to_string(), Json::String("default-model".to_string()));
        let mut fields = serde_json::Map::new();
        fields.insert("messages".to_string(), Json::Array(vec![]));
        fields.insert("output_name".to_string(), Json::String("out".to_string()));
        fields.insert("model".to_string(), Json::String("task-model".to_string()));
        let task = Task { index: 0, line: 1, cmd: "chat".to_string(), fields, parent_label: None };
        let merged = merge_completion_args(&task, &defaults);
        assert_eq!(merged.get("model"), Some(&Json::String("task-model".to_string())));
        assert!(!merged.contains_key("messages"));
        assert!(!merged.contains_key("output_name"));
    }

    #[test]
    fn merge_lets_default_extra_body_win_on_conflict() {
        let mut defaults = serde_json::Map::new();
        let mut default_extra = serde_json::Map::new();
        default_extra.insert("cache_prompt".to_string(), Json::Bool(true));
        defaults.insert("extra_body".to_string(), Json::Object(default_extra));

        let mut fields = serde_json::Map::new();
        let mut task_extra = serde_json::Map::new();
        task_extra.insert("cache_prompt".to_string(), Json::Bool(false));
        task_extra.insert("top_k".to_string(), Json::Number(40.into()));
        fields.insert("extra_body".to_string(), Json::Object(task_extra));
        let task = Task { index: 0, line: 1, cmd: "chat".to_string(), fields, parent_label: None };

        let merged = merge_completion_args(&task, &defaults);
        assert_eq!(merged.get("cache_prompt"), Some(&Json::Bool(true)));
        assert_eq!(merged.get("top_k"), Some(&Json::Number(40.into())));
    }
}
