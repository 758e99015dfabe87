//! Key resolution: turns an interpolation key (`foo`, `args[1]`,
//! `mylist[2:4]`, `mylist[-1]`) into a `Value`, consulting the insert
//! environment, program arguments, and the `order_index/<label>` cursor
//! bookkeeping the `for` task maintains (spec.md §3.4, §4.4, §4.7).
//!
//! List indexing is 1-based with inclusive slice bounds and negative
//! indices counting from the tail, matching `get_interpdata`
//! (`interpolation_engine.py:413-459`).

use std::path::Path;

use chrono::Local;
use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::ast::{State, Value};
use crate::error::InterpolationFault;

pub trait InsertResolver {
    fn resolve(&self, key: &str) -> Result<Value, InterpolationFault>;
}

/// A resolver over a bare map, with no program-argument or order-index
/// awareness. Used directly by unit tests and by contexts (e.g. the chat
/// task's structured-output field substitution) that only need plain
/// key lookups.
pub struct MapResolver {
    data: IndexMap<String, Value>,
}

impl MapResolver {
    pub fn new(data: IndexMap<String, Value>) -> Self {
        Self { data }
    }
}

impl InsertResolver for MapResolver {
    fn resolve(&self, key: &str) -> Result<Value, InterpolationFault> {
        resolve_against(key, |base| self.data.get(base).cloned())
    }
}

/// The full runtime resolver: the live program `State`, the positional
/// `program_arguments` the script was invoked with, and an optional
/// fallback directory (`--inserts-dir`) consulted when a key isn't found
/// in either (spec.md §4.4 "inserts directory" fallback) — one file per
/// key, whose contents become the resolved string value.
pub struct RuntimeResolver<'a> {
    pub state: &'a State,
    pub args: &'a [String],
    pub inserts_dir: Option<&'a Path>,
}

impl<'a> InsertResolver for RuntimeResolver<'a> {
    fn resolve(&self, key: &str) -> Result<Value, InterpolationFault> {
        let (base, _) = split_subscript(key);
        let from_dir = || {
            let dir = self.inserts_dir?;

            if let Ok(text) = std::fs::read_to_string(dir.join(format!("{base}.json5"))) {
                if let Ok(json) = json5::from_str::<Json>(&text) {
                    return Some(crate::interpolation::recursive_escape(&Value::from_json(&json)));
                }
            }

            std::fs::read_to_string(dir.join(base))
                .ok()
                .map(|s| crate::interpolation::recursive_escape(&Value::Str(s.trim().to_string())))
        };

        let result = resolve_against(key, |base| {
            if let Some(value) = wall_clock_value(base) {
                return Some(value);
            }
            if let Some(rest) = base.strip_prefix("ARG") {
                if let Ok(idx) = rest.parse::<usize>() {
                    if idx >= 1 {
                        return self.args.get(idx - 1).map(|s| Value::Str(s.clone()));
                    }
                }
            }
            if let Some(label) = base.strip_prefix("order_index/").and_then(|s| s.strip_suffix("/counter")) {
                return self
                    .state
                    .order_indices
                    .get(label)
                    .map(|oi| Value::Int(oi.counter));
            }
            self.state.get(base).cloned().or_else(from_dir)
        });

        match result {
            Err(InterpolationFault::MissingKey { key, available }) if self.inserts_dir.is_some() => {
                Err(InterpolationFault::MissingKeyWithDir { key, available })
            }
            other => other,
        }
    }
}

/// `{HH:MM}`/`{HH:MM:SS}` resolve to the current wall-clock time rather
/// than any stored insert (spec.md §4.4 point 1) — useful for stamping
/// `print`ed transcript lines without a `chat` round trip.
fn wall_clock_value(base: &str) -> Option<Value> {
    match base {
        "HH:MM" => Some(Value::Str(Local::now().format("%H:%M").to_string())),
        "HH:MM:SS" => Some(Value::Str(Local::now().format("%H:%M:%S").to_string())),
        _ => None,
    }
}

/// Parse `base[index]` / `base[start:end]` suffixes and apply them to
/// whatever `lookup(base)` returns. `lookup` returning `None` means the
/// base key itself is unknown — surfaced as `MissingKey`.
fn resolve_against(key: &str, lookup: impl Fn(&str) -> Option<Value>) -> Result<Value, InterpolationFault> {
    let (base, subscript) = split_subscript(key);
    let value = lookup(base).ok_or_else(|| InterpolationFault::MissingKey {
        key: base.to_string(),
        available: Vec::new(),
    })?;
    match subscript {
        None => Ok(value),
        Some(sub) => apply_subscript(&value, sub, key),
    }
}

fn split_subscript(key: &str) -> (&str, Option<&str>) {
    if let Some(open) = key.find('[') {
        if key.ends_with(']') {
            return (&key[..open], Some(&key[open + 1..key.len() - 1]));
        }
    }
    (key, None)
}

fn apply_subscript(value: &Value, sub: &str, full_key: &str) -> Result<Value, InterpolationFault> {
    let list = value.as_list().ok_or_else(|| InterpolationFault::Malformed(full_key.to_string()))?;
    let len = list.len() as i64;

    if let Some((start, end)) = sub.split_once(':') {
        let start = resolve_index(start.trim(), len, 1)?;
        let end = resolve_index(end.trim(), len, len)?;
        let (lo, hi) = (start.min(end), start.max(end));
        let lo = lo.max(1);
        let hi = hi.min(len);
        if lo > hi {
            return Ok(Value::List(Vec::new()));
        }
        let slice = list[(lo - 1) as usize..hi as usize].to_vec();
        return Ok(Value::List(slice));
    }

    let idx = resolve_index(sub.trim(), len, 1)?;
    if idx < 1 || idx > len {
        return Err(InterpolationFault::Malformed(format!("{full_key} (index {idx} out of range 1..={len})")));
    }
    Ok(list[(idx - 1) as usize].clone())
}

/// Resolve a (possibly negative, possibly empty) slice/index component.
/// Negative values count from the tail (`-1` = last element); an empty
/// component uses `default`.
fn resolve_index(raw: &str, len: i64, default: i64) -> Result<i64, InterpolationFault> {
    if raw.is_empty() {
        return Ok(default);
    }
    let n: i64 = raw.parse().map_err(|_| InterpolationFault::Malformed(raw.to_string()))?;
    Ok(if n < 0 { len + n + 1 } else { n })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(pairs: &[(&str, Value)]) -> MapResolver {
        let mut m = IndexMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        MapResolver::new(m)
    }

    fn list(items: &[i64]) -> Value {
        Value::List(items.iter().map(|&i| Value::Int(i)).collect())
    }

    #[test]
    fn plain_key_lookup() {
        let r = resolver(&[("name", Value::Str("x".into()))]);
        assert_eq!(r.resolve("name").unwrap(), Value::Str("x".into()));
    }

    #[test]
    fn missing_key_is_a_fault() {
        let r = resolver(&[]);
        assert!(r.resolve("nope").is_err());
    }

    #[test]
    fn one_based_index() {
        let r = resolver(&[("l", list(&[10, 20, 30]))]);
        assert_eq!(r.resolve("l[1]").unwrap(), Value::Int(10));
        assert_eq!(r.resolve("l[3]").unwrap(), Value::Int(30));
    }

    #[test]
    fn negative_index_counts_from_tail() {
        let r = resolver(&[("l", list(&[10, 20, 30]))]);
        assert_eq!(r.resolve("l[-1]").unwrap(), Value::Int(30));
        assert_eq!(r.resolve("l[-2]").unwrap(), Value::Int(20));
    }

    #[test]
    fn inclusive_slice_bounds() {
        let r = resolver(&[("l", list(&[1, 2, 3, 4, 5]))]);
        assert_eq!(r.resolve("l[2:4]").unwrap(), list(&[2, 3, 4]));
    }

    #[test]
    fn open_ended_slice() {
        let r = resolver(&[("l", list(&[1, 2, 3]))]);
        assert_eq!(r.resolve("l[2:]").unwrap(), list(&[2, 3]));
        assert_eq!(r.resolve("l[:2]").unwrap(), list(&[1, 2]));
    }

    #[test]
    fn out_of_range_index_is_a_fault() {
        let r = resolver(&[("l", list(&[1, 2]))]);
        assert!(r.resolve("l[5]").is_err());
    }

    #[test]
    fn arg_keys_are_one_based() {
        let state = State::default();
        let args = vec!["first".to_string(), "second".to_string()];
        let r = RuntimeResolver { state: &state, args: &args, inserts_dir: None };
        assert_eq!(r.resolve("ARG1").unwrap(), Value::Str("first".into()));
        assert_eq!(r.resolve("ARG2").unwrap(), Value::Str("second".into()));
        assert!(r.resolve("ARG3").is_err());
    }

    #[test]
    fn wall_clock_keys_resolve_without_state() {
        let state = State::default();
        let args: Vec<String> = Vec::new();
        let r = RuntimeResolver { state: &state, args: &args, inserts_dir: None };
        let hhmm = r.resolve("HH:MM").unwrap().as_interpolated_str("HH:MM").unwrap();
        assert_eq!(hhmm.len(), 5);
        let hhmmss = r.resolve("HH:MM:SS").unwrap().as_interpolated_str("HH:MM:SS").unwrap();
        assert_eq!(hhmmss.len(), 8);
    }
}
