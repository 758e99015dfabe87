//! Interpolation engine: scans task-field strings for `{...}` markers and
//! substitutes resolved values, plus the escape/unescape helpers that let
//! literal braces survive a round trip through an insert value (spec.md
//! §4.3/§4.4). Indexing/slicing syntax and key resolution live in
//! `resolver`.
//!
//! Ported from `interpolate_inserts`/`interpolate_messages_inserts`/
//! `recursive_interpolate`/`recursive_escape`/`recursive_unescape` in
//! `examples/original_source/src/interpolation_engine/interpolation_engine.py:480-560,1289-1330`.

pub mod resolver;

use serde_json::Value as Json;

use crate::ast::Value;
use crate::error::{InterpolationFault, ProgramError};
pub use resolver::InsertResolver;

/// Stand-in characters for an escaped `\`, `\{`, and `\}` while a string is
/// being scanned for markers, so the brace-depth scanner never mistakes an
/// escaped delimiter for a real one. Each replaces exactly one source
/// character with one ASCII control character of the same byte width, so
/// both char and byte offsets into the hidden string stay aligned with the
/// original text (unlike a shrinking substitution, which would drift every
/// offset after the first escape).
const HIDDEN_BACKSLASH: char = '\u{0001}';
const HIDDEN_OPEN: char = '\u{0002}';
const HIDDEN_CLOSE: char = '\u{0003}';

/// Swap `\{`/`\}`/`\\` for same-width sentinels so a depth scanner can walk
/// the result looking only at real `{`/`}`.
fn hide_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('{') => {
                    out.push(HIDDEN_BACKSLASH);
                    out.push(HIDDEN_OPEN);
                    chars.next();
                    continue;
                }
                Some('}') => {
                    out.push(HIDDEN_BACKSLASH);
                    out.push(HIDDEN_CLOSE);
                    chars.next();
                    continue;
                }
                Some('\\') => {
                    out.push(HIDDEN_BACKSLASH);
                    out.push(HIDDEN_BACKSLASH);
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

/// Find the first top-level `{...}` span in `text` (brace-depth balanced,
/// `\{`/`\}` escapes skipped). Returns `(start, end, inner)` where `end` is
/// one past the closing `}`, both as byte offsets into the *original*
/// `text` (escapes are hidden behind same-width sentinels so offsets never
/// drift).
fn find_marker(text: &str) -> Option<(usize, usize, &str)> {
    let hidden = hide_escapes(text);
    let bytes = hidden.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let mut depth = 1;
            let mut j = i + 1;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'{' => depth += 1,
                    b'}' => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            if depth == 0 {
                return Some((i, j, &text[i + 1..j - 1]));
            }
            return None; // unbalanced; caller surfaces a malformed-interpolation fault
        }
        i += 1;
    }
    None
}

/// True if `text` is *exactly* one `{...}` span with no surrounding literal
/// text, allowing a single balanced nested pair at the ends (e.g.
/// `{{name}/description}`, whose inner text is `{name}/description`) — the
/// "simple insert key" case where the resolved value can flow through
/// typed (list/map) instead of being stringified. Ported verbatim from the
/// depth-balance walk in `get_simple_insertkey`
/// (`interpolation_engine.py:460-478`): at every position, `depth == 0`
/// must coincide exactly with being at the first or last character, or the
/// text isn't a single simple key.
pub fn get_simple_insertkey(text: &str) -> Option<&str> {
    let hidden = hide_escapes(text);
    let chars: Vec<char> = hidden.chars().collect();
    if chars.len() < 2 || chars[0] != '{' || chars[chars.len() - 1] != '}' {
        return None;
    }
    let mut depth = 0i32;
    let last = chars.len() - 1;
    for (i, &c) in chars.iter().enumerate() {
        if c == '}' {
            depth -= 1;
        }
        if (depth == 0) != (i == 0 || i == last) {
            return None;
        }
        if c == '{' {
            depth += 1;
        }
    }
    // byte offset of the first/last char in the *original* (un-hidden) text.
    let inner_start = text.char_indices().nth(1).map(|(b, _)| b).unwrap_or(text.len());
    let inner_end = text.char_indices().nth(last).map(|(b, _)| b).unwrap_or(text.len());
    Some(&text[inner_start..inner_end])
}

/// Replace every `{...}` marker in `text` with its resolved, stringified
/// value. Non-scalar values (lists/maps) interpolated mid-string raise a
/// `WrongType` fault; use `get_simple_insertkey` at the call site first if
/// the whole field should be allowed to resolve to a typed value.
pub fn interpolate_str(text: &str, resolver: &dyn InsertResolver, label: &str) -> Result<String, ProgramError> {
    let mut out = String::new();
    let mut rest = text;
    loop {
        match find_marker(rest) {
            None => {
                out.push_str(&unescape(rest));
                break;
            }
            Some((start, end, inner)) => {
                out.push_str(&unescape(&rest[..start]));
                let key = inner.trim();
                if key.is_empty() {
                    return Err(ProgramError::Interpolation {
                        label: label.to_string(),
                        source: InterpolationFault::EmptyKey,
                    });
                }
                let value = resolver.resolve(key).map_err(|source| ProgramError::Interpolation {
                    label: label.to_string(),
                    source,
                })?;
                let text = value.as_interpolated_str(key).map_err(|source| ProgramError::Interpolation {
                    label: label.to_string(),
                    source,
                })?;
                out.push_str(&text);
                rest = &rest[end..];
            }
        }
    }
    Ok(out)
}

/// Interpolate a single task field value. If the entire string is one
/// `{key}` marker, the resolved value is returned typed (so lists/maps
/// can be assigned directly); otherwise the value is stringified and
/// substituted in place. Recurses into list/map fields.
pub fn interpolate_json(value: &Json, resolver: &dyn InsertResolver, label: &str) -> Result<Json, ProgramError> {
    match value {
        Json::String(s) => {
            if let Some(inner) = get_simple_insertkey(s) {
                // `inner` may itself contain a nested marker (e.g. the outer
                // pair in `{{name}/description}`); resolve that first so the
                // final lookup key is fully literal.
                let key = interpolate_str(inner, resolver, label)?;
                let key = key.trim();
                if !key.is_empty() {
                    let resolved = resolver.resolve(key).map_err(|source| ProgramError::Interpolation {
                        label: label.to_string(),
                        source,
                    })?;
                    return Ok(resolved.to_json());
                }
            }
            Ok(Json::String(interpolate_str(s, resolver, label)?))
        }
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate_json(item, resolver, label)?);
            }
            Ok(Json::Array(out))
        }
        Json::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), interpolate_json(v, resolver, label)?);
            }
            Ok(Json::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Recursively interpolate every field of a task except the ones named in
/// `skip` (control-flow fields like `serial`/`parallel_wait`/`for` bodies
/// whose inner tasks are interpolated lazily, at the time they run, not
/// eagerly at dispatch).
pub fn recursive_interpolate(
    fields: &serde_json::Map<String, Json>,
    skip: &[&str],
    resolver: &dyn InsertResolver,
    label: &str,
) -> Result<serde_json::Map<String, Json>, ProgramError> {
    let mut out = serde_json::Map::with_capacity(fields.len());
    for (k, v) in fields {
        if skip.contains(&k.as_str()) {
            out.insert(k.clone(), v.clone());
        } else {
            out.insert(k.clone(), interpolate_json(v, resolver, label)?);
        }
    }
    Ok(out)
}

/// Escape literal `{`, `}`, and `\` so a value can be stored and later
/// interpolated without its own braces being mistaken for markers (the
/// original's `escape = '\\'` convention, `interpolation_engine.py:41`).
pub fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('{', "\\{").replace('}', "\\}")
}

/// Inverse of [`escape`]; also applied to any literal text that passed
/// through `interpolate_str` untouched.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('{') => {
                    out.push('{');
                    chars.next();
                    continue;
                }
                Some('}') => {
                    out.push('}');
                    chars.next();
                    continue;
                }
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

/// Apply [`escape`] recursively to every string leaf of a `Value`.
pub fn recursive_escape(value: &Value) -> Value {
    match value {
        Value::Str(s) => Value::Str(escape(s)),
        Value::Int(_) => value.clone(),
        Value::List(items) => Value::List(items.iter().map(recursive_escape).collect()),
        Value::Map(map) => Value::Map(map.iter().map(|(k, v)| (k.clone(), recursive_escape(v))).collect()),
    }
}

/// Apply [`unescape`] recursively to every string leaf of a `Value`.
pub fn recursive_unescape(value: &Value) -> Value {
    match value {
        Value::Str(s) => Value::Str(unescape(s)),
        Value::Int(_) => value.clone(),
        Value::List(items) => Value::List(items.iter().map(recursive_unescape).collect()),
        Value::Map(map) => Value::Map(map.iter().map(|(k, v)| (k.clone(), recursive_unescape(v))).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolation::resolver::MapResolver;
    use indexmap::IndexMap;

    fn resolver_with(pairs: &[(&str, Value)]) -> MapResolver {
        let mut m = IndexMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        MapResolver::new(m)
    }

    #[test]
    fn simple_key_detection() {
        assert_eq!(get_simple_insertkey("{foo}"), Some("foo"));
        assert_eq!(get_simple_insertkey("prefix {foo}"), None);
        assert_eq!(get_simple_insertkey("{foo} suffix"), None);
        // A balanced nested pair at the ends is still a single simple key.
        assert_eq!(get_simple_insertkey("{{foo}}"), Some("{foo}"));
        assert_eq!(get_simple_insertkey("{{name}/description}"), Some("{name}/description"));
    }

    #[test]
    fn escaped_braces_are_not_markers() {
        let r = resolver_with(&[("name", Value::Str("Ada".into()))]);
        let out = interpolate_str("Hello {name}\\{x\\}!", &r, "t").unwrap();
        assert_eq!(out, "Hello Ada{x}!");
    }

    #[test]
    fn escaped_brace_inside_simple_key_rejects_framing() {
        // `\{` is not a real marker delimiter, so this does not parse as a
        // simple insert key and falls through to literal text.
        assert_eq!(get_simple_insertkey("\\{foo\\}"), None);
    }

    #[test]
    fn interpolate_str_substitutes_scalar() {
        let r = resolver_with(&[("name", Value::Str("Ada".into()))]);
        let out = interpolate_str("Hello {name}!", &r, "t").unwrap();
        assert_eq!(out, "Hello Ada!");
    }

    #[test]
    fn interpolate_str_surfaces_empty_key_fault() {
        let r = resolver_with(&[]);
        assert!(interpolate_str("{}", &r, "t").is_err());
    }

    #[test]
    fn interpolate_json_whole_field_preserves_list_type() {
        let r = resolver_with(&[("items", Value::List(vec![Value::Int(1), Value::Int(2)]))]);
        let out = interpolate_json(&Json::String("{items}".to_string()), &r, "t").unwrap();
        assert_eq!(out, Json::Array(vec![Json::Number(1.into()), Json::Number(2.into())]));
    }

    #[test]
    fn escape_unescape_roundtrip() {
        let original = "value with {braces}";
        assert_eq!(unescape(&escape(original)), original);
    }
}
