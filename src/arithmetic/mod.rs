//! Arithmetic evaluator for the `math` task and inline `{{expr}}` math
//! interpolations (spec.md §4.5). Supports `+ - * / % **`, parentheses,
//! and the function names `min`, `max`, `round`, `sign`, `length`.
//!
//! Ported from `math_safe_eval`/`eval_math` and the `math_*` helper
//! functions in `examples/original_source/src/interpolation_engine/interpolation_engine.py:718-817`.
//! The original evaluates via Python's `eval()` over a restricted
//! namespace; this crate instead walks a small recursive-descent parser,
//! which is the idiomatic Rust replacement for a sandboxed `eval`.

use crate::error::ProgramError;

const ALLOWED_CHARS: &str = "0123456789+-*/%(). \t";
const FUNCTIONS: &[&str] = &["min", "max", "round", "sign", "length"];

/// Evaluate a math expression string, returning the numeric result as a
/// string (integers render without a decimal point; non-integer results
/// are rejected unless they're within `1e-4` of an integer, matching the
/// original's tolerance check at `interpolation_engine.py:768-817`).
///
/// `list_values` resolves a bare identifier to the elements of the list
/// insert it names (not just its length) — `min`/`max`/`length` each need
/// the elements when their sole argument is a list key, per `math_min`/
/// `math_max`/`math_length` (`interpolation_engine.py:723-744`), which
/// differ from each other only in what they do with those elements.
pub fn eval_math(expr: &str, label: &str, list_values: impl Fn(&str) -> Option<Vec<i64>>) -> Result<String, ProgramError> {
    check_syntax(expr, label)?;
    let mut parser = Parser {
        input: expr,
        pos: 0,
        label,
        list_values: &list_values,
    };
    let value = parser.parse_expr()?;
    parser.skip_ws();
    if parser.pos != parser.input.len() {
        return Err(ProgramError::arithmetic(label, format!("unexpected trailing input in '{expr}'")));
    }
    render(value, expr, label)
}

fn check_syntax(expr: &str, label: &str) -> Result<(), ProgramError> {
    for (name, _) in find_function_calls(expr) {
        if !FUNCTIONS.contains(&name.as_str()) {
            return Err(ProgramError::arithmetic(label, format!("unknown function '{name}' in '{expr}'")));
        }
    }
    let stripped = strip_function_names(expr);
    for c in stripped.chars() {
        if !ALLOWED_CHARS.contains(c) && !c.is_ascii_alphanumeric() && c != '_' {
            return Err(ProgramError::arithmetic(label, format!("illegal character '{c}' in expression '{expr}'")));
        }
    }
    Ok(())
}

/// Find `name(` occurrences, returning the function name found immediately
/// left of each `(`. A "word" is the maximal alphanumeric/underscore run
/// ending at the `(`, matching the original's word-splitting check.
fn find_function_calls(expr: &str) -> Vec<(String, usize)> {
    let bytes = expr.as_bytes();
    let mut out = Vec::new();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'(' {
            continue;
        }
        let mut j = i;
        while j > 0 && (bytes[j - 1].is_ascii_alphanumeric() || bytes[j - 1] == b'_') {
            j -= 1;
        }
        if j < i {
            out.push((expr[j..i].to_string(), j));
        }
    }
    out
}

fn strip_function_names(expr: &str) -> String {
    let calls = find_function_calls(expr);
    let mut out = expr.to_string();
    for (name, start) in calls.into_iter().rev() {
        out.replace_range(start..start + name.len(), &" ".repeat(name.len()));
    }
    out
}

fn render(value: f64, expr: &str, label: &str) -> Result<String, ProgramError> {
    let rounded = value.round();
    if (value - rounded).abs() < 1e-4 {
        Ok((rounded as i64).to_string())
    } else if value.fract().abs() > 1e-9 {
        Err(ProgramError::arithmetic(
            label,
            format!("expression '{expr}' produced non-integer result {value}; only integer-valued expressions are supported"),
        ))
    } else {
        Ok(value.to_string())
    }
}

struct Parser<'a, F: Fn(&str) -> Option<Vec<i64>>> {
    input: &'a str,
    pos: usize,
    label: &'a str,
    list_values: &'a F,
}

impl<'a, F: Fn(&str) -> Option<Vec<i64>>> Parser<'a, F> {
    fn skip_ws(&mut self) {
        while self.peek().map(|c| c.is_whitespace()).unwrap_or(false) {
            self.pos += self.peek().unwrap().len_utf8();
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump_if(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.input[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> Result<f64, ProgramError> {
        let mut value = self.parse_term()?;
        loop {
            if self.bump_if("+") {
                value += self.parse_term()?;
            } else if self.bump_if("-") {
                value -= self.parse_term()?;
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64, ProgramError> {
        let mut value = self.parse_power()?;
        loop {
            if self.bump_if("**") {
                // handled in parse_power; shouldn't reach here for '**'
                value = value.powf(self.parse_power()?);
            } else if self.bump_if("*") {
                value *= self.parse_power()?;
            } else if self.bump_if("/") {
                let divisor = self.parse_power()?;
                if divisor == 0.0 {
                    return Err(ProgramError::arithmetic(self.label, "division by zero"));
                }
                value /= divisor;
            } else if self.bump_if("%") {
                let divisor = self.parse_power()?;
                if divisor == 0.0 {
                    return Err(ProgramError::arithmetic(self.label, "modulo by zero"));
                }
                value = value.rem_euclid(divisor);
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn parse_power(&mut self) -> Result<f64, ProgramError> {
        let base = self.parse_unary()?;
        if self.bump_if("**") {
            let exp = self.parse_power()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<f64, ProgramError> {
        self.skip_ws();
        if self.bump_if("-") {
            return Ok(-self.parse_unary()?);
        }
        if self.bump_if("+") {
            return self.parse_unary();
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<f64, ProgramError> {
        self.skip_ws();
        if self.bump_if("(") {
            let value = self.parse_expr()?;
            self.skip_ws();
            if !self.bump_if(")") {
                return Err(ProgramError::arithmetic(self.label, "unbalanced parentheses"));
            }
            return Ok(value);
        }
        if let Some(name) = self.try_parse_ident() {
            if self.bump_if("(") {
                return self.parse_function(&name);
            }
            return (self.list_values)(&name)
                .map(|values| values.len() as f64)
                .ok_or_else(|| ProgramError::arithmetic(self.label, format!("unknown identifier '{name}'")));
        }
        self.parse_number()
    }

    /// If the next token is a single bare identifier immediately followed
    /// by `)` (no operators, no comma), and it names a list insert, consume
    /// it and return that list's elements. Otherwise leaves `pos` untouched
    /// so the caller can fall back to parsing a normal comma-separated
    /// argument list.
    fn try_parse_list_arg(&mut self) -> Option<Vec<f64>> {
        let checkpoint = self.pos;
        self.skip_ws();
        if let Some(name) = self.try_parse_ident() {
            self.skip_ws();
            if self.peek() == Some(')') {
                if let Some(values) = (self.list_values)(&name) {
                    return Some(values.into_iter().map(|v| v as f64).collect());
                }
            }
        }
        self.pos = checkpoint;
        None
    }

    fn try_parse_ident(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        let mut end = self.pos;
        for c in self.input[self.pos..].chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end += c.len_utf8();
            } else {
                break;
            }
        }
        if end > start && self.input.as_bytes().get(start).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            return None;
        }
        if end > start {
            self.pos = end;
            Some(self.input[start..end].to_string())
        } else {
            None
        }
    }

    fn parse_function(&mut self, name: &str) -> Result<f64, ProgramError> {
        // `min`/`max`/`length` accept either a list key (resolved to its
        // elements here) or an enumeration of numeric expressions (handled
        // below by the ordinary comma-separated argument parse).
        if matches!(name, "min" | "max" | "length") {
            if let Some(values) = self.try_parse_list_arg() {
                self.skip_ws();
                if !self.bump_if(")") {
                    return Err(ProgramError::arithmetic(self.label, format!("unbalanced parentheses in call to '{name}'")));
                }
                return match name {
                    "length" => Ok(values.len() as f64),
                    "min" => values
                        .into_iter()
                        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
                        .ok_or_else(|| ProgramError::arithmetic(self.label, "min() was called on an empty list")),
                    "max" => values
                        .into_iter()
                        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
                        .ok_or_else(|| ProgramError::arithmetic(self.label, "max() was called on an empty list")),
                    _ => unreachable!(),
                };
            }
        }

        let mut args = vec![self.parse_expr()?];
        while self.bump_if(",") {
            args.push(self.parse_expr()?);
        }
        self.skip_ws();
        if !self.bump_if(")") {
            return Err(ProgramError::arithmetic(self.label, format!("unbalanced parentheses in call to '{name}'")));
        }
        match name {
            "min" => args.into_iter().fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v)))).ok_or_else(|| {
                ProgramError::arithmetic(self.label, "min() requires at least one argument")
            }),
            "max" => args.into_iter().fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v)))).ok_or_else(|| {
                ProgramError::arithmetic(self.label, "max() requires at least one argument")
            }),
            "round" => {
                if args.len() != 1 {
                    return Err(ProgramError::arithmetic(self.label, "round() takes exactly one argument"));
                }
                Ok(args[0].round())
            }
            "sign" => {
                if args.len() != 1 {
                    return Err(ProgramError::arithmetic(self.label, "sign() takes exactly one argument"));
                }
                Ok(if args[0] > 0.0 { 1.0 } else if args[0] < 0.0 { -1.0 } else { 0.0 })
            }
            "length" => {
                if args.len() != 1 {
                    return Err(ProgramError::arithmetic(self.label, "length() takes exactly one argument"));
                }
                Ok(args[0])
            }
            _ => Err(ProgramError::arithmetic(self.label, format!("unknown function '{name}'"))),
        }
    }

    fn parse_number(&mut self) -> Result<f64, ProgramError> {
        self.skip_ws();
        let start = self.pos;
        let mut end = self.pos;
        let bytes = self.input.as_bytes();
        while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
            end += 1;
        }
        if end == start {
            return Err(ProgramError::arithmetic(self.label, format!("expected number at position {start} in '{}'", self.input)));
        }
        self.pos = end;
        self.input[start..end]
            .parse::<f64>()
            .map_err(|_| ProgramError::arithmetic(self.label, format!("invalid number literal '{}'", &self.input[start..end])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lists(_: &str) -> Option<Vec<i64>> {
        None
    }

    #[test]
    fn basic_arithmetic() {
        assert_eq!(eval_math("2 + 3 * 4", "t", no_lists).unwrap(), "14");
        assert_eq!(eval_math("(2 + 3) * 4", "t", no_lists).unwrap(), "20");
        assert_eq!(eval_math("10 / 2", "t", no_lists).unwrap(), "5");
    }

    #[test]
    fn functions() {
        assert_eq!(eval_math("max(1, 5, 3)", "t", no_lists).unwrap(), "5");
        assert_eq!(eval_math("min(1, 5, 3)", "t", no_lists).unwrap(), "1");
        assert_eq!(eval_math("round(2.6)", "t", no_lists).unwrap(), "3");
        assert_eq!(eval_math("sign(-4)", "t", no_lists).unwrap(), "-1");
    }

    #[test]
    fn rejects_illegal_characters() {
        assert!(eval_math("2 + import os", "t", no_lists).is_err());
    }

    #[test]
    fn rejects_unknown_function() {
        assert!(eval_math("pow(2, 3)", "t", no_lists).is_err());
    }

    #[test]
    fn list_length_identifier() {
        let lookup = |name: &str| if name == "mylist" { Some(vec![1, 2, 3]) } else { None };
        assert_eq!(eval_math("length(mylist) + 1", "t", lookup).unwrap(), "4");
    }

    #[test]
    fn min_max_over_list_elements() {
        let lookup = |name: &str| if name == "xs" { Some(vec![3, 1, 4, 1, 5, 9, 2, 6]) } else { None };
        assert_eq!(eval_math("round((min(xs) + max(xs)) / 2)", "t", lookup).unwrap(), "5");
    }

    #[test]
    fn min_max_still_accept_numeric_enumeration() {
        assert_eq!(eval_math("min(4, 2, 7)", "t", no_lists).unwrap(), "2");
        assert_eq!(eval_math("max(4, 2, 7)", "t", no_lists).unwrap(), "7");
    }

    #[test]
    fn division_by_zero_errors() {
        assert!(eval_math("1 / 0", "t", no_lists).is_err());
    }
}
