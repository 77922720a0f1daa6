//! Parsing of raw backend payloads into actions and plan steps.
//!
//! Backends are expected to answer with JSON, optionally wrapped in a markdown
//! code fence. Anything else is `MalformedOutput` and is retried by the caller.

use crate::error::GenerationError;
use crate::lecture::{Action, StepSpec};
use crate::types::StepId;
use serde_json::{Map, Value};

pub const DEFAULT_COMPILER: &str = "default";

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json(raw: &str) -> Result<Value, GenerationError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(GenerationError::EmptyOutput);
    }
    serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedOutput(format!("invalid JSON: {}", e)))
}

/// Accept either a bare array or an object holding the array under `field`.
fn take_list(value: Value, field: &str) -> Result<Vec<Value>, GenerationError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(GenerationError::MalformedOutput(format!(
                "`{field}` is not an array"
            ))),
            None => Err(GenerationError::MalformedOutput(format!(
                "object has no `{field}` array"
            ))),
        },
        other => Err(GenerationError::MalformedOutput(format!(
            "expected array or object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a step payload into a non-empty action list.
pub fn parse_actions(raw: &str) -> Result<Vec<Action>, GenerationError> {
    let items = take_list(parse_json(raw)?, "actions")?;
    if items.is_empty() {
        return Err(GenerationError::MalformedOutput(
            "action list is empty".to_string(),
        ));
    }
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(mut fields) = item else {
                return Err(GenerationError::MalformedOutput(format!(
                    "action {index} is not an object"
                )));
            };
            let op = match fields.remove("op") {
                Some(Value::String(op)) if !op.trim().is_empty() => op,
                _ => {
                    return Err(GenerationError::MalformedOutput(format!(
                        "action {index} has no string `op`"
                    )))
                }
            };
            Ok(Action {
                op,
                payload: fields,
            })
        })
        .collect()
}

fn required_text(fields: &Map<String, Value>, key: &str, index: usize) -> Result<String, GenerationError> {
    match fields.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => Err(GenerationError::MalformedOutput(format!(
            "step {index} has no `{key}`"
        ))),
    }
}

/// Parse a plan payload into steps with dense, ordered ids `1..=N`.
pub fn parse_plan_steps(raw: &str, max_steps: usize) -> Result<Vec<StepSpec>, GenerationError> {
    let items = take_list(parse_json(raw)?, "steps")?;
    if items.is_empty() {
        return Err(GenerationError::MalformedOutput("plan has no steps".to_string()));
    }
    if items.len() > max_steps {
        return Err(GenerationError::MalformedOutput(format!(
            "plan has {} steps, limit is {}",
            items.len(),
            max_steps
        )));
    }

    let mut parsed = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(fields) = item else {
            return Err(GenerationError::MalformedOutput(format!(
                "step {index} is not an object"
            )));
        };
        let id = fields.get("id").and_then(Value::as_u64);
        let compiler = match fields.get("compiler") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => DEFAULT_COMPILER.to_string(),
        };
        parsed.push((
            id,
            StepSpec {
                id: 0,
                tag: required_text(&fields, "tag", index)?,
                desc: required_text(&fields, "desc", index)?,
                compiler,
            },
        ));
    }

    let count = parsed.len();
    if parsed.iter().all(|(id, _)| id.is_some()) {
        let mut seen = vec![false; count];
        for (id, _) in &parsed {
            let id = id.unwrap_or(0) as usize;
            if id == 0 || id > count || seen[id - 1] {
                return Err(GenerationError::MalformedOutput(format!(
                    "step ids are not a permutation of 1..={count}"
                )));
            }
            seen[id - 1] = true;
        }
        parsed.sort_by_key(|(id, _)| id.unwrap_or(0));
        Ok(parsed
            .into_iter()
            .map(|(id, mut step)| {
                step.id = id.unwrap_or(0) as StepId;
                step
            })
            .collect())
    } else {
        // Partial or missing ids: document order wins.
        Ok(parsed
            .into_iter()
            .enumerate()
            .map(|(index, (_, mut step))| {
                step.id = (index + 1) as StepId;
                step
            })
            .collect())
    }
}
