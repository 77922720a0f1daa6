//! Deterministic placeholder chunk for steps the backend could not produce.

use crate::lecture::{Action, ActionChunk, StepSpec};

pub const LABEL_OP: &str = "drawLabel";

/// Title from the tag, caption from the description. Never empty.
pub fn fallback_chunk(session_id: &str, step: &StepSpec) -> ActionChunk {
    let title = title_from_tag(&step.tag).unwrap_or_else(|| format!("Step {}", step.id));
    let caption = match step.desc.trim() {
        "" => title.clone(),
        desc => desc.to_string(),
    };
    let actions = vec![
        Action::new(LABEL_OP)
            .with("role", "title")
            .with("text", title),
        Action::new(LABEL_OP)
            .with("role", "caption")
            .with("text", caption),
    ];
    ActionChunk::fallback(session_id, step.id, actions)
}

fn title_from_tag(tag: &str) -> Option<String> {
    let words: Vec<String> = tag
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}
