//! Prompt construction for plan and step requests.

use crate::generation::backend::{GenerationRequest, RequestKind};
use crate::lecture::{Plan, Session, StepSpec};
use crate::types::{SessionId, StepId};
use std::fmt::Write;

const PLAN_SYSTEM: &str = "You are a lecture planner. Break the topic into an ordered \
list of short steps for a whiteboard lecture. Reply with JSON only: \
{\"steps\": [{\"id\": 1, \"tag\": \"short-tag\", \"desc\": \"what this step explains\", \
\"compiler\": \"default\"}]}.";

const STEP_SYSTEM: &str = "You are a whiteboard lecture renderer. Turn one lecture step \
into drawing actions. Reply with JSON only: {\"actions\": [{\"op\": \"...\", ...}]}. \
Every action needs a string `op`; all other fields are passed to the renderer unchanged.";

/// Session-wide context handed to each step so prompts can refer to neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    pub session_id: SessionId,
    pub step_count: usize,
    pub outline: Vec<(StepId, String)>,
}

impl StepContext {
    pub fn for_plan(plan: &Plan) -> Self {
        Self {
            session_id: plan.session_id.clone(),
            step_count: plan.step_count(),
            outline: plan.outline(),
        }
    }
}

pub fn plan_request(session: &Session, max_steps: usize) -> GenerationRequest {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Topic: {}", session.topic.trim());
    if let Some(style) = &session.params.style {
        let _ = writeln!(prompt, "Style: {style}");
    }
    if let Some(depth) = &session.params.depth {
        let _ = writeln!(prompt, "Depth: {depth}");
    }
    for (key, value) in &session.params.extra {
        let _ = writeln!(prompt, "{key}: {value}");
    }
    let _ = write!(prompt, "Use at most {max_steps} steps.");

    GenerationRequest {
        kind: RequestKind::Plan,
        session_id: session.session_id.clone(),
        step_id: None,
        system: PLAN_SYSTEM.to_string(),
        prompt,
    }
}

pub fn step_request(step: &StepSpec, topic: &str, context: &StepContext) -> GenerationRequest {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Lecture topic: {}", topic.trim());
    let _ = writeln!(prompt, "Outline:");
    for (id, tag) in &context.outline {
        let marker = if *id == step.id { ">" } else { " " };
        let _ = writeln!(prompt, "{marker} {id}. {tag}");
    }
    let _ = writeln!(
        prompt,
        "Render step {} of {} ({}): {}",
        step.id, context.step_count, step.tag, step.desc
    );
    let _ = write!(prompt, "Compiler: {}", step.compiler);

    GenerationRequest {
        kind: RequestKind::Step,
        session_id: context.session_id.clone(),
        step_id: Some(step.id),
        system: STEP_SYSTEM.to_string(),
        prompt,
    }
}
