//! Planning pipeline logic that does not touch the network: request
//! validation, prompt construction, and turning a model reply into a plan.
//!
//! A reply is used verbatim when it contains a JSON object of the right
//! shape. Anything else produces the deterministic fallback plan. Transport
//! failures never reach this module; they are reported by the caller.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use crate::todos::Priority;

pub const MAX_TASKS: usize = 20;
pub const TASK_MAX_CHARS: usize = 200;

pub const SYSTEM_PROMPT: &str = "You are a productivity planning expert. \
Given a list of tasks, build a realistic plan based on the priority and length of each task. \
Respond with strict JSON only, no prose outside the JSON object, using exactly this structure:\n\
{\n  \"plan\": \"your planning advice as a single string\",\n  \"prioritized_tasks\": [\n    \
{\"task\": \"task description\", \"priority\": \"high|medium|low\", \
\"estimated_time\": \"human-readable duration, e.g. 45 minutes\", \"order\": 1}\n  ]\n}\n\
Include one entry per task. `priority` must be one of high, medium, low. \
`order` is a positive integer giving the suggested execution order.";

/// Request body for `POST /api/todos/plan`
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlanningRequest {
    /// 1-20 free-text task descriptions
    pub tasks: Vec<String>,
}

/// One task in the returned plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PrioritizedTask {
    pub task: String,
    /// Model replies may capitalise this ("High"); stored todos may not.
    #[serde(deserialize_with = "any_case_priority")]
    pub priority: Priority,
    pub estimated_time: String,
    /// 1-based execution order
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlanningResponse {
    pub plan: String,
    pub prioritized_tasks: Vec<PrioritizedTask>,
}

fn any_case_priority<'de, D>(deserializer: D) -> Result<Priority, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(serde::de::Error::custom)
}

/// Where the per-task list of a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Model,
    Fallback,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanningValidationError {
    #[error("tasks must contain at least one entry")]
    Empty,
    #[error("tasks must contain at most {MAX_TASKS} entries, got {count}")]
    TooMany { count: usize },
    #[error("tasks[{index}] must be at most {TASK_MAX_CHARS} characters")]
    TooLong { index: usize },
    #[error("At least one non-empty task is required.")]
    AllBlank,
}

/// Validate raw task strings and return the accepted, trimmed list.
///
/// Blank entries are dropped silently; an all-blank list is an error.
pub fn accept_tasks(raw: &[String]) -> Result<Vec<String>, PlanningValidationError> {
    if raw.is_empty() {
        return Err(PlanningValidationError::Empty);
    }
    if raw.len() > MAX_TASKS {
        return Err(PlanningValidationError::TooMany { count: raw.len() });
    }
    if let Some(index) = raw
        .iter()
        .position(|task| task.trim().chars().count() > TASK_MAX_CHARS)
    {
        return Err(PlanningValidationError::TooLong { index });
    }

    let accepted: Vec<String> = raw
        .iter()
        .map(|task| task.trim())
        .filter(|task| !task.is_empty())
        .map(str::to_string)
        .collect();

    if accepted.is_empty() {
        return Err(PlanningValidationError::AllBlank);
    }
    Ok(accepted)
}

/// The user turn of the conversation: the accepted tasks as a bulleted list.
pub fn build_user_prompt(tasks: &[String]) -> String {
    let bullets = tasks
        .iter()
        .map(|task| format!("- {task}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Make a realistic plan for these tasks:\n\n{bullets}")
}

static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex is valid"));

/// Greedy match from the first `{` to the last `}` in `text`.
///
/// Best effort: prose containing several brace fragments yields one span
/// covering all of them, which then usually fails to parse.
pub fn extract_json_object(text: &str) -> Option<&str> {
    JSON_OBJECT.find(text).map(|m| m.as_str())
}

/// Turn model reply text into a plan for the accepted `tasks`.
pub fn normalize_reply(content: &str, tasks: &[String]) -> (PlanningResponse, PlanSource) {
    match parse_model_plan(content, tasks.len()) {
        Some(plan) => (plan, PlanSource::Model),
        None => (fallback_plan(content, tasks), PlanSource::Fallback),
    }
}

fn parse_model_plan(content: &str, expected_tasks: usize) -> Option<PlanningResponse> {
    let candidate = extract_json_object(content)?;
    let plan: PlanningResponse = serde_json::from_str(candidate).ok()?;
    if plan.plan.trim().is_empty() || plan.prioritized_tasks.len() != expected_tasks {
        return None;
    }
    plan.check_shape().ok()?;
    Some(plan)
}

/// Deterministic plan used when the model reply is unusable.
/// The raw reply text becomes the narrative, even when empty.
pub fn fallback_plan(content: &str, tasks: &[String]) -> PlanningResponse {
    let n = tasks.len();
    let prioritized_tasks = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| PrioritizedTask {
            task: task.clone(),
            priority: priority_band(i, n),
            estimated_time: format!("{} minutes", estimated_minutes(i)),
            order: (i + 1) as u32,
        })
        .collect();

    PlanningResponse {
        plan: content.to_string(),
        prioritized_tasks,
    }
}

/// First third high, second third medium, the rest low (integer division).
pub fn priority_band(index: usize, total: usize) -> Priority {
    if index < total / 3 {
        Priority::High
    } else if index < 2 * total / 3 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

pub fn estimated_minutes(index: usize) -> usize {
    30 + 15 * index
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("prioritized_tasks[{index}]: {reason}")]
pub struct PlanShapeError {
    pub index: usize,
    pub reason: &'static str,
}

impl PlanningResponse {
    /// Final check before a plan leaves the service.
    pub fn check_shape(&self) -> Result<(), PlanShapeError> {
        for (index, item) in self.prioritized_tasks.iter().enumerate() {
            if item.task.trim().is_empty() {
                return Err(PlanShapeError {
                    index,
                    reason: "task must not be empty",
                });
            }
            if item.estimated_time.trim().is_empty() {
                return Err(PlanShapeError {
                    index,
                    reason: "estimated_time must not be empty",
                });
            }
            if item.order == 0 {
                return Err(PlanShapeError {
                    index,
                    reason: "order must be a positive integer",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accept_tasks_trims_and_drops_blanks() {
        let accepted = accept_tasks(&tasks(&["  write report ", "", "   ", "call bank"])).unwrap();
        assert_eq!(accepted, tasks(&["write report", "call bank"]));
    }

    #[test]
    fn accept_tasks_rejects_all_blank() {
        assert_eq!(
            accept_tasks(&tasks(&["", "   "])),
            Err(PlanningValidationError::AllBlank)
        );
        assert_eq!(accept_tasks(&[]), Err(PlanningValidationError::Empty));
    }

    #[test]
    fn accept_tasks_rejects_more_than_twenty() {
        let raw: Vec<String> = (0..21).map(|i| format!("task {i}")).collect();
        assert_eq!(
            accept_tasks(&raw),
            Err(PlanningValidationError::TooMany { count: 21 })
        );
        assert_eq!(accept_tasks(&raw[..20]).unwrap().len(), 20);
    }

    #[test]
    fn accept_tasks_rejects_overlong_entry() {
        let raw = vec!["ok".to_string(), "x".repeat(TASK_MAX_CHARS + 1)];
        assert_eq!(
            accept_tasks(&raw),
            Err(PlanningValidationError::TooLong { index: 1 })
        );
    }

    #[test]
    fn user_prompt_lists_tasks_as_bullets() {
        let prompt = build_user_prompt(&tasks(&["a", "b"]));
        assert!(prompt.ends_with("- a\n- b"));
    }

    #[test]
    fn priority_bands_for_nine_tasks() {
        let bands: Vec<Priority> = (0..9).map(|i| priority_band(i, 9)).collect();
        assert_eq!(&bands[0..3], &[Priority::High; 3]);
        assert_eq!(&bands[3..6], &[Priority::Medium; 3]);
        assert_eq!(&bands[6..9], &[Priority::Low; 3]);
    }

    #[test]
    fn small_lists_skip_high_band() {
        // n=2: n/3 == 0, 2n/3 == 1
        assert_eq!(priority_band(0, 2), Priority::Medium);
        assert_eq!(priority_band(1, 2), Priority::Low);
        assert_eq!(priority_band(0, 1), Priority::Low);
    }

    #[test]
    fn estimated_time_formula() {
        assert_eq!(estimated_minutes(0), 30);
        assert_eq!(estimated_minutes(3), 75);
        let plan = fallback_plan("", &tasks(&["a", "b", "c", "d"]));
        assert_eq!(plan.prioritized_tasks[0].estimated_time, "30 minutes");
        assert_eq!(plan.prioritized_tasks[3].estimated_time, "75 minutes");
    }

    #[test]
    fn extract_json_object_is_greedy() {
        let text = "Sure! {\"a\": 1} and also {\"b\": 2} done";
        assert_eq!(extract_json_object(text), Some("{\"a\": 1} and also {\"b\": 2}"));
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("line one {\n\"x\": 1\n} end"), Some("{\n\"x\": 1\n}"));
    }

    #[test]
    fn well_formed_reply_is_used_verbatim() {
        let accepted = tasks(&["write report", "call bank"]);
        let content = r#"Here you go:
```json
{"plan": "Do the report first.", "prioritized_tasks": [
  {"task": "write report", "priority": "high", "estimated_time": "2 hours", "order": 1},
  {"task": "call bank", "priority": "Low", "estimated_time": "10 minutes", "order": 2}
]}
```"#;
        let (plan, source) = normalize_reply(content, &accepted);
        assert_eq!(source, PlanSource::Model);
        assert_eq!(plan.plan, "Do the report first.");
        assert_eq!(plan.prioritized_tasks[1].priority, Priority::Low);
        assert_eq!(plan.prioritized_tasks[0].estimated_time, "2 hours");
    }

    #[test]
    fn reply_without_json_falls_back_with_raw_content() {
        let accepted = tasks(&["a", "b", "c"]);
        let (plan, source) = normalize_reply("I cannot help with that.", &accepted);
        assert_eq!(source, PlanSource::Fallback);
        assert_eq!(plan.plan, "I cannot help with that.");
        assert_eq!(plan.prioritized_tasks.len(), 3);
        assert_eq!(plan.prioritized_tasks[0].priority, Priority::High);
        assert_eq!(plan.prioritized_tasks[2].order, 3);
    }

    #[test]
    fn malformed_or_mismatched_replies_fall_back() {
        let accepted = tasks(&["a", "b"]);
        for content in [
            "{not json}",
            r#"{"plan": "x"}"#,
            r#"{"plan": "x", "prioritized_tasks": "nope"}"#,
            r#"{"plan": "x", "prioritized_tasks": [{"task": "a", "priority": "urgent", "estimated_time": "1h", "order": 1}, {"task": "b", "priority": "low", "estimated_time": "1h", "order": 2}]}"#,
            r#"{"plan": "x", "prioritized_tasks": [{"task": "a", "priority": "low", "estimated_time": "1h", "order": 1}]}"#,
            r#"{"plan": "", "prioritized_tasks": [{"task": "a", "priority": "low", "estimated_time": "1h", "order": 1}, {"task": "b", "priority": "low", "estimated_time": "1h", "order": 2}]}"#,
        ] {
            let (plan, source) = normalize_reply(content, &accepted);
            assert_eq!(source, PlanSource::Fallback, "content: {content}");
            assert_eq!(plan.plan, content);
            assert_eq!(plan.prioritized_tasks.len(), 2);
        }
    }

    #[test]
    fn replies_with_unusable_entries_fall_back() {
        let accepted = tasks(&["a"]);
        for content in [
            r#"{"plan": "x", "prioritized_tasks": [{"task": "a", "priority": "high", "estimated_time": "1h", "order": 0}]}"#,
            r#"{"plan": "x", "prioritized_tasks": [{"task": "  ", "priority": "high", "estimated_time": "1h", "order": 1}]}"#,
            r#"{"plan": "x", "prioritized_tasks": [{"task": "a", "priority": "high", "estimated_time": "", "order": 1}]}"#,
        ] {
            let (plan, source) = normalize_reply(content, &accepted);
            assert_eq!(source, PlanSource::Fallback, "content: {content}");
            assert_eq!(plan.plan, content);
            assert!(plan.check_shape().is_ok());
        }
    }

    #[test]
    fn model_priority_is_case_insensitive() {
        let item: PrioritizedTask = serde_json::from_str(
            r#"{"task": "a", "priority": "HIGH", "estimated_time": "1h", "order": 1}"#,
        )
        .unwrap();
        assert_eq!(item.priority, Priority::High);
    }

    #[test]
    fn fallback_is_deterministic() {
        let accepted = tasks(&["a", "b", "c", "d", "e"]);
        let first = normalize_reply("garbage", &accepted);
        let second = normalize_reply("garbage", &accepted);
        assert_eq!(first, second);
    }

    #[test]
    fn fallback_length_matches_accepted_tasks_for_every_size() {
        for n in 1..=MAX_TASKS {
            let accepted: Vec<String> = (0..n).map(|i| format!("task {i}")).collect();
            let (plan, _) = normalize_reply("", &accepted);
            assert_eq!(plan.prioritized_tasks.len(), n);
            assert!(plan.check_shape().is_ok());
        }
    }

    #[test]
    fn check_shape_rejects_zero_order() {
        let plan = PlanningResponse {
            plan: "p".to_string(),
            prioritized_tasks: vec![PrioritizedTask {
                task: "a".to_string(),
                priority: Priority::High,
                estimated_time: "1 hour".to_string(),
                order: 0,
            }],
        };
        assert_eq!(
            plan.check_shape(),
            Err(PlanShapeError {
                index: 0,
                reason: "order must be a positive integer"
            })
        );
    }
}
