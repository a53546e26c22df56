use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::eval::{CriterionScore, EvaluationRecord, HighlightedPassage};
use crate::rubric::Rubric;
use crate::segment::is_placeholder_name;

/// Model totals within this distance of the recomputed sum are trusted;
/// anything further is overridden.
pub const SCORE_TOLERANCE: f64 = 0.1;

const DEFAULT_MAX_SCORE: f64 = 10.0;
const MAX_PASSAGES: usize = 7;
const MAX_PASSAGE_TEXT_CHARS: usize = 150;
const MAX_SUGGESTIONS: usize = 8;
const MAX_MINI_LESSONS: usize = 8;

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma pattern"));

/// Strips a markdown code fence from around a model response, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    for prefix in ["```json", "```"] {
        if let Some(inner) = trimmed
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix("```"))
        {
            return inner.trim();
        }
    }
    trimmed
}

/// Parses model output into JSON, retrying once with trailing commas
/// removed, the one malformation models produce routinely.
pub fn parse_model_json(raw: &str) -> Result<Value, serde_json::Error> {
    let cleaned = strip_code_fence(raw);
    match serde_json::from_str(cleaned) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let repaired = TRAILING_COMMA.replace_all(cleaned, "$1");
            serde_json::from_str(&repaired).map_err(|_| first_err)
        }
    }
}

/// Coerces an untyped model response into a valid `EvaluationRecord`.
///
/// Never trusts field presence or types: scores are clamped into
/// `[0, max_score]`, the overall score is recomputed locally, placeholder
/// student names are replaced, and over-produced list fields are capped.
pub fn repair_record(value: &Value, rubric: &Rubric, name_hint: Option<&str>) -> EvaluationRecord {
    let criteria = repair_criteria(value.get("criteria"), rubric);

    let computed: f64 = criteria.iter().map(|criterion| criterion.score).sum();
    let reported = value.get("overall_score").and_then(value_as_f64);
    let overall = match reported {
        Some(total) if (total - computed).abs() <= SCORE_TOLERANCE => total,
        Some(total) => {
            warn!(
                reported = total,
                computed, "model total disagrees with criterion sum, using the computed sum"
            );
            computed
        }
        None => computed,
    };

    let max_total: f64 = criteria.iter().map(|criterion| criterion.max_score).sum();
    let overall = overall.clamp(0.0, max_total.max(0.0));

    let student_name = resolve_student_name(
        value.get("student_name").and_then(Value::as_str),
        name_hint,
    );

    let suggestions = string_list(value.get("suggestions"), MAX_SUGGESTIONS);
    let highlighted_passages = repair_passages(value.get("highlighted_passages"));
    let mini_lessons = repair_mini_lessons(value);

    EvaluationRecord {
        student_name,
        overall_score: overall,
        criteria,
        suggestions,
        highlighted_passages,
        mini_lessons,
        error: false,
        error_message: None,
    }
}

fn repair_criteria(raw: Option<&Value>, rubric: &Rubric) -> Vec<CriterionScore> {
    let Some(items) = raw.and_then(Value::as_array) else {
        warn!("model response carried no criteria array");
        return Vec::new();
    };

    let mut criteria = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let Some(entry) = item.as_object() else {
            warn!(index = i, "skipping criteria item that is not an object");
            continue;
        };

        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unnamed Criterion {}", i + 1));

        let max_score = rubric.max_for(&name).unwrap_or(DEFAULT_MAX_SCORE);

        let score = entry
            .get("score")
            .and_then(value_as_f64)
            .filter(|score| score.is_finite())
            .unwrap_or_else(|| {
                warn!(criterion = %name, "non-numeric criterion score, defaulting to 0");
                0.0
            })
            .clamp(0.0, max_score);

        let feedback = entry
            .get("feedback")
            .and_then(Value::as_str)
            .unwrap_or("No feedback provided.")
            .to_string();

        criteria.push(CriterionScore {
            name,
            score,
            max_score,
            feedback,
        });
    }

    criteria
}

fn resolve_student_name(reported: Option<&str>, hint: Option<&str>) -> String {
    if let Some(name) = reported.map(str::trim).filter(|name| !is_placeholder_name(name)) {
        return name.to_string();
    }
    if let Some(hint) = hint.map(str::trim).filter(|hint| !is_placeholder_name(hint)) {
        return hint.to_string();
    }
    synthesize_student_name()
}

fn synthesize_student_name() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("Student_{}", &id[..8])
}

fn repair_passages(raw: Option<&Value>) -> Vec<HighlightedPassage> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| {
            let text: String = entry
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .replace('\n', " ")
                .chars()
                .take(MAX_PASSAGE_TEXT_CHARS)
                .collect();
            HighlightedPassage {
                text,
                issue: string_field(entry.get("issue")),
                suggestion: string_field(entry.get("suggestion")),
                example_revision: entry
                    .get("example_revision")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|example| !example.is_empty())
                    .map(str::to_string),
            }
        })
        .take(MAX_PASSAGES)
        .collect()
}

fn repair_mini_lessons(value: &Value) -> Vec<String> {
    let top_level = string_list(value.get("mini_lessons"), MAX_MINI_LESSONS);
    if !top_level.is_empty() {
        return top_level;
    }

    // Older prompt revisions attached a mini-lesson to each criterion.
    value
        .get("criteria")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("mini_lesson"))
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|lesson| !lesson.is_empty())
                .map(str::to_string)
                .take(MAX_MINI_LESSONS)
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(raw: Option<&Value>, cap: usize) -> Vec<String> {
    raw.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text.trim().to_string()),
                    Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
                .filter(|text| !text.is_empty())
                .take(cap)
                .collect()
        })
        .unwrap_or_default()
}

fn string_field(raw: Option<&Value>) -> String {
    raw.and_then(Value::as_str).unwrap_or("").trim().to_string()
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
