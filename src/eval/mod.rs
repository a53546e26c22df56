use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{EvalError, LlmError};
use crate::llm::GeminiClient;
use crate::rubric::Rubric;
use crate::segment::{extract_student_name, split_essays};

pub mod repair;
pub mod retry;

use repair::{parse_model_json, repair_record};
use retry::RetryPolicy;

const MAX_ATTEMPTS: usize = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Pacing between concurrent evaluation launches; advisory only, it lowers
/// the burst rate against the upstream API without capping concurrency.
const STAGGER_BASE: Duration = Duration::from_millis(1500);
const STAGGER_JITTER_MS: u64 = 1000;

/// How harshly the model is asked to grade; also tunes sampling temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Strict,
    #[default]
    Standard,
    Generous,
}

impl Strictness {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Strictness::Strict,
            "generous" | "lenient" => Strictness::Generous,
            _ => Strictness::Standard,
        }
    }

    pub fn temperature(self) -> f64 {
        match self {
            Strictness::Strict => 0.2,
            Strictness::Standard => 0.4,
            Strictness::Generous => 0.7,
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Strictness::Strict => {
                "Grade strictly: award points only where the essay fully earns them, \
                 and hold the work to a demanding standard on every criterion."
            }
            Strictness::Standard => {
                "Grade with a balanced, standard academic benchmark: reward what the \
                 essay does well and deduct where it falls short."
            }
            Strictness::Generous => {
                "Grade generously: give the benefit of the doubt where the essay shows \
                 genuine effort, while still noting real weaknesses."
            }
        }
    }
}

/// One scored rubric criterion in an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionScore {
    pub name: String,
    pub score: f64,
    pub max_score: f64,
    pub feedback: String,
}

/// A quoted excerpt paired with the model's critique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightedPassage {
    pub text: String,
    pub issue: String,
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_revision: Option<String>,
}

/// The full evaluation result for one essay, either genuine (from the model,
/// validated and repaired) or synthetic (an error placeholder the
/// orchestrator emits when an essay fails terminally).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub student_name: String,
    pub overall_score: f64,
    pub criteria: Vec<CriterionScore>,
    pub suggestions: Vec<String>,
    pub highlighted_passages: Vec<HighlightedPassage>,
    #[serde(default)]
    pub mini_lessons: Vec<String>,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EvaluationRecord {
    /// Total achievable score, derived from the criteria present.
    pub fn max_score_total(&self) -> f64 {
        let total: f64 = self
            .criteria
            .iter()
            .map(|criterion| criterion.max_score)
            .sum();
        if total > 0.0 { total } else { 50.0 }
    }

    /// Synthetic record for an essay whose evaluation failed terminally. The
    /// batch keeps going; the failure stays visible in the results.
    pub fn failure(student_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            student_name: student_name.into(),
            overall_score: 0.0,
            criteria: vec![CriterionScore {
                name: "Processing Error".to_string(),
                score: 0.0,
                max_score: 10.0,
                feedback: format!("Failed to evaluate: {message}"),
            }],
            suggestions: vec![
                "Evaluation failed due to a processing error. Please check the essay content \
                 or API key limits."
                    .to_string(),
            ],
            highlighted_passages: Vec::new(),
            mini_lessons: Vec::new(),
            error: true,
            error_message: Some(message),
        }
    }
}

/// Evaluates one essay against a rubric, retrying transient model failures.
///
/// A content-safety block ends the evaluation immediately; every other
/// failure is retried with backoff until the attempt budget runs out.
pub async fn evaluate_essay(
    client: &GeminiClient,
    rubric: &Rubric,
    essay: &str,
    name_hint: Option<&str>,
    strictness: Strictness,
    api_key: Option<&str>,
) -> Result<EvaluationRecord, EvalError> {
    let policy = RetryPolicy::new(MAX_ATTEMPTS, BASE_RETRY_DELAY);
    let prompt = build_prompt(rubric, essay, name_hint, strictness);

    let mut last_error: Option<LlmError> = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            let delay = policy.backoff_delay(attempt - 1);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying evaluation after transient failure"
            );
            sleep(delay).await;
        }

        match attempt_evaluation(client, &prompt, rubric, name_hint, strictness, api_key).await {
            Ok(record) => {
                info!(
                    student = %record.student_name,
                    score = record.overall_score,
                    attempt = attempt + 1,
                    "essay evaluated"
                );
                return Ok(record);
            }
            Err(LlmError::ContentBlocked(reason)) => {
                return Err(EvalError::ContentBlocked(reason));
            }
            Err(err) if err.is_retryable() => {
                warn!(attempt = attempt + 1, %err, "evaluation attempt failed");
                last_error = Some(err);
            }
            Err(err) => {
                return Err(EvalError::Exhausted {
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                });
            }
        }
    }

    Err(EvalError::Exhausted {
        attempts: policy.max_attempts,
        last_error: last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    })
}

async fn attempt_evaluation(
    client: &GeminiClient,
    prompt: &str,
    rubric: &Rubric,
    name_hint: Option<&str>,
    strictness: Strictness,
    api_key: Option<&str>,
) -> Result<EvaluationRecord, LlmError> {
    let raw = client
        .generate(prompt, strictness.temperature(), api_key)
        .await?;

    let value = parse_model_json(&raw)
        .map_err(|err| LlmError::Malformed(format!("response is not valid JSON: {err}")))?;

    Ok(repair_record(&value, rubric, name_hint))
}

/// Evaluates every essay found in an extracted document, concurrently with
/// staggered launches. Returns records in original segment order; per-essay
/// terminal failures become synthetic error records rather than aborting
/// the batch.
pub async fn evaluate_batch(
    client: &GeminiClient,
    text: &str,
    rubric: &Rubric,
    strictness: Strictness,
    api_key: Option<&str>,
) -> Vec<EvaluationRecord> {
    let essays = split_essays(text);
    info!(count = essays.len(), "document segmented into essays");

    let client = client.clone();
    let rubric = rubric.clone();
    let api_key = api_key.map(str::to_string);

    collect_batch(essays, move |_index, essay, hint| {
        let client = client.clone();
        let rubric = rubric.clone();
        let api_key = api_key.clone();
        async move {
            evaluate_essay(
                &client,
                &rubric,
                &essay,
                hint.as_deref(),
                strictness,
                api_key.as_deref(),
            )
            .await
        }
    })
    .await
}

/// Fan-out/fan-in core of the orchestrator, generic over the evaluation
/// function so the ordering and failure-containment rules are testable
/// without a live model.
async fn collect_batch<F, Fut>(essays: Vec<String>, eval_fn: F) -> Vec<EvaluationRecord>
where
    F: Fn(usize, String, Option<String>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<EvaluationRecord, EvalError>> + Send + 'static,
{
    let mut tasks = Vec::new();

    for (index, essay) in essays.into_iter().enumerate() {
        if essay.trim().is_empty() {
            warn!(index, "skipping empty essay segment");
            continue;
        }

        let hint = extract_student_name(&essay);
        let eval_fn = eval_fn.clone();
        let position = tasks.len();

        tasks.push(tokio::spawn(async move {
            if position > 0 {
                sleep(stagger_delay()).await;
            }
            let fallback_name = hint
                .clone()
                .unwrap_or_else(|| format!("Failed_Essay_{}", position + 1));
            match eval_fn(index, essay, hint).await {
                Ok(record) => record,
                Err(err) => {
                    warn!(index, %err, "essay evaluation failed terminally");
                    EvaluationRecord::failure(fallback_name, err.to_string())
                }
            }
        }));
    }

    let results = futures::future::join_all(tasks).await;

    results
        .into_iter()
        .enumerate()
        .map(|(position, result)| {
            result.unwrap_or_else(|err| {
                warn!(position, %err, "evaluation task aborted");
                EvaluationRecord::failure(
                    format!("Failed_Essay_{}", position + 1),
                    "evaluation task aborted unexpectedly",
                )
            })
        })
        .collect()
}

fn stagger_delay() -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=STAGGER_JITTER_MS);
    STAGGER_BASE + Duration::from_millis(jitter)
}

/// Builds the single evaluation prompt: rubric and essay embedded verbatim,
/// strictness wording, and the exact JSON shape the response must take.
fn build_prompt(
    rubric: &Rubric,
    essay: &str,
    name_hint: Option<&str>,
    strictness: Strictness,
) -> String {
    let criteria_lines: String = rubric
        .criteria
        .iter()
        .map(|criterion| {
            format!(
                "        {{ \"name\": \"{}\", \"score\": number (0-{max}), \"max_score\": {max}, \"feedback\": \"...\" }}",
                criterion.name,
                max = criterion.max_score
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    let student_name = name_hint.unwrap_or("Unknown");
    let total = rubric.total_possible();

    format!(
        r#"Please act as an academic evaluator. Evaluate the following essay based STRICTLY on the provided rubric.

Evaluation task:
1. Read the essay carefully.
2. Use ONLY the criteria and scoring scales defined in the RUBRIC section below.
3. {strictness_instruction}
4. Score each criterion numerically within its stated maximum and give concise, specific feedback explaining the score.
5. Calculate "overall_score" as the simple sum of the individual criterion scores (maximum {total}).
6. Provide 3-5 overall "suggestions" for improvement, focusing on the most impactful areas.
7. Identify 5-7 "highlighted_passages": exact quotes from the essay (each under 120 characters) that exemplify weaknesses or strengths, with the "issue", a concrete "suggestion", and an optional "example_revision".
8. Provide 3-5 "mini_lessons": short general writing principles relevant to this essay's weakest criteria.
9. Output ONLY valid JSON in exactly the following format, with no markdown fences or text outside the JSON.

RUBRIC:
{rubric_text}

Essay:
{essay}

JSON output format:
{{
    "student_name": "{student_name}",
    "overall_score": number,
    "criteria": [
{criteria_lines}
    ],
    "suggestions": ["...", "...", "..."],
    "highlighted_passages": [
        {{ "text": "...", "issue": "...", "suggestion": "...", "example_revision": "..." }}
    ],
    "mini_lessons": ["...", "..."]
}}
"#,
        strictness_instruction = strictness.instruction(),
        rubric_text = rubric.text,
        essay = essay,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictness_parses_and_orders_temperatures() {
        assert_eq!(Strictness::parse("Strict"), Strictness::Strict);
        assert_eq!(Strictness::parse("GENEROUS"), Strictness::Generous);
        assert_eq!(Strictness::parse("anything else"), Strictness::Standard);
        assert_eq!(Strictness::parse(""), Strictness::Standard);

        assert!(Strictness::Strict.temperature() < Strictness::Standard.temperature());
        assert!(Strictness::Standard.temperature() < Strictness::Generous.temperature());
    }

    #[test]
    fn prompt_embeds_rubric_essay_and_mode() {
        let rubric = Rubric::default_rubric();
        let prompt = build_prompt(
            &rubric,
            "Student Name: Jane Doe\nAn essay about tides.",
            Some("Jane Doe"),
            Strictness::Strict,
        );
        assert!(prompt.contains("Thesis & Argument"));
        assert!(prompt.contains("An essay about tides."));
        assert!(prompt.contains("Grade strictly"));
        assert!(prompt.contains("\"student_name\": \"Jane Doe\""));
        assert!(prompt.contains("mini_lessons"));
    }

    #[test]
    fn failure_records_carry_the_error_shape() {
        let record = EvaluationRecord::failure("Failed_Essay_2", "rate limit");
        assert!(record.error);
        assert_eq!(record.criteria.len(), 1);
        assert_eq!(record.criteria[0].name, "Processing Error");
        assert!((record.overall_score - 0.0).abs() < f64::EPSILON);
        assert_eq!(record.error_message.as_deref(), Some("rate limit"));
    }

    #[tokio::test]
    async fn batch_preserves_order_and_contains_failures() {
        let essays = vec![
            "Student Name: Jane Doe\nfirst essay body".to_string(),
            "Student Name: John Roe\nsecond essay body".to_string(),
            "Student Name: Mary Sue\nthird essay body".to_string(),
        ];

        let records = collect_batch(essays, |index, _essay, hint| async move {
            if index == 1 {
                Err(EvalError::Exhausted {
                    attempts: 3,
                    last_error: "model unavailable".to_string(),
                })
            } else {
                let mut record = EvaluationRecord::failure("placeholder", "unused");
                record.error = false;
                record.error_message = None;
                record.student_name = hint.unwrap_or_default();
                record.overall_score = index as f64;
                Ok(record)
            }
        })
        .await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].student_name, "Jane Doe");
        assert!(!records[0].error);
        assert!(records[1].error);
        assert_eq!(records[1].student_name, "John Roe");
        assert!(records[1].error_message.as_deref().unwrap().contains("model unavailable"));
        assert_eq!(records[2].student_name, "Mary Sue");
        assert!((records[2].overall_score - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_segments_are_skipped() {
        let essays = vec!["   ".to_string(), "Name: Jane Doe\nbody".to_string()];
        let records = collect_batch(essays, |_, _, hint| async move {
            let mut record = EvaluationRecord::failure("x", "unused");
            record.error = false;
            record.student_name = hint.unwrap_or_default();
            Ok(record)
        })
        .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].student_name, "Jane Doe");
    }
}
