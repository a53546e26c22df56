use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::eval::{self, Strictness};
use crate::extract::extract_text;
use crate::report::ReportSections;
use crate::rubric::Rubric;
use crate::web::{ApiMessage, AppState, json_error};

pub fn router() -> Router<AppState> {
    Router::new().route("/evaluate", post(evaluate_upload))
}

struct UploadedFile {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct EvaluateForm {
    essay: Option<UploadedFile>,
    rubric_file: Option<UploadedFile>,
    rubric_text: Option<String>,
    rubric_id: Option<String>,
    strictness: Option<String>,
    api_key: Option<String>,
    include_criteria: Option<String>,
    include_passages: Option<String>,
    include_suggestions: Option<String>,
    include_mini_lessons: Option<String>,
}

/// `POST /evaluate` — extracts the uploaded document, segments and evaluates
/// every essay in it, stores the batch for later report downloads, and
/// returns either an inline single-essay summary or the per-essay summary
/// list for a multi-essay document.
async fn evaluate_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<ApiMessage>)> {
    let form = read_form(multipart)
        .await
        .map_err(|message| json_error(StatusCode::BAD_REQUEST, message))?;

    let Some(essay) = form.essay.as_ref() else {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "An essay file is required.",
        ));
    };

    info!(
        filename = %essay.filename,
        size = essay.bytes.len(),
        "received evaluation request"
    );

    let essay_text = extract_text(&essay.bytes, &essay.filename, &essay.content_type)
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.to_string()))?;

    if essay_text.trim().is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            format!(
                "The uploaded file '{}' contains no readable text.",
                essay.filename
            ),
        ));
    }

    let rubric = resolve_rubric(&state, &form).await;
    let strictness = Strictness::parse(form.strictness.as_deref().unwrap_or(""));
    let sections = ReportSections {
        include_criteria: toggle(form.include_criteria.as_deref()),
        include_passages: toggle(form.include_passages.as_deref()),
        include_suggestions: toggle(form.include_suggestions.as_deref()),
        include_mini_lessons: toggle(form.include_mini_lessons.as_deref()),
    };

    let records = eval::evaluate_batch(
        state.gemini(),
        &essay_text,
        &rubric,
        strictness,
        form.api_key.as_deref(),
    )
    .await;

    if records.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Evaluation failed: no valid essay content found in the document after processing.",
        ));
    }

    if records.len() == 1 {
        let record = &records[0];
        let filename = format!("{}_Evaluation_Report.pdf", safe_file_stem(&record.student_name));

        let mut stored = HashMap::new();
        stored.insert(filename.clone(), record.clone());
        let session_id = state.sessions().put(stored, sections).await;
        info!(%session_id, "stored single-essay evaluation");

        Ok(Json(json!({
            "evaluation_status": "single",
            "session_id": session_id.to_string(),
            "filename": filename,
            "student_name": record.student_name,
            "overall_score": record.overall_score,
            "max_score": record.max_score_total(),
            "error": record.error,
        })))
    } else {
        let mut stored = HashMap::new();
        let mut results = Vec::new();

        for (i, record) in records.iter().enumerate() {
            let filename = format!(
                "{}_Evaluation_{}.pdf",
                safe_file_stem(&record.student_name),
                i + 1
            );
            stored.insert(filename.clone(), record.clone());
            results.push(json!({
                "id": i,
                "filename": filename,
                "student_name": record.student_name,
                "overall_score": record.overall_score,
                "max_score": record.max_score_total(),
                "status": if record.error { "Error" } else { "Completed" },
            }));
        }

        let count = results.len();
        let session_id = state.sessions().put(stored, sections).await;
        info!(%session_id, count, "stored multi-essay evaluation batch");

        Ok(Json(json!({
            "evaluation_status": "multiple",
            "session_id": session_id.to_string(),
            "count": count,
            "results": results,
        })))
    }
}

async fn read_form(mut multipart: Multipart) -> Result<EvaluateForm, String> {
    let mut form = EvaluateForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| format!("invalid multipart payload: {err}"))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "essay" | "rubric_file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| format!("failed to read uploaded file: {err}"))?
                    .to_vec();
                let file = UploadedFile {
                    filename,
                    content_type,
                    bytes,
                };
                if name == "essay" {
                    form.essay = Some(file);
                } else {
                    form.rubric_file = Some(file);
                }
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| format!("failed to read form field: {err}"))?;
                match name.as_str() {
                    "rubric_text" => form.rubric_text = Some(value),
                    "rubric_id" => form.rubric_id = Some(value),
                    "strictness" => form.strictness = Some(value),
                    "api_key" => form.api_key = Some(value),
                    "include_criteria" => form.include_criteria = Some(value),
                    "include_passages" => form.include_passages = Some(value),
                    "include_suggestions" => form.include_suggestions = Some(value),
                    "include_mini_lessons" => form.include_mini_lessons = Some(value),
                    other => warn!(field = other, "ignoring unknown form field"),
                }
            }
        }
    }

    Ok(form)
}

/// Rubric precedence: uploaded file, then inline text, then stored id, then
/// the built-in default. A failed custom rubric degrades to the next source
/// rather than failing the evaluation.
async fn resolve_rubric(state: &AppState, form: &EvaluateForm) -> Rubric {
    if let Some(file) = &form.rubric_file {
        let lower = file.filename.to_ascii_lowercase();
        if !(lower.ends_with(".txt") || lower.ends_with(".pdf")) {
            warn!(filename = %file.filename, "ignoring rubric file with unsupported extension");
        } else {
            match extract_text(&file.bytes, &file.filename, &file.content_type) {
                Ok(text) if !text.trim().is_empty() => {
                    info!(filename = %file.filename, "using rubric from uploaded file");
                    return Rubric::from_text(None, text);
                }
                Ok(_) => warn!(filename = %file.filename, "uploaded rubric file is empty, ignoring"),
                Err(err) => warn!(%err, "failed to extract uploaded rubric file, ignoring"),
            }
        }
    }

    if let Some(text) = form.rubric_text.as_deref() {
        if !text.trim().is_empty() {
            info!("using rubric text provided inline");
            return Rubric::from_text(None, text);
        }
    }

    if let Some(id) = form.rubric_id.as_deref() {
        match state.rubrics().read(id).await {
            Ok((content, name)) => {
                info!(id, "using saved rubric");
                return Rubric::from_text(name, content);
            }
            Err(err) => warn!(%err, id, "saved rubric unavailable, falling back"),
        }
    }

    info!("no custom rubric provided, using the default rubric");
    Rubric::default_rubric()
}

/// Boolean form toggles default to true; only an explicit negative turns a
/// section off.
fn toggle(raw: Option<&str>) -> bool {
    match raw {
        Some(value) => !matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "false" | "0" | "no" | "off"
        ),
        None => true,
    }
}

/// Filename-safe stem derived from a student name.
fn safe_file_stem(name: &str) -> String {
    let sanitized = sanitize_filename::sanitize(name);
    let collapsed: String = sanitized
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if collapsed.chars().all(|c| c == '_') || collapsed.is_empty() {
        "Student".to_string()
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_default_on_and_honor_negatives() {
        assert!(toggle(None));
        assert!(toggle(Some("true")));
        assert!(toggle(Some("yes")));
        assert!(!toggle(Some("false")));
        assert!(!toggle(Some("0")));
        assert!(!toggle(Some("OFF")));
    }

    #[test]
    fn file_stems_are_filesystem_safe() {
        assert_eq!(safe_file_stem("Jane Doe"), "Jane_Doe");
        assert_eq!(safe_file_stem("Mary O'Brien"), "Mary_O_Brien");
        assert_eq!(safe_file_stem(""), "Student");
        assert_eq!(safe_file_stem("???"), "Student");

        let traversal = safe_file_stem("../../etc/passwd");
        assert!(!traversal.contains('/'));
        assert!(!traversal.contains('.'));
    }
}
