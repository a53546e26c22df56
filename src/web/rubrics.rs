use axum::{
    Form, Json, Router,
    extract::{Multipart, Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::error::{LlmError, RubricStoreError};
use crate::extract::extract_text;
use crate::rubric::{DEFAULT_RUBRIC_NAME, DEFAULT_RUBRIC_TEXT};
use crate::web::{ApiMessage, AppState, json_error};

const MAX_NAME_LEN: usize = 100;
const MIN_GENERATED_CRITERIA: usize = 3;
const MAX_GENERATED_CRITERIA: usize = 10;
const GENERATION_TEMPERATURE: f64 = 0.4;

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+\.").expect("numbered line pattern"));

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rubrics", get(list_rubrics).post(create_rubric))
        .route(
            "/rubrics/:id",
            get(get_rubric).put(update_rubric).delete(remove_rubric),
        )
        .route("/default-rubric", get(default_rubric))
        .route("/generate-rubric", post(generate_rubric))
        .route("/upload-rubric-file", post(upload_rubric_file))
}

#[derive(Deserialize)]
struct RubricForm {
    content: String,
    #[serde(default)]
    name: Option<String>,
}

async fn list_rubrics(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<ApiMessage>)> {
    let rubrics = state.rubrics().list().await.map_err(store_error)?;
    Ok(Json(json!({ "rubrics": rubrics })))
}

async fn get_rubric(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Value>, (StatusCode, Json<ApiMessage>)> {
    let (content, name) = state.rubrics().read(&id).await.map_err(store_error)?;
    Ok(Json(json!({ "id": id, "name": name, "content": content })))
}

async fn create_rubric(
    State(state): State<AppState>,
    Form(form): Form<RubricForm>,
) -> Result<Response, (StatusCode, Json<ApiMessage>)> {
    validate_rubric_form(&form)?;

    let id = state
        .rubrics()
        .create(&form.content, form.name.as_deref())
        .await
        .map_err(store_error)?;
    let (_, saved_name) = state.rubrics().read(&id).await.map_err(store_error)?;

    info!(%id, "rubric created");
    let body = json!({
        "id": id,
        "name": saved_name.or(form.name),
        "message": "Rubric saved successfully",
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn update_rubric(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Form(form): Form<RubricForm>,
) -> Result<Json<Value>, (StatusCode, Json<ApiMessage>)> {
    validate_rubric_form(&form)?;

    state
        .rubrics()
        .update(&id, &form.content, form.name.as_deref())
        .await
        .map_err(store_error)?;
    let (_, saved_name) = state.rubrics().read(&id).await.map_err(store_error)?;

    info!(%id, "rubric updated");
    Ok(Json(json!({
        "id": id,
        "name": saved_name.or(form.name),
        "message": "Rubric updated successfully",
    })))
}

async fn remove_rubric(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, (StatusCode, Json<ApiMessage>)> {
    let deleted = state.rubrics().delete(&id).await.map_err(store_error)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(json_error(
            StatusCode::NOT_FOUND,
            format!("Rubric with ID {id} not found"),
        ))
    }
}

async fn default_rubric() -> Json<Value> {
    Json(json!({
        "name": DEFAULT_RUBRIC_NAME,
        "content": DEFAULT_RUBRIC_TEXT,
    }))
}

#[derive(Deserialize)]
struct GenerateRubricForm {
    subject: String,
    level: String,
    #[serde(default)]
    criteria_count: Option<i64>,
    #[serde(default)]
    api_key: Option<String>,
}

/// `POST /generate-rubric` — asks the model to write a fresh rubric for a
/// subject and level. The result is returned for review, not saved.
async fn generate_rubric(
    State(state): State<AppState>,
    Form(form): Form<GenerateRubricForm>,
) -> Result<Json<Value>, (StatusCode, Json<ApiMessage>)> {
    let subject = form.subject.trim();
    let level = form.level.trim();
    if subject.is_empty() || level.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Subject and level are required.",
        ));
    }

    let requested = form.criteria_count.unwrap_or(5);
    let criteria_count =
        requested.clamp(MIN_GENERATED_CRITERIA as i64, MAX_GENERATED_CRITERIA as i64) as usize;
    if requested != criteria_count as i64 {
        warn!(requested, clamped = criteria_count, "criteria count clamped");
    }

    let prompt = generation_prompt(subject, level, criteria_count);
    let generated = state
        .gemini()
        .generate_text(&prompt, GENERATION_TEMPERATURE, form.api_key.as_deref())
        .await
        .map_err(|err| match err {
            LlmError::MissingKey => json_error(
                StatusCode::BAD_REQUEST,
                "API key is required for rubric generation.",
            ),
            other => {
                error!(%other, "rubric generation failed");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to generate rubric: {other}"),
                )
            }
        })?;

    let generated = generated.trim().to_string();
    let numbered = NUMBERED_LINE.find_iter(&generated).count() as i64;
    if (numbered - criteria_count as i64).abs() > 1 {
        warn!(
            found = numbered,
            requested = criteria_count,
            "generated rubric criteria count differs from request"
        );
    }

    let name = generated
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Generated {subject} Rubric"));

    Ok(Json(json!({
        "name": name,
        "content": generated,
        "subject": subject,
        "level": level,
        "criteria_requested": criteria_count,
    })))
}

/// `POST /upload-rubric-file` — extracts rubric text out of a .txt or .pdf
/// upload so the client can edit it before use.
async fn upload_rubric_file(
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<ApiMessage>)> {
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        json_error(
            StatusCode::BAD_REQUEST,
            format!("invalid multipart payload: {err}"),
        )
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("rubric").to_string();
        let content_type = field.content_type().unwrap_or("").to_string();
        let bytes = field.bytes().await.map_err(|err| {
            json_error(
                StatusCode::BAD_REQUEST,
                format!("failed to read uploaded file: {err}"),
            )
        })?;

        let lower = filename.to_ascii_lowercase();
        if !(lower.ends_with(".txt") || lower.ends_with(".pdf")) {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "Invalid file type. Only .txt and .pdf files are supported for rubric upload.",
            ));
        }

        let text = extract_text(&bytes, &filename, &content_type)
            .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.to_string()))?;

        if text.trim().is_empty() {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                format!("The uploaded file '{filename}' contains no readable text."),
            ));
        }

        info!(%filename, "rubric file uploaded and extracted");
        return Ok(Json(json!({ "text": text, "filename": filename })));
    }

    Err(json_error(
        StatusCode::BAD_REQUEST,
        "A rubric file is required.",
    ))
}

fn validate_rubric_form(form: &RubricForm) -> Result<(), (StatusCode, Json<ApiMessage>)> {
    if form.content.trim().is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Rubric content cannot be empty.",
        ));
    }
    if let Some(name) = &form.name {
        if name.len() > MAX_NAME_LEN {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "Rubric name cannot exceed 100 characters.",
            ));
        }
    }
    Ok(())
}

fn store_error(err: RubricStoreError) -> (StatusCode, Json<ApiMessage>) {
    match err {
        RubricStoreError::NotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            format!("Rubric with ID {id} not found"),
        ),
        RubricStoreError::InvalidIdentifier => {
            json_error(StatusCode::BAD_REQUEST, "Invalid rubric ID format.")
        }
        RubricStoreError::Io(err) => {
            error!(?err, "rubric storage error");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server error accessing rubric storage.",
            )
        }
    }
}

fn generation_prompt(subject: &str, level: &str, criteria_count: usize) -> String {
    format!(
        r#"Generate an academic essay evaluation rubric tailored for the following specifications:
- Subject: {subject}
- Educational Level: {level} (e.g., High School, Undergraduate, Graduate)
- Number of Criteria: {criteria_count}
- Scoring Scale per Criterion: 0-10 points

Instructions for the rubric structure:
1. Start with a clear title line incorporating the subject and level, for example "{subject} Essay Rubric ({level})".
2. List exactly {criteria_count} numbered criteria relevant to essay writing in the specified subject and level.
3. For each criterion, state the criterion name clearly, indicate the scoring scale as (0-10), and provide 3-4 concise bullet points describing the key elements assessed, appropriate for the educational level.
4. Keep the overall tone constructive and academic.
5. Output only the rubric title and the numbered criteria list, with no introductions or summaries.
"#
    )
}
