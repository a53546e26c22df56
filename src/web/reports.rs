use std::io::{Cursor, Write};

use axum::{
    Json, Router,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;
use zip::{CompressionMethod, write::SimpleFileOptions};

use crate::report::{self, convert};
use crate::web::{ApiMessage, AppState, json_error};

const PDF_CONTENT_TYPE: &str = "application/pdf";
const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/download-report/:session_id/:filename",
            get(download_report),
        )
        .route("/generate-all-zip", post(generate_all_zip))
}

/// `GET /download-report/{session_id}/{filename}` — renders one stored
/// evaluation on demand and streams the report.
async fn download_report(
    State(state): State<AppState>,
    AxumPath((session_id, filename)): AxumPath<(String, String)>,
) -> Result<Response, (StatusCode, Json<ApiMessage>)> {
    let session_id = parse_session_id(&session_id)?;

    let Some((record, sections)) = state.sessions().get(session_id, &filename).await else {
        let message = if state.sessions().data(session_id).await.is_some() {
            "Requested report file not found in this session."
        } else {
            "Evaluation session not found or expired."
        };
        return Err(json_error(StatusCode::NOT_FOUND, message));
    };

    let docx = report::render_report(&record, sections);
    if docx.is_empty() {
        error!(%session_id, %filename, "report rendering produced no bytes");
        return Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate the report for this essay.",
        ));
    }

    info!(%session_id, %filename, "serving evaluation report");
    Ok(serve_report(docx, &filename).await)
}

#[derive(Deserialize)]
struct ZipRequest {
    session_id: Option<String>,
}

/// `POST /generate-all-zip` — bundles every report in a session into one
/// deflate archive. Individual render failures are counted and reported in
/// headers; producing nothing at all is a hard failure.
async fn generate_all_zip(
    State(state): State<AppState>,
    Json(body): Json<ZipRequest>,
) -> Result<Response, (StatusCode, Json<ApiMessage>)> {
    let Some(raw_id) = body.session_id else {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Missing 'session_id' in request body.",
        ));
    };
    let session_id = parse_session_id(&raw_id)?;

    let Some(data) = state.sessions().data(session_id).await else {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            "Evaluation session not found or expired.",
        ));
    };
    if data.records.is_empty() {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            "No evaluation reports found for this session.",
        ));
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let mut generated: usize = 0;
    let mut failed: usize = 0;

    for (filename, record) in &data.records {
        let docx = report::render_report(record, data.sections);
        if docx.is_empty() {
            warn!(%filename, "skipping report that rendered no bytes");
            failed += 1;
            continue;
        }

        let (entry_name, bytes) = match convert::docx_bytes_to_pdf(&docx, file_stem(filename)).await
        {
            Ok(pdf) => (filename.clone(), pdf),
            Err(err) => {
                warn!(%err, %filename, "PDF conversion unavailable, bundling DOCX report");
                (format!("{}.docx", file_stem(filename)), docx)
            }
        };

        let written = writer
            .start_file(entry_name.as_str(), options)
            .map_err(|err| err.to_string())
            .and_then(|_| writer.write_all(&bytes).map_err(|err| err.to_string()));

        match written {
            Ok(()) => generated += 1,
            Err(err) => {
                error!(%err, %filename, "failed to add report to archive");
                failed += 1;
            }
        }
    }

    if generated == 0 {
        return Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate any valid reports for the ZIP archive.",
        ));
    }

    let cursor = writer.finish().map_err(|err| {
        error!(?err, "failed to finalize ZIP archive");
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server error occurred while generating the ZIP archive.",
        )
    })?;
    let bytes = cursor.into_inner();

    info!(%session_id, generated, failed, size = bytes.len(), "ZIP archive generated");

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, "application/zip");
    insert_header(
        &mut headers,
        header::CONTENT_DISPOSITION,
        &format!(
            "attachment; filename=Evaluation_Reports_{}.zip",
            &raw_id[..raw_id.len().min(8)]
        ),
    );
    headers.insert(
        "X-Files-Generated",
        generated.to_string().parse().expect("numeric header"),
    );
    headers.insert(
        "X-Files-Failed",
        failed.to_string().parse().expect("numeric header"),
    );
    insert_header(
        &mut headers,
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        "Content-Disposition, X-Files-Generated, X-Files-Failed",
    );

    Ok((headers, bytes).into_response())
}

/// Streams a rendered report, preferring PDF and falling back to the DOCX
/// itself when no converter is available. Something downloadable always
/// comes back.
async fn serve_report(docx: Vec<u8>, filename: &str) -> Response {
    let stem = file_stem(filename);

    let (bytes, served_name, content_type) = match convert::docx_bytes_to_pdf(&docx, stem).await {
        Ok(pdf) => (pdf, filename.to_string(), PDF_CONTENT_TYPE),
        Err(err) => {
            warn!(%err, %filename, "PDF conversion unavailable, serving DOCX report");
            (docx, format!("{stem}.docx"), DOCX_CONTENT_TYPE)
        }
    };

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, content_type);
    insert_header(
        &mut headers,
        header::CONTENT_DISPOSITION,
        &format!("attachment; filename=\"{served_name}\""),
    );
    insert_header(
        &mut headers,
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        "Content-Disposition",
    );

    (headers, bytes).into_response()
}

fn parse_session_id(raw: &str) -> Result<Uuid, (StatusCode, Json<ApiMessage>)> {
    Uuid::parse_str(raw).map_err(|_| {
        json_error(
            StatusCode::NOT_FOUND,
            "Evaluation session not found or expired.",
        )
    })
}

fn file_stem(filename: &str) -> &str {
    filename
        .strip_suffix(".pdf")
        .or_else(|| filename.strip_suffix(".docx"))
        .unwrap_or(filename)
}

fn insert_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = value.parse() {
        headers.insert(name, value);
    }
}
