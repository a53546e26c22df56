use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tokio::{fs, task};
use uuid::Uuid;

/// Converts a DOCX report to PDF bytes through headless LibreOffice.
///
/// The work happens in a per-call scratch directory under the OS temp dir,
/// removed on every exit path. Callers treat failure as "no converter
/// available" and fall back to serving the DOCX itself.
pub async fn docx_bytes_to_pdf(docx_bytes: &[u8], stem: &str) -> Result<Vec<u8>> {
    let scratch = std::env::temp_dir().join(format!("essay-grader-{}", Uuid::new_v4()));
    fs::create_dir_all(&scratch)
        .await
        .context("failed to create conversion scratch directory")?;

    let result = convert_in_dir(&scratch, docx_bytes, stem).await;
    let _ = fs::remove_dir_all(&scratch).await;
    result
}

async fn convert_in_dir(
    scratch: &std::path::Path,
    docx_bytes: &[u8],
    stem: &str,
) -> Result<Vec<u8>> {
    let docx_path = scratch.join(format!("{stem}.docx"));
    fs::write(&docx_path, docx_bytes)
        .await
        .context("failed to write DOCX for conversion")?;

    let outdir = scratch.to_string_lossy().to_string();
    let input = docx_path.to_string_lossy().to_string();

    let output = task::spawn_blocking(move || {
        Command::new("libreoffice")
            .args([
                "--headless",
                "--convert-to",
                "pdf:writer_pdf_Export",
                "--outdir",
                &outdir,
                &input,
            ])
            .output()
    })
    .await
    .context("conversion task failed")?
    .context("failed to execute libreoffice")?;

    if !output.status.success() {
        return Err(anyhow!(
            "libreoffice conversion exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let pdf_path = scratch.join(format!("{stem}.pdf"));
    fs::read(&pdf_path)
        .await
        .with_context(|| format!("converted PDF missing at {}", pdf_path.display()))
}
